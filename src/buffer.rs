//! Per-variable ring buffers and the samples copied out of them.
//!
//! [`TypedBuffer`] is generic over its storage element; [`VariableBuffer`] is
//! the closed set of instantiations, one per [`VariableKind`]. Every buffer
//! moves values in and out of its variable through the variable's 64-bit
//! pattern, so the element type is the only kind-specific part.

use crate::properties::BufferProperties;
use crate::registry::{Value, Variable, VariableKind};
use crate::tools;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Storage element of a [`TypedBuffer`].
pub trait BufferElement: Copy + Default + PartialEq + Send + Sync + 'static {
    const KIND: VariableKind;

    fn from_bits(bits: u64) -> Self;

    fn to_bits(self) -> u64;

    fn into_sample_data(data: Vec<Self>) -> SampleData;
}

impl BufferElement for bool {
    const KIND: VariableKind = VariableKind::Boolean;

    fn from_bits(bits: u64) -> Self {
        bits != 0
    }

    fn to_bits(self) -> u64 {
        self as u64
    }

    fn into_sample_data(data: Vec<Self>) -> SampleData {
        SampleData::Boolean(data)
    }
}

impl BufferElement for i32 {
    const KIND: VariableKind = VariableKind::Integer;

    fn from_bits(bits: u64) -> Self {
        bits as i64 as i32
    }

    fn to_bits(self) -> u64 {
        self as i64 as u64
    }

    fn into_sample_data(data: Vec<Self>) -> SampleData {
        SampleData::Integer(data)
    }
}

impl BufferElement for i64 {
    const KIND: VariableKind = VariableKind::Long;

    fn from_bits(bits: u64) -> Self {
        bits as i64
    }

    fn to_bits(self) -> u64 {
        self as u64
    }

    fn into_sample_data(data: Vec<Self>) -> SampleData {
        SampleData::Long(data)
    }
}

impl BufferElement for f64 {
    const KIND: VariableKind = VariableKind::Double;

    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }

    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }

    fn into_sample_data(data: Vec<Self>) -> SampleData {
        SampleData::Double(data)
    }
}

/// Enum ordinals, `-1` for null.
impl BufferElement for i8 {
    const KIND: VariableKind = VariableKind::Enum;

    fn from_bits(bits: u64) -> Self {
        bits as i64 as i8
    }

    fn to_bits(self) -> u64 {
        self as i64 as u64
    }

    fn into_sample_data(data: Vec<Self>) -> SampleData {
        SampleData::Enum(data)
    }
}

/// Raw data of a [`BufferSample`], one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SampleData {
    Boolean(Vec<bool>),
    Integer(Vec<i32>),
    Long(Vec<i64>),
    Double(Vec<f64>),
    Enum(Vec<i8>),
}

impl SampleData {
    pub fn kind(&self) -> VariableKind {
        match self {
            SampleData::Boolean(_) => VariableKind::Boolean,
            SampleData::Integer(_) => VariableKind::Integer,
            SampleData::Long(_) => VariableKind::Long,
            SampleData::Double(_) => VariableKind::Double,
            SampleData::Enum(_) => VariableKind::Enum,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SampleData::Boolean(d) => d.len(),
            SampleData::Integer(d) => d.len(),
            SampleData::Long(d) => d.len(),
            SampleData::Double(d) => d.len(),
            SampleData::Enum(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value_at(&self, index: usize) -> Option<Value> {
        let bits = match self {
            SampleData::Boolean(d) => d.get(index)?.to_bits(),
            SampleData::Integer(d) => d.get(index)?.to_bits(),
            SampleData::Long(d) => d.get(index)?.to_bits(),
            SampleData::Double(d) => d.get(index)?.to_bits(),
            SampleData::Enum(d) => d.get(index)?.to_bits(),
        };
        Some(Value::from_bits(self.kind(), bits))
    }

    /// Values as `f64`, e.g. to feed a chart. Null enums map to NaN.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        (0..self.len())
            .filter_map(|i| self.value_at(i))
            .map(|v| v.as_f64())
            .collect()
    }
}

/// A copy of a span of one variable's buffer, handed to a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferSample {
    from: usize,
    buffer_size: usize,
    data: SampleData,
    properties: BufferProperties,
}

impl BufferSample {
    pub fn new(
        from: usize,
        buffer_size: usize,
        data: SampleData,
        properties: BufferProperties,
    ) -> Self {
        Self {
            from,
            buffer_size,
            data,
            properties,
        }
    }

    /// Index in the buffer of the first sampled frame.
    pub fn from(&self) -> usize {
        self.from
    }

    /// `(from + sample_length) mod buffer_size`, the index just past the sample.
    pub fn to(&self) -> usize {
        if self.buffer_size == 0 {
            return 0;
        }
        (self.from + self.sample_length()) % self.buffer_size
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn sample_length(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &SampleData {
        &self.data
    }

    pub fn into_data(self) -> SampleData {
        self.data
    }

    /// Buffer properties at the time the sample was taken.
    pub fn properties(&self) -> &BufferProperties {
        &self.properties
    }
}

/// Ring buffer recording one variable.
#[derive(Debug)]
pub struct TypedBuffer<T: BufferElement> {
    variable: Arc<Variable>,
    array: Vec<T>,
}

impl<T: BufferElement> TypedBuffer<T> {
    pub fn new(variable: Arc<Variable>, size: usize) -> Self {
        debug_assert_eq!(variable.kind(), T::KIND);
        Self {
            variable,
            array: vec![T::default(); size],
        }
    }

    pub fn variable(&self) -> &Arc<Variable> {
        &self.variable
    }

    pub fn array(&self) -> &[T] {
        &self.array
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    /// Store the variable's current value at `index`.
    pub fn write_at(&mut self, index: usize) {
        if let Some(slot) = self.array.get_mut(index) {
            *slot = T::from_bits(self.variable.value_as_long_bits());
        }
    }

    /// Load the value at `index` into the variable. Returns `true` if the
    /// variable changed.
    pub fn read_at(&self, index: usize) -> bool {
        match self.array.get(index) {
            Some(value) => self.variable.set_value_from_long_bits(value.to_bits()),
            None => false,
        }
    }

    pub fn value_at(&self, index: usize) -> Option<Value> {
        self.array
            .get(index)
            .map(|v| Value::from_bits(T::KIND, v.to_bits()))
    }

    /// Replace the ring with `length` frames starting at `from`.
    pub fn resize(&mut self, from: usize, length: usize) {
        if from == 0 && length == self.array.len() {
            return;
        }
        self.array = tools::ring_array_copy(&self.array, from, length);
    }

    pub fn copy(&self, from: usize, length: usize, properties: BufferProperties) -> BufferSample {
        let data = T::into_sample_data(tools::ring_array_copy(&self.array, from, length));
        BufferSample::new(from, self.array.len(), data, properties)
    }

    /// Fill a span with zeros, or with the variable's current value.
    pub fn fill(&mut self, zero: bool, from: usize, length: usize) {
        let value = if zero {
            T::default()
        } else {
            T::from_bits(self.variable.value_as_long_bits())
        };
        tools::ring_array_fill(&mut self.array, value, from, length);
    }

    /// Bytes used by one frame.
    pub fn memory_size(&self) -> usize {
        std::mem::size_of::<T>()
    }
}

/// Ring buffer of any kind.
#[derive(Debug)]
pub enum VariableBuffer {
    Boolean(TypedBuffer<bool>),
    Integer(TypedBuffer<i32>),
    Long(TypedBuffer<i64>),
    Double(TypedBuffer<f64>),
    Enum(TypedBuffer<i8>),
}

macro_rules! dispatch {
    ($self:expr, $buffer:ident => $body:expr) => {
        match $self {
            VariableBuffer::Boolean($buffer) => $body,
            VariableBuffer::Integer($buffer) => $body,
            VariableBuffer::Long($buffer) => $body,
            VariableBuffer::Double($buffer) => $body,
            VariableBuffer::Enum($buffer) => $body,
        }
    };
}

impl VariableBuffer {
    /// Create a buffer of `size` frames matching the variable's kind.
    pub fn new(variable: Arc<Variable>, size: usize) -> Self {
        match variable.kind() {
            VariableKind::Boolean => VariableBuffer::Boolean(TypedBuffer::new(variable, size)),
            VariableKind::Integer => VariableBuffer::Integer(TypedBuffer::new(variable, size)),
            VariableKind::Long => VariableBuffer::Long(TypedBuffer::new(variable, size)),
            VariableKind::Double => VariableBuffer::Double(TypedBuffer::new(variable, size)),
            VariableKind::Enum => VariableBuffer::Enum(TypedBuffer::new(variable, size)),
        }
    }

    pub fn kind(&self) -> VariableKind {
        dispatch!(self, b => b.variable().kind())
    }

    pub fn variable(&self) -> &Arc<Variable> {
        dispatch!(self, b => b.variable())
    }

    pub fn len(&self) -> usize {
        dispatch!(self, b => b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write_at(&mut self, index: usize) {
        dispatch!(self, b => b.write_at(index))
    }

    pub fn read_at(&self, index: usize) -> bool {
        dispatch!(self, b => b.read_at(index))
    }

    pub fn value_at(&self, index: usize) -> Option<Value> {
        dispatch!(self, b => b.value_at(index))
    }

    pub fn resize(&mut self, from: usize, length: usize) {
        dispatch!(self, b => b.resize(from, length))
    }

    pub fn copy(&self, from: usize, length: usize, properties: BufferProperties) -> BufferSample {
        dispatch!(self, b => b.copy(from, length, properties))
    }

    pub fn fill(&mut self, zero: bool, from: usize, length: usize) {
        dispatch!(self, b => b.fill(zero, from, length))
    }

    pub fn memory_size(&self) -> usize {
        dispatch!(self, b => b.memory_size())
    }
}
