//! The manager's view of the shared buffer.
//!
//! [`SharedBuffer`] owns the buffer properties and the registry buffer. Every
//! operation that moves the cursor or touches the buffers takes `&mut self`,
//! so only the thread holding the `SharedBuffer` (the manager) can call them.
//!
//! Consumers get a [`LinkedBufferFactory`] instead: a cheap, cloneable handle
//! that can be sent to other threads and only creates linked elements.
//!
//! # Tick
//!
//! ```text
//! process_linked_push_requests(true)   // apply consumer edits
//! ... advance the simulation ...
//! increment_buffer_index(true)
//! write_buffer()
//! prepare_linked_buffers_for_pull()    // publish to consumers
//! ```

use crate::config::BufferConfig;
use crate::error::{Result, SimBufError};
use crate::linked::{
    LinkedBuffer, LinkedBufferArray, LinkedBufferId, LinkedBufferProperties, LinkedRegistry,
    LinkedVariable, StructuralLock,
};
use crate::properties::BufferProperties;
use crate::registry::{Registry, Variable};
use crate::registry_buffer::RegistryBuffer;
use crate::request::{CropBufferRequest, FillBufferRequest};
use crate::tools;
use parking_lot::{ReentrantMutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Walks the recorded frames of a shared buffer, see
/// [`SharedBuffer::apply_processor`].
#[cfg_attr(test, mockall::automock)]
pub trait BufferProcessor {
    /// Called once before the walk with the root of the buffered tree.
    fn initialize(&mut self, root: &Arc<Registry>);

    /// Walk from the in-point to the out-point, or backward when `false`.
    fn go_forward(&self) -> bool {
        true
    }

    /// Called for each frame with the variables loaded from that frame.
    /// Values left in the variables are written back to the frame.
    fn process(&mut self, start_index: usize, end_index: usize, current_index: usize);
}

struct FactoryShared {
    registry_buffer: RegistryBuffer,
    lock: StructuralLock,
    linked_buffers: Arc<LinkedBufferArray>,
    linked_properties: RwLock<Vec<Weak<LinkedBufferProperties>>>,
    track_dirty_pushes: bool,
    disposed: AtomicBool,
}

/// Creates linked elements for consumers. Cheap to clone, usable from any
/// thread.
///
/// The manager only keeps weak references to what it hands out: an element
/// is served as long as its consumer holds it and forgotten on the next
/// `prepare_linked_buffers_for_pull` after it is dropped.
#[derive(Clone)]
pub struct LinkedBufferFactory {
    shared: Arc<FactoryShared>,
}

impl LinkedBufferFactory {
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(SimBufError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Root of the buffered tree.
    pub fn root_registry(&self) -> &Arc<Registry> {
        self.shared.registry_buffer.root()
    }

    /// Link a consumer tree. See [`LinkedRegistry`].
    pub fn new_linked_registry(&self, root: Arc<Registry>) -> Result<Arc<LinkedRegistry>> {
        self.check_disposed()?;
        let linked = LinkedRegistry::new(
            root,
            self.shared.registry_buffer.clone(),
            Arc::clone(&self.shared.lock),
            self.shared.track_dirty_pushes,
        )?;
        let element: Arc<dyn LinkedBuffer> = linked.clone();
        self.shared.linked_buffers.add(&element);
        Ok(linked)
    }

    /// Link a single consumer variable to the buffer at the same path.
    pub fn new_linked_variable(&self, variable: &Arc<Variable>) -> Result<Arc<LinkedVariable>> {
        self.check_disposed()?;
        let _guard = self.shared.lock.lock();
        let buffer = self.shared.registry_buffer.find_or_create_buffer(variable)?;
        let linked = Arc::new(LinkedVariable::new(Arc::clone(variable), buffer)?);
        let element: Arc<dyn LinkedBuffer> = linked.clone();
        self.shared.linked_buffers.add(&element);
        Ok(linked)
    }

    /// A copy of the buffer properties, refreshed on every
    /// `prepare_linked_buffers_for_pull`.
    pub fn new_linked_buffer_properties(&self) -> Result<Arc<LinkedBufferProperties>> {
        self.check_disposed()?;
        let linked = Arc::new(LinkedBufferProperties::new());
        self.shared.linked_properties.write().push(Arc::downgrade(&linked));
        Ok(linked)
    }
}

/// Ring-buffered store of every variable of a tree, driven by the manager.
pub struct SharedBuffer {
    properties: BufferProperties,
    factory: LinkedBufferFactory,
}

impl SharedBuffer {
    /// Buffer every variable under `root` with `initial_size` frames, using
    /// the default configuration otherwise.
    ///
    /// A buffer holds at least one frame: an `initial_size` of 0 gives a
    /// single-frame buffer. Use [`with_config`](Self::with_config) to reject
    /// it instead.
    pub fn new(root: Arc<Registry>, initial_size: usize) -> Self {
        let config = BufferConfig {
            initial_size: initial_size.max(1),
            ..BufferConfig::default()
        };
        Self::build(root, &config)
    }

    /// Buffer every variable under `root` as configured.
    ///
    /// Fails with [`SimBufError::Config`] if the configuration does not
    /// validate.
    pub fn with_config(root: Arc<Registry>, config: &BufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(root, config))
    }

    fn build(root: Arc<Registry>, config: &BufferConfig) -> Self {
        let size = config.initial_size;
        let registry_buffer = RegistryBuffer::new(root, size, config.parallel_threshold);
        let shared = FactoryShared {
            registry_buffer,
            lock: Arc::new(ReentrantMutex::new(())),
            linked_buffers: LinkedBufferArray::new(
                LinkedBufferId::INVALID,
                config.track_dirty_pushes,
            ),
            linked_properties: RwLock::new(Vec::new()),
            track_dirty_pushes: config.track_dirty_pushes,
            disposed: AtomicBool::new(false),
        };
        Self {
            properties: BufferProperties::new(size),
            factory: LinkedBufferFactory {
                shared: Arc::new(shared),
            },
        }
    }

    /// Handle for consumers.
    pub fn factory(&self) -> LinkedBufferFactory {
        self.factory.clone()
    }

    pub fn properties(&self) -> &BufferProperties {
        &self.properties
    }

    pub fn root_registry(&self) -> &Arc<Registry> {
        self.registry_buffer().root()
    }

    pub fn registry_buffer(&self) -> &RegistryBuffer {
        &self.factory.shared.registry_buffer
    }

    pub fn is_disposed(&self) -> bool {
        self.factory.is_disposed()
    }

    /// Record every variable at the current index.
    pub fn write_buffer(&mut self) {
        if self.is_disposed() {
            return;
        }
        self.registry_buffer()
            .write_buffer_at(self.properties.current_index());
    }

    /// Load every variable from the current index. Returns `true` if any
    /// variable changed.
    pub fn read_buffer(&mut self) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.registry_buffer()
            .read_buffer_at(self.properties.current_index())
    }

    pub fn increment_buffer_index(&mut self, update_bounds: bool) -> usize {
        self.properties.increment_index(update_bounds)
    }

    /// Negative steps move backward.
    pub fn increment_buffer_index_by(&mut self, update_bounds: bool, step: isize) -> usize {
        self.properties.increment_index_by(update_bounds, step)
    }

    pub fn decrement_buffer_index(&mut self, step: usize) -> usize {
        self.properties.decrement_index_by(step)
    }

    /// Move the cursor and load the variables from there. Returns `false` if
    /// `index` is out of range or already current.
    pub fn set_current_index(&mut self, index: usize) -> bool {
        if !self.properties.set_current_index(index) {
            return false;
        }
        self.read_buffer();
        true
    }

    pub fn set_in_point(&mut self, index: usize) -> bool {
        self.properties.set_in_point(index)
    }

    pub fn set_out_point(&mut self, index: usize) -> bool {
        self.properties.set_out_point(index)
    }

    /// Change the number of frames, keeping as much of the active window as
    /// fits.
    ///
    /// When shrinking below the active length, the frames closest to the
    /// out-point are kept. The window is moved to start at index 0 and the
    /// cursor keeps its position relative to the window, or snaps to the
    /// out-point if it was outside. Returns `false` for a zero or unchanged
    /// size.
    pub fn resize_buffer(&mut self, new_size: usize) -> bool {
        if self.is_disposed() {
            return false;
        }
        let old = self.properties;
        let size = old.size();
        if new_size == size || new_size == 0 {
            return false;
        }

        let current = old.current_index();
        let active_length = old.active_buffer_length();
        let (start, new_out, new_current) = if new_size < active_length {
            let start = tools::compute_from_index(old.out_point(), new_size, size);
            let new_out = new_size - 1;
            let new_current = if tools::is_inside_bounds(current, start, old.out_point(), size) {
                new_out + 1 - tools::compute_sub_length(current, old.out_point(), size)
            } else {
                new_out
            };
            (start, new_out, new_current)
        } else {
            let new_out = active_length - 1;
            let new_current = if old.is_index_between_bounds(current) {
                tools::compute_sub_length(old.in_point(), current, size) - 1
            } else {
                new_out
            };
            (old.in_point(), new_out, new_current)
        };

        self.registry_buffer().resize_buffer(start, new_size);
        self.properties.reset(new_size, new_current, 0, new_out);
        tracing::debug!("Buffer resized from {} to {}: {}", size, new_size, self.properties);
        self.read_buffer();
        true
    }

    /// Keep only the frames in `[from, to]`. The window is reset to the whole
    /// cropped buffer and the cursor to 0.
    ///
    /// A request with `from > to` keeps the original size, rotated to start at
    /// `from`. Returns `false` if an index is out of range.
    pub fn crop_buffer(&mut self, request: CropBufferRequest) -> bool {
        if self.is_disposed() {
            return false;
        }
        let size = self.properties.size();
        if request.from >= size || request.to >= size {
            tracing::warn!("Ignored crop {:?} on a buffer of {} frames", request, size);
            return false;
        }
        let new_size = request.cropped_size(size);
        self.registry_buffer().resize_buffer(request.from, new_size);
        self.properties.reset(new_size, 0, 0, new_size - 1);
        tracing::debug!("Buffer cropped to {}", self.properties);
        self.read_buffer();
        true
    }

    /// Overwrite `[from, to]` with zeros or with each variable's current value.
    pub fn fill_buffer(&mut self, request: FillBufferRequest) {
        if self.is_disposed() {
            return;
        }
        let length = request.filled_size(self.properties.size());
        if length == 0 {
            tracing::warn!(
                "Ignored fill {:?} on a buffer of {} frames",
                request,
                self.properties.size()
            );
            return;
        }
        self.registry_buffer()
            .fill_buffer(request.zero_fill, request.from, length);
    }

    /// Apply the pending pushes of every consumer. With `write_buffer` the
    /// changed values are also recorded at the current index. Returns `true`
    /// if any buffered variable changed.
    pub fn process_linked_push_requests(&mut self, write_buffer: bool) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.factory
            .shared
            .linked_buffers
            .process_push(write_buffer, &self.properties)
    }

    pub fn flush_linked_push_requests(&mut self) {
        if self.is_disposed() {
            return;
        }
        self.factory.shared.linked_buffers.flush_push();
    }

    /// Publish the current values, the requested samples and the properties
    /// to every consumer.
    pub fn prepare_linked_buffers_for_pull(&mut self) {
        if self.is_disposed() {
            return;
        }
        let shared = &self.factory.shared;
        shared.linked_buffers.prepare_for_pull(&self.properties);

        let live: Vec<Arc<LinkedBufferProperties>> = {
            let mut linked_properties = shared.linked_properties.write();
            linked_properties.retain(|p| p.upgrade().is_some_and(|p| p.is_active()));
            linked_properties.iter().filter_map(Weak::upgrade).collect()
        };
        for linked in live {
            linked.prepare_for_pull(&self.properties);
        }
    }

    /// Whether a consumer waits for a buffer sample.
    pub fn has_request_pending(&self) -> bool {
        !self.is_disposed() && self.factory.shared.linked_buffers.has_request_pending()
    }

    /// Run `processor` over every frame of the active window, then restore
    /// the cursor and reload the variables.
    pub fn apply_processor(&mut self, processor: &mut dyn BufferProcessor) {
        if self.is_disposed() {
            return;
        }
        let lock = Arc::clone(&self.factory.shared.lock);
        let _guard = lock.lock();

        let initial_index = self.properties.current_index();
        let length = self.properties.active_buffer_length();
        processor.initialize(self.root_registry());

        let forward = processor.go_forward();
        let (start, end) = if forward {
            (self.properties.in_point(), self.properties.out_point())
        } else {
            (self.properties.out_point(), self.properties.in_point())
        };
        self.properties.set_current_index(start);

        for _ in 0..length {
            self.read_buffer();
            processor.process(start, end, self.properties.current_index());
            self.write_buffer();
            if forward {
                self.properties.increment_index(false);
            } else {
                self.properties.decrement_index();
            }
        }

        self.properties.set_current_index(initial_index);
        self.read_buffer();
    }

    /// Bytes used by one frame across all variables.
    pub fn single_buffer_frame_memory_size(&self) -> usize {
        self.registry_buffer().registry_memory_size()
    }

    /// Release the buffers and every linked element. Further calls are no-ops
    /// and the factory refuses to create new links.
    pub fn dispose(&mut self) {
        let shared = &self.factory.shared;
        if shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = shared.lock.lock();
        shared.registry_buffer.dispose();
        shared.linked_buffers.dispose();
        let linked_properties: Vec<_> = shared.linked_properties.write().drain(..).collect();
        for linked in linked_properties.iter().filter_map(Weak::upgrade) {
            linked.dispose();
        }
        tracing::debug!("Shared buffer disposed");
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        self.dispose();
    }
}
