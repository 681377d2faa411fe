//! One consumer variable linked to its buffer.
//!
//! Values cross threads through single-slot mailboxes: the consumer posts a
//! push, the manager posts a pull and answers buffer sample requests.

use super::{LinkedBuffer, LinkedBufferId, PushRequestListener};
use crate::buffer::BufferSample;
use crate::error::{Result, SimBufError};
use crate::properties::BufferProperties;
use crate::registry::{Value, Variable};
use crate::registry_buffer::SharedVariableBuffer;
use crate::request::{BufferSampleRequest, Mailbox, PullRequest, PushRequest};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A consumer variable bound to the buffer of the variable with the same path.
pub struct LinkedVariable {
    id: LinkedBufferId,
    variable: Arc<Variable>,
    buffer: SharedVariableBuffer,
    pull_request: Mailbox<PullRequest>,
    push_request: Mailbox<PushRequest>,
    sample_request: Mailbox<BufferSampleRequest>,
    sample: Mailbox<BufferSample>,
    listeners: RwLock<Vec<Weak<dyn PushRequestListener>>>,
    disposed: AtomicBool,
}

impl LinkedVariable {
    /// Fails with [`SimBufError::KindMismatch`] if `variable` and the buffered
    /// variable are of different kinds.
    pub(crate) fn new(variable: Arc<Variable>, buffer: SharedVariableBuffer) -> Result<Self> {
        let expected = buffer.read().kind();
        if expected != variable.kind() {
            return Err(SimBufError::KindMismatch {
                path: variable.full_name(),
                expected,
                actual: variable.kind(),
            });
        }
        Ok(Self {
            id: LinkedBufferId::next(),
            variable,
            buffer,
            pull_request: Mailbox::new(),
            push_request: Mailbox::new(),
            sample_request: Mailbox::new(),
            sample: Mailbox::new(),
            listeners: RwLock::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }

    /// The consumer's variable.
    pub fn variable(&self) -> &Arc<Variable> {
        &self.variable
    }

    /// The variable the manager records.
    pub fn buffered_variable(&self) -> Arc<Variable> {
        Arc::clone(self.buffer.read().variable())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Value of the pending pull request, or `default` when none is pending.
    pub fn peek_current_value(&self, default: Value) -> Value {
        self.pull_request
            .with_pending(|request| request.map(PullRequest::value))
            .unwrap_or(default)
    }

    /// Whether the pending push would change the buffered variable.
    pub fn is_push_necessary(&self) -> bool {
        self.push_request
            .with_pending(|request| request.is_some_and(PushRequest::is_push_necessary))
    }

    pub fn request_entire_buffer(&self) {
        self.request_buffer_sample(BufferSampleRequest::Entire);
    }

    pub fn request_active_buffer_only(&self) {
        self.request_buffer_sample(BufferSampleRequest::ActiveOnly);
    }

    pub fn request_buffer_starting_from(&self, from: usize) {
        self.request_buffer_sample(BufferSampleRequest::StartingFrom(from));
    }

    pub fn request_buffer_window(&self, from: usize, length: usize) {
        self.request_buffer_sample(BufferSampleRequest::Window { from, length });
    }

    pub fn request_buffer_sample(&self, request: BufferSampleRequest) {
        if self.is_disposed() {
            return;
        }
        self.sample_request.put(request);
    }

    pub fn is_requested_buffer_sample_available(&self) -> bool {
        self.sample.is_occupied()
    }

    /// Take the sample prepared by the manager. A sample is returned once.
    pub fn poll_requested_buffer_sample(&self) -> Option<BufferSample> {
        if self.is_disposed() {
            return None;
        }
        self.sample.take()
    }

    fn consume_sample_request(&self, properties: &BufferProperties) {
        let Some(request) = self.sample_request.take() else {
            return;
        };
        match request.resolve(properties) {
            Some((from, length)) => {
                let sample = self.buffer.read().copy(from, length, *properties);
                self.sample.put(sample);
            }
            None => tracing::warn!(
                "Dropped sample request {:?} for {}: buffer holds {} frames",
                request,
                self.variable.full_name(),
                properties.size()
            ),
        }
    }
}

impl LinkedBuffer for LinkedVariable {
    fn id(&self) -> LinkedBufferId {
        self.id
    }

    fn push(&self) {
        if self.is_disposed() {
            return;
        }
        let bits = self.variable.value_as_long_bits();
        let request = PushRequest::new(self.buffered_variable(), bits);
        self.push_request.put(request);

        let listeners: Vec<_> = self.listeners.read().iter().filter_map(Weak::upgrade).collect();
        for listener in listeners {
            listener.push_requested(self.id);
        }
    }

    fn pull(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        match self.pull_request.take() {
            Some(request) => {
                request.pull();
                true
            }
            None => false,
        }
    }

    fn process_push(&self, write_buffer: bool, properties: &BufferProperties) -> bool {
        if self.is_disposed() {
            return false;
        }
        let Some(request) = self.push_request.take() else {
            return false;
        };
        let modified = request.push();
        if modified && write_buffer {
            self.buffer.write().write_at(properties.current_index());
        }
        modified
    }

    fn flush_push(&self) {
        self.push_request.clear();
    }

    fn prepare_for_pull(&self, properties: &BufferProperties) {
        if self.is_disposed() {
            return;
        }
        let bits = self.buffer.read().variable().value_as_long_bits();
        self.pull_request
            .put(PullRequest::new(Arc::clone(&self.variable), bits));
        self.consume_sample_request(properties);
    }

    fn has_request_pending(&self) -> bool {
        self.sample_request.is_occupied()
    }

    fn is_active(&self) -> bool {
        !self.is_disposed()
    }

    fn add_push_request_listener(&self, listener: Weak<dyn PushRequestListener>) {
        if self.is_disposed() {
            return;
        }
        self.listeners.write().push(listener);
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pull_request.clear();
        self.push_request.clear();
        self.sample_request.clear();
        self.sample.clear();
        self.listeners.write().clear();
    }
}

impl fmt::Debug for LinkedVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedVariable")
            .field("id", &self.id)
            .field("variable", &self.variable.full_name())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
