//! # simbuf-rs: Shared Simulation Buffer
//!
//! A ring-buffered store of every variable of a simulation, owned by a single
//! manager thread and observed by any number of consumer threads (plotters,
//! controllers, scripts) without either side blocking the other.
//!
//! ## Architecture
//!
//! - **Registry**: a tree of named, typed variables ([`registry`])
//! - **Buffers**: one ring buffer per variable, sized and indexed together
//!   through [`BufferProperties`] ([`buffer`], [`registry_buffer`])
//! - **Shared buffer**: the manager's handle, moving the cursor and recording
//!   frames ([`SharedBuffer`])
//! - **Linked elements**: consumer-side handles exchanging values with the
//!   manager through single-slot mailboxes ([`linked`])
//!
//! ## Configuration
//!
//! Buffer sizing is read from `simbuf.toml` in the platform-appropriate
//! config directory under `dev.hxyulin.simbuf-rs`, see [`config`].
//!
//! ## Example
//!
//! ```ignore
//! use simbuf_rs::{Registry, SharedBuffer, VariableKind};
//!
//! let root = Registry::new("root");
//! let q = root.add_variable("q", VariableKind::Double)?;
//! let mut buffer = SharedBuffer::new(root, 1024);
//!
//! let consumer_root = Registry::new("root");
//! consumer_root.add_variable("q", VariableKind::Double)?;
//! let linked = buffer.factory().new_linked_registry(consumer_root)?;
//!
//! // manager tick
//! buffer.process_linked_push_requests(true);
//! q.set_f64(1.5);
//! buffer.increment_buffer_index(true);
//! buffer.write_buffer();
//! buffer.prepare_linked_buffers_for_pull();
//!
//! // consumer side, on any thread
//! linked.pull();
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod linked;
pub mod properties;
pub mod registry;
pub mod registry_buffer;
pub mod request;
pub mod shared_buffer;
pub mod tools;

// Re-export commonly used types
pub use buffer::{BufferSample, SampleData, VariableBuffer};
pub use config::BufferConfig;
pub use error::{Result, SimBufError};
pub use linked::{
    LinkedBuffer, LinkedBufferId, LinkedBufferProperties, LinkedRegistry, LinkedVariable,
};
pub use properties::BufferProperties;
pub use registry::{Namespace, Registry, Value, Variable, VariableKind};
pub use registry_buffer::RegistryBuffer;
pub use request::{BufferSampleRequest, CropBufferRequest, FillBufferRequest};
pub use shared_buffer::{BufferProcessor, LinkedBufferFactory, SharedBuffer};
