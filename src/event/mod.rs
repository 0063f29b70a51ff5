//! In-crate event bus.
//!
//! Lifecycle events are named, structured and carry the layer, value and
//! origin of the operation that produced them. Events dispatched on an
//! element bubble through its ancestors to the document; `ensure_bubbles`
//! forces the document dispatch even for a detached element, which is how
//! the closed event of a torn-down layer still reaches global listeners.

mod core;

pub use core::{CloseRequest, EmitSpec, EventBus, EventEnvelope, ListenerId};
