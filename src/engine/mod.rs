//! Engine module orchestrator.
//!
//! `core` holds the [`Engine`], which ties the document, the layer stack,
//! the event bus and the compiler registry together and executes changes;
//! `hooks` holds the pluggable seams for transport, confirmation prompts
//! and scrolling.

mod core;
mod hooks;

pub use core::Engine;
pub use hooks::{
    AlwaysConfirm, ConfirmGate, NullScroll, NullTransport, RequestDescriptor, ScrollAdapter,
    Transport,
};
