//! Error module orchestrator.
//!
//! The public error surface lives in `types`; downstream code imports
//! `RenderError` and the crate-wide `Result` alias from here.

mod types;

pub use types::{CompileError, RenderError, Result};
