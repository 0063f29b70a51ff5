//! Document module orchestrator.
//!
//! The element arena lives in `core`, the pluggable selector-matching seam
//! in `engine`. The rest of the crate only sees [`Document`], [`ElementId`]
//! and the [`SelectorEngine`] contract.

mod core;
mod engine;

pub use core::{Document, Element, ElementId};
pub use engine::{NaiveEngine, SelectorEngine};
