//! Selector module orchestrator.

mod core;

pub use core::{Selector, SelectorFilter};
