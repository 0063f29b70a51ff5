//! Layer module orchestrator.
//!
//! `core` defines a single layer (root or overlay) and the focus-trap
//! contract; `stack` owns the ordered collection plus the document-level
//! history representation.

mod core;
mod stack;

pub use core::{CloseVerb, FocusTrap, Layer, LayerId, LayerMode, LayerState, NullFocusTrap, OverlayOptions};
pub use stack::{HistoryEntry, LayerStack};
