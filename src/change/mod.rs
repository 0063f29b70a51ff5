//! Change module orchestrator.
//!
//! A change is a one-shot operation object built from a finalized options
//! bag: [`Addition`] inserts or updates content, [`CloseLayer`] tears down
//! an overlay. Changes execute against the [`Engine`] and are not reused.
//!
//! [`Engine`]: crate::engine::Engine

mod addition;
mod close_layer;
mod response;

use serde_json::Value;

use crate::dom::ElementId;
use crate::engine::Engine;
use crate::error::Result;
use crate::layer::LayerId;

pub use addition::Addition;
pub use close_layer::CloseLayer;
pub use response::ResponseDoc;

/// Outcome of an executed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub layer: LayerId,
    /// Root elements of the content the change inserted.
    pub fragments: Vec<ElementId>,
    pub location: Option<String>,
    pub compiled_elements: usize,
}

impl RenderResult {
    pub fn none(layer: LayerId) -> Self {
        Self {
            layer,
            fragments: Vec::new(),
            location: None,
            compiled_elements: 0,
        }
    }
}

/// One executable render or close operation.
pub trait Change {
    fn describe(&self) -> &'static str;

    fn execute(&mut self, engine: &mut Engine) -> Result<RenderResult>;
}

/// Merges a new history value into an existing option.
///
/// Values we keep: `false` (no update) and strings (forced update).
/// Values we override: everything else (`true` meaning "update with
/// defaults", null, absent).
pub fn improve_history_value(existing: Option<&Value>, new: Value) -> Value {
    match existing {
        Some(Value::Bool(false)) => Value::Bool(false),
        Some(Value::String(forced)) => Value::String(forced.clone()),
        _ => new,
    }
}
