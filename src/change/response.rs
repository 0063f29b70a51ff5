use serde_json::Value;

use crate::event::EmitSpec;

/// The parts of a server response the render pipeline consumes.
///
/// `accept_layer` and `dismiss_layer` distinguish an explicit empty
/// signal (`Some(Value::Null)`, the server closing without a payload)
/// from no signal at all (`None`).
#[derive(Debug, Clone, Default)]
pub struct ResponseDoc {
    /// Fragment content to insert.
    pub content: String,
    /// URL the content was loaded from, recorded as provenance.
    pub source: Option<String>,
    /// Location the response navigated to, if any.
    pub location: Option<String>,
    pub title: Option<String>,
    /// Server signal to accept the target layer.
    pub accept_layer: Option<Value>,
    /// Server signal to dismiss the target layer.
    pub dismiss_layer: Option<Value>,
    /// Events the server asked to be emitted on the target layer.
    pub event_plans: Vec<EmitSpec>,
}

impl ResponseDoc {
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}
