use serde_json::json;

use crate::logging::{LogEvent, LogLevel, event_with_fields};

/// Counters accumulated by the engine across render operations.
#[derive(Debug, Default, Clone)]
pub struct RenderMetrics {
    renders: u64,
    compiled_elements: u64,
    layers_opened: u64,
    layers_closed: u64,
    aborted_operations: u64,
}

impl RenderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_render(&mut self) {
        self.renders = self.renders.saturating_add(1);
    }

    pub fn record_compiled(&mut self, count: usize) {
        if count > 0 {
            self.compiled_elements = self.compiled_elements.saturating_add(count as u64);
        }
    }

    pub fn record_layer_opened(&mut self) {
        self.layers_opened = self.layers_opened.saturating_add(1);
    }

    pub fn record_layer_closed(&mut self) {
        self.layers_closed = self.layers_closed.saturating_add(1);
    }

    pub fn record_aborted(&mut self) {
        self.aborted_operations = self.aborted_operations.saturating_add(1);
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        MetricSnapshot {
            renders: self.renders,
            compiled_elements: self.compiled_elements,
            layers_opened: self.layers_opened,
            layers_closed: self.layers_closed,
            aborted_operations: self.aborted_operations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub renders: u64,
    pub compiled_elements: u64,
    pub layers_opened: u64,
    pub layers_closed: u64,
    pub aborted_operations: u64,
}

impl MetricSnapshot {
    pub fn to_log_event(&self, target: &str) -> LogEvent {
        event_with_fields(
            LogLevel::Info,
            target,
            "render_metrics",
            [
                ("renders".to_string(), json!(self.renders)),
                (
                    "compiled_elements".to_string(),
                    json!(self.compiled_elements),
                ),
                ("layers_opened".to_string(), json!(self.layers_opened)),
                ("layers_closed".to_string(), json!(self.layers_closed)),
                (
                    "aborted_operations".to_string(),
                    json!(self.aborted_operations),
                ),
            ],
        )
    }
}
