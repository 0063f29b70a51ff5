use std::sync::{Arc, Mutex};

use serde_json::json;

use super::core::OptionsBag;
use crate::logging::Logger;
use crate::metrics::RenderMetrics;

/// Backward-compatible option translation applied before any defaults.
pub type RewriteHook = Box<dyn Fn(&mut OptionsBag) + Send + Sync>;

/// Engine-level configuration knobs.
pub struct RenderConfig {
    /// Extra defaults merged when an option bag carries `navigate: true`.
    pub navigate_defaults: OptionsBag,
    /// Optional rewrite hook for deprecated option spellings.
    pub rewrite: Option<RewriteHook>,
    /// Optional structured logger used by the engine.
    pub logger: Option<Logger>,
    /// Metrics accumulator shared with callers.
    pub metrics: Option<Arc<Mutex<RenderMetrics>>>,
    /// Target field used when emitting metric snapshots.
    pub metrics_target: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        let mut navigate_defaults = OptionsBag::new();
        navigate_defaults.insert("solo".into(), json!(true));
        navigate_defaults.insert("feedback".into(), json!(true));
        navigate_defaults.insert("fallback".into(), json!(true));
        navigate_defaults.insert("history".into(), json!("auto"));
        navigate_defaults.insert("focus".into(), json!("auto"));
        navigate_defaults.insert("scroll".into(), json!("auto"));
        navigate_defaults.insert("cache".into(), json!("auto"));

        Self {
            navigate_defaults,
            rewrite: None,
            logger: None,
            metrics: None,
            metrics_target: "atrium::engine.metrics".to_string(),
        }
    }
}

impl RenderConfig {
    /// Enable metrics collection if it has not already been configured.
    pub fn enable_metrics(&mut self) {
        if self.metrics.is_none() {
            self.metrics = Some(Arc::new(Mutex::new(RenderMetrics::new())));
        }
    }

    pub fn metrics_handle(&self) -> Option<Arc<Mutex<RenderMetrics>>> {
        self.metrics.as_ref().map(Arc::clone)
    }
}
