//! Structured JSON logging for the render pipeline.
//!
//! Events carry a millisecond timestamp, a level, a dotted target and an
//! open field map. Sinks decide where the serialized line goes; the engine
//! only ever talks to the [`Logger`] facade.

use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

pub type LogFields = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub ts_ms: u128,
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "LogFields::is_empty")]
    pub fields: LogFields,
}

impl LogEvent {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ts_ms: current_ms(),
            level,
            target: target.into(),
            message: message.into(),
            fields: LogFields::new(),
        }
    }
}

fn current_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Destination for serialized log events.
pub trait LogSink: Send + Sync {
    fn log(&self, event: &LogEvent);
}

#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new<S>(sink: S) -> Self
    where
        S: LogSink + 'static,
    {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn log(&self, level: LogLevel, target: &str, message: &str) {
        self.sink.log(&LogEvent::new(level, target, message));
    }

    pub fn log_event(&self, event: LogEvent) {
        self.sink.log(&event);
    }
}

/// Buffers events in memory. Used by tests and by the aggregate compile
/// error report.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<LogEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().expect("log sink mutex poisoned").clone()
    }
}

impl LogSink for MemorySink {
    fn log(&self, event: &LogEvent) {
        self.events
            .lock()
            .expect("log sink mutex poisoned")
            .push(event.clone());
    }
}

impl LogSink for Arc<MemorySink> {
    fn log(&self, event: &LogEvent) {
        self.as_ref().log(event);
    }
}

/// Writes one JSON line per event to any `Write` handle.
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> LogSink for WriterSink<W> {
    fn log(&self, event: &LogEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut guard = self.writer.lock().expect("log sink mutex poisoned");
            let _ = writeln!(guard, "{line}");
            let _ = guard.flush();
        }
    }
}

pub fn json_kv(key: &str, value: impl Into<Value>) -> (String, Value) {
    (key.to_string(), value.into())
}

pub fn event_with_fields(
    level: LogLevel,
    target: &str,
    message: &str,
    fields: impl IntoIterator<Item = (String, Value)>,
) -> LogEvent {
    let mut event = LogEvent::new(level, target, message);
    for (k, v) in fields {
        event.fields.insert(k, v);
    }
    event
}
