//! Layered fragment-rendering engine.
//!
//! A render resolves an open options bag through defaults and layer
//! configuration, executes as a change against a layer of the document
//! (inserting content, reacting to close signals), and finishes with a
//! compiler pass that enhances the inserted elements exactly once each.

pub mod change;
pub mod compiler;
pub mod dom;
pub mod engine;
pub mod error;
pub mod event;
pub mod layer;
pub mod logging;
pub mod metrics;
pub mod options;
pub mod selector;

pub use change::{Addition, Change, CloseLayer, RenderResult, ResponseDoc, improve_history_value};
pub use compiler::{
    AppliedCompilers, CompilerId, CompilerOutcome, CompilerPass, CompilerRegistry, CompilerSpec,
    DestructorRegistry, PassOutcome,
};
pub use dom::{Document, Element, ElementId, NaiveEngine, SelectorEngine};
pub use engine::{
    AlwaysConfirm, ConfirmGate, Engine, NullScroll, NullTransport, RequestDescriptor,
    ScrollAdapter, Transport,
};
pub use error::{CompileError, RenderError, Result};
pub use event::{CloseRequest, EmitSpec, EventBus, EventEnvelope, ListenerId};
pub use layer::{
    CloseVerb, FocusTrap, HistoryEntry, Layer, LayerId, LayerMode, LayerStack, LayerState,
    NullFocusTrap, OverlayOptions,
};
pub use logging::{LogEvent, LogFields, LogLevel, LogSink, Logger, MemorySink, WriterSink};
pub use metrics::{MetricSnapshot, RenderMetrics};
pub use options::{OptionsBag, RenderConfig, RewriteHook};
pub use selector::{Selector, SelectorFilter};
