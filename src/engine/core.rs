use serde_json::{Value, json};

use super::hooks::{
    AlwaysConfirm, ConfirmGate, NullScroll, NullTransport, ScrollAdapter, Transport,
};
use crate::change::{Addition, Change, CloseLayer, RenderResult, ResponseDoc};
use crate::compiler::{
    AppliedCompilers, CompilerId, CompilerOutcome, CompilerPass, CompilerRegistry, CompilerSpec,
    DestructorRegistry, PassOutcome,
};
use crate::dom::{Document, ElementId};
use crate::error::{RenderError, Result};
use crate::event::{CloseRequest, EmitSpec, EventBus, EventEnvelope, ListenerId};
use crate::layer::{CloseVerb, LayerId, LayerStack, OverlayOptions};
use crate::logging::{LogLevel, event_with_fields, json_kv};
use crate::options::{
    OptionsBag, RenderConfig, assert_content_given, derive_fail_options, finalize, preprocess,
};

const ENGINE_TARGET: &str = "atrium::engine";

/// Owns the document, the layer stack, the event bus and the compiler
/// side tables, and executes changes against them.
///
/// The "current layer" is ambient state: it defaults to the frontmost
/// layer and can be overridden for the duration of a closure via
/// [`as_current`], which is how events and compilers observe the layer
/// they run for rather than whatever happens to be front.
///
/// [`as_current`]: Engine::as_current
pub struct Engine {
    doc: Document,
    stack: LayerStack,
    bus: EventBus,
    registry: CompilerRegistry,
    applied: AppliedCompilers,
    destructors: DestructorRegistry,
    config: RenderConfig,
    transport: Box<dyn Transport>,
    confirm: Box<dyn ConfirmGate>,
    scroll: Box<dyn ScrollAdapter>,
    current_overrides: Vec<LayerId>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(RenderConfig::default())
    }

    pub fn with_config(config: RenderConfig) -> Self {
        Self {
            doc: Document::new(),
            stack: LayerStack::new(),
            bus: EventBus::new(),
            registry: CompilerRegistry::new(),
            applied: AppliedCompilers::new(),
            destructors: DestructorRegistry::new(),
            config,
            transport: Box::new(NullTransport),
            confirm: Box::new(AlwaysConfirm),
            scroll: Box::new(NullScroll),
            current_overrides: Vec::new(),
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RenderConfig {
        &mut self.config
    }

    pub fn set_transport(&mut self, transport: impl Transport + 'static) {
        self.transport = Box::new(transport);
    }

    pub fn set_confirm_gate(&mut self, gate: impl ConfirmGate + 'static) {
        self.confirm = Box::new(gate);
    }

    pub fn set_scroll_adapter(&mut self, adapter: impl ScrollAdapter + 'static) {
        self.scroll = Box::new(adapter);
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn doc_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn stack(&self) -> &LayerStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut LayerStack {
        &mut self.stack
    }

    /// The ambient current layer: the innermost override, or the front of
    /// the stack.
    pub fn current_layer(&self) -> LayerId {
        self.current_overrides
            .last()
            .copied()
            .unwrap_or_else(|| self.stack.front().id())
    }

    pub fn layer_is_open(&self, layer: LayerId) -> bool {
        self.stack.get(layer).is_some_and(|layer| layer.is_open())
    }

    /// Runs `f` with `layer` as the ambient current layer.
    pub fn as_current<R>(&mut self, layer: LayerId, f: impl FnOnce(&mut Self) -> R) -> R {
        self.current_overrides.push(layer);
        let result = f(self);
        self.current_overrides.pop();
        result
    }

    pub fn on_document(
        &mut self,
        event_name: impl Into<String>,
        callback: impl FnMut(&mut EventEnvelope) + Send + 'static,
    ) -> ListenerId {
        self.bus.on_document(event_name, callback)
    }

    pub fn on_element(
        &mut self,
        element: ElementId,
        event_name: impl Into<String>,
        callback: impl FnMut(&mut EventEnvelope) + Send + 'static,
    ) -> ListenerId {
        self.bus.on_element(element, event_name, callback)
    }

    pub fn off(&mut self, listener: ListenerId) {
        self.bus.off(listener);
    }

    pub fn emit(&mut self, spec: EmitSpec) -> EventEnvelope {
        self.bus.emit(&self.doc, spec)
    }

    pub fn register_compiler<F>(&mut self, spec: CompilerSpec, func: F) -> CompilerId
    where
        F: FnMut(&mut Document, ElementId, Option<&Value>) -> Result<CompilerOutcome>
            + Send
            + 'static,
    {
        self.registry.register(spec, func)
    }

    pub fn register_batch_compiler<F>(&mut self, spec: CompilerSpec, func: F) -> CompilerId
    where
        F: FnMut(&mut Document, &[ElementId], &[Option<Value>]) -> Result<CompilerOutcome>
            + Send
            + 'static,
    {
        self.registry.register_batch(spec, func)
    }

    /// Resolves options, picks the target layer and inserts the content
    /// described by the bag's own content keys.
    pub fn render(&mut self, options: OptionsBag) -> Result<RenderResult> {
        let preprocessed = preprocess(options, &self.config);
        self.render_preprocessed(preprocessed, None)
    }

    /// Like [`render`], but with content and close signals coming from a
    /// parsed server response.
    ///
    /// [`render`]: Engine::render
    pub fn render_response(
        &mut self,
        options: OptionsBag,
        response: ResponseDoc,
    ) -> Result<RenderResult> {
        let preprocessed = preprocess(options, &self.config);
        self.render_preprocessed(preprocessed, Some(response))
    }

    /// Renders a failure response with the derived fail options: shared
    /// keys carry over from the success bag and `fail_`-prefixed keys are
    /// stripped and take over.
    pub fn render_failure(
        &mut self,
        options: OptionsBag,
        response: ResponseDoc,
    ) -> Result<RenderResult> {
        let preprocessed = preprocess(options, &self.config);
        let fail_options = derive_fail_options(&preprocessed);
        self.render_preprocessed(fail_options, Some(response))
    }

    fn render_preprocessed(
        &mut self,
        preprocessed: OptionsBag,
        response: Option<ResponseDoc>,
    ) -> Result<RenderResult> {
        let layer = self.resolve_layer_option(&preprocessed)?;
        let late_defaults = self
            .stack
            .get(layer)
            .map(|layer| layer.render_defaults())
            .unwrap_or_default();
        let mut options = finalize(&preprocessed, &late_defaults);

        let response = match response {
            Some(response) => response,
            None => {
                assert_content_given(&mut options)?;
                response_from_options(&options)
            }
        };

        self.sync_root_handlers();

        let mut change = Addition::new(layer, options, response);
        let result = self.execute(&mut change);
        // The renders counter tracks content updates only; closes are
        // counted separately under layers_closed.
        if result.is_ok() {
            self.with_metrics(|metrics| metrics.record_render());
        }
        result
    }

    /// Executes a change, recording metrics and logging the outcome.
    /// Aborted changes are a quiet early exit, never logged as errors.
    pub fn execute(&mut self, change: &mut dyn Change) -> Result<RenderResult> {
        let described = change.describe();
        let result = change.execute(self);
        match &result {
            Ok(outcome) => {
                self.log(
                    LogLevel::Debug,
                    "change_applied",
                    [
                        json_kv("change", json!(described)),
                        json_kv("layer", json!(outcome.layer.0)),
                        json_kv("fragments", json!(outcome.fragments.len())),
                    ],
                );
            }
            Err(err) if err.is_aborted() => {
                self.with_metrics(|metrics| metrics.record_aborted());
                self.log(
                    LogLevel::Debug,
                    "change_aborted",
                    [
                        json_kv("change", json!(described)),
                        json_kv("reason", json!(err.to_string())),
                    ],
                );
            }
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    "change_failed",
                    [
                        json_kv("change", json!(described)),
                        json_kv("error", json!(err.to_string())),
                    ],
                );
            }
        }
        result
    }

    /// Opens a new overlay above the front layer. The overlay starts with
    /// an empty element; content arrives through a later render targeting
    /// it.
    pub fn open_layer(
        &mut self,
        options: OverlayOptions,
        origin: Option<ElementId>,
    ) -> Result<LayerId> {
        let mut will_open = EmitSpec::named("layer:open");
        will_open.cancelable = true;
        will_open.origin = origin;
        let envelope = self.emit(will_open);
        if envelope.default_prevented() {
            self.with_metrics(|metrics| metrics.record_aborted());
            return Err(RenderError::aborted("open event was prevented"));
        }

        let element = self.doc.create_element("overlay");
        let root = self.doc.root();
        self.doc.append_child(root, element);
        let id = self.stack.push_overlay(element, options, origin);

        self.as_current(id, |engine| {
            let mut opened = EmitSpec::named("layer:opened");
            opened.element = Some(element);
            opened.layer = Some(id);
            opened.origin = origin;
            engine.emit(opened);
        });

        self.with_metrics(|metrics| metrics.record_layer_opened());
        self.log(
            LogLevel::Info,
            "layer_opened",
            [json_kv("layer", json!(id.0))],
        );
        Ok(id)
    }

    pub fn accept(&mut self, layer: LayerId, value: Option<Value>) -> Result<RenderResult> {
        self.close(layer, CloseVerb::Accept, value)
    }

    pub fn dismiss(&mut self, layer: LayerId, value: Option<Value>) -> Result<RenderResult> {
        self.close(layer, CloseVerb::Dismiss, value)
    }

    fn close(
        &mut self,
        layer: LayerId,
        verb: CloseVerb,
        value: Option<Value>,
    ) -> Result<RenderResult> {
        let mut change = CloseLayer::new(layer, verb);
        if let Some(value) = value {
            change = change.with_value(value);
        }
        self.execute(&mut change)
    }

    /// Runs all registered compilers over a subtree with `layer` as the
    /// ambient current layer. Aggregate compiler failures are surfaced as
    /// a document-level `compile:error` event before propagating.
    pub fn compile(&mut self, root: ElementId, layer: LayerId) -> Result<PassOutcome> {
        self.as_current(layer, |engine| {
            let logger = engine.config.logger.clone();
            let mut pass = CompilerPass::new(
                &mut engine.doc,
                &mut engine.registry,
                &mut engine.applied,
                &mut engine.destructors,
                root,
                layer,
            );
            if let Some(logger) = logger.as_ref() {
                pass = pass.with_logger(logger);
            }
            match pass.run() {
                Ok(outcome) => {
                    engine.with_metrics(|metrics| metrics.record_compiled(outcome.compiled_elements));
                    Ok(outcome)
                }
                Err(err) => {
                    if let RenderError::CannotCompile { errors } = &err {
                        let messages: Vec<String> =
                            errors.iter().map(|error| error.to_string()).collect();
                        let mut event = EmitSpec::named("compile:error");
                        event.layer = Some(layer);
                        event.value = Some(json!({ "errors": messages }));
                        engine.emit(event);
                    }
                    Err(err)
                }
            }
        })
    }

    /// Removes an element subtree, unbinding its listeners, running its
    /// destructors and clearing its applied-compiler state.
    pub fn destroy_subtree(&mut self, element: ElementId) {
        let removed = self.doc.destroy(element);
        self.bus.remove_element_listeners(&removed);
        self.destructors.run_for(&removed);
        self.applied.forget(&removed);
    }

    /// Discards the document and stack and starts over with a pristine
    /// root layer. Registered compilers and configuration survive.
    pub fn reset(&mut self) {
        self.doc = Document::new();
        self.stack.reset();
        self.bus = EventBus::new();
        self.applied = AppliedCompilers::new();
        self.destructors = DestructorRegistry::new();
        self.current_overrides.clear();
    }

    /// Writes a metrics snapshot to the configured logger.
    pub fn log_metrics(&self) {
        let (Some(metrics), Some(logger)) = (self.config.metrics.as_ref(), self.config.logger.as_ref())
        else {
            return;
        };
        let snapshot = metrics.lock().expect("metrics mutex poisoned").snapshot();
        logger.log_event(snapshot.to_log_event(&self.config.metrics_target));
    }

    pub(crate) fn reveal(&mut self, element: ElementId) -> Result<()> {
        self.scroll.reveal(&self.doc, element)
    }

    pub(crate) fn assert_confirmed(&mut self, options: &OptionsBag) -> Result<()> {
        let message = match options.get("confirm") {
            Some(Value::String(message)) if !message.is_empty() => message.clone(),
            Some(Value::Bool(true)) => "Are you sure?".to_string(),
            _ => return Ok(()),
        };
        if self.confirm.confirm(&message) {
            Ok(())
        } else {
            Err(RenderError::aborted("confirmation was denied"))
        }
    }

    pub(crate) fn abort_requests_for_layer(&mut self, layer: LayerId) {
        self.transport
            .abort_matching(&move |request| request.layer == layer);
    }

    pub(crate) fn execute_close_request(&mut self, request: CloseRequest) -> Result<RenderResult> {
        let layer = request.layer.unwrap_or_else(|| self.current_layer());
        let mut change = CloseLayer::new(layer, request.verb);
        if let Some(value) = request.value {
            change = change.with_value(value);
        }
        change.execute(self)
    }

    pub(crate) fn note_layer_closed(&mut self, layer: LayerId, verb: CloseVerb) {
        self.with_metrics(|metrics| metrics.record_layer_closed());
        self.log(
            LogLevel::Info,
            "layer_closed",
            [
                json_kv("layer", json!(layer.0)),
                json_kv("verb", json!(verb.as_str())),
            ],
        );
    }

    fn resolve_layer_option(&self, options: &OptionsBag) -> Result<LayerId> {
        let reference = options.get("base_layer").or_else(|| options.get("layer"));
        match reference {
            None | Some(Value::Null) => Ok(self.current_layer()),
            Some(Value::String(name)) => match name.as_str() {
                "root" => Ok(self.stack.root().id()),
                "current" => Ok(self.current_layer()),
                "front" => Ok(self.stack.front().id()),
                other => Err(RenderError::failed(format!(
                    "unknown layer reference `{other}`"
                ))),
            },
            Some(Value::Number(position)) => position
                .as_u64()
                .and_then(|index| self.stack.ids().get(index as usize).copied())
                .ok_or_else(|| RenderError::failed("layer position out of range")),
            Some(other) => Err(RenderError::failed(format!(
                "unsupported layer reference: {other}"
            ))),
        }
    }

    /// Re-syncs root-handler bookkeeping once per top-level element. A
    /// content update that swaps the top-level element wholesale
    /// invalidates the installation; detection is by element identity.
    /// Document-level listeners live on the bus rather than on the
    /// element, so the sync itself has nothing physical to re-install.
    fn sync_root_handlers(&mut self) {
        if self.stack.needs_root_handler_sync(&self.doc) {
            self.stack.note_root_handlers_installed(&self.doc);
            self.log(
                LogLevel::Debug,
                "root_handlers_installed",
                [json_kv("root", json!(self.doc.root().0))],
            );
        }
    }

    fn with_metrics(&self, f: impl FnOnce(&mut crate::metrics::RenderMetrics)) {
        if let Some(metrics) = self.config.metrics.as_ref() {
            f(&mut metrics.lock().expect("metrics mutex poisoned"));
        }
    }

    fn log(
        &self,
        level: LogLevel,
        message: &str,
        fields: impl IntoIterator<Item = (String, Value)>,
    ) {
        if let Some(logger) = self.config.logger.as_ref() {
            logger.log_event(event_with_fields(level, ENGINE_TARGET, message, fields));
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn response_from_options(options: &OptionsBag) -> ResponseDoc {
    let text = |key: &str| {
        options
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let content = text("content")
        .or_else(|| text("fragment"))
        .or_else(|| text("document"))
        .unwrap_or_default();
    ResponseDoc {
        content,
        source: text("url"),
        location: text("location").or_else(|| text("url")),
        title: text("title"),
        ..ResponseDoc::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{Logger, MemorySink};
    use std::sync::{Arc, Mutex};

    fn bag(entries: &[(&str, Value)]) -> OptionsBag {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn open_overlay(engine: &mut Engine) -> LayerId {
        engine
            .open_layer(OverlayOptions::default(), None)
            .expect("overlay should open")
    }

    #[test]
    fn render_inserts_content_and_records_source() {
        let mut engine = Engine::new();
        let result = engine
            .render(bag(&[
                ("content", json!("hello")),
                ("url", json!("/users/")),
            ]))
            .unwrap();

        assert_eq!(result.fragments.len(), 1);
        let fragment = result.fragments[0];
        assert_eq!(engine.doc().text(fragment), Some("hello"));
        assert_eq!(engine.doc().attr(fragment, "at-source"), Some("/users"));
        assert_eq!(
            engine.stack().history().location.as_deref(),
            Some("/users/")
        );
    }

    #[test]
    fn render_without_content_keys_fails() {
        let mut engine = Engine::new();
        let err = engine.render(OptionsBag::new()).unwrap_err();
        assert!(!err.is_aborted());
        assert!(err.to_string().contains("content"));
    }

    #[test]
    fn empty_content_allowance_renders_nothing() {
        let mut engine = Engine::new();
        let result = engine
            .render(bag(&[("default_to_empty_content", json!(true))]))
            .unwrap();
        assert_eq!(result.fragments.len(), 1);
        assert_eq!(engine.doc().text(result.fragments[0]), Some(""));
    }

    #[test]
    fn repeated_identical_render_is_a_noop() {
        let mut engine = Engine::new();
        engine.render(bag(&[("content", json!("same"))])).unwrap();
        let second = engine.render(bag(&[("content", json!("same"))])).unwrap();
        assert!(second.fragments.is_empty());
        assert_eq!(second.compiled_elements, 0);
    }

    #[test]
    fn render_targets_selector_within_layer() {
        let mut engine = Engine::new();
        let card = engine.doc_mut().create_element("div");
        engine.doc_mut().add_class(card, "card");
        let body = engine.doc().body();
        engine.doc_mut().append_child(body, card);

        let result = engine
            .render(bag(&[
                ("target", json!(".card")),
                ("content", json!("inner")),
            ]))
            .unwrap();

        assert_eq!(engine.doc().children(card), &result.fragments[..]);
    }

    #[test]
    fn missing_target_is_a_failure() {
        let mut engine = Engine::new();
        let err = engine
            .render(bag(&[
                ("target", json!(".missing")),
                ("content", json!("x")),
            ]))
            .unwrap_err();
        assert!(!err.is_aborted());
    }

    #[test]
    fn render_into_overlay_leaves_root_history_alone() {
        let mut engine = Engine::new();
        let overlay = open_overlay(&mut engine);
        let result = engine
            .render(bag(&[
                ("layer", json!("front")),
                ("content", json!("modal")),
                ("url", json!("/modal")),
            ]))
            .unwrap();

        assert_eq!(result.layer, overlay);
        // Overlays default to history: false.
        assert_eq!(engine.stack().history().location, None);
        assert_eq!(
            engine.stack().get(overlay).unwrap().location.as_deref(),
            Some("/modal")
        );
    }

    #[test]
    fn compilers_run_over_inserted_fragments() {
        let mut engine = Engine::new();
        let compiled = Arc::new(Mutex::new(0));
        let counter = compiled.clone();
        engine.register_compiler(CompilerSpec::new("fragment"), move |_, _, _| {
            *counter.lock().unwrap() += 1;
            Ok(CompilerOutcome::Done)
        });

        let result = engine.render(bag(&[("content", json!("x"))])).unwrap();
        assert_eq!(result.compiled_elements, 1);
        assert_eq!(*compiled.lock().unwrap(), 1);
    }

    #[test]
    fn compiler_errors_emit_a_document_event() {
        let mut engine = Engine::new();
        engine.register_compiler(CompilerSpec::new("fragment"), |_, _, _| {
            Err(RenderError::failed("boom"))
        });
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        engine.on_document("compile:error", move |_| {
            *counter.lock().unwrap() += 1;
        });

        let err = engine.render(bag(&[("content", json!("x"))])).unwrap_err();
        assert!(matches!(err, RenderError::CannotCompile { .. }));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn accept_signal_closes_overlay_and_aborts_render() {
        let mut engine = Engine::new();
        let overlay = open_overlay(&mut engine);

        let accepted = Arc::new(Mutex::new(None));
        let seen = accepted.clone();
        engine.on_document("layer:accepted", move |event| {
            *seen.lock().unwrap() = event.value.clone();
        });

        let mut response = ResponseDoc::with_content("done");
        response.accept_layer = Some(json!({"id": 7}));
        let err = engine
            .render_response(bag(&[("layer", json!("front"))]), response)
            .unwrap_err();

        assert!(err.is_aborted());
        assert!(!engine.layer_is_open(overlay));
        assert_eq!(*accepted.lock().unwrap(), Some(json!({"id": 7})));
    }

    #[test]
    fn accept_location_condition_closes_after_navigation() {
        let mut engine = Engine::new();
        let overlay = engine
            .open_layer(
                OverlayOptions {
                    accept_location: Some("/done".into()),
                    ..OverlayOptions::default()
                },
                None,
            )
            .unwrap();

        let err = engine
            .render(bag(&[
                ("layer", json!("front")),
                ("content", json!("finished")),
                ("url", json!("/done")),
            ]))
            .unwrap_err();
        assert!(err.is_aborted());
        assert!(!engine.layer_is_open(overlay));
    }

    #[test]
    fn dismissing_a_lower_layer_peels_the_layers_above() {
        let mut engine = Engine::new();
        let lower = open_overlay(&mut engine);
        let upper = open_overlay(&mut engine);

        // Closed events carry the promoted parent layer; the upper layer
        // closes first (parent: lower), then the lower (parent: root).
        let parents = Arc::new(Mutex::new(Vec::new()));
        let seen = parents.clone();
        engine.on_document("layer:dismissed", move |event| {
            seen.lock().unwrap().push(event.layer);
        });

        engine.dismiss(lower, None).unwrap();
        assert!(!engine.layer_is_open(lower));
        assert!(!engine.layer_is_open(upper));
        assert_eq!(engine.stack().len(), 1);
        assert!(engine.stack().front().is_root());
        let root = engine.stack().root().id();
        assert_eq!(*parents.lock().unwrap(), vec![Some(lower), Some(root)]);
    }

    #[test]
    fn prevented_close_keeps_the_layer_and_its_destructors() {
        let mut engine = Engine::new();
        let torn_down = Arc::new(Mutex::new(false));
        let flag = torn_down.clone();
        engine.register_compiler(CompilerSpec::new("fragment"), move |_, _, _| {
            let flag = flag.clone();
            Ok(CompilerOutcome::Destructor(Box::new(move || {
                *flag.lock().unwrap() = true;
            })))
        });

        let overlay = open_overlay(&mut engine);
        engine
            .render(bag(&[("layer", json!("front")), ("content", json!("w"))]))
            .unwrap();
        engine.on_document("layer:dismiss", |event| event.prevent_default());

        let err = engine.dismiss(overlay, None).unwrap_err();
        assert!(err.is_aborted());
        assert!(engine.layer_is_open(overlay));
        assert_eq!(engine.stack().len(), 2);
        assert!(!*torn_down.lock().unwrap());
    }

    #[test]
    fn close_payload_falls_back_to_origin_attribute() {
        let mut engine = Engine::new();
        let overlay = open_overlay(&mut engine);
        let button = engine.doc_mut().create_element("button");
        let body = engine.doc().body();
        engine.doc_mut().append_child(body, button);
        engine
            .doc_mut()
            .set_attr(button, "at-accept", r#"{"choice": "a"}"#);

        let accepted = Arc::new(Mutex::new(None));
        let seen = accepted.clone();
        engine.on_document("layer:accepted", move |event| {
            *seen.lock().unwrap() = event.value.clone();
        });

        let mut change = CloseLayer::new(overlay, CloseVerb::Accept).with_origin(button);
        engine.execute(&mut change).unwrap();
        assert_eq!(*accepted.lock().unwrap(), Some(json!({"choice": "a"})));
    }

    #[test]
    fn destructors_run_when_the_overlay_closes() {
        let mut engine = Engine::new();
        let torn_down = Arc::new(Mutex::new(false));
        let flag = torn_down.clone();
        engine.register_compiler(CompilerSpec::new("fragment"), move |_, _, _| {
            let flag = flag.clone();
            Ok(CompilerOutcome::Destructor(Box::new(move || {
                *flag.lock().unwrap() = true;
            })))
        });

        let overlay = open_overlay(&mut engine);
        engine
            .render(bag(&[("layer", json!("front")), ("content", json!("w"))]))
            .unwrap();
        assert!(!*torn_down.lock().unwrap());

        engine.dismiss(overlay, None).unwrap();
        assert!(*torn_down.lock().unwrap());
    }

    #[test]
    fn listener_can_request_close_through_a_queued_event() {
        let mut engine = Engine::new();
        let overlay = open_overlay(&mut engine);
        engine.on_document("user:logout", |event| {
            event.request_close(None, CloseVerb::Dismiss, None);
        });

        let mut response = ResponseDoc::with_content("bye");
        response.event_plans.push(EmitSpec::named("user:logout"));
        let err = engine
            .render_response(bag(&[("layer", json!("front"))]), response)
            .unwrap_err();

        assert!(err.is_aborted());
        assert!(!engine.layer_is_open(overlay));
    }

    #[test]
    fn denied_confirmation_aborts_the_close() {
        struct DenyAll;
        impl ConfirmGate for DenyAll {
            fn confirm(&mut self, _message: &str) -> bool {
                false
            }
        }

        let mut engine = Engine::new();
        engine.set_confirm_gate(DenyAll);
        let overlay = open_overlay(&mut engine);

        let mut change = CloseLayer::new(overlay, CloseVerb::Dismiss)
            .with_options(bag(&[("confirm", json!(true))]));
        let err = engine.execute(&mut change).unwrap_err();
        assert!(err.is_aborted());
        assert!(engine.layer_is_open(overlay));
    }

    #[test]
    fn closing_aborts_pending_requests_for_that_layer() {
        #[derive(Clone)]
        struct Recording {
            requests: Arc<Mutex<Vec<RequestDescriptor>>>,
        }
        impl Transport for Recording {
            fn abort_matching(&mut self, predicate: &dyn Fn(&RequestDescriptor) -> bool) {
                self.requests
                    .lock()
                    .unwrap()
                    .retain(|request| !predicate(request));
            }
        }
        use crate::engine::RequestDescriptor;

        let mut engine = Engine::new();
        let overlay = open_overlay(&mut engine);
        let transport = Recording {
            requests: Arc::new(Mutex::new(vec![
                RequestDescriptor {
                    url: "/slow".into(),
                    method: "GET".into(),
                    layer: overlay,
                },
                RequestDescriptor {
                    url: "/other".into(),
                    method: "GET".into(),
                    layer: engine.stack().root().id(),
                },
            ])),
        };
        let requests = transport.requests.clone();
        engine.set_transport(transport);

        engine.dismiss(overlay, None).unwrap();
        let remaining = requests.lock().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].url, "/other");
    }

    #[test]
    fn prevented_open_event_stops_the_overlay() {
        let mut engine = Engine::new();
        engine.on_document("layer:open", |event| event.prevent_default());
        let err = engine
            .open_layer(OverlayOptions::default(), None)
            .unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(engine.stack().len(), 1);
    }

    #[test]
    fn metrics_and_logs_track_the_pipeline() {
        let sink = MemorySink::shared();
        let mut config = RenderConfig::default();
        config.logger = Some(Logger::new(sink.clone()));
        config.enable_metrics();
        let metrics = config.metrics_handle().unwrap();

        let mut engine = Engine::with_config(config);
        let overlay = open_overlay(&mut engine);
        engine
            .render(bag(&[("layer", json!("front")), ("content", json!("x"))]))
            .unwrap();
        engine.dismiss(overlay, None).unwrap();
        engine.render(OptionsBag::new()).unwrap_err();
        engine.log_metrics();

        let snapshot = metrics.lock().unwrap().snapshot();
        assert_eq!(snapshot.layers_opened, 1);
        assert_eq!(snapshot.layers_closed, 1);
        // The dismiss is counted under layers_closed, not as a render.
        assert_eq!(snapshot.renders, 1);
        assert_eq!(snapshot.compiled_elements, 0);

        let messages: Vec<String> = sink
            .events()
            .iter()
            .map(|event| event.message.clone())
            .collect();
        assert!(messages.contains(&"layer_opened".to_string()));
        assert!(messages.contains(&"layer_closed".to_string()));
        assert!(messages.contains(&"render_metrics".to_string()));
    }

    #[test]
    fn on_finished_hook_fires_only_for_successful_changes() {
        let mut engine = Engine::new();
        let root = engine.stack().root().id();

        let finished = Arc::new(Mutex::new(None));
        let seen = finished.clone();
        let mut change = Addition::new(root, OptionsBag::new(), ResponseDoc::with_content("done"))
            .with_on_finished(move |result| {
                *seen.lock().unwrap() = Some(result.clone());
            });
        let result = engine.execute(&mut change).unwrap();
        assert_eq!(finished.lock().unwrap().as_ref(), Some(&result));

        // A render aborted by a close signal never reaches the callback.
        let overlay = open_overlay(&mut engine);
        let fired = Arc::new(Mutex::new(false));
        let flag = fired.clone();
        let mut response = ResponseDoc::with_content("bye");
        response.dismiss_layer = Some(Value::Null);
        let mut change = Addition::new(overlay, OptionsBag::new(), response)
            .with_on_finished(move |_| *flag.lock().unwrap() = true);
        let err = engine.execute(&mut change).unwrap_err();
        assert!(err.is_aborted());
        assert!(!*fired.lock().unwrap());
    }

    #[test]
    fn reset_returns_to_a_pristine_document() {
        let mut engine = Engine::new();
        open_overlay(&mut engine);
        engine.render(bag(&[("content", json!("x"))])).unwrap();

        engine.reset();
        assert_eq!(engine.stack().len(), 1);
        assert!(engine.doc().children(engine.doc().body()).is_empty());
        assert_eq!(engine.stack().history().location, None);
    }

    #[test]
    fn fail_prefixed_options_take_over_for_failure_responses() {
        let mut engine = Engine::new();
        let card = engine.doc_mut().create_element("div");
        engine.doc_mut().add_class(card, "errors");
        let body = engine.doc().body();
        engine.doc_mut().append_child(body, card);

        let result = engine
            .render_failure(
                bag(&[
                    ("target", json!(".missing")),
                    ("fail_target", json!(".errors")),
                ]),
                ResponseDoc::with_content("oops"),
            )
            .unwrap();
        assert_eq!(engine.doc().children(card), &result.fragments[..]);
    }
}
