use serde_json::Value;

use super::{Change, RenderResult};
use crate::dom::ElementId;
use crate::engine::Engine;
use crate::error::{RenderError, Result};
use crate::event::EmitSpec;
use crate::layer::{CloseVerb, LayerId};
use crate::options::OptionsBag;

/// Synchronously tears down one overlay layer.
///
/// The close sequence mutates the stack without suspension points: once
/// handler teardown begins the operation cannot be rolled back. Callers
/// discovering the layer closed mid-operation elsewhere must unwind with
/// an aborted signal instead of mutating further.
pub struct CloseLayer {
    layer: LayerId,
    verb: CloseVerb,
    origin: Option<ElementId>,
    value: Option<Value>,
    preventable: bool,
    options: OptionsBag,
}

impl CloseLayer {
    pub fn new(layer: LayerId, verb: CloseVerb) -> Self {
        Self {
            layer,
            verb,
            origin: None,
            value: None,
            preventable: true,
            options: OptionsBag::new(),
        }
    }

    /// The element that triggered the close. Its structured `at-accept` /
    /// `at-dismiss` attribute supplies the payload when no explicit value
    /// is given.
    pub fn with_origin(mut self, origin: ElementId) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// A non-preventable close ignores cancellation of the will-close
    /// event. Used when peeling child layers.
    pub fn non_preventable(mut self) -> Self {
        self.preventable = false;
        self
    }

    pub fn with_options(mut self, options: OptionsBag) -> Self {
        self.options = options;
        self
    }

    fn resolve_value(&self, engine: &Engine) -> Option<Value> {
        // Explicit value if provided, else parse the origin's structured
        // attribute keyed by the close verb.
        self.value.clone().or_else(|| {
            self.origin
                .and_then(|origin| engine.doc().json_attr(origin, &self.verb.payload_attr()))
        })
    }
}

impl Change for CloseLayer {
    fn describe(&self) -> &'static str {
        "close_layer"
    }

    fn execute(&mut self, engine: &mut Engine) -> Result<RenderResult> {
        let value = self.resolve_value(engine);

        // Already closed or gone: resolve immediately.
        let Some(layer) = engine.stack().get(self.layer) else {
            return Ok(RenderResult::none(self.layer));
        };
        if layer.is_closed() {
            return Ok(RenderResult::none(self.layer));
        }
        layer.ensure_closable()?;
        let element = layer.element(engine.doc());

        engine.assert_confirmed(&self.options)?;

        // Abort all pending requests targeting the layer we're closing,
        // before any event fires, so no handler can race a response that
        // is about to be discarded.
        engine.abort_requests_for_layer(self.layer);

        let mut will_close = EmitSpec::named(self.verb.close_event());
        will_close.element = Some(element);
        will_close.layer = Some(self.layer);
        will_close.value = value.clone();
        will_close.origin = self.origin;
        will_close.cancelable = true;
        let envelope = engine.emit(will_close);
        if envelope.default_prevented() && self.preventable {
            return Err(RenderError::aborted("close event was prevented"));
        }

        // Remember the parent, which is no longer derivable once the
        // layer leaves the stack.
        let parent = engine
            .stack()
            .parent_of(self.layer)
            .ok_or_else(|| RenderError::failed("overlay has no parent layer"))?;

        // Peel: close child layers stacked above, topmost first. Stack
        // mutation stays synchronous, nothing waits for their teardown.
        for child in engine.stack().descendants_of(self.layer).into_iter().rev() {
            CloseLayer::new(child, CloseVerb::Dismiss)
                .non_preventable()
                .execute(engine)?;
        }

        let mut removed = engine.stack_mut().remove(self.layer)?;
        removed.mark_closed();

        // The parent is frontmost again; bring its history back.
        engine.stack_mut().restore_history(parent);

        // Focus hand-off.
        if let Some(trap) = removed.focus_trap_mut() {
            trap.teardown();
        }
        let parent_trap_promoted = engine
            .stack_mut()
            .get_mut(parent)
            .and_then(|layer| layer.focus_trap_mut())
            .map(|trap| {
                trap.move_to_front();
                true
            })
            .unwrap_or(false);
        if !parent_trap_promoted {
            let refocus = removed.origin.unwrap_or_else(|| {
                engine
                    .stack()
                    .get(parent)
                    .map(|layer| layer.element(engine.doc()))
                    .unwrap_or_else(|| engine.doc().root())
            });
            engine.doc_mut().focus(refocus, true);
        }

        // Handler teardown and element destruction; destructors run here.
        engine.destroy_subtree(element);

        // The closed event is addressed with the parent as the current
        // layer. The layer's element is detached now, so it must be
        // forced onto the document bus to reach global listeners.
        let verb = self.verb;
        let origin = self.origin;
        let closed_value = value;
        engine.as_current(parent, move |engine| {
            let mut closed = EmitSpec::named(verb.closed_event());
            closed.element = Some(element);
            closed.layer = Some(parent);
            closed.value = closed_value;
            closed.origin = origin;
            closed.ensure_bubbles = true;
            engine.emit(closed);
        });

        engine.note_layer_closed(self.layer, self.verb);

        Ok(RenderResult::none(parent))
    }
}
