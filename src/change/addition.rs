use serde_json::Value;

use super::response::ResponseDoc;
use super::{Change, CloseLayer, RenderResult, improve_history_value};
use crate::dom::{Document, ElementId};
use crate::engine::Engine;
use crate::error::{RenderError, Result};
use crate::layer::{CloseVerb, HistoryEntry, LayerId};
use crate::options::OptionsBag;
use crate::selector::Selector;

/// Attribute recording where a fragment was loaded from.
const SOURCE_ATTR: &str = "at-source";

/// How the provenance URL for inserted content is decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SourceSpec {
    /// Reuse the previous element's recorded source. Used when the
    /// response did not come from a safely-reloadable request (non-GET)
    /// or is an error response.
    Keep,
    Given(String),
    None,
}

type OnFinished = Box<dyn FnMut(&RenderResult) + Send>;

/// Inserts or updates content on a target layer and reacts to layer-close
/// signals embedded in the response.
pub struct Addition {
    layer: LayerId,
    options: OptionsBag,
    response: ResponseDoc,
    on_finished: Option<OnFinished>,
}

impl Addition {
    pub fn new(layer: LayerId, options: OptionsBag, response: ResponseDoc) -> Self {
        Self {
            layer,
            options,
            response,
            on_finished: None,
        }
    }

    /// Called with the result once the change has fully succeeded. An
    /// aborted or failed change never reaches the callback.
    pub fn with_on_finished(mut self, callback: impl FnMut(&RenderResult) + Send + 'static) -> Self {
        self.on_finished = Some(Box::new(callback));
        self
    }

    /// Winds up the call stack when the target layer was closed by an
    /// earlier step. Whoever closed the layer has already cleaned up
    /// elements and handlers; nothing below the check may mutate.
    fn abort_when_layer_closed(&self, engine: &Engine) -> Result<()> {
        if engine.layer_is_open(self.layer) {
            Ok(())
        } else {
            Err(RenderError::aborted("layer was closed"))
        }
    }

    fn close_with_signal(
        &self,
        engine: &mut Engine,
        verb: CloseVerb,
        value: Value,
    ) -> Result<()> {
        CloseLayer::new(self.layer, verb)
            .with_value(value)
            .execute(engine)
            .map(|_| ())
    }

    fn handle_layer_change_requests(&mut self, engine: &mut Engine) -> Result<()> {
        let is_overlay = engine
            .stack()
            .get(self.layer)
            .is_some_and(|layer| layer.is_overlay());

        if is_overlay {
            // The response may carry an explicit accept signal; a null
            // payload still counts as a signal.
            if let Some(signal) = self.response.accept_layer.clone() {
                self.close_with_signal(engine, CloseVerb::Accept, signal)?;
            }
            self.abort_when_layer_closed(engine)?;

            // A close condition may have been set when the layer opened.
            if let Some(value) = self
                .engine_layer(engine)
                .and_then(|layer| layer.location_close_value(CloseVerb::Accept))
            {
                self.close_with_signal(engine, CloseVerb::Accept, value)?;
            }
            self.abort_when_layer_closed(engine)?;

            if let Some(signal) = self.response.dismiss_layer.clone() {
                self.close_with_signal(engine, CloseVerb::Dismiss, signal)?;
            }
            self.abort_when_layer_closed(engine)?;

            if let Some(value) = self
                .engine_layer(engine)
                .and_then(|layer| layer.location_close_value(CloseVerb::Dismiss))
            {
                self.close_with_signal(engine, CloseVerb::Dismiss, value)?;
            }
            self.abort_when_layer_closed(engine)?;
        }

        // Queued events run with the updated layer as the ambient current
        // layer, so an event addressed to "current" resolves here instead
        // of the front layer. A listener may close the layer; stop the
        // queue as soon as that happens.
        let plans = self.response.event_plans.clone();
        let layer = self.layer;
        engine.as_current(layer, move |engine| -> Result<()> {
            for mut plan in plans {
                if plan.layer.is_none() {
                    plan.layer = Some(layer);
                }
                if plan.element.is_none() {
                    plan.element = engine
                        .stack()
                        .get(layer)
                        .map(|target| target.element(engine.doc()));
                }
                let mut envelope = engine.emit(plan);
                for request in envelope.take_close_requests() {
                    engine.execute_close_request(request)?;
                }
                if !engine.layer_is_open(layer) {
                    return Err(RenderError::aborted("layer was closed"));
                }
            }
            Ok(())
        })
    }

    fn engine_layer<'a>(&self, engine: &'a Engine) -> Option<&'a crate::layer::Layer> {
        engine.stack().get(self.layer)
    }

    fn resolve_target(
        &self,
        engine: &Engine,
        layer_element: ElementId,
        container: ElementId,
    ) -> Result<ElementId> {
        match self.options.get("target") {
            Some(Value::String(target)) => Selector::new([target.as_str()])
                .subtree(engine.doc(), layer_element)
                .first()
                .copied()
                .ok_or_else(|| {
                    RenderError::failed(format!("could not match target `{target}` in layer"))
                }),
            _ => Ok(container),
        }
    }

    fn source_spec(&self) -> SourceSpec {
        match self.options.get("source") {
            Some(Value::String(keep)) if keep == "keep" => SourceSpec::Keep,
            Some(Value::Bool(false)) => SourceSpec::None,
            Some(Value::String(given)) => SourceSpec::Given(given.clone()),
            _ => match &self.response.source {
                Some(source) => SourceSpec::Given(source.clone()),
                None => match self.options.get("url") {
                    Some(Value::String(url)) => SourceSpec::Given(url.clone()),
                    _ => SourceSpec::None,
                },
            },
        }
    }
}

impl Change for Addition {
    fn describe(&self) -> &'static str {
        "addition"
    }

    fn execute(&mut self, engine: &mut Engine) -> Result<RenderResult> {
        self.abort_when_layer_closed(engine)?;

        let (layer_element, container, history_visible, is_front) = {
            let layer = self
                .engine_layer(engine)
                .ok_or_else(|| RenderError::aborted("layer was closed"))?;
            (
                layer.element(engine.doc()),
                layer.first_swappable_element(engine.doc()),
                layer.history_visible(),
                engine.stack().is_front(self.layer),
            )
        };
        let target = self.resolve_target(engine, layer_element, container)?;

        // Build the incoming fragment detached, so an unchanged target
        // can be detected before any mutation happens.
        let fragment = engine.doc_mut().create_element("fragment");
        engine
            .doc_mut()
            .set_text(fragment, self.response.content.clone());
        let new_hash = engine.doc().subtree_hash(fragment);

        let old_children: Vec<ElementId> = engine.doc().children(target).to_vec();
        let unchanged = old_children.len() == 1
            && engine.doc().subtree_hash(old_children[0]) == new_hash;

        let mut fragments = Vec::new();
        if unchanged {
            // Nothing to swap; drop the unused fragment nodes.
            engine.doc_mut().destroy(fragment);
        } else {
            let kept_source = old_children
                .first()
                .and_then(|&old| recorded_source(engine.doc(), old))
                .map(str::to_string);
            for &old in &old_children {
                engine.destroy_subtree(old);
            }
            engine.doc_mut().append_child(target, fragment);
            set_source(engine.doc_mut(), kept_source, fragment, self.source_spec());
            fragments.push(fragment);
        }

        // Navigation-feedback bookkeeping and history.
        if let Some(location) = self.response.location.clone() {
            let title = self.response.title.clone();
            if let Some(layer) = engine.stack_mut().get_mut(self.layer) {
                layer.location = Some(location.clone());
                layer.title = title.clone();
            }
            if history_visible && is_front {
                let improved = improve_history_value(
                    self.options.get("history"),
                    Value::String(location),
                );
                if let Value::String(new_location) = improved {
                    engine.stack_mut().set_history(HistoryEntry {
                        location: Some(new_location),
                        title,
                    });
                }
            }
        }

        let mut compiled_elements = 0;
        if !fragments.is_empty() {
            compiled_elements = engine.compile(fragment, self.layer)?.compiled_elements;

            if let Some(Value::String(focus)) = self.options.get("focus") {
                if focus != "auto" {
                    if let Some(&element) =
                        Selector::new([focus.as_str()]).subtree(engine.doc(), fragment).first()
                    {
                        engine.doc_mut().focus(element, false);
                    }
                }
            }
            if let Some(Value::String(scroll)) = self.options.get("scroll") {
                if scroll != "auto" {
                    if let Some(&element) =
                        Selector::new([scroll.as_str()]).subtree(engine.doc(), fragment).first()
                    {
                        match engine.reveal(element) {
                            Ok(()) => {}
                            // A user-interrupted scroll is a quiet exit,
                            // never a render failure.
                            Err(err) if err.is_aborted() => {}
                            Err(err) => return Err(err),
                        }
                    }
                }
            }
        }

        self.handle_layer_change_requests(engine)?;

        let result = RenderResult {
            layer: self.layer,
            fragments,
            location: self.response.location.clone(),
            compiled_elements,
        };
        if let Some(on_finished) = self.on_finished.as_mut() {
            on_finished(&result);
        }
        Ok(result)
    }
}

/// The source recorded on the element or its closest annotated ancestor.
fn recorded_source(doc: &Document, element: ElementId) -> Option<&str> {
    let mut cursor = Some(element);
    while let Some(current) = cursor {
        if let Some(source) = doc.attr(current, SOURCE_ATTR) {
            return Some(source);
        }
        cursor = doc.parent(current);
    }
    None
}

fn set_source(
    doc: &mut Document,
    kept_source: Option<String>,
    new_element: ElementId,
    spec: SourceSpec,
) {
    let source = match spec {
        SourceSpec::Keep => kept_source,
        SourceSpec::Given(source) => Some(source),
        SourceSpec::None => None,
    };
    // An empty source is as good as none, and content that already
    // declares its own source keeps it (set_missing_attr).
    if let Some(source) = source.filter(|source| !source.is_empty()) {
        doc.set_missing_attr(new_element, SOURCE_ATTR, normalize_url(&source));
    }
}

fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.len() > 1 {
        url.trim_end_matches('/').to_string()
    } else {
        url.to_string()
    }
}
