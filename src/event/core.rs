use serde_json::{Map, Value};

use crate::dom::{Document, ElementId};
use crate::layer::{CloseVerb, LayerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A close a listener wants performed once the current dispatch returns.
///
/// Listeners cannot reach into the layer stack while the engine is
/// borrowed for dispatch, so they queue the request on the envelope; the
/// engine drains and executes requests immediately after the listener
/// returns, before the next queued event runs.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseRequest {
    pub layer: Option<LayerId>,
    pub verb: CloseVerb,
    pub value: Option<Value>,
}

/// One event mid-dispatch.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub name: String,
    pub layer: Option<LayerId>,
    pub value: Option<Value>,
    pub origin: Option<ElementId>,
    pub payload: Map<String, Value>,
    cancelable: bool,
    default_prevented: bool,
    close_requests: Vec<CloseRequest>,
}

impl EventEnvelope {
    /// Cancels the default action. Ignored for non-cancelable events.
    pub fn prevent_default(&mut self) {
        if self.cancelable {
            self.default_prevented = true;
        }
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Queue a close of the event's layer (or an explicit one).
    pub fn request_close(&mut self, layer: Option<LayerId>, verb: CloseVerb, value: Option<Value>) {
        self.close_requests.push(CloseRequest {
            layer: layer.or(self.layer),
            verb,
            value,
        });
    }

    pub fn take_close_requests(&mut self) -> Vec<CloseRequest> {
        std::mem::take(&mut self.close_requests)
    }
}

/// Description of an event to emit.
#[derive(Debug, Clone, Default)]
pub struct EmitSpec {
    pub name: String,
    /// Element to dispatch on; `None` dispatches on the document only.
    pub element: Option<ElementId>,
    pub layer: Option<LayerId>,
    pub value: Option<Value>,
    pub origin: Option<ElementId>,
    pub payload: Map<String, Value>,
    pub cancelable: bool,
    /// Re-emit on the document even if `element` is detached and the
    /// event would otherwise never reach document-level listeners.
    pub ensure_bubbles: bool,
}

impl EmitSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

type ListenerFn = Box<dyn FnMut(&mut EventEnvelope) + Send>;

enum Target {
    Document,
    Element(ElementId),
}

struct Listener {
    id: ListenerId,
    event_name: String,
    target: Target,
    callback: ListenerFn,
}

/// Listener registry plus dispatch.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<Listener>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_document(
        &mut self,
        event_name: impl Into<String>,
        callback: impl FnMut(&mut EventEnvelope) + Send + 'static,
    ) -> ListenerId {
        self.register(event_name, Target::Document, Box::new(callback))
    }

    pub fn on_element(
        &mut self,
        element: ElementId,
        event_name: impl Into<String>,
        callback: impl FnMut(&mut EventEnvelope) + Send + 'static,
    ) -> ListenerId {
        self.register(event_name, Target::Element(element), Box::new(callback))
    }

    fn register(
        &mut self,
        event_name: impl Into<String>,
        target: Target,
        callback: ListenerFn,
    ) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push(Listener {
            id,
            event_name: event_name.into(),
            target,
            callback,
        });
        id
    }

    pub fn off(&mut self, id: ListenerId) {
        self.listeners.retain(|listener| listener.id != id);
    }

    /// Remove all listeners bound to elements of the given set. Used when
    /// a layer's elements are torn down.
    pub fn remove_element_listeners(&mut self, elements: &[ElementId]) {
        self.listeners.retain(|listener| match listener.target {
            Target::Element(element) => !elements.contains(&element),
            Target::Document => true,
        });
    }

    /// Dispatches the event along the element's ancestor chain, then on
    /// the document, and returns the final envelope so the caller can
    /// inspect cancellation and drain close requests.
    pub fn emit(&mut self, doc: &Document, spec: EmitSpec) -> EventEnvelope {
        let mut envelope = EventEnvelope {
            name: spec.name,
            layer: spec.layer,
            value: spec.value,
            origin: spec.origin,
            payload: spec.payload,
            cancelable: spec.cancelable,
            default_prevented: false,
            close_requests: Vec::new(),
        };

        let mut path: Vec<ElementId> = Vec::new();
        let mut reaches_document = spec.element.is_none();
        if let Some(element) = spec.element {
            let mut cursor = Some(element);
            while let Some(current) = cursor {
                path.push(current);
                cursor = doc.parent(current);
            }
            reaches_document = doc.is_attached(element) || spec.ensure_bubbles;
        }

        for element in path {
            self.dispatch(&mut envelope, |target| {
                matches!(target, Target::Element(bound) if *bound == element)
            });
        }
        if reaches_document {
            self.dispatch(&mut envelope, |target| matches!(target, Target::Document));
        }
        envelope
    }

    fn dispatch(&mut self, envelope: &mut EventEnvelope, applies: impl Fn(&Target) -> bool) {
        for listener in &mut self.listeners {
            if listener.event_name == envelope.name && applies(&listener.target) {
                (listener.callback)(envelope);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn doc_with_child() -> (Document, ElementId) {
        let mut doc = Document::new();
        let element = doc.create_element("div");
        doc.append_child(doc.body(), element);
        (doc, element)
    }

    #[test]
    fn element_events_bubble_to_document() {
        let (doc, element) = doc_with_child();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();

        let log = seen.clone();
        bus.on_element(element, "layer:opened", move |_| {
            log.lock().unwrap().push("element");
        });
        let log = seen.clone();
        bus.on_document("layer:opened", move |_| {
            log.lock().unwrap().push("document");
        });

        let mut spec = EmitSpec::named("layer:opened");
        spec.element = Some(element);
        bus.emit(&doc, spec);

        assert_eq!(*seen.lock().unwrap(), vec!["element", "document"]);
    }

    #[test]
    fn detached_element_needs_ensure_bubbles_to_reach_document() {
        let (mut doc, element) = doc_with_child();
        doc.detach(element);

        let count = Arc::new(Mutex::new(0));
        let mut bus = EventBus::new();
        let counter = count.clone();
        bus.on_document("layer:dismissed", move |_| {
            *counter.lock().unwrap() += 1;
        });

        let mut spec = EmitSpec::named("layer:dismissed");
        spec.element = Some(element);
        bus.emit(&doc, spec.clone());
        assert_eq!(*count.lock().unwrap(), 0);

        spec.ensure_bubbles = true;
        bus.emit(&doc, spec);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn prevent_default_requires_cancelable() {
        let (doc, element) = doc_with_child();
        let mut bus = EventBus::new();
        bus.on_element(element, "layer:accept", |event| event.prevent_default());

        let mut spec = EmitSpec::named("layer:accept");
        spec.element = Some(element);
        let envelope = bus.emit(&doc, spec.clone());
        assert!(!envelope.default_prevented());

        spec.cancelable = true;
        let envelope = bus.emit(&doc, spec);
        assert!(envelope.default_prevented());
    }

    #[test]
    fn off_unregisters_listener() {
        let (doc, _) = doc_with_child();
        let count = Arc::new(Mutex::new(0));
        let mut bus = EventBus::new();
        let counter = count.clone();
        let id = bus.on_document("ping", move |_| {
            *counter.lock().unwrap() += 1;
        });

        bus.emit(&doc, EmitSpec::named("ping"));
        bus.off(id);
        bus.emit(&doc, EmitSpec::named("ping"));
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
