use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dom::{Document, ElementId};
use crate::error::{RenderError, Result};
use crate::options::OptionsBag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub(crate) u64);

/// The two ways a layer can close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseVerb {
    Accept,
    Dismiss,
}

impl CloseVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Dismiss => "dismiss",
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Accept => "accepted",
            Self::Dismiss => "dismissed",
        }
    }

    /// Name of the cancelable will-close event.
    pub fn close_event(self) -> String {
        format!("layer:{}", self.as_str())
    }

    /// Name of the non-cancelable closed event.
    pub fn closed_event(self) -> String {
        format!("layer:{}", self.past_tense())
    }

    /// Structured attribute read from the origin element when no explicit
    /// close payload was supplied.
    pub fn payload_attr(self) -> String {
        format!("at-{}", self.as_str())
    }
}

/// Observable lifecycle states. The opening/closing phases are transient
/// within a change execution and not independently inspectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    Open,
    Closed,
}

/// Per-layer focus containment. Implementations trap keyboard focus
/// inside the layer's element; the pipeline only needs teardown and
/// front-promotion.
pub trait FocusTrap: Send {
    fn teardown(&mut self);
    fn move_to_front(&mut self);
}

/// Focus trap that does nothing. Overlays without focus containment use
/// this so close-time hand-off stays uniform.
#[derive(Default)]
pub struct NullFocusTrap;

impl FocusTrap for NullFocusTrap {
    fn teardown(&mut self) {}
    fn move_to_front(&mut self) {}
}

/// Configuration captured when an overlay opens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlayOptions {
    /// Whether this overlay contributes to the document history.
    #[serde(default)]
    pub history: bool,
    /// Accept the overlay automatically when navigation reaches this URL.
    pub accept_location: Option<String>,
    /// Dismiss the overlay automatically when navigation reaches this URL.
    pub dismiss_location: Option<String>,
    /// Late-bound render defaults contributed by this overlay, e.g. its
    /// configured default focus target.
    #[serde(default)]
    pub render_defaults: OptionsBag,
}

/// Tagged layer kind. A closed enum rather than a class hierarchy: both
/// kinds implement the same capability set and callers dispatch on the
/// variant.
pub enum LayerMode {
    /// The base page. Always open, cannot be closed, element resolved
    /// dynamically from the document.
    Root,
    /// A stacked presentation context owning its element.
    Overlay {
        element: ElementId,
        options: OverlayOptions,
    },
}

/// One presentation context in the stack.
pub struct Layer {
    pub(crate) id: LayerId,
    pub(crate) mode: LayerMode,
    pub(crate) state: LayerState,
    /// Element that opened this layer, refocused after close.
    pub origin: Option<ElementId>,
    /// Last-seen location for navigation-feedback bookkeeping.
    pub location: Option<String>,
    pub title: Option<String>,
    pub(crate) focus_trap: Option<Box<dyn FocusTrap>>,
    /// Parent reference captured when the layer leaves the stack. While
    /// stacked, the parent is derived from stack order instead.
    pub(crate) parent_hint: Option<LayerId>,
}

impl Layer {
    pub(crate) fn root() -> Self {
        Self {
            id: LayerId(0),
            mode: LayerMode::Root,
            state: LayerState::Open,
            origin: None,
            location: None,
            title: None,
            focus_trap: None,
            parent_hint: None,
        }
    }

    pub(crate) fn overlay(id: LayerId, element: ElementId, options: OverlayOptions) -> Self {
        Self {
            id,
            mode: LayerMode::Overlay { element, options },
            state: LayerState::Open,
            origin: None,
            location: None,
            title: None,
            focus_trap: None,
            parent_hint: None,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn is_root(&self) -> bool {
        matches!(self.mode, LayerMode::Root)
    }

    pub fn is_overlay(&self) -> bool {
        !self.is_root()
    }

    pub fn is_open(&self) -> bool {
        self.state == LayerState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state == LayerState::Closed
    }

    /// The layer's element. For the root layer this is the document's
    /// current top-level element, resolved fresh on every call because a
    /// fragment update may have swapped it.
    pub fn element(&self, doc: &Document) -> ElementId {
        match &self.mode {
            LayerMode::Root => doc.root(),
            LayerMode::Overlay { element, .. } => *element,
        }
    }

    /// The element content swaps target first: the body surrogate for the
    /// root layer, the overlay's own element otherwise.
    pub fn first_swappable_element(&self, doc: &Document) -> ElementId {
        match &self.mode {
            LayerMode::Root => doc.body(),
            LayerMode::Overlay { element, .. } => *element,
        }
    }

    pub fn overlay_options(&self) -> Option<&OverlayOptions> {
        match &self.mode {
            LayerMode::Root => None,
            LayerMode::Overlay { options, .. } => Some(options),
        }
    }

    /// Late-bound render defaults this layer contributes to `finalize()`.
    pub fn render_defaults(&self) -> OptionsBag {
        self.overlay_options()
            .map(|options| options.render_defaults.clone())
            .unwrap_or_default()
    }

    pub fn history_visible(&self) -> bool {
        match &self.mode {
            LayerMode::Root => true,
            LayerMode::Overlay { options, .. } => options.history,
        }
    }

    /// Rejects close attempts on the root layer.
    pub fn ensure_closable(&self) -> Result<()> {
        if self.is_root() {
            Err(RenderError::failed("cannot close the root layer"))
        } else {
            Ok(())
        }
    }

    pub fn set_focus_trap(&mut self, trap: Box<dyn FocusTrap>) {
        self.focus_trap = Some(trap);
    }

    pub(crate) fn focus_trap_mut(&mut self) -> Option<&mut (dyn FocusTrap + 'static)> {
        self.focus_trap.as_deref_mut()
    }

    pub(crate) fn mark_closed(&mut self) {
        self.state = LayerState::Closed;
    }

    /// The close payload produced when the layer's current location meets
    /// its open-time close condition for `verb`. Locations are compared
    /// exactly.
    pub fn location_close_value(&self, verb: CloseVerb) -> Option<Value> {
        let options = self.overlay_options()?;
        let condition = match verb {
            CloseVerb::Accept => options.accept_location.as_deref(),
            CloseVerb::Dismiss => options.dismiss_location.as_deref(),
        }?;
        let location = self.location.as_deref()?;
        (location == condition).then(|| {
            let mut payload = serde_json::Map::new();
            payload.insert("location".into(), Value::String(location.to_string()));
            Value::Object(payload)
        })
    }

    /// Restores the root layer to its defaults. Test support, mirroring
    /// a framework reset between scenarios.
    pub fn reset(&mut self) {
        if self.is_root() {
            self.state = LayerState::Open;
            self.origin = None;
            self.location = None;
            self.title = None;
            self.focus_trap = None;
            self.parent_hint = None;
        }
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_root() { "root" } else { "overlay" };
        f.debug_struct("Layer")
            .field("id", &self.id)
            .field("kind", &kind)
            .field("state", &self.state)
            .finish()
    }
}
