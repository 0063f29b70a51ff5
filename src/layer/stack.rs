use crate::dom::{Document, ElementId};
use crate::error::{RenderError, Result};

use super::core::{Layer, LayerId, OverlayOptions};

/// The document-level history representation (address bar surrogate).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryEntry {
    pub location: Option<String>,
    pub title: Option<String>,
}

/// Ordered stack of presentation contexts.
///
/// The root layer always exists at position 0. Overlays stack above it;
/// the frontmost layer is the last element. A layer's parent is the layer
/// that was frontmost when it opened, which in a simple ordered stack is
/// always the layer directly below it.
pub struct LayerStack {
    layers: Vec<Layer>,
    next_id: u64,
    history: HistoryEntry,
    root_handlers_element: Option<ElementId>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self {
            layers: vec![Layer::root()],
            next_id: 1,
            history: HistoryEntry::default(),
            root_handlers_element: None,
        }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        // The root layer is always present.
        false
    }

    pub fn root(&self) -> &Layer {
        &self.layers[0]
    }

    pub fn root_mut(&mut self) -> &mut Layer {
        &mut self.layers[0]
    }

    pub fn front(&self) -> &Layer {
        self.layers.last().expect("root layer always present")
    }

    pub fn front_mut(&mut self) -> &mut Layer {
        self.layers.last_mut().expect("root layer always present")
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|layer| layer.id == id)
    }

    pub fn position(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|layer| layer.id == id)
    }

    pub fn ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|layer| layer.id).collect()
    }

    pub fn is_front(&self, id: LayerId) -> bool {
        self.front().id == id
    }

    /// The layer that was frontmost when `id` opened. Derived from stack
    /// order while the layer is stacked; after removal the hint captured
    /// at close time answers instead.
    pub fn parent_of(&self, id: LayerId) -> Option<LayerId> {
        match self.position(id) {
            Some(0) => None,
            Some(index) => Some(self.layers[index - 1].id),
            None => None,
        }
    }

    /// Layers stacked above `id`, nearest first.
    pub fn descendants_of(&self, id: LayerId) -> Vec<LayerId> {
        match self.position(id) {
            Some(index) => self.layers[index + 1..]
                .iter()
                .map(|layer| layer.id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Opens a new overlay above the current front layer.
    pub fn push_overlay(
        &mut self,
        element: ElementId,
        options: OverlayOptions,
        origin: Option<ElementId>,
    ) -> LayerId {
        let id = LayerId(self.next_id);
        self.next_id += 1;
        let mut layer = Layer::overlay(id, element, options);
        layer.origin = origin;
        self.layers.push(layer);
        id
    }

    /// Removes an overlay from the stack, capturing its parent hint for
    /// event routing after detachment. Refuses the root layer.
    pub fn remove(&mut self, id: LayerId) -> Result<Layer> {
        let index = self
            .position(id)
            .ok_or_else(|| RenderError::failed("layer is not in the stack"))?;
        if index == 0 {
            return Err(RenderError::failed("cannot remove the root layer"));
        }
        let parent = self.layers[index - 1].id;
        let mut layer = self.layers.remove(index);
        layer.parent_hint = Some(parent);
        Ok(layer)
    }

    pub fn history(&self) -> &HistoryEntry {
        &self.history
    }

    pub fn set_history(&mut self, entry: HistoryEntry) {
        self.history = entry;
    }

    /// Re-applies the given layer's location and title to the document
    /// history, used when a close promotes it back to front. Layers that
    /// opted out of history leave the document history untouched.
    pub fn restore_history(&mut self, id: LayerId) {
        let Some(layer) = self.get(id) else {
            return;
        };
        if layer.history_visible() {
            self.history = HistoryEntry {
                location: layer.location.clone(),
                title: layer.title.clone(),
            };
        }
    }

    /// True when root event handlers must be (re)installed: either no
    /// installation happened yet, or a fragment update swapped the
    /// document's top-level element wholesale. Detection is structural
    /// (by element identity), not by value comparison.
    pub fn needs_root_handler_sync(&self, doc: &Document) -> bool {
        self.root_handlers_element != Some(doc.root())
    }

    pub fn note_root_handlers_installed(&mut self, doc: &Document) {
        self.root_handlers_element = Some(doc.root());
    }

    /// Restores the stack to its pristine state: root layer only, default
    /// root state. Test support.
    pub fn reset(&mut self) {
        self.layers.truncate(1);
        self.layers[0].reset();
        self.history = HistoryEntry::default();
        self.root_handlers_element = None;
    }
}

impl Default for LayerStack {
    fn default() -> Self {
        Self::new()
    }
}
