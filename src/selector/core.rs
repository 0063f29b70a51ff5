use crate::dom::{Document, ElementId};

/// Predicate applied on top of selector matching.
pub type SelectorFilter = Box<dyn Fn(&Document, ElementId) -> bool + Send>;

/// Matches elements against an ordered set of selector strings plus filter
/// predicates.
///
/// The order of `selectors` is a priority order: when several selectors
/// could satisfy a lookup, a match for an earlier selector wins over a
/// match for a later one, regardless of document order. An empty selector
/// set matches nothing, never "everything".
pub struct Selector {
    selectors: Vec<String>,
    filters: Vec<SelectorFilter>,
}

impl Selector {
    pub fn new(selectors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            selectors: selectors.into_iter().map(Into::into).collect(),
            filters: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: SelectorFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }

    pub fn matches(&self, doc: &Document, element: ElementId) -> bool {
        self.selectors
            .iter()
            .any(|selector| doc.matches(element, selector))
            && self.passes_filters(doc, element)
    }

    /// Walks upward from `element` through its ancestors until one matches,
    /// or the tree is exhausted.
    pub fn closest(&self, doc: &Document, element: ElementId) -> Option<ElementId> {
        let mut cursor = Some(element);
        while let Some(current) = cursor {
            if self.matches(doc, current) {
                return Some(current);
            }
            cursor = doc.parent(current);
        }
        None
    }

    /// Descendants of `root` matching this selector, in selector-priority
    /// order.
    ///
    /// Each selector is evaluated as its own query and the results are
    /// concatenated, so an element matched by an earlier selector is
    /// returned before an element matched only by a later one, even when
    /// the latter comes first in document order.
    pub fn descendants(&self, doc: &Document, root: ElementId) -> Vec<ElementId> {
        let mut results: Vec<ElementId> = Vec::new();
        for selector in &self.selectors {
            for element in doc.query_all(root, selector) {
                if !results.contains(&element) {
                    results.push(element);
                }
            }
        }
        results.retain(|&element| self.passes_filters(doc, element));
        results
    }

    /// `root` itself (if matching) prepended to [`Selector::descendants`].
    pub fn subtree(&self, doc: &Document, root: ElementId) -> Vec<ElementId> {
        let mut results = Vec::new();
        if self.matches(doc, root) {
            results.push(root);
        }
        results.extend(self.descendants(doc, root));
        results
    }

    fn passes_filters(&self, doc: &Document, element: ElementId) -> bool {
        self.filters.iter().all(|filter| filter(doc, element))
    }
}
