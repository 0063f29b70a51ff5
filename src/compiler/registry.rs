use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::dom::{Document, ElementId};
use crate::error::Result;

/// Identity of a registered compiler. Idempotence tracking is keyed by
/// this id, so re-registering an equivalent function counts as a new
/// compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompilerId(pub(crate) usize);

/// Cleanup callback run when the compiled element leaves the document.
pub type Destructor = Box<dyn FnMut() + Send>;

/// What a compiler invocation hands back.
pub enum CompilerOutcome {
    /// Nothing to clean up.
    Done,
    /// Run this when the element is removed.
    Destructor(Destructor),
    /// Run all of these when the element is removed.
    Destructors(Vec<Destructor>),
}

impl CompilerOutcome {
    pub(crate) fn into_destructors(self) -> Vec<Destructor> {
        match self {
            Self::Done => Vec::new(),
            Self::Destructor(destructor) => vec![destructor],
            Self::Destructors(destructors) => destructors,
        }
    }

    pub(crate) fn has_destructors(&self) -> bool {
        match self {
            Self::Done => false,
            Self::Destructor(_) => true,
            Self::Destructors(destructors) => !destructors.is_empty(),
        }
    }
}

pub type ElementCompilerFn =
    Box<dyn FnMut(&mut Document, ElementId, Option<&Value>) -> Result<CompilerOutcome> + Send>;
pub type BatchCompilerFn =
    Box<dyn FnMut(&mut Document, &[ElementId], &[Option<Value>]) -> Result<CompilerOutcome> + Send>;

pub(crate) enum CompilerFn {
    Each(ElementCompilerFn),
    Batch(BatchCompilerFn),
}

/// Registration options for one compiler.
#[derive(Debug, Clone)]
pub struct CompilerSpec {
    pub selector: String,
    /// Whether the compiler wants the bound data argument computed. The
    /// default is true; declaring false skips data parsing entirely.
    pub wants_data: bool,
}

impl CompilerSpec {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            wants_data: true,
        }
    }

    pub fn ignore_data(mut self) -> Self {
        self.wants_data = false;
        self
    }
}

pub(crate) struct Compiler {
    pub id: CompilerId,
    pub spec: CompilerSpec,
    pub batch: bool,
    pub func: CompilerFn,
}

/// The set of enhancement functions applied to inserted content.
#[derive(Default)]
pub struct CompilerRegistry {
    compilers: Vec<Compiler>,
}

impl CompilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a compiler invoked once per matched element.
    pub fn register<F>(&mut self, spec: CompilerSpec, func: F) -> CompilerId
    where
        F: FnMut(&mut Document, ElementId, Option<&Value>) -> Result<CompilerOutcome>
            + Send
            + 'static,
    {
        self.push(spec, false, CompilerFn::Each(Box::new(func)))
    }

    /// Registers a compiler invoked once with the whole batch of matches.
    /// Batch compilers must not return destructors.
    pub fn register_batch<F>(&mut self, spec: CompilerSpec, func: F) -> CompilerId
    where
        F: FnMut(&mut Document, &[ElementId], &[Option<Value>]) -> Result<CompilerOutcome>
            + Send
            + 'static,
    {
        self.push(spec, true, CompilerFn::Batch(Box::new(func)))
    }

    fn push(&mut self, spec: CompilerSpec, batch: bool, func: CompilerFn) -> CompilerId {
        let id = CompilerId(self.compilers.len());
        self.compilers.push(Compiler {
            id,
            spec,
            batch,
            func,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.compilers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compilers.is_empty()
    }

    pub(crate) fn compilers_mut(&mut self) -> &mut [Compiler] {
        &mut self.compilers
    }
}

/// Side table tracking which compilers already ran on which element, so a
/// second pass over an unchanged subtree is a no-op.
#[derive(Default)]
pub struct AppliedCompilers {
    applied: HashMap<ElementId, HashSet<CompilerId>>,
}

impl AppliedCompilers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the compiler as applied. Returns true if it had not been
    /// applied to this element before.
    pub fn mark(&mut self, element: ElementId, compiler: CompilerId) -> bool {
        self.applied.entry(element).or_default().insert(compiler)
    }

    pub fn was_applied(&self, element: ElementId, compiler: CompilerId) -> bool {
        self.applied
            .get(&element)
            .is_some_and(|set| set.contains(&compiler))
    }

    pub fn forget(&mut self, elements: &[ElementId]) {
        for element in elements {
            self.applied.remove(element);
        }
    }
}

/// Side table of destructors registered for elements, run when the
/// element is removed from the document.
#[derive(Default)]
pub struct DestructorRegistry {
    destructors: HashMap<ElementId, Vec<Destructor>>,
}

impl DestructorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, element: ElementId, destructors: Vec<Destructor>) {
        if !destructors.is_empty() {
            self.destructors
                .entry(element)
                .or_default()
                .extend(destructors);
        }
    }

    pub fn has_destructors(&self, element: ElementId) -> bool {
        self.destructors.contains_key(&element)
    }

    /// Runs and drops the destructors of every given element.
    pub fn run_for(&mut self, elements: &[ElementId]) {
        for element in elements {
            if let Some(mut destructors) = self.destructors.remove(element) {
                for destructor in &mut destructors {
                    destructor();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn mark_is_idempotent_per_element() {
        let mut applied = AppliedCompilers::new();
        let element = ElementId(7);
        assert!(applied.mark(element, CompilerId(0)));
        assert!(!applied.mark(element, CompilerId(0)));
        assert!(applied.mark(element, CompilerId(1)));
        assert!(applied.was_applied(element, CompilerId(0)));
    }

    #[test]
    fn forget_clears_element_state() {
        let mut applied = AppliedCompilers::new();
        let element = ElementId(7);
        applied.mark(element, CompilerId(0));
        applied.forget(&[element]);
        assert!(!applied.was_applied(element, CompilerId(0)));
    }

    #[test]
    fn destructors_run_once_and_are_dropped() {
        let mut registry = DestructorRegistry::new();
        let element = ElementId(3);
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        registry.register(
            element,
            vec![Box::new(move || {
                *counter.lock().unwrap() += 1;
            })],
        );

        registry.run_for(&[element]);
        registry.run_for(&[element]);
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
