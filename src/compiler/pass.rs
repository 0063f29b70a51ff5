use std::collections::HashMap;

use serde_json::{Value, json};

use super::registry::{
    AppliedCompilers, Compiler, CompilerFn, CompilerRegistry, DestructorRegistry,
};
use crate::dom::{Document, ElementId};
use crate::error::{CompileError, RenderError, Result};
use crate::layer::LayerId;
use crate::logging::{LogLevel, Logger, event_with_fields, json_kv};
use crate::selector::Selector;

/// Marks an element whose subtree is preserved across fragment updates.
/// Presence of this attribute under the pass root is what activates the
/// (expensive) skip filter.
const KEEP_ATTR: &str = "at-keep";

/// Structured per-element data attribute parsed for compilers that want a
/// data argument.
const DATA_ATTR: &str = "at-data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassOutcome {
    /// Number of element compilations performed (not counting elements
    /// already compiled in an earlier pass).
    pub compiled_elements: usize,
}

/// Applies every registered compiler to the qualifying elements of one
/// subtree, each element at most once per compiler across all passes.
pub struct CompilerPass<'a> {
    doc: &'a mut Document,
    registry: &'a mut CompilerRegistry,
    applied: &'a mut AppliedCompilers,
    destructors: &'a mut DestructorRegistry,
    logger: Option<&'a Logger>,
    root: ElementId,
    layer: LayerId,
    skip: Vec<ElementId>,
    data: Option<Value>,
    data_map: Vec<(String, Value)>,
}

impl<'a> CompilerPass<'a> {
    pub fn new(
        doc: &'a mut Document,
        registry: &'a mut CompilerRegistry,
        applied: &'a mut AppliedCompilers,
        destructors: &'a mut DestructorRegistry,
        root: ElementId,
        layer: LayerId,
    ) -> Self {
        Self {
            doc,
            registry,
            applied,
            destructors,
            logger: None,
            root,
            layer,
            skip: Vec::new(),
            data: None,
            data_map: Vec::new(),
        }
    }

    /// Subtrees to exclude from compilation.
    pub fn with_skip(mut self, skip: Vec<ElementId>) -> Self {
        self.skip = skip;
        self
    }

    /// Bound data for the pass root.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Bound data per selector, assigned to every match before compilers
    /// run.
    pub fn with_data_map(mut self, data_map: Vec<(String, Value)>) -> Self {
        self.data_map = data_map;
        self
    }

    pub fn with_logger(mut self, logger: &'a Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Runs all compilers. Individual compiler failures are recorded,
    /// logged and skipped past; if any were recorded the pass as a whole
    /// fails with an aggregate error after every element had its chance.
    pub fn run(self) -> Result<PassOutcome> {
        // The exclusion filter walks ancestor chains per match, which is
        // expensive. Only activate it when exclusions were requested and
        // the root subtree actually contains a preserved element.
        let skip_active = !self.skip.is_empty() && contains_kept_element(self.doc, self.root);
        let skip: &[ElementId] = if skip_active { &self.skip } else { &[] };

        let assigned = assign_data(
            self.doc,
            self.root,
            skip,
            self.data.as_ref(),
            &self.data_map,
        );

        let mut errors: Vec<CompileError> = Vec::new();
        let mut compiled = 0usize;

        for compiler in self.registry.compilers_mut() {
            let matches = select_once(self.doc, self.applied, compiler, self.root, skip);
            if matches.is_empty() {
                continue;
            }

            if let Some(logger) = self.logger {
                logger.log_event(event_with_fields(
                    LogLevel::Debug,
                    "atrium::compiler",
                    "compiling",
                    [
                        json_kv("selector", json!(compiler.spec.selector)),
                        json_kv("matches", json!(matches.len())),
                        json_kv("layer", json!(self.layer.0)),
                    ],
                ));
            }

            match &mut compiler.func {
                CompilerFn::Each(func) => {
                    for &element in &matches {
                        let data = if compiler.spec.wants_data {
                            element_data(self.doc, &assigned, element)
                        } else {
                            None
                        };
                        match func(self.doc, element, data.as_ref()) {
                            Ok(outcome) => {
                                self.destructors
                                    .register(element, outcome.into_destructors());
                            }
                            Err(err) => record_error(
                                &mut errors,
                                self.logger,
                                &compiler.spec.selector,
                                element,
                                err,
                            ),
                        }
                    }
                }
                CompilerFn::Batch(func) => {
                    let data_list: Vec<Option<Value>> = if compiler.spec.wants_data {
                        matches
                            .iter()
                            .map(|&element| element_data(self.doc, &assigned, element))
                            .collect()
                    } else {
                        vec![None; matches.len()]
                    };
                    match func(self.doc, &matches, &data_list) {
                        Ok(outcome) => {
                            if outcome.has_destructors() {
                                return Err(RenderError::failed(
                                    "batch compilers cannot return destructors",
                                ));
                            }
                        }
                        Err(err) => record_error(
                            &mut errors,
                            self.logger,
                            &compiler.spec.selector,
                            matches[0],
                            err,
                        ),
                    }
                }
            }

            compiled += matches.len();
        }

        if errors.is_empty() {
            Ok(PassOutcome {
                compiled_elements: compiled,
            })
        } else {
            Err(RenderError::CannotCompile { errors })
        }
    }
}

fn contains_kept_element(doc: &Document, root: ElementId) -> bool {
    if doc.has_attr(root, KEEP_ATTR) {
        return true;
    }
    doc.descendants(root)
        .iter()
        .any(|&element| doc.has_attr(element, KEEP_ATTR))
}

fn in_skipped_subtree(doc: &Document, skip: &[ElementId], element: ElementId) -> bool {
    skip.iter()
        .any(|&skipped| doc.contains(skipped, element))
}

fn select(doc: &Document, selector: &str, root: ElementId, skip: &[ElementId]) -> Vec<ElementId> {
    let selector = Selector::new([selector]);
    let mut matches = selector.subtree(doc, root);
    if !skip.is_empty() {
        matches.retain(|&element| !in_skipped_subtree(doc, skip, element));
    }
    matches
}

fn select_once(
    doc: &Document,
    applied: &mut AppliedCompilers,
    compiler: &Compiler,
    root: ElementId,
    skip: &[ElementId],
) -> Vec<ElementId> {
    // Marking happens during selection, so a compiler that fails on an
    // element is still not retried by a later pass.
    select(doc, &compiler.spec.selector, root, skip)
        .into_iter()
        .filter(|&element| applied.mark(element, compiler.id))
        .collect()
}

fn assign_data(
    doc: &Document,
    root: ElementId,
    skip: &[ElementId],
    data: Option<&Value>,
    data_map: &[(String, Value)],
) -> HashMap<ElementId, Value> {
    let mut assigned = HashMap::new();
    if let Some(data) = data {
        assigned.insert(root, data.clone());
    }
    for (selector, value) in data_map {
        for element in select(doc, selector, root, skip) {
            assigned.insert(element, value.clone());
        }
    }
    assigned
}

fn element_data(
    doc: &Document,
    assigned: &HashMap<ElementId, Value>,
    element: ElementId,
) -> Option<Value> {
    assigned
        .get(&element)
        .cloned()
        .or_else(|| doc.json_attr(element, DATA_ATTR))
}

fn record_error(
    errors: &mut Vec<CompileError>,
    logger: Option<&Logger>,
    selector: &str,
    element: ElementId,
    err: RenderError,
) {
    let error = CompileError {
        selector: selector.to_string(),
        element,
        message: err.to_string(),
    };
    if let Some(logger) = logger {
        logger.log_event(event_with_fields(
            LogLevel::Error,
            "atrium::compiler",
            "compiler_failed",
            [
                json_kv("selector", json!(error.selector)),
                json_kv("element", json!(element.0)),
                json_kv("error", json!(error.message)),
            ],
        ));
    }
    errors.push(error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompilerOutcome, CompilerSpec};
    use std::sync::{Arc, Mutex};

    struct Fixture {
        doc: Document,
        registry: CompilerRegistry,
        applied: AppliedCompilers,
        destructors: DestructorRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                doc: Document::new(),
                registry: CompilerRegistry::new(),
                applied: AppliedCompilers::new(),
                destructors: DestructorRegistry::new(),
            }
        }

        fn add_widget(&mut self, parent: Option<ElementId>) -> ElementId {
            let element = self.doc.create_element("div");
            self.doc.add_class(element, "x");
            let parent = parent.unwrap_or_else(|| self.doc.body());
            self.doc.append_child(parent, element);
            element
        }

        fn run(&mut self) -> Result<PassOutcome> {
            let root = self.doc.body();
            CompilerPass::new(
                &mut self.doc,
                &mut self.registry,
                &mut self.applied,
                &mut self.destructors,
                root,
                LayerId(0),
            )
            .run()
        }
    }

    #[test]
    fn second_pass_over_unchanged_subtree_is_noop() {
        let mut fixture = Fixture::new();
        fixture.add_widget(None);
        fixture.add_widget(None);

        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        fixture.registry.register(CompilerSpec::new(".x"), move |_, _, _| {
            *counter.lock().unwrap() += 1;
            Ok(CompilerOutcome::Done)
        });

        fixture.run().unwrap();
        let second = fixture.run().unwrap();
        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(second.compiled_elements, 0);
    }

    #[test]
    fn failing_compiler_does_not_stop_other_elements() {
        let mut fixture = Fixture::new();
        let first = fixture.add_widget(None);
        let poison = fixture.add_widget(None);
        let last = fixture.add_widget(None);
        fixture.doc.set_attr(poison, "id", "poison");

        let compiled = Arc::new(Mutex::new(Vec::new()));
        let seen = compiled.clone();
        fixture
            .registry
            .register(CompilerSpec::new(".x"), move |doc, element, _| {
                if doc.attr(element, "id") == Some("poison") {
                    return Err(RenderError::failed("boom"));
                }
                seen.lock().unwrap().push(element);
                Ok(CompilerOutcome::Done)
            });

        let err = fixture.run().unwrap_err();
        match err {
            RenderError::CannotCompile { errors } => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].element, poison);
                assert_eq!(errors[0].selector, ".x");
            }
            other => panic!("expected CannotCompile, got {other:?}"),
        }
        assert_eq!(*compiled.lock().unwrap(), vec![first, last]);
    }

    #[test]
    fn destructors_are_registered_from_return_values() {
        let mut fixture = Fixture::new();
        let element = fixture.add_widget(None);

        let torn_down = Arc::new(Mutex::new(false));
        let flag = torn_down.clone();
        fixture.registry.register(CompilerSpec::new(".x"), move |_, _, _| {
            let flag = flag.clone();
            Ok(CompilerOutcome::Destructor(Box::new(move || {
                *flag.lock().unwrap() = true;
            })))
        });

        fixture.run().unwrap();
        assert!(fixture.destructors.has_destructors(element));
        fixture.destructors.run_for(&[element]);
        assert!(*torn_down.lock().unwrap());
    }

    #[test]
    fn batch_compiler_sees_all_matches_at_once() {
        let mut fixture = Fixture::new();
        fixture.add_widget(None);
        fixture.add_widget(None);

        let sizes = Arc::new(Mutex::new(Vec::new()));
        let seen = sizes.clone();
        fixture
            .registry
            .register_batch(CompilerSpec::new(".x"), move |_, elements, _| {
                seen.lock().unwrap().push(elements.len());
                Ok(CompilerOutcome::Done)
            });

        fixture.run().unwrap();
        assert_eq!(*sizes.lock().unwrap(), vec![2]);
    }

    #[test]
    fn batch_compiler_returning_destructor_is_fatal() {
        let mut fixture = Fixture::new();
        fixture.add_widget(None);
        fixture
            .registry
            .register_batch(CompilerSpec::new(".x"), |_, _, _| {
                Ok(CompilerOutcome::Destructor(Box::new(|| {})))
            });

        let err = fixture.run().unwrap_err();
        assert!(matches!(err, RenderError::Failed(_)));
    }

    #[test]
    fn data_is_parsed_from_attribute_unless_declined() {
        let mut fixture = Fixture::new();
        let element = fixture.add_widget(None);
        fixture.doc.set_attr(element, DATA_ATTR, r#"{"n": 1}"#);

        let received = Arc::new(Mutex::new(Vec::new()));
        let seen = received.clone();
        fixture
            .registry
            .register(CompilerSpec::new(".x"), move |_, _, data| {
                seen.lock().unwrap().push(data.cloned());
                Ok(CompilerOutcome::Done)
            });
        let seen = received.clone();
        fixture
            .registry
            .register(CompilerSpec::new(".x").ignore_data(), move |_, _, data| {
                seen.lock().unwrap().push(data.cloned());
                Ok(CompilerOutcome::Done)
            });

        fixture.run().unwrap();
        let received = received.lock().unwrap();
        assert_eq!(received[0], Some(json!({"n": 1})));
        assert_eq!(received[1], None);
    }

    #[test]
    fn data_map_overrides_attribute_data() {
        let mut fixture = Fixture::new();
        let element = fixture.add_widget(None);
        fixture.doc.set_attr(element, DATA_ATTR, r#"{"n": 1}"#);

        let received = Arc::new(Mutex::new(None));
        let seen = received.clone();
        fixture
            .registry
            .register(CompilerSpec::new(".x"), move |_, _, data| {
                *seen.lock().unwrap() = data.cloned();
                Ok(CompilerOutcome::Done)
            });

        let root = fixture.doc.body();
        CompilerPass::new(
            &mut fixture.doc,
            &mut fixture.registry,
            &mut fixture.applied,
            &mut fixture.destructors,
            root,
            LayerId(0),
        )
        .with_data_map(vec![(".x".into(), json!({"n": 2}))])
        .run()
        .unwrap();

        assert_eq!(*received.lock().unwrap(), Some(json!({"n": 2})));
    }

    #[test]
    fn skip_only_activates_with_a_kept_element_present() {
        let mut fixture = Fixture::new();
        let kept_parent = fixture.doc.create_element("div");
        fixture.doc.append_child(fixture.doc.body(), kept_parent);
        let inside = fixture.add_widget(Some(kept_parent));
        let outside = fixture.add_widget(None);

        let compiled = Arc::new(Mutex::new(Vec::new()));
        let seen = compiled.clone();
        fixture
            .registry
            .register(CompilerSpec::new(".x"), move |_, element, _| {
                seen.lock().unwrap().push(element);
                Ok(CompilerOutcome::Done)
            });

        // No kept element in the subtree: exclusions are ignored.
        let root = fixture.doc.body();
        CompilerPass::new(
            &mut fixture.doc,
            &mut fixture.registry,
            &mut fixture.applied,
            &mut fixture.destructors,
            root,
            LayerId(0),
        )
        .with_skip(vec![kept_parent])
        .run()
        .unwrap();
        assert_eq!(*compiled.lock().unwrap(), vec![inside, outside]);

        // With a kept element present, the skipped subtree is excluded.
        compiled.lock().unwrap().clear();
        fixture.doc.set_attr(kept_parent, KEEP_ATTR, "");
        let _fresh_inside = fixture.add_widget(Some(kept_parent));
        let fresh_outside = fixture.add_widget(None);
        let root = fixture.doc.body();
        CompilerPass::new(
            &mut fixture.doc,
            &mut fixture.registry,
            &mut fixture.applied,
            &mut fixture.destructors,
            root,
            LayerId(0),
        )
        .with_skip(vec![kept_parent])
        .run()
        .unwrap();
        assert_eq!(*compiled.lock().unwrap(), vec![fresh_outside]);
    }
}
