use serde_json::{Map, Value, json};

use super::config::RenderConfig;
use crate::error::{RenderError, Result};

/// Open, string-keyed render options.
pub type OptionsBag = Map<String, Value>;

/// Keys needed before a network request is dispatched. They are shared
/// into the fail bag as-is and cannot carry a `fail_` variant: once a
/// change begins executing they are immutable.
pub const PREFLIGHT_KEYS: &[&str] = &[
    "url",
    "method",
    "origin",
    "headers",
    "params",
    "cache",
    "clear_cache",
    "fallback",
    "solo",
    "confirm",
    "feedback",
    "base_layer",
    "fail",
];

// Shared between success and fail options on top of the preflight keys.
// Layer-targeting and focus/scroll keys are deliberately absent: the user
// may want a different focus for errors, like
// { focus: ".result", fail_focus: ".errors" }.
const SHARED_EXTRA_KEYS: &[&str] = &["keep", "hungry", "history", "source", "save_scroll", "navigate"];

/// Exactly one of these must be given unless `default_to_empty_content`
/// is set.
pub const CONTENT_KEYS: &[&str] = &["url", "content", "fragment", "document"];

// Keys for which a better default may be resolved later, e.g. from the
// configuration of the layer being updated. preprocess() leaves them out
// of the merged defaults so a user option stays distinguishable from a
// default; finalize() applies them if no better default arrived.
pub const LATE_KEYS: &[&str] = &["history", "focus", "scroll"];

const DEFAULTS_KEY: &str = "defaults";

pub fn global_defaults() -> OptionsBag {
    let mut bag = OptionsBag::new();
    bag.insert("hungry".into(), json!(true));
    bag.insert("keep".into(), json!(true));
    bag.insert("source".into(), json!(true));
    bag.insert("save_scroll".into(), json!(true));
    bag.insert("fail".into(), json!("auto"));
    bag
}

fn preload_overrides() -> OptionsBag {
    let mut bag = OptionsBag::new();
    bag.insert("solo".into(), json!(false));
    bag.insert("confirm".into(), json!(false));
    bag.insert("feedback".into(), json!(false));
    bag
}

pub fn is_shared_key(key: &str) -> bool {
    PREFLIGHT_KEYS.contains(&key) || SHARED_EXTRA_KEYS.contains(&key)
}

/// JS-style truthiness for flag options.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        _ => true,
    }
}

/// Present and not null.
pub fn is_given(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null))
}

fn merge_into(target: &mut OptionsBag, source: &OptionsBag) {
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}

fn omit(bag: &OptionsBag, keys: &[&str]) -> OptionsBag {
    bag.iter()
        .filter(|(key, _)| !keys.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn stored_defaults(preprocessed: &OptionsBag) -> OptionsBag {
    match preprocessed.get(DEFAULTS_KEY) {
        Some(Value::Object(defaults)) => defaults.clone(),
        _ => OptionsBag::new(),
    }
}

/// Normalizes a raw options bag into its preprocessed form.
///
/// The rewrite hook runs first so deprecated option spellings can be
/// translated before any defaults are considered. Global defaults are
/// merged with navigation defaults (only when `navigate` is set), the
/// late-bound keys are removed from the merged defaults, the full default
/// set is stored under a `defaults` key for reuse by `finalize()` and
/// `derive_fail_options()`, and preload overrides are applied last when
/// `preload` is set.
pub fn preprocess(options: OptionsBag, config: &RenderConfig) -> OptionsBag {
    let mut options = options;
    if let Some(rewrite) = config.rewrite.as_ref() {
        rewrite(&mut options);
    }

    let mut defaults = global_defaults();
    if is_truthy(options.get("navigate")) {
        merge_into(&mut defaults, &config.navigate_defaults);
    }

    let mut result = omit(&defaults, LATE_KEYS);
    result.insert(DEFAULTS_KEY.into(), Value::Object(defaults));
    merge_into(&mut result, &options);

    if is_truthy(options.get("preload")) {
        merge_into(&mut result, &preload_overrides());
    }

    result
}

/// Merges, in increasing priority: the defaults stored by `preprocess()`,
/// late-bound defaults supplied by the caller (e.g. the target layer's own
/// configuration), then the preprocessed options themselves. Explicit user
/// options always win.
pub fn finalize(preprocessed: &OptionsBag, late_defaults: &OptionsBag) -> OptionsBag {
    let mut result = stored_defaults(preprocessed);
    merge_into(&mut result, late_defaults);
    merge_into(&mut result, preprocessed);
    result
}

fn fail_overrides(options: &OptionsBag) -> OptionsBag {
    let mut overrides = OptionsBag::new();
    for (key, value) in options {
        // The bare "fail" key is the fail-handling mode, not a prefix.
        if let Some(unprefixed) = key.strip_prefix("fail_") {
            if !unprefixed.is_empty() {
                overrides.insert(unprefixed.to_string(), value.clone());
            }
        }
    }
    overrides
}

/// Derives the options bag used when the server responds with a failure.
///
/// Shared keys propagate from the success bag; a `fail_`-prefixed key is
/// stripped and overrides its unprefixed twin. Layer-targeting and
/// focus/scroll keys never leak into the derived bag unless explicitly
/// fail-prefixed.
pub fn derive_fail_options(preprocessed: &OptionsBag) -> OptionsBag {
    let mut result = stored_defaults(preprocessed);
    for (key, value) in preprocessed {
        if is_shared_key(key) {
            result.insert(key.clone(), value.clone());
        }
    }
    merge_into(&mut result, &fail_overrides(preprocessed));
    result
}

/// Fails unless one of the recognized content-source keys is given, unless
/// the empty-content allowance is set, in which case content defaults to
/// the empty string.
pub fn assert_content_given(options: &mut OptionsBag) -> Result<()> {
    if CONTENT_KEYS
        .iter()
        .any(|key| is_given(options.get(*key)))
    {
        return Ok(());
    }
    if is_truthy(options.get("default_to_empty_content")) {
        options.insert("content".into(), json!(""));
        return Ok(());
    }
    Err(RenderError::failed(format!(
        "render needs one of {{ {} }}",
        CONTENT_KEYS.join(", ")
    )))
}
