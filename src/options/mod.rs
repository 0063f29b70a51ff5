//! Render-option resolution.
//!
//! `core` holds the bag transformations (`preprocess`, `finalize`,
//! `derive_fail_options`, `assert_content_given`); `config` holds the
//! engine-level [`RenderConfig`].

mod config;
mod core;

pub use config::{RenderConfig, RewriteHook};
pub use core::{
    CONTENT_KEYS, LATE_KEYS, OptionsBag, PREFLIGHT_KEYS, assert_content_given,
    derive_fail_options, finalize, global_defaults, is_given, is_shared_key, is_truthy, preprocess,
};
