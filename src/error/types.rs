use thiserror::Error;

use crate::dom::ElementId;

/// Unified result type for the render pipeline.
pub type Result<T> = std::result::Result<T, RenderError>;

/// One failed compiler invocation, recorded during a [`CompilerPass`] and
/// reported in aggregate once the pass has visited every element.
///
/// [`CompilerPass`]: crate::compiler::CompilerPass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub selector: String,
    pub element: ElementId,
    pub message: String,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "compiler `{}` failed on {:?}: {}",
            self.selector, self.element, self.message
        )
    }
}

/// Errors surfaced by the render pipeline.
///
/// `Aborted` is a normal early-exit signal (layer closed mid-operation,
/// user declined a confirmation, interrupted scroll) and is never logged
/// as an error. `Failed` is a fatal usage or assertion violation and
/// always propagates to the render caller.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("operation aborted: {0}")]
    Aborted(String),
    #[error("operation failed: {0}")]
    Failed(String),
    #[error("{} compiler error(s) during pass", errors.len())]
    CannotCompile { errors: Vec<CompileError> },
}

impl RenderError {
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted(reason.into())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// True for intentional cancellations that callers should treat as a
    /// quiet early exit rather than a failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_is_distinguishable() {
        assert!(RenderError::aborted("layer was closed").is_aborted());
        assert!(!RenderError::failed("cannot close the root layer").is_aborted());
    }

    #[test]
    fn compile_error_aggregate_reports_count() {
        let err = RenderError::CannotCompile {
            errors: vec![CompileError {
                selector: ".widget".into(),
                element: ElementId(3),
                message: "boom".into(),
            }],
        };
        assert_eq!(err.to_string(), "1 compiler error(s) during pass");
    }
}
