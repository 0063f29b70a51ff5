use crate::dom::{Document, ElementId};
use crate::error::Result;
use crate::layer::LayerId;

/// One pending request the transport is tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: String,
    pub layer: LayerId,
}

/// Outbound-request bookkeeping. When a layer closes, every pending
/// request targeting it must be aborted before any close event fires, so
/// no handler can race a response that is about to be discarded.
pub trait Transport: Send {
    fn abort_matching(&mut self, predicate: &dyn Fn(&RequestDescriptor) -> bool);
}

/// Transport with no pending requests.
#[derive(Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn abort_matching(&mut self, _predicate: &dyn Fn(&RequestDescriptor) -> bool) {}
}

/// User-facing confirmation prompt shown before destructive operations
/// that carry a `confirm` option.
pub trait ConfirmGate: Send {
    fn confirm(&mut self, message: &str) -> bool;
}

/// Gate that confirms everything. The default for headless use.
#[derive(Default)]
pub struct AlwaysConfirm;

impl ConfirmGate for AlwaysConfirm {
    fn confirm(&mut self, _message: &str) -> bool {
        true
    }
}

/// Viewport scrolling. `reveal` may fail with an aborted error when the
/// user interrupts the scroll; the pipeline treats that as a quiet exit.
pub trait ScrollAdapter: Send {
    fn reveal(&mut self, doc: &Document, element: ElementId) -> Result<()>;
}

#[derive(Default)]
pub struct NullScroll;

impl ScrollAdapter for NullScroll {
    fn reveal(&mut self, _doc: &Document, _element: ElementId) -> Result<()> {
        Ok(())
    }
}
