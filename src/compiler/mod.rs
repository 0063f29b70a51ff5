//! Compiler module orchestrator.
//!
//! `registry` holds compiler registration and the per-element side tables
//! (applied-compiler sets and destructor lists, keyed by element identity
//! instead of living on the elements themselves); `pass` applies the
//! registered compilers to a subtree.

mod pass;
mod registry;

pub use pass::{CompilerPass, PassOutcome};
pub use registry::{
    AppliedCompilers, CompilerId, CompilerOutcome, CompilerRegistry, CompilerSpec,
    DestructorRegistry,
};
