//! The taint abstract domain: kinds, frames, taints, and access-path trees.
//!
//! The flow engine consumes this module through a small facade: lattice
//! operations (`bottom`/`join`/`is_bottom`), folds and partitions over
//! kinds, and tree reads/collapses. Everything is deterministic and
//! referentially transparent.

pub mod frame;
pub mod kind;
pub mod tree;

pub use frame::{CallInfo, ExtraTrace, Frame};
pub use kind::{PartialSink, SanitizeTransforms, SinkKind, SourceKind, TaintKind, TransformId};
pub use tree::{AccessPath, PathElement, Taint, TaintTree};

/// Taint reaching forward from sources.
pub type ForwardTaint = Taint<SourceKind>;
/// Taint reaching backward from sinks.
pub type BackwardTaint = Taint<SinkKind>;
/// Source taint refined by access path.
pub type ForwardTaintTree = TaintTree<SourceKind>;
/// Sink taint refined by access path.
pub type BackwardTaintTree = TaintTree<SinkKind>;
