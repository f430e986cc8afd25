//! Leaf payload of a taint tree path.
//!
//! A frame records everything the engine knows about one (call info, kind)
//! pair at a node: breadcrumb features, the shortest observed trace length,
//! extra traces attached by the multi-source protocol, and the issue
//! handles recorded for provisional multi-source issues.
//!
//! Join is the widening direction (union features, keep the shortest
//! trace); meet is the narrowing direction.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::issue::IssueHandle;
use crate::types::{Location, Target};

// =============================================================================
// Call info
// =============================================================================

/// Provenance of a taint entry: where on the trace this kind was observed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CallInfo {
    /// The kind is declared on the enclosing definition itself.
    Declaration,
    /// The kind originates at this location (a source read, a sink write).
    Origin(Location),
    /// The kind was propagated through a call to `callee` at `location`,
    /// entering through the named formal `port`.
    CallSite {
        callee: Target,
        port: String,
        location: Location,
    },
}

impl CallInfo {
    /// The location of the trace step, if it has one.
    pub fn location(&self) -> Option<&Location> {
        match self {
            CallInfo::Declaration => None,
            CallInfo::Origin(location) => Some(location),
            CallInfo::CallSite { location, .. } => Some(location),
        }
    }
}

/// A secondary trace attached to a frame, pointing at the first hop of a
/// related flow (the already-triggered half of a multi-source rule).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExtraTrace {
    /// First hop of the secondary trace.
    pub call_info: CallInfo,
    /// Rendered leaf kind at that hop, e.g. `source UserControlled`.
    pub leaf_kind: String,
    /// Optional human-readable note.
    pub message: Option<String>,
}

// =============================================================================
// Frame
// =============================================================================

/// Per-(call info, kind) payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Breadcrumb features accumulated along the trace.
    pub breadcrumbs: BTreeSet<String>,
    /// Length of the shortest trace that carried this kind here.
    pub trace_length: u32,
    /// Secondary traces (multi-source first hops).
    pub extra_traces: BTreeSet<ExtraTrace>,
    /// Handles of provisional issues this frame participates in.
    pub issue_handles: BTreeSet<IssueHandle>,
}

impl Frame {
    /// The initial frame: no features, zero-length trace.
    pub fn initial() -> Self {
        Self::default()
    }

    /// A frame carrying the given breadcrumb features.
    pub fn with_breadcrumbs<I: IntoIterator<Item = S>, S: Into<String>>(crumbs: I) -> Self {
        Self {
            breadcrumbs: crumbs.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add one breadcrumb in place.
    pub fn add_breadcrumb(&mut self, crumb: impl Into<String>) {
        self.breadcrumbs.insert(crumb.into());
    }

    /// Attach an extra trace in place.
    pub fn add_extra_trace(&mut self, trace: ExtraTrace) {
        self.extra_traces.insert(trace);
    }

    /// Widening combine: union features and secondary payloads, keep the
    /// shortest trace.
    pub fn join(&self, other: &Self) -> Self {
        Self {
            breadcrumbs: self.breadcrumbs.union(&other.breadcrumbs).cloned().collect(),
            trace_length: self.trace_length.min(other.trace_length),
            extra_traces: self
                .extra_traces
                .union(&other.extra_traces)
                .cloned()
                .collect(),
            issue_handles: self
                .issue_handles
                .union(&other.issue_handles)
                .cloned()
                .collect(),
        }
    }

    /// Narrowing combine: intersect features, keep the longest trace.
    pub fn meet(&self, other: &Self) -> Self {
        Self {
            breadcrumbs: self
                .breadcrumbs
                .intersection(&other.breadcrumbs)
                .cloned()
                .collect(),
            trace_length: self.trace_length.max(other.trace_length),
            extra_traces: self
                .extra_traces
                .intersection(&other.extra_traces)
                .cloned()
                .collect(),
            issue_handles: self
                .issue_handles
                .intersection(&other.issue_handles)
                .cloned()
                .collect(),
        }
    }
}
