//! Source→sink flow matching.
//!
//! At each call site the host hands the engine the forward taint tree of
//! the argument (reachable sources) and the backward taint tree of the
//! parameter (reached sinks). Matching walks the *sink* tree's taint-bearing
//! paths and reads the matching source subtree at each one: the source tree
//! is upward-closed while the sink tree enumerates downward paths, so this
//! yields the minimal deduplicated flow set without a quadratic
//! cross-product.
//!
//! Matched flows accumulate in a per-definition [`Candidates`] table keyed
//! by `(location, sink handle)`; issue generation consumes the table when
//! the definition's analysis completes.

pub mod sanitize;
pub mod transform;
pub mod triggered;

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::TaintConfig;
use crate::issue::SinkHandle;
use crate::taint::{BackwardTaint, BackwardTaintTree, ForwardTaint, ForwardTaintTree};
use crate::types::Location;

// =============================================================================
// Flows
// =============================================================================

/// One potential data-leak path at a site: paired source and sink taint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flow {
    pub source_taint: ForwardTaint,
    pub sink_taint: BackwardTaint,
}

impl Flow {
    pub fn bottom() -> Self {
        Self::default()
    }

    /// A flow is bottom as soon as either side is.
    pub fn is_bottom(&self) -> bool {
        self.source_taint.is_bottom() || self.sink_taint.is_bottom()
    }

    /// Pointwise join.
    pub fn join(&self, other: &Self) -> Self {
        Self {
            source_taint: self.source_taint.join(&other.source_taint),
            sink_taint: self.sink_taint.join(&other.sink_taint),
        }
    }
}

// =============================================================================
// Candidates
// =============================================================================

/// Key of the candidate table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CandidateKey {
    pub location: Location,
    pub sink_handle: SinkHandle,
}

/// All flows observed at one `(location, sink handle)`.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub flows: Vec<Flow>,
    pub key: CandidateKey,
}

impl Candidate {
    /// Join concatenates flow lists; the key is shared by construction.
    pub fn join(&mut self, other: Candidate) {
        debug_assert_eq!(self.key, other.key);
        self.flows.extend(other.flows);
    }
}

/// Per-definition accumulator of candidates, owned by the definition's
/// forward analysis and consumed at issue generation. Iteration is in key
/// order so issue output is deterministic.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    table: BTreeMap<CandidateKey, Candidate>,
}

impl Candidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Add a candidate, joining with any existing entry under its key.
    pub fn add(&mut self, candidate: Candidate) {
        if candidate.flows.is_empty() {
            return;
        }
        match self.table.get_mut(&candidate.key) {
            Some(existing) => existing.join(candidate),
            None => {
                self.table.insert(candidate.key.clone(), candidate);
            }
        }
    }

    /// Iterate candidates in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.table.values()
    }
}

// =============================================================================
// Matching
// =============================================================================

/// Pair a source tree with a sink tree into a candidate.
///
/// For every taint-bearing path in `sink_tree`, the matching source is the
/// collapse of the source subtree at that path (prefix taint included,
/// widening breadcrumbs from the configuration applied). Paths whose
/// matching source collapses to bottom produce no flow.
pub fn match_flows(
    config: &TaintConfig,
    location: &Location,
    sink_handle: &SinkHandle,
    source_tree: &ForwardTaintTree,
    sink_tree: &BackwardTaintTree,
) -> Candidate {
    let key = CandidateKey {
        location: location.clone(),
        sink_handle: sink_handle.clone(),
    };
    if source_tree.is_empty() {
        return Candidate {
            flows: Vec::new(),
            key,
        };
    }

    let flows = sink_tree.fold_paths(Vec::new(), |mut acc, path, sink_taint| {
        let source_taint = source_tree.read(path).collapse(&config.widen_breadcrumbs);
        if !source_taint.is_bottom() {
            acc.push(Flow {
                source_taint,
                sink_taint: sink_taint.clone(),
            });
        }
        acc
    });
    Candidate { flows, key }
}

/// Match and append to the candidate table. The public entry point the
/// host calls once per analysis unit.
pub fn check_flow(
    candidates: &mut Candidates,
    config: &TaintConfig,
    location: &Location,
    sink_handle: &SinkHandle,
    source_tree: &ForwardTaintTree,
    sink_tree: &BackwardTaintTree,
) {
    let candidate = match_flows(config, location, sink_handle, source_tree, sink_tree);
    if !candidate.flows.is_empty() {
        debug!(
            location = %location,
            sink_handle = %sink_handle,
            flows = candidate.flows.len(),
            "matched flows"
        );
        candidates.add(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taint::{
        AccessPath, CallInfo, Frame, SinkKind, SourceKind, Taint, TaintTree,
    };
    use crate::types::Target;

    fn location() -> Location {
        Location::new("app.py", 12, 4, 20)
    }

    fn sink_handle() -> SinkHandle {
        SinkHandle::Call {
            callee: Target::new("db.execute"),
            index: 0,
            parameter: "query".to_string(),
        }
    }

    fn source_tree_at(path: &AccessPath) -> ForwardTaintTree {
        TaintTree::create_leaf(
            path,
            Taint::singleton(
                CallInfo::Origin(location()),
                SourceKind::named("UserControlled"),
                Frame::initial(),
            ),
        )
    }

    fn sink_tree_at(path: &AccessPath) -> BackwardTaintTree {
        TaintTree::create_leaf(
            path,
            Taint::singleton(
                CallInfo::Origin(location()),
                SinkKind::named("Sql"),
                Frame::initial(),
            ),
        )
    }

    #[test]
    fn test_empty_source_tree_yields_no_flows() {
        let candidate = match_flows(
            &TaintConfig::default(),
            &location(),
            &sink_handle(),
            &TaintTree::bottom(),
            &sink_tree_at(&AccessPath::root()),
        );
        assert!(candidate.flows.is_empty());
    }

    #[test]
    fn test_matching_at_root_produces_one_flow() {
        let candidate = match_flows(
            &TaintConfig::default(),
            &location(),
            &sink_handle(),
            &source_tree_at(&AccessPath::root()),
            &sink_tree_at(&AccessPath::root()),
        );
        assert_eq!(candidate.flows.len(), 1);
        assert!(!candidate.flows[0].is_bottom());
    }

    #[test]
    fn test_one_flow_per_sink_path() {
        // Source at the root is upward-closed: it matches both sink paths.
        let source = source_tree_at(&AccessPath::root());
        let sink = sink_tree_at(&AccessPath::field("a")).join(&sink_tree_at(&AccessPath::field("b")));
        let candidate = match_flows(
            &TaintConfig::default(),
            &location(),
            &sink_handle(),
            &source,
            &sink,
        );
        assert_eq!(candidate.flows.len(), 2);
    }

    #[test]
    fn test_unmatched_sink_path_produces_no_flow() {
        let source = source_tree_at(&AccessPath::field("a"));
        let sink = sink_tree_at(&AccessPath::field("b"));
        let candidate = match_flows(
            &TaintConfig::default(),
            &location(),
            &sink_handle(),
            &source,
            &sink,
        );
        assert!(candidate.flows.is_empty());
    }

    #[test]
    fn test_candidate_add_commutes_up_to_flow_order() {
        let config = TaintConfig::default();
        let candidate_at = |path: &AccessPath| {
            match_flows(
                &config,
                &location(),
                &sink_handle(),
                &source_tree_at(&AccessPath::root()),
                &sink_tree_at(path),
            )
        };
        let first = candidate_at(&AccessPath::field("a"));
        let second = candidate_at(&AccessPath::field("b"));

        let mut forward = Candidates::new();
        forward.add(first.clone());
        forward.add(second.clone());
        let mut backward = Candidates::new();
        backward.add(second);
        backward.add(first);

        let flows_of = |candidates: &Candidates| {
            candidates
                .iter()
                .flat_map(|candidate| candidate.flows.iter().cloned())
                .collect::<Vec<_>>()
        };
        let mut left = flows_of(&forward);
        let mut right = flows_of(&backward);
        assert_eq!(left.len(), right.len());
        // Same flow multiset once ordered by sink path contents.
        left.sort_by_key(|flow| format!("{flow:?}"));
        right.sort_by_key(|flow| format!("{flow:?}"));
        assert_eq!(left, right);
    }
}
