//! Multi-source (combined) rule protocol.
//!
//! A partial sink declares one labeled half of a two-source meeting point.
//! When a source reaches the half it matches, the engine remembers the
//! *complementary* half as a triggered sink: the flow becomes an issue only
//! once the other label's source shows up too.
//!
//! State machine for a partial sink at a call:
//!
//! - *Declared* → source arrives, complement absent → *Half-triggered*:
//!   a provisional issue is recorded and its handles stored on the entry.
//! - *Half-triggered* → complement arrives → *Fully-triggered*: both
//!   halves' candidates enter the candidate table and the handle sets
//!   cross-reference each other.
//!
//! The per-call map is exclusively owned by one call site's analysis and
//! consumed when the call returns: its entries transfer into the
//! per-definition location map, which the host joins into the definition's
//! backward result so callers observe the propagated triggered sink.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::{match_flows, Candidate, Candidates};
use crate::config::TaintConfig;
use crate::issue::engine::generate_issues;
use crate::issue::{IssueHandle, SinkHandle};
use crate::taint::{
    AccessPath, BackwardTaint, BackwardTaintTree, CallInfo, ExtraTrace, ForwardTaintTree, Frame,
    PartialSink, SinkKind, Taint, TaintTree,
};
use crate::types::{Location, Target};

// =============================================================================
// Triggered-sink state
// =============================================================================

/// One remembered half of a multi-source flow.
#[derive(Debug, Clone)]
pub struct TriggeredSink {
    /// The complementary half the flow still waits for.
    pub sink: PartialSink,
    /// Flows matched for the half that already fired.
    pub candidate: Candidate,
    /// Handles of the provisional issues recorded for this half. Once the
    /// complement fires, both halves' sets reference both issues.
    pub multi_source_issue_handles: BTreeSet<IssueHandle>,
    /// Backward taint to propagate to callers.
    pub taint: BackwardTaint,
}

/// Per-call map of triggered sinks, keyed by the triggered kind's rendered
/// form (e.g. `TriggeredPartialSink[UC_and_VC[vc]]`).
#[derive(Debug, Clone, Default)]
pub struct TriggeredSinkMap {
    entries: BTreeMap<String, TriggeredSink>,
}

impl TriggeredSinkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&TriggeredSink> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TriggeredSink)> {
        self.entries.iter()
    }

    fn insert_or_join(&mut self, key: String, entry: TriggeredSink) {
        match self.entries.get_mut(&key) {
            Some(existing) => {
                existing.candidate.join(entry.candidate);
                existing
                    .multi_source_issue_handles
                    .extend(entry.multi_source_issue_handles);
                existing.taint = existing.taint.join(&entry.taint);
            }
            None => {
                self.entries.insert(key, entry);
            }
        }
    }

    fn cross_reference(&mut self, left: &str, right: &str) {
        let left_handles = self
            .entries
            .get(left)
            .map(|entry| entry.multi_source_issue_handles.clone())
            .unwrap_or_default();
        let right_handles = self
            .entries
            .get(right)
            .map(|entry| entry.multi_source_issue_handles.clone())
            .unwrap_or_default();
        if let Some(entry) = self.entries.get_mut(left) {
            entry.multi_source_issue_handles.extend(right_handles);
        }
        if let Some(entry) = self.entries.get_mut(right) {
            entry.multi_source_issue_handles.extend(left_handles);
        }
    }
}

/// Per-definition map from call location to the backward state carrying
/// the triggered sinks observed there.
#[derive(Debug, Clone, Default)]
pub struct TriggeredSinkLocations {
    map: BTreeMap<Location, BackwardTaintTree>,
}

impl TriggeredSinkLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, location: &Location) -> Option<&BackwardTaintTree> {
        self.map.get(location)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Location, &BackwardTaintTree)> {
        self.map.iter()
    }

    fn join_at(&mut self, location: Location, tree: BackwardTaintTree) {
        self.map
            .entry(location)
            .and_modify(|existing| *existing = existing.join(&tree))
            .or_insert(tree);
    }
}

// =============================================================================
// Protocol
// =============================================================================

fn partial_sinks_of(sink_tree: &BackwardTaintTree) -> BTreeSet<PartialSink> {
    sink_tree.fold_paths(BTreeSet::new(), |mut acc, _, taint| {
        for kind in taint.kinds() {
            if let SinkKind::Partial(partial) = kind {
                acc.insert(partial);
            }
        }
        acc
    })
}

/// Scan a call's sink tree for partial sinks, trigger the halves whose
/// sources are present, and promote pairs whose complements are both known.
/// Also appends regular matched flows for fully-triggered halves to the
/// candidate table.
#[allow(clippy::too_many_arguments)]
pub fn check_triggered_flows(
    candidates: &mut Candidates,
    triggered: &mut TriggeredSinkMap,
    config: &TaintConfig,
    define: &Target,
    location: &Location,
    sink_handle: &SinkHandle,
    source_tree: &ForwardTaintTree,
    sink_tree: &BackwardTaintTree,
) {
    let partials = partial_sinks_of(sink_tree);
    if partials.is_empty() {
        return;
    }
    let sources = source_tree.collapse(&config.widen_breadcrumbs);

    for partial in &partials {
        for (call_info, source, _) in sources.iter() {
            let Some(triggered_kind) = config.get_triggered_sink(partial, source) else {
                continue;
            };

            // Synthetic sink tree: the seen half, triggered, at this call.
            let synthetic = TaintTree::create_leaf(
                &AccessPath::root(),
                Taint::singleton(
                    CallInfo::Origin(location.clone()),
                    SinkKind::Triggered(partial.clone()),
                    Frame::initial(),
                ),
            );
            let candidate = match_flows(config, location, sink_handle, source_tree, &synthetic);
            if candidate.flows.is_empty() {
                continue;
            }

            // Provisional issues for this half; their handles ride along
            // with the triggered entry.
            let provisional = {
                let mut table = Candidates::new();
                table.add(candidate.clone());
                generate_issues(&table, config, define)
            };
            let handles: BTreeSet<IssueHandle> = provisional
                .into_iter()
                .map(|issue| issue.handle)
                .collect();

            let mut frame = Frame::initial();
            frame.issue_handles = handles.clone();
            frame.add_extra_trace(ExtraTrace {
                call_info: call_info.clone(),
                leaf_kind: format!("source {source}"),
                message: None,
            });
            let entry = TriggeredSink {
                sink: match &triggered_kind {
                    SinkKind::Triggered(complement) => complement.clone(),
                    _ => unreachable!("get_triggered_sink only returns triggered kinds"),
                },
                candidate: candidate.clone(),
                multi_source_issue_handles: handles,
                taint: Taint::singleton(
                    CallInfo::Origin(location.clone()),
                    triggered_kind.clone(),
                    frame,
                ),
            };
            let key = triggered_kind.to_string();
            debug!(key = %key, location = %location, "triggered partial sink half");
            triggered.insert_or_join(key.clone(), entry);

            // The complement entry exists when the other label already saw
            // its source: both halves are now known.
            let complement_key = SinkKind::Triggered(partial.clone()).to_string();
            if triggered.get(&complement_key).is_some() {
                triggered.cross_reference(&key, &complement_key);
                candidates.add(candidate);
                if let Some(other) = triggered.get(&complement_key) {
                    candidates.add(other.candidate.clone());
                }
                debug!(key = %complement_key, "promoted multi-source pair");
            }
        }
    }
}

/// Consume a call's triggered map into the definition-level location map.
/// The host joins the resulting backward state into the definition's
/// backward result, propagating the triggered sinks to callers.
pub fn commit_triggered_sinks(
    triggered: TriggeredSinkMap,
    location: &Location,
    locations: &mut TriggeredSinkLocations,
) {
    if triggered.is_empty() {
        return;
    }
    let mut taint = BackwardTaint::bottom();
    for (_, entry) in triggered.iter() {
        taint = taint.join(&entry.taint);
    }
    locations.join_at(
        location.clone(),
        TaintTree::create_leaf(&AccessPath::root(), taint),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MultiSourceGroup, PartialLabel, Rule};
    use crate::taint::SourceKind;

    fn multi_source_config() -> TaintConfig {
        TaintConfig {
            rules: vec![Rule {
                code: 4,
                sources: vec!["UserControlled".to_string(), "PermissiveContext".to_string()],
                sinks: vec!["UC_and_VC".to_string()],
                transforms: Vec::new(),
                name: "combined".to_string(),
                message_format: "{$sources} meet at {$sinks}".to_string(),
                expected_models: Vec::new(),
                unexpected_models: Vec::new(),
            }],
            multi_source_groups: vec![MultiSourceGroup {
                name: "UC_and_VC".to_string(),
                first: PartialLabel {
                    label: "uc".to_string(),
                    sources: vec!["UserControlled".to_string()],
                },
                second: PartialLabel {
                    label: "vc".to_string(),
                    sources: vec!["PermissiveContext".to_string()],
                },
            }],
            ..TaintConfig::default()
        }
    }

    fn location(line: u32) -> Location {
        Location::new("app.py", line, 0, 10)
    }

    fn sink_handle(parameter: &str) -> SinkHandle {
        SinkHandle::Call {
            callee: Target::new("render"),
            index: 0,
            parameter: parameter.to_string(),
        }
    }

    fn source_tree(kind: &str, line: u32) -> ForwardTaintTree {
        TaintTree::create_leaf(
            &AccessPath::root(),
            Taint::singleton(
                CallInfo::Origin(location(line)),
                SourceKind::named(kind),
                Frame::initial(),
            ),
        )
    }

    fn partial_sink_tree(label: &str, line: u32) -> BackwardTaintTree {
        TaintTree::create_leaf(
            &AccessPath::root(),
            Taint::singleton(
                CallInfo::Origin(location(line)),
                SinkKind::partial("UC_and_VC", label),
                Frame::initial(),
            ),
        )
    }

    #[test]
    fn test_half_trigger_records_complement_entry() {
        let config = multi_source_config();
        let mut candidates = Candidates::new();
        let mut triggered = TriggeredSinkMap::new();

        check_triggered_flows(
            &mut candidates,
            &mut triggered,
            &config,
            &Target::new("app.render"),
            &location(5),
            &sink_handle("data"),
            &source_tree("UserControlled", 1),
            &partial_sink_tree("uc", 5),
        );

        let entry = triggered
            .get("TriggeredPartialSink[UC_and_VC[vc]]")
            .expect("the vc complement is remembered");
        assert_eq!(entry.sink.label, "vc");
        assert!(!entry.multi_source_issue_handles.is_empty());
        // Only half-triggered: nothing in the candidate table yet.
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_both_halves_promote_candidates() {
        let config = multi_source_config();
        let mut candidates = Candidates::new();
        let mut triggered = TriggeredSinkMap::new();
        let define = Target::new("app.render");

        check_triggered_flows(
            &mut candidates,
            &mut triggered,
            &config,
            &define,
            &location(5),
            &sink_handle("data"),
            &source_tree("UserControlled", 1),
            &partial_sink_tree("uc", 5),
        );
        check_triggered_flows(
            &mut candidates,
            &mut triggered,
            &config,
            &define,
            &location(8),
            &sink_handle("context"),
            &source_tree("PermissiveContext", 2),
            &partial_sink_tree("vc", 8),
        );

        // Both halves' candidates are in the table now.
        assert_eq!(candidates.len(), 2);

        // Handle sets cross-reference both provisional issues.
        let uc_entry = triggered.get("TriggeredPartialSink[UC_and_VC[vc]]").unwrap();
        let vc_entry = triggered.get("TriggeredPartialSink[UC_and_VC[uc]]").unwrap();
        assert_eq!(
            uc_entry.multi_source_issue_handles,
            vc_entry.multi_source_issue_handles
        );
        assert_eq!(uc_entry.multi_source_issue_handles.len(), 2);

        // Issues generate for both sink handles.
        let issues = generate_issues(&candidates, &config, &define);
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|issue| issue.handle.code == 4));
    }

    #[test]
    fn test_commit_transfers_taint_to_location_map() {
        let config = multi_source_config();
        let mut candidates = Candidates::new();
        let mut triggered = TriggeredSinkMap::new();

        check_triggered_flows(
            &mut candidates,
            &mut triggered,
            &config,
            &Target::new("app.render"),
            &location(5),
            &sink_handle("data"),
            &source_tree("UserControlled", 1),
            &partial_sink_tree("uc", 5),
        );

        let mut locations = TriggeredSinkLocations::new();
        commit_triggered_sinks(triggered, &location(5), &mut locations);
        let tree = locations.get(&location(5)).expect("state joined at call");
        let kinds = tree.collapse(&[]).kinds();
        assert_eq!(kinds.len(), 1);
        assert_eq!(
            kinds[0].to_string(),
            "TriggeredPartialSink[UC_and_VC[vc]]"
        );
    }

    #[test]
    fn test_unmatched_source_does_not_trigger() {
        let config = multi_source_config();
        let mut candidates = Candidates::new();
        let mut triggered = TriggeredSinkMap::new();

        check_triggered_flows(
            &mut candidates,
            &mut triggered,
            &config,
            &Target::new("app.render"),
            &location(5),
            &sink_handle("data"),
            &source_tree("Benign", 1),
            &partial_sink_tree("uc", 5),
        );
        assert!(triggered.is_empty());
        assert!(candidates.is_empty());
    }
}
