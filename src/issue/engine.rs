//! Rule application: candidates in, issues out.
//!
//! Each flow of a candidate is partitioned by base kind name (subkinds and
//! transform chains collapse onto their base). A rule then selects the
//! partitions its source and sink lists name, runs the transform-split and
//! sanitizer refinement, and emits an issue when anything survives.
//!
//! Two grouping modes:
//!
//! - *merge access paths* (default): per rule, the surviving sub-flows of
//!   all access paths join into one flow, and issues group per handle;
//!   at most one issue per handle leaves this module.
//! - *lineage analysis*: one issue per access path, handles may repeat.

use std::collections::BTreeMap;

use tracing::debug;

use super::{Issue, IssueHandle};
use crate::config::{Rule, TaintConfig};
use crate::flow::transform::apply_transform_splits;
use crate::flow::{Candidate, Candidates, Flow};
use crate::taint::{BackwardTaint, ForwardTaint, TaintKind};
use crate::types::Target;

/// A flow split by base kind name on both sides.
struct PartitionedFlow {
    source_partition: BTreeMap<String, ForwardTaint>,
    sink_partition: BTreeMap<String, BackwardTaint>,
}

impl PartitionedFlow {
    fn new(flow: &Flow) -> Self {
        Self {
            source_partition: flow
                .source_taint
                .partition(|kind| kind.base_name().map(str::to_string)),
            sink_partition: flow
                .sink_taint
                .partition(|kind| kind.base_name().map(str::to_string)),
        }
    }

    /// Restrict to the kinds a rule names, or bottom when a side is empty.
    fn select(&self, rule: &Rule) -> Flow {
        let source_taint = rule
            .sources
            .iter()
            .filter_map(|name| self.source_partition.get(name))
            .fold(ForwardTaint::bottom(), |acc, taint| acc.join(taint));
        let sink_taint = rule
            .sinks
            .iter()
            .filter_map(|name| self.sink_partition.get(name))
            .fold(BackwardTaint::bottom(), |acc, taint| acc.join(taint));
        Flow {
            source_taint,
            sink_taint,
        }
    }
}

/// Apply one rule to one flow.
fn apply_rule(rule: &Rule, flow: &Flow) -> Flow {
    let selected = PartitionedFlow::new(flow).select(rule);
    if selected.is_bottom() {
        return Flow::bottom();
    }
    apply_transform_splits(rule, &selected)
}

fn issue_for(rule: &Rule, candidate: &Candidate, flow: Flow, define: &Target) -> Issue {
    Issue {
        flow,
        handle: IssueHandle {
            code: rule.code,
            callable: define.clone(),
            sink: candidate.key.sink_handle.clone(),
        },
        locations: [candidate.key.location.clone()].into(),
        define: define.clone(),
    }
}

/// Convert the candidate table into concrete issues by applying every
/// rule's pipeline, in configuration order.
pub fn generate_issues(candidates: &Candidates, config: &TaintConfig, define: &Target) -> Vec<Issue> {
    let mut ungrouped: Vec<Issue> = Vec::new();
    for candidate in candidates.iter() {
        for rule in &config.rules {
            if config.lineage_analysis {
                // One issue per access path.
                for flow in &candidate.flows {
                    let refined = apply_rule(rule, flow);
                    if !refined.is_bottom() {
                        ungrouped.push(issue_for(rule, candidate, refined, define));
                    }
                }
            } else {
                // Join every access path's surviving sub-flow first.
                let joined = candidate
                    .flows
                    .iter()
                    .map(|flow| apply_rule(rule, flow))
                    .filter(|refined| !refined.is_bottom())
                    .fold(Flow::bottom(), |acc, refined| acc.join(&refined));
                if !joined.is_bottom() {
                    ungrouped.push(issue_for(rule, candidate, joined, define));
                }
            }
        }
    }

    debug!(
        define = %define,
        candidates = candidates.len(),
        issues = ungrouped.len(),
        "generated issues"
    );

    if config.lineage_analysis {
        return ungrouped;
    }

    // Equal handles join: multi-source rules and repeated locations for
    // one sink handle would otherwise duplicate.
    let mut grouped: BTreeMap<IssueHandle, Issue> = BTreeMap::new();
    for issue in ungrouped {
        match grouped.get_mut(&issue.handle) {
            Some(existing) => *existing = existing.join(&issue),
            None => {
                grouped.insert(issue.handle.clone(), issue);
            }
        }
    }
    grouped.into_values().collect()
}
