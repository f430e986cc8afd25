//! Named-transform split enumeration.
//!
//! A rule's transform list `[t1, ..., tn]` describes the chain the data
//! must pass through between source and sink. At a given site part of the
//! chain has already happened on the source trace and the rest is still
//! ahead on the sink trace, so the rule matches iff *some* split
//! `(prefix, suffix)` finds source taint carrying exactly `prefix` and
//! sink taint expecting exactly `suffix`.

use super::sanitize::apply_sanitizers;
use super::Flow;
use crate::config::Rule;
use crate::taint::TaintKind;

/// Apply a rule's transform splits to a flow already restricted to the
/// rule's source and sink kinds. Each valid split is refined by the
/// sanitizer fixpoint; the results join, starting from bottom.
pub fn apply_transform_splits(rule: &Rule, flow: &Flow) -> Flow {
    let source_parts = flow
        .source_taint
        .partition(|kind| Some(kind.named_transforms().to_vec()));
    let sink_parts = flow
        .sink_taint
        .partition(|kind| Some(kind.named_transforms().to_vec()));

    let mut acc = Flow::bottom();
    for (source_side, sink_side) in rule.transform_splits() {
        let (Some(source_taint), Some(sink_taint)) =
            (source_parts.get(source_side), sink_parts.get(sink_side))
        else {
            continue;
        };
        let refined = apply_sanitizers(&Flow {
            source_taint: source_taint.clone(),
            sink_taint: sink_taint.clone(),
        });
        if !refined.is_bottom() {
            acc = acc.join(&refined);
        }
    }
    acc
}
