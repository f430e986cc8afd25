//! Sanitizer fixpoint over a flow.
//!
//! Source kinds carry the sink sanitizers applied along their trace, and
//! sink kinds carry the source sanitizers. Each side therefore restricts
//! the other, and shrinking one side can expose new restrictions on the
//! opposite side, so refinement iterates.
//!
//! Each iteration computes four quantities from the current flow:
//!
//! 1. `sanitized_sinks`: intersection of every source kind's sanitized
//!    sink set; those sink kinds are unreachable from *all* sources.
//! 2. `sanitized_sources`: the symmetric intersection over sink kinds.
//! 3. `single_base_source`: when every source kind shares one plain named
//!    base, sink kinds carrying a sanitizer for that base are unreachable.
//! 4. `single_base_sink`: the symmetric condition on sources.
//!
//! Kinds contributing an empty sanitizer set are skipped in the
//! intersections: an absent sanitizer constrains nothing, so the
//! accumulator starts at `None` (top) and only a missing value reads out
//! as the empty set. The loop stops once all four quantities repeat.
//! Every step only removes kinds, so the state is monotonically shrinking
//! on a finite lattice and the fixpoint is reached in at most O(|kinds|)
//! iterations.

use std::collections::BTreeSet;

use super::Flow;
use crate::taint::{Taint, TaintKind};

/// The four-component refinement state compared across iterations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct SanitizeState {
    sanitized_sources: Option<BTreeSet<String>>,
    sanitized_sinks: Option<BTreeSet<String>>,
    single_base_source: Option<String>,
    single_base_sink: Option<String>,
}

/// Intersection of non-empty extracted sanitizer sets across all kinds.
fn intersect_extracted<K: TaintKind, F: Fn(&K) -> &BTreeSet<String>>(
    taint: &Taint<K>,
    extract: F,
) -> Option<BTreeSet<String>> {
    taint.fold(None, |acc: Option<BTreeSet<String>>, _, kind, _| {
        let set = extract(kind);
        if set.is_empty() {
            return acc;
        }
        Some(match acc {
            None => set.clone(),
            Some(previous) => previous.intersection(set).cloned().collect(),
        })
    })
}

/// The unique plain named base shared by every kind, if any.
fn single_named_base<K: TaintKind>(taint: &Taint<K>) -> Option<String> {
    let mut base: Option<String> = None;
    for kind in taint.kinds() {
        let name = kind.named_base()?.to_string();
        match &base {
            None => base = Some(name),
            Some(existing) if *existing == name => {}
            Some(_) => return None,
        }
    }
    base
}

fn compute_state(flow: &Flow) -> SanitizeState {
    SanitizeState {
        sanitized_sources: intersect_extracted(&flow.sink_taint, |kind| {
            &kind.extract_sanitize_transforms().sources
        }),
        sanitized_sinks: intersect_extracted(&flow.source_taint, |kind| {
            &kind.extract_sanitize_transforms().sinks
        }),
        single_base_source: single_named_base(&flow.source_taint),
        single_base_sink: single_named_base(&flow.sink_taint),
    }
}

fn apply_state(flow: &Flow, state: &SanitizeState) -> Flow {
    let empty = BTreeSet::new();
    let sanitized_sinks = state.sanitized_sinks.as_ref().unwrap_or(&empty);
    let sanitized_sources = state.sanitized_sources.as_ref().unwrap_or(&empty);

    let mut sink_taint = flow.sink_taint.sanitize_taint_kinds(sanitized_sinks);
    let mut source_taint = flow.source_taint.sanitize_taint_kinds(sanitized_sources);

    if let Some(source_base) = &state.single_base_source {
        // Sink kinds carrying a sanitizer for the only possible source
        // cannot receive this flow.
        sink_taint = sink_taint.transform_kinds(|kind| {
            (!kind
                .extract_sanitize_transforms()
                .sources
                .contains(source_base))
            .then(|| kind.clone())
        });
    }
    if let Some(sink_base) = &state.single_base_sink {
        source_taint = source_taint.transform_kinds(|kind| {
            (!kind
                .extract_sanitize_transforms()
                .sinks
                .contains(sink_base))
            .then(|| kind.clone())
        });
    }
    Flow {
        source_taint,
        sink_taint,
    }
}

/// Refine a flow's two sides against each other until stable.
pub fn apply_sanitizers(flow: &Flow) -> Flow {
    let mut current = flow.clone();
    let mut previous = SanitizeState::default();
    loop {
        let state = compute_state(&current);
        if state == previous {
            return current;
        }
        current = apply_state(&current, &state);
        previous = state;
    }
}
