//! Source-map merging for the build-system bridge.
//!
//! The bridge hands the engine one artifact→target map per build target.
//! Merging is first-writer-wins with explicit conflict attribution: when
//! two maps assign the same artifact to different targets, the later
//! assignment is dropped, the conflict is reported, and analysis
//! continues on the remainder. Callers sort inputs by target before
//! merging so the surviving assignment is the same regardless of
//! insertion order.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::TaintError;
use crate::types::Target;

/// Artifact path → producing target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildMap {
    entries: BTreeMap<String, Target>,
}

impl BuildMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Target)>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(artifact, target)| (artifact.into(), target))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, artifact: &str) -> Option<&Target> {
        self.entries.get(artifact)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Target)> {
        self.entries.iter()
    }
}

/// Merge per-target build maps into one source map.
///
/// Inputs are `(target, map)` pairs; they are sorted by target first so
/// conflict resolution is deterministic. Each conflict surfaces as an
/// [`TaintError::IncompatibleMergeItem`] attributing both targets; the
/// second assignment is dropped.
pub fn merge_build_maps(inputs: Vec<(Target, BuildMap)>) -> (BuildMap, Vec<TaintError>) {
    let mut inputs = inputs;
    inputs.sort_by(|(left, _), (right, _)| left.cmp(right));

    let mut merged = BuildMap::new();
    let mut owners: BTreeMap<String, Target> = BTreeMap::new();
    let mut conflicts = Vec::new();

    for (target, map) in inputs {
        for (artifact, produced) in map.entries {
            match owners.get(&artifact) {
                None => {
                    owners.insert(artifact.clone(), target.clone());
                    merged.entries.insert(artifact, produced);
                }
                Some(owner) => {
                    let existing = merged
                        .entries
                        .get(&artifact)
                        .expect("owned artifacts have an entry");
                    if existing != &produced {
                        warn!(
                            artifact = %artifact,
                            kept = %owner,
                            dropped = %target,
                            "conflicting build-map assignment dropped"
                        );
                        conflicts.push(TaintError::IncompatibleMergeItem {
                            key: artifact.clone(),
                            left: existing.to_string(),
                            right: produced.to_string(),
                        });
                    }
                }
            }
        }
    }
    (merged, conflicts)
}
