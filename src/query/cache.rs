//! Inter-query read/write cache.
//!
//! Write-to-cache queries index targets under `(kind, name)` buckets in
//! phase one; read-from-cache queries then derive their candidate target
//! sets from the frozen cache in phase two. The candidate set is a lattice
//! `Top | Set`: `Top` means "no restriction derived", which is legal
//! inside a constraint tree (under `Not`, say) but a configuration error
//! at the top level of a read query.

use std::collections::{BTreeMap, BTreeSet};

use crate::query::modelable::Modelable;
use crate::query::{CacheNameTemplate, Constraint};
use crate::types::Target;

// =============================================================================
// Cache
// =============================================================================

/// Two-level index `kind → name → targets`, built during the write phase
/// and frozen afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadWriteCache {
    entries: BTreeMap<String, BTreeMap<String, BTreeSet<Target>>>,
}

impl ReadWriteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, kind: &str, name: &str, target: Target) {
        self.entries
            .entry(kind.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .insert(target);
    }

    /// The bucket under `(kind, name)`; empty when absent.
    pub fn get(&self, kind: &str, name: &str) -> BTreeSet<Target> {
        self.entries
            .get(kind)
            .and_then(|names| names.get(name))
            .cloned()
            .unwrap_or_default()
    }

    /// Pointwise union merge; commutative and associative.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (kind, names) in &other.entries {
            let bucket = merged.entries.entry(kind.clone()).or_default();
            for (name, targets) in names {
                bucket
                    .entry(name.clone())
                    .or_default()
                    .extend(targets.iter().cloned());
            }
        }
        merged
    }
}

// =============================================================================
// Candidate lattice
// =============================================================================

/// Candidate target set derived from the cache for a read query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateTargetsFromCache {
    /// No restriction derived.
    Top,
    Set(BTreeSet<Target>),
}

impl CandidateTargetsFromCache {
    /// The lattice bottom: no candidates.
    pub fn bottom() -> Self {
        CandidateTargetsFromCache::Set(BTreeSet::new())
    }

    pub fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (CandidateTargetsFromCache::Top, x) | (x, CandidateTargetsFromCache::Top) => x.clone(),
            (CandidateTargetsFromCache::Set(a), CandidateTargetsFromCache::Set(b)) => {
                CandidateTargetsFromCache::Set(a.intersection(b).cloned().collect())
            }
        }
    }

    pub fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (CandidateTargetsFromCache::Top, _) | (_, CandidateTargetsFromCache::Top) => {
                CandidateTargetsFromCache::Top
            }
            (CandidateTargetsFromCache::Set(a), CandidateTargetsFromCache::Set(b)) => {
                CandidateTargetsFromCache::Set(a.union(b).cloned().collect())
            }
        }
    }

    /// Derive the candidate set a constraint tree permits. Only
    /// `ReadFromCache` leaves restrict; everything else is `Top`.
    pub fn from_constraint(cache: &ReadWriteCache, constraint: &Constraint) -> Self {
        match constraint {
            Constraint::ReadFromCache { kind, name } => {
                CandidateTargetsFromCache::Set(cache.get(kind, name))
            }
            Constraint::AllOf(children) => children
                .iter()
                .fold(CandidateTargetsFromCache::Top, |acc, child| {
                    acc.meet(&Self::from_constraint(cache, child))
                }),
            Constraint::AnyOf(children) => children
                .iter()
                .fold(Self::bottom(), |acc, child| {
                    acc.join(&Self::from_constraint(cache, child))
                }),
            _ => CandidateTargetsFromCache::Top,
        }
    }

    /// True when the target is permitted.
    pub fn permits(&self, target: &Target) -> bool {
        match self {
            CandidateTargetsFromCache::Top => true,
            CandidateTargetsFromCache::Set(targets) => targets.contains(target),
        }
    }
}

// =============================================================================
// Cache keys
// =============================================================================

/// Expand a write-to-cache name template for a matched target. `None`
/// when a segment has nothing to expand to (a class segment on a bare
/// function, an unseen capture id).
pub fn expand_cache_name(
    template: &[CacheNameTemplate],
    modelable: &Modelable,
    captures: &BTreeMap<String, String>,
) -> Option<String> {
    let mut name = String::new();
    for segment in template {
        match segment {
            CacheNameTemplate::Literal(literal) => name.push_str(literal),
            CacheNameTemplate::FunctionName | CacheNameTemplate::MethodName => {
                name.push_str(&modelable.name())
            }
            CacheNameTemplate::ClassName => name.push_str(modelable.class_name()?),
            CacheNameTemplate::Capture(id) => name.push_str(captures.get(id)?),
        }
    }
    Some(name)
}
