//! Taint values and access-path tries.
//!
//! [`Taint`] is the collapsed form: a join-normalized set of
//! `(call info, kind, frame)` entries. [`TaintTree`] refines a taint by the
//! access path it sits under: a trie keyed by field/index projections of a
//! root variable, each node holding a taint.
//!
//! The operations are referentially transparent; the sanitizer fixpoint
//! re-invokes them freely. Entry storage is ordered so every fold and
//! partition iterates deterministically.
//!
//! Key invariant (checked in tests): for any path P,
//! `read(P, join(T1, T2)) = join(read(P, T1), read(P, T2))`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::frame::{CallInfo, Frame};
use super::kind::TaintKind;

// =============================================================================
// Access paths
// =============================================================================

/// One projection step from a root variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathElement {
    /// Attribute/field projection, `x.field`.
    Field(String),
    /// Index projection, `x[key]`.
    Index(String),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Field(name) => write!(f, ".{name}"),
            PathElement::Index(key) => write!(f, "[{key}]"),
        }
    }
}

/// A sequence of projections under a root.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccessPath(pub Vec<PathElement>);

impl AccessPath {
    /// The empty path (the root itself).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build from elements.
    pub fn from_elements<I: IntoIterator<Item = PathElement>>(elements: I) -> Self {
        Self(elements.into_iter().collect())
    }

    /// Single-field path.
    pub fn field(name: impl Into<String>) -> Self {
        Self(vec![PathElement::Field(name.into())])
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.0 {
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Collapsed taint
// =============================================================================

/// A join-normalized taint value: at most one frame per
/// `(call info, kind)` pair, ordered for deterministic iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taint<K: TaintKind> {
    entries: BTreeMap<(CallInfo, K), Frame>,
}

impl<K: TaintKind> Default for Taint<K> {
    fn default() -> Self {
        Self::bottom()
    }
}

impl<K: TaintKind> Taint<K> {
    /// The bottom element: no taint.
    pub fn bottom() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn is_bottom(&self) -> bool {
        self.entries.is_empty()
    }

    /// A single-entry taint.
    pub fn singleton(call_info: CallInfo, kind: K, frame: Frame) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert((call_info, kind), frame);
        Self { entries }
    }

    /// Pointwise join: frames of equal `(call info, kind)` pairs join.
    pub fn join(&self, other: &Self) -> Self {
        let mut entries = self.entries.clone();
        for (key, frame) in &other.entries {
            entries
                .entry(key.clone())
                .and_modify(|existing| *existing = existing.join(frame))
                .or_insert_with(|| frame.clone());
        }
        Self { entries }
    }

    /// Iterate `(call info, kind, frame)` in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = (&CallInfo, &K, &Frame)> {
        self.entries
            .iter()
            .map(|((call_info, kind), frame)| (call_info, kind, frame))
    }

    /// The deduplicated, ordered kinds present in this taint.
    pub fn kinds(&self) -> Vec<K> {
        let set: BTreeSet<K> = self.entries.keys().map(|(_, kind)| kind.clone()).collect();
        set.into_iter().collect()
    }

    /// Fold every entry into an accumulator.
    pub fn fold<A, F: FnMut(A, &CallInfo, &K, &Frame) -> A>(&self, init: A, mut f: F) -> A {
        let mut acc = init;
        for ((call_info, kind), frame) in &self.entries {
            acc = f(acc, call_info, kind, frame);
        }
        acc
    }

    /// Rewrite kinds; entries mapped to `None` are dropped, colliding
    /// results join.
    pub fn transform_kinds<F: Fn(&K) -> Option<K>>(&self, f: F) -> Self {
        let mut result = Self::bottom();
        for ((call_info, kind), frame) in &self.entries {
            if let Some(mapped) = f(kind) {
                result = result.join(&Self::singleton(
                    call_info.clone(),
                    mapped,
                    frame.clone(),
                ));
            }
        }
        result
    }

    /// Rewrite frames in place.
    pub fn map_frames<F: Fn(&mut Frame)>(&self, f: F) -> Self {
        let mut entries = self.entries.clone();
        for frame in entries.values_mut() {
            f(frame);
        }
        Self { entries }
    }

    /// Split by a kind projection; entries projected to `None` are dropped.
    pub fn partition<T: Ord + Clone, F: Fn(&K) -> Option<T>>(&self, f: F) -> BTreeMap<T, Self> {
        let mut result: BTreeMap<T, Self> = BTreeMap::new();
        for ((call_info, kind), frame) in &self.entries {
            if let Some(key) = f(kind) {
                let slot = result.entry(key).or_insert_with(Self::bottom);
                *slot = slot.join(&Self::singleton(
                    call_info.clone(),
                    kind.clone(),
                    frame.clone(),
                ));
            }
        }
        result
    }

    /// Remove every entry whose kind is sanitized by the given base names.
    pub fn sanitize_taint_kinds(&self, names: &BTreeSet<String>) -> Self {
        if names.is_empty() {
            return self.clone();
        }
        let entries = self
            .entries
            .iter()
            .filter(|((_, kind), _)| !kind.is_sanitized_by(names))
            .map(|(key, frame)| (key.clone(), frame.clone()))
            .collect();
        Self { entries }
    }

    /// Union of every frame's breadcrumbs.
    pub fn joined_breadcrumbs(&self) -> BTreeSet<String> {
        let mut crumbs = BTreeSet::new();
        for frame in self.entries.values() {
            crumbs.extend(frame.breadcrumbs.iter().cloned());
        }
        crumbs
    }

    /// Index keys recorded when subtrees were collapsed into this taint.
    pub fn first_indices(&self) -> BTreeSet<String> {
        self.breadcrumbs_with_prefix("first-index:")
    }

    /// Field names recorded when subtrees were collapsed into this taint.
    pub fn first_fields(&self) -> BTreeSet<String> {
        self.breadcrumbs_with_prefix("first-field:")
    }

    fn breadcrumbs_with_prefix(&self, prefix: &str) -> BTreeSet<String> {
        self.joined_breadcrumbs()
            .into_iter()
            .filter_map(|crumb| crumb.strip_prefix(prefix).map(str::to_string))
            .collect()
    }
}

// =============================================================================
// Taint trees
// =============================================================================

/// A trie refining a taint by access path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaintTree<K: TaintKind> {
    taint: Taint<K>,
    children: BTreeMap<PathElement, TaintTree<K>>,
}

impl<K: TaintKind> Default for TaintTree<K> {
    fn default() -> Self {
        Self::bottom()
    }
}

impl<K: TaintKind> TaintTree<K> {
    /// The empty tree.
    pub fn bottom() -> Self {
        Self {
            taint: Taint::bottom(),
            children: BTreeMap::new(),
        }
    }

    /// A tree holding `taint` at `path` and nothing else.
    pub fn create_leaf(path: &AccessPath, taint: Taint<K>) -> Self {
        let mut node = Self {
            taint,
            children: BTreeMap::new(),
        };
        for element in path.0.iter().rev() {
            let mut parent = Self::bottom();
            parent.children.insert(element.clone(), node);
            node = parent;
        }
        node
    }

    /// True when no node holds taint.
    pub fn is_empty(&self) -> bool {
        self.taint.is_bottom() && self.children.values().all(TaintTree::is_empty)
    }

    /// Pointwise join of two trees.
    pub fn join(&self, other: &Self) -> Self {
        let mut children = self.children.clone();
        for (element, subtree) in &other.children {
            children
                .entry(element.clone())
                .and_modify(|existing| *existing = existing.join(subtree))
                .or_insert_with(|| subtree.clone());
        }
        Self {
            taint: self.taint.join(&other.taint),
            children,
        }
    }

    /// Read the subtree at `path`. Taint held on a strict prefix of `path`
    /// applies to everything below it, so prefix taint joins into the
    /// returned root.
    pub fn read(&self, path: &AccessPath) -> Self {
        let mut prefix_taint = Taint::bottom();
        let mut node = self;
        for element in &path.0 {
            prefix_taint = prefix_taint.join(&node.taint);
            match node.children.get(element) {
                Some(child) => node = child,
                None => {
                    return Self {
                        taint: prefix_taint,
                        children: BTreeMap::new(),
                    }
                }
            }
        }
        Self {
            taint: node.taint.join(&prefix_taint),
            children: node.children.clone(),
        }
    }

    /// Collapse the whole tree into a single taint, widening with the
    /// given breadcrumbs. Taint under a field or index projection records a
    /// `first-field:`/`first-index:` breadcrumb for its outermost step.
    pub fn collapse(&self, widen_breadcrumbs: &[String]) -> Taint<K> {
        let mut acc = self.taint.clone();
        for (element, subtree) in &self.children {
            let crumb = match element {
                PathElement::Field(name) => format!("first-field:{name}"),
                PathElement::Index(key) => format!("first-index:{key}"),
            };
            let collapsed = subtree.collapse(widen_breadcrumbs).map_frames(|frame| {
                frame.add_breadcrumb(crumb.clone());
                for widen in widen_breadcrumbs {
                    frame.add_breadcrumb(widen.clone());
                }
            });
            acc = acc.join(&collapsed);
        }
        acc
    }

    /// Fold every node's taint with its path, in path order.
    pub fn fold_paths<A, F: FnMut(A, &AccessPath, &Taint<K>) -> A>(&self, init: A, mut f: F) -> A {
        fn walk<K: TaintKind, A, F: FnMut(A, &AccessPath, &Taint<K>) -> A>(
            node: &TaintTree<K>,
            path: &mut Vec<PathElement>,
            acc: A,
            f: &mut F,
        ) -> A {
            let mut acc = acc;
            if !node.taint.is_bottom() {
                acc = f(acc, &AccessPath(path.clone()), &node.taint);
            }
            for (element, child) in &node.children {
                path.push(element.clone());
                acc = walk(child, path, acc, f);
                path.pop();
            }
            acc
        }
        let mut path = Vec::new();
        walk(self, &mut path, init, &mut f)
    }

    /// The paths holding taint, with their taints, in deterministic order.
    pub fn paths(&self) -> Vec<(AccessPath, Taint<K>)> {
        self.fold_paths(Vec::new(), |mut acc, path, taint| {
            acc.push((path.clone(), taint.clone()));
            acc
        })
    }

    /// Rewrite every node's taint; nodes whose taint maps to bottom keep
    /// their children.
    pub fn transform<F: Fn(&Taint<K>) -> Taint<K>>(&self, f: F) -> Self {
        fn walk<K: TaintKind, F: Fn(&Taint<K>) -> Taint<K>>(
            node: &TaintTree<K>,
            f: &F,
        ) -> TaintTree<K> {
            TaintTree {
                taint: f(&node.taint),
                children: node
                    .children
                    .iter()
                    .map(|(element, child)| (element.clone(), walk(child, f)))
                    .collect(),
            }
        }
        walk(self, &f)
    }

    /// Split every node's taint by a kind projection, rebuilding one tree
    /// per projection key.
    pub fn partition<T: Ord + Clone, F: Fn(&K) -> Option<T>>(
        &self,
        f: F,
    ) -> BTreeMap<T, TaintTree<K>> {
        let mut result: BTreeMap<T, TaintTree<K>> = BTreeMap::new();
        for (path, taint) in self.paths() {
            for (key, part) in taint.partition(&f) {
                let leaf = TaintTree::create_leaf(&path, part);
                result
                    .entry(key)
                    .and_modify(|existing| *existing = existing.join(&leaf))
                    .or_insert(leaf);
            }
        }
        result
    }
}
