//! Class hierarchy graph.
//!
//! Immediate-children adjacency over class names, with the derived
//! reflexive/transitive closures the query executor needs. Ancestry
//! queries on classes the graph has never seen answer `false`: an
//! untracked class is simply not an ancestor.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

/// Immediate subclass edges, keyed by parent class name.
#[derive(Debug, Clone, Default)]
pub struct ClassHierarchyGraph {
    children: FxHashMap<String, BTreeSet<String>>,
    parents: FxHashMap<String, BTreeSet<String>>,
}

impl ClassHierarchyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(parent, child)` edges.
    pub fn from_edges<I, S>(edges: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut graph = Self::new();
        for (parent, child) in edges {
            graph.add_edge(parent.into(), child.into());
        }
        graph
    }

    pub fn add_edge(&mut self, parent: String, child: String) {
        self.parents
            .entry(child.clone())
            .or_default()
            .insert(parent.clone());
        self.children.entry(parent).or_default().insert(child);
    }

    /// Immediate children; empty for untracked classes.
    pub fn get_children(&self, class: &str) -> BTreeSet<String> {
        self.children.get(class).cloned().unwrap_or_default()
    }

    /// Children set under the requested closure. `transitive` walks the
    /// graph to a fixpoint; `includes_self` adds the class itself.
    pub fn children_closure(
        &self,
        class: &str,
        transitive: bool,
        includes_self: bool,
    ) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        if includes_self {
            result.insert(class.to_string());
        }
        let mut worklist: Vec<String> = self.get_children(class).into_iter().collect();
        while let Some(current) = worklist.pop() {
            if !result.insert(current.clone()) {
                continue;
            }
            if transitive {
                worklist.extend(self.get_children(&current));
            }
        }
        result
    }

    /// True when `descendant` transitively extends `ancestor`. Untracked
    /// classes are nobody's descendant.
    pub fn is_transitive_successor(&self, ancestor: &str, descendant: &str) -> bool {
        let mut worklist: Vec<&str> = vec![descendant];
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        while let Some(current) = worklist.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(parents) = self.parents.get(current) {
                for parent in parents {
                    if parent == ancestor {
                        return true;
                    }
                    worklist.push(parent);
                }
            }
        }
        false
    }

    /// Extends-check with the query executor's closure flags.
    pub fn extends(
        &self,
        class: &str,
        ancestor: &str,
        transitive: bool,
        includes_self: bool,
    ) -> bool {
        if includes_self && class == ancestor {
            return true;
        }
        if transitive {
            self.is_transitive_successor(ancestor, class)
        } else {
            self.parents
                .get(class)
                .is_some_and(|parents| parents.contains(ancestor))
        }
    }
}
