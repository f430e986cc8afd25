//! Model queries: declarative taint-annotation generators.
//!
//! A query names a modelable kind to find, a `where` constraint
//! conjunction, and a `models` clause projecting taint annotations onto
//! the matched target's ports. Queries additionally participate in the
//! two-phase write-to-cache / read-from-cache protocol (see
//! [`cache`]) for inter-query indexing by target property.

pub mod cache;
pub mod executor;
pub mod modelable;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{Location, Target};

// =============================================================================
// Constraint algebra
// =============================================================================

/// String matcher used by name and annotation constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameConstraint {
    Equals(String),
    /// Regex match; sub-captures are recorded into the per-query capture
    /// buffer during write-to-cache execution.
    Matches(String),
}

/// Matcher over type annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnotationConstraint {
    Equals(String),
    Matches(String),
}

/// Positional and keyword arguments of a decorator application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallArguments {
    pub positional: Vec<String>,
    pub keyword: Vec<(String, String)>,
}

/// Matcher over a decorator's arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgumentsConstraint {
    /// The given keyword arguments are a subset of the decorator's and the
    /// given positional arguments are an order-preserving prefix.
    Contains(CallArguments),
    /// Both argument lists are equal up to identifier sanitization.
    Equals(CallArguments),
}

/// Matcher over one decorator application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoratorConstraint {
    pub name: NameConstraint,
    pub arguments: Option<ArgumentsConstraint>,
}

/// Matcher over one formal parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterConstraint {
    AnyOf(Vec<ParameterConstraint>),
    AllOf(Vec<ParameterConstraint>),
    Not(Box<ParameterConstraint>),
    Name(NameConstraint),
    Index(usize),
    Annotation(AnnotationConstraint),
}

/// Matcher over the class a method or attribute belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassConstraint {
    AnyOf(Vec<ClassConstraint>),
    AllOf(Vec<ClassConstraint>),
    Not(Box<ClassConstraint>),
    Name(NameConstraint),
    FullyQualifiedName(NameConstraint),
    /// The class extends `class_name` in the hierarchy graph.
    Extends {
        class_name: String,
        is_transitive: bool,
        includes_self: bool,
    },
    /// Some child of the class (under the closure flags) satisfies the
    /// inner constraint.
    AnyChild {
        constraint: Box<ClassConstraint>,
        is_transitive: bool,
        includes_self: bool,
    },
}

/// The closed `where` constraint algebra.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constraint {
    AnyOf(Vec<Constraint>),
    AllOf(Vec<Constraint>),
    Not(Box<Constraint>),
    /// Matches the target's unqualified name.
    Name(NameConstraint),
    /// Matches the target's fully qualified name.
    FullyQualifiedName(NameConstraint),
    /// Matches an attribute's or global's type annotation.
    Annotation(AnnotationConstraint),
    /// Matches a callable's return annotation.
    Return(AnnotationConstraint),
    /// Some parameter satisfies the inner constraint.
    AnyParameter(ParameterConstraint),
    /// Some decorator satisfies the inner constraint.
    AnyDecorator(DecoratorConstraint),
    /// The defining class satisfies the inner constraint.
    Class(ClassConstraint),
    /// The target is in the cache bucket written by an earlier query.
    ReadFromCache { kind: String, name: String },
}

impl Constraint {
    /// True when the constraint tree contains a `ReadFromCache` leaf.
    pub fn references_cache(&self) -> bool {
        match self {
            Constraint::ReadFromCache { .. } => true,
            Constraint::AnyOf(children) | Constraint::AllOf(children) => {
                children.iter().any(Constraint::references_cache)
            }
            Constraint::Not(inner) => inner.references_cache(),
            _ => false,
        }
    }
}

// =============================================================================
// Model clauses
// =============================================================================

/// Feature annotation attached to a produced source or sink. The sentinel
/// parameter `$global` is rewritten to the port under consideration at
/// projection time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ViaFeature {
    ViaTypeOf { parameter: String },
    ViaValueOf { parameter: String },
}

/// A produced taint annotation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaintAnnotation {
    Source {
        kind: String,
        subkind: Option<String>,
        via: Vec<ViaFeature>,
    },
    Sink {
        kind: String,
        subkind: Option<String>,
        via: Vec<ViaFeature>,
    },
}

impl TaintAnnotation {
    pub fn source(kind: impl Into<String>) -> Self {
        TaintAnnotation::Source {
            kind: kind.into(),
            subkind: None,
            via: Vec::new(),
        }
    }

    pub fn sink(kind: impl Into<String>) -> Self {
        TaintAnnotation::Sink {
            kind: kind.into(),
            subkind: None,
            via: Vec::new(),
        }
    }

    /// The produced kind's base name.
    pub fn kind(&self) -> &str {
        match self {
            TaintAnnotation::Source { kind, .. } | TaintAnnotation::Sink { kind, .. } => kind,
        }
    }
}

/// How a model clause turns an annotation into taint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Production {
    /// Produce this annotation unconditionally.
    TaintAnnotation(TaintAnnotation),
    /// Parse `Annotated[..., pattern(subkind)]` out of the port's type
    /// annotation and produce a parametric source.
    ParametricSourceFromAnnotation { pattern: String, kind: String },
    /// The symmetric sink variant.
    ParametricSinkFromAnnotation { pattern: String, kind: String },
}

/// One segment of a write-to-cache key template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheNameTemplate {
    Literal(String),
    FunctionName,
    MethodName,
    ClassName,
    /// A regex group captured while matching this target's name.
    Capture(String),
}

/// A `models` clause: which port to annotate and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelClause {
    Return(Vec<Production>),
    NamedParameter {
        name: String,
        taint: Vec<Production>,
    },
    PositionalParameter {
        index: usize,
        taint: Vec<Production>,
    },
    AllParameters {
        excludes: Vec<String>,
        taint: Vec<Production>,
    },
    Parameter {
        where_: Vec<ParameterConstraint>,
        taint: Vec<Production>,
    },
    Attribute(Vec<Production>),
    Global(Vec<Production>),
    WriteToCache {
        kind: String,
        name: Vec<CacheNameTemplate>,
    },
}

impl ModelClause {
    pub fn is_write_to_cache(&self) -> bool {
        matches!(self, ModelClause::WriteToCache { .. })
    }
}

// =============================================================================
// Queries
// =============================================================================

/// The modelable kind a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Find {
    Function,
    Method,
    Attribute,
    Global,
}

/// A user-defined model query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelQuery {
    pub name: String,
    pub find: Find,
    pub where_: Vec<Constraint>,
    pub models: Vec<ModelClause>,
    /// Targets this query is expected to model (audited post-run).
    #[serde(default)]
    pub expected_models: Vec<String>,
    /// Targets this query must not model (audited post-run).
    #[serde(default)]
    pub unexpected_models: Vec<String>,
    pub location: Location,
}

impl ModelQuery {
    /// True when any model clause writes to the cache.
    pub fn writes_to_cache(&self) -> bool {
        self.models.iter().any(ModelClause::is_write_to_cache)
    }

    /// True when the `where` clauses reference the cache.
    pub fn reads_from_cache(&self) -> bool {
        self.where_.iter().any(Constraint::references_cache)
    }
}

// =============================================================================
// Models and registries
// =============================================================================

/// A port of a modelable that taint can attach to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Port {
    Return,
    Parameter(String),
    Attribute,
    Global,
}

/// Taint annotations grouped by port: the output of query execution for
/// one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub taints: BTreeMap<Port, BTreeSet<TaintAnnotation>>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.taints.is_empty()
    }

    pub fn add(&mut self, port: Port, annotation: TaintAnnotation) {
        self.taints.entry(port).or_default().insert(annotation);
    }

    /// Merge duplicate user models: pointwise union per port.
    pub fn join_user_models(&self, other: &Self) -> Self {
        let mut taints = self.taints.clone();
        for (port, annotations) in &other.taints {
            taints
                .entry(port.clone())
                .or_default()
                .extend(annotations.iter().cloned());
        }
        Self { taints }
    }
}

/// Models produced by one query, keyed by target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelQueryRegistry {
    pub models: BTreeMap<Target, Model>,
}

impl ModelQueryRegistry {
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn add(&mut self, target: Target, model: Model) {
        if model.is_empty() {
            return;
        }
        match self.models.get_mut(&target) {
            Some(existing) => *existing = existing.join_user_models(&model),
            None => {
                self.models.insert(target, model);
            }
        }
    }

    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (target, model) in &other.models {
            merged.add(target.clone(), model.clone());
        }
        merged
    }
}

/// Per-query registries for a whole run; the reduce value of the
/// map-reduce orchestration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelQueryRegistryMap {
    pub registries: BTreeMap<String, ModelQueryRegistry>,
}

impl ModelQueryRegistryMap {
    pub fn registry(&self, query_name: &str) -> Option<&ModelQueryRegistry> {
        self.registries.get(query_name)
    }

    pub fn add(&mut self, query_name: &str, target: Target, model: Model) {
        self.registries
            .entry(query_name.to_string())
            .or_default()
            .add(target, model);
    }

    /// Pointwise commutative-associative merge.
    pub fn merge(&self, other: &Self) -> Self {
        let mut registries = self.registries.clone();
        for (name, registry) in &other.registries {
            registries
                .entry(name.clone())
                .and_modify(|existing| *existing = existing.merge(registry))
                .or_insert_with(|| registry.clone());
        }
        Self { registries }
    }
}
