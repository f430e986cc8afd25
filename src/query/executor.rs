//! Query execution: constraint matching, model projection, and the
//! three-phase orchestration.
//!
//! Queries partition into three bins:
//!
//! - *write-to-cache*: every model clause writes a cache bucket, and the
//!   `where` must not read the cache;
//! - *read-from-cache*: the `where` contains a `ReadFromCache` leaf; the
//!   candidate target set derives from the frozen cache;
//! - *regular*: neither.
//!
//! Execution order is write → read → regular. Write and regular phases
//! shard over workers and merge pointwise; the read phase runs against the
//! frozen cache. A read query whose candidate set derives to `Top` is a
//! configuration error: the verifier upstream must have rejected it.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::{debug, warn};

use super::cache::{expand_cache_name, CandidateTargetsFromCache, ReadWriteCache};
use super::modelable::{Decorator, Modelable, Parameter};
use super::{
    AnnotationConstraint, ArgumentsConstraint, CallArguments, ClassConstraint, Constraint, Find,
    ModelClause, ModelQuery, NameConstraint, ParameterConstraint, Port, Production,
    TaintAnnotation, ViaFeature,
};
use crate::error::{TaintError, VerificationError};
use crate::hierarchy::ClassHierarchyGraph;
use crate::query::{Model, ModelQueryRegistryMap};
use crate::scheduler::{map_reduce, SchedulePolicy};

// =============================================================================
// Supporting state
// =============================================================================

/// Regex groups captured while matching one (query, target) pair.
/// Append-only during constraint evaluation; read back during cache-key
/// expansion.
pub type NameCaptures = BTreeMap<String, String>;

/// Optional restriction of produced annotations to the source and sink
/// kinds the rule set actually uses.
#[derive(Debug, Clone, Default)]
pub struct SourceSinkFilter {
    /// Permitted source kind names; `None` permits all.
    pub sources: Option<std::collections::BTreeSet<String>>,
    /// Permitted sink kind names; `None` permits all.
    pub sinks: Option<std::collections::BTreeSet<String>>,
}

impl SourceSinkFilter {
    fn permits(&self, annotation: &TaintAnnotation) -> bool {
        match annotation {
            TaintAnnotation::Source { kind, .. } => self
                .sources
                .as_ref()
                .is_none_or(|permitted| permitted.contains(kind)),
            TaintAnnotation::Sink { kind, .. } => self
                .sinks
                .as_ref()
                .is_none_or(|permitted| permitted.contains(kind)),
        }
    }
}

/// Shared read-only state for constraint evaluation.
pub struct QueryContext<'a> {
    pub hierarchy: &'a ClassHierarchyGraph,
    /// Present from phase two onward.
    pub cache: Option<&'a ReadWriteCache>,
}

// =============================================================================
// String matching
// =============================================================================

fn regex_match(pattern: &str, text: &str, captures: Option<&mut NameCaptures>) -> bool {
    let regex = match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(error) => {
            warn!(pattern, %error, "invalid regex in query constraint");
            return false;
        }
    };
    match captures {
        None => regex.is_match(text),
        Some(buffer) => match regex.captures(text) {
            None => false,
            Some(found) => {
                for (index, group) in found.iter().enumerate() {
                    if let Some(group) = group {
                        buffer.insert(index.to_string(), group.as_str().to_string());
                    }
                }
                for name in regex.capture_names().flatten() {
                    if let Some(group) = found.name(name) {
                        buffer.insert(name.to_string(), group.as_str().to_string());
                    }
                }
                true
            }
        },
    }
}

fn matches_name(
    constraint: &NameConstraint,
    text: &str,
    captures: Option<&mut NameCaptures>,
) -> bool {
    match constraint {
        NameConstraint::Equals(expected) => expected == text,
        NameConstraint::Matches(pattern) => regex_match(pattern, text, captures),
    }
}

fn matches_annotation(constraint: &AnnotationConstraint, annotation: Option<&str>) -> bool {
    let Some(text) = annotation else {
        return false;
    };
    match constraint {
        AnnotationConstraint::Equals(expected) => expected == text,
        AnnotationConstraint::Matches(pattern) => regex_match(pattern, text, None),
    }
}

/// Strip the decorations an identifier can pick up in decorator argument
/// positions: quoting and the `$` prefix of synthesized names.
fn sanitize_identifier(text: &str) -> &str {
    text.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim_start_matches('$')
}

fn matches_arguments(constraint: &ArgumentsConstraint, decorator: &Decorator) -> bool {
    match constraint {
        ArgumentsConstraint::Contains(expected) => {
            let keywords_contained = expected.keyword.iter().all(|(key, value)| {
                decorator
                    .keyword
                    .iter()
                    .any(|(k, v)| k == key && v == value)
            });
            let positional_prefix = decorator.positional.len() >= expected.positional.len()
                && decorator
                    .positional
                    .iter()
                    .zip(&expected.positional)
                    .all(|(have, want)| have == want);
            keywords_contained && positional_prefix
        }
        ArgumentsConstraint::Equals(expected) => {
            let sanitize_all = |arguments: &CallArguments| {
                let positional: Vec<String> = arguments
                    .positional
                    .iter()
                    .map(|a| sanitize_identifier(a).to_string())
                    .collect();
                let mut keyword: Vec<(String, String)> = arguments
                    .keyword
                    .iter()
                    .map(|(k, v)| {
                        (
                            sanitize_identifier(k).to_string(),
                            sanitize_identifier(v).to_string(),
                        )
                    })
                    .collect();
                keyword.sort();
                (positional, keyword)
            };
            let actual = CallArguments {
                positional: decorator.positional.clone(),
                keyword: decorator.keyword.clone(),
            };
            sanitize_all(expected) == sanitize_all(&actual)
        }
    }
}

fn matches_parameter(constraint: &ParameterConstraint, parameter: &Parameter) -> bool {
    match constraint {
        ParameterConstraint::AnyOf(children) => children
            .iter()
            .any(|child| matches_parameter(child, parameter)),
        ParameterConstraint::AllOf(children) => children
            .iter()
            .all(|child| matches_parameter(child, parameter)),
        ParameterConstraint::Not(inner) => !matches_parameter(inner, parameter),
        ParameterConstraint::Name(name) => matches_name(name, parameter.sanitized_name(), None),
        ParameterConstraint::Index(index) => parameter.index == *index,
        ParameterConstraint::Annotation(annotation) => {
            matches_annotation(annotation, parameter.annotation.as_deref())
        }
    }
}

fn matches_class(
    hierarchy: &ClassHierarchyGraph,
    constraint: &ClassConstraint,
    class_name: &str,
) -> bool {
    match constraint {
        ClassConstraint::AnyOf(children) => children
            .iter()
            .any(|child| matches_class(hierarchy, child, class_name)),
        ClassConstraint::AllOf(children) => children
            .iter()
            .all(|child| matches_class(hierarchy, child, class_name)),
        ClassConstraint::Not(inner) => !matches_class(hierarchy, inner, class_name),
        ClassConstraint::Name(name) => {
            let unqualified = class_name.rsplit('.').next().unwrap_or(class_name);
            matches_name(name, unqualified, None)
        }
        ClassConstraint::FullyQualifiedName(name) => matches_name(name, class_name, None),
        ClassConstraint::Extends {
            class_name: ancestor,
            is_transitive,
            includes_self,
        } => hierarchy.extends(class_name, ancestor, *is_transitive, *includes_self),
        ClassConstraint::AnyChild {
            constraint,
            is_transitive,
            includes_self,
        } => hierarchy
            .children_closure(class_name, *is_transitive, *includes_self)
            .iter()
            .any(|child| matches_class(hierarchy, constraint, child)),
    }
}

fn matches_find(find: Find, modelable: &Modelable) -> bool {
    match (find, modelable) {
        (Find::Function, Modelable::Callable { class_name, .. }) => class_name.is_none(),
        (Find::Method, Modelable::Callable { class_name, .. }) => class_name.is_some(),
        (Find::Attribute, Modelable::Attribute { .. }) => true,
        (Find::Global, Modelable::Global { .. }) => true,
        _ => false,
    }
}

fn matches_constraint(
    ctx: &QueryContext<'_>,
    constraint: &Constraint,
    modelable: &Modelable,
    captures: &mut NameCaptures,
) -> bool {
    match constraint {
        Constraint::AnyOf(children) => children
            .iter()
            .any(|child| matches_constraint(ctx, child, modelable, captures)),
        Constraint::AllOf(children) => children
            .iter()
            .all(|child| matches_constraint(ctx, child, modelable, captures)),
        Constraint::Not(inner) => !matches_constraint(ctx, inner, modelable, captures),
        Constraint::Name(name) => matches_name(name, &modelable.name(), Some(captures)),
        Constraint::FullyQualifiedName(name) => {
            matches_name(name, modelable.target().name(), Some(captures))
        }
        Constraint::Annotation(annotation) => matches_annotation(
            annotation,
            modelable.type_annotation().ok().flatten(),
        ),
        Constraint::Return(annotation) => {
            matches_annotation(annotation, modelable.return_annotation().ok().flatten())
        }
        Constraint::AnyParameter(parameter_constraint) => modelable
            .parameters()
            .map(|parameters| {
                parameters
                    .iter()
                    .any(|parameter| matches_parameter(parameter_constraint, parameter))
            })
            .unwrap_or(false),
        Constraint::AnyDecorator(decorator_constraint) => modelable
            .decorators()
            .map(|decorators| {
                decorators.iter().any(|decorator| {
                    matches_name(&decorator_constraint.name, &decorator.name, None)
                        && decorator_constraint
                            .arguments
                            .as_ref()
                            .is_none_or(|arguments| matches_arguments(arguments, decorator))
                })
            })
            .unwrap_or(false),
        Constraint::Class(class_constraint) => modelable
            .class_name()
            .is_some_and(|class_name| matches_class(ctx.hierarchy, class_constraint, class_name)),
        Constraint::ReadFromCache { kind, name } => ctx
            .cache
            .is_some_and(|cache| cache.get(kind, name).contains(&modelable.target())),
    }
}

/// Match the find kind and every `where` clause.
pub fn matches_query(
    ctx: &QueryContext<'_>,
    query: &ModelQuery,
    modelable: &Modelable,
    captures: &mut NameCaptures,
) -> bool {
    matches_find(query.find, modelable)
        && query
            .where_
            .iter()
            .all(|constraint| matches_constraint(ctx, constraint, modelable, captures))
}

// =============================================================================
// Model projection
// =============================================================================

/// Rewrite `$global` via-features to the port under consideration.
fn rewrite_via_placeholder(via: &[ViaFeature], actual: &str) -> Vec<ViaFeature> {
    via.iter()
        .map(|feature| match feature {
            ViaFeature::ViaTypeOf { parameter } if parameter == "$global" => {
                ViaFeature::ViaTypeOf {
                    parameter: actual.to_string(),
                }
            }
            ViaFeature::ViaValueOf { parameter } if parameter == "$global" => {
                ViaFeature::ViaValueOf {
                    parameter: actual.to_string(),
                }
            }
            other => other.clone(),
        })
        .collect()
}

fn rewrite_annotation(annotation: &TaintAnnotation, actual: &str) -> TaintAnnotation {
    match annotation {
        TaintAnnotation::Source { kind, subkind, via } => TaintAnnotation::Source {
            kind: kind.clone(),
            subkind: subkind.clone(),
            via: rewrite_via_placeholder(via, actual),
        },
        TaintAnnotation::Sink { kind, subkind, via } => TaintAnnotation::Sink {
            kind: kind.clone(),
            subkind: subkind.clone(),
            via: rewrite_via_placeholder(via, actual),
        },
    }
}

/// Parse `pattern(subkind)` out of an `Annotated[...]` type expression.
fn parametric_subkind(pattern: &str, annotation: Option<&str>) -> Option<String> {
    let text = annotation?;
    if !text.contains("Annotated[") {
        return None;
    }
    let escaped = regex::escape(pattern);
    let regex = Regex::new(&format!(r"{escaped}\(\s*([A-Za-z_][A-Za-z_0-9]*)\s*\)")).ok()?;
    regex
        .captures(text)
        .map(|captures| captures[1].to_string())
}

fn apply_productions(
    productions: &[Production],
    annotation: Option<&str>,
    placeholder_target: &str,
    filter: Option<&SourceSinkFilter>,
) -> Vec<TaintAnnotation> {
    let mut produced = Vec::new();
    for production in productions {
        let annotation = match production {
            Production::TaintAnnotation(taint) => {
                Some(rewrite_annotation(taint, placeholder_target))
            }
            Production::ParametricSourceFromAnnotation { pattern, kind } => {
                parametric_subkind(pattern, annotation).map(|subkind| TaintAnnotation::Source {
                    kind: kind.clone(),
                    subkind: Some(subkind),
                    via: Vec::new(),
                })
            }
            Production::ParametricSinkFromAnnotation { pattern, kind } => {
                parametric_subkind(pattern, annotation).map(|subkind| TaintAnnotation::Sink {
                    kind: kind.clone(),
                    subkind: Some(subkind),
                    via: Vec::new(),
                })
            }
        };
        if let Some(annotation) = annotation {
            if filter.is_none_or(|filter| filter.permits(&annotation)) {
                produced.push(annotation);
            }
        }
    }
    produced
}

/// Project a matched query's `models` clause onto the target's ports.
pub fn project_models(
    query: &ModelQuery,
    modelable: &Modelable,
    filter: Option<&SourceSinkFilter>,
) -> Model {
    let mut model = Model::new();
    for clause in &query.models {
        match clause {
            ModelClause::Return(productions) => {
                let annotation = modelable.return_annotation().ok().flatten();
                for produced in apply_productions(
                    productions,
                    annotation,
                    modelable.target().name(),
                    filter,
                ) {
                    model.add(Port::Return, produced);
                }
            }
            ModelClause::NamedParameter { name, taint } => {
                let Ok(parameters) = modelable.parameters() else {
                    continue;
                };
                if let Some(parameter) = parameters
                    .iter()
                    .find(|parameter| parameter.sanitized_name() == name)
                {
                    add_parameter_taint(&mut model, parameter, taint, filter);
                }
            }
            ModelClause::PositionalParameter { index, taint } => {
                let Ok(parameters) = modelable.parameters() else {
                    continue;
                };
                if let Some(parameter) =
                    parameters.iter().find(|parameter| parameter.index == *index)
                {
                    add_parameter_taint(&mut model, parameter, taint, filter);
                }
            }
            ModelClause::AllParameters { excludes, taint } => {
                let Ok(parameters) = modelable.parameters() else {
                    continue;
                };
                for parameter in parameters {
                    if !excludes
                        .iter()
                        .any(|excluded| excluded == parameter.sanitized_name())
                    {
                        add_parameter_taint(&mut model, parameter, taint, filter);
                    }
                }
            }
            ModelClause::Parameter { where_, taint } => {
                let Ok(parameters) = modelable.parameters() else {
                    continue;
                };
                for parameter in parameters {
                    if where_
                        .iter()
                        .all(|constraint| matches_parameter(constraint, parameter))
                    {
                        add_parameter_taint(&mut model, parameter, taint, filter);
                    }
                }
            }
            ModelClause::Attribute(productions) => {
                if !matches!(modelable, Modelable::Attribute { .. }) {
                    continue;
                }
                let annotation = modelable.type_annotation().ok().flatten();
                for production in productions {
                    // Attributes only take direct annotations.
                    if let Production::TaintAnnotation(taint) = production {
                        let produced = rewrite_annotation(taint, modelable.target().name());
                        if filter.is_none_or(|filter| filter.permits(&produced)) {
                            model.add(Port::Attribute, produced);
                        }
                    } else {
                        let _ = annotation;
                        warn!(
                            query = %query.name,
                            "attribute models only accept direct taint annotations"
                        );
                    }
                }
            }
            ModelClause::Global(productions) => {
                if !matches!(modelable, Modelable::Global { .. }) {
                    continue;
                }
                for production in productions {
                    if let Production::TaintAnnotation(taint) = production {
                        let produced = rewrite_annotation(taint, modelable.target().name());
                        if filter.is_none_or(|filter| filter.permits(&produced)) {
                            model.add(Port::Global, produced);
                        }
                    } else {
                        warn!(
                            query = %query.name,
                            "global models only accept direct taint annotations"
                        );
                    }
                }
            }
            ModelClause::WriteToCache { .. } => {
                // Cache writes happen in phase one, not at projection time.
            }
        }
    }
    model
}

fn add_parameter_taint(
    model: &mut Model,
    parameter: &Parameter,
    productions: &[Production],
    filter: Option<&SourceSinkFilter>,
) {
    for produced in apply_productions(
        productions,
        parameter.annotation.as_deref(),
        parameter.sanitized_name(),
        filter,
    ) {
        model.add(Port::Parameter(parameter.name.clone()), produced);
    }
}

// =============================================================================
// Orchestration
// =============================================================================

fn validate_write_query(query: &ModelQuery) -> Result<(), TaintError> {
    if query.reads_from_cache() {
        return Err(TaintError::Config(format!(
            "write-to-cache query `{}` must not read from the cache",
            query.name
        )));
    }
    if !query.models.iter().all(ModelClause::is_write_to_cache) {
        return Err(TaintError::Config(format!(
            "write-to-cache query `{}` must only write to the cache",
            query.name
        )));
    }
    Ok(())
}

fn run_query_over<'a, I>(
    ctx: &QueryContext<'_>,
    query: &ModelQuery,
    modelables: I,
    filter: Option<&SourceSinkFilter>,
    registry_map: &mut ModelQueryRegistryMap,
) where
    I: Iterator<Item = &'a Modelable>,
{
    for modelable in modelables {
        let mut captures = NameCaptures::new();
        if matches_query(ctx, query, modelable, &mut captures) {
            let model = project_models(query, modelable, filter);
            if !model.is_empty() {
                registry_map.add(&query.name, modelable.target(), model);
            }
        }
    }
}

/// Execute every query against every modelable, in write → read → regular
/// phase order, sharded over workers. Returns the merged registries and
/// the accumulated configuration and verification errors.
pub fn generate_models_from_queries(
    policy: SchedulePolicy,
    hierarchy: &ClassHierarchyGraph,
    filter: Option<&SourceSinkFilter>,
    modelables: &[Modelable],
    queries: &[ModelQuery],
) -> (ModelQueryRegistryMap, Vec<TaintError>) {
    let mut errors: Vec<TaintError> = Vec::new();

    // Partition into the three bins, validating the write bin.
    let mut write_queries: Vec<&ModelQuery> = Vec::new();
    let mut read_queries: Vec<&ModelQuery> = Vec::new();
    let mut regular_queries: Vec<&ModelQuery> = Vec::new();
    for query in queries {
        if query.writes_to_cache() {
            match validate_write_query(query) {
                Ok(()) => write_queries.push(query),
                Err(error) => errors.push(error),
            }
        } else if query.reads_from_cache() {
            read_queries.push(query);
        } else {
            regular_queries.push(query);
        }
    }

    // Phase 1: populate the cache, sharded, merged by pointwise union.
    let cache = map_reduce(
        policy,
        ReadWriteCache::new(),
        |shard: &[Modelable]| {
            let ctx = QueryContext {
                hierarchy,
                cache: None,
            };
            let mut cache = ReadWriteCache::new();
            for modelable in shard {
                for query in &write_queries {
                    let mut captures = NameCaptures::new();
                    if !matches_query(&ctx, query, modelable, &mut captures) {
                        continue;
                    }
                    for clause in &query.models {
                        if let ModelClause::WriteToCache { kind, name } = clause {
                            match expand_cache_name(name, modelable, &captures) {
                                Some(expanded) => {
                                    cache.insert(kind, &expanded, modelable.target())
                                }
                                None => warn!(
                                    query = %query.name,
                                    target = %modelable.target(),
                                    "cache name template has no expansion for target"
                                ),
                            }
                        }
                    }
                }
            }
            cache
        },
        |left, right| left.merge(&right),
        modelables,
    );
    debug!(
        write_queries = write_queries.len(),
        cache_empty = cache.is_empty(),
        "write-to-cache phase complete"
    );

    let mut registry_map = ModelQueryRegistryMap::default();

    // Phase 2: read queries against the frozen cache.
    let ctx = QueryContext {
        hierarchy,
        cache: Some(&cache),
    };
    for query in &read_queries {
        let conjunction = Constraint::AllOf(query.where_.clone());
        let candidates = CandidateTargetsFromCache::from_constraint(&cache, &conjunction);
        if candidates == CandidateTargetsFromCache::Top {
            errors.push(TaintError::Config(format!(
                "read-from-cache query `{}` derives no candidate restriction",
                query.name
            )));
            continue;
        }
        run_query_over(
            &ctx,
            query,
            modelables
                .iter()
                .filter(|modelable| candidates.permits(&modelable.target())),
            filter,
            &mut registry_map,
        );
    }

    // Phase 3: regular queries, sharded.
    let regular = map_reduce(
        policy,
        ModelQueryRegistryMap::default(),
        |shard: &[Modelable]| {
            let ctx = QueryContext {
                hierarchy,
                cache: Some(&cache),
            };
            let mut shard_map = ModelQueryRegistryMap::default();
            for query in &regular_queries {
                run_query_over(&ctx, query, shard.iter(), filter, &mut shard_map);
            }
            shard_map
        },
        |left, right| left.merge(&right),
        modelables,
    );
    registry_map = registry_map.merge(&regular);

    // Post-execution audit. Write queries only feed the cache, so they are
    // exempt from the no-output check.
    for query in read_queries.iter().chain(&regular_queries) {
        let produced: Vec<String> = registry_map
            .registry(&query.name)
            .map(|registry| {
                registry
                    .models
                    .keys()
                    .map(|target| target.name().to_string())
                    .collect()
            })
            .unwrap_or_default();
        if produced.is_empty() {
            errors.push(TaintError::Verification(VerificationError::NoOutput {
                query: query.name.clone(),
            }));
        }
        for expected in &query.expected_models {
            if !produced.contains(expected) {
                errors.push(TaintError::Verification(VerificationError::Expected {
                    query: query.name.clone(),
                    target: expected.clone(),
                }));
            }
        }
        for unexpected in &query.unexpected_models {
            if produced.contains(unexpected) {
                errors.push(TaintError::Verification(VerificationError::Unexpected {
                    query: query.name.clone(),
                    target: unexpected.clone(),
                }));
            }
        }
    }

    (registry_map, errors)
}
