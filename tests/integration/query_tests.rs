//! Write-to-cache / read-from-cache pipeline, end to end.

use taintflow::error::{TaintError, VerificationError};
use taintflow::hierarchy::ClassHierarchyGraph;
use taintflow::query::executor::generate_models_from_queries;
use taintflow::query::modelable::{FunctionSignature, Modelable, Parameter};
use taintflow::query::{
    CacheNameTemplate, ClassConstraint, Constraint, Find, ModelClause, ModelQuery, NameConstraint,
    Port, Production, TaintAnnotation,
};
use taintflow::scheduler::SchedulePolicy;
use taintflow::types::Location;

fn hierarchy() -> ClassHierarchyGraph {
    // Foo <- Bar <- Baz, plus an unrelated class.
    ClassHierarchyGraph::from_edges([("Foo", "Bar"), ("Bar", "Baz")])
}

fn method(class: &str) -> Modelable {
    Modelable::method(
        format!("app.{class}.handle").as_str(),
        class,
        FunctionSignature {
            parameters: vec![Parameter::new("self", 0), Parameter::new("data", 1)],
            return_annotation: None,
            decorators: Vec::new(),
            line: 1,
        },
    )
}

fn modelables() -> Vec<Modelable> {
    vec![
        method("Foo"),
        method("Bar"),
        method("Baz"),
        method("Unrelated"),
    ]
}

fn query(name: &str, where_: Vec<Constraint>, models: Vec<ModelClause>) -> ModelQuery {
    ModelQuery {
        name: name.to_string(),
        find: Find::Method,
        where_,
        models,
        expected_models: Vec::new(),
        unexpected_models: Vec::new(),
        location: Location::new("queries.taint", 1, 0, 0),
    }
}

fn write_query() -> ModelQuery {
    // Index every method of a class extending Foo (Foo included) under the
    // constant bucket ("parent", "Foo").
    query(
        "index-foo-children",
        vec![Constraint::Class(ClassConstraint::Extends {
            class_name: "Foo".to_string(),
            is_transitive: true,
            includes_self: true,
        })],
        vec![ModelClause::WriteToCache {
            kind: "parent".to_string(),
            name: vec![CacheNameTemplate::Literal("Foo".to_string())],
        }],
    )
}

fn read_query() -> ModelQuery {
    query(
        "taint-foo-children",
        vec![Constraint::ReadFromCache {
            kind: "parent".to_string(),
            name: "Foo".to_string(),
        }],
        vec![ModelClause::NamedParameter {
            name: "data".to_string(),
            taint: vec![Production::TaintAnnotation(TaintAnnotation::source(
                "UserControlled",
            ))],
        }],
    )
}

#[test]
fn write_then_read_restricts_candidates_to_the_hierarchy() {
    let hierarchy = hierarchy();
    let modelables = modelables();
    // A regular query runs unrestricted in phase three.
    let regular = query(
        "unrelated-handles",
        vec![Constraint::FullyQualifiedName(NameConstraint::Equals(
            "app.Unrelated.handle".to_string(),
        ))],
        vec![ModelClause::NamedParameter {
            name: "data".to_string(),
            taint: vec![Production::TaintAnnotation(TaintAnnotation::sink("Logging"))],
        }],
    );

    let (registry_map, errors) = generate_models_from_queries(
        SchedulePolicy::default(),
        &hierarchy,
        None,
        &modelables,
        &[write_query(), read_query(), regular],
    );
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");

    // The read query modeled exactly the Foo hierarchy's methods.
    let read_registry = registry_map
        .registry("taint-foo-children")
        .expect("read query produced models");
    let modeled: Vec<&str> = read_registry
        .models
        .keys()
        .map(|target| target.name())
        .collect();
    assert_eq!(
        modeled,
        vec!["app.Bar.handle", "app.Baz.handle", "app.Foo.handle"]
    );
    for model in read_registry.models.values() {
        assert!(model
            .taints
            .contains_key(&Port::Parameter("data".to_string())));
    }

    // Phase three was unaffected by the restriction.
    let regular_registry = registry_map
        .registry("unrelated-handles")
        .expect("regular query produced models");
    assert_eq!(regular_registry.models.len(), 1);

    // The write query produces no models of its own.
    assert!(registry_map.registry("index-foo-children").is_none());
}

#[test]
fn read_query_without_cache_restriction_is_a_config_error() {
    let hierarchy = hierarchy();
    let modelables = modelables();
    // `Not(ReadFromCache)` reads the cache but derives no restriction.
    let unrestricted = query(
        "bad-read",
        vec![Constraint::Not(Box::new(Constraint::ReadFromCache {
            kind: "parent".to_string(),
            name: "Foo".to_string(),
        }))],
        vec![ModelClause::Return(vec![Production::TaintAnnotation(
            TaintAnnotation::source("UserControlled"),
        )])],
    );

    let (registry_map, errors) = generate_models_from_queries(
        SchedulePolicy::default(),
        &hierarchy,
        None,
        &modelables,
        &[write_query(), unrestricted],
    );
    assert!(registry_map.registry("bad-read").is_none());
    assert!(errors
        .iter()
        .any(|error| matches!(error, TaintError::Config(_))));
}

#[test]
fn mixed_write_query_is_rejected() {
    let hierarchy = hierarchy();
    let modelables = modelables();
    let mixed = query(
        "bad-write",
        vec![],
        vec![
            ModelClause::WriteToCache {
                kind: "parent".to_string(),
                name: vec![CacheNameTemplate::ClassName],
            },
            ModelClause::Return(vec![Production::TaintAnnotation(
                TaintAnnotation::source("UserControlled"),
            )]),
        ],
    );

    let (_, errors) = generate_models_from_queries(
        SchedulePolicy::default(),
        &hierarchy,
        None,
        &modelables,
        &[mixed],
    );
    assert!(errors
        .iter()
        .any(|error| matches!(error, TaintError::Config(_))));
}

#[test]
fn audit_reports_missing_expected_and_silent_queries() {
    let hierarchy = hierarchy();
    let modelables = modelables();

    let mut audited = read_query();
    audited.expected_models = vec!["app.Foo.handle".to_string(), "app.Missing.handle".to_string()];
    audited.unexpected_models = vec!["app.Bar.handle".to_string()];

    let silent = query(
        "matches-nothing",
        vec![Constraint::Name(NameConstraint::Equals(
            "no_such_method".to_string(),
        ))],
        vec![ModelClause::Return(vec![Production::TaintAnnotation(
            TaintAnnotation::source("UserControlled"),
        )])],
    );

    let (_, errors) = generate_models_from_queries(
        SchedulePolicy::default(),
        &hierarchy,
        None,
        &modelables,
        &[write_query(), audited, silent],
    );

    assert!(errors.iter().any(|error| matches!(
        error,
        TaintError::Verification(VerificationError::Expected { target, .. })
            if target == "app.Missing.handle"
    )));
    assert!(errors.iter().any(|error| matches!(
        error,
        TaintError::Verification(VerificationError::Unexpected { target, .. })
            if target == "app.Bar.handle"
    )));
    assert!(errors.iter().any(|error| matches!(
        error,
        TaintError::Verification(VerificationError::NoOutput { query })
            if query == "matches-nothing"
    )));
}

#[test]
fn capture_expansion_builds_per_class_buckets() {
    let hierarchy = hierarchy();
    let modelables = modelables();

    // Capture the class segment of the qualified name into the bucket key.
    let write = query(
        "index-by-class",
        vec![Constraint::FullyQualifiedName(NameConstraint::Matches(
            r"^app\.(?P<class>[A-Za-z]+)\.handle$".to_string(),
        ))],
        vec![ModelClause::WriteToCache {
            kind: "class".to_string(),
            name: vec![
                CacheNameTemplate::Literal("cls:".to_string()),
                CacheNameTemplate::Capture("class".to_string()),
            ],
        }],
    );
    let read = query(
        "taint-bar-bucket",
        vec![Constraint::ReadFromCache {
            kind: "class".to_string(),
            name: "cls:Bar".to_string(),
        }],
        vec![ModelClause::Return(vec![Production::TaintAnnotation(
            TaintAnnotation::source("UserControlled"),
        )])],
    );

    let (registry_map, errors) = generate_models_from_queries(
        SchedulePolicy::default(),
        &hierarchy,
        None,
        &modelables,
        &[write, read],
    );
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");

    let registry = registry_map
        .registry("taint-bar-bucket")
        .expect("bucket read produced a model");
    let modeled: Vec<&str> = registry.models.keys().map(|target| target.name()).collect();
    assert_eq!(modeled, vec!["app.Bar.handle"]);
}
