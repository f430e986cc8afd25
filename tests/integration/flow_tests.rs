//! End-to-end flow matching and issue generation.

use taintflow::config::{Rule, TaintConfig};
use taintflow::flow::{check_flow, Candidates};
use taintflow::issue::engine::generate_issues;
use taintflow::issue::{to_json, SinkHandle};
use taintflow::taint::{
    AccessPath, BackwardTaintTree, CallInfo, ForwardTaintTree, Frame, SanitizeTransforms, SinkKind,
    SourceKind, Taint, TaintTree,
};
use taintflow::types::{Location, Target};

fn rule(code: u32, sources: &[&str], sinks: &[&str], transforms: &[&str]) -> Rule {
    Rule {
        code,
        sources: sources.iter().map(|s| s.to_string()).collect(),
        sinks: sinks.iter().map(|s| s.to_string()).collect(),
        transforms: transforms.iter().map(|t| t.to_string()).collect(),
        name: format!("rule-{code}"),
        message_format: "Data from {$sources} may reach {$sinks}".to_string(),
        expected_models: Vec::new(),
        unexpected_models: Vec::new(),
    }
}

fn location() -> Location {
    Location::new("app/views.py", 42, 8, 31)
}

fn sink_handle() -> SinkHandle {
    SinkHandle::Call {
        callee: Target::new("sqlite3.Cursor.execute"),
        index: 0,
        parameter: "query".to_string(),
    }
}

fn source_tree(kind: SourceKind) -> ForwardTaintTree {
    TaintTree::create_leaf(
        &AccessPath::root(),
        Taint::singleton(CallInfo::Origin(location()), kind, Frame::initial()),
    )
}

fn sink_tree(kind: SinkKind) -> BackwardTaintTree {
    TaintTree::create_leaf(
        &AccessPath::root(),
        Taint::singleton(CallInfo::Origin(location()), kind, Frame::initial()),
    )
}

fn run(
    config: &TaintConfig,
    source: ForwardTaintTree,
    sink: BackwardTaintTree,
) -> Vec<taintflow::issue::Issue> {
    let mut candidates = Candidates::new();
    check_flow(
        &mut candidates,
        config,
        &location(),
        &sink_handle(),
        &source,
        &sink,
    );
    generate_issues(&candidates, config, &Target::new("app.views.fetch_user"))
}

#[test]
fn single_flow_single_rule_produces_one_issue() {
    let config = TaintConfig::with_rules(vec![rule(1, &["UserControlled"], &["Sql"], &[])]);
    let issues = run(
        &config,
        source_tree(SourceKind::named("UserControlled")),
        sink_tree(SinkKind::named("Sql")),
    );

    assert_eq!(issues.len(), 1);
    let issue = &issues[0];
    assert_eq!(issue.handle.code, 1);
    assert_eq!(issue.handle.callable.name(), "app.views.fetch_user");
    assert_eq!(issue.locations.len(), 1);
    assert_eq!(issue.canonical_location(), &location());
}

#[test]
fn issue_json_has_the_stable_schema() {
    let config = TaintConfig::with_rules(vec![rule(1, &["UserControlled"], &["Sql"], &[])]);
    let issues = run(
        &config,
        source_tree(SourceKind::named("UserControlled")),
        sink_tree(SinkKind::named("Sql")),
    );
    let json = to_json(&issues[0], &config, 40).expect("rule 1 exists");

    assert_eq!(json["callable"], "app.views.fetch_user");
    assert_eq!(json["callable_line"], 40);
    assert_eq!(json["code"], 1);
    assert_eq!(json["line"], 42);
    assert_eq!(json["start"], 8);
    assert_eq!(json["end"], 31);
    assert_eq!(json["filename"], "app/views.py");
    assert_eq!(
        json["message"],
        "Data from UserControlled may reach Sql"
    );
    assert_eq!(json["traces"][0]["name"], "forward");
    assert_eq!(json["traces"][1]["name"], "backward");
    assert_eq!(json["sink_handle"], "sqlite3.Cursor.execute:0:query");

    let master = json["master_handle"].as_str().unwrap();
    assert_eq!(master.len(), 32);
    assert!(master.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn sanitizer_on_the_single_source_eliminates_the_issue() {
    // Source `Not[Sql]@UserControlled` cannot flow into a Sql sink.
    let config = TaintConfig::with_rules(vec![rule(1, &["UserControlled"], &["Sql"], &[])]);
    let issues = run(
        &config,
        source_tree(
            SourceKind::named("UserControlled").with_sanitize(SanitizeTransforms::sinks(["Sql"])),
        ),
        sink_tree(SinkKind::named("Sql")),
    );
    assert!(issues.is_empty());
}

#[test]
fn sanitizer_fixpoint_needs_two_passes_to_drain() {
    // source {Not[X]@A, Not[X]:Not[Y]@C}, sink {X, Not[A]@Y}: the first
    // refinement pass leaves C against Not[A]@Y, the second empties both.
    let config = TaintConfig::with_rules(vec![rule(3, &["A", "C"], &["X", "Y"], &[])]);
    let source = source_tree(
        SourceKind::named("A").with_sanitize(SanitizeTransforms::sinks(["X"])),
    )
    .join(&source_tree(
        SourceKind::named("C").with_sanitize(SanitizeTransforms::sinks(["X", "Y"])),
    ));
    let sink = sink_tree(SinkKind::named("X")).join(&sink_tree(
        SinkKind::named("Y").with_sanitize(SanitizeTransforms::sources(["A"])),
    ));
    assert!(run(&config, source, sink).is_empty());
}

#[test]
fn transform_split_matches_exactly_one_decomposition() {
    // Rule requires [T1, T2]; the source already carries T1 and the sink
    // still expects T2, so only the split ([T1], [T2]) matches.
    let config = TaintConfig::with_rules(vec![rule(5, &["A"], &["B"], &["T1", "T2"])]);
    let issues = run(
        &config,
        source_tree(SourceKind::named("A").with_transforms(["T1"])),
        sink_tree(SinkKind::named("B").with_transforms(["T2"])),
    );

    assert_eq!(issues.len(), 1);
    let flow = &issues[0].flow;
    let source_kinds = flow.source_taint.kinds();
    let sink_kinds = flow.sink_taint.kinds();
    assert_eq!(source_kinds.len(), 1);
    assert_eq!(source_kinds[0].to_string(), "T1:A");
    assert_eq!(sink_kinds.len(), 1);
    assert_eq!(sink_kinds[0].to_string(), "T2:B");
}

#[test]
fn transform_split_with_wrong_side_is_no_issue() {
    // The whole chain sits on the sink side but the source also carries a
    // transform the rule does not know about.
    let config = TaintConfig::with_rules(vec![rule(5, &["A"], &["B"], &["T1", "T2"])]);
    let issues = run(
        &config,
        source_tree(SourceKind::named("A").with_transforms(["T9"])),
        sink_tree(SinkKind::named("B").with_transforms(["T1", "T2"])),
    );
    assert!(issues.is_empty());
}

#[test]
fn deep_source_collapses_into_root_sink_with_widening_features() {
    let config = TaintConfig::with_rules(vec![rule(1, &["UserControlled"], &["Sql"], &[])]);
    // Only the `.query` field is tainted, but the whole object flows into
    // the sink: the collapse widens and records the projection.
    let source = TaintTree::create_leaf(
        &AccessPath::field("query"),
        Taint::singleton(
            CallInfo::Origin(location()),
            SourceKind::named("UserControlled"),
            Frame::initial(),
        ),
    );
    let sink = sink_tree(SinkKind::named("Sql"));

    let issues = run(&config, source, sink);
    assert_eq!(issues.len(), 1);
    let features = issues[0].features();
    assert!(features.contains("first-field:query"));
    assert!(features.contains("broadening"));
}
