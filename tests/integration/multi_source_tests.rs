//! Multi-source (combined) rule protocol, end to end.

use taintflow::config::{MultiSourceGroup, PartialLabel, Rule, TaintConfig};
use taintflow::flow::triggered::{
    check_triggered_flows, commit_triggered_sinks, TriggeredSinkLocations, TriggeredSinkMap,
};
use taintflow::flow::Candidates;
use taintflow::issue::engine::generate_issues;
use taintflow::issue::SinkHandle;
use taintflow::taint::{AccessPath, CallInfo, Frame, SinkKind, SourceKind, Taint, TaintTree};
use taintflow::types::{Location, Target};

fn config() -> TaintConfig {
    TaintConfig {
        rules: vec![Rule {
            code: 4,
            sources: vec![
                "UserControlled".to_string(),
                "PermissiveContext".to_string(),
            ],
            sinks: vec!["UC_and_VC".to_string()],
            transforms: Vec::new(),
            name: "user data with permissive context".to_string(),
            message_format: "{$sources} meet at a combined sink".to_string(),
            expected_models: Vec::new(),
            unexpected_models: Vec::new(),
        }],
        multi_source_groups: vec![MultiSourceGroup {
            name: "UC_and_VC".to_string(),
            first: PartialLabel {
                label: "uc".to_string(),
                sources: vec!["UserControlled".to_string()],
            },
            second: PartialLabel {
                label: "vc".to_string(),
                sources: vec!["PermissiveContext".to_string()],
            },
        }],
        ..TaintConfig::default()
    }
}

fn location(line: u32) -> Location {
    Location::new("app/render.py", line, 0, 16)
}

fn call_handle(parameter: &str) -> SinkHandle {
    SinkHandle::Call {
        callee: Target::new("template.render"),
        index: 0,
        parameter: parameter.to_string(),
    }
}

fn source_tree(kind: &str, line: u32) -> taintflow::taint::ForwardTaintTree {
    TaintTree::create_leaf(
        &AccessPath::root(),
        Taint::singleton(
            CallInfo::Origin(location(line)),
            SourceKind::named(kind),
            Frame::initial(),
        ),
    )
}

fn partial_sink_tree(label: &str, line: u32) -> taintflow::taint::BackwardTaintTree {
    TaintTree::create_leaf(
        &AccessPath::root(),
        Taint::singleton(
            CallInfo::Origin(location(line)),
            SinkKind::partial("UC_and_VC", label),
            Frame::initial(),
        ),
    )
}

#[test]
fn two_halves_promote_and_cross_reference() {
    let config = config();
    let define = Target::new("app.render.page");
    let mut candidates = Candidates::new();
    let mut triggered = TriggeredSinkMap::new();

    // Call 1: user data reaches the `uc` half.
    check_triggered_flows(
        &mut candidates,
        &mut triggered,
        &config,
        &define,
        &location(10),
        &call_handle("data"),
        &source_tree("UserControlled", 3),
        &partial_sink_tree("uc", 10),
    );

    // Half-triggered: the complement is remembered, nothing promoted yet.
    let entry = triggered
        .get("TriggeredPartialSink[UC_and_VC[vc]]")
        .expect("vc half remembered");
    assert_eq!(entry.sink.label, "vc");
    let first_half_handles = entry.multi_source_issue_handles.clone();
    assert_eq!(first_half_handles.len(), 1);
    assert!(candidates.is_empty());

    // Call 2: permissive context reaches the `vc` half.
    check_triggered_flows(
        &mut candidates,
        &mut triggered,
        &config,
        &define,
        &location(20),
        &call_handle("context"),
        &source_tree("PermissiveContext", 5),
        &partial_sink_tree("vc", 20),
    );

    // Fully triggered: both candidates promoted.
    assert_eq!(candidates.len(), 2);

    // The handle sets now cross-reference each other in both directions.
    let uc_entry = triggered
        .get("TriggeredPartialSink[UC_and_VC[vc]]")
        .unwrap();
    let vc_entry = triggered
        .get("TriggeredPartialSink[UC_and_VC[uc]]")
        .unwrap();
    assert_eq!(
        uc_entry.multi_source_issue_handles,
        vc_entry.multi_source_issue_handles
    );
    assert_eq!(uc_entry.multi_source_issue_handles.len(), 2);
    assert!(uc_entry
        .multi_source_issue_handles
        .is_superset(&first_half_handles));

    // Issue generation yields one issue per half, both with the rule code.
    let issues = generate_issues(&candidates, &config, &define);
    assert_eq!(issues.len(), 2);
    for issue in &issues {
        assert_eq!(issue.handle.code, 4);
        assert!(uc_entry.multi_source_issue_handles.contains(&issue.handle));
    }
}

#[test]
fn lone_half_stays_provisional() {
    let config = config();
    let define = Target::new("app.render.page");
    let mut candidates = Candidates::new();
    let mut triggered = TriggeredSinkMap::new();

    check_triggered_flows(
        &mut candidates,
        &mut triggered,
        &config,
        &define,
        &location(10),
        &call_handle("data"),
        &source_tree("UserControlled", 3),
        &partial_sink_tree("uc", 10),
    );

    assert!(candidates.is_empty());
    assert!(generate_issues(&candidates, &config, &define).is_empty());
}

#[test]
fn triggered_taint_propagates_through_the_location_map() {
    let config = config();
    let define = Target::new("app.render.page");
    let mut candidates = Candidates::new();
    let mut triggered = TriggeredSinkMap::new();

    check_triggered_flows(
        &mut candidates,
        &mut triggered,
        &config,
        &define,
        &location(10),
        &call_handle("data"),
        &source_tree("UserControlled", 3),
        &partial_sink_tree("uc", 10),
    );

    let mut locations = TriggeredSinkLocations::new();
    commit_triggered_sinks(triggered, &location(10), &mut locations);

    let tree = locations
        .get(&location(10))
        .expect("the call's triggered state is recorded");
    let collapsed = tree.collapse(&[]);
    let kinds = collapsed.kinds();
    assert_eq!(kinds.len(), 1);
    assert_eq!(kinds[0].to_string(), "TriggeredPartialSink[UC_and_VC[vc]]");

    // The propagated frame carries the first-hop extra trace.
    let (_, _, frame) = collapsed.iter().next().unwrap();
    assert_eq!(frame.extra_traces.len(), 1);
    let extra = frame.extra_traces.iter().next().unwrap();
    assert_eq!(extra.leaf_kind, "source UserControlled");
    assert!(extra.message.is_none());
}

#[test]
fn both_halves_at_one_call_promote_immediately() {
    let config = config();
    let define = Target::new("app.render.page");
    let mut candidates = Candidates::new();
    let mut triggered = TriggeredSinkMap::new();

    // Both sources and both halves meet at a single call site.
    let sources =
        source_tree("UserControlled", 3).join(&source_tree("PermissiveContext", 4));
    let sinks = partial_sink_tree("uc", 10).join(&partial_sink_tree("vc", 10));

    check_triggered_flows(
        &mut candidates,
        &mut triggered,
        &config,
        &define,
        &location(10),
        &call_handle("data"),
        &sources,
        &sinks,
    );

    assert!(!candidates.is_empty());
    let issues = generate_issues(&candidates, &config, &define);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].handle.code, 4);
}
