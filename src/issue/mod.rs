//! Issues and their stable handles.
//!
//! An issue is a flow that matched a rule at a sink. Its handle
//! `{code, callable, sink}` survives re-analysis: downstream tooling joins
//! and deduplicates on it, so two issues with equal handles must be joined
//! (except in lineage-analysis mode, which deliberately keeps one issue
//! per access path).

pub mod engine;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::TaintConfig;
use crate::error::Result;
use crate::flow::Flow;
use crate::taint::{CallInfo, TaintKind};
use crate::types::{Location, Target};

// =============================================================================
// Handles
// =============================================================================

/// Distinguishes the sink positions of one definition: which callee and
/// argument position, or which global write, received the flow.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SinkHandle {
    /// Flow into a parameter of a call. `index` disambiguates repeated
    /// calls to the same callee within the definition.
    Call {
        callee: Target,
        index: u32,
        parameter: String,
    },
    /// Flow into a global.
    Global { name: String },
    /// Flow out of the definition's return value.
    Return,
}

impl fmt::Display for SinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkHandle::Call {
                callee,
                index,
                parameter,
            } => write!(f, "{callee}:{index}:{parameter}"),
            SinkHandle::Global { name } => write!(f, "global:{name}"),
            SinkHandle::Return => write!(f, "return"),
        }
    }
}

/// Stable identifier of an issue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IssueHandle {
    pub code: u32,
    pub callable: Target,
    pub sink: SinkHandle,
}

impl IssueHandle {
    /// Canonical string form, the digest input for `master_handle`.
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.code, self.callable, self.sink)
    }

    /// Stable 32-character hex digest of the handle.
    pub fn master_handle(&self) -> String {
        format!("{:x}", md5::compute(self.canonical()))
    }
}

impl fmt::Display for IssueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

// =============================================================================
// Issues
// =============================================================================

/// A rule match at a sink, ready for reporting.
#[derive(Debug, Clone)]
pub struct Issue {
    /// The matched source/sink taint.
    pub flow: Flow,
    pub handle: IssueHandle,
    /// Every location the flow was observed at.
    pub locations: BTreeSet<Location>,
    /// The definition the issue belongs to.
    pub define: Target,
}

impl Issue {
    /// Join an issue with an equal handle: flows join pointwise, location
    /// sets union. The caller guarantees handle equality.
    pub fn join(&self, other: &Self) -> Self {
        debug_assert_eq!(self.handle, other.handle);
        Self {
            flow: self.flow.join(&other.flow),
            handle: self.handle.clone(),
            locations: self.locations.union(&other.locations).cloned().collect(),
            define: self.define.clone(),
        }
    }

    /// The canonical location: the minimum under the total location order.
    pub fn canonical_location(&self) -> &Location {
        self.locations
            .iter()
            .next()
            .expect("an issue always has at least one location")
    }

    /// Deduplicated breadcrumbs across both sides of the flow.
    pub fn features(&self) -> BTreeSet<String> {
        let mut features = self.flow.source_taint.joined_breadcrumbs();
        features.extend(self.flow.sink_taint.joined_breadcrumbs());
        features
    }
}

// =============================================================================
// JSON rendering
// =============================================================================

fn call_info_json(call_info: &CallInfo) -> Value {
    match call_info {
        CallInfo::Declaration => json!({ "kind": "declaration" }),
        CallInfo::Origin(location) => json!({ "kind": "origin", "location": location }),
        CallInfo::CallSite {
            callee,
            port,
            location,
        } => json!({
            "kind": "call",
            "callee": callee,
            "port": port,
            "location": location,
        }),
    }
}

fn trace_roots<K: TaintKind>(taint: &crate::taint::Taint<K>) -> Vec<Value> {
    taint.fold(Vec::new(), |mut acc, call_info, kind, frame| {
        acc.push(json!({
            "kind": kind.to_string(),
            "call_info": call_info_json(call_info),
            "length": frame.trace_length,
        }));
        acc
    })
}

/// Render an issue to the stable JSON schema. Fails with a configuration
/// error when the issue's code references no rule.
pub fn to_json(issue: &Issue, config: &TaintConfig, callable_line: u32) -> Result<Value> {
    let rule = config.rule_for_code(issue.handle.code)?;

    let source_names: BTreeSet<String> = issue
        .flow
        .source_taint
        .kinds()
        .iter()
        .filter_map(|kind| kind.base_name().map(str::to_string))
        .collect();
    let sink_names: BTreeSet<String> = issue
        .flow
        .sink_taint
        .kinds()
        .iter()
        .filter_map(|kind| kind.base_name().map(str::to_string))
        .collect();

    let location = issue.canonical_location();
    Ok(json!({
        "callable": issue.handle.callable,
        "callable_line": callable_line,
        "code": issue.handle.code,
        "line": location.line,
        "start": location.start,
        "end": location.end,
        "filename": location.path,
        "message": rule.render_message(&source_names, &sink_names),
        "traces": [
            { "name": "forward", "roots": trace_roots(&issue.flow.source_taint) },
            { "name": "backward", "roots": trace_roots(&issue.flow.sink_taint) },
        ],
        "features": issue.features().into_iter().collect::<Vec<_>>(),
        "sink_handle": issue.handle.sink.to_string(),
        "master_handle": issue.handle.master_handle(),
    }))
}
