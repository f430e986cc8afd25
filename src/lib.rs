//! taintflow: the issue engine of a static taint analysis for
//! dynamically typed code.
//!
//! Given, per function definition, a forward taint tree (reachable
//! sources) and a backward taint tree (reached sinks) plus a rule set,
//! the engine:
//!
//! 1. Enumerates source→sink flow pairs per (location, sink handle)
//!    ([`flow`]).
//! 2. Applies rule-specific filtering: sanitize-transform refinement to a
//!    fixed point, named-transform splits, and multi-source triggering
//!    ([`flow::sanitize`], [`flow::transform`], [`flow::triggered`]).
//! 3. Emits canonical issues with stable handles, joined per handle
//!    ([`issue`]).
//!
//! Separately, [`query`] executes model queries against potential targets
//! before whole-program analysis: constraint matching, taint-annotation
//! projection, and the two-phase write-to-cache / read-from-cache
//! protocol.
//!
//! The host owns parsing, type resolution, and scheduling policy; this
//! crate owns the flow semantics. All core operations are deterministic:
//! per-definition work is single-threaded, cross-definition merges are
//! commutative and associative.

pub mod buildmap;
pub mod config;
pub mod error;
pub mod flow;
pub mod hierarchy;
pub mod issue;
pub mod query;
pub mod scheduler;
pub mod taint;
pub mod types;

pub use buildmap::{merge_build_maps, BuildMap};
pub use config::{MultiSourceGroup, PartialLabel, Rule, TaintConfig};
pub use error::{Result, TaintError, VerificationError};
pub use flow::triggered::{
    check_triggered_flows, commit_triggered_sinks, TriggeredSinkLocations, TriggeredSinkMap,
};
pub use flow::{check_flow, Candidate, Candidates, Flow};
pub use hierarchy::ClassHierarchyGraph;
pub use issue::engine::generate_issues;
pub use issue::{to_json, Issue, IssueHandle, SinkHandle};
pub use query::executor::{generate_models_from_queries, SourceSinkFilter};
pub use query::modelable::Modelable;
pub use query::{ModelQuery, ModelQueryRegistryMap};
pub use scheduler::{map_reduce, SchedulePolicy};
pub use types::{Location, Target};
