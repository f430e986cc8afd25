//! Rule configuration.
//!
//! A rule pairs source kinds with sink kinds under an issue code. Rules
//! with named transforms additionally require the transform chain to occur
//! between source and sink. Multi-source groups declare the two labeled
//! halves of a partial sink and which source kinds trigger each half.
//!
//! The configuration is read-only shared state: it is built once by the
//! host and threaded by reference through the engine.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaintError};
use crate::taint::{PartialSink, SinkKind, SourceKind, TransformId};

// =============================================================================
// Rules
// =============================================================================

/// A user-defined source-kind × sink-kind pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Stable issue code.
    pub code: u32,
    /// Base names of matching source kinds.
    pub sources: Vec<String>,
    /// Base names of matching sink kinds. For a multi-source rule this is
    /// the partial-sink group name.
    pub sinks: Vec<String>,
    /// Named transforms required between source and sink, in order.
    #[serde(default)]
    pub transforms: Vec<TransformId>,
    /// Short rule name for reports.
    pub name: String,
    /// Message template; `{$sources}`, `{$sinks}` and `{$transforms}` are
    /// substituted at issue-rendering time.
    pub message_format: String,
    /// Targets this rule is expected to model (audited post-run).
    #[serde(default)]
    pub expected_models: Vec<String>,
    /// Targets this rule must not model (audited post-run).
    #[serde(default)]
    pub unexpected_models: Vec<String>,
}

impl Rule {
    /// Every way to split the required transform chain into a source-side
    /// prefix (already applied on the source trace) and a sink-side suffix
    /// (still to be applied before the sink).
    pub fn transform_splits(&self) -> Vec<(&[TransformId], &[TransformId])> {
        (0..=self.transforms.len())
            .map(|i| self.transforms.split_at(i))
            .collect()
    }

    /// Substitute `{$sources}`, `{$sinks}` and `{$transforms}` with
    /// comma-joined sorted deduplicated names.
    pub fn render_message(&self, sources: &BTreeSet<String>, sinks: &BTreeSet<String>) -> String {
        let join = |names: &BTreeSet<String>| names.iter().cloned().collect::<Vec<_>>().join(", ");
        self.message_format
            .replace("{$sources}", &join(sources))
            .replace("{$sinks}", &join(sinks))
            .replace("{$transforms}", &self.transforms.join(", "))
    }
}

// =============================================================================
// Multi-source groups
// =============================================================================

/// One labeled half of a multi-source group: the sources that trigger it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialLabel {
    pub label: String,
    /// Base names of source kinds that trigger this half.
    pub sources: Vec<String>,
}

/// A two-half partial sink declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSourceGroup {
    /// Partial-sink group name, e.g. `UC_and_VC`.
    pub name: String,
    pub first: PartialLabel,
    pub second: PartialLabel,
}

impl MultiSourceGroup {
    /// The complementary label within this group.
    pub fn complement(&self, label: &str) -> Option<&PartialLabel> {
        if self.first.label == label {
            Some(&self.second)
        } else if self.second.label == label {
            Some(&self.first)
        } else {
            None
        }
    }

    fn half(&self, label: &str) -> Option<&PartialLabel> {
        if self.first.label == label {
            Some(&self.first)
        } else if self.second.label == label {
            Some(&self.second)
        } else {
            None
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// The full rule configuration threaded through the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaintConfig {
    /// Rules in declaration order. Order is observable: issue generation
    /// applies rules in this order.
    pub rules: Vec<Rule>,
    /// Multi-source partial sink groups.
    #[serde(default)]
    pub multi_source_groups: Vec<MultiSourceGroup>,
    /// Emit one issue per access path instead of joining per handle.
    #[serde(default)]
    pub lineage_analysis: bool,
    /// Breadcrumbs added when a source subtree is collapsed for matching.
    #[serde(default = "default_widen_breadcrumbs")]
    pub widen_breadcrumbs: Vec<String>,
}

fn default_widen_breadcrumbs() -> Vec<String> {
    vec!["broadening".to_string()]
}

impl Default for TaintConfig {
    fn default() -> Self {
        Self::with_rules(Vec::new())
    }
}

impl TaintConfig {
    /// A configuration with the given rules and defaults elsewhere.
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            multi_source_groups: Vec::new(),
            lineage_analysis: false,
            widen_breadcrumbs: default_widen_breadcrumbs(),
        }
    }

    /// Look up a rule by code. An issue referencing a code with no rule is
    /// a broken configuration.
    pub fn rule_for_code(&self, code: u32) -> Result<&Rule> {
        self.rules
            .iter()
            .find(|rule| rule.code == code)
            .ok_or_else(|| TaintError::Config(format!("no rule with code {code}")))
    }

    /// When `source` reaches the declared half `partial`, the triggered
    /// sink to remember is the *complementary* half of the group: the flow
    /// completes once that half sees its own source.
    pub fn get_triggered_sink(
        &self,
        partial: &PartialSink,
        source: &SourceKind,
    ) -> Option<SinkKind> {
        let group = self
            .multi_source_groups
            .iter()
            .find(|group| group.name == partial.name)?;
        let half = group.half(&partial.label)?;
        if !half.sources.iter().any(|name| name == &source.name) {
            return None;
        }
        let complement = group.complement(&partial.label)?;
        Some(SinkKind::Triggered(PartialSink {
            name: group.name.clone(),
            label: complement.label.clone(),
        }))
    }
}
