//! Source and sink kind algebra.
//!
//! A kind names a category of taint (`UserControlled`, `Sql`, ...) and
//! optionally carries three refinements:
//!
//! - a *subkind*: a string discriminator for parametric kinds
//!   (`UserControlled[header]`);
//! - *sanitize transforms*: two disjoint name sets recording which
//!   complementary kinds were sanitized along the trace
//!   (`NotSink[Sql]@UserControlled` cannot reach a `Sql` sink);
//! - *named transforms*: the ordered list of transform labels the data
//!   passed through (`T1:T2:UserControlled`).
//!
//! Sinks additionally come in *partial* and *triggered* forms for
//! multi-source rules: a partial sink declares one labeled half of a
//! two-source meeting point, and a triggered sink records that the
//! complementary half has already seen its source.
//!
//! Two kinds are equal iff all components are equal.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Label of a named transform (`T1`, `UrlDecode`, ...).
pub type TransformId = String;

// =============================================================================
// Sanitize transforms
// =============================================================================

/// The sanitize-transform payload of a kind: which source kinds and which
/// sink kinds were sanitized along the trace. The two sets are disjoint by
/// construction (source names and sink names live in separate namespaces).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SanitizeTransforms {
    /// Names of sanitized source kinds (`NotSource[...]`).
    pub sources: BTreeSet<String>,
    /// Names of sanitized sink kinds (`NotSink[...]`).
    pub sinks: BTreeSet<String>,
}

impl SanitizeTransforms {
    /// The empty payload.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Payload sanitizing the given sink kind names.
    pub fn sinks<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> Self {
        Self {
            sources: BTreeSet::new(),
            sinks: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Payload sanitizing the given source kind names.
    pub fn sources<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> Self {
        Self {
            sources: names.into_iter().map(Into::into).collect(),
            sinks: BTreeSet::new(),
        }
    }

    /// True when neither set carries a name.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.sinks.is_empty()
    }
}

impl fmt::Display for SanitizeTransforms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        for source in &self.sources {
            parts.push(format!("NotSource[{source}]"));
        }
        for sink in &self.sinks {
            parts.push(format!("NotSink[{sink}]"));
        }
        write!(f, "{}", parts.join(":"))
    }
}

// =============================================================================
// Kind operations
// =============================================================================

/// Operations shared by source and sink kinds. The flow engine is generic
/// over this vocabulary; it never inspects kinds beyond it.
pub trait TaintKind: Clone + Ord + Hash + fmt::Display {
    /// Drop the subkind discriminator, keeping everything else.
    fn discard_subkind(&self) -> Self;

    /// Drop the named-transform list, keeping everything else.
    fn discard_transforms(&self) -> Self;

    /// Drop the sanitize-transform payload, keeping everything else.
    fn discard_sanitize_transforms(&self) -> Self;

    /// The sanitize-transform payload carried by this kind.
    fn extract_sanitize_transforms(&self) -> &SanitizeTransforms;

    /// The named-transform list carried by this kind.
    fn named_transforms(&self) -> &[TransformId];

    /// True when the kind carries at least one sanitize transform.
    fn contains_sanitize_transforms(&self) -> bool {
        !self.extract_sanitize_transforms().is_empty()
    }

    /// The kind's base name, used to match rule source/sink lists. `None`
    /// for kinds rules cannot name directly (undischarged partial sinks).
    fn base_name(&self) -> Option<&str>;

    /// The base of the kind under `discard_sanitize_transforms ∘
    /// discard_subkind`, when that base is a plain named kind. `None` when
    /// named transforms remain or the kind has no base name.
    fn named_base(&self) -> Option<&str> {
        if self.named_transforms().is_empty() {
            self.base_name()
        } else {
            None
        }
    }

    /// True when a sanitizer for the given kind names removes this kind.
    /// Kinds still carrying named transforms are not removed: the transform
    /// chain separates them from the sanitized base.
    fn is_sanitized_by(&self, names: &BTreeSet<String>) -> bool {
        match self.named_base() {
            Some(base) => names.contains(base),
            None => false,
        }
    }
}

// =============================================================================
// Source kinds
// =============================================================================

/// A source kind with its optional refinements.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceKind {
    /// Base name, e.g. `UserControlled`.
    pub name: String,
    /// Optional subkind discriminator.
    pub subkind: Option<String>,
    /// Sanitizers applied along the trace.
    pub sanitize: SanitizeTransforms,
    /// Named transforms applied along the trace, outermost first.
    pub transforms: Vec<TransformId>,
}

impl SourceKind {
    /// A plain named source kind.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subkind: None,
            sanitize: SanitizeTransforms::empty(),
            transforms: Vec::new(),
        }
    }

    /// Attach a subkind discriminator.
    pub fn with_subkind(mut self, subkind: impl Into<String>) -> Self {
        self.subkind = Some(subkind.into());
        self
    }

    /// Attach a sanitize-transform payload.
    pub fn with_sanitize(mut self, sanitize: SanitizeTransforms) -> Self {
        self.sanitize = sanitize;
        self
    }

    /// Attach a named-transform chain, outermost first.
    pub fn with_transforms<I: IntoIterator<Item = S>, S: Into<String>>(mut self, ids: I) -> Self {
        self.transforms = ids.into_iter().map(Into::into).collect();
        self
    }
}

impl TaintKind for SourceKind {
    fn discard_subkind(&self) -> Self {
        Self {
            subkind: None,
            ..self.clone()
        }
    }

    fn discard_transforms(&self) -> Self {
        Self {
            transforms: Vec::new(),
            ..self.clone()
        }
    }

    fn discard_sanitize_transforms(&self) -> Self {
        Self {
            sanitize: SanitizeTransforms::empty(),
            ..self.clone()
        }
    }

    fn extract_sanitize_transforms(&self) -> &SanitizeTransforms {
        &self.sanitize
    }

    fn named_transforms(&self) -> &[TransformId] {
        &self.transforms
    }

    fn base_name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.sanitize.is_empty() {
            write!(f, "{}:", self.sanitize)?;
        }
        for transform in &self.transforms {
            write!(f, "{transform}:")?;
        }
        write!(f, "{}", self.name)?;
        if let Some(subkind) = &self.subkind {
            write!(f, "[{subkind}]")?;
        }
        Ok(())
    }
}

// =============================================================================
// Sink kinds
// =============================================================================

/// One labeled half of a two-source meeting point, e.g. the `uc` half of
/// `UserControlled_and_PermissiveContext`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartialSink {
    /// Name of the multi-source group, e.g. `UC_and_VC`.
    pub name: String,
    /// Label of this half within the group.
    pub label: String,
}

impl fmt::Display for PartialSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.label)
    }
}

/// A sink kind: a plain named sink, a declared partial sink, or a
/// triggered partial sink whose complementary half already saw a source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SinkKind {
    /// A regular sink kind with the same refinements as a source kind.
    Named {
        name: String,
        subkind: Option<String>,
        sanitize: SanitizeTransforms,
        transforms: Vec<TransformId>,
    },
    /// A declared, not-yet-triggered partial sink.
    Partial(PartialSink),
    /// A partial sink whose complement has been triggered by a source.
    Triggered(PartialSink),
}

impl SinkKind {
    /// A plain named sink kind.
    pub fn named(name: impl Into<String>) -> Self {
        SinkKind::Named {
            name: name.into(),
            subkind: None,
            sanitize: SanitizeTransforms::empty(),
            transforms: Vec::new(),
        }
    }

    /// A declared partial sink.
    pub fn partial(name: impl Into<String>, label: impl Into<String>) -> Self {
        SinkKind::Partial(PartialSink {
            name: name.into(),
            label: label.into(),
        })
    }

    /// Attach a subkind discriminator (named sinks only).
    pub fn with_subkind(self, subkind: impl Into<String>) -> Self {
        match self {
            SinkKind::Named {
                name,
                sanitize,
                transforms,
                ..
            } => SinkKind::Named {
                name,
                subkind: Some(subkind.into()),
                sanitize,
                transforms,
            },
            other => other,
        }
    }

    /// Attach a sanitize-transform payload (named sinks only).
    pub fn with_sanitize(self, payload: SanitizeTransforms) -> Self {
        match self {
            SinkKind::Named {
                name,
                subkind,
                transforms,
                ..
            } => SinkKind::Named {
                name,
                subkind,
                sanitize: payload,
                transforms,
            },
            other => other,
        }
    }

    /// Attach a named-transform chain (named sinks only).
    pub fn with_transforms<I: IntoIterator<Item = S>, S: Into<String>>(self, ids: I) -> Self {
        match self {
            SinkKind::Named {
                name,
                subkind,
                sanitize,
                ..
            } => SinkKind::Named {
                name,
                subkind,
                sanitize,
                transforms: ids.into_iter().map(Into::into).collect(),
            },
            other => other,
        }
    }

    /// The partial sink behind a partial or triggered kind.
    pub fn as_partial(&self) -> Option<&PartialSink> {
        match self {
            SinkKind::Partial(partial) | SinkKind::Triggered(partial) => Some(partial),
            SinkKind::Named { .. } => None,
        }
    }
}

static NO_SANITIZE: once_cell::sync::Lazy<SanitizeTransforms> =
    once_cell::sync::Lazy::new(SanitizeTransforms::empty);

impl TaintKind for SinkKind {
    fn discard_subkind(&self) -> Self {
        match self {
            SinkKind::Named {
                name,
                sanitize,
                transforms,
                ..
            } => SinkKind::Named {
                name: name.clone(),
                subkind: None,
                sanitize: sanitize.clone(),
                transforms: transforms.clone(),
            },
            other => other.clone(),
        }
    }

    fn discard_transforms(&self) -> Self {
        match self {
            SinkKind::Named {
                name,
                subkind,
                sanitize,
                ..
            } => SinkKind::Named {
                name: name.clone(),
                subkind: subkind.clone(),
                sanitize: sanitize.clone(),
                transforms: Vec::new(),
            },
            other => other.clone(),
        }
    }

    fn discard_sanitize_transforms(&self) -> Self {
        match self {
            SinkKind::Named {
                name,
                subkind,
                transforms,
                ..
            } => SinkKind::Named {
                name: name.clone(),
                subkind: subkind.clone(),
                sanitize: SanitizeTransforms::empty(),
                transforms: transforms.clone(),
            },
            other => other.clone(),
        }
    }

    fn extract_sanitize_transforms(&self) -> &SanitizeTransforms {
        match self {
            SinkKind::Named { sanitize, .. } => sanitize,
            _ => &NO_SANITIZE,
        }
    }

    fn named_transforms(&self) -> &[TransformId] {
        match self {
            SinkKind::Named { transforms, .. } => transforms,
            _ => &[],
        }
    }

    fn base_name(&self) -> Option<&str> {
        match self {
            SinkKind::Named { name, .. } => Some(name),
            // Rules name the multi-source group; its triggered halves match.
            SinkKind::Triggered(partial) => Some(&partial.name),
            SinkKind::Partial(_) => None,
        }
    }

    fn named_base(&self) -> Option<&str> {
        match self {
            SinkKind::Named { name, transforms, .. } if transforms.is_empty() => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Named {
                name,
                subkind,
                sanitize,
                transforms,
            } => {
                if !sanitize.is_empty() {
                    write!(f, "{sanitize}:")?;
                }
                for transform in transforms {
                    write!(f, "{transform}:")?;
                }
                write!(f, "{name}")?;
                if let Some(subkind) = subkind {
                    write!(f, "[{subkind}]")?;
                }
                Ok(())
            }
            SinkKind::Partial(partial) => write!(f, "PartialSink[{partial}]"),
            SinkKind::Triggered(partial) => write!(f, "TriggeredPartialSink[{partial}]"),
        }
    }
}
