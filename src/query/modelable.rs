//! Modelables: the targets a query can match.
//!
//! A tagged variant with three cases (callable, attribute, global) and a
//! small operation vocabulary. Operations invalid for a case (parameters
//! of an attribute, say) return an error rather than a silent default.
//!
//! Callable signatures are resolved lazily: resolution is deterministic,
//! so a per-target one-shot memo cell is sound and saves the resolver call
//! for targets no query ever inspects deeply.

use std::fmt;

use once_cell::sync::OnceCell;

use crate::error::{Result, TaintError};
use crate::types::Target;

/// One formal parameter of a callable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub index: usize,
    pub annotation: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
            annotation: None,
        }
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    /// Parameter name with the positional-only sigil stripped.
    pub fn sanitized_name(&self) -> &str {
        self.name.trim_start_matches("__").trim_start_matches('$')
    }
}

/// One decorator application on a callable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decorator {
    pub name: String,
    pub positional: Vec<String>,
    pub keyword: Vec<(String, String)>,
}

impl Decorator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            positional: Vec::new(),
            keyword: Vec::new(),
        }
    }
}

/// A callable's resolved signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionSignature {
    pub parameters: Vec<Parameter>,
    pub return_annotation: Option<String>,
    pub decorators: Vec<Decorator>,
    /// Line of the definition, for issue output.
    pub line: u32,
}

/// One-shot lazily resolved signature.
pub struct LazySignature {
    cell: OnceCell<FunctionSignature>,
    resolve: Box<dyn Fn() -> FunctionSignature + Send + Sync>,
}

impl LazySignature {
    /// Resolve on first use through the given thunk.
    pub fn new(resolve: impl Fn() -> FunctionSignature + Send + Sync + 'static) -> Self {
        Self {
            cell: OnceCell::new(),
            resolve: Box::new(resolve),
        }
    }

    /// Already-resolved signature.
    pub fn resolved(signature: FunctionSignature) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(signature);
        Self {
            cell,
            resolve: Box::new(FunctionSignature::default),
        }
    }

    pub fn get(&self) -> &FunctionSignature {
        self.cell.get_or_init(|| (self.resolve)())
    }
}

impl fmt::Debug for LazySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.get() {
            Some(signature) => write!(f, "LazySignature(resolved: {signature:?})"),
            None => write!(f, "LazySignature(pending)"),
        }
    }
}

/// An analysis target a query can match.
#[derive(Debug)]
pub enum Modelable {
    /// A function or method. Methods carry their defining class.
    Callable {
        target: Target,
        class_name: Option<String>,
        signature: LazySignature,
    },
    /// A class attribute.
    Attribute {
        class_name: String,
        name: String,
        annotation: Option<String>,
    },
    /// A module-level global.
    Global {
        target: Target,
        annotation: Option<String>,
    },
}

impl Modelable {
    pub fn function(target: impl Into<Target>, signature: FunctionSignature) -> Self {
        Modelable::Callable {
            target: target.into(),
            class_name: None,
            signature: LazySignature::resolved(signature),
        }
    }

    pub fn method(
        target: impl Into<Target>,
        class_name: impl Into<String>,
        signature: FunctionSignature,
    ) -> Self {
        Modelable::Callable {
            target: target.into(),
            class_name: Some(class_name.into()),
            signature: LazySignature::resolved(signature),
        }
    }

    /// The fully qualified target.
    pub fn target(&self) -> Target {
        match self {
            Modelable::Callable { target, .. } | Modelable::Global { target, .. } => {
                target.clone()
            }
            Modelable::Attribute {
                class_name, name, ..
            } => Target::new(format!("{class_name}.{name}")),
        }
    }

    /// The unqualified name.
    pub fn name(&self) -> String {
        match self {
            Modelable::Callable { target, .. } | Modelable::Global { target, .. } => {
                target.last_segment().to_string()
            }
            Modelable::Attribute { name, .. } => name.clone(),
        }
    }

    /// The defining class, when there is one.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Modelable::Callable { class_name, .. } => class_name.as_deref(),
            Modelable::Attribute { class_name, .. } => Some(class_name),
            Modelable::Global { .. } => None,
        }
    }

    /// Type annotation of an attribute or global.
    pub fn type_annotation(&self) -> Result<Option<&str>> {
        match self {
            Modelable::Attribute { annotation, .. } | Modelable::Global { annotation, .. } => {
                Ok(annotation.as_deref())
            }
            Modelable::Callable { target, .. } => Err(TaintError::InvalidArgument(format!(
                "callable {target} has no type annotation; use the return annotation"
            ))),
        }
    }

    /// Return annotation of a callable.
    pub fn return_annotation(&self) -> Result<Option<&str>> {
        match self {
            Modelable::Callable { signature, .. } => {
                Ok(signature.get().return_annotation.as_deref())
            }
            other => Err(TaintError::InvalidArgument(format!(
                "{} is not a callable",
                other.target()
            ))),
        }
    }

    /// Parameters of a callable.
    pub fn parameters(&self) -> Result<&[Parameter]> {
        match self {
            Modelable::Callable { signature, .. } => Ok(&signature.get().parameters),
            other => Err(TaintError::InvalidArgument(format!(
                "{} is not a callable",
                other.target()
            ))),
        }
    }

    /// Decorators of a callable.
    pub fn decorators(&self) -> Result<&[Decorator]> {
        match self {
            Modelable::Callable { signature, .. } => Ok(&signature.get().decorators),
            other => Err(TaintError::InvalidArgument(format!(
                "{} is not a callable",
                other.target()
            ))),
        }
    }

    /// Line of the definition, when known.
    pub fn line(&self) -> u32 {
        match self {
            Modelable::Callable { signature, .. } => signature.get().line,
            _ => 0,
        }
    }
}
