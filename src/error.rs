//! Central error types for taintflow.
//!
//! Uses `thiserror` for ergonomic error definitions with automatic
//! `Display` and `From` implementations.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum TaintError {
    /// Malformed JSON from an external producer (e.g. the build-system bridge)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration: an issue references an unknown rule code, a
    /// read-from-cache query evaluates to an unrestricted candidate set, or
    /// a write-to-cache query mixes in non-cache model clauses
    #[error("Configuration error: {0}")]
    Config(String),

    /// Two merged maps assign the same key to different values. The
    /// offending entry is dropped and analysis continues on the remainder.
    #[error("Incompatible merge for key {key}: {left} vs {right}")]
    IncompatibleMergeItem {
        key: String,
        left: String,
        right: String,
    },

    /// Post-execution model audit finding. Accumulated, never fatal.
    #[error("{0}")]
    Verification(#[from] VerificationError),

    /// Invalid argument provided to a function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Post-execution audit findings for model queries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// An expected model was not produced by the query
    #[error("Query `{query}` did not produce the expected model for `{target}`")]
    Expected { query: String, target: String },

    /// A model the query must not produce was produced anyway
    #[error("Query `{query}` produced an unexpected model for `{target}`")]
    Unexpected { query: String, target: String },

    /// The query produced no models at all
    #[error("Query `{query}` produced no models")]
    NoOutput { query: String },
}

/// Convenience type alias for Results using TaintError.
pub type Result<T> = std::result::Result<T, TaintError>;
