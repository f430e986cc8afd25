//! Shared value types used across the engine.
//!
//! Locations carry a total order so that the canonical location of an issue
//! (the minimum of its location set) is well defined regardless of the
//! order in which call sites were analyzed.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A source location: file, line, and column span.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// File path, relative to the analysis root.
    pub path: String,
    /// Line number (1-indexed).
    pub line: u32,
    /// Start column (0-indexed).
    pub start: u32,
    /// End column (exclusive).
    pub end: u32,
}

impl Location {
    /// Create a new location.
    #[inline]
    pub fn new(path: impl Into<String>, line: u32, start: u32, end: u32) -> Self {
        Self {
            path: path.into(),
            line,
            start,
            end,
        }
    }

    /// Create a synthetic location for declarations without source.
    #[inline]
    pub fn synthetic() -> Self {
        Self {
            path: String::new(),
            line: 0,
            start: 0,
            end: 0,
        }
    }
}

impl PartialOrd for Location {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Location {
    fn cmp(&self, other: &Self) -> Ordering {
        // Line-first ordering; path breaks ties across files.
        (self.line, self.start, self.end, &self.path).cmp(&(
            other.line,
            other.start,
            other.end,
            &other.path,
        ))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}-{}", self.path, self.line, self.start, self.end)
    }
}

/// A fully qualified analysis target (function, method, attribute or
/// global), e.g. `app.views.handle_request`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(pub String);

impl Target {
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The target's qualified name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.0
    }

    /// The unqualified trailing segment of the name.
    pub fn last_segment(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// The qualified prefix before the trailing segment, if any. For a
    /// method this is the defining class.
    pub fn prefix(&self) -> Option<&str> {
        self.0.rsplit_once('.').map(|(prefix, _)| prefix)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_ordering_is_line_first() {
        let early = Location::new("b.py", 3, 0, 5);
        let late = Location::new("a.py", 10, 0, 5);
        assert!(early < late);

        let narrow = Location::new("a.py", 3, 4, 6);
        let wide = Location::new("a.py", 3, 4, 9);
        assert!(narrow < wide);
    }

    #[test]
    fn test_target_segments() {
        let target = Target::new("app.models.User.save");
        assert_eq!(target.last_segment(), "save");
        assert_eq!(target.prefix(), Some("app.models.User"));

        let bare = Target::new("main");
        assert_eq!(bare.last_segment(), "main");
        assert_eq!(bare.prefix(), None);
    }
}
