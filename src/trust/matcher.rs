//! Literal-or-pattern matching of certificate fields.

use regex::Regex;
use std::fmt;

/// An expected certificate identity or issuer.
///
/// A literal must equal the value exactly. A pattern matches when it is
/// found anywhere in the value; callers wanting a full match anchor the
/// pattern themselves with `^` and `$`.
///
/// # Examples
///
/// ```
/// use modpull::trust::matcher::Matcher;
///
/// let literal = Matcher::literal("ci@example.com");
/// assert!(literal.is_match("ci@example.com"));
/// assert!(!literal.is_match("other@example.com"));
///
/// let pattern = Matcher::pattern("@example\\.com$").expect("valid regex");
/// assert!(pattern.is_match("anyone@example.com"));
/// ```
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exact string comparison.
    Literal(String),
    /// Unanchored regular expression search.
    Pattern(Regex),
}

impl Matcher {
    /// Build a literal matcher.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Compile a pattern matcher.
    ///
    /// # Errors
    ///
    /// Returns the regex compilation error for an invalid pattern.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Pattern)
    }

    /// Return true when `value` satisfies the matcher.
    #[must_use]
    pub fn is_match(&self, value: &str) -> bool {
        match self {
            Self::Literal(expected) => expected == value,
            Self::Pattern(regex) => regex.is_match(value),
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a == b,
            (Self::Pattern(a), Self::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Eq for Matcher {}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "\"{value}\""),
            Self::Pattern(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}
