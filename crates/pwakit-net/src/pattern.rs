//! URL patterns for classifying requests.

use url::Url;

/// URL pattern for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    /// Pattern type.
    pub pattern_type: PatternType,
    /// Pattern string.
    pub pattern: String,
}

/// Type of URL pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    /// Contains substring anywhere in the URL.
    Contains,
    /// Path equals the pattern.
    Path,
}

impl UrlPattern {
    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self::with_type(PatternType::Contains, substring)
    }

    /// Create a path pattern (e.g., "/total").
    pub fn path(path: &str) -> Self {
        Self::with_type(PatternType::Path, path)
    }

    fn with_type(pattern_type: PatternType, pattern: &str) -> Self {
        Self {
            pattern_type,
            pattern: pattern.to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        match self.pattern_type {
            PatternType::Contains => url.as_str().contains(&self.pattern),
            PatternType::Path => url.path() == self.pattern,
        }
    }
}
