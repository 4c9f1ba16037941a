//! Job name targeting with glob patterns (`--target`).

use glob::{MatchOptions, Pattern, PatternError};

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A set of glob patterns; a name is selected if any pattern matches it.
/// An empty filter selects every name.
#[derive(Clone, Debug, Default)]
pub struct NameFilter {
    patterns: Vec<Pattern>,
}

impl NameFilter {
    /// A filter that selects everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Compile `patterns`.
    ///
    /// # Errors
    /// Returns the first pattern that is not a valid glob.
    pub fn new<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Pattern::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Whether the filter selects every name.
    #[must_use]
    pub fn is_all(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `name` is selected.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.is_all() || self.patterns.iter().any(|p| p.matches_with(name, MATCH))
    }
}
