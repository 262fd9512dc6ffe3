//! `Parent/Name` area names with `*` wildcards.

use std::fmt;

const WILDCARD: &str = "*";

/// An area name, either side of which may be `*` in patterns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AreaName {
    /// Parent area, e.g. a city.
    pub parent: String,
    /// Area within the parent.
    pub name: String,
}

impl AreaName {
    /// Creates an area name.
    #[must_use]
    pub fn new(parent: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            name: name.into(),
        }
    }

    /// Parses `"Parent/Name"`, `"Parent/*"` or a bare `"Name"`, which
    /// matches that name under any parent.
    #[must_use]
    pub fn parse(area: &str) -> Self {
        match area.split_once('/') {
            Some((parent, name)) => Self::new(parent.trim(), name.trim()),
            None => Self::new(WILDCARD, area.trim()),
        }
    }

    /// Whether this concrete area matches `pattern`.
    #[must_use]
    pub fn matches(&self, pattern: &Self) -> bool {
        if pattern.name == WILDCARD {
            pattern.parent == self.parent
        } else if pattern.parent == WILDCARD {
            pattern.name == self.name
        } else {
            pattern.parent == self.parent && pattern.name == self.name
        }
    }

    /// Whether this area matches any of `patterns`.
    #[must_use]
    pub fn matches_any(&self, patterns: &[Self]) -> bool {
        patterns.iter().any(|pattern| self.matches(pattern))
    }
}

impl fmt::Display for AreaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let has_parent = !self.parent.is_empty() && self.parent != WILDCARD;
        if has_parent {
            if self.name.is_empty() || self.parent == self.name {
                write!(f, "{}", self.parent)
            } else {
                write!(f, "{}/{}", self.parent, self.name)
            }
        } else if !self.name.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "world")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_forms() {
        assert_eq!(AreaName::parse("London/Chelsea"), AreaName::new("London", "Chelsea"));
        assert_eq!(AreaName::parse("London/*"), AreaName::new("London", "*"));
        assert_eq!(AreaName::parse("Chelsea"), AreaName::new("*", "Chelsea"));
    }

    #[test]
    fn wildcards_match_either_segment() {
        let area = AreaName::new("London", "Hyde Park");
        assert!(area.matches(&AreaName::parse("London/*")));
        assert!(area.matches(&AreaName::parse("Hyde Park")));
        assert!(area.matches(&AreaName::parse("London/Hyde Park")));
        assert!(!area.matches(&AreaName::parse("Paris/*")));
        assert!(!area.matches(&AreaName::parse("London/Regent's Park")));
    }

    #[test]
    fn matches_any_pattern() {
        let patterns = vec![AreaName::parse("Paris/*"), AreaName::parse("Hyde Park")];
        assert!(AreaName::new("London", "Hyde Park").matches_any(&patterns));
        assert!(!AreaName::new("London", "Soho").matches_any(&patterns));
    }

    #[test]
    fn display_collapses_missing_parts() {
        assert_eq!(AreaName::new("London", "Soho").to_string(), "London/Soho");
        assert_eq!(AreaName::new("London", "").to_string(), "London");
        assert_eq!(AreaName::new("", "Soho").to_string(), "Soho");
        assert_eq!(AreaName::new("*", "").to_string(), "world");
    }
}
