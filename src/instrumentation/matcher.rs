// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Compiled name matchers used by scopes.
//!
//! A [`NameMatcher`] is the runtime form of an [`ElementMatcherSettings`]:
//! the pattern is normalised for case-insensitive matching and regular
//! expressions are compiled once. `MATCHES` is a full match, like the
//! managed runtime's own regex matching.

use regex::{Regex, RegexBuilder};
use std::fmt;

use crate::config::{ElementMatcherSettings, MatcherMode};

/// Regex patterns that select every name.
const MATCH_ALL_PATTERNS: &[&str] = &[".*", "^.*$", "(.*)", ".*?", "[\\s\\S]*"];

/// A compiled name predicate.
#[derive(Clone)]
pub struct NameMatcher {
    pattern: String,
    mode: MatcherMode,
    ignore_case: bool,
    regex: Option<Regex>,
}

impl NameMatcher {
    /// Compile a matcher. Fails only for invalid regular expressions.
    pub fn new(pattern: &str, mode: MatcherMode, ignore_case: bool) -> Result<Self, regex::Error> {
        let regex = match mode {
            MatcherMode::Matches => Some(
                RegexBuilder::new(&format!("^(?:{})$", pattern))
                    .case_insensitive(ignore_case)
                    .build()?,
            ),
            _ => None,
        };
        let pattern = if ignore_case && regex.is_none() {
            pattern.to_lowercase()
        } else {
            pattern.to_string()
        };
        Ok(Self {
            pattern,
            mode,
            ignore_case,
            regex,
        })
    }

    /// Compile a matcher from its settings.
    pub fn from_settings(settings: &ElementMatcherSettings) -> Result<Self, regex::Error> {
        Self::new(&settings.name, settings.matcher_mode, settings.ignore_case)
    }

    /// Test a name.
    pub fn matches(&self, name: &str) -> bool {
        if let Some(regex) = &self.regex {
            return regex.is_match(name);
        }
        let lowered;
        let name = if self.ignore_case {
            lowered = name.to_lowercase();
            lowered.as_str()
        } else {
            name
        };
        match self.mode {
            MatcherMode::Equals => name == self.pattern,
            MatcherMode::StartsWith => name.starts_with(&self.pattern),
            MatcherMode::EndsWith => name.ends_with(&self.pattern),
            MatcherMode::Contains => name.contains(&self.pattern),
            MatcherMode::Matches => false,
        }
    }

    /// Whether this matcher selects every possible name.
    pub fn is_match_all(&self) -> bool {
        match self.mode {
            MatcherMode::Equals => false,
            MatcherMode::StartsWith | MatcherMode::EndsWith | MatcherMode::Contains => {
                self.pattern.is_empty()
            }
            MatcherMode::Matches => MATCH_ALL_PATTERNS.contains(&self.pattern.as_str()),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn mode(&self) -> MatcherMode {
        self.mode
    }
}

impl PartialEq for NameMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.mode == other.mode && self.ignore_case == other.ignore_case
    }
}

impl fmt::Debug for NameMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(\"{}\"", self.mode, self.pattern)?;
        if self.ignore_case {
            write!(f, ", ignore-case")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(pattern: &str, mode: MatcherMode, ignore_case: bool) -> NameMatcher {
        NameMatcher::new(pattern, mode, ignore_case).unwrap()
    }

    #[test]
    fn test_modes() {
        assert!(matcher("com.Dummy", MatcherMode::Equals, false).matches("com.Dummy"));
        assert!(!matcher("com.Dummy", MatcherMode::Equals, false).matches("com.Dummy2"));
        assert!(matcher("com.", MatcherMode::StartsWith, false).matches("com.Dummy"));
        assert!(matcher("Service", MatcherMode::EndsWith, false).matches("com.UserService"));
        assert!(matcher("User", MatcherMode::Contains, false).matches("com.UserService"));
        assert!(matcher("com\\..*Service", MatcherMode::Matches, false).matches("com.UserService"));
    }

    #[test]
    fn test_regex_is_full_match() {
        let m = matcher("Service", MatcherMode::Matches, false);
        assert!(!m.matches("com.UserService"));
        assert!(m.matches("Service"));
    }

    #[test]
    fn test_ignore_case() {
        assert!(matcher("COM.dummy", MatcherMode::Equals, true).matches("com.Dummy"));
        assert!(!matcher("COM.dummy", MatcherMode::Equals, false).matches("com.Dummy"));
        assert!(matcher("SERVICE", MatcherMode::EndsWith, true).matches("a.UserService"));
        assert!(matcher("user.*", MatcherMode::Matches, true).matches("UserService"));
    }

    #[test]
    fn test_invalid_regex() {
        assert!(NameMatcher::new("[bad", MatcherMode::Matches, false).is_err());
    }

    #[test]
    fn test_match_all_detection() {
        assert!(matcher("", MatcherMode::StartsWith, false).is_match_all());
        assert!(matcher("", MatcherMode::Contains, false).is_match_all());
        assert!(matcher(".*", MatcherMode::Matches, false).is_match_all());
        assert!(!matcher("", MatcherMode::Equals, false).is_match_all());
        assert!(!matcher("com.", MatcherMode::StartsWith, false).is_match_all());
    }

    #[test]
    fn test_equality_ignores_compiled_regex() {
        let a = matcher("a.*", MatcherMode::Matches, false);
        let b = matcher("a.*", MatcherMode::Matches, false);
        let c = matcher("a.*", MatcherMode::Matches, true);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
