//! Handler registry mapping topics to interested handlers.
//!
//! The registry keeps two indices: exact topics and wildcard prefixes.
//! Every Active handler appears in exactly the buckets implied by its topic
//! patterns; Blacklisted and Destroyed handlers appear in none.

use crate::{Error, Result};
use std::fmt;

mod dashmap;
pub use self::dashmap::HandlerRegistry;

/// A parsed subscription topic pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPattern {
    /// Matches exactly this topic.
    Exact(String),
    /// Matches every topic starting with this prefix (`prefix*`).
    Prefix(String),
}

impl TopicPattern {
    /// Parses a topic pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTopicPattern`] for an empty pattern or one with
    /// `*` anywhere except the final character.
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::InvalidTopicPattern {
                pattern: pattern.to_string(),
                reason: "empty topic".into(),
            });
        }

        let (body, wildcard) = match pattern.strip_suffix('*') {
            Some(prefix) => (prefix, true),
            None => (pattern, false),
        };
        if let Some(pos) = body.find('*') {
            return Err(Error::InvalidTopicPattern {
                pattern: pattern.to_string(),
                reason: format!("'*' at offset {pos} is not the final character"),
            });
        }

        Ok(if wildcard {
            Self::Prefix(body.to_string())
        } else {
            Self::Exact(body.to_string())
        })
    }

    /// Returns `true` if `topic` is selected by this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Exact(t) => t == topic,
            Self::Prefix(prefix) => topic.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(t) => f.write_str(t),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

/// Registry statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Handlers registered and not yet unsubscribed
    pub handlers: usize,

    /// Handlers currently receiving events
    pub active: usize,

    /// Handlers removed from the indices by a fault
    pub blacklisted: usize,

    /// Non-empty exact-topic buckets
    pub exact_buckets: usize,

    /// Non-empty wildcard-prefix buckets
    pub wildcard_buckets: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_exact_and_prefix() {
        assert_eq!(TopicPattern::parse("a/b").unwrap(), TopicPattern::Exact("a/b".into()));
        assert_eq!(TopicPattern::parse("a/*").unwrap(), TopicPattern::Prefix("a/".into()));
        assert_eq!(TopicPattern::parse("*").unwrap(), TopicPattern::Prefix(String::new()));
    }

    #[test]
    fn parse_rejects_misplaced_wildcard() {
        for pattern in ["", "a/*/b", "*a", "a**", "**"] {
            let err = TopicPattern::parse(pattern).expect_err(pattern);
            assert!(err.is_configuration_fault(), "{pattern}");
        }
    }

    #[test]
    fn prefix_matching() {
        let p = TopicPattern::parse("org/osgi/*").unwrap();
        assert!(p.matches("org/osgi/framework/BundleEvent"));
        assert!(p.matches("org/osgi/"));
        assert!(!p.matches("org/osg"));

        let all = TopicPattern::parse("*").unwrap();
        assert!(all.matches("anything"));
    }

    #[test]
    fn display_round_trips() {
        for pattern in ["a/b", "a/*", "*"] {
            assert_eq!(TopicPattern::parse(pattern).unwrap().to_string(), pattern);
        }
    }
}
