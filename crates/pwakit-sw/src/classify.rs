//! Request classification.

use pwakit_common::WorkerConfig;
use pwakit_net::{Url, UrlPattern};
use std::fmt;

/// How the fetch policy treats a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// Image from an external avatar host. Never cached.
    Avatar,
    /// The counter mutation endpoint. Never cached, queued when offline.
    Mutation,
    /// Everything else. Cache-first.
    Ordinary,
}

impl fmt::Display for RequestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestClass::Avatar => "avatar",
            RequestClass::Mutation => "mutation",
            RequestClass::Ordinary => "ordinary",
        })
    }
}

/// Maps URLs to a [`RequestClass`]. Pure and total.
#[derive(Debug, Clone)]
pub struct Classifier {
    avatar_patterns: Vec<UrlPattern>,
    mutation: UrlPattern,
}

impl Classifier {
    pub fn new(avatar_patterns: Vec<UrlPattern>, mutation_path: &str) -> Self {
        Self {
            avatar_patterns,
            mutation: UrlPattern::path(mutation_path),
        }
    }

    /// Avatar hosts match as substrings of the URL.
    pub fn from_config(config: &WorkerConfig) -> Self {
        let avatar_patterns = config
            .avatar_hosts
            .iter()
            .map(|host| UrlPattern::contains(host))
            .collect();
        Self::new(avatar_patterns, &config.mutation_path)
    }

    /// Avatar patterns are checked first.
    pub fn classify(&self, url: &Url) -> RequestClass {
        if self.avatar_patterns.iter().any(|p| p.matches(url)) {
            RequestClass::Avatar
        } else if self.mutation.matches(url) {
            RequestClass::Mutation
        } else {
            RequestClass::Ordinary
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(url: &str) -> RequestClass {
        Classifier::default().classify(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_avatar() {
        assert_eq!(
            classify("https://avatars0.githubusercontent.com/u/123?v=4"),
            RequestClass::Avatar
        );
    }

    #[test]
    fn test_mutation_exact_path() {
        assert_eq!(classify("http://localhost:3000/total"), RequestClass::Mutation);
        assert_eq!(classify("http://localhost:3000/total?t=1"), RequestClass::Mutation);
    }

    #[test]
    fn test_near_misses_are_ordinary() {
        assert_eq!(classify("http://localhost:3000/totals"), RequestClass::Ordinary);
        assert_eq!(classify("http://localhost:3000/api/total"), RequestClass::Ordinary);
        assert_eq!(classify("http://localhost:3000/demo.css"), RequestClass::Ordinary);
        assert_eq!(classify("http://localhost:3000/"), RequestClass::Ordinary);
    }

    #[test]
    fn test_avatar_wins_over_mutation() {
        assert_eq!(
            classify("https://raw.githubusercontent.com/total"),
            RequestClass::Avatar
        );
    }

    #[test]
    fn test_custom_config() {
        let config = WorkerConfig {
            mutation_path: "/counter".to_string(),
            avatar_hosts: vec!["gravatar.com".to_string()],
            ..Default::default()
        };
        let classifier = Classifier::from_config(&config);

        let url = |s: &str| Url::parse(s).unwrap();
        assert_eq!(
            classifier.classify(&url("https://www.gravatar.com/avatar/abc")),
            RequestClass::Avatar
        );
        assert_eq!(
            classifier.classify(&url("http://localhost:3000/counter")),
            RequestClass::Mutation
        );
        assert_eq!(
            classifier.classify(&url("http://localhost:3000/total")),
            RequestClass::Ordinary
        );
    }
}
