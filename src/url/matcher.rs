//! Crawl scope: which hosts discovered links may lead to

use crate::url::domain::bare_host;

/// One entry of `scope.allowed-domains`
///
/// `*.example.com` admits `example.com` and every host below it;
/// anything else admits exactly that host. Matching ignores case, a
/// trailing root dot and the port of the host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainPattern {
    Exact(String),
    Subtree(String),
}

impl DomainPattern {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim().trim_end_matches('.').to_ascii_lowercase();
        match pattern.strip_prefix("*.") {
            Some(base) => Self::Subtree(base.to_string()),
            None => Self::Exact(pattern),
        }
    }

    /// Checks a host key (as produced by `host_key`) against the pattern
    ///
    /// ```
    /// use roamer::url::DomainPattern;
    ///
    /// let pattern = DomainPattern::parse("*.Example.com");
    /// assert!(pattern.matches("example.com"));
    /// assert!(pattern.matches("api.v2.example.com:8443"));
    /// assert!(!pattern.matches("notexample.com"));
    /// ```
    pub fn matches(&self, host: &str) -> bool {
        let host = bare_host(host).trim_end_matches('.').to_ascii_lowercase();
        match self {
            Self::Exact(name) => host == *name,
            Self::Subtree(base) => {
                host == *base
                    || host
                        .strip_suffix(base.as_str())
                        .map(|rest| rest.ends_with('.'))
                        .unwrap_or(false)
            }
        }
    }
}

/// Checks a host against the configured allowed-domain patterns
///
/// An empty pattern list puts every host in scope.
pub fn in_scope(patterns: &[String], host: &str) -> bool {
    patterns.is_empty()
        || patterns
            .iter()
            .any(|pattern| DomainPattern::parse(pattern).matches(host))
}
