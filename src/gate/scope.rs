//! Engagement scope: which hosts (and paths) a run may touch.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Any,
    Exact(String),
    /// `*.example.com`: the apex and every subdomain.
    Suffix(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopePattern {
    host: HostPattern,
    path_prefix: Option<String>,
    raw: String,
}

impl ScopePattern {
    pub fn parse(pattern: &str) -> Self {
        let raw = pattern.trim().to_string();
        let (host, path) = split_subject(&raw);

        let host = if host == "*" {
            HostPattern::Any
        } else if let Some(suffix) = host.strip_prefix("*.") {
            HostPattern::Suffix(suffix.to_string())
        } else {
            HostPattern::Exact(host)
        };

        let path_prefix = path
            .map(|p| p.trim_end_matches('*').to_string())
            .filter(|p| !p.is_empty() && p != "/");

        Self { host, path_prefix, raw }
    }

    pub fn matches(&self, host: &str, path: &str) -> bool {
        let host_ok = match &self.host {
            HostPattern::Any => true,
            HostPattern::Exact(h) => host == h,
            HostPattern::Suffix(s) => host == s || host.ends_with(&format!(".{}", s)),
        };
        host_ok && self.path_prefix.as_deref().map_or(true, |p| path.starts_with(p))
    }
}

impl fmt::Display for ScopePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone)]
pub struct Scope {
    patterns: Vec<ScopePattern>,
}

impl Scope {
    /// With no explicit patterns the scope is the run target and its subdomains.
    pub fn new(patterns: &[String], target: &str) -> Self {
        let patterns = if patterns.is_empty() {
            let (host, _) = split_subject(target);
            vec![ScopePattern::parse(&format!("*.{}", host))]
        } else {
            patterns.iter().map(|p| ScopePattern::parse(p)).collect()
        };
        Self { patterns }
    }

    pub fn contains(&self, subject: &str) -> bool {
        let (host, path) = split_subject(subject);
        if host.is_empty() {
            return false;
        }
        let path = path.unwrap_or_else(|| "/".to_string());
        self.patterns.iter().any(|p| p.matches(&host, &path))
    }

    pub fn patterns(&self) -> &[ScopePattern] {
        &self.patterns
    }
}

/// Split a URL, `host:port/path` or bare host into (lowercased host, path).
fn split_subject(subject: &str) -> (String, Option<String>) {
    let rest = subject.trim();
    let rest = rest.split_once("://").map_or(rest, |(_, after)| after);
    let (host_port, path) = match rest.find('/') {
        Some(i) => (&rest[..i], Some(rest[i..].to_string())),
        None => (rest, None),
    };
    // drop userinfo
    let host_port = host_port.rsplit_once('@').map_or(host_port, |(_, h)| h);

    let host = if let Some(v6) = host_port.strip_prefix('[') {
        v6.split(']').next().unwrap_or(v6)
    } else {
        host_port.split(':').next().unwrap_or(host_port)
    };

    (host.trim_end_matches('.').to_lowercase(), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scope_is_target_and_subdomains() {
        let scope = Scope::new(&[], "https://example.com");
        assert!(scope.contains("example.com"));
        assert!(scope.contains("a.example.com"));
        assert!(scope.contains("https://b.example.com:8443/login"));
        assert!(!scope.contains("example.org"));
        assert!(!scope.contains("badexample.com"));
    }

    #[test]
    fn test_exact_and_path_prefix() {
        let scope = Scope::new(&["api.example.com/v1/*".to_string()], "example.com");
        assert!(scope.contains("https://api.example.com/v1/users"));
        assert!(!scope.contains("https://api.example.com/admin"));
        assert!(!scope.contains("www.example.com"));
    }

    #[test]
    fn test_wildcard_root_path() {
        let scope = Scope::new(&["*.example.com".to_string(), "10.0.0.5".to_string()], "example.com");
        assert!(scope.contains("10.0.0.5:22"));
        assert!(scope.contains("A.Example.COM."));
        assert!(!scope.contains("10.0.0.6"));
    }

    #[test]
    fn test_any_host() {
        let scope = Scope::new(&["*".to_string()], "example.com");
        assert!(scope.contains("anything.test"));
        assert!(!scope.contains(""));
    }

    #[test]
    fn test_split_subject() {
        assert_eq!(split_subject("http://user@host.test:80/x"), ("host.test".to_string(), Some("/x".to_string())));
        assert_eq!(split_subject("[::1]:8080"), ("::1".to_string(), None));
    }
}
