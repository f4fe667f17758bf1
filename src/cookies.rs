//! Cookies bound to a domain, sent as a single `Cookie` header.

use reqwest::Url;
use std::collections::BTreeMap;

/// Cookies that are only sent to hosts matching `domain`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieSet {
    domain: String,
    cookies: BTreeMap<String, String>,
}

impl CookieSet {
    /// `domain` may be a bare host or a URL; an empty domain matches every host.
    pub fn new(cookies: BTreeMap<String, String>, domain: &str) -> Self {
        Self {
            domain: normalize_domain(domain),
            cookies,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn matches(&self, url: &Url) -> bool {
        if self.domain.is_empty() {
            return true;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        host == self.domain || host.ends_with(&format!(".{}", self.domain))
    }

    /// The `Cookie` header value for `url`, if any cookie applies.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        if self.cookies.is_empty() || !self.matches(url) {
            return None;
        }
        Some(self.header_value())
    }

    pub fn header_value(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// `https://Example.com:8443/path` and `.example.com` both become `example.com`.
fn normalize_domain(raw: &str) -> String {
    let raw = raw.trim();
    let without_scheme = raw.split_once("://").map_or(raw, |(_, rest)| rest);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.rsplit_once('@').map_or(host, |(_, h)| h);
    let host = match host.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host,
    };
    host.trim_start_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookies(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("example.com"), "example.com");
        assert_eq!(normalize_domain("https://Example.com"), "example.com");
        assert_eq!(normalize_domain("https://example.com:8443/x?y"), "example.com");
        assert_eq!(normalize_domain(".example.com"), "example.com");
        assert_eq!(normalize_domain(""), "");
    }

    #[test]
    fn test_matches_host_and_subdomains() {
        let set = CookieSet::new(cookies(&[("a", "1")]), "example.com");
        assert!(set.matches(&Url::parse("https://example.com/x").unwrap()));
        assert!(set.matches(&Url::parse("https://api.example.com/x").unwrap()));
        assert!(!set.matches(&Url::parse("https://notexample.com/x").unwrap()));
        assert!(!set.matches(&Url::parse("https://other.test/x").unwrap()));
    }

    #[test]
    fn test_empty_domain_matches_everything() {
        let set = CookieSet::new(cookies(&[("a", "1")]), "");
        assert!(set.matches(&Url::parse("http://127.0.0.1:1234/").unwrap()));
    }

    #[test]
    fn test_header_for() {
        let set = CookieSet::new(cookies(&[("session", "abc"), ("theme", "dark")]), "api.test");
        assert_eq!(
            set.header_for(&Url::parse("https://api.test/users").unwrap()),
            Some("session=abc; theme=dark".to_string())
        );
        assert_eq!(
            set.header_for(&Url::parse("https://elsewhere.test/").unwrap()),
            None
        );
    }

    #[test]
    fn test_header_for_without_cookies() {
        let set = CookieSet::new(BTreeMap::new(), "");
        assert!(set.is_empty());
        assert_eq!(set.header_for(&Url::parse("https://api.test/").unwrap()), None);
    }
}
