use url::Url;

/// Returns the politeness key for a URL: the lowercase host, plus `:port`
/// when the port is not the scheme default
///
/// Two URLs share a key exactly when they share per-host politeness state,
/// robots rules and page budget.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use roamer::url::host_key;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(host_key(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("http://127.0.0.1:8080/").unwrap();
/// assert_eq!(host_key(&url), Some("127.0.0.1:8080".to_string()));
/// ```
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}

/// Strips the `:port` suffix from a host key, leaving the bare host name
pub fn bare_host(key: &str) -> &str {
    // IPv6 hosts keep their brackets
    if key.starts_with('[') {
        return match key.find(']') {
            Some(end) => &key[..=end],
            None => key,
        };
    }
    match key.rsplit_once(':') {
        Some((host, _)) => host,
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_host() {
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(host_key(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_subdomain_is_its_own_key() {
        let url = Url::parse("https://blog.example.com/post").unwrap();
        assert_eq!(host_key(&url), Some("blog.example.com".to_string()));
    }

    #[test]
    fn test_default_port_omitted() {
        let url = Url::parse("https://example.com:443/").unwrap();
        assert_eq!(host_key(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_explicit_port_kept() {
        let url = Url::parse("https://example.com:8443/").unwrap();
        assert_eq!(host_key(&url), Some("example.com:8443".to_string()));
    }

    #[test]
    fn test_mixed_case() {
        let url = Url::parse("https://Example.COM/").unwrap();
        assert_eq!(host_key(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_no_host() {
        let url = Url::parse("data:text/plain,hello").unwrap();
        assert_eq!(host_key(&url), None);
    }

    #[test]
    fn test_bare_host() {
        assert_eq!(bare_host("example.com"), "example.com");
        assert_eq!(bare_host("example.com:8080"), "example.com");
        assert_eq!(bare_host("127.0.0.1:3000"), "127.0.0.1");
        assert_eq!(bare_host("[::1]:3000"), "[::1]");
        assert_eq!(bare_host("[::1]"), "[::1]");
    }
}
