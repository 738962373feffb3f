use serde::Serialize;
use std::fmt;
use url::Url;

/// Deduplication key for pages and assets: scheme, host (with any non-default
/// port) and path. Query and fragment are dropped, and a trailing slash is
/// collapsed everywhere except the root path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct CanonicalUrl {
    scheme: String,
    host: String,
    path: String,
}

impl CanonicalUrl {
    /// Canonicalizes any URL string. Never fails: input the URL parser rejects
    /// becomes the root path of whatever host can be recovered from it.
    pub fn parse(raw: &str) -> Self {
        match Url::parse(raw.trim()) {
            Ok(url) => Self::from_url(&url),
            Err(_) => Self::recover(raw),
        }
    }

    pub fn from_url(url: &Url) -> Self {
        // Url already lower-cases scheme and host and drops default ports.
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };

        Self {
            scheme: url.scheme().to_string(),
            host,
            path: normalize_path(url.path()),
        }
    }

    fn recover(raw: &str) -> Self {
        let raw = raw.trim();
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => (String::new(), ""),
        };
        let host = rest
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        Self {
            scheme,
            host,
            path: "/".to_string(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Non-empty path segments, still percent-encoded.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    /// Last path segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.host, self.path)
    }
}

impl From<CanonicalUrl> for String {
    fn from(url: CanonicalUrl) -> Self {
        url.to_string()
    }
}

impl From<&Url> for CanonicalUrl {
    fn from(url: &Url) -> Self {
        Self::from_url(url)
    }
}

/// Resolves a raw attribute value against the URL of the document it came from,
/// producing the URL to fetch. Returns `None` for references that never lead to
/// a fetchable resource: empty values, in-page fragments, `data:`/`javascript:`/
/// `mailto:`/`tel:` URIs and anything that is not http(s) after resolution.
pub fn resolve_reference(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }

    let lower = raw.to_ascii_lowercase();
    if ["data:", "javascript:", "mailto:", "tel:", "about:", "blob:"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return None;
    }

    let resolved = base.join(raw).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        _ => None,
    }
}

/// Copy of `url` with the fragment removed; the form kept in the frontier.
pub fn without_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalization_is_idempotent() {
        let inputs = [
            "https://EX.com/a/",
            "http://example.com:80/Blog/post/?p=1#top",
            "https://example.com:8443/shop",
            "https://example.com",
            "not a url at all",
        ];

        for input in inputs {
            let once = CanonicalUrl::parse(input);
            let twice = CanonicalUrl::parse(&once.to_string());
            assert_eq!(once, twice, "not idempotent for {}", input);
        }
    }

    #[test]
    fn test_case_and_trailing_slash() {
        assert_eq!(
            CanonicalUrl::parse("https://EX.com/a/"),
            CanonicalUrl::parse("https://ex.com/a")
        );
        assert_eq!(
            CanonicalUrl::parse("https://ex.com/a/").to_string(),
            "https://ex.com/a"
        );
    }

    #[test]
    fn test_query_fragment_and_default_port_dropped() {
        let canon = CanonicalUrl::parse("HTTPS://Example.com:443/style.css?ver=5.2#x");
        assert_eq!(canon.to_string(), "https://example.com/style.css");
        assert_eq!(canon.file_name(), Some("style.css"));

        let custom = CanonicalUrl::parse("http://localhost:8080/a");
        assert_eq!(custom.host(), "localhost:8080");
    }

    #[test]
    fn test_root_keeps_its_slash() {
        let root = CanonicalUrl::parse("https://example.com");
        assert!(root.is_root());
        assert_eq!(root, CanonicalUrl::parse("https://example.com/"));
        assert_eq!(root, CanonicalUrl::parse("https://example.com/?page=2"));
        assert_eq!(root.file_name(), None);
    }

    #[test]
    fn test_malformed_input_maps_to_host_root() {
        let canon = CanonicalUrl::parse("https://Exa mple.com/some/page");
        assert_eq!(canon.host(), "exa mple.com");
        assert!(canon.is_root());
    }

    #[test]
    fn test_resolve_reference() {
        let base = Url::parse("https://example.com/subdir/page.html").unwrap();

        let cases = [
            ("../style.css", "https://example.com/style.css"),
            ("./script.js", "https://example.com/subdir/script.js"),
            ("images/photo.jpg", "https://example.com/subdir/images/photo.jpg"),
            ("//cdn.example.com/a.js", "https://cdn.example.com/a.js"),
            ("/catalog/?sort=asc", "https://example.com/catalog/?sort=asc"),
        ];
        for (input, expected) in cases {
            let resolved = resolve_reference(&base, input).unwrap();
            assert_eq!(resolved.as_str(), expected, "input {}", input);
        }

        for skipped in ["", "#top", "data:image/png;base64,AAAA", "mailto:a@b.c", "javascript:void(0)"] {
            assert!(resolve_reference(&base, skipped).is_none(), "input {}", skipped);
        }
    }
}
