use url::Url;

use crate::error::MirrorError;
use crate::url_canon::CanonicalUrl;

/// Path segments excluded by default: REST and AJAX endpoints, the WordPress
/// JSON API, feeds and comment pages.
///
/// Entries match whole segments. An entry ending in `*` matches any segment
/// starting with the text before it.
pub const DEFAULT_EXCLUDED_PATHS: &[&str] = &[
    "api",
    "ajax",
    "admin-ajax.php",
    "wp-json",
    "feed",
    "comment",
    "comment-page-*",
];

/// Decides whether a URL may be crawled or downloaded.
///
/// A URL is in scope when its host (including a non-default port) equals the
/// target host and none of its path segments match an exclusion entry. The same
/// predicate is applied to anchors and to asset references.
#[derive(Debug, Clone)]
pub struct ScopeFilter {
    host: String,
    excluded: Vec<String>,
}

impl ScopeFilter {
    pub fn new(host: &str, excluded: &[String]) -> Self {
        Self {
            host: host.to_ascii_lowercase(),
            excluded: excluded
                .iter()
                .map(|entry| entry.trim_matches('/').to_ascii_lowercase())
                .filter(|entry| !entry.is_empty())
                .collect(),
        }
    }

    /// Filter targeting the host of `start_url`.
    pub fn for_start_url(start_url: &Url, excluded: &[String]) -> Self {
        let canonical = CanonicalUrl::from_url(start_url);
        Self::new(canonical.host(), excluded)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_in_scope(&self, url: &Url) -> bool {
        self.is_canonical_in_scope(&CanonicalUrl::from_url(url))
    }

    pub fn is_canonical_in_scope(&self, url: &CanonicalUrl) -> bool {
        if url.host() != self.host {
            return false;
        }
        !url.segments().any(|segment| self.is_excluded_segment(segment))
    }

    /// Like [`is_in_scope`](Self::is_in_scope) but yields the canonical key, or a
    /// `ScopeRejected` routing error.
    pub fn check(&self, url: &Url) -> Result<CanonicalUrl, MirrorError> {
        let canonical = CanonicalUrl::from_url(url);
        if self.is_canonical_in_scope(&canonical) {
            Ok(canonical)
        } else {
            Err(MirrorError::ScopeRejected {
                url: url.to_string(),
            })
        }
    }

    fn is_excluded_segment(&self, segment: &str) -> bool {
        let segment = segment.to_ascii_lowercase();

        self.excluded.iter().any(|entry| match entry.strip_suffix('*') {
            Some(prefix) => segment.starts_with(prefix),
            None => segment == *entry,
        })
    }
}
