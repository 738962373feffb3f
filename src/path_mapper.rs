//! Remote URL to local mirror path.
//!
//! Every local path in the mirror comes from [`PathMapper::map_path`]: the asset
//! store writes files there and the page rewriter points references there, so
//! the two can never disagree about where a file lives.
//!
//! - pages keep the site's route structure (`/catalog/` -> `catalog/index.html`,
//!   `/about.php` -> `about.html`)
//! - uploaded media keeps its directory structure under `uploads/`, without the
//!   site's content-directory prefix
//! - everything else is flattened into one directory per category, keyed by file
//!   name
//!
//! Sanitizing and flattening are lossy, so every path is claimed first-come. A
//! second URL landing on a taken path gets a URL-derived hash suffix on its file
//! name instead of overwriting the first.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::category::{extension, is_page_extension, uploads_suffix, ResourceCategory};
use crate::url_canon::CanonicalUrl;

/// Run-scoped mapper. Paths are claimed first-come, so a mapper must live
/// exactly as long as the crawl run that uses it.
#[derive(Debug)]
pub struct PathMapper {
    content_dir: String,
    state: Mutex<MapperState>,
}

#[derive(Debug, Default)]
struct MapperState {
    assigned: HashMap<(CanonicalUrl, ResourceCategory), String>,
    owners: HashMap<String, CanonicalUrl>,
}

impl PathMapper {
    pub fn new(content_dir: &str) -> Self {
        Self {
            content_dir: content_dir.trim_matches('/').to_string(),
            state: Mutex::new(MapperState::default()),
        }
    }

    /// Local path, relative to the mirror root and `/`-separated, for `url`
    /// stored as `category`. Repeated calls with the same arguments return the
    /// same path for the lifetime of the mapper.
    pub fn map_path(&self, url: &CanonicalUrl, category: ResourceCategory) -> String {
        let key = (url.clone(), category);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(path) = state.assigned.get(&key) {
            return path.clone();
        }

        let candidate = match category {
            ResourceCategory::HtmlPage => page_path(url),
            ResourceCategory::UploadedMedia => match uploads_suffix(url, &self.content_dir) {
                Some(rest) => uploads_path(rest),
                None => flat_path(url, category),
            },
            _ => flat_path(url, category),
        };

        let path = state.claim(candidate, url);
        state.assigned.insert(key, path.clone());
        path
    }
}

impl MapperState {
    fn is_free(&self, path: &str, url: &CanonicalUrl) -> bool {
        self.owners.get(path).map_or(true, |owner| owner == url)
    }

    fn claim(&mut self, candidate: String, url: &CanonicalUrl) -> String {
        let mut path = candidate.clone();
        if !self.is_free(&path, url) {
            let digest = hex::encode(Sha256::digest(url.to_string().as_bytes()));
            for len in [8, 16, digest.len()] {
                path = with_suffix(&candidate, &digest[..len]);
                if self.is_free(&path, url) {
                    break;
                }
            }
        }

        self.owners.insert(path.clone(), url.clone());
        path
    }
}

/// Candidate path of a page, before collisions with other URLs are resolved.
/// Depends on the URL alone.
pub fn page_path(url: &CanonicalUrl) -> String {
    let mut segments: Vec<String> = url.segments().map(sanitize_segment).collect();

    let last_is_page = segments
        .last()
        .and_then(|last| extension(last))
        .map_or(false, |ext| is_page_extension(&ext));

    if segments.is_empty() {
        return "index.html".to_string();
    }

    if last_is_page {
        if let Some(last) = segments.last_mut() {
            let stem = last.rsplit_once('.').map_or(last.as_str(), |(stem, _)| stem);
            let renamed = format!("{}.html", stem);
            *last = renamed;
        }
    } else {
        segments.push("index.html".to_string());
    }

    segments.join("/")
}

fn uploads_path(rest: &str) -> String {
    let segments: Vec<String> = rest
        .split('/')
        .filter(|s| !s.is_empty())
        .map(sanitize_segment)
        .collect();
    format!("{}/{}", ResourceCategory::UploadedMedia.directory(), segments.join("/"))
}

fn flat_path(url: &CanonicalUrl, category: ResourceCategory) -> String {
    format!("{}/{}", category.directory(), flat_file_name(url, category))
}

fn flat_file_name(url: &CanonicalUrl, category: ResourceCategory) -> String {
    let mut name = sanitize_segment(url.file_name().unwrap_or("index"));
    if extension(&name).is_none() {
        if let Some(ext) = category.default_extension() {
            name = format!("{}.{}", name, ext);
        }
    }
    name
}

// Suffixes the file name only; directories may contain dots.
fn with_suffix(path: &str, suffix: &str) -> String {
    let (dir, name) = match path.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, path),
    };
    let name = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, suffix, ext),
        _ => format!("{}-{}", name, suffix),
    };
    match dir {
        Some(dir) => format!("{}/{}", dir, name),
        None => name,
    }
}

/// Makes one path segment safe for any filesystem.
pub fn sanitize_segment(segment: &str) -> String {
    if segment == "." || segment == ".." {
        return "_".to_string();
    }

    segment
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' => c,
            _ => '_',
        })
        .collect()
}

/// Re-expresses the mirror-root path `target` relative to the directory that
/// holds `from_file`, so references resolve when the mirror is opened from disk.
pub fn relative_reference(from_file: &str, target: &str) -> String {
    let base = Path::new(from_file).parent().unwrap_or_else(|| Path::new(""));
    match pathdiff::diff_paths(target, base) {
        Some(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"),
        None => target.to_string(),
    }
}
