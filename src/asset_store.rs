//! Downloads each asset once per run and remembers where it went.
//!
//! The table maps a canonical URL to a `OnceCell`. The first caller for a URL
//! runs the download inside the cell; concurrent callers for the same URL wait
//! on that cell instead of fetching again. Failures are cached too, so a 404 is
//! requested once and counted once.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use crate::category::ResourceCategory;
use crate::fetcher::{fetch_with_retry, FetchResponse, Fetcher, NoRetry, RetryPolicy};
use crate::file_manager::FileManager;
use crate::html_parser::{css_url_references, rewrite_css_urls};
use crate::path_mapper::{relative_reference, PathMapper};
use crate::scope::ScopeFilter;
use crate::url_canon::{resolve_reference, CanonicalUrl};

/// One stored asset. Created on the first successful download and never
/// replaced within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetRecord {
    pub url: CanonicalUrl,
    pub local_path: String,
    pub category: ResourceCategory,
    pub byte_size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Found complete on disk from an earlier run instead of being fetched.
    pub resumed: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssetStats {
    pub downloaded: usize,
    /// Requests answered by an earlier or in-flight download of the same URL.
    pub reused: usize,
    pub resumed: usize,
    pub failed: usize,
}

type Slot = Arc<OnceCell<Option<AssetRecord>>>;

struct Entry {
    category: ResourceCategory,
    slot: Slot,
}

pub struct AssetStore {
    fetcher: Arc<dyn Fetcher>,
    retry: Arc<dyn RetryPolicy>,
    mapper: Arc<PathMapper>,
    writer: FileManager,
    scope: ScopeFilter,
    content_dir: String,
    entries: Mutex<HashMap<CanonicalUrl, Entry>>,
    downloaded: AtomicUsize,
    reused: AtomicUsize,
    resumed: AtomicUsize,
    failed: AtomicUsize,
}

impl AssetStore {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        mapper: Arc<PathMapper>,
        writer: FileManager,
        scope: ScopeFilter,
        content_dir: &str,
    ) -> Self {
        Self {
            fetcher,
            retry: Arc::new(NoRetry),
            mapper,
            writer,
            scope,
            content_dir: content_dir.to_string(),
            entries: Mutex::new(HashMap::new()),
            downloaded: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
            resumed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    /// Local path of `url`, downloading it first if this run has not yet tried.
    ///
    /// `None` means the asset is not available (fetch or write failed); callers
    /// keep the remote reference. The category of the first request for a URL
    /// sticks for the rest of the run.
    pub async fn ensure_downloaded(&self, url: &Url, category: ResourceCategory) -> Option<String> {
        let canonical = CanonicalUrl::from_url(url);
        let (slot, category) = self.slot(&canonical, category);
        if let Some(done) = slot.get() {
            return self.reuse(done);
        }

        let local_path = self.mapper.map_path(&canonical, category);
        let canonical = &canonical;
        self.settle(&slot, move || self.download(url, canonical, category, local_path))
            .await
    }

    /// Stores a body the crawler already fetched (a non-HTML frontier entry).
    pub async fn store_fetched(
        &self,
        url: &Url,
        category: ResourceCategory,
        response: FetchResponse,
    ) -> Option<String> {
        let canonical = CanonicalUrl::from_url(url);
        let (slot, category) = self.slot(&canonical, category);
        if let Some(done) = slot.get() {
            return self.reuse(done);
        }

        let local_path = self.mapper.map_path(&canonical, category);
        let canonical = &canonical;
        self.settle(&slot, move || async move {
            let body = if category == ResourceCategory::Stylesheet {
                self.rewrite_stylesheet(&response.final_url, &local_path, response.body)
                    .await
            } else {
                response.body
            };
            self.persist(canonical, category, local_path, body)
        })
        .await
    }

    /// Path recorded for `url`, without downloading anything.
    pub fn lookup(&self, url: &CanonicalUrl) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(url)
            .and_then(|entry| entry.slot.get())
            .and_then(|record| record.as_ref())
            .map(|record| record.local_path.clone())
    }

    /// Every successfully stored asset, ordered by local path.
    pub fn records(&self) -> Vec<AssetRecord> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<AssetRecord> = entries
            .values()
            .filter_map(|entry| entry.slot.get().cloned().flatten())
            .collect();
        records.sort_by(|a, b| a.local_path.cmp(&b.local_path));
        records
    }

    pub fn stats(&self) -> AssetStats {
        AssetStats {
            downloaded: self.downloaded.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            resumed: self.resumed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, url: &CanonicalUrl, category: ResourceCategory) -> (Slot, ResourceCategory) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(url.clone()).or_insert_with(|| Entry {
            category,
            slot: Arc::new(OnceCell::new()),
        });
        (entry.slot.clone(), entry.category)
    }

    // Runs `init` unless another caller already has. Callers that waited on
    // someone else's download count as reuses, same as callers arriving after.
    async fn settle<F, Fut>(&self, slot: &Slot, init: F) -> Option<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<AssetRecord>>,
    {
        let mut initialized_here = false;
        let done = slot
            .get_or_init(|| {
                initialized_here = true;
                init()
            })
            .await;

        if initialized_here {
            done.as_ref().map(|record| record.local_path.clone())
        } else {
            self.reuse(done)
        }
    }

    fn reuse(&self, done: &Option<AssetRecord>) -> Option<String> {
        let record = done.as_ref()?;
        debug!(url = %record.url, path = %record.local_path, "asset already stored");
        self.reused.fetch_add(1, Ordering::Relaxed);
        Some(record.local_path.clone())
    }

    async fn download(
        &self,
        url: &Url,
        canonical: &CanonicalUrl,
        category: ResourceCategory,
        local_path: String,
    ) -> Option<AssetRecord> {
        if let Some(record) = self.resume(canonical, category, &local_path) {
            return Some(record);
        }

        let response = self.fetch(url).await?;
        let body = if category == ResourceCategory::Stylesheet {
            self.rewrite_stylesheet(&response.final_url, &local_path, response.body)
                .await
        } else {
            response.body
        };
        self.persist(canonical, category, local_path, body)
    }

    // Same as `download` minus stylesheet rewriting, so assets referenced from
    // inside a stylesheet never wait on another stylesheet.
    async fn download_leaf(
        &self,
        url: &Url,
        canonical: &CanonicalUrl,
        category: ResourceCategory,
        local_path: String,
    ) -> Option<AssetRecord> {
        if let Some(record) = self.resume(canonical, category, &local_path) {
            return Some(record);
        }

        let response = self.fetch(url).await?;
        self.persist(canonical, category, local_path, response.body)
    }

    async fn ensure_leaf(&self, url: &Url, category: ResourceCategory) -> Option<String> {
        let canonical = CanonicalUrl::from_url(url);
        let (slot, category) = self.slot(&canonical, category);
        if let Some(done) = slot.get() {
            return self.reuse(done);
        }
        if category == ResourceCategory::Stylesheet {
            return None;
        }

        let local_path = self.mapper.map_path(&canonical, category);
        let canonical = &canonical;
        self.settle(&slot, move || self.download_leaf(url, canonical, category, local_path))
            .await
    }

    async fn fetch(&self, url: &Url) -> Option<FetchResponse> {
        match fetch_with_retry(self.fetcher.as_ref(), self.retry.as_ref(), url).await {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(%url, error = %e, "asset not available, keeping remote reference");
                self.failed.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn resume(
        &self,
        canonical: &CanonicalUrl,
        category: ResourceCategory,
        local_path: &str,
    ) -> Option<AssetRecord> {
        let byte_size = self.writer.existing_size(local_path)?;
        debug!(url = %canonical, path = local_path, "found on disk, skipping download");
        self.resumed.fetch_add(1, Ordering::Relaxed);

        let dimensions = if category.may_be_image() {
            self.writer
                .read_file(local_path)
                .and_then(|bytes| image_dimensions(&bytes))
        } else {
            None
        };

        Some(AssetRecord {
            url: canonical.clone(),
            local_path: local_path.to_string(),
            category,
            byte_size,
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            resumed: true,
        })
    }

    fn persist(
        &self,
        canonical: &CanonicalUrl,
        category: ResourceCategory,
        local_path: String,
        body: Vec<u8>,
    ) -> Option<AssetRecord> {
        if let Err(e) = self.writer.save_file(&local_path, &body) {
            warn!(url = %canonical, error = %e, "could not store asset");
            self.failed.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.downloaded.fetch_add(1, Ordering::Relaxed);
        info!(url = %canonical, path = %local_path, %category, bytes = body.len(), "stored asset");

        let dimensions = if category.may_be_image() {
            image_dimensions(&body)
        } else {
            None
        };

        Some(AssetRecord {
            url: canonical.clone(),
            local_path,
            category,
            byte_size: body.len() as u64,
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            resumed: false,
        })
    }

    /// Downloads the fonts, images and media a stylesheet points at through
    /// `url(...)` and rewrites those references relative to the stylesheet's own
    /// location. `@import`ed stylesheets are left remote.
    async fn rewrite_stylesheet(&self, css_url: &Url, css_local: &str, body: Vec<u8>) -> Vec<u8> {
        let css = match String::from_utf8(body) {
            Ok(css) => css,
            Err(e) => return e.into_bytes(),
        };

        let mut replacements = HashMap::new();
        for raw in css_url_references(&css) {
            let Some(target) = resolve_reference(css_url, &raw) else {
                continue;
            };
            if !self.scope.is_in_scope(&target) {
                continue;
            }

            let canonical = CanonicalUrl::from_url(&target);
            let category = ResourceCategory::classify(
                &canonical,
                &self.content_dir,
                Some(ResourceCategory::Image),
            );
            if category == ResourceCategory::Stylesheet {
                continue;
            }

            if let Some(path) = self.ensure_leaf(&target, category).await {
                replacements.insert(raw, relative_reference(css_local, &path));
            }
        }

        if replacements.is_empty() {
            css.into_bytes()
        } else {
            rewrite_css_urls(&css, &replacements).into_bytes()
        }
    }
}

/// Width and height from the image header, when the format is recognized.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
