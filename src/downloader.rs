use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::asset_store::{AssetRecord, AssetStore};
use crate::category::ResourceCategory;
use crate::config::MirrorConfig;
use crate::fetcher::{fetch_with_retry, FetchResponse, Fetcher, HttpFetcher, NoRetry, RetryPolicy};
use crate::file_manager::FileManager;
use crate::frontier::Frontier;
use crate::html_parser::HtmlParser;
use crate::metadata::write_metadata;
use crate::path_mapper::PathMapper;
use crate::scope::ScopeFilter;
use crate::url_canon::CanonicalUrl;

/// Counts reported at the end of a run. Failures are informational; a run
/// with failures still succeeds.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunReport {
    /// Frontier entries taken, which is what `max_pages` bounds. This includes
    /// failed fetches and the `linked_files` entries, not only HTML pages.
    pub pages_visited: usize,
    /// Frontier entries that turned out to be files rather than pages: non-HTML
    /// responses, and links to URLs already stored as assets.
    pub linked_files: usize,
    pub assets_downloaded: usize,
    pub assets_reused: usize,
    pub pages_failed: usize,
    pub assets_failed: usize,
    pub out_of_scope: usize,
    pub resumed: usize,
    #[serde(skip)]
    pub assets: Vec<AssetRecord>,
}

impl RunReport {
    pub fn failures(&self) -> usize {
        self.pages_failed + self.assets_failed
    }
}

/// State owned by one crawl or batch run. Nothing here outlives the run.
struct RunContext {
    scope: ScopeFilter,
    mapper: Arc<PathMapper>,
    writer: FileManager,
    store: AssetStore,
}

pub struct WebsiteMirror {
    config: MirrorConfig,
    start_url: Url,
    fetcher: Arc<dyn Fetcher>,
    retry: Arc<dyn RetryPolicy>,
    show_progress: bool,
}

impl WebsiteMirror {
    pub fn new(config: MirrorConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.user_agent, config.timeout())
            .context("Failed to build HTTP client")?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    /// Same as [`new`](Self::new) with a caller-supplied fetcher.
    pub fn with_fetcher(config: MirrorConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let start_url = config.validate()?;
        Ok(Self {
            config,
            start_url,
            fetcher,
            retry: Arc::new(NoRetry),
            show_progress: true,
        })
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    fn start_run(&self) -> Result<RunContext> {
        let writer = FileManager::new(&self.config.output_dir)?;
        let scope = ScopeFilter::for_start_url(&self.start_url, &self.config.excluded_paths);
        let mapper = Arc::new(PathMapper::new(&self.config.content_dir));
        let store = AssetStore::new(
            self.fetcher.clone(),
            mapper.clone(),
            writer.clone(),
            scope.clone(),
            &self.config.content_dir,
        )
        .with_retry_policy(self.retry.clone());

        Ok(RunContext {
            scope,
            mapper,
            writer,
            store,
        })
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let progress_bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
            progress_bar.set_style(style);
        }
        progress_bar.enable_steady_tick(Duration::from_millis(120));
        progress_bar
    }

    /// Crawls from the start URL breadth-first until the frontier is empty or
    /// the page limit is reached.
    pub async fn mirror_website(&self) -> Result<RunReport> {
        info!(
            start = %self.start_url,
            output = ?self.config.output_dir,
            max_pages = self.config.max_pages,
            workers = self.config.workers,
            "starting mirror"
        );

        let run = self.start_run()?;
        let mut frontier = Frontier::new(self.start_url.clone(), self.config.max_pages);
        let mut mirrored: HashMap<CanonicalUrl, String> = HashMap::new();
        let mut report = RunReport::default();
        let progress_bar = self.progress_bar();
        let mut fetched_any = false;

        while let Some(url) = frontier.pop() {
            let canonical = match run.scope.check(&url) {
                Ok(canonical) => canonical,
                Err(e) => {
                    debug!("{}", e);
                    report.out_of_scope += 1;
                    continue;
                }
            };

            // Linked from a page but already stored as an asset.
            if let Some(path) = run.store.lookup(&canonical) {
                debug!(%url, %path, "already stored as an asset");
                report.linked_files += 1;
                mirrored.insert(canonical, path);
                continue;
            }

            if fetched_any {
                tokio::time::sleep(self.config.delay()).await;
            }
            fetched_any = true;

            progress_bar.set_message(format!("Downloading: {}", url));
            let response =
                match fetch_with_retry(self.fetcher.as_ref(), self.retry.as_ref(), &url).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(%url, error = %e, "page not available");
                        report.pages_failed += 1;
                        continue;
                    }
                };

            if !response.is_html() {
                report.linked_files += 1;
                // Write failures are counted by the store.
                if let Some(path) = self.store_non_html(&run, &url, &canonical, response).await {
                    mirrored.insert(canonical, path);
                }
                continue;
            }

            let local_path = run.mapper.map_path(&canonical, ResourceCategory::HtmlPage);
            mirrored.insert(canonical.clone(), local_path.clone());

            let parser = HtmlParser::new(&response.final_url, &run.scope, &self.config.content_dir);
            let page = {
                let mirrored = &mirrored;
                let store = &run.store;
                parser
                    .rewrite_page(
                        response.body,
                        &local_path,
                        store,
                        self.config.workers,
                        |target| mirrored.get(target).cloned().or_else(|| store.lookup(target)),
                    )
                    .await
            };
            report.out_of_scope += page.out_of_scope;

            match run.writer.save_file(&local_path, &page.rewritten) {
                Ok(saved) => info!(%url, path = ?saved, links = page.links.len(), "saved page"),
                Err(e) => {
                    warn!(%url, error = %e, "could not save page");
                    report.pages_failed += 1;
                    mirrored.remove(&canonical);
                }
            }

            for link in page.links {
                frontier.push(link, &run.scope);
            }
        }

        progress_bar.finish_with_message("All downloads completed");
        report.pages_visited = frontier.visited_count();
        Ok(self.finish_run(&run, report))
    }

    async fn store_non_html(
        &self,
        run: &RunContext,
        url: &Url,
        canonical: &CanonicalUrl,
        response: FetchResponse,
    ) -> Option<String> {
        let category = match ResourceCategory::classify(canonical, &self.config.content_dir, None) {
            ResourceCategory::OtherBinary => response
                .content_type
                .as_deref()
                .map(ResourceCategory::from_content_type)
                .unwrap_or(ResourceCategory::OtherBinary),
            category => category,
        };
        run.store.store_fetched(url, category, response).await
    }

    /// Downloads an ad-hoc list of URLs through the asset store, paced by the
    /// configured delay. Nothing is crawled and no page is rewritten.
    pub async fn download_batch(&self, urls: &[String]) -> Result<RunReport> {
        let run = self.start_run()?;
        let mut report = RunReport::default();
        let progress_bar = self.progress_bar();

        for (index, raw) in urls.iter().map(|raw| raw.trim()).filter(|raw| !raw.is_empty()).enumerate() {
            let url = match Url::parse(raw) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = raw, error = %e, "skipping unparsable batch entry");
                    report.assets_failed += 1;
                    continue;
                }
            };

            if index > 0 {
                tokio::time::sleep(self.config.delay()).await;
            }

            progress_bar.set_message(format!("Downloading: {}", url));
            let canonical = CanonicalUrl::from_url(&url);
            let category = ResourceCategory::classify(&canonical, &self.config.content_dir, None);
            run.store.ensure_downloaded(&url, category).await;
        }

        progress_bar.finish_with_message("Batch completed");
        Ok(self.finish_run(&run, report))
    }

    fn finish_run(&self, run: &RunContext, mut report: RunReport) -> RunReport {
        let stats = run.store.stats();
        report.assets_downloaded = stats.downloaded;
        report.assets_reused = stats.reused;
        report.assets_failed += stats.failed;
        report.resumed = stats.resumed;
        report.assets = run.store.records();

        if self.config.metadata {
            match write_metadata(&run.writer, &report.assets) {
                Ok(paths) => debug!(?paths, "wrote metadata"),
                Err(e) => warn!(error = %e, "could not write metadata"),
            }
        }

        info!(
            pages = report.pages_visited,
            assets = report.assets_downloaded,
            failures = report.failures(),
            "mirror finished"
        );
        report
    }
}

/// Reads a newline-separated URL list; blank lines and `#` comments are skipped.
pub fn read_batch_file(path: &std::path::Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file: {:?}", path))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
