use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::MirrorError;
use crate::fetcher::DEFAULT_USER_AGENT;
use crate::scope::DEFAULT_EXCLUDED_PATHS;

/// Settings for one mirror run. Every field except `start_url` has a default,
/// so a JSON config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub start_url: String,
    pub output_dir: PathBuf,
    /// Pages to visit before stopping. Zero visits nothing.
    pub max_pages: usize,
    /// Pause between consecutive page fetches.
    pub delay_ms: u64,
    /// Concurrent asset downloads per page.
    pub workers: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Site content directory; its `uploads/` subtree is uploaded media.
    pub content_dir: String,
    pub excluded_paths: Vec<String>,
    /// Write `mirror_metadata.{json,csv}` at the end of the run.
    pub metadata: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            start_url: String::new(),
            output_dir: PathBuf::from("./mirrored_site"),
            max_pages: 50,
            delay_ms: 1000,
            workers: 5,
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            content_dir: "wp-content".to_string(),
            excluded_paths: DEFAULT_EXCLUDED_PATHS.iter().map(|s| s.to_string()).collect(),
            metadata: true,
        }
    }
}

impl MirrorConfig {
    pub fn new(start_url: &str) -> Self {
        Self {
            start_url: start_url.to_string(),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Checks the settings and returns the parsed start URL.
    pub fn validate(&self) -> Result<Url, MirrorError> {
        let start = Url::parse(self.start_url.trim()).map_err(|e| {
            MirrorError::InvalidConfig(format!("start URL {:?}: {}", self.start_url, e))
        })?;
        if !matches!(start.scheme(), "http" | "https") || start.host_str().is_none() {
            return Err(MirrorError::InvalidConfig(format!(
                "start URL must be an http(s) URL with a host, got {}",
                start
            )));
        }
        if self.workers == 0 {
            return Err(MirrorError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(MirrorError::InvalidConfig("timeout must be at least 1 second".into()));
        }
        Ok(start)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
