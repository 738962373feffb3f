use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::config::MirrorConfig;

#[derive(Parser, Debug)]
#[command(
    name = "site-mirror",
    about = "A CLI utility to mirror websites by downloading static copies",
    version,
    long_about = "Crawls a website breadth-first, downloads its stylesheets, scripts, images, fonts and uploaded media, and rewrites every page so the copy can be browsed offline."
)]
pub struct MirrorCommand {
    /// The URL of the website to mirror
    pub url: Option<String>,

    /// Output directory for the mirrored website [default: ./mirrored_site]
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum number of pages to visit [default: 50]
    #[arg(short = 'p', long, value_parser = parse_positive)]
    pub max_pages: Option<usize>,

    /// Delay between page requests in milliseconds [default: 1000]
    #[arg(short, long)]
    pub delay: Option<u64>,

    /// Concurrent asset downloads per page [default: 5]
    #[arg(short, long, value_parser = parse_positive)]
    pub workers: Option<usize>,

    /// Timeout for requests in seconds [default: 30]
    #[arg(long, value_parser = parse_positive)]
    pub timeout: Option<usize>,

    /// User agent string to use for requests
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Site content directory whose uploads/ subtree holds uploaded media [default: wp-content]
    #[arg(long)]
    pub content_dir: Option<String>,

    /// Path segments never crawled or downloaded (comma-separated; `name*` matches a prefix)
    #[arg(long, value_delimiter = ',')]
    pub exclude: Option<Vec<String>>,

    /// Skip writing mirror_metadata.json and mirror_metadata.csv
    #[arg(long)]
    pub no_metadata: bool,

    /// JSON config file; flags given on the command line override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Download the URLs listed in this file (one per line) instead of crawling
    #[arg(short, long)]
    pub batch: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn parse_positive(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(value) => Ok(value),
        Err(e) => Err(e.to_string()),
    }
}

impl MirrorCommand {
    /// Builds the run configuration: the config file if one was given, else
    /// defaults, then every flag that was passed explicitly.
    pub fn to_config(&self) -> Result<MirrorConfig> {
        let mut config = match &self.config {
            Some(path) => MirrorConfig::from_json_file(path)?,
            None => MirrorConfig::default(),
        };

        if let Some(url) = &self.url {
            config.start_url = url.clone();
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        if let Some(max_pages) = self.max_pages {
            config.max_pages = max_pages;
        }
        if let Some(delay) = self.delay {
            config.delay_ms = delay;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout as u64;
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = user_agent.clone();
        }
        if let Some(content_dir) = &self.content_dir {
            config.content_dir = content_dir.clone();
        }
        if let Some(exclude) = &self.exclude {
            config.excluded_paths = exclude.clone();
        }
        if self.no_metadata {
            config.metadata = false;
        }

        if config.start_url.trim().is_empty() && self.batch.is_none() {
            bail!("a start URL is required (positional argument or start_url in --config)");
        }
        Ok(config)
    }
}
