pub mod asset_store;
pub mod category;
pub mod cli;
pub mod config;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod file_manager;
pub mod frontier;
pub mod html_parser;
pub mod metadata;
pub mod path_mapper;
pub mod scope;
pub mod url_canon;

// Re-export main types for convenience
pub use asset_store::{AssetRecord, AssetStore};
pub use category::ResourceCategory;
pub use cli::MirrorCommand;
pub use config::MirrorConfig;
pub use downloader::{RunReport, WebsiteMirror};
pub use error::MirrorError;
pub use fetcher::{FetchResponse, Fetcher, HttpFetcher, NoRetry, RetryPolicy};
pub use file_manager::FileManager;
pub use html_parser::{HtmlParser, Page};
pub use path_mapper::PathMapper;
pub use scope::ScopeFilter;
pub use url_canon::CanonicalUrl;
