use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

use site_mirror::{FetchResponse, Fetcher, MirrorError};

struct Resource {
    status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
}

/// In-memory site. Unknown URLs fail like an unreachable host; every request is
/// counted by its exact URL.
#[derive(Default)]
pub struct FakeSite {
    resources: HashMap<String, Resource>,
    hits: Mutex<HashMap<String, usize>>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, html: &str) -> Self {
        self.asset(url, "text/html; charset=UTF-8", html.as_bytes())
    }

    pub fn asset(mut self, url: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        self.resources.insert(
            normalize(url),
            Resource {
                status: 200,
                content_type: Some(content_type.to_string()),
                body: body.into(),
            },
        );
        self
    }

    pub fn missing(mut self, url: &str) -> Self {
        self.resources.insert(
            normalize(url),
            Resource {
                status: 404,
                content_type: None,
                body: Vec::new(),
            },
        );
        self
    }

    pub fn hits(&self, url: &str) -> usize {
        let hits = self.hits.lock().unwrap();
        hits.get(&normalize(url)).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }
}

fn normalize(url: &str) -> String {
    Url::parse(url).unwrap().to_string()
}

#[async_trait]
impl Fetcher for FakeSite {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, MirrorError> {
        *self.hits.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;

        match self.resources.get(url.as_str()) {
            Some(resource) if resource.status == 200 => Ok(FetchResponse {
                status: 200,
                content_type: resource.content_type.clone(),
                body: resource.body.clone(),
                final_url: url.clone(),
            }),
            Some(resource) => Ok(FetchResponse::status_only(resource.status, url.clone())),
            None => Err(MirrorError::Transport {
                url: url.to_string(),
                source: "connection refused".into(),
            }),
        }
    }
}
