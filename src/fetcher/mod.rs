pub mod http_fetcher;

use async_trait::async_trait;

use crate::app::Result;

pub use http_fetcher::HttpFetcher;

/// An HTML page after redirects.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: String,
    pub final_url: String,
    pub content_type: Option<String>,
}

/// A binary resource, e.g. a lead image.
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<FetchedPage>;

    /// Fetch at most `max_bytes`; larger bodies are an error.
    async fn fetch_bytes(&self, url: &str, max_bytes: usize) -> Result<FetchedBytes>;
}
