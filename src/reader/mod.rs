//! Content Reader: turns a saved URL into a readable document.
//!
//! Static extraction runs first unless the raw page looks client-rendered,
//! in which case a headless render is attempted before falling back to the
//! static chain. Every failure degrades to "no document".

pub mod chrome;
pub mod config;
pub mod extract;
pub mod render;
pub mod root;
pub mod sanitize;

use std::sync::Arc;

use url::Url;

use crate::app::Result;
use crate::domain::{Item, ReaderDocument};
use crate::fetcher::Fetcher;
use crate::store::Repository;

pub use chrome::ChromeRenderer;
pub use config::ReaderConfig;
pub use extract::{run_chain, Page};
pub use render::{Renderer, SettleOptions};

pub struct ContentReader {
    fetcher: Arc<dyn Fetcher>,
    renderer: Option<Arc<dyn Renderer>>,
    config: ReaderConfig,
}

impl ContentReader {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        renderer: Option<Arc<dyn Renderer>>,
        config: ReaderConfig,
    ) -> Self {
        Self {
            fetcher,
            renderer,
            config,
        }
    }

    pub fn min_words(&self) -> usize {
        self.config.min_words
    }

    /// Whether raw HTML carries one of the configured hydration markers.
    pub fn is_client_rendered(&self, html: &str) -> bool {
        self.config
            .hydration_markers
            .iter()
            .any(|marker| html.contains(marker.as_str()))
    }

    /// Extract a readable document from `url`, or `None` when nothing usable was found.
    pub async fn read(&self, url: &str, fallback_title: Option<&str>) -> Option<ReaderDocument> {
        let page = match self.fetcher.fetch_html(url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}", url, e);
                return None;
            }
        };

        let base = match Url::parse(&page.final_url).or_else(|_| Url::parse(url)) {
            Ok(base) => base,
            Err(e) => {
                tracing::warn!("Unusable URL {}: {}", url, e);
                return None;
            }
        };

        if self.is_client_rendered(&page.body) {
            tracing::debug!("{} looks client-rendered, rendering first", url);
            if let Some(doc) = self.render_and_extract(url, &base, fallback_title).await {
                return Some(doc);
            }
            return self.extract(&page.body, &base, fallback_title);
        }

        if let Some(doc) = self.extract(&page.body, &base, fallback_title) {
            return Some(doc);
        }

        self.render_and_extract(url, &base, fallback_title).await
    }

    fn extract(&self, html: &str, base: &Url, fallback_title: Option<&str>) -> Option<ReaderDocument> {
        run_chain(&Page {
            html,
            base_url: base,
            fallback_title,
            min_words: self.config.min_words,
            content_selectors: &self.config.content_selectors,
        })
    }

    async fn render_and_extract(
        &self,
        url: &str,
        base: &Url,
        fallback_title: Option<&str>,
    ) -> Option<ReaderDocument> {
        let renderer = self.renderer.as_ref()?;

        let rendered = tokio::time::timeout(self.config.render_deadline(), renderer.render(url)).await;
        match rendered {
            Ok(Ok(html)) => {
                let doc = self.extract(&html, base, fallback_title);
                if doc.is_none() {
                    tracing::debug!("Rendered page {} still below the word gate", url);
                }
                doc
            }
            Ok(Err(e)) => {
                tracing::warn!("Render failed for {}: {}", url, e);
                None
            }
            Err(_) => {
                tracing::warn!("Render timed out for {}", url);
                None
            }
        }
    }

    /// Cached reader document for `item`, regenerated when missing or below the gate.
    pub async fn load_or_extract(
        &self,
        repo: &Repository,
        item: &Item,
    ) -> Result<Option<ReaderDocument>> {
        if let Some(doc) = repo.get_reader(&item.id)? {
            if doc.passes_gate(self.config.min_words) {
                return Ok(Some(doc));
            }
            tracing::info!(
                "Cached reader document for {} has {} words, regenerating",
                item.short_id(),
                doc.word_count
            );
            repo.delete_reader(&item.id)?;
        }

        let Some(doc) = self.read(&item.url, item.title.as_deref()).await else {
            return Ok(None);
        };
        repo.put_reader(&item.id, &doc)?;
        tracing::info!("Stored reader document for {} ({} words)", item.short_id(), doc.word_count);
        Ok(Some(doc))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::app::DogearError;
    use crate::fetcher::{FetchedBytes, FetchedPage};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn article_html(paragraphs: usize) -> String {
        let body: String = (0..paragraphs)
            .map(|i| {
                format!(
                    "<p>Paragraph {} explains the topic with plenty of ordinary words, \
                     so that the reader has something substantial to chew on today.</p>",
                    i
                )
            })
            .collect();
        format!(
            "<html><head><title>Fixture</title></head><body><article>{}</article></body></html>",
            body
        )
    }

    pub(crate) struct FakeFetcher {
        pub html: Option<String>,
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch_html(&self, url: &str) -> Result<FetchedPage> {
            match &self.html {
                Some(body) => Ok(FetchedPage {
                    body: body.clone(),
                    final_url: url.to_string(),
                    content_type: Some("text/html".into()),
                }),
                None => Err(DogearError::Upstream {
                    status: 404,
                    message: "not found".into(),
                }),
            }
        }

        async fn fetch_bytes(&self, _url: &str, _max_bytes: usize) -> Result<FetchedBytes> {
            Err(DogearError::Other("no bytes".into()))
        }
    }

    struct FakeRenderer {
        html: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn render(&self, _url: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.html
                .clone()
                .ok_or_else(|| DogearError::Render("browser crashed".into()))
        }
    }

    fn reader(html: Option<String>, rendered: Option<Option<String>>) -> (ContentReader, Option<Arc<FakeRenderer>>) {
        let renderer = rendered.map(|html| {
            Arc::new(FakeRenderer {
                html,
                calls: AtomicUsize::new(0),
            })
        });
        let reader = ContentReader::new(
            Arc::new(FakeFetcher { html }),
            renderer.clone().map(|r| r as Arc<dyn Renderer>),
            ReaderConfig::default(),
        );
        (reader, renderer)
    }

    #[tokio::test]
    async fn test_static_page_extracts_without_rendering() {
        let (reader, renderer) = reader(Some(article_html(6)), Some(None));
        let doc = reader.read("https://example.com/a", None).await.unwrap();
        assert!(doc.word_count >= 50);
        assert_eq!(doc.title, "Fixture");
        assert_eq!(renderer.unwrap().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_thin_page_falls_back_to_render() {
        let thin = "<html><body><p>Loading</p></body></html>".to_string();
        let (reader, renderer) = reader(Some(thin), Some(Some(article_html(6))));
        let doc = reader.read("https://example.com/a", None).await;
        assert!(doc.is_some());
        assert_eq!(renderer.unwrap().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_rendered_page_renders_first() {
        let shell = format!(
            "{}<script id=\"__NEXT_DATA__\">{{}}</script>",
            article_html(6)
        );
        let (reader, renderer) = reader(Some(shell), Some(Some(article_html(8))));
        let doc = reader.read("https://example.com/a", None).await.unwrap();
        assert!(doc.content_html.contains("Paragraph 7"));
        assert_eq!(renderer.unwrap().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_rendered_falls_back_to_static_when_render_fails() {
        let shell = format!("<div id=\"__next\"></div>{}", article_html(6));
        let (reader, _) = reader(Some(shell), Some(None));
        assert!(reader.read("https://example.com/a", None).await.is_some());
    }

    #[tokio::test]
    async fn test_fetch_failure_means_no_document() {
        let (reader, _) = reader(None, None);
        assert!(reader.read("https://example.com/a", Some("T")).await.is_none());
    }

    #[tokio::test]
    async fn test_load_or_extract_replaces_thin_cache() {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        let item = Item::new("default", "https://example.com/a", Some("Saved".into()));
        repo.put_item(&item).unwrap();

        let thin = ReaderDocument {
            title: "Old".into(),
            byline: None,
            excerpt: None,
            site_name: None,
            image_url: None,
            word_count: 3,
            content_html: "<p>too short</p>".into(),
            retrieved_at: chrono::Utc::now(),
        };
        repo.put_reader(&item.id, &thin).unwrap();

        let (reader, _) = reader(Some(article_html(6)), None);
        let doc = reader.load_or_extract(&repo, &item).await.unwrap().unwrap();
        assert!(doc.word_count >= 50);
        assert_eq!(repo.get_reader(&item.id).unwrap().unwrap(), doc);
    }

    #[tokio::test]
    async fn test_load_or_extract_uses_cache() {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        let item = Item::new("default", "https://example.com/a", None);
        let (reader, _) = reader(Some(article_html(6)), None);
        let first = reader.load_or_extract(&repo, &item).await.unwrap().unwrap();

        // Fetcher now fails, cache must still answer
        let (offline, _) = self::reader(None, None);
        let second = offline.load_or_extract(&repo, &item).await.unwrap().unwrap();
        assert_eq!(first, second);
    }
}
