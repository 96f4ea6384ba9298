//! Cover Generator: produces and stores one cover image per item.

pub mod openai;
pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::app::{DogearError, Result};
use crate::domain::{CoverBlob, Item, ReaderDocument};
use crate::fetcher::Fetcher;
use crate::jobs::RetryPolicy;
use crate::store::Repository;

pub use openai::OpenAiImageGenerator;
pub use prompt::{build_prompt, build_snippet, fallback_prompt, Snippet};

/// A finished image as returned by the generation API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub base64: String,
    pub content_type: String,
}

/// An intermediate frame from a streaming generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialImage {
    pub index: u32,
    pub base64: String,
}

pub type PartialCallback = dyn Fn(&PartialImage) + Send + Sync;

/// Image generation capability.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// `Ok(None)` means the call succeeded but no image came back.
    async fn generate(&self, prompt: &str) -> Result<Option<GeneratedImage>>;

    /// Streaming variant. Partial frames go to `on_partial`; only the final
    /// image is returned.
    async fn generate_streaming(
        &self,
        prompt: &str,
        on_partial: &PartialCallback,
    ) -> Result<Option<GeneratedImage>> {
        let _ = on_partial;
        self.generate(prompt).await
    }
}

/// Configuration for cover generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverConfig {
    /// API key for the image endpoint (env: DOGEAR_IMAGE_API_KEY)
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    pub base_url: String,

    pub model: String,

    pub size: String,

    pub quality: String,

    /// Image request timeout in seconds (default: 180)
    pub timeout_secs: u64,

    /// Request partial images over SSE (default: false)
    pub stream: bool,

    /// Number of partial frames to ask for when streaming (default: 2)
    pub partial_images: u32,

    /// Largest external cover image accepted, in bytes (default: 5 MiB)
    pub max_image_bytes: usize,

    /// Words of article text sent with the prompt (default: 1000)
    pub snippet_max_words: usize,

    /// Articles with fewer words get no generated cover (default: 40)
    pub snippet_min_words: usize,

    pub retry: RetryPolicy,
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-image-1".to_string(),
            size: "1024x1536".to_string(),
            quality: "medium".to_string(),
            timeout_secs: 180,
            stream: false,
            partial_images: 2,
            max_image_bytes: 5 * 1024 * 1024,
            snippet_max_words: 1000,
            snippet_min_words: 40,
            retry: RetryPolicy::new(3, vec![30, 120, 600]),
        }
    }
}

impl CoverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub struct CoverGenerator {
    repo: Repository,
    images: Arc<dyn ImageGenerator>,
    fetcher: Arc<dyn Fetcher>,
    config: CoverConfig,
}

impl CoverGenerator {
    pub fn new(
        repo: Repository,
        images: Arc<dyn ImageGenerator>,
        fetcher: Arc<dyn Fetcher>,
        config: CoverConfig,
    ) -> Self {
        Self {
            repo,
            images,
            fetcher,
            config,
        }
    }

    /// Return the stored cover for `item`, creating it first if needed.
    pub async fn generate(
        &self,
        item: &Item,
        doc: &ReaderDocument,
        on_partial: Option<&PartialCallback>,
    ) -> Result<CoverBlob> {
        if let Some(existing) = self.repo.get_cover(&item.id)? {
            tracing::debug!("Cover for {} already stored", item.short_id());
            return Ok(existing);
        }

        let image = match self.external_image(item, doc).await {
            Some(image) => image,
            None => self.generated_image(item, doc, on_partial).await?,
        };

        let blob = CoverBlob {
            base64: image.base64,
            content_type: image.content_type,
            created_at: Utc::now(),
        };
        self.repo.put_cover(&item.id, &blob)?;
        tracing::info!("Stored cover for {} ({})", item.short_id(), blob.content_type);
        Ok(blob)
    }

    /// The page's own lead image, when it declares one that we can use.
    async fn external_image(&self, item: &Item, doc: &ReaderDocument) -> Option<GeneratedImage> {
        let url = doc.image_url.as_deref()?;

        let fetched = match self.fetcher.fetch_bytes(url, self.config.max_image_bytes).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!("Declared cover image {} unusable: {}", url, e);
                return None;
            }
        };

        let content_type = fetched.content_type.unwrap_or_default();
        if !content_type.starts_with("image/") || fetched.bytes.is_empty() {
            tracing::warn!(
                "Declared cover image {} has content type {:?}, generating instead",
                url,
                content_type
            );
            return None;
        }

        tracing::info!("Using declared cover image for {}", item.short_id());
        Some(GeneratedImage {
            base64: STANDARD.encode(&fetched.bytes),
            content_type,
        })
    }

    async fn generated_image(
        &self,
        item: &Item,
        doc: &ReaderDocument,
        on_partial: Option<&PartialCallback>,
    ) -> Result<GeneratedImage> {
        let snippet = build_snippet(
            &doc.content_html,
            self.config.snippet_max_words,
            self.config.snippet_min_words,
        )
        .ok_or_else(|| {
            DogearError::Parse(format!(
                "article has fewer than {} words to build a cover from",
                self.config.snippet_min_words
            ))
        })?;

        let title = item.title.as_deref().unwrap_or(&doc.title);
        let prompt = build_prompt(title, &item.url, &snippet);

        if let Some(image) = self.call(&prompt, on_partial).await? {
            return Ok(image);
        }

        tracing::warn!("No image returned for {}, retrying with fallback prompt", item.short_id());
        self.call(&fallback_prompt(title), on_partial)
            .await?
            .ok_or_else(|| DogearError::Other("image API returned no image".to_string()))
    }

    async fn call(&self, prompt: &str, on_partial: Option<&PartialCallback>) -> Result<Option<GeneratedImage>> {
        match on_partial {
            Some(callback) => self.images.generate_streaming(prompt, callback).await,
            None if self.config.stream => self.images.generate_streaming(prompt, &|_: &PartialImage| {}).await,
            None => self.images.generate(prompt).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fetcher::{FetchedBytes, FetchedPage};
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    /// Image generator that replays scripted answers and records prompts.
    pub(crate) struct ScriptedImages {
        pub answers: Mutex<Vec<Option<GeneratedImage>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedImages {
        pub(crate) fn new(answers: Vec<Option<GeneratedImage>>) -> Self {
            Self {
                answers: Mutex::new(answers),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    pub(crate) fn png() -> GeneratedImage {
        GeneratedImage {
            base64: "iVBORw0KGgo=".into(),
            content_type: "image/png".into(),
        }
    }

    #[async_trait]
    impl ImageGenerator for ScriptedImages {
        async fn generate(&self, prompt: &str) -> Result<Option<GeneratedImage>> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                return Ok(None);
            }
            Ok(answers.remove(0))
        }

        async fn generate_streaming(
            &self,
            prompt: &str,
            on_partial: &PartialCallback,
        ) -> Result<Option<GeneratedImage>> {
            on_partial(&PartialImage {
                index: 0,
                base64: "partial".into(),
            });
            self.generate(prompt).await
        }
    }

    struct ImageFetcher {
        content_type: &'static str,
    }

    #[async_trait]
    impl Fetcher for ImageFetcher {
        async fn fetch_html(&self, _url: &str) -> Result<FetchedPage> {
            Err(DogearError::Other("not used".into()))
        }

        async fn fetch_bytes(&self, _url: &str, _max_bytes: usize) -> Result<FetchedBytes> {
            Ok(FetchedBytes {
                bytes: vec![1, 2, 3],
                content_type: Some(self.content_type.to_string()),
            })
        }
    }

    fn document(words: usize, image_url: Option<&str>) -> ReaderDocument {
        let text: Vec<String> = (0..words).map(|i| format!("word{}", i)).collect();
        ReaderDocument {
            title: "Doc Title".into(),
            byline: None,
            excerpt: None,
            site_name: None,
            image_url: image_url.map(String::from),
            word_count: words,
            content_html: format!("<p>{}</p>", text.join(" ")),
            retrieved_at: Utc::now(),
        }
    }

    fn generator(images: Arc<ScriptedImages>, content_type: &'static str) -> (CoverGenerator, Repository, Item) {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        let item = Item::new("default", "https://example.com/a", Some("Saved Title".into()));
        repo.put_item(&item).unwrap();
        let generator = CoverGenerator::new(
            repo.clone(),
            images,
            Arc::new(ImageFetcher { content_type }),
            CoverConfig::default(),
        );
        (generator, repo, item)
    }

    #[tokio::test]
    async fn test_generates_and_persists() {
        let images = Arc::new(ScriptedImages::new(vec![Some(png())]));
        let (generator, repo, item) = generator(images.clone(), "image/png");

        let blob = generator.generate(&item, &document(100, None), None).await.unwrap();
        assert_eq!(blob.content_type, "image/png");
        assert_eq!(repo.get_cover(&item.id).unwrap().unwrap(), blob);

        let prompts = images.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Title: Saved Title"));
    }

    #[tokio::test]
    async fn test_existing_cover_is_returned_unchanged() {
        let images = Arc::new(ScriptedImages::new(vec![Some(png())]));
        let (generator, _, item) = generator(images.clone(), "image/png");

        let first = generator.generate(&item, &document(100, None), None).await.unwrap();
        let second = generator.generate(&item, &document(100, None), None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(images.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_prompt_after_empty_answer() {
        let images = Arc::new(ScriptedImages::new(vec![None, Some(png())]));
        let (generator, _, item) = generator(images.clone(), "image/png");

        generator.generate(&item, &document(100, None), None).await.unwrap();
        let prompts = images.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[1], fallback_prompt("Saved Title"));
    }

    #[tokio::test]
    async fn test_gives_up_after_fallback() {
        let images = Arc::new(ScriptedImages::new(vec![None, None]));
        let (generator, repo, item) = generator(images, "image/png");
        assert!(generator.generate(&item, &document(100, None), None).await.is_err());
        assert!(!repo.has_cover(&item.id).unwrap());
    }

    #[tokio::test]
    async fn test_short_article_is_a_parse_failure() {
        let images = Arc::new(ScriptedImages::new(vec![Some(png())]));
        let (generator, _, item) = generator(images, "image/png");
        let err = generator.generate(&item, &document(10, None), None).await.unwrap_err();
        assert!(matches!(err, DogearError::Parse(_)));
    }

    #[tokio::test]
    async fn test_declared_image_bypasses_generation() {
        let images = Arc::new(ScriptedImages::new(vec![Some(png())]));
        let (generator, _, item) = generator(images.clone(), "image/jpeg");

        let doc = document(100, Some("https://example.com/lead.jpg"));
        let blob = generator.generate(&item, &doc, None).await.unwrap();
        assert_eq!(blob.content_type, "image/jpeg");
        assert_eq!(blob.base64, STANDARD.encode([1u8, 2, 3]));
        assert!(images.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_declared_non_image_is_ignored() {
        let images = Arc::new(ScriptedImages::new(vec![Some(png())]));
        let (generator, _, item) = generator(images.clone(), "text/html");

        let doc = document(100, Some("https://example.com/not-an-image"));
        let blob = generator.generate(&item, &doc, None).await.unwrap();
        assert_eq!(blob.content_type, "image/png");
        assert_eq!(images.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_streaming_reports_partials() {
        let images = Arc::new(ScriptedImages::new(vec![Some(png())]));
        let (generator, _, item) = generator(images, "image/png");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback = move |partial: &PartialImage| sink.lock().unwrap().push(partial.index);

        generator
            .generate(&item, &document(100, None), Some(&callback as &PartialCallback))
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0]);
    }
}
