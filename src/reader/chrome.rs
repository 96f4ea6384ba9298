use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::{OnceCell, Semaphore};

use crate::app::{DogearError, Result};
use crate::reader::config::ReaderConfig;
use crate::reader::render::{wait_for_settle, Renderer, SettleOptions};

const VISIBLE_TEXT_LENGTH: &str = "document.body ? document.body.innerText.length : 0";

/// Time allowed for closing a tab after its render budget is spent.
pub const PAGE_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Headless Chrome renderer using chromiumoxide.
///
/// The browser is launched on first use, so a reader that never needs to
/// render never spawns Chrome.
pub struct ChromeRenderer {
    browser: OnceCell<Arc<Browser>>,
    config: ReaderConfig,
    semaphore: Semaphore,
}

impl ChromeRenderer {
    pub fn new(config: ReaderConfig) -> Self {
        Self {
            browser: OnceCell::new(),
            config,
            // One page at a time keeps memory use of the worker predictable
            semaphore: Semaphore::new(1),
        }
    }

    async fn browser(&self) -> Result<Arc<Browser>> {
        self.browser
            .get_or_try_init(|| launch(self.config.headless))
            .await
            .cloned()
    }

    fn settle_options(&self) -> SettleOptions {
        SettleOptions {
            poll_interval: self.config.settle_poll(),
            settle_window: self.config.settle_window(),
            threshold: self.config.settle_threshold_chars,
            timeout: self.config.render_timeout(),
        }
    }

    async fn render_page(&self, page: &Page, url: &str) -> Result<String> {
        if let Some(ref ua) = self.config.user_agent {
            page.set_user_agent(ua)
                .await
                .map_err(|e| DogearError::Render(format!("Failed to set user agent: {}", e)))?;
        }

        page.goto(url)
            .await
            .map_err(|e| DogearError::Render(format!("Navigation failed: {}", e)))?;

        match tokio::time::timeout(self.config.navigation_timeout(), page.wait_for_navigation()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(DogearError::Render(format!("Navigation failed: {}", e))),
            Err(_) => {
                return Err(DogearError::Timeout(format!(
                    "navigation to {} exceeded {}s",
                    url, self.config.navigation_timeout_secs
                )))
            }
        }

        let length = wait_for_settle(move || visible_text_length(page), self.settle_options()).await?;
        tracing::debug!("Rendered {} settled at {} visible chars", url, length);

        page.content()
            .await
            .map_err(|e| DogearError::Render(format!("Failed to read page content: {}", e)))
    }
}

async fn launch(headless: bool) -> Result<Arc<Browser>> {
    let mut builder = BrowserConfig::builder()
        .arg("--no-sandbox")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-software-rasterizer");

    if !headless {
        builder = builder.with_head();
    }

    let browser_config = builder
        .build()
        .map_err(|e| DogearError::Render(format!("Failed to build browser config: {}", e)))?;

    let (browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| {
        DogearError::Render(format!(
            "Failed to launch browser: {}. Is Chrome or Chromium installed and in PATH?",
            e
        ))
    })?;

    tokio::spawn(async move { while handler.next().await.is_some() {} });

    tracing::info!("Launched headless browser");
    Ok(Arc::new(browser))
}

async fn visible_text_length(page: &Page) -> Result<usize> {
    page.evaluate(VISIBLE_TEXT_LENGTH)
        .await
        .map_err(|e| DogearError::Render(format!("Script execution failed: {}", e)))?
        .into_value::<usize>()
        .map_err(|e| DogearError::Render(format!("Failed to parse result: {:?}", e)))
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn render(&self, url: &str) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| DogearError::Render(format!("Semaphore error: {}", e)))?;

        let browser = self.browser().await?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DogearError::Render(format!("Failed to create page: {}", e)))?;

        let budget = self.config.page_budget();
        let closing = page.clone();
        bounded(budget, self.render_page(&page, url), async move {
            if let Err(e) = closing.close().await {
                tracing::warn!("Failed to close page for {}: {}", url, e);
            }
        })
        .await
    }
}

/// Run `work` for at most `budget`, then run `cleanup` whatever the result.
async fn bounded<T>(
    budget: Duration,
    work: impl Future<Output = Result<T>>,
    cleanup: impl Future<Output = ()>,
) -> Result<T> {
    let result = match tokio::time::timeout(budget, work).await {
        Ok(result) => result,
        Err(_) => Err(DogearError::Timeout(format!(
            "rendering exceeded {}s",
            budget.as_secs()
        ))),
    };
    cleanup.await;
    result
}
