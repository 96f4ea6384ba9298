use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for content extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Minimum word count for an extraction to count as a success (default: 50)
    pub min_words: usize,

    /// Timeout for fetching the raw page in seconds (default: 20)
    pub fetch_timeout_secs: u64,

    /// Use a headless browser when static extraction fails (default: true)
    pub render_enabled: bool,

    /// Whether to run the browser in headless mode (default: true)
    pub headless: bool,

    /// Navigation timeout in seconds (default: 20)
    pub navigation_timeout_secs: u64,

    /// Overall render budget in seconds, navigation included (default: 30)
    pub render_timeout_secs: u64,

    /// Interval between visible-text samples in milliseconds (default: 500)
    pub settle_poll_ms: u64,

    /// How long the text length must stay stable in milliseconds (default: 1500)
    pub settle_window_ms: u64,

    /// Largest change in visible text length still counted as stable (default: 50)
    pub settle_threshold_chars: usize,

    /// CSS selectors for likely article containers
    pub content_selectors: Vec<String>,

    /// Substrings in raw HTML that indicate a client-rendered page
    pub hydration_markers: Vec<String>,

    /// User agent string to use
    pub user_agent: Option<String>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            min_words: 50,
            fetch_timeout_secs: 20,
            render_enabled: true,
            headless: true,
            navigation_timeout_secs: 20,
            render_timeout_secs: 30,
            settle_poll_ms: 500,
            settle_window_ms: 1500,
            settle_threshold_chars: 50,
            content_selectors: vec![
                // Common article content selectors in priority order
                "article".to_string(),
                "[role=\"main\"]".to_string(),
                "main".to_string(),
                "[itemprop=\"articleBody\"]".to_string(),
                ".post-content".to_string(),
                ".article-content".to_string(),
                ".article-body".to_string(),
                ".entry-content".to_string(),
                ".content".to_string(),
                "#content".to_string(),
                ".post".to_string(),
                ".article".to_string(),
                ".blog-post".to_string(),
            ],
            hydration_markers: vec![
                "id=\"__next\"".to_string(),
                "__NEXT_DATA__".to_string(),
                "id=\"__nuxt\"".to_string(),
                "window.__NUXT__".to_string(),
                "data-reactroot".to_string(),
                "ng-version=".to_string(),
                "data-server-rendered".to_string(),
                "window.__INITIAL_STATE__".to_string(),
                "<div id=\"root\"></div>".to_string(),
                "<div id=\"app\"></div>".to_string(),
            ],
            user_agent: Some(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .to_string(),
            ),
        }
    }
}

impl ReaderConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    /// Budget for one page in the browser: navigation plus settling.
    pub fn page_budget(&self) -> Duration {
        self.render_timeout() * 2
    }

    /// Outer deadline for a whole render, leaving the browser time to close its tab.
    pub fn render_deadline(&self) -> Duration {
        self.page_budget() + crate::reader::chrome::PAGE_CLOSE_GRACE
    }

    pub fn settle_poll(&self) -> Duration {
        Duration::from_millis(self.settle_poll_ms)
    }

    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }

    /// Create a config that never starts a browser
    pub fn static_only() -> Self {
        Self {
            render_enabled: false,
            ..Default::default()
        }
    }
}
