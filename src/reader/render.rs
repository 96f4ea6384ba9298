use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::app::Result;

/// Headless rendering capability: returns the page HTML after scripts ran.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String>;
}

/// Parameters for [`wait_for_settle`].
#[derive(Debug, Clone, Copy)]
pub struct SettleOptions {
    pub poll_interval: Duration,
    pub settle_window: Duration,
    pub threshold: usize,
    pub timeout: Duration,
}

/// Poll `sample` (visible text length) until it stops changing.
///
/// The length counts as stable while consecutive samples differ by less than
/// `threshold`; once it has been stable for `settle_window` we return. When
/// `timeout` runs out first, the last observed length is returned anyway.
pub async fn wait_for_settle<F, Fut>(mut sample: F, options: SettleOptions) -> Result<usize>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<usize>>,
{
    let deadline = Instant::now() + options.timeout;
    let mut last = sample().await?;
    let mut stable_since = Instant::now();

    loop {
        if Instant::now() >= deadline {
            tracing::debug!("Render did not settle before timeout ({} chars)", last);
            return Ok(last);
        }

        tokio::time::sleep(options.poll_interval).await;
        let current = sample().await?;
        let now = Instant::now();

        if current.abs_diff(last) < options.threshold {
            if now.duration_since(stable_since) >= options.settle_window {
                return Ok(current);
            }
        } else {
            stable_since = now;
        }
        last = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn options() -> SettleOptions {
        SettleOptions {
            poll_interval: Duration::from_millis(5),
            settle_window: Duration::from_millis(20),
            threshold: 10,
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_returns_once_length_stops_growing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sample = move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                // Grows for five samples, then stays put
                Ok(n.min(5) * 1000)
            }
        };

        let length = wait_for_settle(sample, options()).await.unwrap();
        assert_eq!(length, 5000);
        assert!(calls.load(Ordering::SeqCst) > 6);
    }

    #[tokio::test]
    async fn test_small_changes_count_as_stable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sample = move || {
            let counter = counter.clone();
            async move { Ok(500 + counter.fetch_add(1, Ordering::SeqCst) % 3) }
        };

        let length = wait_for_settle(sample, options()).await.unwrap();
        assert!((500..503).contains(&length));
    }

    #[tokio::test]
    async fn test_gives_up_at_timeout() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sample = move || {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) * 1000) }
        };

        let options = SettleOptions {
            timeout: Duration::from_millis(50),
            ..options()
        };
        let started = std::time::Instant::now();
        let length = wait_for_settle(sample, options).await.unwrap();
        assert!(length > 0);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_sample_errors_propagate() {
        let sample = || async { Err(crate::app::DogearError::Render("page gone".into())) };
        assert!(wait_for_settle(sample, options()).await.is_err());
    }
}
