use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};

use crate::app::{DogearError, Result};
use crate::fetcher::{FetchedBytes, FetchedPage, Fetcher};

const DEFAULT_USER_AGENT: &str = concat!("dogear/", env!("CARGO_PKG_VERSION"));

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .build()?;

        Ok(Self { client })
    }

    async fn get(&self, url: &str, accept: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, accept)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DogearError::upstream(status, &body));
        }
        Ok(response)
    }
}

fn map_send_error(e: reqwest::Error) -> DogearError {
    if e.is_timeout() {
        DogearError::Timeout(e.to_string())
    } else {
        DogearError::Http(e)
    }
}

fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_html(&self, url: &str) -> Result<FetchedPage> {
        let response = self
            .get(url, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .await?;

        let final_url = response.url().to_string();
        let content_type = content_type(&response);
        let body = response.text().await.map_err(map_send_error)?;

        tracing::debug!("Fetched {} ({} bytes)", final_url, body.len());
        Ok(FetchedPage {
            body,
            final_url,
            content_type,
        })
    }

    async fn fetch_bytes(&self, url: &str, max_bytes: usize) -> Result<FetchedBytes> {
        let response = self.get(url, "image/*,*/*;q=0.5").await?;

        if let Some(length) = response.content_length() {
            if length as usize > max_bytes {
                return Err(DogearError::Other(format!(
                    "{} is {} bytes, limit is {}",
                    url, length, max_bytes
                )));
            }
        }

        let content_type = content_type(&response);
        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_send_error)?;
            if bytes.len() + chunk.len() > max_bytes {
                return Err(DogearError::Other(format!(
                    "{} exceeds the {} byte limit",
                    url, max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedBytes {
            bytes,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5), None).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_html_reports_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>hi</body></html>", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let page = fetcher()
            .fetch_html(&format!("{}/post", server.uri()))
            .await
            .unwrap();
        assert_eq!(page.content_type.as_deref(), Some("text/html"));
        assert!(page.body.contains("hi"));
        assert!(page.final_url.ends_with("/post"));
    }

    #[tokio::test]
    async fn test_server_errors_become_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = fetcher().fetch_html(&server.uri()).await.unwrap_err();
        assert!(matches!(err, DogearError::Upstream { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_fetch_bytes_enforces_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0u8; 2048]),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/small.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![1u8; 16]),
            )
            .mount(&server)
            .await;

        let f = fetcher();
        assert!(f
            .fetch_bytes(&format!("{}/big.png", server.uri()), 1024)
            .await
            .is_err());

        let small = f
            .fetch_bytes(&format!("{}/small.png", server.uri()), 1024)
            .await
            .unwrap();
        assert_eq!(small.bytes.len(), 16);
        assert_eq!(small.content_type.as_deref(), Some("image/png"));
    }
}
