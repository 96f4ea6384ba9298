use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::{DogearError, Result};
use crate::cover::{CoverConfig, GeneratedImage, ImageGenerator, PartialCallback, PartialImage};

/// gpt-image models answer in PNG unless told otherwise.
const IMAGE_CONTENT_TYPE: &str = "image/png";

/// Image generation over an OpenAI-compatible `/images/generations` endpoint.
pub struct OpenAiImageGenerator {
    client: Client,
    config: CoverConfig,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

/// One SSE event of a streaming generation.
#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    b64_json: Option<String>,
    partial_image_index: Option<u32>,
}

impl OpenAiImageGenerator {
    pub fn new(config: CoverConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client, config })
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| DogearError::ConfigMissing("cover.api_key".to_string()))
    }

    fn body(&self, prompt: &str, stream: bool) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "prompt": prompt,
            "size": self.config.size,
            "quality": self.config.quality,
            "n": 1,
        });
        if stream {
            body["stream"] = Value::Bool(true);
            body["partial_images"] = json!(self.config.partial_images);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<Response> {
        let api_key = self.api_key()?;
        let response = self
            .client
            .post(format!("{}/images/generations", self.config.base_url.trim_end_matches('/')))
            .header(AUTHORIZATION, format!("Bearer {}", api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DogearError::Timeout(format!("image generation: {}", e))
                } else {
                    DogearError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!("Image API error {}: {}", status, error_text);
            return Err(DogearError::upstream(status, &error_text));
        }
        Ok(response)
    }

    fn image(&self, b64: Option<String>) -> Option<GeneratedImage> {
        b64.filter(|data| !data.is_empty()).map(|base64| GeneratedImage {
            base64,
            content_type: IMAGE_CONTENT_TYPE.to_string(),
        })
    }
}

/// Pop the next complete `data:` payload from an SSE buffer.
fn next_sse_data(buffer: &mut String) -> Option<String> {
    loop {
        let newline = buffer.find('\n')?;
        let line = buffer[..newline].trim().to_string();
        buffer.drain(..=newline);

        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if !data.is_empty() {
                return Some(data.to_string());
            }
        }
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<Option<GeneratedImage>> {
        let response = self.post(&self.body(prompt, false)).await?;
        let parsed: ImagesResponse = response
            .json()
            .await
            .map_err(|e| DogearError::Parse(format!("image response: {}", e)))?;

        Ok(self.image(parsed.data.into_iter().find_map(|d| d.b64_json)))
    }

    async fn generate_streaming(
        &self,
        prompt: &str,
        on_partial: &PartialCallback,
    ) -> Result<Option<GeneratedImage>> {
        let response = self.post(&self.body(prompt, true)).await?;
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut completed = None;

        loop {
            while let Some(data) = next_sse_data(&mut buffer) {
                if data == "[DONE]" {
                    return Ok(self.image(completed));
                }
                let event: StreamEvent = match serde_json::from_str(&data) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::debug!("Skipping unparseable image stream event: {}", e);
                        continue;
                    }
                };
                match event.kind.as_str() {
                    "image_generation.partial_image" => {
                        if let Some(base64) = event.b64_json {
                            on_partial(&PartialImage {
                                index: event.partial_image_index.unwrap_or(0),
                                base64,
                            });
                        }
                    }
                    "image_generation.completed" => completed = event.b64_json,
                    other => tracing::debug!("Ignoring image stream event {}", other),
                }
            }

            match stream.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    buffer.push_str(&String::from_utf8_lossy(&chunk));
                }
                None => {
                    // Flush a final event that lacked its trailing newline
                    buffer.push('\n');
                    if let Some(data) = next_sse_data(&mut buffer) {
                        if let Ok(event) = serde_json::from_str::<StreamEvent>(&data) {
                            if event.kind == "image_generation.completed" {
                                completed = event.b64_json;
                            }
                        }
                    }
                    return Ok(self.image(completed));
                }
            }
        }
    }
}
