use thiserror::Error;

#[derive(Error, Debug)]
pub enum DogearError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A required credential or setting is absent.
    #[error("Missing configuration: {0}")]
    ConfigMissing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Non-2xx answer from an upstream API.
    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    /// Source content was empty or could not be parsed into something usable.
    #[error("Parse failure: {0}")]
    Parse(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Write conflict on {0}")]
    Conflict(String),

    #[error("{0}")]
    Other(String),
}

impl DogearError {
    /// Builds an upstream error from a status and a response body.
    pub fn upstream(status: reqwest::StatusCode, body: &str) -> Self {
        let message: String = body.chars().take(300).collect();
        Self::Upstream {
            status: status.as_u16(),
            message,
        }
    }
}

pub type Result<T> = std::result::Result<T, DogearError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_truncates_body() {
        let body = "x".repeat(1000);
        let err = DogearError::upstream(reqwest::StatusCode::BAD_GATEWAY, &body);
        match err {
            DogearError::Upstream { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message.len(), 300);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
