use crate::app::DogearError;

pub const CONFIG_MISSING: &str = "config_missing";
pub const UPSTREAM_TIMEOUT_OR_5XX: &str = "upstream_timeout_or_5xx";
pub const PARSE_FAILURE: &str = "parse_failure";

/// A classified job error as it is persisted on the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub code: String,
    pub retryable: bool,
    pub message: String,
}

impl JobFailure {
    pub fn new(code: impl Into<String>, retryable: bool, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            retryable,
            message: message.into(),
        }
    }

    /// Map an error raised by `channel`'s unit of work onto the job taxonomy.
    ///
    /// Anything not recognised is terminal, so an unknown failure mode can
    /// never loop through retries forever.
    pub fn classify(error: &DogearError, channel: &str) -> Self {
        let message = error.to_string();
        match error {
            DogearError::ConfigMissing(_) => Self::new(CONFIG_MISSING, false, message),
            DogearError::Timeout(_) => Self::new(UPSTREAM_TIMEOUT_OR_5XX, true, message),
            DogearError::Upstream { status, .. } if is_transient_status(*status) => {
                Self::new(UPSTREAM_TIMEOUT_OR_5XX, true, message)
            }
            DogearError::Http(e) if is_transient_http(e) => {
                Self::new(UPSTREAM_TIMEOUT_OR_5XX, true, message)
            }
            DogearError::Io(e) if is_transient_io(e) => {
                Self::new(UPSTREAM_TIMEOUT_OR_5XX, true, message)
            }
            DogearError::Parse(_) => Self::new(PARSE_FAILURE, false, message),
            _ => Self::new(format!("{}_failed", channel), false, message),
        }
    }
}

fn is_transient_status(status: u16) -> bool {
    status >= 500 || status == 429 || status == 408
}

fn is_transient_http(e: &reqwest::Error) -> bool {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        return true;
    }
    e.status().is_some_and(|s| is_transient_status(s.as_u16()))
}

fn is_transient_io(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credentials_are_terminal() {
        let failure = JobFailure::classify(&DogearError::ConfigMissing("mail.api_key".into()), "kindle");
        assert_eq!(failure.code, CONFIG_MISSING);
        assert!(!failure.retryable);
        assert!(failure.message.contains("mail.api_key"));
    }

    #[test]
    fn test_upstream_statuses() {
        for status in [500, 502, 503, 429] {
            let err = DogearError::Upstream {
                status,
                message: "x".into(),
            };
            let failure = JobFailure::classify(&err, "cover");
            assert_eq!(failure.code, UPSTREAM_TIMEOUT_OR_5XX, "status {}", status);
            assert!(failure.retryable);
        }

        let err = DogearError::Upstream {
            status: 400,
            message: "bad prompt".into(),
        };
        let failure = JobFailure::classify(&err, "cover");
        assert_eq!(failure.code, "cover_failed");
        assert!(!failure.retryable);
    }

    #[test]
    fn test_timeouts_and_resets_retry() {
        assert!(JobFailure::classify(&DogearError::Timeout("image api".into()), "cover").retryable);
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(JobFailure::classify(&DogearError::Io(reset), "cover").retryable);
    }

    #[test]
    fn test_parse_failure_is_terminal() {
        let failure = JobFailure::classify(&DogearError::Parse("no content".into()), "kindle");
        assert_eq!(failure.code, PARSE_FAILURE);
        assert!(!failure.retryable);
    }

    #[test]
    fn test_unknown_errors_are_terminal() {
        let failure = JobFailure::classify(&DogearError::Other("weird".into()), "kindle");
        assert_eq!(failure.code, "kindle_failed");
        assert!(!failure.retryable);
    }
}
