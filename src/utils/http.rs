use super::retry::{RetryHint, Retryable};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Per-request ceiling for provider calls. Long TTS batches can take minutes.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// A failed response the caller may try again, optionally after a server-specified wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableError {
    pub status: u16,
    pub body: String,
    pub min_wait: Option<Duration>,
}

impl fmt::Display for RetryableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.min_wait {
            Some(wait) => write!(
                f,
                "HTTP {} (retry after {:?}): {}",
                self.status, wait, self.body
            ),
            None => write!(f, "HTTP {}: {}", self.status, self.body),
        }
    }
}

/// Transport-level failure of a call to a remote script or speech backend.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// 429, 408 and 5xx responses.
    #[error("{0}")]
    Retryable(RetryableError),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    /// Any other 4xx: bad credential, unknown voice, malformed request.
    #[error("request rejected with HTTP {status}: {body}")]
    Fatal { status: u16, body: String },
    /// A 2xx response whose body could not be used.
    #[error("malformed provider response: {0}")]
    Malformed(String),
    /// Local misconfiguration detected before any request was sent.
    #[error("provider misconfigured: {0}")]
    Config(String),
}

impl Retryable for ProviderError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            ProviderError::Retryable(e) => RetryHint::Retry {
                min_wait: e.min_wait,
            },
            ProviderError::Timeout(_) => RetryHint::Timeout,
            ProviderError::Network(_) | ProviderError::Malformed(_) => {
                RetryHint::Retry { min_wait: None }
            }
            ProviderError::Fatal { .. } | ProviderError::Config(_) => RetryHint::Fatal,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else if e.is_decode() {
            ProviderError::Malformed(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// Build a client with a total request timeout.
pub fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Turn a non-success response into a classified [`ProviderError`].
///
/// Retries are the caller's business: 429 / 408 / 5xx come back as
/// [`ProviderError::Retryable`] carrying any `Retry-After` wait, other client
/// errors are permanent and come back as [`ProviderError::Fatal`].
pub async fn check_response(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let min_wait = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, body, min_wait))
}

pub fn classify_status(status: StatusCode, body: String, min_wait: Option<Duration>) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ProviderError::Retryable(RetryableError {
            status: status.as_u16(),
            body,
            min_wait,
        })
    } else {
        ProviderError::Fatal {
            status: status.as_u16(),
            body,
        }
    }
}

/// Read the server's minimum wait from `retry-after-ms` or `Retry-After`
/// (delta-seconds or an HTTP date).
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(ms) = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
    {
        if ms.is_finite() && ms >= 0.0 {
            return Some(Duration::from_secs_f64(ms / 1000.0));
        }
    }

    let raw = headers.get("retry-after").and_then(|v| v.to_str().ok())?;
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Some(Duration::from_secs_f64(secs));
        }
        return None;
    }

    let at = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(5)));
    }

    #[test]
    fn retry_after_ms_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("5"));
        headers.insert("retry-after-ms", HeaderValue::from_static("250"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(250)));
    }

    #[test]
    fn retry_after_past_date_is_zero() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));
    }

    #[test]
    fn garbage_retry_after_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn status_classification() {
        let rate_limited = classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down".into(), None);
        assert!(matches!(rate_limited, ProviderError::Retryable(_)));

        let unavailable = classify_status(StatusCode::SERVICE_UNAVAILABLE, String::new(), None);
        assert!(matches!(unavailable.retry_hint(), RetryHint::Retry { .. }));

        let unauthorized = classify_status(StatusCode::UNAUTHORIZED, "bad key".into(), None);
        assert!(matches!(unauthorized.retry_hint(), RetryHint::Fatal));

        let unknown_voice = classify_status(StatusCode::NOT_FOUND, "voice".into(), None);
        assert!(matches!(unknown_voice, ProviderError::Fatal { status: 404, .. }));
    }
}
