use std::time::Duration;

use cornerstone_domain::error::DomainError;
use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::time::sleep;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("response decode error: {0}")]
    InvalidResponse(String),
}

impl From<HttpError> for DomainError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Transport(_) => DomainError::Unavailable(err.to_string()),
            HttpError::Status { status, .. } if status == 429 || status >= 500 => {
                DomainError::Unavailable(err.to_string())
            }
            HttpError::Status { .. } | HttpError::InvalidResponse(_) => {
                DomainError::Upstream(err.to_string())
            }
        }
    }
}

/// Bounded retry for idempotent upstream calls.
#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_millis(200),
            max: Duration::from_secs(2),
        }
    }
}

pub fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Sends the request built by `build`, retrying transport errors, 429 and 5xx.
/// Any other response is handed back for the caller to interpret.
pub async fn send_with_retry<F>(settings: RetrySettings, build: F) -> Result<Response, HttpError>
where
    F: Fn() -> RequestBuilder,
{
    let attempts = settings.attempts.max(1);

    for attempt in 0..attempts {
        let last = attempt + 1 >= attempts;
        let response = match build().send().await {
            Ok(response) => response,
            Err(err) => {
                if !last {
                    tracing::debug!(attempt, error = %err, "upstream transport error, retrying");
                    sleep(backoff_for_attempt(settings.base, settings.max, attempt)).await;
                    continue;
                }
                return Err(HttpError::Transport(err.to_string()));
            }
        };

        let status = response.status();
        if !is_retryable(status) {
            return Ok(response);
        }
        if !last {
            tracing::debug!(attempt, status = status.as_u16(), "upstream busy, retrying");
            sleep(backoff_for_attempt(settings.base, settings.max, attempt)).await;
            continue;
        }
        let message = response.text().await.unwrap_or_default();
        return Err(HttpError::Status {
            status: status.as_u16(),
            message,
        });
    }

    Err(HttpError::Transport(
        "retry loop exited unexpectedly".to_string(),
    ))
}

/// Turns a non-success response into `HttpError::Status`.
pub async fn error_for_status(response: Response) -> Result<Response, HttpError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(HttpError::Status {
        status: status.as_u16(),
        message,
    })
}

pub fn endpoint_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub fn backoff_for_attempt(base: Duration, max: Duration, attempt: u32) -> Duration {
    if base.is_zero() {
        return Duration::from_millis(1);
    }
    let multiplier = 1u64 << attempt.min(8);
    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let delay_ms = base_ms.saturating_mul(multiplier).max(1);
    if max_ms == 0 {
        Duration::from_millis(delay_ms)
    } else {
        Duration::from_millis(delay_ms.min(max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_joins_without_double_slashes() {
        assert_eq!(
            endpoint_url("http://es:9200/", "/posts/_doc/1"),
            "http://es:9200/posts/_doc/1"
        );
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(500);
        assert_eq!(backoff_for_attempt(base, max, 0), Duration::from_millis(100));
        assert_eq!(backoff_for_attempt(base, max, 2), Duration::from_millis(400));
        assert_eq!(backoff_for_attempt(base, max, 5), Duration::from_millis(500));
    }

    #[test]
    fn only_throttling_and_server_errors_retry() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::CONFLICT));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
    }

    #[test]
    fn server_errors_become_retryable_domain_errors() {
        let busy: DomainError = HttpError::Status {
            status: 503,
            message: String::new(),
        }
        .into();
        assert!(matches!(busy, DomainError::Unavailable(_)));
        let rejected: DomainError = HttpError::Status {
            status: 400,
            message: "bad".into(),
        }
        .into();
        assert!(matches!(rejected, DomainError::Upstream(_)));
    }
}
