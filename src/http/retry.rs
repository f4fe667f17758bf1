//! Fixed-delay retry policy with a pluggable retry predicate.

use log::debug;
use reqwest::StatusCode;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Failures that [`RetryWhen::Transient`] gives up on immediately.
#[derive(Debug)]
pub enum NonRetryableError {
    /// Too many requests (HTTP 429)
    RateLimitExceeded(String),
    /// Authentication failed (HTTP 401)
    AuthenticationFailed(String),
    /// Resource not found (HTTP 404)
    NotFound(String),
    /// Forbidden access (HTTP 403)
    Forbidden(String),
    /// Other client errors that won't succeed on retry
    ClientError(String),
}

impl fmt::Display for NonRetryableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NonRetryableError::RateLimitExceeded(msg) => write!(f, "Rate limit exceeded: {}", msg),
            NonRetryableError::AuthenticationFailed(msg) => {
                write!(f, "Authentication failed: {}. Check the service credentials.", msg)
            }
            NonRetryableError::NotFound(msg) => write!(f, "Not found: {}", msg),
            NonRetryableError::Forbidden(msg) => write!(f, "Access forbidden: {}", msg),
            NonRetryableError::ClientError(msg) => write!(f, "Request error: {}", msg),
        }
    }
}

impl std::error::Error for NonRetryableError {}

/// Classifies an error as retryable or non-retryable.
/// Returns Ok(()) if the error is retryable, Err describing why it is not.
pub fn classify_error(error: &reqwest::Error) -> Result<(), NonRetryableError> {
    if let Some(status) = error.status() {
        match status {
            StatusCode::UNAUTHORIZED => {
                return Err(NonRetryableError::AuthenticationFailed(
                    "Invalid or missing credentials".to_string(),
                ));
            }
            StatusCode::FORBIDDEN => {
                return Err(NonRetryableError::Forbidden(
                    "Access to this resource is forbidden".to_string(),
                ));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(NonRetryableError::RateLimitExceeded(
                    "Too many requests".to_string(),
                ));
            }
            StatusCode::NOT_FOUND => {
                return Err(NonRetryableError::NotFound(
                    "The requested resource was not found".to_string(),
                ));
            }
            // Other 4xx client errors are generally not retryable
            s if s.is_client_error() => {
                return Err(NonRetryableError::ClientError(format!(
                    "HTTP {} error",
                    s.as_u16()
                )));
            }
            // 5xx server errors are retryable
            _ => {}
        }
    }

    // Connection errors, timeouts, etc. are retryable
    Ok(())
}

/// Decides whether a failed attempt is tried again.
#[derive(Clone, Default)]
pub enum RetryWhen {
    /// Any transport error or non-success status.
    #[default]
    AnyFailure,
    /// Transport errors and 5xx responses; 4xx responses fail immediately.
    Transient,
    Custom(Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>),
}

impl fmt::Debug for RetryWhen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryWhen::AnyFailure => write!(f, "AnyFailure"),
            RetryWhen::Transient => write!(f, "Transient"),
            RetryWhen::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl RetryWhen {
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        RetryWhen::Custom(Arc::new(predicate))
    }

    pub fn should_retry(&self, error: &anyhow::Error) -> bool {
        match self {
            RetryWhen::AnyFailure => true,
            RetryWhen::Transient => match error.downcast_ref::<reqwest::Error>() {
                Some(e) => match classify_error(e) {
                    Ok(()) => true,
                    Err(reason) => {
                        debug!("Not retrying: {}", reason);
                        false
                    }
                },
                None => true,
            },
            RetryWhen::Custom(predicate) => predicate(error),
        }
    }
}

/// Up to `attempts` tries with a fixed `delay` between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub when: RetryWhen,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            when: RetryWhen::default(),
        }
    }

    pub fn when(mut self, when: RetryWhen) -> Self {
        self.when = when;
        self
    }

    /// Runs `operation` until it succeeds, the predicate refuses, or attempts run out.
    /// The last error is returned unchanged.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, operation: F) -> anyhow::Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt >= attempts {
                        debug!("{}: giving up after {} attempts", operation_name, attempt);
                        return Err(e);
                    }
                    if !self.when.should_retry(&e) {
                        debug!("{}: non-retryable error: {}", operation_name, e);
                        return Err(e);
                    }

                    log::warn!(
                        "{}: attempt {}/{} failed ({}), retrying in {}ms...",
                        operation_name,
                        attempt,
                        attempts,
                        e,
                        self.delay.as_millis()
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
