//! HTTP execution with fixed-delay retry and digest authentication.

mod client;
mod retry;

pub use client::HttpClient;
pub use retry::{NonRetryableError, RetryPolicy, RetryWhen, classify_error};
