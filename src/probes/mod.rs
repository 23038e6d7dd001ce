//! Request sampling: one outbound HTTP request in, one [`Sample`] out.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod http;

pub use http::HttpSampler;

/// Network-level failure kinds. An HTTP error status (e.g. 500) is never one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleError {
    Timeout,
    Connect,
    Redirect,
    Body,
    Request,
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::Timeout => write!(f, "timeout"),
            SampleError::Connect => write!(f, "connect"),
            SampleError::Redirect => write!(f, "redirect"),
            SampleError::Body => write!(f, "body"),
            SampleError::Request => write!(f, "request"),
        }
    }
}

/// A single recorded request attempt. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// `None` when the request failed at the network level.
    pub status: Option<u16>,
    pub latency: Duration,
    pub error: Option<SampleError>,
    /// Raw `Retry-After` header, if the target sent one.
    pub retry_after: Option<String>,
}

impl Sample {
    pub fn completed(status: u16, latency: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            status: Some(status),
            latency,
            error: None,
            retry_after: None,
        }
    }

    pub fn failed(error: SampleError, latency: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            status: None,
            latency,
            error: Some(error),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<String>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// True when a response (of any status) came back.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status.is_some()
    }
}

/// What gets probed: the URL plus the request shape sent on every sample.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub url: reqwest::Url,
    pub method: reqwest::Method,
    pub headers: reqwest::header::HeaderMap,
}

/// Injected HTTP capability used by the baseline estimator and the controller.
///
/// Implementations must not retry: a failed attempt is returned as a failed
/// [`Sample`] and interpreted by the caller.
#[async_trait::async_trait]
pub trait Sampler: Send + Sync {
    /// Issue exactly one request and record the outcome.
    async fn sample(&self) -> Sample;

    /// HTTP method every sample uses.
    fn method(&self) -> &str;

    /// URL every sample is sent to.
    fn url(&self) -> &str;

    /// `METHOD url`, for logs.
    fn describe(&self) -> String {
        format!("{} {}", self.method(), self.url())
    }
}
