use super::{ProbeTarget, Sample, SampleError, Sampler};
use reqwest::{header::RETRY_AFTER, Client};
use std::time::{Duration, Instant};
use tracing::debug;

/// HTTP sampler recording status code and full-response latency.
///
/// One [`Client`] is shared by every sample so connections are pooled; the
/// sampler itself holds no mutable state and is safe to call concurrently.
pub struct HttpSampler {
    client: Client,
    target: ProbeTarget,
    timeout: Duration,
}

impl HttpSampler {
    pub fn new(target: ProbeTarget, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self::with_client(client, target, timeout))
    }

    pub fn with_client(client: Client, target: ProbeTarget, timeout: Duration) -> Self {
        Self {
            client,
            target,
            timeout,
        }
    }
}

fn classify_error(err: &reqwest::Error) -> SampleError {
    if err.is_timeout() {
        SampleError::Timeout
    } else if err.is_connect() {
        SampleError::Connect
    } else if err.is_redirect() {
        SampleError::Redirect
    } else if err.is_body() || err.is_decode() {
        SampleError::Body
    } else {
        SampleError::Request
    }
}

#[async_trait::async_trait]
impl Sampler for HttpSampler {
    async fn sample(&self) -> Sample {
        let request = self
            .client
            .request(self.target.method.clone(), self.target.url.clone())
            .headers(self.target.headers.clone())
            .timeout(self.timeout);

        let start = Instant::now();
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                let latency = start.elapsed();
                debug!(error = %e, ?latency, "request failed");
                return Sample::failed(classify_error(&e), latency);
            }
        };

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Latency covers the whole response, so drain the body before stopping the clock.
        if let Err(e) = response.bytes().await {
            let latency = start.elapsed();
            debug!(error = %e, status, ?latency, "response body failed");
            return Sample::failed(classify_error(&e), latency);
        }
        let latency = start.elapsed();
        debug!(status, ?latency, "request completed");

        Sample::completed(status, latency).with_retry_after(retry_after)
    }

    fn method(&self) -> &str {
        self.target.method.as_str()
    }

    fn url(&self) -> &str {
        self.target.url.as_str()
    }
}
