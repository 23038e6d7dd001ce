use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::series::{LatencySeries, StatusCounts};
use super::BaselineError;
use crate::probes::Sampler;

/// Reference behavior of the target under low, sequential load. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Most frequent status among successful samples.
    pub reference_status: u16,
    /// Median latency among successful samples.
    #[serde(with = "super::millis")]
    pub reference_latency: Duration,
    /// Summed latency of the successful samples.
    #[serde(with = "super::millis")]
    pub latency_total: Duration,
    /// Successful samples the reference was computed from.
    pub sample_count: usize,
    /// Requests issued while baselining, failures included.
    pub requests_sent: usize,
}

/// Tunables for [`establish_baseline`].
#[derive(Debug, Clone)]
pub struct BaselineSettings {
    pub count: usize,
    pub min_successes: usize,
    pub inter_request_delay: Duration,
}

impl Default for BaselineSettings {
    fn default() -> Self {
        Self {
            count: 5,
            min_successes: 3,
            inter_request_delay: Duration::from_millis(250),
        }
    }
}

/// Sample the target `settings.count` times, strictly one request at a time,
/// and derive the reference status and latency.
pub async fn establish_baseline(
    sampler: &dyn Sampler,
    settings: &BaselineSettings,
) -> Result<Baseline, BaselineError> {
    info!(count = settings.count, target = %sampler.describe(), "Establishing baseline");

    let mut samples = Vec::with_capacity(settings.count);
    for i in 0..settings.count {
        if i > 0 && !settings.inter_request_delay.is_zero() {
            tokio::time::sleep(settings.inter_request_delay).await;
        }
        let sample = sampler.sample().await;
        debug!(
            index = i,
            status = ?sample.status,
            latency = ?sample.latency,
            error = ?sample.error,
            "baseline sample"
        );
        samples.push(sample);
    }

    let statuses = StatusCounts::from_samples(&samples);
    let successes = statuses.total();
    if successes == 0 {
        return Err(BaselineError::Unreachable {
            attempted: samples.len(),
        });
    }
    if successes < settings.min_successes {
        return Err(BaselineError::Unstable {
            reason: format!(
                "only {successes} of {} baseline requests succeeded, need {}",
                samples.len(),
                settings.min_successes
            ),
        });
    }

    let reference_status = statuses.majority().ok_or_else(|| BaselineError::Unstable {
        reason: format!("no majority status across {successes} successful samples"),
    })?;

    let latencies = LatencySeries::from_samples(&samples);
    let reference_latency = latencies.median().ok_or_else(|| BaselineError::Unstable {
        reason: "no latency measurements".to_string(),
    })?;

    if reference_status == 429 {
        warn!("Target already answers 429 at baseline load");
    }

    let baseline = Baseline {
        reference_status,
        reference_latency,
        latency_total: latencies.total(),
        sample_count: successes,
        requests_sent: samples.len(),
    };
    info!(
        status = baseline.reference_status,
        latency_ms = baseline.reference_latency.as_secs_f64() * 1000.0,
        samples = baseline.sample_count,
        "Baseline established"
    );
    Ok(baseline)
}
