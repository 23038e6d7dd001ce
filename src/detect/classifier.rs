use tracing::debug;

use super::series::{LatencySeries, StatusCounts};
use super::{Baseline, Classification, Detection, Signal};
use crate::probes::Sample;

const TOO_MANY_REQUESTS: u16 = 429;

/// An ordered group of samples issued concurrently at one density level.
#[derive(Debug, Clone)]
pub struct Batch {
    pub density_level: usize,
    pub samples: Vec<Sample>,
}

impl Batch {
    pub fn new(density_level: usize, samples: Vec<Sample>) -> Self {
        Self {
            density_level,
            samples,
        }
    }

    pub fn successes(&self) -> usize {
        self.samples.iter().filter(|s| s.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.samples.len() - self.successes()
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Median batch latency above `reference_latency * latency_multiplier`
    /// counts as throttling.
    pub latency_multiplier: f64,
    /// Dominant statuses that read as access denial when the baseline was accepting.
    pub blocking_statuses: Vec<u16>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            latency_multiplier: 3.0,
            blocking_statuses: vec![401, 403, 503],
        }
    }
}

/// Compares a batch against the baseline. Signals are checked in priority
/// order and the first match wins.
#[derive(Debug, Clone, Default)]
pub struct Detector {
    settings: DetectorSettings,
}

impl Detector {
    pub fn new(settings: DetectorSettings) -> Self {
        Self { settings }
    }

    /// Classify a batch. Returns `None` when the batch has no completed
    /// samples; that case belongs to the controller's abort path.
    pub fn classify(&self, baseline: &Baseline, batch: &Batch) -> Option<Detection> {
        let statuses = StatusCounts::from_samples(&batch.samples);
        if statuses.total() == 0 {
            return None;
        }

        if statuses.contains(TOO_MANY_REQUESTS) {
            let retry_after = batch
                .samples
                .iter()
                .filter(|s| s.status == Some(TOO_MANY_REQUESTS))
                .find_map(|s| s.retry_after.clone());
            return Some(Detection {
                classification: Classification::HardLimit,
                signal: Some(Signal::RateLimitStatus {
                    status: TOO_MANY_REQUESTS,
                    count: statuses.count(TOO_MANY_REQUESTS),
                    retry_after,
                }),
            });
        }

        if let Some(dominant) = statuses.dominant(Some(baseline.reference_status)) {
            if self.is_denial_shift(baseline.reference_status, dominant) {
                return Some(Detection {
                    classification: Classification::SoftLimitBlocking,
                    signal: Some(Signal::StatusShift {
                        baseline_status: baseline.reference_status,
                        observed_status: dominant,
                    }),
                });
            }
        }

        let latencies = LatencySeries::from_samples(&batch.samples);
        if let Some(median) = latencies.median() {
            let reference = baseline.reference_latency.as_nanos() as f64;
            let observed = median.as_nanos() as f64;
            debug!(
                density = batch.density_level,
                median_ms = observed / 1e6,
                baseline_ms = reference / 1e6,
                "batch latency"
            );
            if observed > reference * self.settings.latency_multiplier {
                let ratio = if reference > 0.0 {
                    observed / reference
                } else {
                    f64::INFINITY
                };
                return Some(Detection {
                    classification: Classification::SoftLimitThrottling,
                    signal: Some(Signal::LatencyInflation {
                        baseline_latency: baseline.reference_latency,
                        observed_latency: median,
                        ratio,
                    }),
                });
            }
        }

        Some(Detection::none())
    }

    fn is_denial_shift(&self, reference: u16, dominant: u16) -> bool {
        reference < 400
            && dominant != reference
            && self.settings.blocking_statuses.contains(&dominant)
    }
}
