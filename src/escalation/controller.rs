use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::schedule::DensitySchedule;
use super::ProbeError;
use crate::detect::{
    Baseline, Batch, Classification, Detection, Detector, Evidence, Signal, TerminalState, Verdict,
};
use crate::probes::Sampler;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Hard cap on cumulative requests, baseline requests included.
    pub max_requests: usize,
    /// Idle time between consecutive batches.
    pub batch_pause: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_requests: 500,
            batch_pause: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Escalating,
    VerdictReached,
    CeilingReached,
    Aborted,
}

/// Drives batches of increasing density until the detector fires, the
/// request ceiling is hit, or a batch fails outright.
///
/// Batches never overlap: batch K is classified only after every one of its
/// samples resolved, and batch K+1 is dispatched only if batch K came back
/// clean. Nothing is sent after the first positive classification.
pub struct EscalationController<'a> {
    sampler: &'a dyn Sampler,
    detector: Detector,
    schedule: Box<dyn DensitySchedule + 'a>,
    settings: ControllerSettings,
    state: ControllerState,
    total_requests_sent: usize,
    requests_failed: usize,
    batches_sent: usize,
    latency_total: Duration,
    latency_count: u32,
}

impl<'a> EscalationController<'a> {
    pub fn new(
        sampler: &'a dyn Sampler,
        detector: Detector,
        schedule: Box<dyn DensitySchedule + 'a>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            sampler,
            detector,
            schedule,
            settings,
            state: ControllerState::Escalating,
            total_requests_sent: 0,
            requests_failed: 0,
            batches_sent: 0,
            latency_total: Duration::ZERO,
            latency_count: 0,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn batches_sent(&self) -> usize {
        self.batches_sent
    }

    /// Run the escalation to a terminal state.
    ///
    /// The requests already spent on `baseline` count against the ceiling.
    pub async fn run(&mut self, baseline: &Baseline) -> Result<Verdict, ProbeError> {
        let started_at = Utc::now();
        self.state = ControllerState::Escalating;
        self.total_requests_sent = baseline.requests_sent;
        self.latency_total = baseline.latency_total;
        self.latency_count = baseline.sample_count as u32;

        let mut density = self.schedule.first().max(1);

        loop {
            let remaining = self
                .settings
                .max_requests
                .saturating_sub(self.total_requests_sent);
            if remaining == 0 {
                self.state = ControllerState::CeilingReached;
                info!(sent = self.total_requests_sent, "Request ceiling reached without a limit");
                let reason = format!(
                    "Reached maximum request limit ({}) with stable behavior",
                    self.settings.max_requests
                );
                return Ok(self.verdict(baseline, Detection::none(), None, reason, started_at));
            }

            if self.batches_sent > 0 && !self.settings.batch_pause.is_zero() {
                tokio::time::sleep(self.settings.batch_pause).await;
            }

            let size = density.min(remaining);
            let batch = self.dispatch(size).await;

            let detection = match self.detector.classify(baseline, &batch) {
                Some(d) => d,
                None => {
                    self.state = ControllerState::Aborted;
                    warn!(density = size, "Every request in the batch failed; aborting");
                    return Err(ProbeError::Aborted {
                        density: size,
                        failed: batch.samples.len(),
                    });
                }
            };

            info!(
                density = size,
                classification = %detection.classification,
                sent = self.total_requests_sent,
                "Batch classified"
            );

            if detection.classification.is_limited() {
                self.state = ControllerState::VerdictReached;
                let reason = describe(&detection, size);
                return Ok(self.verdict(baseline, detection, Some(size), reason, started_at));
            }

            // Monotonic even if the schedule misbehaves.
            density = self.schedule.next_density(density).max(density).max(1);
        }
    }

    /// Issue `size` concurrent requests and wait for all of them to resolve.
    async fn dispatch(&mut self, size: usize) -> Batch {
        self.total_requests_sent += size;
        self.batches_sent += 1;
        debug!(batch = self.batches_sent, density = size, "Dispatching batch");

        let samples = join_all((0..size).map(|_| self.sampler.sample())).await;
        let batch = Batch::new(size, samples);

        self.requests_failed += batch.failures();
        for s in batch.samples.iter().filter(|s| s.is_success()) {
            self.latency_total += s.latency;
            self.latency_count += 1;
        }
        batch
    }

    fn verdict(
        &self,
        baseline: &Baseline,
        detection: Detection,
        triggering_density: Option<usize>,
        stop_reason: String,
        started_at: chrono::DateTime<Utc>,
    ) -> Verdict {
        let mean_latency = if self.latency_count > 0 {
            Some(self.latency_total / self.latency_count)
        } else {
            None
        };
        let terminal_state = if detection.classification.is_limited() {
            TerminalState::VerdictReached
        } else {
            TerminalState::CeilingReached
        };
        Verdict {
            run_id: uuid::Uuid::new_v4(),
            target: self.sampler.url().to_string(),
            method: self.sampler.method().to_string(),
            classification: detection.classification,
            terminal_state,
            evidence: Evidence {
                triggering_density,
                signal: detection.signal,
            },
            stop_reason,
            baseline: baseline.clone(),
            total_requests_sent: self.total_requests_sent,
            requests_failed: self.requests_failed,
            batches_sent: self.batches_sent,
            mean_latency,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

fn describe(detection: &Detection, density: usize) -> String {
    match (&detection.classification, &detection.signal) {
        (Classification::HardLimit, Some(Signal::RateLimitStatus { status, count, .. })) => {
            format!("HTTP {status} response observed ({count}x) at density {density}")
        }
        (
            Classification::SoftLimitBlocking,
            Some(Signal::StatusShift {
                baseline_status,
                observed_status,
            }),
        ) => format!(
            "Status code shifted from {baseline_status} to {observed_status} at density {density}"
        ),
        (
            Classification::SoftLimitThrottling,
            Some(Signal::LatencyInflation {
                baseline_latency,
                observed_latency,
                ratio,
            }),
        ) => format!(
            "Median latency rose to {:.2}ms (baseline {:.2}ms, {ratio:.1}x) at density {density}",
            observed_latency.as_secs_f64() * 1000.0,
            baseline_latency.as_secs_f64() * 1000.0,
        ),
        (classification, _) => format!("{} at density {density}", classification.label()),
    }
}
