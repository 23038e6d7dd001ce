//! limitprobe -- adaptive, non-destructive rate limit detection for one HTTP endpoint.
//!
//! A run measures a sequential baseline, then sends concurrent batches of
//! growing density until the target shows a limiting signal (429s, a shift
//! to denial statuses, or inflated latency), the request ceiling is reached,
//! or the target stops answering. It stops at the first positive signal.

pub mod config;
pub mod detect;
pub mod escalation;
pub mod probes;
pub mod report;

pub use config::ProbeConfig;
pub use detect::{Classification, Verdict};
pub use escalation::ProbeError;

use detect::Detector;
use escalation::EscalationController;
use probes::{HttpSampler, Sampler};

/// Probe `url` over HTTP with the given configuration.
pub async fn probe(url: &str, config: &ProbeConfig) -> Result<Verdict, ProbeError> {
    let target = config.probe_target(url)?;
    tracing::info!(
        method = %target.method,
        url = %target.url,
        max_requests = config.escalation.max_requests,
        "Starting adaptive rate limit probe"
    );
    let sampler = HttpSampler::new(target, config.request_timeout())?;
    run(&sampler, config).await
}

/// Baseline then escalate against any [`Sampler`].
///
/// Nothing is sent for an invalid configuration. No escalation request is
/// sent until the baseline has been established; a baseline failure ends the
/// run without sending any.
pub async fn run(sampler: &dyn Sampler, config: &ProbeConfig) -> Result<Verdict, ProbeError> {
    config.validate()?;
    let started_at = chrono::Utc::now();

    let baseline = detect::establish_baseline(sampler, &config.baseline_settings()).await?;

    let mut controller = EscalationController::new(
        sampler,
        Detector::new(config.detector_settings()),
        config.escalation.schedule.build(),
        config.controller_settings(),
    );
    let mut verdict = controller.run(&baseline).await?;
    verdict.started_at = started_at;

    tracing::info!(
        classification = %verdict.classification,
        sent = verdict.total_requests_sent,
        reason = %verdict.stop_reason,
        "Probe finished"
    );
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BaselineError, TerminalState};
    use crate::probes::testing::{down, ok, ScriptedSampler};
    use std::time::Duration;

    fn fast_config() -> ProbeConfig {
        let mut cfg = ProbeConfig::default();
        cfg.baseline.inter_request_delay_ms = 0;
        cfg.escalation.batch_pause_ms = 0;
        cfg.escalation.max_requests = 40;
        cfg
    }

    #[tokio::test]
    async fn test_baseline_failure_sends_no_escalation() {
        let sampler = ScriptedSampler::new(|_| down());
        let err = run(&sampler, &fast_config()).await.unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Baseline(BaselineError::Unreachable { attempted: 5 })
        ));
        assert_eq!(sampler.calls(), 5);
    }

    #[tokio::test]
    async fn test_baseline_requests_count_toward_ceiling() {
        let sampler = ScriptedSampler::new(|_| ok(200, 10));
        let verdict = run(&sampler, &fast_config()).await.unwrap();
        assert_eq!(verdict.terminal_state, TerminalState::CeilingReached);
        assert_eq!(verdict.total_requests_sent, 40);
        assert_eq!(sampler.calls(), 40);
        assert_eq!(verdict.baseline.requests_sent, 5);
    }

    #[tokio::test]
    async fn test_ceiling_below_baseline_sends_nothing() {
        let sampler = ScriptedSampler::new(|_| ok(200, 10));
        let mut cfg = fast_config();
        cfg.escalation.max_requests = 3;
        let err = run(&sampler, &cfg).await.unwrap_err();
        assert!(matches!(err, ProbeError::InvalidConfig(_)), "{err}");
        assert_eq!(sampler.calls(), 0);

        cfg.escalation.max_requests = 40;
        cfg.baseline.sample_count = 0;
        assert!(matches!(
            run(&sampler, &cfg).await,
            Err(ProbeError::InvalidConfig(_))
        ));
        assert_eq!(sampler.calls(), 0);
    }

    #[tokio::test]
    async fn test_mean_latency_spans_baseline_and_batches() {
        let sampler = ScriptedSampler::new(|i| if i < 5 { ok(200, 10) } else { ok(200, 20) });
        let verdict = run(&sampler, &fast_config()).await.unwrap();
        assert_eq!(verdict.total_requests_sent, 40);
        // (5 * 10ms + 35 * 20ms) / 40
        assert_eq!(verdict.mean_latency, Some(Duration::from_micros(18_750)));
        assert_eq!(verdict.method, "GET");
        assert_eq!(verdict.target, "scripted://target");
    }

    #[tokio::test]
    async fn test_baseline_precedes_escalation() {
        // Rate limited from the 8th request on: the baseline (5) is clean,
        // the first batch of 5 straddles the switch.
        let sampler = ScriptedSampler::new(|i| if i >= 7 { ok(429, 10) } else { ok(200, 10) });
        let verdict = run(&sampler, &fast_config()).await.unwrap();
        assert_eq!(verdict.classification, Classification::HardLimit);
        assert_eq!(verdict.evidence.triggering_density, Some(5));
        assert_eq!(verdict.total_requests_sent, 10);

        let log = sampler.log();
        assert!(log[..5].iter().all(|s| s.status == Some(200)));
    }
}
