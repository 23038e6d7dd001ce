//! Baseline estimation and rate-limit classification.

pub mod baseline;
pub mod classifier;
pub mod series;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use baseline::{establish_baseline, Baseline, BaselineSettings};
pub use classifier::{Batch, Detector, DetectorSettings};

/// Failures that prevent a baseline from being formed. Fatal to the run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BaselineError {
    #[error("target unreachable: all {attempted} baseline requests failed at the network level")]
    Unreachable { attempted: usize },

    #[error("baseline unstable: {reason}")]
    Unstable { reason: String },
}

/// Outcome of classifying a batch, ordered by how explicit the signal is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    None,
    HardLimit,
    SoftLimitBlocking,
    SoftLimitThrottling,
}

impl Classification {
    pub fn is_limited(&self) -> bool {
        !matches!(self, Classification::None)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Classification::None => "NO RATE LIMIT DETECTED",
            Classification::HardLimit => "HARD RATE LIMITING DETECTED",
            Classification::SoftLimitBlocking => "SOFT RATE LIMITING (BLOCKING) DETECTED",
            Classification::SoftLimitThrottling => "SOFT RATE LIMITING (THROTTLING) DETECTED",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::None => write!(f, "none"),
            Classification::HardLimit => write!(f, "hard-limit"),
            Classification::SoftLimitBlocking => write!(f, "soft-limit-blocking"),
            Classification::SoftLimitThrottling => write!(f, "soft-limit-throttling"),
        }
    }
}

/// What the detector saw when it fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    /// Explicit 429 responses.
    RateLimitStatus {
        status: u16,
        count: usize,
        retry_after: Option<String>,
    },
    /// The batch's plurality status moved away from the baseline.
    StatusShift { baseline_status: u16, observed_status: u16 },
    /// Median batch latency inflated past the multiplier.
    LatencyInflation {
        #[serde(with = "millis")]
        baseline_latency: Duration,
        #[serde(with = "millis")]
        observed_latency: Duration,
        ratio: f64,
    },
}

/// Result of one detector evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub classification: Classification,
    pub signal: Option<Signal>,
}

impl Detection {
    pub fn none() -> Self {
        Self {
            classification: Classification::None,
            signal: None,
        }
    }
}

/// Evidence attached to a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Density of the batch that fired; `None` when no limit was observed.
    pub triggering_density: Option<usize>,
    pub signal: Option<Signal>,
}

/// How the escalation state machine ended when it produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalState {
    VerdictReached,
    CeilingReached,
}

/// The single artifact a probe run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub run_id: uuid::Uuid,
    pub target: String,
    pub method: String,
    pub classification: Classification,
    pub terminal_state: TerminalState,
    pub evidence: Evidence,
    pub stop_reason: String,
    pub baseline: Baseline,
    pub total_requests_sent: usize,
    pub requests_failed: usize,
    pub batches_sent: usize,
    #[serde(with = "millis_opt")]
    pub mean_latency: Option<Duration>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub(crate) mod millis {
    //! Serialize a `Duration` as fractional milliseconds.

    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_nanos() as f64 / 1e6)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(d)?;
        Ok(from_millis_f64(ms))
    }

    pub(crate) fn from_millis_f64(ms: f64) -> Duration {
        Duration::from_nanos((ms.max(0.0) * 1e6).round() as u64)
    }
}

pub(crate) mod millis_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_nanos() as f64 / 1e6)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let ms = Option::<f64>::deserialize(d)?;
        Ok(ms.map(super::millis::from_millis_f64))
    }
}
