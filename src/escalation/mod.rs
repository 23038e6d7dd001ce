//! Staged load escalation against an established baseline.

pub mod controller;
pub mod schedule;

use thiserror::Error;

use crate::detect::BaselineError;

pub use controller::{ControllerSettings, ControllerState, EscalationController};
pub use schedule::{DensitySchedule, ExponentialSchedule, LinearSchedule, ScheduleConfig};

/// Reasons a probe run ends without a verdict.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Baseline(#[from] BaselineError),

    #[error("run aborted: all {failed} requests at density {density} failed at the network level")]
    Aborted { density: usize, failed: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
