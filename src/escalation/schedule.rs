//! Density schedules: how many concurrent requests each escalation step sends.

use serde::{Deserialize, Serialize};

/// A monotonic generator of density levels.
///
/// The controller clamps whatever a schedule returns so that densities never
/// decrease and never drop below 1, but well-behaved schedules should already
/// satisfy both.
pub trait DensitySchedule: Send + Sync {
    /// Density of the first escalation batch.
    fn first(&self) -> usize;

    /// Density of the batch following one sent at `previous`.
    fn next_density(&self, previous: usize) -> usize;
}

/// Additive ramp: `start`, `start + step`, `start + 2*step`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearSchedule {
    pub start: usize,
    pub step: usize,
}

impl DensitySchedule for LinearSchedule {
    fn first(&self) -> usize {
        self.start
    }

    fn next_density(&self, previous: usize) -> usize {
        previous.saturating_add(self.step)
    }
}

/// Geometric ramp: `start`, `start * factor`, `start * factor^2`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialSchedule {
    pub start: usize,
    pub factor: usize,
}

impl DensitySchedule for ExponentialSchedule {
    fn first(&self) -> usize {
        self.start
    }

    fn next_density(&self, previous: usize) -> usize {
        previous.saturating_mul(self.factor)
    }
}

/// Serializable schedule choice, as it appears in the `[escalation]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleConfig {
    Linear { start: usize, step: usize },
    Exponential { start: usize, factor: usize },
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig::Linear { start: 5, step: 5 }
    }
}

impl ScheduleConfig {
    pub fn build(&self) -> Box<dyn DensitySchedule> {
        match *self {
            ScheduleConfig::Linear { start, step } => Box::new(LinearSchedule { start, step }),
            ScheduleConfig::Exponential { start, factor } => {
                Box::new(ExponentialSchedule { start, factor })
            }
        }
    }

    pub fn start(&self) -> usize {
        match *self {
            ScheduleConfig::Linear { start, .. } | ScheduleConfig::Exponential { start, .. } => {
                start
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take(schedule: &dyn DensitySchedule, n: usize) -> Vec<usize> {
        let mut out = vec![schedule.first()];
        while out.len() < n {
            let prev = *out.last().unwrap();
            out.push(schedule.next_density(prev));
        }
        out
    }

    #[test]
    fn test_linear_ramp() {
        let s = LinearSchedule { start: 5, step: 5 };
        assert_eq!(take(&s, 4), vec![5, 10, 15, 20]);
    }

    #[test]
    fn test_flat_linear_is_allowed() {
        let s = LinearSchedule { start: 3, step: 0 };
        assert_eq!(take(&s, 3), vec![3, 3, 3]);
    }

    #[test]
    fn test_exponential_doubling() {
        let s = ExponentialSchedule { start: 2, factor: 2 };
        assert_eq!(take(&s, 5), vec![2, 4, 8, 16, 32]);
    }

    #[test]
    fn test_exponential_saturates() {
        let s = ExponentialSchedule { start: 2, factor: 2 };
        assert_eq!(s.next_density(usize::MAX), usize::MAX);
    }

    #[test]
    fn test_schedule_config_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            schedule: ScheduleConfig,
        }
        let w: Wrapper =
            toml::from_str("schedule = { kind = \"exponential\", start = 1, factor = 3 }").unwrap();
        assert_eq!(w.schedule, ScheduleConfig::Exponential { start: 1, factor: 3 });
        assert_eq!(take(w.schedule.build().as_ref(), 3), vec![1, 3, 9]);
    }
}
