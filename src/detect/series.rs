use std::collections::HashMap;
use std::time::Duration;

use crate::probes::Sample;

/// Latencies of the successful samples in a set, for central-tendency checks.
pub struct LatencySeries {
    values: Vec<Duration>,
}

impl LatencySeries {
    pub fn new(mut values: Vec<Duration>) -> Self {
        values.sort();
        Self { values }
    }

    /// Collect latencies from samples that completed, ignoring network failures.
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> Self {
        Self::new(
            samples
                .into_iter()
                .filter(|s| s.is_success())
                .map(|s| s.latency)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn total(&self) -> Duration {
        self.values.iter().sum()
    }

    /// Median; an even-sized series averages the two middle values.
    pub fn median(&self) -> Option<Duration> {
        let n = self.values.len();
        if n == 0 {
            return None;
        }
        let mid = n / 2;
        if n % 2 == 1 {
            Some(self.values[mid])
        } else {
            Some((self.values[mid - 1] + self.values[mid]) / 2)
        }
    }
}

/// Status tally over the successful samples of a set.
#[derive(Debug, Default)]
pub struct StatusCounts {
    counts: HashMap<u16, usize>,
    total: usize,
}

impl StatusCounts {
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> Self {
        let mut tally = Self::default();
        for status in samples.into_iter().filter_map(|s| s.status) {
            *tally.counts.entry(status).or_default() += 1;
            tally.total += 1;
        }
        tally
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn count(&self, status: u16) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn contains(&self, status: u16) -> bool {
        self.counts.contains_key(&status)
    }

    /// Plurality status. Ties go to `prefer` if it is among the leaders, then the lowest code.
    pub fn dominant(&self, prefer: Option<u16>) -> Option<u16> {
        let top = self.counts.values().copied().max()?;
        let mut leaders: Vec<u16> = self
            .counts
            .iter()
            .filter(|(_, &c)| c == top)
            .map(|(&s, _)| s)
            .collect();
        if let Some(p) = prefer {
            if leaders.contains(&p) {
                return Some(p);
            }
        }
        leaders.sort_unstable();
        leaders.first().copied()
    }

    /// The status held by a strict majority of samples, if any.
    pub fn majority(&self) -> Option<u16> {
        self.counts
            .iter()
            .find(|(_, &c)| c * 2 > self.total)
            .map(|(&s, _)| s)
    }
}
