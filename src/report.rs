//! Human-readable and JSON renderings of a [`Verdict`].

use std::fmt;
use std::time::Duration;

use crate::detect::{Signal, Verdict};

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// The final report shown at the end of a run.
pub struct TextReport<'a>(pub &'a Verdict);

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = self.0;
        let rule = "=".repeat(60);

        writeln!(f, "\n{rule}")?;
        writeln!(f, "FINAL TEST REPORT")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Target              : {} {}", verdict.method, verdict.target)?;
        writeln!(f, "Total Requests Sent : {}", verdict.total_requests_sent)?;
        if verdict.requests_failed > 0 {
            writeln!(f, "Network Failures    : {}", verdict.requests_failed)?;
        }
        writeln!(
            f,
            "Baseline            : {:.2}ms | Status: {}",
            ms(verdict.baseline.reference_latency),
            verdict.baseline.reference_status
        )?;
        if let Some(mean) = verdict.mean_latency {
            writeln!(f, "Average Latency     : {:.2}ms", ms(mean))?;
        }
        writeln!(f, "{}", "-".repeat(60))?;
        writeln!(f, "VERDICT: {}", verdict.classification.label())?;
        writeln!(f, "Reason : {}", verdict.stop_reason)?;
        if let Some(Signal::RateLimitStatus {
            retry_after: Some(retry_after),
            ..
        }) = &verdict.evidence.signal
        {
            writeln!(f, "Retry-After: {retry_after}")?;
        }
        writeln!(f, "{rule}")?;

        writeln!(f, "\nLIMITATIONS OF FINDINGS:")?;
        writeln!(f, "1. Results apply only to the specific source IP used.")?;
        writeln!(
            f,
            "2. Testing stopped at {} requests; limits may exist at higher thresholds.",
            verdict.total_requests_sent
        )?;
        writeln!(
            f,
            "3. Time window was short; long-term sliding window limits may not be triggered."
        )?;
        writeln!(f, "4. Network jitter can occasionally mimic throttling.")
    }
}

/// Render the final report as a string.
pub fn render_text(verdict: &Verdict) -> String {
    TextReport(verdict).to_string()
}

/// Pretty JSON for machine consumers.
pub fn render_json(verdict: &Verdict) -> serde_json::Result<String> {
    serde_json::to_string_pretty(verdict)
}
