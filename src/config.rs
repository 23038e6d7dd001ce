//! TOML configuration for a probe run.
//!
//! Every field has a compiled-in default; a file (from `--config` or the
//! `LIMITPROBE_CONFIG` environment variable) overrides those, and CLI flags
//! override the file.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::{BaselineSettings, DetectorSettings};
use crate::escalation::{ControllerSettings, ProbeError, ScheduleConfig};
use crate::probes::ProbeTarget;

/// Environment variable naming a config file when `--config` is not given.
pub const CONFIG_ENV: &str = "LIMITPROBE_CONFIG";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub baseline: BaselineConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
}

impl ProbeConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "Loaded probe configuration");
        Ok(config)
    }

    /// Load from `explicit`, else from `LIMITPROBE_CONFIG`, else defaults.
    ///
    /// An explicitly requested file that fails to load is an error; a broken
    /// file named by the environment only warns.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "LIMITPROBE_CONFIG set but file could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file given, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Reject settings that would make the run unsafe or meaningless.
    pub fn validate(&self) -> Result<(), ProbeError> {
        let invalid = |msg: String| Err(ProbeError::InvalidConfig(msg));

        if self.baseline.sample_count == 0 {
            return invalid("baseline.sample_count must be at least 1".into());
        }
        let min = self.baseline.min_successes;
        if min == 0 || min > self.baseline.sample_count {
            return invalid(format!(
                "baseline.min_successes must be between 1 and sample_count ({})",
                self.baseline.sample_count
            ));
        }
        if self.escalation.max_requests <= self.baseline.sample_count {
            return invalid(format!(
                "escalation.max_requests ({}) must exceed baseline.sample_count ({})",
                self.escalation.max_requests, self.baseline.sample_count
            ));
        }
        if self.escalation.schedule.start() == 0 {
            return invalid("escalation.schedule.start must be at least 1".into());
        }
        if let ScheduleConfig::Exponential { factor: 0, .. } = self.escalation.schedule {
            return invalid("escalation.schedule.factor must be at least 1".into());
        }
        let multiplier = self.detection.latency_multiplier;
        if multiplier.is_nan() || multiplier <= 1.0 {
            return invalid(format!(
                "detection.latency_multiplier must be greater than 1.0, got {multiplier}"
            ));
        }
        if self.target.request_timeout_ms == 0 {
            return invalid("target.request_timeout_ms must be positive".into());
        }
        self.method()?;
        Ok(())
    }

    fn method(&self) -> Result<Method, ProbeError> {
        let method = &self.target.method;
        Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ProbeError::InvalidConfig(format!("invalid HTTP method: {method}")))
    }

    /// Resolve the request shape for `url` from the `[target]` section.
    pub fn probe_target(&self, url: &str) -> Result<ProbeTarget, ProbeError> {
        let url = parse_target_url(url)?;
        let method = self.method()?;

        let mut headers = HeaderMap::new();
        for (key, value) in &self.target.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| ProbeError::InvalidConfig(format!("invalid header name: {key}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ProbeError::InvalidConfig(format!("invalid value for header {key}")))?;
            headers.insert(name, value);
        }
        if !headers.contains_key(USER_AGENT) {
            let ua = HeaderValue::from_str(&self.target.user_agent)
                .map_err(|_| ProbeError::InvalidConfig("invalid user_agent".into()))?;
            headers.insert(USER_AGENT, ua);
        }

        Ok(ProbeTarget {
            url,
            method,
            headers,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.target.request_timeout_ms)
    }

    pub fn baseline_settings(&self) -> BaselineSettings {
        BaselineSettings {
            count: self.baseline.sample_count,
            min_successes: self.baseline.min_successes,
            inter_request_delay: Duration::from_millis(self.baseline.inter_request_delay_ms),
        }
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            latency_multiplier: self.detection.latency_multiplier,
            blocking_statuses: self.detection.blocking_statuses.clone(),
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            max_requests: self.escalation.max_requests,
            batch_pause: Duration::from_millis(self.escalation.batch_pause_ms),
        }
    }

    /// Merge `"Key: Value"` header lines into `[target].headers`. Malformed lines are skipped.
    pub fn add_header_lines<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) {
        for line in lines {
            match parse_header_line(line) {
                Some((k, v)) => {
                    self.target.headers.insert(k, v);
                }
                None => {
                    warn!(header = line, "Invalid header format, expected 'Key: Value'; ignored")
                }
            }
        }
    }
}

/// Split `"Key: Value"` on the first colon, trimming both sides.
pub fn parse_header_line(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

/// Require an absolute http(s) URL with a host.
pub fn parse_target_url(raw: &str) -> Result<Url, ProbeError> {
    let url = Url::parse(raw)
        .map_err(|e| ProbeError::InvalidConfig(format!("invalid URL {raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProbeError::InvalidConfig(format!(
            "unsupported scheme {:?}; include http:// or https://",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ProbeError::InvalidConfig(format!("URL {raw:?} has no host")));
    }
    Ok(url)
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Request shape sent on every sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    /// Sent unless `headers` already carries a User-Agent.
    pub user_agent: String,
    pub request_timeout_ms: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            user_agent: format!(
                "limitprobe/{} (authorized rate-limit testing)",
                env!("CARGO_PKG_VERSION")
            ),
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub sample_count: usize,
    pub min_successes: usize,
    pub inter_request_delay_ms: u64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            sample_count: 5,
            min_successes: 3,
            inter_request_delay_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Ceiling on every request of the run, baseline included.
    pub max_requests: usize,
    pub batch_pause_ms: u64,
    pub schedule: ScheduleConfig,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            max_requests: 500,
            batch_pause_ms: 500,
            schedule: ScheduleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub latency_multiplier: f64,
    pub blocking_statuses: Vec<u16>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let d = DetectorSettings::default();
        Self {
            latency_multiplier: d.latency_multiplier,
            blocking_statuses: d.blocking_statuses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = ProbeConfig::default();
        assert_eq!(cfg.target.method, "GET");
        assert!(cfg.target.headers.is_empty());
        assert!(cfg.target.user_agent.starts_with("limitprobe/"));
        assert_eq!(cfg.target.request_timeout_ms, 10_000);
        assert_eq!(cfg.baseline.sample_count, 5);
        assert_eq!(cfg.baseline.min_successes, 3);
        assert_eq!(cfg.escalation.max_requests, 500);
        assert_eq!(cfg.escalation.schedule, ScheduleConfig::Linear { start: 5, step: 5 });
        assert_eq!(cfg.detection.latency_multiplier, 3.0);
        assert_eq!(cfg.detection.blocking_statuses, vec![401, 403, 503]);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
[target]
method = "post"
headers = { Authorization = "Bearer abc" }

[escalation]
max_requests = 80
schedule = { kind = "exponential", start = 2, factor = 2 }

[detection]
latency_multiplier = 4.5
"#;
        let cfg: ProbeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.escalation.max_requests, 80);
        assert_eq!(cfg.escalation.batch_pause_ms, 500);
        assert_eq!(cfg.baseline.sample_count, 5);
        assert_eq!(cfg.detection.latency_multiplier, 4.5);
        assert_eq!(cfg.detection.blocking_statuses, vec![401, 403, 503]);
        cfg.validate().unwrap();

        let target = cfg.probe_target("https://api.example.com/login").unwrap();
        assert_eq!(target.method, Method::POST);
        assert_eq!(target.headers["authorization"], "Bearer abc");
        assert!(target.headers.contains_key(USER_AGENT));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.toml");
        std::fs::write(&path, "[baseline]\nsample_count = 8\n").unwrap();

        let cfg = ProbeConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(cfg.baseline.sample_count, 8);

        assert!(ProbeConfig::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_validation_rejects_unsafe_values() {
        let mut cfg = ProbeConfig::default();
        cfg.escalation.max_requests = 5;
        assert!(cfg.validate().is_err());

        let mut cfg = ProbeConfig::default();
        cfg.detection.latency_multiplier = 1.0;
        assert!(cfg.validate().is_err());
        cfg.detection.latency_multiplier = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = ProbeConfig::default();
        cfg.baseline.min_successes = 6;
        assert!(cfg.validate().is_err());

        let mut cfg = ProbeConfig::default();
        cfg.escalation.schedule = ScheduleConfig::Exponential { start: 1, factor: 0 };
        assert!(cfg.validate().is_err());

        let mut cfg = ProbeConfig::default();
        cfg.target.method = "NOT A METHOD".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_header_lines() {
        assert_eq!(
            parse_header_line("Authorization: Bearer a:b"),
            Some(("Authorization".into(), "Bearer a:b".into()))
        );
        assert_eq!(parse_header_line("no-colon"), None);
        assert_eq!(parse_header_line(": value"), None);

        let mut cfg = ProbeConfig::default();
        cfg.add_header_lines(["X-Api-Key: k1", "garbage", "User-Agent: custom/1.0"]);
        assert_eq!(cfg.target.headers.len(), 2);

        let target = cfg.probe_target("http://localhost:8080/").unwrap();
        assert_eq!(target.headers[USER_AGENT], "custom/1.0");
    }

    #[test]
    fn test_url_must_be_http_with_host() {
        assert!(parse_target_url("https://api.example.com/endpoint").is_ok());
        assert!(parse_target_url("api.example.com/endpoint").is_err());
        assert!(parse_target_url("ftp://example.com/").is_err());
        assert!(parse_target_url("not a url").is_err());
    }
}
