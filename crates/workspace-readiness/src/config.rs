//! Readiness configuration.
//!
//! `ReadinessConfig` is the serde/TOML face of the probe settings, using
//! human-readable durations (`"3s"`, `"500ms"`, `"2m"`). It resolves into
//! a [`ProbeConfig`] for each probe plus the aggregate settings used by
//! the coordinator.
//!
//! ```toml
//! period = "3s"
//! timeout = "3m"
//! success_threshold = 1
//! connect_timeout = "3s"
//! read_timeout = "3s"
//! aggregate_timeout_per_server = "3m"
//! max_concurrent_probes = 16
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_PERIOD: Duration = Duration::from_secs(3);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_AGGREGATE_TIMEOUT_PER_SERVER: Duration = Duration::from_secs(3 * 60);
const DEFAULT_MAX_CONCURRENT_PROBES: usize = 16;

/// Immutable settings for one server probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Delay between two attempts.
    pub period: Duration,
    /// Deadline measured from probe start, not from the last attempt.
    pub timeout: Duration,
    /// Consecutive positive attempts required.
    pub success_threshold: u32,
    /// Bound on establishing the connection.
    pub connect_timeout: Duration,
    /// Bound on sending the request and reading the response head.
    pub read_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            timeout: DEFAULT_TIMEOUT,
            success_threshold: 1,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl ProbeConfig {
    /// Set the success threshold. Values below one are raised to one.
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// File/TOML representation of the readiness settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReadinessConfig {
    pub period: Option<String>,
    pub timeout: Option<String>,
    pub success_threshold: Option<u32>,
    pub connect_timeout: Option<String>,
    pub read_timeout: Option<String>,
    /// Overall wait per checkable server; the machine-wide wait scales
    /// with the number of servers.
    pub aggregate_timeout_per_server: Option<String>,
    /// Upper bound on probe attempts running at the same time.
    pub max_concurrent_probes: Option<usize>,
}

impl ReadinessConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: ReadinessConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Resolve the per-probe settings, filling gaps with defaults.
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            period: duration_or("period", &self.period, DEFAULT_PERIOD),
            timeout: duration_or("timeout", &self.timeout, DEFAULT_TIMEOUT),
            success_threshold: self.success_threshold.unwrap_or(1).max(1),
            connect_timeout: duration_or(
                "connect_timeout",
                &self.connect_timeout,
                DEFAULT_CONNECT_TIMEOUT,
            ),
            read_timeout: duration_or("read_timeout", &self.read_timeout, DEFAULT_READ_TIMEOUT),
        }
    }

    pub fn aggregate_timeout_per_server(&self) -> Duration {
        duration_or(
            "aggregate_timeout_per_server",
            &self.aggregate_timeout_per_server,
            DEFAULT_AGGREGATE_TIMEOUT_PER_SERVER,
        )
    }

    pub fn max_concurrent_probes(&self) -> usize {
        self.max_concurrent_probes
            .unwrap_or(DEFAULT_MAX_CONCURRENT_PROBES)
            .max(1)
    }
}

fn duration_or(key: &str, value: &Option<String>, default: Duration) -> Duration {
    let Some(raw) = value.as_deref() else {
        return default;
    };
    parse_duration(raw).unwrap_or_else(|| {
        warn!(key, value = raw, ?default, "invalid duration, using default");
        default
    })
}

/// Parse a duration string like "5s", "500ms", "1m".
pub(crate) fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
