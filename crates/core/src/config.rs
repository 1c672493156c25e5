//! Environment-driven settings (`FERRY_*`), each with a default.

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

pub fn max_yaml_bytes() -> usize {
    env_parse("FERRY_MAX_YAML_BYTES").unwrap_or(1_000_000) // 1 MiB default
}

pub fn max_yaml_nodes() -> usize {
    env_parse("FERRY_MAX_YAML_NODES").unwrap_or(100_000)
}

pub fn default_namespace() -> String {
    std::env::var("FERRY_NAMESPACE").ok().filter(|s| !s.is_empty()).unwrap_or_else(|| "default".to_string())
}

/// Retry budget for the conflict-resolving updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePolicy {
    pub max_retries: u32,
}

impl Default for UpdatePolicy {
    fn default() -> Self { Self { max_retries: 10 } }
}

impl UpdatePolicy {
    pub fn from_env() -> Self {
        let max_retries = env_parse::<u32>("FERRY_UPDATE_RETRIES").filter(|n| *n > 0).unwrap_or(10);
        Self { max_retries }
    }
}

/// Deadline and tick for the convergence poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self { Self { timeout: Duration::from_secs(600), interval: Duration::from_secs(3) } }
}

impl PollSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            timeout: env_parse::<u64>("FERRY_POLL_TIMEOUT_SECS").map(Duration::from_secs).unwrap_or(d.timeout),
            interval: env_parse::<u64>("FERRY_POLL_INTERVAL_SECS").filter(|s| *s > 0).map(Duration::from_secs).unwrap_or(d.interval),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}
