//! Server configuration
//!
//! Loaded from environment variables (a `.env` file is honored), with
//! defaults matching the free-plan limits. The isolation profile applies to
//! every run and is never taken from a request.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Resource and isolation limits applied to every container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationProfile {
    /// Memory ceiling in bytes (swap is capped to the same value)
    pub memory_bytes: i64,
    /// CFS scheduling period in microseconds
    pub cpu_period_us: i64,
    /// CFS quota per period in microseconds (50_000 / 100_000 = half a core)
    pub cpu_quota_us: i64,
    /// Maximum number of live processes/threads
    pub pids_limit: i64,
    /// Wall-clock limit for the exit wait
    pub timeout: Duration,
}

impl Default for IsolationProfile {
    fn default() -> Self {
        Self {
            memory_bytes: 256 * 1024 * 1024,
            cpu_period_us: 100_000,
            cpu_quota_us: 50_000,
            pids_limit: 64,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address for the HTTP/WebSocket server
    pub bind_addr: SocketAddr,
    /// Admission gate capacity
    pub max_concurrent_runs: usize,
    /// How long a finished run's terminal status stays queryable
    pub outcome_retention: Duration,
    /// Parent directory for run workspaces (system temp dir if unset)
    pub workspace_root: Option<PathBuf>,
    /// Limits applied to every container
    pub isolation: IsolationProfile,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_concurrent_runs: 3,
            outcome_retention: Duration::from_secs(300),
            workspace_root: None,
            isolation: IsolationProfile::default(),
        }
    }
}

impl ServerConfig {
    /// Build configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let isolation = &defaults.isolation;

        let memory_mb: i64 = parse_var(&lookup, "MEMORY_LIMIT_MB", isolation.memory_bytes / (1024 * 1024))?;
        let Some(memory_bytes) = memory_mb.checked_mul(1024 * 1024) else {
            anyhow::bail!("MEMORY_LIMIT_MB is too large: {}", memory_mb);
        };
        let timeout_secs: u64 = parse_var(&lookup, "EXECUTION_TIMEOUT_SECS", isolation.timeout.as_secs())?;
        let retention_secs: u64 = parse_var(
            &lookup,
            "OUTCOME_RETENTION_SECS",
            defaults.outcome_retention.as_secs(),
        )?;

        let config = Self {
            bind_addr: parse_var(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            max_concurrent_runs: parse_var(&lookup, "MAX_CONCURRENT_RUNS", defaults.max_concurrent_runs)?,
            outcome_retention: Duration::from_secs(retention_secs),
            workspace_root: lookup("WORKSPACE_ROOT")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            isolation: IsolationProfile {
                memory_bytes,
                cpu_period_us: parse_var(&lookup, "CPU_PERIOD_US", isolation.cpu_period_us)?,
                cpu_quota_us: parse_var(&lookup, "CPU_QUOTA_US", isolation.cpu_quota_us)?,
                pids_limit: parse_var(&lookup, "PIDS_LIMIT", isolation.pids_limit)?,
                timeout: Duration::from_secs(timeout_secs),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_runs == 0 {
            anyhow::bail!("MAX_CONCURRENT_RUNS must be at least 1");
        }
        let isolation = &self.isolation;
        if isolation.memory_bytes <= 0 || isolation.pids_limit <= 0 {
            anyhow::bail!("Memory and process limits must be positive");
        }
        if isolation.cpu_period_us <= 0
            || isolation.cpu_quota_us <= 0
            || isolation.cpu_quota_us > isolation.cpu_period_us
        {
            anyhow::bail!(
                "Invalid CPU quota {}us for period {}us",
                isolation.cpu_quota_us,
                isolation.cpu_period_us
            );
        }
        if isolation.timeout.is_zero() {
            anyhow::bail!("EXECUTION_TIMEOUT_SECS must be at least 1");
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, value)),
        _ => Ok(default),
    }
}
