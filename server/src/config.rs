//! Service configuration.
//!
//! Values come from the environment; everything except `DATABASE_URL` has a
//! sensible default.

use anyhow::{Context, Result};
use caresight_outbox::CompletionPolicy;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the analytics service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `PostgreSQL` connection string (`DATABASE_URL`, required).
    pub database_url: String,

    /// Read API bind address (`CARESIGHT_BIND_ADDR`).
    ///
    /// Default: `0.0.0.0:8080`
    pub bind_addr: SocketAddr,

    /// Prometheus exporter bind address (`CARESIGHT_METRICS_ADDR`).
    ///
    /// Default: `0.0.0.0:9090`
    pub metrics_addr: SocketAddr,

    /// Outbox poll interval (`CARESIGHT_POLL_INTERVAL_MS`).
    ///
    /// Default: 1000ms
    pub poll_interval: Duration,

    /// Rows per outbox batch (`CARESIGHT_BATCH_SIZE`).
    ///
    /// Default: 100
    pub batch_size: usize,

    /// Data-lag warning threshold (`CARESIGHT_LAG_WARN_SECONDS`).
    ///
    /// Default: 60s
    pub lag_warn_threshold: Duration,

    /// Outbox completion policy (`CARESIGHT_DELIVERY_POLICY`:
    /// `advance_always` or `retry_dead_letter`, with
    /// `CARESIGHT_MAX_ATTEMPTS` bounding the retry variant).
    ///
    /// Default: advance-always
    pub completion_policy: CompletionPolicy,
}

impl ServerConfig {
    /// Load configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when `DATABASE_URL` is unset or any variable fails
    /// to parse.
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let bind_addr = parse_var("CARESIGHT_BIND_ADDR", "0.0.0.0:8080")?;
        let metrics_addr = parse_var("CARESIGHT_METRICS_ADDR", "0.0.0.0:9090")?;
        let poll_interval_ms: u64 = parse_var("CARESIGHT_POLL_INTERVAL_MS", "1000")?;
        let batch_size: usize = parse_var("CARESIGHT_BATCH_SIZE", "100")?;
        let lag_warn_seconds: u64 = parse_var("CARESIGHT_LAG_WARN_SECONDS", "60")?;

        let completion_policy = match std::env::var("CARESIGHT_DELIVERY_POLICY")
            .unwrap_or_else(|_| "advance_always".to_string())
            .as_str()
        {
            "advance_always" => CompletionPolicy::AdvanceAlways,
            "retry_dead_letter" => CompletionPolicy::RetryThenDeadLetter {
                max_attempts: parse_var("CARESIGHT_MAX_ATTEMPTS", "5")?,
            },
            other => anyhow::bail!(
                "CARESIGHT_DELIVERY_POLICY must be advance_always or retry_dead_letter, got {other}"
            ),
        };

        Ok(Self {
            database_url,
            bind_addr,
            metrics_addr,
            poll_interval: Duration::from_millis(poll_interval_ms),
            batch_size,
            lag_warn_threshold: Duration::from_secs(lag_warn_seconds),
            completion_policy,
        })
    }
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("{name} is not valid"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let addr: SocketAddr = parse_var("CARESIGHT_UNSET_VAR", "0.0.0.0:8080").unwrap();
        assert_eq!(addr.port(), 8080);

        let n: usize = parse_var("CARESIGHT_UNSET_VAR", "100").unwrap();
        assert_eq!(n, 100);
    }
}
