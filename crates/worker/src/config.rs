//! Worker configuration loaded from environment variables.

use std::time::Duration;

use saga::SagaConfig;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address of the metrics server (default: `"0.0.0.0"`)
/// - `METRICS_PORT`: listen port of the metrics server (default: `9090`)
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory store when unset
/// - `POLL_INTERVAL_MS`: delay between queue passes (default: `250`)
/// - `SWEEP_INTERVAL_SECS`: delay between expiry sweeps (default: `60`)
/// - `LOG_FORMAT`: `json` for JSON logs, anything else for human-readable
/// - everything [`SagaConfig::from_env`] reads
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub host: String,
    pub metrics_port: u16,
    pub database_url: Option<String>,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
    pub log_format: LogFormat,
    pub saga: SagaConfig,
}

impl WorkerConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            metrics_port: lookup("METRICS_PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.metrics_port),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            poll_interval: parsed("POLL_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            sweep_interval: parsed("SWEEP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            saga: SagaConfig::from_lookup(&lookup),
        }
    }

    /// Returns the `"host:port"` bind address of the metrics server.
    pub fn metrics_addr(&self) -> String {
        format!("{}:{}", self.host, self.metrics_port)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            metrics_port: 9090,
            database_url: None,
            poll_interval: Duration::from_millis(250),
            sweep_interval: Duration::from_secs(60),
            log_format: LogFormat::Pretty,
            saga: SagaConfig::default(),
        }
    }
}
