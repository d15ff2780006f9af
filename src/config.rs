//! Engine and client configuration.
//!
//! Both configurations load from `STATEFLOW_*` environment variables with
//! sensible defaults, and expose `local()` constructors for tests and
//! single-process development clusters.

use crate::error::ConfigError;
use crate::scheduler::SchedulerKind;

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Settings for the coordinator and the workers of one cluster.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Address of the coordinator HTTP API (default: "127.0.0.1:8886")
    pub http_bind: SocketAddr,
    /// Number of workers started by a local cluster (default: 4)
    pub workers: usize,
    /// Interval between worker heartbeats (default: 500ms)
    pub heartbeat_interval: Duration,
    /// Silence after which a worker becomes Suspect (default: 5s)
    pub suspect_timeout: Duration,
    /// Silence after which a Suspect worker is declared Dead (default: 10s)
    pub dead_timeout: Duration,
    /// How often the coordinator runs failure detection (default: 1s)
    pub failure_detection_interval: Duration,
    /// How often a new partition owner reports it is still waiting for the previous owner's state (default: 5s)
    pub handoff_patience: Duration,
    /// Placement strategy (default: sticky)
    pub scheduler: SchedulerKind,
    /// Maximum log level for the binary (default: INFO)
    pub log_level: tracing::Level,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `STATEFLOW_HTTP_BIND`
    /// - `STATEFLOW_WORKERS`
    /// - `STATEFLOW_HEARTBEAT_INTERVAL_MS`
    /// - `STATEFLOW_SUSPECT_TIMEOUT_MS`
    /// - `STATEFLOW_DEAD_TIMEOUT_MS`
    /// - `STATEFLOW_FAILURE_DETECTION_INTERVAL_MS`
    /// - `STATEFLOW_HANDOFF_PATIENCE_MS`
    /// - `STATEFLOW_SCHEDULER` (`round_robin` | `sticky`)
    /// - `STATEFLOW_LOG_LEVEL`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            http_bind: env_parse("STATEFLOW_HTTP_BIND", defaults.http_bind)?,
            workers: env_parse("STATEFLOW_WORKERS", defaults.workers)?,
            heartbeat_interval: env_millis(
                "STATEFLOW_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval,
            )?,
            suspect_timeout: env_millis("STATEFLOW_SUSPECT_TIMEOUT_MS", defaults.suspect_timeout)?,
            dead_timeout: env_millis("STATEFLOW_DEAD_TIMEOUT_MS", defaults.dead_timeout)?,
            failure_detection_interval: env_millis(
                "STATEFLOW_FAILURE_DETECTION_INTERVAL_MS",
                defaults.failure_detection_interval,
            )?,
            handoff_patience: env_millis("STATEFLOW_HANDOFF_PATIENCE_MS", defaults.handoff_patience)?,
            scheduler: env_parse("STATEFLOW_SCHEDULER", defaults.scheduler)?,
            log_level: env_parse("STATEFLOW_LOG_LEVEL", defaults.log_level)?,
        }
        .validated()?)
    }

    /// Tight timings for in-process clusters used by tests.
    pub fn local(workers: usize) -> Self {
        Self {
            http_bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            workers,
            heartbeat_interval: Duration::from_millis(50),
            suspect_timeout: Duration::from_millis(400),
            dead_timeout: Duration::from_millis(800),
            failure_detection_interval: Duration::from_millis(100),
            handoff_patience: Duration::from_secs(2),
            scheduler: SchedulerKind::Sticky,
            log_level: tracing::Level::WARN,
        }
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError {
                name: "STATEFLOW_WORKERS".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.dead_timeout <= self.suspect_timeout {
            return Err(ConfigError {
                name: "STATEFLOW_DEAD_TIMEOUT_MS".to_string(),
                reason: "must be greater than the suspect timeout".to_string(),
            });
        }
        Ok(self)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http_bind: SocketAddr::from(([127, 0, 0, 1], 8886)),
            workers: 4,
            heartbeat_interval: Duration::from_millis(500),
            suspect_timeout: Duration::from_secs(5),
            dead_timeout: Duration::from_secs(10),
            failure_detection_interval: Duration::from_secs(1),
            handoff_patience: Duration::from_secs(5),
            scheduler: SchedulerKind::Sticky,
            log_level: tracing::Level::INFO,
        }
    }
}

/// Settings for one client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the coordinator HTTP API (default: "http://127.0.0.1:8886")
    pub coordinator_url: String,
    /// How long `get()` waits for a reply (default: 30s)
    pub request_timeout: Duration,
    /// Outbound buffer size before `send_event` applies back-pressure (default: 10_000)
    pub producer_capacity: usize,
    /// Per-attempt timeout of graph submission over HTTP (default: 5s)
    pub submit_timeout: Duration,
    /// Attempts for graph submission over HTTP (default: 3)
    pub submit_attempts: usize,
    /// Finished requests remembered for duplicate detection and delivery
    /// timestamps before the oldest are forgotten (default: 100_000)
    pub retention: usize,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `STATEFLOW_COORDINATOR_URL`
    /// - `STATEFLOW_REQUEST_TIMEOUT_MS`
    /// - `STATEFLOW_PRODUCER_CAPACITY`
    /// - `STATEFLOW_SUBMIT_TIMEOUT_MS`
    /// - `STATEFLOW_SUBMIT_ATTEMPTS`
    /// - `STATEFLOW_CLIENT_RETENTION`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            coordinator_url: env::var("STATEFLOW_COORDINATOR_URL")
                .unwrap_or(defaults.coordinator_url)
                .trim_end_matches('/')
                .to_string(),
            request_timeout: env_millis("STATEFLOW_REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
            producer_capacity: env_parse("STATEFLOW_PRODUCER_CAPACITY", defaults.producer_capacity)?,
            submit_timeout: env_millis("STATEFLOW_SUBMIT_TIMEOUT_MS", defaults.submit_timeout)?,
            submit_attempts: env_parse("STATEFLOW_SUBMIT_ATTEMPTS", defaults.submit_attempts)?,
            retention: env_parse("STATEFLOW_CLIENT_RETENTION", defaults.retention)?,
        };

        if config.producer_capacity == 0 || config.submit_attempts == 0 || config.retention == 0 {
            return Err(ConfigError {
                name: "STATEFLOW_PRODUCER_CAPACITY/STATEFLOW_SUBMIT_ATTEMPTS/STATEFLOW_CLIENT_RETENTION"
                    .to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(config)
    }

    /// Client settings with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            request_timeout: timeout,
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://127.0.0.1:8886".to_string(),
            request_timeout: Duration::from_secs(30),
            producer_capacity: 10_000,
            submit_timeout: Duration::from_secs(5),
            submit_attempts: 3,
            retention: 100_000,
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_millis(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    let millis = env_parse(name, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default().validated().unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.scheduler, SchedulerKind::Sticky);

        let client = ClientConfig::default();
        assert_eq!(client.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_dead_timeout_must_exceed_suspect_timeout() {
        let config = EngineConfig {
            suspect_timeout: Duration::from_secs(5),
            dead_timeout: Duration::from_secs(5),
            ..EngineConfig::default()
        };

        let err = config.validated().unwrap_err();
        assert_eq!(err.name, "STATEFLOW_DEAD_TIMEOUT_MS");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = EngineConfig {
            workers: 0,
            ..EngineConfig::default()
        };
        assert!(config.validated().is_err());
    }

    #[test]
    fn test_env_parse_reports_variable_name() {
        // Unique name so parallel tests never race on it.
        let name = "STATEFLOW_TEST_ONLY_NUMBER";
        unsafe { env::set_var(name, "not-a-number") };

        let err = env_parse::<u64>(name, 1).unwrap_err();
        assert_eq!(err.name, name);

        unsafe { env::remove_var(name) };
        assert_eq!(env_parse::<u64>(name, 7).unwrap(), 7);
    }
}
