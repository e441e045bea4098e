//! Application configuration
//!
//! Every sub-configuration has defaults and a `from_env` that overrides
//! them from environment variables. Values that fail to parse or fall
//! outside their allowed range are logged and ignored.

use crate::domain::value_objects::pnl::PnlTiers;
use crate::persistence::DatabaseConfig;
use crate::task_runner::RetryPolicy;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Read `name`, keep `current` unless the value parses and passes `valid`
fn env_override<T>(name: &str, current: T, valid: impl Fn(&T) -> bool) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Ok(raw) = std::env::var(name) else {
        return current;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        Ok(value) => {
            tracing::warn!(
                "Invalid {} value: {} (out of range), using default: {}",
                name,
                value,
                current
            );
            current
        }
        Err(e) => {
            tracing::warn!(
                "Failed to parse {} '{}': {}, using default: {}",
                name,
                raw,
                e,
                current
            );
            current
        }
    }
}

fn env_flag(name: &str, current: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => value.to_lowercase() == "true" || value == "1",
        Err(_) => current,
    }
}

fn env_millis(name: &str, current: Duration, min: u64, max: u64) -> Duration {
    let ms = env_override(name, current.as_millis() as u64, |v| (min..=max).contains(v));
    Duration::from_millis(ms)
}

/// Connection supervisor settings
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Delay between two position snapshots
    pub poll_interval: Duration,
    /// Retry policy of each connection step
    pub step_retry: RetryPolicy,
    /// Time limit of one attempt of a connection step
    pub step_timeout: Duration,
    /// Persist a heartbeat every this many polling cycles
    pub heartbeat_every_cycles: u64,
    /// Consecutive snapshot failures before the loop is declared failed
    pub max_snapshot_failures: u32,
    /// Reconnection attempts before the account is given up on
    pub max_reconnect_attempts: u32,
    /// A heartbeat younger than this counts as connected
    pub heartbeat_freshness: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            step_retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(30),
                jitter: true,
            },
            step_timeout: Duration::from_secs(60),
            heartbeat_every_cycles: 30,
            max_snapshot_failures: 5,
            max_reconnect_attempts: 10,
            heartbeat_freshness: Duration::from_secs(5 * 60),
        }
    }
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.poll_interval = env_millis("POLL_INTERVAL_MS", config.poll_interval, 100, 60_000);
        config.step_retry.max_attempts = env_override(
            "CONNECT_MAX_ATTEMPTS",
            config.step_retry.max_attempts,
            |v| (1..=20).contains(v),
        );
        config.step_retry.initial_delay = env_millis(
            "CONNECT_INITIAL_BACKOFF_MS",
            config.step_retry.initial_delay,
            10,
            60_000,
        );
        config.step_retry.max_delay = env_millis(
            "CONNECT_MAX_BACKOFF_MS",
            config.step_retry.max_delay,
            10,
            600_000,
        );
        config.step_timeout =
            env_millis("CONNECT_STEP_TIMEOUT_MS", config.step_timeout, 100, 600_000);
        config.heartbeat_every_cycles = env_override(
            "HEARTBEAT_EVERY_CYCLES",
            config.heartbeat_every_cycles,
            |v| *v > 0,
        );
        config.max_snapshot_failures = env_override(
            "MAX_SNAPSHOT_FAILURES",
            config.max_snapshot_failures,
            |v| (1..=100).contains(v),
        );
        config.max_reconnect_attempts = env_override(
            "MAX_RECONNECT_ATTEMPTS",
            config.max_reconnect_attempts,
            |v| (1..=1000).contains(v),
        );
        config.heartbeat_freshness = env_millis(
            "HEARTBEAT_FRESHNESS_MS",
            config.heartbeat_freshness,
            1_000,
            3_600_000,
        );
        config
    }
}

/// Reconciliation sweep settings
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    /// Sweep every this many polling cycles, on top of the sweep after connect
    pub every_cycles: u64,
    /// Time limit of one historical deal lookup
    pub deal_lookup_timeout: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every_cycles: 5,
            deal_lookup_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.enabled = env_flag("RECONCILIATION_ENABLED", config.enabled);
        config.every_cycles =
            env_override("RECONCILIATION_EVERY_CYCLES", config.every_cycles, |v| *v > 0);
        config.deal_lookup_timeout = env_millis(
            "DEAL_LOOKUP_TIMEOUT_MS",
            config.deal_lookup_timeout,
            100,
            120_000,
        );
        config
    }
}

/// Trade processor settings
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub pnl_tiers: PnlTiers,
    /// Balance used for risk percentages when the account balance is unknown
    pub default_account_balance: f64,
    /// Concurrent background scoring tasks
    pub max_background_tasks: usize,
    /// How long shutdown waits for background scoring
    pub shutdown_grace: Duration,
    /// Queue depth of each event subscriber
    pub subscriber_capacity: usize,
    /// JSON list of economic events for the news-risk detector
    pub calendar_file: Option<PathBuf>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            pnl_tiers: PnlTiers::default(),
            default_account_balance: 10_000.0,
            max_background_tasks: 32,
            shutdown_grace: Duration::from_secs(10),
            subscriber_capacity: 256,
            calendar_file: None,
        }
    }
}

impl ProcessorConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.pnl_tiers.direct_above = env_override(
            "PNL_DIRECT_ABOVE",
            config.pnl_tiers.direct_above,
            |v| *v > 0.0,
        );
        config.pnl_tiers.pip_above =
            env_override("PNL_PIP_ABOVE", config.pnl_tiers.pip_above, |v| *v > 0.0);
        if !config.pnl_tiers.is_valid() {
            tracing::warn!(
                "P&L tier thresholds must satisfy 0 < PNL_PIP_ABOVE < PNL_DIRECT_ABOVE, using defaults"
            );
            config.pnl_tiers = PnlTiers::default();
        }
        config.default_account_balance = env_override(
            "DEFAULT_ACCOUNT_BALANCE",
            config.default_account_balance,
            |v| *v > 0.0,
        );
        config.max_background_tasks = env_override(
            "MAX_BACKGROUND_TASKS",
            config.max_background_tasks,
            |v| (1..=1024).contains(v),
        );
        config.shutdown_grace =
            env_millis("SHUTDOWN_GRACE_MS", config.shutdown_grace, 0, 300_000);
        config.subscriber_capacity = env_override(
            "SUBSCRIBER_CAPACITY",
            config.subscriber_capacity,
            |v| (1..=65_536).contains(v),
        );
        config.calendar_file = std::env::var("ECONOMIC_CALENDAR_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        config
    }
}

/// Scoring backend settings
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub retry: RetryPolicy,
    pub attempt_timeout: Duration,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(5),
                jitter: true,
            },
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl ScoringConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.retry.max_attempts = env_override(
            "SCORING_MAX_ATTEMPTS",
            config.retry.max_attempts,
            |v| (1..=10).contains(v),
        );
        config.attempt_timeout =
            env_millis("SCORING_TIMEOUT_MS", config.attempt_timeout, 100, 300_000);
        config
    }
}

/// Which upstream adapter to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerMode {
    MetaApi,
    Simulated,
}

impl FromStr for BrokerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metaapi" => Ok(BrokerMode::MetaApi),
            "simulated" | "simulation" => Ok(BrokerMode::Simulated),
            other => Err(format!("unknown broker mode '{}'", other)),
        }
    }
}

impl std::fmt::Display for BrokerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerMode::MetaApi => f.write_str("metaapi"),
            BrokerMode::Simulated => f.write_str("simulated"),
        }
    }
}

/// Upstream provider settings. The token itself is loaded by
/// [`crate::secrets`].
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub mode: BrokerMode,
    /// MetaApi region, used to build the client API host
    pub region: String,
    pub provisioning_url: String,
    /// Client API base URL; derived from the region when unset
    pub client_url: Option<String>,
    pub request_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mode: BrokerMode::Simulated,
            region: "new-york".to_string(),
            provisioning_url: "https://mt-provisioning-api-v1.agiliumtrade.agiliumtrade.ai"
                .to_string(),
            client_url: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("BROKER_MODE") {
            match raw.parse::<BrokerMode>() {
                Ok(mode) => config.mode = mode,
                Err(e) => tracing::warn!(
                    "Invalid BROKER_MODE: {}, using default: {}",
                    e,
                    config.mode
                ),
            }
        }
        if let Ok(region) = std::env::var("METAAPI_REGION") {
            if !region.trim().is_empty() {
                config.region = region.trim().to_string();
            }
        }
        if let Ok(url) = std::env::var("METAAPI_PROVISIONING_URL") {
            match url::Url::parse(&url) {
                Ok(_) => config.provisioning_url = url.trim_end_matches('/').to_string(),
                Err(e) => tracing::warn!("Invalid METAAPI_PROVISIONING_URL '{}': {}", url, e),
            }
        }
        if let Ok(url) = std::env::var("METAAPI_CLIENT_URL") {
            match url::Url::parse(&url) {
                Ok(_) => config.client_url = Some(url.trim_end_matches('/').to_string()),
                Err(e) => tracing::warn!("Invalid METAAPI_CLIENT_URL '{}': {}", url, e),
            }
        }
        config.request_timeout = env_millis(
            "METAAPI_REQUEST_TIMEOUT_MS",
            config.request_timeout,
            1_000,
            300_000,
        );
        config
    }

    pub fn client_base_url(&self) -> String {
        self.client_url.clone().unwrap_or_else(|| {
            format!("https://mt-client-api-v1.{}.agiliumtrade.ai", self.region)
        })
    }
}

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub requests_per_minute: u32,
    /// Maximum accepted request body
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            requests_per_minute: 100,
            max_body_bytes: 64 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("SERVER_HOST") {
            if !host.trim().is_empty() {
                config.host = host.trim().to_string();
            }
        }
        config.port = env_override("SERVER_PORT", config.port, |v| *v > 0);
        config.requests_per_minute = env_override(
            "RATE_LIMIT_PER_MINUTE",
            config.requests_per_minute,
            |v| (1..=100_000).contains(v),
        );
        config.max_body_bytes = env_override(
            "MAX_BODY_BYTES",
            config.max_body_bytes,
            |v| (1024..=16 * 1024 * 1024).contains(v),
        );
        config
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub supervisor: SupervisorConfig,
    pub reconciliation: ReconciliationConfig,
    pub processor: ProcessorConfig,
    pub scoring: ScoringConfig,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load every sub-configuration from the environment
    pub fn from_env() -> Self {
        Self {
            supervisor: SupervisorConfig::from_env(),
            reconciliation: ReconciliationConfig::from_env(),
            processor: ProcessorConfig::from_env(),
            scoring: ScoringConfig::from_env(),
            database: DatabaseConfig::from_env(),
            broker: BrokerConfig::from_env(),
            server: ServerConfig::from_env(),
        }
    }

    /// Cross-field checks that cannot be expressed per variable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.supervisor.step_retry.initial_delay > self.supervisor.step_retry.max_delay {
            return Err(ConfigError::Invalid(
                "CONNECT_INITIAL_BACKOFF_MS exceeds CONNECT_MAX_BACKOFF_MS".to_string(),
            ));
        }
        if !self.processor.pnl_tiers.is_valid() {
            return Err(ConfigError::Invalid(
                "P&L tier thresholds are not increasing".to_string(),
            ));
        }
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Missing("DATABASE_URL".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.supervisor.poll_interval, Duration::from_secs(1));
        assert_eq!(config.supervisor.heartbeat_every_cycles, 30);
        assert_eq!(config.supervisor.heartbeat_freshness, Duration::from_secs(300));
        assert_eq!(config.processor.default_account_balance, 10_000.0);
        assert_eq!(config.broker.mode, BrokerMode::Simulated);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reconciliation_defaults_to_every_fifth_poll() {
        let config = ReconciliationConfig::default();
        assert!(config.enabled);
        assert_eq!(config.every_cycles, 5);
        assert_eq!(config.deal_lookup_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_env_override_rejects_out_of_range() {
        std::env::set_var("TEST_CFG_OVERRIDE_RANGE", "500");
        assert_eq!(
            env_override("TEST_CFG_OVERRIDE_RANGE", 5u32, |v| *v <= 100),
            5
        );
        std::env::set_var("TEST_CFG_OVERRIDE_RANGE", "not-a-number");
        assert_eq!(
            env_override("TEST_CFG_OVERRIDE_RANGE", 5u32, |v| *v <= 100),
            5
        );
        std::env::set_var("TEST_CFG_OVERRIDE_RANGE", "42");
        assert_eq!(
            env_override("TEST_CFG_OVERRIDE_RANGE", 5u32, |v| *v <= 100),
            42
        );
        std::env::remove_var("TEST_CFG_OVERRIDE_RANGE");
    }

    #[test]
    fn test_broker_mode_parsing() {
        assert_eq!("MetaApi".parse::<BrokerMode>().unwrap(), BrokerMode::MetaApi);
        assert_eq!("simulation".parse::<BrokerMode>().unwrap(), BrokerMode::Simulated);
        assert!("mt4".parse::<BrokerMode>().is_err());
    }

    #[test]
    fn test_client_url_from_region() {
        let config = BrokerConfig {
            region: "london".to_string(),
            ..BrokerConfig::default()
        };
        assert_eq!(
            config.client_base_url(),
            "https://mt-client-api-v1.london.agiliumtrade.ai"
        );
    }

    #[test]
    fn test_backoff_order_is_validated() {
        let mut config = AppConfig::default();
        config.supervisor.step_retry.initial_delay = Duration::from_secs(60);
        config.supervisor.step_retry.max_delay = Duration::from_secs(1);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
