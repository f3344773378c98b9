//! Dispatch service configuration with validation.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Aggregate configuration, loaded from a TOML file and overridable by
/// `DISPATCH_*`-prefixed environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// HTTP server configuration.
    pub http: HttpConfig,
    /// Admission capacity and worker timing.
    pub capacity: CapacityConfig,
    /// Workspace manager base paths.
    pub workspace: WorkspaceConfig,
    /// HMAC shared secret for inbound request verification.
    pub security: SecurityConfig,
    /// Downstream code-host credential provider.
    pub token_provider: TokenProviderConfig,
    /// Outbound callback delivery tuning.
    pub callback: CallbackConfig,
    /// Logging configuration.
    pub telemetry: TelemetryConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            capacity: CapacityConfig::default(),
            workspace: WorkspaceConfig::default(),
            security: SecurityConfig::default(),
            token_provider: TokenProviderConfig::default(),
            callback: CallbackConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl DispatchConfig {
    /// Validate cross-field invariants not expressible through `serde` alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity.capacity == 0 {
            return Err(ConfigError::InvalidCapacity(
                "capacity must be at least 1".into(),
            ));
        }
        if self.capacity.worker_timeout.as_secs() == 0
            || self.capacity.worker_timeout.as_secs() > 7200
        {
            return Err(ConfigError::InvalidTimeout(
                "worker timeout must be between 1 and 7200 seconds".into(),
            ));
        }
        if self.security.shared_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "security.shared_secret must be at least 32 bytes".into(),
            ));
        }
        if self.http.require_https_callbacks && self.telemetry.environment == "development" {
            // Not an error; flagged so operators notice the mismatch in logs.
            tracing::warn!(
                "require_https_callbacks is set while environment is development"
            );
        }
        Ok(())
    }

    /// HTTP bind address.
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }

    /// Load configuration from a TOML file (if `path` exists) layered under
    /// the documented defaults, then apply `DISPATCH_*` environment
    /// overrides for the fields operators most commonly need to set without
    /// touching the file (bind port, capacity, and the two secrets).
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Invalid(format!("reading {}: {e}", path.display())))?;
            toml::from_str(&raw).map_err(|e| ConfigError::Invalid(format!("parsing {}: {e}", path.display())))?
        } else {
            Self::default()
        };

        if let Ok(port) = std::env::var("DISPATCH_HTTP_PORT") {
            config.http.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid("DISPATCH_HTTP_PORT must be a u16".into()))?;
        }
        if let Ok(capacity) = std::env::var("DISPATCH_CAPACITY") {
            config.capacity.capacity = capacity
                .parse()
                .map_err(|_| ConfigError::InvalidCapacity("DISPATCH_CAPACITY must be a positive integer".into()))?;
        }
        if let Ok(secret) = std::env::var("DISPATCH_SHARED_SECRET") {
            config.security.shared_secret = secret;
        }
        if let Ok(endpoint) = std::env::var("DISPATCH_TOKEN_ENDPOINT") {
            config.token_provider.endpoint = endpoint;
        }

        Ok(config)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address.
    pub host: IpAddr,
    /// Bind port.
    pub port: u16,
    /// Maximum accepted request body size, in bytes.
    pub max_body_bytes: usize,
    /// Time budget for parsing and admitting a submission (§5).
    #[serde(with = "humantime_serde")]
    pub admission_parse_timeout: Duration,
    /// Whether `callbackUrl` must use `https` (production posture).
    pub require_https_callbacks: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8088,
            max_body_bytes: 1024 * 1024,
            admission_parse_timeout: Duration::from_secs(5),
            require_https_callbacks: true,
        }
    }
}

/// Admission capacity and worker wall-clock limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Maximum number of tasks in `running` state.
    pub capacity: usize,
    /// Default worker wall-clock timeout when the caller omits `timeoutSeconds`.
    #[serde(with = "humantime_serde")]
    pub worker_timeout: Duration,
    /// Grace window between graceful and forceful termination.
    #[serde(with = "humantime_serde")]
    pub worker_grace_window: Duration,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            worker_timeout: Duration::from_secs(30 * 60),
            worker_grace_window: Duration::from_secs(30),
        }
    }
}

/// Workspace manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Shared base repository every workspace branches from.
    pub base_repository: PathBuf,
    /// Directory under which per-task worktrees are created.
    pub worktree_root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_repository: PathBuf::from("./base-repo"),
            worktree_root: PathBuf::from("./workspaces"),
        }
    }
}

/// HMAC signing configuration for inbound requests and admin routes. Distinct
/// from each task's own `callbackSecret`, which is caller-supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Shared secret used to verify `/tasks` and `/admin/*` signatures.
    pub shared_secret: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            shared_secret: String::new(),
        }
    }
}

/// Identity/token provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenProviderConfig {
    /// Credential refresh endpoint.
    pub endpoint: String,
    /// Refresh ahead of expiry by this margin.
    #[serde(with = "humantime_serde")]
    pub safety_margin: Duration,
    /// Per-refresh HTTP timeout.
    #[serde(with = "humantime_serde")]
    pub refresh_timeout: Duration,
}

impl Default for TokenProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://token-provider.internal/refresh".to_string(),
            safety_margin: Duration::from_secs(5 * 60),
            refresh_timeout: Duration::from_secs(10),
        }
    }
}

/// Outbound callback delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Per-attempt HTTP timeout.
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    /// Retry attempt cap for non-terminal events.
    pub max_attempts_non_terminal: u32,
    /// Backoff base delay.
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    /// Backoff cap.
    #[serde(with = "humantime_serde")]
    pub backoff_cap: Duration,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            max_attempts_non_terminal: 5,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `RUST_LOG`-style filter directive.
    pub log_level: String,
    /// Emit JSON logs instead of ANSI-pretty.
    pub json_logs: bool,
    /// Free-form deployment environment tag, e.g. `"production"`.
    pub environment: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            environment: "development".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Capacity is not a usable value.
    #[error("invalid capacity: {0}")]
    InvalidCapacity(String),
    /// A duration field is out of its documented bounds.
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime-style duration strings (`"30s"`, `"5m"`) for config fields.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(secs) = s.strip_suffix('s') {
            secs.trim().parse().map(Duration::from_secs).map_err(|_| "invalid seconds")
        } else if let Some(ms) = s.strip_suffix("ms") {
            ms.trim().parse().map(Duration::from_millis).map_err(|_| "invalid milliseconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            s.parse().map(Duration::from_secs).map_err(|_| "invalid duration format")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_validation_without_a_secret() {
        let config = DispatchConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn a_sufficiently_long_secret_and_sane_capacity_validate() {
        let mut config = DispatchConfig::default();
        config.security.shared_secret = "s".repeat(32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = DispatchConfig::default();
        config.security.shared_secret = "s".repeat(32);
        config.capacity.capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCapacity(_))
        ));
    }

    #[test]
    fn http_addr_uses_configured_host_and_port() {
        let config = DispatchConfig::default();
        assert_eq!(config.http_addr().port(), config.http.port);
    }

    #[test]
    fn load_falls_back_to_defaults_when_the_file_is_absent() {
        let config = DispatchConfig::load(std::path::Path::new("/nonexistent/dispatch.toml")).unwrap();
        assert_eq!(config.capacity.capacity, CapacityConfig::default().capacity);
    }
}
