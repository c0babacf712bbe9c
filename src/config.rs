//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded once at start-up from environment variables,
//! optionally seeded from a `.env` file. Secrets and the backend URL have no
//! defaults; everything else falls back to the values listed below.
//!
//! # Required
//!
//! - `FRONTEND_SECRET`: Credential clients must send in `X-Frontend-Secret`
//! - `BACKEND_SECRET`: Credential attached to upstream calls as `X-Api-Secret`
//! - `BACKEND_URL`: Absolute http(s) URL of the chat backend
//!
//! # CORS
//!
//! - `ALLOWED_ORIGIN`: Comma-separated browser origins. Empty means no
//!   cross-origin access; `*` allows any origin, without credentials.
//!
//! # Admission Control
//!
//! - `RATE_LIMIT_REQUESTS`: Requests per window per client (default: 5, 0 = disabled)
//! - `RATE_LIMIT_WINDOW_SECS`: Rolling window length (default: 60)
//! - `RATE_LIMIT_SWEEP_INTERVAL_SECS`: Stale client eviction period (default: 60)
//! - `TRUSTED_PROXIES`: CIDR ranges allowed to set `X-Forwarded-For` / `X-Real-IP`
//!
//! # Upstream Timeouts
//!
//! - `UPSTREAM_CONNECT_TIMEOUT_SECS` (default: 5)
//! - `UPSTREAM_WRITE_TIMEOUT_SECS` (default: 5)
//! - `UPSTREAM_READ_TIMEOUT_SECS` (default: 60)
//! - `UPSTREAM_POOL_TIMEOUT_SECS` (default: 5)
//!
//! The four budgets together may not exceed one day.
//!
//! # Body Limits
//!
//! - `MAX_REQUEST_BODY_SIZE`: Inbound body cap in bytes (default: 1MB)
//! - `MAX_RESPONSE_BODY_SIZE`: Backend response cap in bytes (default: 10MB)

use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Timeout budgets for the outbound call to the chat backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamTimeouts {
    /// Time allowed to establish the TCP/TLS connection.
    pub connect: Duration,
    /// Time allowed to upload the request body.
    pub write: Duration,
    /// Time allowed to wait for the response.
    pub read: Duration,
    /// Time allowed to wait for a free pooled connection.
    pub pool: Duration,
}

/// Longest total upstream budget accepted at start-up.
pub const MAX_UPSTREAM_TOTAL: Duration = Duration::from_secs(24 * 60 * 60);

impl UpstreamTimeouts {
    /// Upper bound on a whole exchange, from checkout to the last body byte.
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn total(&self) -> Duration {
        self.pool
            .saturating_add(self.connect)
            .saturating_add(self.write)
            .saturating_add(self.read)
    }
}

impl Default for UpstreamTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            write: Duration::from_secs(5),
            read: Duration::from_secs(60),
            pool: Duration::from_secs(5),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// `Debug` redacts both secrets so the struct can be logged safely.
#[derive(Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8000)
    pub port: u16,

    /// Maximum inbound request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    /// Maximum backend response body size in bytes (default: 10MB)
    pub max_response_body_size: usize,

    // =========================================================================
    // Credentials
    // =========================================================================
    /// Secret expected in the `X-Frontend-Secret` header
    pub frontend_secret: String,

    /// Secret sent upstream in the `X-Api-Secret` header
    pub backend_secret: String,

    // =========================================================================
    // Upstream
    // =========================================================================
    /// Chat backend endpoint every admitted request is forwarded to
    pub backend_url: String,

    pub upstream_timeouts: UpstreamTimeouts,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Requests admitted per client within one window (0 = disabled)
    pub rate_limit_requests: u32,

    /// Length of the rolling window
    pub rate_limit_window: Duration,

    /// How often idle clients are evicted from the limiter
    pub rate_limit_sweep_interval: Duration,

    /// Trusted proxy CIDR ranges. Forwarding headers are only honoured when
    /// the peer address falls inside one of these; empty means the peer
    /// address is always used.
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // CORS
    // =========================================================================
    /// Allowed browser origins. `"*"` allows any origin without credentials.
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log filter (e.g., "info", "chat_proxy=debug")
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable text
    pub log_json: bool,

    /// Port for Prometheus metrics endpoint (default: 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a required variable is missing or
    /// any value fails to parse or validate.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8000)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,
            max_response_body_size: Self::parse_env("MAX_RESPONSE_BODY_SIZE", 10 * 1024 * 1024)?,

            // Credentials
            frontend_secret: Self::require_env("FRONTEND_SECRET")?,
            backend_secret: Self::require_env("BACKEND_SECRET")?,

            // Upstream
            backend_url: Self::require_env("BACKEND_URL")?.trim().to_string(),
            upstream_timeouts: UpstreamTimeouts {
                connect: Duration::from_secs(Self::parse_env("UPSTREAM_CONNECT_TIMEOUT_SECS", 5)?),
                write: Duration::from_secs(Self::parse_env("UPSTREAM_WRITE_TIMEOUT_SECS", 5)?),
                read: Duration::from_secs(Self::parse_env("UPSTREAM_READ_TIMEOUT_SECS", 60)?),
                pool: Duration::from_secs(Self::parse_env("UPSTREAM_POOL_TIMEOUT_SECS", 5)?),
            },

            // Rate limiting
            rate_limit_requests: Self::parse_env("RATE_LIMIT_REQUESTS", 5)?,
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                60,
            )?),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES"),

            // CORS
            cors_allowed_origins: Self::parse_list("ALLOWED_ORIGIN"),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            metrics_port: Self::parse_env("METRICS_PORT", 0)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.frontend_secret.is_empty() {
            return Err(AppError::ConfigError(
                "FRONTEND_SECRET must not be empty".to_string(),
            ));
        }

        if self.backend_secret.is_empty() {
            return Err(AppError::ConfigError(
                "BACKEND_SECRET must not be empty".to_string(),
            ));
        }

        parse_backend_url(&self.backend_url)?;

        let timeouts = [
            ("UPSTREAM_CONNECT_TIMEOUT_SECS", self.upstream_timeouts.connect),
            ("UPSTREAM_WRITE_TIMEOUT_SECS", self.upstream_timeouts.write),
            ("UPSTREAM_READ_TIMEOUT_SECS", self.upstream_timeouts.read),
            ("UPSTREAM_POOL_TIMEOUT_SECS", self.upstream_timeouts.pool),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(AppError::ConfigError(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.upstream_timeouts.total() > MAX_UPSTREAM_TOTAL {
            return Err(AppError::ConfigError(format!(
                "UPSTREAM_*_TIMEOUT_SECS must add up to at most {} seconds",
                MAX_UPSTREAM_TOTAL.as_secs()
            )));
        }

        if self.rate_limiting_enabled() && self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0 when rate limiting is enabled"
                    .to_string(),
            ));
        }

        if self.rate_limiting_enabled() && self.rate_limit_sweep_interval.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.max_response_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_RESPONSE_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if let Some(bad) = self
            .cors_allowed_origins
            .iter()
            .filter(|o| o.as_str() != "*")
            .find(|o| o.parse::<axum::http::HeaderValue>().is_err())
        {
            return Err(AppError::ConfigError(format!(
                "ALLOWED_ORIGIN contains an invalid origin: {bad}"
            )));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_requests > 0
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Read a variable that has no sensible default.
    fn require_env(name: &str) -> AppResult<String> {
        env::var(name).map_err(|_| AppError::ConfigError(format!("{name} must be set")))
    }

    /// Parse a comma-separated list, dropping empty entries.
    fn parse_list(name: &str) -> Vec<String> {
        env::var(name)
            .ok()
            .map(|s| split_list(&s))
            .unwrap_or_default()
    }
}

/// Parse and check the backend endpoint.
///
/// # Errors
///
/// Returns `AppError::ConfigError` unless `raw` is an absolute http(s) URL.
pub fn parse_backend_url(raw: &str) -> AppResult<reqwest::Url> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| AppError::ConfigError(format!("Invalid BACKEND_URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(AppError::ConfigError(format!(
            "BACKEND_URL must use http or https, got {other}"
        ))),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Human-readable window length used in 429 responses ("1 minute", "30 seconds").
pub(crate) fn describe_window(window: Duration) -> String {
    let secs = window.as_secs();
    match secs {
        3600 => "1 hour".to_string(),
        60 => "1 minute".to_string(),
        1 => "1 second".to_string(),
        s if s % 3600 == 0 && s > 0 => format!("{} hours", s / 3600),
        s if s % 60 == 0 && s > 0 => format!("{} minutes", s / 60),
        s => format!("{s} seconds"),
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("max_request_body_size", &self.max_request_body_size)
            .field("max_response_body_size", &self.max_response_body_size)
            .field("frontend_secret", &"<redacted>")
            .field("backend_secret", &"<redacted>")
            .field("backend_url", &self.backend_url)
            .field("upstream_timeouts", &self.upstream_timeouts)
            .field("rate_limit_requests", &self.rate_limit_requests)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("rate_limit_sweep_interval", &self.rate_limit_sweep_interval)
            .field("trusted_proxies", &self.trusted_proxies)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .field("metrics_port", &self.metrics_port)
            .finish()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead; the
/// secrets here are placeholders.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_request_body_size: 1024 * 1024,
            max_response_body_size: 10 * 1024 * 1024,
            frontend_secret: "frontend-secret".to_string(),
            backend_secret: "backend-secret".to_string(),
            backend_url: "http://127.0.0.1:9000/chat".to_string(),
            upstream_timeouts: UpstreamTimeouts::default(),
            rate_limit_requests: 5,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_sweep_interval: Duration::from_secs(60),
            trusted_proxies: vec![],
            cors_allowed_origins: vec![],
            log_level: "info".to_string(),
            log_json: false,
            metrics_port: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 8000);
        assert_eq!(config.rate_limit_requests, 5);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.upstream_timeouts, UpstreamTimeouts::default());
        assert!(!config.metrics_enabled());
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = UpstreamTimeouts::default();
        assert_eq!(timeouts.connect, Duration::from_secs(5));
        assert_eq!(timeouts.write, Duration::from_secs(5));
        assert_eq!(timeouts.read, Duration::from_secs(60));
        assert_eq!(timeouts.pool, Duration::from_secs(5));
        assert_eq!(timeouts.total(), Duration::from_secs(75));
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_frontend_secret() {
        let config = Config {
            frontend_secret: String::new(),
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("FRONTEND_SECRET"));
    }

    #[test]
    fn test_validate_backend_url_scheme() {
        let config = Config {
            backend_url: "ftp://backend/chat".to_string(),
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("http or https"));

        let config = Config {
            backend_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("BACKEND_URL"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = Config {
            upstream_timeouts: UpstreamTimeouts {
                read: Duration::ZERO,
                ..UpstreamTimeouts::default()
            },
            ..Config::default()
        };

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("UPSTREAM_READ_TIMEOUT_SECS")
        );
    }

    #[test]
    fn test_total_saturates_instead_of_overflowing() {
        let timeouts = UpstreamTimeouts {
            read: Duration::from_secs(u64::MAX),
            ..UpstreamTimeouts::default()
        };
        assert_eq!(timeouts.total(), Duration::MAX);
        assert_eq!(UpstreamTimeouts::default().total(), Duration::from_secs(75));
    }

    #[test]
    fn test_validate_rejects_huge_timeouts() {
        let config = Config {
            upstream_timeouts: UpstreamTimeouts {
                read: Duration::from_secs(u64::MAX),
                ..UpstreamTimeouts::default()
            },
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));

        // A one-day read budget plus the other budgets is just over the cap
        let config = Config {
            upstream_timeouts: UpstreamTimeouts {
                read: MAX_UPSTREAM_TOTAL,
                ..UpstreamTimeouts::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            upstream_timeouts: UpstreamTimeouts {
                read: Duration::from_secs(3600),
                ..UpstreamTimeouts::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_response_limit() {
        let config = Config {
            max_response_body_size: 0,
            ..Config::default()
        };
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("MAX_RESPONSE_BODY_SIZE")
        );
    }

    #[test]
    fn test_validate_zero_window_only_matters_when_enabled() {
        let config = Config {
            rate_limit_window: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            rate_limit_requests: 0,
            rate_limit_window: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_validate_invalid_origin() {
        let config = Config {
            cors_allowed_origins: vec!["https://ok.example".to_string(), "bad\norigin".to_string()],
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("ALLOWED_ORIGIN"));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" https://a.example , ,https://b.example,"),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_describe_window() {
        assert_eq!(describe_window(Duration::from_secs(60)), "1 minute");
        assert_eq!(describe_window(Duration::from_secs(120)), "2 minutes");
        assert_eq!(describe_window(Duration::from_secs(3600)), "1 hour");
        assert_eq!(describe_window(Duration::from_secs(45)), "45 seconds");
        assert_eq!(describe_window(Duration::from_secs(1)), "1 second");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config {
            frontend_secret: "front-s3cret".to_string(),
            backend_secret: "back-s3cret".to_string(),
            ..Config::default()
        };

        let debug = format!("{config:?}");
        assert!(!debug.contains("front-s3cret"));
        assert!(!debug.contains("back-s3cret"));
        assert!(debug.contains("<redacted>"));
    }
}
