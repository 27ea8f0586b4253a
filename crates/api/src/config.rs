//! Application configuration loaded from environment variables.

use std::collections::HashMap;
use std::time::Duration;

use saga::RetryPolicy;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — Postgres connection string; events stay in memory when unset
/// - `SAGA_SERVICES` — service base URLs as `name=url,name=url`
/// - `SAGA_TRANSACTION_ATTEMPTS` — attempts per transaction call (default: `1`)
/// - `SAGA_COMPENSATION_ATTEMPTS` — attempts per compensation call (default: `1`)
/// - `SAGA_TRANSPORT_TIMEOUT_MS` — timeout of one remote call (default: `10000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub services: HashMap<String, String>,
    pub transaction_attempts: u32,
    pub compensation_attempts: u32,
    pub transport_timeout_ms: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(lookup("PORT"), defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            services: lookup("SAGA_SERVICES")
                .map(|raw| parse_services(&raw))
                .unwrap_or_default(),
            transaction_attempts: parse_or(
                lookup("SAGA_TRANSACTION_ATTEMPTS"),
                defaults.transaction_attempts,
            ),
            compensation_attempts: parse_or(
                lookup("SAGA_COMPENSATION_ATTEMPTS"),
                defaults.compensation_attempts,
            ),
            transport_timeout_ms: parse_or(
                lookup("SAGA_TRANSPORT_TIMEOUT_MS"),
                defaults.transport_timeout_ms,
            ),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.transaction_attempts, self.compensation_attempts)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            services: HashMap::new(),
            transaction_attempts: 1,
            compensation_attempts: 1,
            transport_timeout_ms: 10_000,
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Parses `name=url` pairs separated by commas. Malformed entries are skipped.
fn parse_services(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|entry| {
            let (name, url) = entry.split_once('=')?;
            let (name, url) = (name.trim(), url.trim());
            if name.is_empty() || url.is_empty() {
                tracing::warn!(entry, "ignoring malformed SAGA_SERVICES entry");
                return None;
            }
            Some((name.to_string(), url.to_string()))
        })
        .collect()
}
