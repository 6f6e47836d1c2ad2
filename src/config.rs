//! Server Configuration
//!
//! Loaded from an optional JSON file, then overridden by environment
//! variables, then by CLI flags. `validate` runs last.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::auth::AuthConfig;
use crate::observability::LogFormat;
use crate::realtime::{AllowedTopics, RefreshPolicy};
use crate::store::{is_identifier, PgStoreConfig};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("invalid config file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Full server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub database_url: String,

    #[serde(default)]
    pub jwt_secret: String,

    /// Required `iss` claim, unchecked when unset
    #[serde(default)]
    pub jwt_issuer: Option<String>,

    /// Required `aud` claim, unchecked when unset
    #[serde(default)]
    pub jwt_audience: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Tables clients may subscribe to and refresh
    #[serde(default = "default_allowed_topics")]
    pub allowed_topics: Vec<String>,

    /// Channel the database publishes row changes on
    #[serde(default = "default_notify_channel")]
    pub notify_channel: String,

    #[serde(default = "default_owner_column")]
    pub owner_column: String,

    #[serde(default = "default_order_column")]
    pub order_column: String,

    #[serde(default = "default_refresh_limit")]
    pub refresh_limit: usize,

    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Per-connection outbound queue capacity
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// CORS allowed origins; empty means any
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_allowed_topics() -> Vec<String> {
    ["workouts", "meals", "meal_plans", "grocery_lists", "user_profiles"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_notify_channel() -> String {
    "table_changes".to_string()
}

fn default_owner_column() -> String {
    "user_id".to_string()
}

fn default_order_column() -> String {
    "created_at".to_string()
}

fn default_refresh_limit() -> usize {
    10
}

fn default_refresh_timeout_ms() -> u64 {
    5000
}

fn default_pool_size() -> usize {
    8
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            jwt_secret: String::new(),
            jwt_issuer: None,
            jwt_audience: None,
            host: default_host(),
            port: default_port(),
            allowed_topics: default_allowed_topics(),
            notify_channel: default_notify_channel(),
            owner_column: default_owner_column(),
            order_column: default_order_column(),
            refresh_limit: default_refresh_limit(),
            refresh_timeout_ms: default_refresh_timeout_ms(),
            pool_size: default_pool_size(),
            outbound_buffer: default_outbound_buffer(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            cors_origins: Vec::new(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl ServerConfig {
    /// File (if given) overlaid with the process environment. Not validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a JSON config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Override fields from environment variables. Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = get("JWT_SECRET") {
            self.jwt_secret = v;
        }
        if let Some(v) = get("JWT_ISSUER") {
            self.jwt_issuer = Some(v);
        }
        if let Some(v) = get("JWT_AUDIENCE") {
            self.jwt_audience = Some(v);
        }
        if let Some(v) = get("HOST") {
            self.host = v;
        }
        if let Some(v) = get("PORT") {
            self.port = parse_number("PORT", &v)?;
        }
        if let Some(v) = get("ALLOWED_TOPICS") {
            self.allowed_topics = split_list(&v);
        }
        if let Some(v) = get("NOTIFY_CHANNEL") {
            self.notify_channel = v;
        }
        if let Some(v) = get("OWNER_COLUMN") {
            self.owner_column = v;
        }
        if let Some(v) = get("ORDER_COLUMN") {
            self.order_column = v;
        }
        if let Some(v) = get("REFRESH_LIMIT") {
            self.refresh_limit = parse_number("REFRESH_LIMIT", &v)?;
        }
        if let Some(v) = get("REFRESH_TIMEOUT_MS") {
            self.refresh_timeout_ms = parse_number("REFRESH_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("DB_POOL_SIZE") {
            self.pool_size = parse_number("DB_POOL_SIZE", &v)?;
        }
        if let Some(v) = get("OUTBOUND_BUFFER") {
            self.outbound_buffer = parse_number("OUTBOUND_BUFFER", &v)?;
        }
        if let Some(v) = get("SHUTDOWN_TIMEOUT_MS") {
            self.shutdown_timeout_ms = parse_number("SHUTDOWN_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("CORS_ORIGINS") {
            self.cors_origins = split_list(&v);
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.log_format = v;
        }
        Ok(())
    }

    /// Check required values, identifiers and limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Missing("JWT_SECRET"));
        }
        if self.allowed_topics.is_empty() {
            return Err(ConfigError::Invalid {
                field: "allowed_topics",
                reason: "at least one topic is required".to_string(),
            });
        }
        for topic in &self.allowed_topics {
            if !is_identifier(topic) {
                return Err(ConfigError::Invalid {
                    field: "allowed_topics",
                    reason: format!("'{}' is not a table name", topic),
                });
            }
        }

        let identifiers = [
            ("notify_channel", &self.notify_channel),
            ("owner_column", &self.owner_column),
            ("order_column", &self.order_column),
        ];
        for (field, value) in identifiers {
            if !is_identifier(value) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("'{}' is not an identifier", value),
                });
            }
        }

        let limits = [
            ("refresh_limit", self.refresh_limit as u64),
            ("refresh_timeout_ms", self.refresh_timeout_ms),
            ("pool_size", self.pool_size as u64),
            ("outbound_buffer", self.outbound_buffer as u64),
            ("shutdown_timeout_ms", self.shutdown_timeout_ms),
        ];
        for (field, value) in limits {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if LogFormat::parse(&self.log_format).is_none() {
            return Err(ConfigError::Invalid {
                field: "log_format",
                reason: format!("'{}' is not compact, json or jsonl", self.log_format),
            });
        }
        Ok(())
    }

    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            secret: self.jwt_secret.clone(),
            issuer: self.jwt_issuer.clone(),
            audience: self.jwt_audience.clone(),
        }
    }

    pub fn store_config(&self) -> PgStoreConfig {
        PgStoreConfig {
            database_url: self.database_url.clone(),
            pool_size: self.pool_size,
            owner_column: self.owner_column.clone(),
            order_column: self.order_column.clone(),
        }
    }

    pub fn topics(&self) -> AllowedTopics {
        AllowedTopics::new(self.allowed_topics.iter())
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            limit: self.refresh_limit,
            timeout: Duration::from_millis(self.refresh_timeout_ms),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn log_format(&self) -> LogFormat {
        LogFormat::parse(&self.log_format).unwrap_or(LogFormat::Compact)
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        field,
        reason: format!("'{}' is not a valid number", value),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn valid() -> ServerConfig {
        ServerConfig {
            database_url: "postgres://localhost/fitness".to_string(),
            jwt_secret: "secret".to_string(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_addr(), "0.0.0.0:3001");
        assert_eq!(config.allowed_topics.len(), 5);
        assert_eq!(config.notify_channel, "table_changes");
        assert_eq!(config.refresh_limit, 10);
        assert_eq!(config.refresh_policy().timeout, Duration::from_secs(5));
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config
            .apply_env(env(&[
                ("DATABASE_URL", "postgres://db/app"),
                ("JWT_SECRET", "s3cret"),
                ("PORT", "8080"),
                ("ALLOWED_TOPICS", " workouts, meals ,,"),
                ("JWT_ISSUER", ""),
                ("CORS_ORIGINS", "http://localhost:5173"),
            ]))
            .unwrap();

        assert_eq!(config.database_url, "postgres://db/app");
        assert_eq!(config.port, 8080);
        assert_eq!(config.allowed_topics, vec!["workouts", "meals"]);
        assert_eq!(config.jwt_issuer, None);
        assert_eq!(config.cors_origins, vec!["http://localhost:5173"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_bad_number() {
        let mut config = ServerConfig::default();
        let err = config.apply_env(env(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "PORT", .. }));
    }

    #[test]
    fn test_validate_requires_secrets() {
        let mut config = valid();
        config.jwt_secret.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("JWT_SECRET"))));

        let mut config = valid();
        config.database_url = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("DATABASE_URL"))));
    }

    #[test]
    fn test_validate_identifiers_and_limits() {
        let mut config = valid();
        config.allowed_topics.push("users; drop".to_string());
        assert!(config.validate().is_err());

        let mut config = valid();
        config.notify_channel = "table-changes".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.refresh_limit = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.log_format = "pretty".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_format_spellings_validate() {
        for spelling in ["compact", "json", "jsonl", "JSON"] {
            let mut config = valid();
            config.log_format = spelling.to_string();
            assert!(config.validate().is_ok(), "{} should validate", spelling);
        }

        let mut config = valid();
        config.log_format = "JSONL".to_string();
        assert_eq!(config.log_format(), LogFormat::Json);
    }

    #[test]
    fn test_from_file_then_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"database_url": "postgres://file/db", "jwt_secret": "from-file", "port": 4000}}"#
        )
        .unwrap();

        let mut config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.refresh_limit, 10);

        config.apply_env(env(&[("JWT_SECRET", "from-env")])).unwrap();
        assert_eq!(config.jwt_secret, "from-env");
        assert_eq!(config.database_url, "postgres://file/db");
    }

    #[test]
    fn test_from_file_rejects_unknown_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"prot": 4000}}"#).unwrap();
        assert!(matches!(
            ServerConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_from_file_missing() {
        let result = ServerConfig::from_file(Path::new("/nonexistent/rowcast.json"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
