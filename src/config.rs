//! Configuration loading and management.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity / logging.
    #[serde(default)]
    pub server: ServerConfig,
    /// Syslog UDP ingestor.
    #[serde(default)]
    pub syslog: SyslogConfig,
    /// HAProxy SPOA adapter.
    #[serde(default)]
    pub spoa: SpoaConfig,
    /// Envoy ext_authz adapter.
    #[serde(default)]
    pub envoy: EnvoyConfig,
    /// Nginx auth_request adapter + admin API.
    #[serde(default)]
    pub nginx: NginxConfig,
    /// SQLite-backed persistent lists / pattern store.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Ban engine tuning.
    #[serde(default)]
    pub ban: BanConfig,
    /// Inline pattern rules, seeded into the database on startup.
    #[serde(default)]
    pub patterns: Vec<PatternConfig>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Pretty
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Instance name, used only in logs.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_server_name() -> String {
    "banshield".to_string()
}

/// Syslog UDP ingestor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyslogConfig {
    #[serde(default = "default_syslog_addr")]
    pub address: SocketAddr,
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            address: default_syslog_addr(),
        }
    }
}

fn default_syslog_addr() -> SocketAddr {
    "0.0.0.0:514".parse().unwrap()
}

/// HAProxy SPOA adapter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SpoaConfig {
    #[serde(default = "default_spoa_addr")]
    pub address: SocketAddr,
    /// Per-connection read deadline.
    #[serde(default = "default_spoa_read_timeout", with = "seconds")]
    pub read_timeout: Duration,
    /// Maximum concurrent client connections.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

impl Default for SpoaConfig {
    fn default() -> Self {
        Self {
            address: default_spoa_addr(),
            read_timeout: default_spoa_read_timeout(),
            max_clients: default_max_clients(),
        }
    }
}

fn default_spoa_addr() -> SocketAddr {
    "0.0.0.0:12345".parse().unwrap()
}

fn default_spoa_read_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_clients() -> usize {
    1024
}

/// Envoy ext_authz gRPC adapter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvoyConfig {
    #[serde(default = "default_envoy_addr")]
    pub address: SocketAddr,
}

impl Default for EnvoyConfig {
    fn default() -> Self {
        Self {
            address: default_envoy_addr(),
        }
    }
}

fn default_envoy_addr() -> SocketAddr {
    "0.0.0.0:9001".parse().unwrap()
}

/// Nginx auth_request adapter configuration (also hosts the admin API).
#[derive(Debug, Clone, Deserialize)]
pub struct NginxConfig {
    #[serde(default = "default_nginx_addr")]
    pub address: SocketAddr,
    #[serde(default = "default_nginx_timeout", with = "seconds")]
    pub read_timeout: Duration,
    #[serde(default = "default_nginx_timeout", with = "seconds")]
    pub write_timeout: Duration,
    /// Emit a JSON body on denied auth_request responses.
    #[serde(default)]
    pub return_json: bool,
}

impl Default for NginxConfig {
    fn default() -> Self {
        Self {
            address: default_nginx_addr(),
            read_timeout: default_nginx_timeout(),
            write_timeout: default_nginx_timeout(),
            return_json: false,
        }
    }
}

fn default_nginx_addr() -> SocketAddr {
    "0.0.0.0:8888".parse().unwrap()
}

fn default_nginx_timeout() -> Duration {
    Duration::from_secs(5)
}

/// SQLite persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "banshield.db".to_string()
}

/// Ban engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BanConfig {
    #[serde(default = "default_initial_ban_time", with = "seconds")]
    pub initial_ban_time: Duration,
    #[serde(default = "default_max_ban_time", with = "seconds")]
    pub max_ban_time: Duration,
    #[serde(default = "default_escalation_factor")]
    pub escalation_factor: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_time_window", with = "seconds")]
    pub time_window: Duration,
    #[serde(default = "default_cleanup_interval", with = "seconds")]
    pub cleanup_interval: Duration,
    #[serde(default = "default_max_memory_ttl", with = "seconds")]
    pub max_memory_ttl: Duration,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            initial_ban_time: default_initial_ban_time(),
            max_ban_time: default_max_ban_time(),
            escalation_factor: default_escalation_factor(),
            max_attempts: default_max_attempts(),
            time_window: default_time_window(),
            cleanup_interval: default_cleanup_interval(),
            max_memory_ttl: default_max_memory_ttl(),
        }
    }
}

fn default_initial_ban_time() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_ban_time() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_escalation_factor() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    3
}

fn default_time_window() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_memory_ttl() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

/// A single pattern rule as declared in config.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternConfig {
    pub name: String,
    pub regex: String,
    pub ip_group: usize,
    pub severity: u8,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Validation errors collected at startup (non-fatal at hot-reload, fatal
/// at boot).
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("ban.max_ban_time ({max:?}) must be >= ban.initial_ban_time ({initial:?})")]
    MaxBanTimeTooSmall { max: Duration, initial: Duration },
    #[error("ban.escalation_factor must be > 1.0, got {0}")]
    EscalationFactorTooSmall(f64),
    #[error("ban.max_attempts must be >= 1")]
    MaxAttemptsZero,
    #[error("pattern '{name}': invalid severity {severity} (must be 1..6)")]
    InvalidSeverity { name: String, severity: u8 },
    #[error("pattern '{name}': invalid regex: {source}")]
    InvalidRegex {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("duplicate pattern name '{0}'")]
    DuplicatePatternName(String),
}

/// Validate the full configuration, collecting every error rather than
/// failing on the first one.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.ban.max_ban_time < config.ban.initial_ban_time {
        errors.push(ValidationError::MaxBanTimeTooSmall {
            max: config.ban.max_ban_time,
            initial: config.ban.initial_ban_time,
        });
    }
    if config.ban.escalation_factor <= 1.0 {
        errors.push(ValidationError::EscalationFactorTooSmall(
            config.ban.escalation_factor,
        ));
    }
    if config.ban.max_attempts == 0 {
        errors.push(ValidationError::MaxAttemptsZero);
    }

    let mut seen_names = std::collections::HashSet::new();
    for pattern in &config.patterns {
        if !(1..=6).contains(&pattern.severity) {
            errors.push(ValidationError::InvalidSeverity {
                name: pattern.name.clone(),
                severity: pattern.severity,
            });
        }
        if let Err(source) = regex::Regex::new(&pattern.regex) {
            errors.push(ValidationError::InvalidRegex {
                name: pattern.name.clone(),
                source,
            });
        }
        if !seen_names.insert(pattern.name.clone()) {
            errors.push(ValidationError::DuplicatePatternName(pattern.name.clone()));
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Serde helper: durations are plain seconds (u64) in config files, not
/// humantime strings, to keep the schema trivial for operators to template.
mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(de)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server: ServerConfig::default(),
            syslog: SyslogConfig::default(),
            spoa: SpoaConfig::default(),
            envoy: EnvoyConfig::default(),
            nginx: NginxConfig::default(),
            database: DatabaseConfig::default(),
            ban: BanConfig::default(),
            patterns: Vec::new(),
        }
    }

    #[test]
    fn defaults_are_internally_consistent() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn rejects_escalation_factor_at_one() {
        let mut config = base_config();
        config.ban.escalation_factor = 1.0;
        let errors = validate(&config).unwrap_err();
        assert!(matches!(
            errors[0],
            ValidationError::EscalationFactorTooSmall(_)
        ));
    }

    #[test]
    fn rejects_invalid_pattern_regex() {
        let mut config = base_config();
        config.patterns.push(PatternConfig {
            name: "bad".to_string(),
            regex: "(unclosed".to_string(),
            ip_group: 1,
            severity: 3,
            description: String::new(),
            enabled: true,
        });
        let errors = validate(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidRegex { .. }));
    }

    #[test]
    fn parses_full_toml_document() {
        let toml_src = r#"
            [server]
            name = "test-instance"
            log_format = "json"

            [syslog]
            address = "127.0.0.1:5140"

            [ban]
            initial_ban_time = 300
            max_ban_time = 86400
            escalation_factor = 2.0
            max_attempts = 3
            time_window = 600
            cleanup_interval = 60
            max_memory_ttl = 604800

            [[patterns]]
            name = "dovecot-auth-failed"
            regex = "dovecot.*auth failed.*rip=([0-9.]+)"
            ip_group = 1
            severity = 4
            description = "Dovecot auth failure"
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.server.name, "test-instance");
        assert_eq!(config.server.log_format, LogFormat::Json);
        assert_eq!(config.patterns.len(), 1);
        assert_eq!(config.patterns[0].severity, 4);
        assert!(validate(&config).is_ok());
    }
}
