//! Unified error handling for banshield.
//!
//! A `thiserror`-based hierarchy rather than a single catch-all: each
//! failure domain (ban engine, pattern compilation, adapters) gets its own
//! enum and a stable `error_code()` for logging.

use thiserror::Error;

/// Errors raised by the ban engine's public contract.
#[derive(Debug, Error)]
pub enum BanEngineError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("ban duration must be positive, got {0:?}")]
    InvalidDuration(std::time::Duration),

    #[error("database error: {0}")]
    Db(#[from] DbError),
}

impl BanEngineError {
    /// Stable error code for logging and metrics labeling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "invalid_address",
            Self::InvalidDuration(_) => "invalid_duration",
            Self::Db(_) => "db_error",
        }
    }
}

/// Errors from the persistence layer (C4: patterns, ban_config, blacklist,
/// whitelist tables).
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("entry already present: {0}")]
    AlreadyPresent(String),

    #[error("entry not found: {0}")]
    NotFound(String),
}

impl DbError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Sqlx(_) => "sqlx_error",
            Self::Migration(_) => "migration_error",
            Self::AlreadyPresent(_) => "already_present",
            Self::NotFound(_) => "not_found",
        }
    }
}

/// Errors raised while compiling or applying a pattern rule. Never fatal
/// to the process: a bad pattern is logged and dropped, not bubbled up
/// past the loader.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("pattern '{name}': invalid regex: {source}")]
    InvalidRegex {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("pattern '{name}': ip_group {group} has no corresponding capture group")]
    MissingCaptureGroup { name: String, group: usize },
}

impl PatternError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRegex { .. } => "invalid_regex",
            Self::MissingCaptureGroup { .. } => "missing_capture_group",
        }
    }
}

/// Errors surfaced by the three proxy-facing adapters (C7/C8/C9). Each
/// adapter decides its own fail-open/fail-closed response per variant;
/// this enum only carries the classification.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("no client address present in request")]
    MissingAddress,

    #[error(transparent)]
    Engine(#[from] BanEngineError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "malformed_request",
            Self::MissingAddress => "missing_address",
            Self::Engine(_) => "engine_error",
            Self::Io(_) => "io_error",
        }
    }
}
