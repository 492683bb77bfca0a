// error.rs

use thiserror::Error;

/// Rejections raised while building or checking a configuration record.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field}: {len} bytes does not fit in {max} bytes")]
    Truncated {
        field: &'static str,
        max: usize,
        len: usize,
    },

    #[error("{field}: {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{field}: cannot parse {value:?}")]
    Parse { field: &'static str, value: String },

    #[error("{field} must not be empty")]
    Missing { field: &'static str },

    #[error("config has never been saved")]
    NotPresent,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker connection lost")]
    Disconnected,

    #[error("publish failed: {0}")]
    Transport(String),
}

/// Outcome of a rejected config-apply request.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage write failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

// EOF
