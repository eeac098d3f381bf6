//! CLI command implementations.

pub mod check;
pub mod config;
pub mod init;
pub mod pending;
pub mod status;

use thiserror::Error;

/// Errors raised by the commands themselves.
#[derive(Debug, Error)]
pub enum CommandError {
    /// A stored setting could not be parsed.
    #[error("stored setting '{name}' has invalid value '{value}'")]
    InvalidSetting {
        /// Setting name.
        name: String,
        /// Raw stored value.
        value: String,
    },

    /// Output format not understood.
    #[error("unknown output format '{0}', expected 'text' or 'json'")]
    UnknownFormat(String),

    /// The integrity check reported problems.
    #[error("integrity check failed: {0}")]
    IntegrityFailed(String),
}

/// Output format of reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl OutputFormat {
    /// Parses a `--format` value.
    pub fn parse(value: &str) -> Result<Self, CommandError> {
        match value {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(CommandError::UnknownFormat(other.to_string())),
        }
    }
}
