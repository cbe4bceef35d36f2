//! Structured error model for pipeline construction and iteration.
//!
//! [`PipelineError`] carries one variant per failure class. Configuration
//! errors are raised synchronously while a pipeline is being composed and are
//! never rerouted; every other class surfaces while batches are being pulled
//! and may be handed to a recovery pipeline as an [`ErrorRecord`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::header::ColumnHeader;
use crate::value::{RowBatch, Value};

/// Broad classification of a pipeline error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid construction parameters.
    Config,
    /// Reference to a column the header does not contain.
    Header,
    /// Failure evaluating a per-row expression or assertion.
    Row,
    /// Operation on a closed channel, or a flush timeout.
    Channel,
    /// Task join failures and other host-side problems.
    Infrastructure,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Header => "header",
            Self::Row => "row",
            Self::Channel => "channel",
            Self::Infrastructure => "infrastructure",
        };
        f.write_str(s)
    }
}

/// Failures of a row channel operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
    #[error("channel flush timed out after {0:?}")]
    FlushTimeout(Duration),
}

/// Error raised while evaluating a single row.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message} (row {row_number}, index {row_index} in batch)")]
pub struct RowError {
    pub code: String,
    pub message: String,
    /// The batch that contained the offending row.
    pub batch: RowBatch,
    /// Index of the offending row inside `batch`.
    pub row_index: usize,
    /// Physical position of the column being evaluated, if any.
    pub column_index: Option<usize>,
    /// Running 1-based row counter across the whole stream.
    pub row_number: u64,
}

/// Categorized pipeline error.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid construction parameters. Always fatal.
    #[error("[config] {code}: {message}")]
    Config { code: String, message: String },

    /// Reference to a nonexistent live column.
    #[error("[header] {code}: {message}")]
    Header {
        code: String,
        message: String,
        /// Header as it stood when the lookup failed.
        header: Vec<ColumnHeader>,
    },

    #[error("[row] {0}")]
    Row(Box<RowError>),

    #[error("[channel] {0}")]
    Channel(#[from] ChannelError),

    /// Host-side failures (task panics, cancelled joins).
    #[error("[infrastructure] {0}")]
    Infrastructure(#[from] anyhow::Error),
}

impl From<RowError> for PipelineError {
    fn from(err: RowError) -> Self {
        Self::Row(Box::new(err))
    }
}

impl PipelineError {
    /// Configuration error.
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Header error carrying a snapshot of the header it was raised against.
    #[must_use]
    pub fn header(
        code: impl Into<String>,
        message: impl Into<String>,
        header: &[ColumnHeader],
    ) -> Self {
        Self::Header {
            code: code.into(),
            message: message.into(),
            header: header.to_vec(),
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config { .. } => ErrorCategory::Config,
            Self::Header { .. } => ErrorCategory::Header,
            Self::Row(_) => ErrorCategory::Row,
            Self::Channel(_) => ErrorCategory::Channel,
            Self::Infrastructure(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Config { code, .. } | Self::Header { code, .. } => code,
            Self::Row(err) => &err.code,
            Self::Channel(ChannelError::Closed) => "CHANNEL_CLOSED",
            Self::Channel(ChannelError::FlushTimeout(_)) => "FLUSH_TIMEOUT",
            Self::Infrastructure(_) => "INFRASTRUCTURE",
        }
    }

    /// Human-readable message without the category/code prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Config { message, .. } | Self::Header { message, .. } => message.clone(),
            Self::Row(err) => err.message.clone(),
            Self::Channel(err) => err.to_string(),
            Self::Infrastructure(err) => err.to_string(),
        }
    }

    /// Whether an error-reroute wrapper may recover from this error.
    ///
    /// Configuration errors are raised before any row is seen and stay fatal.
    #[must_use]
    pub fn is_reroutable(&self) -> bool {
        !matches!(self, Self::Config { .. })
    }

    /// Returns the row error if this is a `Row` variant.
    #[must_use]
    pub fn as_row_error(&self) -> Option<&RowError> {
        match self {
            Self::Row(err) => Some(err),
            _ => None,
        }
    }
}

/// Caught error exposed to a recovery pipeline as a single cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Error class, e.g. `RowError`.
    pub name: String,
    pub code: String,
    pub message: String,
}

impl ErrorRecord {
    #[must_use]
    pub fn from_error(err: &PipelineError) -> Self {
        let name = match err.category() {
            ErrorCategory::Config => "ConfigError",
            ErrorCategory::Header => "HeaderError",
            ErrorCategory::Row => "RowError",
            ErrorCategory::Channel => "ChannelError",
            ErrorCategory::Infrastructure => "InfrastructureError",
        };
        Self {
            name: name.to_string(),
            code: err.code().to_string(),
            message: err.message(),
        }
    }

    /// Render as a [`Value::Map`] cell with `name`, `code`, and `message` keys.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::from(self.name.as_str()));
        map.insert("code".to_string(), Value::from(self.code.as_str()));
        map.insert("message".to_string(), Value::from(self.message.as_str()));
        Value::Map(map)
    }
}
