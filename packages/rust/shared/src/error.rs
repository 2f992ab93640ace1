//! Error types for Turn/IP.
//!
//! Library crates use [`TurnipError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::fmt;
use std::path::PathBuf;

/// Top-level error type for all Turn/IP operations.
#[derive(Debug, thiserror::Error)]
pub enum TurnipError {
    /// A stored record could not be normalized.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// A cross-record conflict that would corrupt navigation.
    #[error("assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Record store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A store query or publish stage exceeded its deadline.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Data validation error outside of record normalization.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TurnipError>;

/// Coarse error taxonomy, used for exit codes and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Schema,
    Assembly,
    Io,
    Config,
}

impl TurnipError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap any displayable store error.
    pub fn storage(err: impl fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Schema(_) => ErrorCategory::Schema,
            Self::Assembly(_) => ErrorCategory::Assembly,
            Self::Io { .. } | Self::Storage(_) | Self::Timeout { .. } => ErrorCategory::Io,
            Self::Config { .. } | Self::Validation { .. } => ErrorCategory::Config,
        }
    }
}

// ---------------------------------------------------------------------------
// SchemaError
// ---------------------------------------------------------------------------

/// What was wrong with a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// The stored document is not a key/value mapping.
    NotAnObject,
    /// `name` is missing, null, or empty.
    MissingName,
    /// Another record already uses this exact name.
    DuplicateName,
    /// A field holds a value of the wrong shape.
    InvalidField,
    /// A link field holds something that is not a label + URL pair.
    InvalidLink,
}

impl fmt::Display for SchemaErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotAnObject => "record is not an object",
            Self::MissingName => "missing mandatory field",
            Self::DuplicateName => "duplicate protocol name",
            Self::InvalidField => "invalid field value",
            Self::InvalidLink => "invalid link value",
        };
        f.write_str(s)
    }
}

/// A per-record normalization failure, with enough context to report it
/// alongside others.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "{kind}{} in record {record_id}{}{}",
    quoted_field(.field),
    parenthesized(.record_name),
    detail_suffix(.detail)
)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    /// Store identifier of the offending record.
    pub record_id: String,
    /// Record name, when it could be read.
    pub record_name: Option<String>,
    /// Offending field, when the error is tied to one.
    pub field: Option<String>,
    /// Free-form detail.
    pub detail: Option<String>,
}

impl SchemaError {
    pub fn new(kind: SchemaErrorKind, record_id: impl Into<String>) -> Self {
        Self {
            kind,
            record_id: record_id.into(),
            record_name: None,
            field: None,
            detail: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.record_name = Some(name.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

fn quoted_field(field: &Option<String>) -> String {
    field.as_ref().map(|f| format!(" '{f}'")).unwrap_or_default()
}

fn parenthesized(name: &Option<String>) -> String {
    name.as_ref().map(|n| format!(" ({n})")).unwrap_or_default()
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// AssemblyError
// ---------------------------------------------------------------------------

/// Cross-record conflicts detected while assembling the catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    /// Two distinct names produce the same heading anchor.
    #[error("protocols '{first}' and '{second}' share the anchor '#{anchor}'")]
    AnchorCollision {
        anchor: String,
        first: String,
        second: String,
    },

    /// A name slugifies to nothing and cannot be linked to.
    #[error("protocol '{name}' produces an empty anchor")]
    EmptyAnchor { name: String },

    /// A protocol anchor clashes with a section heading of the index.
    #[error("protocol '{name}' uses the reserved anchor '#{anchor}'")]
    ReservedAnchor { anchor: String, name: String },
}
