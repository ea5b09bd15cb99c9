//! Error types for the persondir core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! "Not found" is never an error anywhere in this crate: sources report it as
//! `Ok(None)` (could not evaluate) or an empty set (evaluated, no matches).

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    DirectoryFile(#[from] DirectoryFileError),
}

// ---------------------------------------------------------------------------
// Resolution errors
// ---------------------------------------------------------------------------

/// Errors raised while resolving person attributes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Required configuration (child sources, patterns, ...) is missing.
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// A caller supplied an unusable argument.
    #[error("invalid argument '{argument}': {detail}")]
    InvalidArgument {
        argument: String,
        detail: String,
    },

    /// An attribute-name mapping is malformed.
    #[error("invalid attribute mapping: {0}")]
    InvalidMapping(String),

    /// A single-identity lookup matched several identities.
    #[error("expected at most one person but the query matched {count}")]
    AmbiguousResult {
        count: usize,
    },

    /// A backing source failed while evaluating a query.
    #[error("source '{source_id}' failed: {detail}")]
    Source {
        source_id: String,
        detail: String,
    },
}

impl ResolveError {
    /// Build a [`ResolveError::Source`] for the given source id.
    pub fn source_failure(source_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Source {
            source_id: source_id.into(),
            detail: detail.into(),
        }
    }

    /// Build a [`ResolveError::InvalidArgument`].
    pub fn invalid_argument(argument: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument: argument.into(),
            detail: detail.into(),
        }
    }

    /// Whether an aggregating resolver may swallow this error when
    /// `recover_exceptions` is enabled. Only child runtime failures qualify.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Source { .. })
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from resolver configuration loading, validation and assembly.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// A mapping or pattern was rejected while assembling a source.
    #[error("configuration rejected for source '{source_id}': {error}")]
    Assembly {
        source_id: String,
        error: ResolveError,
    },

    /// A directory file referenced by a source could not be loaded.
    #[error("configuration directory file error: {0}")]
    DirectoryFile(#[from] DirectoryFileError),

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Directory file errors
// ---------------------------------------------------------------------------

/// Errors from reading or writing TOML directory files.
#[derive(Debug, Error)]
pub enum DirectoryFileError {
    /// The directory file does not exist.
    #[error("directory file not found: {0}")]
    NotFound(String),

    /// TOML parse or serialization error.
    #[error("directory file parse error: {0}")]
    ParseError(String),

    /// An entry is structurally unusable (e.g. empty username).
    #[error("invalid directory entry '{uid}': {detail}")]
    InvalidEntry {
        uid: String,
        detail: String,
    },

    /// Generic I/O error.
    #[error("directory file I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
