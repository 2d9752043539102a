//! Error types for zem-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from preference store operations.
#[derive(Debug, Error)]
pub enum PrefsError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse preferences at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.zem/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// `set` was called with a key that is not a preference.
    #[error("unknown preference '{0}'")]
    UnknownKey(String),

    /// `set` was called with a value that does not parse for the key's type.
    #[error("invalid value '{value}' for '{key}': expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

/// Errors raised while reading a `.zem` metadata file.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The header block ended without a `url:` line.
    #[error("metadata has no 'url' header")]
    MissingUrl,

    /// A header line had no `:` separator.
    #[error("malformed metadata header on line {line}: {text:?}")]
    MalformedHeader { line: usize, text: String },
}
