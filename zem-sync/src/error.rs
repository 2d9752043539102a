//! Error types for zem-sync.

use std::path::PathBuf;

use thiserror::Error;

use zem_core::{MetadataError, PrefsError, SessionId};

use crate::prompt::Confirmation;

/// Failures talking to the remote store.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The server answered 423: someone else holds the lock.
    #[error("{url} is locked by another session")]
    Locked { url: String },

    /// Any other non-success HTTP status.
    #[error("{method} {url} failed with HTTP {status}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
    },

    /// Connection, DNS or TLS failure before a status was received.
    #[error("{method} {url} failed: {message}")]
    Transport {
        method: &'static str,
        url: String,
        message: String,
    },

    /// The LOCK response carried no lock token.
    #[error("LOCK {url} succeeded but returned no lock token")]
    MissingLockToken { url: String },

    /// The document URL could not be parsed.
    #[error("invalid document URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Local I/O while reading or writing the mirror.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// All errors that can arise from edit-session operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("preferences error: {0}")]
    Prefs(#[from] PrefsError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no open edit session with id {0}")]
    UnknownSession(SessionId),

    /// Another live session already edits through this mirror file.
    #[error("{url} would share local mirror {} with session {owner}", .path.display())]
    MirrorInUse {
        url: String,
        path: PathBuf,
        owner: SessionId,
    },

    /// The operation needs an answer from the user that was not supplied.
    #[error("confirmation required: {}", .0.message())]
    ConfirmationRequired(Confirmation),

    /// The user answered "no".
    #[error("cancelled: {}", .0.message())]
    Declined(Confirmation),

    #[error("could not launch editor '{editor}': {source}")]
    Launch {
        editor: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`RemoteError::Io`].
pub(crate) fn remote_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RemoteError {
    RemoteError::Io {
        path: path.into(),
        source,
    }
}
