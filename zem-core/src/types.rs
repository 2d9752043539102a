//! Domain types shared by the tracker, the daemon and the CLI.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of an open edit session. Assigned in open order, never reused
/// within one daemon lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for SessionId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// A WebDAV opaque lock token, always stored with its `opaquelocktoken:` scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

const LOCK_TOKEN_SCHEME: &str = "opaquelocktoken:";

impl LockToken {
    /// Normalise a raw token as found in a `.zem` header or a `Lock-Token`
    /// response header. Surrounding angle brackets and whitespace are dropped
    /// and the scheme is added when missing.
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim().trim_start_matches('<').trim_end_matches('>').trim();
        if trimmed.starts_with(LOCK_TOKEN_SCHEME) {
            Self(trimmed.to_owned())
        } else {
            Self(format!("{LOCK_TOKEN_SCHEME}{trimmed}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for a `Lock-Token:` request header.
    pub fn lock_token_header(&self) -> String {
        format!("<{}>", self.0)
    }

    /// Value for an `If:` request header.
    pub fn if_header(&self) -> String {
        format!("(<{}>)", self.0)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Helper applications
// ---------------------------------------------------------------------------

/// Editor and file extension registered for a document type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HelperApp {
    #[serde(default)]
    pub editor: String,
    #[serde(default)]
    pub extension: String,
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Where an edit session is in its poll/push cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Locked and fetched; no local change seen yet.
    #[default]
    Opened,
    /// A local change was seen but has not been pushed successfully.
    Modified,
    /// The last observed local change was pushed.
    Synchronized,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Opened => write!(f, "opened"),
            SessionState::Modified => write!(f, "modified"),
            SessionState::Synchronized => write!(f, "synchronized"),
        }
    }
}

/// Read-only projection of an edit session for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_type: Option<String>,
    pub content_file: PathBuf,
    pub state: SessionState,
    pub locked: bool,
    #[serde(default)]
    pub borrowed_lock: bool,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
