//! Zem core library: domain types, `.zem` metadata, preference store, errors.
//!
//! - [`types`]: newtypes and session views shared with the daemon and CLI
//! - [`metadata`]: `.zem` file parsing
//! - [`prefs`]: load / save / upgrade / reset of `~/.zem/preferences.yaml`
//! - [`error`]: [`PrefsError`], [`MetadataError`]

pub mod error;
pub mod metadata;
pub mod prefs;
pub mod types;

pub use error::{MetadataError, PrefsError};
pub use metadata::{Metadata, ZemFile};
pub use prefs::{Preferences, VersionStatus};
pub use types::{HelperApp, LockToken, SessionId, SessionState, SessionView};
