//! # zem-sync
//!
//! Edit-session tracking and write-back.
//!
//! [`EditSessionTracker`] owns the open sessions and implements the poll
//! contract; [`WebDavDocument`] is the [`RemoteDocument`] it normally drives.
//! Confirmations go through a [`Prompter`], editors are started through an
//! [`EditorLauncher`].

pub mod error;
pub mod launcher;
pub mod prompt;
pub mod remote;
pub mod tracker;
pub mod webdav;

pub use error::{RemoteError, SyncError};
pub use launcher::{resolve_editor, EditorCommand, EditorLauncher, ProcessLauncher};
pub use prompt::{Confirmation, ConfirmationKind, Decisions, Prompter};
pub use remote::RemoteDocument;
pub use tracker::{
    EditSession, EditSessionTracker, FinishReport, FinishedSession, OpenOutcome, TickReport,
    TrackerPolicy,
};
pub use webdav::WebDavDocument;
