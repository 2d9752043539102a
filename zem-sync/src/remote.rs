//! The remote-document collaborator the tracker drives.

use std::path::{Path, PathBuf};

use zem_core::{LockToken, Metadata};

use crate::error::RemoteError;

/// One remote document that can be checked out for local editing.
///
/// Implementations own the network protocol and the on-disk mirror format;
/// the tracker only sequences these calls.
pub trait RemoteDocument: Send {
    /// Remote identity of the document.
    fn url(&self) -> &str;

    fn metadata(&self) -> &Metadata;

    /// Local mirror path. Valid before `fetch_content` is called.
    fn content_file(&self) -> &Path;

    /// Materialise the current remote content at [`content_file`](Self::content_file).
    fn fetch_content(&mut self) -> Result<PathBuf, RemoteError>;

    /// Take a new exclusive write lock.
    fn lock(&mut self) -> Result<LockToken, RemoteError>;

    /// Release the held lock, if any.
    fn unlock(&mut self) -> Result<(), RemoteError>;

    /// Push the mirror's content to the remote store.
    fn put_changes(&mut self) -> Result<(), RemoteError>;

    fn lock_token(&self) -> Option<&LockToken>;

    /// Adopt a lock this user already holds in another session.
    fn borrow_lock(&mut self, token: LockToken);
}
