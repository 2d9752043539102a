//! Edit-session tracker.
//!
//! Owns every open [`EditSession`] and implements the poll contract:
//! stat the mirror, compare with the stored baseline, push if it moved.
//!
//! The tracker has no timer and no locking of its own. The host calls
//! [`EditSessionTracker::poll_tick`] on its schedule and serialises it with
//! [`open`](EditSessionTracker::open) and [`finish`](EditSessionTracker::finish);
//! correctness against concurrent remote writers is left to the remote
//! store's own locking.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use zem_core::{LockToken, Metadata, Preferences, SessionId, SessionState, SessionView};

use crate::error::{io_err, SyncError};
use crate::prompt::{Confirmation, Prompter};
use crate::remote::RemoteDocument;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// The preference flags the tracker acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerPolicy {
    pub use_locks: bool,
    pub always_borrow_locks: bool,
    pub confirm_on_finish: bool,
    pub cleanup_files: bool,
}

impl Default for TrackerPolicy {
    fn default() -> Self {
        Self::from(&Preferences::default())
    }
}

impl From<&Preferences> for TrackerPolicy {
    fn from(prefs: &Preferences) -> Self {
        Self {
            use_locks: prefs.use_locks,
            always_borrow_locks: prefs.use_locks && prefs.always_borrow_locks,
            confirm_on_finish: prefs.confirm_on_finish,
            cleanup_files: prefs.cleanup_files,
        }
    }
}

// ---------------------------------------------------------------------------
// EditSession
// ---------------------------------------------------------------------------

/// One remote document checked out for local editing.
pub struct EditSession {
    id: SessionId,
    document: Box<dyn RemoteDocument>,
    content_file: PathBuf,
    last_mtime: SystemTime,
    state: SessionState,
    borrowed_lock: bool,
    opened_at: DateTime<Utc>,
    last_synced_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl std::fmt::Debug for EditSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditSession")
            .field("id", &self.id)
            .field("url", &self.document.url())
            .field("content_file", &self.content_file)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl EditSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn url(&self) -> &str {
        self.document.url()
    }

    pub fn metadata(&self) -> &Metadata {
        self.document.metadata()
    }

    pub fn content_file(&self) -> &Path {
        &self.content_file
    }

    /// Modification time of the mirror as of the last open or push.
    pub fn last_mtime(&self) -> SystemTime {
        self.last_mtime
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn lock_token(&self) -> Option<&LockToken> {
        self.document.lock_token()
    }

    pub fn borrowed_lock(&self) -> bool {
        self.borrowed_lock
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn view(&self) -> SessionView {
        let md = self.document.metadata();
        SessionView {
            id: self.id,
            url: self.document.url().to_owned(),
            title: md.title.clone(),
            meta_type: md.meta_type.clone(),
            content_file: self.content_file.clone(),
            state: self.state,
            locked: self.document.lock_token().is_some(),
            borrowed_lock: self.borrowed_lock,
            opened_at: self.opened_at,
            last_synced_at: self.last_synced_at,
            last_error: self.last_error.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Result of [`EditSessionTracker::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new session was registered.
    Opened(SessionId),
    /// The URL was already open; the existing session is reused.
    Existing(SessionId),
}

impl OpenOutcome {
    pub fn id(&self) -> SessionId {
        match self {
            OpenOutcome::Opened(id) | OpenOutcome::Existing(id) => *id,
        }
    }
}

/// Result of one [`EditSessionTracker::poll_tick`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub pushed: Vec<SessionId>,
    pub unchanged: usize,
    pub failed: Vec<(SessionId, String)>,
}

/// What happened to one session during [`EditSessionTracker::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedSession {
    pub id: SessionId,
    pub url: String,
    pub pushed_final_changes: bool,
    pub lock_released: bool,
    pub mirror_removed: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishReport {
    pub finished: Vec<FinishedSession>,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Owner of the open edit sessions.
#[derive(Debug)]
pub struct EditSessionTracker {
    sessions: Vec<EditSession>,
    next_id: u64,
    policy: TrackerPolicy,
}

impl Default for EditSessionTracker {
    fn default() -> Self {
        Self::new(TrackerPolicy::default())
    }
}

impl EditSessionTracker {
    pub fn new(policy: TrackerPolicy) -> Self {
        Self {
            sessions: Vec::new(),
            next_id: 1,
            policy,
        }
    }

    pub fn policy(&self) -> TrackerPolicy {
        self.policy
    }

    /// Replace the policy, e.g. after preferences were edited. Open sessions
    /// keep their locks.
    pub fn set_policy(&mut self, policy: TrackerPolicy) {
        self.policy = policy;
    }

    /// Open sessions in insertion order.
    pub fn sessions(&self) -> std::slice::Iter<'_, EditSession> {
        self.sessions.iter()
    }

    /// Presentation projection of [`sessions`](Self::sessions).
    pub fn views(&self) -> Vec<SessionView> {
        self.sessions.iter().map(EditSession::view).collect()
    }

    pub fn get(&self, id: SessionId) -> Option<&EditSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Check out `document` for editing.
    ///
    /// Lock negotiation happens first (when locks are in use), then the
    /// content is fetched and the mirror's mtime recorded as the baseline.
    pub fn open(
        &mut self,
        mut document: Box<dyn RemoteDocument>,
        prompter: &dyn Prompter,
    ) -> Result<OpenOutcome, SyncError> {
        if let Some(existing) = self.sessions.iter().find(|s| s.url() == document.url()) {
            tracing::info!(
                session = %existing.id,
                url = %existing.url(),
                "document already open, reusing session",
            );
            return Ok(OpenOutcome::Existing(existing.id));
        }
        if let Some(owner) = self
            .sessions
            .iter()
            .find(|s| s.content_file() == document.content_file())
        {
            return Err(SyncError::MirrorInUse {
                url: document.url().to_owned(),
                path: document.content_file().to_path_buf(),
                owner: owner.id,
            });
        }

        let mut borrowed_lock = false;
        let mut fresh_lock = false;
        if self.policy.use_locks {
            if let Some(held) = document.metadata().lock_token.clone() {
                let question = Confirmation::BorrowLock {
                    url: document.url().to_owned(),
                };
                let borrow = self.policy.always_borrow_locks
                    || document.metadata().borrow_lock
                    || match prompter.confirm_borrow(document.url()) {
                        Some(answer) => answer,
                        None => return Err(SyncError::ConfirmationRequired(question)),
                    };
                if !borrow {
                    tracing::info!(url = %document.url(), "lock borrow declined, open aborted");
                    return Err(SyncError::Declined(question));
                }
                document.borrow_lock(LockToken::new(&held));
                borrowed_lock = true;
            } else {
                document.lock()?;
                fresh_lock = true;
            }
        }

        let fetched = document
            .fetch_content()
            .map_err(SyncError::from)
            .and_then(|path| modified_time(&path).map(|mtime| (path, mtime)));
        let (content_file, last_mtime) = match fetched {
            Ok(found) => found,
            Err(err) => {
                if fresh_lock {
                    if let Err(unlock_err) = document.unlock() {
                        tracing::warn!(
                            url = %document.url(),
                            error = %unlock_err,
                            "failed to release lock after aborted open",
                        );
                    }
                }
                return Err(err);
            }
        };

        let id = SessionId(self.next_id);
        self.next_id += 1;
        tracing::info!(
            session = %id,
            url = %document.url(),
            mirror = %content_file.display(),
            borrowed_lock,
            "opened edit session",
        );
        self.sessions.push(EditSession {
            id,
            document,
            content_file,
            last_mtime,
            state: SessionState::Opened,
            borrowed_lock,
            opened_at: Utc::now(),
            last_synced_at: None,
            last_error: None,
        });
        Ok(OpenOutcome::Opened(id))
    }

    /// One poll pass over every session, in insertion order.
    ///
    /// A failed push leaves the baseline untouched so the change is retried
    /// on the next tick.
    pub fn poll_tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        for session in &mut self.sessions {
            match sync_if_modified(session) {
                Ok(true) => report.pushed.push(session.id),
                Ok(false) => report.unchanged += 1,
                Err(err) => {
                    tracing::error!(
                        session = %session.id,
                        url = %session.url(),
                        error = %err,
                        "write-back failed",
                    );
                    let message = err.to_string();
                    session.last_error = Some(message.clone());
                    report.failed.push((session.id, message));
                }
            }
        }
        if !report.pushed.is_empty() || !report.failed.is_empty() {
            tracing::info!(
                pushed = report.pushed.len(),
                unchanged = report.unchanged,
                failed = report.failed.len(),
                "poll tick complete",
            );
        }
        report
    }

    /// Finish the selected sessions: push any last change, release the lock,
    /// discard the mirror (when `cleanup_files` is set) and forget them.
    ///
    /// All ids are validated before anything is touched. With
    /// `confirm_on_finish` set the prompter is asked once for the whole
    /// selection.
    pub fn finish(
        &mut self,
        ids: &[SessionId],
        prompter: &dyn Prompter,
    ) -> Result<FinishReport, SyncError> {
        let mut indices = Vec::with_capacity(ids.len());
        for id in ids {
            let index = self
                .sessions
                .iter()
                .position(|s| s.id == *id)
                .ok_or(SyncError::UnknownSession(*id))?;
            if !indices.contains(&index) {
                indices.push(index);
            }
        }
        if indices.is_empty() {
            return Ok(FinishReport::default());
        }

        if self.policy.confirm_on_finish {
            let question = Confirmation::Finish {
                count: indices.len(),
            };
            match prompter.confirm_finish(indices.len()) {
                Some(true) => {}
                Some(false) => return Err(SyncError::Declined(question)),
                None => return Err(SyncError::ConfirmationRequired(question)),
            }
        }

        indices.sort_unstable();
        let mut removed = Vec::with_capacity(indices.len());
        for index in indices.into_iter().rev() {
            removed.push(self.sessions.remove(index));
        }
        removed.reverse();

        let finished = removed
            .into_iter()
            .map(|session| retire(session, self.policy))
            .collect();
        Ok(FinishReport { finished })
    }

    /// Drop every session without touching locks or mirrors. Used at shutdown.
    pub fn abandon_all(&mut self) -> usize {
        let count = self.sessions.len();
        if count > 0 {
            tracing::warn!(sessions = count, "abandoning open edit sessions");
        }
        self.sessions.clear();
        count
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn modified_time(path: &Path) -> Result<SystemTime, SyncError> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| io_err(path, e))
}

/// Stat-and-compare, then push-if-changed. Returns whether a push happened.
fn sync_if_modified(session: &mut EditSession) -> Result<bool, SyncError> {
    let mtime = modified_time(&session.content_file)?;
    if mtime == session.last_mtime {
        return Ok(false);
    }

    session.state = SessionState::Modified;
    tracing::info!(session = %session.id, url = %session.url(), "local change detected, pushing");
    session.document.put_changes()?;

    session.last_mtime = mtime;
    session.state = SessionState::Synchronized;
    session.last_synced_at = Some(Utc::now());
    session.last_error = None;
    Ok(true)
}

fn retire(mut session: EditSession, policy: TrackerPolicy) -> FinishedSession {
    let mut errors = Vec::new();

    let (pushed_final_changes, push_failed) = match sync_if_modified(&mut session) {
        Ok(pushed) => (pushed, false),
        Err(err) => {
            errors.push(format!("final push failed: {err}"));
            (false, true)
        }
    };

    let lock_released = if session.document.lock_token().is_some() {
        match session.document.unlock() {
            Ok(()) => true,
            Err(err) => {
                errors.push(format!("unlock failed: {err}"));
                false
            }
        }
    } else {
        false
    };

    // Unpushed edits stay on disk.
    let mirror_removed = if policy.cleanup_files && !push_failed {
        match std::fs::remove_file(&session.content_file) {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => {
                errors.push(format!(
                    "could not remove {}: {err}",
                    session.content_file.display()
                ));
                false
            }
        }
    } else {
        false
    };

    if errors.is_empty() {
        tracing::info!(session = %session.id, url = %session.url(), "finished edit session");
    } else {
        tracing::warn!(
            session = %session.id,
            url = %session.url(),
            errors = ?errors,
            "finished edit session with errors",
        );
    }

    FinishedSession {
        id: session.id,
        url: session.url().to_owned(),
        pushed_final_changes,
        lock_released,
        mirror_removed,
        errors,
    }
}
