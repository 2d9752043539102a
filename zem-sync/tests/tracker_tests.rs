//! Poll contract, lock negotiation and finish behaviour of the edit-session
//! tracker, driven by hand instead of a timer.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::{set_file_mtime, FileTime};
use tempfile::TempDir;

use zem_core::{LockToken, Metadata, SessionId, SessionState};
use zem_sync::{
    Decisions, EditSessionTracker, OpenOutcome, Prompter, RemoteDocument, RemoteError,
    SyncError, TrackerPolicy,
};

const T0: i64 = 1_700_000_000;
const T1: i64 = T0 + 60;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Calls {
    fetches: usize,
    locks: usize,
    unlocks: usize,
    puts: usize,
    fail_put: bool,
    fail_fetch: bool,
}

type Shared = Arc<Mutex<Calls>>;

struct FakeDocument {
    metadata: Metadata,
    content_file: PathBuf,
    token: Option<LockToken>,
    calls: Shared,
}

impl FakeDocument {
    fn new(dir: &Path, name: &str) -> (Self, Shared) {
        let calls = Shared::default();
        let doc = Self {
            metadata: Metadata {
                url: format!("http://cms.example.com/{name}"),
                ..Metadata::default()
            },
            content_file: dir.join(format!("{name}.txt")),
            token: None,
            calls: calls.clone(),
        };
        (doc, calls)
    }

    fn with_held_lock(mut self, token: &str, borrow_hint: bool) -> Self {
        self.metadata.lock_token = Some(token.to_string());
        self.metadata.borrow_lock = borrow_hint;
        self
    }
}

impl RemoteDocument for FakeDocument {
    fn url(&self) -> &str {
        &self.metadata.url
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn content_file(&self) -> &Path {
        &self.content_file
    }

    fn fetch_content(&mut self) -> Result<PathBuf, RemoteError> {
        let mut calls = self.calls.lock().unwrap();
        calls.fetches += 1;
        if calls.fail_fetch {
            return Err(RemoteError::Status {
                method: "GET",
                url: self.metadata.url.clone(),
                status: 500,
            });
        }
        std::fs::write(&self.content_file, b"original").unwrap();
        set_file_mtime(&self.content_file, FileTime::from_unix_time(T0, 0)).unwrap();
        Ok(self.content_file.clone())
    }

    fn lock(&mut self) -> Result<LockToken, RemoteError> {
        self.calls.lock().unwrap().locks += 1;
        let token = LockToken::new("fresh");
        self.token = Some(token.clone());
        Ok(token)
    }

    fn unlock(&mut self) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().unlocks += 1;
        self.token = None;
        Ok(())
    }

    fn put_changes(&mut self) -> Result<(), RemoteError> {
        let mut calls = self.calls.lock().unwrap();
        if calls.fail_put {
            return Err(RemoteError::Transport {
                method: "PUT",
                url: self.metadata.url.clone(),
                message: "connection refused".into(),
            });
        }
        calls.puts += 1;
        Ok(())
    }

    fn lock_token(&self) -> Option<&LockToken> {
        self.token.as_ref()
    }

    fn borrow_lock(&mut self, token: LockToken) {
        self.token = Some(token);
    }
}

/// Prompter that records how often it was asked.
#[derive(Default)]
struct CountingPrompter {
    answer: Option<bool>,
    borrow_asked: Cell<usize>,
    finish_asked: Cell<usize>,
}

impl CountingPrompter {
    fn answering(answer: Option<bool>) -> Self {
        Self {
            answer,
            ..Self::default()
        }
    }
}

impl Prompter for CountingPrompter {
    fn confirm_borrow(&self, _url: &str) -> Option<bool> {
        self.borrow_asked.set(self.borrow_asked.get() + 1);
        self.answer
    }

    fn confirm_finish(&self, _count: usize) -> Option<bool> {
        self.finish_asked.set(self.finish_asked.get() + 1);
        self.answer
    }
}

fn policy() -> TrackerPolicy {
    TrackerPolicy {
        use_locks: true,
        always_borrow_locks: false,
        confirm_on_finish: false,
        cleanup_files: true,
    }
}

fn at(unix: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(unix as u64)
}

fn edit(path: &Path, content: &str, unix: i64) {
    std::fs::write(path, content).unwrap();
    set_file_mtime(path, FileTime::from_unix_time(unix, 0)).unwrap();
}

fn open(tracker: &mut EditSessionTracker, doc: FakeDocument) -> SessionId {
    match tracker
        .open(Box::new(doc), &Decisions::default())
        .expect("open")
    {
        OpenOutcome::Opened(id) => id,
        other => panic!("expected a new session, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 1. Open
// ---------------------------------------------------------------------------

#[test]
fn open_records_mirror_mtime_as_baseline() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(policy());
    let (doc, calls) = FakeDocument::new(dir.path(), "index_html");

    let id = open(&mut tracker, doc);

    assert_eq!(tracker.len(), 1);
    let session = tracker.get(id).expect("session");
    assert_eq!(session.last_mtime(), at(T0));
    assert_eq!(session.state(), SessionState::Opened);
    assert_eq!(session.lock_token().map(LockToken::as_str), Some("opaquelocktoken:fresh"));
    let calls = calls.lock().unwrap();
    assert_eq!((calls.locks, calls.fetches), (1, 1));
}

#[test]
fn open_without_locks_never_locks() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(TrackerPolicy {
        use_locks: false,
        ..policy()
    });
    let (doc, calls) = FakeDocument::new(dir.path(), "doc");
    let id = open(&mut tracker, doc.with_held_lock("abc", false));

    assert!(tracker.get(id).unwrap().lock_token().is_none());
    assert_eq!(calls.lock().unwrap().locks, 0);
}

#[test]
fn duplicate_open_reuses_existing_session() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(policy());
    let (first, _) = FakeDocument::new(dir.path(), "doc");
    let (second, second_calls) = FakeDocument::new(dir.path(), "doc");

    let id = open(&mut tracker, first);
    let outcome = tracker
        .open(Box::new(second), &Decisions::default())
        .expect("second open");

    assert_eq!(outcome, OpenOutcome::Existing(id));
    assert_eq!(tracker.len(), 1);
    assert_eq!(second_calls.lock().unwrap().fetches, 0);
}

#[test]
fn open_refuses_a_mirror_owned_by_another_session() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(policy());
    let (first, _) = FakeDocument::new(dir.path(), "doc");
    let (mut second, second_calls) = FakeDocument::new(dir.path(), "doc");
    second.metadata.url = "http://cms.example.com/other".into();

    let id = open(&mut tracker, first);
    let mirror = tracker.get(id).unwrap().content_file().to_path_buf();
    edit(&mirror, "first session edits", T1);

    let err = tracker
        .open(Box::new(second), &Decisions::default())
        .unwrap_err();

    assert!(matches!(err, SyncError::MirrorInUse { owner, .. } if owner == id), "got {err}");
    assert_eq!(tracker.len(), 1);
    let calls = second_calls.lock().unwrap();
    assert_eq!((calls.locks, calls.fetches), (0, 0));
    assert_eq!(std::fs::read_to_string(&mirror).unwrap(), "first session edits");
}

#[test]
fn failed_fetch_releases_fresh_lock() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(policy());
    let (doc, calls) = FakeDocument::new(dir.path(), "doc");
    calls.lock().unwrap().fail_fetch = true;

    let err = tracker
        .open(Box::new(doc), &Decisions::default())
        .unwrap_err();

    assert!(matches!(err, SyncError::Remote(RemoteError::Status { status: 500, .. })));
    assert!(tracker.is_empty());
    let calls = calls.lock().unwrap();
    assert_eq!((calls.locks, calls.unlocks), (1, 1));
}

// ---------------------------------------------------------------------------
// 2. Lock borrowing
// ---------------------------------------------------------------------------

#[test]
fn held_lock_needs_an_answer() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(policy());
    let (doc, calls) = FakeDocument::new(dir.path(), "doc");
    let prompter = CountingPrompter::answering(None);

    let err = tracker
        .open(Box::new(doc.with_held_lock("abc", false)), &prompter)
        .unwrap_err();

    assert!(matches!(err, SyncError::ConfirmationRequired(_)), "got {err}");
    assert_eq!(prompter.borrow_asked.get(), 1);
    assert!(tracker.is_empty());
    assert_eq!(calls.lock().unwrap().fetches, 0);
}

#[test]
fn declined_borrow_aborts_open() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(policy());
    let (doc, calls) = FakeDocument::new(dir.path(), "doc");

    let err = tracker
        .open(
            Box::new(doc.with_held_lock("abc", false)),
            &CountingPrompter::answering(Some(false)),
        )
        .unwrap_err();

    assert!(matches!(err, SyncError::Declined(_)));
    assert!(tracker.is_empty());
    assert_eq!(calls.lock().unwrap().locks, 0);
}

#[test]
fn accepted_borrow_adopts_existing_token() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(policy());
    let (doc, calls) = FakeDocument::new(dir.path(), "doc");

    let id = tracker
        .open(
            Box::new(doc.with_held_lock("abc", false)),
            &CountingPrompter::answering(Some(true)),
        )
        .expect("open")
        .id();

    let session = tracker.get(id).unwrap();
    assert!(session.borrowed_lock());
    assert_eq!(session.lock_token().map(LockToken::as_str), Some("opaquelocktoken:abc"));
    assert_eq!(calls.lock().unwrap().locks, 0, "borrowing takes no new lock");
}

#[test]
fn borrow_hint_and_always_borrow_skip_the_prompt() {
    let dir = TempDir::new().unwrap();

    let mut tracker = EditSessionTracker::new(policy());
    let prompter = CountingPrompter::answering(None);
    let (hinted, _) = FakeDocument::new(dir.path(), "hinted");
    tracker
        .open(Box::new(hinted.with_held_lock("abc", true)), &prompter)
        .expect("hinted open");

    let mut tracker = EditSessionTracker::new(TrackerPolicy {
        always_borrow_locks: true,
        ..policy()
    });
    let (always, _) = FakeDocument::new(dir.path(), "always");
    tracker
        .open(Box::new(always.with_held_lock("def", false)), &prompter)
        .expect("always-borrow open");

    assert_eq!(prompter.borrow_asked.get(), 0);
}

// ---------------------------------------------------------------------------
// 3. Poll tick
// ---------------------------------------------------------------------------

#[test]
fn unchanged_mtime_never_pushes() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(policy());
    let (doc, calls) = FakeDocument::new(dir.path(), "doc");
    let id = open(&mut tracker, doc);
    let baseline = tracker.get(id).unwrap().last_mtime();

    for _ in 0..3 {
        let report = tracker.poll_tick();
        assert!(report.pushed.is_empty());
        assert_eq!(report.unchanged, 1);
    }

    assert_eq!(calls.lock().unwrap().puts, 0);
    assert_eq!(tracker.get(id).unwrap().last_mtime(), baseline);
}

#[test]
fn edit_between_ticks_pushes_exactly_once() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(policy());
    let (doc, calls) = FakeDocument::new(dir.path(), "doc");
    let id = open(&mut tracker, doc);
    let mirror = tracker.get(id).unwrap().content_file().to_path_buf();

    // tick 1: mtime still T0
    assert!(tracker.poll_tick().pushed.is_empty());

    edit(&mirror, "edited", T1);

    // tick 2: exactly one push, baseline moves to T1
    let report = tracker.poll_tick();
    assert_eq!(report.pushed, vec![id]);
    let session = tracker.get(id).unwrap();
    assert_eq!(session.last_mtime(), at(T1));
    assert_eq!(session.state(), SessionState::Synchronized);
    assert!(session.last_synced_at().is_some());

    // tick 3: nothing new
    assert!(tracker.poll_tick().pushed.is_empty());
    assert_eq!(calls.lock().unwrap().puts, 1);
}

#[test]
fn failed_push_keeps_baseline_and_retries_next_tick() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(policy());
    let (doc, calls) = FakeDocument::new(dir.path(), "doc");
    let id = open(&mut tracker, doc);
    let mirror = tracker.get(id).unwrap().content_file().to_path_buf();
    edit(&mirror, "edited", T1);

    calls.lock().unwrap().fail_put = true;
    let report = tracker.poll_tick();
    assert_eq!(report.failed.len(), 1);
    let session = tracker.get(id).unwrap();
    assert_eq!(session.state(), SessionState::Modified);
    assert!(session.last_error().unwrap().contains("connection refused"));
    assert_eq!(session.last_mtime(), at(T0));

    calls.lock().unwrap().fail_put = false;
    let report = tracker.poll_tick();
    assert_eq!(report.pushed, vec![id]);
    assert!(tracker.get(id).unwrap().last_error().is_none());
    assert_eq!(calls.lock().unwrap().puts, 1);
}

#[test]
fn missing_mirror_is_reported_without_stopping_the_pass() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(policy());
    let (gone, _) = FakeDocument::new(dir.path(), "gone");
    let (kept, kept_calls) = FakeDocument::new(dir.path(), "kept");
    let gone_id = open(&mut tracker, gone);
    let kept_id = open(&mut tracker, kept);

    std::fs::remove_file(tracker.get(gone_id).unwrap().content_file()).unwrap();
    let kept_mirror = tracker.get(kept_id).unwrap().content_file().to_path_buf();
    edit(&kept_mirror, "edited", T1);

    let report = tracker.poll_tick();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, gone_id);
    assert_eq!(report.pushed, vec![kept_id]);
    assert_eq!(kept_calls.lock().unwrap().puts, 1);
}

// ---------------------------------------------------------------------------
// 4. Finish and listing
// ---------------------------------------------------------------------------

#[test]
fn sessions_are_listed_in_open_order() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(policy());
    for name in ["b", "a", "c"] {
        let (doc, _) = FakeDocument::new(dir.path(), name);
        open(&mut tracker, doc);
    }
    let urls: Vec<_> = tracker.views().into_iter().map(|v| v.url).collect();
    assert_eq!(
        urls,
        vec![
            "http://cms.example.com/b",
            "http://cms.example.com/a",
            "http://cms.example.com/c"
        ]
    );
}

#[test]
fn finishing_two_sessions_prompts_once_and_removes_both() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(TrackerPolicy {
        confirm_on_finish: true,
        ..policy()
    });
    let (first, first_calls) = FakeDocument::new(dir.path(), "first");
    let (second, second_calls) = FakeDocument::new(dir.path(), "second");
    let (third, _) = FakeDocument::new(dir.path(), "third");
    let a = open(&mut tracker, first);
    let b = open(&mut tracker, second);
    let c = open(&mut tracker, third);
    let mirror_a = tracker.get(a).unwrap().content_file().to_path_buf();

    let prompter = CountingPrompter::answering(Some(true));
    let report = tracker.finish(&[b, a], &prompter).expect("finish");

    assert_eq!(prompter.finish_asked.get(), 1);
    let finished: Vec<_> = report.finished.iter().map(|f| f.id).collect();
    assert_eq!(finished, vec![a, b], "reported in open order");
    assert!(report.finished.iter().all(|f| f.lock_released && f.mirror_removed));
    assert_eq!(first_calls.lock().unwrap().unlocks, 1);
    assert_eq!(second_calls.lock().unwrap().unlocks, 1);
    assert!(!mirror_a.exists());

    let remaining: Vec<_> = tracker.sessions().map(|s| s.id()).collect();
    assert_eq!(remaining, vec![c]);
}

#[test]
fn declined_or_undecided_finish_keeps_sessions() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(TrackerPolicy {
        confirm_on_finish: true,
        ..policy()
    });
    let (doc, calls) = FakeDocument::new(dir.path(), "doc");
    let id = open(&mut tracker, doc);

    let err = tracker
        .finish(&[id], &CountingPrompter::answering(Some(false)))
        .unwrap_err();
    assert!(matches!(err, SyncError::Declined(_)));

    let err = tracker
        .finish(&[id], &CountingPrompter::answering(None))
        .unwrap_err();
    assert!(matches!(err, SyncError::ConfirmationRequired(_)));

    assert_eq!(tracker.len(), 1);
    assert_eq!(calls.lock().unwrap().unlocks, 0);
}

#[test]
fn finish_with_unknown_id_touches_nothing() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(policy());
    let (doc, calls) = FakeDocument::new(dir.path(), "doc");
    let id = open(&mut tracker, doc);

    let err = tracker
        .finish(&[id, SessionId(99)], &Decisions::default())
        .unwrap_err();

    assert!(matches!(err, SyncError::UnknownSession(SessionId(99))));
    assert_eq!(tracker.len(), 1);
    assert_eq!(calls.lock().unwrap().unlocks, 0);
}

#[test]
fn finish_pushes_pending_edit_before_unlocking() {
    let dir = TempDir::new().unwrap();
    let mut tracker = EditSessionTracker::new(policy());
    let (doc, calls) = FakeDocument::new(dir.path(), "doc");
    let id = open(&mut tracker, doc);
    let mirror = tracker.get(id).unwrap().content_file().to_path_buf();
    edit(&mirror, "last words", T1);

    let report = tracker.finish(&[id], &Decisions::default()).expect("finish");

    assert!(report.finished[0].pushed_final_changes);
    assert!(tracker.is_empty());
    assert!(tracker.views().is_empty());
    let calls = calls.lock().unwrap();
    assert_eq!((calls.puts, calls.unlocks), (1, 1));
}

#[test]
fn finish_keeps_mirror_when_push_fails_or_cleanup_is_off() {
    let dir = TempDir::new().unwrap();

    let mut tracker = EditSessionTracker::new(TrackerPolicy {
        cleanup_files: false,
        ..policy()
    });
    let (doc, _) = FakeDocument::new(dir.path(), "kept");
    let id = open(&mut tracker, doc);
    let mirror = tracker.get(id).unwrap().content_file().to_path_buf();
    let report = tracker.finish(&[id], &Decisions::default()).expect("finish");
    assert!(!report.finished[0].mirror_removed);
    assert!(mirror.exists());

    let mut tracker = EditSessionTracker::new(policy());
    let (doc, calls) = FakeDocument::new(dir.path(), "unpushed");
    let id = open(&mut tracker, doc);
    let mirror = tracker.get(id).unwrap().content_file().to_path_buf();
    edit(&mirror, "unsaved", T1);
    calls.lock().unwrap().fail_put = true;
    let report = tracker.finish(&[id], &Decisions::default()).expect("finish");
    let finished = &report.finished[0];
    assert!(!finished.mirror_removed);
    assert!(finished.lock_released);
    assert_eq!(finished.errors.len(), 1);
    assert!(mirror.exists(), "unpushed edits must stay on disk");
}
