//! User confirmations requested by the tracker.
//!
//! The tracker never talks to a terminal or a window itself. It asks a
//! [`Prompter`]; an answer of `None` means "nobody has decided yet" and is
//! surfaced as [`SyncError::ConfirmationRequired`](crate::SyncError) so the
//! presentation layer can ask the user and retry with the answer.

/// A question the tracker needs answered before it can proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The document is already locked by this user elsewhere.
    BorrowLock { url: String },
    /// The user asked to finish `count` sessions.
    Finish { count: usize },
}

impl Confirmation {
    pub fn kind(&self) -> ConfirmationKind {
        match self {
            Confirmation::BorrowLock { .. } => ConfirmationKind::BorrowLock,
            Confirmation::Finish { .. } => ConfirmationKind::Finish,
        }
    }

    /// Human-readable question.
    pub fn message(&self) -> String {
        match self {
            Confirmation::BorrowLock { url } => format!(
                "{url} is already locked by you in another session. \
                 Do you want to borrow this lock and continue?"
            ),
            Confirmation::Finish { count: 1 } => {
                "Are you sure you're finished with this object?".to_string()
            }
            Confirmation::Finish { count } => {
                format!("Are you sure you're finished with these {count} objects?")
            }
        }
    }
}

/// Stable machine name of a [`Confirmation`], used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationKind {
    BorrowLock,
    Finish,
}

impl ConfirmationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmationKind::BorrowLock => "borrow_lock",
            ConfirmationKind::Finish => "finish",
        }
    }
}

/// Answers the tracker's questions.
pub trait Prompter {
    /// `Some(true)` to borrow the existing lock, `Some(false)` to abort the open.
    fn confirm_borrow(&self, url: &str) -> Option<bool>;

    /// `Some(true)` to finish the selected sessions.
    fn confirm_finish(&self, count: usize) -> Option<bool>;
}

/// Pre-recorded answers, typically taken from a client request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decisions {
    pub borrow: Option<bool>,
    pub finish: Option<bool>,
}

impl Prompter for Decisions {
    fn confirm_borrow(&self, _url: &str) -> Option<bool> {
        self.borrow
    }

    fn confirm_finish(&self, _count: usize) -> Option<bool> {
        self.finish
    }
}
