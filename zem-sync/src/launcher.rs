//! Opening local mirrors in an external editor.

use std::path::Path;
use std::process::{Command, Stdio};

use zem_core::{Metadata, Preferences};

use crate::error::SyncError;

/// Opener used when neither a helper app nor `$VISUAL`/`$EDITOR` is set.
#[cfg(target_os = "macos")]
pub const PLATFORM_OPENER: &str = "open";
#[cfg(not(target_os = "macos"))]
pub const PLATFORM_OPENER: &str = "xdg-open";

/// A program plus leading arguments; the file to edit is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl EditorCommand {
    /// Split an editor string such as `"code --wait"` on whitespace.
    /// Returns `None` for a blank string.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut words = raw.split_whitespace().map(str::to_owned);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }
}

/// Pick the editor for a document: helper app, then `$VISUAL`, then
/// `$EDITOR`, then [`PLATFORM_OPENER`].
pub fn resolve_editor(prefs: &Preferences, metadata: &Metadata) -> EditorCommand {
    resolve_editor_with(prefs, metadata, |key| std::env::var(key).ok())
}

/// [`resolve_editor`] with an injectable environment lookup.
pub fn resolve_editor_with(
    prefs: &Preferences,
    metadata: &Metadata,
    env: impl Fn(&str) -> Option<String>,
) -> EditorCommand {
    prefs
        .helper_for(metadata)
        .and_then(|helper| EditorCommand::parse(&helper.editor))
        .or_else(|| env("VISUAL").as_deref().and_then(EditorCommand::parse))
        .or_else(|| env("EDITOR").as_deref().and_then(EditorCommand::parse))
        .unwrap_or_else(|| EditorCommand {
            program: PLATFORM_OPENER.to_owned(),
            args: Vec::new(),
        })
}

/// Starts an editor on a file.
pub trait EditorLauncher: Send {
    fn launch(&self, editor: &EditorCommand, file: &Path) -> Result<(), SyncError>;
}

/// Spawns the editor with null stdio. A background thread waits on the
/// child so exited editors do not linger as zombies.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl EditorLauncher for ProcessLauncher {
    fn launch(&self, editor: &EditorCommand, file: &Path) -> Result<(), SyncError> {
        let mut child = Command::new(&editor.program)
            .args(&editor.args)
            .arg(file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SyncError::Launch {
                editor: editor.program.clone(),
                source,
            })?;
        tracing::info!(
            editor = %editor.program,
            pid = child.id(),
            file = %file.display(),
            "launched editor",
        );
        let program = editor.program.clone();
        std::thread::spawn(move || match child.wait() {
            Ok(status) => tracing::debug!(editor = %program, %status, "editor exited"),
            Err(err) => tracing::warn!(editor = %program, error = %err, "failed to reap editor"),
        });
        Ok(())
    }
}
