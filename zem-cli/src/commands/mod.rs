//! Subcommand implementations.

pub mod daemon;
pub mod finish;
pub mod goto;
pub mod list;
pub mod open;
pub mod prefs;
pub mod prompt;
pub mod sync;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use zem_daemon::DaemonError;

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Turn a "daemon not running" failure into an actionable message.
pub(crate) fn daemon_error(err: DaemonError, action: &str) -> anyhow::Error {
    match err {
        DaemonError::DaemonNotRunning { .. } => {
            anyhow!("{action}: the zem daemon is not running (start it with `zem daemon start`)")
        }
        other => anyhow::Error::new(other).context(action.to_string()),
    }
}
