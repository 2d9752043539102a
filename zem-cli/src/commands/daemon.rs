//! `zem daemon`: background session keeper lifecycle.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};

use zem_core::{prefs, PrefsError, VersionStatus};
use zem_daemon::paths::socket_path;
use zem_daemon::{request_status, request_stop, start_blocking, DaemonError};

use super::{home_dir, prompt};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (poller + socket server).
    Start {
        /// What to do with preferences written by another version. Asked
        /// interactively when omitted; non-interactive runs upgrade.
        #[arg(long, value_enum)]
        migrate: Option<Migration>,
    },
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// Keep settings and fold legacy entries into helper apps.
    Upgrade,
    /// Discard old settings and start from the defaults.
    Reset,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home_dir()?;

    match command {
        DaemonCommand::Start { migrate } => {
            check_preferences(&home, migrate)?;
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => {
            let payload = match request_status(&home) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload)
                    .context("failed to render daemon status JSON")?
            );
        }
    }

    Ok(())
}

/// Version check before the daemon loads preferences.
fn check_preferences(home: &Path, migrate: Option<Migration>) -> Result<()> {
    let current = prefs::load_at(home);
    let found = match &current {
        Ok(loaded) => match loaded.version_status() {
            VersionStatus::Current => return Ok(()),
            VersionStatus::Outdated { found } => found.clone(),
        },
        // An unreadable file gets the same choice as an outdated one.
        Err(_) => None,
    };

    let choice = match migrate {
        Some(choice) => choice,
        None => ask_migration(found.as_deref())?,
    };
    match choice {
        Migration::Upgrade => match prefs::upgrade_at(home) {
            Ok(_) => println!("preferences upgraded to version {}", prefs::PREFS_VERSION),
            Err(err @ PrefsError::Parse { .. }) => {
                eprintln!("preferences could not be read ({err}); starting from defaults");
                prefs::reset_at(home).context("failed to reset preferences")?;
            }
            Err(err) => return Err(err).context("failed to upgrade preferences"),
        },
        Migration::Reset => {
            prefs::reset_at(home).context("failed to reset preferences")?;
            println!("preferences reset to defaults");
        }
    }
    Ok(())
}

fn ask_migration(found: Option<&str>) -> Result<Migration> {
    if !prompt::is_interactive() {
        return Ok(Migration::Upgrade);
    }
    println!(
        "Your preferences were written by zem {} and this is zem {}.",
        found.unwrap_or("(unknown version)"),
        prefs::PREFS_VERSION
    );
    let answer = prompt::ask("[U]pgrade them or start [f]resh? ")?;
    Ok(parse_migration_answer(&answer))
}

fn parse_migration_answer(answer: &str) -> Migration {
    match answer.trim().to_ascii_lowercase().as_str() {
        "f" | "fresh" | "r" | "reset" => Migration::Reset,
        _ => Migration::Upgrade,
    }
}
