//! `zem prefs`: show and edit `~/.zem/preferences.yaml`.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use zem_core::{prefs, Preferences, VersionStatus};
use zem_daemon::{request_reload, DaemonError};

use super::home_dir;

#[derive(Subcommand, Debug)]
pub enum PrefsCommand {
    /// Print the current preferences.
    Show {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Change one preference, e.g. `zem prefs set save_interval 5`.
    Set {
        key: String,
        value: String,
    },

    /// Replace all preferences with the defaults.
    Reset,

    /// Migrate a preferences file written by an older version.
    Upgrade,

    /// Manage per-type helper applications.
    Helper {
        #[command(subcommand)]
        command: HelperCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum HelperCommand {
    /// List registered helper applications.
    List,
    /// Register the editor for a meta type or content type (`text/html`, `image/*`).
    Add(HelperAddArgs),
    /// Remove a helper application.
    Remove {
        doc_type: String,
    },
}

#[derive(Args, Debug)]
pub struct HelperAddArgs {
    /// Meta type or content type.
    pub doc_type: String,

    /// Editor command; the local file is appended.
    pub editor: String,

    /// Extension for the local file, e.g. `.html`.
    #[arg(long, default_value = "")]
    pub extension: String,
}

#[derive(Tabled)]
struct HelperRow {
    #[tabled(rename = "type")]
    doc_type: String,
    #[tabled(rename = "editor")]
    editor: String,
    #[tabled(rename = "extension")]
    extension: String,
}

pub fn run(command: PrefsCommand) -> Result<()> {
    let home = home_dir()?;

    match command {
        PrefsCommand::Show { json } => {
            let prefs = load(&home)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&prefs)
                        .context("failed to serialize preferences")?
                );
            } else {
                print_prefs(&home, &prefs);
            }
        }
        PrefsCommand::Set { key, value } => {
            let mut prefs = load(&home)?;
            prefs
                .set(&key, &value)
                .with_context(|| format!("cannot set '{key}'"))?;
            save_and_notify(&home, &prefs)?;
            println!("{key} updated");
        }
        PrefsCommand::Reset => {
            let prefs = prefs::reset_at(&home).context("failed to reset preferences")?;
            notify_daemon(&home);
            println!("preferences reset to defaults");
            print_prefs(&home, &prefs);
        }
        PrefsCommand::Upgrade => {
            let prefs = prefs::upgrade_at(&home).context("failed to upgrade preferences")?;
            notify_daemon(&home);
            println!("preferences upgraded to version {}", prefs::PREFS_VERSION);
        }
        PrefsCommand::Helper { command } => run_helper(&home, command)?,
    }

    Ok(())
}

fn run_helper(home: &Path, command: HelperCommand) -> Result<()> {
    let mut prefs = load(home)?;
    match command {
        HelperCommand::List => print_helpers(&prefs),
        HelperCommand::Add(args) => {
            prefs.add_helper(&args.doc_type, &args.editor, &args.extension);
            save_and_notify(home, &prefs)?;
            println!("helper for '{}' set to '{}'", args.doc_type, args.editor);
        }
        HelperCommand::Remove { doc_type } => {
            if prefs.remove_helper(&doc_type) {
                save_and_notify(home, &prefs)?;
                println!("helper for '{doc_type}' removed");
            } else {
                println!("no helper registered for '{doc_type}'");
            }
        }
    }
    Ok(())
}

fn load(home: &Path) -> Result<Preferences> {
    prefs::load_at(home).with_context(|| {
        format!(
            "failed to load {} (try `zem prefs upgrade` or `zem prefs reset`)",
            prefs::prefs_path_at(home).display()
        )
    })
}

fn save_and_notify(home: &Path, prefs: &Preferences) -> Result<()> {
    prefs::save_at(home, prefs).context("failed to save preferences")?;
    notify_daemon(home);
    Ok(())
}

/// Ask a running daemon to re-read preferences. A stopped daemon picks them
/// up at its next start.
fn notify_daemon(home: &Path) {
    match request_reload(home) {
        Ok(_) | Err(DaemonError::DaemonNotRunning { .. }) => {}
        Err(err) => eprintln!("warning: daemon did not reload preferences: {err}"),
    }
}

fn print_prefs(home: &Path, prefs: &Preferences) {
    println!("file:                {}", prefs::prefs_path_at(home).display());
    let version = match prefs.version_status() {
        VersionStatus::Current => prefs::PREFS_VERSION.to_string(),
        VersionStatus::Outdated { found } => format!(
            "{} (outdated, current is {})",
            found.unwrap_or_else(|| "none".to_string()),
            prefs::PREFS_VERSION
        ),
    };
    println!("version_check:       {version}");
    println!("save_interval:       {}", prefs.save_interval);
    println!("use_locks:           {}", prefs.use_locks);
    println!("always_borrow_locks: {}", prefs.always_borrow_locks);
    println!("confirm_on_finish:   {}", prefs.confirm_on_finish);
    println!("cleanup_files:       {}", prefs.cleanup_files);
    println!("temp_dir:            {}", prefs.temp_dir.display());
    print_helpers(prefs);
}

fn print_helpers(prefs: &Preferences) {
    if prefs.helper_apps.is_empty() {
        println!("No helper applications registered.");
        return;
    }
    let rows: Vec<HelperRow> = prefs
        .helper_apps
        .iter()
        .map(|(doc_type, helper)| HelperRow {
            doc_type: doc_type.clone(),
            editor: helper.editor.clone(),
            extension: helper.extension.clone(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
