//! Zem: edit web content in a local editor.
//!
//! # Usage
//!
//! ```text
//! zem open <file.zem> [--borrow|--no-borrow]
//! zem list [--json]
//! zem goto <id>
//! zem finish <id>... [--yes]
//! zem sync
//! zem prefs show [--json] | set <key> <value> | reset | upgrade | helper list|add|remove
//! zem daemon start [--migrate upgrade|reset] | stop | status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, finish::FinishArgs, goto::GotoArgs, list::ListArgs, open::OpenArgs,
    prefs::PrefsCommand,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "zem",
    version,
    about = "Edit remote documents in a local editor and write changes back",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check out the document described by a .zem file and open it in an editor.
    Open(OpenArgs),

    /// List open edit sessions.
    List(ListArgs),

    /// Re-open an edit session's local file in its editor.
    Goto(GotoArgs),

    /// Push any last change, release the lock and close edit sessions.
    Finish(FinishArgs),

    /// Check every session for local changes now instead of waiting for the next poll.
    Sync,

    /// Show or change preferences.
    Prefs {
        #[command(subcommand)]
        command: PrefsCommand,
    },

    /// Run or control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Open(args) => args.run(),
        Commands::List(args) => args.run(),
        Commands::Goto(args) => args.run(),
        Commands::Finish(args) => args.run(),
        Commands::Sync => commands::sync::run(),
        Commands::Prefs { command } => commands::prefs::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
