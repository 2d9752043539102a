//! `zem list`: open edit sessions.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use zem_core::{SessionState, SessionView};
use zem_daemon::request_list;

use super::{daemon_error, home_dir};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "id")]
    id: u64,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "document")]
    document: String,
    #[tabled(rename = "lock")]
    lock: &'static str,
    #[tabled(rename = "last push")]
    last_push: String,
    #[tabled(rename = "local file")]
    local_file: String,
}

impl ListArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let sessions = request_list(&home).map_err(|err| daemon_error(err, "list failed"))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&sessions).context("failed to serialize sessions")?
            );
            return Ok(());
        }

        if sessions.is_empty() {
            println!("No open edit sessions.");
            return Ok(());
        }

        let errors: Vec<(u64, String)> = sessions
            .iter()
            .filter_map(|s| s.last_error.clone().map(|e| (s.id.0, e)))
            .collect();
        let rows: Vec<SessionRow> = sessions.iter().map(row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");

        for (id, err) in errors {
            println!("{} session {id}: {err}", "■".red().bold());
        }
        Ok(())
    }
}

fn row(session: &SessionView) -> SessionRow {
    SessionRow {
        id: session.id.0,
        state: state_label(session.state, session.last_error.is_some()),
        document: session
            .title
            .clone()
            .unwrap_or_else(|| session.url.clone()),
        lock: match (session.locked, session.borrowed_lock) {
            (true, true) => "borrowed",
            (true, false) => "held",
            (false, _) => "-",
        },
        last_push: session
            .last_synced_at
            .map(format_age)
            .unwrap_or_else(|| "never".to_string()),
        local_file: session.content_file.display().to_string(),
    }
}

fn state_label(state: SessionState, failing: bool) -> String {
    let label = state.to_string().to_uppercase();
    if failing {
        return label.red().bold().to_string();
    }
    match state {
        SessionState::Opened => label.bright_black().bold().to_string(),
        SessionState::Modified => label.yellow().bold().to_string(),
        SessionState::Synchronized => label.green().bold().to_string(),
    }
}

fn format_age(timestamp: DateTime<Utc>) -> String {
    let seconds = Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0);
    let age = if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 60 * 60 {
        format!("{}m", seconds / 60)
    } else if seconds < 60 * 60 * 24 {
        format!("{}h", seconds / (60 * 60))
    } else {
        format!("{}d", seconds / (60 * 60 * 24))
    };
    format!("{age} ago")
}
