//! `zem sync`: run a poll pass now.

use anyhow::Result;
use colored::Colorize;

use zem_daemon::request_sync;

use super::{daemon_error, home_dir};

pub fn run() -> Result<()> {
    let home = home_dir()?;
    let reply = request_sync(&home).map_err(|err| daemon_error(err, "sync failed"))?;

    println!(
        "pushed {} | unchanged {} | failed {}",
        reply.pushed.len(),
        reply.unchanged,
        reply.failed.len()
    );
    for id in &reply.pushed {
        println!("  {} session {id}", "■".green().bold());
    }
    for failed in &reply.failed {
        println!("  {} session {}: {}", "■".red().bold(), failed.id, failed.error);
    }
    Ok(())
}
