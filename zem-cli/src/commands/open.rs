//! `zem open <file.zem>`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use zem_daemon::{request_open, DaemonError, OpenReply};

use super::{daemon_error, home_dir, prompt};

#[derive(Args, Debug)]
pub struct OpenArgs {
    /// The .zem file handed over by the browser.
    pub file: PathBuf,

    /// Borrow a lock you already hold in another session without asking.
    #[arg(long, conflicts_with = "no_borrow")]
    pub borrow: bool,

    /// Never borrow an existing lock; abort instead.
    #[arg(long)]
    pub no_borrow: bool,
}

impl OpenArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let file = std::fs::canonicalize(&self.file)
            .with_context(|| format!("cannot open {}", self.file.display()))?;
        let borrow = match (self.borrow, self.no_borrow) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };

        let reply = match request_open(&home, &file, borrow) {
            Ok(reply) => reply,
            Err(DaemonError::ConfirmationRequired { message, .. }) => {
                if !prompt::confirm(&message, "pass --borrow or --no-borrow")? {
                    println!("open cancelled");
                    return Ok(());
                }
                request_open(&home, &file, Some(true))
                    .map_err(|err| daemon_error(err, "open failed"))?
            }
            Err(err) => return Err(daemon_error(err, "open failed")),
        };

        print_reply(&reply);
        Ok(())
    }
}

fn print_reply(reply: &OpenReply) {
    let verb = if reply.existing {
        "already open"
    } else {
        "opened"
    };
    println!(
        "{} session {} {} → {}",
        "■".green().bold(),
        reply.id,
        verb,
        reply.content_file.display()
    );
    println!("  url:    {}", reply.url);
    println!("  editor: {}", reply.editor);
    if let Some(err) = &reply.launch_error {
        println!("  {} {err}", "editor did not start:".yellow().bold());
        println!("  retry with `zem goto {}`", reply.id);
    }
}
