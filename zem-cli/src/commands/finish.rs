//! `zem finish <id>...`

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;

use zem_daemon::{request_finish, DaemonError, FinishedReply};

use super::{daemon_error, home_dir, prompt};

#[derive(Args, Debug)]
pub struct FinishArgs {
    /// Session ids as shown by `zem list`.
    #[arg(required = true)]
    pub ids: Vec<u64>,

    /// Skip the confirmation question.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl FinishArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let finished = match request_finish(&home, &self.ids, self.yes) {
            Ok(finished) => finished,
            Err(DaemonError::ConfirmationRequired { message, .. }) => {
                if !prompt::confirm(&message, "pass --yes to confirm")? {
                    println!("nothing finished");
                    return Ok(());
                }
                request_finish(&home, &self.ids, true)
                    .map_err(|err| daemon_error(err, "finish failed"))?
            }
            Err(err) => return Err(daemon_error(err, "finish failed")),
        };

        let mut failures = 0;
        for session in &finished {
            print_finished(session);
            failures += session.errors.len();
        }
        if failures > 0 {
            bail!("{failures} problem(s) while finishing; see above");
        }
        Ok(())
    }
}

fn print_finished(session: &FinishedReply) {
    let marker = if session.errors.is_empty() {
        "■".green().bold()
    } else {
        "■".yellow().bold()
    };
    let mut notes = Vec::new();
    if session.pushed_final_changes {
        notes.push("pushed last changes");
    }
    if session.lock_released {
        notes.push("lock released");
    }
    if session.mirror_removed {
        notes.push("local file removed");
    }
    let notes = if notes.is_empty() {
        String::new()
    } else {
        format!(" ({})", notes.join(", "))
    };
    println!("{marker} finished session {} {}{notes}", session.id, session.url);
    for err in &session.errors {
        println!("    {err}");
    }
}
