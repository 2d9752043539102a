//! `zem goto <id>`

use anyhow::Result;
use clap::Args;

use zem_daemon::request_goto;

use super::{daemon_error, home_dir};

#[derive(Args, Debug)]
pub struct GotoArgs {
    /// Session id as shown by `zem list`.
    pub id: u64,
}

impl GotoArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let reply =
            request_goto(&home, self.id).map_err(|err| daemon_error(err, "goto failed"))?;
        println!(
            "session {}: {} opened in {}",
            reply.id,
            reply.content_file.display(),
            reply.editor
        );
        Ok(())
    }
}
