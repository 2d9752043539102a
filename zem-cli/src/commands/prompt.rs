//! Interactive yes/no questions on the terminal.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{bail, Context, Result};

/// Ask `question` on stdout and read the answer from stdin. Fails when
/// stdin is not a terminal; `hint` tells the user which flag answers it.
pub fn confirm(question: &str, hint: &str) -> Result<bool> {
    if !is_interactive() {
        bail!("{question}\nstdin is not a terminal; {hint}");
    }
    Ok(is_yes(&ask(&format!("{question} [y/N] "))?))
}

pub fn is_interactive() -> bool {
    io::stdin().is_terminal()
}

/// Print `question` without a newline and return the raw answer line.
pub fn ask(question: &str) -> Result<String> {
    print!("{question}");
    io::stdout().flush().context("flush stdout")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("read answer from stdin")?;
    Ok(answer)
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_yes_counts() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
        assert!(!is_yes("yep"));
    }
}
