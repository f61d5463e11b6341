//! Console prompt backed by the controlling terminal.

use bootchain_core::error::{BootError, BootResult};
use bootchain_provider::prompt::CredentialPrompt;
use rpassword::prompt_password;
use std::io::{self, BufRead, Write};
use zeroize::Zeroizing;

pub(crate) struct ConsolePrompt;

impl CredentialPrompt for ConsolePrompt {
    type Error = BootError;

    fn read_secret(&self, prompt: &str) -> BootResult<Zeroizing<String>> {
        Ok(Zeroizing::new(prompt_password(prompt)?))
    }

    fn read_line(&self, prompt: &str) -> BootResult<String> {
        let mut stdout = io::stdout();
        stdout.write_all(prompt.as_bytes())?;
        stdout.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(line)
    }
}
