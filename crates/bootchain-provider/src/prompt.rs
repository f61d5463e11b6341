//! Interactive console input used while gathering unlock parameters.

use std::error::Error;
use zeroize::Zeroizing;

/// Credential prompt service.
pub trait CredentialPrompt {
    type Error: Error + Send + Sync + 'static;

    /// Display `prompt` and read one line without echoing it.
    fn read_secret(&self, prompt: &str) -> Result<Zeroizing<String>, Self::Error>;

    /// Display `prompt` and read one echoed line, trailing newline removed.
    fn read_line(&self, prompt: &str) -> Result<String, Self::Error>;
}
