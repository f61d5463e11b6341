//! Error types shared across the bootchain workspace.

use bootchain_provider::Subsystem;
use std::path::PathBuf;
use thiserror::Error;

pub type BootResult<T> = Result<T, BootError>;

#[derive(Debug, Error)]
pub enum BootError {
    /// Missing or malformed boot parameter, or invalid operator input.
    #[error("invalid boot parameter: {0}")]
    UserInput(String),

    /// The unlock tool rejected the supplied key material.
    #[error("credential rejected for `{target}`: {reason}")]
    Credential { target: String, reason: String },

    #[error("unable to unlock `{target}` after {attempts} attempt(s): {last}")]
    CredentialsExhausted {
        target: String,
        attempts: u32,
        last: String,
    },

    #[error("{what} not found at {}", path.display())]
    DeviceNotFound { what: &'static str, path: PathBuf },

    #[error("{subsystem} failure: {message}")]
    Subsystem {
        subsystem: Subsystem,
        message: String,
    },

    #[error("unable to import pool `{pool}` from any of {tried:?}")]
    FallbackExhausted { pool: String, tried: Vec<PathBuf> },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BootError {
    pub fn subsystem(subsystem: Subsystem, message: impl Into<String>) -> Self {
        BootError::Subsystem {
            subsystem,
            message: message.into(),
        }
    }

    pub fn device_not_found(what: &'static str, path: impl Into<PathBuf>) -> Self {
        BootError::DeviceNotFound {
            what,
            path: path.into(),
        }
    }

    /// Whether asking for a new credential and trying again can help.
    ///
    /// Only a rejected credential qualifies. Missing devices, bad parameters,
    /// and tool failures need operator action outside the prompt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BootError::Credential { .. })
    }
}
