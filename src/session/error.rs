//! Error kinds surfaced to the command line
//!
//! Module errors (`StoreError`, `KeyError`, `SshError`) are folded into one
//! flat set so callers can match on what went wrong rather than where.

use thiserror::Error;

use crate::config::{StorageError, StoreError};
use crate::ssh::{KeyError, SshError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("Profile '{0}' does not exist")]
    NotFound(String),

    #[error("{0}")]
    KeyNotFound(String),

    #[error("{0}")]
    AuthMaterial(String),

    #[error("{0}")]
    Transport(String),

    #[error("{0}")]
    AuthRejected(String),

    #[error("{0}")]
    RemoteCommand(String),

    #[error("Failed to save config: {0}")]
    Persistence(#[source] StorageError),

    #[error("No Lagoon selected: pass --lagoon or set a default with `lagoon config default <name>`")]
    NoProfileSelected,

    #[error("{0}")]
    Prompt(String),

    #[error("API call failed: {0}")]
    Api(String),

    #[error("Interrupted")]
    Interrupted,
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => Error::Validation(msg),
            StoreError::NotFound(name) => Error::NotFound(name),
            StoreError::Persistence(e) => Error::Persistence(e),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Persistence(err)
    }
}

impl From<KeyError> for Error {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::NotFound { .. } => Error::KeyNotFound(err.to_string()),
            KeyError::AuthMaterial(_) => Error::AuthMaterial(err.to_string()),
            KeyError::Prompt(_) => Error::Prompt(err.to_string()),
        }
    }
}

impl From<SshError> for Error {
    fn from(err: SshError) -> Self {
        if err.is_transport() {
            return Error::Transport(err.to_string());
        }
        match err {
            SshError::AuthenticationRejected(_) => Error::AuthRejected(err.to_string()),
            _ => Error::RemoteCommand(err.to_string()),
        }
    }
}
