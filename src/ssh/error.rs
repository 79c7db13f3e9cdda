//! Failures while talking to the Lagoon SSH endpoint

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshError {
    /// TCP connect or SSH handshake did not complete
    #[error("Could not reach the Lagoon SSH service: {0}")]
    ConnectionFailed(String),

    /// The server refused every key offered
    #[error("The Lagoon SSH service rejected the key: {0}")]
    AuthenticationRejected(String),

    #[error("SSH channel failure: {0}")]
    ChannelError(String),

    /// The token command ran but did not produce a token
    #[error("Token command failed: {0}")]
    RemoteCommand(String),

    #[error("I/O failure on the SSH connection: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SSH protocol failure: {0}")]
    ProtocolError(String),

    #[error("{0}")]
    Timeout(String),

    #[error("SSH Agent not available: {0}")]
    AgentNotAvailable(String),

    #[error("SSH Agent failure: {0}")]
    AgentError(String),
}

impl SshError {
    /// Whether the failure happened before or beneath authentication, as
    /// opposed to a rejected key or a failing token command
    pub fn is_transport(&self) -> bool {
        !matches!(
            self,
            SshError::AuthenticationRejected(_) | SshError::RemoteCommand(_)
        )
    }
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::IO(e) => SshError::IoError(e),
            other => SshError::ProtocolError(other.to_string()),
        }
    }
}
