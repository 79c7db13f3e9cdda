//! Token issuance over SSH
//!
//! Lagoon hands out API tokens from its SSH service: authenticate as
//! `lagoon` with a public key, run `token`, and the command output is the
//! token.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::error::Error;
use crate::config::Profile;
use crate::ssh::{disconnect, run_command, KeyHandle, SshClient, SshConfig, TOKEN_COMMAND, TOKEN_USER};

/// Raw token returned by the remote command
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken(String);

impl IssuedToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IssuedToken(<{} bytes>)", self.0.len())
    }
}

/// Obtains a fresh token for a profile
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Consumes `key`; it is released once the attempt is over, whatever
    /// the outcome.
    async fn issue(&self, profile: &Profile, key: KeyHandle) -> Result<IssuedToken, Error>;
}

/// Issues tokens by running the token command over SSH
#[derive(Debug, Clone)]
pub struct SshTokenIssuer {
    username: String,
    command: String,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl Default for SshTokenIssuer {
    fn default() -> Self {
        let defaults = SshConfig::default();
        Self {
            username: TOKEN_USER.to_string(),
            command: TOKEN_COMMAND.to_string(),
            connect_timeout: defaults.connect_timeout,
            command_timeout: defaults.command_timeout,
        }
    }
}

impl SshTokenIssuer {
    pub fn with_timeouts(mut self, connect: Duration, command: Duration) -> Self {
        self.connect_timeout = connect;
        self.command_timeout = command;
        self
    }

    fn ssh_config(&self, profile: &Profile) -> Result<SshConfig, Error> {
        if profile.hostname.trim().is_empty() {
            return Err(Error::Validation("profile has no SSH hostname".to_string()));
        }
        let port = profile.port_number().ok_or_else(|| {
            Error::Validation(format!("profile port '{}' is not a valid TCP port", profile.port))
        })?;

        Ok(SshConfig {
            host: profile.hostname.trim().to_string(),
            port,
            username: self.username.clone(),
            connect_timeout: self.connect_timeout,
            command_timeout: self.command_timeout,
        })
    }
}

#[async_trait]
impl TokenIssuer for SshTokenIssuer {
    async fn issue(&self, profile: &Profile, mut key: KeyHandle) -> Result<IssuedToken, Error> {
        let client = SshClient::new(self.ssh_config(profile)?);

        let handle = client.connect(&mut key).await?;
        // Authentication is done; the agent connection is no longer needed
        drop(key);

        let output = run_command(&handle, &self.command, self.command_timeout).await;
        disconnect(&handle, "Token issued").await;
        drop(handle);

        let token = output?.into_trimmed_text(&self.command)?;
        debug!("Received token of {} bytes", token.len());
        info!("Token issued by {}", client.config().addr());
        Ok(IssuedToken(token))
    }
}
