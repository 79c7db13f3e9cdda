//! SSH Client implementation using russh
//!
//! # Security caveat
//!
//! The token service is reached with host key verification **disabled**:
//! any host key presented by the server is accepted and nothing is written
//! to `known_hosts`. Anyone able to intercept the connection can
//! impersonate the token service and capture the signed authentication
//! request (but not the private key itself).

use std::sync::Arc;

use russh::client::{self, Handle};
use russh::keys::ssh_key::HashAlg;
use russh::keys::PublicKey;
use tracing::{debug, info};

use super::config::SshConfig;
use super::error::SshError;
use super::keys::KeyHandle;

/// SSH client for short-lived command sessions
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Connect to the SSH server and authenticate with `key`
    ///
    /// The returned handle owns the transport; dropping it closes the
    /// connection.
    pub async fn connect(&self, key: &mut KeyHandle) -> Result<Handle<ClientHandler>, SshError> {
        let addr = self.config.addr();
        info!("Connecting to SSH server at {}", addr);

        let ssh_config = client::Config {
            inactivity_timeout: Some(self.config.connect_timeout + self.config.command_timeout),
            ..Default::default()
        };
        let handler = ClientHandler::new(self.config.host.clone(), self.config.port);

        let mut handle = tokio::time::timeout(
            self.config.connect_timeout,
            client::connect(
                Arc::new(ssh_config),
                (self.config.host.as_str(), self.config.port),
                handler,
            ),
        )
        .await
        .map_err(|_| SshError::Timeout(format!("Connection to {} timed out", addr)))?
        .map_err(|e| SshError::ConnectionFailed(format!("couldn't connect to {}: {}", addr, e)))?;

        debug!("SSH handshake completed, authenticating with {}", key.describe());

        let authenticated = tokio::time::timeout(
            self.config.connect_timeout,
            key.authenticate(&mut handle, &self.config.username),
        )
        .await
        .map_err(|_| SshError::Timeout(format!("Authentication to {} timed out", addr)))
        .and_then(|result| result);

        match authenticated {
            Ok(true) => {
                info!("SSH authentication successful as {}", self.config.username);
                Ok(handle)
            }
            Ok(false) => {
                disconnect(&handle, "Authentication rejected").await;
                Err(SshError::AuthenticationRejected(format!(
                    "{} rejected {} for user {}",
                    addr,
                    key.describe(),
                    self.config.username
                )))
            }
            Err(e) => {
                disconnect(&handle, "Authentication failed").await;
                Err(e)
            }
        }
    }
}

/// Best-effort polite disconnect
pub async fn disconnect(handle: &Handle<ClientHandler>, reason: &str) {
    if let Err(e) = handle
        .disconnect(russh::Disconnect::ByApplication, reason, "en")
        .await
    {
        debug!("Disconnect error (non-fatal): {}", e);
    }
}

/// Client handler for russh callbacks
///
/// Accepts every server host key; see the module-level security caveat.
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        info!(
            "Accepting unverified host key for {}:{} ({} {})",
            self.host,
            self.port,
            server_public_key.algorithm(),
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}
