//! SSH Agent Client
//!
//! Real SSH Agent integration via russh's [`AgentClient`]. Signing of the
//! server challenge is delegated to the agent, so raw key bytes never enter
//! this process.
//!
//! # Platform Support
//! - **Unix/Linux/macOS**: `SSH_AUTH_SOCK` Unix domain socket
//! - **Windows**: `\\\\.\\pipe\\openssh-ssh-agent` named pipe (OpenSSH for Windows)
//!
//! # The `AgentSigner` Workaround (Send + RPITIT)
//!
//! russh's built-in `impl Signer for AgentClient` captures a borrowed
//! `PublicKey` across an `.await` inside [`Handle::authenticate_publickey_with`],
//! and the compiler cannot prove that future `Send` (rust-lang/rust#100013).
//! `AgentSigner` clones the key into the future before awaiting.

use std::future::Future;

use async_trait::async_trait;
use russh::client::Handle;
use russh::keys::agent::client::{AgentClient, AgentStream};
use russh::keys::ssh_key;
use russh::keys::PublicKey;
use russh::{AgentAuthError, CryptoVec, Signer};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;
use super::keys::{AgentConnector, KeyAgent};

type DynAgent = AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>;

/// Send-safe wrapper around [`AgentClient`] implementing the [`Signer`] trait.
struct AgentSigner<'a> {
    agent: &'a mut DynAgent,
}

impl Signer for AgentSigner<'_> {
    type Error = AgentAuthError;

    fn auth_publickey_sign(
        &mut self,
        key: &ssh_key::PublicKey,
        hash_alg: Option<ssh_key::HashAlg>,
        to_sign: CryptoVec,
    ) -> impl Future<Output = Result<CryptoVec, Self::Error>> + Send {
        let key_owned = key.clone();
        async move {
            self.agent
                .sign_request(&key_owned, hash_alg, to_sign)
                .await
                .map_err(Into::into)
        }
    }
}

/// Connection to the system SSH Agent plus the identities it reported.
///
/// The socket is closed when this value is dropped.
pub struct SshAgentClient {
    agent: DynAgent,
    keys: Vec<PublicKey>,
}

impl SshAgentClient {
    /// Connect to the system SSH Agent and list its identities
    pub async fn connect() -> Result<Self, SshError> {
        debug!("Connecting to system SSH Agent");

        #[cfg(unix)]
        let agent = AgentClient::connect_env()
            .await
            .map_err(|e| {
                SshError::AgentNotAvailable(format!(
                    "Failed to connect to SSH Agent: {}. \
                     Make sure SSH_AUTH_SOCK is set and ssh-agent is running.",
                    e
                ))
            })?
            .dynamic();

        #[cfg(windows)]
        let agent = AgentClient::connect_named_pipe(r"\\.\pipe\openssh-ssh-agent")
            .await
            .map_err(|e| {
                SshError::AgentNotAvailable(format!(
                    "Failed to connect to SSH Agent via named pipe: {}. \
                     Make sure the OpenSSH Authentication Agent service is running.",
                    e
                ))
            })?
            .dynamic();

        #[cfg(not(any(unix, windows)))]
        return Err(SshError::AgentNotAvailable(
            "SSH Agent is not supported on this platform".to_string(),
        ));

        #[cfg(any(unix, windows))]
        {
            let mut client = Self {
                agent,
                keys: Vec::new(),
            };
            client.keys = client
                .agent
                .request_identities()
                .await
                .map_err(|e| SshError::AgentError(format!("Failed to list agent keys: {}", e)))?;
            debug!("SSH Agent reports {} key(s)", client.keys.len());
            Ok(client)
        }
    }
}

impl Drop for SshAgentClient {
    fn drop(&mut self) {
        debug!("Releasing SSH Agent connection");
    }
}

#[async_trait]
impl KeyAgent for SshAgentClient {
    fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Try every agent-held key until the server accepts one
    async fn authenticate(
        &mut self,
        handle: &mut Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool, SshError> {
        let mut last_error: Option<String> = None;

        for key in &self.keys {
            debug!("Trying agent key: {} ({})", key.algorithm(), key.comment());

            let hash_alg = if key.algorithm().is_rsa() {
                handle.best_supported_rsa_hash().await.ok().flatten().flatten()
            } else {
                None
            };

            match handle
                .authenticate_publickey_with(
                    username,
                    key.clone(),
                    hash_alg,
                    &mut AgentSigner {
                        agent: &mut self.agent,
                    },
                )
                .await
            {
                Ok(result) if result.success() => {
                    info!("SSH Agent authentication succeeded with key: {}", key.comment());
                    return Ok(true);
                }
                Ok(_failure) => {
                    debug!("Key rejected by server: {}", key.comment());
                }
                Err(e) => {
                    warn!("Agent signing error for key {}: {}", key.comment(), e);
                    last_error = Some(e.to_string());
                }
            }
        }

        match last_error {
            // Every key failed to sign; the server never got to judge them
            Some(e) if !self.keys.is_empty() => Err(SshError::AgentError(format!(
                "No agent key could sign the challenge (tried {} key(s)). Last error: {}",
                self.keys.len(),
                e
            ))),
            _ => Ok(false),
        }
    }
}

/// Connects to the agent named by the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAgent;

#[async_trait]
impl AgentConnector for SystemAgent {
    async fn connect(&self) -> Result<Box<dyn KeyAgent>, SshError> {
        if !is_agent_available() {
            return Err(SshError::AgentNotAvailable("SSH_AUTH_SOCK is not set".to_string()));
        }
        Ok(Box::new(SshAgentClient::connect().await?))
    }
}

/// Check if SSH Agent is available on the system
///
/// Quick pre-check only; the actual connection may still fail.
pub fn is_agent_available() -> bool {
    #[cfg(unix)]
    {
        std::env::var_os("SSH_AUTH_SOCK").is_some_and(|sock| !sock.is_empty())
    }

    #[cfg(windows)]
    {
        // The named pipe exists whenever the service is installed
        true
    }

    #[cfg(not(any(unix, windows)))]
    {
        false
    }
}
