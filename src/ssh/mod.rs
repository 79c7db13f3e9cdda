//! SSH module - authenticated transport to the Lagoon token service
//!
//! Built on the russh library.
//!
//! # Features
//! - Public-key authentication via SSH Agent or key file
//! - Passphrase-protected key files (interactive prompt)
//! - One-shot remote command execution
//! - Host keys are accepted without verification (see `client`)

mod agent;
mod client;
mod config;
mod error;
pub mod exec;
pub mod keys;

pub use agent::{is_agent_available, SshAgentClient, SystemAgent};
pub use client::{disconnect, ClientHandler, SshClient};
pub use config::{SshConfig, TOKEN_COMMAND, TOKEN_USER};
pub use error::SshError;
pub use exec::{run_command, CommandOutput};
pub use keys::{
    default_key_path, AgentConnector, FsKeyFiles, KeyAgent, KeyError, KeyFileSource, KeyHandle,
    KeyMaterialResolver, KeySelection, PassphrasePrompt, TerminalPrompt, PASSPHRASE_ATTEMPTS,
};
