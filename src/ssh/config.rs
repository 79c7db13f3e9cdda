//! SSH Configuration

use std::time::Duration;

/// Principal the token service expects
pub const TOKEN_USER: &str = "lagoon";

/// Remote command that prints a fresh token
pub const TOKEN_COMMAND: &str = "token";

/// SSH connection configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Remote host address
    pub host: String,

    /// SSH port (default: 22)
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Connection and authentication timeout
    pub connect_timeout: Duration,

    /// How long a remote command may run before it is abandoned
    pub command_timeout: Duration,
}

impl SshConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: TOKEN_USER.to_string(),
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(30),
        }
    }
}
