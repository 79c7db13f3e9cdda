//! One-shot remote command execution
//!
//! Opens a single exec channel, collects stdout and stderr into one buffer
//! (like a combined-output run) and records the exit status. The channel is
//! closed on every exit path.

use std::time::Duration;

use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg};
use tokio::time::timeout;
use tracing::debug;

use super::client::ClientHandler;
use super::error::SshError;

/// Largest output accepted from a remote command
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// What a remote command produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: Option<u32>,
    pub output: Vec<u8>,
}

impl CommandOutput {
    /// Output as trimmed text, failing on a non-zero or missing exit status
    /// or on empty output
    pub fn into_trimmed_text(self, command: &str) -> Result<String, SshError> {
        let text = String::from_utf8_lossy(&self.output).trim().to_string();

        match self.exit_status {
            Some(0) => {}
            Some(code) => {
                return Err(SshError::RemoteCommand(format!(
                    "'{}' exited with status {}{}",
                    command,
                    code,
                    if text.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", text)
                    }
                )))
            }
            None => {
                return Err(SshError::RemoteCommand(format!(
                    "'{}' exited without reporting a status",
                    command
                )))
            }
        }

        if text.is_empty() {
            return Err(SshError::RemoteCommand(format!("'{}' produced no output", command)));
        }
        Ok(text)
    }
}

/// Run `command` on a new session channel of `handle`
pub async fn run_command(
    handle: &Handle<ClientHandler>,
    command: &str,
    limit: Duration,
) -> Result<CommandOutput, SshError> {
    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(|e| SshError::ChannelError(format!("couldn't open session: {}", e)))?;

    let result = exec_and_collect(&mut channel, command, limit).await;

    if let Err(e) = channel.close().await {
        debug!("Channel close error (non-fatal): {}", e);
    }

    result
}

async fn exec_and_collect(
    channel: &mut Channel<Msg>,
    command: &str,
    limit: Duration,
) -> Result<CommandOutput, SshError> {
    channel
        .exec(true, command)
        .await
        .map_err(|e| SshError::ChannelError(format!("couldn't run '{}': {}", command, e)))?;

    let mut collected = CommandOutput::default();

    timeout(limit, async {
        // ExitStatus may arrive after Eof, so drain until Close
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => append(&mut collected.output, &data)?,
                ChannelMsg::ExtendedData { data, ext } if ext == 1 => {
                    append(&mut collected.output, &data)?
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    debug!("'{}' exited with status {}", command, exit_status);
                    collected.exit_status = Some(exit_status);
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    return Err(SshError::RemoteCommand(format!(
                        "'{}' killed by signal {:?}",
                        command, signal_name
                    )));
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }
        Ok(())
    })
    .await
    .map_err(|_| {
        SshError::RemoteCommand(format!("'{}' did not finish within {}s", command, limit.as_secs()))
    })??;

    Ok(collected)
}

fn append(buffer: &mut Vec<u8>, data: &[u8]) -> Result<(), SshError> {
    if buffer.len() + data.len() > MAX_OUTPUT_SIZE {
        return Err(SshError::RemoteCommand(format!(
            "output exceeded {} bytes",
            MAX_OUTPUT_SIZE
        )));
    }
    buffer.extend_from_slice(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_status: Option<u32>, text: &str) -> CommandOutput {
        CommandOutput {
            exit_status,
            output: text.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_successful_output_is_trimmed() {
        let text = output(Some(0), "  eyJhbGciOi.payload.sig\r\n")
            .into_trimmed_text("token")
            .unwrap();
        assert_eq!(text, "eyJhbGciOi.payload.sig");
    }

    #[test]
    fn test_non_zero_exit_is_remote_command_error() {
        let err = output(Some(1), "permission denied\n")
            .into_trimmed_text("token")
            .unwrap_err();
        match err {
            SshError::RemoteCommand(msg) => {
                assert!(msg.contains("status 1"));
                assert!(msg.contains("permission denied"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_status_or_empty_output_fails() {
        assert!(matches!(
            output(None, "tok").into_trimmed_text("token"),
            Err(SshError::RemoteCommand(_))
        ));
        assert!(matches!(
            output(Some(0), " \n\t").into_trimmed_text("token"),
            Err(SshError::RemoteCommand(_))
        ));
    }

    #[test]
    fn test_append_enforces_limit() {
        let mut buffer = vec![0u8; MAX_OUTPUT_SIZE - 1];
        assert!(append(&mut buffer, b"x").is_ok());
        assert!(append(&mut buffer, b"y").is_err());
    }
}
