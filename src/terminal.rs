//! Terminal state saved at startup and put back after an interrupt
//!
//! A passphrase prompt turns echo off while it waits for input. If ctrl-c
//! ends the process during the prompt, the blocking thread never gets to
//! turn it back on.

#[cfg(unix)]
use nix::sys::termios::{self, SetArg, Termios};

pub struct TerminalGuard {
    #[cfg(unix)]
    original: Option<Termios>,
}

impl TerminalGuard {
    /// Snapshot stdin's terminal attributes, if stdin is a terminal
    #[cfg(unix)]
    pub fn capture() -> Self {
        use std::io::IsTerminal;

        let stdin = std::io::stdin();
        let original = if stdin.is_terminal() {
            termios::tcgetattr(&stdin).ok()
        } else {
            None
        };
        Self { original }
    }

    #[cfg(not(unix))]
    pub fn capture() -> Self {
        Self {}
    }

    /// Put echo and the cursor back the way they were at startup
    pub fn restore(&self) {
        #[cfg(unix)]
        if let Some(original) = &self.original {
            if let Err(e) = termios::tcsetattr(std::io::stdin(), SetArg::TCSANOW, original) {
                tracing::debug!("Failed to restore terminal attributes: {}", e);
            }
        }
        let _ = dialoguer::console::Term::stderr().show_cursor();
    }

    #[cfg(all(test, unix))]
    fn has_snapshot(&self) -> bool {
        self.original.is_some()
    }
}
