use portable_pty::{native_pty_system, CommandBuilder, PtyPair, PtySize};
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    OpenPty(#[source] anyhow::Error),

    #[error("failed to spawn command: {0}")]
    SpawnCommand(#[source] anyhow::Error),

    #[error("failed to clone reader: {0}")]
    CloneReader(#[source] anyhow::Error),

    #[error("failed to take writer: {0}")]
    TakeWriter(#[source] anyhow::Error),

    #[error("failed to resize pty: {0}")]
    Resize(#[source] anyhow::Error),
}

/// What to run inside the PTY.
#[derive(Debug, Clone)]
pub enum SpawnCommand {
    /// Spawn the user's login shell ($SHELL, /bin/sh fallback).
    /// An optional shell path overrides $SHELL.
    Shell { shell: Option<String> },
    /// Spawn a command via `sh -c 'command'`.
    Command { command: String },
}

impl Default for SpawnCommand {
    fn default() -> Self {
        Self::Shell { shell: None }
    }
}

/// A PTY pair with the child process spawned on the slave side.
///
/// The master side behaves like a terminal driver: reads yield child output,
/// writes become child input, and `resize` updates the kernel window size
/// (delivering SIGWINCH to the child's process group).
pub struct Pty {
    pair: PtyPair,
    child: Option<Box<dyn portable_pty::Child + Send + Sync>>,
}

impl Pty {
    /// Open a PTY with the given dimensions and spawn the command on it.
    pub fn spawn(rows: u16, cols: u16, spawn_cmd: &SpawnCommand) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system.openpty(size).map_err(PtyError::OpenPty)?;
        let cmd = Self::build_command(spawn_cmd);
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(PtyError::SpawnCommand)?;

        Ok(Self {
            pair,
            child: Some(child),
        })
    }

    /// Build a CommandBuilder from the spawn configuration.
    fn build_command(spawn_cmd: &SpawnCommand) -> CommandBuilder {
        let term = std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string());

        let mut cmd = match spawn_cmd {
            SpawnCommand::Shell { shell } => {
                let shell_path = match shell {
                    Some(s) => s.clone(),
                    None => std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()),
                };
                CommandBuilder::new(shell_path)
            }
            SpawnCommand::Command { command } => {
                let mut cmd = CommandBuilder::new("/bin/sh");
                cmd.arg("-c");
                cmd.arg(command);
                cmd
            }
        };

        cmd.env("TERM", term);
        cmd
    }

    /// PID of the child process, if the platform exposes one.
    pub fn child_pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.process_id())
    }

    pub fn take_reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.pair
            .master
            .try_clone_reader()
            .map_err(PtyError::CloneReader)
    }

    pub fn take_writer(&self) -> Result<Box<dyn Write + Send>, PtyError> {
        self.pair.master.take_writer().map_err(PtyError::TakeWriter)
    }

    /// The child handle; the caller that takes it is responsible for reaping.
    pub fn take_child(&mut self) -> Option<Box<dyn portable_pty::Child + Send + Sync>> {
        self.child.take()
    }

    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        self.pair
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(PtyError::Resize)
    }
}

/// Send a signal to a child process by PID.
pub fn send_signal(pid: u32, signal: i32) {
    if pid > i32::MAX as u32 {
        tracing::warn!(pid, "PID exceeds i32::MAX, cannot send signal");
        return;
    }
    unsafe {
        libc::kill(pid as i32, signal);
    }
}
