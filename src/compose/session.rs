//! Renderer process lifecycle.
//!
//! One `ProcessSession` per request: spawns the renderer, exposes stdout as
//! ordered byte chunks, drains stderr in the background and resolves to a
//! single `TerminalState` once the process has exited.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use axum::body::Bytes;
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;

use super::ffmpeg::create_hidden_command;

/// Tail of renderer diagnostics kept for error reporting.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Program and argv for one renderer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// How a renderer run ended. A session with no terminal state is running.
#[derive(Debug)]
pub enum TerminalState {
    /// Exit code 0, whether or not any stdout was produced.
    ExitedOk,
    /// Non-zero exit (or -1 when terminated by a signal).
    ExitedError { code: i32, stderr: String },
    /// The OS could not create the process.
    SpawnFailed(io::Error),
}

/// A spawned renderer process.
pub struct ProcessSession {
    child: Child,
    pid: Option<u32>,
    stdout: Option<ReaderStream<ChildStdout>>,
    stderr_task: Option<JoinHandle<String>>,
}

impl ProcessSession {
    /// Spawn the renderer with piped stdout/stderr and a closed stdin.
    ///
    /// The child is killed if the session is dropped before it exits.
    pub fn spawn(command: &RenderCommand, chunk_size: usize) -> io::Result<Self> {
        let mut child = create_hidden_command(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .map(|out| ReaderStream::with_capacity(out, chunk_size));
        let stderr_task = child.stderr.take().map(|err| tokio::spawn(collect_stderr(err)));

        log::debug!(
            "[SESSION] Spawned {} (pid {:?})",
            command.program.display(),
            pid
        );

        Ok(Self {
            child,
            pid,
            stdout,
            stderr_task,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next stdout chunk in process order. `None` once stdout is closed.
    pub async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        match self.stdout.as_mut() {
            Some(stdout) => stdout.next().await,
            None => None,
        }
    }

    /// Ask the OS to kill the renderer. Safe to call after it exited.
    pub fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            log::debug!("[SESSION] Kill on pid {:?} skipped: {}", self.pid, e);
        }
    }

    /// Wait for the process to exit and collect its diagnostics.
    ///
    /// Any stdout not yet read is abandoned.
    pub async fn wait(&mut self) -> TerminalState {
        self.stdout = None;
        let status = self.child.wait().await;

        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        match status {
            Ok(status) if status.success() => TerminalState::ExitedOk,
            Ok(status) => TerminalState::ExitedError {
                code: status.code().unwrap_or(-1),
                stderr,
            },
            Err(e) => TerminalState::ExitedError {
                code: -1,
                stderr: format!("{}failed to wait for renderer: {}", stderr, e),
            },
        }
    }
}

/// Read stderr to EOF, keeping at most the last `MAX_STDERR_BYTES`.
async fn collect_stderr(mut stderr: ChildStderr) -> String {
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                collected.extend_from_slice(&buf[..n]);
                if collected.len() > MAX_STDERR_BYTES * 2 {
                    let excess = collected.len() - MAX_STDERR_BYTES;
                    collected.drain(..excess);
                }
            },
            Err(e) => {
                log::debug!("[SESSION] stderr read failed: {}", e);
                break;
            },
        }
    }

    if collected.len() > MAX_STDERR_BYTES {
        let excess = collected.len() - MAX_STDERR_BYTES;
        collected.drain(..excess);
    }

    String::from_utf8_lossy(&collected).into_owned()
}
