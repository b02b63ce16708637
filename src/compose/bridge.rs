//! Renderer-to-HTTP streaming bridge.
//!
//! `StreamBridge` is the only writer of the outbound stream. It relays
//! renderer stdout chunks in order over a bounded channel, then decides the
//! stream's single terminal outcome through a `TerminalLatch`:
//!
//! - exit 0: the stream ends cleanly
//! - non-zero exit: one error item, then the stream ends
//! - spawn failure: one error item, no chunks
//! - consumer gone: the renderer is killed and nothing else is sent
//!
//! Cleanup of temporary assets runs before the terminal item is delivered.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::cleanup::CleanupCoordinator;
use super::session::{ProcessSession, RenderCommand, TerminalState};
use crate::error::{CompositeError, CompositeResult};

type StreamItem = Result<Bytes, CompositeError>;

/// Terminal outcome of an outbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamOutcome {
    /// Renderer exited 0; stream ended cleanly.
    Completed = 1,
    /// Renderer exited non-zero; stream ended with an error.
    RendererFailed = 2,
    /// Renderer never started; stream ended with an error.
    SpawnFailed = 3,
    /// Consumer went away; renderer killed.
    Cancelled = 4,
}

impl StreamOutcome {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(StreamOutcome::Completed),
            2 => Some(StreamOutcome::RendererFailed),
            3 => Some(StreamOutcome::SpawnFailed),
            4 => Some(StreamOutcome::Cancelled),
            _ => None,
        }
    }
}

/// First-terminal-event-wins latch backed by a single atomic.
#[derive(Debug, Default)]
pub struct TerminalLatch {
    state: AtomicU8,
}

impl TerminalLatch {
    const RUNNING: u8 = 0;

    pub fn new() -> Self {
        Self::default()
    }

    /// Record `outcome` if no outcome was recorded yet. Returns true if it won.
    pub fn try_terminate(&self, outcome: StreamOutcome) -> bool {
        self.state
            .compare_exchange(
                Self::RUNNING,
                outcome as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.load(Ordering::Acquire) != Self::RUNNING
    }

    pub fn outcome(&self) -> Option<StreamOutcome> {
        StreamOutcome::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Consumer side of the bridge: byte chunks, then end or a single error.
pub struct OutputStream {
    rx: mpsc::Receiver<StreamItem>,
}

impl OutputStream {
    /// Wrap as a streaming HTTP body.
    pub fn into_body(self) -> Body {
        Body::from_stream(self)
    }
}

impl Stream for OutputStream {
    type Item = StreamItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Summary of a finished relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeReport {
    pub outcome: StreamOutcome,
    pub chunks: usize,
    pub bytes: usize,
    pub dropped: usize,
}

/// What the relay loop saw next.
enum Step {
    Chunk(Bytes),
    ReadFailed(io::Error),
    Eof,
    Cancelled,
}

/// Producer side of the bridge.
pub struct StreamBridge {
    tx: mpsc::Sender<StreamItem>,
    latch: Arc<TerminalLatch>,
    cleanup: CleanupCoordinator,
    chunks: usize,
    bytes: usize,
    dropped: usize,
}

impl StreamBridge {
    /// Create a bridge buffering at most `capacity` chunks ahead of the consumer.
    pub fn new(capacity: usize, cleanup: CleanupCoordinator) -> (Self, OutputStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let bridge = Self {
            tx,
            latch: Arc::new(TerminalLatch::new()),
            cleanup,
            chunks: 0,
            bytes: 0,
            dropped: 0,
        };
        (bridge, OutputStream { rx })
    }

    pub fn latch(&self) -> Arc<TerminalLatch> {
        Arc::clone(&self.latch)
    }

    /// Spawn the renderer and relay it on a background task.
    ///
    /// A spawn failure is latched and cleaned up here, delivered to the
    /// stream, and also returned so the caller can answer before streaming.
    pub async fn launch(
        self,
        command: &RenderCommand,
        chunk_size: usize,
    ) -> CompositeResult<JoinHandle<BridgeReport>> {
        match ProcessSession::spawn(command, chunk_size) {
            Ok(session) => Ok(tokio::spawn(self.relay(session))),
            Err(e) => {
                log::error!(
                    "[BRIDGE] Failed to start {}: {}",
                    command.program.display(),
                    e
                );
                let stream_err = io::Error::new(e.kind(), e.to_string());
                self.finish(TerminalState::SpawnFailed(stream_err)).await;
                Err(CompositeError::SpawnFailed(e))
            },
        }
    }

    /// Relay stdout until EOF, then latch the exit outcome.
    async fn relay(mut self, mut session: ProcessSession) -> BridgeReport {
        let pid = session.pid();

        loop {
            let step = tokio::select! {
                biased;
                _ = self.tx.closed() => Step::Cancelled,
                chunk = session.next_chunk() => match chunk {
                    Some(Ok(bytes)) => Step::Chunk(bytes),
                    Some(Err(e)) => Step::ReadFailed(e),
                    None => Step::Eof,
                },
            };

            match step {
                Step::Chunk(bytes) => {
                    if !self.emit(bytes).await {
                        return self.cancel(session).await;
                    }
                },
                Step::ReadFailed(e) => return self.abort_read(session, e).await,
                Step::Eof => break,
                Step::Cancelled => return self.cancel(session).await,
            }
        }

        let state = tokio::select! {
            biased;
            _ = self.tx.closed() => None,
            state = session.wait() => Some(state),
        };

        let report = match state {
            Some(state) => self.finish(state).await,
            None => self.cancel(session).await,
        };

        log::info!(
            "[BRIDGE] Renderer pid {:?} finished: {:?}, {} bytes in {} chunks",
            pid,
            report.outcome,
            report.bytes,
            report.chunks
        );
        report
    }

    /// Forward one chunk. Returns false once the consumer is gone.
    async fn emit(&mut self, chunk: Bytes) -> bool {
        if self.latch.is_terminated() {
            self.dropped += 1;
            log::debug!("[BRIDGE] Dropping {} byte chunk after terminal state", chunk.len());
            return true;
        }

        let len = chunk.len();
        match self.tx.send(Ok(chunk)).await {
            Ok(()) => {
                self.chunks += 1;
                self.bytes += len;
                true
            },
            Err(_) => {
                self.dropped += 1;
                false
            },
        }
    }

    /// Consumer disconnected: kill and reap the renderer.
    async fn cancel(self, mut session: ProcessSession) -> BridgeReport {
        log::info!(
            "[BRIDGE] Consumer closed the stream, killing renderer pid {:?}",
            session.pid()
        );
        session.kill();
        let _ = session.wait().await;
        self.terminate(StreamOutcome::Cancelled, None).await
    }

    /// Stdout broke mid-render: the frame is incomplete even if the renderer exits 0.
    async fn abort_read(self, mut session: ProcessSession, error: io::Error) -> BridgeReport {
        log::warn!(
            "[BRIDGE] stdout read failed for pid {:?}: {}",
            session.pid(),
            error
        );
        session.kill();
        let _ = session.wait().await;
        self.terminate(
            StreamOutcome::RendererFailed,
            Some(CompositeError::OutputReadFailed(error)),
        )
        .await
    }

    async fn finish(self, state: TerminalState) -> BridgeReport {
        match state {
            TerminalState::ExitedOk => self.terminate(StreamOutcome::Completed, None).await,
            TerminalState::ExitedError { code, stderr } => {
                log::debug!("[BRIDGE] Renderer stderr:\n{}", stderr);
                self.terminate(
                    StreamOutcome::RendererFailed,
                    Some(CompositeError::RendererFailed { code, stderr }),
                )
                .await
            },
            TerminalState::SpawnFailed(e) => {
                self.terminate(StreamOutcome::SpawnFailed, Some(CompositeError::SpawnFailed(e)))
                    .await
            },
        }
    }

    /// Latch, clean up, deliver the terminal item, then drop the sender.
    async fn terminate(self, outcome: StreamOutcome, error: Option<CompositeError>) -> BridgeReport {
        if self.latch.try_terminate(outcome) {
            self.cleanup.run().await;

            if let Some(err) = error {
                log::warn!("[BRIDGE] Stream terminated with error: {}", err);
                // Consumer may already be gone
                let _ = self.tx.send(Err(err)).await;
            }
        } else {
            log::debug!(
                "[BRIDGE] Ignoring {:?}, stream already {:?}",
                outcome,
                self.latch.outcome()
            );
        }

        BridgeReport {
            outcome: self.latch.outcome().unwrap_or(outcome),
            chunks: self.chunks,
            bytes: self.bytes,
            dropped: self.dropped,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::compose::cleanup::TemporaryAsset;
    use futures::StreamExt;
    use std::path::PathBuf;
    use std::time::Duration;

    fn shell(script: &str) -> RenderCommand {
        RenderCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    /// Collect the whole stream: data bytes, then the terminal error if any.
    async fn collect(mut output: OutputStream) -> (Vec<u8>, Option<CompositeError>, usize) {
        let mut data = Vec::new();
        let mut error = None;
        let mut items_after_error = 0;

        while let Some(item) = output.next().await {
            match item {
                Ok(bytes) if error.is_none() => data.extend_from_slice(&bytes),
                Ok(_) => items_after_error += 1,
                Err(e) if error.is_none() => error = Some(e),
                Err(_) => items_after_error += 1,
            }
        }

        (data, error, items_after_error)
    }

    fn tracked_temp(dir: &tempfile::TempDir) -> (CleanupCoordinator, PathBuf) {
        let path = dir.path().join("bg-test.png");
        std::fs::write(&path, b"bg").unwrap();
        let cleanup = CleanupCoordinator::new();
        cleanup.register(TemporaryAsset::new(path.clone()));
        (cleanup, path)
    }

    #[test]
    fn test_latch_first_wins() {
        let latch = TerminalLatch::new();
        assert!(!latch.is_terminated());
        assert_eq!(latch.outcome(), None);

        assert!(latch.try_terminate(StreamOutcome::Completed));
        assert!(!latch.try_terminate(StreamOutcome::RendererFailed));
        assert!(!latch.try_terminate(StreamOutcome::Cancelled));

        assert!(latch.is_terminated());
        assert_eq!(latch.outcome(), Some(StreamOutcome::Completed));
    }

    #[test]
    fn test_latch_concurrent_terminations() {
        let latch = Arc::new(TerminalLatch::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let latch = Arc::clone(&latch);
                std::thread::spawn(move || {
                    let outcome = if i % 2 == 0 {
                        StreamOutcome::Completed
                    } else {
                        StreamOutcome::RendererFailed
                    };
                    latch.try_terminate(outcome)
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_success_streams_bytes_and_cleans_up() {
        let dir = tempfile::TempDir::new().unwrap();
        let (cleanup, temp) = tracked_temp(&dir);
        let (bridge, output) = StreamBridge::new(4, cleanup);
        let latch = bridge.latch();

        let task = bridge
            .launch(&shell("printf '\\211PNG-stub'"), 4096)
            .await
            .unwrap();

        let (data, error, extra) = collect(output).await;
        assert_eq!(data, b"\x89PNG-stub");
        assert!(error.is_none());
        assert_eq!(extra, 0);
        assert!(!temp.exists());

        let report = task.await.unwrap();
        assert_eq!(report.outcome, StreamOutcome::Completed);
        assert_eq!(report.bytes, 9);
        assert_eq!(latch.outcome(), Some(StreamOutcome::Completed));
    }

    #[tokio::test]
    async fn test_exit_zero_without_output_ends_cleanly() {
        let (bridge, output) = StreamBridge::new(4, CleanupCoordinator::new());
        let task = bridge.launch(&shell("exit 0"), 4096).await.unwrap();

        let (data, error, _) = collect(output).await;
        assert!(data.is_empty());
        assert!(error.is_none());
        assert_eq!(task.await.unwrap().outcome, StreamOutcome::Completed);
    }

    #[tokio::test]
    async fn test_renderer_failure_errors_stream() {
        let dir = tempfile::TempDir::new().unwrap();
        let (cleanup, temp) = tracked_temp(&dir);
        let (bridge, output) = StreamBridge::new(4, cleanup);

        let task = bridge
            .launch(&shell("printf 'partial'; echo 'Invalid filter' >&2; exit 1"), 4096)
            .await
            .unwrap();

        let (data, error, extra) = collect(output).await;
        assert_eq!(data, b"partial");
        assert_eq!(extra, 0);
        let message = error.expect("stream should error").to_string();
        assert!(message.starts_with("renderer failed with code 1: "));
        assert!(message.contains("Invalid filter"));
        assert!(!temp.exists());

        assert_eq!(task.await.unwrap().outcome, StreamOutcome::RendererFailed);
    }

    #[tokio::test]
    async fn test_spawn_failure_errors_stream_and_cleans_up() {
        let dir = tempfile::TempDir::new().unwrap();
        let (cleanup, temp) = tracked_temp(&dir);
        let (bridge, output) = StreamBridge::new(4, cleanup);
        let latch = bridge.latch();

        let command = RenderCommand {
            program: dir.path().join("no-such-renderer"),
            args: vec![],
        };
        let err = bridge.launch(&command, 4096).await.unwrap_err();
        assert!(matches!(err, CompositeError::SpawnFailed(_)));
        assert!(!temp.exists());
        assert_eq!(latch.outcome(), Some(StreamOutcome::SpawnFailed));

        let (data, error, extra) = collect(output).await;
        assert!(data.is_empty());
        assert!(matches!(error, Some(CompositeError::SpawnFailed(_))));
        assert_eq!(extra, 0);
    }

    #[tokio::test]
    async fn test_chunks_preserve_order_under_backpressure() {
        let (bridge, output) = StreamBridge::new(1, CleanupCoordinator::new());
        let task = bridge.launch(&shell("seq 1 20000"), 4096).await.unwrap();

        let (data, error, _) = collect(output).await;
        assert!(error.is_none());

        let expected: String = (1..=20000).map(|i| format!("{}\n", i)).collect();
        assert_eq!(String::from_utf8(data).unwrap(), expected);

        let report = task.await.unwrap();
        assert!(report.chunks > 1);
        assert_eq!(report.bytes, expected.len());
    }

    #[tokio::test]
    async fn test_consumer_disconnect_kills_renderer() {
        let dir = tempfile::TempDir::new().unwrap();
        let (cleanup, temp) = tracked_temp(&dir);
        let (bridge, mut output) = StreamBridge::new(1, cleanup);
        let latch = bridge.latch();

        let task = bridge.launch(&shell("exec yes"), 4096).await.unwrap();

        let first = output.next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        drop(output);

        let report = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("relay should stop after disconnect")
            .unwrap();
        assert_eq!(report.outcome, StreamOutcome::Cancelled);
        assert_eq!(latch.outcome(), Some(StreamOutcome::Cancelled));
        assert!(!temp.exists());
    }

    /// An asset `remove_file` cannot delete: a non-empty directory.
    fn unremovable_asset(dir: &tempfile::TempDir) -> (CleanupCoordinator, PathBuf) {
        let path = dir.path().join("bg-stuck");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("inner"), b"x").unwrap();
        let cleanup = CleanupCoordinator::new();
        cleanup.register(TemporaryAsset::new(path.clone()));
        (cleanup, path)
    }

    #[tokio::test]
    async fn test_cleanup_failure_keeps_clean_completion() {
        let dir = tempfile::TempDir::new().unwrap();
        let (cleanup, stuck) = unremovable_asset(&dir);
        let (bridge, output) = StreamBridge::new(4, cleanup.clone());

        let task = bridge.launch(&shell("printf abc"), 4096).await.unwrap();

        let (data, error, extra) = collect(output).await;
        assert_eq!(data, b"abc");
        assert!(error.is_none());
        assert_eq!(extra, 0);

        let report = task.await.unwrap();
        assert_eq!(report.outcome, StreamOutcome::Completed);
        assert_eq!(report.bytes, 3);
        assert!(stuck.exists());
        assert_eq!(cleanup.pending(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_failure_keeps_renderer_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let (cleanup, stuck) = unremovable_asset(&dir);
        let (bridge, output) = StreamBridge::new(4, cleanup);

        let task = bridge
            .launch(&shell("echo 'No such filter' >&2; exit 1"), 4096)
            .await
            .unwrap();

        let (data, error, _) = collect(output).await;
        assert!(data.is_empty());
        assert_eq!(
            error.expect("stream should error").to_string(),
            "renderer failed with code 1: No such filter\n"
        );
        assert_eq!(task.await.unwrap().outcome, StreamOutcome::RendererFailed);
        assert!(stuck.exists());
    }

    #[tokio::test]
    async fn test_stdout_read_error_fails_stream() {
        let dir = tempfile::TempDir::new().unwrap();
        let (cleanup, temp) = tracked_temp(&dir);
        let (bridge, output) = StreamBridge::new(4, cleanup);
        let latch = bridge.latch();

        let session = ProcessSession::spawn(&shell("sleep 30"), 4096).unwrap();
        let broken = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let report = tokio::time::timeout(Duration::from_secs(10), bridge.abort_read(session, broken))
            .await
            .expect("renderer should be killed");
        assert_eq!(report.outcome, StreamOutcome::RendererFailed);
        assert_eq!(latch.outcome(), Some(StreamOutcome::RendererFailed));
        assert!(!temp.exists());

        let (_, error, extra) = collect(output).await;
        let error = error.expect("stream should error");
        assert!(matches!(error, CompositeError::OutputReadFailed(_)));
        assert!(error.to_string().contains("pipe closed"));
        assert_eq!(extra, 0);
    }

    #[tokio::test]
    async fn test_terminal_state_is_latched_once() {
        let (bridge, output) = StreamBridge::new(4, CleanupCoordinator::new());
        let latch = bridge.latch();
        assert!(latch.try_terminate(StreamOutcome::Completed));

        // A later failure must not reach the consumer
        let report = bridge
            .finish(TerminalState::ExitedError {
                code: 2,
                stderr: "late".to_string(),
            })
            .await;
        assert_eq!(report.outcome, StreamOutcome::Completed);

        let (_, error, extra) = collect(output).await;
        assert!(error.is_none());
        assert_eq!(extra, 0);
    }
}
