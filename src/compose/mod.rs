//! Composite rendering pipeline.
//!
//! Leaf-first: `provision` resolves input files, `filter_graph` builds the
//! renderer argv, `session` owns the renderer process, `bridge` relays its
//! stdout into the HTTP body and `cleanup` removes temporary inputs.

pub mod bridge;
pub mod cleanup;
pub mod ffmpeg;
pub mod filter_graph;
pub mod provision;
pub mod session;

pub use bridge::{BridgeReport, OutputStream, StreamBridge, StreamOutcome, TerminalLatch};
pub use cleanup::{CleanupCoordinator, TemporaryAsset};
pub use ffmpeg::{find_ffmpeg, resolve_ffmpeg};
pub use filter_graph::{build_renderer_args, CompositionMode, CompositionPreset};
pub use provision::{BackgroundSource, CompositionRequest, ProvisionedInputs, Provisioner};
pub use session::{ProcessSession, RenderCommand, TerminalState};
