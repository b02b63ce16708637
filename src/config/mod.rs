//! Service configuration.
//!
//! - `ServerConfig`: listener, asset locations, renderer path, preset geometry
//!   and streaming limits.
//! - `LoggingConfig`: log level and optional rotated log directory.

pub mod server;

pub use server::{ConfigSource, CoverCropConfig, FixedOffsetConfig, LoggingConfig, ServerConfig};
