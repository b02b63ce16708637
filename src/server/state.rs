//! Shared application state handed to every request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::compose::Provisioner;
use crate::config::ServerConfig;

/// Immutable per-server state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

#[derive(Debug)]
struct AppStateInner {
    config: ServerConfig,
    renderer: Option<PathBuf>,
    provisioner: Provisioner,
}

impl AppState {
    /// Build state from a validated config and the resolved renderer binary.
    pub fn new(config: ServerConfig, renderer: Option<PathBuf>) -> Self {
        let provisioner = Provisioner::new(config.temp_dir());
        Self {
            inner: Arc::new(AppStateInner {
                config,
                renderer,
                provisioner,
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn renderer(&self) -> Option<&Path> {
        self.inner.renderer.as_deref()
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.inner.provisioner
    }
}
