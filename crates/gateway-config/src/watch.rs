//! Hot-reloadable config snapshot.
//!
//! The gateway's in-process caches (global rate-limit defaults, dept overrides) must be
//! safe to read concurrently while being replaced on a 60s refresh or a file-change
//! notification. `ConfigHandle` wraps the current `GatewayConfig` behind an
//! `arc_swap::ArcSwap`, so readers always see a complete, immutable snapshot and a
//! reload is a single atomic pointer swap.

use crate::error::ConfigError;
use crate::settings::GatewayConfig;
use arc_swap::ArcSwap;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A cheaply-cloneable handle to the current configuration snapshot.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<GatewayConfig>>,
}

impl ConfigHandle {
    /// Wrap an initial configuration.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Borrow the current snapshot without blocking any concurrent reload.
    #[must_use]
    pub fn current(&self) -> Arc<GatewayConfig> {
        self.inner.load_full()
    }

    /// Replace the snapshot with a freshly loaded and validated configuration.
    pub fn swap(&self, config: GatewayConfig) {
        self.inner.store(Arc::new(config));
    }

    /// Reload from `path`, validating before swapping. The previous snapshot is left in
    /// place if the reload fails, so a bad edit never disrupts in-flight requests.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or fails validation.
    pub fn reload_from(&self, path: &Path) -> Result<(), ConfigError> {
        let config = crate::loader::load(Some(path))?;
        self.swap(config);
        Ok(())
    }
}

/// Watches `path` for changes and reloads the handle whenever the file is written.
///
/// Reload failures are logged and otherwise ignored: the previous snapshot remains
/// active until a subsequent edit parses and validates cleanly.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `path`, reloading `handle` on every filesystem event.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the underlying filesystem watcher fails to start.
    pub fn spawn(path: impl Into<PathBuf>, handle: ConfigHandle) -> Result<Self, ConfigError> {
        let path = path.into();
        let watch_path = path.clone();

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            let Ok(event) = event else {
                return;
            };
            if !event.kind.is_modify() && !event.kind.is_create() {
                return;
            }
            match handle.reload_from(&path) {
                Ok(()) => tracing::info!(path = %path.display(), "configuration reloaded"),
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "configuration reload failed, keeping previous snapshot"),
            }
        })
        .map_err(|err| ConfigError::validation(format!("failed to start config watcher: {err}")))?;

        watcher
            .watch(&watch_path, RecursiveMode::NonRecursive)
            .map_err(|err| ConfigError::validation(format!("failed to watch {}: {err}", watch_path.display())))?;

        Ok(Self { _watcher: watcher })
    }
}
