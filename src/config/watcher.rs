//! Root-config file watcher for policy reload.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::assets::Assets;

/// Watches the root config file and reassembles the policy on change.
/// A failed reload keeps the current generation.
pub struct ConfigWatcher {
    path: PathBuf,
    assets: Arc<Assets>,
}

impl ConfigWatcher {
    pub fn new(path: PathBuf, assets: Arc<Assets>) -> Self {
        Self { path, assets }
    }

    /// Start watching in a background thread. The returned watcher must be
    /// kept alive for events to keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let assets = self.assets.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, reloading...");
                        match assets.reload() {
                            Ok(()) => tracing::info!("Policy reloaded"),
                            Err(e) => {
                                tracing::error!(
                                    "Failed to reload policy: {}. Keeping current generation.",
                                    e
                                );
                            }
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}
