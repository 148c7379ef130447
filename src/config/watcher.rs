//! Configuration file watcher for hot reload.
//!
//! Editors usually fire several events per save, so a reload only goes
//! out when the file text actually changed. Rule tables are compiled on
//! the watcher side: a config with a bad pattern never reaches the proxy.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ActiveConfig, ConfigError};

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ActiveConfig>,
}

/// Turns the current file contents into a compiled config, once per
/// distinct text.
#[derive(Debug)]
struct Reloader {
    path: PathBuf,
    last_text: Option<String>,
}

impl Reloader {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            last_text: fs::read_to_string(path).ok(),
        }
    }

    /// `Ok(None)` when the text is the one already active.
    fn reload(&mut self) -> Result<Option<ActiveConfig>, ConfigError> {
        let text = fs::read_to_string(&self.path).map_err(ConfigError::Io)?;
        if self.last_text.as_deref() == Some(text.as_str()) {
            return Ok(None);
        }
        let active = ActiveConfig::compile(parse_config(&text)?)?;
        self.last_text = Some(text);
        Ok(Some(active))
    }
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for compiled configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ActiveConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let mut reloader = Reloader::new(&self.path);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => match reloader.reload() {
                    Ok(Some(active)) => {
                        tracing::info!(
                            path = ?reloader.path,
                            forward_rules = active.forward.len(),
                            action_rules = active.actions.len(),
                            filters = active.filters.len(),
                            "Config file changed, new rules compiled"
                        );
                        let _ = tx.send(active);
                    }
                    Ok(None) => tracing::debug!(path = ?reloader.path, "Config file touched but unchanged"),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                    }
                },
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}
