//! Configuration hot-reload watcher.
//!
//! ## Responsibility
//! Watch a TOML config file for changes and broadcast validated new configs
//! to subscribers. Invalid reloads are logged and rejected; the running
//! orchestrator keeps its current settings.
//!
//! ## Guarantees
//! - Only validated configs are broadcast
//! - Bursts of file events (editors writing in several steps) collapse into
//!   one reload after a quiet period
//! - Subscribers receive the new config via a `broadcast` channel
//!
//! ## NOT Responsible For
//! - Applying the config (see `Orchestrator::follow_config`)
//! - Initial config loading (that belongs to `loader`)

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::loader::load_from_file;
use super::validation::ConfigError;
use super::OrchestratorConfig;

/// Quiet period after the last file event before the file is re-read.
const DEBOUNCE: Duration = Duration::from_millis(300);

/// Watches a config file and broadcasts validated [`OrchestratorConfig`]s.
///
/// Dropping the watcher stops file watching and the reload task.
pub struct ConfigWatcher {
    tx: broadcast::Sender<Arc<OrchestratorConfig>>,
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Start watching `path`.
    ///
    /// The initial config is **not** broadcast; use
    /// [`load_from_file`] for the initial load. Must be called from within a
    /// Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file watcher cannot be created or
    /// the parent directory cannot be watched.
    pub fn new(
        path: PathBuf,
    ) -> Result<(Self, broadcast::Receiver<Arc<OrchestratorConfig>>), ConfigError> {
        let (tx, rx) = broadcast::channel(8);
        let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Event>();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = event_tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| io_error(&path, e))?;

        // Atomic-save editors replace the file, so watch its directory.
        let watch_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| io_error(&watch_dir, e))?;

        let task = tokio::spawn(reload_loop(path, event_rx, tx.clone()));

        Ok((
            Self {
                tx,
                _watcher: watcher,
                task,
            },
            rx,
        ))
    }

    /// Subscribe to config change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<OrchestratorConfig>> {
        self.tx.subscribe()
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn io_error(path: &Path, e: notify::Error) -> ConfigError {
    ConfigError::Io {
        file: path.display().to_string(),
        source: std::io::Error::other(e.to_string()),
    }
}

fn touches(event: &notify::Event, path: &Path) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event.paths.iter().any(|p| p.file_name() == path.file_name())
}

async fn reload_loop(
    path: PathBuf,
    mut events: mpsc::UnboundedReceiver<notify::Event>,
    tx: broadcast::Sender<Arc<OrchestratorConfig>>,
) {
    while let Some(event) = events.recv().await {
        if !touches(&event, &path) {
            continue;
        }

        // Swallow the rest of the burst.
        loop {
            match tokio::time::timeout(DEBOUNCE, events.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        match load_from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    path = %path.display(),
                    policy = %config.dwa.policy,
                    strategy = %config.orchestration.routing_strategy,
                    "config reloaded"
                );
                let _ = tx.send(Arc::new(config));
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "config reload rejected, keeping current config"
                );
            }
        }
    }
}
