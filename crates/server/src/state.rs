//! Application state shared across handlers.

use crate::services::{FileService, MultipartService, Reclaimer, ReconciliationSweep};
use silo_cache::KvStore;
use silo_core::config::AppConfig;
use silo_metadata::CatalogStore;
use silo_storage::BlobStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Interval between watchdog checks.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// Registry of long-running background tasks.
///
/// A worker that panics simply stops consuming, which is silent from the
/// outside. The watchdog notices finished handles and reports them so a
/// dead deletion worker or audit writer shows up in logs and metrics.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Track a spawned task under `name`.
    pub async fn register(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        let name = name.into();
        tracing::debug!(task = %name, "background task registered");
        self.tasks.lock().await.insert(name, handle);
    }

    /// Names of tasks that are still tracked.
    pub async fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Spawn a watchdog that checks for exited tasks until `cancel` fires.
    pub fn spawn_watchdog(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(WATCHDOG_INTERVAL) => self.check_tasks().await,
                }
            }
        })
    }

    /// Reap finished tasks and report how they ended.
    pub async fn check_tasks(&self) {
        // collect under the lock, await outside it
        let finished: Vec<(String, JoinHandle<()>)> = {
            let mut tasks = self.tasks.lock().await;
            let names: Vec<String> = tasks
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(name, _)| name.clone())
                .collect();
            names
                .into_iter()
                .filter_map(|name| tasks.remove(&name).map(|handle| (name, handle)))
                .collect()
        };

        for (name, handle) in finished {
            match handle.await {
                Ok(()) => tracing::warn!(task = %name, "background task exited"),
                Err(join_err) if join_err.is_panic() => {
                    crate::metrics::BACKGROUND_TASK_PANICS
                        .with_label_values(&[name.as_str()])
                        .inc();
                    tracing::error!(task = %name, panic = ?join_err, "background task panicked");
                }
                Err(join_err) if join_err.is_cancelled() => {
                    tracing::warn!(task = %name, "background task was cancelled");
                }
                Err(e) => {
                    tracing::error!(task = %name, error = ?e, "background task failed");
                }
            }
        }
    }

    /// Wait up to `grace` for every task to finish, aborting stragglers.
    pub async fn shutdown(&self, grace: Duration) {
        let tasks: Vec<(String, JoinHandle<()>)> = self.tasks.lock().await.drain().collect();
        for (name, mut handle) in tasks {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(task = %name, "background task stopped"),
                Ok(Err(e)) => tracing::warn!(task = %name, error = ?e, "background task ended abnormally"),
                Err(_) => {
                    tracing::warn!(task = %name, "background task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn BlobStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub kv: Arc<dyn KvStore>,
    pub files: Arc<FileService>,
    pub multipart: Arc<MultipartService>,
    pub reclaimer: Arc<Reclaimer>,
    pub sweep: Arc<ReconciliationSweep>,
    pub tasks: Arc<TaskRegistry>,
}
