//! Wiring of services and background workers.

use crate::services::{
    AuditSink, DeletionScheduler, DeletionWorker, FileService, MultipartService, Reclaimer,
    ReconciliationSweep, spawn_audit_writer,
};
use crate::state::{AppState, TaskRegistry};
use silo_cache::{CacheAside, KvStore, LeaseLock, MemoryKvStore, spawn_reaper};
use silo_core::config::AppConfig;
use silo_metadata::CatalogStore;
use silo_queue::{BrokerOptions, MemoryBroker};
use silo_storage::BlobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for each background task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// A running instance: shared state plus the background tasks behind it.
pub struct Runtime {
    pub state: AppState,
    /// Broker carrying deferred deletion tasks.
    pub deletion_queue: Arc<MemoryBroker>,
    /// Broker carrying audit events, when auditing is enabled.
    pub audit_queue: Option<Arc<MemoryBroker>>,
    cancel: CancellationToken,
}

impl Runtime {
    /// Build the services over the given stores and start the deletion
    /// worker, audit writer, cache reaper, sweep and watchdog.
    pub async fn start(
        config: AppConfig,
        storage: Arc<dyn BlobStore>,
        catalog: Arc<dyn CatalogStore>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let tasks = Arc::new(TaskRegistry::new());
        let broker_options = BrokerOptions::from(&config.queue);

        let memory_kv = MemoryKvStore::new();
        tasks
            .register(
                "cache_reaper",
                spawn_reaper(
                    memory_kv.clone(),
                    config.cache.sweep_interval(),
                    cancel.child_token(),
                ),
            )
            .await;
        let kv: Arc<dyn KvStore> = Arc::new(memory_kv);

        let (deletion_queue, pump) =
            MemoryBroker::start("deletion", broker_options.clone(), cancel.child_token());
        tasks.register("deletion_broker", pump).await;

        let (audit, audit_queue) = if config.audit.enabled {
            let options = BrokerOptions {
                capacity: config.audit.channel_capacity,
                ..broker_options
            };
            let (queue, pump) = MemoryBroker::start("audit", options, cancel.child_token());
            tasks.register("audit_broker", pump).await;
            tasks
                .register(
                    "audit_writer",
                    spawn_audit_writer(queue.clone(), catalog.clone()),
                )
                .await;
            (AuditSink::new(queue.clone()), Some(queue))
        } else {
            tracing::info!("audit logging disabled");
            (AuditSink::disabled(), None)
        };

        let locks = LeaseLock::new(kv.clone());
        let meta = CacheAside::new(kv.clone(), config.cache.file_meta_ttl());
        let reclaimer = Arc::new(Reclaimer::new(
            catalog.clone(),
            storage.clone(),
            locks.clone(),
            meta.clone(),
            config.upload.upload_lock_ttl(),
            config.deletion.grace_period(),
        ));

        let files = Arc::new(FileService::new(
            catalog.clone(),
            storage.clone(),
            locks,
            meta,
            reclaimer.clone(),
            DeletionScheduler::new(deletion_queue.clone(), config.deletion.grace_period()),
            audit.clone(),
            config.upload.upload_lock_ttl(),
        ));
        let multipart = Arc::new(MultipartService::new(
            kv.clone(),
            storage.clone(),
            catalog.clone(),
            files.clone(),
            audit,
            config.upload.clone(),
        ));

        let worker = Arc::new(DeletionWorker::new(reclaimer.clone()));
        tasks
            .register("deletion_worker", worker.spawn(deletion_queue.clone()))
            .await;

        let sweep = Arc::new(ReconciliationSweep::new(
            catalog.clone(),
            reclaimer.clone(),
            config.deletion.grace_period(),
            config.deletion.sweep_batch_size,
        ));
        if config.deletion.sweep_enabled {
            let interval = config.deletion.sweep_interval();
            tasks
                .register(
                    "reconciliation_sweep",
                    sweep.clone().spawn(interval, cancel.child_token()),
                )
                .await;
            tracing::info!(
                interval_secs = interval.as_secs(),
                "reconciliation sweep scheduled"
            );
        } else {
            tracing::info!("reconciliation sweep disabled");
        }

        // the watchdog is not in the registry it watches
        let _watchdog = tasks.clone().spawn_watchdog(cancel.child_token());

        let state = AppState {
            config: Arc::new(config),
            storage,
            catalog,
            kv,
            files,
            multipart,
            reclaimer,
            sweep,
            tasks,
        };
        Self {
            state,
            deletion_queue,
            audit_queue,
            cancel,
        }
    }

    /// Token that stops every background task when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop background work and wait for it to drain.
    ///
    /// Brokers stop first, so workers finish the delivery in hand and then
    /// see their queue close.
    pub async fn shutdown(self) {
        tracing::info!("stopping background tasks");
        self.cancel.cancel();
        self.state.tasks.shutdown(SHUTDOWN_GRACE).await;
        tracing::info!("background tasks stopped");
    }
}
