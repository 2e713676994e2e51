// src/worker.rs

use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::downloader::{DownloadError, ProgressSink, TransferExecutor};
use crate::install;
use crate::models::{temporary_path, DownloadItem, TransferProgress};
use crate::state::{Shared, SharedState, WorkerHandle, WorkerSlot};

/// State shared between the manager facade and its worker task.
pub(crate) struct WorkerCore {
    pub shared: Shared,
    /// Held while a state change is fanned out to listeners, so listeners see
    /// events in the order the state changed. Re-entrant so a listener can
    /// call back into the manager from its callback.
    pub dispatch: ReentrantMutex<()>,
    pub executor: Arc<dyn TransferExecutor>,
    pub config: ManagerConfig,
}

impl WorkerCore {
    /// Start a worker for the current queue. Caller holds the state lock and
    /// has checked that the slot is idle.
    pub fn spawn(self: &Arc<Self>, state: &mut SharedState, runtime: &Handle) {
        debug_assert!(state.worker.is_idle());
        state.activations += 1;
        let id = state.activations;
        let stop = CancellationToken::new();
        let join = runtime.spawn(self.clone().run(id, stop.clone()));
        state.worker = WorkerSlot::Running(WorkerHandle { id, stop, join });
        tracing::debug!(worker = id, queued = state.queue.len(), "worker started");
    }

    async fn run(self: Arc<Self>, id: u64, stop: CancellationToken) {
        loop {
            let item = {
                let mut state = self.shared.lock();
                if stop.is_cancelled() {
                    // Whoever stopped us owns the slot and the current item.
                    break;
                }
                let Some(item) = state.queue.front().cloned() else {
                    if state.worker.is_running(id) {
                        state.worker = WorkerSlot::Idle;
                    }
                    tracing::debug!(worker = id, "queue drained, worker idle");
                    return;
                };
                debug_assert_eq!(state.progress, TransferProgress::INACTIVE);
                state.progress = TransferProgress::STARTED;
                item
            };

            tracing::info!(
                destination = %item.destination.display(),
                source = %item.source,
                "download started"
            );
            let result = self.transfer(&item, &stop).await;
            match &result {
                Ok(()) => {
                    tracing::info!(destination = %item.destination.display(), "download complete")
                }
                Err(DownloadError::Cancelled) => {
                    tracing::info!(destination = %item.destination.display(), "download cancelled")
                }
                Err(e) => tracing::warn!(
                    destination = %item.destination.display(),
                    error = %e,
                    "download failed"
                ),
            }

            self.finish(&item, result.is_ok());
        }
        tracing::debug!(worker = id, "worker stopped");
    }

    /// Download into the temporary sibling, then rename it over the target.
    async fn transfer(
        &self,
        item: &DownloadItem,
        stop: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let final_path = self
            .config
            .resolve(&item.destination)
            .ok_or_else(|| DownloadError::InvalidDestination(item.destination.clone()))?;
        let temp_path = temporary_path(&final_path, &self.config.temp_suffix);

        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        install::discard(&temp_path).await?;

        let sink = ProgressSink::new(self.shared.clone());
        let mut result = self
            .executor
            .download(&item.source, &temp_path, &sink, stop)
            .await;
        drop(sink);

        // A stop that lands after the last byte still wins over the install.
        if result.is_ok() && stop.is_cancelled() {
            result = Err(DownloadError::Cancelled);
        }
        if result.is_ok() {
            result = install::install(&temp_path, &final_path).await;
            if result.is_ok() {
                tracing::debug!(path = %final_path.display(), "installed");
            }
        }

        if result.is_err() {
            if let Err(e) = install::discard(&temp_path).await {
                tracing::warn!(path = %temp_path.display(), error = %e, "could not remove partial file");
            }
        }
        result
    }

    /// Pop the finished item and tell listeners.
    fn finish(&self, item: &DownloadItem, success: bool) {
        let _dispatch = self.dispatch.lock();
        let listeners = {
            let mut state = self.shared.lock();
            state.progress = TransferProgress::INACTIVE;
            let at_front = state
                .queue
                .front()
                .is_some_and(|front| front.matches(&item.destination));
            if at_front {
                state.queue.pop_front();
                Some(state.listeners.snapshot())
            } else {
                tracing::error!(
                    destination = %item.destination.display(),
                    "finished item is no longer at the front of the queue"
                );
                None
            }
        };
        if let Some(listeners) = listeners {
            listeners.complete(&item.destination, success);
        }
    }
}

