// src/manager.rs

use crate::config::ManagerConfig;
use crate::downloader::{DownloadError, HttpExecutor, TransferExecutor};
use crate::listener::DownloadListener;
use crate::models::{DownloadItem, QueueEntry, TransferProgress};
use crate::queue::QueuePosition;
use crate::state::{Lifecycle, SharedState, WorkerSlot};
use crate::worker::WorkerCore;
use parking_lot::{Mutex, ReentrantMutex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("download manager is not initialised")]
    NotInitialised,
    #[error("download manager is already initialised")]
    AlreadyInitialised,
    #[error("download manager is shutting down")]
    ShuttingDown,
    #[error("{0:?} is already queued")]
    AlreadyQueued(PathBuf),
    #[error("destination {0:?} is outside the download root")]
    InvalidDestination(PathBuf),
    #[error("listener is already registered")]
    ListenerAlreadyRegistered,
    #[error("listener is not registered")]
    ListenerNotRegistered,
    #[error("initialise must be called from within a tokio runtime")]
    NoRuntime,
    #[error("executor setup failed: {0}")]
    Executor(#[from] DownloadError),
}

/// What one step of `cancel` left to do.
#[derive(Debug, PartialEq, Eq)]
enum CancelStep {
    Done,
    Current,
}

/// Sequential download queue with a single background worker.
///
/// Create it, call [`initialise`](Self::initialise) from inside a tokio
/// runtime, and share it by `Arc`. The synchronous methods may then be called
/// from any thread, including threads outside the runtime.
pub struct DownloadManager {
    core: Arc<WorkerCore>,
    // Serializes the operations that stop and join the worker.
    control: tokio::sync::Mutex<()>,
}

impl DownloadManager {
    pub fn new(config: ManagerConfig, executor: Arc<dyn TransferExecutor>) -> Self {
        Self {
            core: Arc::new(WorkerCore {
                shared: Arc::new(Mutex::new(SharedState::default())),
                dispatch: ReentrantMutex::new(()),
                executor,
                config,
            }),
            control: tokio::sync::Mutex::new(()),
        }
    }

    /// A manager backed by the reqwest executor configured from `config.http`.
    pub fn with_http(config: ManagerConfig) -> Result<Self, ManagerError> {
        let executor = HttpExecutor::new(&config.http)?;
        Ok(Self::new(config, Arc::new(executor)))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.core.config
    }

    pub fn initialise(&self) -> Result<(), ManagerError> {
        let mut state = self.core.shared.lock();
        if state.lifecycle != Lifecycle::Uninitialised {
            return Err(self.misuse(ManagerError::AlreadyInitialised));
        }
        let runtime = Handle::try_current().map_err(|_| ManagerError::NoRuntime)?;
        state.runtime = Some(runtime);
        state.lifecycle = Lifecycle::Running;
        tracing::info!(
            root = %self.core.config.download_root.display(),
            "download manager initialised"
        );
        Ok(())
    }

    /// Ask the worker to stop without waiting for it. New downloads are
    /// refused from here on; finish with [`deinitialise`](Self::deinitialise).
    pub fn begin_deinitialise(&self) -> Result<(), ManagerError> {
        let mut state = self.core.shared.lock();
        match state.lifecycle {
            Lifecycle::Uninitialised => return Err(self.misuse(ManagerError::NotInitialised)),
            Lifecycle::ShuttingDown => return Ok(()),
            Lifecycle::Running => {}
        }
        state.lifecycle = Lifecycle::ShuttingDown;
        if let WorkerSlot::Running(handle) = &state.worker {
            handle.stop.cancel();
        }
        tracing::info!("download manager shutting down");
        Ok(())
    }

    /// Stop the worker, wait for it to exit, and drop all queued items.
    ///
    /// The in-flight transfer, if any, is aborted and reported to listeners
    /// as failed. Items still waiting are discarded without notification.
    pub async fn deinitialise(&self) -> Result<(), ManagerError> {
        let _control = self.control.lock().await;

        let handle = {
            let mut state = self.core.shared.lock();
            if state.lifecycle == Lifecycle::Uninitialised {
                return Err(self.misuse(ManagerError::NotInitialised));
            }
            state.lifecycle = Lifecycle::ShuttingDown;
            state.worker.begin_stop()
        };

        if let Some(handle) = handle {
            handle.stop.cancel();
            if let Err(e) = handle.join.await {
                tracing::error!(error = %e, "download worker ended abnormally");
            }
        }

        let discarded = {
            let mut state = self.core.shared.lock();
            state.worker = WorkerSlot::Idle;
            state.progress = TransferProgress::INACTIVE;
            state.listeners.clear();
            state.runtime = None;
            state.lifecycle = Lifecycle::Uninitialised;
            state.queue.clear()
        };
        tracing::info!(discarded, "download manager deinitialised");
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.core.shared.lock().lifecycle == Lifecycle::Running
    }

    /// Whether a worker task is currently active.
    pub fn is_busy(&self) -> bool {
        !self.core.shared.lock().worker.is_idle()
    }

    /// Number of worker tasks started so far.
    pub fn activations(&self) -> u64 {
        self.core.shared.lock().activations
    }

    pub fn add_listener(&self, listener: Arc<dyn DownloadListener>) -> Result<(), ManagerError> {
        let mut state = self.core.shared.lock();
        self.ensure_initialised(&state)?;
        if !state.listeners.add(listener) {
            return Err(self.misuse(ManagerError::ListenerAlreadyRegistered));
        }
        Ok(())
    }

    pub fn remove_listener(&self, listener: &Arc<dyn DownloadListener>) -> Result<(), ManagerError> {
        let mut state = self.core.shared.lock();
        self.ensure_initialised(&state)?;
        if !state.listeners.remove(listener) {
            return Err(self.misuse(ManagerError::ListenerNotRegistered));
        }
        Ok(())
    }

    /// Consistent view of the queue; only the first entry can be active.
    pub fn snapshot(&self) -> Result<Vec<QueueEntry>, ManagerError> {
        let state = self.core.shared.lock();
        self.ensure_initialised(&state)?;
        Ok(state.queue.snapshot(state.progress))
    }

    /// Replay `on_download_added` for every queued item to `listener`.
    pub fn enumerate(&self, listener: &dyn DownloadListener) -> Result<(), ManagerError> {
        let _dispatch = self.core.dispatch.lock();
        let entries = self.snapshot()?;
        for entry in &entries {
            listener.on_download_added(&entry.destination, entry.progress);
        }
        Ok(())
    }

    /// Append a download to the queue and wake the worker if it is idle.
    pub fn enqueue(
        &self,
        source: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Result<(), ManagerError> {
        let item = DownloadItem::new(source, destination);
        if self.core.config.resolve(&item.destination).is_none() {
            return Err(ManagerError::InvalidDestination(item.destination));
        }

        let _dispatch = self.core.dispatch.lock();
        let listeners = {
            let mut state = self.core.shared.lock();
            match state.lifecycle {
                Lifecycle::Uninitialised => {
                    return Err(self.misuse(ManagerError::NotInitialised))
                }
                Lifecycle::ShuttingDown => return Err(ManagerError::ShuttingDown),
                Lifecycle::Running => {}
            }
            if state.queue.contains(&item.destination) {
                return Err(ManagerError::AlreadyQueued(item.destination));
            }

            tracing::info!(
                destination = %item.destination.display(),
                source = %item.source,
                "download queued"
            );
            state.queue.push(item.clone());
            if state.worker.is_idle() {
                self.wake(&mut state);
            }
            state.listeners.snapshot()
        };
        listeners.added(&item.destination, TransferProgress::INACTIVE);
        Ok(())
    }

    /// Remove `destination` from the queue, aborting it if it is transferring.
    ///
    /// Listeners get exactly one `on_download_complete(destination, false)`
    /// before this returns. Unknown destinations are ignored.
    pub async fn cancel(&self, destination: impl AsRef<Path>) -> Result<(), ManagerError> {
        let destination = destination.as_ref();
        let mut step = self.cancel_pending(destination)?;
        // The item can move between pending and current while we wait.
        while step == CancelStep::Current {
            step = self.cancel_current(destination).await?;
        }
        Ok(())
    }

    fn cancel_pending(&self, destination: &Path) -> Result<CancelStep, ManagerError> {
        let _dispatch = self.core.dispatch.lock();
        let listeners = {
            let mut state = self.core.shared.lock();
            self.ensure_initialised(&state)?;
            match state.queue.position(destination) {
                None => {
                    tracing::debug!(destination = %destination.display(), "cancel: not queued");
                    return Ok(CancelStep::Done);
                }
                Some(QueuePosition::Current) => return Ok(CancelStep::Current),
                Some(QueuePosition::Pending(index)) => {
                    state.queue.remove_pending(index);
                    state.listeners.snapshot()
                }
            }
        };
        tracing::info!(destination = %destination.display(), "queued download cancelled");
        listeners.complete(destination, false);
        Ok(CancelStep::Done)
    }

    /// The abort signal is per worker, so cancelling the current item stops
    /// the whole worker, waits for it, and starts a fresh one for the rest.
    async fn cancel_current(&self, destination: &Path) -> Result<CancelStep, ManagerError> {
        let _control = self.control.lock().await;

        let handle = {
            let mut state = self.core.shared.lock();
            if state.lifecycle == Lifecycle::Uninitialised {
                // Deinitialised while we waited; that already reported it.
                return Ok(CancelStep::Done);
            }
            let position = state.queue.position(destination);
            match position {
                // Finished or cancelled while we waited for the control lock.
                None => return Ok(CancelStep::Done),
                // Finished and queued again behind another item.
                Some(QueuePosition::Pending(_)) => {
                    drop(state);
                    return self.cancel_pending(destination);
                }
                Some(QueuePosition::Current) => state.worker.begin_stop(),
            }
        };

        if let Some(handle) = handle {
            tracing::info!(
                destination = %destination.display(),
                worker = handle.id,
                "stopping worker to cancel current download"
            );
            handle.stop.cancel();
            if let Err(e) = handle.join.await {
                tracing::error!(error = %e, "download worker ended abnormally");
            }
        }

        self.restart_after_stop(destination);
        Ok(CancelStep::Done)
    }

    fn restart_after_stop(&self, destination: &Path) {
        let _dispatch = self.core.dispatch.lock();
        let listeners = {
            let mut state = self.core.shared.lock();
            if matches!(state.worker, WorkerSlot::Stopping) {
                state.worker = WorkerSlot::Idle;
            }

            // The worker pops the item itself if its transfer had started;
            // otherwise it is still here and is ours to report.
            let still_current = state.queue.position(destination) == Some(QueuePosition::Current);
            if still_current {
                state.queue.pop_front();
                state.progress = TransferProgress::INACTIVE;
            }

            if !state.queue.is_empty()
                && state.lifecycle == Lifecycle::Running
                && state.worker.is_idle()
            {
                self.wake(&mut state);
            }
            still_current.then(|| state.listeners.snapshot())
        };
        if let Some(listeners) = listeners {
            listeners.complete(destination, false);
        }
    }

    fn ensure_initialised(&self, state: &SharedState) -> Result<(), ManagerError> {
        if state.lifecycle == Lifecycle::Uninitialised {
            return Err(self.misuse(ManagerError::NotInitialised));
        }
        Ok(())
    }

    /// Contract violations are logged, and are fatal under `strict_contracts`.
    fn misuse(&self, err: ManagerError) -> ManagerError {
        tracing::error!(error = %err, "download manager misuse");
        assert!(
            !self.core.config.strict_contracts,
            "download manager misuse: {err}"
        );
        err
    }

    fn wake(&self, state: &mut SharedState) {
        let Some(runtime) = state.runtime.clone() else {
            tracing::error!("no runtime to start the download worker on");
            return;
        };
        self.core.spawn(state, &runtime);
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        let state = self.core.shared.lock();
        if let WorkerSlot::Running(handle) = &state.worker {
            tracing::warn!("download manager dropped without deinitialise");
            handle.stop.cancel();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::ProgressSink;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct Unreachable;

    #[async_trait]
    impl TransferExecutor for Unreachable {
        async fn download(
            &self,
            source: &str,
            _temp_path: &Path,
            _progress: &ProgressSink,
            _cancel: &CancellationToken,
        ) -> Result<(), DownloadError> {
            Err(DownloadError::InvalidSource(source.to_string()))
        }
    }

    #[derive(Default)]
    struct Completions(Mutex<Vec<(PathBuf, bool)>>);

    impl DownloadListener for Completions {
        fn on_download_added(&self, _destination: &Path, _progress: TransferProgress) {}

        fn on_download_complete(&self, destination: &Path, success: bool) {
            self.0.lock().push((destination.to_path_buf(), success));
        }
    }

    fn manager(strict: bool) -> (tempfile::TempDir, DownloadManager) {
        let root = tempfile::tempdir().unwrap();
        let mut config = ManagerConfig::with_root(root.path());
        config.strict_contracts = strict;
        (root, DownloadManager::new(config, Arc::new(Unreachable)))
    }

    #[tokio::test]
    async fn test_cancel_current_removes_item_requeued_while_waiting() {
        let (_root, manager) = manager(false);
        manager.initialise().unwrap();
        let completions = Arc::new(Completions::default());
        manager.add_listener(completions.clone()).unwrap();

        // "a" was current when cancel looked, then finished and came back
        // behind "x" before the control lock was free. No worker runs here.
        {
            let mut state = manager.core.shared.lock();
            state.queue.push(DownloadItem::new("http://x/x", "x"));
            state.queue.push(DownloadItem::new("http://x/a", "a"));
        }

        let step = manager.cancel_current(Path::new("a")).await.unwrap();
        assert_eq!(step, CancelStep::Done);
        let left: Vec<_> = manager
            .snapshot()
            .unwrap()
            .into_iter()
            .map(|entry| entry.destination)
            .collect();
        assert_eq!(left, vec![PathBuf::from("x")]);
        assert_eq!(*completions.0.lock(), vec![(PathBuf::from("a"), false)]);
        assert_eq!(manager.activations(), 0);

        manager.deinitialise().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_current_after_deinitialise_is_quiet() {
        let (_root, manager) = manager(true);
        manager.initialise().unwrap();
        manager.deinitialise().await.unwrap();
        let step = manager.cancel_current(Path::new("a")).await.unwrap();
        assert_eq!(step, CancelStep::Done);
    }

    #[tokio::test]
    #[should_panic(expected = "already initialised")]
    async fn test_strict_double_initialise_panics() {
        let (_root, manager) = manager(true);
        manager.initialise().unwrap();
        let _ = manager.initialise();
    }

    #[tokio::test]
    #[should_panic(expected = "listener is not registered")]
    async fn test_strict_unknown_listener_panics() {
        let (_root, manager) = manager(true);
        manager.initialise().unwrap();
        let listener: Arc<dyn DownloadListener> = Arc::new(Completions::default());
        let _ = manager.remove_listener(&listener);
    }

    #[test]
    #[should_panic(expected = "not initialised")]
    fn test_strict_enqueue_before_initialise_panics() {
        let (_root, manager) = manager(true);
        let _ = manager.enqueue("http://x/a", "a");
    }

    #[tokio::test]
    async fn test_lenient_misuse_returns_errors() {
        let (_root, manager) = manager(false);
        assert!(matches!(
            manager.snapshot(),
            Err(ManagerError::NotInitialised)
        ));
        manager.initialise().unwrap();
        assert!(matches!(
            manager.initialise(),
            Err(ManagerError::AlreadyInitialised)
        ));
        manager.deinitialise().await.unwrap();
        assert!(matches!(
            manager.deinitialise().await,
            Err(ManagerError::NotInitialised)
        ));
    }
}
