// src/state.rs

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::listener::ListenerRegistry;
use crate::models::TransferProgress;
use crate::queue::DownloadQueue;

pub(crate) type Shared = Arc<Mutex<SharedState>>;

/// Everything guarded by the manager's single state lock.
#[derive(Default)]
pub(crate) struct SharedState {
    pub queue: DownloadQueue,
    /// Progress of `queue.front()`, `INACTIVE` when nothing is transferring.
    pub progress: TransferProgress,
    pub listeners: ListenerRegistry,
    pub worker: WorkerSlot,
    pub lifecycle: Lifecycle,
    /// Runtime the worker is spawned on, captured by `initialise`.
    pub runtime: Option<Handle>,
    /// Total worker tasks spawned since construction.
    pub activations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Lifecycle {
    #[default]
    Uninitialised,
    Running,
    /// `begin_deinitialise` was called; waiting for `deinitialise`.
    ShuttingDown,
}

/// A live worker task and the token that stops it.
pub(crate) struct WorkerHandle {
    pub id: u64,
    pub stop: CancellationToken,
    pub join: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) enum WorkerSlot {
    #[default]
    Idle,
    Running(WorkerHandle),
    /// Someone took the handle to stop and join the worker. No new worker may
    /// start until they put the slot back to `Idle`.
    Stopping,
}

impl WorkerSlot {
    pub fn is_idle(&self) -> bool {
        matches!(self, WorkerSlot::Idle)
    }

    pub fn is_running(&self, id: u64) -> bool {
        matches!(self, WorkerSlot::Running(handle) if handle.id == id)
    }

    /// Take the running handle, leaving `Stopping` behind.
    pub fn begin_stop(&mut self) -> Option<WorkerHandle> {
        match std::mem::replace(self, WorkerSlot::Stopping) {
            WorkerSlot::Running(handle) => Some(handle),
            previous => {
                *self = previous;
                None
            }
        }
    }
}
