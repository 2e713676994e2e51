use std::path::Path;
use std::sync::Arc;

use crate::models::TransferProgress;

/// Observer of queue membership and transfer outcomes.
///
/// Callbacks run on whichever thread caused the event (the caller of
/// `enqueue`/`cancel`, or the worker task) with no manager lock held except
/// the re-entrant dispatch lock, so a listener may call back into the
/// manager's synchronous methods.
///
/// Progress is not pushed; it is pulled through
/// [`DownloadManager::enumerate`](crate::manager::DownloadManager::enumerate).
pub trait DownloadListener: Send + Sync {
    /// An item entered the queue, or is being replayed by `enumerate`.
    fn on_download_added(&self, destination: &Path, progress: TransferProgress);

    /// An item left the queue. Cancellation reports `success == false`.
    fn on_download_complete(&self, destination: &Path, success: bool);
}

/// Set of registered listeners, compared by `Arc` identity.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Vec<Arc<dyn DownloadListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_of(&self, listener: &Arc<dyn DownloadListener>) -> Option<usize> {
        self.listeners
            .iter()
            .position(|registered| Arc::ptr_eq(registered, listener))
    }

    /// Returns `false` if the listener was already registered.
    pub fn add(&mut self, listener: Arc<dyn DownloadListener>) -> bool {
        if self.index_of(&listener).is_some() {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove(&mut self, listener: &Arc<dyn DownloadListener>) -> bool {
        match self.index_of(listener) {
            Some(index) => {
                self.listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Copy of the current set, for fan-out outside the state lock.
    pub fn snapshot(&self) -> Listeners {
        Listeners(self.listeners.clone())
    }
}

/// Listeners captured at one point in time.
pub struct Listeners(Vec<Arc<dyn DownloadListener>>);

impl Listeners {
    pub fn added(&self, destination: &Path, progress: TransferProgress) {
        for listener in &self.0 {
            listener.on_download_added(destination, progress);
        }
    }

    pub fn complete(&self, destination: &Path, success: bool) {
        for listener in &self.0 {
            listener.on_download_complete(destination, success);
        }
    }
}
