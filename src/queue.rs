use std::collections::VecDeque;
use std::path::Path;

use crate::models::{DownloadItem, QueueEntry, TransferProgress};

/// Where a destination sits in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    /// Front of the queue, i.e. the item being transferred.
    Current,
    /// Waiting behind the current item, at this index.
    Pending(usize),
}

/// FIFO of download items. The front item is the current one.
///
/// This type does no locking of its own; the manager keeps it inside the
/// shared state mutex together with the progress and the listener set.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    items: VecDeque<DownloadItem>,
}

impl DownloadQueue {
    /// Create a new empty download queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new item at the back of the queue.
    pub fn push(&mut self, item: DownloadItem) {
        self.items.push_back(item);
    }

    pub fn front(&self) -> Option<&DownloadItem> {
        self.items.front()
    }

    pub fn pop_front(&mut self) -> Option<DownloadItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, destination: &Path) -> bool {
        self.items.iter().any(|item| item.matches(destination))
    }

    pub fn position(&self, destination: &Path) -> Option<QueuePosition> {
        self.items
            .iter()
            .position(|item| item.matches(destination))
            .map(|index| match index {
                0 => QueuePosition::Current,
                n => QueuePosition::Pending(n),
            })
    }

    /// Remove a waiting item. The current item is never removed this way,
    /// it belongs to the worker until the transfer returns.
    pub fn remove_pending(&mut self, index: usize) -> Option<DownloadItem> {
        if index == 0 {
            return None;
        }
        self.items.remove(index)
    }

    /// Drop everything, returning how many items were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }

    /// Entries in queue order. Only the front carries `current`, all others
    /// report the inactive sentinel.
    pub fn snapshot(&self, current: TransferProgress) -> Vec<QueueEntry> {
        self.items
            .iter()
            .enumerate()
            .map(|(index, item)| QueueEntry {
                destination: item.destination.clone(),
                progress: if index == 0 {
                    current
                } else {
                    TransferProgress::INACTIVE
                },
            })
            .collect()
    }
}
