//! Background download queue.
//!
//! A [`DownloadManager`](manager::DownloadManager) accepts `(source,
//! destination)` requests and runs them one at a time on a single worker
//! task. Each file is downloaded to a temporary sibling and renamed into
//! place, so a destination never holds a partial file. Observers register a
//! [`DownloadListener`](listener::DownloadListener) to hear about additions
//! and completions, and can pull live progress with `enumerate`.

pub mod config;
pub mod downloader;
pub mod install;
pub mod listener;
pub mod logging;
pub mod manager;
pub mod models;
pub mod queue;

mod state;
mod worker;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::config::{HttpConfig, LogConfig, ManagerConfig};
    pub use crate::downloader::{DownloadError, HttpExecutor, ProgressSink, TransferExecutor};
    pub use crate::listener::DownloadListener;
    pub use crate::manager::{DownloadManager, ManagerError};
    pub use crate::models::{DownloadItem, QueueEntry, TransferProgress};
}
