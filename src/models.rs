// src/models.rs

use std::path::{Path, PathBuf};

/// One queued or in-flight download request.
///
/// `destination` is the item's identity: at most one pending item may carry a
/// given destination at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadItem {
    /// Opaque transfer locator, usually a URL.
    pub source: String,
    /// Path relative to the download root.
    pub destination: PathBuf,
}

impl DownloadItem {
    pub fn new(source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn matches(&self, destination: &Path) -> bool {
        self.destination == destination
    }
}

/// Size and position of a transfer.
///
/// Both fields are `None` while the item is not being transferred. During a
/// transfer `position` is `Some` and `size` stays `None` if the server did not
/// report a total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferProgress {
    pub size: Option<u64>,
    pub position: Option<u64>,
}

impl TransferProgress {
    /// The "no transfer running" sentinel.
    pub const INACTIVE: TransferProgress = TransferProgress {
        size: None,
        position: None,
    };

    /// Progress right after a transfer has been picked up.
    pub const STARTED: TransferProgress = TransferProgress {
        size: None,
        position: Some(0),
    };

    pub fn is_active(&self) -> bool {
        self.position.is_some()
    }

    /// Fraction in `0.0..=1.0`, if the total is known.
    pub fn fraction(&self) -> Option<f32> {
        match (self.size, self.position) {
            (Some(0), Some(_)) => Some(1.0),
            (Some(size), Some(position)) => Some(position.min(size) as f32 / size as f32),
            _ => None,
        }
    }
}

/// Point-in-time view of one queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub destination: PathBuf,
    pub progress: TransferProgress,
}

/// Returns the path for the temporary download file.
/// e.g. for "/path/to/file.zip" and ".odm-part" it returns
/// "/path/to/file.zip.odm-part"
pub fn temporary_path(final_path: &Path, suffix: &str) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
