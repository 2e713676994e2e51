//! Moving a finished temporary file into place.

use std::io::ErrorKind;
use std::path::Path;

use crate::downloader::DownloadError;

/// Remove a leftover temporary file. A missing file is not an error.
pub async fn discard(temp_path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(temp_path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Replace `final_path` with `temp_path` in a single rename.
///
/// Readers of `final_path` see either the old file or the new one, never a
/// partial write. `temp_path` must be a sibling so the rename stays on one
/// filesystem.
pub async fn install(temp_path: &Path, final_path: &Path) -> Result<(), DownloadError> {
    tokio::fs::rename(temp_path, final_path)
        .await
        .map_err(DownloadError::Install)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_install_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("a.xcm");
        let temp_path = dir.path().join("a.xcm.odm-part");
        std::fs::write(&final_path, b"old").unwrap();
        std::fs::write(&temp_path, b"new").unwrap();

        install(&temp_path, &final_path).await.unwrap();

        assert_eq!(std::fs::read(&final_path).unwrap(), b"new");
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn test_install_missing_temp_leaves_destination() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("a.xcm");
        std::fs::write(&final_path, b"old").unwrap();

        let result = install(&dir.path().join("gone.odm-part"), &final_path).await;

        assert!(matches!(result, Err(DownloadError::Install(_))));
        assert_eq!(std::fs::read(&final_path).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_discard_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        discard(&dir.path().join("nothing")).await.unwrap();

        let leftover = dir.path().join("left.odm-part");
        std::fs::write(&leftover, b"partial").unwrap();
        discard(&leftover).await.unwrap();
        assert!(!leftover.exists());
    }
}
