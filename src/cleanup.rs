use std::path::Path;
use tracing::{info, warn};

/// Remove a cached dataset directory. Missing directories are ignored.
pub async fn remove_work_dir(path: &Path) {
    if !path.exists() {
        return;
    }
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => info!("Removed cached directory {}", path.display()),
        Err(e) => warn!("Failed to cleanup {}: {}", path.display(), e),
    }
}

/// True when `path` is a directory holding at least one regular file.
pub async fn has_files(path: &Path) -> bool {
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(e) => e,
        Err(_) => return false,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remove_work_dir_nonexistent() {
        remove_work_dir(Path::new("/tmp/nonexistent_test_dir_xyz")).await;
    }

    #[tokio::test]
    async fn test_remove_work_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("docs-cache");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("file.md"), "data").await.unwrap();
        assert!(has_files(&dir).await);
        remove_work_dir(&dir).await;
        assert!(!dir.exists());
        assert!(!has_files(&dir).await);
    }

    #[tokio::test]
    async fn test_has_files_ignores_subdirs() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(tmp.path().join("nested")).await.unwrap();
        assert!(!has_files(tmp.path()).await);
    }
}
