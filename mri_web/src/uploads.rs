//! Uploaded images on disk.
//!
//! Every upload is written under a fresh random name. The [`StoredUpload`] guard removes the
//! file when dropped unless the caller asked to keep it with [`StoredUpload::persist`].

use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
};
use uuid::Uuid;

pub const PUBLIC_PREFIX: &str = "/static/uploads";

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `data` to `<dir>/<uuid><ext>`, keeping the extension of `original_name`.
    ///
    /// The guard exists before the first byte is written, so a failed write leaves nothing
    /// behind.
    pub async fn store(&self, data: &[u8], original_name: Option<&str>) -> io::Result<StoredUpload> {
        let file_name = format!("{}{}", Uuid::new_v4(), extension(original_name));
        let upload = StoredUpload {
            path: self.dir.join(&file_name),
            file_name,
            retained: false,
        };
        let path = upload.path.clone();
        let upload = write_guarded(upload, tokio::fs::write(path, data)).await?;
        tracing::debug!("Stored upload {:?} ({} bytes)", upload.path, data.len());
        Ok(upload)
    }

    /// Maps a public file name back to a stored file, refusing anything that is not a plain
    /// file name inside the uploads directory.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        let is_plain = !file_name.is_empty()
            && !file_name.starts_with('.')
            && file_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        if !is_plain {
            return None;
        }
        let path = self.dir.join(file_name);
        path.is_file().then_some(path)
    }
}

async fn write_guarded(
    upload: StoredUpload,
    write: impl Future<Output = io::Result<()>>,
) -> io::Result<StoredUpload> {
    match write.await {
        Ok(()) => Ok(upload),
        Err(e) => {
            tracing::warn!("Failed to write upload {:?}: {}", upload.path, e);
            Err(e)
        }
    }
}

fn extension(original_name: Option<&str>) -> String {
    original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

#[derive(Debug)]
pub struct StoredUpload {
    path: PathBuf,
    file_name: String,
    retained: bool,
}

impl StoredUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn public_path(&self) -> String {
        format!("{}/{}", PUBLIC_PREFIX, self.file_name)
    }

    /// Reads the stored bytes back; inference runs on what reached the disk.
    pub async fn read(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    /// Keeps the file on disk and returns its public path.
    pub fn persist(mut self) -> String {
        self.retained = true;
        self.public_path()
    }
}

impl Drop for StoredUpload {
    fn drop(&mut self) {
        if self.retained {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove upload {:?}: {}", self.path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path()).unwrap();

        let upload = store.store(b"abc", Some("scan.PNG")).await.unwrap();
        let path = upload.path().to_path_buf();
        assert!(path.is_file());
        assert!(upload.file_name().ends_with(".png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");

        drop(upload);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.png");
        let upload = StoredUpload {
            path: path.clone(),
            file_name: "partial.png".to_string(),
            retained: false,
        };

        let result = write_guarded(upload, async {
            std::fs::write(&path, b"half")?;
            Err::<(), io::Error>(io::Error::other("disk full"))
        })
        .await;

        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_read_returns_stored_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path()).unwrap();

        let upload = store.store(b"scan bytes", Some("scan.png")).await.unwrap();

        assert_eq!(upload.read().await.unwrap(), b"scan bytes");
    }

    #[tokio::test]
    async fn test_persisted_upload_is_kept_and_resolvable() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploads")).unwrap();

        let upload = store.store(b"abc", Some("brain.jpg")).await.unwrap();
        let file_name = upload.file_name().to_string();
        let public = upload.persist();

        assert_eq!(public, format!("/static/uploads/{}", file_name));
        assert!(store.resolve(&file_name).is_some());
    }

    #[tokio::test]
    async fn test_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path()).unwrap();

        let a = store.store(b"a", Some("x.png")).await.unwrap();
        let b = store.store(b"b", Some("x.png")).await.unwrap();

        assert_ne!(a.file_name(), b.file_name());
    }

    #[test]
    fn test_extension_sanitizing() {
        assert_eq!(extension(Some("scan.jpeg")), ".jpeg");
        assert_eq!(extension(Some("archive.tar.gz")), ".gz");
        assert_eq!(extension(Some("noext")), "");
        assert_eq!(extension(Some("evil.p/ng")), "");
        assert_eq!(extension(None), "");
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("ok.png"), b"x").unwrap();

        assert!(store.resolve("ok.png").is_some());
        assert!(store.resolve("../ok.png").is_none());
        assert!(store.resolve("..").is_none());
        assert!(store.resolve("missing.png").is_none());
    }
}
