//! Byte-oriented storage backends for the saved-metrics document.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::StorageError;

/// Durable home of the saved-metrics document.
///
/// A backend stores exactly one opaque document; the store serializes it.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Human readable location, used in logs and errors.
    fn location(&self) -> String;

    /// Read the document. `Ok(None)` means it does not exist yet.
    async fn read(&self) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the document.
    async fn write(&self, data: &[u8]) -> Result<(), StorageError>;
}

/// Local file backend. Writes go to a sibling temp file that is then
/// renamed over the target, so readers never see a torn document.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::read(self.location(), e)),
        }
    }

    async fn write(&self, data: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::write(self.location(), e))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, data)
            .await
            .map_err(|e| StorageError::write(self.location(), e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| StorageError::write(self.location(), e))?;
        Ok(())
    }
}

/// Volatile in-process backend. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: Mutex<Option<Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-loaded with a document.
    pub fn with_document(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Mutex::new(Some(data.into())),
        }
    }

    /// Current document contents.
    pub fn document(&self) -> Option<Vec<u8>> {
        self.data.lock().clone()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn location(&self) -> String {
        "memory".to_string()
    }

    async fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.lock().clone())
    }

    async fn write(&self, data: &[u8]) -> Result<(), StorageError> {
        *self.data.lock() = Some(data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_backend_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("metrics.json"));

        assert_eq!(backend.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_backend_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested/metrics.json"));

        backend.write(b"{\"a\":1}").await.unwrap();
        backend.write(b"{\"a\":2}").await.unwrap();

        assert_eq!(backend.read().await.unwrap().unwrap(), b"{\"a\":2}");
        assert!(!backend.temp_path().exists(), "temp file is renamed away");
    }

    #[tokio::test]
    async fn test_file_backend_write_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the rename fail
        let path = dir.path().join("metrics.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();

        let backend = FileBackend::new(&path);
        let err = backend.write(b"{}").await.unwrap_err();
        assert!(err.to_string().contains("metrics.json"));
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let backend = FileBackend::new("/var/lib/shelly/metrics.json");
        assert_eq!(
            backend.temp_path(),
            PathBuf::from("/var/lib/shelly/metrics.json.tmp")
        );
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.read().await.unwrap(), None);

        backend.write(b"doc").await.unwrap();
        assert_eq!(backend.document().unwrap(), b"doc");
    }
}
