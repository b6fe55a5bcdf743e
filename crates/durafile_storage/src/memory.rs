//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests
/// - Crash-recovery simulations over captured byte images
/// - Ephemeral streams that don't need persistence
///
/// # Example
///
/// ```rust
/// use durafile_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// backend.write_at(0, b"test data").unwrap();
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all data in the backend.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<usize> {
        let data = self.data.read();
        let size = data.len() as u64;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }

        let start = offset as usize;
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        Ok(len)
    }

    fn write_at(&mut self, offset: u64, new_data: &[u8]) -> StorageResult<()> {
        if new_data.is_empty() {
            return Ok(());
        }

        let mut data = self.data.write();
        let end = offset as usize + new_data.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(new_data);
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        // In-memory backend has nothing to persist
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let current_size = data.len() as u64;

        if new_size > current_size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: current_size,
            });
        }

        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.data().is_empty());
    }

    #[test]
    fn memory_write_and_read() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(0, b"hello world").unwrap();

        let mut buf = [0u8; 5];
        assert_eq!(backend.read_at(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");

        assert_eq!(backend.read_at(6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn memory_read_past_end_clamps() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(0, b"hello").unwrap();

        let mut buf = [0u8; 10];
        assert_eq!(backend.read_at(3, &mut buf).unwrap(), 2);
        assert_eq!(backend.read_at(5, &mut buf).unwrap(), 0);
        assert_eq!(backend.read_at(100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn memory_write_past_end_zero_fills() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(4, b"ab").unwrap();

        assert_eq!(backend.size().unwrap(), 6);
        assert_eq!(backend.data(), vec![0, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn memory_overwrite() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(0, b"hello world").unwrap();
        backend.write_at(6, b"earth").unwrap();
        assert_eq!(backend.data(), b"hello earth");
    }

    #[test]
    fn memory_with_data() {
        let backend = InMemoryBackend::with_data(b"preloaded".to_vec());
        assert_eq!(backend.size().unwrap(), 9);

        let mut buf = [0u8; 9];
        backend.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"preloaded");
    }

    #[test]
    fn memory_truncate() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(0, b"hello world").unwrap();

        backend.truncate(5).unwrap();
        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(backend.data(), b"hello");

        backend.truncate(0).unwrap();
        assert!(backend.data().is_empty());
    }

    #[test]
    fn memory_truncate_beyond_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(0, b"hello").unwrap();

        let result = backend.truncate(100);
        assert!(matches!(result, Err(StorageError::TruncateBeyondEnd { .. })));
    }

    #[test]
    fn memory_sync_succeeds() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(0, b"data").unwrap();
        assert!(backend.sync().is_ok());
    }
}
