//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for DuraFile.
///
/// Storage backends are **opaque byte stores**. They provide positional
/// reads and writes, durable sync, and truncation. DuraFile owns all
/// file format interpretation - backends do not understand blocks, WAL
/// records, or checkpoint pointers.
///
/// # Invariants
///
/// - `read_at` returns exactly the bytes previously written at that
///   offset, clamped at end of storage (a short or zero-length result
///   is not an error)
/// - `write_at` past the current end zero-fills the gap
/// - after `sync` returns, all previously written data survives process
///   termination
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + std::fmt::Debug {
    /// Reads into `buf` starting at `offset`.
    ///
    /// Returns the number of bytes actually read. Reads past the end of
    /// storage are clamped; an offset at or beyond the end yields 0.
    ///
    /// # Errors
    ///
    /// Returns an error only on a genuine I/O failure.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<usize>;

    /// Writes `data` starting at `offset`, extending the storage if the
    /// write reaches past the current end. A gap between the old end and
    /// `offset` reads back as zeros.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Syncs all written data to durable storage.
    ///
    /// After this returns successfully, all previously written data is
    /// guaranteed to survive process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Truncates the storage to the given size.
    ///
    /// Used to recreate the log file after rotation and to honor the
    /// create-truncate open mode.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The truncation fails
    /// - `new_size` is greater than the current size
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
