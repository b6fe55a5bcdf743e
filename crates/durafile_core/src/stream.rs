//! The durable stream: a random-access byte stream over a block-
//! structured data file, made crash-safe by the commit log.

use crate::cache::BlockCache;
use crate::config::StreamConfig;
use crate::error::{CommitStage, CoreError, CoreResult};
use crate::wal::{CommitLog, LOG_SUFFIX, MAX_FILENAME_LEN};
use durafile_storage::{FileBackend, StorageBackend};
use parking_lot::Mutex;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fixed block size shared by the data file and the log file layout.
pub const BLOCK_SIZE: usize = 4096;

/// Default block cache size in bytes (256 blocks).
pub const DEFAULT_CACHE_SIZE: usize = 256 * BLOCK_SIZE;

/// Data-file backend shared between the stream and its commit log.
pub(crate) type SharedBackend = Arc<Mutex<Box<dyn StorageBackend>>>;

/// Block cache shared between the stream and its commit log.
pub(crate) type SharedCache = Arc<Mutex<BlockCache>>;

/// A crash-safe random-access byte stream over a single data file.
///
/// Reads and writes go through a pin-aware block cache; writes are
/// buffered until [`commit`](Self::commit) makes them durable via the
/// sidecar write-ahead log (data path plus a `.log` suffix), or
/// [`abort`](Self::abort) discards them. Opening a stream whose log
/// file is non-empty runs crash recovery first.
///
/// A stream assumes exclusive ownership of its data and log files;
/// concurrent instances over the same path are not supported.
#[derive(Debug)]
pub struct DurableFileStream {
    path: PathBuf,
    data: SharedBackend,
    cache: SharedCache,
    log: CommitLog,
    /// Byte cursor; a pure navigation value, never clamped to `length`.
    position: u64,
    /// Durable plus currently-pending extent of the stream.
    length: u64,
}

impl DurableFileStream {
    /// Opens the data file at `path` and its sidecar log file with the
    /// default configuration, running crash recovery if the log holds
    /// records.
    ///
    /// With `create` set, both files are truncated to empty first.
    ///
    /// # Errors
    ///
    /// Fails if either file cannot be opened, if the path is too long
    /// to record in the log, or on an I/O error during recovery.
    pub fn open(path: impl AsRef<Path>, create: bool) -> CoreResult<Self> {
        Self::open_with_config(path, create, &StreamConfig::default())
    }

    /// Like [`open`](Self::open), with explicit cache and threshold
    /// configuration.
    ///
    /// # Errors
    ///
    /// Same conditions as [`open`](Self::open).
    pub fn open_with_config(
        path: impl AsRef<Path>,
        create: bool,
        config: &StreamConfig,
    ) -> CoreResult<Self> {
        let data_path = path.as_ref().to_string_lossy().into_owned();
        let log_path = format!("{data_path}{LOG_SUFFIX}");
        if log_path.len() > MAX_FILENAME_LEN {
            return Err(CoreError::invalid_operation(format!(
                "path too long for a log record filename ({} > {} bytes): {data_path}",
                log_path.len(),
                MAX_FILENAME_LEN,
            )));
        }

        let mut data_backend = FileBackend::open(path.as_ref())?;
        let mut log_backend = FileBackend::open(Path::new(&log_path))?;
        if create {
            data_backend.truncate(0)?;
            log_backend.truncate(0)?;
        }

        let data: SharedBackend = Arc::new(Mutex::new(Box::new(data_backend)));
        let cache: SharedCache = Arc::new(Mutex::new(BlockCache::new(
            config.cache_size.div_ceil(BLOCK_SIZE),
        )));

        let log = CommitLog::open(
            Box::new(log_backend),
            log_path,
            data_path.clone(),
            Arc::clone(&data),
            Arc::clone(&cache),
            config.renew_checkpoint_after,
            config.recreate_log_at,
        )?;

        // Recovery has already run, so the raw file size is the durable
        // length.
        let length = data.lock().size()?;
        debug!(path = %data_path, length, "opened durable stream");

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            data,
            cache,
            log,
            position: 0,
            length,
        })
    }

    /// Reads up to `buf.len()` bytes at the current position, advancing
    /// it by the number of bytes read.
    ///
    /// A short read (possibly zero bytes) signals the end of the valid
    /// data, not an error: reading past the written extent, or past a
    /// block with no valid bytes, simply stops. Uncommitted writes are
    /// visible to reads through their cached after-images.
    ///
    /// # Errors
    ///
    /// Infallible in practice; the signature leaves room for backends
    /// that must report close-out failures. Fetch failures end the read
    /// early with a short count instead of propagating.
    pub fn read(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
        let mut total = 0;

        while total < buf.len() {
            let block_no = self.position / BLOCK_SIZE as u64;
            let pos_in_block = (self.position % BLOCK_SIZE as u64) as usize;

            let (image, valid_len) = match self.fetch_block(block_no) {
                Ok(block) => block,
                Err(err) => {
                    warn!(block_no, %err, "block fetch failed, ending read early");
                    break;
                }
            };
            if valid_len <= pos_in_block {
                break; // end of durable data
            }

            let n = (buf.len() - total).min(valid_len - pos_in_block);
            buf[total..total + n].copy_from_slice(&image[pos_in_block..pos_in_block + n]);
            total += n;
            self.position += n as u64;
        }

        Ok(total)
    }

    /// Buffers `buf` at the current position, advancing it.
    ///
    /// Nothing reaches the data file here: each touched block's
    /// after-image is registered with the commit log and pinned in the
    /// cache until [`commit`](Self::commit) or [`abort`](Self::abort).
    /// The stream length grows immediately when the write extends it.
    ///
    /// # Errors
    ///
    /// Fails if a block's before-image cannot be read from the data
    /// file.
    pub fn write(&mut self, buf: &[u8]) -> CoreResult<()> {
        let mut remaining = buf;

        while !remaining.is_empty() {
            let block_no = self.position / BLOCK_SIZE as u64;
            let pos_in_block = (self.position % BLOCK_SIZE as u64) as usize;
            let n = remaining.len().min(BLOCK_SIZE - pos_in_block);

            // Overlay onto the before-image so the logged after-image
            // carries the block's existing bytes.
            let (mut image, valid_len) = self.fetch_block(block_no)?;
            image[pos_in_block..pos_in_block + n].copy_from_slice(&remaining[..n]);
            let new_valid = valid_len.max(pos_in_block + n);

            self.log.log_write(block_no, new_valid as u32, image.clone());
            self.cache.lock().store_pinned(block_no, image, new_valid);

            self.position += n as u64;
            remaining = &remaining[n..];
        }

        if self.position > self.length {
            self.length = self.position;
        }
        Ok(())
    }

    /// Moves the cursor and returns the new absolute position.
    ///
    /// Seeking past the end is legal: reads there return zero bytes
    /// until something is written.
    ///
    /// # Errors
    ///
    /// Fails if the target resolves to a negative offset.
    pub fn seek(&mut self, pos: SeekFrom) -> CoreResult<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.length) + i128::from(delta),
        };
        if target < 0 {
            return Err(CoreError::SeekBeforeStart {
                offset: i64::try_from(target).unwrap_or(i64::MIN),
            });
        }
        self.position = target as u64;
        Ok(self.position)
    }

    /// Durably commits all writes buffered since the last commit or
    /// abort, as one logged transaction.
    ///
    /// # Errors
    ///
    /// Fails on an I/O error while logging or applying; the log is
    /// flushed before the data file is touched, so a failed commit
    /// leaves the files in a state recovery can repair.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.log.commit()
    }

    /// Commits, but stops with [`CoreError::CommitInterrupted`] once
    /// the given stage completes.
    ///
    /// Recovery-test instrumentation: the early return simulates a
    /// crash at that point. Reopening the same path afterwards must
    /// yield either none or all of the transaction's writes.
    pub fn commit_aborting_at(&mut self, stage: CommitStage) -> CoreResult<()> {
        self.log.commit_aborting_at(stage)
    }

    /// Discards all buffered writes and their cached after-images, and
    /// resynchronizes the length to the data file's durable extent.
    ///
    /// The cursor does not move; positioned past the new length it
    /// reads zero bytes until written to again.
    ///
    /// # Errors
    ///
    /// Fails if the data file size cannot be read back.
    pub fn abort(&mut self) -> CoreResult<()> {
        self.log.abort();
        self.length = self.data.lock().size()?;
        Ok(())
    }

    /// Closes the stream, committing buffered writes first when asked.
    ///
    /// Dropping the stream without closing discards buffered writes
    /// without logging them, which is equivalent to a crash before
    /// commit.
    ///
    /// # Errors
    ///
    /// Fails only if the final commit fails.
    pub fn close(mut self, commit_first: bool) -> CoreResult<()> {
        if commit_first {
            self.commit()?;
        }
        Ok(())
    }

    /// Path of the data file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current cursor position in bytes.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Current stream length in bytes, including uncommitted writes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Whether the stream holds no bytes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the image and valid length of a block, from the cache or
    /// by reading through to the data file (populating the cache with
    /// an unpinned entry).
    fn fetch_block(&mut self, block_no: u64) -> CoreResult<(Vec<u8>, usize)> {
        {
            let mut cache = self.cache.lock();
            if let Some(entry) = cache.get(block_no) {
                return Ok((entry.bytes().to_vec(), entry.valid_len()));
            }
        }

        let mut image = vec![0u8; BLOCK_SIZE];
        let n = self
            .data
            .lock()
            .read_at(block_no * BLOCK_SIZE as u64, &mut image)?;
        self.cache.lock().insert(block_no, image.clone(), n, false);
        Ok((image, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_stream(dir: &TempDir, create: bool) -> DurableFileStream {
        let path = dir.path().join("stream.dat");
        DurableFileStream::open(&path, create).unwrap()
    }

    #[test]
    fn fresh_stream_is_empty() {
        let dir = TempDir::new().unwrap();
        let stream = open_stream(&dir, true);
        assert_eq!(stream.len(), 0);
        assert!(stream.is_empty());
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn read_from_empty_stream_returns_zero() {
        let dir = TempDir::new().unwrap();
        let mut stream = open_stream(&dir, true);
        let mut buf = [0u8; 64];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn uncommitted_write_is_readable() {
        let dir = TempDir::new().unwrap();
        let mut stream = open_stream(&dir, true);

        stream.write(b"buffered").unwrap();
        assert_eq!(stream.len(), 8);
        assert_eq!(stream.position(), 8);

        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 8);
        assert_eq!(&buf, b"buffered");
    }

    #[test]
    fn write_spanning_blocks() {
        let dir = TempDir::new().unwrap();
        let mut stream = open_stream(&dir, true);

        let payload = vec![0x5A; BLOCK_SIZE + 100];
        stream.write(&payload).unwrap();
        assert_eq!(stream.len(), payload.len() as u64);

        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = vec![0u8; payload.len()];
        assert_eq!(stream.read(&mut buf).unwrap(), payload.len());
        assert_eq!(buf, payload);
    }

    #[test]
    fn seek_origins() {
        let dir = TempDir::new().unwrap();
        let mut stream = open_stream(&dir, true);
        stream.write(&[1u8; 100]).unwrap();

        assert_eq!(stream.seek(SeekFrom::Start(10)).unwrap(), 10);
        assert_eq!(stream.seek(SeekFrom::Current(5)).unwrap(), 15);
        assert_eq!(stream.seek(SeekFrom::Current(-15)).unwrap(), 0);
        assert_eq!(stream.seek(SeekFrom::End(-20)).unwrap(), 80);
        assert_eq!(stream.seek(SeekFrom::End(10)).unwrap(), 110);
    }

    #[test]
    fn seek_before_start_fails() {
        let dir = TempDir::new().unwrap();
        let mut stream = open_stream(&dir, true);

        let err = stream.seek(SeekFrom::Current(-1)).unwrap_err();
        assert!(matches!(err, CoreError::SeekBeforeStart { offset: -1 }));
        // A failed seek leaves the cursor in place.
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn read_past_length_returns_zero_bytes() {
        let dir = TempDir::new().unwrap();
        let mut stream = open_stream(&dir, true);
        stream.write(b"short").unwrap();

        stream.seek(SeekFrom::Start(1000)).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.position(), 1000);
    }

    #[test]
    fn abort_rolls_back_length_but_not_position() {
        let dir = TempDir::new().unwrap();
        let mut stream = open_stream(&dir, true);

        stream.write(b"committed").unwrap();
        stream.commit().unwrap();
        stream.write(b" and then some more").unwrap();
        assert_eq!(stream.len(), 28);

        stream.abort().unwrap();
        assert_eq!(stream.len(), 9);
        assert_eq!(stream.position(), 28);

        // Reads at the rolled-back region find nothing.
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);

        // The committed prefix is intact.
        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 9];
        assert_eq!(stream.read(&mut buf).unwrap(), 9);
        assert_eq!(&buf, b"committed");
    }

    #[test]
    fn commit_then_reopen_sees_data() {
        let dir = TempDir::new().unwrap();
        {
            let mut stream = open_stream(&dir, true);
            stream.write(b"persistent bytes").unwrap();
            stream.close(true).unwrap();
        }

        let mut stream = open_stream(&dir, false);
        assert_eq!(stream.len(), 16);
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 16);
        assert_eq!(&buf, b"persistent bytes");
    }

    #[test]
    fn drop_without_commit_loses_buffered_writes() {
        let dir = TempDir::new().unwrap();
        {
            let mut stream = open_stream(&dir, true);
            stream.write(b"doomed").unwrap();
            // dropped without commit
        }

        let stream = open_stream(&dir, false);
        assert_eq!(stream.len(), 0);
    }

    #[test]
    fn overwrite_within_committed_block() {
        let dir = TempDir::new().unwrap();
        let mut stream = open_stream(&dir, true);

        stream.write(b"aaaaaaaaaa").unwrap();
        stream.commit().unwrap();

        stream.seek(SeekFrom::Start(3)).unwrap();
        stream.write(b"BBB").unwrap();
        stream.commit().unwrap();

        // Overwriting in the middle must not shrink the block.
        assert_eq!(stream.len(), 10);
        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(stream.read(&mut buf).unwrap(), 10);
        assert_eq!(&buf, b"aaaBBBaaaa");
    }

    #[test]
    fn open_with_create_truncates_existing() {
        let dir = TempDir::new().unwrap();
        {
            let mut stream = open_stream(&dir, true);
            stream.write(b"old contents").unwrap();
            stream.close(true).unwrap();
        }

        let stream = open_stream(&dir, true);
        assert_eq!(stream.len(), 0);
    }
}
