//! Commit log engine: pending writes, commit/abort, checkpointing,
//! rotation, and crash recovery.

use crate::error::{CommitStage, CoreError, CoreResult};
use crate::stream::{SharedBackend, SharedCache, BLOCK_SIZE};
use crate::types::TransactionId;
use crate::wal::record::{self, DecodedRecord, WritePayload, MAX_RECORD_LEN};
use durafile_storage::StorageBackend;
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// Suffix appended to the data path to name the sidecar log file.
pub(crate) const LOG_SUFFIX: &str = ".log";

/// Offset of the first live WAL record; everything below is the header
/// block.
const START_LOG_POSITION: u64 = BLOCK_SIZE as u64;

/// Offset of the checkpoint pointer cell inside the header block.
const CHECKPOINT_POSITION: u64 = 2048;

/// A buffered write waiting for the next commit, keyed by block number.
///
/// Repeated writes to one block collapse into a single entry: the
/// after-image is replaced each time while `valid_len` only grows.
#[derive(Debug, Clone)]
struct PendingWrite {
    block_no: u64,
    /// Meaningful prefix of the after-image; monotonic per transaction.
    valid_len: u32,
    /// Full block after-image. Only the valid prefix is ever logged or
    /// applied.
    after_image: Vec<u8>,
}

/// Outcome of scanning one transaction during recovery.
enum ScanOutcome {
    /// BEGIN..END all present; the transaction reached the data file.
    Applied,
    /// COMMIT durable but END missing; the writes must be reapplied.
    Redo(Vec<WritePayload>),
    /// Malformed record or chain break; nothing here was committed.
    Invalid,
}

/// Write-ahead commit log over a dedicated sidecar file.
///
/// Owns the log backend exclusively; shares the data-file backend and
/// the block cache with the stream that created it (constructor
/// injection - the log needs exactly the "apply write and unpin"
/// capability over those two).
pub(crate) struct CommitLog {
    log: Box<dyn StorageBackend>,
    log_path: String,
    data_path: String,
    data: SharedBackend,
    cache: SharedCache,
    pending: BTreeMap<u64, PendingWrite>,
    /// Next record's LSN == its byte offset in the log file.
    lsn: u64,
    txid: TransactionId,
    checkpoint_addr: u64,
    renew_checkpoint_after: u64,
    recreate_log_at: u64,
    /// Encoded records not yet written out; starts at `buf_start` in
    /// the log file.
    buf: Vec<u8>,
    buf_start: u64,
}

impl CommitLog {
    /// Opens the commit log, running crash recovery when the log file
    /// is non-empty.
    pub(crate) fn open(
        log: Box<dyn StorageBackend>,
        log_path: String,
        data_path: String,
        data: SharedBackend,
        cache: SharedCache,
        renew_checkpoint_after: u64,
        recreate_log_at: u64,
    ) -> CoreResult<Self> {
        let mut this = Self {
            log,
            log_path,
            data_path,
            data,
            cache,
            pending: BTreeMap::new(),
            lsn: START_LOG_POSITION,
            txid: TransactionId::new(0),
            checkpoint_addr: START_LOG_POSITION,
            renew_checkpoint_after,
            recreate_log_at,
            buf: Vec::new(),
            buf_start: START_LOG_POSITION,
        };

        if this.log.size()? > 0 {
            this.replay_header_block()?;
            this.read_checkpoint_address()?;
            this.recover()?;
            this.lsn = this.log.size()?.max(START_LOG_POSITION);
            this.buf_start = this.lsn;
        }

        Ok(this)
    }

    /// Registers a buffered block write, merging with any pending write
    /// for the same block (image replaced, valid prefix only grows).
    pub(crate) fn log_write(&mut self, block_no: u64, valid_len: u32, after_image: Vec<u8>) {
        use std::collections::btree_map::Entry;
        match self.pending.entry(block_no) {
            Entry::Occupied(mut e) => {
                let w = e.get_mut();
                w.after_image = after_image;
                if valid_len > w.valid_len {
                    w.valid_len = valid_len;
                }
            }
            Entry::Vacant(e) => {
                e.insert(PendingWrite {
                    block_no,
                    valid_len,
                    after_image,
                });
            }
        }
    }

    /// Durably commits all pending writes as one logged transaction.
    pub(crate) fn commit(&mut self) -> CoreResult<()> {
        self.commit_inner(None)
    }

    /// Commits, but aborts after the given stage completes.
    ///
    /// Recovery-test instrumentation: the error return simulates a
    /// crash at that point, and reopening the files afterwards must
    /// honor the NO-UNDO/REDO guarantee. With a stage armed, the log
    /// buffer is flushed after every record so each stage is durably
    /// observable.
    pub(crate) fn commit_aborting_at(&mut self, stage: CommitStage) -> CoreResult<()> {
        self.commit_inner(Some(stage))
    }

    fn commit_inner(&mut self, fail: Option<CommitStage>) -> CoreResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        // BTreeMap iteration gives the snapshot ordered by ascending
        // block number, the replay order the log format promises.
        let writes: Vec<PendingWrite> = self.pending.values().cloned().collect();

        self.txid = self.txid.next();
        let txid = self.txid;
        trace!(%txid, writes = writes.len(), "committing transaction");

        let mut prev = self.append_begin(txid);
        if fail.is_some() {
            self.flush_log()?;
        }
        self.fail_if(fail, CommitStage::LogBegin)?;

        for w in &writes {
            prev = self.append_write(prev, txid, w);
            if fail.is_some() {
                self.flush_log()?;
                self.fail_if(fail, CommitStage::LogWrite)?;
            }
        }

        prev = self.append_commit(prev, txid);
        self.flush_log()?;
        self.fail_if(fail, CommitStage::LogCommit)?;

        // Deferred update: the data file is only touched now that the
        // COMMIT record is durable.
        self.apply_to_data_file(
            writes
                .iter()
                .map(|w| (w.block_no, &w.after_image[..w.valid_len as usize])),
        )?;
        self.pending.clear();
        self.fail_if(fail, CommitStage::DataFileWrite)?;

        self.append_end(prev, txid);
        self.flush_log()?;
        self.fail_if(fail, CommitStage::LogEnd)?;

        if self.log.size()? >= self.recreate_log_at {
            self.recreate_log()?;
        }

        let size = self.log.size()?;
        if size >= self.checkpoint_addr + self.renew_checkpoint_after {
            self.write_new_checkpoint(fail)?;
        }

        Ok(())
    }

    /// Discards all pending writes and their cached after-images. The
    /// log itself is untouched.
    pub(crate) fn abort(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let mut cache = self.cache.lock();
        for block_no in self.pending.keys() {
            cache.remove(*block_no);
        }
        drop(cache);

        trace!(discarded = self.pending.len(), "aborted pending writes");
        self.pending.clear();
    }

    // ----- record appending -------------------------------------------------

    fn push_log(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.lsn += bytes.len() as u64;
    }

    fn append_begin(&mut self, txid: TransactionId) -> u64 {
        let lsn = self.lsn;
        let bytes = record::encode_begin(lsn, txid);
        self.push_log(&bytes);
        lsn
    }

    fn append_write(&mut self, prev_lsn: u64, txid: TransactionId, w: &PendingWrite) -> u64 {
        let lsn = self.lsn;
        let bytes = record::encode_write(
            lsn,
            prev_lsn,
            txid,
            &self.data_path,
            w.block_no,
            &w.after_image[..w.valid_len as usize],
        );
        self.push_log(&bytes);
        lsn
    }

    fn append_commit(&mut self, prev_lsn: u64, txid: TransactionId) -> u64 {
        let lsn = self.lsn;
        let bytes = record::encode_commit(lsn, prev_lsn, txid);
        self.push_log(&bytes);
        lsn
    }

    fn append_end(&mut self, prev_lsn: u64, txid: TransactionId) -> u64 {
        let lsn = self.lsn;
        let bytes = record::encode_end(lsn, prev_lsn, txid);
        self.push_log(&bytes);
        lsn
    }

    /// Writes out and durably flushes any buffered records at their log
    /// offsets.
    fn flush_log(&mut self) -> CoreResult<()> {
        if !self.buf.is_empty() {
            self.log.write_at(self.buf_start, &self.buf)?;
            self.log.sync()?;
            self.buf.clear();
        }
        self.buf_start = self.lsn;
        Ok(())
    }

    fn fail_if(&self, fail: Option<CommitStage>, stage: CommitStage) -> CoreResult<()> {
        match fail {
            Some(s) if s == stage => Err(CoreError::CommitInterrupted { stage }),
            _ => Ok(()),
        }
    }

    // ----- data file application --------------------------------------------

    /// Applies after-image prefixes to the data file at their block
    /// offsets, unpins each block's cache entry, then syncs.
    fn apply_to_data_file<'a, I>(&self, writes: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = (u64, &'a [u8])>,
    {
        let mut data = self.data.lock();
        let mut cache = self.cache.lock();

        for (block_no, image) in writes {
            data.write_at(block_no * BLOCK_SIZE as u64, image)?;
            cache.unpin(block_no);
        }
        data.sync()?;
        Ok(())
    }

    // ----- checkpointing and rotation ---------------------------------------

    /// Truncates the log file back to empty. Only ever called right
    /// after a full commit cycle, with no pending writes in flight.
    fn recreate_log(&mut self) -> CoreResult<()> {
        debug!(log = %self.log_path, "recreating log file");
        self.log.truncate(0)?;
        self.checkpoint_addr = START_LOG_POSITION;
        self.lsn = START_LOG_POSITION;
        self.buf.clear();
        self.buf_start = self.lsn;
        Ok(())
    }

    /// Moves the checkpoint pointer to the current log end via a
    /// self-contained mini-transaction in the header block, so the
    /// pointer update itself is crash-safe.
    fn write_new_checkpoint(&mut self, fail: Option<CommitStage>) -> CoreResult<()> {
        self.txid = self.txid.next();
        let txid = self.txid;

        // Clear the header block before logging into it. Recovery
        // treats an all-zero header as "no mini-transaction" and falls
        // back to scanning from the start of the record stream.
        self.log.write_at(0, &[0u8; BLOCK_SIZE])?;
        self.log.sync()?;

        let log_end = self.log.size()?;
        debug!(%txid, checkpoint = log_end, "renewing checkpoint");

        // The mini-transaction lives in the header block; its LSNs
        // restart at offset 0.
        self.lsn = 0;
        self.buf.clear();
        self.buf_start = 0;

        let mut prev = self.append_begin(txid);
        self.flush_log()?;
        self.fail_if(fail, CommitStage::CheckpointLogBegin)?;

        let pointer = log_end.to_le_bytes();
        let log_path = self.log_path.clone();
        let lsn = self.lsn;
        let bytes = record::encode_write(lsn, prev, txid, &log_path, 0, &pointer);
        self.push_log(&bytes);
        prev = lsn;
        self.flush_log()?;
        self.fail_if(fail, CommitStage::CheckpointLogWrite)?;

        self.log.write_at(CHECKPOINT_POSITION, &pointer)?;
        self.log.sync()?;
        self.fail_if(fail, CommitStage::CheckpointPointerWrite)?;

        self.append_end(prev, txid);
        self.flush_log()?;
        self.fail_if(fail, CommitStage::CheckpointLogEnd)?;

        self.checkpoint_addr = self.log.size()?;
        // Resume appending at the physical end of the log.
        self.lsn = self.checkpoint_addr.max(START_LOG_POSITION);
        self.buf_start = self.lsn;
        Ok(())
    }

    // ----- recovery ---------------------------------------------------------

    /// Reads and decodes the record at `offset`, or `None` when the
    /// bytes there are not a valid record.
    fn parse_record_at(&self, offset: u64) -> CoreResult<Option<DecodedRecord>> {
        let size = self.log.size()?;
        if offset >= size {
            return Ok(None);
        }

        let want = MAX_RECORD_LEN.min((size - offset) as usize);
        let mut buf = vec![0u8; want];
        let n = self.log.read_at(offset, &mut buf)?;
        Ok(record::decode(&buf[..n], offset))
    }

    /// Replays the checkpoint mini-transaction in the header block.
    ///
    /// When its WRITE is durable but its END is not, the pointer cell
    /// may not have been rewritten; reapply the logged image (REDO).
    /// Anything else malformed in the header is ignored - the pointer
    /// read falls back to the start of the record stream.
    fn replay_header_block(&mut self) -> CoreResult<()> {
        let Some(DecodedRecord::Begin(bh)) = self.parse_record_at(0)? else {
            return Ok(());
        };
        if bh.lsn != 0 || bh.prev_lsn != 0 {
            return Ok(());
        }
        let txid = bh.txid;
        let mut pos = u64::from(bh.record_len);
        let mut prev = bh.lsn;

        let Some(DecodedRecord::Write(wh, w)) = self.parse_record_at(pos)? else {
            return Ok(());
        };
        if wh.txid != txid || wh.prev_lsn != prev || w.filename != self.log_path {
            return Ok(());
        }
        pos += u64::from(wh.record_len);
        prev = wh.lsn;

        match self.parse_record_at(pos)? {
            Some(DecodedRecord::End(eh)) if eh.txid == txid && eh.prev_lsn == prev => Ok(()),
            _ => {
                debug!("redoing interrupted checkpoint pointer update");
                self.log.write_at(CHECKPOINT_POSITION, &w.after_image)?;
                self.log.sync()?;
                Ok(())
            }
        }
    }

    /// Loads the checkpoint pointer, clamped so scanning never starts
    /// inside the header block.
    fn read_checkpoint_address(&mut self) -> CoreResult<()> {
        let mut buf = [0u8; 8];
        let n = self.log.read_at(CHECKPOINT_POSITION, &mut buf)?;
        let addr = if n == 8 { u64::from_le_bytes(buf) } else { 0 };
        self.checkpoint_addr = addr.max(START_LOG_POSITION);
        Ok(())
    }

    /// Scans the record stream from the checkpoint, redoing the last
    /// transaction if it committed without a durable END, then writes a
    /// fresh checkpoint at the log end.
    fn recover(&mut self) -> CoreResult<()> {
        let size = self.log.size()?;
        if self.checkpoint_addr == size {
            return Ok(()); // no changes since the checkpoint
        }

        debug!(
            from = self.checkpoint_addr,
            log_len = size,
            "recovering commit log"
        );

        let mut pos = self.checkpoint_addr;
        while pos < size {
            match self.scan_transaction(&mut pos)? {
                ScanOutcome::Applied => {}
                ScanOutcome::Redo(writes) => {
                    debug!(writes = writes.len(), "redoing committed transaction");
                    self.apply_to_data_file(
                        writes
                            .iter()
                            .map(|w| (w.block_no, &w.after_image[..w.valid_len as usize])),
                    )?;
                    break;
                }
                ScanOutcome::Invalid => {
                    // NO-UNDO: an incomplete transaction never touched
                    // the data file, and nothing past a break in the
                    // log is trusted.
                    warn!(offset = pos, "recovery scan stopped at invalid record");
                    break;
                }
            }
        }

        self.write_new_checkpoint(None)
    }

    /// Parses one BEGIN..WRITE*..COMMIT..END chain starting at `*pos`,
    /// advancing `*pos` past the records consumed.
    fn scan_transaction(&self, pos: &mut u64) -> CoreResult<ScanOutcome> {
        let Some(DecodedRecord::Begin(bh)) = self.parse_record_at(*pos)? else {
            return Ok(ScanOutcome::Invalid);
        };
        *pos += u64::from(bh.record_len);
        let txid = bh.txid;
        let mut prev = bh.lsn;

        // WRITE records until the COMMIT, all chained by txid/prev_lsn.
        let mut writes = Vec::new();
        loop {
            let Some(rec) = self.parse_record_at(*pos)? else {
                return Ok(ScanOutcome::Invalid);
            };
            let header = rec.header();
            if header.txid != txid || header.prev_lsn != prev {
                return Ok(ScanOutcome::Invalid);
            }
            *pos += rec.consumed();
            prev = header.lsn;

            match rec {
                DecodedRecord::Write(_, w) => {
                    if w.filename != self.data_path {
                        return Ok(ScanOutcome::Invalid);
                    }
                    writes.push(w);
                }
                DecodedRecord::Commit(_) => break,
                _ => return Ok(ScanOutcome::Invalid),
            }
        }

        // The data file is written between COMMIT and END; a missing or
        // broken END means those writes may not have landed.
        match self.parse_record_at(*pos)? {
            Some(DecodedRecord::End(eh)) if eh.txid == txid && eh.prev_lsn == prev => {
                *pos += u64::from(eh.record_len);
                Ok(ScanOutcome::Applied)
            }
            _ => Ok(ScanOutcome::Redo(writes)),
        }
    }
}

impl std::fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLog")
            .field("log_path", &self.log_path)
            .field("pending", &self.pending.len())
            .field("lsn", &self.lsn)
            .field("checkpoint_addr", &self.checkpoint_addr)
            .finish_non_exhaustive()
    }
}
