//! The commit log: write-ahead logging with deferred update.
//!
//! All buffered writes are serialized into checksummed log records and
//! durably flushed before the data file is touched. Recovery therefore
//! never undoes anything (NO-UNDO): an incomplete transaction never
//! reached the data file. A transaction whose COMMIT record is durable
//! but whose END record is not may or may not have reached the data
//! file, so its writes are reapplied (REDO).
//!
//! ## Record format
//!
//! All integers little-endian. Common fields:
//!
//! ```text
//! | lsn (8) | record_len (4) | prev_lsn (8) | txid (4) | op (4) | ...
//! ```
//!
//! BEGIN/COMMIT/END append a CRC-32 over the preceding 28 bytes
//! (total 32). WRITE continues with:
//!
//! ```text
//! ... | filename_len (4) | filename | block_no (8) | valid_len (4)
//!     | after_image (valid_len) | crc32 (4) |
//! ```
//!
//! A record's `lsn` equals its own byte offset in the log file;
//! `record_len` includes the trailing checksum.
//!
//! ## Log file layout
//!
//! ```text
//! offset 0    : header block - the checkpoint mini-transaction
//! offset 2048 : checkpoint pointer (u64 LE log offset)
//! offset 4096 : live record stream (BEGIN/WRITE*/COMMIT/END chains)
//! ```
//!
//! ## Recovery policy
//!
//! The scan starts at the checkpoint pointer and parses one transaction
//! at a time. Any malformed record, checksum mismatch, or lsn/prev_lsn/
//! txid chain break ends the scan: everything at and beyond the break
//! was never committed and is ignored. A checksum failure is an
//! end-of-log signal, never a fatal error.

mod log;
mod record;

pub(crate) use log::{CommitLog, LOG_SUFFIX};
pub(crate) use record::MAX_FILENAME_LEN;
