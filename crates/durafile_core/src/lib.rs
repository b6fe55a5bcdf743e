//! # DuraFile Core
//!
//! A crash-safe random-access byte stream backed by a single data file.
//!
//! Durability is the ACID property which guarantees that committed
//! writes survive permanently. DuraFile provides it with a write-ahead
//! commit log using deferred update (the NO-UNDO/REDO recovery
//! algorithm): buffered writes never touch the data file until their
//! log records are durably on disk, so an interrupted transaction needs
//! no undo, and a committed-but-unapplied transaction is redone from
//! the log on the next open.
//!
//! This crate provides:
//! - [`DurableFileStream`] - the public read/write/seek/commit/abort stream
//! - A pin-aware LRU block cache mediating between buffered writes and
//!   the data file
//! - The commit log: checksummed record format, checkpointing, log
//!   rotation, and crash recovery
//!
//! ## Example
//!
//! ```no_run
//! use durafile_core::DurableFileStream;
//!
//! let mut stream = DurableFileStream::open("app.dat", true).unwrap();
//! stream.write(b"hello").unwrap();
//! stream.commit().unwrap();   // durable from here on
//! stream.close(false).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod checksum;
mod config;
mod error;
mod stream;
mod types;
mod wal;

pub use cache::BlockCache;
pub use checksum::crc32;
pub use config::StreamConfig;
pub use error::{CommitStage, CoreError, CoreResult};
pub use stream::{DurableFileStream, BLOCK_SIZE, DEFAULT_CACHE_SIZE};
pub use types::TransactionId;
