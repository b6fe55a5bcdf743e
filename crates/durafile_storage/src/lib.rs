//! # DuraFile Storage
//!
//! File handle abstraction for DuraFile.
//!
//! This crate provides the lowest-level storage abstraction for the
//! durable stream engine. Backends are **opaque byte stores** with
//! positional reads and writes - they do not interpret the data they
//! hold. The engine owns all file format interpretation (blocks, WAL
//! records, the log header).
//!
//! ## Design Principles
//!
//! - Backends expose positional I/O (`read_at`, `write_at`), durable
//!   `sync`, `size`, and `truncate`
//! - No knowledge of block layout, WAL records, or checkpoints
//! - `read_at` clamps at end of file instead of erroring, because the
//!   engine treats a short read as an ordinary end-of-data signal
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and crash simulation
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use durafile_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.write_at(0, b"hello world").unwrap();
//! let mut buf = [0u8; 11];
//! let n = backend.read_at(0, &mut buf).unwrap();
//! assert_eq!(&buf[..n], b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
