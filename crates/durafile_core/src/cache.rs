//! Pin-aware LRU cache of block images.
//!
//! The cache sits between the stream's buffered writes and the data
//! file. An entry is *pinned* while it holds an after-image that has
//! not yet been durably applied to the data file: pinned entries are
//! never evicted and must not be treated as clean data. Entries are
//! unpinned once the commit log applies their pending write, and
//! removed outright when an abort discards the uncommitted image.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Entries older than this are purged past the eviction minimum.
const STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Extra evictions batched beyond the required overflow.
const EXTRA_EVICTIONS: usize = 10;

/// A cached block image.
#[derive(Debug, Clone)]
pub struct CachedBlock {
    bytes: Vec<u8>,
    valid_len: usize,
    pinned: bool,
    stamp: u64,
    touched: Instant,
}

impl CachedBlock {
    /// The full block image.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// How many leading bytes of the image are meaningful.
    #[must_use]
    pub fn valid_len(&self) -> usize {
        self.valid_len
    }

    /// Whether the image is an uncommitted after-image.
    #[must_use]
    pub fn pinned(&self) -> bool {
        self.pinned
    }
}

/// LRU map from block number to cached block image.
///
/// Recency is tracked with a monotonic stamp per entry (the
/// order-stamped alternative to an intrusive linked list); the pin flag
/// is a plain field so eviction is a single ordered scan.
#[derive(Debug)]
pub struct BlockCache {
    capacity: usize,
    entries: HashMap<u64, CachedBlock>,
    clock: u64,
}

impl BlockCache {
    /// Creates a cache holding up to `capacity` blocks.
    ///
    /// Pinned entries never count as evictable, so occupancy can
    /// temporarily exceed the nominal capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            clock: 0,
        }
    }

    /// Returns the entry for `block_no` if cached, marking it
    /// most-recently-used and refreshing its touch time.
    pub fn get(&mut self, block_no: u64) -> Option<&CachedBlock> {
        self.clock += 1;
        let clock = self.clock;
        let entry = self.entries.get_mut(&block_no)?;
        entry.stamp = clock;
        entry.touched = Instant::now();
        Some(entry)
    }

    /// Inserts or wholesale-replaces the entry for `block_no`.
    ///
    /// New entries start most-recently-used. When occupancy has reached
    /// capacity, unpinned entries are evicted first (see [`Self::evict`]).
    pub fn insert(&mut self, block_no: u64, bytes: Vec<u8>, valid_len: usize, pinned: bool) {
        if self.entries.len() >= self.capacity {
            self.evict();
        }

        self.clock += 1;
        self.entries.insert(
            block_no,
            CachedBlock {
                bytes,
                valid_len,
                pinned,
                stamp: self.clock,
                touched: Instant::now(),
            },
        );
    }

    /// Stores an uncommitted after-image for `block_no`.
    ///
    /// If the block is already cached, the image is replaced in place,
    /// the entry is pinned, and `valid_len` only ever grows (a later
    /// smaller write does not shrink the logically valid prefix).
    pub fn store_pinned(&mut self, block_no: u64, bytes: Vec<u8>, valid_len: usize) {
        self.clock += 1;
        let clock = self.clock;
        if let Some(entry) = self.entries.get_mut(&block_no) {
            entry.bytes = bytes;
            entry.pinned = true;
            if valid_len > entry.valid_len {
                entry.valid_len = valid_len;
            }
            entry.stamp = clock;
            entry.touched = Instant::now();
        } else {
            self.insert(block_no, bytes, valid_len, true);
        }
    }

    /// Clears the pinned flag, meaning the block's pending write was
    /// durably applied to the data file. The entry survives as a clean
    /// image. Returns whether the block was cached.
    pub fn unpin(&mut self, block_no: u64) -> bool {
        match self.entries.get_mut(&block_no) {
            Some(entry) => {
                entry.pinned = false;
                true
            }
            None => false,
        }
    }

    /// Removes the entry if present. Used on abort to discard an
    /// uncommitted image.
    pub fn remove(&mut self, block_no: u64) {
        self.entries.remove(&block_no);
    }

    /// Number of cached blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nominal capacity in blocks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Evicts unpinned entries, least-recently-used first.
    ///
    /// Removes at least `occupancy - capacity + 1` entries, skipping
    /// pinned ones. Past that minimum it keeps removing only entries at
    /// least ten minutes stale, with a hard cap of `minimum + 10`
    /// removals, so a single insert both bounds the scan cost and
    /// batches the purge of genuinely cold entries.
    fn evict(&mut self) {
        let overflow = self.entries.len() - self.capacity + 1;

        let mut order: Vec<(u64, u64, Instant, bool)> = self
            .entries
            .iter()
            .map(|(&block_no, e)| (e.stamp, block_no, e.touched, e.pinned))
            .collect();
        order.sort_unstable_by_key(|&(stamp, _, _, _)| stamp);

        let mut removed = 0;
        for (_, block_no, touched, pinned) in order {
            if pinned {
                continue;
            }
            if removed >= overflow && touched.elapsed() < STALE_AFTER {
                break;
            }
            self.entries.remove(&block_no);
            removed += 1;
            if removed >= overflow + EXTRA_EVICTIONS {
                break;
            }
        }
    }
}
