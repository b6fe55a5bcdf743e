//! Core type definitions for DuraFile.

use std::fmt;

/// Identifier grouping the records of one logged transaction.
///
/// Transaction ids increase monotonically and wrap back to 1 before
/// overflowing; they only need to be unique within the window of the
/// live log file, not forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u32);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next transaction ID, wrapping before overflow.
    #[must_use]
    pub const fn next(self) -> Self {
        if self.0 == u32::MAX {
            Self(1)
        } else {
            Self(self.0 + 1)
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_next() {
        assert_eq!(TransactionId::new(1).next(), TransactionId::new(2));
    }

    #[test]
    fn transaction_id_wraps_before_overflow() {
        assert_eq!(TransactionId::new(u32::MAX).next(), TransactionId::new(1));
    }
}
