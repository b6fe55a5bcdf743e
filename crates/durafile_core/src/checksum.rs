//! Table-driven CRC-32 over log record bytes.

/// Reversed CRC-32 polynomial used for log record checksums.
const POLYNOMIAL: u32 = 0x82F6_3B78;

const TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLYNOMIAL;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Computes the 32-bit checksum of `data`.
///
/// Initial value 0, no final complement. This is the exact checksum the
/// on-disk log format carries, so it must stay bit-for-bit stable; it
/// is not interchangeable with the IEEE or Castagnoli CRC presets.
///
/// A mismatch during replay means a truncated or corrupted record and
/// is treated as "no more valid records", never as a fatal error.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        crc = TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn all_zero_input_is_zero() {
        // With init 0 and table[0] == 0, zero bytes leave the register at 0.
        assert_eq!(crc32(&[0u8; 64]), 0);
    }

    #[test]
    fn deterministic() {
        let data = b"the quick brown fox";
        assert_eq!(crc32(data), crc32(data));
    }

    #[test]
    fn detects_single_bit_flip() {
        let mut data = b"hello world, this is a log record".to_vec();
        let original = crc32(&data);
        data[7] ^= 0x01;
        assert_ne!(crc32(&data), original);
    }

    #[test]
    fn detects_truncation() {
        let data = b"0123456789abcdef";
        assert_ne!(crc32(data), crc32(&data[..15]));
    }

    #[test]
    fn order_sensitive() {
        assert_ne!(crc32(b"ab"), crc32(b"ba"));
    }
}
