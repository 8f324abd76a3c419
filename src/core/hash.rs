use sha2::{Digest, Sha256};

/// Number of 16-bit bands a 64-bit hash is split into for bucketing.
pub const BAND_COUNT: usize = 4;

/// SHA-256 of the raw thumbnail bytes as lowercase hex.
/// Used for exact duplicate detection.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Number of differing bits between two hashes.
pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// The `index`-th 16-bit slice of `hash`; band 0 holds the lowest bits.
pub fn band(hash: u64, index: usize) -> u16 {
    debug_assert!(index < BAND_COUNT);
    (hash >> (16 * index)) as u16
}

/// Fixed-width hex rendering of a 64-bit hash.
pub fn hex(hash: u64) -> String {
    format!("{:016x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_format() {
        let sum = checksum(b"Hello, World!");

        // Verify hash is consistent
        assert_eq!(sum, checksum(b"Hello, World!"));

        // 64 hex characters for SHA-256
        assert_eq!(sum.len(), 64);
        assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            sum,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_hex_is_zero_padded() {
        assert_eq!(hex(0xab), "00000000000000ab");
        assert_eq!(hex(u64::MAX), "ffffffffffffffff");
    }

    #[test]
    fn test_different_content_different_checksum() {
        assert_ne!(checksum(b"Content A"), checksum(b"Content B"));
    }

    #[test]
    fn test_hamming_properties() {
        let values = [0u64, 1, 0xFFFF, u64::MAX, 0x0123_4567_89AB_CDEF];
        for &a in &values {
            assert_eq!(hamming(a, a), 0);
            for &b in &values {
                assert_eq!(hamming(a, b), hamming(b, a));
            }
        }
        assert_eq!(hamming(0, u64::MAX), 64);
        assert_eq!(hamming(0b1011, 0b0001), 2);
    }

    #[test]
    fn test_bands_low_to_high() {
        let hash = 0xAAAA_BBBB_CCCC_DDDDu64;
        assert_eq!(band(hash, 0), 0xDDDD);
        assert_eq!(band(hash, 1), 0xCCCC);
        assert_eq!(band(hash, 2), 0xBBBB);
        assert_eq!(band(hash, 3), 0xAAAA);
    }
}
