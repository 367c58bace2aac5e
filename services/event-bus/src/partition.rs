// /shop-platform/services/event-bus/src/partition.rs

use sha2::{Digest, Sha256};

/// Stable key → partition mapping shared by every producer.
///
/// Uses the first four bytes of SHA-256(key) so that the mapping is identical
/// across processes and releases.
pub fn partition_for_key(key: &[u8], partitions: u32) -> u32 {
    let partitions = partitions.max(1);
    let digest = Sha256::digest(key);
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_same_key_same_partition() {
        let a = partition_for_key(b"order-42", 8);
        let b = partition_for_key(b"order-42", 8);
        assert_eq!(a, b);
        assert!(a < 8);
    }

    #[test]
    fn test_zero_partitions_treated_as_one() {
        assert_eq!(partition_for_key(b"anything", 0), 0);
    }

    #[test]
    fn test_keys_spread_over_partitions() {
        let used: HashSet<u32> = (0..200)
            .map(|i| partition_for_key(format!("order-{}", i).as_bytes(), 4))
            .collect();
        assert_eq!(used.len(), 4);
    }
}
