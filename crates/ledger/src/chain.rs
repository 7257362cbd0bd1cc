use sha2::{Digest, Sha256};

/// Hash preceding the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// `SHA256(ts|event|detail|prev)` as lowercase hex.
pub fn entry_hash(ts: &str, event: &str, detail: &str, prev_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ts.as_bytes());
    hasher.update(b"|");
    hasher.update(event.as_bytes());
    hasher.update(b"|");
    hasher.update(detail.as_bytes());
    hasher.update(b"|");
    hasher.update(prev_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Result of replaying the v1 chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub checked: u64,
    pub head_id: Option<i64>,
    pub head_hash: String,
    /// First entry whose link or hash does not replay.
    pub first_broken: Option<i64>,
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        self.first_broken.is_none()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_is_64_zeros() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }

    #[test]
    fn test_hash_depends_on_every_field() {
        let base = entry_hash("t", "e", "d", GENESIS_HASH);
        assert_eq!(base.len(), 64);
        assert_ne!(base, entry_hash("t2", "e", "d", GENESIS_HASH));
        assert_ne!(base, entry_hash("t", "e2", "d", GENESIS_HASH));
        assert_ne!(base, entry_hash("t", "e", "d2", GENESIS_HASH));
        assert_ne!(base, entry_hash("t", "e", "d", &base));
    }
}
