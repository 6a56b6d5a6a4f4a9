//! ID generation and wall-clock helpers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a short, process-unique ID like `job-3fa2c1d9e0b4`.
///
/// The seed ties the ID to its context (a node ID, a job ID); a
/// process-wide sequence and the current time keep repeated calls with
/// the same seed distinct.
pub fn generate_id(prefix: &str, seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(epoch_nanos().to_le_bytes());
    hasher.update(SEQUENCE.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{prefix}-{}", &digest[..12])
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn epoch_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_prefixed_and_unique() {
        let a = generate_id("job", "node-1");
        let b = generate_id("job", "node-1");
        assert!(a.starts_with("job-"));
        assert_eq!(a.len(), "job-".len() + 12);
        assert_ne!(a, b);
    }

    #[test]
    fn epoch_millis_returns_reasonable_value() {
        // Should be after 2024-01-01.
        assert!(epoch_millis() > 1_704_067_200_000);
    }
}
