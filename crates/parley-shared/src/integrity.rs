//! Message integrity hashing.
//!
//! A BLAKE3 digest over the content and its creation timestamp lets a client
//! detect a record whose content was altered outside the edit path.

use chrono::{DateTime, Utc};

/// Hex-encoded BLAKE3 hash of `content` bound to `created_at`.
pub fn message_hash(content: &str, created_at: DateTime<Utc>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(content.as_bytes());
    hasher.update(&[0]);
    hasher.update(created_at.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

pub fn verify_message_hash(content: &str, created_at: DateTime<Utc>, expected: &str) -> bool {
    message_hash(content, created_at) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_detects_tampering() {
        let at = Utc::now();
        let hash = message_hash("hello", at);
        assert!(verify_message_hash("hello", at, &hash));
        assert!(!verify_message_hash("hellO", at, &hash));
        assert!(!verify_message_hash("hello", at + chrono::Duration::seconds(1), &hash));
    }
}
