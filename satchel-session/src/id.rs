//! Session identifier issuance and validation.

use rand::rngs::OsRng;
use rand::{RngCore, TryRngCore};
use std::fmt::Write;

/// Shortest identifier accepted from a client.
pub const MIN_ID_LEN: usize = 16;
/// Longest identifier accepted from a client.
pub const MAX_ID_LEN: usize = 128;

/// Source of fresh session identifiers.
///
/// Implementations must not fail and must not repeat an identifier while
/// another one with the same value could still be live.
pub trait IdGenerator: Send + Sync {
    /// Issue a new opaque identifier.
    fn issue(&self) -> String;
}

/// Built-in identifier strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// `bytes` bytes from the operating system's CSPRNG, hex encoded.
    Random { bytes: usize },
    /// Random UUID (122 bits of entropy).
    UuidV4,
    /// Millisecond timestamp followed by 74 random bits.
    UuidV7,
}

impl Default for IdStrategy {
    fn default() -> Self {
        IdStrategy::Random { bytes: 32 }
    }
}

impl IdStrategy {
    /// Parse a strategy name: `random`, `random:<bytes>`, `uuid-v4`, `uuid-v7`.
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "random" => Some(IdStrategy::default()),
            "uuid-v4" | "uuidv4" | "v4" => Some(IdStrategy::UuidV4),
            "uuid-v7" | "uuidv7" | "v7" => Some(IdStrategy::UuidV7),
            other => other
                .strip_prefix("random:")
                .and_then(|n| n.parse().ok())
                .filter(|n| (MIN_ID_LEN / 2..=MAX_ID_LEN / 2).contains(n))
                .map(|bytes| IdStrategy::Random { bytes }),
        }
    }
}

impl IdGenerator for IdStrategy {
    fn issue(&self) -> String {
        let id = match *self {
            IdStrategy::Random { bytes } => random_hex(bytes.clamp(MIN_ID_LEN / 2, MAX_ID_LEN / 2)),
            IdStrategy::UuidV4 => uuid::Uuid::new_v4().simple().to_string(),
            IdStrategy::UuidV7 => uuid::Uuid::now_v7().simple().to_string(),
        };
        satchel_log::trace!("Issued session identifier ({:?})", self);
        id
    }
}

/// Fill `len` bytes from the OS entropy source, falling back to the
/// thread-local ChaCha generator if the OS source reports an error.
fn random_hex(len: usize) -> String {
    let mut buf = vec![0u8; len];
    if OsRng.try_fill_bytes(&mut buf).is_err() {
        satchel_log::warn!("OS entropy source unavailable, using thread-local CSPRNG");
        rand::rng().fill_bytes(&mut buf);
    }

    let mut out = String::with_capacity(len * 2);
    for byte in buf {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Check that an identifier is safe to use as a storage key or filename.
pub fn is_valid_id(id: &str) -> bool {
    (MIN_ID_LEN..=MAX_ID_LEN).contains(&id.len())
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_ids_are_hex_and_sized() {
        let id = IdStrategy::Random { bytes: 32 }.issue();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(is_valid_id(&id));
    }

    #[test]
    fn test_ids_do_not_repeat() {
        for strategy in [IdStrategy::default(), IdStrategy::UuidV4, IdStrategy::UuidV7] {
            let ids: HashSet<String> = (0..1000).map(|_| strategy.issue()).collect();
            assert_eq!(ids.len(), 1000, "{:?} repeated an identifier", strategy);
        }
    }

    #[test]
    fn test_uuid_ids_pass_validation() {
        assert!(is_valid_id(&IdStrategy::UuidV4.issue()));
        assert!(is_valid_id(&IdStrategy::UuidV7.issue()));
    }

    #[test]
    fn test_random_length_is_clamped() {
        assert_eq!(IdStrategy::Random { bytes: 1 }.issue().len(), MIN_ID_LEN);
        assert_eq!(IdStrategy::Random { bytes: 4096 }.issue().len(), MAX_ID_LEN);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(IdStrategy::from_str("random"), Some(IdStrategy::Random { bytes: 32 }));
        assert_eq!(IdStrategy::from_str("random:16"), Some(IdStrategy::Random { bytes: 16 }));
        assert_eq!(IdStrategy::from_str("random:2"), None);
        assert_eq!(IdStrategy::from_str("UUID-V7"), Some(IdStrategy::UuidV7));
        assert_eq!(IdStrategy::from_str("sha"), None);
    }

    #[test]
    fn test_is_valid_id_rejects_unsafe_input() {
        assert!(!is_valid_id("short"));
        assert!(!is_valid_id("../../etc/passwd-aaaaaaaa"));
        assert!(!is_valid_id("abcdefghijklmnop qrst"));
        assert!(!is_valid_id(&"a".repeat(MAX_ID_LEN + 1)));
        assert!(is_valid_id("abcdefgh_ijkl-mnop"));
    }
}
