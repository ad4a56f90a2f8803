//! When a mutation becomes durable.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Persistence policy of a backend.
///
/// Every session mutation consults this value: `Eager` writes through to
/// the backend inside the mutating call, `Lazy` only marks the in-memory
/// state dirty and leaves the write to [`Session::save`](crate::Session::save).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistencePolicy {
    /// Every mutating call writes through.
    Eager,
    /// Mutations accumulate in memory until `save()`.
    Lazy,
}

impl PersistencePolicy {
    /// Parse `eager` or `lazy`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "eager" => Some(PersistencePolicy::Eager),
            "lazy" => Some(PersistencePolicy::Lazy),
            _ => None,
        }
    }
}

/// Shape of a backend record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// One encoded document per identifier; writes replace the whole state.
    WholeState,
    /// One row or field per key; writes upsert a single key.
    PerKey,
}

impl Granularity {
    /// Per-key backends always write through: each mutation already
    /// targets a single backend field.
    pub fn forced_policy(&self) -> Option<PersistencePolicy> {
        match self {
            Granularity::PerKey => Some(PersistencePolicy::Eager),
            Granularity::WholeState => None,
        }
    }
}

/// Absolute expiry for a record written now with `lifetime`.
pub fn expires_at(lifetime: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(lifetime)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_str() {
        assert_eq!(PersistencePolicy::from_str("Eager"), Some(PersistencePolicy::Eager));
        assert_eq!(PersistencePolicy::from_str("lazy"), Some(PersistencePolicy::Lazy));
        assert_eq!(PersistencePolicy::from_str("sometimes"), None);
    }

    #[test]
    fn test_per_key_forces_eager() {
        assert_eq!(Granularity::PerKey.forced_policy(), Some(PersistencePolicy::Eager));
        assert_eq!(Granularity::WholeState.forced_policy(), None);
    }

    #[test]
    fn test_expires_at() {
        let before = Utc::now();
        let at = expires_at(Duration::from_secs(60));
        assert!(at >= before + chrono::Duration::seconds(60));
        assert_eq!(expires_at(Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
