//! Version identifiers
//!
//! A version is a UNIX epoch in milliseconds. It serves double duty: the
//! stamp on a single record state, and the monotonic clock of a whole
//! database. Commits assign `max(now, previous + 1)` so the sequence is
//! strictly increasing even when the wall clock stalls or steps backwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond-precision version identifier.
///
/// ## Invariants
///
/// - Versions are totally ordered and strictly increase per database.
/// - The zero version represents the Unix epoch and is never assigned.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Unix epoch (1970-01-01 00:00:00 UTC)
    pub const EPOCH: Version = Version(0);

    /// Maximum representable version
    pub const MAX: Version = Version(u64::MAX);

    /// The version for the current moment.
    ///
    /// Returns the epoch if the system clock reads before 1970, which only
    /// happens on badly broken hosts.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Version(duration.as_millis() as u64)
    }

    /// Create a version from milliseconds since epoch
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Version(millis)
    }

    /// Get milliseconds since epoch
    #[inline]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// The next assignable version after this one.
    #[inline]
    pub const fn successor(&self) -> Self {
        Version(self.0.saturating_add(1))
    }

    /// The commit clock rule: the current time, bumped to stay strictly
    /// ahead of the previous committed version.
    pub fn next_after(previous: Option<Version>) -> Self {
        let now = Version::now();
        match previous {
            Some(prev) if now <= prev => prev.successor(),
            _ => now,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(millis: u64) -> Self {
        Version(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Version::from_millis(1) < Version::from_millis(2));
        assert!(Version::EPOCH < Version::now());
    }

    #[test]
    fn test_successor() {
        assert_eq!(Version::from_millis(5).successor(), Version::from_millis(6));
        assert_eq!(Version::MAX.successor(), Version::MAX);
    }

    #[test]
    fn test_next_after_is_strictly_increasing() {
        let far_future = Version::from_millis(u64::MAX - 10);
        let next = Version::next_after(Some(far_future));
        assert_eq!(next, far_future.successor());

        let next = Version::next_after(Some(Version::EPOCH));
        assert!(next > Version::EPOCH);
    }

    #[test]
    fn test_serde_is_transparent() {
        let v = Version::from_millis(1672531200000);
        assert_eq!(serde_json::to_string(&v).unwrap(), "1672531200000");
        let back: Version = serde_json::from_str("1672531200000").unwrap();
        assert_eq!(back, v);
    }
}
