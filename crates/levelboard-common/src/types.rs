//! Core type definitions for Levelboard
//!
//! Identifiers for guilds and users plus the timestamp convention shared by
//! every component.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a guild (one leaderboard shard per guild)
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
)]
#[display("{_0}")]
pub struct GuildId(u64);

impl GuildId {
    /// Create from a raw platform identifier
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw identifier
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Identifier of a user, unique within a guild shard.
///
/// The raw value 0 is reserved for "no user" and is never stored.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
)]
#[display("{_0}")]
pub struct UserId(u64);

impl UserId {
    /// Create from a raw platform identifier
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw identifier
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this identifier may be stored (non-zero)
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Unix timestamp in whole seconds
pub type Timestamp = i64;

/// Current wall-clock time as unix seconds
#[must_use]
pub fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_validity() {
        assert!(!UserId::new(0).is_valid());
        assert!(UserId::new(42).is_valid());
        assert_eq!(UserId::from(7u64).get(), 7);
    }

    #[test]
    fn test_display() {
        assert_eq!(GuildId::new(1234).to_string(), "1234");
        assert_eq!(UserId::new(99).to_string(), "99");
    }

    #[test]
    fn test_unix_now_is_positive() {
        assert!(unix_now() > 1_600_000_000);
    }
}
