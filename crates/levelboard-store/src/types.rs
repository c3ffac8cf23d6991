//! Stored types for shard persistence.
//!
//! These types are serialized to redb via bincode.

use levelboard_common::config::GuildDefaults;
use levelboard_common::{Error, Result, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Leaderboard membership of a user record.
///
/// A record fetched for a user who has never been granted XP is `Transient`:
/// it exists only in memory and is invisible to leaderboard scans. Every
/// persisted record is `Linked`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainLinks {
    #[default]
    Transient,
    Linked {
        /// Neighbour with higher-or-equal XP (`None` at the head)
        prev: Option<UserId>,
        /// Neighbour with lower-or-equal XP (`None` at the tail)
        next: Option<UserId>,
    },
}

/// XP and leaderboard state for one user in one guild
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    /// Accumulated XP, never decreases
    pub total_xp: i64,
    pub level: u32,
    /// XP accumulated toward the next level
    pub partial_xp: i64,
    /// Unix seconds of the last grant, 0 if never granted
    pub last_grant_time: Timestamp,
    pub links: ChainLinks,
    pub last_known_name: Option<String>,
    pub last_known_avatar: Option<String>,
}

impl UserRecord {
    /// Zero-valued record for a user with no stored data
    #[must_use]
    pub const fn transient(id: UserId) -> Self {
        Self {
            id,
            total_xp: 0,
            level: 0,
            partial_xp: 0,
            last_grant_time: 0,
            links: ChainLinks::Transient,
            last_known_name: None,
            last_known_avatar: None,
        }
    }

    #[must_use]
    pub const fn is_linked(&self) -> bool {
        matches!(self.links, ChainLinks::Linked { .. })
    }

    /// Higher-ranked neighbour
    #[must_use]
    pub const fn leaderboard_prev(&self) -> Option<UserId> {
        match self.links {
            ChainLinks::Linked { prev, .. } => prev,
            ChainLinks::Transient => None,
        }
    }

    /// Lower-ranked neighbour
    #[must_use]
    pub const fn leaderboard_next(&self) -> Option<UserId> {
        match self.links {
            ChainLinks::Linked { next, .. } => next,
            ChainLinks::Transient => None,
        }
    }

    pub(crate) const fn set_links(&mut self, prev: Option<UserId>, next: Option<UserId>) {
        self.links = ChainLinks::Linked { prev, next };
    }

    pub(crate) const fn set_prev(&mut self, prev: Option<UserId>) {
        let next = self.leaderboard_next();
        self.set_links(prev, next);
    }

    pub(crate) const fn set_next(&mut self, next: Option<UserId>) {
        let prev = self.leaderboard_prev();
        self.set_links(prev, next);
    }

    /// XP needed to complete the current level
    #[must_use]
    pub const fn xp_to_next_level(&self) -> i64 {
        crate::xp::xp_to_next_level(self.level)
    }
}

/// A reward unlocked when a user reaches `level`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelReward {
    pub level: u32,
    /// Opaque reward reference (a role id on the chat platform)
    pub reward: u64,
}

/// Per-guild tuning and chain anchors, stored in the `guild_config` table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildConfig {
    /// Inclusive lower bound of a single grant
    pub min_xp_per_grant: u32,
    /// Inclusive upper bound of a single grant
    pub max_xp_per_grant: u32,
    /// Cooldown between grants for the same user
    pub seconds_between_grants: u32,
    /// Level-ups below this level are not announced
    pub minimum_level_for_notification: u32,
    /// Zones (channels) where activity earns no XP
    pub restricted_zones: BTreeSet<u64>,
    /// May contain duplicates; every entry at or below a level applies
    pub level_rewards: Vec<LevelReward>,
    /// Human-readable guild name for leaderboard pages
    pub display_name: Option<String>,
    pub(crate) top_id: Option<UserId>,
    pub(crate) bottom_id: Option<UserId>,
}

impl GuildConfig {
    /// Fresh config for a new guild
    #[must_use]
    pub fn from_defaults(defaults: &GuildDefaults) -> Self {
        Self {
            min_xp_per_grant: defaults.min_xp_per_grant,
            max_xp_per_grant: defaults.max_xp_per_grant,
            seconds_between_grants: defaults.seconds_between_grants,
            minimum_level_for_notification: defaults.minimum_level_for_notification,
            restricted_zones: BTreeSet::new(),
            level_rewards: Vec::new(),
            display_name: None,
            top_id: None,
            bottom_id: None,
        }
    }

    /// Head of the leaderboard chain
    #[must_use]
    pub const fn top(&self) -> Option<UserId> {
        self.top_id
    }

    /// Tail of the leaderboard chain
    #[must_use]
    pub const fn bottom(&self) -> Option<UserId> {
        self.bottom_id
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_xp_per_grant == 0 {
            return Err(Error::invalid_argument("min_xp_per_grant must be > 0"));
        }
        if self.min_xp_per_grant > self.max_xp_per_grant {
            return Err(Error::invalid_argument(format!(
                "min_xp_per_grant ({}) exceeds max_xp_per_grant ({})",
                self.min_xp_per_grant, self.max_xp_per_grant
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_restricted(&self, zone: u64) -> bool {
        self.restricted_zones.contains(&zone)
    }

    /// Whether a level-up to `level` should be announced
    #[must_use]
    pub const fn should_notify(&self, level: u32) -> bool {
        level >= self.minimum_level_for_notification
    }

    /// Every reward a user at `level` is entitled to, in configured order
    pub fn rewards_at_or_below(&self, level: u32) -> impl Iterator<Item = &LevelReward> {
        self.level_rewards.iter().filter(move |r| r.level <= level)
    }

    /// Rewards whose level lies in `(old_level, new_level]`
    pub fn rewards_unlocked_between(
        &self,
        old_level: u32,
        new_level: u32,
    ) -> impl Iterator<Item = &LevelReward> {
        self.level_rewards
            .iter()
            .filter(move |r| r.level > old_level && r.level <= new_level)
    }
}
