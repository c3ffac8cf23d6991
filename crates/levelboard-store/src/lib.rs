//! Levelboard Store - per-guild XP records and ranked leaderboards
//!
//! Each guild gets its own redb database (a shard) holding user records and
//! the guild configuration. The leaderboard is a doubly-linked chain of user
//! records ordered by total XP, kept in order incrementally as XP is granted.

pub mod leaderboard;
pub mod registry;
pub mod shard;
pub mod store;
pub mod tables;
pub mod types;
pub mod xp;

// Re-exports
pub use leaderboard::{ChainReport, LeaderboardEntry};
pub use registry::{ShardRegistry, ShutdownReport};
pub use shard::{GrantOutcome, GuildShard, ProfileHints};
pub use store::{RecordStore, StoreError, StoreResult, UserScan};
pub use types::{ChainLinks, GuildConfig, LevelReward, UserRecord};
pub use xp::{LevelProgress, apply_xp, xp_to_next_level};
