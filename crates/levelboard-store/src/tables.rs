//! Redb table definitions for a guild shard.

use redb::TableDefinition;

/// Key: raw user id, Value: bincode-encoded `UserRecord`
pub const USER_DATA: TableDefinition<u64, &[u8]> = TableDefinition::new("user_data");

/// Single row at `CONFIG_KEY`, Value: bincode-encoded `GuildConfig`
pub const GUILD_CONFIG: TableDefinition<u64, &[u8]> = TableDefinition::new("guild_config");

/// Sentinel key of the only `GUILD_CONFIG` row
pub const CONFIG_KEY: u64 = 0;
