//! Process-wide map from guild id to its shard.
//!
//! Shards are opened lazily on first reference. Construction goes through
//! the map's entry API so that concurrent first touches of the same guild
//! open its database exactly once.

use crate::shard::GuildShard;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use levelboard_common::{Config, GuildId, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Outcome of draining the registry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub closed: usize,
    /// Guilds whose close failed (already logged)
    pub failed: Vec<GuildId>,
}

/// Registry of open guild shards
pub struct ShardRegistry {
    config: Config,
    shards: DashMap<GuildId, Arc<GuildShard>>,
}

impl ShardRegistry {
    /// Create an empty registry. Fails if `config` is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shards: DashMap::new(),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Existing shard for `guild`, opening it if needed.
    pub fn get_or_create(&self, guild: GuildId) -> Result<Arc<GuildShard>> {
        // Fast path: already open
        if let Some(shard) = self.shards.get(&guild) {
            return Ok(Arc::clone(shard.value()));
        }

        // Slow path: the entry guard is held while opening, so a racing
        // caller waits and then sees the shard
        match self.shards.entry(guild) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let shard = Arc::new(GuildShard::open(guild, &self.config)?);
                entry.insert(Arc::clone(&shard));
                Ok(shard)
            }
        }
    }

    /// Shard for `guild` only if already open
    #[must_use]
    pub fn get(&self, guild: GuildId) -> Option<Arc<GuildShard>> {
        self.shards.get(&guild).map(|s| Arc::clone(s.value()))
    }

    #[must_use]
    pub fn guild_ids(&self) -> Vec<GuildId> {
        let mut ids: Vec<GuildId> = self.shards.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Detach and close one shard. Returns `false` if it was not open.
    pub fn remove(&self, guild: GuildId) -> Result<bool> {
        match self.shards.remove(&guild) {
            Some((_, shard)) => {
                shard.close()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove and close every shard, continuing past failures.
    ///
    /// Drains until the map is empty, so a shard inserted by a concurrent
    /// `get_or_create` is closed too rather than dropped from the map open.
    pub fn shutdown_all(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        loop {
            let guilds: Vec<GuildId> = self.shards.iter().map(|e| *e.key()).collect();
            if guilds.is_empty() {
                break;
            }
            for guild in guilds {
                let Some((_, shard)) = self.shards.remove(&guild) else {
                    continue;
                };
                match shard.close() {
                    Ok(()) => report.closed += 1,
                    Err(e) => {
                        error!(guild = %guild, "Database shutdown error: {}", e);
                        report.failed.push(guild);
                    }
                }
            }
        }
        info!(
            closed = report.closed,
            failed = report.failed.len(),
            "Shard registry shut down"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ProfileHints;
    use levelboard_common::{Error, UserId};
    use tempfile::{TempDir, tempdir};

    fn registry() -> (TempDir, ShardRegistry) {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        (dir, ShardRegistry::new(config).unwrap())
    }

    #[test]
    fn test_get_or_create_returns_same_instance() {
        let (dir, registry) = registry();
        let a = registry.get_or_create(GuildId::new(1)).unwrap();
        let b = registry.get_or_create(GuildId::new(1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(dir.path().join("guild_1.redb").exists());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_first_touch_opens_once() {
        let (_dir, registry) = registry();
        let shards: Vec<Arc<GuildShard>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| registry.get_or_create(GuildId::new(42)).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for shard in &shards[1..] {
            assert!(Arc::ptr_eq(&shards[0], shard));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_guilds_are_isolated() {
        let (_dir, registry) = registry();
        let g1 = registry.get_or_create(GuildId::new(1)).unwrap();
        let g2 = registry.get_or_create(GuildId::new(2)).unwrap();
        g1.grant_xp(UserId::new(5), 100, 1).unwrap();
        assert_eq!(g1.user_count().unwrap(), 1);
        assert_eq!(g2.user_count().unwrap(), 0);
        assert_eq!(g2.rank_of(UserId::new(5)).unwrap(), None);
        assert_eq!(registry.guild_ids(), vec![GuildId::new(1), GuildId::new(2)]);
    }

    #[test]
    fn test_get_does_not_create() {
        let (_dir, registry) = registry();
        assert!(registry.get(GuildId::new(3)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_shutdown_closes_all_and_reopens() {
        let (_dir, registry) = registry();
        let g1 = registry.get_or_create(GuildId::new(1)).unwrap();
        registry.get_or_create(GuildId::new(2)).unwrap();
        g1.grant_if_due_at(UserId::new(9), ProfileHints::default(), 100)
            .unwrap();

        let report = registry.shutdown_all();
        assert_eq!(report.closed, 2);
        assert!(report.failed.is_empty());
        assert!(registry.is_empty());
        assert!(matches!(g1.user_count(), Err(Error::StorageUnavailable(_))));

        let reopened = registry.get_or_create(GuildId::new(1)).unwrap();
        assert!(!Arc::ptr_eq(&g1, &reopened));
        assert_eq!(reopened.rank_of(UserId::new(9)).unwrap(), Some(1));
    }

    #[test]
    fn test_shutdown_closes_shards_created_concurrently() {
        let (_dir, registry) = registry();
        for guild in 1..=20 {
            registry.get_or_create(GuildId::new(guild)).unwrap();
        }

        let (created, report) = std::thread::scope(|s| {
            let creator = s.spawn(|| {
                (1000..1040)
                    .map(|g| registry.get_or_create(GuildId::new(g)).unwrap())
                    .collect::<Vec<_>>()
            });
            let report = registry.shutdown_all();
            (creator.join().unwrap(), report)
        });
        assert!(report.failed.is_empty());

        // Every shard is either still registered or was closed
        let mut still_open = 0;
        for shard in &created {
            match registry.get(shard.guild_id()) {
                Some(current) => {
                    assert!(Arc::ptr_eq(&current, shard));
                    still_open += 1;
                }
                None => assert!(matches!(
                    shard.user_count(),
                    Err(Error::StorageUnavailable(_))
                )),
            }
        }
        assert_eq!(report.closed + still_open, 20 + created.len());

        let rest = registry.shutdown_all();
        assert_eq!(rest.closed, still_open);
        assert!(registry.is_empty());
        for shard in &created {
            assert!(shard.user_count().is_err());
        }
    }

    #[test]
    fn test_shutdown_continues_past_close_failure() {
        let (_dir, registry) = registry();
        let shards: Vec<_> = (1..=3)
            .map(|g| registry.get_or_create(GuildId::new(g)).unwrap())
            .collect();
        shards[1].set_fail_commits(true);

        let report = registry.shutdown_all();
        assert_eq!(report.closed, 2);
        assert_eq!(report.failed, vec![GuildId::new(2)]);
        assert!(registry.is_empty());
        for shard in &shards {
            assert!(matches!(
                shard.user_count(),
                Err(Error::StorageUnavailable(_))
            ));
        }

        // The failed shard released its file and can be opened again
        let reopened = registry.get_or_create(GuildId::new(2)).unwrap();
        assert_eq!(reopened.user_count().unwrap(), 0);
    }

    #[test]
    fn test_remove_detaches() {
        let (_dir, registry) = registry();
        let shard = registry.get_or_create(GuildId::new(1)).unwrap();
        assert!(registry.remove(GuildId::new(1)).unwrap());
        assert!(!registry.remove(GuildId::new(1)).unwrap());
        assert!(shard.get_user(UserId::new(1)).is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.defaults.min_xp_per_grant = 0;
        assert!(ShardRegistry::new(config).is_err());
    }
}
