//! Guild shard: one database, one config, one lock.
//!
//! Every read and write of a guild's records, chain pointers and config
//! happens under the shard mutex. Mutations stage their writes in a
//! [`ChainEdit`], commit them in one transaction, and only then replace the
//! in-memory config, so a failed commit leaves the shard as it was.

use crate::leaderboard::{self, Anchors, ChainEdit, ChainReport, LeaderboardEntry};
use crate::store::RecordStore;
use crate::types::{GuildConfig, UserRecord};
use crate::xp::apply_xp;
use levelboard_common::{Config, Error, GuildId, Result, Timestamp, UserId, unix_now};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Display data supplied by the platform alongside an activity event
#[derive(Clone, Debug, Default)]
pub struct ProfileHints {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

impl ProfileHints {
    fn apply(self, record: &mut UserRecord) {
        if let Some(name) = self.name {
            record.last_known_name = Some(name);
        }
        if let Some(avatar) = self.avatar {
            record.last_known_avatar = Some(avatar);
        }
    }
}

/// Result of a grant attempt
#[derive(Clone, Debug)]
pub struct GrantOutcome {
    /// The user's record after the call (unchanged if not granted)
    pub record: UserRecord,
    pub granted: bool,
    pub previous_level: u32,
}

impl GrantOutcome {
    #[must_use]
    pub const fn leveled_up(&self) -> bool {
        self.record.level > self.previous_level
    }

    /// The `(record, granted)` pair
    #[must_use]
    pub fn into_parts(self) -> (UserRecord, bool) {
        (self.record, self.granted)
    }
}

struct ShardState {
    /// `None` once closed
    store: Option<RecordStore>,
    config: GuildConfig,
    rng: StdRng,
}

impl ShardState {
    fn store(&self) -> Result<&RecordStore> {
        self.store
            .as_ref()
            .ok_or_else(|| Error::storage("shard is closed"))
    }

    const fn anchors(&self) -> Anchors {
        Anchors {
            top: self.config.top_id,
            bottom: self.config.bottom_id,
        }
    }

    fn fetch(&self, id: UserId) -> Result<UserRecord> {
        Ok(self
            .store()?
            .get_user(id)?
            .unwrap_or_else(|| UserRecord::transient(id)))
    }

    /// Apply XP, link and reposition, commit, then adopt the new anchors.
    fn grant(&mut self, mut user: UserRecord, amount: i64, now: Timestamp) -> Result<UserRecord> {
        apply_xp(&mut user, amount)?;
        user.last_grant_time = now;

        let store = self.store()?;
        let mut edit = ChainEdit::new(store, self.anchors());
        edit.link_new(&mut user)?;
        let passed = edit.reposition(&mut user)?;
        let (mut batch, anchors) = edit.finish();

        let mut config = self.config.clone();
        let anchors_changed = anchors != self.anchors();
        if anchors_changed {
            config.top_id = anchors.top;
            config.bottom_id = anchors.bottom;
            batch.put_config(config.clone());
        }
        store.commit(&batch)?;
        if anchors_changed {
            self.config = config;
        }
        if passed > 0 {
            debug!(user = %user.id, passed, xp = user.total_xp, "Leaderboard reposition");
        }
        Ok(user)
    }

    /// Validate and commit `config` with the live anchors, then adopt it.
    fn replace_config(&mut self, mut config: GuildConfig) -> Result<GuildConfig> {
        config.top_id = self.config.top_id;
        config.bottom_id = self.config.bottom_id;
        config.validate()?;

        let mut batch = crate::store::WriteBatch::default();
        batch.put_config(config.clone());
        self.store()?.commit(&batch)?;
        self.config = config.clone();
        Ok(config)
    }
}

/// Storage and lock unit for one guild.
pub struct GuildShard {
    guild_id: GuildId,
    path: PathBuf,
    max_page_size: usize,
    state: Mutex<ShardState>,
}

impl GuildShard {
    /// Open (or create) the shard database for `guild_id`.
    ///
    /// A new shard gets a guild config built from `config.defaults`.
    pub fn open(guild_id: GuildId, config: &Config) -> Result<Self> {
        let path = config.storage.shard_path(guild_id);
        let store = RecordStore::open(&path)?;
        let guild_config = match store.load_config()? {
            Some(existing) => {
                info!(guild = %guild_id, path = %path.display(), "Opened guild shard");
                existing
            }
            None => {
                let fresh = GuildConfig::from_defaults(&config.defaults);
                let mut batch = crate::store::WriteBatch::default();
                batch.put_config(fresh.clone());
                store.commit(&batch)?;
                info!(guild = %guild_id, path = %path.display(), "Created guild shard");
                fresh
            }
        };

        Ok(Self {
            guild_id,
            path,
            max_page_size: config.leaderboard.max_page_size,
            state: Mutex::new(ShardState {
                store: Some(store),
                config: guild_config,
                rng: StdRng::from_entropy(),
            }),
        })
    }

    #[must_use]
    pub const fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored record, or a transient zero record for an unknown user.
    pub fn get_user(&self, user_id: UserId) -> Result<UserRecord> {
        self.state.lock().fetch(user_id)
    }

    /// Grant a random amount in the configured range if the cooldown has
    /// passed, using the wall clock.
    pub fn grant_if_due(&self, user_id: UserId, hints: ProfileHints) -> Result<GrantOutcome> {
        self.grant_if_due_at(user_id, hints, unix_now())
    }

    /// [`Self::grant_if_due`] at an explicit time.
    pub fn grant_if_due_at(
        &self,
        user_id: UserId,
        hints: ProfileHints,
        now: Timestamp,
    ) -> Result<GrantOutcome> {
        check_user_id(user_id)?;
        let mut state = self.state.lock();
        let mut user = state.fetch(user_id)?;
        let previous_level = user.level;

        let elapsed = now.saturating_sub(user.last_grant_time);
        if elapsed < i64::from(state.config.seconds_between_grants) {
            return Ok(GrantOutcome {
                record: user,
                granted: false,
                previous_level,
            });
        }

        let (min, max) = (state.config.min_xp_per_grant, state.config.max_xp_per_grant);
        if min == 0 || min > max {
            return Err(Error::configuration(format!(
                "guild {} has invalid grant range {min}..={max}",
                self.guild_id
            )));
        }
        let amount = i64::from(state.rng.gen_range(min..=max));
        hints.apply(&mut user);
        let record = state.grant(user, amount, now)?;
        if record.level > previous_level {
            debug!(guild = %self.guild_id, user = %user_id, level = record.level, "Level up");
        }
        Ok(GrantOutcome {
            record,
            granted: true,
            previous_level,
        })
    }

    /// Grant an explicit amount, ignoring the cooldown.
    pub fn grant_xp(&self, user_id: UserId, amount: i64, now: Timestamp) -> Result<GrantOutcome> {
        check_user_id(user_id)?;
        if amount <= 0 {
            return Err(Error::invalid_argument(format!(
                "XP {amount} is invalid: must be > 0"
            )));
        }
        let mut state = self.state.lock();
        let user = state.fetch(user_id)?;
        let previous_level = user.level;
        let record = state.grant(user, amount, now)?;
        info!(guild = %self.guild_id, user = %user_id, amount, "Granted XP");
        Ok(GrantOutcome {
            record,
            granted: true,
            previous_level,
        })
    }

    /// Refresh display data of a stored user. Returns `None` for unknown
    /// users, which are not materialized by this call.
    pub fn touch_profile(
        &self,
        user_id: UserId,
        hints: ProfileHints,
    ) -> Result<Option<UserRecord>> {
        let state = self.state.lock();
        let store = state.store()?;
        let Some(mut user) = store.get_user(user_id)? else {
            return Ok(None);
        };
        hints.apply(&mut user);
        let mut batch = crate::store::WriteBatch::default();
        batch.put_user(user.clone());
        store.commit(&batch)?;
        Ok(Some(user))
    }

    /// Snapshot of the guild config
    #[must_use]
    pub fn config(&self) -> GuildConfig {
        self.state.lock().config.clone()
    }

    /// Mutate and persist the guild config under the shard lock. Chain
    /// anchors cannot be changed this way; edits to them are discarded.
    pub fn update_config<F>(&self, f: F) -> Result<GuildConfig>
    where
        F: FnOnce(&mut GuildConfig),
    {
        let mut state = self.state.lock();
        let mut config = state.config.clone();
        f(&mut config);
        let config = state.replace_config(config)?;
        info!(guild = %self.guild_id, "Updated guild config");
        Ok(config)
    }

    /// Persist a config edited outside the lock, typically a modified copy
    /// from [`Self::config`]. The anchors in `config` are ignored and the
    /// live ones kept. Returns the config as stored.
    pub fn persist_config(&self, config: GuildConfig) -> Result<GuildConfig> {
        let config = self.state.lock().replace_config(config)?;
        info!(guild = %self.guild_id, "Persisted guild config");
        Ok(config)
    }

    /// Unlink a user from the leaderboard and erase its record.
    ///
    /// Returns `false` for an unknown user. Refuses with `ChainCorrupted`
    /// if the neighbours do not point back at the user.
    pub fn remove_user(&self, user_id: UserId) -> Result<bool> {
        let mut state = self.state.lock();
        let store = state.store()?;
        let Some(user) = store.get_user(user_id)? else {
            return Ok(false);
        };
        let mut edit = ChainEdit::new(store, state.anchors());
        edit.unlink_and_remove(&user)?;
        let (mut batch, anchors) = edit.finish();

        let mut config = state.config.clone();
        config.top_id = anchors.top;
        config.bottom_id = anchors.bottom;
        batch.put_config(config.clone());
        store.commit(&batch)?;
        state.config = config;
        info!(guild = %self.guild_id, user = %user_id, "Removed user");
        Ok(true)
    }

    /// Up to `max_count` entries from 1-based `start_rank`, read under the
    /// lock. `max_count` is clamped to the configured page size.
    pub fn walk_leaderboard(
        &self,
        start_rank: u64,
        max_count: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        let state = self.state.lock();
        leaderboard::walk(
            state.store()?,
            state.config.top_id,
            start_rank,
            max_count.min(self.max_page_size),
        )
    }

    /// 1-based rank, or `None` if the user is not on the leaderboard.
    pub fn rank_of(&self, user_id: UserId) -> Result<Option<u64>> {
        let state = self.state.lock();
        let user = state.fetch(user_id)?;
        leaderboard::rank_of(state.store()?, &user)
    }

    /// Number of stored (leaderboard) users
    pub fn user_count(&self) -> Result<u64> {
        Ok(self.state.lock().store()?.count_users()?)
    }

    /// Full consistency check of the leaderboard chain
    pub fn verify(&self) -> Result<ChainReport> {
        let state = self.state.lock();
        leaderboard::check_chain(state.store()?, state.anchors())
    }

    #[cfg(test)]
    pub(crate) fn set_fail_commits(&self, fail: bool) {
        if let Some(store) = self.state.lock().store.as_ref() {
            store.set_fail_commits(fail);
        }
    }

    /// Flush and release the database. Later calls fail with
    /// `StorageUnavailable`; closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(store) = state.store.take() {
            store.close()?;
            info!(guild = %self.guild_id, "Closed guild shard");
        }
        Ok(())
    }
}

fn check_user_id(user_id: UserId) -> Result<()> {
    if user_id.is_valid() {
        Ok(())
    } else {
        Err(Error::invalid_argument("user id 0 is reserved"))
    }
}
