//! Persistent user record store backed by redb.
//!
//! One database file per guild. Reads are point lookups; every mutation goes
//! through a `WriteBatch` committed in a single write transaction so that a
//! leaderboard edit touching several records lands atomically or not at all.

use crate::tables;
use crate::types::{GuildConfig, UserRecord};
use levelboard_common::{Error, UserId};
use redb::{Database, ReadableTable, ReadableTableMetadata};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

/// Error type for record store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode encode error: {0}")]
    Encode(bincode::Error),
    #[error("bincode decode error: {0}")]
    Decode(bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Encode(e) => Self::Serialization(e.to_string()),
            StoreError::Decode(e) => Self::Deserialization(e.to_string()),
            other => Self::StorageUnavailable(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Pending writes for one atomic commit
#[derive(Debug, Default)]
pub struct WriteBatch {
    users: BTreeMap<UserId, UserRecord>,
    removals: BTreeSet<UserId>,
    config: Option<GuildConfig>,
}

impl WriteBatch {
    pub fn put_user(&mut self, record: UserRecord) {
        self.removals.remove(&record.id);
        self.users.insert(record.id, record);
    }

    pub fn remove_user(&mut self, id: UserId) {
        self.users.remove(&id);
        self.removals.insert(id);
    }

    pub fn put_config(&mut self, config: GuildConfig) {
        self.config = Some(config);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.removals.is_empty() && self.config.is_none()
    }

    /// Staged copy of a record, if this batch writes it
    #[must_use]
    pub fn staged_user(&self, id: UserId) -> Option<&UserRecord> {
        self.users.get(&id)
    }

    #[must_use]
    pub fn is_removed(&self, id: UserId) -> bool {
        self.removals.contains(&id)
    }

    #[must_use]
    pub fn user_writes(&self) -> usize {
        self.users.len()
    }
}

/// Result of a full scan of the user table
#[derive(Debug, Default)]
pub struct UserScan {
    pub records: Vec<UserRecord>,
    /// Keys whose stored bytes could not be decoded
    pub undecodable: Vec<u64>,
}

/// Persistent record store for one guild.
pub struct RecordStore {
    db: Database,
    #[cfg(test)]
    fail_commits: AtomicBool,
}

impl RecordStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::USER_DATA)?;
            let _t = write_txn.open_table(tables::GUILD_CONFIG)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db,
            #[cfg(test)]
            fail_commits: AtomicBool::new(false),
        })
    }

    // ---- Users (bincode) ----

    pub fn get_user(&self, id: UserId) -> StoreResult<Option<UserRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::USER_DATA)?;
        match table.get(id.get())? {
            Some(val) => Ok(Some(
                bincode::deserialize(val.value()).map_err(StoreError::Decode)?,
            )),
            None => Ok(None),
        }
    }

    pub fn count_users(&self) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::USER_DATA)?;
        Ok(table.len()?)
    }

    /// Full scan, used by consistency checks. Undecodable rows are logged,
    /// skipped and listed in the result.
    pub fn scan_users(&self) -> StoreResult<UserScan> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::USER_DATA)?;
        let mut scan = UserScan::default();
        for entry in table.iter()? {
            let entry = entry?;
            let key = entry.0.value();
            match bincode::deserialize::<UserRecord>(entry.1.value()) {
                Ok(user) => scan.records.push(user),
                Err(e) => {
                    error!("Failed to decode user '{}': {}", key, e);
                    scan.undecodable.push(key);
                }
            }
        }
        Ok(scan)
    }

    // ---- Guild config (bincode, single key) ----

    pub fn load_config(&self) -> StoreResult<Option<GuildConfig>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::GUILD_CONFIG)?;
        match table.get(tables::CONFIG_KEY)? {
            Some(val) => Ok(Some(
                bincode::deserialize(val.value()).map_err(StoreError::Decode)?,
            )),
            None => Ok(None),
        }
    }

    // ---- Batch write ----

    /// Apply every staged write in one transaction.
    pub fn commit(&self, batch: &WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        #[cfg(test)]
        self.injected_failure()?;
        // Encode before opening the txn so a bad value aborts nothing
        let users = batch
            .users
            .iter()
            .map(|(id, user)| {
                let bytes = bincode::serialize(user).map_err(StoreError::Encode)?;
                Ok((id.get(), bytes))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        let config = batch
            .config
            .as_ref()
            .map(bincode::serialize)
            .transpose()
            .map_err(StoreError::Encode)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut t = write_txn.open_table(tables::USER_DATA)?;
            for (id, bytes) in &users {
                t.insert(*id, bytes.as_slice())?;
            }
            for id in &batch.removals {
                t.remove(id.get())?;
            }
            if let Some(bytes) = &config {
                let mut t2 = write_txn.open_table(tables::GUILD_CONFIG)?;
                t2.insert(tables::CONFIG_KEY, bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Final durable commit before the database handle is dropped.
    pub fn close(self) -> StoreResult<()> {
        #[cfg(test)]
        self.injected_failure()?;
        let write_txn = self.db.begin_write()?;
        write_txn.commit()?;
        drop(self.db);
        Ok(())
    }

    /// Make every later commit and close fail with an I/O error.
    #[cfg(test)]
    pub(crate) fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn injected_failure(&self) -> StoreResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("injected commit failure")));
        }
        Ok(())
    }

    /// Write raw bytes under a user key, bypassing encoding.
    #[cfg(test)]
    pub(crate) fn put_raw_user(&self, key: u64, bytes: &[u8]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut t = write_txn.open_table(tables::USER_DATA)?;
            t.insert(key, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use levelboard_common::config::GuildDefaults;
    use tempfile::tempdir;

    fn user(id: u64, xp: i64) -> UserRecord {
        let mut rec = UserRecord::transient(UserId::new(id));
        rec.total_xp = xp;
        rec.set_links(None, None);
        rec
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/guild_1.redb");
        let store = RecordStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.count_users().unwrap(), 0);
        assert!(store.load_config().unwrap().is_none());
    }

    #[test]
    fn test_batch_put_get_remove() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path().join("g.redb")).unwrap();

        let mut batch = WriteBatch::default();
        batch.put_user(user(1, 10));
        batch.put_user(user(2, 20));
        store.commit(&batch).unwrap();

        assert_eq!(store.count_users().unwrap(), 2);
        assert_eq!(store.get_user(UserId::new(2)).unwrap().unwrap().total_xp, 20);
        assert!(store.get_user(UserId::new(3)).unwrap().is_none());

        let mut batch = WriteBatch::default();
        batch.remove_user(UserId::new(1));
        store.commit(&batch).unwrap();
        assert!(store.get_user(UserId::new(1)).unwrap().is_none());
        assert_eq!(store.scan_users().unwrap().records.len(), 1);
    }

    #[test]
    fn test_put_overwrites_pending_removal() {
        let mut batch = WriteBatch::default();
        batch.remove_user(UserId::new(4));
        batch.put_user(user(4, 1));
        assert!(!batch.is_removed(UserId::new(4)));
        assert!(batch.staged_user(UserId::new(4)).is_some());
    }

    #[test]
    fn test_config_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("g.redb");
        let mut cfg = GuildConfig::from_defaults(&GuildDefaults::default());
        cfg.seconds_between_grants = 5;
        cfg.top_id = Some(UserId::new(9));

        {
            let store = RecordStore::open(&path).unwrap();
            let mut batch = WriteBatch::default();
            batch.put_config(cfg.clone());
            batch.put_user(user(9, 3));
            store.commit(&batch).unwrap();
            store.close().unwrap();
        }

        let store = RecordStore::open(&path).unwrap();
        assert_eq!(store.load_config().unwrap(), Some(cfg));
        assert_eq!(store.count_users().unwrap(), 1);
    }

    #[test]
    fn test_storage_error_maps_to_unavailable() {
        let err: Error = StoreError::Io(std::io::Error::other("boom")).into();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[test]
    fn test_codec_errors_map_by_direction() {
        let encode: Error = StoreError::Encode(Box::new(bincode::ErrorKind::SizeLimit)).into();
        assert!(matches!(encode, Error::Serialization(_)));
        let decode: Error = StoreError::Decode(Box::new(bincode::ErrorKind::SizeLimit)).into();
        assert!(matches!(decode, Error::Deserialization(_)));
    }

    #[test]
    fn test_scan_skips_undecodable_rows() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path().join("g.redb")).unwrap();
        let mut batch = WriteBatch::default();
        batch.put_user(user(1, 10));
        store.commit(&batch).unwrap();
        store.put_raw_user(2, &[0xff]).unwrap();

        let scan = store.scan_users().unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].id, UserId::new(1));
        assert_eq!(scan.undecodable, vec![2]);
        assert!(matches!(
            store.get_user(UserId::new(2)).map_err(Error::from),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn test_injected_failure_aborts_commit_and_close() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path().join("g.redb")).unwrap();
        store.set_fail_commits(true);
        let mut batch = WriteBatch::default();
        batch.put_user(user(1, 10));
        assert!(matches!(store.commit(&batch), Err(StoreError::Io(_))));
        assert_eq!(store.count_users().unwrap(), 0);
        assert!(store.close().is_err());
    }
}
