//! Leaderboard chain over user records.
//!
//! The leaderboard is a doubly-linked list threaded through the records
//! themselves by user id: `prev` points toward the head (more XP), `next`
//! toward the tail. The head and tail ids are the anchors kept in the guild
//! config. Records enter at the tail and only ever move toward the head,
//! which holds as long as XP never decreases.
//!
//! Mutations are staged in a [`ChainEdit`] and committed as one batch by the
//! shard; nothing here writes to disk directly.

use crate::store::{RecordStore, WriteBatch};
use crate::types::UserRecord;
use levelboard_common::{Error, Result, UserId};
use serde::Serialize;
use std::collections::HashSet;
use tracing::warn;

/// Head and tail of the chain
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Anchors {
    pub top: Option<UserId>,
    pub bottom: Option<UserId>,
}

/// One row of a leaderboard page
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    /// 1-based position from the head
    pub rank: u64,
    pub record: UserRecord,
}

/// Result of a full chain consistency check
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    /// Records reachable from the head
    pub linked: u64,
    /// Rows persisted in the shard, decodable or not
    pub stored: u64,
    /// Keys of rows that could not be decoded and were skipped
    pub undecodable: Vec<u64>,
}

/// Staged chain mutation.
///
/// Reads resolve through the staged writes first, then the store, so a walk
/// sees its own edits. Dropping an edit without committing its batch leaves
/// disk and the caller's anchors untouched.
pub struct ChainEdit<'a> {
    store: &'a RecordStore,
    anchors: Anchors,
    batch: WriteBatch,
}

impl<'a> ChainEdit<'a> {
    pub fn new(store: &'a RecordStore, anchors: Anchors) -> Self {
        Self {
            store,
            anchors,
            batch: WriteBatch::default(),
        }
    }

    #[must_use]
    pub const fn anchors(&self) -> Anchors {
        self.anchors
    }

    /// Staged writes and the resulting anchors
    #[must_use]
    pub fn finish(self) -> (WriteBatch, Anchors) {
        (self.batch, self.anchors)
    }

    /// Resolve a chain pointer. A pointer to a missing record is corruption.
    fn load(&self, id: UserId) -> Result<UserRecord> {
        if let Some(staged) = self.batch.staged_user(id) {
            return Ok(staged.clone());
        }
        if self.batch.is_removed(id) {
            return Err(Error::chain_corrupted(format!(
                "pointer to removed user {id}"
            )));
        }
        self.store
            .get_user(id)?
            .ok_or_else(|| Error::chain_corrupted(format!("dangling pointer to user {id}")))
    }

    fn stage(&mut self, record: UserRecord) {
        self.batch.put_user(record);
    }

    /// Materialize a transient record at the tail of the chain.
    ///
    /// Already-linked records are staged unchanged.
    pub fn link_new(&mut self, user: &mut UserRecord) -> Result<()> {
        if user.is_linked() {
            self.stage(user.clone());
            return Ok(());
        }
        match self.anchors.bottom {
            None => {
                user.set_links(None, None);
                self.anchors.top = Some(user.id);
            }
            Some(bottom_id) => {
                let mut bottom = self.load(bottom_id)?;
                bottom.set_next(Some(user.id));
                user.set_links(Some(bottom_id), None);
                self.stage(bottom);
            }
        }
        self.anchors.bottom = Some(user.id);
        self.stage(user.clone());
        Ok(())
    }

    /// Move `user` toward the head until its higher neighbour has at least
    /// as much XP. Returns the number of records passed.
    ///
    /// Time is proportional to the distance moved; the common case (order
    /// unchanged) reads a single neighbour.
    pub fn reposition(&mut self, user: &mut UserRecord) -> Result<u64> {
        self.stage(user.clone());
        let Some(above_id) = user.leaderboard_prev() else {
            return Ok(0);
        };
        let mut above = self.load(above_id)?;
        if above.total_xp >= user.total_xp {
            return Ok(0);
        }

        // Unlink: `above` now points past `user`
        let below_id = user.leaderboard_next();
        above.set_next(below_id);
        match below_id {
            Some(id) => {
                let mut below = self.load(id)?;
                below.set_prev(Some(above_id));
                self.stage(below);
            }
            None => self.anchors.bottom = Some(above_id),
        }
        self.stage(above);

        // Walk toward the head past every record with less XP
        let mut passed = 1;
        let mut cursor_id = above_id;
        loop {
            let mut cursor = self.load(cursor_id)?;
            match cursor.leaderboard_prev() {
                None => {
                    cursor.set_prev(Some(user.id));
                    user.set_links(None, Some(cursor_id));
                    self.anchors.top = Some(user.id);
                    self.stage(cursor);
                    break;
                }
                Some(higher_id) => {
                    let mut higher = self.load(higher_id)?;
                    if higher.total_xp >= user.total_xp {
                        higher.set_next(Some(user.id));
                        cursor.set_prev(Some(user.id));
                        user.set_links(Some(higher_id), Some(cursor_id));
                        self.stage(higher);
                        self.stage(cursor);
                        break;
                    }
                    cursor_id = higher_id;
                    passed += 1;
                }
            }
        }
        self.stage(user.clone());
        Ok(passed)
    }

    /// Detach a linked record and stage its removal.
    ///
    /// Both neighbours (or the anchors, at the ends) must point back at
    /// `user`; otherwise nothing is staged and `ChainCorrupted` is returned.
    pub fn unlink_and_remove(&mut self, user: &UserRecord) -> Result<()> {
        if !user.is_linked() {
            return Err(Error::invalid_argument(format!(
                "user {} is not on the leaderboard",
                user.id
            )));
        }
        let prev_id = user.leaderboard_prev();
        let next_id = user.leaderboard_next();

        let mut prev = prev_id.map(|id| self.load(id)).transpose()?;
        let mut next = next_id.map(|id| self.load(id)).transpose()?;

        match &prev {
            Some(p) if p.leaderboard_next() != Some(user.id) => {
                return Err(Error::chain_corrupted(format!(
                    "user {} has prev {} whose next is {:?}",
                    user.id,
                    p.id,
                    p.leaderboard_next()
                )));
            }
            None if self.anchors.top != Some(user.id) => {
                return Err(Error::chain_corrupted(format!(
                    "user {} has no prev but top is {:?}",
                    user.id, self.anchors.top
                )));
            }
            _ => {}
        }
        match &next {
            Some(n) if n.leaderboard_prev() != Some(user.id) => {
                return Err(Error::chain_corrupted(format!(
                    "user {} has next {} whose prev is {:?}",
                    user.id,
                    n.id,
                    n.leaderboard_prev()
                )));
            }
            None if self.anchors.bottom != Some(user.id) => {
                return Err(Error::chain_corrupted(format!(
                    "user {} has no next but bottom is {:?}",
                    user.id, self.anchors.bottom
                )));
            }
            _ => {}
        }

        if let Some(p) = prev.as_mut() {
            p.set_next(next_id);
        } else {
            self.anchors.top = next_id;
        }
        if let Some(n) = next.as_mut() {
            n.set_prev(prev_id);
        } else {
            self.anchors.bottom = prev_id;
        }
        if let Some(p) = prev {
            self.stage(p);
        }
        if let Some(n) = next {
            self.stage(n);
        }
        self.batch.remove_user(user.id);
        Ok(())
    }
}

/// Read up to `max_count` records starting at 1-based `start_rank`.
pub fn walk(
    store: &RecordStore,
    top: Option<UserId>,
    start_rank: u64,
    max_count: usize,
) -> Result<Vec<LeaderboardEntry>> {
    let start_rank = start_rank.max(1);
    let limit = store.count_users()?;
    let mut entries = Vec::with_capacity(max_count.min(1024));
    if max_count == 0 || start_rank > limit {
        return Ok(entries);
    }

    let mut rank = 0;
    let mut cursor = top;
    while let Some(id) = cursor {
        rank += 1;
        if rank > limit {
            return Err(Error::chain_corrupted(format!(
                "cycle detected after {limit} records"
            )));
        }
        let record = store
            .get_user(id)?
            .ok_or_else(|| Error::chain_corrupted(format!("dangling pointer to user {id}")))?;
        cursor = record.leaderboard_next();
        if rank >= start_rank {
            entries.push(LeaderboardEntry { rank, record });
            if entries.len() >= max_count {
                break;
            }
        }
    }
    Ok(entries)
}

/// 1-based rank of a linked record, counted by walking toward the head.
pub fn rank_of(store: &RecordStore, record: &UserRecord) -> Result<Option<u64>> {
    if !record.is_linked() {
        return Ok(None);
    }
    let limit = store.count_users()?;
    let mut rank = 1;
    let mut cursor = record.leaderboard_prev();
    while let Some(id) = cursor {
        rank += 1;
        if rank > limit {
            return Err(Error::chain_corrupted(format!(
                "cycle detected walking up from user {}",
                record.id
            )));
        }
        cursor = store
            .get_user(id)?
            .ok_or_else(|| Error::chain_corrupted(format!("dangling pointer to user {id}")))?
            .leaderboard_prev();
    }
    Ok(Some(rank))
}

/// Verify the whole chain against the anchors.
///
/// Checks acyclicity, back-pointer symmetry, XP order, that the last record
/// reached is the tail anchor and that every decodable stored record is
/// linked. Undecodable rows are skipped and listed in the report.
pub fn check_chain(store: &RecordStore, anchors: Anchors) -> Result<ChainReport> {
    let mut seen = HashSet::new();
    let mut expected_prev: Option<UserId> = None;
    let mut last_xp = i64::MAX;
    let mut cursor = anchors.top;

    while let Some(id) = cursor {
        if !seen.insert(id) {
            return Err(Error::chain_corrupted(format!("cycle at user {id}")));
        }
        let record = store
            .get_user(id)?
            .ok_or_else(|| Error::chain_corrupted(format!("dangling pointer to user {id}")))?;
        if !record.is_linked() {
            return Err(Error::chain_corrupted(format!("user {id} stored unlinked")));
        }
        if record.leaderboard_prev() != expected_prev {
            return Err(Error::chain_corrupted(format!(
                "user {id} prev is {:?}, expected {:?}",
                record.leaderboard_prev(),
                expected_prev
            )));
        }
        if record.total_xp > last_xp {
            return Err(Error::chain_corrupted(format!(
                "user {id} has {} XP above a neighbour with {last_xp}",
                record.total_xp
            )));
        }
        last_xp = record.total_xp;
        expected_prev = Some(id);
        cursor = record.leaderboard_next();
    }

    if expected_prev != anchors.bottom {
        return Err(Error::chain_corrupted(format!(
            "chain ends at {:?} but bottom is {:?}",
            expected_prev, anchors.bottom
        )));
    }

    let scan = store.scan_users()?;
    if let Some(orphan) = scan.records.iter().find(|r| !seen.contains(&r.id)) {
        return Err(Error::chain_corrupted(format!(
            "user {} is stored but not reachable from the head",
            orphan.id
        )));
    }
    let linked = seen.len() as u64;
    let stored = (scan.records.len() + scan.undecodable.len()) as u64;
    if !scan.undecodable.is_empty() {
        warn!(
            count = scan.undecodable.len(),
            "Chain check skipped undecodable records"
        );
    }
    Ok(ChainReport {
        linked,
        stored,
        undecodable: scan.undecodable,
    })
}
