//! XP/level curve.
//!
//! Pure functions only; persistence and ranking live elsewhere.

use crate::types::UserRecord;
use levelboard_common::{Error, Result};
use serde::Serialize;

/// XP required to advance from `level` to `level + 1`.
///
/// `5·level² + 50·level + 100`, so never below 100 and strictly increasing.
#[must_use]
pub const fn xp_to_next_level(level: u32) -> i64 {
    let l = level as i64;
    5 * l * l + 50 * l + 100
}

/// Adds `amount` XP to `record` and normalizes level/partial XP.
///
/// Returns the number of levels gained. Fails without touching the record
/// if `amount` is not positive or the total would overflow.
pub fn apply_xp(record: &mut UserRecord, amount: i64) -> Result<u32> {
    if amount <= 0 {
        return Err(Error::invalid_argument(format!(
            "XP {amount} is invalid: must be > 0"
        )));
    }
    let total_xp = record
        .total_xp
        .checked_add(amount)
        .ok_or_else(|| Error::invalid_argument("XP total would overflow"))?;
    let mut partial_xp = record
        .partial_xp
        .checked_add(amount)
        .ok_or_else(|| Error::invalid_argument("partial XP would overflow"))?;

    let mut level = record.level;
    let mut needed = xp_to_next_level(level);
    while partial_xp >= needed {
        level += 1;
        partial_xp -= needed;
        needed = xp_to_next_level(level);
    }

    let gained = level - record.level;
    record.total_xp = total_xp;
    record.partial_xp = partial_xp;
    record.level = level;
    Ok(gained)
}

/// Progress display for one user
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LevelProgress {
    pub level: u32,
    pub partial_xp: i64,
    pub needed: i64,
}

impl From<&UserRecord> for LevelProgress {
    fn from(record: &UserRecord) -> Self {
        Self {
            level: record.level,
            partial_xp: record.partial_xp,
            needed: xp_to_next_level(record.level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use levelboard_common::UserId;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn fresh() -> UserRecord {
        UserRecord::transient(UserId::new(1))
    }

    #[test]
    fn test_curve_values() {
        assert_eq!(xp_to_next_level(0), 100);
        assert_eq!(xp_to_next_level(1), 155);
        assert_eq!(xp_to_next_level(2), 220);
        assert_eq!(xp_to_next_level(10), 1100);
    }

    #[test]
    fn test_curve_strictly_increasing() {
        for level in 0..1000 {
            assert!(xp_to_next_level(level + 1) > xp_to_next_level(level));
        }
    }

    #[test]
    fn test_apply_below_threshold() {
        let mut rec = fresh();
        assert_eq!(apply_xp(&mut rec, 50).unwrap(), 0);
        assert_eq!(rec.total_xp, 50);
        assert_eq!(rec.partial_xp, 50);
        assert_eq!(rec.level, 0);
    }

    #[test]
    fn test_apply_multiple_levels() {
        let mut rec = fresh();
        // 100 for level 0, 155 for level 1, 10 left over
        assert_eq!(apply_xp(&mut rec, 265).unwrap(), 2);
        assert_eq!(rec.level, 2);
        assert_eq!(rec.partial_xp, 10);
        assert_eq!(rec.total_xp, 265);
    }

    #[test]
    fn test_apply_exact_threshold() {
        let mut rec = fresh();
        apply_xp(&mut rec, 100).unwrap();
        assert_eq!(rec.level, 1);
        assert_eq!(rec.partial_xp, 0);
    }

    #[test]
    fn test_non_positive_rejected_without_mutation() {
        let mut rec = fresh();
        apply_xp(&mut rec, 30).unwrap();
        let before = rec.clone();

        for amount in [0, -1, -500] {
            let err = apply_xp(&mut rec, amount).unwrap_err();
            assert!(err.is_invalid_argument());
            assert_eq!(rec, before);
        }
    }

    #[test]
    fn test_overflow_rejected() {
        let mut rec = fresh();
        rec.total_xp = i64::MAX - 1;
        let before = rec.clone();
        assert!(apply_xp(&mut rec, 5).is_err());
        assert_eq!(rec, before);
    }

    #[test]
    fn test_random_grants_stay_normalized() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut rec = fresh();
        let mut expected_total = 0;
        for _ in 0..2000 {
            let amount = rng.gen_range(1..=500);
            apply_xp(&mut rec, amount).unwrap();
            expected_total += amount;
            assert!(rec.partial_xp >= 0);
            assert!(rec.partial_xp < xp_to_next_level(rec.level));
        }
        assert_eq!(rec.total_xp, expected_total);
    }

    #[test]
    fn test_progress_view() {
        let mut rec = fresh();
        apply_xp(&mut rec, 120).unwrap();
        let progress = LevelProgress::from(&rec);
        assert_eq!(
            progress,
            LevelProgress {
                level: 1,
                partial_xp: 20,
                needed: 155
            }
        );
    }
}
