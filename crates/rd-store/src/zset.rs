//! Sorted-set operations on [`Db`]. The representation is the member→score
//! map; rank order (score asc, member lex asc) is produced on demand.

use std::collections::HashMap;

use crate::collections::scan_window;
use crate::{Db, StoreError, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZAddFlags {
    pub nx: bool,
    pub xx: bool,
    pub gt: bool,
    pub lt: bool,
    pub ch: bool,
    pub incr: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ZAddOutcome {
    /// Members newly inserted.
    pub added: usize,
    /// Members inserted or whose score changed (for `CH`).
    pub changed: usize,
    /// Set in `INCR` mode: `None` when a condition blocked the update.
    pub incr_score: Option<f64>,
    pub incr_blocked: bool,
}

/// Inclusive/exclusive score interval (`ZRANGEBYSCORE`, `ZCOUNT`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: f64,
    pub min_exclusive: bool,
    pub max: f64,
    pub max_exclusive: bool,
}

impl ScoreRange {
    #[must_use]
    pub fn contains(&self, score: f64) -> bool {
        let above = if self.min_exclusive {
            score > self.min
        } else {
            score >= self.min
        };
        let below = if self.max_exclusive {
            score < self.max
        } else {
            score <= self.max
        };
        above && below
    }
}

/// Lexicographic interval (`ZRANGEBYLEX`, `ZLEXCOUNT`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexRange {
    pub min: LexBound,
    pub max: LexBound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexBound {
    NegInf,
    PosInf,
    Inclusive(Vec<u8>),
    Exclusive(Vec<u8>),
}

impl LexRange {
    #[must_use]
    pub fn contains(&self, member: &[u8]) -> bool {
        let above = match &self.min {
            LexBound::NegInf => true,
            LexBound::PosInf => false,
            LexBound::Inclusive(bound) => member >= bound.as_slice(),
            LexBound::Exclusive(bound) => member > bound.as_slice(),
        };
        let below = match &self.max {
            LexBound::NegInf => false,
            LexBound::PosInf => true,
            LexBound::Inclusive(bound) => member <= bound.as_slice(),
            LexBound::Exclusive(bound) => member < bound.as_slice(),
        };
        above && below
    }
}

/// Rank ordering: score ascending, ties by member lex ascending.
pub(crate) fn cmp_score_member(
    s1: f64,
    m1: &[u8],
    s2: f64,
    m2: &[u8],
) -> std::cmp::Ordering {
    s1.total_cmp(&s2).then_with(|| m1.cmp(m2))
}

fn sorted_members_asc(zs: &HashMap<Vec<u8>, f64>) -> Vec<(f64, Vec<u8>)> {
    let mut pairs: Vec<(f64, Vec<u8>)> = zs.iter().map(|(m, &s)| (s, m.clone())).collect();
    pairs.sort_by(|(s1, m1), (s2, m2)| cmp_score_member(*s1, m1, *s2, m2));
    pairs
}

impl Db {
    /// Add or update members, honoring the NX/XX/GT/LT/CH/INCR flags. The
    /// caller has already rejected contradictory flag combinations and NaN
    /// scores (NaN may still arise from `INCR` on opposite infinities).
    pub fn zadd(
        &mut self,
        key: &[u8],
        flags: ZAddFlags,
        pairs: &[(f64, Vec<u8>)],
        now_ms: u64,
    ) -> Result<ZAddOutcome, StoreError> {
        self.drop_if_expired(key, now_ms);
        let existed = self.entries_contains(key);
        if !existed {
            if flags.xx {
                return Ok(ZAddOutcome {
                    incr_blocked: flags.incr,
                    ..Default::default()
                });
            }
            self.insert_value(key, Value::SortedSet(HashMap::new()));
        }
        let Value::SortedSet(zs) = self.value_mut_unchecked(key) else {
            return Err(StoreError::WrongType);
        };

        let mut outcome = ZAddOutcome::default();
        for (score, member) in pairs {
            let current = zs.get(member).copied();
            let new_score = if flags.incr {
                current.unwrap_or(0.0) + *score
            } else {
                *score
            };
            let blocked = match current {
                Some(cur) => {
                    flags.nx
                        || (flags.gt && new_score <= cur)
                        || (flags.lt && new_score >= cur)
                }
                None => flags.xx,
            };
            if blocked {
                if flags.incr {
                    outcome.incr_blocked = true;
                }
                continue;
            }
            if flags.incr && new_score.is_nan() {
                return Err(StoreError::NonFiniteFloat);
            }
            match current {
                None => {
                    zs.insert(member.clone(), new_score);
                    outcome.added += 1;
                    outcome.changed += 1;
                }
                Some(cur) => {
                    if new_score != cur {
                        zs.insert(member.clone(), new_score);
                        outcome.changed += 1;
                    }
                }
            }
            if flags.incr {
                outcome.incr_score = Some(new_score);
            }
        }

        let emptied = zs.is_empty();
        if emptied {
            // XX against a missing key, or every member blocked.
            if !existed {
                self.remove_entry(key);
            }
            return Ok(outcome);
        }
        self.bump(key);
        self.note('z', if flags.incr { "zincr" } else { "zadd" }, key);
        Ok(outcome)
    }

    pub fn zrem(
        &mut self,
        key: &[u8],
        members: &[Vec<u8>],
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries_contains(key) {
            return Ok(0);
        }
        let Value::SortedSet(zs) = self.value_mut_unchecked(key) else {
            return Err(StoreError::WrongType);
        };
        let mut removed = 0_u64;
        for member in members {
            if zs.remove(member).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            let emptied = zs.is_empty();
            self.bump(key);
            self.note('z', "zrem", key);
            if emptied {
                self.remove_entry(key);
                self.note('g', "del", key);
            }
        }
        Ok(removed)
    }

    pub fn zscore(
        &mut self,
        key: &[u8],
        member: &[u8],
        now_ms: u64,
    ) -> Result<Option<f64>, StoreError> {
        match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::SortedSet(zs) => Ok(zs.get(member).copied()),
                _ => Err(StoreError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn zmscore(
        &mut self,
        key: &[u8],
        members: &[Vec<u8>],
        now_ms: u64,
    ) -> Result<Vec<Option<f64>>, StoreError> {
        match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::SortedSet(zs) => Ok(members
                    .iter()
                    .map(|member| zs.get(member).copied())
                    .collect()),
                _ => Err(StoreError::WrongType),
            },
            None => Ok(vec![None; members.len()]),
        }
    }

    pub fn zcard(&mut self, key: &[u8], now_ms: u64) -> Result<usize, StoreError> {
        match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::SortedSet(zs) => Ok(zs.len()),
                _ => Err(StoreError::WrongType),
            },
            None => Ok(0),
        }
    }

    /// Ascending rank of a member.
    pub fn zrank(
        &mut self,
        key: &[u8],
        member: &[u8],
        now_ms: u64,
    ) -> Result<Option<usize>, StoreError> {
        let pairs = self.zsorted(key, now_ms)?;
        Ok(pairs.iter().position(|(_, m)| m.as_slice() == member))
    }

    /// Full contents in rank order. Empty for a missing key.
    pub fn zsorted(
        &mut self,
        key: &[u8],
        now_ms: u64,
    ) -> Result<Vec<(f64, Vec<u8>)>, StoreError> {
        match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::SortedSet(zs) => Ok(sorted_members_asc(zs)),
                _ => Err(StoreError::WrongType),
            },
            None => Ok(Vec::new()),
        }
    }

    /// Pop `count` members from the low (`min`) or high end.
    pub fn zpop(
        &mut self,
        key: &[u8],
        min: bool,
        count: usize,
        now_ms: u64,
    ) -> Result<Vec<(f64, Vec<u8>)>, StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries_contains(key) || count == 0 {
            return Ok(Vec::new());
        }
        let Value::SortedSet(zs) = self.value_mut_unchecked(key) else {
            return Err(StoreError::WrongType);
        };
        let mut pairs = sorted_members_asc(zs);
        if !min {
            pairs.reverse();
        }
        pairs.truncate(count);
        for (_, member) in &pairs {
            zs.remove(member);
        }
        let emptied = zs.is_empty();
        self.bump(key);
        self.note('z', if min { "zpopmin" } else { "zpopmax" }, key);
        if emptied {
            self.remove_entry(key);
            self.note('g', "del", key);
        }
        Ok(pairs)
    }

    /// Read a key as weighted pairs for ZUNIONSTORE-style inputs: sorted
    /// sets as-is, plain sets with score 1. `None` when missing.
    pub fn zset_source_pairs(
        &mut self,
        key: &[u8],
        now_ms: u64,
    ) -> Result<Option<Vec<(f64, Vec<u8>)>>, StoreError> {
        match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::SortedSet(zs) => Ok(Some(sorted_members_asc(zs))),
                Value::Set(set) => {
                    Ok(Some(set.iter().map(|m| (1.0, m.clone())).collect()))
                }
                _ => Err(StoreError::WrongType),
            },
            None => Ok(None),
        }
    }

    /// Replace `dest` with the given member→score map; an empty map deletes
    /// the destination.
    pub fn zset_store(
        &mut self,
        dest: &[u8],
        members: HashMap<Vec<u8>, f64>,
        event: &'static str,
        now_ms: u64,
    ) -> usize {
        self.drop_if_expired(dest, now_ms);
        let len = members.len();
        if members.is_empty() {
            if self.remove_entry(dest).is_some() {
                self.note('g', "del", dest);
            }
            return 0;
        }
        self.insert_value(dest, Value::SortedSet(members));
        self.bump(dest);
        self.note('z', event, dest);
        len
    }

    /// Incremental member walk, mirroring [`Db::scan`].
    pub fn zscan(
        &mut self,
        key: &[u8],
        cursor: u64,
        pattern: Option<&[u8]>,
        count: usize,
        now_ms: u64,
    ) -> Result<(u64, Vec<(f64, Vec<u8>)>), StoreError> {
        let pairs = self.zsorted(key, now_ms)?;
        Ok(scan_window(pairs, cursor, count, |(_, member)| {
            pattern.is_none_or(|p| crate::glob_match(p, member))
        }))
    }
}
