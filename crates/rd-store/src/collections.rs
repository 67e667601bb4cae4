//! List, hash, set, and hyperloglog operations on [`Db`].

use std::collections::{HashSet, VecDeque};

use rand::Rng;
use rand::seq::SliceRandom;

use crate::{
    Db, Entry, ExpireOpts, HashFields, StoreError, Value, format_float, normalize_index,
    parse_f64, parse_i64,
};

/// Per-field status codes for the HEXPIRE family.
pub const HFE_NO_FIELD: i64 = -2;
pub const HFE_CONDITION_FAILED: i64 = 0;
pub const HFE_SET: i64 = 1;
pub const HFE_DELETED: i64 = 2;

impl Db {
    // ── lists ────────────────────────────────────────────────────────

    /// Push values on one end. `create` is false for LPUSHX/RPUSHX; a
    /// missing key then stays missing and the length 0 is returned.
    pub fn list_push(
        &mut self,
        key: &[u8],
        values: &[Vec<u8>],
        left: bool,
        create: bool,
        now_ms: u64,
    ) -> Result<usize, StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries_contains(key) {
            if !create {
                return Ok(0);
            }
            self.insert_value(key, Value::List(VecDeque::new()));
        }
        let Value::List(list) = self.value_mut_unchecked(key) else {
            return Err(StoreError::WrongType);
        };
        for value in values {
            if left {
                list.push_front(value.clone());
            } else {
                list.push_back(value.clone());
            }
        }
        let len = list.len();
        self.bump(key);
        self.note('l', if left { "lpush" } else { "rpush" }, key);
        Ok(len)
    }

    /// Pop up to `count` values from one end. `None` when the key is
    /// missing. An emptied list is removed.
    pub fn list_pop(
        &mut self,
        key: &[u8],
        left: bool,
        count: usize,
        now_ms: u64,
    ) -> Result<Option<Vec<Vec<u8>>>, StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries_contains(key) {
            return Ok(None);
        }
        let Value::List(list) = self.value_mut_unchecked(key) else {
            return Err(StoreError::WrongType);
        };
        let take = count.min(list.len());
        if take == 0 {
            return Ok(Some(Vec::new()));
        }
        let mut popped = Vec::with_capacity(take);
        for _ in 0..take {
            let value = if left {
                list.pop_front()
            } else {
                list.pop_back()
            };
            match value {
                Some(v) => popped.push(v),
                None => break,
            }
        }
        let emptied = list.is_empty();
        self.bump(key);
        self.note('l', if left { "lpop" } else { "rpop" }, key);
        if emptied {
            self.remove_entry(key);
            self.note('g', "del", key);
        }
        Ok(Some(popped))
    }

    pub fn llen(&mut self, key: &[u8], now_ms: u64) -> Result<usize, StoreError> {
        match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::List(list) => Ok(list.len()),
                _ => Err(StoreError::WrongType),
            },
            None => Ok(0),
        }
    }

    pub fn lrange(
        &mut self,
        key: &[u8],
        start: i64,
        end: i64,
        now_ms: u64,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::List(list) => {
                    let len = list.len() as i64;
                    let from = normalize_index(start, len);
                    let to = if end < 0 {
                        let adjusted = len.saturating_add(end);
                        if adjusted < 0 {
                            return Ok(Vec::new());
                        }
                        adjusted as usize
                    } else {
                        (end as usize).min(list.len().saturating_sub(1))
                    };
                    if from > to || from >= list.len() {
                        return Ok(Vec::new());
                    }
                    Ok(list.iter().skip(from).take(to - from + 1).cloned().collect())
                }
                _ => Err(StoreError::WrongType),
            },
            None => Ok(Vec::new()),
        }
    }

    pub fn lindex(
        &mut self,
        key: &[u8],
        index: i64,
        now_ms: u64,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::List(list) => {
                    let len = list.len() as i64;
                    let idx = if index < 0 { len + index } else { index };
                    if idx < 0 || idx >= len {
                        return Ok(None);
                    }
                    Ok(list.get(idx as usize).cloned())
                }
                _ => Err(StoreError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn lset(
        &mut self,
        key: &[u8],
        index: i64,
        value: Vec<u8>,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries_contains(key) {
            return Err(StoreError::KeyNotFound);
        }
        let Value::List(list) = self.value_mut_unchecked(key) else {
            return Err(StoreError::WrongType);
        };
        let len = list.len() as i64;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 || idx >= len {
            return Err(StoreError::IndexOutOfRange);
        }
        list[idx as usize] = value;
        self.bump(key);
        self.note('l', "lset", key);
        Ok(())
    }

    pub fn ltrim(
        &mut self,
        key: &[u8],
        start: i64,
        end: i64,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries_contains(key) {
            return Ok(());
        }
        let Value::List(list) = self.value_mut_unchecked(key) else {
            return Err(StoreError::WrongType);
        };
        let len = list.len() as i64;
        let from = normalize_index(start, len);
        let to = if end < 0 {
            len.saturating_add(end)
        } else {
            end.min(len - 1)
        };
        if to < 0 || from as i64 > to {
            list.clear();
        } else {
            let to = to as usize;
            list.drain(..from.min(list.len()));
            let keep = to - from + 1;
            list.truncate(keep);
        }
        let emptied = list.is_empty();
        self.bump(key);
        self.note('l', "ltrim", key);
        if emptied {
            self.remove_entry(key);
            self.note('g', "del", key);
        }
        Ok(())
    }

    /// Remove `count` occurrences of `element`: positive from head, negative
    /// from tail, zero removes all.
    pub fn lrem(
        &mut self,
        key: &[u8],
        count: i64,
        element: &[u8],
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries_contains(key) {
            return Ok(0);
        }
        let Value::List(list) = self.value_mut_unchecked(key) else {
            return Err(StoreError::WrongType);
        };
        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs() as usize
        };
        let mut removed = 0_u64;
        if count >= 0 {
            let mut i = 0;
            while i < list.len() && (removed as usize) < limit {
                if list[i] == element {
                    list.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut i = list.len();
            while i > 0 && (removed as usize) < limit {
                i -= 1;
                if list[i] == element {
                    list.remove(i);
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            let emptied = list.is_empty();
            self.bump(key);
            self.note('l', "lrem", key);
            if emptied {
                self.remove_entry(key);
                self.note('g', "del", key);
            }
        }
        Ok(removed)
    }

    /// Returns -1 when the pivot is absent, 0 when the key is missing,
    /// otherwise the new length.
    pub fn linsert(
        &mut self,
        key: &[u8],
        before: bool,
        pivot: &[u8],
        element: Vec<u8>,
        now_ms: u64,
    ) -> Result<i64, StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries_contains(key) {
            return Ok(0);
        }
        let Value::List(list) = self.value_mut_unchecked(key) else {
            return Err(StoreError::WrongType);
        };
        let Some(pos) = list.iter().position(|item| item == pivot) else {
            return Ok(-1);
        };
        let at = if before { pos } else { pos + 1 };
        list.insert(at, element);
        let len = list.len() as i64;
        self.bump(key);
        self.note('l', "linsert", key);
        Ok(len)
    }

    /// Positions of matches for LPOS. `rank` selects which match to start
    /// from (negative = from the tail); `count` 0 means all.
    pub fn lpos(
        &mut self,
        key: &[u8],
        element: &[u8],
        rank: i64,
        count: Option<usize>,
        now_ms: u64,
    ) -> Result<Vec<usize>, StoreError> {
        let list = match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::List(list) => list,
                _ => return Err(StoreError::WrongType),
            },
            None => return Ok(Vec::new()),
        };
        let wanted = match count {
            Some(0) => usize::MAX,
            Some(n) => n,
            None => 1,
        };
        let mut out = Vec::new();
        if rank >= 0 {
            let skip = rank.max(1) as usize - 1;
            let mut seen = 0_usize;
            for (i, item) in list.iter().enumerate() {
                if item == element {
                    seen += 1;
                    if seen > skip {
                        out.push(i);
                        if out.len() >= wanted {
                            break;
                        }
                    }
                }
            }
        } else {
            let skip = rank.unsigned_abs() as usize - 1;
            let mut seen = 0_usize;
            for (i, item) in list.iter().enumerate().rev() {
                if item == element {
                    seen += 1;
                    if seen > skip {
                        out.push(i);
                        if out.len() >= wanted {
                            break;
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// Atomically move one element between lists (or rotate one list).
    pub fn lmove(
        &mut self,
        source: &[u8],
        destination: &[u8],
        from_left: bool,
        to_left: bool,
        now_ms: u64,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.drop_if_expired(source, now_ms);
        if !self.entries_contains(source) {
            return Ok(None);
        }
        if !matches!(self.value_mut_unchecked(source), Value::List(_)) {
            return Err(StoreError::WrongType);
        }
        // Type-check the destination before popping the source.
        self.drop_if_expired(destination, now_ms);
        if self.entries_contains(destination)
            && !matches!(self.value_mut_unchecked(destination), Value::List(_))
        {
            return Err(StoreError::WrongType);
        }
        let Some(mut popped) = self.list_pop(source, from_left, 1, now_ms)? else {
            return Ok(None);
        };
        let Some(value) = popped.pop() else {
            return Ok(None);
        };
        self.list_push(destination, &[value.clone()], to_left, true, now_ms)?;
        Ok(Some(value))
    }

    // ── hashes ───────────────────────────────────────────────────────

    /// Prune expired fields and hand out the hash, removing the key if the
    /// prune emptied it. `None` when the key is missing.
    fn hash_mut(
        &mut self,
        key: &[u8],
        now_ms: u64,
    ) -> Result<Option<&mut HashFields>, StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries_contains(key) {
            return Ok(None);
        }
        let emptied = {
            let Value::Hash(hash) = self.value_mut_unchecked(key) else {
                return Err(StoreError::WrongType);
            };
            hash.prune(now_ms)
        };
        if emptied {
            self.remove_entry(key);
            self.note('g', "del", key);
            return Ok(None);
        }
        let Value::Hash(hash) = self.value_mut_unchecked(key) else {
            unreachable!("type checked above");
        };
        Ok(Some(hash))
    }

    pub fn hset(
        &mut self,
        key: &[u8],
        pairs: &[(Vec<u8>, Vec<u8>)],
        now_ms: u64,
    ) -> Result<usize, StoreError> {
        if self.hash_mut(key, now_ms)?.is_none() {
            self.insert_value(key, Value::Hash(HashFields::default()));
        }
        let Value::Hash(hash) = self.value_mut_unchecked(key) else {
            unreachable!("ensured above");
        };
        let mut added = 0;
        for (field, value) in pairs {
            if hash.fields.insert(field.clone(), value.clone()).is_none() {
                added += 1;
            }
        }
        self.bump(key);
        self.note('h', "hset", key);
        Ok(added)
    }

    pub fn hsetnx(
        &mut self,
        key: &[u8],
        field: &[u8],
        value: Vec<u8>,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let exists = self
            .hash_mut(key, now_ms)?
            .is_some_and(|hash| hash.fields.contains_key(field));
        if exists {
            return Ok(false);
        }
        self.hset(key, &[(field.to_vec(), value)], now_ms)?;
        Ok(true)
    }

    pub fn hget(
        &mut self,
        key: &[u8],
        field: &[u8],
        now_ms: u64,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .hash_mut(key, now_ms)?
            .and_then(|hash| hash.fields.get(field).cloned()))
    }

    pub fn hdel(
        &mut self,
        key: &[u8],
        fields: &[Vec<u8>],
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        let Some(hash) = self.hash_mut(key, now_ms)? else {
            return Ok(0);
        };
        let mut removed = 0_u64;
        for field in fields {
            if hash.fields.remove(field).is_some() {
                hash.ttls.remove(field);
                removed += 1;
            }
        }
        if removed > 0 {
            let emptied = hash.fields.is_empty();
            self.bump(key);
            self.note('h', "hdel", key);
            if emptied {
                self.remove_entry(key);
                self.note('g', "del", key);
            }
        }
        Ok(removed)
    }

    pub fn hexists(
        &mut self,
        key: &[u8],
        field: &[u8],
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        Ok(self
            .hash_mut(key, now_ms)?
            .is_some_and(|hash| hash.fields.contains_key(field)))
    }

    pub fn hlen(&mut self, key: &[u8], now_ms: u64) -> Result<usize, StoreError> {
        Ok(self.hash_mut(key, now_ms)?.map_or(0, |hash| hash.fields.len()))
    }

    pub fn hstrlen(
        &mut self,
        key: &[u8],
        field: &[u8],
        now_ms: u64,
    ) -> Result<usize, StoreError> {
        Ok(self
            .hash_mut(key, now_ms)?
            .and_then(|hash| hash.fields.get(field))
            .map_or(0, Vec::len))
    }

    /// All field/value pairs, sorted by field for stable output.
    pub fn hgetall(
        &mut self,
        key: &[u8],
        now_ms: u64,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let Some(hash) = self.hash_mut(key, now_ms)? else {
            return Ok(Vec::new());
        };
        let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = hash
            .fields
            .iter()
            .map(|(f, v)| (f.clone(), v.clone()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pairs)
    }

    pub fn hmget(
        &mut self,
        key: &[u8],
        fields: &[Vec<u8>],
        now_ms: u64,
    ) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        let lookup = self.hash_mut(key, now_ms)?;
        match lookup {
            Some(hash) => Ok(fields
                .iter()
                .map(|field| hash.fields.get(field).cloned())
                .collect()),
            None => Ok(vec![None; fields.len()]),
        }
    }

    pub fn hincrby(
        &mut self,
        key: &[u8],
        field: &[u8],
        delta: i64,
        now_ms: u64,
    ) -> Result<i64, StoreError> {
        if self.hash_mut(key, now_ms)?.is_none() {
            self.insert_value(key, Value::Hash(HashFields::default()));
        }
        let Value::Hash(hash) = self.value_mut_unchecked(key) else {
            unreachable!("ensured above");
        };
        let current = match hash.fields.get(field) {
            Some(raw) => parse_i64(raw)?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(StoreError::IntegerOverflow)?;
        hash.fields.insert(field.to_vec(), next.to_string().into_bytes());
        self.bump(key);
        self.note('h', "hincrby", key);
        Ok(next)
    }

    pub fn hincrbyfloat(
        &mut self,
        key: &[u8],
        field: &[u8],
        delta: f64,
        now_ms: u64,
    ) -> Result<f64, StoreError> {
        if self.hash_mut(key, now_ms)?.is_none() {
            self.insert_value(key, Value::Hash(HashFields::default()));
        }
        let Value::Hash(hash) = self.value_mut_unchecked(key) else {
            unreachable!("ensured above");
        };
        let current = match hash.fields.get(field) {
            Some(raw) => parse_f64(raw)?,
            None => 0.0,
        };
        let next = current + delta;
        if !next.is_finite() {
            return Err(StoreError::NonFiniteFloat);
        }
        hash.fields.insert(field.to_vec(), format_float(next).into_bytes());
        self.bump(key);
        self.note('h', "hincrbyfloat", key);
        Ok(next)
    }

    /// Incremental field walk, mirroring [`Db::scan`].
    pub fn hscan(
        &mut self,
        key: &[u8],
        cursor: u64,
        pattern: Option<&[u8]>,
        count: usize,
        now_ms: u64,
    ) -> Result<(u64, Vec<(Vec<u8>, Vec<u8>)>), StoreError> {
        let pairs = self.hgetall(key, now_ms)?;
        Ok(scan_window(pairs, cursor, count, |(field, _)| {
            pattern.is_none_or(|p| crate::glob_match(p, field))
        }))
    }

    // ── hash field expiry ────────────────────────────────────────────

    /// Apply a deadline to fields. Per-field result codes follow the
    /// reference: -2 unknown field, 0 condition failed, 1 set, 2 deleted
    /// because the deadline already passed.
    pub fn hash_field_expire_at(
        &mut self,
        key: &[u8],
        fields: &[Vec<u8>],
        at_ms: i64,
        opts: ExpireOpts,
        now_ms: u64,
    ) -> Result<Option<Vec<i64>>, StoreError> {
        let Some(hash) = self.hash_mut(key, now_ms)? else {
            return Ok(None);
        };
        let mut results = Vec::with_capacity(fields.len());
        let mut changed = false;
        for field in fields {
            if !hash.fields.contains_key(field) {
                results.push(HFE_NO_FIELD);
                continue;
            }
            let current = hash.ttls.get(field).copied();
            let blocked = (opts.nx && current.is_some())
                || (opts.xx && current.is_none())
                || (opts.gt && !current.is_some_and(|cur| at_ms > cur as i64))
                || (opts.lt && current.is_some_and(|cur| at_ms >= cur as i64));
            if blocked {
                results.push(HFE_CONDITION_FAILED);
                continue;
            }
            if at_ms <= now_ms as i64 {
                hash.fields.remove(field);
                hash.ttls.remove(field);
                results.push(HFE_DELETED);
            } else {
                hash.ttls
                    .insert(field.clone(), u64::try_from(at_ms).unwrap_or(u64::MAX));
                results.push(HFE_SET);
            }
            changed = true;
        }
        if changed {
            let emptied = hash.fields.is_empty();
            self.bump(key);
            self.note('h', "hexpire", key);
            if emptied {
                self.remove_entry(key);
                self.note('g', "del", key);
            }
        }
        Ok(Some(results))
    }

    /// Remaining TTL in milliseconds per field: -2 unknown field, -1 no
    /// deadline. `None` when the key is missing.
    pub fn hash_field_ttl_ms(
        &mut self,
        key: &[u8],
        fields: &[Vec<u8>],
        now_ms: u64,
    ) -> Result<Option<Vec<i64>>, StoreError> {
        let Some(hash) = self.hash_mut(key, now_ms)? else {
            return Ok(None);
        };
        Ok(Some(
            fields
                .iter()
                .map(|field| {
                    if !hash.fields.contains_key(field) {
                        HFE_NO_FIELD
                    } else {
                        match hash.ttls.get(field) {
                            None => -1,
                            Some(&at) => i64::try_from(at.saturating_sub(now_ms))
                                .unwrap_or(i64::MAX),
                        }
                    }
                })
                .collect(),
        ))
    }

    /// Absolute deadlines in milliseconds per field (HEXPIRETIME family).
    pub fn hash_field_expire_time_ms(
        &mut self,
        key: &[u8],
        fields: &[Vec<u8>],
        now_ms: u64,
    ) -> Result<Option<Vec<i64>>, StoreError> {
        let Some(hash) = self.hash_mut(key, now_ms)? else {
            return Ok(None);
        };
        Ok(Some(
            fields
                .iter()
                .map(|field| {
                    if !hash.fields.contains_key(field) {
                        HFE_NO_FIELD
                    } else {
                        match hash.ttls.get(field) {
                            None => -1,
                            Some(&at) => i64::try_from(at).unwrap_or(i64::MAX),
                        }
                    }
                })
                .collect(),
        ))
    }

    /// Clear field deadlines: -2 unknown field, -1 no deadline, 1 cleared.
    pub fn hash_field_persist(
        &mut self,
        key: &[u8],
        fields: &[Vec<u8>],
        now_ms: u64,
    ) -> Result<Option<Vec<i64>>, StoreError> {
        let Some(hash) = self.hash_mut(key, now_ms)? else {
            return Ok(None);
        };
        let mut results = Vec::with_capacity(fields.len());
        let mut changed = false;
        for field in fields {
            if !hash.fields.contains_key(field) {
                results.push(HFE_NO_FIELD);
            } else if hash.ttls.remove(field).is_some() {
                results.push(HFE_SET);
                changed = true;
            } else {
                results.push(-1);
            }
        }
        if changed {
            self.bump(key);
            self.note('h', "hpersist", key);
        }
        Ok(Some(results))
    }

    // ── sets ─────────────────────────────────────────────────────────

    pub fn sadd(
        &mut self,
        key: &[u8],
        members: &[Vec<u8>],
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries_contains(key) {
            self.insert_value(key, Value::Set(HashSet::new()));
        }
        let Value::Set(set) = self.value_mut_unchecked(key) else {
            return Err(StoreError::WrongType);
        };
        let mut added = 0_u64;
        for member in members {
            if set.insert(member.clone()) {
                added += 1;
            }
        }
        self.bump(key);
        self.note('s', "sadd", key);
        Ok(added)
    }

    pub fn srem(
        &mut self,
        key: &[u8],
        members: &[Vec<u8>],
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries_contains(key) {
            return Ok(0);
        }
        let Value::Set(set) = self.value_mut_unchecked(key) else {
            return Err(StoreError::WrongType);
        };
        let mut removed = 0_u64;
        for member in members {
            if set.remove(member) {
                removed += 1;
            }
        }
        if removed > 0 {
            let emptied = set.is_empty();
            self.bump(key);
            self.note('s', "srem", key);
            if emptied {
                self.remove_entry(key);
                self.note('g', "del", key);
            }
        }
        Ok(removed)
    }

    /// Members sorted lexicographically for stable output.
    pub fn smembers(&mut self, key: &[u8], now_ms: u64) -> Result<Vec<Vec<u8>>, StoreError> {
        match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::Set(set) => {
                    let mut members: Vec<Vec<u8>> = set.iter().cloned().collect();
                    members.sort();
                    Ok(members)
                }
                _ => Err(StoreError::WrongType),
            },
            None => Ok(Vec::new()),
        }
    }

    pub fn scard(&mut self, key: &[u8], now_ms: u64) -> Result<usize, StoreError> {
        match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.len()),
                _ => Err(StoreError::WrongType),
            },
            None => Ok(0),
        }
    }

    pub fn sismember(
        &mut self,
        key: &[u8],
        member: &[u8],
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.contains(member)),
                _ => Err(StoreError::WrongType),
            },
            None => Ok(false),
        }
    }

    fn set_view(&mut self, key: &[u8], now_ms: u64) -> Result<HashSet<Vec<u8>>, StoreError> {
        match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.clone()),
                _ => Err(StoreError::WrongType),
            },
            None => Ok(HashSet::new()),
        }
    }

    pub fn sinter(&mut self, keys: &[Vec<u8>], now_ms: u64) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut iter = keys.iter();
        let Some(first) = iter.next() else {
            return Ok(Vec::new());
        };
        let mut acc = self.set_view(first, now_ms)?;
        for key in iter {
            let other = self.set_view(key, now_ms)?;
            acc.retain(|member| other.contains(member));
            if acc.is_empty() {
                break;
            }
        }
        let mut members: Vec<Vec<u8>> = acc.into_iter().collect();
        members.sort();
        Ok(members)
    }

    pub fn sunion(&mut self, keys: &[Vec<u8>], now_ms: u64) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut acc = HashSet::new();
        for key in keys {
            acc.extend(self.set_view(key, now_ms)?);
        }
        let mut members: Vec<Vec<u8>> = acc.into_iter().collect();
        members.sort();
        Ok(members)
    }

    pub fn sdiff(&mut self, keys: &[Vec<u8>], now_ms: u64) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut iter = keys.iter();
        let Some(first) = iter.next() else {
            return Ok(Vec::new());
        };
        let mut acc = self.set_view(first, now_ms)?;
        for key in iter {
            let other = self.set_view(key, now_ms)?;
            acc.retain(|member| !other.contains(member));
        }
        let mut members: Vec<Vec<u8>> = acc.into_iter().collect();
        members.sort();
        Ok(members)
    }

    /// Intersection cardinality with an optional early-exit limit.
    pub fn sintercard(
        &mut self,
        keys: &[Vec<u8>],
        limit: Option<usize>,
        now_ms: u64,
    ) -> Result<usize, StoreError> {
        let members = self.sinter(keys, now_ms)?;
        Ok(match limit {
            Some(0) | None => members.len(),
            Some(n) => members.len().min(n),
        })
    }

    /// Replace `dest` with the given members (a *STORE destination); an
    /// empty result deletes the destination.
    pub fn set_store(
        &mut self,
        dest: &[u8],
        members: Vec<Vec<u8>>,
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
        self.insert_value(dest, Value::Set(members.into_iter().collect()));
        self.bump(dest);
        self.note('s', event, dest);
        len
    }

    pub fn spop(
        &mut self,
        key: &[u8],
        count: usize,
        now_ms: u64,
    ) -> Result<Option<Vec<Vec<u8>>>, StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries_contains(key) {
            return Ok(None);
        }
        let Value::Set(set) = self.value_mut_unchecked(key) else {
            return Err(StoreError::WrongType);
        };
        if count == 0 {
            return Ok(Some(Vec::new()));
        }
        let mut members: Vec<Vec<u8>> = set.iter().cloned().collect();
        members.shuffle(&mut rand::thread_rng());
        members.truncate(count);
        for member in &members {
            set.remove(member);
        }
        let emptied = set.is_empty();
        self.bump(key);
        self.note('s', "spop", key);
        if emptied {
            self.remove_entry(key);
            self.note('g', "del", key);
        }
        Ok(Some(members))
    }

    /// Random members without removal. Negative count allows repeats.
    pub fn srandmember(
        &mut self,
        key: &[u8],
        count: i64,
        now_ms: u64,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        let members = self.smembers(key, now_ms)?;
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let mut rng = rand::thread_rng();
        if count >= 0 {
            let mut picked = members;
            picked.shuffle(&mut rng);
            picked.truncate(count as usize);
            Ok(picked)
        } else {
            let wanted = count.unsigned_abs() as usize;
            Ok((0..wanted)
                .map(|_| members[rng.gen_range(0..members.len())].clone())
                .collect())
        }
    }

    pub fn smove(
        &mut self,
        source: &[u8],
        destination: &[u8],
        member: &[u8],
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        // Both sides must be sets (or absent) before anything moves.
        let present = self.sismember(source, member, now_ms)?;
        self.drop_if_expired(destination, now_ms);
        if self.entries_contains(destination)
            && !matches!(self.value_mut_unchecked(destination), Value::Set(_))
        {
            return Err(StoreError::WrongType);
        }
        if !present {
            return Ok(false);
        }
        self.srem(source, &[member.to_vec()], now_ms)?;
        self.sadd(destination, &[member.to_vec()], now_ms)?;
        Ok(true)
    }

    /// Incremental member walk, mirroring [`Db::scan`].
    pub fn sscan(
        &mut self,
        key: &[u8],
        cursor: u64,
        pattern: Option<&[u8]>,
        count: usize,
        now_ms: u64,
    ) -> Result<(u64, Vec<Vec<u8>>), StoreError> {
        let members = self.smembers(key, now_ms)?;
        Ok(scan_window(members, cursor, count, |member| {
            pattern.is_none_or(|p| crate::glob_match(p, member))
        }))
    }

    // ── hyperloglog (exact set emulation) ────────────────────────────

    pub fn pfadd(
        &mut self,
        key: &[u8],
        elements: &[Vec<u8>],
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        self.drop_if_expired(key, now_ms);
        let created = !self.entries_contains(key);
        if created {
            self.insert_value(key, Value::Hll(HashSet::new()));
        }
        let Value::Hll(set) = self.value_mut_unchecked(key) else {
            return Err(StoreError::WrongType);
        };
        let mut changed = created;
        for element in elements {
            if set.insert(element.clone()) {
                changed = true;
            }
        }
        self.bump(key);
        self.note('$', "pfadd", key);
        Ok(changed)
    }

    /// Exact distinct count of the union of the given keys.
    pub fn pfcount(&mut self, keys: &[Vec<u8>], now_ms: u64) -> Result<u64, StoreError> {
        let mut union: HashSet<Vec<u8>> = HashSet::new();
        for key in keys {
            match self.live_entry(key, now_ms) {
                Some(entry) => match &entry.value {
                    Value::Hll(set) => union.extend(set.iter().cloned()),
                    _ => return Err(StoreError::WrongType),
                },
                None => {}
            }
        }
        Ok(union.len() as u64)
    }

    pub fn pfmerge(
        &mut self,
        dest: &[u8],
        sources: &[Vec<u8>],
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let mut union: HashSet<Vec<u8>> = HashSet::new();
        for key in sources {
            match self.live_entry(key, now_ms) {
                Some(entry) => match &entry.value {
                    Value::Hll(set) => union.extend(set.iter().cloned()),
                    _ => return Err(StoreError::WrongType),
                },
                None => {}
            }
        }
        self.drop_if_expired(dest, now_ms);
        if !self.entries_contains(dest) {
            self.insert_value(dest, Value::Hll(HashSet::new()));
        }
        let Value::Hll(set) = self.value_mut_unchecked(dest) else {
            return Err(StoreError::WrongType);
        };
        set.extend(union);
        self.bump(dest);
        self.note('$', "pfmerge", dest);
        Ok(())
    }

    // ── shared plumbing used by the per-type modules ─────────────────

    pub(crate) fn entries_contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn insert_value(&mut self, key: &[u8], value: Value) {
        self.entries.insert(
            key.to_vec(),
            Entry {
                value,
                expires_at_ms: None,
            },
        );
    }

    /// The entry is known to exist; panic otherwise (an internal bug).
    pub(crate) fn value_mut_unchecked(&mut self, key: &[u8]) -> &mut Value {
        &mut self
            .entries
            .get_mut(key)
            .expect("caller ensured the entry exists")
            .value
    }
}

/// Shared cursor pagination for HSCAN/SSCAN/ZSCAN over a sorted snapshot.
pub(crate) fn scan_window<T, F>(
    items: Vec<T>,
    cursor: u64,
    count: usize,
    keep: F,
) -> (u64, Vec<T>)
where
    F: Fn(&T) -> bool,
{
    let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(items.len());
    let count = count.max(1);
    let end = start.saturating_add(count).min(items.len());
    let next_cursor = if end >= items.len() { 0 } else { end as u64 };
    let window = items
        .into_iter()
        .skip(start)
        .take(end - start)
        .filter(|item| keep(item))
        .collect();
    (next_cursor, window)
}
