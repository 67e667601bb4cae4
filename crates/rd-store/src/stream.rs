//! Stream values: append-only entries keyed by (ms, seq) IDs plus consumer
//! groups with last-delivered tracking and pending-entries lists.

use std::collections::BTreeMap;
use std::fmt;

use crate::{Db, StoreError, Value};

/// A stream entry ID. Ordered by (ms, seq).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId { ms: u64::MAX, seq: u64::MAX };

    #[must_use]
    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// The smallest ID strictly greater than this one.
    #[must_use]
    pub fn next(self) -> Self {
        if self.seq == u64::MAX {
            Self { ms: self.ms + 1, seq: 0 }
        } else {
            Self { ms: self.ms, seq: self.seq + 1 }
        }
    }

    /// Parse `ms` or `ms-seq`; a bare `ms` takes `default_seq`.
    #[must_use]
    pub fn parse(raw: &[u8], default_seq: u64) -> Option<Self> {
        let text = std::str::from_utf8(raw).ok()?;
        match text.split_once('-') {
            Some((ms, seq)) => Some(Self {
                ms: ms.parse().ok()?,
                seq: seq.parse().ok()?,
            }),
            None => Some(Self {
                ms: text.parse().ok()?,
                seq: default_seq,
            }),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// The ID argument of XADD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamIdSpec {
    /// `*`: milliseconds from the clock, sequence auto-assigned.
    Auto,
    /// `<ms>-*`: explicit milliseconds, sequence auto-assigned.
    AtMs(u64),
    Exact(StreamId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Vec<u8>, Vec<u8>)>,
}

/// One delivered-but-unacknowledged entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub consumer: Vec<u8>,
    pub delivery_time_ms: u64,
    pub delivery_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsumerGroup {
    pub last_delivered: StreamId,
    pub pending: BTreeMap<StreamId, PendingEntry>,
    /// Consumer name -> time it was last seen.
    pub consumers: BTreeMap<Vec<u8>, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stream {
    /// Sorted by ID.
    pub entries: Vec<StreamEntry>,
    pub last_id: StreamId,
    pub max_deleted_id: StreamId,
    /// Total entries ever added, surviving trims and deletes.
    pub entries_added: u64,
    pub groups: BTreeMap<Vec<u8>, ConsumerGroup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimPolicy {
    MaxLen(u64),
    MinId(StreamId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimSpec {
    pub policy: TrimPolicy,
    /// `~` on the wire; this implementation always trims exactly.
    pub approximate: bool,
}

/// Where XREADGROUP starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRead {
    /// `>`: entries never delivered to any consumer of the group.
    NewEntries,
    /// An explicit ID: replay this consumer's pending entries after it.
    Backlog(StreamId),
}

impl Stream {
    fn position_after(&self, id: StreamId) -> usize {
        self.entries.partition_point(|entry| entry.id <= id)
    }

    /// Entries in `[start, end]`, oldest first.
    #[must_use]
    pub fn range(&self, start: StreamId, end: StreamId, count: usize) -> Vec<StreamEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.id >= start && entry.id <= end)
            .take(count)
            .cloned()
            .collect()
    }

    fn trim(&mut self, spec: TrimSpec) -> u64 {
        let before = self.entries.len();
        match spec.policy {
            TrimPolicy::MaxLen(max_len) => {
                let max_len = max_len as usize;
                if before > max_len {
                    let cut = before - max_len;
                    for entry in &self.entries[..cut] {
                        if entry.id > self.max_deleted_id {
                            self.max_deleted_id = entry.id;
                        }
                    }
                    self.entries.drain(..cut);
                }
            }
            TrimPolicy::MinId(min_id) => {
                let cut = self.entries.partition_point(|entry| entry.id < min_id);
                for entry in &self.entries[..cut] {
                    if entry.id > self.max_deleted_id {
                        self.max_deleted_id = entry.id;
                    }
                }
                self.entries.drain(..cut);
            }
        }
        (before - self.entries.len()) as u64
    }
}

impl Db {
    fn stream_mut(&mut self, key: &[u8], now_ms: u64) -> Result<Option<&mut Stream>, StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries_contains(key) {
            return Ok(None);
        }
        match self.value_mut_unchecked(key) {
            Value::Stream(stream) => Ok(Some(stream)),
            _ => Err(StoreError::WrongType),
        }
    }

    fn stream_ref(&mut self, key: &[u8], now_ms: u64) -> Result<Option<&Stream>, StoreError> {
        self.stream_mut(key, now_ms).map(|s| s.map(|s| &*s))
    }

    /// Append an entry. Returns `None` when `NOMKSTREAM` suppressed stream
    /// creation. The assigned ID strictly increases.
    pub fn xadd(
        &mut self,
        key: &[u8],
        spec: StreamIdSpec,
        fields: Vec<(Vec<u8>, Vec<u8>)>,
        nomkstream: bool,
        trim: Option<TrimSpec>,
        now_ms: u64,
    ) -> Result<Option<StreamId>, StoreError> {
        if self.stream_mut(key, now_ms)?.is_none() {
            if nomkstream {
                return Ok(None);
            }
            self.insert_value(key, Value::Stream(Stream::default()));
        }
        let Value::Stream(stream) = self.value_mut_unchecked(key) else {
            unreachable!("type checked above");
        };
        let id = match spec {
            StreamIdSpec::Auto => {
                if now_ms > stream.last_id.ms {
                    StreamId::new(now_ms, 0)
                } else {
                    StreamId::new(stream.last_id.ms, stream.last_id.seq + 1)
                }
            }
            StreamIdSpec::AtMs(ms) => {
                if ms > stream.last_id.ms {
                    StreamId::new(ms, 0)
                } else if ms == stream.last_id.ms {
                    StreamId::new(ms, stream.last_id.seq + 1)
                } else {
                    return Err(StoreError::StreamIdTooSmall);
                }
            }
            StreamIdSpec::Exact(id) => {
                if id <= stream.last_id || id == StreamId::MIN {
                    return Err(StoreError::StreamIdTooSmall);
                }
                id
            }
        };
        stream.entries.push(StreamEntry { id, fields });
        stream.last_id = id;
        stream.entries_added += 1;
        if let Some(spec) = trim {
            stream.trim(spec);
        }
        self.bump(key);
        self.note('t', "xadd", key);
        Ok(Some(id))
    }

    pub fn xlen(&mut self, key: &[u8], now_ms: u64) -> Result<usize, StoreError> {
        Ok(self.stream_ref(key, now_ms)?.map_or(0, |s| s.entries.len()))
    }

    /// Inclusive ID range, oldest first (callers reverse for XREVRANGE).
    pub fn xrange(
        &mut self,
        key: &[u8],
        start: StreamId,
        end: StreamId,
        count: usize,
        now_ms: u64,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        Ok(self
            .stream_ref(key, now_ms)?
            .map_or_else(Vec::new, |s| s.range(start, end, count)))
    }

    /// Entries strictly after `id` (XREAD).
    pub fn xread_after(
        &mut self,
        key: &[u8],
        id: StreamId,
        count: usize,
        now_ms: u64,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        Ok(self.stream_ref(key, now_ms)?.map_or_else(Vec::new, |s| {
            let from = s.position_after(id);
            s.entries.iter().skip(from).take(count).cloned().collect()
        }))
    }

    /// The current last ID, for resolving `$` in XREAD/XGROUP.
    pub fn stream_last_id(&mut self, key: &[u8], now_ms: u64) -> Result<StreamId, StoreError> {
        Ok(self.stream_ref(key, now_ms)?.map_or(StreamId::MIN, |s| s.last_id))
    }

    pub fn xdel(
        &mut self,
        key: &[u8],
        ids: &[StreamId],
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        let Some(stream) = self.stream_mut(key, now_ms)? else {
            return Ok(0);
        };
        let before = stream.entries.len();
        let mut max_deleted = stream.max_deleted_id;
        stream.entries.retain(|entry| {
            let drop = ids.contains(&entry.id);
            if drop && entry.id > max_deleted {
                max_deleted = entry.id;
            }
            !drop
        });
        stream.max_deleted_id = max_deleted;
        let removed = (before - stream.entries.len()) as u64;
        if removed > 0 {
            self.bump(key);
            self.note('t', "xdel", key);
        }
        Ok(removed)
    }

    pub fn xtrim(
        &mut self,
        key: &[u8],
        spec: TrimSpec,
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        let Some(stream) = self.stream_mut(key, now_ms)? else {
            return Ok(0);
        };
        let removed = stream.trim(spec);
        if removed > 0 {
            self.bump(key);
            self.note('t', "xtrim", key);
        }
        Ok(removed)
    }

    /// Force the last-assigned ID (XSETID). Fails when the stream still
    /// holds an entry above the new ID.
    pub fn xsetid(
        &mut self,
        key: &[u8],
        id: StreamId,
        entries_added: Option<u64>,
        max_deleted: Option<StreamId>,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let Some(stream) = self.stream_mut(key, now_ms)? else {
            return Err(StoreError::KeyNotFound);
        };
        if stream.entries.last().is_some_and(|entry| entry.id > id) {
            return Err(StoreError::StreamIdTooSmall);
        }
        stream.last_id = id;
        if let Some(added) = entries_added {
            stream.entries_added = added;
        }
        if let Some(max_deleted) = max_deleted {
            stream.max_deleted_id = max_deleted;
        }
        self.bump(key);
        self.note('t', "xsetid", key);
        Ok(())
    }

    // ── consumer groups ──────────────────────────────────────────────

    /// Create a group positioned at `start`. `KeyNotFound` when the stream
    /// is missing and `mkstream` is false.
    pub fn xgroup_create(
        &mut self,
        key: &[u8],
        group: &[u8],
        start: StreamId,
        mkstream: bool,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        if self.stream_mut(key, now_ms)?.is_none() {
            if !mkstream {
                return Err(StoreError::KeyNotFound);
            }
            self.insert_value(key, Value::Stream(Stream::default()));
        }
        let Value::Stream(stream) = self.value_mut_unchecked(key) else {
            unreachable!("type checked above");
        };
        if stream.groups.contains_key(group) {
            return Err(StoreError::StreamGroupExists);
        }
        stream.groups.insert(
            group.to_vec(),
            ConsumerGroup {
                last_delivered: start,
                ..Default::default()
            },
        );
        self.bump(key);
        self.note('t', "xgroup-create", key);
        Ok(())
    }

    pub fn xgroup_destroy(
        &mut self,
        key: &[u8],
        group: &[u8],
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let Some(stream) = self.stream_mut(key, now_ms)? else {
            return Err(StoreError::KeyNotFound);
        };
        let removed = stream.groups.remove(group).is_some();
        if removed {
            self.bump(key);
            self.note('t', "xgroup-destroy", key);
        }
        Ok(removed)
    }

    pub fn xgroup_set_id(
        &mut self,
        key: &[u8],
        group: &[u8],
        id: StreamId,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let group_name = group.to_vec();
        let key_name = key.to_vec();
        let Some(stream) = self.stream_mut(key, now_ms)? else {
            return Err(StoreError::KeyNotFound);
        };
        let Some(state) = stream.groups.get_mut(group) else {
            return Err(StoreError::StreamGroupNotFound { group: group_name, key: key_name });
        };
        state.last_delivered = id;
        self.bump(key);
        Ok(())
    }

    pub fn xgroup_create_consumer(
        &mut self,
        key: &[u8],
        group: &[u8],
        consumer: &[u8],
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let group_name = group.to_vec();
        let key_name = key.to_vec();
        let Some(stream) = self.stream_mut(key, now_ms)? else {
            return Err(StoreError::KeyNotFound);
        };
        let Some(state) = stream.groups.get_mut(group) else {
            return Err(StoreError::StreamGroupNotFound { group: group_name, key: key_name });
        };
        let created = !state.consumers.contains_key(consumer);
        state.consumers.insert(consumer.to_vec(), now_ms);
        if created {
            self.bump(key);
            self.note('t', "xgroup-createconsumer", key);
        }
        Ok(created)
    }

    /// Remove a consumer; returns how many pending entries it held.
    pub fn xgroup_del_consumer(
        &mut self,
        key: &[u8],
        group: &[u8],
        consumer: &[u8],
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        let group_name = group.to_vec();
        let key_name = key.to_vec();
        let Some(stream) = self.stream_mut(key, now_ms)? else {
            return Err(StoreError::KeyNotFound);
        };
        let Some(state) = stream.groups.get_mut(group) else {
            return Err(StoreError::StreamGroupNotFound { group: group_name, key: key_name });
        };
        let before = state.pending.len();
        state.pending.retain(|_, pel| pel.consumer != consumer);
        let dropped = (before - state.pending.len()) as u64;
        state.consumers.remove(consumer);
        self.bump(key);
        self.note('t', "xgroup-delconsumer", key);
        Ok(dropped)
    }

    /// Deliver entries to a group consumer. `NewEntries` advances
    /// last-delivered and grows the PEL (unless `noack`); `Backlog` replays
    /// the consumer's own pending entries after the given ID.
    pub fn xreadgroup(
        &mut self,
        key: &[u8],
        group: &[u8],
        consumer: &[u8],
        read: GroupRead,
        count: usize,
        noack: bool,
        now_ms: u64,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let group_name = group.to_vec();
        let key_name = key.to_vec();
        let Some(stream) = self.stream_mut(key, now_ms)? else {
            return Err(StoreError::StreamGroupNotFound { group: group_name, key: key_name });
        };
        let Some(state) = stream.groups.get_mut(group) else {
            return Err(StoreError::StreamGroupNotFound { group: group_name, key: key_name });
        };
        state.consumers.entry(consumer.to_vec()).or_insert(now_ms);

        match read {
            GroupRead::NewEntries => {
                let from = stream
                    .entries
                    .partition_point(|entry| entry.id <= state.last_delivered);
                let delivered: Vec<StreamEntry> = stream
                    .entries
                    .iter()
                    .skip(from)
                    .take(count)
                    .cloned()
                    .collect();
                if let Some(last) = delivered.last() {
                    state.last_delivered = last.id;
                }
                if !noack {
                    for entry in &delivered {
                        state.pending.insert(
                            entry.id,
                            PendingEntry {
                                consumer: consumer.to_vec(),
                                delivery_time_ms: now_ms,
                                delivery_count: 1,
                            },
                        );
                    }
                }
                if !delivered.is_empty() {
                    self.bump(key);
                }
                Ok(delivered)
            }
            GroupRead::Backlog(after) => {
                let ids: Vec<StreamId> = state
                    .pending
                    .iter()
                    .filter(|(id, pel)| **id > after && pel.consumer == consumer)
                    .map(|(id, _)| *id)
                    .take(count)
                    .collect();
                let mut out = Vec::with_capacity(ids.len());
                for id in ids {
                    // Entries trimmed out of the stream stay pending but
                    // cannot be replayed.
                    if let Some(entry) = stream.entries.iter().find(|entry| entry.id == id) {
                        out.push(entry.clone());
                    }
                }
                Ok(out)
            }
        }
    }

    pub fn xack(
        &mut self,
        key: &[u8],
        group: &[u8],
        ids: &[StreamId],
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        let Some(stream) = self.stream_mut(key, now_ms)? else {
            return Ok(0);
        };
        let Some(state) = stream.groups.get_mut(group) else {
            return Ok(0);
        };
        let mut acked = 0_u64;
        for id in ids {
            if state.pending.remove(id).is_some() {
                acked += 1;
            }
        }
        if acked > 0 {
            self.bump(key);
        }
        Ok(acked)
    }

    /// Summary form of XPENDING: (count, smallest, largest, per-consumer).
    #[allow(clippy::type_complexity)]
    pub fn xpending_summary(
        &mut self,
        key: &[u8],
        group: &[u8],
        now_ms: u64,
    ) -> Result<(usize, Option<StreamId>, Option<StreamId>, Vec<(Vec<u8>, u64)>), StoreError>
    {
        let group_name = group.to_vec();
        let key_name = key.to_vec();
        let Some(stream) = self.stream_ref(key, now_ms)? else {
            return Err(StoreError::StreamGroupNotFound { group: group_name, key: key_name });
        };
        let Some(state) = stream.groups.get(group) else {
            return Err(StoreError::StreamGroupNotFound { group: group_name, key: key_name });
        };
        let mut per_consumer: BTreeMap<Vec<u8>, u64> = BTreeMap::new();
        for pel in state.pending.values() {
            *per_consumer.entry(pel.consumer.clone()).or_insert(0) += 1;
        }
        Ok((
            state.pending.len(),
            state.pending.keys().next().copied(),
            state.pending.keys().next_back().copied(),
            per_consumer.into_iter().collect(),
        ))
    }

    /// Extended form of XPENDING.
    #[allow(clippy::type_complexity)]
    pub fn xpending_detail(
        &mut self,
        key: &[u8],
        group: &[u8],
        start: StreamId,
        end: StreamId,
        count: usize,
        consumer: Option<&[u8]>,
        min_idle_ms: u64,
        now_ms: u64,
    ) -> Result<Vec<(StreamId, Vec<u8>, u64, u64)>, StoreError> {
        let group_name = group.to_vec();
        let key_name = key.to_vec();
        let Some(stream) = self.stream_ref(key, now_ms)? else {
            return Err(StoreError::StreamGroupNotFound { group: group_name, key: key_name });
        };
        let Some(state) = stream.groups.get(group) else {
            return Err(StoreError::StreamGroupNotFound { group: group_name, key: key_name });
        };
        Ok(state
            .pending
            .range(start..=end)
            .filter(|(_, pel)| consumer.is_none_or(|c| pel.consumer == c))
            .filter(|(_, pel)| now_ms.saturating_sub(pel.delivery_time_ms) >= min_idle_ms)
            .take(count)
            .map(|(id, pel)| {
                (
                    *id,
                    pel.consumer.clone(),
                    now_ms.saturating_sub(pel.delivery_time_ms),
                    pel.delivery_count,
                )
            })
            .collect())
    }

    /// Reassign pending entries idle for at least `min_idle_ms`. With
    /// `force`, entries not yet pending are claimed too (if they exist).
    pub fn xclaim(
        &mut self,
        key: &[u8],
        group: &[u8],
        consumer: &[u8],
        min_idle_ms: u64,
        ids: &[StreamId],
        force: bool,
        justid: bool,
        now_ms: u64,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let group_name = group.to_vec();
        let key_name = key.to_vec();
        let Some(stream) = self.stream_mut(key, now_ms)? else {
            return Err(StoreError::StreamGroupNotFound { group: group_name, key: key_name });
        };
        let Some(state) = stream.groups.get_mut(group) else {
            return Err(StoreError::StreamGroupNotFound { group: group_name, key: key_name });
        };
        state.consumers.entry(consumer.to_vec()).or_insert(now_ms);

        let mut claimed = Vec::new();
        for id in ids {
            let pending_and_idle = match state.pending.get(id) {
                Some(pel) => {
                    if now_ms.saturating_sub(pel.delivery_time_ms) < min_idle_ms {
                        continue;
                    }
                    true
                }
                None => false,
            };
            let entry = stream.entries.iter().find(|entry| entry.id == *id).cloned();
            if pending_and_idle {
                let Some(entry) = entry else {
                    // Deleted entries drop out of the PEL on claim.
                    state.pending.remove(id);
                    continue;
                };
                let pel = state.pending.get_mut(id).expect("checked above");
                pel.consumer = consumer.to_vec();
                pel.delivery_time_ms = now_ms;
                if !justid {
                    pel.delivery_count += 1;
                }
                claimed.push(entry);
            } else if force {
                let Some(entry) = entry else { continue };
                state.pending.insert(
                    *id,
                    PendingEntry {
                        consumer: consumer.to_vec(),
                        delivery_time_ms: now_ms,
                        delivery_count: 1,
                    },
                );
                claimed.push(entry);
            }
        }
        if !claimed.is_empty() {
            self.bump(key);
            self.note('t', "xclaim", key);
        }
        Ok(claimed)
    }

    /// Cursor-driven claim sweep. Returns (next cursor, claimed entries,
    /// IDs dropped because their entry no longer exists).
    #[allow(clippy::type_complexity)]
    pub fn xautoclaim(
        &mut self,
        key: &[u8],
        group: &[u8],
        consumer: &[u8],
        min_idle_ms: u64,
        start: StreamId,
        count: usize,
        justid: bool,
        now_ms: u64,
    ) -> Result<(StreamId, Vec<StreamEntry>, Vec<StreamId>), StoreError> {
        let group_name = group.to_vec();
        let key_name = key.to_vec();
        let Some(stream) = self.stream_mut(key, now_ms)? else {
            return Err(StoreError::StreamGroupNotFound { group: group_name, key: key_name });
        };
        let Some(state) = stream.groups.get_mut(group) else {
            return Err(StoreError::StreamGroupNotFound { group: group_name, key: key_name });
        };
        state.consumers.entry(consumer.to_vec()).or_insert(now_ms);

        let candidates: Vec<StreamId> = state
            .pending
            .range(start..)
            .filter(|(_, pel)| now_ms.saturating_sub(pel.delivery_time_ms) >= min_idle_ms)
            .map(|(id, _)| *id)
            .collect();

        let mut claimed = Vec::new();
        let mut deleted = Vec::new();
        let mut next_cursor = StreamId::MIN;
        for id in candidates {
            if claimed.len() >= count {
                next_cursor = id;
                break;
            }
            match stream.entries.iter().find(|entry| entry.id == id) {
                Some(entry) => {
                    let entry = entry.clone();
                    let pel = state.pending.get_mut(&id).expect("candidate came from PEL");
                    pel.consumer = consumer.to_vec();
                    pel.delivery_time_ms = now_ms;
                    if !justid {
                        pel.delivery_count += 1;
                    }
                    claimed.push(entry);
                }
                None => {
                    state.pending.remove(&id);
                    deleted.push(id);
                }
            }
        }
        if !claimed.is_empty() || !deleted.is_empty() {
            self.bump(key);
            self.note('t', "xautoclaim", key);
        }
        Ok((next_cursor, claimed, deleted))
    }

    /// Raw stream view for XINFO.
    pub fn stream_info(&mut self, key: &[u8], now_ms: u64) -> Result<Option<Stream>, StoreError> {
        Ok(self.stream_ref(key, now_ms)?.cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&[u8], &[u8])]) -> Vec<(Vec<u8>, Vec<u8>)> {
        pairs.iter().map(|(f, v)| (f.to_vec(), v.to_vec())).collect()
    }

    fn add_auto(db: &mut Db, key: &[u8], now_ms: u64) -> StreamId {
        db.xadd(key, StreamIdSpec::Auto, fields(&[(b"f", b"v")]), false, None, now_ms)
            .expect("ok")
            .expect("created")
    }

    #[test]
    fn auto_ids_disambiguate_within_one_millisecond() {
        let mut db = Db::new();
        let first = add_auto(&mut db, b"s", 5);
        let second = add_auto(&mut db, b"s", 5);
        assert_eq!(first, StreamId::new(5, 0));
        assert_eq!(second, StreamId::new(5, 1));
        let third = add_auto(&mut db, b"s", 6);
        assert_eq!(third, StreamId::new(6, 0));
        assert_eq!(db.xlen(b"s", 6).expect("ok"), 3);
    }

    #[test]
    fn auto_id_never_goes_backwards_when_clock_does() {
        let mut db = Db::new();
        add_auto(&mut db, b"s", 100);
        let id = add_auto(&mut db, b"s", 50);
        assert_eq!(id, StreamId::new(100, 1));
    }

    #[test]
    fn explicit_ids_must_increase() {
        let mut db = Db::new();
        db.xadd(
            b"s",
            StreamIdSpec::Exact(StreamId::new(5, 5)),
            fields(&[(b"f", b"v")]),
            false,
            None,
            0,
        )
        .expect("ok");
        let err = db.xadd(
            b"s",
            StreamIdSpec::Exact(StreamId::new(5, 5)),
            fields(&[(b"f", b"v")]),
            false,
            None,
            0,
        );
        assert_eq!(err, Err(StoreError::StreamIdTooSmall));
        let err = db.xadd(
            b"s2",
            StreamIdSpec::Exact(StreamId::MIN),
            fields(&[(b"f", b"v")]),
            false,
            None,
            0,
        );
        assert_eq!(err, Err(StoreError::StreamIdTooSmall));
    }

    #[test]
    fn nomkstream_skips_missing_key() {
        let mut db = Db::new();
        let id = db
            .xadd(b"s", StreamIdSpec::Auto, fields(&[(b"f", b"v")]), true, None, 0)
            .expect("ok");
        assert_eq!(id, None);
        assert!(!db.exists(b"s", 0));
    }

    #[test]
    fn range_is_inclusive_and_ordered() {
        let mut db = Db::new();
        for ms in 1..=5 {
            add_auto(&mut db, b"s", ms);
        }
        let entries = db
            .xrange(b"s", StreamId::new(2, 0), StreamId::new(4, u64::MAX), usize::MAX, 5)
            .expect("ok");
        let ids: Vec<u64> = entries.iter().map(|entry| entry.id.ms).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        let all = db.xrange(b"s", StreamId::MIN, StreamId::MAX, usize::MAX, 5).expect("ok");
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn trim_maxlen_and_minid() {
        let mut db = Db::new();
        for ms in 1..=6 {
            add_auto(&mut db, b"s", ms);
        }
        let spec = TrimSpec { policy: TrimPolicy::MaxLen(4), approximate: false };
        assert_eq!(db.xtrim(b"s", spec, 6).expect("ok"), 2);
        assert_eq!(db.xlen(b"s", 6).expect("ok"), 4);
        let spec = TrimSpec {
            policy: TrimPolicy::MinId(StreamId::new(5, 0)),
            approximate: true,
        };
        assert_eq!(db.xtrim(b"s", spec, 6).expect("ok"), 2);
        let remaining = db
            .xrange(b"s", StreamId::MIN, StreamId::MAX, usize::MAX, 6)
            .expect("ok");
        assert_eq!(remaining.first().map(|entry| entry.id.ms), Some(5));
        // XLEN reflects trims, entries_added survives them.
        let info = db.stream_info(b"s", 6).expect("ok").expect("present");
        assert_eq!(info.entries_added, 6);
    }

    #[test]
    fn group_reads_advance_last_delivered_and_fill_pel() {
        let mut db = Db::new();
        let id1 = add_auto(&mut db, b"s", 1);
        let id2 = add_auto(&mut db, b"s", 2);
        db.xgroup_create(b"s", b"g", StreamId::MIN, false, 2).expect("ok");
        let read = db
            .xreadgroup(b"s", b"g", b"alice", GroupRead::NewEntries, 10, false, 2)
            .expect("ok");
        assert_eq!(read.len(), 2);
        // A second `>` read sees nothing new.
        let read = db
            .xreadgroup(b"s", b"g", b"alice", GroupRead::NewEntries, 10, false, 2)
            .expect("ok");
        assert!(read.is_empty());
        // The backlog replays unacknowledged entries.
        let backlog = db
            .xreadgroup(b"s", b"g", b"alice", GroupRead::Backlog(StreamId::MIN), 10, false, 2)
            .expect("ok");
        assert_eq!(backlog.len(), 2);
        assert_eq!(db.xack(b"s", b"g", &[id1], 2).expect("ok"), 1);
        let backlog = db
            .xreadgroup(b"s", b"g", b"alice", GroupRead::Backlog(StreamId::MIN), 10, false, 2)
            .expect("ok");
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].id, id2);
    }

    #[test]
    fn group_create_requires_stream_or_mkstream() {
        let mut db = Db::new();
        assert_eq!(
            db.xgroup_create(b"missing", b"g", StreamId::MIN, false, 0),
            Err(StoreError::KeyNotFound),
        );
        db.xgroup_create(b"missing", b"g", StreamId::MIN, true, 0).expect("ok");
        assert_eq!(db.xlen(b"missing", 0).expect("ok"), 0);
        assert_eq!(
            db.xgroup_create(b"missing", b"g", StreamId::MIN, true, 0),
            Err(StoreError::StreamGroupExists),
        );
    }

    #[test]
    fn noack_reads_leave_no_pending() {
        let mut db = Db::new();
        add_auto(&mut db, b"s", 1);
        db.xgroup_create(b"s", b"g", StreamId::MIN, false, 1).expect("ok");
        db.xreadgroup(b"s", b"g", b"c", GroupRead::NewEntries, 10, true, 1)
            .expect("ok");
        let (count, ..) = db.xpending_summary(b"s", b"g", 1).expect("ok");
        assert_eq!(count, 0);
    }

    #[test]
    fn xpending_summary_and_detail() {
        let mut db = Db::new();
        let id1 = add_auto(&mut db, b"s", 1);
        let id2 = add_auto(&mut db, b"s", 2);
        db.xgroup_create(b"s", b"g", StreamId::MIN, false, 2).expect("ok");
        db.xreadgroup(b"s", b"g", b"alice", GroupRead::NewEntries, 1, false, 10)
            .expect("ok");
        db.xreadgroup(b"s", b"g", b"bob", GroupRead::NewEntries, 1, false, 20)
            .expect("ok");
        let (count, min, max, consumers) = db.xpending_summary(b"s", b"g", 30).expect("ok");
        assert_eq!(count, 2);
        assert_eq!(min, Some(id1));
        assert_eq!(max, Some(id2));
        assert_eq!(
            consumers,
            vec![(b"alice".to_vec(), 1), (b"bob".to_vec(), 1)],
        );
        let detail = db
            .xpending_detail(b"s", b"g", StreamId::MIN, StreamId::MAX, 10, None, 0, 30)
            .expect("ok");
        assert_eq!(detail.len(), 2);
        assert_eq!(detail[0].0, id1);
        assert_eq!(detail[0].1, b"alice".to_vec());
        assert_eq!(detail[0].2, 20);
        let only_bob = db
            .xpending_detail(b"s", b"g", StreamId::MIN, StreamId::MAX, 10, Some(b"bob"), 0, 30)
            .expect("ok");
        assert_eq!(only_bob.len(), 1);
    }

    #[test]
    fn xclaim_reassigns_idle_entries() {
        let mut db = Db::new();
        let id = add_auto(&mut db, b"s", 1);
        db.xgroup_create(b"s", b"g", StreamId::MIN, false, 1).expect("ok");
        db.xreadgroup(b"s", b"g", b"alice", GroupRead::NewEntries, 10, false, 10)
            .expect("ok");
        // Too recent: nothing claimed.
        let claimed = db
            .xclaim(b"s", b"g", b"bob", 1_000, &[id], false, false, 100)
            .expect("ok");
        assert!(claimed.is_empty());
        let claimed = db
            .xclaim(b"s", b"g", b"bob", 1_000, &[id], false, false, 2_000)
            .expect("ok");
        assert_eq!(claimed.len(), 1);
        let detail = db
            .xpending_detail(b"s", b"g", StreamId::MIN, StreamId::MAX, 10, Some(b"bob"), 0, 2_000)
            .expect("ok");
        assert_eq!(detail.len(), 1);
        assert_eq!(detail[0].3, 2);
    }

    #[test]
    fn xautoclaim_sweeps_and_drops_deleted() {
        let mut db = Db::new();
        let id1 = add_auto(&mut db, b"s", 1);
        let id2 = add_auto(&mut db, b"s", 2);
        db.xgroup_create(b"s", b"g", StreamId::MIN, false, 2).expect("ok");
        db.xreadgroup(b"s", b"g", b"alice", GroupRead::NewEntries, 10, false, 10)
            .expect("ok");
        db.xdel(b"s", &[id1], 10).expect("ok");
        let (cursor, claimed, deleted) = db
            .xautoclaim(b"s", b"g", b"bob", 0, StreamId::MIN, 10, false, 5_000)
            .expect("ok");
        assert_eq!(cursor, StreamId::MIN);
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id2);
        assert_eq!(deleted, vec![id1]);
    }

    #[test]
    fn stream_id_parse_and_display() {
        assert_eq!(StreamId::parse(b"5-3", 0), Some(StreamId::new(5, 3)));
        assert_eq!(StreamId::parse(b"5", 7), Some(StreamId::new(5, 7)));
        assert_eq!(StreamId::parse(b"x", 0), None);
        assert_eq!(StreamId::new(12, 34).to_string(), "12-34");
        assert_eq!(StreamId::new(1, u64::MAX).next(), StreamId::new(2, 0));
        assert_eq!(StreamId::new(1, 5).next(), StreamId::new(1, 6));
    }
}
