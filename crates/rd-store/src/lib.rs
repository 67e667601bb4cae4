#![forbid(unsafe_code)]

//! The in-memory keyspace: one [`Db`] per database slot, holding typed
//! values with optional expiry, per-key version counters for `WATCH`, and a
//! pending queue of keyspace events drained by the runtime after each
//! command.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use rand::seq::SliceRandom;

mod collections;
mod stream;
mod zset;

pub use stream::{
    ConsumerGroup, GroupRead, PendingEntry, Stream, StreamEntry, StreamId, StreamIdSpec,
    TrimPolicy, TrimSpec,
};
pub use zset::{LexBound, LexRange, ScoreRange, ZAddFlags, ZAddOutcome};

/// Hard cap on string values, matching the reference server's 512 MB limit.
pub const MAX_STRING_SIZE: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    WrongType,
    ValueNotInteger,
    ValueNotFloat,
    IntegerOverflow,
    /// An arithmetic result would be NaN or infinite.
    NonFiniteFloat,
    KeyNotFound,
    IndexOutOfRange,
    StringTooLong,
    /// Target key of RESTORE/COPY/RENAMENX already exists.
    BusyKey,
    StreamIdInvalid,
    /// The requested or computed stream ID is not greater than the last one.
    StreamIdTooSmall,
    StreamGroupExists,
    StreamGroupNotFound { group: Vec<u8>, key: Vec<u8> },
}

/// The inner value held by a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Hash(HashFields),
    Set(HashSet<Vec<u8>>),
    /// Member -> score mapping. Ordered iteration is done on demand.
    SortedSet(HashMap<Vec<u8>, f64>),
    Stream(Stream),
    /// HyperLogLog emulated as an exact set; cardinality queries are exact.
    Hll(HashSet<Vec<u8>>),
}

/// Hash value: fields plus optional per-field deadlines (`HEXPIRE` family).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HashFields {
    pub fields: HashMap<Vec<u8>, Vec<u8>>,
    pub ttls: HashMap<Vec<u8>, u64>,
}

impl HashFields {
    /// Drop fields whose deadline has passed. Returns true if the hash is
    /// empty afterwards.
    fn prune(&mut self, now_ms: u64) -> bool {
        if !self.ttls.is_empty() {
            let expired: Vec<Vec<u8>> = self
                .ttls
                .iter()
                .filter(|&(_, &at)| at <= now_ms)
                .map(|(f, _)| f.clone())
                .collect();
            for field in expired {
                self.fields.remove(&field);
                self.ttls.remove(&field);
            }
        }
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Entry {
    pub(crate) value: Value,
    pub(crate) expires_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PttlValue {
    KeyMissing,
    NoExpiry,
    Remaining(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    List,
    Hash,
    Set,
    ZSet,
    Stream,
}

impl ValueType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::List => "list",
            Self::Hash => "hash",
            Self::Set => "set",
            Self::ZSet => "zset",
            Self::Stream => "stream",
        }
    }

    #[must_use]
    pub fn from_name(name: &[u8]) -> Option<Self> {
        if name.eq_ignore_ascii_case(b"string") {
            Some(Self::String)
        } else if name.eq_ignore_ascii_case(b"list") {
            Some(Self::List)
        } else if name.eq_ignore_ascii_case(b"hash") {
            Some(Self::Hash)
        } else if name.eq_ignore_ascii_case(b"set") {
            Some(Self::Set)
        } else if name.eq_ignore_ascii_case(b"zset") {
            Some(Self::ZSet)
        } else if name.eq_ignore_ascii_case(b"stream") {
            Some(Self::Stream)
        } else {
            None
        }
    }
}

/// A key-level event recorded by a mutating operation. The runtime drains
/// these to fan out `__keyspace@db__` / `__keyevent@db__` notifications and
/// to wake blocked clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    /// Notification class flag: 'g', '$', 'l', 's', 'h', 'z', 't', 'x', 'n'.
    pub class: char,
    pub event: &'static str,
    pub key: Vec<u8>,
}

/// Expiry disposition for [`Db::string_set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetExpiry {
    /// Clear any existing deadline (plain `SET`).
    Discard,
    /// Keep the current deadline (`KEEPTTL`).
    Keep,
    /// Absolute deadline in milliseconds.
    At(u64),
}

/// Conditions for the EXPIRE family (`NX`/`XX`/`GT`/`LT`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpireOpts {
    pub nx: bool,
    pub xx: bool,
    pub gt: bool,
    pub lt: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveExpireStats {
    pub sampled: usize,
    pub expired: usize,
}

/// Index mode for BITCOUNT/BITPOS ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitUnit {
    Byte,
    Bit,
}

/// One numbered keyspace.
#[derive(Debug, Default)]
pub struct Db {
    entries: HashMap<Vec<u8>, Entry>,
    /// (deadline, key) pairs for the active sweep.
    expiry_index: BTreeSet<(u64, Vec<u8>)>,
    /// Per-key write counters. Kept after deletion so WATCH observes
    /// delete-then-recreate.
    versions: HashMap<Vec<u8>, u64>,
    events: Vec<KeyEvent>,
}

impl Db {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of live keys.
    #[must_use]
    pub fn dbsize(&self, now_ms: u64) -> usize {
        self.entries
            .values()
            .filter(|entry| !entry.is_expired(now_ms))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every key. Versions are bumped so watchers of surviving
    /// transactions observe the flush.
    pub fn flush(&mut self) {
        let keys: Vec<Vec<u8>> = self.entries.keys().cloned().collect();
        for key in keys {
            self.bump(&key);
        }
        self.entries.clear();
        self.expiry_index.clear();
    }

    // ── events & versions ────────────────────────────────────────────

    /// Record a keyspace event. Mutating store methods call this; the rare
    /// cross-database operations (COPY DB, MOVE, RESTORE) record theirs from
    /// the runtime.
    pub fn note(&mut self, class: char, event: &'static str, key: &[u8]) {
        self.events.push(KeyEvent {
            class,
            event,
            key: key.to_vec(),
        });
    }

    pub fn take_events(&mut self) -> Vec<KeyEvent> {
        std::mem::take(&mut self.events)
    }

    #[must_use]
    pub fn version(&self, key: &[u8]) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    /// Bump a key's write counter.
    pub fn bump(&mut self, key: &[u8]) {
        let counter = self.versions.entry(key.to_vec()).or_insert(0);
        *counter = counter.wrapping_add(1);
    }

    // ── entry plumbing ───────────────────────────────────────────────

    pub(crate) fn drop_if_expired(&mut self, key: &[u8], now_ms: u64) {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(now_ms));
        if expired {
            self.remove_expired(key.to_vec());
        }
    }

    fn remove_expired(&mut self, key: Vec<u8>) {
        if let Some(entry) = self.entries.remove(&key) {
            if let Some(at) = entry.expires_at_ms {
                self.expiry_index.remove(&(at, key.clone()));
            }
            self.bump(&key);
            self.note('x', "expired", &key);
        }
    }

    pub(crate) fn live_entry(&mut self, key: &[u8], now_ms: u64) -> Option<&Entry> {
        self.drop_if_expired(key, now_ms);
        self.entries.get(key)
    }

    pub(crate) fn live_entry_mut(&mut self, key: &[u8], now_ms: u64) -> Option<&mut Entry> {
        self.drop_if_expired(key, now_ms);
        self.entries.get_mut(key)
    }

    /// Insert a fresh entry without expiry, replacing whatever was there.
    pub(crate) fn put(&mut self, key: &[u8], value: Value) {
        self.set_deadline(key, None);
        self.entries.insert(
            key.to_vec(),
            Entry {
                value,
                expires_at_ms: None,
            },
        );
        self.bump(key);
    }

    /// Remove an entry (not expiry-driven) without recording an event;
    /// callers note the event that fits their operation.
    pub fn remove_entry(&mut self, key: &[u8]) -> Option<Value> {
        let entry = self.entries.remove(key)?;
        if let Some(at) = entry.expires_at_ms {
            self.expiry_index.remove(&(at, key.to_vec()));
        }
        self.bump(key);
        Some(entry.value)
    }

    /// Update the expiry-index side of a deadline change. The entry itself
    /// is adjusted by the caller.
    fn set_deadline(&mut self, key: &[u8], new_at: Option<u64>) {
        if let Some(entry) = self.entries.get(key)
            && let Some(old) = entry.expires_at_ms
        {
            self.expiry_index.remove(&(old, key.to_vec()));
        }
        if let Some(at) = new_at {
            self.expiry_index.insert((at, key.to_vec()));
        }
    }

    // ── generic key operations ───────────────────────────────────────

    pub fn exists(&mut self, key: &[u8], now_ms: u64) -> bool {
        self.live_entry(key, now_ms).is_some()
    }

    pub fn del(&mut self, keys: &[Vec<u8>], now_ms: u64) -> u64 {
        let mut removed = 0_u64;
        for key in keys {
            self.drop_if_expired(key, now_ms);
            if self.remove_entry(key).is_some() {
                self.note('g', "del", key);
                removed += 1;
            }
        }
        removed
    }

    pub fn value_type(&mut self, key: &[u8], now_ms: u64) -> Option<ValueType> {
        self.live_entry(key, now_ms).map(|entry| match entry.value {
            Value::String(_) | Value::Hll(_) => ValueType::String,
            Value::List(_) => ValueType::List,
            Value::Hash(_) => ValueType::Hash,
            Value::Set(_) => ValueType::Set,
            Value::SortedSet(_) => ValueType::ZSet,
            Value::Stream(_) => ValueType::Stream,
        })
    }

    pub fn rename(&mut self, key: &[u8], newkey: &[u8], now_ms: u64) -> Result<(), StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries.contains_key(key) {
            return Err(StoreError::KeyNotFound);
        }
        if key == newkey {
            return Ok(());
        }
        let entry = self.entries.remove(key).expect("checked above");
        if let Some(at) = entry.expires_at_ms {
            self.expiry_index.remove(&(at, key.to_vec()));
        }
        self.set_deadline(newkey, entry.expires_at_ms);
        let expires_at_ms = entry.expires_at_ms;
        self.entries.insert(
            newkey.to_vec(),
            Entry {
                value: entry.value,
                expires_at_ms,
            },
        );
        self.bump(key);
        self.bump(newkey);
        self.note('g', "rename_from", key);
        self.note('g', "rename_to", newkey);
        Ok(())
    }

    pub fn renamenx(
        &mut self,
        key: &[u8],
        newkey: &[u8],
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries.contains_key(key) {
            return Err(StoreError::KeyNotFound);
        }
        if self.exists(newkey, now_ms) {
            return Ok(false);
        }
        self.rename(key, newkey, now_ms)?;
        Ok(true)
    }

    pub fn keys_matching(&mut self, pattern: &[u8], now_ms: u64) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now_ms))
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn random_key(&mut self, now_ms: u64) -> Option<Vec<u8>> {
        let live: Vec<&Vec<u8>> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now_ms))
            .map(|(key, _)| key)
            .collect();
        live.choose(&mut rand::thread_rng()).map(|key| (*key).clone())
    }

    pub fn touch(&mut self, keys: &[Vec<u8>], now_ms: u64) -> u64 {
        keys.iter()
            .filter(|key| self.exists(key, now_ms))
            .count() as u64
    }

    /// Clone a live entry for DUMP/COPY.
    pub fn entry_snapshot(
        &mut self,
        key: &[u8],
        now_ms: u64,
    ) -> Option<(Value, Option<u64>)> {
        self.live_entry(key, now_ms)
            .map(|entry| (entry.value.clone(), entry.expires_at_ms))
    }

    /// Install an entry wholesale (RESTORE/COPY/MOVE target side). Fails
    /// with `BusyKey` when the target exists and `replace` is false.
    pub fn install_entry(
        &mut self,
        key: &[u8],
        value: Value,
        expires_at_ms: Option<u64>,
        replace: bool,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        if self.exists(key, now_ms) && !replace {
            return Err(StoreError::BusyKey);
        }
        self.set_deadline(key, expires_at_ms);
        self.entries.insert(
            key.to_vec(),
            Entry {
                value,
                expires_at_ms,
            },
        );
        self.bump(key);
        Ok(())
    }

    // ── expiry ───────────────────────────────────────────────────────

    /// Set an absolute deadline. Returns false when the key is missing or a
    /// condition fails. A deadline at or before `now_ms` deletes the key.
    pub fn expire_at(
        &mut self,
        key: &[u8],
        at_ms: i64,
        opts: ExpireOpts,
        now_ms: u64,
    ) -> bool {
        self.drop_if_expired(key, now_ms);
        let Some(entry) = self.entries.get(key) else {
            return false;
        };
        let current = entry.expires_at_ms;
        if opts.nx && current.is_some() {
            return false;
        }
        if opts.xx && current.is_none() {
            return false;
        }
        // GT treats a missing deadline as infinite, LT as never smaller.
        if opts.gt && !current.is_some_and(|cur| at_ms > cur as i64) {
            return false;
        }
        if opts.lt && current.is_some_and(|cur| at_ms >= cur as i64) {
            return false;
        }

        if at_ms <= now_ms as i64 {
            self.remove_entry(key);
            self.note('g', "del", key);
            return true;
        }
        let at = u64::try_from(at_ms).unwrap_or(u64::MAX);
        self.set_deadline(key, Some(at));
        if let Some(entry) = self.entries.get_mut(key) {
            entry.expires_at_ms = Some(at);
        }
        self.bump(key);
        self.note('g', "expire", key);
        true
    }

    pub fn persist(&mut self, key: &[u8], now_ms: u64) -> bool {
        self.drop_if_expired(key, now_ms);
        let had_expiry = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at_ms.is_some());
        if !had_expiry {
            return false;
        }
        self.set_deadline(key, None);
        if let Some(entry) = self.entries.get_mut(key) {
            entry.expires_at_ms = None;
        }
        self.bump(key);
        self.note('g', "persist", key);
        true
    }

    #[must_use]
    pub fn pttl(&mut self, key: &[u8], now_ms: u64) -> PttlValue {
        match self.live_entry(key, now_ms) {
            None => PttlValue::KeyMissing,
            Some(entry) => match entry.expires_at_ms {
                None => PttlValue::NoExpiry,
                Some(at) => {
                    let remain = at.saturating_sub(now_ms);
                    PttlValue::Remaining(i64::try_from(remain).unwrap_or(i64::MAX))
                }
            },
        }
    }

    /// Absolute deadline in milliseconds, for EXPIRETIME/PEXPIRETIME.
    #[must_use]
    pub fn expire_time_ms(&mut self, key: &[u8], now_ms: u64) -> PttlValue {
        match self.live_entry(key, now_ms) {
            None => PttlValue::KeyMissing,
            Some(entry) => match entry.expires_at_ms {
                None => PttlValue::NoExpiry,
                Some(at) => PttlValue::Remaining(i64::try_from(at).unwrap_or(i64::MAX)),
            },
        }
    }

    /// One bounded pass of the periodic sweep: remove up to `budget` keys
    /// whose deadline has passed, front of the deadline queue first.
    pub fn active_expire(&mut self, now_ms: u64, budget: usize) -> ActiveExpireStats {
        let mut stats = ActiveExpireStats::default();
        while stats.expired < budget {
            let Some((at, key)) = self.expiry_index.first().cloned() else {
                break;
            };
            if at > now_ms {
                break;
            }
            stats.sampled += 1;
            self.remove_expired(key);
            stats.expired += 1;
        }
        stats
    }

    // ── incremental scan ─────────────────────────────────────────────

    /// Cursor-based key walk. The cursor is a position in the sorted key
    /// list; keys present for the whole scan are returned at least once,
    /// churned keys may be missed or repeated.
    pub fn scan(
        &mut self,
        cursor: u64,
        pattern: Option<&[u8]>,
        count: usize,
        type_filter: Option<ValueType>,
        now_ms: u64,
    ) -> (u64, Vec<Vec<u8>>) {
        let mut keys: Vec<&Vec<u8>> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now_ms))
            .map(|(key, _)| key)
            .collect();
        keys.sort();
        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(keys.len());
        let count = count.max(1);
        let end = start.saturating_add(count).min(keys.len());
        let window: Vec<Vec<u8>> = keys[start..end].iter().map(|key| (*key).clone()).collect();
        let next_cursor = if end >= keys.len() { 0 } else { end as u64 };

        let mut out = Vec::with_capacity(window.len());
        for key in window {
            if let Some(pattern) = pattern
                && !glob_match(pattern, &key)
            {
                continue;
            }
            if let Some(want) = type_filter
                && self.value_type(&key, now_ms) != Some(want)
            {
                continue;
            }
            out.push(key);
        }
        (next_cursor, out)
    }

    // ── string operations ────────────────────────────────────────────

    pub fn string_get(&mut self, key: &[u8], now_ms: u64) -> Result<Option<Vec<u8>>, StoreError> {
        match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::String(v) => Ok(Some(v.clone())),
                _ => Err(StoreError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn string_set(&mut self, key: &[u8], value: Vec<u8>, expiry: SetExpiry, now_ms: u64) {
        self.drop_if_expired(key, now_ms);
        let kept = match (expiry, self.entries.get(key)) {
            (SetExpiry::Keep, Some(entry)) => entry.expires_at_ms,
            _ => None,
        };
        let new_at = match expiry {
            SetExpiry::At(at) => Some(at),
            SetExpiry::Keep => kept,
            SetExpiry::Discard => None,
        };
        self.set_deadline(key, new_at);
        self.entries.insert(
            key.to_vec(),
            Entry {
                value: Value::String(value),
                expires_at_ms: new_at,
            },
        );
        self.bump(key);
        self.note('$', "set", key);
    }

    pub fn getdel(&mut self, key: &[u8], now_ms: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let is_string = match self.live_entry(key, now_ms) {
            Some(entry) => matches!(&entry.value, Value::String(_)),
            None => return Ok(None),
        };
        if !is_string {
            return Err(StoreError::WrongType);
        }
        let Some(Value::String(v)) = self.remove_entry(key) else {
            unreachable!("type checked above");
        };
        self.note('g', "del", key);
        Ok(Some(v))
    }

    pub fn append(&mut self, key: &[u8], value: &[u8], now_ms: u64) -> Result<usize, StoreError> {
        let buf = self.string_or_insert_mut(key, now_ms)?;
        if buf.len() + value.len() > MAX_STRING_SIZE {
            return Err(StoreError::StringTooLong);
        }
        buf.extend_from_slice(value);
        let len = buf.len();
        self.bump(key);
        self.note('$', "append", key);
        Ok(len)
    }

    pub fn strlen(&mut self, key: &[u8], now_ms: u64) -> Result<usize, StoreError> {
        Ok(self.string_get(key, now_ms)?.map_or(0, |v| v.len()))
    }

    pub fn getrange(
        &mut self,
        key: &[u8],
        start: i64,
        end: i64,
        now_ms: u64,
    ) -> Result<Vec<u8>, StoreError> {
        let Some(value) = self.string_get(key, now_ms)? else {
            return Ok(Vec::new());
        };
        let len = value.len() as i64;
        let from = normalize_index(start, len);
        let to = if end < 0 {
            let adjusted = len.saturating_add(end);
            if adjusted < 0 {
                return Ok(Vec::new());
            }
            adjusted as usize
        } else {
            (end as usize).min(value.len().saturating_sub(1))
        };
        if from > to || from >= value.len() {
            return Ok(Vec::new());
        }
        Ok(value[from..=to].to_vec())
    }

    /// Write `value` at byte `offset`, zero-padding any gap.
    pub fn setrange(
        &mut self,
        key: &[u8],
        offset: usize,
        value: &[u8],
        now_ms: u64,
    ) -> Result<usize, StoreError> {
        if value.is_empty() {
            return self.strlen(key, now_ms);
        }
        if offset + value.len() > MAX_STRING_SIZE {
            return Err(StoreError::StringTooLong);
        }
        let buf = self.string_or_insert_mut(key, now_ms)?;
        if buf.len() < offset + value.len() {
            buf.resize(offset + value.len(), 0);
        }
        buf[offset..offset + value.len()].copy_from_slice(value);
        let len = buf.len();
        self.bump(key);
        self.note('$', "setrange", key);
        Ok(len)
    }

    pub fn incr_by(&mut self, key: &[u8], delta: i64, now_ms: u64) -> Result<i64, StoreError> {
        let current = match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::String(v) => parse_i64(v)?,
                _ => return Err(StoreError::WrongType),
            },
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(StoreError::IntegerOverflow)?;
        let buf = self.string_or_insert_mut(key, now_ms)?;
        *buf = next.to_string().into_bytes();
        self.bump(key);
        self.note('$', "incrby", key);
        Ok(next)
    }

    pub fn incr_by_float(
        &mut self,
        key: &[u8],
        delta: f64,
        now_ms: u64,
    ) -> Result<f64, StoreError> {
        let current = match self.live_entry(key, now_ms) {
            Some(entry) => match &entry.value {
                Value::String(v) => parse_f64(v)?,
                _ => return Err(StoreError::WrongType),
            },
            None => 0.0,
        };
        let next = current + delta;
        if !next.is_finite() {
            return Err(StoreError::NonFiniteFloat);
        }
        let buf = self.string_or_insert_mut(key, now_ms)?;
        *buf = format_float(next).into_bytes();
        self.bump(key);
        self.note('$', "incrbyfloat", key);
        Ok(next)
    }

    // ── bitmap operations ────────────────────────────────────────────

    pub fn setbit(
        &mut self,
        key: &[u8],
        offset: usize,
        bit: bool,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        if offset / 8 >= MAX_STRING_SIZE {
            return Err(StoreError::StringTooLong);
        }
        let buf = self.string_or_insert_mut(key, now_ms)?;
        let byte_index = offset / 8;
        let bit_index = 7 - (offset % 8);
        if buf.len() <= byte_index {
            buf.resize(byte_index + 1, 0);
        }
        let mask = 1u8 << bit_index;
        let previous = buf[byte_index] & mask != 0;
        if bit {
            buf[byte_index] |= mask;
        } else {
            buf[byte_index] &= !mask;
        }
        self.bump(key);
        self.note('$', "setbit", key);
        Ok(previous)
    }

    pub fn getbit(&mut self, key: &[u8], offset: usize, now_ms: u64) -> Result<bool, StoreError> {
        let Some(value) = self.string_get(key, now_ms)? else {
            return Ok(false);
        };
        let byte_index = offset / 8;
        if byte_index >= value.len() {
            return Ok(false);
        }
        Ok(value[byte_index] & (1 << (7 - (offset % 8))) != 0)
    }

    pub fn bitcount(
        &mut self,
        key: &[u8],
        range: Option<(i64, i64, BitUnit)>,
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        let Some(value) = self.string_get(key, now_ms)? else {
            return Ok(0);
        };
        let Some((start, end, unit)) = range else {
            return Ok(value.iter().map(|b| u64::from(b.count_ones())).sum());
        };
        match unit {
            BitUnit::Byte => {
                let len = value.len() as i64;
                let from = normalize_index(start, len);
                let to = normalize_index(end, len).min(value.len().saturating_sub(1));
                if value.is_empty() || from > to {
                    return Ok(0);
                }
                Ok(value[from..=to]
                    .iter()
                    .map(|b| u64::from(b.count_ones()))
                    .sum())
            }
            BitUnit::Bit => {
                let nbits = (value.len() * 8) as i64;
                let from = normalize_index(start, nbits);
                let to = normalize_index(end, nbits).min((value.len() * 8).saturating_sub(1));
                if value.is_empty() || from > to {
                    return Ok(0);
                }
                let mut total = 0_u64;
                for bit in from..=to {
                    if value[bit / 8] & (1 << (7 - (bit % 8))) != 0 {
                        total += 1;
                    }
                }
                Ok(total)
            }
        }
    }

    /// Position of the first bit set to `bit`. `-1` when absent, with the
    /// reference quirk that searching for 0 in a string of all ones without
    /// an explicit end returns the first bit past the string.
    pub fn bitpos(
        &mut self,
        key: &[u8],
        bit: bool,
        start: Option<i64>,
        end: Option<i64>,
        unit: BitUnit,
        now_ms: u64,
    ) -> Result<i64, StoreError> {
        let Some(value) = self.string_get(key, now_ms)? else {
            return Ok(if bit { -1 } else { 0 });
        };
        if value.is_empty() {
            return Ok(if bit { -1 } else { 0 });
        }
        let explicit_end = end.is_some();
        let (from_bit, to_bit) = match unit {
            BitUnit::Byte => {
                let len = value.len() as i64;
                let from = normalize_index(start.unwrap_or(0), len);
                let to = normalize_index(end.unwrap_or(-1), len)
                    .min(value.len().saturating_sub(1));
                if from > to {
                    return Ok(-1);
                }
                (from * 8, to * 8 + 7)
            }
            BitUnit::Bit => {
                let nbits = (value.len() * 8) as i64;
                let from = normalize_index(start.unwrap_or(0), nbits);
                let to = normalize_index(end.unwrap_or(-1), nbits)
                    .min(value.len() * 8 - 1);
                if from > to {
                    return Ok(-1);
                }
                (from, to)
            }
        };
        for pos in from_bit..=to_bit {
            let set = value[pos / 8] & (1 << (7 - (pos % 8))) != 0;
            if set == bit {
                return Ok(pos as i64);
            }
        }
        if !bit && !explicit_end && to_bit == value.len() * 8 - 1 {
            return Ok((value.len() * 8) as i64);
        }
        Ok(-1)
    }

    // ── shared helpers ───────────────────────────────────────────────

    /// Mutable string payload, inserting an empty string when absent.
    fn string_or_insert_mut(
        &mut self,
        key: &[u8],
        now_ms: u64,
    ) -> Result<&mut Vec<u8>, StoreError> {
        self.drop_if_expired(key, now_ms);
        if !self.entries.contains_key(key) {
            self.entries.insert(
                key.to_vec(),
                Entry {
                    value: Value::String(Vec::new()),
                    expires_at_ms: None,
                },
            );
        }
        match &mut self.entries.get_mut(key).expect("just inserted").value {
            Value::String(v) => Ok(v),
            _ => Err(StoreError::WrongType),
        }
    }
}

impl Entry {
    pub(crate) fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}

// ── parsing & formatting helpers ─────────────────────────────────────

pub(crate) fn parse_i64(bytes: &[u8]) -> Result<i64, StoreError> {
    let text = std::str::from_utf8(bytes).map_err(|_| StoreError::ValueNotInteger)?;
    text.parse::<i64>().map_err(|_| StoreError::ValueNotInteger)
}

pub(crate) fn parse_f64(bytes: &[u8]) -> Result<f64, StoreError> {
    let text = std::str::from_utf8(bytes).map_err(|_| StoreError::ValueNotFloat)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(StoreError::ValueNotFloat);
    }
    match text {
        "inf" | "+inf" | "infinity" | "+infinity" => Ok(f64::INFINITY),
        "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
        _ => text.parse::<f64>().map_err(|_| StoreError::ValueNotFloat),
    }
}

/// Shortest round-trip rendering for stored floats (INCRBYFLOAT and hash
/// counterparts).
pub(crate) fn format_float(value: f64) -> String {
    format!("{value}")
}

/// Convert a possibly negative index to a clamped usize offset.
pub(crate) fn normalize_index(index: i64, len: i64) -> usize {
    if index < 0 {
        let adjusted = len.saturating_add(index);
        if adjusted < 0 { 0 } else { adjusted as usize }
    } else {
        index as usize
    }
}

// ── glob matching ────────────────────────────────────────────────────

/// Reference-style glob: `*`, `?`, `[set]` (with `^` negation and ranges),
/// and `\` escapes. Bytes, not chars.
#[must_use]
pub fn glob_match(pattern: &[u8], string: &[u8]) -> bool {
    let mut pi = 0;
    let mut si = 0;
    let mut star_pi = usize::MAX;
    let mut star_si = usize::MAX;

    while si < string.len() {
        if pi < pattern.len() && pattern[pi] == b'\\' && pi + 1 < pattern.len() {
            if string[si] == pattern[pi + 1] {
                pi += 2;
                si += 1;
                continue;
            }
        } else if pi < pattern.len() && pattern[pi] == b'*' {
            star_pi = pi;
            star_si = si;
            pi += 1;
            continue;
        } else if pi < pattern.len() && pattern[pi] == b'?' {
            pi += 1;
            si += 1;
            continue;
        } else if pi < pattern.len() && pattern[pi] == b'[' {
            if let Some((matched, end)) = match_char_class(pattern, pi, string[si])
                && matched
            {
                pi = end;
                si += 1;
                continue;
            }
        } else if pi < pattern.len() && pattern[pi] == string[si] {
            pi += 1;
            si += 1;
            continue;
        }

        if star_pi != usize::MAX {
            pi = star_pi + 1;
            star_si += 1;
            si = star_si;
            continue;
        }
        return false;
    }

    while pi < pattern.len() && pattern[pi] == b'*' {
        pi += 1;
    }
    pi == pattern.len()
}

/// Match a `[...]` class at `pattern[pi]`; returns (matched, index past `]`).
fn match_char_class(pattern: &[u8], pi: usize, ch: u8) -> Option<(bool, usize)> {
    let mut i = pi + 1;
    let negate = i < pattern.len() && pattern[i] == b'^';
    if negate {
        i += 1;
    }
    let mut matched = false;
    loop {
        if i >= pattern.len() {
            break;
        }
        if pattern[i] == b']' {
            i += 1;
            break;
        }
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            if pattern[i + 1] == ch {
                matched = true;
            }
            i += 2;
            continue;
        }
        if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            if ch >= lo && ch <= hi {
                matched = true;
            }
            i += 3;
            continue;
        }
        if pattern[i] == ch {
            matched = true;
        }
        i += 1;
    }
    Some((matched != negate, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_set_then_get() {
        let mut db = Db::new();
        db.string_set(b"foo", b"bar".to_vec(), SetExpiry::Discard, 0);
        assert_eq!(db.string_get(b"foo", 0).expect("ok"), Some(b"bar".to_vec()));
        assert_eq!(db.string_get(b"missing", 0).expect("ok"), None);
    }

    #[test]
    fn set_with_deadline_expires_lazily() {
        let mut db = Db::new();
        db.string_set(b"foo", b"bar".to_vec(), SetExpiry::At(100), 0);
        assert_eq!(db.string_get(b"foo", 99).expect("ok"), Some(b"bar".to_vec()));
        assert_eq!(db.string_get(b"foo", 100).expect("ok"), None);
        let events = db.take_events();
        assert!(events.iter().any(|ev| ev.event == "expired" && ev.key == b"foo"));
    }

    #[test]
    fn expired_key_bumps_version_once() {
        let mut db = Db::new();
        db.string_set(b"k", b"v".to_vec(), SetExpiry::At(50), 0);
        let before = db.version(b"k");
        assert!(!db.exists(b"k", 60));
        assert_eq!(db.version(b"k"), before + 1);
        assert!(!db.exists(b"k", 61));
        assert_eq!(db.version(b"k"), before + 1);
    }

    #[test]
    fn keepttl_preserves_deadline() {
        let mut db = Db::new();
        db.string_set(b"k", b"a".to_vec(), SetExpiry::At(500), 0);
        db.string_set(b"k", b"b".to_vec(), SetExpiry::Keep, 0);
        assert_eq!(db.pttl(b"k", 100), PttlValue::Remaining(400));
        db.string_set(b"k", b"c".to_vec(), SetExpiry::Discard, 0);
        assert_eq!(db.pttl(b"k", 100), PttlValue::NoExpiry);
    }

    #[test]
    fn incr_by_parses_and_overflows() {
        let mut db = Db::new();
        assert_eq!(db.incr_by(b"n", 1, 0).expect("ok"), 1);
        assert_eq!(db.incr_by(b"n", 41, 0).expect("ok"), 42);
        db.string_set(b"s", b"notanumber".to_vec(), SetExpiry::Discard, 0);
        assert_eq!(db.incr_by(b"s", 1, 0), Err(StoreError::ValueNotInteger));
        db.string_set(b"big", i64::MAX.to_string().into_bytes(), SetExpiry::Discard, 0);
        assert_eq!(db.incr_by(b"big", 1, 0), Err(StoreError::IntegerOverflow));
    }

    #[test]
    fn incr_by_float_rejects_non_finite() {
        let mut db = Db::new();
        assert_eq!(db.incr_by_float(b"f", 10.5, 0).expect("ok"), 10.5);
        assert_eq!(
            db.string_get(b"f", 0).expect("ok"),
            Some(b"10.5".to_vec()),
        );
        db.string_set(b"f", b"1e308".to_vec(), SetExpiry::Discard, 0);
        assert_eq!(
            db.incr_by_float(b"f", 1e308, 0),
            Err(StoreError::NonFiniteFloat),
        );
    }

    #[test]
    fn setrange_zero_pads_the_gap() {
        let mut db = Db::new();
        assert_eq!(db.setrange(b"k", 5, b"hello", 0).expect("ok"), 10);
        assert_eq!(
            db.string_get(b"k", 0).expect("ok"),
            Some(b"\x00\x00\x00\x00\x00hello".to_vec()),
        );
    }

    #[test]
    fn getrange_inclusive_with_negative_indices() {
        let mut db = Db::new();
        db.string_set(b"k", b"This is a string".to_vec(), SetExpiry::Discard, 0);
        assert_eq!(db.getrange(b"k", 0, 3, 0).expect("ok"), b"This".to_vec());
        assert_eq!(db.getrange(b"k", -3, -1, 0).expect("ok"), b"ing".to_vec());
        assert_eq!(db.getrange(b"k", 0, -1, 0).expect("ok"), b"This is a string".to_vec());
        assert_eq!(db.getrange(b"k", 10, 100, 0).expect("ok"), b"string".to_vec());
        assert_eq!(db.getrange(b"k", 5, 3, 0).expect("ok"), Vec::<u8>::new());
    }

    #[test]
    fn expire_at_conditions() {
        let mut db = Db::new();
        db.string_set(b"k", b"v".to_vec(), SetExpiry::Discard, 0);
        let nx = ExpireOpts { nx: true, ..Default::default() };
        let xx = ExpireOpts { xx: true, ..Default::default() };
        let gt = ExpireOpts { gt: true, ..Default::default() };
        let lt = ExpireOpts { lt: true, ..Default::default() };

        assert!(!db.expire_at(b"k", 1_000, xx, 0));
        assert!(db.expire_at(b"k", 1_000, nx, 0));
        assert!(!db.expire_at(b"k", 2_000, nx, 0));
        assert!(db.expire_at(b"k", 2_000, gt, 0));
        assert!(!db.expire_at(b"k", 1_500, gt, 0));
        assert!(db.expire_at(b"k", 1_500, lt, 0));
        assert!(!db.expire_at(b"k", 1_800, lt, 0));
        assert_eq!(db.pttl(b"k", 0), PttlValue::Remaining(1_500));
    }

    #[test]
    fn expire_in_the_past_deletes() {
        let mut db = Db::new();
        db.string_set(b"k", b"v".to_vec(), SetExpiry::Discard, 100);
        assert!(db.expire_at(b"k", 100, ExpireOpts::default(), 100));
        assert!(!db.exists(b"k", 100));
    }

    #[test]
    fn active_expire_sweeps_due_keys_in_deadline_order() {
        let mut db = Db::new();
        db.string_set(b"a", b"1".to_vec(), SetExpiry::At(10), 0);
        db.string_set(b"b", b"2".to_vec(), SetExpiry::At(20), 0);
        db.string_set(b"c", b"3".to_vec(), SetExpiry::At(999), 0);
        let stats = db.active_expire(25, 16);
        assert_eq!(stats.expired, 2);
        assert!(db.exists(b"c", 25));
        let expired: Vec<_> = db
            .take_events()
            .into_iter()
            .filter(|ev| ev.event == "expired")
            .map(|ev| ev.key)
            .collect();
        assert_eq!(expired, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn rename_moves_value_and_expiry() {
        let mut db = Db::new();
        db.string_set(b"old", b"v".to_vec(), SetExpiry::At(500), 0);
        db.rename(b"old", b"new", 0).expect("ok");
        assert!(!db.exists(b"old", 0));
        assert_eq!(db.pttl(b"new", 0), PttlValue::Remaining(500));
        assert_eq!(db.rename(b"ghost", b"x", 0), Err(StoreError::KeyNotFound));
    }

    #[test]
    fn renamenx_refuses_existing_target() {
        let mut db = Db::new();
        db.string_set(b"a", b"1".to_vec(), SetExpiry::Discard, 0);
        db.string_set(b"b", b"2".to_vec(), SetExpiry::Discard, 0);
        assert!(!db.renamenx(b"a", b"b", 0).expect("ok"));
        assert!(db.renamenx(b"a", b"c", 0).expect("ok"));
    }

    #[test]
    fn del_reports_only_removed_keys() {
        let mut db = Db::new();
        db.string_set(b"a", b"1".to_vec(), SetExpiry::Discard, 0);
        db.string_set(b"b", b"2".to_vec(), SetExpiry::At(5), 0);
        let removed = db.del(&[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()], 10);
        assert_eq!(removed, 1);
    }

    #[test]
    fn scan_pages_through_all_keys() {
        let mut db = Db::new();
        for i in 0..25 {
            db.string_set(format!("key:{i:02}").as_bytes(), b"v".to_vec(), SetExpiry::Discard, 0);
        }
        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let (next, keys) = db.scan(cursor, None, 10, None, 0);
            seen.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 25);
    }

    #[test]
    fn scan_filters_by_pattern_and_type() {
        let mut db = Db::new();
        db.string_set(b"s1", b"v".to_vec(), SetExpiry::Discard, 0);
        db.list_push(b"l1", &[b"v".to_vec()], true, true, 0).expect("ok");
        let (_, keys) = db.scan(0, Some(b"l*"), 100, None, 0);
        assert_eq!(keys, vec![b"l1".to_vec()]);
        let (_, keys) = db.scan(0, None, 100, Some(ValueType::String), 0);
        assert_eq!(keys, vec![b"s1".to_vec()]);
    }

    #[test]
    fn bitcount_byte_and_bit_ranges() {
        let mut db = Db::new();
        db.string_set(b"k", b"foobar".to_vec(), SetExpiry::Discard, 0);
        assert_eq!(db.bitcount(b"k", None, 0).expect("ok"), 26);
        assert_eq!(db.bitcount(b"k", Some((0, 0, BitUnit::Byte)), 0).expect("ok"), 4);
        assert_eq!(db.bitcount(b"k", Some((1, 1, BitUnit::Byte)), 0).expect("ok"), 6);
        assert_eq!(db.bitcount(b"k", Some((5, 30, BitUnit::Bit)), 0).expect("ok"), 17);
    }

    #[test]
    fn setbit_getbit_roundtrip() {
        let mut db = Db::new();
        assert!(!db.setbit(b"k", 7, true, 0).expect("ok"));
        assert!(db.getbit(b"k", 7, 0).expect("ok"));
        assert!(!db.getbit(b"k", 6, 0).expect("ok"));
        assert!(!db.getbit(b"k", 100, 0).expect("ok"));
        assert_eq!(db.string_get(b"k", 0).expect("ok"), Some(vec![1u8]));
    }

    #[test]
    fn bitpos_all_ones_quirk() {
        let mut db = Db::new();
        db.string_set(b"k", vec![0xff, 0xff], SetExpiry::Discard, 0);
        assert_eq!(
            db.bitpos(b"k", false, None, None, BitUnit::Byte, 0).expect("ok"),
            16,
        );
        assert_eq!(
            db.bitpos(b"k", false, Some(0), Some(-1), BitUnit::Byte, 0).expect("ok"),
            -1,
        );
        db.string_set(b"k2", vec![0x00, 0x0f], SetExpiry::Discard, 0);
        assert_eq!(
            db.bitpos(b"k2", true, None, None, BitUnit::Byte, 0).expect("ok"),
            12,
        );
    }

    #[test]
    fn wrong_type_is_reported() {
        let mut db = Db::new();
        db.list_push(b"l", &[b"x".to_vec()], true, true, 0).expect("ok");
        assert_eq!(db.string_get(b"l", 0), Err(StoreError::WrongType));
        assert_eq!(db.incr_by(b"l", 1, 0), Err(StoreError::WrongType));
        assert_eq!(db.append(b"l", b"x", 0), Err(StoreError::WrongType));
    }

    #[test]
    fn glob_match_patterns() {
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(glob_match(b"h?llo", b"hallo"));
        assert!(!glob_match(b"h?llo", b"hllo"));
        assert!(glob_match(b"h[ae]llo", b"hello"));
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[ae]llo", b"hillo"));
        assert!(glob_match(b"h[^e]llo", b"hallo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"h[a-e]llo", b"hcllo"));
        assert!(!glob_match(b"h[a-e]llo", b"hzllo"));
        assert!(glob_match(b"key:*", b"key:1"));
        assert!(glob_match(b"\\*", b"*"));
        assert!(!glob_match(b"\\*", b"x"));
        assert!(glob_match(b"", b""));
        assert!(!glob_match(b"", b"x"));
    }

    #[test]
    fn install_entry_honors_busykey() {
        let mut db = Db::new();
        db.string_set(b"k", b"v".to_vec(), SetExpiry::Discard, 0);
        assert_eq!(
            db.install_entry(b"k", Value::String(b"w".to_vec()), None, false, 0),
            Err(StoreError::BusyKey),
        );
        db.install_entry(b"k", Value::String(b"w".to_vec()), Some(900), true, 0)
            .expect("ok");
        assert_eq!(db.string_get(b"k", 0).expect("ok"), Some(b"w".to_vec()));
        assert_eq!(db.pttl(b"k", 100), PttlValue::Remaining(800));
    }

    #[test]
    fn version_survives_delete_and_recreate() {
        let mut db = Db::new();
        db.string_set(b"k", b"v".to_vec(), SetExpiry::Discard, 0);
        let v1 = db.version(b"k");
        db.del(&[b"k".to_vec()], 0);
        let v2 = db.version(b"k");
        assert!(v2 > v1);
        db.string_set(b"k", b"v".to_vec(), SetExpiry::Discard, 0);
        assert!(db.version(b"k") > v2);
    }
}
