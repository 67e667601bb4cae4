#![forbid(unsafe_code)]

//! DUMP/RESTORE payload codec. The format is self-described and versioned
//! but deliberately private to this implementation: a tag byte per value
//! kind, length-prefixed fields, and a footer carrying the format version
//! and an FNV-1a checksum. Interoperability with the reference server's
//! RDB payload is a non-goal; decoding rejects unknown tags, short input,
//! and checksum mismatches so RESTORE never executes anything from
//! untrusted bytes.

use std::collections::{HashMap, HashSet};

use rd_store::{
    ConsumerGroup, HashFields, PendingEntry, Stream, StreamEntry, StreamId, Value,
};
use thiserror::Error;

/// Bumped whenever the payload layout changes.
const PAYLOAD_VERSION: u16 = 1;

const TAG_STRING: u8 = 0;
const TAG_LIST: u8 = 1;
const TAG_HASH: u8 = 2;
const TAG_SET: u8 = 3;
const TAG_ZSET: u8 = 4;
const TAG_STREAM: u8 = 5;
const TAG_HLL: u8 = 6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error("payload is truncated")]
    Truncated,
    #[error("unsupported payload version {0}")]
    BadVersion(u16),
    #[error("payload checksum mismatch")]
    ChecksumMismatch,
    #[error("unknown value tag {0}")]
    UnknownTag(u8),
    #[error("trailing bytes after value body")]
    TrailingBytes,
}

/// Serialize a value into a DUMP payload.
#[must_use]
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut body = Vec::new();
    match value {
        Value::String(bytes) => {
            body.push(TAG_STRING);
            put_bytes(&mut body, bytes);
        }
        Value::List(items) => {
            body.push(TAG_LIST);
            put_u64(&mut body, items.len() as u64);
            for item in items {
                put_bytes(&mut body, item);
            }
        }
        Value::Hash(hash) => {
            body.push(TAG_HASH);
            let mut fields: Vec<_> = hash.fields.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            put_u64(&mut body, fields.len() as u64);
            for (field, value) in fields {
                put_bytes(&mut body, field);
                put_bytes(&mut body, value);
            }
            let mut ttls: Vec<_> = hash.ttls.iter().collect();
            ttls.sort_by(|a, b| a.0.cmp(b.0));
            put_u64(&mut body, ttls.len() as u64);
            for (field, at) in ttls {
                put_bytes(&mut body, field);
                put_u64(&mut body, *at);
            }
        }
        Value::Set(members) => {
            body.push(TAG_SET);
            put_members(&mut body, members);
        }
        Value::SortedSet(zs) => {
            body.push(TAG_ZSET);
            let mut pairs: Vec<_> = zs.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));
            put_u64(&mut body, pairs.len() as u64);
            for (member, score) in pairs {
                put_bytes(&mut body, member);
                put_u64(&mut body, score.to_bits());
            }
        }
        Value::Stream(stream) => {
            body.push(TAG_STREAM);
            encode_stream(&mut body, stream);
        }
        Value::Hll(members) => {
            body.push(TAG_HLL);
            put_members(&mut body, members);
        }
    }
    let checksum = fnv1a(&body);
    body.extend_from_slice(&PAYLOAD_VERSION.to_le_bytes());
    body.extend_from_slice(&checksum.to_le_bytes());
    body
}

/// Decode a DUMP payload produced by [`encode_value`].
pub fn decode_value(payload: &[u8]) -> Result<Value, PersistError> {
    if payload.len() < 11 {
        return Err(PersistError::Truncated);
    }
    let (body, footer) = payload.split_at(payload.len() - 10);
    let version = u16::from_le_bytes([footer[0], footer[1]]);
    if version != PAYLOAD_VERSION {
        return Err(PersistError::BadVersion(version));
    }
    let expected = u64::from_le_bytes(footer[2..10].try_into().expect("8 bytes"));
    if fnv1a(body) != expected {
        return Err(PersistError::ChecksumMismatch);
    }

    let mut reader = Reader { buf: body, pos: 1 };
    let value = match body[0] {
        TAG_STRING => Value::String(reader.bytes()?),
        TAG_LIST => {
            let len = reader.u64()?;
            let mut items = std::collections::VecDeque::new();
            for _ in 0..len {
                items.push_back(reader.bytes()?);
            }
            Value::List(items)
        }
        TAG_HASH => {
            let mut hash = HashFields::default();
            let fields = reader.u64()?;
            for _ in 0..fields {
                let field = reader.bytes()?;
                let value = reader.bytes()?;
                hash.fields.insert(field, value);
            }
            let ttls = reader.u64()?;
            for _ in 0..ttls {
                let field = reader.bytes()?;
                let at = reader.u64()?;
                hash.ttls.insert(field, at);
            }
            Value::Hash(hash)
        }
        TAG_SET => Value::Set(reader.members()?),
        TAG_ZSET => {
            let len = reader.u64()?;
            let mut zs = HashMap::new();
            for _ in 0..len {
                let member = reader.bytes()?;
                let score = f64::from_bits(reader.u64()?);
                zs.insert(member, score);
            }
            Value::SortedSet(zs)
        }
        TAG_STREAM => Value::Stream(decode_stream(&mut reader)?),
        TAG_HLL => Value::Hll(reader.members()?),
        tag => return Err(PersistError::UnknownTag(tag)),
    };
    if reader.pos != body.len() {
        return Err(PersistError::TrailingBytes);
    }
    Ok(value)
}

fn encode_stream(out: &mut Vec<u8>, stream: &Stream) {
    put_u64(out, stream.entries.len() as u64);
    for entry in &stream.entries {
        put_id(out, entry.id);
        put_u64(out, entry.fields.len() as u64);
        for (field, value) in &entry.fields {
            put_bytes(out, field);
            put_bytes(out, value);
        }
    }
    put_id(out, stream.last_id);
    put_id(out, stream.max_deleted_id);
    put_u64(out, stream.entries_added);
    put_u64(out, stream.groups.len() as u64);
    for (name, group) in &stream.groups {
        put_bytes(out, name);
        put_id(out, group.last_delivered);
        put_u64(out, group.consumers.len() as u64);
        for (consumer, seen) in &group.consumers {
            put_bytes(out, consumer);
            put_u64(out, *seen);
        }
        put_u64(out, group.pending.len() as u64);
        for (id, pel) in &group.pending {
            put_id(out, *id);
            put_bytes(out, &pel.consumer);
            put_u64(out, pel.delivery_time_ms);
            put_u64(out, pel.delivery_count);
        }
    }
}

fn decode_stream(reader: &mut Reader<'_>) -> Result<Stream, PersistError> {
    let mut stream = Stream::default();
    let entries = reader.u64()?;
    for _ in 0..entries {
        let id = reader.id()?;
        let nfields = reader.u64()?;
        let mut fields = Vec::with_capacity(nfields as usize);
        for _ in 0..nfields {
            let field = reader.bytes()?;
            let value = reader.bytes()?;
            fields.push((field, value));
        }
        stream.entries.push(StreamEntry { id, fields });
    }
    stream.last_id = reader.id()?;
    stream.max_deleted_id = reader.id()?;
    stream.entries_added = reader.u64()?;
    let groups = reader.u64()?;
    for _ in 0..groups {
        let name = reader.bytes()?;
        let mut group = ConsumerGroup {
            last_delivered: reader.id()?,
            ..Default::default()
        };
        let consumers = reader.u64()?;
        for _ in 0..consumers {
            let consumer = reader.bytes()?;
            let seen = reader.u64()?;
            group.consumers.insert(consumer, seen);
        }
        let pending = reader.u64()?;
        for _ in 0..pending {
            let id = reader.id()?;
            let consumer = reader.bytes()?;
            let delivery_time_ms = reader.u64()?;
            let delivery_count = reader.u64()?;
            group.pending.insert(
                id,
                PendingEntry {
                    consumer,
                    delivery_time_ms,
                    delivery_count,
                },
            );
        }
        stream.groups.insert(name, group);
    }
    Ok(stream)
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u64(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn put_id(out: &mut Vec<u8>, id: StreamId) {
    put_u64(out, id.ms);
    put_u64(out, id.seq);
}

fn put_members(out: &mut Vec<u8>, members: &HashSet<Vec<u8>>) {
    let mut sorted: Vec<_> = members.iter().collect();
    sorted.sort();
    put_u64(out, sorted.len() as u64);
    for member in sorted {
        put_bytes(out, member);
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn u64(&mut self) -> Result<u64, PersistError> {
        if self.pos + 8 > self.buf.len() {
            return Err(PersistError::Truncated);
        }
        let raw: [u8; 8] = self.buf[self.pos..self.pos + 8]
            .try_into()
            .expect("8 bytes");
        self.pos += 8;
        Ok(u64::from_le_bytes(raw))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, PersistError> {
        let len = usize::try_from(self.u64()?).map_err(|_| PersistError::Truncated)?;
        if self.pos + len > self.buf.len() {
            return Err(PersistError::Truncated);
        }
        let out = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }

    fn id(&mut self) -> Result<StreamId, PersistError> {
        Ok(StreamId::new(self.u64()?, self.u64()?))
    }

    fn members(&mut self) -> Result<HashSet<Vec<u8>>, PersistError> {
        let len = self.u64()?;
        let mut members = HashSet::new();
        for _ in 0..len {
            members.insert(self.bytes()?);
        }
        Ok(members)
    }
}
