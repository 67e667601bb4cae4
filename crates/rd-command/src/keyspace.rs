//! Generic key-space command handlers: existence, expiry, renaming, scans,
//! DUMP/RESTORE, SORT and OBJECT introspection.

use rd_protocol::RespFrame;
use rd_store::{Db, ExpireOpts, PttlValue, StoreError, Value};

use crate::{
    CommandError, TtlBase, TtlUnit, frames_from_bulks, parse_cursor, parse_i64_arg,
    parse_usize_arg, pttl_to_integer, resolve_deadline_ms,
};

pub(crate) fn del(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() < 2 {
        return Err(CommandError::WrongArity("DEL"));
    }
    Ok(RespFrame::Integer(db.del(&argv[1..], now_ms) as i64))
}

pub(crate) fn exists(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 2 {
        return Err(CommandError::WrongArity("EXISTS"));
    }
    let count = argv[1..]
        .iter()
        .filter(|key| db.exists(key, now_ms))
        .count();
    Ok(RespFrame::Integer(count as i64))
}

pub(crate) fn type_cmd(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("TYPE"));
    }
    let name = db
        .value_type(&argv[1], now_ms)
        .map_or("none", |kind| kind.as_str());
    Ok(RespFrame::SimpleString(name.to_string()))
}

pub(crate) fn touch(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 2 {
        return Err(CommandError::WrongArity("TOUCH"));
    }
    Ok(RespFrame::Integer(db.touch(&argv[1..], now_ms) as i64))
}

pub(crate) fn rename(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("RENAME"));
    }
    db.rename(&argv[1], &argv[2], now_ms)?;
    Ok(RespFrame::ok())
}

pub(crate) fn renamenx(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("RENAMENX"));
    }
    let renamed = db.renamenx(&argv[1], &argv[2], now_ms)?;
    Ok(RespFrame::Integer(i64::from(renamed)))
}

pub(crate) fn keys(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("KEYS"));
    }
    Ok(frames_from_bulks(db.keys_matching(&argv[1], now_ms)))
}

pub(crate) fn randomkey(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 1 {
        return Err(CommandError::WrongArity("RANDOMKEY"));
    }
    Ok(RespFrame::BulkString(db.random_key(now_ms)))
}

pub(crate) fn dbsize(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 1 {
        return Err(CommandError::WrongArity("DBSIZE"));
    }
    Ok(RespFrame::Integer(db.dbsize(now_ms) as i64))
}

pub(crate) fn flushdb(argv: &[Vec<u8>], db: &mut Db) -> Result<RespFrame, CommandError> {
    // ASYNC/SYNC are accepted; the flush is always synchronous here.
    if argv.len() > 2 {
        return Err(CommandError::WrongArity("FLUSHDB"));
    }
    if argv.len() == 2
        && !argv[1].eq_ignore_ascii_case(b"ASYNC")
        && !argv[1].eq_ignore_ascii_case(b"SYNC")
    {
        return Err(CommandError::SyntaxError);
    }
    db.flush();
    Ok(RespFrame::ok())
}

// ── expiry family ────────────────────────────────────────────────────

fn parse_expire_opts(args: &[Vec<u8>]) -> Result<ExpireOpts, CommandError> {
    let mut opts = ExpireOpts::default();
    for arg in args {
        if arg.eq_ignore_ascii_case(b"NX") {
            opts.nx = true;
        } else if arg.eq_ignore_ascii_case(b"XX") {
            opts.xx = true;
        } else if arg.eq_ignore_ascii_case(b"GT") {
            opts.gt = true;
        } else if arg.eq_ignore_ascii_case(b"LT") {
            opts.lt = true;
        } else {
            return Err(CommandError::SyntaxError);
        }
    }
    if opts.gt && opts.lt {
        return Err(CommandError::Raw(
            "ERR GT and LT options at the same time are not compatible".to_string(),
        ));
    }
    if opts.nx && (opts.xx || opts.gt || opts.lt) {
        return Err(CommandError::Raw(
            "ERR NX and XX, GT or LT options at the same time are not compatible".to_string(),
        ));
    }
    Ok(opts)
}

fn expire_like(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    name: &'static str,
    unit: TtlUnit,
    base: TtlBase,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity(name));
    }
    let raw = parse_i64_arg(&argv[2])?;
    let opts = parse_expire_opts(&argv[3..])?;
    let at_ms = resolve_deadline_ms(raw, unit, base, now_ms);
    let applied = db.expire_at(&argv[1], at_ms, opts, now_ms);
    Ok(RespFrame::Integer(i64::from(applied)))
}

pub(crate) fn expire(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    expire_like(argv, db, now_ms, "EXPIRE", TtlUnit::Seconds, TtlBase::Relative)
}

pub(crate) fn pexpire(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    expire_like(argv, db, now_ms, "PEXPIRE", TtlUnit::Milliseconds, TtlBase::Relative)
}

pub(crate) fn expireat(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    expire_like(argv, db, now_ms, "EXPIREAT", TtlUnit::Seconds, TtlBase::Absolute)
}

pub(crate) fn pexpireat(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    expire_like(argv, db, now_ms, "PEXPIREAT", TtlUnit::Milliseconds, TtlBase::Absolute)
}

pub(crate) fn ttl(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("TTL"));
    }
    Ok(RespFrame::Integer(pttl_to_integer(
        db.pttl(&argv[1], now_ms),
        1000,
    )))
}

pub(crate) fn pttl(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("PTTL"));
    }
    Ok(RespFrame::Integer(pttl_to_integer(
        db.pttl(&argv[1], now_ms),
        1,
    )))
}

pub(crate) fn expiretime(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("EXPIRETIME"));
    }
    let value = match db.expire_time_ms(&argv[1], now_ms) {
        PttlValue::KeyMissing => -2,
        PttlValue::NoExpiry => -1,
        PttlValue::Remaining(at_ms) => at_ms / 1000,
    };
    Ok(RespFrame::Integer(value))
}

pub(crate) fn pexpiretime(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("PEXPIRETIME"));
    }
    let value = match db.expire_time_ms(&argv[1], now_ms) {
        PttlValue::KeyMissing => -2,
        PttlValue::NoExpiry => -1,
        PttlValue::Remaining(at_ms) => at_ms,
    };
    Ok(RespFrame::Integer(value))
}

pub(crate) fn persist(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("PERSIST"));
    }
    Ok(RespFrame::Integer(i64::from(db.persist(&argv[1], now_ms))))
}

// ── SCAN ─────────────────────────────────────────────────────────────

pub(crate) fn scan(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() < 2 {
        return Err(CommandError::WrongArity("SCAN"));
    }
    let cursor = parse_cursor(&argv[1])?;
    let mut pattern: Option<Vec<u8>> = None;
    let mut count = 10_usize;
    let mut type_filter = None;
    let mut i = 2;
    while i < argv.len() {
        if argv[i].eq_ignore_ascii_case(b"MATCH") && i + 1 < argv.len() {
            pattern = Some(argv[i + 1].clone());
            i += 2;
        } else if argv[i].eq_ignore_ascii_case(b"COUNT") && i + 1 < argv.len() {
            count = parse_usize_arg(&argv[i + 1])?;
            if count == 0 {
                return Err(CommandError::SyntaxError);
            }
            i += 2;
        } else if argv[i].eq_ignore_ascii_case(b"TYPE") && i + 1 < argv.len() {
            type_filter = Some(
                rd_store::ValueType::from_name(&argv[i + 1]).ok_or(CommandError::SyntaxError)?,
            );
            i += 2;
        } else {
            return Err(CommandError::SyntaxError);
        }
    }
    let (next_cursor, keys) = db.scan(cursor, pattern.as_deref(), count, type_filter, now_ms);
    Ok(RespFrame::Array(Some(vec![
        RespFrame::BulkString(Some(next_cursor.to_string().into_bytes())),
        frames_from_bulks(keys),
    ])))
}

// ── COPY / DUMP / RESTORE ────────────────────────────────────────────

/// Same-database COPY. The `DB` form is resolved by the runtime, which owns
/// the other databases.
pub(crate) fn copy(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("COPY"));
    }
    let mut replace = false;
    for arg in &argv[3..] {
        if arg.eq_ignore_ascii_case(b"REPLACE") {
            replace = true;
        } else {
            return Err(CommandError::SyntaxError);
        }
    }
    let Some((value, expires_at_ms)) = db.entry_snapshot(&argv[1], now_ms) else {
        return Ok(RespFrame::Integer(0));
    };
    match db.install_entry(&argv[2], value, expires_at_ms, replace, now_ms) {
        Ok(()) => {
            db.note('g', "copy_to", &argv[2]);
            Ok(RespFrame::Integer(1))
        }
        Err(StoreError::BusyKey) => Ok(RespFrame::Integer(0)),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn dump(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("DUMP"));
    }
    Ok(match db.entry_snapshot(&argv[1], now_ms) {
        Some((value, _)) => RespFrame::BulkString(Some(rd_persist::encode_value(&value))),
        None => RespFrame::BulkString(None),
    })
}

pub(crate) fn restore(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 4 {
        return Err(CommandError::WrongArity("RESTORE"));
    }
    let ttl = parse_i64_arg(&argv[2])?;
    if ttl < 0 {
        return Err(CommandError::Raw("ERR Invalid TTL value, must be >= 0".to_string()));
    }
    let mut replace = false;
    let mut absttl = false;
    let mut i = 4;
    while i < argv.len() {
        if argv[i].eq_ignore_ascii_case(b"REPLACE") {
            replace = true;
            i += 1;
        } else if argv[i].eq_ignore_ascii_case(b"ABSTTL") {
            absttl = true;
            i += 1;
        } else if (argv[i].eq_ignore_ascii_case(b"IDLETIME")
            || argv[i].eq_ignore_ascii_case(b"FREQ"))
            && i + 1 < argv.len()
        {
            parse_i64_arg(&argv[i + 1])?;
            i += 2;
        } else {
            return Err(CommandError::SyntaxError);
        }
    }

    let value =
        rd_persist::decode_value(&argv[3]).map_err(|_| CommandError::BadRestorePayload)?;
    let expires_at_ms = match (ttl, absttl) {
        (0, _) => None,
        (ttl, true) => Some(ttl as u64),
        (ttl, false) => Some(now_ms.saturating_add(ttl as u64)),
    };
    db.install_entry(&argv[1], value, expires_at_ms, replace, now_ms)?;
    db.note('g', "restore", &argv[1]);
    Ok(RespFrame::ok())
}

// ── OBJECT ───────────────────────────────────────────────────────────

pub(crate) fn object(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 2 {
        return Err(CommandError::WrongArity("OBJECT"));
    }
    let sub = &argv[1];
    if sub.eq_ignore_ascii_case(b"HELP") {
        return Ok(RespFrame::Array(Some(vec![
            RespFrame::bulk(*b"OBJECT <subcommand> [<arg> ...]"),
            RespFrame::bulk(*b"ENCODING <key> -- Return the kind of internal representation."),
            RespFrame::bulk(*b"REFCOUNT <key> -- Return the number of references."),
            RespFrame::bulk(*b"IDLETIME <key> -- Return the idle time of the key."),
            RespFrame::bulk(*b"FREQ <key> -- Return the access frequency index of the key."),
        ])));
    }
    if argv.len() != 3 {
        return Err(CommandError::Raw(format!(
            "ERR Unknown subcommand or wrong number of arguments for '{}'. Try OBJECT HELP.",
            String::from_utf8_lossy(sub),
        )));
    }
    let key = &argv[2];
    if sub.eq_ignore_ascii_case(b"ENCODING") {
        let Some((value, _)) = db.entry_snapshot(key, now_ms) else {
            return Err(CommandError::NoSuchKey);
        };
        Ok(RespFrame::BulkString(Some(
            synthesized_encoding(&value).as_bytes().to_vec(),
        )))
    } else if sub.eq_ignore_ascii_case(b"REFCOUNT") {
        if !db.exists(key, now_ms) {
            return Err(CommandError::NoSuchKey);
        }
        Ok(RespFrame::Integer(1))
    } else if sub.eq_ignore_ascii_case(b"IDLETIME") || sub.eq_ignore_ascii_case(b"FREQ") {
        if !db.exists(key, now_ms) {
            return Err(CommandError::NoSuchKey);
        }
        Ok(RespFrame::Integer(0))
    } else {
        Err(CommandError::Raw(format!(
            "ERR Unknown subcommand or wrong number of arguments for '{}'. Try OBJECT HELP.",
            String::from_utf8_lossy(sub),
        )))
    }
}

/// Encoding hints by the reference thresholds. The emulator does not use
/// compact encodings internally; this is a report, not a representation.
fn synthesized_encoding(value: &Value) -> &'static str {
    match value {
        Value::String(bytes) => {
            if std::str::from_utf8(bytes).is_ok_and(|text| text.parse::<i64>().is_ok()) {
                "int"
            } else if bytes.len() <= 44 {
                "embstr"
            } else {
                "raw"
            }
        }
        Value::Hll(_) => "raw",
        Value::List(items) => {
            if items.len() <= 128 && items.iter().all(|item| item.len() <= 64) {
                "listpack"
            } else {
                "quicklist"
            }
        }
        Value::Set(members) => {
            if members
                .iter()
                .all(|m| std::str::from_utf8(m).is_ok_and(|t| t.parse::<i64>().is_ok()))
                && members.len() <= 512
            {
                "intset"
            } else if members.len() <= 128 && members.iter().all(|m| m.len() <= 64) {
                "listpack"
            } else {
                "hashtable"
            }
        }
        Value::Hash(hash) => {
            if hash.fields.len() <= 128
                && hash
                    .fields
                    .iter()
                    .all(|(f, v)| f.len() <= 64 && v.len() <= 64)
            {
                "listpack"
            } else {
                "hashtable"
            }
        }
        Value::SortedSet(zs) => {
            if zs.len() <= 128 && zs.keys().all(|m| m.len() <= 64) {
                "listpack"
            } else {
                "skiplist"
            }
        }
        Value::Stream(_) => "stream",
    }
}

// ── SORT ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum SortGet {
    Element,
    Pattern(Vec<u8>),
}

pub(crate) fn sort(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() < 2 {
        return Err(CommandError::WrongArity("SORT"));
    }
    let key = &argv[1];
    let mut by: Option<Vec<u8>> = None;
    let mut limit: Option<(usize, i64)> = None;
    let mut gets: Vec<SortGet> = Vec::new();
    let mut desc = false;
    let mut alpha = false;
    let mut store: Option<Vec<u8>> = None;

    let mut i = 2;
    while i < argv.len() {
        if argv[i].eq_ignore_ascii_case(b"BY") && i + 1 < argv.len() {
            by = Some(argv[i + 1].clone());
            i += 2;
        } else if argv[i].eq_ignore_ascii_case(b"LIMIT") && i + 2 < argv.len() {
            let offset = parse_usize_arg(&argv[i + 1])?;
            let count = parse_i64_arg(&argv[i + 2])?;
            limit = Some((offset, count));
            i += 3;
        } else if argv[i].eq_ignore_ascii_case(b"GET") && i + 1 < argv.len() {
            if argv[i + 1] == b"#" {
                gets.push(SortGet::Element);
            } else {
                gets.push(SortGet::Pattern(argv[i + 1].clone()));
            }
            i += 2;
        } else if argv[i].eq_ignore_ascii_case(b"ASC") {
            desc = false;
            i += 1;
        } else if argv[i].eq_ignore_ascii_case(b"DESC") {
            desc = true;
            i += 1;
        } else if argv[i].eq_ignore_ascii_case(b"ALPHA") {
            alpha = true;
            i += 1;
        } else if argv[i].eq_ignore_ascii_case(b"STORE") && i + 1 < argv.len() {
            store = Some(argv[i + 1].clone());
            i += 2;
        } else {
            return Err(CommandError::SyntaxError);
        }
    }

    let mut elements: Vec<Vec<u8>> = match db.value_type(key, now_ms) {
        None => Vec::new(),
        Some(rd_store::ValueType::List) => db.lrange(key, 0, -1, now_ms)?,
        Some(rd_store::ValueType::Set) => db.smembers(key, now_ms)?,
        Some(rd_store::ValueType::ZSet) => db
            .zsorted(key, now_ms)?
            .into_iter()
            .map(|(_, member)| member)
            .collect(),
        Some(_) => return Err(StoreError::WrongType.into()),
    };

    // BY with a pattern that has no '*' disables sorting entirely.
    let nosort = by.as_deref().is_some_and(|pattern| !pattern.contains(&b'*'));
    if !nosort {
        if let Some(pattern) = &by {
            let mut keyed: Vec<(Option<Vec<u8>>, Vec<u8>)> = Vec::with_capacity(elements.len());
            for element in elements {
                let weight = lookup_pattern(db, pattern, &element, now_ms)?;
                keyed.push((weight, element));
            }
            sort_keyed(&mut keyed, alpha, desc)?;
            elements = keyed.into_iter().map(|(_, element)| element).collect();
        } else if alpha {
            elements.sort();
            if desc {
                elements.reverse();
            }
        } else {
            let mut keyed: Vec<(f64, Vec<u8>)> = Vec::with_capacity(elements.len());
            for element in elements {
                let weight = parse_sort_double(&element)?;
                keyed.push((weight, element));
            }
            keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            if desc {
                keyed.reverse();
            }
            elements = keyed.into_iter().map(|(_, element)| element).collect();
        }
    }

    if let Some((offset, count)) = limit {
        let end = if count < 0 {
            elements.len()
        } else {
            offset.saturating_add(count as usize).min(elements.len())
        };
        let offset = offset.min(elements.len());
        elements = elements[offset..end.max(offset)].to_vec();
    }

    let mut output: Vec<RespFrame> = Vec::new();
    let mut stored: Vec<Vec<u8>> = Vec::new();
    if gets.is_empty() {
        stored = elements.clone();
        output = elements
            .into_iter()
            .map(|element| RespFrame::BulkString(Some(element)))
            .collect();
    } else {
        for element in &elements {
            for get in &gets {
                let value = match get {
                    SortGet::Element => Some(element.clone()),
                    SortGet::Pattern(pattern) => {
                        lookup_pattern(db, pattern, element, now_ms)?
                    }
                };
                if store.is_some() {
                    stored.push(value.clone().unwrap_or_default());
                }
                output.push(RespFrame::BulkString(value));
            }
        }
    }

    if let Some(dest) = store {
        let count = stored.len();
        db.del(&[dest.clone()], now_ms);
        if count > 0 {
            db.list_push(&dest, &stored, false, true, now_ms)?;
            db.note('l', "sortstore", &dest);
        }
        return Ok(RespFrame::Integer(count as i64));
    }
    Ok(RespFrame::Array(Some(output)))
}

fn parse_sort_double(element: &[u8]) -> Result<f64, CommandError> {
    std::str::from_utf8(element)
        .ok()
        .and_then(|text| text.trim().parse::<f64>().ok())
        .filter(|value| !value.is_nan())
        .ok_or_else(|| {
            CommandError::Raw("ERR One or more scores can't be converted into double".to_string())
        })
}

fn sort_keyed(
    keyed: &mut [(Option<Vec<u8>>, Vec<u8>)],
    alpha: bool,
    desc: bool,
) -> Result<(), CommandError> {
    if alpha {
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    } else {
        let mut parsed: Vec<f64> = Vec::with_capacity(keyed.len());
        for (weight, _) in keyed.iter() {
            let value = match weight {
                None => 0.0,
                Some(raw) => parse_sort_double(raw)?,
            };
            parsed.push(value);
        }
        let mut order: Vec<usize> = (0..keyed.len()).collect();
        order.sort_by(|&a, &b| {
            parsed[a]
                .total_cmp(&parsed[b])
                .then_with(|| keyed[a].1.cmp(&keyed[b].1))
        });
        let reordered: Vec<(Option<Vec<u8>>, Vec<u8>)> =
            order.into_iter().map(|i| keyed[i].clone()).collect();
        keyed.clone_from_slice(&reordered);
    }
    if desc {
        keyed.reverse();
    }
    Ok(())
}

/// Resolve a BY/GET pattern: `*` replaced by the element, an optional
/// `->field` suffix reads a hash field.
fn lookup_pattern(
    db: &mut Db,
    pattern: &[u8],
    element: &[u8],
    now_ms: u64,
) -> Result<Option<Vec<u8>>, CommandError> {
    let (key_pattern, field) = match pattern.windows(2).position(|w| w == b"->") {
        Some(at) => (&pattern[..at], Some(&pattern[at + 2..])),
        None => (pattern, None),
    };
    let mut key = Vec::with_capacity(key_pattern.len() + element.len());
    let mut replaced = false;
    for &byte in key_pattern {
        if byte == b'*' && !replaced {
            key.extend_from_slice(element);
            replaced = true;
        } else {
            key.push(byte);
        }
    }
    let looked_up = match field {
        None => db.string_get(&key, now_ms).unwrap_or(None),
        Some(field_pattern) => {
            let mut field_name = Vec::with_capacity(field_pattern.len());
            for &byte in field_pattern {
                if byte == b'*' {
                    field_name.extend_from_slice(element);
                } else {
                    field_name.push(byte);
                }
            }
            db.hget(&key, &field_name, now_ms).unwrap_or(None)
        }
    };
    Ok(looked_up)
}
