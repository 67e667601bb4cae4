//! Hash command handlers, including the per-field expiry family.

use rand::Rng;
use rand::seq::SliceRandom;
use rd_config::{Config, ServerVersion};
use rd_protocol::RespFrame;
use rd_store::Db;

use crate::{
    CommandError, TtlBase, TtlUnit, frames_from_bulks, parse_cursor, parse_f64_arg,
    parse_i64_arg, parse_scan_args, resolve_deadline_ms,
};

pub(crate) fn hset(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() < 4 || argv.len() % 2 != 0 {
        return Err(CommandError::WrongArity("HSET"));
    }
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = argv[2..]
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    let added = db.hset(&argv[1], &pairs, now_ms)?;
    Ok(RespFrame::Integer(added as i64))
}

pub(crate) fn hmset(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 4 || argv.len() % 2 != 0 {
        return Err(CommandError::WrongArity("HMSET"));
    }
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = argv[2..]
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    db.hset(&argv[1], &pairs, now_ms)?;
    Ok(RespFrame::ok())
}

pub(crate) fn hsetnx(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("HSETNX"));
    }
    let set = db.hsetnx(&argv[1], &argv[2], argv[3].clone(), now_ms)?;
    Ok(RespFrame::Integer(i64::from(set)))
}

pub(crate) fn hget(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("HGET"));
    }
    Ok(RespFrame::BulkString(db.hget(&argv[1], &argv[2], now_ms)?))
}

pub(crate) fn hmget(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("HMGET"));
    }
    let values = db.hmget(&argv[1], &argv[2..], now_ms)?;
    Ok(RespFrame::Array(Some(
        values.into_iter().map(RespFrame::BulkString).collect(),
    )))
}

pub(crate) fn hdel(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("HDEL"));
    }
    let removed = db.hdel(&argv[1], &argv[2..], now_ms)?;
    Ok(RespFrame::Integer(removed as i64))
}

pub(crate) fn hexists(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("HEXISTS"));
    }
    Ok(RespFrame::Integer(i64::from(
        db.hexists(&argv[1], &argv[2], now_ms)?,
    )))
}

pub(crate) fn hlen(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("HLEN"));
    }
    Ok(RespFrame::Integer(db.hlen(&argv[1], now_ms)? as i64))
}

pub(crate) fn hstrlen(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("HSTRLEN"));
    }
    Ok(RespFrame::Integer(db.hstrlen(&argv[1], &argv[2], now_ms)? as i64))
}

pub(crate) fn hkeys(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("HKEYS"));
    }
    let fields = db
        .hgetall(&argv[1], now_ms)?
        .into_iter()
        .map(|(field, _)| field)
        .collect();
    Ok(frames_from_bulks(fields))
}

pub(crate) fn hvals(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("HVALS"));
    }
    let values = db
        .hgetall(&argv[1], now_ms)?
        .into_iter()
        .map(|(_, value)| value)
        .collect();
    Ok(frames_from_bulks(values))
}

pub(crate) fn hgetall(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("HGETALL"));
    }
    let pairs = db.hgetall(&argv[1], now_ms)?;
    Ok(RespFrame::Map(
        pairs
            .into_iter()
            .map(|(field, value)| {
                (
                    RespFrame::BulkString(Some(field)),
                    RespFrame::BulkString(Some(value)),
                )
            })
            .collect(),
    ))
}

pub(crate) fn hincrby(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("HINCRBY"));
    }
    let delta = parse_i64_arg(&argv[3])?;
    Ok(RespFrame::Integer(db.hincrby(&argv[1], &argv[2], delta, now_ms)?))
}

pub(crate) fn hincrbyfloat(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("HINCRBYFLOAT"));
    }
    let delta = parse_f64_arg(&argv[3])?;
    let next = db.hincrbyfloat(&argv[1], &argv[2], delta, now_ms)?;
    Ok(RespFrame::BulkString(Some(
        rd_protocol::format_double(next).into_bytes(),
    )))
}

pub(crate) fn hrandfield(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if !(2..=4).contains(&argv.len()) {
        return Err(CommandError::WrongArity("HRANDFIELD"));
    }
    let pairs = db.hgetall(&argv[1], now_ms)?;
    let Some(count_arg) = argv.get(2) else {
        let mut rng = rand::thread_rng();
        return Ok(match pairs.as_slice() {
            [] => RespFrame::BulkString(None),
            items => {
                let (field, _) = &items[rng.gen_range(0..items.len())];
                RespFrame::BulkString(Some(field.clone()))
            }
        });
    };
    let count = parse_i64_arg(count_arg)?;
    let with_values = match argv.get(3) {
        None => false,
        Some(arg) if arg.eq_ignore_ascii_case(b"WITHVALUES") => true,
        Some(_) => return Err(CommandError::SyntaxError),
    };

    let mut rng = rand::thread_rng();
    let picked: Vec<(Vec<u8>, Vec<u8>)> = if pairs.is_empty() {
        Vec::new()
    } else if count >= 0 {
        let mut shuffled = pairs;
        shuffled.shuffle(&mut rng);
        shuffled.truncate(count as usize);
        shuffled
    } else {
        (0..count.unsigned_abs() as usize)
            .map(|_| pairs[rng.gen_range(0..pairs.len())].clone())
            .collect()
    };

    let mut out = Vec::new();
    for (field, value) in picked {
        out.push(RespFrame::BulkString(Some(field)));
        if with_values {
            out.push(RespFrame::BulkString(Some(value)));
        }
    }
    Ok(RespFrame::Array(Some(out)))
}

pub(crate) fn hscan(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("HSCAN"));
    }
    let cursor = parse_cursor(&argv[2])?;
    let (pattern, count) = parse_scan_args(argv, 3)?;
    let (next_cursor, pairs) = db.hscan(&argv[1], cursor, pattern.as_deref(), count, now_ms)?;
    let mut items = Vec::with_capacity(pairs.len() * 2);
    for (field, value) in pairs {
        items.push(RespFrame::BulkString(Some(field)));
        items.push(RespFrame::BulkString(Some(value)));
    }
    Ok(RespFrame::Array(Some(vec![
        RespFrame::BulkString(Some(next_cursor.to_string().into_bytes())),
        RespFrame::Array(Some(items)),
    ])))
}

// ── per-field expiry ─────────────────────────────────────────────────

fn require_v7(config: &Config, argv: &[Vec<u8>]) -> Result<(), CommandError> {
    if config.server_version == ServerVersion::V6 {
        return Err(CommandError::UnknownCommand {
            command: String::from_utf8_lossy(&argv[0]).into_owned(),
            args_preview: None,
        });
    }
    Ok(())
}

/// Parse the trailing `FIELDS numfields field [field ...]` clause starting
/// at `idx`, returning (condition flags consumed before it, fields).
fn parse_fields_clause(
    argv: &[Vec<u8>],
    mut idx: usize,
) -> Result<(rd_store::ExpireOpts, Vec<Vec<u8>>), CommandError> {
    let mut opts = rd_store::ExpireOpts::default();
    while idx < argv.len() && !argv[idx].eq_ignore_ascii_case(b"FIELDS") {
        if argv[idx].eq_ignore_ascii_case(b"NX") {
            opts.nx = true;
        } else if argv[idx].eq_ignore_ascii_case(b"XX") {
            opts.xx = true;
        } else if argv[idx].eq_ignore_ascii_case(b"GT") {
            opts.gt = true;
        } else if argv[idx].eq_ignore_ascii_case(b"LT") {
            opts.lt = true;
        } else {
            return Err(CommandError::SyntaxError);
        }
        idx += 1;
    }
    if idx >= argv.len() || !argv[idx].eq_ignore_ascii_case(b"FIELDS") {
        return Err(CommandError::Raw(
            "ERR Mandatory keyword FIELDS is missing or not at the right position".to_string(),
        ));
    }
    idx += 1;
    let numfields = parse_i64_arg(argv.get(idx).ok_or(CommandError::SyntaxError)?)?;
    idx += 1;
    let fields: Vec<Vec<u8>> = argv[idx..].to_vec();
    if numfields <= 0 || fields.len() != numfields as usize {
        return Err(CommandError::Raw(
            "ERR Parameter `numFields` should be greater than 0".to_string(),
        ));
    }
    Ok((opts, fields))
}

fn fields_reply(codes: Option<Vec<i64>>, field_count: usize) -> RespFrame {
    let codes = codes.unwrap_or_else(|| vec![-2; field_count]);
    RespFrame::Array(Some(codes.into_iter().map(RespFrame::Integer).collect()))
}

pub(crate) fn hexpire(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    config: &Config,
    unit: TtlUnit,
    base: TtlBase,
) -> Result<RespFrame, CommandError> {
    require_v7(config, argv)?;
    if argv.len() < 6 {
        return Err(CommandError::WrongArity("HEXPIRE"));
    }
    let raw = parse_i64_arg(&argv[2])?;
    let (opts, fields) = parse_fields_clause(argv, 3)?;
    let at_ms = resolve_deadline_ms(raw, unit, base, now_ms);
    let codes = db.hash_field_expire_at(&argv[1], &fields, at_ms, opts, now_ms)?;
    Ok(fields_reply(codes, fields.len()))
}

pub(crate) fn hpersist(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    config: &Config,
) -> Result<RespFrame, CommandError> {
    require_v7(config, argv)?;
    if argv.len() < 5 {
        return Err(CommandError::WrongArity("HPERSIST"));
    }
    let (opts, fields) = parse_fields_clause(argv, 2)?;
    if opts != rd_store::ExpireOpts::default() {
        return Err(CommandError::SyntaxError);
    }
    let codes = db.hash_field_persist(&argv[1], &fields, now_ms)?;
    Ok(fields_reply(codes, fields.len()))
}

pub(crate) fn httl(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    config: &Config,
    unit: TtlUnit,
) -> Result<RespFrame, CommandError> {
    require_v7(config, argv)?;
    if argv.len() < 5 {
        return Err(CommandError::WrongArity("HTTL"));
    }
    let (opts, fields) = parse_fields_clause(argv, 2)?;
    if opts != rd_store::ExpireOpts::default() {
        return Err(CommandError::SyntaxError);
    }
    let codes = db.hash_field_ttl_ms(&argv[1], &fields, now_ms)?.map(|codes| {
        codes
            .into_iter()
            .map(|code| match (code, unit) {
                (code, _) if code < 0 => code,
                (ms, TtlUnit::Milliseconds) => ms,
                (ms, TtlUnit::Seconds) => (ms + 999) / 1000,
            })
            .collect()
    });
    Ok(fields_reply(codes, fields.len()))
}

pub(crate) fn hexpiretime(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    config: &Config,
    unit: TtlUnit,
) -> Result<RespFrame, CommandError> {
    require_v7(config, argv)?;
    if argv.len() < 5 {
        return Err(CommandError::WrongArity("HEXPIRETIME"));
    }
    let (opts, fields) = parse_fields_clause(argv, 2)?;
    if opts != rd_store::ExpireOpts::default() {
        return Err(CommandError::SyntaxError);
    }
    let codes = db
        .hash_field_expire_time_ms(&argv[1], &fields, now_ms)?
        .map(|codes| {
            codes
                .into_iter()
                .map(|code| match (code, unit) {
                    (code, _) if code < 0 => code,
                    (ms, TtlUnit::Milliseconds) => ms,
                    (ms, TtlUnit::Seconds) => ms / 1000,
                })
                .collect()
        });
    Ok(fields_reply(codes, fields.len()))
}
