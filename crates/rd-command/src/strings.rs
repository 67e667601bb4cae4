//! String and bitmap command handlers.

use rd_config::{Config, ServerVersion};
use rd_protocol::RespFrame;
use rd_store::{BitUnit, Db, SetExpiry};

use crate::{
    CommandError, parse_f64_arg, parse_i64_arg, parse_u64_arg, parse_usize_arg,
};

/// Value-comparison conditions added to SET in server version 7.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SetCondition {
    IfEq(Vec<u8>),
    IfGt,
    IfLt,
}

pub(crate) fn set(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    config: &Config,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("SET"));
    }
    let key = &argv[1];
    let value = &argv[2];

    let mut nx = false;
    let mut xx = false;
    let mut get = false;
    let mut keepttl = false;
    let mut deadline_ms: Option<i64> = None;
    let mut expiry_options = 0;
    let mut condition: Option<SetCondition> = None;

    let mut options = argv[3..].iter();
    while let Some(option) = options.next() {
        if option.eq_ignore_ascii_case(b"NX") {
            nx = true;
        } else if option.eq_ignore_ascii_case(b"XX") {
            xx = true;
        } else if option.eq_ignore_ascii_case(b"GET") {
            get = true;
        } else if option.eq_ignore_ascii_case(b"KEEPTTL") {
            keepttl = true;
            expiry_options += 1;
        } else if option.eq_ignore_ascii_case(b"EX") {
            let seconds = parse_i64_arg(options.next().ok_or(CommandError::SyntaxError)?)?;
            if seconds <= 0 {
                return Err(CommandError::InvalidExpireTime("SET"));
            }
            deadline_ms = Some((now_ms as i64).saturating_add(seconds.saturating_mul(1000)));
            expiry_options += 1;
        } else if option.eq_ignore_ascii_case(b"PX") {
            let ms = parse_i64_arg(options.next().ok_or(CommandError::SyntaxError)?)?;
            if ms <= 0 {
                return Err(CommandError::InvalidExpireTime("SET"));
            }
            deadline_ms = Some((now_ms as i64).saturating_add(ms));
            expiry_options += 1;
        } else if option.eq_ignore_ascii_case(b"EXAT") {
            let at = parse_i64_arg(options.next().ok_or(CommandError::SyntaxError)?)?;
            if at <= 0 {
                return Err(CommandError::InvalidExpireTime("SET"));
            }
            deadline_ms = Some(at.saturating_mul(1000));
            expiry_options += 1;
        } else if option.eq_ignore_ascii_case(b"PXAT") {
            let at = parse_i64_arg(options.next().ok_or(CommandError::SyntaxError)?)?;
            if at <= 0 {
                return Err(CommandError::InvalidExpireTime("SET"));
            }
            deadline_ms = Some(at);
            expiry_options += 1;
        } else if option.eq_ignore_ascii_case(b"IFEQ") {
            let cmp = options.next().ok_or(CommandError::SyntaxError)?;
            condition = Some(SetCondition::IfEq(cmp.clone()));
        } else if option.eq_ignore_ascii_case(b"IFGT") {
            condition = Some(SetCondition::IfGt);
        } else if option.eq_ignore_ascii_case(b"IFLT") {
            condition = Some(SetCondition::IfLt);
        } else {
            return Err(CommandError::SyntaxError);
        }
    }

    if nx && xx {
        return Err(CommandError::SyntaxError);
    }
    if expiry_options > 1 {
        return Err(CommandError::SyntaxError);
    }
    if config.server_version == ServerVersion::V6 {
        // NX+GET and the value conditions arrived with version 7.
        if nx && get {
            return Err(CommandError::SyntaxError);
        }
        if condition.is_some() {
            return Err(CommandError::SyntaxError);
        }
    }
    if condition.is_some() && (nx || xx) {
        return Err(CommandError::SyntaxError);
    }

    // Type check (for GET and the conditions) happens before the presence
    // options, after lazy expiry.
    let current = if get || condition.is_some() {
        db.string_get(key, now_ms)?
    } else {
        None
    };
    let old_reply = || RespFrame::BulkString(current.clone());

    let key_exists = db.exists(key, now_ms);
    if nx && key_exists {
        return Ok(if get { old_reply() } else { RespFrame::BulkString(None) });
    }
    if xx && !key_exists {
        return Ok(RespFrame::BulkString(None));
    }
    if let Some(condition) = &condition {
        let satisfied = match condition {
            SetCondition::IfEq(cmp) => current.as_deref() == Some(cmp.as_slice()),
            SetCondition::IfGt => {
                current.as_deref().is_none_or(|cur| value.as_slice() > cur)
            }
            SetCondition::IfLt => {
                current.as_deref().is_none_or(|cur| value.as_slice() < cur)
            }
        };
        if !satisfied {
            return Ok(if get { old_reply() } else { RespFrame::BulkString(None) });
        }
    }

    let expiry = match deadline_ms {
        Some(at) => SetExpiry::At(u64::try_from(at).unwrap_or(0)),
        None if keepttl => SetExpiry::Keep,
        None => SetExpiry::Discard,
    };
    db.string_set(key, value.clone(), expiry, now_ms);

    if get {
        Ok(old_reply())
    } else {
        Ok(RespFrame::ok())
    }
}

pub(crate) fn get(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("GET"));
    }
    Ok(RespFrame::BulkString(db.string_get(&argv[1], now_ms)?))
}

pub(crate) fn getset(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("GETSET"));
    }
    let old = db.string_get(&argv[1], now_ms)?;
    db.string_set(&argv[1], argv[2].clone(), SetExpiry::Discard, now_ms);
    Ok(RespFrame::BulkString(old))
}

pub(crate) fn getdel(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("GETDEL"));
    }
    Ok(RespFrame::BulkString(db.getdel(&argv[1], now_ms)?))
}

pub(crate) fn getex(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 2 {
        return Err(CommandError::WrongArity("GETEX"));
    }
    let key = &argv[1];
    let mut option_count = 0;
    let mut persist = false;
    let mut deadline_ms: Option<i64> = None;

    let mut options = argv[2..].iter();
    while let Some(option) = options.next() {
        option_count += 1;
        if option.eq_ignore_ascii_case(b"PERSIST") {
            persist = true;
        } else if option.eq_ignore_ascii_case(b"EX") {
            let seconds = parse_i64_arg(options.next().ok_or(CommandError::SyntaxError)?)?;
            if seconds <= 0 {
                return Err(CommandError::InvalidExpireTime("GETEX"));
            }
            deadline_ms = Some((now_ms as i64).saturating_add(seconds.saturating_mul(1000)));
        } else if option.eq_ignore_ascii_case(b"PX") {
            let ms = parse_i64_arg(options.next().ok_or(CommandError::SyntaxError)?)?;
            if ms <= 0 {
                return Err(CommandError::InvalidExpireTime("GETEX"));
            }
            deadline_ms = Some((now_ms as i64).saturating_add(ms));
        } else if option.eq_ignore_ascii_case(b"EXAT") {
            let at = parse_i64_arg(options.next().ok_or(CommandError::SyntaxError)?)?;
            deadline_ms = Some(at.saturating_mul(1000));
        } else if option.eq_ignore_ascii_case(b"PXAT") {
            let at = parse_i64_arg(options.next().ok_or(CommandError::SyntaxError)?)?;
            deadline_ms = Some(at);
        } else {
            return Err(CommandError::SyntaxError);
        }
    }
    if option_count > 1 {
        return Err(CommandError::SyntaxError);
    }

    let value = db.string_get(key, now_ms)?;
    if value.is_some() {
        if persist {
            db.persist(key, now_ms);
        } else if let Some(at) = deadline_ms {
            db.expire_at(key, at, rd_store::ExpireOpts::default(), now_ms);
        }
    }
    Ok(RespFrame::BulkString(value))
}

pub(crate) fn append(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("APPEND"));
    }
    let len = db.append(&argv[1], &argv[2], now_ms)?;
    Ok(RespFrame::Integer(len as i64))
}

pub(crate) fn strlen(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("STRLEN"));
    }
    Ok(RespFrame::Integer(db.strlen(&argv[1], now_ms)? as i64))
}

pub(crate) fn setrange(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("SETRANGE"));
    }
    let offset = parse_i64_arg(&argv[2])?;
    if offset < 0 {
        return Err(CommandError::Raw("ERR offset is out of range".to_string()));
    }
    let len = db.setrange(&argv[1], offset as usize, &argv[3], now_ms)?;
    Ok(RespFrame::Integer(len as i64))
}

pub(crate) fn getrange(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("GETRANGE"));
    }
    let start = parse_i64_arg(&argv[2])?;
    let end = parse_i64_arg(&argv[3])?;
    Ok(RespFrame::BulkString(Some(
        db.getrange(&argv[1], start, end, now_ms)?,
    )))
}

pub(crate) fn mget(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() < 2 {
        return Err(CommandError::WrongArity("MGET"));
    }
    let values = argv[1..]
        .iter()
        .map(|key| match db.string_get(key, now_ms) {
            Ok(value) => RespFrame::BulkString(value),
            // MGET reports non-string keys as nil instead of failing.
            Err(_) => RespFrame::BulkString(None),
        })
        .collect();
    Ok(RespFrame::Array(Some(values)))
}

pub(crate) fn mset(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 || argv.len() % 2 != 1 {
        return Err(CommandError::WrongArity("MSET"));
    }
    for pair in argv[1..].chunks_exact(2) {
        db.string_set(&pair[0], pair[1].clone(), SetExpiry::Discard, now_ms);
    }
    Ok(RespFrame::ok())
}

pub(crate) fn msetnx(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 || argv.len() % 2 != 1 {
        return Err(CommandError::WrongArity("MSETNX"));
    }
    let any_exists = argv[1..]
        .chunks_exact(2)
        .any(|pair| db.exists(&pair[0], now_ms));
    if any_exists {
        return Ok(RespFrame::Integer(0));
    }
    for pair in argv[1..].chunks_exact(2) {
        db.string_set(&pair[0], pair[1].clone(), SetExpiry::Discard, now_ms);
    }
    Ok(RespFrame::Integer(1))
}

pub(crate) fn setnx(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("SETNX"));
    }
    if db.exists(&argv[1], now_ms) {
        return Ok(RespFrame::Integer(0));
    }
    db.string_set(&argv[1], argv[2].clone(), SetExpiry::Discard, now_ms);
    Ok(RespFrame::Integer(1))
}

pub(crate) fn setex(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    set_with_ttl(argv, db, now_ms, "SETEX", 1000)
}

pub(crate) fn psetex(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    set_with_ttl(argv, db, now_ms, "PSETEX", 1)
}

fn set_with_ttl(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    name: &'static str,
    unit_ms: i64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity(name));
    }
    let ttl = parse_i64_arg(&argv[2])?;
    if ttl <= 0 {
        return Err(CommandError::InvalidExpireTime(name));
    }
    let at = (now_ms as i64).saturating_add(ttl.saturating_mul(unit_ms));
    db.string_set(
        &argv[1],
        argv[3].clone(),
        SetExpiry::At(u64::try_from(at).unwrap_or(u64::MAX)),
        now_ms,
    );
    Ok(RespFrame::ok())
}

pub(crate) fn incr(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("INCR"));
    }
    Ok(RespFrame::Integer(db.incr_by(&argv[1], 1, now_ms)?))
}

pub(crate) fn decr(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("DECR"));
    }
    Ok(RespFrame::Integer(db.incr_by(&argv[1], -1, now_ms)?))
}

pub(crate) fn incrby(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("INCRBY"));
    }
    let delta = parse_i64_arg(&argv[2])?;
    Ok(RespFrame::Integer(db.incr_by(&argv[1], delta, now_ms)?))
}

pub(crate) fn decrby(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("DECRBY"));
    }
    let delta = parse_i64_arg(&argv[2])?;
    let delta = delta.checked_neg().ok_or(CommandError::InvalidInteger)?;
    Ok(RespFrame::Integer(db.incr_by(&argv[1], delta, now_ms)?))
}

pub(crate) fn incrbyfloat(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("INCRBYFLOAT"));
    }
    let delta = parse_f64_arg(&argv[2])?;
    let next = db.incr_by_float(&argv[1], delta, now_ms)?;
    Ok(RespFrame::BulkString(Some(
        rd_protocol::format_double(next).into_bytes(),
    )))
}

// ── LCS ──────────────────────────────────────────────────────────────

struct LcsMatch {
    a: (usize, usize),
    b: (usize, usize),
    len: usize,
}

/// Longest common subsequence with match extraction: full DP table plus a
/// direction walk to recover the match runs.
fn lcs_compute(s1: &[u8], s2: &[u8]) -> (usize, Vec<u8>, Vec<LcsMatch>) {
    let l1 = s1.len();
    let l2 = s2.len();
    let mut opt = vec![vec![0_usize; l2 + 1]; l1 + 1];
    // Direction table for walking the actual sequence back out.
    let mut pi = vec![vec![0_u8; l2 + 1]; l1 + 1];

    for r in 1..=l1 {
        for c in 1..=l2 {
            if s1[r - 1] == s2[c - 1] {
                opt[r][c] = opt[r - 1][c - 1] + 1;
                pi[r][c] = 0;
            } else if opt[r][c - 1] >= opt[r - 1][c] {
                opt[r][c] = opt[r][c - 1];
                pi[r][c] = 1;
            } else {
                opt[r][c] = opt[r - 1][c];
                pi[r][c] = 2;
            }
        }
    }

    let mut r = l1;
    let mut c = l2;
    let mut result: Vec<u8> = Vec::new();
    let mut matches = Vec::new();
    let mut run_end: Option<(usize, usize)> = None;
    let mut run_len = 0_usize;

    while r > 0 && c > 0 {
        if pi[r][c] == 0 {
            result.insert(0, s1[r - 1]);
            if run_len == 0 {
                run_end = Some((r - 1, c - 1));
            }
            r -= 1;
            c -= 1;
            run_len += 1;
        } else if pi[r][c] == 2 {
            r -= 1;
        } else {
            c -= 1;
        }
        if pi[r][c] != 0 && run_len > 0 {
            let (ae, be) = run_end.expect("run has an end");
            matches.push(LcsMatch { a: (r, ae), b: (c, be), len: run_len });
            run_len = 0;
            run_end = None;
        }
    }
    if run_len > 0 {
        let (ae, be) = run_end.expect("run has an end");
        matches.push(LcsMatch { a: (r, ae), b: (c, be), len: run_len });
    }
    (opt[l1][l2], result, matches)
}

pub(crate) fn lcs(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("LCS"));
    }
    let s1 = db.string_get(&argv[1], now_ms)?.unwrap_or_default();
    let s2 = db.string_get(&argv[2], now_ms)?.unwrap_or_default();

    let mut want_idx = false;
    let mut want_len = false;
    let mut min_match_len = 0_usize;
    let mut with_match_len = false;
    let mut options = argv[3..].iter();
    while let Some(option) = options.next() {
        if option.eq_ignore_ascii_case(b"IDX") {
            want_idx = true;
        } else if option.eq_ignore_ascii_case(b"LEN") {
            want_len = true;
        } else if option.eq_ignore_ascii_case(b"MINMATCHLEN") {
            min_match_len = parse_usize_arg(options.next().ok_or(CommandError::SyntaxError)?)?;
        } else if option.eq_ignore_ascii_case(b"WITHMATCHLEN") {
            with_match_len = true;
        } else {
            return Err(CommandError::SyntaxError);
        }
    }
    if want_idx && want_len {
        return Err(CommandError::Raw(
            "ERR If you want both the length and indexes, please just use IDX.".to_string(),
        ));
    }

    let (lcs_len, lcs_bytes, matches) = lcs_compute(&s1, &s2);
    if want_len {
        return Ok(RespFrame::Integer(lcs_len as i64));
    }
    if !want_idx {
        return Ok(RespFrame::BulkString(Some(lcs_bytes)));
    }
    let match_frames: Vec<RespFrame> = matches
        .iter()
        .filter(|m| m.len >= min_match_len)
        .map(|m| {
            let mut parts = vec![
                RespFrame::Array(Some(vec![
                    RespFrame::Integer(m.a.0 as i64),
                    RespFrame::Integer(m.a.1 as i64),
                ])),
                RespFrame::Array(Some(vec![
                    RespFrame::Integer(m.b.0 as i64),
                    RespFrame::Integer(m.b.1 as i64),
                ])),
            ];
            if with_match_len {
                parts.push(RespFrame::Integer(m.len as i64));
            }
            RespFrame::Array(Some(parts))
        })
        .collect();
    Ok(RespFrame::Array(Some(vec![
        RespFrame::bulk(*b"matches"),
        RespFrame::Array(Some(match_frames)),
        RespFrame::bulk(*b"len"),
        RespFrame::Integer(lcs_len as i64),
    ])))
}

// ── bitmaps ──────────────────────────────────────────────────────────

pub(crate) fn setbit(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("SETBIT"));
    }
    let offset = parse_bit_offset(&argv[2])?;
    let bit = parse_bit_value(&argv[3])?;
    let previous = db.setbit(&argv[1], offset, bit, now_ms)?;
    Ok(RespFrame::Integer(i64::from(previous)))
}

pub(crate) fn getbit(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("GETBIT"));
    }
    let offset = parse_bit_offset(&argv[2])?;
    let bit = db.getbit(&argv[1], offset, now_ms)?;
    Ok(RespFrame::Integer(i64::from(bit)))
}

fn parse_bit_offset(arg: &[u8]) -> Result<usize, CommandError> {
    parse_u64_arg(arg)
        .ok()
        .and_then(|offset| usize::try_from(offset).ok())
        .filter(|offset| *offset < 4 * 1024 * 1024 * 1024)
        .ok_or_else(|| {
            CommandError::Raw("ERR bit offset is not an integer or out of range".to_string())
        })
}

fn parse_bit_value(arg: &[u8]) -> Result<bool, CommandError> {
    match arg {
        b"0" => Ok(false),
        b"1" => Ok(true),
        _ => Err(CommandError::Raw(
            "ERR bit is not an integer or out of range".to_string(),
        )),
    }
}

fn parse_bit_unit(arg: &[u8]) -> Result<BitUnit, CommandError> {
    if arg.eq_ignore_ascii_case(b"BYTE") {
        Ok(BitUnit::Byte)
    } else if arg.eq_ignore_ascii_case(b"BIT") {
        Ok(BitUnit::Bit)
    } else {
        Err(CommandError::SyntaxError)
    }
}

pub(crate) fn bitcount(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    let range = match argv.len() {
        2 => None,
        4 => Some((
            parse_i64_arg(&argv[2])?,
            parse_i64_arg(&argv[3])?,
            BitUnit::Byte,
        )),
        5 => Some((
            parse_i64_arg(&argv[2])?,
            parse_i64_arg(&argv[3])?,
            parse_bit_unit(&argv[4])?,
        )),
        _ => return Err(CommandError::SyntaxError),
    };
    let total = db.bitcount(&argv[1], range, now_ms)?;
    Ok(RespFrame::Integer(total as i64))
}

pub(crate) fn bitpos(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if !(3..=6).contains(&argv.len()) {
        return Err(CommandError::SyntaxError);
    }
    let bit = parse_bit_value(&argv[2]).map_err(|_| {
        CommandError::Raw("ERR The bit argument must be 1 or 0.".to_string())
    })?;
    let start = argv.get(3).map(|arg| parse_i64_arg(arg)).transpose()?;
    let end = argv.get(4).map(|arg| parse_i64_arg(arg)).transpose()?;
    let unit = argv
        .get(5)
        .map(|arg| parse_bit_unit(arg))
        .transpose()?
        .unwrap_or(BitUnit::Byte);
    let position = db.bitpos(&argv[1], bit, start, end, unit, now_ms)?;
    Ok(RespFrame::Integer(position))
}

pub(crate) fn bitop(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 4 {
        return Err(CommandError::WrongArity("BITOP"));
    }
    let op = &argv[1];
    let dest = &argv[2];
    let sources = &argv[3..];

    let not = op.eq_ignore_ascii_case(b"NOT");
    if not && sources.len() != 1 {
        return Err(CommandError::Raw(
            "ERR BITOP NOT must be called with a single source key.".to_string(),
        ));
    }
    let mut operands = Vec::with_capacity(sources.len());
    for key in sources {
        operands.push(db.string_get(key, now_ms)?.unwrap_or_default());
    }
    let result_len = operands.iter().map(Vec::len).max().unwrap_or(0);

    let result: Vec<u8> = if not {
        operands[0].iter().map(|byte| !byte).collect()
    } else {
        let combine: fn(u8, u8) -> u8 = if op.eq_ignore_ascii_case(b"AND") {
            |a, b| a & b
        } else if op.eq_ignore_ascii_case(b"OR") {
            |a, b| a | b
        } else if op.eq_ignore_ascii_case(b"XOR") {
            |a, b| a ^ b
        } else {
            return Err(CommandError::SyntaxError);
        };
        (0..result_len)
            .map(|i| {
                let mut acc: Option<u8> = None;
                for operand in &operands {
                    // Shorter operands extend with zero bytes.
                    let byte = operand.get(i).copied().unwrap_or(0);
                    acc = Some(match acc {
                        None => byte,
                        Some(prev) => combine(prev, byte),
                    });
                }
                acc.unwrap_or(0)
            })
            .collect()
    };

    if result.is_empty() {
        db.del(&[dest.clone()], now_ms);
        return Ok(RespFrame::Integer(0));
    }
    let len = result.len();
    db.string_set(dest, result, SetExpiry::Discard, now_ms);
    Ok(RespFrame::Integer(len as i64))
}

#[cfg(test)]
mod tests {
    use rd_config::{Config, ServerVersion};
    use rd_protocol::RespFrame;
    use rd_store::Db;

    use crate::test_support::{run, run_with_config};

    #[test]
    fn set_nx_xx_against_presence() {
        let mut db = Db::new();
        assert_eq!(
            run(&mut db, 0, &[b"SET", b"k", b"a", b"NX"]),
            RespFrame::ok(),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SET", b"k", b"b", b"NX"]),
            RespFrame::BulkString(None),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SET", b"k", b"c", b"XX"]),
            RespFrame::ok(),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SET", b"other", b"x", b"XX"]),
            RespFrame::BulkString(None),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SET", b"k", b"d", b"NX", b"XX"]),
            RespFrame::Error("ERR syntax error".to_string()),
        );
    }

    #[test]
    fn set_nx_reevaluates_after_lazy_expiry() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"SET", b"k", b"a", b"PX", b"100"]);
        // Deadline passed: NX sees the key as absent.
        assert_eq!(
            run(&mut db, 100, &[b"SET", b"k", b"b", b"NX"]),
            RespFrame::ok(),
        );
        assert_eq!(run(&mut db, 100, &[b"GET", b"k"]), RespFrame::bulk(*b"b"));
    }

    #[test]
    fn set_get_returns_old_value() {
        let mut db = Db::new();
        assert_eq!(
            run(&mut db, 0, &[b"SET", b"k", b"new", b"GET"]),
            RespFrame::BulkString(None),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SET", b"k", b"newer", b"GET"]),
            RespFrame::bulk(*b"new"),
        );
        run(&mut db, 0, &[b"LPUSH", b"l", b"x"]);
        let reply = run(&mut db, 0, &[b"SET", b"l", b"v", b"GET"]);
        assert!(matches!(reply, RespFrame::Error(text) if text.starts_with("WRONGTYPE")));
    }

    #[test]
    fn set_keepttl_and_expiry_options_conflict() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"SET", b"k", b"a", b"EX", b"10"]);
        run(&mut db, 0, &[b"SET", b"k", b"b", b"KEEPTTL"]);
        assert_eq!(run(&mut db, 0, &[b"TTL", b"k"]), RespFrame::Integer(10));
        assert_eq!(
            run(&mut db, 0, &[b"SET", b"k", b"c", b"EX", b"10", b"PX", b"5"]),
            RespFrame::Error("ERR syntax error".to_string()),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SET", b"k", b"c", b"EX", b"0"]),
            RespFrame::Error("ERR invalid expire time in 'set' command".to_string()),
        );
    }

    #[test]
    fn set_conditions_compare_values() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"SET", b"k", b"bbb"]);
        assert_eq!(
            run(&mut db, 0, &[b"SET", b"k", b"ccc", b"IFEQ", b"zzz"]),
            RespFrame::BulkString(None),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SET", b"k", b"ccc", b"IFEQ", b"bbb"]),
            RespFrame::ok(),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SET", b"k", b"bbb", b"IFGT"]),
            RespFrame::BulkString(None),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SET", b"k", b"ddd", b"IFGT"]),
            RespFrame::ok(),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SET", b"k", b"aaa", b"IFLT"]),
            RespFrame::ok(),
        );
    }

    #[test]
    fn set_conditions_require_version_7() {
        let mut db = Db::new();
        let v6 = Config {
            server_version: ServerVersion::V6,
            ..Default::default()
        };
        assert_eq!(
            run_with_config(&mut db, 0, &v6, &[b"SET", b"k", b"v", b"IFGT"]),
            RespFrame::Error("ERR syntax error".to_string()),
        );
        assert_eq!(
            run_with_config(&mut db, 0, &v6, &[b"SET", b"k", b"v", b"NX", b"GET"]),
            RespFrame::Error("ERR syntax error".to_string()),
        );
    }

    #[test]
    fn getex_adjusts_ttl_without_writing() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"SET", b"k", b"v"]);
        assert_eq!(
            run(&mut db, 0, &[b"GETEX", b"k", b"EX", b"5"]),
            RespFrame::bulk(*b"v"),
        );
        assert_eq!(run(&mut db, 0, &[b"TTL", b"k"]), RespFrame::Integer(5));
        assert_eq!(
            run(&mut db, 0, &[b"GETEX", b"k", b"PERSIST"]),
            RespFrame::bulk(*b"v"),
        );
        assert_eq!(run(&mut db, 0, &[b"TTL", b"k"]), RespFrame::Integer(-1));
        assert_eq!(
            run(&mut db, 0, &[b"GETEX", b"k", b"EX", b"1", b"PERSIST"]),
            RespFrame::Error("ERR syntax error".to_string()),
        );
        assert_eq!(
            run(&mut db, 0, &[b"GETEX", b"missing"]),
            RespFrame::BulkString(None),
        );
    }

    #[test]
    fn incr_family() {
        let mut db = Db::new();
        assert_eq!(run(&mut db, 0, &[b"INCR", b"n"]), RespFrame::Integer(1));
        assert_eq!(run(&mut db, 0, &[b"INCRBY", b"n", b"9"]), RespFrame::Integer(10));
        assert_eq!(run(&mut db, 0, &[b"DECR", b"n"]), RespFrame::Integer(9));
        assert_eq!(run(&mut db, 0, &[b"DECRBY", b"n", b"4"]), RespFrame::Integer(5));
        assert_eq!(
            run(&mut db, 0, &[b"INCRBYFLOAT", b"f", b"10.5"]),
            RespFrame::bulk(*b"10.5"),
        );
        assert_eq!(
            run(&mut db, 0, &[b"INCRBYFLOAT", b"f", b"0.1"]),
            RespFrame::bulk(*b"10.6"),
        );
        run(&mut db, 0, &[b"SET", b"s", b"abc"]);
        assert_eq!(
            run(&mut db, 0, &[b"INCR", b"s"]),
            RespFrame::Error("ERR value is not an integer or out of range".to_string()),
        );
    }

    #[test]
    fn msetnx_is_all_or_nothing() {
        let mut db = Db::new();
        assert_eq!(
            run(&mut db, 0, &[b"MSETNX", b"a", b"1", b"b", b"2"]),
            RespFrame::Integer(1),
        );
        assert_eq!(
            run(&mut db, 0, &[b"MSETNX", b"b", b"x", b"c", b"3"]),
            RespFrame::Integer(0),
        );
        assert_eq!(
            run(&mut db, 0, &[b"EXISTS", b"c"]),
            RespFrame::Integer(0),
        );
    }

    #[test]
    fn mget_nils_for_missing_and_wrong_type() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"SET", b"a", b"1"]);
        run(&mut db, 0, &[b"LPUSH", b"l", b"x"]);
        assert_eq!(
            run(&mut db, 0, &[b"MGET", b"a", b"nope", b"l"]),
            RespFrame::Array(Some(vec![
                RespFrame::bulk(*b"1"),
                RespFrame::BulkString(None),
                RespFrame::BulkString(None),
            ])),
        );
    }

    #[test]
    fn lcs_plain_len_and_idx() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"MSET", b"key1", b"ohmytext", b"key2", b"mynewtext"]);
        assert_eq!(
            run(&mut db, 0, &[b"LCS", b"key1", b"key2"]),
            RespFrame::bulk(*b"mytext"),
        );
        assert_eq!(
            run(&mut db, 0, &[b"LCS", b"key1", b"key2", b"LEN"]),
            RespFrame::Integer(6),
        );
        let reply = run(&mut db, 0, &[b"LCS", b"key1", b"key2", b"IDX", b"MINMATCHLEN", b"4"]);
        let RespFrame::Array(Some(parts)) = reply else {
            panic!("expected array");
        };
        assert_eq!(parts[0], RespFrame::bulk(*b"matches"));
        assert_eq!(parts[3], RespFrame::Integer(6));
        let RespFrame::Array(Some(matches)) = &parts[1] else {
            panic!("expected matches array");
        };
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn setrange_and_getrange() {
        let mut db = Db::new();
        assert_eq!(
            run(&mut db, 0, &[b"SETRANGE", b"k", b"5", b"hello"]),
            RespFrame::Integer(10),
        );
        assert_eq!(
            run(&mut db, 0, &[b"GETRANGE", b"k", b"5", b"-1"]),
            RespFrame::bulk(*b"hello"),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SETRANGE", b"k", b"-1", b"x"]),
            RespFrame::Error("ERR offset is out of range".to_string()),
        );
    }

    #[test]
    fn bitcount_modes() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"SET", b"k", b"foobar"]);
        assert_eq!(run(&mut db, 0, &[b"BITCOUNT", b"k"]), RespFrame::Integer(26));
        assert_eq!(
            run(&mut db, 0, &[b"BITCOUNT", b"k", b"1", b"1"]),
            RespFrame::Integer(6),
        );
        assert_eq!(
            run(&mut db, 0, &[b"BITCOUNT", b"k", b"5", b"30", b"BIT"]),
            RespFrame::Integer(17),
        );
        assert_eq!(
            run(&mut db, 0, &[b"BITCOUNT", b"missing"]),
            RespFrame::Integer(0),
        );
    }

    #[test]
    fn bitop_extends_and_deletes_empty() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"SET", b"a", b"abc"]);
        run(&mut db, 0, &[b"SET", b"b", b"a"]);
        assert_eq!(
            run(&mut db, 0, &[b"BITOP", b"AND", b"dest", b"a", b"b"]),
            RespFrame::Integer(3),
        );
        assert_eq!(
            run(&mut db, 0, &[b"GET", b"dest"]),
            RespFrame::bulk(*b"a\x00\x00"),
        );
        run(&mut db, 0, &[b"SET", b"dest", b"old"]);
        assert_eq!(
            run(&mut db, 0, &[b"BITOP", b"OR", b"dest", b"nope1", b"nope2"]),
            RespFrame::Integer(0),
        );
        assert_eq!(
            run(&mut db, 0, &[b"EXISTS", b"dest"]),
            RespFrame::Integer(0),
        );
        assert_eq!(
            run(&mut db, 0, &[b"BITOP", b"NOT", b"dest", b"a", b"b"]),
            RespFrame::Error("ERR BITOP NOT must be called with a single source key.".to_string()),
        );
    }

    #[test]
    fn mset_arity_must_pair_up() {
        let mut db = Db::new();
        let reply = run(&mut db, 0, &[b"MSET", b"a", b"1", b"b"]);
        assert_eq!(
            reply,
            RespFrame::Error("ERR wrong number of arguments for 'mset' command".to_string()),
        );
    }
}
