//! Sorted-set command handlers: ZADD flag composition, the three range
//! addressing modes, aggregated set operations, and the removal ranges.

use std::collections::HashMap;

use rand::Rng;
use rand::seq::SliceRandom;
use rd_protocol::RespFrame;
use rd_store::{Db, LexRange, ScoreRange, ZAddFlags};

use crate::{
    CommandError, format_score, parse_cursor, parse_f64_arg, parse_i64_arg, parse_lex_bound,
    parse_scan_args, parse_score_bound, parse_usize_arg,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SetOp {
    Union,
    Inter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aggregate {
    Sum,
    Min,
    Max,
}

pub(crate) fn zadd(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() < 4 {
        return Err(CommandError::WrongArity("ZADD"));
    }
    let key = &argv[1];
    let mut flags = ZAddFlags::default();
    let mut i = 2;
    while i < argv.len() {
        let arg = &argv[i];
        if arg.eq_ignore_ascii_case(b"NX") {
            flags.nx = true;
        } else if arg.eq_ignore_ascii_case(b"XX") {
            flags.xx = true;
        } else if arg.eq_ignore_ascii_case(b"GT") {
            flags.gt = true;
        } else if arg.eq_ignore_ascii_case(b"LT") {
            flags.lt = true;
        } else if arg.eq_ignore_ascii_case(b"CH") {
            flags.ch = true;
        } else if arg.eq_ignore_ascii_case(b"INCR") {
            flags.incr = true;
        } else {
            break;
        }
        i += 1;
    }
    if flags.nx && flags.xx {
        return Err(CommandError::Raw(
            "ERR XX and NX options at the same time are not compatible".to_string(),
        ));
    }
    if (flags.gt && flags.lt) || (flags.nx && (flags.gt || flags.lt)) {
        return Err(CommandError::Raw(
            "ERR GT, LT, and/or NX options at the same time are not compatible".to_string(),
        ));
    }

    let rest = &argv[i..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(CommandError::SyntaxError);
    }
    let mut pairs = Vec::with_capacity(rest.len() / 2);
    for chunk in rest.chunks_exact(2) {
        let score = parse_f64_arg(&chunk[0])?;
        if score.is_nan() {
            return Err(CommandError::InvalidFloat);
        }
        pairs.push((score, chunk[1].clone()));
    }
    if flags.incr && pairs.len() != 1 {
        return Err(CommandError::Raw(
            "ERR INCR option supports a single increment-element pair".to_string(),
        ));
    }

    let outcome = db.zadd(key, flags, &pairs, now_ms)?;
    if flags.incr {
        return Ok(match outcome.incr_score {
            Some(score) => RespFrame::BulkString(Some(format_score(score))),
            None => RespFrame::BulkString(None),
        });
    }
    Ok(RespFrame::Integer(if flags.ch {
        outcome.changed as i64
    } else {
        outcome.added as i64
    }))
}

pub(crate) fn zincrby(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("ZINCRBY"));
    }
    let delta = parse_f64_arg(&argv[2])?;
    if delta.is_nan() {
        return Err(CommandError::InvalidFloat);
    }
    let flags = ZAddFlags { incr: true, ..Default::default() };
    let outcome = db.zadd(&argv[1], flags, &[(delta, argv[3].clone())], now_ms)?;
    let score = outcome.incr_score.expect("unconditional INCR always applies");
    Ok(RespFrame::BulkString(Some(format_score(score))))
}

pub(crate) fn zrem(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("ZREM"));
    }
    let removed = db.zrem(&argv[1], &argv[2..], now_ms)?;
    Ok(RespFrame::Integer(removed as i64))
}

pub(crate) fn zscore(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("ZSCORE"));
    }
    Ok(match db.zscore(&argv[1], &argv[2], now_ms)? {
        Some(score) => RespFrame::BulkString(Some(format_score(score))),
        None => RespFrame::BulkString(None),
    })
}

pub(crate) fn zmscore(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("ZMSCORE"));
    }
    let scores = db.zmscore(&argv[1], &argv[2..], now_ms)?;
    Ok(RespFrame::Array(Some(
        scores
            .into_iter()
            .map(|score| match score {
                Some(score) => RespFrame::BulkString(Some(format_score(score))),
                None => RespFrame::BulkString(None),
            })
            .collect(),
    )))
}

pub(crate) fn zcard(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("ZCARD"));
    }
    Ok(RespFrame::Integer(db.zcard(&argv[1], now_ms)? as i64))
}

pub(crate) fn zcount(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("ZCOUNT"));
    }
    let range = score_range(&argv[2], &argv[3])?;
    let count = db
        .zsorted(&argv[1], now_ms)?
        .into_iter()
        .filter(|(score, _)| range.contains(*score))
        .count();
    Ok(RespFrame::Integer(count as i64))
}

pub(crate) fn zlexcount(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("ZLEXCOUNT"));
    }
    let range = lex_range(&argv[2], &argv[3])?;
    let count = db
        .zsorted(&argv[1], now_ms)?
        .into_iter()
        .filter(|(_, member)| range.contains(member))
        .count();
    Ok(RespFrame::Integer(count as i64))
}

pub(crate) fn zrank(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    rev: bool,
) -> Result<RespFrame, CommandError> {
    let name = if rev { "ZREVRANK" } else { "ZRANK" };
    if !(3..=4).contains(&argv.len()) {
        return Err(CommandError::WrongArity(name));
    }
    let with_score = match argv.get(3) {
        None => false,
        Some(arg) if arg.eq_ignore_ascii_case(b"WITHSCORE") => true,
        Some(_) => return Err(CommandError::SyntaxError),
    };
    let pairs = db.zsorted(&argv[1], now_ms)?;
    let found = pairs
        .iter()
        .position(|(_, member)| member == &argv[2])
        .map(|idx| {
            let rank = if rev { pairs.len() - 1 - idx } else { idx };
            (rank, pairs[idx].0)
        });
    Ok(match (found, with_score) {
        (None, false) => RespFrame::BulkString(None),
        (None, true) => RespFrame::Array(None),
        (Some((rank, _)), false) => RespFrame::Integer(rank as i64),
        (Some((rank, score)), true) => RespFrame::Array(Some(vec![
            RespFrame::Integer(rank as i64),
            RespFrame::BulkString(Some(format_score(score))),
        ])),
    })
}

fn score_range(min: &[u8], max: &[u8]) -> Result<ScoreRange, CommandError> {
    let (min, min_exclusive) = parse_score_bound(min)?;
    let (max, max_exclusive) = parse_score_bound(max)?;
    Ok(ScoreRange { min, min_exclusive, max, max_exclusive })
}

fn lex_range(min: &[u8], max: &[u8]) -> Result<LexRange, CommandError> {
    Ok(LexRange {
        min: parse_lex_bound(min)?,
        max: parse_lex_bound(max)?,
    })
}

fn apply_limit<T>(items: Vec<T>, limit: Option<(usize, i64)>) -> Vec<T> {
    let Some((offset, count)) = limit else {
        return items;
    };
    let offset = offset.min(items.len());
    let end = if count < 0 {
        items.len()
    } else {
        offset.saturating_add(count as usize).min(items.len())
    };
    items
        .into_iter()
        .skip(offset)
        .take(end.saturating_sub(offset))
        .collect()
}

fn pairs_reply(pairs: Vec<(f64, Vec<u8>)>, with_scores: bool) -> RespFrame {
    let mut out = Vec::with_capacity(pairs.len() * if with_scores { 2 } else { 1 });
    for (score, member) in pairs {
        out.push(RespFrame::BulkString(Some(member)));
        if with_scores {
            out.push(RespFrame::BulkString(Some(format_score(score))));
        }
    }
    RespFrame::Array(Some(out))
}

fn rank_slice(
    pairs: Vec<(f64, Vec<u8>)>,
    start: i64,
    stop: i64,
    rev: bool,
) -> Vec<(f64, Vec<u8>)> {
    let mut pairs = pairs;
    if rev {
        pairs.reverse();
    }
    let len = pairs.len() as i64;
    let from = if start < 0 { (len + start).max(0) } else { start };
    let to = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if from > to || from >= len || to < 0 {
        return Vec::new();
    }
    pairs[from as usize..=(to as usize)].to_vec()
}

/// The unified ZRANGE with BYSCORE/BYLEX/REV/LIMIT/WITHSCORES.
pub(crate) fn zrange(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 4 {
        return Err(CommandError::WrongArity("ZRANGE"));
    }
    let mut by_score = false;
    let mut by_lex = false;
    let mut rev = false;
    let mut with_scores = false;
    let mut limit: Option<(usize, i64)> = None;
    let mut i = 4;
    while i < argv.len() {
        if argv[i].eq_ignore_ascii_case(b"BYSCORE") {
            by_score = true;
            i += 1;
        } else if argv[i].eq_ignore_ascii_case(b"BYLEX") {
            by_lex = true;
            i += 1;
        } else if argv[i].eq_ignore_ascii_case(b"REV") {
            rev = true;
            i += 1;
        } else if argv[i].eq_ignore_ascii_case(b"WITHSCORES") {
            with_scores = true;
            i += 1;
        } else if argv[i].eq_ignore_ascii_case(b"LIMIT") && i + 2 < argv.len() {
            limit = Some((parse_usize_arg(&argv[i + 1])?, parse_i64_arg(&argv[i + 2])?));
            i += 3;
        } else {
            return Err(CommandError::SyntaxError);
        }
    }
    if by_score && by_lex {
        return Err(CommandError::SyntaxError);
    }
    if limit.is_some() && !(by_score || by_lex) {
        return Err(CommandError::Raw(
            "ERR syntax error, LIMIT is only supported in combination with either BYSCORE or BYLEX"
                .to_string(),
        ));
    }
    if by_lex && with_scores {
        return Err(CommandError::SyntaxError);
    }

    let pairs = db.zsorted(&argv[1], now_ms)?;
    // In REV mode the two positional bounds swap roles.
    let (lo, hi) = if rev { (&argv[3], &argv[2]) } else { (&argv[2], &argv[3]) };
    let selected = if by_score {
        let range = score_range(lo, hi)?;
        let mut matched: Vec<(f64, Vec<u8>)> = pairs
            .into_iter()
            .filter(|(score, _)| range.contains(*score))
            .collect();
        if rev {
            matched.reverse();
        }
        apply_limit(matched, limit)
    } else if by_lex {
        let range = lex_range(lo, hi)?;
        let mut matched: Vec<(f64, Vec<u8>)> = pairs
            .into_iter()
            .filter(|(_, member)| range.contains(member))
            .collect();
        if rev {
            matched.reverse();
        }
        apply_limit(matched, limit)
    } else {
        let start = parse_i64_arg(&argv[2])?;
        let stop = parse_i64_arg(&argv[3])?;
        rank_slice(pairs, start, stop, rev)
    };
    Ok(pairs_reply(selected, with_scores))
}

pub(crate) fn zrevrange(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if !(4..=5).contains(&argv.len()) {
        return Err(CommandError::WrongArity("ZREVRANGE"));
    }
    let with_scores = match argv.get(4) {
        None => false,
        Some(arg) if arg.eq_ignore_ascii_case(b"WITHSCORES") => true,
        Some(_) => return Err(CommandError::SyntaxError),
    };
    let start = parse_i64_arg(&argv[2])?;
    let stop = parse_i64_arg(&argv[3])?;
    let pairs = db.zsorted(&argv[1], now_ms)?;
    Ok(pairs_reply(rank_slice(pairs, start, stop, true), with_scores))
}

pub(crate) fn zrangebyscore(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    rev: bool,
) -> Result<RespFrame, CommandError> {
    let name = if rev { "ZREVRANGEBYSCORE" } else { "ZRANGEBYSCORE" };
    if argv.len() < 4 {
        return Err(CommandError::WrongArity(name));
    }
    let mut with_scores = false;
    let mut limit: Option<(usize, i64)> = None;
    let mut i = 4;
    while i < argv.len() {
        if argv[i].eq_ignore_ascii_case(b"WITHSCORES") {
            with_scores = true;
            i += 1;
        } else if argv[i].eq_ignore_ascii_case(b"LIMIT") && i + 2 < argv.len() {
            limit = Some((parse_usize_arg(&argv[i + 1])?, parse_i64_arg(&argv[i + 2])?));
            i += 3;
        } else {
            return Err(CommandError::SyntaxError);
        }
    }
    // The legacy reversed form takes (max, min).
    let (lo, hi) = if rev { (&argv[3], &argv[2]) } else { (&argv[2], &argv[3]) };
    let range = score_range(lo, hi)?;
    let mut matched: Vec<(f64, Vec<u8>)> = db
        .zsorted(&argv[1], now_ms)?
        .into_iter()
        .filter(|(score, _)| range.contains(*score))
        .collect();
    if rev {
        matched.reverse();
    }
    Ok(pairs_reply(apply_limit(matched, limit), with_scores))
}

pub(crate) fn zrangebylex(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    rev: bool,
) -> Result<RespFrame, CommandError> {
    let name = if rev { "ZREVRANGEBYLEX" } else { "ZRANGEBYLEX" };
    if argv.len() < 4 {
        return Err(CommandError::WrongArity(name));
    }
    let mut limit: Option<(usize, i64)> = None;
    let mut i = 4;
    while i < argv.len() {
        if argv[i].eq_ignore_ascii_case(b"LIMIT") && i + 2 < argv.len() {
            limit = Some((parse_usize_arg(&argv[i + 1])?, parse_i64_arg(&argv[i + 2])?));
            i += 3;
        } else {
            return Err(CommandError::SyntaxError);
        }
    }
    let (lo, hi) = if rev { (&argv[3], &argv[2]) } else { (&argv[2], &argv[3]) };
    let range = lex_range(lo, hi)?;
    let mut matched: Vec<(f64, Vec<u8>)> = db
        .zsorted(&argv[1], now_ms)?
        .into_iter()
        .filter(|(_, member)| range.contains(member))
        .collect();
    if rev {
        matched.reverse();
    }
    Ok(pairs_reply(apply_limit(matched, limit), false))
}

pub(crate) fn zpop(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    min: bool,
) -> Result<RespFrame, CommandError> {
    let name = if min { "ZPOPMIN" } else { "ZPOPMAX" };
    if !(2..=3).contains(&argv.len()) {
        return Err(CommandError::WrongArity(name));
    }
    let count = argv.get(2).map(|arg| parse_usize_arg(arg)).transpose()?;
    let popped = db.zpop(&argv[1], min, count.unwrap_or(1), now_ms)?;
    Ok(pairs_reply(popped, true))
}

pub(crate) fn zrandmember(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if !(2..=4).contains(&argv.len()) {
        return Err(CommandError::WrongArity("ZRANDMEMBER"));
    }
    let pairs = db.zsorted(&argv[1], now_ms)?;
    let Some(count_arg) = argv.get(2) else {
        let mut rng = rand::thread_rng();
        return Ok(match pairs.as_slice() {
            [] => RespFrame::BulkString(None),
            items => {
                let (_, member) = &items[rng.gen_range(0..items.len())];
                RespFrame::BulkString(Some(member.clone()))
            }
        });
    };
    let count = parse_i64_arg(count_arg)?;
    let with_scores = match argv.get(3) {
        None => false,
        Some(arg) if arg.eq_ignore_ascii_case(b"WITHSCORES") => true,
        Some(_) => return Err(CommandError::SyntaxError),
    };
    let mut rng = rand::thread_rng();
    let picked: Vec<(f64, Vec<u8>)> = if pairs.is_empty() {
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
    Ok(pairs_reply(picked, with_scores))
}

pub(crate) fn zremrangebyrank(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("ZREMRANGEBYRANK"));
    }
    let start = parse_i64_arg(&argv[2])?;
    let stop = parse_i64_arg(&argv[3])?;
    let pairs = db.zsorted(&argv[1], now_ms)?;
    let doomed: Vec<Vec<u8>> = rank_slice(pairs, start, stop, false)
        .into_iter()
        .map(|(_, member)| member)
        .collect();
    let removed = db.zrem(&argv[1], &doomed, now_ms)?;
    Ok(RespFrame::Integer(removed as i64))
}

pub(crate) fn zremrangebyscore(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("ZREMRANGEBYSCORE"));
    }
    let range = score_range(&argv[2], &argv[3])?;
    let doomed: Vec<Vec<u8>> = db
        .zsorted(&argv[1], now_ms)?
        .into_iter()
        .filter(|(score, _)| range.contains(*score))
        .map(|(_, member)| member)
        .collect();
    let removed = db.zrem(&argv[1], &doomed, now_ms)?;
    Ok(RespFrame::Integer(removed as i64))
}

pub(crate) fn zremrangebylex(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("ZREMRANGEBYLEX"));
    }
    let range = lex_range(&argv[2], &argv[3])?;
    let doomed: Vec<Vec<u8>> = db
        .zsorted(&argv[1], now_ms)?
        .into_iter()
        .filter(|(_, member)| range.contains(member))
        .map(|(_, member)| member)
        .collect();
    let removed = db.zrem(&argv[1], &doomed, now_ms)?;
    Ok(RespFrame::Integer(removed as i64))
}

// ── aggregated set operations ────────────────────────────────────────

struct ZSetOpArgs {
    keys: Vec<Vec<u8>>,
    weights: Vec<f64>,
    aggregate: Aggregate,
    with_scores: bool,
}

fn parse_zsetop_args(
    argv: &[Vec<u8>],
    name: &'static str,
    keys_at: usize,
    allow_with_scores: bool,
) -> Result<ZSetOpArgs, CommandError> {
    let numkeys = parse_usize_arg(&argv[keys_at - 1])?;
    if numkeys == 0 {
        return Err(CommandError::Raw(format!(
            "ERR at least 1 input key is needed for '{}' command",
            name.to_ascii_lowercase(),
        )));
    }
    let keys_end = keys_at + numkeys;
    if argv.len() < keys_end {
        return Err(CommandError::SyntaxError);
    }
    let keys = argv[keys_at..keys_end].to_vec();
    let mut weights = vec![1.0; numkeys];
    let mut aggregate = Aggregate::Sum;
    let mut with_scores = false;

    let mut i = keys_end;
    while i < argv.len() {
        if argv[i].eq_ignore_ascii_case(b"WEIGHTS") {
            if argv.len() < i + 1 + numkeys {
                return Err(CommandError::SyntaxError);
            }
            for (w, arg) in weights.iter_mut().zip(&argv[i + 1..i + 1 + numkeys]) {
                *w = parse_f64_arg(arg).map_err(|_| {
                    CommandError::Raw("ERR weight value is not a float".to_string())
                })?;
            }
            i += 1 + numkeys;
        } else if argv[i].eq_ignore_ascii_case(b"AGGREGATE") && i + 1 < argv.len() {
            let mode = &argv[i + 1];
            aggregate = if mode.eq_ignore_ascii_case(b"SUM") {
                Aggregate::Sum
            } else if mode.eq_ignore_ascii_case(b"MIN") {
                Aggregate::Min
            } else if mode.eq_ignore_ascii_case(b"MAX") {
                Aggregate::Max
            } else {
                return Err(CommandError::SyntaxError);
            };
            i += 2;
        } else if allow_with_scores && argv[i].eq_ignore_ascii_case(b"WITHSCORES") {
            with_scores = true;
            i += 1;
        } else {
            return Err(CommandError::SyntaxError);
        }
    }
    Ok(ZSetOpArgs { keys, weights, aggregate, with_scores })
}

/// A weighted score of NaN (0 * inf) collapses to 0, as the reference does.
fn weighted(score: f64, weight: f64) -> f64 {
    let scaled = score * weight;
    if scaled.is_nan() { 0.0 } else { scaled }
}

fn combine(acc: f64, next: f64, aggregate: Aggregate) -> f64 {
    let combined = match aggregate {
        Aggregate::Sum => acc + next,
        Aggregate::Min => acc.min(next),
        Aggregate::Max => acc.max(next),
    };
    if combined.is_nan() { 0.0 } else { combined }
}

fn zsetop_compute(
    db: &mut Db,
    args: &ZSetOpArgs,
    op: SetOp,
    now_ms: u64,
) -> Result<HashMap<Vec<u8>, f64>, CommandError> {
    let mut acc: HashMap<Vec<u8>, f64> = HashMap::new();
    let mut seen_in: HashMap<Vec<u8>, usize> = HashMap::new();
    for (key, weight) in args.keys.iter().zip(&args.weights) {
        let Some(pairs) = db.zset_source_pairs(key, now_ms)? else {
            continue;
        };
        for (score, member) in pairs {
            let scaled = weighted(score, *weight);
            *seen_in.entry(member.clone()).or_insert(0) += 1;
            match acc.entry(member) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(scaled);
                }
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    let combined = combine(*slot.get(), scaled, args.aggregate);
                    slot.insert(combined);
                }
            }
        }
    }
    if op == SetOp::Inter {
        let needed = args.keys.len();
        acc.retain(|member, _| seen_in.get(member).copied().unwrap_or(0) == needed);
    }
    Ok(acc)
}

fn sorted_pairs(map: HashMap<Vec<u8>, f64>) -> Vec<(f64, Vec<u8>)> {
    let mut pairs: Vec<(f64, Vec<u8>)> =
        map.into_iter().map(|(member, score)| (score, member)).collect();
    pairs.sort_by(|(s1, m1), (s2, m2)| s1.total_cmp(s2).then_with(|| m1.cmp(m2)));
    pairs
}

pub(crate) fn zsetop_store(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    op: SetOp,
) -> Result<RespFrame, CommandError> {
    let name = match op {
        SetOp::Union => "ZUNIONSTORE",
        SetOp::Inter => "ZINTERSTORE",
    };
    if argv.len() < 4 {
        return Err(CommandError::WrongArity(name));
    }
    let args = parse_zsetop_args(argv, name, 3, false)?;
    let combined = zsetop_compute(db, &args, op, now_ms)?;
    let event = match op {
        SetOp::Union => "zunionstore",
        SetOp::Inter => "zinterstore",
    };
    let len = db.zset_store(&argv[1], combined, event, now_ms);
    Ok(RespFrame::Integer(len as i64))
}

pub(crate) fn zsetop(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    op: SetOp,
) -> Result<RespFrame, CommandError> {
    let name = match op {
        SetOp::Union => "ZUNION",
        SetOp::Inter => "ZINTER",
    };
    if argv.len() < 3 {
        return Err(CommandError::WrongArity(name));
    }
    let args = parse_zsetop_args(argv, name, 2, true)?;
    let combined = zsetop_compute(db, &args, op, now_ms)?;
    Ok(pairs_reply(sorted_pairs(combined), args.with_scores))
}

fn zdiff_compute(
    db: &mut Db,
    keys: &[Vec<u8>],
    now_ms: u64,
) -> Result<HashMap<Vec<u8>, f64>, CommandError> {
    let mut iter = keys.iter();
    let Some(first) = iter.next() else {
        return Ok(HashMap::new());
    };
    let mut acc: HashMap<Vec<u8>, f64> = db
        .zset_source_pairs(first, now_ms)?
        .unwrap_or_default()
        .into_iter()
        .map(|(score, member)| (member, score))
        .collect();
    for key in iter {
        if let Some(pairs) = db.zset_source_pairs(key, now_ms)? {
            for (_, member) in pairs {
                acc.remove(&member);
            }
        }
    }
    Ok(acc)
}

pub(crate) fn zdiff(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("ZDIFF"));
    }
    let numkeys = parse_usize_arg(&argv[1])?;
    let keys_end = 2 + numkeys;
    if numkeys == 0 || argv.len() < keys_end {
        return Err(CommandError::SyntaxError);
    }
    let with_scores = match argv.get(keys_end) {
        None => false,
        Some(arg) if arg.eq_ignore_ascii_case(b"WITHSCORES") => true,
        Some(_) => return Err(CommandError::SyntaxError),
    };
    let combined = zdiff_compute(db, &argv[2..keys_end], now_ms)?;
    Ok(pairs_reply(sorted_pairs(combined), with_scores))
}

pub(crate) fn zdiffstore(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 4 {
        return Err(CommandError::WrongArity("ZDIFFSTORE"));
    }
    let numkeys = parse_usize_arg(&argv[2])?;
    let keys_end = 3 + numkeys;
    if numkeys == 0 || argv.len() != keys_end {
        return Err(CommandError::SyntaxError);
    }
    let combined = zdiff_compute(db, &argv[3..keys_end], now_ms)?;
    let len = db.zset_store(&argv[1], combined, "zdiffstore", now_ms);
    Ok(RespFrame::Integer(len as i64))
}

pub(crate) fn zscan(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("ZSCAN"));
    }
    let cursor = parse_cursor(&argv[2])?;
    let (pattern, count) = parse_scan_args(argv, 3)?;
    let (next_cursor, pairs) = db.zscan(&argv[1], cursor, pattern.as_deref(), count, now_ms)?;
    let mut items = Vec::with_capacity(pairs.len() * 2);
    for (score, member) in pairs {
        items.push(RespFrame::BulkString(Some(member)));
        items.push(RespFrame::BulkString(Some(format_score(score))));
    }
    Ok(RespFrame::Array(Some(vec![
        RespFrame::BulkString(Some(next_cursor.to_string().into_bytes())),
        RespFrame::Array(Some(items)),
    ])))
}
