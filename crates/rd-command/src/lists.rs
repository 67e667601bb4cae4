//! List command handlers. The blocking variants live in the runtime, which
//! retries these non-blocking forms when a key becomes ready.

use rd_protocol::RespFrame;
use rd_store::Db;

use crate::{CommandError, frames_from_bulks, parse_i64_arg, parse_usize_arg};

pub(crate) fn push(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    left: bool,
    create: bool,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity(match (left, create) {
            (true, true) => "LPUSH",
            (false, true) => "RPUSH",
            (true, false) => "LPUSHX",
            (false, false) => "RPUSHX",
        }));
    }
    let len = db.list_push(&argv[1], &argv[2..], left, create, now_ms)?;
    Ok(RespFrame::Integer(len as i64))
}

pub(crate) fn pop(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
    left: bool,
) -> Result<RespFrame, CommandError> {
    let name = if left { "LPOP" } else { "RPOP" };
    if !(2..=3).contains(&argv.len()) {
        return Err(CommandError::WrongArity(name));
    }
    let count = argv.get(2).map(|arg| parse_usize_arg(arg)).transpose()?;
    match count {
        None => {
            let popped = db.list_pop(&argv[1], left, 1, now_ms)?;
            Ok(match popped.and_then(|mut items| items.pop()) {
                Some(item) => RespFrame::BulkString(Some(item)),
                None => RespFrame::BulkString(None),
            })
        }
        Some(count) => {
            let popped = db.list_pop(&argv[1], left, count, now_ms)?;
            Ok(match popped {
                Some(items) => frames_from_bulks(items),
                None => RespFrame::Array(None),
            })
        }
    }
}

pub(crate) fn llen(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("LLEN"));
    }
    Ok(RespFrame::Integer(db.llen(&argv[1], now_ms)? as i64))
}

pub(crate) fn lrange(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("LRANGE"));
    }
    let start = parse_i64_arg(&argv[2])?;
    let end = parse_i64_arg(&argv[3])?;
    Ok(frames_from_bulks(db.lrange(&argv[1], start, end, now_ms)?))
}

pub(crate) fn lindex(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("LINDEX"));
    }
    let index = parse_i64_arg(&argv[2])?;
    Ok(RespFrame::BulkString(db.lindex(&argv[1], index, now_ms)?))
}

pub(crate) fn lset(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("LSET"));
    }
    let index = parse_i64_arg(&argv[2])?;
    db.lset(&argv[1], index, argv[3].clone(), now_ms)?;
    Ok(RespFrame::ok())
}

pub(crate) fn ltrim(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("LTRIM"));
    }
    let start = parse_i64_arg(&argv[2])?;
    let end = parse_i64_arg(&argv[3])?;
    db.ltrim(&argv[1], start, end, now_ms)?;
    Ok(RespFrame::ok())
}

pub(crate) fn lrem(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("LREM"));
    }
    let count = parse_i64_arg(&argv[2])?;
    let removed = db.lrem(&argv[1], count, &argv[3], now_ms)?;
    Ok(RespFrame::Integer(removed as i64))
}

pub(crate) fn linsert(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 5 {
        return Err(CommandError::WrongArity("LINSERT"));
    }
    let before = if argv[2].eq_ignore_ascii_case(b"BEFORE") {
        true
    } else if argv[2].eq_ignore_ascii_case(b"AFTER") {
        false
    } else {
        return Err(CommandError::SyntaxError);
    };
    let len = db.linsert(&argv[1], before, &argv[3], argv[4].clone(), now_ms)?;
    Ok(RespFrame::Integer(len))
}

pub(crate) fn lpos(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("LPOS"));
    }
    let mut rank = 1_i64;
    let mut count: Option<usize> = None;
    let mut i = 3;
    while i < argv.len() {
        if argv[i].eq_ignore_ascii_case(b"RANK") && i + 1 < argv.len() {
            rank = parse_i64_arg(&argv[i + 1])?;
            if rank == 0 {
                return Err(CommandError::Raw(
                    "ERR RANK can't be zero. Use 1 to start searching from the first matching element, or the negative rank to start searching from the end.".to_string(),
                ));
            }
            i += 2;
        } else if argv[i].eq_ignore_ascii_case(b"COUNT") && i + 1 < argv.len() {
            count = Some(parse_usize_arg(&argv[i + 1])?);
            i += 2;
        } else if argv[i].eq_ignore_ascii_case(b"MAXLEN") && i + 1 < argv.len() {
            // Accepted for compatibility; the emulator always scans fully.
            parse_usize_arg(&argv[i + 1])?;
            i += 2;
        } else {
            return Err(CommandError::SyntaxError);
        }
    }
    let positions = db.lpos(&argv[1], &argv[2], rank, count, now_ms)?;
    if count.is_none() {
        return Ok(match positions.first() {
            Some(&pos) => RespFrame::Integer(pos as i64),
            None => RespFrame::BulkString(None),
        });
    }
    Ok(RespFrame::Array(Some(
        positions
            .into_iter()
            .map(|pos| RespFrame::Integer(pos as i64))
            .collect(),
    )))
}

pub(crate) fn lmove(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 5 {
        return Err(CommandError::WrongArity("LMOVE"));
    }
    let from_left = parse_direction(&argv[3])?;
    let to_left = parse_direction(&argv[4])?;
    let moved = db.lmove(&argv[1], &argv[2], from_left, to_left, now_ms)?;
    Ok(RespFrame::BulkString(moved))
}

pub(crate) fn rpoplpush(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("RPOPLPUSH"));
    }
    let moved = db.lmove(&argv[1], &argv[2], false, true, now_ms)?;
    Ok(RespFrame::BulkString(moved))
}

fn parse_direction(arg: &[u8]) -> Result<bool, CommandError> {
    if arg.eq_ignore_ascii_case(b"LEFT") {
        Ok(true)
    } else if arg.eq_ignore_ascii_case(b"RIGHT") {
        Ok(false)
    } else {
        Err(CommandError::SyntaxError)
    }
}

#[cfg(test)]
mod tests {
    use rd_protocol::RespFrame;
    use rd_store::Db;

    use crate::test_support::{bulk_array, run};

    #[test]
    fn push_pop_roundtrip() {
        let mut db = Db::new();
        assert_eq!(
            run(&mut db, 0, &[b"RPUSH", b"l", b"a", b"b", b"c"]),
            RespFrame::Integer(3),
        );
        assert_eq!(
            run(&mut db, 0, &[b"LPOP", b"l"]),
            RespFrame::bulk(*b"a"),
        );
        assert_eq!(
            run(&mut db, 0, &[b"RPOP", b"l", b"2"]),
            bulk_array(&[b"c", b"b"]),
        );
        assert_eq!(run(&mut db, 0, &[b"LLEN", b"l"]), RespFrame::Integer(0));
        assert_eq!(
            run(&mut db, 0, &[b"LPOP", b"l"]),
            RespFrame::BulkString(None),
        );
        assert_eq!(
            run(&mut db, 0, &[b"LPOP", b"l", b"3"]),
            RespFrame::Array(None),
        );
    }

    #[test]
    fn pushx_only_touches_existing_lists() {
        let mut db = Db::new();
        assert_eq!(
            run(&mut db, 0, &[b"LPUSHX", b"l", b"x"]),
            RespFrame::Integer(0),
        );
        run(&mut db, 0, &[b"RPUSH", b"l", b"a"]);
        assert_eq!(
            run(&mut db, 0, &[b"RPUSHX", b"l", b"b"]),
            RespFrame::Integer(2),
        );
    }

    #[test]
    fn linsert_and_lset() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"RPUSH", b"l", b"Hello", b"World"]);
        assert_eq!(
            run(&mut db, 0, &[b"LINSERT", b"l", b"BEFORE", b"World", b"There"]),
            RespFrame::Integer(3),
        );
        assert_eq!(run(&mut db, 0, &[b"LSET", b"l", b"-1", b"Redis"]), RespFrame::ok());
        assert_eq!(
            run(&mut db, 0, &[b"LRANGE", b"l", b"0", b"-1"]),
            bulk_array(&[b"Hello", b"There", b"Redis"]),
        );
        assert_eq!(
            run(&mut db, 0, &[b"LSET", b"l", b"99", b"x"]),
            RespFrame::Error("ERR index out of range".to_string()),
        );
        assert_eq!(
            run(&mut db, 0, &[b"LSET", b"ghost", b"0", b"x"]),
            RespFrame::Error("ERR no such key".to_string()),
        );
    }

    #[test]
    fn lpos_options() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"RPUSH", b"l", b"a", b"b", b"c", b"b"]);
        assert_eq!(run(&mut db, 0, &[b"LPOS", b"l", b"b"]), RespFrame::Integer(1));
        assert_eq!(
            run(&mut db, 0, &[b"LPOS", b"l", b"b", b"RANK", b"-1"]),
            RespFrame::Integer(3),
        );
        assert_eq!(
            run(&mut db, 0, &[b"LPOS", b"l", b"b", b"COUNT", b"0"]),
            RespFrame::Array(Some(vec![RespFrame::Integer(1), RespFrame::Integer(3)])),
        );
        assert_eq!(
            run(&mut db, 0, &[b"LPOS", b"l", b"zz"]),
            RespFrame::BulkString(None),
        );
        let reply = run(&mut db, 0, &[b"LPOS", b"l", b"b", b"RANK", b"0"]);
        assert!(matches!(reply, RespFrame::Error(text) if text.starts_with("ERR RANK")));
    }

    #[test]
    fn lmove_directions() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"RPUSH", b"src", b"a", b"b", b"c"]);
        assert_eq!(
            run(&mut db, 0, &[b"LMOVE", b"src", b"dst", b"LEFT", b"RIGHT"]),
            RespFrame::bulk(*b"a"),
        );
        assert_eq!(
            run(&mut db, 0, &[b"RPOPLPUSH", b"src", b"dst"]),
            RespFrame::bulk(*b"c"),
        );
        assert_eq!(
            run(&mut db, 0, &[b"LRANGE", b"dst", b"0", b"-1"]),
            bulk_array(&[b"c", b"a"]),
        );
        assert_eq!(
            run(&mut db, 0, &[b"LMOVE", b"ghost", b"dst", b"LEFT", b"LEFT"]),
            RespFrame::BulkString(None),
        );
    }

    #[test]
    fn ltrim_and_lrem() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"RPUSH", b"l", b"a", b"b", b"a", b"c", b"a"]);
        assert_eq!(
            run(&mut db, 0, &[b"LREM", b"l", b"-2", b"a"]),
            RespFrame::Integer(2),
        );
        assert_eq!(
            run(&mut db, 0, &[b"LRANGE", b"l", b"0", b"-1"]),
            bulk_array(&[b"a", b"b", b"c"]),
        );
        assert_eq!(run(&mut db, 0, &[b"LTRIM", b"l", b"1", b"-1"]), RespFrame::ok());
        assert_eq!(
            run(&mut db, 0, &[b"LRANGE", b"l", b"0", b"-1"]),
            bulk_array(&[b"b", b"c"]),
        );
    }
}
