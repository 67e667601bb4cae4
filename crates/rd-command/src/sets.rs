//! Set and hyperloglog command handlers.

use rd_protocol::RespFrame;
use rd_store::Db;

use crate::{
    CommandError, frames_from_bulks, parse_cursor, parse_i64_arg, parse_scan_args,
    parse_usize_arg,
};

pub(crate) fn sadd(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("SADD"));
    }
    let added = db.sadd(&argv[1], &argv[2..], now_ms)?;
    Ok(RespFrame::Integer(added as i64))
}

pub(crate) fn srem(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("SREM"));
    }
    let removed = db.srem(&argv[1], &argv[2..], now_ms)?;
    Ok(RespFrame::Integer(removed as i64))
}

pub(crate) fn smembers(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("SMEMBERS"));
    }
    let members = db.smembers(&argv[1], now_ms)?;
    Ok(RespFrame::Set(
        members
            .into_iter()
            .map(|member| RespFrame::BulkString(Some(member)))
            .collect(),
    ))
}

pub(crate) fn scard(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 2 {
        return Err(CommandError::WrongArity("SCARD"));
    }
    Ok(RespFrame::Integer(db.scard(&argv[1], now_ms)? as i64))
}

pub(crate) fn sismember(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 3 {
        return Err(CommandError::WrongArity("SISMEMBER"));
    }
    Ok(RespFrame::Integer(i64::from(
        db.sismember(&argv[1], &argv[2], now_ms)?,
    )))
}

pub(crate) fn smismember(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("SMISMEMBER"));
    }
    let mut out = Vec::with_capacity(argv.len() - 2);
    for member in &argv[2..] {
        out.push(RespFrame::Integer(i64::from(
            db.sismember(&argv[1], member, now_ms)?,
        )));
    }
    Ok(RespFrame::Array(Some(out)))
}

pub(crate) fn srandmember(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if !(2..=3).contains(&argv.len()) {
        return Err(CommandError::WrongArity("SRANDMEMBER"));
    }
    match argv.get(2) {
        None => {
            let mut members = db.srandmember(&argv[1], 1, now_ms)?;
            Ok(match members.pop() {
                Some(member) => RespFrame::BulkString(Some(member)),
                None => RespFrame::BulkString(None),
            })
        }
        Some(count_arg) => {
            let count = parse_i64_arg(count_arg)?;
            Ok(frames_from_bulks(db.srandmember(&argv[1], count, now_ms)?))
        }
    }
}

pub(crate) fn spop(argv: &[Vec<u8>], db: &mut Db, now_ms: u64) -> Result<RespFrame, CommandError> {
    if !(2..=3).contains(&argv.len()) {
        return Err(CommandError::WrongArity("SPOP"));
    }
    match argv.get(2) {
        None => {
            let popped = db.spop(&argv[1], 1, now_ms)?;
            Ok(match popped.and_then(|mut items| items.pop()) {
                Some(member) => RespFrame::BulkString(Some(member)),
                None => RespFrame::BulkString(None),
            })
        }
        Some(count_arg) => {
            let count = parse_usize_arg(count_arg)?;
            let popped = db.spop(&argv[1], count, now_ms)?.unwrap_or_default();
            Ok(RespFrame::Set(
                popped
                    .into_iter()
                    .map(|member| RespFrame::BulkString(Some(member)))
                    .collect(),
            ))
        }
    }
}

pub(crate) fn smove(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() != 4 {
        return Err(CommandError::WrongArity("SMOVE"));
    }
    let moved = db.smove(&argv[1], &argv[2], &argv[3], now_ms)?;
    Ok(RespFrame::Integer(i64::from(moved)))
}

fn set_reply(members: Vec<Vec<u8>>) -> RespFrame {
    RespFrame::Set(
        members
            .into_iter()
            .map(|member| RespFrame::BulkString(Some(member)))
            .collect(),
    )
}

pub(crate) fn sinter(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 2 {
        return Err(CommandError::WrongArity("SINTER"));
    }
    Ok(set_reply(db.sinter(&argv[1..], now_ms)?))
}

pub(crate) fn sunion(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 2 {
        return Err(CommandError::WrongArity("SUNION"));
    }
    Ok(set_reply(db.sunion(&argv[1..], now_ms)?))
}

pub(crate) fn sdiff(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 2 {
        return Err(CommandError::WrongArity("SDIFF"));
    }
    Ok(set_reply(db.sdiff(&argv[1..], now_ms)?))
}

pub(crate) fn sinterstore(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("SINTERSTORE"));
    }
    let members = db.sinter(&argv[2..], now_ms)?;
    Ok(RespFrame::Integer(
        db.set_store(&argv[1], members, "sinterstore", now_ms) as i64,
    ))
}

pub(crate) fn sunionstore(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("SUNIONSTORE"));
    }
    let members = db.sunion(&argv[2..], now_ms)?;
    Ok(RespFrame::Integer(
        db.set_store(&argv[1], members, "sunionstore", now_ms) as i64,
    ))
}

pub(crate) fn sdiffstore(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("SDIFFSTORE"));
    }
    let members = db.sdiff(&argv[2..], now_ms)?;
    Ok(RespFrame::Integer(
        db.set_store(&argv[1], members, "sdiffstore", now_ms) as i64,
    ))
}

pub(crate) fn sintercard(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("SINTERCARD"));
    }
    let numkeys = parse_usize_arg(&argv[1])?;
    if numkeys == 0 {
        return Err(CommandError::Raw(
            "ERR numkeys should be greater than 0".to_string(),
        ));
    }
    let keys_end = 2 + numkeys;
    if argv.len() < keys_end {
        return Err(CommandError::SyntaxError);
    }
    let keys = &argv[2..keys_end];
    let limit = match argv.get(keys_end) {
        None => None,
        Some(arg) if arg.eq_ignore_ascii_case(b"LIMIT") => {
            let value = argv.get(keys_end + 1).ok_or(CommandError::SyntaxError)?;
            if argv.len() > keys_end + 2 {
                return Err(CommandError::SyntaxError);
            }
            Some(parse_usize_arg(value)?)
        }
        Some(_) => return Err(CommandError::SyntaxError),
    };
    Ok(RespFrame::Integer(
        db.sintercard(keys, limit, now_ms)? as i64,
    ))
}

pub(crate) fn sscan(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 3 {
        return Err(CommandError::WrongArity("SSCAN"));
    }
    let cursor = parse_cursor(&argv[2])?;
    let (pattern, count) = parse_scan_args(argv, 3)?;
    let (next_cursor, members) =
        db.sscan(&argv[1], cursor, pattern.as_deref(), count, now_ms)?;
    Ok(RespFrame::Array(Some(vec![
        RespFrame::BulkString(Some(next_cursor.to_string().into_bytes())),
        frames_from_bulks(members),
    ])))
}

// ── hyperloglog ──────────────────────────────────────────────────────

pub(crate) fn pfadd(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 2 {
        return Err(CommandError::WrongArity("PFADD"));
    }
    let changed = db.pfadd(&argv[1], &argv[2..], now_ms)?;
    Ok(RespFrame::Integer(i64::from(changed)))
}

pub(crate) fn pfcount(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 2 {
        return Err(CommandError::WrongArity("PFCOUNT"));
    }
    Ok(RespFrame::Integer(db.pfcount(&argv[1..], now_ms)? as i64))
}

pub(crate) fn pfmerge(
    argv: &[Vec<u8>],
    db: &mut Db,
    now_ms: u64,
) -> Result<RespFrame, CommandError> {
    if argv.len() < 2 {
        return Err(CommandError::WrongArity("PFMERGE"));
    }
    db.pfmerge(&argv[1], &argv[2..], now_ms)?;
    Ok(RespFrame::ok())
}

#[cfg(test)]
mod tests {
    use rd_protocol::RespFrame;
    use rd_store::Db;

    use crate::test_support::run;

    fn set_of(items: &[&[u8]]) -> RespFrame {
        RespFrame::Set(
            items
                .iter()
                .map(|item| RespFrame::BulkString(Some(item.to_vec())))
                .collect(),
        )
    }

    #[test]
    fn sadd_and_membership() {
        let mut db = Db::new();
        assert_eq!(
            run(&mut db, 0, &[b"SADD", b"s", b"a", b"b", b"a"]),
            RespFrame::Integer(2),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SISMEMBER", b"s", b"a"]),
            RespFrame::Integer(1),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SMISMEMBER", b"s", b"a", b"zz"]),
            RespFrame::Array(Some(vec![RespFrame::Integer(1), RespFrame::Integer(0)])),
        );
        assert_eq!(run(&mut db, 0, &[b"SCARD", b"s"]), RespFrame::Integer(2));
        assert_eq!(
            run(&mut db, 0, &[b"SMEMBERS", b"s"]),
            set_of(&[b"a", b"b"]),
        );
    }

    #[test]
    fn srem_removes_empty_set() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"SADD", b"s", b"a"]);
        assert_eq!(
            run(&mut db, 0, &[b"SREM", b"s", b"a", b"zz"]),
            RespFrame::Integer(1),
        );
        assert_eq!(run(&mut db, 0, &[b"EXISTS", b"s"]), RespFrame::Integer(0));
    }

    #[test]
    fn set_algebra_and_stores() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"SADD", b"a", b"1", b"2", b"3"]);
        run(&mut db, 0, &[b"SADD", b"b", b"2", b"3", b"4"]);
        assert_eq!(
            run(&mut db, 0, &[b"SINTER", b"a", b"b"]),
            set_of(&[b"2", b"3"]),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SDIFF", b"a", b"b"]),
            set_of(&[b"1"]),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SUNIONSTORE", b"dest", b"a", b"b"]),
            RespFrame::Integer(4),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SINTERSTORE", b"dest", b"a", b"nope"]),
            RespFrame::Integer(0),
        );
        // Empty store result removed the destination.
        assert_eq!(run(&mut db, 0, &[b"EXISTS", b"dest"]), RespFrame::Integer(0));
    }

    #[test]
    fn sintercard_limits() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"SADD", b"a", b"1", b"2", b"3"]);
        run(&mut db, 0, &[b"SADD", b"b", b"2", b"3", b"4"]);
        assert_eq!(
            run(&mut db, 0, &[b"SINTERCARD", b"2", b"a", b"b"]),
            RespFrame::Integer(2),
        );
        assert_eq!(
            run(&mut db, 0, &[b"SINTERCARD", b"2", b"a", b"b", b"LIMIT", b"1"]),
            RespFrame::Integer(1),
        );
        let reply = run(&mut db, 0, &[b"SINTERCARD", b"0", b"a"]);
        assert!(matches!(reply, RespFrame::Error(text) if text.contains("numkeys")));
    }

    #[test]
    fn spop_and_srandmember() {
        let mut db = Db::new();
        run(&mut db, 0, &[b"SADD", b"s", b"a", b"b", b"c"]);
        let RespFrame::BulkString(Some(_)) = run(&mut db, 0, &[b"SPOP", b"s"]) else {
            panic!("expected a member");
        };
        let RespFrame::Set(popped) = run(&mut db, 0, &[b"SPOP", b"s", b"5"]) else {
            panic!("expected set reply");
        };
        assert_eq!(popped.len(), 2);
        assert_eq!(run(&mut db, 0, &[b"EXISTS", b"s"]), RespFrame::Integer(0));
        assert_eq!(
            run(&mut db, 0, &[b"SRANDMEMBER", b"s"]),
            RespFrame::BulkString(None),
        );
    }

    #[test]
    fn hll_exact_counts() {
        let mut db = Db::new();
        assert_eq!(
            run(&mut db, 0, &[b"PFADD", b"p", b"a", b"b", b"c"]),
            RespFrame::Integer(1),
        );
        assert_eq!(
            run(&mut db, 0, &[b"PFADD", b"p", b"a"]),
            RespFrame::Integer(0),
        );
        assert_eq!(run(&mut db, 0, &[b"PFCOUNT", b"p"]), RespFrame::Integer(3));
        run(&mut db, 0, &[b"PFADD", b"q", b"c", b"d"]);
        assert_eq!(
            run(&mut db, 0, &[b"PFCOUNT", b"p", b"q"]),
            RespFrame::Integer(4),
        );
        assert_eq!(run(&mut db, 0, &[b"PFMERGE", b"dst", b"p", b"q"]), RespFrame::ok());
        assert_eq!(run(&mut db, 0, &[b"PFCOUNT", b"dst"]), RespFrame::Integer(4));
        // TYPE reports string, like the reference's HLL-as-string.
        assert_eq!(
            run(&mut db, 0, &[b"TYPE", b"dst"]),
            RespFrame::SimpleString("string".to_string()),
        );
    }
}
