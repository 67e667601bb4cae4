//! The blocking coordinator. A suspended command is a waiter: the operation
//! it will retry, a one-shot channel for the reply, and a FIFO slot on every
//! key it watches. Mutators service waiters while they still hold the
//! executor; the blocked thread itself only parks on its channel.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc;

use rd_command::entries_frame;
use rd_protocol::RespFrame;
use rd_store::{Db, GroupRead, StreamId};

/// What a suspended command will re-attempt when its key becomes ready.
#[derive(Debug, Clone)]
pub(crate) enum BlockedOp {
    /// BLPOP/BRPOP over an ordered key list.
    ListPop { keys: Vec<Vec<u8>>, left: bool },
    /// BLMOVE/BRPOPLPUSH, waiting on the source.
    ListMove {
        source: Vec<u8>,
        destination: Vec<u8>,
        from_left: bool,
        to_left: bool,
    },
    /// XREAD BLOCK: per-stream resume positions resolved at registration.
    StreamRead {
        streams: Vec<(Vec<u8>, StreamId)>,
        count: usize,
    },
    /// XREADGROUP BLOCK with the `>` cursor.
    StreamReadGroup {
        group: Vec<u8>,
        consumer: Vec<u8>,
        streams: Vec<Vec<u8>>,
        count: usize,
        noack: bool,
    },
}

impl BlockedOp {
    /// The keys this waiter must be registered under.
    pub(crate) fn keys(&self) -> Vec<Vec<u8>> {
        match self {
            Self::ListPop { keys, .. } => keys.clone(),
            Self::ListMove { source, .. } => vec![source.clone()],
            Self::StreamRead { streams, .. } => {
                streams.iter().map(|(key, _)| key.clone()).collect()
            }
            Self::StreamReadGroup { streams, .. } => streams.clone(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Waiter {
    pub(crate) client_id: u64,
    pub(crate) db_index: usize,
    pub(crate) op: BlockedOp,
    pub(crate) tx: mpsc::Sender<RespFrame>,
}

#[derive(Debug, Default)]
pub(crate) struct BlockingCoordinator {
    /// FIFO of waiter ids per (db, key). Stale ids are skipped lazily.
    by_key: HashMap<(usize, Vec<u8>), VecDeque<u64>>,
    waiters: HashMap<u64, Waiter>,
    next_id: u64,
}

impl BlockingCoordinator {
    pub(crate) fn register(&mut self, waiter: Waiter) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        for key in waiter.op.keys() {
            self.by_key
                .entry((waiter.db_index, key))
                .or_default()
                .push_back(id);
        }
        self.waiters.insert(id, waiter);
        id
    }

    /// Remove one waiter (timeout path). Returns true if it was still
    /// registered, false if a mutator already claimed it.
    pub(crate) fn cancel(&mut self, id: u64) -> bool {
        self.waiters.remove(&id).is_some()
    }

    /// Remove everything a disconnecting client was waiting on.
    pub(crate) fn cancel_client(&mut self, client_id: u64) {
        self.waiters.retain(|_, waiter| waiter.client_id != client_id);
    }

    /// Drop all waiters, sending each a null reply (CLIENT UNPAUSE).
    pub(crate) fn cancel_all(&mut self) {
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.tx.send(RespFrame::Array(None));
        }
        self.by_key.clear();
    }

    pub(crate) fn has_waiters(&self, db_index: usize, key: &[u8]) -> bool {
        if self.waiters.is_empty() {
            return false;
        }
        self.by_key
            .get(&(db_index, key.to_vec()))
            .is_some_and(|queue| queue.iter().any(|id| self.waiters.contains_key(id)))
    }

    /// Pop the earliest still-live waiter registered on this key.
    pub(crate) fn pop_waiter(&mut self, db_index: usize, key: &[u8]) -> Option<(u64, Waiter)> {
        let queue = self.by_key.get_mut(&(db_index, key.to_vec()))?;
        while let Some(id) = queue.pop_front() {
            if let Some(waiter) = self.waiters.remove(&id) {
                return Some((id, waiter));
            }
        }
        None
    }

    /// Put back a waiter whose predicate was not satisfied after all,
    /// keeping its id (the blocked thread cancels by id on timeout) and
    /// re-taking the front of the triggering key's FIFO.
    pub(crate) fn requeue_front(&mut self, db_index: usize, key: &[u8], id: u64, waiter: Waiter) {
        for waiter_key in waiter.op.keys() {
            let queue = self.by_key.entry((db_index, waiter_key.clone())).or_default();
            if waiter_key == key {
                queue.push_front(id);
            } else {
                queue.push_back(id);
            }
        }
        self.waiters.insert(id, waiter);
    }

    /// Kill-path cancellation: each removed waiter gets a null reply so a
    /// parked thread does not hang forever.
    pub(crate) fn cancel_client_notify(&mut self, client_id: u64) {
        let doomed: Vec<u64> = self
            .waiters
            .iter()
            .filter(|(_, waiter)| waiter.client_id == client_id)
            .map(|(id, _)| *id)
            .collect();
        for id in doomed {
            if let Some(waiter) = self.waiters.remove(&id) {
                let _ = waiter.tx.send(RespFrame::Array(None));
            }
        }
    }
}

/// Attempt a suspended operation against the database. `None` means the
/// predicate still does not hold.
pub(crate) fn attempt(op: &BlockedOp, db: &mut Db, now_ms: u64) -> Option<RespFrame> {
    match op {
        BlockedOp::ListPop { keys, left } => {
            for key in keys {
                match db.list_pop(key, *left, 1, now_ms) {
                    Ok(Some(mut items)) => {
                        let value = items.pop()?;
                        return Some(RespFrame::Array(Some(vec![
                            RespFrame::BulkString(Some(key.clone())),
                            RespFrame::BulkString(Some(value)),
                        ])));
                    }
                    Ok(None) => {}
                    Err(err) => return Some(rd_command::command_error_to_resp(err.into())),
                }
            }
            None
        }
        BlockedOp::ListMove {
            source,
            destination,
            from_left,
            to_left,
        } => match db.lmove(source, destination, *from_left, *to_left, now_ms) {
            Ok(Some(value)) => Some(RespFrame::BulkString(Some(value))),
            Ok(None) => None,
            Err(err) => Some(rd_command::command_error_to_resp(err.into())),
        },
        BlockedOp::StreamRead { streams, count } => {
            let mut ready = Vec::new();
            for (key, after) in streams {
                match db.xread_after(key, *after, *count, now_ms) {
                    Ok(entries) if !entries.is_empty() => {
                        ready.push(RespFrame::Array(Some(vec![
                            RespFrame::BulkString(Some(key.clone())),
                            entries_frame(&entries),
                        ])));
                    }
                    Ok(_) => {}
                    Err(err) => return Some(rd_command::command_error_to_resp(err.into())),
                }
            }
            if ready.is_empty() {
                None
            } else {
                Some(RespFrame::Array(Some(ready)))
            }
        }
        BlockedOp::StreamReadGroup {
            group,
            consumer,
            streams,
            count,
            noack,
        } => {
            let mut ready = Vec::new();
            for key in streams {
                match db.xreadgroup(
                    key,
                    group,
                    consumer,
                    GroupRead::NewEntries,
                    *count,
                    *noack,
                    now_ms,
                ) {
                    Ok(entries) if !entries.is_empty() => {
                        ready.push(RespFrame::Array(Some(vec![
                            RespFrame::BulkString(Some(key.clone())),
                            entries_frame(&entries),
                        ])));
                    }
                    Ok(_) => {}
                    Err(err) => return Some(rd_command::command_error_to_resp(err.into())),
                }
            }
            if ready.is_empty() {
                None
            } else {
                Some(RespFrame::Array(Some(ready)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_waiter(client_id: u64, keys: &[&[u8]]) -> (Waiter, mpsc::Receiver<RespFrame>) {
        let (tx, rx) = mpsc::channel();
        (
            Waiter {
                client_id,
                db_index: 0,
                op: BlockedOp::ListPop {
                    keys: keys.iter().map(|k| k.to_vec()).collect(),
                    left: true,
                },
                tx,
            },
            rx,
        )
    }

    #[test]
    fn fifo_order_within_a_key() {
        let mut coordinator = BlockingCoordinator::default();
        let (first, _rx1) = dummy_waiter(1, &[b"q"]);
        let (second, _rx2) = dummy_waiter(2, &[b"q"]);
        coordinator.register(first);
        coordinator.register(second);
        assert_eq!(coordinator.pop_waiter(0, b"q").expect("first").1.client_id, 1);
        assert_eq!(coordinator.pop_waiter(0, b"q").expect("second").1.client_id, 2);
        assert!(coordinator.pop_waiter(0, b"q").is_none());
    }

    #[test]
    fn cancel_makes_registration_stale_on_every_key() {
        let mut coordinator = BlockingCoordinator::default();
        let (waiter, _rx) = dummy_waiter(1, &[b"a", b"b"]);
        let id = coordinator.register(waiter);
        assert!(coordinator.has_waiters(0, b"a"));
        assert!(coordinator.cancel(id));
        assert!(!coordinator.cancel(id));
        assert!(!coordinator.has_waiters(0, b"a"));
        assert!(coordinator.pop_waiter(0, b"b").is_none());
    }

    #[test]
    fn cancel_client_removes_only_that_client() {
        let mut coordinator = BlockingCoordinator::default();
        let (one, _rx1) = dummy_waiter(1, &[b"q"]);
        let (two, _rx2) = dummy_waiter(2, &[b"q"]);
        coordinator.register(one);
        coordinator.register(two);
        coordinator.cancel_client(1);
        assert_eq!(coordinator.pop_waiter(0, b"q").expect("left").1.client_id, 2);
    }

    #[test]
    fn attempt_list_pop_prefers_earlier_keys() {
        let mut db = Db::new();
        db.list_push(b"k2", &[b"v".to_vec()], false, true, 0).expect("ok");
        let op = BlockedOp::ListPop {
            keys: vec![b"k1".to_vec(), b"k2".to_vec()],
            left: true,
        };
        let reply = attempt(&op, &mut db, 0).expect("ready");
        assert_eq!(
            reply,
            RespFrame::Array(Some(vec![
                RespFrame::bulk(*b"k2"),
                RespFrame::bulk(*b"v"),
            ])),
        );
        // The pop consumed the only element.
        assert!(attempt(&op, &mut db, 0).is_none());
    }

    #[test]
    fn attempt_stream_read_reports_only_ready_streams() {
        let mut db = Db::new();
        db.xadd(
            b"s1",
            rd_store::StreamIdSpec::Exact(StreamId::new(1, 0)),
            vec![(b"f".to_vec(), b"v".to_vec())],
            false,
            None,
            0,
        )
        .expect("ok");
        let op = BlockedOp::StreamRead {
            streams: vec![(b"s1".to_vec(), StreamId::MIN), (b"s2".to_vec(), StreamId::MIN)],
            count: 10,
        };
        let RespFrame::Array(Some(ready)) = attempt(&op, &mut db, 0).expect("ready") else {
            panic!("expected array");
        };
        assert_eq!(ready.len(), 1);
        let op = BlockedOp::StreamRead {
            streams: vec![(b"s1".to_vec(), StreamId::new(1, 0))],
            count: 10,
        };
        assert!(attempt(&op, &mut db, 0).is_none());
    }
}
