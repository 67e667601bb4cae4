//! Multi-client scenarios straight through the public surfaces: shared
//! handles, blocking commands across threads, transactions with WATCH,
//! pub/sub fan-out, and the byte-stream connection.

use std::thread;
use std::time::Duration;

use rd_protocol::{ProtocolVersion, RespFrame};
use rd_runtime::ServerHandle;

fn bulk(bytes: &[u8]) -> RespFrame {
    RespFrame::BulkString(Some(bytes.to_vec()))
}

fn bulks(items: &[&[u8]]) -> RespFrame {
    RespFrame::Array(Some(items.iter().map(|item| bulk(item)).collect()))
}

#[test]
fn basic_string_and_list_flow() {
    let handle = ServerHandle::default();
    let mut client = handle.client();
    assert_eq!(
        client.command(&[b"SET", b"foo", b"bar"]).expect("ok"),
        RespFrame::ok(),
    );
    assert_eq!(client.command(&[b"GET", b"foo"]).expect("ok"), bulk(b"bar"));
    client.command(&[b"LPUSH", b"bar", b"1"]).expect("ok");
    client.command(&[b"LPUSH", b"bar", b"2"]).expect("ok");
    assert_eq!(
        client.command(&[b"LRANGE", b"bar", b"0", b"-1"]).expect("ok"),
        bulks(&[b"2", b"1"]),
    );
}

#[test]
fn connectivity_toggle_round_trip() {
    let handle = ServerHandle::default();
    let mut client = handle.client();
    handle.set_connected(false);
    assert!(client.command(&[b"SET", b"foo", b"bar"]).is_err());
    handle.set_connected(true);
    assert_eq!(
        client.command(&[b"SET", b"foo", b"bar"]).expect("ok"),
        RespFrame::ok(),
    );
}

#[test]
fn zadd_gt_scenario() {
    let handle = ServerHandle::default();
    let mut client = handle.client();
    client
        .command(&[b"ZADD", b"z", b"1", b"a", b"2", b"b", b"3", b"c"])
        .expect("ok");
    assert_eq!(
        client
            .command(&[b"ZRANGEBYSCORE", b"z", b"(1", b"3"])
            .expect("ok"),
        bulks(&[b"b", b"c"]),
    );
    assert_eq!(
        client
            .command(&[b"ZADD", b"z", b"XX", b"GT", b"0", b"b"])
            .expect("ok"),
        RespFrame::Integer(0),
    );
    assert_eq!(
        client.command(&[b"ZSCORE", b"z", b"b"]).expect("ok"),
        bulk(b"2"),
    );
}

#[test]
fn watch_exec_aborts_on_concurrent_write() {
    let handle = ServerHandle::default();
    let mut a = handle.client();
    let mut b = handle.client();
    a.command(&[b"WATCH", b"k"]).expect("ok");
    a.command(&[b"MULTI"]).expect("ok");
    a.command(&[b"SET", b"k", b"v1"]).expect("ok");
    b.command(&[b"SET", b"k", b"vX"]).expect("ok");
    assert_eq!(a.command(&[b"EXEC"]).expect("ok"), RespFrame::Array(None));
    assert_eq!(a.command(&[b"GET", b"k"]).expect("ok"), bulk(b"vX"));
}

#[test]
fn blpop_wakes_on_push_and_deletes_emptied_list() {
    let handle = ServerHandle::default();
    let waiter_handle = handle.clone();
    let waiter = thread::spawn(move || {
        let mut blocked = waiter_handle.client();
        blocked.command(&[b"BLPOP", b"q", b"0"]).expect("ok")
    });

    // Give the waiter a moment to park before pushing.
    thread::sleep(Duration::from_millis(50));
    let mut pusher = handle.client();
    pusher.command(&[b"RPUSH", b"q", b"hello"]).expect("ok");

    let reply = waiter.join().expect("waiter thread");
    assert_eq!(reply, bulks(&[b"q", b"hello"]));
    assert_eq!(
        pusher.command(&[b"LLEN", b"q"]).expect("ok"),
        RespFrame::Integer(0),
    );
    assert_eq!(
        pusher.command(&[b"EXISTS", b"q"]).expect("ok"),
        RespFrame::Integer(0),
    );
}

#[test]
fn earliest_blocked_client_wakes_first() {
    let handle = ServerHandle::default();
    let first_handle = handle.clone();
    let first = thread::spawn(move || {
        let mut client = first_handle.client();
        client.command(&[b"BLPOP", b"q", b"2"]).expect("ok")
    });
    thread::sleep(Duration::from_millis(80));
    let second_handle = handle.clone();
    let second = thread::spawn(move || {
        let mut client = second_handle.client();
        client.command(&[b"BLPOP", b"q", b"2"]).expect("ok")
    });
    thread::sleep(Duration::from_millis(80));

    let mut pusher = handle.client();
    pusher.command(&[b"RPUSH", b"q", b"only"]).expect("ok");

    let first_reply = first.join().expect("first thread");
    let second_reply = second.join().expect("second thread");
    assert_eq!(first_reply, bulks(&[b"q", b"only"]));
    // The latecomer times out empty-handed.
    assert_eq!(second_reply, RespFrame::Array(None));
}

#[test]
fn brpoplpush_moves_across_clients() {
    let handle = ServerHandle::default();
    let waiter_handle = handle.clone();
    let waiter = thread::spawn(move || {
        let mut blocked = waiter_handle.client();
        blocked
            .command(&[b"BRPOPLPUSH", b"src", b"dst", b"0"])
            .expect("ok")
    });
    thread::sleep(Duration::from_millis(50));
    let mut pusher = handle.client();
    pusher.command(&[b"LPUSH", b"src", b"job"]).expect("ok");
    assert_eq!(waiter.join().expect("thread"), bulk(b"job"));
    assert_eq!(
        pusher.command(&[b"LRANGE", b"dst", b"0", b"-1"]).expect("ok"),
        bulks(&[b"job"]),
    );
}

#[test]
fn xread_block_wakes_on_xadd() {
    let handle = ServerHandle::default();
    let reader_handle = handle.clone();
    let reader = thread::spawn(move || {
        let mut blocked = reader_handle.client();
        blocked
            .command(&[b"XREAD", b"BLOCK", b"0", b"STREAMS", b"s", b"$"])
            .expect("ok")
    });
    thread::sleep(Duration::from_millis(50));
    let mut writer = handle.client();
    writer
        .command(&[b"XADD", b"s", b"9-9", b"temp", b"42"])
        .expect("ok");
    let RespFrame::Array(Some(streams)) = reader.join().expect("thread") else {
        panic!("expected streams array");
    };
    assert_eq!(streams.len(), 1);
    let RespFrame::Array(Some(parts)) = &streams[0] else {
        panic!("expected [key, entries]");
    };
    assert_eq!(parts[0], bulk(b"s"));
}

#[test]
fn stream_ids_disambiguate_within_one_millisecond() {
    let handle = ServerHandle::default();
    handle.set_time_ms(7);
    let mut client = handle.client();
    assert_eq!(
        client.command(&[b"XADD", b"s", b"*", b"f", b"v"]).expect("ok"),
        bulk(b"7-0"),
    );
    assert_eq!(
        client.command(&[b"XADD", b"s", b"*", b"f", b"v"]).expect("ok"),
        bulk(b"7-1"),
    );
    assert_eq!(client.command(&[b"XLEN", b"s"]).expect("ok"), RespFrame::Integer(2));
    let RespFrame::Array(Some(entries)) =
        client.command(&[b"XRANGE", b"s", b"-", b"+"]).expect("ok")
    else {
        panic!("expected entries");
    };
    assert_eq!(entries.len(), 2);
}

#[test]
fn consumer_group_flow_over_shared_server() {
    let handle = ServerHandle::default();
    let mut producer = handle.client();
    let mut consumer = handle.client();
    producer.command(&[b"XADD", b"jobs", b"1-0", b"t", b"a"]).expect("ok");
    producer.command(&[b"XADD", b"jobs", b"2-0", b"t", b"b"]).expect("ok");
    producer
        .command(&[b"XGROUP", b"CREATE", b"jobs", b"workers", b"0"])
        .expect("ok");
    let RespFrame::Array(Some(streams)) = consumer
        .command(&[b"XREADGROUP", b"GROUP", b"workers", b"w1", b"COUNT", b"10", b"STREAMS", b"jobs", b">"])
        .expect("ok")
    else {
        panic!("expected delivery");
    };
    assert_eq!(streams.len(), 1);
    assert_eq!(
        consumer
            .command(&[b"XACK", b"jobs", b"workers", b"1-0"])
            .expect("ok"),
        RespFrame::Integer(1),
    );
    let RespFrame::Array(Some(summary)) = consumer
        .command(&[b"XPENDING", b"jobs", b"workers"])
        .expect("ok")
    else {
        panic!("expected summary");
    };
    assert_eq!(summary[0], RespFrame::Integer(1));
}

#[test]
fn pubsub_delivery_between_clients() {
    let handle = ServerHandle::default();
    let mut subscriber = handle.client();
    let mut publisher = handle.client();
    subscriber.command(&[b"SUBSCRIBE", b"alerts"]).expect("ok");
    assert_eq!(
        publisher
            .command(&[b"PUBLISH", b"alerts", b"fire"])
            .expect("ok"),
        RespFrame::Integer(1),
    );
    let message = subscriber
        .wait_push(Duration::from_millis(200))
        .expect("delivered");
    assert_eq!(
        message,
        RespFrame::Push(vec![bulk(b"message"), bulk(b"alerts"), bulk(b"fire")]),
    );
}

#[test]
fn dump_restore_between_databases_preserves_ttl() {
    let handle = ServerHandle::default();
    handle.set_time_ms(0);
    let mut client = handle.client();
    client.command(&[b"RPUSH", b"l", b"a", b"b"]).expect("ok");
    client.command(&[b"PEXPIRE", b"l", b"60000"]).expect("ok");
    let RespFrame::BulkString(Some(payload)) = client.command(&[b"DUMP", b"l"]).expect("ok")
    else {
        panic!("expected payload");
    };
    client.command(&[b"SELECT", b"1"]).expect("ok");
    let mut restore: Vec<&[u8]> = vec![b"RESTORE", b"l", b"60000"];
    restore.push(&payload);
    assert_eq!(client.command(&restore).expect("ok"), RespFrame::ok());
    assert_eq!(
        client.command(&[b"LRANGE", b"l", b"0", b"-1"]).expect("ok"),
        bulks(&[b"a", b"b"]),
    );
    assert_eq!(
        client.command(&[b"TTL", b"l"]).expect("ok"),
        RespFrame::Integer(60),
    );
}

#[test]
fn expiry_sweep_emits_notification_without_access() {
    let handle = ServerHandle::default();
    handle.set_time_ms(0);
    let mut subscriber = handle.client();
    let mut writer = handle.client();
    writer
        .command(&[b"CONFIG", b"SET", b"notify-keyspace-events", b"Ex"])
        .expect("ok");
    writer
        .command(&[b"SET", b"doomed", b"v", b"PX", b"10"])
        .expect("ok");
    subscriber
        .command(&[b"SUBSCRIBE", b"__keyevent@0__:expired"])
        .expect("ok");
    handle.set_time_ms(100);
    // Any command triggers the periodic sweep; touch an unrelated key.
    writer.command(&[b"SET", b"other", b"x"]).expect("ok");
    let event = subscriber
        .wait_push(Duration::from_millis(200))
        .expect("expired notification");
    let RespFrame::Push(parts) = event else {
        panic!("expected push");
    };
    assert_eq!(parts[2], bulk(b"doomed"));
    assert_eq!(
        writer.command(&[b"EXISTS", b"doomed"]).expect("ok"),
        RespFrame::Integer(0),
    );
}

#[test]
fn resp3_connection_renders_maps_and_pushes() {
    let handle = ServerHandle::default();
    let mut connection = rd_runtime::Connection::new(handle.client());
    let hello = connection.feed(b"HELLO 3\r\n").expect("ok");
    assert!(hello.starts_with(b"%"));
    connection
        .feed(b"*4\r\n$4\r\nHSET\r\n$1\r\nh\r\n$1\r\nf\r\n$1\r\nv\r\n")
        .expect("ok");
    let reply = connection
        .feed(b"*2\r\n$7\r\nHGETALL\r\n$1\r\nh\r\n")
        .expect("ok");
    assert_eq!(reply, b"%1\r\n$1\r\nf\r\n$1\r\nv\r\n".to_vec());
}

#[test]
fn resp2_connection_flattens_maps() {
    let handle = ServerHandle::default();
    let mut connection = rd_runtime::Connection::new(handle.client());
    connection
        .feed(b"*4\r\n$4\r\nHSET\r\n$1\r\nh\r\n$1\r\nf\r\n$1\r\nv\r\n")
        .expect("ok");
    let reply = connection
        .feed(b"*2\r\n$7\r\nHGETALL\r\n$1\r\nh\r\n")
        .expect("ok");
    assert_eq!(reply, b"*2\r\n$1\r\nf\r\n$1\r\nv\r\n".to_vec());
}

#[test]
fn pushes_drain_through_the_connection_surface() {
    let handle = ServerHandle::default();
    let mut subscriber = rd_runtime::Connection::new(handle.client());
    let ack = subscriber.feed(b"SUBSCRIBE alerts\r\n").expect("ok");
    assert!(ack.starts_with(b"*3\r\n$9\r\nsubscribe\r\n"));
    let mut publisher = handle.client();
    publisher.command(&[b"PUBLISH", b"alerts", b"x"]).expect("ok");
    let pushed = subscriber.take_pushes();
    assert!(String::from_utf8_lossy(&pushed).contains("alerts"));
}

#[test]
fn protocol_version_is_per_connection() {
    let handle = ServerHandle::default();
    let mut resp3 = handle.client();
    resp3.command(&[b"HELLO", b"3"]).expect("ok");
    let resp2 = handle.client();
    assert_eq!(resp3.protocol(), ProtocolVersion::Resp3);
    assert_eq!(resp2.protocol(), ProtocolVersion::Resp2);
}

#[test]
fn scan_covers_stable_keyspace() {
    let handle = ServerHandle::default();
    let mut client = handle.client();
    for i in 0..40 {
        let key = format!("key:{i:02}");
        client.command(&[b"SET", key.as_bytes(), b"v"]).expect("ok");
    }
    let mut cursor = b"0".to_vec();
    let mut seen = 0;
    loop {
        let RespFrame::Array(Some(parts)) = client
            .command(&[b"SCAN", &cursor, b"COUNT", b"7"])
            .expect("ok")
        else {
            panic!("expected scan reply");
        };
        let RespFrame::BulkString(Some(next)) = &parts[0] else {
            panic!("expected cursor");
        };
        let RespFrame::Array(Some(keys)) = &parts[1] else {
            panic!("expected keys");
        };
        seen += keys.len();
        if next.as_slice() == b"0" {
            break;
        }
        cursor = next.clone();
    }
    assert_eq!(seen, 40);
}
