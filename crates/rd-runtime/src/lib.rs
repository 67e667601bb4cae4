#![forbid(unsafe_code)]

//! The server runtime: shared state behind one mutex (the single logical
//! executor), per-connection sessions, the transaction and blocking
//! machinery, pub/sub fan-out with keyspace notifications, and the two
//! entry surfaces: an in-process [`Client`] and a byte-stream
//! [`Connection`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rd_command::{
    CommandError, command_error_to_resp, dispatch_argv, entries_frame, frame_to_argv,
    queue_time_check,
};
use rd_config::{Config, ConfigDict, NotifyFlags};
use rd_protocol::{FrameReader, ProtocolVersion, RespFrame, RespParseError};
use rd_store::{Db, GroupRead, KeyEvent, SetExpiry, StreamId};
use thiserror::Error;
use tracing::{debug, trace};

mod blocking;
mod pubsub;
mod script;

pub use script::{ScriptContext, ScriptEngine, sha1_hex};

use blocking::{BlockedOp, BlockingCoordinator, Waiter};
use pubsub::{PubSubRegistry, Scope, subscription_ack};

const NOAUTH_ERROR: &str = "NOAUTH Authentication required.";
const WRONGPASS_ERROR: &str = "WRONGPASS invalid username-password pair or user is disabled.";
const AUTH_NOT_CONFIGURED_ERROR: &str = "ERR Client sent AUTH, but no password is set. Did you mean AUTH <username> <password>?";
const EXECABORT_ERROR: &str =
    "EXECABORT Transaction discarded because of previous errors.";
const SCRIPTING_DISABLED_ERROR: &str = "ERR scripting is disabled on this server";
const NOSCRIPT_ERROR: &str = "NOSCRIPT No matching script. Please use EVAL.";

/// Keys expired per database per sweep invocation.
const ACTIVE_EXPIRE_BUDGET: usize = 20;

/// Errors surfaced by the in-process client API itself; command-level
/// failures arrive as RESP error frames instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The server's connected flag is off.
    #[error("connection refused: emulated server is not accepting connections")]
    ConnectionRefused,
    /// The connection was closed by QUIT or CLIENT KILL.
    #[error("connection closed by server")]
    ConnectionClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clock {
    Real,
    Manual(u64),
}

impl Clock {
    fn now_ms(self) -> u64 {
        match self {
            Self::Real => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            Self::Manual(at) => at,
        }
    }
}

/// Registry row for a live connection; the session itself lives with the
/// client, this is what other connections may observe or touch.
struct ClientEntry {
    name: Vec<u8>,
    db_index: usize,
    mailbox: mpsc::Sender<RespFrame>,
    killed: bool,
    subscriptions: usize,
}

/// The whole emulated server. All mutation happens while holding the one
/// mutex in [`ServerHandle`], which is what serializes commands.
pub struct Server {
    dbs: Vec<Db>,
    config: Config,
    config_dict: ConfigDict,
    connected: bool,
    clock: Clock,
    start_ms: u64,
    command_clock: u64,
    pubsub: PubSubRegistry,
    scripts: HashMap<String, Vec<u8>>,
    engine: Option<Box<dyn ScriptEngine>>,
    clients: BTreeMap<u64, ClientEntry>,
    blocked: BlockingCoordinator,
    active_expire_enabled: bool,
    next_client_id: u64,
}

impl Server {
    /// Build a server and return the cloneable handle that owns it.
    #[must_use]
    pub fn new(config: Config) -> ServerHandle {
        let clock = Clock::Real;
        let server = Server {
            dbs: (0..config.databases.max(1)).map(|_| Db::new()).collect(),
            config_dict: ConfigDict::new(&config),
            config,
            connected: true,
            clock,
            start_ms: clock.now_ms(),
            command_clock: 0,
            pubsub: PubSubRegistry::default(),
            scripts: HashMap::new(),
            engine: None,
            clients: BTreeMap::new(),
            blocked: BlockingCoordinator::default(),
            active_expire_enabled: true,
            next_client_id: 0,
        };
        ServerHandle {
            shared: Arc::new(Mutex::new(server)),
        }
    }

    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// One bounded sweep across all databases, with notifications for what
    /// expired.
    fn run_active_expire(&mut self, now_ms: u64) {
        for index in 0..self.dbs.len() {
            let stats = self.dbs[index].active_expire(now_ms, ACTIVE_EXPIRE_BUDGET);
            if stats.expired > 0 {
                trace!(db = index, expired = stats.expired, "active expire cycle");
            }
        }
        self.flush_effects(now_ms);
    }

    /// Drain pending keyspace events from every database: emit
    /// notifications and wake blocked clients. Servicing a waiter can
    /// produce new events, so loop until quiet.
    fn flush_effects(&mut self, now_ms: u64) {
        loop {
            let mut progressed = false;
            for index in 0..self.dbs.len() {
                let events = self.dbs[index].take_events();
                if events.is_empty() {
                    continue;
                }
                progressed = true;
                for event in events {
                    self.emit_keyspace_notification(index, &event);
                    self.wake_waiters(index, &event.key, now_ms);
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn emit_keyspace_notification(&mut self, db_index: usize, event: &KeyEvent) {
        let flags = self.config.notify_keyspace_events;
        if !flags.class_enabled(event.class) {
            return;
        }
        if flags.keyspace_enabled() {
            let mut channel = format!("__keyspace@{db_index}__:").into_bytes();
            channel.extend_from_slice(&event.key);
            self.publish_frames(&channel, event.event.as_bytes());
        }
        if flags.keyevent_enabled() {
            let channel = format!("__keyevent@{db_index}__:{}", event.event).into_bytes();
            self.publish_frames(&channel, &event.key);
        }
    }

    fn publish_frames(&mut self, channel: &[u8], payload: &[u8]) -> usize {
        let routed = self.pubsub.route_publish(channel, payload);
        let receivers = routed.len();
        for (client_id, frame) in routed {
            if let Some(entry) = self.clients.get(&client_id) {
                let _ = entry.mailbox.send(frame);
            }
        }
        receivers
    }

    /// FIFO wakeups for one key: serve waiters while their predicate holds,
    /// requeue the first one it fails for.
    fn wake_waiters(&mut self, db_index: usize, key: &[u8], now_ms: u64) {
        while self.blocked.has_waiters(db_index, key) {
            let Some((waiter_id, waiter)) = self.blocked.pop_waiter(db_index, key) else {
                break;
            };
            match blocking::attempt(&waiter.op, &mut self.dbs[db_index], now_ms) {
                Some(reply) => {
                    debug!(client = waiter.client_id, "waking blocked client");
                    let _ = waiter.tx.send(reply);
                }
                None => {
                    self.blocked.requeue_front(db_index, key, waiter_id, waiter);
                    break;
                }
            }
        }
    }

    fn remove_client(&mut self, client_id: u64) {
        self.clients.remove(&client_id);
        self.pubsub.remove_client(client_id);
        self.blocked.cancel_client(client_id);
    }
}

/// Cloneable owner of a [`Server`]. Clients created from the same handle
/// share state; a fresh handle is a fully isolated server.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Mutex<Server>>,
}

impl Default for ServerHandle {
    fn default() -> Self {
        Server::new(Config::default())
    }
}

impl ServerHandle {
    fn state(&self) -> MutexGuard<'_, Server> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new connection to this server.
    #[must_use]
    pub fn client(&self) -> Client {
        let (tx, rx) = mpsc::channel();
        let mut server = self.state();
        server.next_client_id += 1;
        let client_id = server.next_client_id;
        let proto = ProtocolVersion::from_number(i64::from(server.config.default_protocol))
            .unwrap_or_default();
        let authenticated = server.config.password.is_none();
        server.clients.insert(
            client_id,
            ClientEntry {
                name: Vec::new(),
                db_index: 0,
                mailbox: tx,
                killed: false,
                subscriptions: 0,
            },
        );
        drop(server);
        Client {
            handle: self.clone(),
            mailbox: rx,
            session: Session {
                client_id,
                db_index: 0,
                proto,
                authenticated,
                txn: TxnState::Normal,
                queue: Vec::new(),
                watched: Vec::new(),
                sub_channels: BTreeSet::new(),
                sub_patterns: BTreeSet::new(),
                sub_shard: BTreeSet::new(),
            },
        }
    }

    /// Pin the simulated clock to an absolute millisecond timestamp.
    pub fn set_time_ms(&self, at_ms: u64) {
        self.state().clock = Clock::Manual(at_ms);
    }

    /// Advance a pinned clock (pins it to "real now + delta" otherwise).
    pub fn advance_time_ms(&self, delta_ms: u64) {
        let mut server = self.state();
        let now = server.now_ms();
        server.clock = Clock::Manual(now.saturating_add(delta_ms));
    }

    pub fn use_real_clock(&self) {
        self.state().clock = Clock::Real;
    }

    /// Toggle the simulated link. While false every client command fails
    /// with [`ClientError::ConnectionRefused`].
    pub fn set_connected(&self, connected: bool) {
        self.state().connected = connected;
    }

    pub fn flush_all(&self) {
        let mut server = self.state();
        for db in &mut server.dbs {
            db.flush();
        }
    }

    /// Pre-populate string keys in database 0.
    pub fn seed<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, pairs: &[(K, V)]) {
        let mut server = self.state();
        let now = server.now_ms();
        for (key, value) in pairs {
            server.dbs[0].string_set(
                key.as_ref(),
                value.as_ref().to_vec(),
                SetExpiry::Discard,
                now,
            );
        }
        server.dbs[0].take_events();
    }

    /// Live key count of one database, for test assertions.
    #[must_use]
    pub fn db_len(&self, index: usize) -> usize {
        let mut server = self.state();
        let now = server.now_ms();
        server.dbs.get_mut(index).map_or(0, |db| db.dbsize(now))
    }

    /// Install the opaque script evaluator behind EVAL/EVALSHA.
    pub fn install_script_engine(&self, engine: Box<dyn ScriptEngine>) {
        self.state().engine = Some(engine);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Normal,
    Queuing,
    Aborted,
}

#[derive(Debug)]
struct Session {
    client_id: u64,
    db_index: usize,
    proto: ProtocolVersion,
    authenticated: bool,
    txn: TxnState,
    queue: Vec<Vec<Vec<u8>>>,
    watched: Vec<(usize, Vec<u8>, u64)>,
    sub_channels: BTreeSet<Vec<u8>>,
    sub_patterns: BTreeSet<Vec<u8>>,
    sub_shard: BTreeSet<Vec<u8>>,
}

impl Session {
    fn subscription_count(&self) -> usize {
        self.sub_channels.len() + self.sub_patterns.len() + self.sub_shard.len()
    }

    fn reset(&mut self) {
        self.txn = TxnState::Normal;
        self.queue.clear();
        self.watched.clear();
    }
}

/// What routing decided to do with one command.
enum CommandOutcome {
    Reply(RespFrame),
    Block {
        op: BlockedOp,
        timeout: Option<Duration>,
    },
}

/// Connection-scoped commands the runtime resolves before the data-plane
/// dispatcher sees anything.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RuntimeCommand {
    Auth,
    Hello,
    Select,
    Swapdb,
    Move,
    FlushAll,
    Info,
    ConfigCmd,
    ClientCmd,
    DebugCmd,
    Time,
    Multi,
    Exec,
    Discard,
    Watch,
    Unwatch,
    Reset,
    Quit,
    Subscribe,
    Unsubscribe,
    Psubscribe,
    Punsubscribe,
    Ssubscribe,
    Sunsubscribe,
    Publish,
    Spublish,
    PubsubCmd,
    Blpop,
    Brpop,
    Blmove,
    Brpoplpush,
    Xread,
    Xreadgroup,
    ScriptCmd,
    Eval,
    Evalsha,
}

/// Name, id, reference-style arity (positive exact, negative minimum).
const RUNTIME_TABLE: &[(&[u8], RuntimeCommand, i32)] = &[
    (b"AUTH", RuntimeCommand::Auth, -2),
    (b"HELLO", RuntimeCommand::Hello, -1),
    (b"SELECT", RuntimeCommand::Select, 2),
    (b"SWAPDB", RuntimeCommand::Swapdb, 3),
    (b"MOVE", RuntimeCommand::Move, 3),
    (b"FLUSHALL", RuntimeCommand::FlushAll, -1),
    (b"INFO", RuntimeCommand::Info, -1),
    (b"CONFIG", RuntimeCommand::ConfigCmd, -2),
    (b"CLIENT", RuntimeCommand::ClientCmd, -2),
    (b"DEBUG", RuntimeCommand::DebugCmd, -2),
    (b"TIME", RuntimeCommand::Time, 1),
    (b"MULTI", RuntimeCommand::Multi, 1),
    (b"EXEC", RuntimeCommand::Exec, 1),
    (b"DISCARD", RuntimeCommand::Discard, 1),
    (b"WATCH", RuntimeCommand::Watch, -2),
    (b"UNWATCH", RuntimeCommand::Unwatch, 1),
    (b"RESET", RuntimeCommand::Reset, 1),
    (b"QUIT", RuntimeCommand::Quit, 1),
    (b"SUBSCRIBE", RuntimeCommand::Subscribe, -2),
    (b"UNSUBSCRIBE", RuntimeCommand::Unsubscribe, -1),
    (b"PSUBSCRIBE", RuntimeCommand::Psubscribe, -2),
    (b"PUNSUBSCRIBE", RuntimeCommand::Punsubscribe, -1),
    (b"SSUBSCRIBE", RuntimeCommand::Ssubscribe, -2),
    (b"SUNSUBSCRIBE", RuntimeCommand::Sunsubscribe, -1),
    (b"PUBLISH", RuntimeCommand::Publish, 3),
    (b"SPUBLISH", RuntimeCommand::Spublish, 3),
    (b"PUBSUB", RuntimeCommand::PubsubCmd, -2),
    (b"BLPOP", RuntimeCommand::Blpop, -3),
    (b"BRPOP", RuntimeCommand::Brpop, -3),
    (b"BLMOVE", RuntimeCommand::Blmove, 6),
    (b"BRPOPLPUSH", RuntimeCommand::Brpoplpush, 4),
    (b"XREAD", RuntimeCommand::Xread, -4),
    (b"XREADGROUP", RuntimeCommand::Xreadgroup, -7),
    (b"SCRIPT", RuntimeCommand::ScriptCmd, -2),
    (b"EVAL", RuntimeCommand::Eval, -3),
    (b"EVALSHA", RuntimeCommand::Evalsha, -3),
];

fn classify_runtime_command(cmd: &[u8]) -> Option<RuntimeCommand> {
    RUNTIME_TABLE
        .iter()
        .find(|(name, _, _)| cmd.eq_ignore_ascii_case(name))
        .map(|(_, id, _)| *id)
}

/// Queue-time validation covering both command tables.
fn runtime_queue_check(argv: &[Vec<u8>]) -> Result<(), CommandError> {
    let Some(raw_cmd) = argv.first() else {
        return Err(CommandError::InvalidCommandFrame);
    };
    if let Some((name, _, arity)) = RUNTIME_TABLE
        .iter()
        .find(|(name, _, _)| raw_cmd.eq_ignore_ascii_case(name))
    {
        let argc = argv.len() as i32;
        let ok = if *arity >= 0 { argc == *arity } else { argc >= -arity };
        return if ok {
            Ok(())
        } else {
            Err(CommandError::WrongArity(
                std::str::from_utf8(name).expect("table names are ASCII"),
            ))
        };
    }
    queue_time_check(argv)
}

fn allowed_while_subscribed(cmd: &[u8]) -> bool {
    const ALLOWED: &[&[u8]] = &[
        b"SUBSCRIBE",
        b"UNSUBSCRIBE",
        b"PSUBSCRIBE",
        b"PUNSUBSCRIBE",
        b"SSUBSCRIBE",
        b"SUNSUBSCRIBE",
        b"PING",
        b"QUIT",
        b"RESET",
    ];
    ALLOWED.iter().any(|name| cmd.eq_ignore_ascii_case(name))
}

/// An in-process connection. Commands run to completion against the shared
/// server; pub/sub deliveries land in the mailbox.
pub struct Client {
    handle: ServerHandle,
    session: Session,
    mailbox: mpsc::Receiver<RespFrame>,
}

impl Client {
    /// Execute one command given as argument slices.
    pub fn command(&mut self, parts: &[&[u8]]) -> Result<RespFrame, ClientError> {
        self.exec_argv(parts.iter().map(|part| part.to_vec()).collect())
    }

    /// Execute one parsed command.
    pub fn exec_argv(&mut self, argv: Vec<Vec<u8>>) -> Result<RespFrame, ClientError> {
        let mut server = self.handle.state();
        if !server.connected {
            return Err(ClientError::ConnectionRefused);
        }
        let killed = match server.clients.get(&self.session.client_id) {
            None => return Err(ClientError::ConnectionClosed),
            Some(entry) => entry.killed,
        };
        if killed {
            let client_id = self.session.client_id;
            server.remove_client(client_id);
            return Err(ClientError::ConnectionClosed);
        }

        server.command_clock += 1;
        let now_ms = server.now_ms();
        if server.active_expire_enabled {
            server.run_active_expire(now_ms);
        }

        let outcome = route(&mut server, &mut self.session, &argv, now_ms, false);
        server.flush_effects(now_ms);

        match outcome {
            CommandOutcome::Reply(frame) => Ok(frame),
            CommandOutcome::Block { op, timeout } => {
                let (tx, rx) = mpsc::channel();
                let waiter_id = server.blocked.register(Waiter {
                    client_id: self.session.client_id,
                    db_index: self.session.db_index,
                    op,
                    tx,
                });
                drop(server);

                let received = match timeout {
                    None => rx.recv().ok(),
                    Some(duration) => rx.recv_timeout(duration).ok(),
                };
                if let Some(frame) = received {
                    return Ok(frame);
                }
                // Timed out - or did a mutator claim us in the window?
                let mut server = self.handle.state();
                if server.blocked.cancel(waiter_id) {
                    return Ok(RespFrame::Array(None));
                }
                drop(server);
                Ok(rx.recv().unwrap_or(RespFrame::Array(None)))
            }
        }
    }

    /// Drain one pending pub/sub delivery without waiting.
    pub fn next_push(&mut self) -> Option<RespFrame> {
        self.mailbox.try_recv().ok()
    }

    /// Wait up to `timeout` for a pub/sub delivery.
    pub fn wait_push(&mut self, timeout: Duration) -> Option<RespFrame> {
        self.mailbox.recv_timeout(timeout).ok()
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.session.client_id
    }

    #[must_use]
    pub fn protocol(&self) -> ProtocolVersion {
        self.session.proto
    }

    #[must_use]
    pub fn server(&self) -> ServerHandle {
        self.handle.clone()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let mut server = self.handle.state();
        server.remove_client(self.session.client_id);
    }
}

// ── routing ──────────────────────────────────────────────────────────

fn reply(frame: RespFrame) -> CommandOutcome {
    CommandOutcome::Reply(frame)
}

fn error(text: impl Into<String>) -> CommandOutcome {
    CommandOutcome::Reply(RespFrame::Error(text.into()))
}

fn route(
    server: &mut Server,
    session: &mut Session,
    argv: &[Vec<u8>],
    now_ms: u64,
    in_exec: bool,
) -> CommandOutcome {
    let Some(raw_cmd) = argv.first() else {
        return reply(command_error_to_resp(CommandError::InvalidCommandFrame));
    };
    let runtime_command = classify_runtime_command(raw_cmd);
    if runtime_command.is_some()
        && let Err(err) = runtime_queue_check(argv)
    {
        return reply(command_error_to_resp(err));
    }

    // AUTH and HELLO run before the authentication gate.
    match runtime_command {
        Some(RuntimeCommand::Auth) => return handle_auth(server, session, argv),
        Some(RuntimeCommand::Hello) => return handle_hello(server, session, argv),
        Some(RuntimeCommand::Quit) => {
            if let Some(entry) = server.clients.get_mut(&session.client_id) {
                entry.killed = true;
            }
            return reply(RespFrame::ok());
        }
        Some(RuntimeCommand::Reset) => return handle_reset(server, session),
        _ => {}
    }
    if !session.authenticated {
        return error(NOAUTH_ERROR);
    }

    if session.subscription_count() > 0 && !allowed_while_subscribed(raw_cmd) {
        return error(format!(
            "ERR Can't execute '{}': only (P|S)SUBSCRIBE / (P|S)UNSUBSCRIBE / PING / QUIT / RESET are allowed in this context",
            String::from_utf8_lossy(raw_cmd).to_lowercase(),
        ));
    }

    // Inside MULTI everything except the transaction-control commands is
    // queued after a syntactic check.
    if session.txn != TxnState::Normal
        && !in_exec
        && !matches!(
            runtime_command,
            Some(
                RuntimeCommand::Exec
                    | RuntimeCommand::Discard
                    | RuntimeCommand::Multi
                    | RuntimeCommand::Watch
                    | RuntimeCommand::Unwatch
            ),
        )
    {
        return match runtime_queue_check(argv) {
            Ok(()) => {
                session.queue.push(argv.to_vec());
                reply(RespFrame::SimpleString("QUEUED".to_string()))
            }
            Err(err) => {
                session.txn = TxnState::Aborted;
                reply(command_error_to_resp(err))
            }
        };
    }

    match runtime_command {
        Some(RuntimeCommand::Select) => return handle_select(server, session, argv),
        Some(RuntimeCommand::Swapdb) => return handle_swapdb(server, argv),
        Some(RuntimeCommand::Move) => return handle_move(server, session, argv, now_ms),
        Some(RuntimeCommand::FlushAll) => {
            for db in &mut server.dbs {
                db.flush();
            }
            return reply(RespFrame::ok());
        }
        Some(RuntimeCommand::Info) => return handle_info(server, now_ms),
        Some(RuntimeCommand::ConfigCmd) => return handle_config(server, argv),
        Some(RuntimeCommand::ClientCmd) => return handle_client(server, session, argv),
        Some(RuntimeCommand::DebugCmd) => return handle_debug(server, session, argv, now_ms),
        Some(RuntimeCommand::Time) => {
            let secs = now_ms / 1000;
            let micros = (now_ms % 1000) * 1000;
            return reply(RespFrame::Array(Some(vec![
                RespFrame::BulkString(Some(secs.to_string().into_bytes())),
                RespFrame::BulkString(Some(micros.to_string().into_bytes())),
            ])));
        }
        Some(RuntimeCommand::Multi) => {
            if session.txn == TxnState::Queuing {
                return error("ERR MULTI calls can not be nested");
            }
            session.txn = TxnState::Queuing;
            session.queue.clear();
            return reply(RespFrame::ok());
        }
        Some(RuntimeCommand::Exec) => return handle_exec(server, session, now_ms),
        Some(RuntimeCommand::Discard) => {
            if session.txn == TxnState::Normal {
                return error("ERR DISCARD without MULTI");
            }
            session.reset();
            return reply(RespFrame::ok());
        }
        Some(RuntimeCommand::Watch) => {
            if session.txn == TxnState::Queuing {
                return error("ERR WATCH inside MULTI is not allowed");
            }
            for key in &argv[1..] {
                let version = server.dbs[session.db_index].version(key);
                session.watched.push((session.db_index, key.clone(), version));
            }
            return reply(RespFrame::ok());
        }
        Some(RuntimeCommand::Unwatch) => {
            session.watched.clear();
            return reply(RespFrame::ok());
        }
        Some(RuntimeCommand::Subscribe) => {
            return handle_subscribe(server, session, argv, Scope::Channel);
        }
        Some(RuntimeCommand::Psubscribe) => {
            return handle_subscribe(server, session, argv, Scope::Pattern);
        }
        Some(RuntimeCommand::Ssubscribe) => {
            return handle_subscribe(server, session, argv, Scope::Shard);
        }
        Some(RuntimeCommand::Unsubscribe) => {
            return handle_unsubscribe(server, session, argv, Scope::Channel);
        }
        Some(RuntimeCommand::Punsubscribe) => {
            return handle_unsubscribe(server, session, argv, Scope::Pattern);
        }
        Some(RuntimeCommand::Sunsubscribe) => {
            return handle_unsubscribe(server, session, argv, Scope::Shard);
        }
        Some(RuntimeCommand::Publish) => {
            let receivers = server.publish_frames(&argv[1], &argv[2]);
            return reply(RespFrame::Integer(receivers as i64));
        }
        Some(RuntimeCommand::Spublish) => {
            let routed = server.pubsub.route_spublish(&argv[1], &argv[2]);
            let receivers = routed.len();
            for (client_id, frame) in routed {
                if let Some(entry) = server.clients.get(&client_id) {
                    let _ = entry.mailbox.send(frame);
                }
            }
            return reply(RespFrame::Integer(receivers as i64));
        }
        Some(RuntimeCommand::PubsubCmd) => return handle_pubsub(server, argv),
        Some(RuntimeCommand::Blpop) => {
            return handle_blocking_pop(server, session, argv, now_ms, true, in_exec);
        }
        Some(RuntimeCommand::Brpop) => {
            return handle_blocking_pop(server, session, argv, now_ms, false, in_exec);
        }
        Some(RuntimeCommand::Blmove) => {
            return handle_blocking_move(server, session, argv, now_ms, in_exec, false);
        }
        Some(RuntimeCommand::Brpoplpush) => {
            return handle_blocking_move(server, session, argv, now_ms, in_exec, true);
        }
        Some(RuntimeCommand::Xread) => {
            return handle_xread(server, session, argv, now_ms, in_exec);
        }
        Some(RuntimeCommand::Xreadgroup) => {
            return handle_xreadgroup(server, session, argv, now_ms, in_exec);
        }
        Some(RuntimeCommand::ScriptCmd) => return handle_script(server, argv),
        Some(RuntimeCommand::Eval) => return handle_eval(server, session, argv, now_ms, false),
        Some(RuntimeCommand::Evalsha) => {
            return handle_eval(server, session, argv, now_ms, true);
        }
        Some(
            RuntimeCommand::Auth
            | RuntimeCommand::Hello
            | RuntimeCommand::Quit
            | RuntimeCommand::Reset,
        )
        | None => {}
    }

    // COPY with an explicit DB target crosses databases, which only the
    // runtime can see.
    if raw_cmd.eq_ignore_ascii_case(b"COPY")
        && argv.iter().skip(3).any(|arg| arg.eq_ignore_ascii_case(b"DB"))
    {
        return handle_copy_db(server, session, argv, now_ms);
    }

    let config = server.config.clone();
    let db = &mut server.dbs[session.db_index];
    match dispatch_argv(argv, db, now_ms, &config) {
        Ok(frame) => reply(frame),
        Err(err) => reply(command_error_to_resp(err)),
    }
}

// ── session & admin handlers ─────────────────────────────────────────

fn handle_auth(server: &mut Server, session: &mut Session, argv: &[Vec<u8>]) -> CommandOutcome {
    let password = match argv.len() {
        2 => &argv[1],
        3 => {
            if !argv[1].eq_ignore_ascii_case(b"default") {
                return error(WRONGPASS_ERROR);
            }
            &argv[2]
        }
        _ => return reply(command_error_to_resp(CommandError::WrongArity("AUTH"))),
    };
    let Some(expected) = &server.config.password else {
        return error(AUTH_NOT_CONFIGURED_ERROR);
    };
    if password.as_slice() == expected.as_bytes() {
        session.authenticated = true;
        reply(RespFrame::ok())
    } else {
        error(WRONGPASS_ERROR)
    }
}

fn handle_hello(server: &mut Server, session: &mut Session, argv: &[Vec<u8>]) -> CommandOutcome {
    let mut proto = session.proto;
    let mut i = 1;
    if let Some(version_arg) = argv.get(1) {
        let Ok(text) = std::str::from_utf8(version_arg) else {
            return error("NOPROTO unsupported protocol version");
        };
        let Some(version) = text.parse::<i64>().ok().and_then(ProtocolVersion::from_number)
        else {
            return error("NOPROTO unsupported protocol version");
        };
        proto = version;
        i = 2;
    }
    while i < argv.len() {
        if argv[i].eq_ignore_ascii_case(b"AUTH") && i + 2 < argv.len() {
            let auth_argv = vec![b"AUTH".to_vec(), argv[i + 1].clone(), argv[i + 2].clone()];
            match handle_auth(server, session, &auth_argv) {
                CommandOutcome::Reply(RespFrame::SimpleString(_)) => {}
                other => return other,
            }
            i += 3;
        } else if argv[i].eq_ignore_ascii_case(b"SETNAME") && i + 1 < argv.len() {
            if let Some(entry) = server.clients.get_mut(&session.client_id) {
                entry.name = argv[i + 1].clone();
            }
            i += 2;
        } else {
            return reply(command_error_to_resp(CommandError::SyntaxError));
        }
    }
    if !session.authenticated && server.config.password.is_some() {
        return error(NOAUTH_ERROR);
    }
    session.proto = proto;
    reply(RespFrame::Map(vec![
        (RespFrame::bulk(*b"server"), RespFrame::bulk(*b"redis")),
        (
            RespFrame::bulk(*b"version"),
            RespFrame::bulk(server.config.server_version.version_string().as_bytes().to_vec()),
        ),
        (RespFrame::bulk(*b"proto"), RespFrame::Integer(proto.as_number())),
        (
            RespFrame::bulk(*b"id"),
            RespFrame::Integer(session.client_id as i64),
        ),
        (RespFrame::bulk(*b"mode"), RespFrame::bulk(*b"standalone")),
        (RespFrame::bulk(*b"role"), RespFrame::bulk(*b"master")),
        (RespFrame::bulk(*b"modules"), RespFrame::Array(Some(Vec::new()))),
    ]))
}

fn handle_reset(server: &mut Server, session: &mut Session) -> CommandOutcome {
    session.reset();
    let client_id = session.client_id;
    for channel in std::mem::take(&mut session.sub_channels) {
        server.pubsub.unsubscribe(Scope::Channel, &channel, client_id);
    }
    for pattern in std::mem::take(&mut session.sub_patterns) {
        server.pubsub.unsubscribe(Scope::Pattern, &pattern, client_id);
    }
    for channel in std::mem::take(&mut session.sub_shard) {
        server.pubsub.unsubscribe(Scope::Shard, &channel, client_id);
    }
    if let Some(entry) = server.clients.get_mut(&client_id) {
        entry.subscriptions = 0;
    }
    session.db_index = 0;
    if server.config.password.is_some() {
        session.authenticated = false;
    }
    reply(RespFrame::SimpleString("RESET".to_string()))
}

fn handle_select(server: &mut Server, session: &mut Session, argv: &[Vec<u8>]) -> CommandOutcome {
    let Ok(index) = std::str::from_utf8(&argv[1])
        .unwrap_or("")
        .parse::<usize>()
    else {
        return error("ERR value is not an integer or out of range");
    };
    if index >= server.dbs.len() {
        return error("ERR DB index is out of range");
    }
    session.db_index = index;
    if let Some(entry) = server.clients.get_mut(&session.client_id) {
        entry.db_index = index;
    }
    reply(RespFrame::ok())
}

fn handle_swapdb(server: &mut Server, argv: &[Vec<u8>]) -> CommandOutcome {
    let parse = |arg: &[u8]| std::str::from_utf8(arg).unwrap_or("").parse::<usize>().ok();
    let (Some(first), Some(second)) = (parse(&argv[1]), parse(&argv[2])) else {
        return error("ERR invalid first DB index");
    };
    if first >= server.dbs.len() || second >= server.dbs.len() {
        return error("ERR DB index is out of range");
    }
    server.dbs.swap(first, second);
    reply(RespFrame::ok())
}

fn handle_move(
    server: &mut Server,
    session: &mut Session,
    argv: &[Vec<u8>],
    now_ms: u64,
) -> CommandOutcome {
    let Ok(target) = std::str::from_utf8(&argv[2]).unwrap_or("").parse::<usize>() else {
        return error("ERR value is not an integer or out of range");
    };
    if target >= server.dbs.len() {
        return error("ERR DB index is out of range");
    }
    if target == session.db_index {
        return error("ERR source and destination objects are the same");
    }
    let key = &argv[1];
    let Some((value, expires_at_ms)) = server.dbs[session.db_index].entry_snapshot(key, now_ms)
    else {
        return reply(RespFrame::Integer(0));
    };
    if server.dbs[target].exists(key, now_ms) {
        return reply(RespFrame::Integer(0));
    }
    server.dbs[target]
        .install_entry(key, value, expires_at_ms, false, now_ms)
        .expect("target checked empty");
    server.dbs[target].note('g', "move_to", key);
    server.dbs[session.db_index].remove_entry(key);
    server.dbs[session.db_index].note('g', "move_from", key);
    reply(RespFrame::Integer(1))
}

fn handle_copy_db(
    server: &mut Server,
    session: &mut Session,
    argv: &[Vec<u8>],
    now_ms: u64,
) -> CommandOutcome {
    if argv.len() < 3 {
        return reply(command_error_to_resp(CommandError::WrongArity("COPY")));
    }
    let mut replace = false;
    let mut target_db = session.db_index;
    let mut i = 3;
    while i < argv.len() {
        if argv[i].eq_ignore_ascii_case(b"REPLACE") {
            replace = true;
            i += 1;
        } else if argv[i].eq_ignore_ascii_case(b"DB") && i + 1 < argv.len() {
            match std::str::from_utf8(&argv[i + 1]).unwrap_or("").parse::<usize>() {
                Ok(index) if index < server.dbs.len() => target_db = index,
                _ => return error("ERR DB index is out of range"),
            }
            i += 2;
        } else {
            return reply(command_error_to_resp(CommandError::SyntaxError));
        }
    }
    if target_db == session.db_index && argv[1] == argv[2] {
        return error("ERR source and destination objects are the same");
    }
    let Some((value, expires_at_ms)) = server.dbs[session.db_index].entry_snapshot(&argv[1], now_ms)
    else {
        return reply(RespFrame::Integer(0));
    };
    match server.dbs[target_db].install_entry(&argv[2], value, expires_at_ms, replace, now_ms) {
        Ok(()) => {
            server.dbs[target_db].note('g', "copy_to", &argv[2]);
            reply(RespFrame::Integer(1))
        }
        Err(rd_store::StoreError::BusyKey) => reply(RespFrame::Integer(0)),
        Err(err) => reply(command_error_to_resp(err.into())),
    }
}

fn handle_info(server: &mut Server, now_ms: u64) -> CommandOutcome {
    let uptime_sec = now_ms.saturating_sub(server.start_ms) / 1000;
    let mut text = String::new();
    text.push_str("# Server\r\n");
    text.push_str(&format!(
        "redis_version:{}\r\n",
        server.config.server_version.version_string(),
    ));
    text.push_str("redis_mode:standalone\r\nos:redouble\r\narch_bits:64\r\n");
    text.push_str(&format!("uptime_in_seconds:{uptime_sec}\r\n"));
    text.push_str("\r\n# Clients\r\n");
    text.push_str(&format!("connected_clients:{}\r\n", server.clients.len()));
    text.push_str(&format!(
        "blocked_clients:{}\r\n",
        0, // waiters are parked client threads, not tracked here
    ));
    text.push_str("\r\n# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\n");
    text.push_str("\r\n# Stats\r\n");
    text.push_str(&format!(
        "total_commands_processed:{}\r\n",
        server.command_clock,
    ));
    text.push_str("\r\n# Keyspace\r\n");
    for (index, db) in server.dbs.iter_mut().enumerate() {
        let keys = db.dbsize(now_ms);
        if keys > 0 {
            text.push_str(&format!("db{index}:keys={keys},expires=0,avg_ttl=0\r\n"));
        }
    }
    reply(RespFrame::Verbatim("txt".to_string(), text.into_bytes()))
}

fn handle_config(server: &mut Server, argv: &[Vec<u8>]) -> CommandOutcome {
    let sub = &argv[1];
    if sub.eq_ignore_ascii_case(b"GET") {
        if argv.len() < 3 {
            return reply(command_error_to_resp(CommandError::WrongArity("CONFIG")));
        }
        let patterns: Vec<&[u8]> = argv[2..].iter().map(Vec::as_slice).collect();
        let mut pairs = Vec::new();
        for (name, value) in server.config_dict.entries() {
            if patterns
                .iter()
                .any(|pattern| rd_store::glob_match(pattern, name.as_bytes()))
            {
                pairs.push((
                    RespFrame::BulkString(Some(name.as_bytes().to_vec())),
                    RespFrame::BulkString(Some(value.as_bytes().to_vec())),
                ));
            }
        }
        reply(RespFrame::Map(pairs))
    } else if sub.eq_ignore_ascii_case(b"SET") {
        if argv.len() < 4 || argv.len() % 2 != 0 {
            return reply(command_error_to_resp(CommandError::WrongArity("CONFIG")));
        }
        // Validate everything before applying anything.
        for pair in argv[2..].chunks_exact(2) {
            let name = String::from_utf8_lossy(&pair[0]).to_ascii_lowercase();
            if server.config_dict.get(&name).is_none() {
                return error(format!(
                    "ERR Unknown option or number of arguments for CONFIG SET - '{name}'",
                ));
            }
            if name == "notify-keyspace-events" {
                let flags = String::from_utf8_lossy(&pair[1]).into_owned();
                if NotifyFlags::parse(&flags).is_err() {
                    return error("ERR Invalid event class character. Some possible classes are: 'g$lshzxeKE'");
                }
            }
        }
        for pair in argv[2..].chunks_exact(2) {
            let name = String::from_utf8_lossy(&pair[0]).to_ascii_lowercase();
            let value = String::from_utf8_lossy(&pair[1]).into_owned();
            if name == "notify-keyspace-events" {
                server.config.notify_keyspace_events =
                    NotifyFlags::parse(&value).expect("validated above");
            } else if name == "requirepass" {
                server.config.password =
                    if value.is_empty() { None } else { Some(value.clone()) };
            }
            let _ = server.config_dict.set(&name, &value);
        }
        reply(RespFrame::ok())
    } else if sub.eq_ignore_ascii_case(b"RESETSTAT") {
        server.command_clock = 0;
        reply(RespFrame::ok())
    } else {
        error(format!(
            "ERR Unknown CONFIG subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(sub),
        ))
    }
}

fn handle_client(server: &mut Server, session: &mut Session, argv: &[Vec<u8>]) -> CommandOutcome {
    let sub = &argv[1];
    if sub.eq_ignore_ascii_case(b"ID") {
        reply(RespFrame::Integer(session.client_id as i64))
    } else if sub.eq_ignore_ascii_case(b"GETNAME") {
        let name = server
            .clients
            .get(&session.client_id)
            .map(|entry| entry.name.clone())
            .unwrap_or_default();
        reply(RespFrame::BulkString(Some(name)))
    } else if sub.eq_ignore_ascii_case(b"SETNAME") {
        if argv.len() != 3 {
            return reply(command_error_to_resp(CommandError::WrongArity("CLIENT")));
        }
        if argv[2].iter().any(|b| *b == b' ' || *b == b'\n') {
            return error("ERR Client names cannot contain spaces, newlines or special characters.");
        }
        if let Some(entry) = server.clients.get_mut(&session.client_id) {
            entry.name = argv[2].clone();
        }
        reply(RespFrame::ok())
    } else if sub.eq_ignore_ascii_case(b"LIST") {
        let mut out = String::new();
        for (id, entry) in &server.clients {
            out.push_str(&client_info_line(*id, entry));
            out.push('\n');
        }
        reply(RespFrame::BulkString(Some(out.into_bytes())))
    } else if sub.eq_ignore_ascii_case(b"INFO") {
        let line = server
            .clients
            .get(&session.client_id)
            .map(|entry| client_info_line(session.client_id, entry))
            .unwrap_or_default();
        reply(RespFrame::BulkString(Some(line.into_bytes())))
    } else if sub.eq_ignore_ascii_case(b"KILL") {
        if argv.len() == 4 && argv[2].eq_ignore_ascii_case(b"ID") {
            let Ok(target) = std::str::from_utf8(&argv[3]).unwrap_or("").parse::<u64>() else {
                return error("ERR client-id should be greater than 0");
            };
            let mut killed = 0;
            if let Some(entry) = server.clients.get_mut(&target) {
                entry.killed = true;
                killed = 1;
            }
            if killed == 1 {
                server.blocked.cancel_client_notify(target);
                server.pubsub.remove_client(target);
            }
            return reply(RespFrame::Integer(killed));
        }
        error("ERR syntax error")
    } else if sub.eq_ignore_ascii_case(b"PAUSE") {
        if argv.len() != 3 && argv.len() != 4 {
            return reply(command_error_to_resp(CommandError::WrongArity("CLIENT")));
        }
        match std::str::from_utf8(&argv[2]).unwrap_or("").parse::<u64>() {
            Ok(_) => reply(RespFrame::ok()),
            Err(_) => error("ERR timeout is not an integer or out of range"),
        }
    } else if sub.eq_ignore_ascii_case(b"UNPAUSE") {
        server.blocked.cancel_all();
        reply(RespFrame::ok())
    } else if sub.eq_ignore_ascii_case(b"NO-EVICT") || sub.eq_ignore_ascii_case(b"NO-TOUCH") {
        reply(RespFrame::ok())
    } else {
        error(format!(
            "ERR Unknown subcommand or wrong number of arguments for '{}'. Try CLIENT HELP.",
            String::from_utf8_lossy(sub),
        ))
    }
}

fn client_info_line(id: u64, entry: &ClientEntry) -> String {
    format!(
        "id={} addr=127.0.0.1:0 laddr=127.0.0.1:6379 fd={} name={} db={} sub={} psub={} multi=-1 resp=2 cmd=client",
        id,
        id,
        String::from_utf8_lossy(&entry.name),
        entry.db_index,
        entry.subscriptions,
        0,
    )
}

fn handle_debug(
    server: &mut Server,
    session: &mut Session,
    argv: &[Vec<u8>],
    now_ms: u64,
) -> CommandOutcome {
    let sub = &argv[1];
    if sub.eq_ignore_ascii_case(b"SLEEP") {
        let seconds = argv
            .get(2)
            .and_then(|arg| std::str::from_utf8(arg).ok())
            .and_then(|text| text.parse::<f64>().ok())
            .unwrap_or(0.0);
        // Sleeping with the state locked mirrors the reference server
        // stalling its only thread.
        std::thread::sleep(Duration::from_secs_f64(seconds.max(0.0)));
        reply(RespFrame::ok())
    } else if sub.eq_ignore_ascii_case(b"OBJECT") {
        let Some(key) = argv.get(2) else {
            return reply(command_error_to_resp(CommandError::WrongArity("DEBUG")));
        };
        let db = &mut server.dbs[session.db_index];
        let config = server.config.clone();
        let encoding_argv = vec![b"OBJECT".to_vec(), b"ENCODING".to_vec(), key.clone()];
        match dispatch_argv(&encoding_argv, db, now_ms, &config) {
            Ok(RespFrame::BulkString(Some(encoding))) => reply(RespFrame::SimpleString(format!(
                "Value at:0x0 refcount:1 encoding:{} serializedlength:0 lru:0 lru_seconds_idle:0",
                String::from_utf8_lossy(&encoding),
            ))),
            Ok(other) => reply(other),
            Err(err) => reply(command_error_to_resp(err)),
        }
    } else if sub.eq_ignore_ascii_case(b"SET-ACTIVE-EXPIRE") {
        let enabled = argv.get(2).map(Vec::as_slice) != Some(b"0");
        server.active_expire_enabled = enabled;
        reply(RespFrame::ok())
    } else if sub.eq_ignore_ascii_case(b"JMAP")
        || sub.eq_ignore_ascii_case(b"QUICKLIST-PACKED-THRESHOLD")
        || sub.eq_ignore_ascii_case(b"STRINGMATCH-LEN")
        || sub.eq_ignore_ascii_case(b"CHANGE-REPL-ID")
    {
        reply(RespFrame::ok())
    } else {
        error(format!(
            "ERR DEBUG subcommand '{}' is not supported",
            String::from_utf8_lossy(sub),
        ))
    }
}

// ── transactions ─────────────────────────────────────────────────────

fn handle_exec(server: &mut Server, session: &mut Session, now_ms: u64) -> CommandOutcome {
    match session.txn {
        TxnState::Normal => return error("ERR EXEC without MULTI"),
        TxnState::Aborted => {
            session.reset();
            return error(EXECABORT_ERROR);
        }
        TxnState::Queuing => {}
    }
    let queued = std::mem::take(&mut session.queue);
    session.txn = TxnState::Normal;

    let watch_failed = session
        .watched
        .iter()
        .any(|(db_index, key, version)| server.dbs[*db_index].version(key) != *version);
    session.watched.clear();
    if watch_failed {
        debug!(client = session.client_id, "EXEC aborted by WATCH");
        return reply(RespFrame::Array(None));
    }

    let mut results = Vec::with_capacity(queued.len());
    for argv in &queued {
        let outcome = route(server, session, argv, now_ms, true);
        let frame = match outcome {
            CommandOutcome::Reply(frame) => frame,
            // Blocking commands never block inside EXEC.
            CommandOutcome::Block { .. } => RespFrame::Array(None),
        };
        results.push(frame);
    }
    reply(RespFrame::Array(Some(results)))
}

// ── pub/sub command handlers ─────────────────────────────────────────

fn subscribe_kind(scope: Scope, unsubscribe: bool) -> &'static str {
    match (scope, unsubscribe) {
        (Scope::Channel, false) => "subscribe",
        (Scope::Channel, true) => "unsubscribe",
        (Scope::Pattern, false) => "psubscribe",
        (Scope::Pattern, true) => "punsubscribe",
        (Scope::Shard, false) => "ssubscribe",
        (Scope::Shard, true) => "sunsubscribe",
    }
}

fn session_set<'a>(session: &'a mut Session, scope: Scope) -> &'a mut BTreeSet<Vec<u8>> {
    match scope {
        Scope::Channel => &mut session.sub_channels,
        Scope::Pattern => &mut session.sub_patterns,
        Scope::Shard => &mut session.sub_shard,
    }
}

/// The first acknowledgement is the command reply; further acks are posted
/// to the mailbox like any other push.
fn handle_subscribe(
    server: &mut Server,
    session: &mut Session,
    argv: &[Vec<u8>],
    scope: Scope,
) -> CommandOutcome {
    let kind = subscribe_kind(scope, false);
    let client_id = session.client_id;
    let mut first_ack: Option<RespFrame> = None;
    for name in &argv[1..] {
        server.pubsub.subscribe(scope, name, client_id);
        session_set(session, scope).insert(name.clone());
        let ack = subscription_ack(kind, Some(name.as_slice()), session.subscription_count() as i64);
        match &first_ack {
            None => first_ack = Some(ack),
            Some(_) => {
                if let Some(entry) = server.clients.get(&client_id) {
                    let _ = entry.mailbox.send(ack);
                }
            }
        }
    }
    if let Some(entry) = server.clients.get_mut(&client_id) {
        entry.subscriptions = session.subscription_count();
    }
    reply(first_ack.expect("arity guarantees at least one name"))
}

fn handle_unsubscribe(
    server: &mut Server,
    session: &mut Session,
    argv: &[Vec<u8>],
    scope: Scope,
) -> CommandOutcome {
    let kind = subscribe_kind(scope, true);
    let client_id = session.client_id;
    let names: Vec<Vec<u8>> = if argv.len() > 1 {
        argv[1..].to_vec()
    } else {
        session_set(session, scope).iter().cloned().collect()
    };
    let mut first_ack: Option<RespFrame> = None;
    if names.is_empty() {
        first_ack = Some(subscription_ack(
            kind,
            None,
            session.subscription_count() as i64,
        ));
    }
    for name in &names {
        server.pubsub.unsubscribe(scope, name, client_id);
        session_set(session, scope).remove(name);
        let ack = subscription_ack(kind, Some(name.as_slice()), session.subscription_count() as i64);
        match &first_ack {
            None => first_ack = Some(ack),
            Some(_) => {
                if let Some(entry) = server.clients.get(&client_id) {
                    let _ = entry.mailbox.send(ack);
                }
            }
        }
    }
    if let Some(entry) = server.clients.get_mut(&client_id) {
        entry.subscriptions = session.subscription_count();
    }
    reply(first_ack.expect("set above"))
}

fn handle_pubsub(server: &mut Server, argv: &[Vec<u8>]) -> CommandOutcome {
    let sub = &argv[1];
    if sub.eq_ignore_ascii_case(b"CHANNELS") {
        let names = server.pubsub.channels_matching(argv.get(2).map(Vec::as_slice));
        reply(RespFrame::Array(Some(
            names
                .into_iter()
                .map(|name| RespFrame::BulkString(Some(name)))
                .collect(),
        )))
    } else if sub.eq_ignore_ascii_case(b"NUMSUB") {
        let mut out = Vec::new();
        for channel in &argv[2..] {
            out.push(RespFrame::BulkString(Some(channel.clone())));
            out.push(RespFrame::Integer(
                server.pubsub.subscriber_count(channel) as i64,
            ));
        }
        reply(RespFrame::Array(Some(out)))
    } else if sub.eq_ignore_ascii_case(b"NUMPAT") {
        reply(RespFrame::Integer(server.pubsub.pattern_count() as i64))
    } else if sub.eq_ignore_ascii_case(b"SHARDCHANNELS") {
        let names = server
            .pubsub
            .shard_channels_matching(argv.get(2).map(Vec::as_slice));
        reply(RespFrame::Array(Some(
            names
                .into_iter()
                .map(|name| RespFrame::BulkString(Some(name)))
                .collect(),
        )))
    } else if sub.eq_ignore_ascii_case(b"SHARDNUMSUB") {
        let mut out = Vec::new();
        for channel in &argv[2..] {
            out.push(RespFrame::BulkString(Some(channel.clone())));
            out.push(RespFrame::Integer(
                server.pubsub.shard_subscriber_count(channel) as i64,
            ));
        }
        reply(RespFrame::Array(Some(out)))
    } else {
        error(format!(
            "ERR Unknown PUBSUB subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(sub),
        ))
    }
}

// ── blocking command handlers ────────────────────────────────────────

/// Parse a seconds timeout (doubles allowed, 0 = infinite).
fn parse_block_timeout_secs(arg: &[u8]) -> Result<Option<Duration>, RespFrame> {
    let Some(value) = std::str::from_utf8(arg)
        .ok()
        .and_then(|text| text.parse::<f64>().ok())
        .filter(|value| value.is_finite())
    else {
        return Err(RespFrame::Error(
            "ERR timeout is not a float or out of range".to_string(),
        ));
    };
    if value < 0.0 {
        return Err(RespFrame::Error("ERR timeout is negative".to_string()));
    }
    if value == 0.0 {
        Ok(None)
    } else {
        Ok(Some(Duration::from_secs_f64(value)))
    }
}

fn block_or_reply(
    server: &mut Server,
    session: &Session,
    op: BlockedOp,
    timeout: Option<Duration>,
    now_ms: u64,
    in_exec: bool,
) -> CommandOutcome {
    if let Some(frame) = blocking::attempt(&op, &mut server.dbs[session.db_index], now_ms) {
        return reply(frame);
    }
    if in_exec {
        // Inside EXEC a blocking command degrades to its non-blocking null.
        return reply(RespFrame::Array(None));
    }
    CommandOutcome::Block { op, timeout }
}

fn handle_blocking_pop(
    server: &mut Server,
    session: &Session,
    argv: &[Vec<u8>],
    now_ms: u64,
    left: bool,
    in_exec: bool,
) -> CommandOutcome {
    let timeout = match parse_block_timeout_secs(&argv[argv.len() - 1]) {
        Ok(timeout) => timeout,
        Err(frame) => return reply(frame),
    };
    let keys: Vec<Vec<u8>> = argv[1..argv.len() - 1].to_vec();
    block_or_reply(
        server,
        session,
        BlockedOp::ListPop { keys, left },
        timeout,
        now_ms,
        in_exec,
    )
}

fn handle_blocking_move(
    server: &mut Server,
    session: &Session,
    argv: &[Vec<u8>],
    now_ms: u64,
    in_exec: bool,
    legacy_rpoplpush: bool,
) -> CommandOutcome {
    let (source, destination, from_left, to_left, timeout_arg) = if legacy_rpoplpush {
        (&argv[1], &argv[2], false, true, &argv[3])
    } else {
        let parse_side = |arg: &[u8]| {
            if arg.eq_ignore_ascii_case(b"LEFT") {
                Some(true)
            } else if arg.eq_ignore_ascii_case(b"RIGHT") {
                Some(false)
            } else {
                None
            }
        };
        let (Some(from_left), Some(to_left)) = (parse_side(&argv[3]), parse_side(&argv[4]))
        else {
            return reply(command_error_to_resp(CommandError::SyntaxError));
        };
        (&argv[1], &argv[2], from_left, to_left, &argv[5])
    };
    let timeout = match parse_block_timeout_secs(timeout_arg) {
        Ok(timeout) => timeout,
        Err(frame) => return reply(frame),
    };
    block_or_reply(
        server,
        session,
        BlockedOp::ListMove {
            source: source.clone(),
            destination: destination.clone(),
            from_left,
            to_left,
        },
        timeout,
        now_ms,
        in_exec,
    )
}

fn handle_xread(
    server: &mut Server,
    session: &Session,
    argv: &[Vec<u8>],
    now_ms: u64,
    in_exec: bool,
) -> CommandOutcome {
    let mut count = usize::MAX;
    let mut block_ms: Option<u64> = None;
    let mut i = 1;
    while i < argv.len() {
        if argv[i].eq_ignore_ascii_case(b"COUNT") && i + 1 < argv.len() {
            match std::str::from_utf8(&argv[i + 1]).unwrap_or("").parse::<usize>() {
                Ok(parsed) => count = parsed,
                Err(_) => return reply(command_error_to_resp(CommandError::InvalidInteger)),
            }
            i += 2;
        } else if argv[i].eq_ignore_ascii_case(b"BLOCK") && i + 1 < argv.len() {
            match std::str::from_utf8(&argv[i + 1]).unwrap_or("").parse::<u64>() {
                Ok(parsed) => block_ms = Some(parsed),
                Err(_) => {
                    return reply(RespFrame::Error(
                        "ERR timeout is not an integer or out of range".to_string(),
                    ));
                }
            }
            i += 2;
        } else if argv[i].eq_ignore_ascii_case(b"STREAMS") {
            i += 1;
            break;
        } else {
            return reply(command_error_to_resp(CommandError::SyntaxError));
        }
    }
    let rest = &argv[i..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return error(
            "ERR Unbalanced XREAD list of streams: for each stream key an ID or '$' must be specified.",
        );
    }
    let half = rest.len() / 2;
    let mut streams = Vec::with_capacity(half);
    for index in 0..half {
        let key = rest[index].clone();
        let id_arg = &rest[half + index];
        let after = if id_arg.as_slice() == b"$" {
            match server.dbs[session.db_index].stream_last_id(&key, now_ms) {
                Ok(id) => id,
                Err(err) => return reply(command_error_to_resp(err.into())),
            }
        } else {
            match StreamId::parse(id_arg, 0) {
                Some(id) => id,
                None => return reply(command_error_to_resp(CommandError::InvalidStreamId)),
            }
        };
        streams.push((key, after));
    }

    let op = BlockedOp::StreamRead { streams, count };
    match block_ms {
        None => {
            // Non-blocking XREAD replies null when nothing is ready.
            match blocking::attempt(&op, &mut server.dbs[session.db_index], now_ms) {
                Some(frame) => reply(frame),
                None => reply(RespFrame::Array(None)),
            }
        }
        Some(0) => block_or_reply(server, session, op, None, now_ms, in_exec),
        Some(ms) => block_or_reply(
            server,
            session,
            op,
            Some(Duration::from_millis(ms)),
            now_ms,
            in_exec,
        ),
    }
}

fn handle_xreadgroup(
    server: &mut Server,
    session: &Session,
    argv: &[Vec<u8>],
    now_ms: u64,
    in_exec: bool,
) -> CommandOutcome {
    if !argv[1].eq_ignore_ascii_case(b"GROUP") || argv.len() < 7 {
        return reply(command_error_to_resp(CommandError::SyntaxError));
    }
    let group = argv[2].clone();
    let consumer = argv[3].clone();
    let mut count = usize::MAX;
    let mut block_ms: Option<u64> = None;
    let mut noack = false;
    let mut i = 4;
    while i < argv.len() {
        if argv[i].eq_ignore_ascii_case(b"COUNT") && i + 1 < argv.len() {
            match std::str::from_utf8(&argv[i + 1]).unwrap_or("").parse::<usize>() {
                Ok(parsed) => count = parsed,
                Err(_) => return reply(command_error_to_resp(CommandError::InvalidInteger)),
            }
            i += 2;
        } else if argv[i].eq_ignore_ascii_case(b"BLOCK") && i + 1 < argv.len() {
            match std::str::from_utf8(&argv[i + 1]).unwrap_or("").parse::<u64>() {
                Ok(parsed) => block_ms = Some(parsed),
                Err(_) => {
                    return reply(RespFrame::Error(
                        "ERR timeout is not an integer or out of range".to_string(),
                    ));
                }
            }
            i += 2;
        } else if argv[i].eq_ignore_ascii_case(b"NOACK") {
            noack = true;
            i += 1;
        } else if argv[i].eq_ignore_ascii_case(b"STREAMS") {
            i += 1;
            break;
        } else {
            return reply(command_error_to_resp(CommandError::SyntaxError));
        }
    }
    let rest = &argv[i..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return error(
            "ERR Unbalanced XREADGROUP list of streams: for each stream key an ID or '>' must be specified.",
        );
    }
    let half = rest.len() / 2;
    let keys: Vec<Vec<u8>> = rest[..half].to_vec();
    let new_entries = rest[half..].iter().all(|id| id.as_slice() == b">");

    if !new_entries {
        // Backlog reads never block: replay each consumer PEL directly.
        let mut out = Vec::with_capacity(half);
        for index in 0..half {
            let id_arg = &rest[half + index];
            let after = if id_arg.as_slice() == b">" {
                return error(
                    "ERR The > ID can be specified only when calling XREADGROUP using the consumer group mechanism for all the streams.",
                );
            } else {
                match StreamId::parse(id_arg, 0) {
                    Some(id) => id,
                    None => return reply(command_error_to_resp(CommandError::InvalidStreamId)),
                }
            };
            match server.dbs[session.db_index].xreadgroup(
                &keys[index],
                &group,
                &consumer,
                GroupRead::Backlog(after),
                count,
                noack,
                now_ms,
            ) {
                Ok(entries) => out.push(RespFrame::Array(Some(vec![
                    RespFrame::BulkString(Some(keys[index].clone())),
                    entries_frame(&entries),
                ]))),
                Err(err) => return reply(command_error_to_resp(err.into())),
            }
        }
        return reply(RespFrame::Array(Some(out)));
    }

    // `>` reads fail fast when the group is missing, even in blocking mode.
    for key in &keys {
        if let Err(err) = server.dbs[session.db_index].xreadgroup(
            key,
            &group,
            &consumer,
            GroupRead::Backlog(StreamId::MAX),
            0,
            true,
            now_ms,
        ) {
            return reply(command_error_to_resp(err.into()));
        }
    }
    let op = BlockedOp::StreamReadGroup {
        group,
        consumer,
        streams: keys,
        count,
        noack,
    };
    match block_ms {
        None => match blocking::attempt(&op, &mut server.dbs[session.db_index], now_ms) {
            Some(frame) => reply(frame),
            None => reply(RespFrame::Array(None)),
        },
        Some(0) => block_or_reply(server, session, op, None, now_ms, in_exec),
        Some(ms) => block_or_reply(
            server,
            session,
            op,
            Some(Duration::from_millis(ms)),
            now_ms,
            in_exec,
        ),
    }
}

// ── scripting ────────────────────────────────────────────────────────

struct RunContext<'a> {
    db: &'a mut Db,
    now_ms: u64,
    config: Config,
}

impl ScriptContext for RunContext<'_> {
    fn call(&mut self, argv: &[Vec<u8>]) -> RespFrame {
        match dispatch_argv(argv, self.db, self.now_ms, &self.config) {
            Ok(frame) => frame,
            Err(err) => command_error_to_resp(err),
        }
    }
}

fn handle_script(server: &mut Server, argv: &[Vec<u8>]) -> CommandOutcome {
    let sub = &argv[1];
    if sub.eq_ignore_ascii_case(b"LOAD") {
        let Some(body) = argv.get(2) else {
            return reply(command_error_to_resp(CommandError::WrongArity("SCRIPT")));
        };
        let sha = sha1_hex(body);
        server.scripts.insert(sha.clone(), body.clone());
        reply(RespFrame::BulkString(Some(sha.into_bytes())))
    } else if sub.eq_ignore_ascii_case(b"EXISTS") {
        let mut out = Vec::with_capacity(argv.len() - 2);
        for sha in &argv[2..] {
            let sha = String::from_utf8_lossy(sha).to_lowercase();
            out.push(RespFrame::Integer(i64::from(
                server.scripts.contains_key(&sha),
            )));
        }
        reply(RespFrame::Array(Some(out)))
    } else if sub.eq_ignore_ascii_case(b"FLUSH") {
        server.scripts.clear();
        reply(RespFrame::ok())
    } else {
        error(format!(
            "ERR Unknown SCRIPT subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(sub),
        ))
    }
}

fn handle_eval(
    server: &mut Server,
    session: &Session,
    argv: &[Vec<u8>],
    now_ms: u64,
    by_sha: bool,
) -> CommandOutcome {
    let body = if by_sha {
        let sha = String::from_utf8_lossy(&argv[1]).to_lowercase();
        match server.scripts.get(&sha) {
            Some(body) => body.clone(),
            None => return error(NOSCRIPT_ERROR),
        }
    } else {
        let body = argv[1].clone();
        server.scripts.insert(sha1_hex(&body), body.clone());
        body
    };
    let Ok(numkeys) = std::str::from_utf8(&argv[2]).unwrap_or("").parse::<usize>() else {
        return error("ERR value is not an integer or out of range");
    };
    if argv.len() < 3 + numkeys {
        return error("ERR Number of keys can't be greater than number of args");
    }
    let keys = argv[3..3 + numkeys].to_vec();
    let args = argv[3 + numkeys..].to_vec();

    if !server.config.lua_modules {
        return error(SCRIPTING_DISABLED_ERROR);
    }
    let Some(mut engine) = server.engine.take() else {
        return error(SCRIPTING_DISABLED_ERROR);
    };
    let config = server.config.clone();
    let frame = {
        let mut ctx = RunContext {
            db: &mut server.dbs[session.db_index],
            now_ms,
            config,
        };
        engine.eval(&body, &keys, &args, &mut ctx)
    };
    server.engine = Some(engine);
    reply(frame)
}

// ── byte-stream surface ──────────────────────────────────────────────

/// Wraps a [`Client`] behind the wire framing, for use under a socket or
/// loopback transport. Protocol errors are connection-fatal.
pub struct Connection {
    client: Client,
    reader: FrameReader,
    dead: bool,
}

impl Connection {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reader: FrameReader::new(),
            dead: false,
        }
    }

    /// Feed raw client bytes; returns the reply bytes produced, rendered
    /// for the negotiated protocol version.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<u8>, ClientError> {
        if self.dead {
            return Err(ClientError::ConnectionClosed);
        }
        self.reader.feed(bytes);
        let mut out = Vec::new();
        loop {
            match self.reader.next_frame() {
                Ok(Some(frame)) => {
                    let argv = match frame_to_argv(&frame) {
                        Ok(argv) => argv,
                        Err(err) => {
                            out.extend_from_slice(
                                &command_error_to_resp(err).to_bytes(self.client.protocol()),
                            );
                            continue;
                        }
                    };
                    let reply = self.client.exec_argv(argv)?;
                    out.extend_from_slice(&reply.to_bytes(self.client.protocol()));
                }
                Ok(None) => break,
                Err(err) => {
                    out.extend_from_slice(
                        &protocol_error_to_resp(err).to_bytes(self.client.protocol()),
                    );
                    self.dead = true;
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Drain buffered pub/sub deliveries as wire bytes.
    pub fn take_pushes(&mut self) -> Vec<u8> {
        let proto = self.client.protocol();
        let mut out = Vec::new();
        while let Some(frame) = self.client.next_push() {
            out.extend_from_slice(&frame.to_bytes(proto));
        }
        out
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.dead
    }
}

fn protocol_error_to_resp(error: RespParseError) -> RespFrame {
    match error {
        RespParseError::InvalidBulkLength => {
            RespFrame::Error("ERR Protocol error: invalid bulk length".to_string())
        }
        RespParseError::InvalidMultibulkLength => {
            RespFrame::Error("ERR Protocol error: invalid multibulk length".to_string())
        }
        RespParseError::Incomplete => {
            RespFrame::Error("ERR Protocol error: unexpected EOF while reading request".to_string())
        }
        RespParseError::InvalidPrefix(ch) => RespFrame::Error(format!(
            "ERR Protocol error: invalid RESP type prefix '{}'",
            char::from(ch),
        )),
        RespParseError::UnsupportedResp3Type(ch) => RespFrame::Error(format!(
            "ERR Protocol error: unsupported RESP3 type prefix '{}'",
            char::from(ch),
        )),
        RespParseError::InvalidInteger => {
            RespFrame::Error("ERR Protocol error: invalid integer payload".to_string())
        }
        RespParseError::InvalidUtf8 => {
            RespFrame::Error("ERR Protocol error: invalid UTF-8 payload".to_string())
        }
        RespParseError::InlineTooLong => {
            RespFrame::Error("ERR Protocol error: too big inline request".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(text: &str) -> RespFrame {
        RespFrame::SimpleString(text.to_string())
    }

    fn bulk(bytes: &[u8]) -> RespFrame {
        RespFrame::BulkString(Some(bytes.to_vec()))
    }

    #[test]
    fn shared_server_sees_cross_client_writes() {
        let handle = ServerHandle::default();
        let mut a = handle.client();
        let mut b = handle.client();
        assert_eq!(a.command(&[b"SET", b"k", b"v"]).expect("ok"), RespFrame::ok());
        assert_eq!(b.command(&[b"GET", b"k"]).expect("ok"), bulk(b"v"));
        // A private server does not.
        let mut other = ServerHandle::default().client();
        assert_eq!(
            other.command(&[b"GET", b"k"]).expect("ok"),
            RespFrame::BulkString(None),
        );
    }

    #[test]
    fn disconnect_flag_refuses_commands() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        handle.set_connected(false);
        assert_eq!(
            client.command(&[b"SET", b"foo", b"bar"]),
            Err(ClientError::ConnectionRefused),
        );
        handle.set_connected(true);
        assert_eq!(
            client.command(&[b"SET", b"foo", b"bar"]).expect("ok"),
            RespFrame::ok(),
        );
    }

    #[test]
    fn manual_clock_drives_expiry() {
        let handle = ServerHandle::default();
        handle.set_time_ms(1_000);
        let mut client = handle.client();
        client.command(&[b"SET", b"k", b"v", b"PX", b"500"]).expect("ok");
        assert_eq!(client.command(&[b"GET", b"k"]).expect("ok"), bulk(b"v"));
        handle.set_time_ms(1_500);
        assert_eq!(
            client.command(&[b"GET", b"k"]).expect("ok"),
            RespFrame::BulkString(None),
        );
    }

    #[test]
    fn select_isolates_databases() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        client.command(&[b"SET", b"k", b"zero"]).expect("ok");
        assert_eq!(client.command(&[b"SELECT", b"1"]).expect("ok"), RespFrame::ok());
        assert_eq!(
            client.command(&[b"GET", b"k"]).expect("ok"),
            RespFrame::BulkString(None),
        );
        client.command(&[b"SET", b"k", b"one"]).expect("ok");
        client.command(&[b"SELECT", b"0"]).expect("ok");
        assert_eq!(client.command(&[b"GET", b"k"]).expect("ok"), bulk(b"zero"));
        assert_eq!(
            client.command(&[b"SELECT", b"99"]).expect("ok"),
            RespFrame::Error("ERR DB index is out of range".to_string()),
        );
    }

    #[test]
    fn swapdb_and_move_cross_databases() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        client.command(&[b"SET", b"k", b"v"]).expect("ok");
        assert_eq!(
            client.command(&[b"MOVE", b"k", b"3"]).expect("ok"),
            RespFrame::Integer(1),
        );
        assert_eq!(
            client.command(&[b"EXISTS", b"k"]).expect("ok"),
            RespFrame::Integer(0),
        );
        client.command(&[b"SELECT", b"3"]).expect("ok");
        assert_eq!(client.command(&[b"GET", b"k"]).expect("ok"), bulk(b"v"));
        client.command(&[b"SELECT", b"0"]).expect("ok");
        assert_eq!(client.command(&[b"SWAPDB", b"0", b"3"]).expect("ok"), RespFrame::ok());
        assert_eq!(client.command(&[b"GET", b"k"]).expect("ok"), bulk(b"v"));
    }

    #[test]
    fn multi_queues_and_exec_applies() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        assert_eq!(client.command(&[b"MULTI"]).expect("ok"), RespFrame::ok());
        assert_eq!(
            client.command(&[b"SET", b"k", b"v"]).expect("ok"),
            simple("QUEUED"),
        );
        assert_eq!(
            client.command(&[b"INCR", b"counter"]).expect("ok"),
            simple("QUEUED"),
        );
        assert_eq!(
            client.command(&[b"EXEC"]).expect("ok"),
            RespFrame::Array(Some(vec![RespFrame::ok(), RespFrame::Integer(1)])),
        );
        assert_eq!(client.command(&[b"GET", b"k"]).expect("ok"), bulk(b"v"));
        assert_eq!(
            client.command(&[b"EXEC"]).expect("ok"),
            RespFrame::Error("ERR EXEC without MULTI".to_string()),
        );
    }

    #[test]
    fn queued_error_aborts_exec() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        client.command(&[b"MULTI"]).expect("ok");
        let reply = client.command(&[b"NOTACOMMAND"]).expect("ok");
        assert!(matches!(reply, RespFrame::Error(_)));
        assert_eq!(
            client.command(&[b"SET", b"k", b"v"]).expect("ok"),
            simple("QUEUED"),
        );
        assert_eq!(
            client.command(&[b"EXEC"]).expect("ok"),
            RespFrame::Error(EXECABORT_ERROR.to_string()),
        );
        assert_eq!(
            client.command(&[b"GET", b"k"]).expect("ok"),
            RespFrame::BulkString(None),
        );
    }

    #[test]
    fn queued_wrong_arity_aborts_exec() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        client.command(&[b"MULTI"]).expect("ok");
        let reply = client.command(&[b"GET"]).expect("ok");
        assert!(matches!(reply, RespFrame::Error(text) if text.contains("wrong number")));
        assert_eq!(
            client.command(&[b"EXEC"]).expect("ok"),
            RespFrame::Error(EXECABORT_ERROR.to_string()),
        );
    }

    #[test]
    fn runtime_errors_inside_exec_do_not_roll_back() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        client.command(&[b"SET", b"str", b"x"]).expect("ok");
        client.command(&[b"MULTI"]).expect("ok");
        client.command(&[b"SET", b"a", b"1"]).expect("ok");
        client.command(&[b"LPUSH", b"str", b"boom"]).expect("ok");
        client.command(&[b"SET", b"b", b"2"]).expect("ok");
        let RespFrame::Array(Some(results)) = client.command(&[b"EXEC"]).expect("ok") else {
            panic!("expected results array");
        };
        assert_eq!(results[0], RespFrame::ok());
        assert!(matches!(&results[1], RespFrame::Error(text) if text.starts_with("WRONGTYPE")));
        assert_eq!(results[2], RespFrame::ok());
        assert_eq!(client.command(&[b"GET", b"b"]).expect("ok"), bulk(b"2"));
    }

    #[test]
    fn watch_aborts_after_foreign_write() {
        let handle = ServerHandle::default();
        let mut a = handle.client();
        let mut b = handle.client();
        a.command(&[b"SET", b"k", b"v0"]).expect("ok");
        a.command(&[b"WATCH", b"k"]).expect("ok");
        a.command(&[b"MULTI"]).expect("ok");
        a.command(&[b"SET", b"k", b"v1"]).expect("ok");
        b.command(&[b"SET", b"k", b"vX"]).expect("ok");
        assert_eq!(a.command(&[b"EXEC"]).expect("ok"), RespFrame::Array(None));
        assert_eq!(a.command(&[b"GET", b"k"]).expect("ok"), bulk(b"vX"));
    }

    #[test]
    fn watch_survives_untouched_keys() {
        let handle = ServerHandle::default();
        let mut a = handle.client();
        let mut b = handle.client();
        a.command(&[b"SET", b"k", b"v0"]).expect("ok");
        a.command(&[b"WATCH", b"k"]).expect("ok");
        a.command(&[b"MULTI"]).expect("ok");
        a.command(&[b"SET", b"k", b"v1"]).expect("ok");
        b.command(&[b"SET", b"unrelated", b"x"]).expect("ok");
        assert_eq!(
            a.command(&[b"EXEC"]).expect("ok"),
            RespFrame::Array(Some(vec![RespFrame::ok()])),
        );
    }

    #[test]
    fn watch_detects_expiry_as_write() {
        let handle = ServerHandle::default();
        handle.set_time_ms(0);
        let mut client = handle.client();
        client.command(&[b"SET", b"k", b"v", b"PX", b"10"]).expect("ok");
        client.command(&[b"WATCH", b"k"]).expect("ok");
        client.command(&[b"MULTI"]).expect("ok");
        client.command(&[b"SET", b"k", b"new"]).expect("ok");
        handle.set_time_ms(50);
        // The lazy expiry on EXEC's own clock read bumps the version.
        let mut probe = handle.client();
        probe.command(&[b"EXISTS", b"k"]).expect("ok");
        assert_eq!(client.command(&[b"EXEC"]).expect("ok"), RespFrame::Array(None));
    }

    #[test]
    fn unwatch_clears_the_watch_set() {
        let handle = ServerHandle::default();
        let mut a = handle.client();
        let mut b = handle.client();
        a.command(&[b"WATCH", b"k"]).expect("ok");
        a.command(&[b"UNWATCH"]).expect("ok");
        a.command(&[b"MULTI"]).expect("ok");
        a.command(&[b"SET", b"k", b"v1"]).expect("ok");
        b.command(&[b"SET", b"k", b"vX"]).expect("ok");
        assert_eq!(
            a.command(&[b"EXEC"]).expect("ok"),
            RespFrame::Array(Some(vec![RespFrame::ok()])),
        );
    }

    #[test]
    fn publish_reaches_channel_and_pattern_subscribers() {
        let handle = ServerHandle::default();
        let mut subscriber = handle.client();
        let mut pattern_subscriber = handle.client();
        let mut publisher = handle.client();

        let ack = subscriber.command(&[b"SUBSCRIBE", b"news.tech"]).expect("ok");
        assert_eq!(
            ack,
            RespFrame::Push(vec![bulk(b"subscribe"), bulk(b"news.tech"), RespFrame::Integer(1)]),
        );
        pattern_subscriber.command(&[b"PSUBSCRIBE", b"news.*"]).expect("ok");

        assert_eq!(
            publisher.command(&[b"PUBLISH", b"news.tech", b"hi"]).expect("ok"),
            RespFrame::Integer(2),
        );
        let message = subscriber.next_push().expect("delivered");
        assert_eq!(
            message,
            RespFrame::Push(vec![bulk(b"message"), bulk(b"news.tech"), bulk(b"hi")]),
        );
        let pmessage = pattern_subscriber.next_push().expect("delivered");
        assert_eq!(
            pmessage,
            RespFrame::Push(vec![
                bulk(b"pmessage"),
                bulk(b"news.*"),
                bulk(b"news.tech"),
                bulk(b"hi"),
            ]),
        );
    }

    #[test]
    fn subscribed_connections_reject_data_commands() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        client.command(&[b"SUBSCRIBE", b"c"]).expect("ok");
        let reply = client.command(&[b"GET", b"k"]).expect("ok");
        assert!(matches!(reply, RespFrame::Error(text) if text.contains("only (P|S)SUBSCRIBE")));
        // PING stays allowed.
        assert_eq!(client.command(&[b"PING"]).expect("ok"), simple("PONG"));
        client.command(&[b"UNSUBSCRIBE"]).expect("ok");
        assert_eq!(
            client.command(&[b"GET", b"k"]).expect("ok"),
            RespFrame::BulkString(None),
        );
    }

    #[test]
    fn shard_channels_are_separate() {
        let handle = ServerHandle::default();
        let mut shard_sub = handle.client();
        let mut publisher = handle.client();
        shard_sub.command(&[b"SSUBSCRIBE", b"c"]).expect("ok");
        assert_eq!(
            publisher.command(&[b"PUBLISH", b"c", b"x"]).expect("ok"),
            RespFrame::Integer(0),
        );
        assert_eq!(
            publisher.command(&[b"SPUBLISH", b"c", b"x"]).expect("ok"),
            RespFrame::Integer(1),
        );
    }

    #[test]
    fn keyspace_notifications_follow_the_flag_mask() {
        let handle = ServerHandle::default();
        let mut subscriber = handle.client();
        let mut writer = handle.client();
        writer
            .command(&[b"CONFIG", b"SET", b"notify-keyspace-events", b"KEA"])
            .expect("ok");
        subscriber
            .command(&[b"PSUBSCRIBE", b"__key*@0__:*"])
            .expect("ok");
        writer.command(&[b"SET", b"foo", b"bar"]).expect("ok");
        let first = subscriber.next_push().expect("keyspace event");
        let RespFrame::Push(parts) = &first else {
            panic!("expected push");
        };
        assert_eq!(parts[2], bulk(b"__keyspace@0__:foo"));
        assert_eq!(parts[3], bulk(b"set"));
        let second = subscriber.next_push().expect("keyevent event");
        let RespFrame::Push(parts) = &second else {
            panic!("expected push");
        };
        assert_eq!(parts[2], bulk(b"__keyevent@0__:set"));
        assert_eq!(parts[3], bulk(b"foo"));
    }

    #[test]
    fn expired_notification_fires_on_lazy_access() {
        let handle = ServerHandle::default();
        handle.set_time_ms(0);
        let mut subscriber = handle.client();
        let mut writer = handle.client();
        writer
            .command(&[b"CONFIG", b"SET", b"notify-keyspace-events", b"Ex"])
            .expect("ok");
        writer.command(&[b"SET", b"gone", b"v", b"PX", b"10"]).expect("ok");
        subscriber
            .command(&[b"SUBSCRIBE", b"__keyevent@0__:expired"])
            .expect("ok");
        handle.set_time_ms(50);
        writer.command(&[b"GET", b"gone"]).expect("ok");
        let event = subscriber.next_push().expect("expired event");
        let RespFrame::Push(parts) = &event else {
            panic!("expected push");
        };
        assert_eq!(parts[2], bulk(b"gone"));
    }

    #[test]
    fn hello_negotiates_protocol() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        assert_eq!(client.protocol(), ProtocolVersion::Resp2);
        let RespFrame::Map(pairs) = client.command(&[b"HELLO", b"3"]).expect("ok") else {
            panic!("expected map");
        };
        assert!(pairs.iter().any(|(k, v)| {
            *k == bulk(b"proto") && *v == RespFrame::Integer(3)
        }));
        assert_eq!(client.protocol(), ProtocolVersion::Resp3);
        assert_eq!(
            client.command(&[b"HELLO", b"9"]).expect("ok"),
            RespFrame::Error("NOPROTO unsupported protocol version".to_string()),
        );
    }

    #[test]
    fn auth_gate_when_password_configured() {
        let config = Config {
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let handle = Server::new(config);
        let mut client = handle.client();
        assert_eq!(
            client.command(&[b"GET", b"k"]).expect("ok"),
            RespFrame::Error(NOAUTH_ERROR.to_string()),
        );
        assert_eq!(
            client.command(&[b"AUTH", b"wrong"]).expect("ok"),
            RespFrame::Error(WRONGPASS_ERROR.to_string()),
        );
        assert_eq!(client.command(&[b"AUTH", b"hunter2"]).expect("ok"), RespFrame::ok());
        assert_eq!(
            client.command(&[b"GET", b"k"]).expect("ok"),
            RespFrame::BulkString(None),
        );
    }

    #[test]
    fn auth_without_password_configured_errors() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        let reply = client.command(&[b"AUTH", b"whatever"]).expect("ok");
        assert!(matches!(reply, RespFrame::Error(text) if text.starts_with("ERR Client sent AUTH")));
    }

    #[test]
    fn reset_clears_transaction_and_subscriptions() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        client.command(&[b"SUBSCRIBE", b"c"]).expect("ok");
        assert_eq!(
            client.command(&[b"RESET"]).expect("ok"),
            simple("RESET"),
        );
        assert_eq!(
            client.command(&[b"GET", b"k"]).expect("ok"),
            RespFrame::BulkString(None),
        );
        client.command(&[b"MULTI"]).expect("ok");
        client.command(&[b"RESET"]).expect("ok");
        assert_eq!(
            client.command(&[b"EXEC"]).expect("ok"),
            RespFrame::Error("ERR EXEC without MULTI".to_string()),
        );
    }

    #[test]
    fn config_get_set_roundtrip() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        let RespFrame::Map(pairs) =
            client.command(&[b"CONFIG", b"GET", b"maxmemory*"]).expect("ok")
        else {
            panic!("expected map");
        };
        assert!(pairs.iter().any(|(k, _)| *k == bulk(b"maxmemory")));
        assert_eq!(
            client
                .command(&[b"CONFIG", b"SET", b"maxmemory", b"100mb"])
                .expect("ok"),
            RespFrame::ok(),
        );
        let reply = client
            .command(&[b"CONFIG", b"SET", b"not-an-option", b"1"])
            .expect("ok");
        assert!(matches!(reply, RespFrame::Error(text) if text.contains("Unknown option")));
    }

    #[test]
    fn client_subcommands() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        let RespFrame::Integer(id) = client.command(&[b"CLIENT", b"ID"]).expect("ok") else {
            panic!("expected id");
        };
        assert!(id > 0);
        client.command(&[b"CLIENT", b"SETNAME", b"worker-1"]).expect("ok");
        assert_eq!(
            client.command(&[b"CLIENT", b"GETNAME"]).expect("ok"),
            bulk(b"worker-1"),
        );
        let RespFrame::BulkString(Some(list)) =
            client.command(&[b"CLIENT", b"LIST"]).expect("ok")
        else {
            panic!("expected list");
        };
        assert!(String::from_utf8_lossy(&list).contains("name=worker-1"));
    }

    #[test]
    fn client_kill_closes_the_victim() {
        let handle = ServerHandle::default();
        let mut victim = handle.client();
        let mut killer = handle.client();
        let victim_id = victim.id().to_string();
        assert_eq!(
            killer
                .command(&[b"CLIENT", b"KILL", b"ID", victim_id.as_bytes()])
                .expect("ok"),
            RespFrame::Integer(1),
        );
        assert_eq!(
            victim.command(&[b"PING"]),
            Err(ClientError::ConnectionClosed),
        );
    }

    #[test]
    fn script_cache_and_noscript() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        let RespFrame::BulkString(Some(sha)) = client
            .command(&[b"SCRIPT", b"LOAD", b"return 1"])
            .expect("ok")
        else {
            panic!("expected sha");
        };
        assert_eq!(sha.len(), 40);
        assert_eq!(
            client.command(&[b"SCRIPT", b"EXISTS", &sha, b"0000"]).expect("ok"),
            RespFrame::Array(Some(vec![RespFrame::Integer(1), RespFrame::Integer(0)])),
        );
        // No engine installed: evaluation is refused, the cache still works.
        let reply = client.command(&[b"EVALSHA", &sha, b"0"]).expect("ok");
        assert_eq!(reply, RespFrame::Error(SCRIPTING_DISABLED_ERROR.to_string()));
        client.command(&[b"SCRIPT", b"FLUSH"]).expect("ok");
        assert_eq!(
            client.command(&[b"EVALSHA", &sha, b"0"]).expect("ok"),
            RespFrame::Error(NOSCRIPT_ERROR.to_string()),
        );
    }

    struct EchoEngine;

    impl ScriptEngine for EchoEngine {
        fn eval(
            &mut self,
            body: &[u8],
            keys: &[Vec<u8>],
            _args: &[Vec<u8>],
            ctx: &mut dyn ScriptContext,
        ) -> RespFrame {
            if body == b"call" {
                return ctx.call(&[b"GET".to_vec(), keys[0].clone()]);
            }
            RespFrame::BulkString(Some(body.to_vec()))
        }
    }

    #[test]
    fn installed_engine_receives_eval() {
        let handle = ServerHandle::default();
        handle.install_script_engine(Box::new(EchoEngine));
        let mut client = handle.client();
        client.command(&[b"SET", b"k", b"from-script"]).expect("ok");
        assert_eq!(
            client.command(&[b"EVAL", b"call", b"1", b"k"]).expect("ok"),
            bulk(b"from-script"),
        );
        assert_eq!(
            client.command(&[b"EVAL", b"body", b"0"]).expect("ok"),
            bulk(b"body"),
        );
    }

    #[test]
    fn dbsize_and_flushall_span_databases() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        client.command(&[b"SET", b"a", b"1"]).expect("ok");
        client.command(&[b"SELECT", b"2"]).expect("ok");
        client.command(&[b"SET", b"b", b"2"]).expect("ok");
        assert_eq!(client.command(&[b"DBSIZE"]).expect("ok"), RespFrame::Integer(1));
        client.command(&[b"FLUSHALL"]).expect("ok");
        assert_eq!(client.command(&[b"DBSIZE"]).expect("ok"), RespFrame::Integer(0));
        assert_eq!(handle.db_len(0), 0);
    }

    #[test]
    fn seed_prepopulates_database_zero() {
        let handle = ServerHandle::default();
        handle.seed(&[(b"a".as_slice(), b"1".as_slice()), (b"b", b"2")]);
        let mut client = handle.client();
        assert_eq!(client.command(&[b"GET", b"a"]).expect("ok"), bulk(b"1"));
        assert_eq!(handle.db_len(0), 2);
    }

    #[test]
    fn info_reports_keyspace() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        client.command(&[b"SET", b"k", b"v"]).expect("ok");
        let RespFrame::Verbatim(_, body) = client.command(&[b"INFO"]).expect("ok") else {
            panic!("expected verbatim");
        };
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("redis_mode:standalone"));
        assert!(text.contains("db0:keys=1"));
    }

    #[test]
    fn connection_speaks_resp2_bytes() {
        let handle = ServerHandle::default();
        let mut connection = Connection::new(handle.client());
        let out = connection
            .feed(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
            .expect("ok");
        assert_eq!(out, b"+OK\r\n$3\r\nbar\r\n");
    }

    #[test]
    fn connection_accepts_inline_commands() {
        let handle = ServerHandle::default();
        let mut connection = Connection::new(handle.client());
        let out = connection.feed(b"PING\r\n").expect("ok");
        assert_eq!(out, b"+PONG\r\n");
    }

    #[test]
    fn connection_protocol_error_is_fatal() {
        let handle = ServerHandle::default();
        let mut connection = Connection::new(handle.client());
        let out = connection.feed(b"*zz\r\n").expect("ok");
        assert!(String::from_utf8_lossy(&out).contains("Protocol error"));
        assert!(connection.is_closed());
        assert_eq!(connection.feed(b"PING\r\n"), Err(ClientError::ConnectionClosed));
    }

    #[test]
    fn connection_partial_frames_buffer() {
        let handle = ServerHandle::default();
        let mut connection = Connection::new(handle.client());
        let out = connection.feed(b"*1\r\n$4\r\nPI").expect("ok");
        assert!(out.is_empty());
        let out = connection.feed(b"NG\r\n").expect("ok");
        assert_eq!(out, b"+PONG\r\n");
    }

    #[test]
    fn xread_nonblocking_returns_null_when_empty() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        assert_eq!(
            client
                .command(&[b"XREAD", b"COUNT", b"5", b"STREAMS", b"s", b"0"])
                .expect("ok"),
            RespFrame::Array(None),
        );
        client.command(&[b"XADD", b"s", b"1-1", b"f", b"v"]).expect("ok");
        let RespFrame::Array(Some(streams)) = client
            .command(&[b"XREAD", b"STREAMS", b"s", b"0"])
            .expect("ok")
        else {
            panic!("expected array");
        };
        assert_eq!(streams.len(), 1);
    }

    #[test]
    fn xreadgroup_routes_group_errors() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        client.command(&[b"XADD", b"s", b"1-1", b"f", b"v"]).expect("ok");
        let reply = client
            .command(&[b"XREADGROUP", b"GROUP", b"g", b"c", b"STREAMS", b"s", b">"])
            .expect("ok");
        assert!(matches!(reply, RespFrame::Error(text) if text.starts_with("NOGROUP")));
    }

    #[test]
    fn blpop_returns_immediately_when_ready() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        client.command(&[b"RPUSH", b"q", b"job"]).expect("ok");
        assert_eq!(
            client.command(&[b"BLPOP", b"q", b"0"]).expect("ok"),
            RespFrame::Array(Some(vec![bulk(b"q"), bulk(b"job")])),
        );
        assert_eq!(
            client.command(&[b"EXISTS", b"q"]).expect("ok"),
            RespFrame::Integer(0),
        );
    }

    #[test]
    fn blpop_times_out_with_null() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        let reply = client.command(&[b"BLPOP", b"empty", b"0.05"]).expect("ok");
        assert_eq!(reply, RespFrame::Array(None));
    }

    #[test]
    fn blpop_in_multi_never_blocks() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        client.command(&[b"MULTI"]).expect("ok");
        client.command(&[b"BLPOP", b"empty", b"0"]).expect("ok");
        assert_eq!(
            client.command(&[b"EXEC"]).expect("ok"),
            RespFrame::Array(Some(vec![RespFrame::Array(None)])),
        );
    }

    #[test]
    fn negative_timeout_is_rejected() {
        let handle = ServerHandle::default();
        let mut client = handle.client();
        assert_eq!(
            client.command(&[b"BLPOP", b"q", b"-1"]).expect("ok"),
            RespFrame::Error("ERR timeout is negative".to_string()),
        );
    }
}
