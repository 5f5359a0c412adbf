use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::command::{self, CommandError};
use crate::game::Outbox;
use crate::kalah::Kalah;
use crate::logger::Logger;
use crate::pool::{GamePool, PoolError};
use crate::session::{Session, SessionId};
use crate::store::UserStore;

/// How often the pools advance their turn clocks.
const TICK_INTERVAL: Duration = Duration::from_millis(200);
/// Largest chunk a reader task forwards per readiness event.
const READ_CHUNK: usize = 4096;

// ── LOG EVENTS ────────────────────────────────────────────────────────────────
//
// Every loggable occurrence in the loop is a `ServerEvent` variant; the
// `Display` impl gives the logger a readable line without allocating
// anything for levels that are filtered out.

pub enum ServerEvent<'a> {
    Listening { addr: SocketAddr },
    Connected { id: SessionId, addr: SocketAddr },
    Disconnected { id: SessionId, name: Option<&'a str> },
    Inbound { id: SessionId, raw: &'a str },
    Outbound { id: SessionId, line: &'a str },
    Refused { id: SessionId, reason: &'a CommandError },
    BadEncoding { id: SessionId },
    WriteFailed { id: SessionId },
    AcceptFailed { reason: String },
    StoreSaveFailed { reason: String },
}

impl fmt::Display for ServerEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Listening { addr } =>
                write!(f, "Arbiter listening on {addr}"),
            ServerEvent::Connected { id, addr } =>
                write!(f, "[{id}] Connected from {addr}"),
            ServerEvent::Disconnected { id, name: Some(name) } =>
                write!(f, "[{id}] {name} disconnected"),
            ServerEvent::Disconnected { id, name: None } =>
                write!(f, "[{id}] Disconnected"),
            ServerEvent::Inbound { id, raw } =>
                write!(f, "[{id}] → {raw}"),
            ServerEvent::Outbound { id, line } =>
                write!(f, "[{id}] ← {line}"),
            ServerEvent::Refused { id, reason } =>
                write!(f, "[{id}] Refused: {reason}"),
            ServerEvent::BadEncoding { id } =>
                write!(f, "[{id}] Sent non-ASCII bytes, dropping the connection"),
            ServerEvent::WriteFailed { id } =>
                write!(f, "[{id}] Write failed, dropping the connection"),
            ServerEvent::AcceptFailed { reason } =>
                write!(f, "Accept error: {reason}"),
            ServerEvent::StoreSaveFailed { reason } =>
                write!(f, "Could not save the users file: {reason}"),
        }
    }
}

// ── EVENT LOOP ────────────────────────────────────────────────────────────────

/// What a connection's reader task reports back to the loop.
enum NetEvent {
    Data(SessionId, Vec<u8>),
    Closed(SessionId),
}

/// The arbiter: one task owning every session, pool, and the user store.
///
/// Connections get a reader task that forwards raw chunks over a channel.
/// Everything else happens inside [`Server::run`]'s select loop, so there
/// is no shared state and no locking anywhere.
pub struct Server {
    sessions: HashMap<SessionId, Session>,
    pools: HashMap<String, GamePool>,
    store: UserStore,
    log: Logger,
    next_session: u64,
    tx: mpsc::Sender<NetEvent>,
    rx: mpsc::Receiver<NetEvent>,
}

impl Server {
    pub fn new(store: UserStore, log: Logger) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let pools = HashMap::from([("KLH".to_string(), GamePool::new("KLH", Kalah::create))]);
        Self {
            sessions: HashMap::new(),
            pools,
            store,
            log,
            next_session: 0,
            tx,
            rx,
        }
    }

    /// Serve `listener` forever.
    pub async fn run(mut self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            self.log.info(ServerEvent::Listening { addr });
        }
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr),
                    Err(err) => self.log.warn(ServerEvent::AcceptFailed {
                        reason: err.to_string(),
                    }),
                },
                Some(event) = self.rx.recv() => {
                    let mut out = Outbox::new();
                    match event {
                        NetEvent::Data(id, bytes) => self.on_data(id, &bytes, &mut out),
                        NetEvent::Closed(id) => self.disconnect(id, &mut out),
                    }
                    self.flush(out).await;
                    self.persist();
                }
                _ = tick.tick() => {
                    let mut out = Outbox::new();
                    let now = Instant::now();
                    for pool in self.pools.values_mut() {
                        pool.tick(now, &mut self.store, &mut out, &self.log);
                    }
                    self.flush(out).await;
                    self.persist();
                }
            }
        }
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = SessionId(self.next_session);
        self.next_session += 1;
        let (mut read_half, write_half) = stream.into_split();
        self.sessions.insert(id, Session::new(id, addr.ip(), write_half));
        self.log.info(ServerEvent::Connected { id, addr });

        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) | Err(_) => {
                        let _ = tx.send(NetEvent::Closed(id)).await;
                        break;
                    }
                    Ok(n) => {
                        if tx.send(NetEvent::Data(id, buf[..n].to_vec())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn on_data(&mut self, id: SessionId, bytes: &[u8], out: &mut Outbox) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if session.lines.extend(bytes).is_err() {
            self.log.warn(ServerEvent::BadEncoding { id });
            self.disconnect(id, out);
            return;
        }
        // Drain every complete message before yielding back to the loop.
        while let Some(raw) = self
            .sessions
            .get_mut(&id)
            .and_then(|session| session.lines.pop_line())
        {
            self.log.debug(ServerEvent::Inbound { id, raw: &raw });
            self.handle_message(id, &raw, out);
        }
    }

    fn handle_message(&mut self, id: SessionId, raw: &str, out: &mut Outbox) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        let result = command::dispatch(
            session,
            &mut self.pools,
            &mut self.store,
            raw,
            Instant::now(),
            out,
            &self.log,
        );
        if let Err(err) = result {
            self.log.verbose(ServerEvent::Refused { id, reason: &err });
            out.line(id, format!("ERR {err}"));
            // A rule violation has already forfeited the offender's game;
            // reap now so the result lines land right after the ERR.
            if matches!(err, CommandError::Pool(PoolError::Rule(_))) {
                for pool in self.pools.values_mut() {
                    pool.reap(&mut self.store, out, &self.log);
                }
            }
        }
    }

    /// Tear a session down: forfeit its live game, leave matchmaking, drop
    /// the socket. Queued lines for the session are silently discarded.
    fn disconnect(&mut self, id: SessionId, out: &mut Outbox) {
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };
        self.log.info(ServerEvent::Disconnected {
            id,
            name: session.authed(),
        });
        for pool in self.pools.values_mut() {
            pool.remove(id, &mut self.store, out, &self.log);
        }
    }

    /// Write queued lines in order. A failed write disconnects the session,
    /// which may queue more results; keep draining until quiet.
    async fn flush(&mut self, mut out: Outbox) {
        loop {
            let lines = out.take();
            if lines.is_empty() {
                break;
            }
            for (id, line) in lines {
                let Some(session) = self.sessions.get_mut(&id) else {
                    continue;
                };
                self.log.trace(ServerEvent::Outbound { id, line: &line });
                if session.send(&line).await.is_err() {
                    self.log.warn(ServerEvent::WriteFailed { id });
                    self.disconnect(id, &mut out);
                }
            }
        }
    }

    fn persist(&mut self) {
        if let Err(err) = self.store.persist() {
            self.log.warn(ServerEvent::StoreSaveFailed {
                reason: err.to_string(),
            });
        }
    }
}
