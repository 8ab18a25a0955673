/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! The framer reactor.
//!
//! One task owns every channel, the session table, the timer sweep, the
//! admin inbox, and the library registry. Each duty cycle: drain the inbox,
//! service I/O events, advance timers, sweep reply deadlines. Per-connection
//! reader tasks only cut frames out of the byte stream and forward them
//! here; every state mutation happens on this task.

use crate::command::{AdminCommand, LibraryInfo, SessionInfo};
use crate::config::EngineConfiguration;
use crate::library::{FixSessionHandle, IlinkSessionHandle, SessionObservables};
use crate::protocol::{DisconnectReason, EngineEndpoint, EngineToLibrary, LibraryToEngine, SessionSnapshot};
use crate::reply::{PendingReply, Reply};
use bytes::BytesMut;
use fixgate_core::types::SessionKey;
use fixgate_core::{
    ConnectionUuid, EngineError, EpochNanoClock, ErrorEvent, GatewayError, LibraryId, SessionId,
    StoreError, ENGINE_LIBRARY_ID,
};
use fixgate_sbe::IlinkMessage;
use fixgate_session::fix::FixRole;
use fixgate_session::{
    Action, FixSession, FixSessionConfig, IlinkSession, SessionState,
};
use fixgate_store::{GatewayStore, SequenceEntry};
use fixgate_tagvalue::{FixMessage, SessionMessage};
use fixgate_transport::{ChannelSupplier, FixFrameCodec, IlinkFrameCodec};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;
use tracing::{debug, error, info, warn};

/// Error-consumer code for I/O and framing failures.
const CONSUMER_CODE_IO: u32 = 3;

/// Events produced by reader, acceptor, and connect tasks.
#[derive(Debug)]
pub enum IoEvent {
    /// A connect attempt finished.
    ConnectResult {
        /// Attempt correlation id.
        attempt: u64,
        /// The channel, or the connect failure.
        result: std::io::Result<TcpStream>,
    },
    /// The acceptor produced an inbound channel.
    Accepted {
        /// The channel.
        stream: TcpStream,
        /// Remote address.
        peer: SocketAddr,
    },
    /// A complete frame arrived on a channel.
    Frame {
        /// The channel it arrived on.
        conn_id: u64,
        /// The frame bytes.
        frame: BytesMut,
    },
    /// The stream violated framing; fatal to the connection.
    DecodeFailed {
        /// The offending channel.
        conn_id: u64,
        /// The framing error.
        error: GatewayError,
    },
    /// The channel reached EOF or failed.
    Closed {
        /// The closed channel.
        conn_id: u64,
    },
}

#[derive(Debug)]
enum SessionKind {
    Ilink(IlinkSession),
    Fix(FixSession),
}

impl SessionKind {
    fn state(&self) -> SessionState {
        match self {
            Self::Ilink(s) => s.state(),
            Self::Fix(s) => s.state(),
        }
    }

    fn counters(&self) -> (u64, u64, ConnectionUuid) {
        match self {
            Self::Ilink(s) => s.counters(),
            Self::Fix(s) => {
                let (sent, recv) = s.counters();
                (sent, recv, ConnectionUuid::NULL)
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match self {
            Self::Ilink(s) => s.next_deadline(),
            Self::Fix(s) => s.next_deadline(),
        }
    }
}

#[derive(Debug)]
enum PendingInitiate {
    None,
    Ilink {
        reply: Arc<Reply<IlinkSessionHandle>>,
        to_engine: mpsc::Sender<LibraryToEngine>,
        library_id: LibraryId,
    },
    Fix {
        reply: Arc<Reply<FixSessionHandle>>,
        to_engine: mpsc::Sender<LibraryToEngine>,
        library_id: LibraryId,
    },
}

impl PendingInitiate {
    fn reply_pending(&self) -> bool {
        match self {
            Self::None => false,
            Self::Ilink { reply, .. } => reply.is_pending(),
            Self::Fix { reply, .. } => reply.is_pending(),
        }
    }
}

#[derive(Debug)]
struct SessionEntry {
    key: SessionKey,
    kind: SessionKind,
    conn_id: Option<u64>,
    attempt: Option<u64>,
    owner: LibraryId,
    observables: Arc<SessionObservables>,
    pending: PendingInitiate,
}

#[derive(Debug)]
struct LibraryEntry {
    to_library: mpsc::Sender<EngineToLibrary>,
    forwarder: JoinHandle<()>,
    last_heartbeat: Instant,
}

#[derive(Debug)]
struct CloseState {
    reply: Option<Arc<Reply<()>>>,
    deadline: Instant,
}

enum Wake {
    Admin(Option<AdminCommand>),
    Library(LibraryToEngine),
    Io(IoEvent),
    Tick,
}

/// The reactor. Constructed by the engine facade and consumed by `run`.
pub struct Framer {
    config: EngineConfiguration,
    store: Arc<dyn GatewayStore>,
    clock: Arc<dyn EpochNanoClock>,
    supplier: Arc<dyn ChannelSupplier>,

    inbox_rx: mpsc::Receiver<AdminCommand>,
    lib_tx: mpsc::Sender<LibraryToEngine>,
    lib_rx: mpsc::Receiver<LibraryToEngine>,
    io_tx: mpsc::Sender<IoEvent>,
    io_rx: mpsc::Receiver<IoEvent>,

    sessions: HashMap<SessionId, SessionEntry>,
    conn_sessions: HashMap<u64, SessionId>,
    pending_acceptors: HashMap<u64, ()>,
    writers: HashMap<u64, OwnedWriteHalf>,
    readers: HashMap<u64, JoinHandle<()>>,
    connect_attempts: HashMap<u64, SessionId>,
    libraries: HashMap<LibraryId, LibraryEntry>,
    pending_replies: Vec<Arc<dyn PendingReply>>,

    listener: Option<JoinHandle<()>>,
    next_conn_id: u64,
    next_attempt_id: u64,
    closing: Option<CloseState>,
    done: bool,
}

impl Framer {
    /// Creates a framer and the admin sender the facade submits through.
    pub fn new(
        config: EngineConfiguration,
        store: Arc<dyn GatewayStore>,
        clock: Arc<dyn EpochNanoClock>,
        inbox_rx: mpsc::Receiver<AdminCommand>,
    ) -> Self {
        let supplier = (config.channel_supplier_factory)();
        let (lib_tx, lib_rx) = mpsc::channel(1024);
        let (io_tx, io_rx) = mpsc::channel(4096);
        Self {
            config,
            store,
            clock,
            supplier,
            inbox_rx,
            lib_tx,
            lib_rx,
            io_tx,
            io_rx,
            sessions: HashMap::new(),
            conn_sessions: HashMap::new(),
            pending_acceptors: HashMap::new(),
            writers: HashMap::new(),
            readers: HashMap::new(),
            connect_attempts: HashMap::new(),
            libraries: HashMap::new(),
            pending_replies: Vec::new(),
            listener: None,
            next_conn_id: 0,
            next_attempt_id: 0,
            closing: None,
            done: false,
        }
    }

    /// Runs the duty cycle until close completes.
    pub async fn run(mut self) {
        if self.config.bind_address.is_some() {
            if let Err(e) = self.bind_acceptor().await {
                error!(error = %e, "failed to bind acceptor socket");
            }
        }
        info!(dir = %self.config.engine_dir.display(), "framer running");

        while !self.done {
            let deadline = self.next_wake();
            let wake = tokio::select! {
                cmd = self.inbox_rx.recv() => Wake::Admin(cmd),
                Some(msg) = self.lib_rx.recv() => Wake::Library(msg),
                Some(event) = self.io_rx.recv() => Wake::Io(event),
                () = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => Wake::Tick,
            };

            match wake {
                Wake::Admin(Some(cmd)) => self.handle_admin(cmd).await,
                Wake::Admin(None) => self.start_close(None).await,
                Wake::Library(msg) => self.handle_library_msg(msg).await,
                Wake::Io(event) => self.handle_io(event).await,
                Wake::Tick => {}
            }

            self.advance(Instant::now()).await;
        }

        info!("framer stopped");
    }

    fn next_wake(&self) -> Instant {
        let mut deadline = Instant::now() + self.config.idle_interval;
        for entry in self.sessions.values() {
            if let Some(next) = entry.kind.next_deadline() {
                deadline = deadline.min(next);
            }
        }
        for reply in &self.pending_replies {
            deadline = deadline.min(reply.sweep_deadline());
        }
        if let Some(closing) = &self.closing {
            deadline = deadline.min(closing.deadline);
        }
        deadline
    }

    // ---------------------------------------------------------------- admin

    async fn handle_admin(&mut self, cmd: AdminCommand) {
        match cmd {
            AdminCommand::ConnectLibrary {
                library_id,
                endpoint,
                reply,
            } => self.connect_library(library_id, endpoint, reply),
            AdminCommand::InitiateIlink {
                library_id,
                config,
                to_engine,
                reply,
            } => self.initiate_ilink(library_id, config, to_engine, reply).await,
            AdminCommand::InitiateFix {
                library_id,
                config,
                to_engine,
                reply,
            } => self.initiate_fix(library_id, config, to_engine, reply).await,
            AdminCommand::Bind { listen, reply } => {
                let result = if listen {
                    self.bind_acceptor().await
                } else {
                    self.unbind_acceptor();
                    Ok(())
                };
                match result {
                    Ok(()) => {
                        reply.complete(());
                    }
                    Err(e) => {
                        reply.error(e);
                    }
                }
            }
            AdminCommand::ResetSessionIds { backup, reply } => {
                if let Some(&session_id) = self.sessions.keys().next() {
                    reply.error(StoreError::SessionConnected { session_id }.into());
                } else {
                    match self.store.reset_state(backup.as_deref()).await {
                        Ok(()) => {
                            reply.complete(());
                        }
                        Err(e) => {
                            reply.error(e.into());
                        }
                    }
                }
            }
            AdminCommand::ResetSequenceNumber { session_id, reply } => {
                if self.sessions.contains_key(&session_id) {
                    reply.error(StoreError::SessionConnected { session_id }.into());
                } else {
                    match self.store.reset_sequence_number(session_id).await {
                        Ok(()) => {
                            reply.complete(());
                        }
                        Err(e) => {
                            reply.error(e.into());
                        }
                    }
                }
            }
            AdminCommand::LookupSessionId { key, reply } => {
                match self.store.lookup(&key).await {
                    Ok(Some(session_id)) => {
                        reply.complete(session_id);
                    }
                    Ok(None) => {
                        reply.error(EngineError::UnknownSession.into());
                    }
                    Err(e) => {
                        reply.error(e.into());
                    }
                }
            }
            AdminCommand::Libraries { reply } => {
                let infos = self
                    .libraries
                    .keys()
                    .map(|&library_id| LibraryInfo {
                        library_id,
                        owned_sessions: self
                            .sessions
                            .values()
                            .filter(|e| e.owner == library_id)
                            .count(),
                    })
                    .collect();
                reply.complete(infos);
            }
            AdminCommand::AllSessions { reply } => match self.store.all_sessions().await {
                Ok(known) => {
                    let infos = known
                        .into_iter()
                        .map(|(session_id, key)| SessionInfo {
                            session_id,
                            key,
                            state: self
                                .sessions
                                .get(&session_id)
                                .map_or(SessionState::Disconnected, |e| e.kind.state()),
                        })
                        .collect();
                    reply.complete(infos);
                }
                Err(e) => {
                    reply.error(e.into());
                }
            },
            AdminCommand::PruneArchive {
                min_positions,
                reply,
            } => {
                let pruner = Arc::clone(&self.config.archive_pruner);
                match pruner.prune(min_positions).await {
                    Ok(pruned) => {
                        reply.complete(pruned);
                    }
                    Err(e) => {
                        reply.error(e);
                    }
                }
            }
            AdminCommand::StartClose { reply } => self.start_close(Some(reply)).await,
        }
    }

    fn connect_library(
        &mut self,
        library_id: LibraryId,
        endpoint: EngineEndpoint,
        reply: Arc<Reply<()>>,
    ) {
        let EngineEndpoint {
            to_library,
            mut from_library,
        } = endpoint;
        let lib_tx = self.lib_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(message) = from_library.recv().await {
                if lib_tx.send(message).await.is_err() {
                    return;
                }
            }
        });

        info!(%library_id, "library connected");
        self.libraries.insert(
            library_id,
            LibraryEntry {
                to_library,
                forwarder,
                last_heartbeat: Instant::now(),
            },
        );
        self.notify_control();
        reply.complete(());
    }

    async fn initiate_ilink(
        &mut self,
        library_id: LibraryId,
        config: fixgate_session::IlinkSessionConfig,
        to_engine: mpsc::Sender<LibraryToEngine>,
        reply: Arc<Reply<IlinkSessionHandle>>,
    ) {
        let Some(key) = fixgate_core::types::IlinkSessionKey::new(&config.session_id, &config.firm_id)
        else {
            reply.error(fixgate_core::SessionError::Configuration(
                "session or firm id too long".to_string(),
            )
            .into());
            return;
        };
        let key = SessionKey::Ilink(key);

        let session_id = match self.store.assign(&key).await {
            Ok(id) => id,
            Err(e) => {
                reply.error(e.into());
                return;
            }
        };
        if let Some(existing) = self.sessions.get(&session_id) {
            if existing.kind.state() != SessionState::Disconnected {
                reply.error(EngineError::SessionOwned {
                    owner: existing.owner,
                }
                .into());
                return;
            }
            self.sessions.remove(&session_id);
        }

        let restored = match self.store.load(session_id).await {
            Ok(entry) => entry.map(|e| (e.next_sent_seq, e.next_recv_seq, e.uuid)),
            Err(e) => {
                reply.error(e.into());
                return;
            }
        };

        let address = config.address;
        let mut session = IlinkSession::new(config, restored);
        session.on_connect_started();

        let entry = SessionEntry {
            key,
            kind: SessionKind::Ilink(session),
            conn_id: None,
            attempt: Some(self.spawn_connect(session_id, address)),
            owner: ENGINE_LIBRARY_ID,
            observables: SessionObservables::new(),
            pending: PendingInitiate::Ilink {
                reply: Arc::clone(&reply),
                to_engine,
                library_id,
            },
        };
        self.sessions.insert(session_id, entry);
        self.pending_replies.push(reply);
    }

    async fn initiate_fix(
        &mut self,
        library_id: LibraryId,
        config: FixSessionConfig,
        to_engine: mpsc::Sender<LibraryToEngine>,
        reply: Arc<Reply<FixSessionHandle>>,
    ) {
        let Some(address) = config.address else {
            reply.error(
                fixgate_core::SessionError::Configuration("initiator needs an address".to_string())
                    .into(),
            );
            return;
        };
        let key = SessionKey::Fix(fixgate_core::FixSessionKey::new(
            config.sender_comp_id.clone(),
            config.target_comp_id.clone(),
        ));

        let session_id = match self.store.assign(&key).await {
            Ok(id) => id,
            Err(e) => {
                reply.error(e.into());
                return;
            }
        };
        if let Some(existing) = self.sessions.get(&session_id) {
            if existing.kind.state() != SessionState::Disconnected {
                reply.error(EngineError::SessionOwned {
                    owner: existing.owner,
                }
                .into());
                return;
            }
            self.sessions.remove(&session_id);
        }

        let restored = match self.store.load(session_id).await {
            Ok(entry) => entry.map(|e| (e.next_sent_seq, e.next_recv_seq)),
            Err(e) => {
                reply.error(e.into());
                return;
            }
        };

        let mut session = FixSession::new(config, FixRole::Initiator, restored);
        session.on_connect_started();

        let entry = SessionEntry {
            key,
            kind: SessionKind::Fix(session),
            conn_id: None,
            attempt: Some(self.spawn_connect(session_id, address)),
            owner: ENGINE_LIBRARY_ID,
            observables: SessionObservables::new(),
            pending: PendingInitiate::Fix {
                reply: Arc::clone(&reply),
                to_engine,
                library_id,
            },
        };
        self.sessions.insert(session_id, entry);
        self.pending_replies.push(reply);
    }

    fn spawn_connect(&mut self, session_id: SessionId, address: SocketAddr) -> u64 {
        self.next_attempt_id += 1;
        let attempt = self.next_attempt_id;
        self.connect_attempts.insert(attempt, session_id);

        let supplier = Arc::clone(&self.supplier);
        let io_tx = self.io_tx.clone();
        tokio::spawn(async move {
            let result = supplier.connect(address).await;
            let _ = io_tx.send(IoEvent::ConnectResult { attempt, result }).await;
        });
        attempt
    }

    async fn bind_acceptor(&mut self) -> Result<(), GatewayError> {
        if self.listener.is_some() {
            return Ok(());
        }
        let Some(address) = self.config.bind_address else {
            return Err(fixgate_core::SessionError::Configuration(
                "no bind address configured".to_string(),
            )
            .into());
        };
        let listener = TcpListener::bind(address).await?;
        info!(%address, "acceptor bound");

        let io_tx = self.io_tx.clone();
        self.listener = Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        if io_tx.send(IoEvent::Accepted { stream, peer }).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        }));
        Ok(())
    }

    fn unbind_acceptor(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            info!("acceptor unbound");
        }
    }

    async fn start_close(&mut self, reply: Option<Arc<Reply<()>>>) {
        if self.closing.is_some() {
            if let Some(reply) = reply {
                reply.error(EngineError::Closed.into());
            }
            return;
        }
        info!("engine close requested");
        self.closing = Some(CloseState {
            reply,
            deadline: Instant::now() + self.config.reply_timeout,
        });

        let now = Instant::now();
        let now_ns = self.clock.nanos();
        let now_ts = self.clock.timestamp();
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for session_id in ids {
            let actions = match self.sessions.get_mut(&session_id) {
                Some(entry) if entry.kind.state() == SessionState::Established => {
                    match &mut entry.kind {
                        SessionKind::Ilink(s) => {
                            s.initiate_terminate("engine closing", 0, now, now_ns)
                        }
                        SessionKind::Fix(s) => s.initiate_logout(Some("engine closing"), now, now_ts),
                    }
                }
                Some(_) => {
                    self.drop_session(session_id, EngineError::Closed.into());
                    continue;
                }
                None => continue,
            };
            self.apply_actions(session_id, actions).await;
        }
    }

    // ------------------------------------------------------------- library

    async fn handle_library_msg(&mut self, msg: LibraryToEngine) {
        let now = Instant::now();
        let now_ns = self.clock.nanos();
        let now_ts = self.clock.timestamp();

        match msg {
            LibraryToEngine::Connect { library_id } => {
                debug!(%library_id, "library announced over conduit");
            }
            LibraryToEngine::ApplicationHeartbeat { library_id } => {
                if let Some(entry) = self.libraries.get_mut(&library_id) {
                    entry.last_heartbeat = now;
                }
            }
            LibraryToEngine::RequestSession {
                library_id,
                session_id,
            } => {
                let snapshot = match self.sessions.get_mut(&session_id) {
                    Some(entry)
                        if entry.owner == ENGINE_LIBRARY_ID
                            && entry.kind.state().is_library_visible() =>
                    {
                        entry.owner = library_id;
                        Some(Self::snapshot_of(session_id, entry))
                    }
                    _ => None,
                };
                match snapshot {
                    Some(snapshot) => {
                        self.send_to_library(library_id, EngineToLibrary::ManageSession { snapshot });
                    }
                    None => warn!(%library_id, %session_id, "request for unavailable session"),
                }
            }
            LibraryToEngine::ReleaseSession {
                library_id,
                session_id,
            } => {
                if let Some(entry) = self.sessions.get_mut(&session_id) {
                    if entry.owner == library_id {
                        entry.owner = ENGINE_LIBRARY_ID;
                    }
                }
                self.send_to_library(library_id, EngineToLibrary::ReleaseComplete { session_id });
            }
            LibraryToEngine::SendNewOrder { session_id, params } => {
                let result = match self.sessions.get_mut(&session_id) {
                    Some(SessionEntry {
                        kind: SessionKind::Ilink(session),
                        ..
                    }) => session.send_new_order(&params, now),
                    _ => Err(fixgate_core::SessionError::InvalidState {
                        expected: "ESTABLISHED",
                        current: "DISCONNECTED",
                    }),
                };
                match result {
                    Ok(actions) => self.apply_actions(session_id, actions).await,
                    Err(e) => self.raise_error(
                        self.owner_of(session_id),
                        CONSUMER_CODE_IO,
                        format!("send refused on session {session_id}: {e}"),
                    ),
                }
            }
            LibraryToEngine::SendFixApp {
                session_id,
                msg_type,
                fields,
            } => {
                let result = match self.sessions.get_mut(&session_id) {
                    Some(SessionEntry {
                        kind: SessionKind::Fix(session),
                        ..
                    }) => session.send_app(now, |header, seq| {
                        header.app_message(&msg_type, seq, now_ts, &fields)
                    }),
                    _ => Err(fixgate_core::SessionError::InvalidState {
                        expected: "ESTABLISHED",
                        current: "DISCONNECTED",
                    }),
                };
                match result {
                    Ok(actions) => self.apply_actions(session_id, actions).await,
                    Err(e) => self.raise_error(
                        self.owner_of(session_id),
                        CONSUMER_CODE_IO,
                        format!("send refused on session {session_id}: {e}"),
                    ),
                }
            }
            LibraryToEngine::NotAppliedResponse {
                session_id,
                response,
            } => {
                let actions = match self.sessions.get_mut(&session_id) {
                    Some(SessionEntry {
                        kind: SessionKind::Ilink(session),
                        ..
                    }) => session.on_not_applied_response(response, now),
                    _ => Vec::new(),
                };
                self.apply_actions(session_id, actions).await;
            }
            LibraryToEngine::Terminate {
                session_id,
                reason,
                error_code,
            } => {
                let actions = match self.sessions.get_mut(&session_id) {
                    Some(SessionEntry {
                        kind: SessionKind::Ilink(session),
                        ..
                    }) => session.initiate_terminate(&reason, error_code, now, now_ns),
                    _ => Vec::new(),
                };
                self.apply_actions(session_id, actions).await;
            }
            LibraryToEngine::InitiateLogout { session_id } => {
                let actions = match self.sessions.get_mut(&session_id) {
                    Some(SessionEntry {
                        kind: SessionKind::Fix(session),
                        ..
                    }) => session.initiate_logout(None, now, now_ts),
                    _ => Vec::new(),
                };
                self.apply_actions(session_id, actions).await;
            }
        }
    }

    // ------------------------------------------------------------------ io

    async fn handle_io(&mut self, event: IoEvent) {
        match event {
            IoEvent::ConnectResult { attempt, result } => {
                let Some(session_id) = self.connect_attempts.remove(&attempt) else {
                    // the initiate reply already expired; drop the channel
                    drop(result);
                    return;
                };
                match result {
                    Ok(stream) => self.channel_up(session_id, stream).await,
                    Err(e) => {
                        debug!(%session_id, error = %e, "connect failed");
                        let actions = match self.sessions.get_mut(&session_id) {
                            Some(entry) => {
                                entry.attempt = None;
                                match &mut entry.kind {
                                    SessionKind::Ilink(s) => s.on_connect_failed(),
                                    SessionKind::Fix(s) => s.on_connect_failed(),
                                }
                            }
                            None => Vec::new(),
                        };
                        self.apply_actions(session_id, actions).await;
                    }
                }
            }
            IoEvent::Accepted { stream, peer } => {
                debug!(%peer, "accepted inbound channel");
                let conn_id = self.register_channel(stream, false);
                self.pending_acceptors.insert(conn_id, ());
            }
            IoEvent::Frame { conn_id, frame } => {
                if self.pending_acceptors.contains_key(&conn_id) {
                    self.acceptor_logon(conn_id, frame).await;
                } else if let Some(&session_id) = self.conn_sessions.get(&conn_id) {
                    self.dispatch_frame(session_id, conn_id, frame).await;
                }
            }
            IoEvent::DecodeFailed { conn_id, error } => {
                self.raise_error(
                    self.conn_owner(conn_id),
                    CONSUMER_CODE_IO,
                    format!("framing violation: {error}"),
                );
                self.conn_closed(conn_id).await;
            }
            IoEvent::Closed { conn_id } => self.conn_closed(conn_id).await,
        }
    }

    async fn channel_up(&mut self, session_id: SessionId, stream: TcpStream) {
        let (reply_pending, state, is_ilink) = match self.sessions.get(&session_id) {
            Some(entry) => (
                entry.pending.reply_pending(),
                entry.kind.state(),
                matches!(entry.kind, SessionKind::Ilink(_)),
            ),
            None => return,
        };
        if !reply_pending && state == SessionState::Connecting {
            // late connect after the initiate reply expired
            debug!(%session_id, "dropping channel for expired initiate");
            self.sessions.remove(&session_id);
            return;
        }

        let conn_id = self.register_channel(stream, is_ilink);
        self.conn_sessions.insert(conn_id, session_id);

        let now = Instant::now();
        let now_ns = self.clock.nanos();
        let now_ts = self.clock.timestamp();
        let actions = match self.sessions.get_mut(&session_id) {
            Some(entry) => {
                entry.conn_id = Some(conn_id);
                entry.attempt = None;
                match &mut entry.kind {
                    SessionKind::Ilink(s) => s.on_channel_up(now, now_ns),
                    SessionKind::Fix(s) => s.on_channel_up(now, now_ts),
                }
            }
            None => Vec::new(),
        };
        self.apply_actions(session_id, actions).await;
    }

    fn register_channel(&mut self, stream: TcpStream, is_ilink: bool) -> u64 {
        self.next_conn_id += 1;
        let conn_id = self.next_conn_id;
        let (read_half, write_half) = stream.into_split();
        self.writers.insert(conn_id, write_half);

        let io_tx = self.io_tx.clone();
        let reader = if is_ilink {
            tokio::spawn(pump_frames(conn_id, read_half, IlinkFrameCodec::new(), io_tx))
        } else {
            tokio::spawn(pump_frames(conn_id, read_half, FixFrameCodec::new(), io_tx))
        };
        self.readers.insert(conn_id, reader);
        conn_id
    }

    async fn dispatch_frame(&mut self, session_id: SessionId, conn_id: u64, frame: BytesMut) {
        enum Outcome {
            Actions(Vec<Action>),
            Fatal(String),
            PassThrough,
        }

        let now = Instant::now();
        let now_ns = self.clock.nanos();
        let now_ts = self.clock.timestamp();

        let outcome = {
            let Some(entry) = self.sessions.get_mut(&session_id) else {
                return;
            };
            match &mut entry.kind {
                SessionKind::Ilink(session) => match IlinkMessage::decode(&frame) {
                    Ok(message) => Outcome::Actions(session.on_message(&message, now, now_ns)),
                    Err(e) if e.is_fatal() => Outcome::Fatal(e.to_string()),
                    Err(_) => Outcome::PassThrough,
                },
                SessionKind::Fix(session) => match FixMessage::parse(&frame) {
                    Ok(message) => Outcome::Actions(session.on_message(&message, now, now_ts)),
                    Err(e) => Outcome::Fatal(e.to_string()),
                },
            }
        };

        match outcome {
            Outcome::Actions(actions) => self.apply_actions(session_id, actions).await,
            Outcome::Fatal(description) => {
                self.raise_error(
                    self.owner_of(session_id),
                    CONSUMER_CODE_IO,
                    format!("fatal decode error: {description}"),
                );
                self.conn_closed(conn_id).await;
            }
            Outcome::PassThrough => {
                debug!(conn_id, "passing through unknown template");
            }
        }
    }

    async fn acceptor_logon(&mut self, conn_id: u64, frame: BytesMut) {
        let Ok(msg) = FixMessage::parse(&frame) else {
            warn!(conn_id, "unparseable first frame on accepted channel");
            self.conn_closed(conn_id).await;
            return;
        };
        let Ok(SessionMessage::Logon { heart_bt_int, .. }) = SessionMessage::classify(&msg) else {
            warn!(conn_id, "first inbound frame was not a logon");
            self.conn_closed(conn_id).await;
            return;
        };

        let (sender, target) = match (
            msg.get_str(fixgate_tagvalue::tags::SENDER_COMP_ID)
                .and_then(Result::ok)
                .and_then(fixgate_core::CompId::new),
            msg.get_str(fixgate_tagvalue::tags::TARGET_COMP_ID)
                .and_then(Result::ok)
                .and_then(fixgate_core::CompId::new),
        ) {
            (Some(sender), Some(target)) => (sender, target),
            _ => {
                warn!(conn_id, "logon missing comp ids");
                self.conn_closed(conn_id).await;
                return;
            }
        };

        // our local comp id is the logon's target
        let config = FixSessionConfig::new(target, sender)
            .with_heartbeat_interval(std::time::Duration::from_secs(heart_bt_int.max(1)));
        let key = SessionKey::Fix(fixgate_core::FixSessionKey::new(
            config.sender_comp_id.clone(),
            config.target_comp_id.clone(),
        ));
        let session_id = match self.store.assign(&key).await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "failed to assign acceptor session id");
                self.conn_closed(conn_id).await;
                return;
            }
        };
        let restored = self
            .store
            .load(session_id)
            .await
            .ok()
            .flatten()
            .map(|e| (e.next_sent_seq, e.next_recv_seq));

        let now = Instant::now();
        let now_ts = self.clock.timestamp();
        let mut session = FixSession::new(config, FixRole::Acceptor, restored);
        let mut actions = session.on_channel_up(now, now_ts);
        actions.extend(session.on_message(&msg, now, now_ts));

        self.pending_acceptors.remove(&conn_id);
        self.conn_sessions.insert(conn_id, session_id);
        self.sessions.insert(
            session_id,
            SessionEntry {
                key,
                kind: SessionKind::Fix(session),
                conn_id: Some(conn_id),
                attempt: None,
                owner: ENGINE_LIBRARY_ID,
                observables: SessionObservables::new(),
                pending: PendingInitiate::None,
            },
        );
        self.apply_actions(session_id, actions).await;
    }

    async fn conn_closed(&mut self, conn_id: u64) {
        self.writers.remove(&conn_id);
        if let Some(reader) = self.readers.remove(&conn_id) {
            reader.abort();
        }
        self.pending_acceptors.remove(&conn_id);

        if let Some(session_id) = self.conn_sessions.remove(&conn_id) {
            let actions = match self.sessions.get_mut(&session_id) {
                Some(entry) => {
                    entry.conn_id = None;
                    match &mut entry.kind {
                        SessionKind::Ilink(s) => s.on_channel_closed(),
                        SessionKind::Fix(s) => s.on_channel_closed(),
                    }
                }
                None => Vec::new(),
            };
            // boxed: this completes the apply_actions -> write_frame ->
            // conn_closed cycle, which would otherwise be infinitely sized
            Box::pin(self.apply_actions(session_id, actions)).await;
        }
    }

    // ------------------------------------------------------------- actions

    async fn apply_actions(&mut self, session_id: SessionId, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(frame) => {
                    let conn = self.sessions.get(&session_id).and_then(|e| e.conn_id);
                    if let Some(conn_id) = conn {
                        self.write_frame(conn_id, &frame).await;
                    }
                }
                Action::HandshakeComplete => self.handshake_complete(session_id).await,
                Action::HandshakeFailed(error) => {
                    if let Some(entry) = self.sessions.get_mut(&session_id) {
                        match std::mem::replace(&mut entry.pending, PendingInitiate::None) {
                            PendingInitiate::Ilink { reply, .. } => {
                                reply.error(error.into());
                            }
                            PendingInitiate::Fix { reply, .. } => {
                                reply.error(error.into());
                            }
                            PendingInitiate::None => {}
                        }
                    }
                }
                Action::ForwardBusiness {
                    template_id,
                    data,
                    retransmitted,
                } => {
                    let owner = self.owner_of(session_id);
                    if owner != ENGINE_LIBRARY_ID {
                        self.send_to_library(
                            owner,
                            EngineToLibrary::Business {
                                session_id,
                                template_id,
                                data,
                                retransmitted,
                            },
                        );
                    }
                }
                Action::RetransmitRejected {
                    reason,
                    error_codes,
                } => {
                    let owner = self.owner_of(session_id);
                    if owner != ENGINE_LIBRARY_ID {
                        self.send_to_library(
                            owner,
                            EngineToLibrary::RetransmitReject {
                                session_id,
                                reason,
                                error_codes,
                            },
                        );
                    }
                }
                Action::NotAppliedReported {
                    from_seq_no,
                    msg_count,
                } => {
                    let owner = self.owner_of(session_id);
                    if owner != ENGINE_LIBRARY_ID {
                        self.send_to_library(
                            owner,
                            EngineToLibrary::NotApplied {
                                session_id,
                                from_seq_no,
                                msg_count,
                            },
                        );
                    }
                }
                Action::SequencesDirty => self.persist(session_id).await,
                Action::Unbound => {
                    let owner = self.owner_of(session_id);
                    if owner != ENGINE_LIBRARY_ID {
                        self.send_to_library(
                            owner,
                            EngineToLibrary::Disconnect {
                                session_id,
                                reason: DisconnectReason::PeerTerminated,
                            },
                        );
                    }
                    if let Some(entry) = self.sessions.get_mut(&session_id) {
                        entry.owner = ENGINE_LIBRARY_ID;
                    }
                }
                Action::Disconnect => {
                    let conn = self.sessions.get(&session_id).and_then(|e| e.conn_id);
                    if let Some(conn_id) = conn {
                        self.writers.remove(&conn_id);
                        if let Some(reader) = self.readers.remove(&conn_id) {
                            reader.abort();
                        }
                        self.conn_sessions.remove(&conn_id);
                        if let Some(entry) = self.sessions.get_mut(&session_id) {
                            entry.conn_id = None;
                        }
                    }
                }
                Action::Error { code, description } => {
                    self.raise_error(self.owner_of(session_id), code, description);
                }
            }
        }

        self.after_actions(session_id).await;
    }

    /// Publishes observables and retires the session once disconnected.
    async fn after_actions(&mut self, session_id: SessionId) {
        let Some(entry) = self.sessions.get(&session_id) else {
            return;
        };
        let state = entry.kind.state();
        let (sent, recv, uuid) = entry.kind.counters();
        let fill = match &entry.kind {
            SessionKind::Ilink(s) => s.retransmit_fill_seq(),
            SessionKind::Fix(_) => fixgate_core::NOT_AWAITING_RETRANSMIT,
        };
        entry.observables.publish(state, sent, recv, fill, uuid);

        if state == SessionState::Disconnected && entry.conn_id.is_none() && entry.attempt.is_none()
        {
            self.persist(session_id).await;
            if let Some(mut entry) = self.sessions.remove(&session_id) {
                match std::mem::replace(&mut entry.pending, PendingInitiate::None) {
                    PendingInitiate::Ilink { reply, .. } => {
                        reply.error(EngineError::Closed.into());
                    }
                    PendingInitiate::Fix { reply, .. } => {
                        reply.error(EngineError::Closed.into());
                    }
                    PendingInitiate::None => {}
                }
            }
            debug!(%session_id, "session retired");
        }
    }

    async fn handshake_complete(&mut self, session_id: SessionId) {
        // acceptor sessions are offered to the lowest-id connected library
        let default_owner = self.libraries.keys().min().copied();

        let manage = {
            let Some(entry) = self.sessions.get_mut(&session_id) else {
                return;
            };
            let snapshot = Self::snapshot_of(session_id, entry);

            match std::mem::replace(&mut entry.pending, PendingInitiate::None) {
                PendingInitiate::Ilink {
                    reply,
                    to_engine,
                    library_id,
                } => {
                    let handle = IlinkSessionHandle::new(
                        session_id,
                        Arc::clone(&entry.observables),
                        to_engine,
                    );
                    if reply.complete(handle) {
                        entry.owner = library_id;
                        Some((library_id, snapshot))
                    } else {
                        debug!(%session_id, "established after initiate expired; left unowned");
                        None
                    }
                }
                PendingInitiate::Fix {
                    reply,
                    to_engine,
                    library_id,
                } => {
                    let handle = FixSessionHandle::new(
                        session_id,
                        Arc::clone(&entry.observables),
                        to_engine,
                    );
                    if reply.complete(handle) {
                        entry.owner = library_id;
                        Some((library_id, snapshot))
                    } else {
                        debug!(%session_id, "established after initiate expired; left unowned");
                        None
                    }
                }
                PendingInitiate::None => default_owner.map(|library_id| {
                    entry.owner = library_id;
                    (library_id, snapshot)
                }),
            }
        };

        if let Some((library_id, snapshot)) = manage {
            self.send_to_library(library_id, EngineToLibrary::ManageSession { snapshot });
        }
    }

    fn snapshot_of(session_id: SessionId, entry: &SessionEntry) -> SessionSnapshot {
        let (next_sent_seq, next_recv_seq, uuid) = entry.kind.counters();
        SessionSnapshot {
            session_id,
            key: entry.key.clone(),
            state: entry.kind.state(),
            next_sent_seq,
            next_recv_seq,
            uuid,
        }
    }

    async fn write_frame(&mut self, conn_id: u64, frame: &[u8]) {
        let failed = match self.writers.get_mut(&conn_id) {
            Some(writer) => writer.write_all(frame).await.is_err(),
            None => false,
        };
        if failed {
            debug!(conn_id, "write failed, closing channel");
            self.conn_closed(conn_id).await;
        }
    }

    async fn persist(&self, session_id: SessionId) {
        let Some(entry) = self.sessions.get(&session_id) else {
            return;
        };
        let (next_sent_seq, next_recv_seq, uuid) = entry.kind.counters();
        if let Err(e) = self
            .store
            .save(
                session_id,
                SequenceEntry {
                    next_sent_seq,
                    next_recv_seq,
                    uuid,
                },
            )
            .await
        {
            error!(%session_id, error = %e, "failed to persist sequence counters");
        }
    }

    fn drop_session(&mut self, session_id: SessionId, error: GatewayError) {
        if let Some(mut entry) = self.sessions.remove(&session_id) {
            if let Some(conn_id) = entry.conn_id {
                self.writers.remove(&conn_id);
                if let Some(reader) = self.readers.remove(&conn_id) {
                    reader.abort();
                }
                self.conn_sessions.remove(&conn_id);
            }
            match std::mem::replace(&mut entry.pending, PendingInitiate::None) {
                PendingInitiate::Ilink { reply, .. } => {
                    reply.error(error);
                }
                PendingInitiate::Fix { reply, .. } => {
                    reply.error(error);
                }
                PendingInitiate::None => {}
            }
        }
    }

    // -------------------------------------------------------------- timers

    async fn advance(&mut self, now: Instant) {
        // reply deadlines first so expiry is observed on this duty cycle
        for reply in &self.pending_replies {
            reply.sweep(now);
        }
        self.pending_replies.retain(|reply| reply.still_pending());

        // abandon connect attempts whose initiate reply expired
        let abandoned: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, entry)| {
                entry.kind.state() == SessionState::Connecting && !entry.pending.reply_pending()
            })
            .map(|(&id, _)| id)
            .collect();
        for session_id in abandoned {
            debug!(%session_id, "abandoning expired connect attempt");
            if let Some(entry) = self.sessions.remove(&session_id) {
                if let Some(attempt) = entry.attempt {
                    self.connect_attempts.remove(&attempt);
                }
            }
        }

        // session timers
        let now_ns = self.clock.nanos();
        let now_ts = self.clock.timestamp();
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for session_id in ids {
            let actions = match self.sessions.get_mut(&session_id) {
                Some(entry) => match &mut entry.kind {
                    SessionKind::Ilink(s) => s.on_timer(now, now_ns),
                    SessionKind::Fix(s) => s.on_timer(now, now_ts),
                },
                None => continue,
            };
            if !actions.is_empty() {
                self.apply_actions(session_id, actions).await;
            }
        }

        // library liveness
        let expired: Vec<LibraryId> = self
            .libraries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_heartbeat) > self.config.library_timeout)
            .map(|(&id, _)| id)
            .collect();
        for library_id in expired {
            warn!(%library_id, "library timed out, releasing its sessions");
            if let Some(entry) = self.libraries.remove(&library_id) {
                entry.forwarder.abort();
            }
            for entry in self.sessions.values_mut() {
                if entry.owner == library_id {
                    entry.owner = ENGINE_LIBRARY_ID;
                }
            }
            self.notify_control();
        }

        // close completion
        if let Some(deadline) = self.closing.as_ref().map(|c| c.deadline) {
            let deadline_passed = now >= deadline;
            if self.sessions.is_empty() || deadline_passed {
                if deadline_passed {
                    warn!("close deadline passed, dropping remaining sessions");
                    let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
                    for session_id in ids {
                        self.drop_session(session_id, EngineError::Closed.into());
                    }
                }
                self.unbind_acceptor();
                for (_, entry) in self.libraries.drain() {
                    entry.forwarder.abort();
                }
                if let Some(closing) = self.closing.take() {
                    if let Some(reply) = closing.reply {
                        reply.complete(());
                    }
                }
                self.done = true;
            }
        }
    }

    // ------------------------------------------------------------- helpers

    fn owner_of(&self, session_id: SessionId) -> LibraryId {
        self.sessions
            .get(&session_id)
            .map_or(ENGINE_LIBRARY_ID, |e| e.owner)
    }

    fn conn_owner(&self, conn_id: u64) -> LibraryId {
        self.conn_sessions
            .get(&conn_id)
            .map_or(ENGINE_LIBRARY_ID, |&id| self.owner_of(id))
    }

    fn send_to_library(&self, library_id: LibraryId, message: EngineToLibrary) {
        let Some(entry) = self.libraries.get(&library_id) else {
            return;
        };
        if entry.to_library.try_send(message).is_err() {
            warn!(%library_id, "library conduit full, dropping notification");
        }
    }

    fn notify_control(&self) {
        let libraries: Vec<LibraryId> = self.libraries.keys().copied().collect();
        for entry in self.libraries.values() {
            let _ = entry.to_library.try_send(EngineToLibrary::ControlNotification {
                libraries: libraries.clone(),
            });
        }
    }

    fn raise_error(&self, library_id: LibraryId, code: u32, description: String) {
        error!(%library_id, code, "{description}");
        if let Some(consumer) = &self.config.error_consumer {
            consumer(&ErrorEvent {
                library_id,
                error_code: code,
                timestamp_ns: self.clock.nanos(),
                description,
            });
        }
    }
}

/// Reads a channel, cutting complete frames and forwarding them.
async fn pump_frames<D>(
    conn_id: u64,
    mut read_half: OwnedReadHalf,
    mut codec: D,
    io_tx: mpsc::Sender<IoEvent>,
) where
    D: Decoder<Item = BytesMut, Error = GatewayError> + Send + 'static,
{
    use tokio::io::AsyncReadExt;

    let mut buffer = BytesMut::with_capacity(8 * 1024);
    loop {
        loop {
            match codec.decode(&mut buffer) {
                Ok(Some(frame)) => {
                    if io_tx.send(IoEvent::Frame { conn_id, frame }).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    let _ = io_tx.send(IoEvent::DecodeFailed { conn_id, error }).await;
                    return;
                }
            }
        }

        match read_half.read_buf(&mut buffer).await {
            Ok(0) | Err(_) => {
                let _ = io_tx.send(IoEvent::Closed { conn_id }).await;
                return;
            }
            Ok(_) => {}
        }
    }
}
