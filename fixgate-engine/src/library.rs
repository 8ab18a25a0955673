/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Library-side view of the gateway.
//!
//! A [`GatewayLibrary`] registers with the engine over the conduit, pumps
//! engine notifications into a [`SessionHandler`], and emits application
//! heartbeats. Session handles expose the observables the framer maintains
//! (state, counters) through atomics; every mutation travels back to the
//! framer as a message.

use crate::command::AdminCommand;
use crate::engine::GatewayEngine;
use crate::protocol::{self, DisconnectReason, EngineToLibrary, LibraryToEngine, SessionSnapshot};
use crate::reply::Reply;
use fixgate_core::{ConnectionUuid, EngineError, LibraryId, SessionId};
use fixgate_session::ilink::{NewOrderParams, NotAppliedResponse};
use fixgate_session::{FixSessionConfig, IlinkSessionConfig, SessionState};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Session facts maintained by the framer, readable from library threads.
#[derive(Debug, Default)]
pub struct SessionObservables {
    state: AtomicU8,
    next_sent_seq: AtomicU64,
    next_recv_seq: AtomicU64,
    retransmit_fill_seq: AtomicU64,
    uuid: AtomicU64,
}

impl SessionObservables {
    /// Creates observables for a fresh session.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let observables = Self::default();
        observables
            .retransmit_fill_seq
            .store(fixgate_core::NOT_AWAITING_RETRANSMIT, Ordering::SeqCst);
        observables.next_sent_seq.store(1, Ordering::SeqCst);
        observables.next_recv_seq.store(1, Ordering::SeqCst);
        Arc::new(observables)
    }

    /// Publishes a new snapshot; called only by the framer.
    pub fn publish(
        &self,
        state: SessionState,
        next_sent_seq: u64,
        next_recv_seq: u64,
        retransmit_fill_seq: u64,
        uuid: ConnectionUuid,
    ) {
        self.next_sent_seq.store(next_sent_seq, Ordering::SeqCst);
        self.next_recv_seq.store(next_recv_seq, Ordering::SeqCst);
        self.retransmit_fill_seq
            .store(retransmit_fill_seq, Ordering::SeqCst);
        self.uuid.store(uuid.value(), Ordering::SeqCst);
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Returns the session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_code(self.state.load(Ordering::SeqCst))
            .unwrap_or(SessionState::Disconnected)
    }

    /// Returns the next outbound sequence number.
    #[must_use]
    pub fn next_sent_seq(&self) -> u64 {
        self.next_sent_seq.load(Ordering::SeqCst)
    }

    /// Returns the next expected inbound sequence number.
    #[must_use]
    pub fn next_recv_seq(&self) -> u64 {
        self.next_recv_seq.load(Ordering::SeqCst)
    }

    /// Returns the retransmit fill counter.
    #[must_use]
    pub fn retransmit_fill_seq(&self) -> u64 {
        self.retransmit_fill_seq.load(Ordering::SeqCst)
    }

    /// Returns the connection uuid.
    #[must_use]
    pub fn uuid(&self) -> ConnectionUuid {
        ConnectionUuid::new(self.uuid.load(Ordering::SeqCst))
    }
}

/// Callbacks a library implements for the sessions it owns.
pub trait SessionHandler: Send + Sync {
    /// An application message arrived.
    fn on_business_message(
        &self,
        session_id: SessionId,
        template_id: u16,
        data: &[u8],
        retransmitted: bool,
    );

    /// A retransmit request chunk was rejected. The session continues.
    fn on_retransmit_reject(&self, session_id: SessionId, reason: &str, error_codes: u16) {
        let _ = (session_id, reason, error_codes);
    }

    /// The exchange reported outbound messages as not applied; choose
    /// whether to gapfill or retransmit.
    fn on_not_applied(
        &self,
        session_id: SessionId,
        from_seq_no: u64,
        msg_count: u64,
    ) -> NotAppliedResponse {
        let _ = (session_id, from_seq_no, msg_count);
        NotAppliedResponse::Gapfill
    }

    /// Ownership of a session was handed to this library.
    fn on_session_acquired(&self, snapshot: &SessionSnapshot) {
        let _ = snapshot;
    }

    /// A session this library owned is gone.
    fn on_disconnect(&self, session_id: SessionId, reason: &DisconnectReason) {
        let _ = (session_id, reason);
    }
}

/// Handle to an established iLink3 session.
#[derive(Debug, Clone)]
pub struct IlinkSessionHandle {
    /// The session id.
    pub session_id: SessionId,
    observables: Arc<SessionObservables>,
    to_engine: mpsc::Sender<LibraryToEngine>,
}

impl IlinkSessionHandle {
    pub(crate) fn new(
        session_id: SessionId,
        observables: Arc<SessionObservables>,
        to_engine: mpsc::Sender<LibraryToEngine>,
    ) -> Self {
        Self {
            session_id,
            observables,
            to_engine,
        }
    }

    /// Returns the session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.observables.state()
    }

    /// Returns the connection uuid.
    #[must_use]
    pub fn uuid(&self) -> ConnectionUuid {
        self.observables.uuid()
    }

    /// Returns the next outbound sequence number.
    #[must_use]
    pub fn next_sent_seq(&self) -> u64 {
        self.observables.next_sent_seq()
    }

    /// Returns the next expected inbound sequence number.
    #[must_use]
    pub fn next_recv_seq(&self) -> u64 {
        self.observables.next_recv_seq()
    }

    /// Returns the retransmit fill counter, or
    /// [`fixgate_core::NOT_AWAITING_RETRANSMIT`].
    #[must_use]
    pub fn retransmit_fill_seq(&self) -> u64 {
        self.observables.retransmit_fill_seq()
    }

    /// Enqueues a NewOrderSingle toward the framer.
    ///
    /// # Errors
    /// Returns [`EngineError::InboxFull`] when the conduit is full; retry
    /// on a later duty cycle.
    pub fn try_send_order(&self, params: NewOrderParams) -> Result<(), EngineError> {
        self.to_engine
            .try_send(LibraryToEngine::SendNewOrder {
                session_id: self.session_id,
                params,
            })
            .map_err(|_| EngineError::InboxFull)
    }

    /// Requests a graceful termination.
    ///
    /// # Errors
    /// Returns [`EngineError::InboxFull`] when the conduit is full.
    pub fn terminate(&self, reason: &str, error_code: u16) -> Result<(), EngineError> {
        self.to_engine
            .try_send(LibraryToEngine::Terminate {
                session_id: self.session_id,
                reason: reason.to_string(),
                error_code,
            })
            .map_err(|_| EngineError::InboxFull)
    }
}

/// Handle to an established FIX session.
#[derive(Debug, Clone)]
pub struct FixSessionHandle {
    /// The session id.
    pub session_id: SessionId,
    observables: Arc<SessionObservables>,
    to_engine: mpsc::Sender<LibraryToEngine>,
}

impl FixSessionHandle {
    pub(crate) fn new(
        session_id: SessionId,
        observables: Arc<SessionObservables>,
        to_engine: mpsc::Sender<LibraryToEngine>,
    ) -> Self {
        Self {
            session_id,
            observables,
            to_engine,
        }
    }

    /// Returns the session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.observables.state()
    }

    /// Returns the next outbound sequence number.
    #[must_use]
    pub fn next_sent_seq(&self) -> u64 {
        self.observables.next_sent_seq()
    }

    /// Returns the next expected inbound sequence number.
    #[must_use]
    pub fn next_recv_seq(&self) -> u64 {
        self.observables.next_recv_seq()
    }

    /// Enqueues an application message toward the framer.
    ///
    /// # Errors
    /// Returns [`EngineError::InboxFull`] when the conduit is full.
    pub fn try_send_app(
        &self,
        msg_type: &str,
        fields: Vec<(u32, String)>,
    ) -> Result<(), EngineError> {
        self.to_engine
            .try_send(LibraryToEngine::SendFixApp {
                session_id: self.session_id,
                msg_type: msg_type.to_string(),
                fields,
            })
            .map_err(|_| EngineError::InboxFull)
    }

    /// Requests a graceful logout.
    ///
    /// # Errors
    /// Returns [`EngineError::InboxFull`] when the conduit is full.
    pub fn initiate_logout(&self) -> Result<(), EngineError> {
        self.to_engine
            .try_send(LibraryToEngine::InitiateLogout {
                session_id: self.session_id,
            })
            .map_err(|_| EngineError::InboxFull)
    }
}

/// Library configuration.
#[derive(Debug, Clone)]
pub struct LibraryConfiguration {
    /// This library's id; must be unique per engine and non-zero.
    pub library_id: LibraryId,
    /// Deadline applied to admin replies issued from this library.
    pub reply_timeout: Duration,
    /// Cadence of application heartbeats toward the engine.
    pub application_heartbeat_interval: Duration,
}

impl LibraryConfiguration {
    /// Creates a configuration with default timings.
    #[must_use]
    pub fn new(library_id: LibraryId) -> Self {
        Self {
            library_id,
            reply_timeout: Duration::from_secs(10),
            application_heartbeat_interval: Duration::from_millis(500),
        }
    }

    /// Sets the reply timeout.
    #[must_use]
    pub const fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }
}

/// Business-logic side of the gateway.
#[derive(Debug)]
pub struct GatewayLibrary {
    library_id: LibraryId,
    reply_timeout: Duration,
    admin_tx: mpsc::Sender<AdminCommand>,
    to_engine: mpsc::Sender<LibraryToEngine>,
    pump: JoinHandle<()>,
}

impl GatewayLibrary {
    /// Registers a library with an engine in this process.
    ///
    /// Returns once the engine acknowledged the registration.
    ///
    /// # Errors
    /// Returns [`EngineError::InboxFull`] when the admin inbox rejected the
    /// registration, or [`EngineError::Closed`] when the engine is gone.
    pub async fn connect(
        engine: &GatewayEngine,
        config: LibraryConfiguration,
        handler: Arc<dyn SessionHandler>,
    ) -> Result<Self, EngineError> {
        let admin_tx = engine.admin_sender();
        let (engine_end, library_end) = protocol::conduit();
        let to_engine = library_end.to_engine.clone();

        let reply = Reply::new(Instant::now() + config.reply_timeout);
        admin_tx
            .try_send(AdminCommand::ConnectLibrary {
                library_id: config.library_id,
                endpoint: engine_end,
                reply: Arc::clone(&reply),
            })
            .map_err(|_| EngineError::InboxFull)?;
        if reply.await_done().await != crate::reply::ReplyState::Completed {
            return Err(EngineError::Closed);
        }

        let pump = tokio::spawn(pump_library(
            config.library_id,
            library_end.from_engine,
            library_end.to_engine,
            config.application_heartbeat_interval,
            handler,
        ));

        Ok(Self {
            library_id: config.library_id,
            reply_timeout: config.reply_timeout,
            admin_tx,
            to_engine,
            pump,
        })
    }

    /// Returns this library's id.
    #[must_use]
    pub const fn library_id(&self) -> LibraryId {
        self.library_id
    }

    /// Initiates an iLink3 session.
    ///
    /// # Returns
    /// `None` when the admin inbox is full; retry on a later duty cycle.
    #[must_use]
    pub fn initiate_ilink(&self, config: IlinkSessionConfig) -> Option<Arc<Reply<IlinkSessionHandle>>> {
        let timeout = config.timeout.unwrap_or(self.reply_timeout);
        let reply = Reply::new(Instant::now() + timeout);
        self.admin_tx
            .try_send(AdminCommand::InitiateIlink {
                library_id: self.library_id,
                config,
                to_engine: self.to_engine.clone(),
                reply: Arc::clone(&reply),
            })
            .ok()?;
        Some(reply)
    }

    /// Initiates a FIX session.
    ///
    /// # Returns
    /// `None` when the admin inbox is full; retry on a later duty cycle.
    #[must_use]
    pub fn initiate_fix(&self, config: FixSessionConfig) -> Option<Arc<Reply<FixSessionHandle>>> {
        let timeout = config.timeout.unwrap_or(self.reply_timeout);
        let reply = Reply::new(Instant::now() + timeout);
        self.admin_tx
            .try_send(AdminCommand::InitiateFix {
                library_id: self.library_id,
                config,
                to_engine: self.to_engine.clone(),
                reply: Arc::clone(&reply),
            })
            .ok()?;
        Some(reply)
    }

    /// Returns an unowned session to this library's ownership.
    ///
    /// # Errors
    /// Returns [`EngineError::InboxFull`] when the conduit is full.
    pub fn request_session(&self, session_id: SessionId) -> Result<(), EngineError> {
        self.to_engine
            .try_send(LibraryToEngine::RequestSession {
                library_id: self.library_id,
                session_id,
            })
            .map_err(|_| EngineError::InboxFull)
    }

    /// Releases an owned session back to the engine.
    ///
    /// # Errors
    /// Returns [`EngineError::InboxFull`] when the conduit is full.
    pub fn release_session(&self, session_id: SessionId) -> Result<(), EngineError> {
        self.to_engine
            .try_send(LibraryToEngine::ReleaseSession {
                library_id: self.library_id,
                session_id,
            })
            .map_err(|_| EngineError::InboxFull)
    }

    /// Stops the library's pump task.
    pub fn close(&self) {
        self.pump.abort();
    }
}

impl Drop for GatewayLibrary {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump_library(
    library_id: LibraryId,
    mut from_engine: mpsc::Receiver<EngineToLibrary>,
    to_engine: mpsc::Sender<LibraryToEngine>,
    heartbeat_interval: Duration,
    handler: Arc<dyn SessionHandler>,
) {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    loop {
        tokio::select! {
            message = from_engine.recv() => {
                let Some(message) = message else {
                    debug!(%library_id, "engine conduit closed");
                    return;
                };
                dispatch(library_id, message, &to_engine, handler.as_ref()).await;
            }
            _ = heartbeat.tick() => {
                if to_engine
                    .send(LibraryToEngine::ApplicationHeartbeat { library_id })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

async fn dispatch(
    library_id: LibraryId,
    message: EngineToLibrary,
    to_engine: &mpsc::Sender<LibraryToEngine>,
    handler: &dyn SessionHandler,
) {
    match message {
        EngineToLibrary::Business {
            session_id,
            template_id,
            data,
            retransmitted,
        } => handler.on_business_message(session_id, template_id, &data, retransmitted),
        EngineToLibrary::RetransmitReject {
            session_id,
            reason,
            error_codes,
        } => handler.on_retransmit_reject(session_id, &reason, error_codes),
        EngineToLibrary::NotApplied {
            session_id,
            from_seq_no,
            msg_count,
        } => {
            let response = handler.on_not_applied(session_id, from_seq_no, msg_count);
            if to_engine
                .send(LibraryToEngine::NotAppliedResponse {
                    session_id,
                    response,
                })
                .await
                .is_err()
            {
                warn!(%library_id, "engine gone while answering NotApplied");
            }
        }
        EngineToLibrary::ManageSession { snapshot } => handler.on_session_acquired(&snapshot),
        EngineToLibrary::Disconnect { session_id, reason } => {
            handler.on_disconnect(session_id, &reason);
        }
        EngineToLibrary::ReleaseComplete { session_id } => {
            debug!(%library_id, %session_id, "release complete");
        }
        EngineToLibrary::ControlNotification { libraries } => {
            debug!(%library_id, ?libraries, "library set changed");
        }
    }
}
