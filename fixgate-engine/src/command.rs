/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Admin commands consumed on the framer's duty cycle.
//!
//! Submission is non-blocking: a full inbox surfaces as `None` from the
//! facade and the caller retries on a later duty cycle.

use crate::library::{FixSessionHandle, IlinkSessionHandle};
use crate::protocol::{EngineEndpoint, LibraryToEngine};
use crate::reply::Reply;
use fixgate_core::types::SessionKey;
use fixgate_core::{LibraryId, SessionId};
use fixgate_session::{FixSessionConfig, IlinkSessionConfig, SessionState};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Inbox depth.
pub const INBOX_CAPACITY: usize = 256;

/// Description of one connected library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryInfo {
    /// The library id.
    pub library_id: LibraryId,
    /// Sessions it currently owns.
    pub owned_sessions: usize,
}

/// Description of one known session, connected or offline.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Locally-assigned id.
    pub session_id: SessionId,
    /// Identifying tuple.
    pub key: SessionKey,
    /// Live state, `Disconnected` for offline sessions.
    pub state: SessionState,
}

/// One request for the framer.
#[derive(Debug)]
pub enum AdminCommand {
    /// Register a library and its conduit.
    ConnectLibrary {
        /// The connecting library.
        library_id: LibraryId,
        /// Engine-held conduit end.
        endpoint: EngineEndpoint,
        /// Completion reply.
        reply: Arc<Reply<()>>,
    },
    /// Initiate an iLink3 session.
    InitiateIlink {
        /// Requesting library.
        library_id: LibraryId,
        /// Session configuration.
        config: IlinkSessionConfig,
        /// The library's conduit sender, embedded into the handle.
        to_engine: mpsc::Sender<LibraryToEngine>,
        /// Completion reply carrying the session handle.
        reply: Arc<Reply<IlinkSessionHandle>>,
    },
    /// Initiate a FIX session.
    InitiateFix {
        /// Requesting library.
        library_id: LibraryId,
        /// Session configuration.
        config: FixSessionConfig,
        /// The library's conduit sender, embedded into the handle.
        to_engine: mpsc::Sender<LibraryToEngine>,
        /// Completion reply carrying the session handle.
        reply: Arc<Reply<FixSessionHandle>>,
    },
    /// Bind or unbind the acceptor socket.
    Bind {
        /// True to bind, false to unbind.
        listen: bool,
        /// Completion reply.
        reply: Arc<Reply<()>>,
    },
    /// Back up (optionally) and clear the session-id state.
    ResetSessionIds {
        /// Backup directory.
        backup: Option<PathBuf>,
        /// Completion reply.
        reply: Arc<Reply<()>>,
    },
    /// Reset one session's counters to 1.
    ResetSequenceNumber {
        /// Target session.
        session_id: SessionId,
        /// Completion reply.
        reply: Arc<Reply<()>>,
    },
    /// Resolve an identifying tuple to a session id.
    LookupSessionId {
        /// The tuple to resolve.
        key: SessionKey,
        /// Completion reply.
        reply: Arc<Reply<SessionId>>,
    },
    /// List connected libraries.
    Libraries {
        /// Completion reply.
        reply: Arc<Reply<Vec<LibraryInfo>>>,
    },
    /// List every known session including offline ones.
    AllSessions {
        /// Completion reply.
        reply: Arc<Reply<Vec<SessionInfo>>>,
    },
    /// Free archive space.
    PruneArchive {
        /// Minimum positions to retain.
        min_positions: Option<HashMap<u64, u64>>,
        /// Completion reply carrying pruned positions.
        reply: Arc<Reply<HashMap<u64, u64>>>,
    },
    /// Begin graceful shutdown.
    StartClose {
        /// Completed once every session logged out or the timeout passed.
        reply: Arc<Reply<()>>,
    },
}
