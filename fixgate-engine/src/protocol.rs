/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Engine-to-library control protocol.
//!
//! A session has exactly one owner at any moment; these messages transfer
//! ownership and carry application traffic across the process boundary. The
//! reliable ordered transport itself is external; this crate ships an
//! in-process conduit over bounded channels with the same semantics.

use bytes::Bytes;
use fixgate_core::types::SessionKey;
use fixgate_core::{ConnectionUuid, LibraryId, SessionId};
use fixgate_session::ilink::{NewOrderParams, NotAppliedResponse};
use fixgate_session::SessionState;
use tokio::sync::mpsc;

/// Conduit depth per direction.
pub const CONDUIT_CAPACITY: usize = 1024;

/// Why a session was taken away from its library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote peer ended the session.
    PeerTerminated,
    /// The engine is shutting down.
    EngineClosing,
    /// The library stopped heartbeating.
    LibraryTimeout,
    /// A protocol violation ended the session.
    ProtocolViolation,
}

/// Snapshot of a session at hand-off time.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Locally-assigned session id.
    pub session_id: SessionId,
    /// Identifying tuple.
    pub key: SessionKey,
    /// State at hand-off, always library-visible.
    pub state: SessionState,
    /// Next outbound sequence number.
    pub next_sent_seq: u64,
    /// Next expected inbound sequence number.
    pub next_recv_seq: u64,
    /// Connection uuid (iLink3), null for FIX.
    pub uuid: ConnectionUuid,
}

/// Messages from a library to the engine.
#[derive(Debug)]
pub enum LibraryToEngine {
    /// Announce the library and open its conduit.
    Connect {
        /// The connecting library.
        library_id: LibraryId,
    },
    /// Liveness signal; must arrive within the library timeout.
    ApplicationHeartbeat {
        /// The heartbeating library.
        library_id: LibraryId,
    },
    /// Ask for ownership of an unowned session.
    RequestSession {
        /// The requesting library.
        library_id: LibraryId,
        /// Session to acquire.
        session_id: SessionId,
    },
    /// Return a session to the unowned pool.
    ReleaseSession {
        /// The releasing library.
        library_id: LibraryId,
        /// Session to release.
        session_id: SessionId,
    },
    /// Send a NewOrderSingle on an owned iLink3 session.
    SendNewOrder {
        /// Target session.
        session_id: SessionId,
        /// Order fields.
        params: NewOrderParams,
    },
    /// Send an application message on an owned FIX session.
    SendFixApp {
        /// Target session.
        session_id: SessionId,
        /// MsgType value.
        msg_type: String,
        /// Body fields after the standard header.
        fields: Vec<(u32, String)>,
    },
    /// Answer a NotApplied report.
    NotAppliedResponse {
        /// Target session.
        session_id: SessionId,
        /// Gapfill or retransmit.
        response: NotAppliedResponse,
    },
    /// Terminate an owned iLink3 session.
    Terminate {
        /// Target session.
        session_id: SessionId,
        /// Reason carried in the Terminate message.
        reason: String,
        /// Error code carried in the Terminate message.
        error_code: u16,
    },
    /// Log out an owned FIX session.
    InitiateLogout {
        /// Target session.
        session_id: SessionId,
    },
}

/// Messages from the engine to a library.
#[derive(Debug)]
pub enum EngineToLibrary {
    /// Ownership of a session is transferred to the library.
    ManageSession {
        /// The session snapshot at hand-off.
        snapshot: SessionSnapshot,
    },
    /// A requested release finished.
    ReleaseComplete {
        /// The released session.
        session_id: SessionId,
    },
    /// The session is gone; the library must drop its handle.
    Disconnect {
        /// The ended session.
        session_id: SessionId,
        /// Why it ended.
        reason: DisconnectReason,
    },
    /// Membership of the library set changed.
    ControlNotification {
        /// Libraries currently connected.
        libraries: Vec<LibraryId>,
    },
    /// An application message for a session the library owns.
    Business {
        /// Source session.
        session_id: SessionId,
        /// Template id (iLink3) or leading MsgType byte (FIX).
        template_id: u16,
        /// Message body.
        data: Bytes,
        /// Whether this was a retransmission.
        retransmitted: bool,
    },
    /// A retransmit request chunk was rejected.
    RetransmitReject {
        /// Source session.
        session_id: SessionId,
        /// Reject reason text.
        reason: String,
        /// Exchange error code.
        error_codes: u16,
    },
    /// The exchange reported outbound messages as not applied.
    NotApplied {
        /// Source session.
        session_id: SessionId,
        /// First sequence number not applied.
        from_seq_no: u64,
        /// Number of messages not applied.
        msg_count: u64,
    },
}

/// Engine-held end of one library conduit.
#[derive(Debug)]
pub struct EngineEndpoint {
    /// Messages toward the library.
    pub to_library: mpsc::Sender<EngineToLibrary>,
    /// Messages from the library.
    pub from_library: mpsc::Receiver<LibraryToEngine>,
}

/// Library-held end of one conduit.
#[derive(Debug)]
pub struct LibraryEndpoint {
    /// Messages toward the engine.
    pub to_engine: mpsc::Sender<LibraryToEngine>,
    /// Messages from the engine.
    pub from_engine: mpsc::Receiver<EngineToLibrary>,
}

/// Creates an in-process conduit pair.
#[must_use]
pub fn conduit() -> (EngineEndpoint, LibraryEndpoint) {
    let (to_library, from_engine) = mpsc::channel(CONDUIT_CAPACITY);
    let (to_engine, from_library) = mpsc::channel(CONDUIT_CAPACITY);
    (
        EngineEndpoint {
            to_library,
            from_library,
        },
        LibraryEndpoint {
            to_engine,
            from_engine,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_conduit_round() {
        let (mut engine_end, mut library_end) = conduit();

        library_end
            .to_engine
            .send(LibraryToEngine::Connect {
                library_id: LibraryId(3),
            })
            .await
            .unwrap();
        match engine_end.from_library.recv().await.unwrap() {
            LibraryToEngine::Connect { library_id } => assert_eq!(library_id, LibraryId(3)),
            other => panic!("unexpected {other:?}"),
        }

        engine_end
            .to_library
            .send(EngineToLibrary::ControlNotification {
                libraries: vec![LibraryId(3)],
            })
            .await
            .unwrap();
        assert!(matches!(
            library_end.from_engine.recv().await.unwrap(),
            EngineToLibrary::ControlNotification { .. }
        ));
    }
}
