/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Actions emitted by the session state machines.
//!
//! Handlers never perform I/O; each inbound message or timer poll returns a
//! list of actions for the framer to execute on its own thread.

use bytes::{Bytes, BytesMut};
use fixgate_core::SessionError;

/// One side-effect requested by a session state machine.
#[derive(Debug)]
pub enum Action {
    /// Write these bytes to the session's channel.
    Send(BytesMut),
    /// The handshake finished; complete the pending initiate reply.
    HandshakeComplete,
    /// The handshake failed; error the pending initiate reply.
    HandshakeFailed(SessionError),
    /// Forward an application message to the owning library.
    ForwardBusiness {
        /// Template id of the message.
        template_id: u16,
        /// Complete frame copied out of the read buffer.
        data: Bytes,
        /// Whether the message was a retransmission.
        retransmitted: bool,
    },
    /// A retransmit request chunk was rejected; inform the library.
    RetransmitRejected {
        /// Reject reason text.
        reason: String,
        /// Exchange error code.
        error_codes: u16,
    },
    /// The exchange reported our outbound messages as not applied.
    NotAppliedReported {
        /// First sequence number not applied.
        from_seq_no: u64,
        /// Number of messages not applied.
        msg_count: u64,
    },
    /// Sequence counters changed; persist them write-through.
    SequencesDirty,
    /// The session left the library-visible window; release it.
    Unbound,
    /// Close the channel.
    Disconnect,
    /// Raise a non-fatal error to the error consumer.
    Error {
        /// Numeric error code.
        code: u32,
        /// Human-readable description.
        description: String,
    },
}
