/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Error types for the fixgate gateway.
//!
//! This module provides a unified error hierarchy using `thiserror` for
//! typed, domain-specific errors across all gateway operations, plus the
//! [`ErrorEvent`] record delivered to the configured error consumer for
//! failures discovered asynchronously.

use crate::types::{LibraryId, SessionId};
use std::sync::Arc;
use thiserror::Error;

/// Result type alias using [`GatewayError`] as the error type.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Top-level error type for all gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Error during message decoding.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Error during message encoding.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Error in session layer operations.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Error in sequence store operations.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error in engine administration.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// I/O error from the underlying transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that occur while decoding framed messages of either protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Framing violation. Fatal to the session.
    #[error("malformed frame: {reason}")]
    Malformed {
        /// Description of the framing violation.
        reason: String,
    },

    /// SBE template id not known to the session-layer decoder.
    #[error("unknown template id: {template_id}")]
    UnknownTemplate {
        /// The unrecognised template id.
        template_id: u16,
    },

    /// FIX checksum mismatch between calculated and declared values.
    #[error("checksum mismatch: calculated {calculated}, declared {declared}")]
    ChecksumMismatch {
        /// Calculated checksum value.
        calculated: u8,
        /// Declared checksum value in the message.
        declared: u8,
    },

    /// Invalid UTF-8 in a string field.
    #[error("invalid utf-8 in field: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Message exceeds the maximum allowed size.
    #[error("message too large: {size} bytes exceeds maximum {max_size}")]
    MessageTooLarge {
        /// Actual message size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max_size: usize,
    },
}

impl DecodeError {
    /// Creates a malformed-frame error from a reason string.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Returns true if this error is fatal to the session.
    ///
    /// Unknown non-session templates are passed through to the library and
    /// are not fatal; framing violations are.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnknownTemplate { .. })
    }
}

/// Errors that occur during message encoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Field value exceeds its fixed wire width.
    #[error("field too long: {field} is {length} bytes, wire width {width}")]
    FieldTooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Actual length of the value.
        length: usize,
        /// Fixed wire width of the field.
        width: usize,
    },

    /// Value cannot be represented in the target wire type.
    #[error("value out of range for {field}: {value}")]
    ValueOutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The offending value rendered as text.
        value: String,
    },
}

/// Errors in session-layer operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// TCP connection could not be established.
    #[error("UNABLE_TO_CONNECT")]
    UnableToConnect,

    /// Negotiate was rejected by the exchange.
    #[error("Negotiate rejected: code={error_code} {reason}")]
    NegotiateRejected {
        /// Exchange error code.
        error_code: u16,
        /// Reject reason text.
        reason: String,
    },

    /// Establish was rejected by the exchange.
    #[error("Establishment rejected: code={error_code} {reason}")]
    EstablishmentRejected {
        /// Exchange error code.
        error_code: u16,
        /// Reject reason text.
        reason: String,
    },

    /// Handshake message went unanswered past the retry budget.
    #[error("{phase} timed out after {attempts} attempts")]
    HandshakeTimedOut {
        /// Handshake phase that expired ("negotiate" or "establish").
        phase: &'static str,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Logon was rejected by the FIX counterparty.
    #[error("Logon rejected: {reason}")]
    LogonRejected {
        /// Rejection reason.
        reason: String,
    },

    /// Peer sent a post-handshake message below the expected sequence
    /// without the retransmit flag.
    #[error("sequence too low: expected >= {expected}, received {received}")]
    LowSequence {
        /// Minimum expected sequence number.
        expected: u64,
        /// Received sequence number.
        received: u64,
    },

    /// Terminate carried a uuid that does not belong to this session.
    #[error("Invalid uuid={received}, expected={expected}")]
    InvalidUuid {
        /// The uuid received on the wire.
        received: u64,
        /// The uuid of the local session.
        expected: u64,
    },

    /// Operation requires a state the session is not in.
    #[error("invalid session state: expected {expected}, current {current}")]
    InvalidState {
        /// Expected state for the operation.
        expected: &'static str,
        /// Current session state.
        current: &'static str,
    },

    /// An application send was attempted while an outbound retransmit
    /// was replaying messages.
    #[error("cannot send while retransmitting outbound messages")]
    RetransmitInProgress,

    /// Session configuration cannot be encoded on the wire.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Errors in sequence store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store entry not found.
    #[error("unknown session: {session_id}")]
    UnknownSession {
        /// The missing session id.
        session_id: SessionId,
    },

    /// Operation refused because the session is currently connected.
    #[error("session {session_id} is connected; disconnect before resetting")]
    SessionConnected {
        /// The connected session id.
        session_id: SessionId,
    },

    /// Persistent log is corrupted.
    #[error("store corrupted: {reason}")]
    Corrupted {
        /// Description of the corruption.
        reason: String,
    },

    /// I/O error in the persistent store.
    #[error("store i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors in engine administration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The admin inbox rejected the request; the caller must retry on a
    /// later duty cycle.
    #[error("admin inbox full")]
    InboxFull,

    /// Archive pruning requested while the engine is shutting down.
    #[error("Unable to prune archive during shutdown.")]
    PruneDuringShutdown,

    /// Archive pruning requested after the engine closed.
    #[error("Unable to prune archive when closed.")]
    PruneWhenClosed,

    /// State reset requested while the engine is still running.
    #[error("Engine should be closed before the state is reset")]
    ResetWhileRunning,

    /// The engine has shut down and can no longer service requests.
    #[error("engine is closed")]
    Closed,

    /// No session matches the requested identity.
    #[error("unknown session")]
    UnknownSession,

    /// The session is owned by another library.
    #[error("session owned by library {owner}")]
    SessionOwned {
        /// Owning library id.
        owner: LibraryId,
    },
}

/// An error discovered asynchronously, delivered to the error consumer.
///
/// Carries `(library_id, error_code, timestamp_ns, description)` as the
/// gateway's monitoring contract requires.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// Library the error pertains to, or the engine's own id.
    pub library_id: LibraryId,
    /// Numeric error code.
    pub error_code: u32,
    /// Epoch nanoseconds when the error was observed.
    pub timestamp_ns: u64,
    /// Human-readable description.
    pub description: String,
}

/// Consumer of asynchronously-discovered errors.
pub type ErrorConsumer = Arc<dyn Fn(&ErrorEvent) + Send + Sync>;
