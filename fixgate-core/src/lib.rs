/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # fixgate-core
//!
//! Core types shared by every layer of the fixgate gateway:
//! - [`types`]: session identifiers, sequence numbers, connection UUIDs
//! - [`clock`]: epoch-nanosecond time source abstraction
//! - [`error`]: unified `thiserror` hierarchy and the asynchronous error consumer

pub mod clock;
pub mod error;
pub mod types;

pub use clock::{EpochNanoClock, ManualNanoClock, SystemNanoClock};
pub use error::{
    DecodeError, EncodeError, EngineError, ErrorConsumer, ErrorEvent, GatewayError, Result,
    SessionError, StoreError,
};
pub use types::{
    CompId, ConnectionUuid, FixSessionKey, IlinkSessionKey, LibraryId, SeqNum, SessionId,
    SessionKey, Timestamp, ENGINE_LIBRARY_ID, NOT_AWAITING_RETRANSMIT,
};
