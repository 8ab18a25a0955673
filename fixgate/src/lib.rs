/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # fixgate
//!
//! A low-latency financial-messaging gateway speaking two session
//! protocols: FIX 4.4 tag=value and the CME iLink3 binary protocol.
//!
//! One **engine** process owns the TCP channels and the persistent
//! sequence-number state; one or more **libraries** own the business-logic
//! callbacks. Sessions are handed off between them with exactly one owner
//! at any moment. The engine guarantees the session layer of both
//! protocols: ordered delivery, gap detection, bounded retransmission,
//! keepalive heartbeating, graceful termination, and sequence numbers that
//! survive restarts.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use fixgate::prelude::*;
//!
//! let engine = GatewayEngine::launch(EngineConfiguration::new("./engine-dir"))?;
//! let library = GatewayLibrary::connect(
//!     &engine,
//!     LibraryConfiguration::new(LibraryId(1)),
//!     handler,
//! ).await?;
//!
//! let reply = library
//!     .initiate_ilink(
//!         IlinkSessionConfig::new(address, "ABC", "DEFGH")
//!             .with_access_key_id(access_key),
//!     )
//!     .expect("admin inbox full, retry");
//! reply.await_done().await;
//! let session = reply.result_if_present().expect("establishment failed");
//! ```
//!
//! ## Crate organization
//!
//! - [`core`]: identifiers, clock, and the unified error hierarchy
//! - [`tagvalue`]: zero-copy FIX tag=value codec
//! - [`sbe`]: iLink3 SBE templates
//! - [`store`]: durable sequence-number and session-id stores
//! - [`session`]: session state machines and the retransmit engine
//! - [`transport`]: channel supplier and stream framing
//! - [`engine`]: framer reactor, replies, and the library protocol

pub mod core {
    //! Identifiers, clock, and the unified error hierarchy.
    pub use fixgate_core::*;
}

pub mod tagvalue {
    //! Zero-copy FIX tag=value codec.
    pub use fixgate_tagvalue::*;
}

pub mod sbe {
    //! iLink3 SBE templates.
    pub use fixgate_sbe::*;
}

pub mod store {
    //! Durable sequence-number and session-id stores.
    pub use fixgate_store::*;
}

pub mod session {
    //! Session state machines and the retransmit engine.
    pub use fixgate_session::*;
}

pub mod transport {
    //! Channel supplier and stream framing.
    pub use fixgate_transport::*;
}

pub mod engine {
    //! Framer reactor, replies, and the library protocol.
    pub use fixgate_engine::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use fixgate_core::{
        CompId, ConnectionUuid, ErrorEvent, FixSessionKey, GatewayError, IlinkSessionKey,
        LibraryId, Result, SeqNum, SessionError, SessionId, SessionKey, Timestamp,
        NOT_AWAITING_RETRANSMIT,
    };

    pub use fixgate_session::{
        FixSessionConfig, IlinkSessionConfig, NewOrderParams, NotAppliedResponse, SessionState,
    };

    pub use fixgate_store::{FileStore, MemoryStore, SequenceStore, SessionIdStore};

    pub use fixgate_transport::{ChannelSupplier, DebugChannelSupplier, TcpChannelSupplier};

    pub use fixgate_engine::{
        EngineConfiguration, GatewayEngine, GatewayLibrary, IlinkSessionHandle,
        LibraryConfiguration, Reply, ReplyState, SessionHandler,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _seq = SeqNum::FIRST;
        let _uuid = ConnectionUuid::new(7);
        let _state = SessionState::Disconnected;
        assert_eq!(NOT_AWAITING_RETRANSMIT, u64::MAX);
    }
}
