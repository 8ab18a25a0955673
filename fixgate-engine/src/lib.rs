/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # fixgate-engine
//!
//! The engine process core:
//! - [`reply`]: future-like handles for asynchronous admin operations
//! - [`command`]: the admin inbox consumed on the framer's duty cycle
//! - [`protocol`]: engine-to-library control messages and the conduit
//! - [`framer`]: the single-task reactor owning channels, sessions, timers
//! - [`library`]: the library-side view (handlers, session handles)
//! - [`archive`]: interface to the external message archive
//! - [`engine`]: the `GatewayEngine` facade
//!
//! The framer is the only writer of session state; libraries observe
//! sessions through atomics and interact through message passing.

pub mod archive;
pub mod command;
pub mod config;
pub mod engine;
pub mod framer;
pub mod library;
pub mod protocol;
pub mod reply;

pub use archive::{ArchivePruner, NoopArchivePruner};
pub use command::{LibraryInfo, SessionInfo};
pub use config::EngineConfiguration;
pub use engine::GatewayEngine;
pub use library::{
    FixSessionHandle, GatewayLibrary, IlinkSessionHandle, LibraryConfiguration, SessionHandler,
    SessionObservables,
};
pub use protocol::{DisconnectReason, EngineToLibrary, LibraryToEngine, SessionSnapshot};
pub use reply::{Reply, ReplyState};
