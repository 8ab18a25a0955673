/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # fixgate-store
//!
//! Durable per-session counters for the gateway:
//! - [`SequenceStore`]: write-through `session_id -> (next_sent, next_recv, uuid)`
//! - [`SessionIdStore`]: persistent `session_id <-> identifying tuple` map
//!
//! [`MemoryStore`] backs tests; [`FileStore`] persists to an engine
//! directory as an append-only `sequence-numbers` log (compacted
//! periodically) plus a `session-ids` snapshot.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::{GatewayStore, SequenceEntry, SequenceStore, SessionIdStore};

/// File name of the append-only sequence log within an engine directory.
pub const SEQUENCE_NUMBERS_FILE: &str = "sequence-numbers";

/// File name of the session-id snapshot within an engine directory.
pub const SESSION_IDS_FILE: &str = "session-ids";
