/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Store trait definitions.
//!
//! The framer is the only caller of these traits; implementations do not
//! need internal ordering guarantees beyond individual method atomicity.

use async_trait::async_trait;
use fixgate_core::types::SessionKey;
use fixgate_core::{ConnectionUuid, SessionId, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;

/// Persistent counters of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceEntry {
    /// Next outbound sequence number.
    pub next_sent_seq: u64,
    /// Next expected inbound sequence number.
    pub next_recv_seq: u64,
    /// Connection uuid the counters were accumulated under (iLink3 only).
    pub uuid: ConnectionUuid,
}

impl SequenceEntry {
    /// Entry for a brand-new session.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            next_sent_seq: 1,
            next_recv_seq: 1,
            uuid: ConnectionUuid::NULL,
        }
    }
}

impl Default for SequenceEntry {
    fn default() -> Self {
        Self::initial()
    }
}

/// Write-through persistence of per-session sequence counters.
#[async_trait]
pub trait SequenceStore: Send + Sync + Debug {
    /// Loads the entry for `session_id`, if one has ever been saved.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backing log cannot be read.
    async fn load(&self, session_id: SessionId) -> Result<Option<SequenceEntry>, StoreError>;

    /// Persists the entry for `session_id`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the record cannot be appended.
    async fn save(&self, session_id: SessionId, entry: SequenceEntry) -> Result<(), StoreError>;

    /// Resets both counters of `session_id` to 1, keeping its uuid.
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownSession`] when no entry exists.
    async fn reset_sequence_number(&self, session_id: SessionId) -> Result<(), StoreError>;
}

/// Persistent map from identifying tuple to locally-assigned session id.
#[async_trait]
pub trait SessionIdStore: Send + Sync + Debug {
    /// Returns the id for `key`, assigning and persisting a fresh one if
    /// the tuple has never been seen.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the snapshot cannot be written.
    async fn assign(&self, key: &SessionKey) -> Result<SessionId, StoreError>;

    /// Looks up the id for `key` without assigning.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the snapshot cannot be read.
    async fn lookup(&self, key: &SessionKey) -> Result<Option<SessionId>, StoreError>;

    /// Returns every known `(session_id, key)` pair.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the snapshot cannot be read.
    async fn all_sessions(&self) -> Result<Vec<(SessionId, SessionKey)>, StoreError>;
}

/// Combined store handed to the framer.
#[async_trait]
pub trait GatewayStore: SequenceStore + SessionIdStore {
    /// Atomically copies the current state to `backup_location` (when
    /// given) and then clears both the id map and the sequence log.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backup or truncation fails.
    async fn reset_state(&self, backup_location: Option<&Path>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_entry() {
        let entry = SequenceEntry::initial();
        assert_eq!(entry.next_sent_seq, 1);
        assert_eq!(entry.next_recv_seq, 1);
        assert!(entry.uuid.is_null());
    }

    #[test]
    fn test_entry_serde_round() {
        let entry = SequenceEntry {
            next_sent_seq: 12,
            next_recv_seq: 7,
            uuid: ConnectionUuid::new(99),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: SequenceEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
