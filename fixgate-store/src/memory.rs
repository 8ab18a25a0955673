/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! In-memory store for tests and ephemeral engines.

use crate::traits::{GatewayStore, SequenceEntry, SequenceStore, SessionIdStore};
use async_trait::async_trait;
use fixgate_core::types::SessionKey;
use fixgate_core::{SessionId, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

/// Non-persistent store; all state is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    sequences: HashMap<SessionId, SequenceEntry>,
    ids: HashMap<SessionKey, SessionId>,
    next_id: u64,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of sessions with persisted counters.
    #[must_use]
    pub fn sequence_count(&self) -> usize {
        self.inner.lock().sequences.len()
    }
}

#[async_trait]
impl SequenceStore for MemoryStore {
    async fn load(&self, session_id: SessionId) -> Result<Option<SequenceEntry>, StoreError> {
        Ok(self.inner.lock().sequences.get(&session_id).copied())
    }

    async fn save(&self, session_id: SessionId, entry: SequenceEntry) -> Result<(), StoreError> {
        self.inner.lock().sequences.insert(session_id, entry);
        Ok(())
    }

    async fn reset_sequence_number(&self, session_id: SessionId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .sequences
            .get_mut(&session_id)
            .ok_or(StoreError::UnknownSession { session_id })?;
        entry.next_sent_seq = 1;
        entry.next_recv_seq = 1;
        Ok(())
    }
}

#[async_trait]
impl SessionIdStore for MemoryStore {
    async fn assign(&self, key: &SessionKey) -> Result<SessionId, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.ids.get(key) {
            return Ok(*id);
        }
        inner.next_id += 1;
        let id = SessionId::new(inner.next_id);
        inner.ids.insert(key.clone(), id);
        Ok(id)
    }

    async fn lookup(&self, key: &SessionKey) -> Result<Option<SessionId>, StoreError> {
        Ok(self.inner.lock().ids.get(key).copied())
    }

    async fn all_sessions(&self) -> Result<Vec<(SessionId, SessionKey)>, StoreError> {
        Ok(self
            .inner
            .lock()
            .ids
            .iter()
            .map(|(key, id)| (*id, key.clone()))
            .collect())
    }
}

#[async_trait]
impl GatewayStore for MemoryStore {
    async fn reset_state(&self, _backup_location: Option<&Path>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.sequences.clear();
        inner.ids.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixgate_core::types::IlinkSessionKey;
    use fixgate_core::ConnectionUuid;

    fn key(session: &str) -> SessionKey {
        SessionKey::Ilink(IlinkSessionKey::new(session, "DEFGH").unwrap())
    }

    #[tokio::test]
    async fn test_assign_is_stable() {
        let store = MemoryStore::new();
        let a = store.assign(&key("ABC")).await.unwrap();
        let b = store.assign(&key("ABC")).await.unwrap();
        let c = store.assign(&key("XYZ")).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.lookup(&key("ABC")).await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn test_save_load_round() {
        let store = MemoryStore::new();
        let id = SessionId::new(1);
        assert_eq!(store.load(id).await.unwrap(), None);

        let entry = SequenceEntry {
            next_sent_seq: 5,
            next_recv_seq: 3,
            uuid: ConnectionUuid::new(9),
        };
        store.save(id, entry).await.unwrap();
        assert_eq!(store.load(id).await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_reset_sequence_number() {
        let store = MemoryStore::new();
        let id = SessionId::new(1);

        assert!(store.reset_sequence_number(id).await.is_err());

        store
            .save(
                id,
                SequenceEntry {
                    next_sent_seq: 5,
                    next_recv_seq: 3,
                    uuid: ConnectionUuid::new(9),
                },
            )
            .await
            .unwrap();
        store.reset_sequence_number(id).await.unwrap();

        let entry = store.load(id).await.unwrap().unwrap();
        assert_eq!(entry.next_sent_seq, 1);
        assert_eq!(entry.next_recv_seq, 1);
        assert_eq!(entry.uuid, ConnectionUuid::new(9));
    }

    #[tokio::test]
    async fn test_reset_state_clears_everything() {
        let store = MemoryStore::new();
        let id = store.assign(&key("ABC")).await.unwrap();
        store.save(id, SequenceEntry::initial()).await.unwrap();

        store.reset_state(None).await.unwrap();
        assert_eq!(store.lookup(&key("ABC")).await.unwrap(), None);
        assert_eq!(store.load(id).await.unwrap(), None);
    }
}
