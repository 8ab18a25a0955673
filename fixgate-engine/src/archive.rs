/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Interface to the external message archive.
//!
//! The archive itself (durable recording of every wire message) lives
//! outside this crate; the engine only needs to ask it to free space.

use async_trait::async_trait;
use fixgate_core::GatewayError;
use std::collections::HashMap;
use std::fmt::Debug;

/// Prunes archived recordings up to safe positions.
#[async_trait]
pub trait ArchivePruner: Send + Sync + Debug {
    /// Frees archive space, honoring the minimum positions in
    /// `min_positions` when given.
    ///
    /// # Returns
    /// A map from recording id to the position pruned up to; empty when
    /// nothing could be freed.
    ///
    /// # Errors
    /// Returns [`GatewayError`] when the archive cannot be reached.
    async fn prune(
        &self,
        min_positions: Option<HashMap<u64, u64>>,
    ) -> Result<HashMap<u64, u64>, GatewayError>;
}

/// Pruner for engines running without an archive.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopArchivePruner;

#[async_trait]
impl ArchivePruner for NoopArchivePruner {
    async fn prune(
        &self,
        _min_positions: Option<HashMap<u64, u64>>,
    ) -> Result<HashMap<u64, u64>, GatewayError> {
        Ok(HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_pruner_prunes_nothing() {
        let pruned = NoopArchivePruner.prune(None).await.unwrap();
        assert!(pruned.is_empty());
    }
}
