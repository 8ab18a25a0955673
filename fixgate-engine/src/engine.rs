/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! The engine facade.
//!
//! A [`GatewayEngine`] owns the sockets and the persistent state; libraries
//! own the business logic. Every administrative method submits to the
//! framer's inbox and returns a [`Reply`] immediately; `None` means the
//! inbox was full and the call should be retried on a later duty cycle.

use crate::command::{AdminCommand, LibraryInfo, SessionInfo, INBOX_CAPACITY};
use crate::config::EngineConfiguration;
use crate::framer::Framer;
use crate::reply::Reply;
use fixgate_core::types::SessionKey;
use fixgate_core::{
    EngineError, EpochNanoClock, GatewayError, SessionId, SystemNanoClock,
};
use fixgate_store::{FileStore, GatewayStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A gateway engine process.
///
/// Launch with [`GatewayEngine::launch`]; it starts the framer task and
/// returns. Connect libraries with
/// [`crate::library::GatewayLibrary::connect`].
#[derive(Debug)]
pub struct GatewayEngine {
    config: EngineConfiguration,
    admin_tx: mpsc::Sender<AdminCommand>,
    store: Arc<dyn GatewayStore>,
    framer_task: Mutex<Option<JoinHandle<()>>>,
    starting_close: AtomicBool,
    closed: AtomicBool,
    state_reset: AtomicBool,
}

impl GatewayEngine {
    /// Launches the engine: opens the store, starts the framer, binds the
    /// acceptor when configured. Must be called within a tokio runtime.
    ///
    /// # Errors
    /// Returns [`GatewayError`] when the engine directory cannot be opened.
    pub fn launch(config: EngineConfiguration) -> Result<Self, GatewayError> {
        let store: Arc<dyn GatewayStore> = Arc::new(FileStore::open(&config.engine_dir)?);
        let clock: Arc<dyn EpochNanoClock> = Arc::new(SystemNanoClock);
        let (admin_tx, admin_rx) = mpsc::channel(INBOX_CAPACITY);

        let framer = Framer::new(config.clone(), Arc::clone(&store), clock, admin_rx);
        let framer_task = tokio::spawn(framer.run());
        info!(dir = %config.engine_dir.display(), "engine launched");

        Ok(Self {
            config,
            admin_tx,
            store,
            framer_task: Mutex::new(Some(framer_task)),
            starting_close: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            state_reset: AtomicBool::new(false),
        })
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn configuration(&self) -> &EngineConfiguration {
        &self.config
    }

    pub(crate) fn admin_sender(&self) -> mpsc::Sender<AdminCommand> {
        self.admin_tx.clone()
    }

    fn submit<T, F>(&self, build: F) -> Option<Arc<Reply<T>>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Arc<Reply<T>>) -> AdminCommand,
    {
        if self.closed.load(Ordering::SeqCst) {
            let reply = Reply::new(Instant::now());
            reply.error(EngineError::Closed.into());
            return Some(reply);
        }
        let reply = Reply::new(Instant::now() + self.config.reply_timeout);
        self.admin_tx.try_send(build(Arc::clone(&reply))).ok()?;
        Some(reply)
    }

    /// Queries the list of currently connected libraries.
    ///
    /// # Returns
    /// `None` when the request could not be enqueued; retry on a later
    /// duty cycle.
    #[must_use]
    pub fn libraries(&self) -> Option<Arc<Reply<Vec<LibraryInfo>>>> {
        self.submit(|reply| AdminCommand::Libraries { reply })
    }

    /// Binds the acceptor socket to the configured address.
    ///
    /// # Returns
    /// `None` when the request could not be enqueued.
    #[must_use]
    pub fn bind(&self) -> Option<Arc<Reply<()>>> {
        self.submit(|reply| AdminCommand::Bind {
            listen: true,
            reply,
        })
    }

    /// Unbinds the acceptor socket without disconnecting live sessions.
    ///
    /// # Returns
    /// `None` when the request could not be enqueued.
    #[must_use]
    pub fn unbind(&self) -> Option<Arc<Reply<()>>> {
        self.submit(|reply| AdminCommand::Bind {
            listen: false,
            reply,
        })
    }

    /// Resets the set of session ids, optionally backing up first.
    /// Refused while any session is connected.
    ///
    /// # Returns
    /// `None` when the request could not be enqueued.
    #[must_use]
    pub fn reset_session_ids(&self, backup_location: Option<PathBuf>) -> Option<Arc<Reply<()>>> {
        self.submit(|reply| AdminCommand::ResetSessionIds {
            backup: backup_location,
            reply,
        })
    }

    /// Resets both sequence counters of one session to 1. Refused while
    /// that session is connected.
    ///
    /// # Returns
    /// `None` when the request could not be enqueued.
    #[must_use]
    pub fn reset_sequence_number(&self, session_id: SessionId) -> Option<Arc<Reply<()>>> {
        self.submit(|reply| AdminCommand::ResetSequenceNumber { session_id, reply })
    }

    /// Resolves an identifying tuple to its session id.
    ///
    /// # Returns
    /// `None` when the request could not be enqueued.
    #[must_use]
    pub fn lookup_session_id(&self, key: SessionKey) -> Option<Arc<Reply<SessionId>>> {
        self.submit(|reply| AdminCommand::LookupSessionId { key, reply })
    }

    /// Lists every session the engine knows about, including offline ones.
    ///
    /// # Returns
    /// `None` when the request could not be enqueued.
    #[must_use]
    pub fn all_sessions(&self) -> Option<Arc<Reply<Vec<SessionInfo>>>> {
        self.submit(|reply| AdminCommand::AllSessions { reply })
    }

    /// Frees archive space up to the given minimum positions.
    ///
    /// Always returns a reply; refusal during shutdown or after close
    /// surfaces as an errored reply.
    ///
    /// # Returns
    /// `None` when the request could not be enqueued.
    #[must_use]
    pub fn prune_archive(
        &self,
        min_positions: Option<HashMap<u64, u64>>,
    ) -> Option<Arc<Reply<HashMap<u64, u64>>>> {
        if self.closed.load(Ordering::SeqCst) {
            let reply = Reply::new(Instant::now());
            reply.error(EngineError::PruneWhenClosed.into());
            return Some(reply);
        }
        if self.starting_close.load(Ordering::SeqCst) {
            let reply = Reply::new(Instant::now());
            reply.error(EngineError::PruneDuringShutdown.into());
            return Some(reply);
        }
        self.submit(|reply| AdminCommand::PruneArchive {
            min_positions,
            reply,
        })
    }

    /// Closes the engine: logs out every active session (waiting up to the
    /// reply timeout), stops the framer, and releases the acceptor socket.
    pub async fn close(&self) {
        if self.starting_close.swap(true, Ordering::SeqCst) {
            return;
        }

        let reply = Reply::new(Instant::now() + self.config.reply_timeout);
        let submitted = self
            .admin_tx
            .try_send(AdminCommand::StartClose {
                reply: Arc::clone(&reply),
            })
            .is_ok();
        if submitted {
            let grace = self.config.reply_timeout + Duration::from_secs(1);
            if tokio::time::timeout(grace, reply.await_done()).await.is_err() {
                warn!("graceful close timed out, aborting framer");
            }
        }

        if let Some(task) = self.framer_task.lock().take() {
            task.abort();
        }
        self.closed.store(true, Ordering::SeqCst);
        info!("engine closed");
    }

    /// Returns true once [`Self::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resets all persistent engine state, optionally backing it up first.
    /// End-of-week processing; the engine must already be closed.
    ///
    /// # Errors
    /// Returns [`EngineError::ResetWhileRunning`] when called on a live
    /// engine, or a [`GatewayError`] when the backup fails.
    pub async fn reset_state(&self, backup_location: Option<PathBuf>) -> Result<(), GatewayError> {
        if !self.is_closed() {
            return Err(EngineError::ResetWhileRunning.into());
        }
        if self.state_reset.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let backup = backup_location.or_else(|| self.config.archive_backup_location.clone());
        self.store.reset_state(backup.as_deref()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_launch_and_close() {
        let dir = TempDir::new().unwrap();
        let engine = GatewayEngine::launch(
            EngineConfiguration::new(dir.path()).with_reply_timeout(Duration::from_millis(500)),
        )
        .unwrap();
        assert!(!engine.is_closed());

        engine.close().await;
        assert!(engine.is_closed());
    }

    #[tokio::test]
    async fn test_reset_state_requires_close() {
        let dir = TempDir::new().unwrap();
        let engine = GatewayEngine::launch(
            EngineConfiguration::new(dir.path()).with_reply_timeout(Duration::from_millis(500)),
        )
        .unwrap();

        let err = engine.reset_state(None).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "engine error: Engine should be closed before the state is reset"
        );

        engine.close().await;
        engine.reset_state(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_prune_refused_when_closed() {
        let dir = TempDir::new().unwrap();
        let engine = GatewayEngine::launch(
            EngineConfiguration::new(dir.path()).with_reply_timeout(Duration::from_millis(500)),
        )
        .unwrap();
        engine.close().await;

        let reply = engine.prune_archive(None).unwrap();
        assert_eq!(reply.state(), crate::reply::ReplyState::Errored);
        assert!(reply
            .error_message()
            .unwrap()
            .contains("Unable to prune archive"));
    }

    #[tokio::test]
    async fn test_libraries_initially_empty() {
        let dir = TempDir::new().unwrap();
        let engine = GatewayEngine::launch(
            EngineConfiguration::new(dir.path()).with_reply_timeout(Duration::from_millis(500)),
        )
        .unwrap();

        let reply = engine.libraries().unwrap();
        reply.await_done().await;
        assert_eq!(reply.result_if_present().unwrap(), Vec::<LibraryInfo>::new());

        engine.close().await;
    }
}
