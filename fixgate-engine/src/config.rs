/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Engine configuration.

use crate::archive::{ArchivePruner, NoopArchivePruner};
use fixgate_core::ErrorConsumer;
use fixgate_transport::{ChannelSupplier, TcpChannelSupplier};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Factory producing the engine's channel supplier, pluggable for tests.
pub type ChannelSupplierFactory = Arc<dyn Fn() -> Arc<dyn ChannelSupplier> + Send + Sync>;

/// Configuration of one engine process.
#[derive(Clone)]
pub struct EngineConfiguration {
    /// Directory holding `session-ids` and `sequence-numbers`.
    pub engine_dir: PathBuf,
    /// Acceptor bind address; `None` runs an initiator-only engine.
    pub bind_address: Option<SocketAddr>,
    /// Deadline applied to every admin reply.
    pub reply_timeout: Duration,
    /// Default keepalive interval offered to peers.
    pub keep_alive_interval: Duration,
    /// A library missing heartbeats for this long loses its sessions.
    pub library_timeout: Duration,
    /// Interval at which libraries emit application heartbeats.
    pub application_heartbeat_interval: Duration,
    /// Maximum messages per retransmit request chunk.
    pub retransmit_batch_max: u64,
    /// Total sends per handshake phase before timing out.
    pub negotiate_resend_max: u32,
    /// Whether wire messages are recorded to the external archive.
    pub log_any_messages: bool,
    /// Longest the framer parks when fully idle.
    pub idle_interval: Duration,
    /// Supplier factory, pluggable so tests can hold connects back.
    pub channel_supplier_factory: ChannelSupplierFactory,
    /// Consumer of asynchronously-discovered errors.
    pub error_consumer: Option<ErrorConsumer>,
    /// Archive pruner; defaults to a no-op for archive-less engines.
    pub archive_pruner: Arc<dyn ArchivePruner>,
    /// Where `reset_state` backs up engine files by default.
    pub archive_backup_location: Option<PathBuf>,
}

impl EngineConfiguration {
    /// Creates a configuration storing state under `engine_dir`.
    #[must_use]
    pub fn new(engine_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine_dir: engine_dir.into(),
            bind_address: None,
            reply_timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_secs(30),
            library_timeout: Duration::from_secs(10),
            application_heartbeat_interval: Duration::from_millis(500),
            retransmit_batch_max: 2500,
            negotiate_resend_max: 2,
            log_any_messages: true,
            idle_interval: Duration::from_millis(100),
            channel_supplier_factory: Arc::new(|| Arc::new(TcpChannelSupplier)),
            error_consumer: None,
            archive_pruner: Arc::new(NoopArchivePruner),
            archive_backup_location: None,
        }
    }

    /// Sets the acceptor bind address.
    #[must_use]
    pub const fn with_bind_address(mut self, address: SocketAddr) -> Self {
        self.bind_address = Some(address);
        self
    }

    /// Sets the admin reply timeout.
    #[must_use]
    pub const fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Sets the library liveness timeout.
    #[must_use]
    pub const fn with_library_timeout(mut self, timeout: Duration) -> Self {
        self.library_timeout = timeout;
        self
    }

    /// Sets the channel supplier factory.
    #[must_use]
    pub fn with_channel_supplier_factory(mut self, factory: ChannelSupplierFactory) -> Self {
        self.channel_supplier_factory = factory;
        self
    }

    /// Sets the error consumer.
    #[must_use]
    pub fn with_error_consumer(mut self, consumer: ErrorConsumer) -> Self {
        self.error_consumer = Some(consumer);
        self
    }

    /// Sets the archive pruner.
    #[must_use]
    pub fn with_archive_pruner(mut self, pruner: Arc<dyn ArchivePruner>) -> Self {
        self.archive_pruner = pruner;
        self
    }

    /// Sets whether wire messages are recorded.
    #[must_use]
    pub const fn with_log_any_messages(mut self, log: bool) -> Self {
        self.log_any_messages = log;
        self
    }
}

impl fmt::Debug for EngineConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfiguration")
            .field("engine_dir", &self.engine_dir)
            .field("bind_address", &self.bind_address)
            .field("reply_timeout", &self.reply_timeout)
            .field("keep_alive_interval", &self.keep_alive_interval)
            .field("library_timeout", &self.library_timeout)
            .field("retransmit_batch_max", &self.retransmit_batch_max)
            .field("negotiate_resend_max", &self.negotiate_resend_max)
            .field("log_any_messages", &self.log_any_messages)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfiguration::new("/tmp/engine");
        assert_eq!(config.reply_timeout, Duration::from_secs(10));
        assert_eq!(config.retransmit_batch_max, 2500);
        assert_eq!(config.negotiate_resend_max, 2);
        assert!(config.bind_address.is_none());
        assert!(config.log_any_messages);
    }

    #[test]
    fn test_builder_chain() {
        let address: SocketAddr = "127.0.0.1:9880".parse().unwrap();
        let config = EngineConfiguration::new("/tmp/engine")
            .with_bind_address(address)
            .with_reply_timeout(Duration::from_millis(200))
            .with_log_any_messages(false);

        assert_eq!(config.bind_address, Some(address));
        assert_eq!(config.reply_timeout, Duration::from_millis(200));
        assert!(!config.log_any_messages);
    }
}
