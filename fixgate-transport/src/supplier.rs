/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Pluggable channel supplier.
//!
//! The framer requests outbound channels through this trait so tests can
//! substitute a supplier that holds connects back. A disabled
//! [`DebugChannelSupplier`] parks the connect attempt instead of failing it;
//! the pending initiate reply then times out, matching a peer that is not
//! yet listening.

use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Produces outbound TCP channels for the framer.
#[async_trait]
pub trait ChannelSupplier: Send + Sync + Debug {
    /// Opens a channel to `address`. May stay pending indefinitely; the
    /// framer bounds the wait with the initiate reply's deadline.
    async fn connect(&self, address: SocketAddr) -> io::Result<TcpStream>;
}

/// Production supplier: plain `TcpStream::connect`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpChannelSupplier;

#[async_trait]
impl ChannelSupplier for TcpChannelSupplier {
    async fn connect(&self, address: SocketAddr) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Test supplier whose connects can be switched off.
///
/// While disabled, connect attempts park and re-check periodically rather
/// than erroring, so the caller observes a timeout instead of a refusal.
#[derive(Debug, Default, Clone)]
pub struct DebugChannelSupplier {
    enabled: Arc<AtomicBool>,
}

impl DebugChannelSupplier {
    /// Creates an enabled supplier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Allows connects to proceed.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Parks subsequent connect attempts.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Returns true while connects may proceed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelSupplier for DebugChannelSupplier {
    async fn connect(&self, address: SocketAddr) -> io::Result<TcpStream> {
        while !self.is_enabled() {
            debug!(%address, "connects disabled, parking attempt");
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        TcpChannelSupplier.connect(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_supplier_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let stream = TcpChannelSupplier.connect(address).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), address);
    }

    #[tokio::test]
    async fn test_tcp_supplier_reports_refusal() {
        // bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        assert!(TcpChannelSupplier.connect(address).await.is_err());
    }

    #[tokio::test]
    async fn test_debug_supplier_parks_while_disabled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let supplier = DebugChannelSupplier::new();
        supplier.disable();

        let pending = tokio::time::timeout(
            Duration::from_millis(150),
            supplier.connect(address),
        )
        .await;
        assert!(pending.is_err(), "disabled connect must not complete");

        supplier.enable();
        let stream = tokio::time::timeout(Duration::from_secs(2), supplier.connect(address))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap(), address);
    }
}
