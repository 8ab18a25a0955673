/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Per-session configuration.

use fixgate_core::CompId;
use std::net::SocketAddr;
use std::time::Duration;

/// Default handshake resend budget (total sends per phase).
pub const DEFAULT_NEGOTIATE_RESEND_MAX: u32 = 2;

/// Default retransmit batch limit for iLink3.
pub const DEFAULT_RETRANSMIT_BATCH_MAX: u64 = 2500;

/// Default outbound-replay retention in frames.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1024;

/// Configuration of one iLink3 initiator session.
#[derive(Debug, Clone)]
pub struct IlinkSessionConfig {
    /// Exchange gateway address.
    pub address: SocketAddr,
    /// Exchange-assigned session id.
    pub session_id: String,
    /// Exchange-assigned firm id.
    pub firm_id: String,
    /// Access key id presented during the handshake.
    pub access_key_id: String,
    /// Private key used to sign handshake payloads.
    pub user_key: String,
    /// Requested keepalive interval.
    pub keep_alive_interval: Duration,
    /// Present the previous uuid and resume its sequence numbers.
    pub re_establish_last_session: bool,
    /// Total sends per handshake phase before timing out.
    pub negotiate_resend_max: u32,
    /// Maximum messages per retransmit request chunk.
    pub retransmit_batch_max: u64,
    /// Outbound frames retained for NotApplied recovery.
    pub replay_capacity: usize,
    /// Overrides the engine reply timeout for this initiate call.
    pub timeout: Option<Duration>,
}

impl IlinkSessionConfig {
    /// Creates a configuration with default timing parameters.
    #[must_use]
    pub fn new(
        address: SocketAddr,
        session_id: impl Into<String>,
        firm_id: impl Into<String>,
    ) -> Self {
        Self {
            address,
            session_id: session_id.into(),
            firm_id: firm_id.into(),
            access_key_id: String::new(),
            user_key: String::new(),
            keep_alive_interval: Duration::from_secs(30),
            re_establish_last_session: false,
            negotiate_resend_max: DEFAULT_NEGOTIATE_RESEND_MAX,
            retransmit_batch_max: DEFAULT_RETRANSMIT_BATCH_MAX,
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            timeout: None,
        }
    }

    /// Sets the access key id.
    #[must_use]
    pub fn with_access_key_id(mut self, key: impl Into<String>) -> Self {
        self.access_key_id = key.into();
        self
    }

    /// Sets the signing key.
    #[must_use]
    pub fn with_user_key(mut self, key: impl Into<String>) -> Self {
        self.user_key = key.into();
        self
    }

    /// Sets the requested keepalive interval.
    #[must_use]
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Requests re-establishment of the previous connection.
    #[must_use]
    pub const fn with_re_establish_last_session(mut self, re_establish: bool) -> Self {
        self.re_establish_last_session = re_establish;
        self
    }

    /// Sets the handshake resend budget.
    #[must_use]
    pub const fn with_negotiate_resend_max(mut self, max: u32) -> Self {
        self.negotiate_resend_max = max;
        self
    }

    /// Sets the retransmit batch limit.
    #[must_use]
    pub const fn with_retransmit_batch_max(mut self, max: u64) -> Self {
        self.retransmit_batch_max = max;
        self
    }

    /// Sets a per-call reply timeout for initiate.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Configuration of one FIX session (initiator or acceptor side).
#[derive(Debug, Clone)]
pub struct FixSessionConfig {
    /// Peer address; unused on the acceptor side.
    pub address: Option<SocketAddr>,
    /// FIX version string.
    pub begin_string: &'static str,
    /// Local comp id (tag 49).
    pub sender_comp_id: CompId,
    /// Remote comp id (tag 56).
    pub target_comp_id: CompId,
    /// Heartbeat interval.
    pub heartbeat_interval: Duration,
    /// Reset both sequence numbers at logon.
    pub reset_seq_num: bool,
    /// Optional logon credentials.
    pub credentials: Option<(String, String)>,
    /// Overrides the engine reply timeout for this initiate call.
    pub timeout: Option<Duration>,
}

impl FixSessionConfig {
    /// Creates a configuration with default timing parameters.
    #[must_use]
    pub fn new(sender_comp_id: CompId, target_comp_id: CompId) -> Self {
        Self {
            address: None,
            begin_string: "FIX.4.4",
            sender_comp_id,
            target_comp_id,
            heartbeat_interval: Duration::from_secs(30),
            reset_seq_num: false,
            credentials: None,
            timeout: None,
        }
    }

    /// Sets the peer address for an initiator.
    #[must_use]
    pub const fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the logon credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets a per-call reply timeout for initiate.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ilink_defaults() {
        let config = IlinkSessionConfig::new("127.0.0.1:9000".parse().unwrap(), "ABC", "DEFGH");
        assert_eq!(config.negotiate_resend_max, 2);
        assert_eq!(config.retransmit_batch_max, 2500);
        assert!(!config.re_establish_last_session);
        assert!(config.timeout.is_none());
    }

    #[test]
    fn test_ilink_builder_chain() {
        let config = IlinkSessionConfig::new("127.0.0.1:9000".parse().unwrap(), "ABC", "DEFGH")
            .with_access_key_id("12345678901234567890")
            .with_keep_alive_interval(Duration::from_millis(500))
            .with_re_establish_last_session(true)
            .with_timeout(Duration::from_millis(200));

        assert_eq!(config.keep_alive_interval, Duration::from_millis(500));
        assert!(config.re_establish_last_session);
        assert_eq!(config.timeout, Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_fix_builder_chain() {
        let config = FixSessionConfig::new(
            CompId::new("INIT").unwrap(),
            CompId::new("ACC").unwrap(),
        )
        .with_address("127.0.0.1:9001".parse().unwrap())
        .with_credentials("bob", "secret")
        .with_heartbeat_interval(Duration::from_secs(5));

        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert!(config.address.is_some());
        assert_eq!(config.credentials.as_ref().unwrap().0, "bob");
    }
}
