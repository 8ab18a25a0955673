/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Bidirectional keepalive deadlines.
//!
//! Each established session tracks two deadlines: `next_send`, refreshed by
//! every outbound message, and `next_recv`, refreshed by every inbound one.
//! When `next_recv` lapses, one warning is raised and a grace interval
//! starts; a second lapse ends the session.

use std::time::{Duration, Instant};

/// What a keepalive poll asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveEvent {
    /// Nothing due yet.
    Idle,
    /// Send interval lapsed; emit a heartbeat.
    SendHeartbeat,
    /// Receive interval lapsed; warn the peer and start the grace timer.
    RecvLapsed,
    /// Grace interval lapsed with still nothing inbound; terminate.
    RecvGraceExpired,
}

/// Keepalive deadlines of one established session.
#[derive(Debug, Clone)]
pub struct KeepAliveTimers {
    send_interval: Duration,
    recv_interval: Duration,
    next_send: Instant,
    next_recv: Instant,
    lapse_warned: bool,
}

impl KeepAliveTimers {
    /// Creates timers running from `now`.
    ///
    /// # Arguments
    /// * `send_interval` - Our negotiated outbound keepalive interval
    /// * `recv_interval` - The peer's keepalive interval
    #[must_use]
    pub fn new(now: Instant, send_interval: Duration, recv_interval: Duration) -> Self {
        Self {
            send_interval,
            recv_interval,
            next_send: now + send_interval,
            next_recv: now + recv_interval,
            lapse_warned: false,
        }
    }

    /// Records an outbound message; pushes the send deadline out.
    #[inline]
    pub fn on_message_sent(&mut self, now: Instant) {
        self.next_send = now + self.send_interval;
    }

    /// Records an inbound message; pushes the receive deadline out and
    /// clears any pending lapse warning.
    #[inline]
    pub fn on_message_received(&mut self, now: Instant) {
        self.next_recv = now + self.recv_interval;
        self.lapse_warned = false;
    }

    /// Polls the deadlines. Receive expiry takes precedence over send.
    pub fn poll(&mut self, now: Instant) -> KeepAliveEvent {
        if now >= self.next_recv {
            if self.lapse_warned {
                return KeepAliveEvent::RecvGraceExpired;
            }
            self.lapse_warned = true;
            self.next_recv = now + self.recv_interval;
            return KeepAliveEvent::RecvLapsed;
        }
        if now >= self.next_send {
            return KeepAliveEvent::SendHeartbeat;
        }
        KeepAliveEvent::Idle
    }

    /// Returns the earlier of the two deadlines.
    #[must_use]
    pub fn next_deadline(&self) -> Instant {
        self.next_send.min(self.next_recv)
    }

    /// Returns the receive deadline.
    #[must_use]
    pub fn next_recv_deadline(&self) -> Instant {
        self.next_recv
    }

    /// Returns the send deadline.
    #[must_use]
    pub fn next_send_deadline(&self) -> Instant {
        self.next_send
    }

    /// Returns true after a lapse warning with no inbound traffic since.
    #[must_use]
    pub const fn lapse_warned(&self) -> bool {
        self.lapse_warned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timers(now: Instant) -> KeepAliveTimers {
        KeepAliveTimers::new(now, Duration::from_millis(500), Duration::from_millis(500))
    }

    #[test]
    fn test_idle_before_deadlines() {
        let now = Instant::now();
        let mut t = timers(now);
        assert_eq!(t.poll(now + Duration::from_millis(100)), KeepAliveEvent::Idle);
    }

    #[test]
    fn test_send_heartbeat_due() {
        let now = Instant::now();
        let mut t = timers(now);
        t.on_message_received(now + Duration::from_millis(400));

        let later = now + Duration::from_millis(600);
        assert_eq!(t.poll(later), KeepAliveEvent::SendHeartbeat);

        t.on_message_sent(later);
        assert_eq!(t.poll(later + Duration::from_millis(100)), KeepAliveEvent::Idle);
    }

    #[test]
    fn test_recv_lapse_then_grace() {
        let now = Instant::now();
        let mut t = timers(now);
        t.on_message_sent(now + Duration::from_millis(450));

        let lapse = now + Duration::from_millis(550);
        assert_eq!(t.poll(lapse), KeepAliveEvent::RecvLapsed);
        assert!(t.lapse_warned());

        // inside the grace window nothing further fires for receive
        t.on_message_sent(lapse);
        assert_eq!(t.poll(lapse + Duration::from_millis(100)), KeepAliveEvent::Idle);

        let grace_out = lapse + Duration::from_millis(600);
        assert_eq!(t.poll(grace_out), KeepAliveEvent::RecvGraceExpired);
    }

    #[test]
    fn test_inbound_clears_warning() {
        let now = Instant::now();
        let mut t = timers(now);

        let lapse = now + Duration::from_millis(550);
        assert_eq!(t.poll(lapse), KeepAliveEvent::RecvLapsed);

        t.on_message_received(lapse + Duration::from_millis(10));
        assert!(!t.lapse_warned());
        assert_eq!(t.poll(lapse + Duration::from_millis(100)), KeepAliveEvent::Idle);
    }

    #[test]
    fn test_recv_precedence_over_send() {
        let now = Instant::now();
        let mut t = timers(now);
        let late = now + Duration::from_millis(700);
        assert_eq!(t.poll(late), KeepAliveEvent::RecvLapsed);
    }
}
