/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! FIX session state machine.
//!
//! Covers both roles: the initiator sends Logon on channel-up, the acceptor
//! answers the peer's Logon. Established sessions heartbeat, answer
//! TestRequests, request resends on inbound gaps, and answer peer
//! ResendRequests with a gap-fill SequenceReset (message bodies are replayed
//! from the external archive, not from the session core).

use crate::action::Action;
use crate::config::FixSessionConfig;
use crate::keepalive::{KeepAliveEvent, KeepAliveTimers};
use crate::retransmit::RetransmitTracker;
use crate::state::SessionState;
use bytes::Bytes;
use fixgate_core::{SeqNum, SessionError, Timestamp};
use fixgate_tagvalue::{FixHeader, FixMessage, SessionMessage};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Which side of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixRole {
    /// Dials out and sends the first Logon.
    Initiator,
    /// Waits for the peer's Logon on a bound port.
    Acceptor,
}

/// State of one FIX session.
#[derive(Debug)]
pub struct FixSession {
    config: FixSessionConfig,
    header: FixHeader,
    role: FixRole,
    state: SessionState,
    next_sent_seq: u64,
    next_recv_seq: u64,
    retransmit: RetransmitTracker,
    keepalive: Option<KeepAliveTimers>,
    logon_deadline: Option<Instant>,
    logout_deadline: Option<Instant>,
    test_req_counter: u64,
}

impl FixSession {
    /// Creates a session, restoring counters from a previous run when given.
    #[must_use]
    pub fn new(config: FixSessionConfig, role: FixRole, restored: Option<(u64, u64)>) -> Self {
        let (next_sent_seq, next_recv_seq) = restored.unwrap_or((1, 1));
        let header = FixHeader::new(
            config.begin_string,
            config.sender_comp_id.clone(),
            config.target_comp_id.clone(),
        );
        Self {
            config,
            header,
            role,
            state: SessionState::Disconnected,
            next_sent_seq,
            next_recv_seq,
            retransmit: RetransmitTracker::new(u64::MAX),
            keepalive: None,
            logon_deadline: None,
            logout_deadline: None,
            test_req_counter: 0,
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the session role.
    #[must_use]
    pub const fn role(&self) -> FixRole {
        self.role
    }

    /// Returns the next outbound sequence number.
    #[must_use]
    pub const fn next_sent_seq(&self) -> u64 {
        self.next_sent_seq
    }

    /// Returns the next expected inbound sequence number.
    #[must_use]
    pub const fn next_recv_seq(&self) -> u64 {
        self.next_recv_seq
    }

    /// Returns `(next_sent_seq, next_recv_seq)` for persistence.
    #[must_use]
    pub const fn counters(&self) -> (u64, u64) {
        (self.next_sent_seq, self.next_recv_seq)
    }

    /// Marks the connect request issued to the channel supplier.
    pub fn on_connect_started(&mut self) {
        self.transition(SessionState::Connecting);
    }

    /// The channel supplier failed to produce a channel.
    pub fn on_connect_failed(&mut self) -> Vec<Action> {
        self.state = SessionState::Disconnected;
        vec![Action::HandshakeFailed(SessionError::UnableToConnect)]
    }

    /// The TCP channel is up.
    pub fn on_channel_up(&mut self, now: Instant, now_ts: Timestamp) -> Vec<Action> {
        if self.state == SessionState::Disconnected {
            // acceptor sessions are created directly from an inbound accept
            self.transition(SessionState::Connecting);
        }
        self.transition(SessionState::SentEstablish);
        self.logon_deadline = Some(now + self.config.heartbeat_interval);

        match self.role {
            FixRole::Initiator => {
                if self.config.reset_seq_num {
                    self.next_sent_seq = 1;
                    self.next_recv_seq = 1;
                }
                info!(session = %self.header.sender_comp_id, "sending logon");
                vec![Action::Send(self.encode_logon(now_ts)), Action::SequencesDirty]
            }
            FixRole::Acceptor => Vec::new(),
        }
    }

    /// The channel dropped outside a locally-driven teardown.
    pub fn on_channel_closed(&mut self) -> Vec<Action> {
        let was_visible = self.state.is_library_visible();
        self.enter_disconnected();
        if was_visible {
            vec![Action::Unbound]
        } else {
            Vec::new()
        }
    }

    /// Handles one parsed inbound frame.
    pub fn on_message(&mut self, msg: &FixMessage<'_>, now: Instant, now_ts: Timestamp) -> Vec<Action> {
        if let Some(keepalive) = &mut self.keepalive {
            keepalive.on_message_received(now);
        }

        let classified = match SessionMessage::classify(msg) {
            Ok(classified) => classified,
            Err(error) => {
                warn!(%error, "malformed session message");
                return self.force_logout("malformed message", now, now_ts);
            }
        };

        if let SessionMessage::Logon {
            heart_bt_int,
            reset_seq_num,
        } = classified
        {
            let logon_seq = msg.seq_num().map(SeqNum::value);
            return self.on_logon(heart_bt_int, reset_seq_num, logon_seq, now, now_ts);
        }

        let Some(seq_num) = msg.seq_num() else {
            return self.force_logout("missing MsgSeqNum", now, now_ts);
        };

        if !self.state.is_post_handshake() {
            return Vec::new();
        }

        let mut actions = self.apply_sequence(seq_num.value(), msg.poss_dup(), now, now_ts);
        if self.state != SessionState::Established && self.state != SessionState::Terminating {
            return actions;
        }

        match classified {
            SessionMessage::Heartbeat { .. } => {}
            SessionMessage::TestRequest { test_req_id } => {
                let seq = self.claim_seq();
                actions.push(Action::Send(self.header.heartbeat(
                    seq,
                    now_ts,
                    Some(test_req_id),
                )));
                self.mark_sent(now);
            }
            SessionMessage::ResendRequest { begin_seq_no, .. } => {
                // No message bodies in the session core: gap-fill forward.
                debug!(begin_seq_no, "answering resend request with gap fill");
                let new_seq_no = self.next_sent_seq;
                actions.push(Action::Send(self.header.sequence_reset(
                    begin_seq_no,
                    now_ts,
                    new_seq_no,
                )));
                self.mark_sent(now);
            }
            SessionMessage::SequenceReset { new_seq_no, .. } => {
                if new_seq_no > self.next_recv_seq {
                    self.next_recv_seq = new_seq_no;
                    self.retransmit.clear();
                    actions.push(Action::SequencesDirty);
                }
            }
            SessionMessage::Logout { .. } => {
                if self.state == SessionState::Terminating {
                    // peer confirmed our logout
                    self.enter_disconnected();
                    actions.push(Action::Unbound);
                    actions.push(Action::Disconnect);
                } else {
                    let seq = self.claim_seq();
                    actions.push(Action::Send(self.header.logout(seq, now_ts, None)));
                    self.enter_disconnected();
                    actions.push(Action::Unbound);
                    actions.push(Action::Disconnect);
                }
            }
            SessionMessage::Reject { ref_seq_num } => {
                actions.push(Action::Error {
                    code: 2,
                    description: format!("session-level reject of seq {ref_seq_num}"),
                });
            }
            SessionMessage::Application { msg_type } => {
                actions.push(Action::ForwardBusiness {
                    template_id: u16::from(msg_type.first().copied().unwrap_or(0)),
                    data: Bytes::copy_from_slice(msg.raw()),
                    retransmitted: msg.poss_dup(),
                });
            }
            SessionMessage::Logon { .. } => unreachable!("handled above"),
        }

        actions
    }

    /// Advances timers; `now` is the framer's duty-cycle instant.
    pub fn on_timer(&mut self, now: Instant, now_ts: Timestamp) -> Vec<Action> {
        if let Some(deadline) = self.logout_deadline {
            if now >= deadline && self.state == SessionState::Terminating {
                warn!("logout unanswered, dropping channel");
                self.enter_disconnected();
                return vec![Action::Unbound, Action::Disconnect];
            }
        }

        if let Some(deadline) = self.logon_deadline {
            if now >= deadline && self.state == SessionState::SentEstablish {
                warn!("logon unanswered, giving up");
                self.enter_disconnected();
                return vec![
                    Action::HandshakeFailed(SessionError::HandshakeTimedOut {
                        phase: "logon",
                        attempts: 1,
                    }),
                    Action::Disconnect,
                ];
            }
        }

        if self.state == SessionState::Established {
            if let Some(keepalive) = &mut self.keepalive {
                match keepalive.poll(now) {
                    KeepAliveEvent::Idle => {}
                    KeepAliveEvent::SendHeartbeat => {
                        let seq = self.claim_seq();
                        let frame = self.header.heartbeat(seq, now_ts, None);
                        self.mark_sent(now);
                        return vec![Action::Send(frame)];
                    }
                    KeepAliveEvent::RecvLapsed => {
                        self.test_req_counter += 1;
                        let id = format!("TEST{}", self.test_req_counter);
                        let seq = self.claim_seq();
                        let frame = self.header.test_request(seq, now_ts, &id);
                        self.mark_sent(now);
                        return vec![Action::Send(frame)];
                    }
                    KeepAliveEvent::RecvGraceExpired => {
                        return self.force_logout("heartbeat timeout", now, now_ts);
                    }
                }
            }
        }

        Vec::new()
    }

    /// Returns the next instant at which [`Self::on_timer`] has work.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut deadline = match self.state {
            SessionState::SentEstablish => self.logon_deadline,
            SessionState::Terminating => self.logout_deadline,
            _ => None,
        };
        if self.state == SessionState::Established {
            if let Some(keepalive) = &self.keepalive {
                let next = keepalive.next_deadline();
                deadline = Some(deadline.map_or(next, |d| d.min(next)));
            }
        }
        deadline
    }

    /// Starts a locally-driven graceful logout.
    pub fn initiate_logout(&mut self, text: Option<&str>, now: Instant, now_ts: Timestamp) -> Vec<Action> {
        if self.state != SessionState::Established {
            return Vec::new();
        }
        let seq = self.claim_seq();
        let frame = self.header.logout(seq, now_ts, text);
        self.mark_sent(now);
        self.transition(SessionState::Terminating);
        self.logout_deadline = Some(now + self.config.heartbeat_interval);
        vec![Action::Send(frame)]
    }

    /// Sends an application message body built by `build`, which receives
    /// the assigned sequence number.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidState`] unless established.
    pub fn send_app<F>(&mut self, now: Instant, build: F) -> Result<Vec<Action>, SessionError>
    where
        F: FnOnce(&FixHeader, u64) -> bytes::BytesMut,
    {
        if self.state != SessionState::Established {
            return Err(SessionError::InvalidState {
                expected: SessionState::Established.name(),
                current: self.state.name(),
            });
        }
        let seq = self.claim_seq();
        let frame = build(&self.header, seq);
        self.mark_sent(now);
        Ok(vec![Action::Send(frame), Action::SequencesDirty])
    }

    fn on_logon(
        &mut self,
        heart_bt_int: u64,
        reset_seq_num: bool,
        seq_num: Option<u64>,
        now: Instant,
        now_ts: Timestamp,
    ) -> Vec<Action> {
        if self.state != SessionState::SentEstablish {
            return Vec::new();
        }

        if reset_seq_num {
            self.next_recv_seq = 1;
            self.next_sent_seq = 1;
        }
        if let Some(seq_num) = seq_num {
            if seq_num == self.next_recv_seq {
                self.next_recv_seq += 1;
            }
            // a gapped logon is handled by the first post-logon message
        }

        let interval = std::time::Duration::from_secs(heart_bt_int.max(1));
        self.keepalive = Some(KeepAliveTimers::new(now, interval, interval));
        self.logon_deadline = None;
        self.transition(SessionState::Established);
        info!(role = ?self.role, "fix session established");

        let mut actions = Vec::new();
        if self.role == FixRole::Acceptor {
            actions.push(Action::Send(self.encode_logon(now_ts)));
        }
        actions.push(Action::HandshakeComplete);
        actions.push(Action::SequencesDirty);
        actions
    }

    /// Applies inbound sequencing rules; may emit a ResendRequest or start
    /// a logout on an unrecoverable low sequence.
    fn apply_sequence(
        &mut self,
        seq_num: u64,
        poss_dup: bool,
        now: Instant,
        now_ts: Timestamp,
    ) -> Vec<Action> {
        if poss_dup {
            self.retransmit.on_fill();
            return Vec::new();
        }

        if seq_num == self.next_recv_seq {
            self.next_recv_seq += 1;
            return vec![Action::SequencesDirty];
        }

        if seq_num > self.next_recv_seq {
            let count = seq_num - self.next_recv_seq;
            let mut actions = Vec::new();
            if let Some(range) = self.retransmit.on_gap(self.next_recv_seq, count) {
                debug!(from = range.from_seq_no, "requesting resend");
                let seq = self.claim_seq();
                actions.push(Action::Send(self.header.resend_request(
                    seq,
                    now_ts,
                    range.from_seq_no,
                    0,
                )));
                self.mark_sent(now);
            }
            self.next_recv_seq = seq_num + 1;
            actions.push(Action::SequencesDirty);
            return actions;
        }

        warn!(
            seq_num,
            expected = self.next_recv_seq,
            "low sequence without PossDupFlag, logging out"
        );
        self.force_logout("MsgSeqNum too low", now, now_ts)
    }

    fn force_logout(&mut self, text: &str, now: Instant, now_ts: Timestamp) -> Vec<Action> {
        if self.state == SessionState::Terminating {
            return Vec::new();
        }
        let seq = self.claim_seq();
        let frame = self.header.logout(seq, now_ts, Some(text));
        self.mark_sent(now);
        if self.state == SessionState::Established || self.state == SessionState::SentEstablish {
            self.state = SessionState::Terminating;
        }
        self.logout_deadline = Some(now + self.config.heartbeat_interval);
        vec![Action::Send(frame)]
    }

    fn encode_logon(&mut self, now_ts: Timestamp) -> bytes::BytesMut {
        let seq = self.claim_seq();
        let credentials = self
            .config
            .credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()));
        self.header.logon(
            seq,
            now_ts,
            self.config.heartbeat_interval.as_secs(),
            self.config.reset_seq_num,
            credentials,
        )
    }

    fn claim_seq(&mut self) -> u64 {
        let seq = self.next_sent_seq;
        self.next_sent_seq += 1;
        seq
    }

    fn mark_sent(&mut self, now: Instant) {
        if let Some(keepalive) = &mut self.keepalive {
            keepalive.on_message_sent(now);
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_become(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }

    fn enter_disconnected(&mut self) {
        self.state = SessionState::Disconnected;
        self.keepalive = None;
        self.logon_deadline = None;
        self.logout_deadline = None;
        self.retransmit.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixgate_core::CompId;
    use fixgate_tagvalue::tags;
    use std::time::Duration;

    const HEARTBEAT: Duration = Duration::from_secs(2);

    fn config(sender: &str, target: &str) -> FixSessionConfig {
        FixSessionConfig::new(CompId::new(sender).unwrap(), CompId::new(target).unwrap())
            .with_heartbeat_interval(HEARTBEAT)
    }

    fn sent_frame(actions: &[Action]) -> &bytes::BytesMut {
        actions
            .iter()
            .find_map(|a| match a {
                Action::Send(frame) => Some(frame),
                _ => None,
            })
            .expect("no Send action")
    }

    fn classify(frame: &[u8]) -> SessionMessage<'_> {
        let msg = FixMessage::parse(frame).unwrap();
        SessionMessage::classify(&msg).unwrap()
    }

    /// Runs both sides of a logon handshake, in-memory.
    fn handshaken() -> (FixSession, FixSession) {
        let now = Instant::now();
        let ts = Timestamp::from_millis(0);

        let mut initiator = FixSession::new(config("INIT", "ACC"), FixRole::Initiator, None);
        let mut acceptor = FixSession::new(config("ACC", "INIT"), FixRole::Acceptor, None);
        initiator.on_connect_started();

        let actions = initiator.on_channel_up(now, ts);
        let logon = sent_frame(&actions).clone();

        let actions = acceptor.on_channel_up(now, ts);
        assert!(actions.is_empty());
        let actions = acceptor.on_message(&FixMessage::parse(&logon).unwrap(), now, ts);
        assert!(actions.iter().any(|a| matches!(a, Action::HandshakeComplete)));
        let reply = sent_frame(&actions).clone();

        let actions = initiator.on_message(&FixMessage::parse(&reply).unwrap(), now, ts);
        assert!(actions.iter().any(|a| matches!(a, Action::HandshakeComplete)));

        assert_eq!(initiator.state(), SessionState::Established);
        assert_eq!(acceptor.state(), SessionState::Established);
        (initiator, acceptor)
    }

    #[test]
    fn test_logon_handshake() {
        let (initiator, acceptor) = handshaken();
        assert_eq!(initiator.next_sent_seq(), 2);
        assert_eq!(initiator.next_recv_seq(), 2);
        assert_eq!(acceptor.next_sent_seq(), 2);
        assert_eq!(acceptor.next_recv_seq(), 2);
    }

    #[test]
    fn test_logon_timeout_fails_handshake() {
        let now = Instant::now();
        let ts = Timestamp::from_millis(0);
        let mut initiator = FixSession::new(config("INIT", "ACC"), FixRole::Initiator, None);
        initiator.on_connect_started();
        initiator.on_channel_up(now, ts);

        let actions = initiator.on_timer(now + HEARTBEAT * 2, ts);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::HandshakeFailed(SessionError::HandshakeTimedOut { phase: "logon", .. })
        )));
        assert_eq!(initiator.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_test_request_answered_with_heartbeat() {
        let now = Instant::now();
        let ts = Timestamp::from_millis(0);
        let (mut initiator, mut acceptor) = handshaken();

        let frame = {
            let seq = acceptor.next_sent_seq;
            acceptor.next_sent_seq += 1;
            acceptor.header.test_request(seq, ts, "PING7")
        };

        let actions = initiator.on_message(&FixMessage::parse(&frame).unwrap(), now, ts);
        match classify(sent_frame(&actions)) {
            SessionMessage::Heartbeat { test_req_id } => {
                assert_eq!(test_req_id, Some(&b"PING7"[..]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_gap_triggers_resend_request() {
        let now = Instant::now();
        let ts = Timestamp::from_millis(0);
        let (mut initiator, mut acceptor) = handshaken();

        // acceptor skips ahead: sends seq 4 when initiator expects 2
        acceptor.next_sent_seq = 4;
        let frame = {
            let seq = acceptor.next_sent_seq;
            acceptor.next_sent_seq += 1;
            acceptor.header.heartbeat(seq, ts, None)
        };

        let actions = initiator.on_message(&FixMessage::parse(&frame).unwrap(), now, ts);
        match classify(sent_frame(&actions)) {
            SessionMessage::ResendRequest {
                begin_seq_no,
                end_seq_no,
            } => {
                assert_eq!(begin_seq_no, 2);
                assert_eq!(end_seq_no, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(initiator.next_recv_seq(), 5);
    }

    #[test]
    fn test_gap_fill_sequence_reset_advances() {
        let now = Instant::now();
        let ts = Timestamp::from_millis(0);
        let (mut initiator, acceptor) = handshaken();

        let frame = acceptor.header.sequence_reset(2, ts, 6);
        let actions = initiator.on_message(&FixMessage::parse(&frame).unwrap(), now, ts);
        assert!(actions.iter().any(|a| matches!(a, Action::SequencesDirty)));
        assert_eq!(initiator.next_recv_seq(), 6);
    }

    #[test]
    fn test_low_sequence_logs_out() {
        let now = Instant::now();
        let ts = Timestamp::from_millis(0);
        let (mut initiator, acceptor) = handshaken();

        // seq 1 again, no PossDupFlag
        let frame = acceptor.header.heartbeat(1, ts, None);
        let actions = initiator.on_message(&FixMessage::parse(&frame).unwrap(), now, ts);
        match classify(sent_frame(&actions)) {
            SessionMessage::Logout { text } => {
                assert!(text.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(initiator.state(), SessionState::Terminating);
    }

    #[test]
    fn test_logout_round() {
        let now = Instant::now();
        let ts = Timestamp::from_millis(0);
        let (mut initiator, mut acceptor) = handshaken();

        let actions = initiator.initiate_logout(Some("bye"), now, ts);
        let logout = sent_frame(&actions).clone();
        assert_eq!(initiator.state(), SessionState::Terminating);

        let actions = acceptor.on_message(&FixMessage::parse(&logout).unwrap(), now, ts);
        let reply = sent_frame(&actions).clone();
        assert!(actions.iter().any(|a| matches!(a, Action::Unbound)));
        assert_eq!(acceptor.state(), SessionState::Disconnected);

        let actions = initiator.on_message(&FixMessage::parse(&reply).unwrap(), now, ts);
        assert!(actions.iter().any(|a| matches!(a, Action::Disconnect)));
        assert_eq!(initiator.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_heartbeat_sent_when_idle() {
        let now = Instant::now();
        let ts = Timestamp::from_millis(0);
        let (mut initiator, acceptor) = handshaken();

        // keep the receive deadline ahead
        let frame = acceptor.header.heartbeat(2, ts, None);
        initiator.on_message(
            &FixMessage::parse(&frame).unwrap(),
            now + Duration::from_secs(1),
            ts,
        );

        let actions = initiator.on_timer(now + HEARTBEAT, ts);
        assert!(matches!(
            classify(sent_frame(&actions)),
            SessionMessage::Heartbeat { test_req_id: None }
        ));
    }

    #[test]
    fn test_test_request_sent_on_recv_lapse() {
        let now = Instant::now();
        let ts = Timestamp::from_millis(0);
        let (mut initiator, _) = handshaken();

        let actions = initiator.on_timer(now + HEARTBEAT + Duration::from_millis(50), ts);
        assert!(matches!(
            classify(sent_frame(&actions)),
            SessionMessage::TestRequest { .. }
        ));

        // grace expiry forces a logout
        let actions = initiator.on_timer(now + HEARTBEAT * 3, ts);
        assert!(matches!(
            classify(sent_frame(&actions)),
            SessionMessage::Logout { .. }
        ));
        assert_eq!(initiator.state(), SessionState::Terminating);
    }

    #[test]
    fn test_application_passthrough_forwarded() {
        let now = Instant::now();
        let ts = Timestamp::from_millis(0);
        let (mut initiator, mut acceptor) = handshaken();

        let frame = {
            let seq = acceptor.next_sent_seq;
            acceptor.next_sent_seq += 1;
            let mut builder = fixgate_tagvalue::MessageBuilder::new("FIX.4.4");
            builder
                .field_str(tags::MSG_TYPE, "D")
                .field_str(tags::SENDER_COMP_ID, "ACC")
                .field_str(tags::TARGET_COMP_ID, "INIT")
                .field_uint(tags::MSG_SEQ_NUM, seq)
                .field_str(11, "ORDER1");
            builder.finish()
        };

        let actions = initiator.on_message(&FixMessage::parse(&frame).unwrap(), now, ts);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ForwardBusiness { retransmitted: false, .. })));
        assert_eq!(initiator.next_recv_seq(), 3);
    }
}
