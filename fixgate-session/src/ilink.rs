/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! iLink3 initiator session state machine.
//!
//! Drives one exchange connection through
//! `CONNECTING -> SENT_NEGOTIATE -> NEGOTIATED -> SENT_ESTABLISH ->
//! ESTABLISHED -> TERMINATING` and back, with handshake resends, keepalive
//! sequencing, inbound gap recovery, and NotApplied handling. All methods
//! return [`Action`]s for the framer to execute; nothing here touches a
//! socket or the clock directly.

use crate::action::Action;
use crate::config::IlinkSessionConfig;
use crate::keepalive::{KeepAliveEvent, KeepAliveTimers};
use crate::replay::ReplayBuffer;
use crate::retransmit::{RetransmitRange, RetransmitTracker};
use crate::state::SessionState;
use bytes::{Bytes, BytesMut};
use fixgate_core::{ConnectionUuid, SessionError};
use fixgate_sbe::business::{BusinessHeader, NewOrderSingle, Side};
use fixgate_sbe::messages::{
    Establish, EstablishmentAck, IlinkMessage, KeepAliveLapsed, Negotiate, NotApplied,
    RetransmitRequest, Sequence, Terminate,
};
use fixgate_sbe::{BUSINESS_HEADER_LEN, HEADER_LEN};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Error code sent on a low-sequence guard terminate.
const ERROR_CODE_LOW_SEQUENCE: u16 = 9;
/// Error code sent when the keepalive grace interval expires.
const ERROR_CODE_KEEPALIVE_EXPIRED: u16 = 5;
/// Error-consumer code for protocol violations.
const CONSUMER_CODE_PROTOCOL: u32 = 1;

/// Offset of the retransmit flag within a business frame.
const POSS_RETRANS_OFFSET: usize = HEADER_LEN + BUSINESS_HEADER_LEN - 1;

/// Fields of an outbound NewOrderSingle.
#[derive(Debug, Clone)]
pub struct NewOrderParams {
    /// Client order id.
    pub cl_ord_id: String,
    /// Order side.
    pub side: Side,
    /// Order quantity.
    pub order_qty: u32,
    /// Limit price mantissa, nine implied decimals.
    pub price: i64,
    /// Order request id.
    pub order_request_id: u64,
    /// Party details list request id.
    pub party_details_list_req_id: u64,
}

/// Library's answer to a NotApplied report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotAppliedResponse {
    /// Skip the gap: advance the exchange with a Sequence message.
    Gapfill,
    /// Replay the missed outbound messages with the retransmit flag set.
    Retransmit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakePhase {
    Negotiate,
    Establish,
}

#[derive(Debug)]
struct HandshakeTimer {
    phase: HandshakePhase,
    deadline: Instant,
    attempts: u32,
}

/// State of one iLink3 initiator session.
#[derive(Debug)]
pub struct IlinkSession {
    config: IlinkSessionConfig,
    state: SessionState,
    uuid: ConnectionUuid,
    /// Uuid of the previous connection, for re-establishment.
    prev_uuid: ConnectionUuid,
    next_sent_seq: u64,
    next_recv_seq: u64,
    retransmit: RetransmitTracker,
    replay: ReplayBuffer,
    keepalive: Option<KeepAliveTimers>,
    handshake: Option<HandshakeTimer>,
    terminate_deadline: Option<Instant>,
    pending_not_applied: Option<(u64, u64)>,
}

impl IlinkSession {
    /// Creates a session, restoring counters from a previous run when given.
    #[must_use]
    pub fn new(config: IlinkSessionConfig, restored: Option<(u64, u64, ConnectionUuid)>) -> Self {
        let (next_sent_seq, next_recv_seq, prev_uuid) =
            restored.unwrap_or((1, 1, ConnectionUuid::NULL));
        let retransmit = RetransmitTracker::new(config.retransmit_batch_max);
        let replay = ReplayBuffer::new(config.replay_capacity);
        Self {
            config,
            state: SessionState::Disconnected,
            uuid: ConnectionUuid::NULL,
            prev_uuid,
            next_sent_seq,
            next_recv_seq,
            retransmit,
            replay,
            keepalive: None,
            handshake: None,
            terminate_deadline: None,
            pending_not_applied: None,
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the uuid of the current connection.
    #[must_use]
    pub const fn uuid(&self) -> ConnectionUuid {
        self.uuid
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

    /// Returns the retransmit fill counter, or
    /// [`fixgate_core::NOT_AWAITING_RETRANSMIT`] when no request is in
    /// flight.
    #[must_use]
    pub fn retransmit_fill_seq(&self) -> u64 {
        self.retransmit.fill_seq()
    }

    /// Returns `(next_sent_seq, next_recv_seq, uuid)` for persistence.
    #[must_use]
    pub fn counters(&self) -> (u64, u64, ConnectionUuid) {
        let uuid = if self.uuid.is_null() { self.prev_uuid } else { self.uuid };
        (self.next_sent_seq, self.next_recv_seq, uuid)
    }

    /// Marks the connect request issued to the channel supplier.
    pub fn on_connect_started(&mut self) {
        self.transition(SessionState::Connecting);
    }

    /// The channel supplier failed to produce a channel.
    pub fn on_connect_failed(&mut self) -> Vec<Action> {
        self.transition(SessionState::Disconnected);
        vec![Action::HandshakeFailed(SessionError::UnableToConnect)]
    }

    /// The TCP channel is up; open the handshake.
    pub fn on_channel_up(&mut self, now: Instant, now_ns: u64) -> Vec<Action> {
        if self.config.re_establish_last_session && !self.prev_uuid.is_null() {
            self.uuid = self.prev_uuid;
            self.transition(SessionState::SentEstablish);
            self.arm_handshake(HandshakePhase::Establish, now);
            info!(uuid = %self.uuid, "re-establishing previous session");
            return match self.encode_establish(now_ns) {
                Ok(frame) => vec![Action::Send(frame)],
                Err(e) => self.handshake_encode_failure(e),
            };
        }

        self.uuid = ConnectionUuid::new(now_ns);
        self.next_sent_seq = 1;
        self.next_recv_seq = 1;
        self.transition(SessionState::SentNegotiate);
        self.arm_handshake(HandshakePhase::Negotiate, now);
        info!(uuid = %self.uuid, "negotiating new session");
        match self.encode_negotiate(now_ns) {
            Ok(frame) => vec![Action::Send(frame)],
            Err(e) => self.handshake_encode_failure(e),
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

    /// Handles one decoded inbound message.
    pub fn on_message(&mut self, msg: &IlinkMessage<'_>, now: Instant, now_ns: u64) -> Vec<Action> {
        if let Some(keepalive) = &mut self.keepalive {
            keepalive.on_message_received(now);
        }

        match msg {
            IlinkMessage::NegotiateResponse(response) => self.on_negotiate_response(response.uuid, now, now_ns),
            IlinkMessage::NegotiateReject(reject) => {
                self.on_handshake_reject(SessionError::NegotiateRejected {
                    error_code: reject.error_codes,
                    reason: reject.reason.to_string(),
                })
            }
            IlinkMessage::EstablishmentAck(ack) => self.on_establishment_ack(ack, now, now_ns),
            IlinkMessage::EstablishmentReject(reject) => {
                self.on_handshake_reject(SessionError::EstablishmentRejected {
                    error_code: reject.error_codes,
                    reason: reject.reason.to_string(),
                })
            }
            IlinkMessage::Sequence(sequence) => self.on_sequence(sequence, now, now_ns),
            IlinkMessage::Business {
                template_id,
                header,
                body,
            } => self.on_business(*template_id, header, body, now, now_ns),
            IlinkMessage::NotApplied(not_applied) => self.on_not_applied(not_applied),
            IlinkMessage::RetransmitReject(reject) => {
                let mut actions = vec![Action::RetransmitRejected {
                    reason: reject.reason.to_string(),
                    error_codes: reject.error_codes,
                }];
                if let Some(range) = self.retransmit.on_reject() {
                    actions.extend(self.send_retransmit_request(range, now, now_ns));
                }
                actions
            }
            IlinkMessage::Retransmission(_) => Vec::new(),
            IlinkMessage::Terminate(terminate) => self.on_terminate(terminate, now, now_ns),
            IlinkMessage::Negotiate(_)
            | IlinkMessage::Establish(_)
            | IlinkMessage::RetransmitRequest(_) => vec![Action::Error {
                code: CONSUMER_CODE_PROTOCOL,
                description: format!(
                    "unexpected initiator-bound template {} in state {}",
                    msg.template_id(),
                    self.state
                ),
            }],
        }
    }

    /// Advances timers; `now` is the framer's duty-cycle instant.
    pub fn on_timer(&mut self, now: Instant, now_ns: u64) -> Vec<Action> {
        if let Some(deadline) = self.terminate_deadline {
            if now >= deadline && self.state == SessionState::Terminating {
                warn!(uuid = %self.uuid, "terminate unanswered, dropping channel");
                self.enter_disconnected();
                return vec![Action::Unbound, Action::Disconnect];
            }
        }

        if let Some(handshake) = &self.handshake {
            if now >= handshake.deadline {
                return self.on_handshake_timer(now, now_ns);
            }
        }

        if self.state == SessionState::Established {
            if let Some(keepalive) = &mut self.keepalive {
                match keepalive.poll(now) {
                    KeepAliveEvent::Idle => {}
                    KeepAliveEvent::SendHeartbeat => {
                        debug!(uuid = %self.uuid, "sending keepalive sequence");
                        return vec![self.send_sequence(KeepAliveLapsed::NotLapsed, now)];
                    }
                    KeepAliveEvent::RecvLapsed => {
                        warn!(uuid = %self.uuid, "peer keepalive lapsed, warning");
                        return vec![self.send_sequence(KeepAliveLapsed::Lapsed, now)];
                    }
                    KeepAliveEvent::RecvGraceExpired => {
                        warn!(uuid = %self.uuid, "peer keepalive grace expired, terminating");
                        return self.start_terminate(
                            "keepalive interval lapsed",
                            ERROR_CODE_KEEPALIVE_EXPIRED,
                            now,
                            now_ns,
                        );
                    }
                }
            }
        }

        Vec::new()
    }

    /// Returns the next instant at which [`Self::on_timer`] has work.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut deadline = self.terminate_deadline;
        if let Some(handshake) = &self.handshake {
            deadline = Some(deadline.map_or(handshake.deadline, |d| d.min(handshake.deadline)));
        }
        if self.state == SessionState::Established {
            if let Some(keepalive) = &self.keepalive {
                let next = keepalive.next_deadline();
                deadline = Some(deadline.map_or(next, |d| d.min(next)));
            }
        }
        deadline
    }

    /// Starts a locally-driven graceful termination.
    pub fn initiate_terminate(
        &mut self,
        reason: &str,
        error_code: u16,
        now: Instant,
        now_ns: u64,
    ) -> Vec<Action> {
        if !matches!(
            self.state,
            SessionState::Established | SessionState::SentEstablish
        ) {
            return Vec::new();
        }
        self.start_terminate(reason, error_code, now, now_ns)
    }

    /// Sends a NewOrderSingle, assigning the next outbound sequence number.
    ///
    /// # Errors
    /// - [`SessionError::InvalidState`] unless the session is established
    /// - [`SessionError::RetransmitInProgress`] while a NotApplied response
    ///   is outstanding
    pub fn send_new_order(
        &mut self,
        params: &NewOrderParams,
        now: Instant,
    ) -> Result<Vec<Action>, SessionError> {
        if self.state != SessionState::Established {
            return Err(SessionError::InvalidState {
                expected: SessionState::Established.name(),
                current: self.state.name(),
            });
        }
        if self.pending_not_applied.is_some() {
            return Err(SessionError::RetransmitInProgress);
        }

        let seq_num = self.next_sent_seq;
        let order = NewOrderSingle {
            header: BusinessHeader {
                uuid: self.uuid.value(),
                seq_num: seq_num as u32,
                poss_retrans: false,
            },
            side: params.side,
            order_qty: params.order_qty,
            price: params.price,
            cl_ord_id: &params.cl_ord_id,
            sender_id: &self.config.firm_id,
            order_request_id: params.order_request_id,
            party_details_list_req_id: params.party_details_list_req_id,
        };
        let mut frame = BytesMut::new();
        order
            .encode(&mut frame)
            .map_err(|e| SessionError::Configuration(e.to_string()))?;

        self.next_sent_seq += 1;
        self.replay.push(seq_num, Bytes::copy_from_slice(&frame));
        self.mark_sent(now);
        Ok(vec![Action::Send(frame), Action::SequencesDirty])
    }

    /// Applies the library's answer to a NotApplied report.
    pub fn on_not_applied_response(&mut self, response: NotAppliedResponse, now: Instant) -> Vec<Action> {
        let Some((from_seq_no, msg_count)) = self.pending_not_applied.take() else {
            return Vec::new();
        };

        match response {
            NotAppliedResponse::Gapfill => {
                debug!(from_seq_no, msg_count, "gapfilling not-applied range");
                vec![self.send_sequence(KeepAliveLapsed::NotLapsed, now), Action::SequencesDirty]
            }
            NotAppliedResponse::Retransmit => {
                let frames = self.replay.range(from_seq_no, msg_count);
                debug!(
                    from_seq_no,
                    msg_count,
                    available = frames.len(),
                    "replaying not-applied range"
                );
                let mut actions = Vec::with_capacity(frames.len());
                for (_, frame) in frames {
                    let mut copy = BytesMut::from(&frame[..]);
                    copy[POSS_RETRANS_OFFSET] = 1;
                    actions.push(Action::Send(copy));
                }
                self.mark_sent(now);
                actions
            }
        }
    }

    fn on_negotiate_response(&mut self, uuid: u64, now: Instant, now_ns: u64) -> Vec<Action> {
        if self.state != SessionState::SentNegotiate {
            return Vec::new();
        }
        if uuid != self.uuid.value() {
            return vec![self.invalid_uuid_error(uuid)];
        }
        self.transition(SessionState::Negotiated);
        self.transition(SessionState::SentEstablish);
        self.arm_handshake(HandshakePhase::Establish, now);
        match self.encode_establish(now_ns) {
            Ok(frame) => vec![Action::Send(frame)],
            Err(e) => self.handshake_encode_failure(e),
        }
    }

    fn on_establishment_ack(
        &mut self,
        ack: &EstablishmentAck,
        now: Instant,
        now_ns: u64,
    ) -> Vec<Action> {
        if !matches!(
            self.state,
            SessionState::SentEstablish | SessionState::Negotiated
        ) {
            return Vec::new();
        }
        self.handshake = None;

        let ack_next = u64::from(ack.next_seq_no);
        if ack_next < self.next_recv_seq {
            // Re-established with counters behind what this side already
            // accepted under the same uuid.
            warn!(
                uuid = %self.uuid,
                ack_next,
                expected = self.next_recv_seq,
                "low sequence on establishment ack"
            );
            let mut actions = vec![Action::HandshakeFailed(SessionError::LowSequence {
                expected: self.next_recv_seq,
                received: ack_next,
            })];
            actions.extend(self.start_terminate(
                "low sequence number",
                ERROR_CODE_LOW_SEQUENCE,
                now,
                now_ns,
            ));
            return actions;
        }

        self.keepalive = Some(KeepAliveTimers::new(
            now,
            self.config.keep_alive_interval,
            Duration::from_millis(u64::from(ack.keep_alive_interval_ms)),
        ));
        self.transition(SessionState::Established);
        info!(uuid = %self.uuid, next_seq = self.next_sent_seq, "session established");

        let mut actions = vec![Action::HandshakeComplete, Action::SequencesDirty];
        if ack_next > self.next_recv_seq {
            let count = ack_next - self.next_recv_seq;
            if let Some(range) = self.retransmit.on_gap(self.next_recv_seq, count) {
                actions.extend(self.send_retransmit_request(range, now, now_ns));
            }
            self.next_recv_seq = ack_next;
        }
        actions
    }

    fn on_handshake_reject(&mut self, error: SessionError) -> Vec<Action> {
        if self.state.is_post_handshake() {
            return Vec::new();
        }
        warn!(uuid = %self.uuid, %error, "handshake rejected");
        self.enter_disconnected();
        vec![Action::HandshakeFailed(error), Action::Disconnect]
    }

    fn on_sequence(&mut self, sequence: &Sequence, now: Instant, now_ns: u64) -> Vec<Action> {
        if !self.state.is_post_handshake() {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if sequence.keep_alive_lapsed == KeepAliveLapsed::Lapsed
            && self.state == SessionState::Established
        {
            // Must-reply warning: answer within the interval or be cut off.
            actions.push(self.send_sequence(KeepAliveLapsed::NotLapsed, now));
        }

        let peer_next = u64::from(sequence.next_seq_no);
        if peer_next > self.next_recv_seq {
            let count = peer_next - self.next_recv_seq;
            if let Some(range) = self.retransmit.on_gap(self.next_recv_seq, count) {
                actions.extend(self.send_retransmit_request(range, now, now_ns));
            }
            self.next_recv_seq = peer_next;
            actions.push(Action::SequencesDirty);
        } else if peer_next < self.next_recv_seq && self.state == SessionState::Established {
            actions.extend(self.start_terminate(
                "low sequence number",
                ERROR_CODE_LOW_SEQUENCE,
                now,
                now_ns,
            ));
        }
        actions
    }

    fn on_business(
        &mut self,
        template_id: u16,
        header: &BusinessHeader,
        body: &[u8],
        now: Instant,
        now_ns: u64,
    ) -> Vec<Action> {
        if self.state != SessionState::Established {
            return Vec::new();
        }

        let seq_num = u64::from(header.seq_num);
        let forward = Action::ForwardBusiness {
            template_id,
            data: Bytes::copy_from_slice(body),
            retransmitted: header.poss_retrans,
        };

        if header.poss_retrans {
            let mut actions = vec![forward];
            if let Some(range) = self.retransmit.on_fill() {
                actions.extend(self.send_retransmit_request(range, now, now_ns));
            }
            return actions;
        }

        if seq_num == self.next_recv_seq {
            self.next_recv_seq += 1;
            return vec![forward, Action::SequencesDirty];
        }

        if seq_num > self.next_recv_seq {
            let count = seq_num - self.next_recv_seq;
            let mut actions = Vec::new();
            if let Some(range) = self.retransmit.on_gap(self.next_recv_seq, count) {
                actions.extend(self.send_retransmit_request(range, now, now_ns));
            }
            self.next_recv_seq = seq_num + 1;
            actions.push(forward);
            actions.push(Action::SequencesDirty);
            return actions;
        }

        // Low sequence without the retransmit flag is unrecoverable.
        warn!(
            uuid = %self.uuid,
            seq_num,
            expected = self.next_recv_seq,
            "low sequence business message, terminating"
        );
        self.start_terminate("low sequence number", ERROR_CODE_LOW_SEQUENCE, now, now_ns)
    }

    fn on_not_applied(&mut self, not_applied: &NotApplied) -> Vec<Action> {
        if self.state != SessionState::Established {
            return Vec::new();
        }
        let from_seq_no = u64::from(not_applied.from_seq_no);
        let msg_count = u64::from(not_applied.msg_count);
        self.pending_not_applied = Some((from_seq_no, msg_count));
        vec![Action::NotAppliedReported {
            from_seq_no,
            msg_count,
        }]
    }

    fn on_terminate(&mut self, terminate: &Terminate<'_>, now: Instant, now_ns: u64) -> Vec<Action> {
        let mut actions = Vec::new();

        if self.state == SessionState::Terminating {
            // Peer confirmed our Terminate.
            self.enter_disconnected();
            return vec![Action::Unbound, Action::Disconnect];
        }
        if !self.state.is_post_handshake() {
            self.enter_disconnected();
            return vec![Action::Disconnect];
        }

        if terminate.uuid != self.uuid.value() {
            actions.push(self.invalid_uuid_error(terminate.uuid));
        }

        // Exchange-initiated teardown: reply, unbind, drop the channel.
        let reply = Terminate {
            reason: "terminate acknowledged",
            uuid: self.uuid.value(),
            request_timestamp: now_ns,
            error_codes: 0,
        };
        let mut frame = BytesMut::new();
        if reply.encode(&mut frame).is_ok() {
            actions.push(Action::Send(frame));
        }
        self.mark_sent(now);
        self.transition(SessionState::Unbound);
        self.enter_disconnected();
        actions.push(Action::Unbound);
        actions.push(Action::Disconnect);
        actions
    }

    fn on_handshake_timer(&mut self, now: Instant, now_ns: u64) -> Vec<Action> {
        let Some(handshake) = &mut self.handshake else {
            return Vec::new();
        };
        let phase = handshake.phase;
        if handshake.attempts < self.config.negotiate_resend_max {
            handshake.attempts += 1;
            handshake.deadline = now + self.config.keep_alive_interval;
            let attempts = handshake.attempts;
            debug!(?phase, attempts, "resending handshake message");
            let encoded = match phase {
                HandshakePhase::Negotiate => self.encode_negotiate(now_ns),
                HandshakePhase::Establish => self.encode_establish(now_ns),
            };
            return match encoded {
                Ok(frame) => vec![Action::Send(frame)],
                Err(e) => self.handshake_encode_failure(e),
            };
        }

        let attempts = handshake.attempts;
        warn!(?phase, attempts, "handshake unanswered, giving up");
        self.enter_disconnected();
        vec![
            Action::HandshakeFailed(SessionError::HandshakeTimedOut {
                phase: match phase {
                    HandshakePhase::Negotiate => "negotiate",
                    HandshakePhase::Establish => "establish",
                },
                attempts,
            }),
            Action::Disconnect,
        ]
    }

    fn start_terminate(
        &mut self,
        reason: &str,
        error_code: u16,
        now: Instant,
        now_ns: u64,
    ) -> Vec<Action> {
        let terminate = Terminate {
            reason,
            uuid: self.uuid.value(),
            request_timestamp: now_ns,
            error_codes: error_code,
        };
        let mut frame = BytesMut::new();
        let mut actions = Vec::new();
        if terminate.encode(&mut frame).is_ok() {
            actions.push(Action::Send(frame));
        }
        self.mark_sent(now);
        self.transition(SessionState::Terminating);
        self.terminate_deadline = Some(now + self.config.keep_alive_interval);
        actions
    }

    fn send_sequence(&mut self, lapsed: KeepAliveLapsed, now: Instant) -> Action {
        let sequence = Sequence {
            uuid: self.uuid.value(),
            next_seq_no: self.next_sent_seq as u32,
            keep_alive_lapsed: lapsed,
        };
        let mut frame = BytesMut::new();
        sequence.encode(&mut frame);
        self.mark_sent(now);
        Action::Send(frame)
    }

    fn send_retransmit_request(
        &mut self,
        range: RetransmitRange,
        now: Instant,
        now_ns: u64,
    ) -> Vec<Action> {
        debug!(
            uuid = %self.uuid,
            from = range.from_seq_no,
            count = range.count,
            "requesting retransmit"
        );
        let request = RetransmitRequest {
            uuid: self.uuid.value(),
            last_uuid: self.uuid.value(),
            request_timestamp: now_ns,
            from_seq_no: range.from_seq_no as u32,
            msg_count: range.count as u16,
        };
        let mut frame = BytesMut::new();
        request.encode(&mut frame);
        self.mark_sent(now);
        vec![Action::Send(frame)]
    }

    fn encode_negotiate(&self, now_ns: u64) -> Result<BytesMut, SessionError> {
        let signature = sign(&self.config.user_key, self.uuid.value(), now_ns);
        let negotiate = Negotiate {
            hmac_signature: &signature,
            access_key_id: &self.config.access_key_id,
            uuid: self.uuid.value(),
            request_timestamp: now_ns,
            session: &self.config.session_id,
            firm: &self.config.firm_id,
        };
        let mut frame = BytesMut::new();
        negotiate
            .encode(&mut frame)
            .map_err(|e| SessionError::Configuration(e.to_string()))?;
        Ok(frame)
    }

    fn encode_establish(&self, now_ns: u64) -> Result<BytesMut, SessionError> {
        let signature = sign(&self.config.user_key, self.uuid.value(), now_ns);
        let establish = Establish {
            hmac_signature: &signature,
            access_key_id: &self.config.access_key_id,
            uuid: self.uuid.value(),
            request_timestamp: now_ns,
            next_seq_no: self.next_sent_seq as u32,
            session: &self.config.session_id,
            firm: &self.config.firm_id,
            keep_alive_interval_ms: self.config.keep_alive_interval.as_millis() as u16,
        };
        let mut frame = BytesMut::new();
        establish
            .encode(&mut frame)
            .map_err(|e| SessionError::Configuration(e.to_string()))?;
        Ok(frame)
    }

    fn handshake_encode_failure(&mut self, error: SessionError) -> Vec<Action> {
        self.enter_disconnected();
        vec![Action::HandshakeFailed(error), Action::Disconnect]
    }

    fn invalid_uuid_error(&self, received: u64) -> Action {
        Action::Error {
            code: CONSUMER_CODE_PROTOCOL,
            description: SessionError::InvalidUuid {
                received,
                expected: self.uuid.value(),
            }
            .to_string(),
        }
    }

    fn mark_sent(&mut self, now: Instant) {
        if let Some(keepalive) = &mut self.keepalive {
            keepalive.on_message_sent(now);
        }
    }

    fn arm_handshake(&mut self, phase: HandshakePhase, now: Instant) {
        self.handshake = Some(HandshakeTimer {
            phase,
            deadline: now + self.config.keep_alive_interval,
            attempts: 1,
        });
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_become(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, uuid = %self.uuid, "session transition");
        self.state = next;
    }

    fn enter_disconnected(&mut self) {
        self.state = SessionState::Disconnected;
        self.prev_uuid = if self.uuid.is_null() { self.prev_uuid } else { self.uuid };
        self.uuid = ConnectionUuid::NULL;
        self.keepalive = None;
        self.handshake = None;
        self.terminate_deadline = None;
        self.pending_not_applied = None;
        self.retransmit.clear();
    }
}

/// Stand-in request signature; real credentials go through the exchange's
/// HMAC scheme, which lives with the credential management layer.
fn sign(user_key: &str, uuid: u64, now_ns: u64) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in user_key.as_bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash ^= uuid;
    hash = hash.wrapping_mul(0x100_0000_01b3);
    hash ^= now_ns;
    format!("{hash:016x}")
}
