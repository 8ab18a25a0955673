/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Typed FIX session-layer messages.
//!
//! Inbound frames classify into a [`SessionMessage`] variant; outbound
//! session messages are produced through [`FixHeader`], which stamps the
//! standard header fields (MsgType, comp ids, MsgSeqNum, SendingTime) on
//! every message.

use crate::decoder::FixMessage;
use crate::encoder::{format_sending_time, MessageBuilder};
use crate::tags;
use bytes::BytesMut;
use fixgate_core::{CompId, DecodeError, Timestamp};

/// Session-layer MsgType values.
pub mod msg_type {
    /// Heartbeat.
    pub const HEARTBEAT: &[u8] = b"0";
    /// TestRequest.
    pub const TEST_REQUEST: &[u8] = b"1";
    /// ResendRequest.
    pub const RESEND_REQUEST: &[u8] = b"2";
    /// Reject.
    pub const REJECT: &[u8] = b"3";
    /// SequenceReset.
    pub const SEQUENCE_RESET: &[u8] = b"4";
    /// Logout.
    pub const LOGOUT: &[u8] = b"5";
    /// Logon.
    pub const LOGON: &[u8] = b"A";
}

/// A classified inbound session-layer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMessage<'a> {
    /// Logon (35=A).
    Logon {
        /// HeartBtInt in seconds (tag 108).
        heart_bt_int: u64,
        /// ResetSeqNumFlag (tag 141).
        reset_seq_num: bool,
    },
    /// Logout (35=5).
    Logout {
        /// Optional Text (tag 58).
        text: Option<&'a [u8]>,
    },
    /// Heartbeat (35=0).
    Heartbeat {
        /// TestReqID being answered, if any (tag 112).
        test_req_id: Option<&'a [u8]>,
    },
    /// TestRequest (35=1).
    TestRequest {
        /// TestReqID to echo (tag 112).
        test_req_id: &'a [u8],
    },
    /// ResendRequest (35=2).
    ResendRequest {
        /// BeginSeqNo (tag 7).
        begin_seq_no: u64,
        /// EndSeqNo (tag 16); 0 means infinity.
        end_seq_no: u64,
    },
    /// SequenceReset (35=4).
    SequenceReset {
        /// NewSeqNo (tag 36).
        new_seq_no: u64,
        /// GapFillFlag (tag 123).
        gap_fill: bool,
    },
    /// Reject (35=3).
    Reject {
        /// RefSeqNum (tag 45).
        ref_seq_num: u64,
    },
    /// Any non-session message, passed through to the library.
    Application {
        /// The MsgType value.
        msg_type: &'a [u8],
    },
}

impl<'a> SessionMessage<'a> {
    /// Classifies a parsed frame into a session-layer variant.
    ///
    /// # Errors
    /// Returns [`DecodeError::Malformed`] when a session message is missing
    /// a required field.
    pub fn classify(msg: &FixMessage<'a>) -> Result<Self, DecodeError> {
        Ok(match msg.msg_type() {
            t if t == msg_type::LOGON => Self::Logon {
                heart_bt_int: msg
                    .get_int(tags::HEART_BT_INT)
                    .ok_or_else(|| DecodeError::malformed("Logon missing HeartBtInt"))?,
                reset_seq_num: msg.get_bool(tags::RESET_SEQ_NUM_FLAG).unwrap_or(false),
            },
            t if t == msg_type::LOGOUT => Self::Logout {
                text: msg.get(tags::TEXT),
            },
            t if t == msg_type::HEARTBEAT => Self::Heartbeat {
                test_req_id: msg.get(tags::TEST_REQ_ID),
            },
            t if t == msg_type::TEST_REQUEST => Self::TestRequest {
                test_req_id: msg
                    .get(tags::TEST_REQ_ID)
                    .ok_or_else(|| DecodeError::malformed("TestRequest missing TestReqID"))?,
            },
            t if t == msg_type::RESEND_REQUEST => Self::ResendRequest {
                begin_seq_no: msg
                    .get_int(tags::BEGIN_SEQ_NO)
                    .ok_or_else(|| DecodeError::malformed("ResendRequest missing BeginSeqNo"))?,
                end_seq_no: msg
                    .get_int(tags::END_SEQ_NO)
                    .ok_or_else(|| DecodeError::malformed("ResendRequest missing EndSeqNo"))?,
            },
            t if t == msg_type::SEQUENCE_RESET => Self::SequenceReset {
                new_seq_no: msg
                    .get_int(tags::NEW_SEQ_NO)
                    .ok_or_else(|| DecodeError::malformed("SequenceReset missing NewSeqNo"))?,
                gap_fill: msg.get_bool(tags::GAP_FILL_FLAG).unwrap_or(false),
            },
            t if t == msg_type::REJECT => Self::Reject {
                ref_seq_num: msg.get_int(tags::REF_SEQ_NUM).unwrap_or(0),
            },
            other => Self::Application { msg_type: other },
        })
    }
}

/// Standard-header stamp for outbound messages of one session.
#[derive(Debug, Clone)]
pub struct FixHeader {
    /// BeginString for the session's FIX version.
    pub begin_string: &'static str,
    /// Local comp id (tag 49).
    pub sender_comp_id: CompId,
    /// Remote comp id (tag 56).
    pub target_comp_id: CompId,
}

impl FixHeader {
    /// Creates a header stamp.
    #[must_use]
    pub fn new(begin_string: &'static str, sender: CompId, target: CompId) -> Self {
        Self {
            begin_string,
            sender_comp_id: sender,
            target_comp_id: target,
        }
    }

    /// Starts a message with the standard header fields filled in.
    fn start(&self, msg_type: &[u8], seq_num: u64, now: Timestamp) -> MessageBuilder {
        let mut builder = MessageBuilder::new(self.begin_string);
        builder
            .field_bytes(tags::MSG_TYPE, msg_type)
            .field_str(tags::SENDER_COMP_ID, self.sender_comp_id.as_str())
            .field_str(tags::TARGET_COMP_ID, self.target_comp_id.as_str())
            .field_uint(tags::MSG_SEQ_NUM, seq_num)
            .field_str(tags::SENDING_TIME, format_sending_time(now).as_str());
        builder
    }

    /// Encodes a Logon.
    #[must_use]
    pub fn logon(
        &self,
        seq_num: u64,
        now: Timestamp,
        heart_bt_int_secs: u64,
        reset_seq_num: bool,
        credentials: Option<(&str, &str)>,
    ) -> BytesMut {
        let mut builder = self.start(msg_type::LOGON, seq_num, now);
        builder
            .field_uint(tags::ENCRYPT_METHOD, 0)
            .field_uint(tags::HEART_BT_INT, heart_bt_int_secs);
        if reset_seq_num {
            builder.field_bool(tags::RESET_SEQ_NUM_FLAG, true);
        }
        if let Some((username, password)) = credentials {
            builder
                .field_str(tags::USERNAME, username)
                .field_str(tags::PASSWORD, password);
        }
        builder.finish()
    }

    /// Encodes a Logout.
    #[must_use]
    pub fn logout(&self, seq_num: u64, now: Timestamp, text: Option<&str>) -> BytesMut {
        let mut builder = self.start(msg_type::LOGOUT, seq_num, now);
        if let Some(text) = text {
            builder.field_str(tags::TEXT, text);
        }
        builder.finish()
    }

    /// Encodes a Heartbeat, echoing a TestReqID when answering a TestRequest.
    #[must_use]
    pub fn heartbeat(&self, seq_num: u64, now: Timestamp, test_req_id: Option<&[u8]>) -> BytesMut {
        let mut builder = self.start(msg_type::HEARTBEAT, seq_num, now);
        if let Some(id) = test_req_id {
            builder.field_bytes(tags::TEST_REQ_ID, id);
        }
        builder.finish()
    }

    /// Encodes a TestRequest.
    #[must_use]
    pub fn test_request(&self, seq_num: u64, now: Timestamp, test_req_id: &str) -> BytesMut {
        let mut builder = self.start(msg_type::TEST_REQUEST, seq_num, now);
        builder.field_str(tags::TEST_REQ_ID, test_req_id);
        builder.finish()
    }

    /// Encodes a ResendRequest for `[begin_seq_no, end_seq_no]`.
    #[must_use]
    pub fn resend_request(
        &self,
        seq_num: u64,
        now: Timestamp,
        begin_seq_no: u64,
        end_seq_no: u64,
    ) -> BytesMut {
        let mut builder = self.start(msg_type::RESEND_REQUEST, seq_num, now);
        builder
            .field_uint(tags::BEGIN_SEQ_NO, begin_seq_no)
            .field_uint(tags::END_SEQ_NO, end_seq_no);
        builder.finish()
    }

    /// Encodes a gap-fill SequenceReset carrying PossDupFlag.
    #[must_use]
    pub fn sequence_reset(&self, seq_num: u64, now: Timestamp, new_seq_no: u64) -> BytesMut {
        let mut builder = self.start(msg_type::SEQUENCE_RESET, seq_num, now);
        builder
            .field_bool(tags::POSS_DUP_FLAG, true)
            .field_uint(tags::NEW_SEQ_NO, new_seq_no)
            .field_bool(tags::GAP_FILL_FLAG, true);
        builder.finish()
    }

    /// Encodes an application message with the standard header plus the
    /// given body fields.
    #[must_use]
    pub fn app_message(
        &self,
        msg_type: &str,
        seq_num: u64,
        now: Timestamp,
        fields: &[(u32, String)],
    ) -> BytesMut {
        let mut builder = self.start(msg_type.as_bytes(), seq_num, now);
        for (tag, value) in fields {
            builder.field_str(*tag, value);
        }
        builder.finish()
    }

    /// Encodes a session-level Reject.
    #[must_use]
    pub fn reject(&self, seq_num: u64, now: Timestamp, ref_seq_num: u64, text: &str) -> BytesMut {
        let mut builder = self.start(msg_type::REJECT, seq_num, now);
        builder
            .field_uint(tags::REF_SEQ_NUM, ref_seq_num)
            .field_str(tags::TEXT, text);
        builder.finish()
    }
}
