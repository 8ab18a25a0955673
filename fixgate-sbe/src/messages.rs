/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! iLink3 session-layer templates.
//!
//! Each template is a plain struct with an `encode` that writes header plus
//! root block, and a `decode` that borrows string fields from the inbound
//! body. [`IlinkMessage::decode`] dispatches a complete frame into a tagged
//! variant; application templates surface as [`IlinkMessage::Business`].

use crate::business::{BusinessHeader, BUSINESS_HEADER_LEN};
use crate::header::{
    get_padded, get_u16, get_u32, get_u64, get_u8, put_padded, MessageHeader, HEADER_LEN,
};
use crate::template;
use bytes::{BufMut, BytesMut};
use fixgate_core::{DecodeError, EncodeError};

/// Wire width of the session id field.
pub const SESSION_LEN: usize = 3;
/// Wire width of the firm id field.
pub const FIRM_LEN: usize = 5;
/// Wire width of the access key id field.
pub const ACCESS_KEY_LEN: usize = 20;
/// Wire width of the HMAC signature field.
pub const SIGNATURE_LEN: usize = 32;
/// Wire width of reject and terminate reason fields.
pub const REASON_LEN: usize = 48;

/// Keepalive lapse indicator on a Sequence message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeepAliveLapsed {
    /// Ordinary heartbeat.
    NotLapsed = 0,
    /// Peer's receive interval lapsed; this is a must-reply warning.
    Lapsed = 1,
}

impl KeepAliveLapsed {
    /// Decodes the wire value.
    ///
    /// # Errors
    /// Returns [`DecodeError::Malformed`] for values other than 0 or 1.
    pub fn from_wire(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(Self::NotLapsed),
            1 => Ok(Self::Lapsed),
            _ => Err(DecodeError::malformed("bad KeepAliveLapsed value")),
        }
    }
}

/// Negotiate (template 500).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiate<'a> {
    /// HMAC of the negotiation payload under the user key.
    pub hmac_signature: &'a str,
    /// Exchange-issued access key id.
    pub access_key_id: &'a str,
    /// Connection uuid being negotiated.
    pub uuid: u64,
    /// Request timestamp in epoch nanoseconds.
    pub request_timestamp: u64,
    /// Session id string.
    pub session: &'a str,
    /// Firm id string.
    pub firm: &'a str,
}

impl<'a> Negotiate<'a> {
    /// Root block length.
    pub const BLOCK_LENGTH: u16 = 76;

    /// Encodes header and root block.
    ///
    /// # Errors
    /// Returns [`EncodeError`] when a string exceeds its wire width.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        MessageHeader::for_template(template::NEGOTIATE, Self::BLOCK_LENGTH).encode(dst);
        put_padded(dst, "hmac_signature", self.hmac_signature, SIGNATURE_LEN)?;
        put_padded(dst, "access_key_id", self.access_key_id, ACCESS_KEY_LEN)?;
        dst.put_u64_le(self.uuid);
        dst.put_u64_le(self.request_timestamp);
        put_padded(dst, "session", self.session, SESSION_LEN)?;
        put_padded(dst, "firm", self.firm, FIRM_LEN)?;
        Ok(())
    }

    /// Decodes the root block.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on truncation or invalid UTF-8.
    pub fn decode(body: &'a [u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            hmac_signature: get_padded(body, 0, SIGNATURE_LEN)?,
            access_key_id: get_padded(body, 32, ACCESS_KEY_LEN)?,
            uuid: get_u64(body, 52)?,
            request_timestamp: get_u64(body, 60)?,
            session: get_padded(body, 68, SESSION_LEN)?,
            firm: get_padded(body, 71, FIRM_LEN)?,
        })
    }
}

/// NegotiateResponse (template 501).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiateResponse {
    /// Connection uuid echoed from the Negotiate.
    pub uuid: u64,
    /// Request timestamp echoed from the Negotiate.
    pub request_timestamp: u64,
    /// Exchange's last outbound sequence under the previous uuid.
    pub previous_seq_no: u32,
    /// Previous connection uuid, zero at beginning of week.
    pub previous_uuid: u64,
}

impl NegotiateResponse {
    /// Root block length.
    pub const BLOCK_LENGTH: u16 = 28;

    /// Encodes header and root block.
    pub fn encode(&self, dst: &mut BytesMut) {
        MessageHeader::for_template(template::NEGOTIATE_RESPONSE, Self::BLOCK_LENGTH).encode(dst);
        dst.put_u64_le(self.uuid);
        dst.put_u64_le(self.request_timestamp);
        dst.put_u32_le(self.previous_seq_no);
        dst.put_u64_le(self.previous_uuid);
    }

    /// Decodes the root block.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on truncation.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            uuid: get_u64(body, 0)?,
            request_timestamp: get_u64(body, 8)?,
            previous_seq_no: get_u32(body, 16)?,
            previous_uuid: get_u64(body, 20)?,
        })
    }
}

/// NegotiateReject (template 502).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiateReject<'a> {
    /// Reject reason text.
    pub reason: &'a str,
    /// Connection uuid echoed from the Negotiate.
    pub uuid: u64,
    /// Request timestamp echoed from the Negotiate.
    pub request_timestamp: u64,
    /// Exchange error code.
    pub error_codes: u16,
}

impl<'a> NegotiateReject<'a> {
    /// Root block length.
    pub const BLOCK_LENGTH: u16 = 66;

    /// Encodes header and root block.
    ///
    /// # Errors
    /// Returns [`EncodeError`] when the reason exceeds its wire width.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        MessageHeader::for_template(template::NEGOTIATE_REJECT, Self::BLOCK_LENGTH).encode(dst);
        put_padded(dst, "reason", self.reason, REASON_LEN)?;
        dst.put_u64_le(self.uuid);
        dst.put_u64_le(self.request_timestamp);
        dst.put_u16_le(self.error_codes);
        Ok(())
    }

    /// Decodes the root block.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on truncation or invalid UTF-8.
    pub fn decode(body: &'a [u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            reason: get_padded(body, 0, REASON_LEN)?,
            uuid: get_u64(body, 48)?,
            request_timestamp: get_u64(body, 56)?,
            error_codes: get_u16(body, 64)?,
        })
    }
}

/// Establish (template 503).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Establish<'a> {
    /// HMAC of the establishment payload under the user key.
    pub hmac_signature: &'a str,
    /// Exchange-issued access key id.
    pub access_key_id: &'a str,
    /// Connection uuid.
    pub uuid: u64,
    /// Request timestamp in epoch nanoseconds.
    pub request_timestamp: u64,
    /// Next sequence number the customer will send.
    pub next_seq_no: u32,
    /// Session id string.
    pub session: &'a str,
    /// Firm id string.
    pub firm: &'a str,
    /// Keepalive interval in milliseconds.
    pub keep_alive_interval_ms: u16,
}

impl<'a> Establish<'a> {
    /// Root block length.
    pub const BLOCK_LENGTH: u16 = 82;

    /// Encodes header and root block.
    ///
    /// # Errors
    /// Returns [`EncodeError`] when a string exceeds its wire width.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        MessageHeader::for_template(template::ESTABLISH, Self::BLOCK_LENGTH).encode(dst);
        put_padded(dst, "hmac_signature", self.hmac_signature, SIGNATURE_LEN)?;
        put_padded(dst, "access_key_id", self.access_key_id, ACCESS_KEY_LEN)?;
        dst.put_u64_le(self.uuid);
        dst.put_u64_le(self.request_timestamp);
        dst.put_u32_le(self.next_seq_no);
        put_padded(dst, "session", self.session, SESSION_LEN)?;
        put_padded(dst, "firm", self.firm, FIRM_LEN)?;
        dst.put_u16_le(self.keep_alive_interval_ms);
        Ok(())
    }

    /// Decodes the root block.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on truncation or invalid UTF-8.
    pub fn decode(body: &'a [u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            hmac_signature: get_padded(body, 0, SIGNATURE_LEN)?,
            access_key_id: get_padded(body, 32, ACCESS_KEY_LEN)?,
            uuid: get_u64(body, 52)?,
            request_timestamp: get_u64(body, 60)?,
            next_seq_no: get_u32(body, 68)?,
            session: get_padded(body, 72, SESSION_LEN)?,
            firm: get_padded(body, 75, FIRM_LEN)?,
            keep_alive_interval_ms: get_u16(body, 80)?,
        })
    }
}

/// EstablishmentAck (template 504).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstablishmentAck {
    /// Connection uuid echoed from the Establish.
    pub uuid: u64,
    /// Request timestamp echoed from the Establish.
    pub request_timestamp: u64,
    /// Next sequence number the exchange will send.
    pub next_seq_no: u32,
    /// Exchange's last outbound sequence under the previous uuid.
    pub previous_seq_no: u32,
    /// Previous connection uuid, zero at beginning of week.
    pub previous_uuid: u64,
    /// Negotiated keepalive interval in milliseconds.
    pub keep_alive_interval_ms: u16,
}

impl EstablishmentAck {
    /// Root block length.
    pub const BLOCK_LENGTH: u16 = 34;

    /// Encodes header and root block.
    pub fn encode(&self, dst: &mut BytesMut) {
        MessageHeader::for_template(template::ESTABLISHMENT_ACK, Self::BLOCK_LENGTH).encode(dst);
        dst.put_u64_le(self.uuid);
        dst.put_u64_le(self.request_timestamp);
        dst.put_u32_le(self.next_seq_no);
        dst.put_u32_le(self.previous_seq_no);
        dst.put_u64_le(self.previous_uuid);
        dst.put_u16_le(self.keep_alive_interval_ms);
    }

    /// Decodes the root block.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on truncation.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            uuid: get_u64(body, 0)?,
            request_timestamp: get_u64(body, 8)?,
            next_seq_no: get_u32(body, 16)?,
            previous_seq_no: get_u32(body, 20)?,
            previous_uuid: get_u64(body, 24)?,
            keep_alive_interval_ms: get_u16(body, 32)?,
        })
    }
}

/// EstablishmentReject (template 505).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstablishmentReject<'a> {
    /// Reject reason text.
    pub reason: &'a str,
    /// Connection uuid echoed from the Establish.
    pub uuid: u64,
    /// Request timestamp echoed from the Establish.
    pub request_timestamp: u64,
    /// Next sequence number the exchange expected.
    pub next_seq_no: u32,
    /// Exchange error code.
    pub error_codes: u16,
}

impl<'a> EstablishmentReject<'a> {
    /// Root block length.
    pub const BLOCK_LENGTH: u16 = 70;

    /// Encodes header and root block.
    ///
    /// # Errors
    /// Returns [`EncodeError`] when the reason exceeds its wire width.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        MessageHeader::for_template(template::ESTABLISHMENT_REJECT, Self::BLOCK_LENGTH).encode(dst);
        put_padded(dst, "reason", self.reason, REASON_LEN)?;
        dst.put_u64_le(self.uuid);
        dst.put_u64_le(self.request_timestamp);
        dst.put_u32_le(self.next_seq_no);
        dst.put_u16_le(self.error_codes);
        Ok(())
    }

    /// Decodes the root block.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on truncation or invalid UTF-8.
    pub fn decode(body: &'a [u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            reason: get_padded(body, 0, REASON_LEN)?,
            uuid: get_u64(body, 48)?,
            request_timestamp: get_u64(body, 56)?,
            next_seq_no: get_u32(body, 64)?,
            error_codes: get_u16(body, 68)?,
        })
    }
}

/// Sequence keepalive (template 506).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequence {
    /// Connection uuid.
    pub uuid: u64,
    /// Sender's next outbound sequence number.
    pub next_seq_no: u32,
    /// Whether the sender's receive interval has lapsed.
    pub keep_alive_lapsed: KeepAliveLapsed,
}

impl Sequence {
    /// Root block length.
    pub const BLOCK_LENGTH: u16 = 13;

    /// Encodes header and root block.
    pub fn encode(&self, dst: &mut BytesMut) {
        MessageHeader::for_template(template::SEQUENCE, Self::BLOCK_LENGTH).encode(dst);
        dst.put_u64_le(self.uuid);
        dst.put_u32_le(self.next_seq_no);
        dst.put_u8(self.keep_alive_lapsed as u8);
    }

    /// Decodes the root block.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on truncation or a bad lapse indicator.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            uuid: get_u64(body, 0)?,
            next_seq_no: get_u32(body, 8)?,
            keep_alive_lapsed: KeepAliveLapsed::from_wire(get_u8(body, 12)?)?,
        })
    }
}

/// Terminate (template 507).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminate<'a> {
    /// Termination reason text.
    pub reason: &'a str,
    /// Connection uuid being terminated.
    pub uuid: u64,
    /// Request timestamp in epoch nanoseconds.
    pub request_timestamp: u64,
    /// Error code, zero for a graceful termination.
    pub error_codes: u16,
}

impl<'a> Terminate<'a> {
    /// Root block length.
    pub const BLOCK_LENGTH: u16 = 66;

    /// Encodes header and root block.
    ///
    /// # Errors
    /// Returns [`EncodeError`] when the reason exceeds its wire width.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        MessageHeader::for_template(template::TERMINATE, Self::BLOCK_LENGTH).encode(dst);
        put_padded(dst, "reason", self.reason, REASON_LEN)?;
        dst.put_u64_le(self.uuid);
        dst.put_u64_le(self.request_timestamp);
        dst.put_u16_le(self.error_codes);
        Ok(())
    }

    /// Decodes the root block.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on truncation or invalid UTF-8.
    pub fn decode(body: &'a [u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            reason: get_padded(body, 0, REASON_LEN)?,
            uuid: get_u64(body, 48)?,
            request_timestamp: get_u64(body, 56)?,
            error_codes: get_u16(body, 64)?,
        })
    }
}

/// RetransmitRequest (template 508).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitRequest {
    /// Connection uuid.
    pub uuid: u64,
    /// Uuid the requested range was sent under.
    pub last_uuid: u64,
    /// Request timestamp in epoch nanoseconds.
    pub request_timestamp: u64,
    /// First sequence number requested.
    pub from_seq_no: u32,
    /// Number of messages requested.
    pub msg_count: u16,
}

impl RetransmitRequest {
    /// Root block length.
    pub const BLOCK_LENGTH: u16 = 30;

    /// Encodes header and root block.
    pub fn encode(&self, dst: &mut BytesMut) {
        MessageHeader::for_template(template::RETRANSMIT_REQUEST, Self::BLOCK_LENGTH).encode(dst);
        dst.put_u64_le(self.uuid);
        dst.put_u64_le(self.last_uuid);
        dst.put_u64_le(self.request_timestamp);
        dst.put_u32_le(self.from_seq_no);
        dst.put_u16_le(self.msg_count);
    }

    /// Decodes the root block.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on truncation.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            uuid: get_u64(body, 0)?,
            last_uuid: get_u64(body, 8)?,
            request_timestamp: get_u64(body, 16)?,
            from_seq_no: get_u32(body, 24)?,
            msg_count: get_u16(body, 28)?,
        })
    }
}

/// Retransmission acceptance marker (template 509). Same layout as 508.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retransmission {
    /// Connection uuid.
    pub uuid: u64,
    /// Uuid the granted range was sent under.
    pub last_uuid: u64,
    /// Request timestamp echoed from the request.
    pub request_timestamp: u64,
    /// First sequence number granted.
    pub from_seq_no: u32,
    /// Number of messages granted.
    pub msg_count: u16,
}

impl Retransmission {
    /// Root block length.
    pub const BLOCK_LENGTH: u16 = 30;

    /// Encodes header and root block.
    pub fn encode(&self, dst: &mut BytesMut) {
        MessageHeader::for_template(template::RETRANSMISSION, Self::BLOCK_LENGTH).encode(dst);
        dst.put_u64_le(self.uuid);
        dst.put_u64_le(self.last_uuid);
        dst.put_u64_le(self.request_timestamp);
        dst.put_u32_le(self.from_seq_no);
        dst.put_u16_le(self.msg_count);
    }

    /// Decodes the root block.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on truncation.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            uuid: get_u64(body, 0)?,
            last_uuid: get_u64(body, 8)?,
            request_timestamp: get_u64(body, 16)?,
            from_seq_no: get_u32(body, 24)?,
            msg_count: get_u16(body, 28)?,
        })
    }
}

/// RetransmitReject (template 510).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitReject<'a> {
    /// Reject reason text.
    pub reason: &'a str,
    /// Connection uuid.
    pub uuid: u64,
    /// Uuid of the rejected request.
    pub last_uuid: u64,
    /// Request timestamp echoed from the request.
    pub request_timestamp: u64,
    /// Exchange error code.
    pub error_codes: u16,
}

impl<'a> RetransmitReject<'a> {
    /// Root block length.
    pub const BLOCK_LENGTH: u16 = 74;

    /// Encodes header and root block.
    ///
    /// # Errors
    /// Returns [`EncodeError`] when the reason exceeds its wire width.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        MessageHeader::for_template(template::RETRANSMIT_REJECT, Self::BLOCK_LENGTH).encode(dst);
        put_padded(dst, "reason", self.reason, REASON_LEN)?;
        dst.put_u64_le(self.uuid);
        dst.put_u64_le(self.last_uuid);
        dst.put_u64_le(self.request_timestamp);
        dst.put_u16_le(self.error_codes);
        Ok(())
    }

    /// Decodes the root block.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on truncation or invalid UTF-8.
    pub fn decode(body: &'a [u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            reason: get_padded(body, 0, REASON_LEN)?,
            uuid: get_u64(body, 48)?,
            last_uuid: get_u64(body, 56)?,
            request_timestamp: get_u64(body, 64)?,
            error_codes: get_u16(body, 72)?,
        })
    }
}

/// NotApplied (template 513).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotApplied {
    /// Connection uuid.
    pub uuid: u64,
    /// First customer sequence number not applied.
    pub from_seq_no: u32,
    /// Number of messages not applied.
    pub msg_count: u32,
}

impl NotApplied {
    /// Root block length.
    pub const BLOCK_LENGTH: u16 = 16;

    /// Encodes header and root block.
    pub fn encode(&self, dst: &mut BytesMut) {
        MessageHeader::for_template(template::NOT_APPLIED, Self::BLOCK_LENGTH).encode(dst);
        dst.put_u64_le(self.uuid);
        dst.put_u32_le(self.from_seq_no);
        dst.put_u32_le(self.msg_count);
    }

    /// Decodes the root block.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on truncation.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            uuid: get_u64(body, 0)?,
            from_seq_no: get_u32(body, 8)?,
            msg_count: get_u32(body, 12)?,
        })
    }
}

/// A decoded iLink3 frame, dispatched by template id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IlinkMessage<'a> {
    /// Template 500.
    Negotiate(Negotiate<'a>),
    /// Template 501.
    NegotiateResponse(NegotiateResponse),
    /// Template 502.
    NegotiateReject(NegotiateReject<'a>),
    /// Template 503.
    Establish(Establish<'a>),
    /// Template 504.
    EstablishmentAck(EstablishmentAck),
    /// Template 505.
    EstablishmentReject(EstablishmentReject<'a>),
    /// Template 506.
    Sequence(Sequence),
    /// Template 507.
    Terminate(Terminate<'a>),
    /// Template 508.
    RetransmitRequest(RetransmitRequest),
    /// Template 509.
    Retransmission(Retransmission),
    /// Template 510.
    RetransmitReject(RetransmitReject<'a>),
    /// Template 513.
    NotApplied(NotApplied),
    /// Any application template, session-tracked via its business prefix.
    Business {
        /// Template id of the message.
        template_id: u16,
        /// The common business prefix.
        header: BusinessHeader,
        /// Complete root block, prefix included.
        body: &'a [u8],
    },
}

impl<'a> IlinkMessage<'a> {
    /// Decodes one complete frame.
    ///
    /// # Errors
    /// - [`DecodeError::Malformed`] on truncation within a known template
    /// - [`DecodeError::UnknownTemplate`] for a non-session template too
    ///   short to carry the business prefix
    pub fn decode(frame: &'a [u8]) -> Result<Self, DecodeError> {
        let header = MessageHeader::decode(frame)?;
        let body = frame
            .get(HEADER_LEN..HEADER_LEN + header.block_length as usize)
            .ok_or_else(|| DecodeError::malformed("frame shorter than block length"))?;

        Ok(match header.template_id {
            template::NEGOTIATE => Self::Negotiate(Negotiate::decode(body)?),
            template::NEGOTIATE_RESPONSE => {
                Self::NegotiateResponse(NegotiateResponse::decode(body)?)
            }
            template::NEGOTIATE_REJECT => Self::NegotiateReject(NegotiateReject::decode(body)?),
            template::ESTABLISH => Self::Establish(Establish::decode(body)?),
            template::ESTABLISHMENT_ACK => Self::EstablishmentAck(EstablishmentAck::decode(body)?),
            template::ESTABLISHMENT_REJECT => {
                Self::EstablishmentReject(EstablishmentReject::decode(body)?)
            }
            template::SEQUENCE => Self::Sequence(Sequence::decode(body)?),
            template::TERMINATE => Self::Terminate(Terminate::decode(body)?),
            template::RETRANSMIT_REQUEST => {
                Self::RetransmitRequest(RetransmitRequest::decode(body)?)
            }
            template::RETRANSMISSION => Self::Retransmission(Retransmission::decode(body)?),
            template::RETRANSMIT_REJECT => Self::RetransmitReject(RetransmitReject::decode(body)?),
            template::NOT_APPLIED => Self::NotApplied(NotApplied::decode(body)?),
            other => {
                if body.len() < BUSINESS_HEADER_LEN {
                    return Err(DecodeError::UnknownTemplate {
                        template_id: other,
                    });
                }
                Self::Business {
                    template_id: other,
                    header: BusinessHeader::decode(body)?,
                    body,
                }
            }
        })
    }

    /// Returns the template id of this message.
    #[must_use]
    pub fn template_id(&self) -> u16 {
        match self {
            Self::Negotiate(_) => template::NEGOTIATE,
            Self::NegotiateResponse(_) => template::NEGOTIATE_RESPONSE,
            Self::NegotiateReject(_) => template::NEGOTIATE_REJECT,
            Self::Establish(_) => template::ESTABLISH,
            Self::EstablishmentAck(_) => template::ESTABLISHMENT_ACK,
            Self::EstablishmentReject(_) => template::ESTABLISHMENT_REJECT,
            Self::Sequence(_) => template::SEQUENCE,
            Self::Terminate(_) => template::TERMINATE,
            Self::RetransmitRequest(_) => template::RETRANSMIT_REQUEST,
            Self::Retransmission(_) => template::RETRANSMISSION,
            Self::RetransmitReject(_) => template::RETRANSMIT_REJECT,
            Self::NotApplied(_) => template::NOT_APPLIED,
            Self::Business { template_id, .. } => *template_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ilink_frame_length;

    #[test]
    fn test_negotiate_round() {
        let msg = Negotiate {
            hmac_signature: "sig",
            access_key_id: "12345678901234567890",
            uuid: 42,
            request_timestamp: 1_000,
            session: "ABC",
            firm: "DEFGH",
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf).unwrap();

        assert_eq!(
            ilink_frame_length(&buf, 4096).unwrap(),
            Some(HEADER_LEN + Negotiate::BLOCK_LENGTH as usize)
        );
        assert_eq!(IlinkMessage::decode(&buf).unwrap(), IlinkMessage::Negotiate(msg));
    }

    #[test]
    fn test_establish_round() {
        let msg = Establish {
            hmac_signature: "sig",
            access_key_id: "key",
            uuid: 7,
            request_timestamp: 2_000,
            next_seq_no: 3,
            session: "ABC",
            firm: "DEFGH",
            keep_alive_interval_ms: 500,
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf).unwrap();
        assert_eq!(IlinkMessage::decode(&buf).unwrap(), IlinkMessage::Establish(msg));
    }

    #[test]
    fn test_establishment_ack_round() {
        let msg = EstablishmentAck {
            uuid: 7,
            request_timestamp: 2_000,
            next_seq_no: 1,
            previous_seq_no: 0,
            previous_uuid: 0,
            keep_alive_interval_ms: 500,
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        assert_eq!(
            IlinkMessage::decode(&buf).unwrap(),
            IlinkMessage::EstablishmentAck(msg)
        );
    }

    #[test]
    fn test_sequence_round() {
        for lapse in [KeepAliveLapsed::NotLapsed, KeepAliveLapsed::Lapsed] {
            let msg = Sequence {
                uuid: 9,
                next_seq_no: 12,
                keep_alive_lapsed: lapse,
            };
            let mut buf = BytesMut::new();
            msg.encode(&mut buf);
            assert_eq!(IlinkMessage::decode(&buf).unwrap(), IlinkMessage::Sequence(msg));
        }
    }

    #[test]
    fn test_terminate_round() {
        let msg = Terminate {
            reason: "shutdown",
            uuid: 9,
            request_timestamp: 5,
            error_codes: 0,
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf).unwrap();
        assert_eq!(IlinkMessage::decode(&buf).unwrap(), IlinkMessage::Terminate(msg));
    }

    #[test]
    fn test_retransmit_request_round() {
        let msg = RetransmitRequest {
            uuid: 9,
            last_uuid: 9,
            request_timestamp: 5,
            from_seq_no: 1,
            msg_count: 2500,
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        assert_eq!(
            IlinkMessage::decode(&buf).unwrap(),
            IlinkMessage::RetransmitRequest(msg)
        );
    }

    #[test]
    fn test_not_applied_round() {
        let msg = NotApplied {
            uuid: 9,
            from_seq_no: 1,
            msg_count: 2,
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        assert_eq!(IlinkMessage::decode(&buf).unwrap(), IlinkMessage::NotApplied(msg));
    }

    #[test]
    fn test_reason_too_long_rejected() {
        let msg = Terminate {
            reason: &"x".repeat(REASON_LEN + 1),
            uuid: 1,
            request_timestamp: 0,
            error_codes: 0,
        };
        let mut buf = BytesMut::new();
        assert!(msg.encode(&mut buf).is_err());
    }

    #[test]
    fn test_truncated_block_rejected() {
        let msg = Sequence {
            uuid: 9,
            next_seq_no: 12,
            keep_alive_lapsed: KeepAliveLapsed::NotLapsed,
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        assert!(IlinkMessage::decode(&buf[..buf.len() - 1]).is_err());
    }

    #[test]
    fn test_unknown_short_template() {
        let mut buf = BytesMut::new();
        MessageHeader::for_template(600, 4).encode(&mut buf);
        buf.put_u32_le(0);
        assert!(matches!(
            IlinkMessage::decode(&buf),
            Err(DecodeError::UnknownTemplate { template_id: 600 })
        ));
    }
}
