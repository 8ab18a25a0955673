/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # fixgate-sbe
//!
//! Little-endian SBE codec for the iLink3 binary session protocol.
//!
//! Every message starts with an 8-byte header (block length, template id,
//! schema id, version); session-layer templates use the 500-series ids.
//! Application templates share a 13-byte business prefix (uuid, sequence
//! number, retransmit flag) so the session layer can track sequencing for
//! template ids it does not otherwise understand.
//!
//! Decoded messages are zero-copy views over the inbound buffer and must not
//! be retained past a single dispatch.

pub mod business;
pub mod header;
pub mod messages;

pub use business::{
    BusinessHeader, ExecutionReportStatus, NewOrderSingle, Side, BUSINESS_HEADER_LEN,
};
pub use header::{ilink_frame_length, MessageHeader, HEADER_LEN, SCHEMA_ID, SCHEMA_VERSION};
pub use messages::{
    Establish, EstablishmentAck, EstablishmentReject, IlinkMessage, KeepAliveLapsed, Negotiate,
    NegotiateReject, NegotiateResponse, NotApplied, Retransmission, RetransmitReject,
    RetransmitRequest, Sequence, Terminate,
};

/// Session-layer and application template ids.
pub mod template {
    /// Negotiate.
    pub const NEGOTIATE: u16 = 500;
    /// NegotiateResponse.
    pub const NEGOTIATE_RESPONSE: u16 = 501;
    /// NegotiateReject.
    pub const NEGOTIATE_REJECT: u16 = 502;
    /// Establish.
    pub const ESTABLISH: u16 = 503;
    /// EstablishmentAck.
    pub const ESTABLISHMENT_ACK: u16 = 504;
    /// EstablishmentReject.
    pub const ESTABLISHMENT_REJECT: u16 = 505;
    /// Sequence keepalive.
    pub const SEQUENCE: u16 = 506;
    /// Terminate.
    pub const TERMINATE: u16 = 507;
    /// RetransmitRequest.
    pub const RETRANSMIT_REQUEST: u16 = 508;
    /// Retransmission marker.
    pub const RETRANSMISSION: u16 = 509;
    /// RetransmitReject.
    pub const RETRANSMIT_REJECT: u16 = 510;
    /// NotApplied.
    pub const NOT_APPLIED: u16 = 513;
    /// NewOrderSingle application message.
    pub const NEW_ORDER_SINGLE: u16 = 514;
    /// ExecutionReportStatus application message.
    pub const EXECUTION_REPORT_STATUS: u16 = 532;

    /// Returns true for ids handled entirely by the session layer.
    #[must_use]
    pub const fn is_session(template_id: u16) -> bool {
        matches!(template_id, 500..=510 | 513)
    }
}
