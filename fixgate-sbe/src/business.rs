/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Application templates.
//!
//! Every application message carries a common 13-byte business prefix
//! (uuid, sequence number, retransmit flag). Gap detection and retransmit
//! fill accounting read only the prefix, so templates the session layer has
//! never seen still sequence correctly and pass through to the library.

use crate::header::{get_padded, get_u32, get_u64, get_u8, put_padded, MessageHeader};
use crate::template;
use bytes::{BufMut, BytesMut};
use fixgate_core::{DecodeError, EncodeError};

/// Encoded business prefix length in bytes.
pub const BUSINESS_HEADER_LEN: usize = 13;

/// Wire width of ClOrdID fields.
pub const CL_ORD_ID_LEN: usize = 20;

/// Wire width of SenderID fields.
pub const SENDER_ID_LEN: usize = 20;

/// Common prefix of every application template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHeader {
    /// Connection uuid the message was sent under.
    pub uuid: u64,
    /// Session-layer sequence number of the message.
    pub seq_num: u32,
    /// Set when the message is a retransmission of an earlier send.
    pub poss_retrans: bool,
}

impl BusinessHeader {
    /// Appends the encoded prefix to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u64_le(self.uuid);
        dst.put_u32_le(self.seq_num);
        dst.put_u8(u8::from(self.poss_retrans));
    }

    /// Decodes the prefix from the front of a root block.
    ///
    /// # Errors
    /// Returns [`DecodeError::Malformed`] on truncation.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            uuid: get_u64(body, 0)?,
            seq_num: get_u32(body, 8)?,
            poss_retrans: get_u8(body, 12)? != 0,
        })
    }
}

/// Order side on a NewOrderSingle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Side {
    /// Buy order.
    Buy = 1,
    /// Sell order.
    Sell = 2,
}

impl Side {
    /// Decodes the wire value.
    ///
    /// # Errors
    /// Returns [`DecodeError::Malformed`] for values other than 1 or 2.
    pub fn from_wire(value: u8) -> Result<Self, DecodeError> {
        match value {
            1 => Ok(Self::Buy),
            2 => Ok(Self::Sell),
            _ => Err(DecodeError::malformed("bad Side value")),
        }
    }
}

/// NewOrderSingle (template 514).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderSingle<'a> {
    /// Common business prefix.
    pub header: BusinessHeader,
    /// Order side.
    pub side: Side,
    /// Order quantity.
    pub order_qty: u32,
    /// Limit price as a fixed-point mantissa with nine implied decimals.
    pub price: i64,
    /// Client order id.
    pub cl_ord_id: &'a str,
    /// Sender (firm) id.
    pub sender_id: &'a str,
    /// Order request id.
    pub order_request_id: u64,
    /// Party details list request id.
    pub party_details_list_req_id: u64,
}

impl<'a> NewOrderSingle<'a> {
    /// Root block length.
    pub const BLOCK_LENGTH: u16 = 82;

    /// Encodes header and root block.
    ///
    /// # Errors
    /// Returns [`EncodeError`] when a string exceeds its wire width.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        MessageHeader::for_template(template::NEW_ORDER_SINGLE, Self::BLOCK_LENGTH).encode(dst);
        self.header.encode(dst);
        dst.put_u8(self.side as u8);
        dst.put_u32_le(self.order_qty);
        dst.put_i64_le(self.price);
        put_padded(dst, "cl_ord_id", self.cl_ord_id, CL_ORD_ID_LEN)?;
        put_padded(dst, "sender_id", self.sender_id, SENDER_ID_LEN)?;
        dst.put_u64_le(self.order_request_id);
        dst.put_u64_le(self.party_details_list_req_id);
        Ok(())
    }

    /// Decodes the root block.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on truncation or invalid UTF-8.
    pub fn decode(body: &'a [u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            header: BusinessHeader::decode(body)?,
            side: Side::from_wire(get_u8(body, 13)?)?,
            order_qty: get_u32(body, 14)?,
            price: crate::header::get_i64(body, 18)?,
            cl_ord_id: get_padded(body, 26, CL_ORD_ID_LEN)?,
            sender_id: get_padded(body, 46, SENDER_ID_LEN)?,
            order_request_id: get_u64(body, 66)?,
            party_details_list_req_id: get_u64(body, 74)?,
        })
    }
}

/// ExecutionReportStatus (template 532).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReportStatus<'a> {
    /// Common business prefix.
    pub header: BusinessHeader,
    /// Client order id being reported.
    pub cl_ord_id: &'a str,
    /// Order status code.
    pub ord_status: u8,
}

impl<'a> ExecutionReportStatus<'a> {
    /// Root block length.
    pub const BLOCK_LENGTH: u16 = 34;

    /// Encodes header and root block.
    ///
    /// # Errors
    /// Returns [`EncodeError`] when the client order id exceeds its width.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        MessageHeader::for_template(template::EXECUTION_REPORT_STATUS, Self::BLOCK_LENGTH)
            .encode(dst);
        self.header.encode(dst);
        put_padded(dst, "cl_ord_id", self.cl_ord_id, CL_ORD_ID_LEN)?;
        dst.put_u8(self.ord_status);
        Ok(())
    }

    /// Decodes the root block.
    ///
    /// # Errors
    /// Returns [`DecodeError`] on truncation or invalid UTF-8.
    pub fn decode(body: &'a [u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            header: BusinessHeader::decode(body)?,
            cl_ord_id: get_padded(body, 13, CL_ORD_ID_LEN)?,
            ord_status: get_u8(body, 33)?,
        })
    }
}
