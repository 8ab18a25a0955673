/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! FIX message assembly.
//!
//! [`MessageBuilder`] accumulates body fields in tag=value format and, on
//! [`MessageBuilder::finish`], prepends BeginString and BodyLength and
//! appends the checksum trailer. [`format_sending_time`] renders the
//! SendingTime text form; core timestamps stay nanosecond-native and the
//! text rendering belongs to this codec.

use crate::checksum::{checksum_of, write_checksum};
use crate::SOH;
use arrayvec::ArrayString;
use bytes::{BufMut, BytesMut};
use chrono::DateTime;
use fixgate_core::Timestamp;

/// Renders a timestamp as a SendingTime (tag 52) value:
/// `YYYYMMDD-HH:MM:SS.sss` in UTC with millisecond precision.
#[must_use]
pub fn format_sending_time(ts: Timestamp) -> ArrayString<21> {
    let dt = DateTime::from_timestamp_nanos(ts.as_nanos() as i64);
    let mut buf = ArrayString::new();
    let _ = std::fmt::write(&mut buf, format_args!("{}", dt.format("%Y%m%d-%H:%M:%S%.3f")));
    buf
}

/// Builder for one outbound FIX message.
#[derive(Debug)]
pub struct MessageBuilder {
    begin_string: &'static str,
    body: BytesMut,
}

impl MessageBuilder {
    /// Creates a builder for the given BeginString.
    #[must_use]
    pub fn new(begin_string: &'static str) -> Self {
        Self {
            begin_string,
            body: BytesMut::with_capacity(192),
        }
    }

    /// Appends a field with a string value.
    #[inline]
    pub fn field_str(&mut self, tag: u32, value: &str) -> &mut Self {
        self.field_bytes(tag, value.as_bytes())
    }

    /// Appends a field with an unsigned integer value.
    #[inline]
    pub fn field_uint(&mut self, tag: u32, value: u64) -> &mut Self {
        let mut digits = itoa::Buffer::new();
        self.field_bytes(tag, digits.format(value).as_bytes())
    }

    /// Appends a field with a boolean value rendered as `Y`/`N`.
    #[inline]
    pub fn field_bool(&mut self, tag: u32, value: bool) -> &mut Self {
        self.field_bytes(tag, if value { b"Y" } else { b"N" })
    }

    /// Appends a field with raw value bytes.
    #[inline]
    pub fn field_bytes(&mut self, tag: u32, value: &[u8]) -> &mut Self {
        let mut digits = itoa::Buffer::new();
        self.body.put_slice(digits.format(tag).as_bytes());
        self.body.put_u8(b'=');
        self.body.put_slice(value);
        self.body.put_u8(SOH);
        self
    }

    /// Returns the accumulated body length in bytes.
    #[inline]
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Assembles the complete frame.
    #[must_use]
    pub fn finish(self) -> BytesMut {
        let mut digits = itoa::Buffer::new();
        let body_len = digits.format(self.body.len());

        let mut frame =
            BytesMut::with_capacity(self.begin_string.len() + body_len.len() + self.body.len() + 16);
        frame.put_slice(b"8=");
        frame.put_slice(self.begin_string.as_bytes());
        frame.put_u8(SOH);
        frame.put_slice(b"9=");
        frame.put_slice(body_len.as_bytes());
        frame.put_u8(SOH);
        frame.put_slice(&self.body);

        let checksum = checksum_of(&frame);
        write_checksum(&mut frame, checksum);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{fix_frame_length, FixMessage};
    use crate::tags;

    #[test]
    fn test_builder_produces_valid_frame() {
        let mut builder = MessageBuilder::new("FIX.4.4");
        builder
            .field_str(tags::MSG_TYPE, "A")
            .field_str(tags::SENDER_COMP_ID, "INIT")
            .field_str(tags::TARGET_COMP_ID, "ACC")
            .field_uint(tags::MSG_SEQ_NUM, 1)
            .field_uint(tags::HEART_BT_INT, 30)
            .field_bool(tags::RESET_SEQ_NUM_FLAG, true);

        let frame = builder.finish();

        assert_eq!(fix_frame_length(&frame).unwrap(), Some(frame.len()));
        let msg = FixMessage::parse(&frame).unwrap();
        assert_eq!(msg.msg_type(), b"A");
        assert_eq!(msg.get_int(tags::HEART_BT_INT), Some(30));
        assert_eq!(msg.get_bool(tags::RESET_SEQ_NUM_FLAG), Some(true));
    }

    #[test]
    fn test_body_length_counts_only_body() {
        let mut builder = MessageBuilder::new("FIX.4.4");
        builder.field_str(tags::MSG_TYPE, "0");
        let body_len = builder.body_len();

        let frame = builder.finish();
        let text = String::from_utf8_lossy(&frame);
        assert!(text.contains(&format!("9={}\u{1}", body_len)));
    }

    #[test]
    fn test_format_sending_time() {
        assert_eq!(
            format_sending_time(Timestamp::from_millis(0)).as_str(),
            "19700101-00:00:00.000"
        );
        // sub-millisecond nanoseconds truncate
        assert_eq!(
            format_sending_time(Timestamp::from_nanos(1_234_567)).as_str(),
            "19700101-00:00:00.001"
        );
    }
}
