/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! SBE message header and framing.
//!
//! Wire layout, little-endian: `blockLength: u16, templateId: u16,
//! schemaId: u16, version: u16`, followed by `blockLength` body bytes.

use bytes::{BufMut, BytesMut};
use fixgate_core::{DecodeError, EncodeError};

/// Encoded header length in bytes.
pub const HEADER_LEN: usize = 8;

/// Schema id stamped on every outbound message.
pub const SCHEMA_ID: u16 = 8;

/// Schema version stamped on every outbound message.
pub const SCHEMA_VERSION: u16 = 5;

/// Decoded SBE message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Length of the root block that follows the header.
    pub block_length: u16,
    /// Template id of the message.
    pub template_id: u16,
    /// Schema id.
    pub schema_id: u16,
    /// Schema version.
    pub version: u16,
}

impl MessageHeader {
    /// Creates a header for an outbound message of this schema.
    #[must_use]
    pub const fn for_template(template_id: u16, block_length: u16) -> Self {
        Self {
            block_length,
            template_id,
            schema_id: SCHEMA_ID,
            version: SCHEMA_VERSION,
        }
    }

    /// Decodes a header from the front of `buf`.
    ///
    /// # Errors
    /// Returns [`DecodeError::Malformed`] if fewer than [`HEADER_LEN`] bytes
    /// are available.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::malformed("truncated SBE header"));
        }
        Ok(Self {
            block_length: u16::from_le_bytes([buf[0], buf[1]]),
            template_id: u16::from_le_bytes([buf[2], buf[3]]),
            schema_id: u16::from_le_bytes([buf[4], buf[5]]),
            version: u16::from_le_bytes([buf[6], buf[7]]),
        })
    }

    /// Appends the encoded header to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16_le(self.block_length);
        dst.put_u16_le(self.template_id);
        dst.put_u16_le(self.schema_id);
        dst.put_u16_le(self.version);
    }
}

/// Determines the length of the first complete iLink3 frame in `buf`.
///
/// # Returns
/// - `Ok(Some(len))` when a complete frame of `len` bytes is available
/// - `Ok(None)` when more bytes are needed
///
/// # Errors
/// Returns [`DecodeError::MessageTooLarge`] when the declared block length
/// exceeds `max_message_size`.
pub fn ilink_frame_length(buf: &[u8], max_message_size: usize) -> Result<Option<usize>, DecodeError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let block_length = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let total = HEADER_LEN + block_length;
    if total > max_message_size {
        return Err(DecodeError::MessageTooLarge {
            size: total,
            max_size: max_message_size,
        });
    }
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some(total))
}

/// Appends `value` to `dst` as a NUL-padded fixed-width ASCII field.
///
/// # Errors
/// Returns [`EncodeError::FieldTooLong`] when `value` exceeds `width`.
pub fn put_padded(
    dst: &mut BytesMut,
    field: &'static str,
    value: &str,
    width: usize,
) -> Result<(), EncodeError> {
    let bytes = value.as_bytes();
    if bytes.len() > width {
        return Err(EncodeError::FieldTooLong {
            field,
            length: bytes.len(),
            width,
        });
    }
    dst.put_slice(bytes);
    dst.put_bytes(0, width - bytes.len());
    Ok(())
}

/// Reads a NUL-padded fixed-width ASCII field from `body` at `offset`.
///
/// # Errors
/// Returns [`DecodeError::Malformed`] on truncation, or
/// [`DecodeError::InvalidUtf8`] when the content is not UTF-8.
pub fn get_padded(body: &[u8], offset: usize, width: usize) -> Result<&str, DecodeError> {
    let slice = body
        .get(offset..offset + width)
        .ok_or_else(|| DecodeError::malformed("truncated string field"))?;
    let end = slice.iter().position(|&b| b == 0).unwrap_or(width);
    Ok(std::str::from_utf8(&slice[..end])?)
}

/// Reads a little-endian u16 from `body` at `offset`.
pub(crate) fn get_u16(body: &[u8], offset: usize) -> Result<u16, DecodeError> {
    let s = body
        .get(offset..offset + 2)
        .ok_or_else(|| DecodeError::malformed("truncated u16 field"))?;
    Ok(u16::from_le_bytes([s[0], s[1]]))
}

/// Reads a little-endian u32 from `body` at `offset`.
pub(crate) fn get_u32(body: &[u8], offset: usize) -> Result<u32, DecodeError> {
    let s = body
        .get(offset..offset + 4)
        .ok_or_else(|| DecodeError::malformed("truncated u32 field"))?;
    Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

/// Reads a little-endian u64 from `body` at `offset`.
pub(crate) fn get_u64(body: &[u8], offset: usize) -> Result<u64, DecodeError> {
    let s = body
        .get(offset..offset + 8)
        .ok_or_else(|| DecodeError::malformed("truncated u64 field"))?;
    Ok(u64::from_le_bytes([
        s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7],
    ]))
}

/// Reads a little-endian i64 from `body` at `offset`.
pub(crate) fn get_i64(body: &[u8], offset: usize) -> Result<i64, DecodeError> {
    Ok(get_u64(body, offset)? as i64)
}

/// Reads a single byte from `body` at `offset`.
pub(crate) fn get_u8(body: &[u8], offset: usize) -> Result<u8, DecodeError> {
    body.get(offset)
        .copied()
        .ok_or_else(|| DecodeError::malformed("truncated u8 field"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round() {
        let header = MessageHeader::for_template(506, 13);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(MessageHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_header_truncated() {
        assert!(MessageHeader::decode(&[0u8; 7]).is_err());
    }

    #[test]
    fn test_frame_length() {
        let mut buf = BytesMut::new();
        MessageHeader::for_template(506, 13).encode(&mut buf);
        buf.put_bytes(0xAA, 13);

        assert_eq!(ilink_frame_length(&buf, 1024).unwrap(), Some(21));
        assert_eq!(ilink_frame_length(&buf[..20], 1024).unwrap(), None);
        assert_eq!(ilink_frame_length(&buf[..4], 1024).unwrap(), None);
    }

    #[test]
    fn test_frame_length_rejects_oversize() {
        let mut buf = BytesMut::new();
        MessageHeader::for_template(506, u16::MAX).encode(&mut buf);
        assert!(matches!(
            ilink_frame_length(&buf, 1024),
            Err(DecodeError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_padded_round() {
        let mut buf = BytesMut::new();
        put_padded(&mut buf, "session", "ABC", 5).unwrap();
        assert_eq!(&buf[..], b"ABC\0\0");
        assert_eq!(get_padded(&buf, 0, 5).unwrap(), "ABC");
    }

    #[test]
    fn test_padded_too_long() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            put_padded(&mut buf, "firm", "TOOLONG", 5),
            Err(EncodeError::FieldTooLong { .. })
        ));
    }
}
