/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Zero-copy FIX frame parsing.
//!
//! [`fix_frame_length`] locates complete frames in a byte stream without
//! allocating; [`FixMessage::parse`] validates a complete frame and exposes
//! its fields as borrowed slices. A parsed message must not be retained past
//! the dispatch that produced it.

use crate::checksum::{checksum_of, read_checksum};
use crate::{tags, SOH};
use fixgate_core::{DecodeError, SeqNum};
use memchr::memchr;
use smallvec::SmallVec;

/// Length of the `10=NNN<SOH>` trailer.
const TRAILER_LEN: usize = 7;

/// Determines the length of the first complete FIX frame in `buf`.
///
/// # Returns
/// - `Ok(Some(len))` when a complete frame of `len` bytes is available
/// - `Ok(None)` when more bytes are needed
/// - `Err` on a framing violation, fatal to the connection
///
/// # Errors
/// Returns [`DecodeError::Malformed`] if the buffer does not start with
/// `8=...` followed by a parseable `9=` BodyLength.
pub fn fix_frame_length(buf: &[u8]) -> Result<Option<usize>, DecodeError> {
    // Shortest conceivable frame: 8=F|9=1|35=0|10=000|
    if buf.len() < 8 {
        return Ok(None);
    }

    if &buf[..2] != b"8=" {
        return Err(DecodeError::malformed("frame does not begin with 8="));
    }

    let begin_end = match memchr(SOH, buf) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let len_field = begin_end + 1;
    if buf.len() < len_field + 2 {
        return Ok(None);
    }
    if &buf[len_field..len_field + 2] != b"9=" {
        return Err(DecodeError::malformed("BodyLength must follow BeginString"));
    }

    let len_end = match memchr(SOH, &buf[len_field..]) {
        Some(pos) => len_field + pos,
        None => return Ok(None),
    };

    let body_length = parse_int(&buf[len_field + 2..len_end])
        .ok_or_else(|| DecodeError::malformed("unparseable BodyLength"))?;

    let total = len_end + 1 + body_length as usize + TRAILER_LEN;
    if buf.len() < total {
        return Ok(None);
    }

    Ok(Some(total))
}

/// Iterator over `tag=value` fields in a frame.
#[derive(Debug, Clone)]
pub struct FieldIter<'a> {
    remaining: &'a [u8],
}

impl<'a> FieldIter<'a> {
    /// Creates an iterator over the fields of `frame`.
    #[inline]
    #[must_use]
    pub const fn new(frame: &'a [u8]) -> Self {
        Self { remaining: frame }
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = (u32, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }

        let eq = memchr(b'=', self.remaining)?;
        let tag = parse_int(&self.remaining[..eq])?;

        let value_start = eq + 1;
        let soh = memchr(SOH, &self.remaining[value_start..])?;
        let value = &self.remaining[value_start..value_start + soh];

        self.remaining = &self.remaining[value_start + soh + 1..];
        Some((tag as u32, value))
    }
}

/// A validated FIX frame with zero-copy field access.
///
/// Borrows the backing buffer; valid only for the current dispatch.
#[derive(Debug)]
pub struct FixMessage<'a> {
    /// The complete frame, including trailer.
    raw: &'a [u8],
    /// MsgType (tag 35) value.
    msg_type: &'a [u8],
    /// All fields except BeginString, BodyLength, and CheckSum.
    fields: SmallVec<[(u32, &'a [u8]); 16]>,
}

impl<'a> FixMessage<'a> {
    /// Parses and validates one complete frame.
    ///
    /// # Errors
    /// - [`DecodeError::Malformed`] on structural violations
    /// - [`DecodeError::ChecksumMismatch`] when the declared checksum is wrong
    pub fn parse(frame: &'a [u8]) -> Result<Self, DecodeError> {
        if frame.len() < TRAILER_LEN {
            return Err(DecodeError::malformed("frame shorter than trailer"));
        }

        let trailer = &frame[frame.len() - TRAILER_LEN..];
        if &trailer[..3] != b"10=" || trailer[6] != SOH {
            return Err(DecodeError::malformed("missing checksum trailer"));
        }
        let declared = read_checksum(&trailer[3..6])
            .ok_or_else(|| DecodeError::malformed("unparseable checksum"))?;
        let calculated = checksum_of(&frame[..frame.len() - TRAILER_LEN]);
        if calculated != declared {
            return Err(DecodeError::ChecksumMismatch {
                calculated,
                declared,
            });
        }

        let mut iter = FieldIter::new(&frame[..frame.len() - TRAILER_LEN]);

        let (begin_tag, _) = iter
            .next()
            .ok_or_else(|| DecodeError::malformed("empty frame"))?;
        if begin_tag != tags::BEGIN_STRING {
            return Err(DecodeError::malformed("frame does not begin with 8="));
        }
        let (length_tag, _) = iter
            .next()
            .ok_or_else(|| DecodeError::malformed("missing BodyLength"))?;
        if length_tag != tags::BODY_LENGTH {
            return Err(DecodeError::malformed("BodyLength must follow BeginString"));
        }
        let (type_tag, msg_type) = iter
            .next()
            .ok_or_else(|| DecodeError::malformed("missing MsgType"))?;
        if type_tag != tags::MSG_TYPE {
            return Err(DecodeError::malformed("MsgType must lead the body"));
        }

        let mut fields: SmallVec<[(u32, &'a [u8]); 16]> = SmallVec::new();
        fields.push((type_tag, msg_type));
        fields.extend(iter);

        Ok(Self {
            raw: frame,
            msg_type,
            fields,
        })
    }

    /// Returns the complete frame bytes.
    #[inline]
    #[must_use]
    pub const fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// Returns the MsgType value bytes.
    #[inline]
    #[must_use]
    pub const fn msg_type(&self) -> &'a [u8] {
        self.msg_type
    }

    /// Returns the first occurrence of `tag`, if present.
    #[must_use]
    pub fn get(&self, tag: u32) -> Option<&'a [u8]> {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| *v)
    }

    /// Returns `tag` parsed as an unsigned integer.
    #[must_use]
    pub fn get_int(&self, tag: u32) -> Option<u64> {
        parse_int(self.get(tag)?)
    }

    /// Returns `tag` parsed as a FIX boolean (`Y`/`N`).
    #[must_use]
    pub fn get_bool(&self, tag: u32) -> Option<bool> {
        match self.get(tag)? {
            b"Y" => Some(true),
            b"N" => Some(false),
            _ => None,
        }
    }

    /// Returns `tag` as a UTF-8 string slice.
    ///
    /// # Errors
    /// Returns [`DecodeError::InvalidUtf8`] if the value is not valid UTF-8.
    pub fn get_str(&self, tag: u32) -> Option<Result<&'a str, DecodeError>> {
        self.get(tag)
            .map(|v| std::str::from_utf8(v).map_err(DecodeError::from))
    }

    /// Returns MsgSeqNum (tag 34). A zero on the wire is invalid and reads
    /// as absent.
    #[must_use]
    pub fn seq_num(&self) -> Option<SeqNum> {
        SeqNum::new(self.get_int(tags::MSG_SEQ_NUM)?)
    }

    /// Returns true if PossDupFlag (tag 43) is set.
    #[must_use]
    pub fn poss_dup(&self) -> bool {
        self.get_bool(tags::POSS_DUP_FLAG).unwrap_or(false)
    }

    /// Returns all parsed fields.
    #[must_use]
    pub fn fields(&self) -> &[(u32, &'a [u8])] {
        &self.fields
    }
}

/// Parses ASCII digits into a u64, rejecting empty and oversized input.
#[inline]
fn parse_int(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() || bytes.len() > 19 {
        return None;
    }
    let mut value: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + (b - b'0') as u64;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::MessageBuilder;

    fn heartbeat_frame() -> bytes::BytesMut {
        let mut builder = MessageBuilder::new("FIX.4.4");
        builder.field_str(tags::MSG_TYPE, "0");
        builder.field_str(tags::SENDER_COMP_ID, "INIT");
        builder.field_str(tags::TARGET_COMP_ID, "ACC");
        builder.field_uint(tags::MSG_SEQ_NUM, 7);
        builder.finish()
    }

    #[test]
    fn test_frame_length_complete() {
        let frame = heartbeat_frame();
        assert_eq!(fix_frame_length(&frame).unwrap(), Some(frame.len()));
    }

    #[test]
    fn test_frame_length_partial() {
        let frame = heartbeat_frame();
        for cut in [0, 5, frame.len() - 1] {
            assert_eq!(fix_frame_length(&frame[..cut]).unwrap(), None);
        }
    }

    #[test]
    fn test_frame_length_rejects_garbage() {
        assert!(fix_frame_length(b"9=FIX.4.4\x019=10\x01").is_err());
        assert!(fix_frame_length(b"8=FIX.4.4\x0135=0\x0134=1\x01").is_err());
    }

    #[test]
    fn test_parse_round() {
        let frame = heartbeat_frame();
        let msg = FixMessage::parse(&frame).unwrap();

        assert_eq!(msg.msg_type(), b"0");
        assert_eq!(msg.seq_num(), SeqNum::new(7));
        assert_eq!(msg.get(tags::SENDER_COMP_ID), Some(&b"INIT"[..]));
        assert!(!msg.poss_dup());
    }

    #[test]
    fn test_zero_seq_num_reads_as_absent() {
        let mut builder = MessageBuilder::new("FIX.4.4");
        builder
            .field_str(tags::MSG_TYPE, "0")
            .field_uint(tags::MSG_SEQ_NUM, 0);
        let frame = builder.finish();

        let msg = FixMessage::parse(&frame).unwrap();
        assert_eq!(msg.seq_num(), None);
    }

    #[test]
    fn test_parse_checksum_mismatch() {
        let mut frame = heartbeat_frame();
        let len = frame.len();
        // corrupt a body byte without touching the trailer
        frame[len - 10] ^= 0x01;

        assert!(matches!(
            FixMessage::parse(&frame),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_field_iter() {
        let fields: Vec<_> = FieldIter::new(b"8=FIX.4.4\x0135=A\x01108=30\x01").collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0], (8, &b"FIX.4.4"[..]));
        assert_eq!(fields[1], (35, &b"A"[..]));
        assert_eq!(fields[2], (108, &b"30"[..]));
    }

    #[test]
    fn test_parse_int_limits() {
        assert_eq!(parse_int(b"0"), Some(0));
        assert_eq!(parse_int(b"18446744073709551615"), None); // 20 digits
        assert_eq!(parse_int(b""), None);
        assert_eq!(parse_int(b"1x"), None);
    }
}
