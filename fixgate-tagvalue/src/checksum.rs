/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! FIX checksum arithmetic.
//!
//! The checksum is the decimal sum of every byte up to and including the SOH
//! that precedes the `10=` field, modulo 256, rendered as three ASCII digits.

use bytes::{BufMut, BytesMut};

/// Computes the checksum of the given bytes.
///
/// # Arguments
/// * `data` - All message bytes preceding the `10=` field
#[inline]
#[must_use]
pub fn checksum_of(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Appends a complete `10=NNN<SOH>` trailer to the buffer.
///
/// # Arguments
/// * `dst` - Output buffer
/// * `checksum` - The checksum value to render
#[inline]
pub fn write_checksum(dst: &mut BytesMut, checksum: u8) {
    dst.put_slice(b"10=");
    dst.put_u8(b'0' + checksum / 100);
    dst.put_u8(b'0' + (checksum / 10) % 10);
    dst.put_u8(b'0' + checksum % 10);
    dst.put_u8(crate::SOH);
}

/// Parses a three-digit checksum value.
///
/// # Returns
/// `Some(checksum)` if `bytes` is exactly three ASCII digits.
#[inline]
#[must_use]
pub fn read_checksum(bytes: &[u8]) -> Option<u8> {
    match bytes {
        [a, b, c] if a.is_ascii_digit() && b.is_ascii_digit() && c.is_ascii_digit() => {
            let value = (a - b'0') as u16 * 100 + (b - b'0') as u16 * 10 + (c - b'0') as u16;
            u8::try_from(value).ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_of_empty() {
        assert_eq!(checksum_of(b""), 0);
    }

    #[test]
    fn test_checksum_wraps_modulo_256() {
        let data = vec![200u8; 3];
        assert_eq!(checksum_of(&data), (600 % 256) as u8);
    }

    #[test]
    fn test_write_checksum_trailer() {
        let mut buf = BytesMut::new();
        write_checksum(&mut buf, 7);
        assert_eq!(&buf[..], b"10=007\x01");

        buf.clear();
        write_checksum(&mut buf, 255);
        assert_eq!(&buf[..], b"10=255\x01");
    }

    #[test]
    fn test_read_checksum() {
        assert_eq!(read_checksum(b"000"), Some(0));
        assert_eq!(read_checksum(b"042"), Some(42));
        assert_eq!(read_checksum(b"255"), Some(255));
        assert_eq!(read_checksum(b"256"), None);
        assert_eq!(read_checksum(b"29"), None);
        assert_eq!(read_checksum(b"abc"), None);
    }

    #[test]
    fn test_write_read_agree() {
        let mut buf = BytesMut::new();
        for value in [0u8, 9, 99, 100, 254] {
            buf.clear();
            write_checksum(&mut buf, value);
            assert_eq!(read_checksum(&buf[3..6]), Some(value));
        }
    }
}
