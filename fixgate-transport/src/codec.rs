/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Stream framing codecs.
//!
//! Both codecs yield complete frames as `BytesMut` without validating or
//! interpreting the contents; parsing happens on the framer thread so the
//! zero-copy message views never outlive a dispatch.

use bytes::BytesMut;
use fixgate_core::GatewayError;
use fixgate_sbe::ilink_frame_length;
use fixgate_tagvalue::fix_frame_length;
use tokio_util::codec::Decoder;

/// Default cap on a single inbound frame.
const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Frames FIX tag=value messages out of a TCP stream.
#[derive(Debug, Clone)]
pub struct FixFrameCodec {
    max_message_size: usize,
}

impl FixFrameCodec {
    /// Creates a codec with the default frame cap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Sets the maximum frame size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

impl Default for FixFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FixFrameCodec {
    type Item = BytesMut;
    type Error = GatewayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match fix_frame_length(src)? {
            Some(len) if len > self.max_message_size => {
                Err(fixgate_core::DecodeError::MessageTooLarge {
                    size: len,
                    max_size: self.max_message_size,
                }
                .into())
            }
            Some(len) => Ok(Some(src.split_to(len))),
            None => Ok(None),
        }
    }
}

/// Frames iLink3 SBE messages out of a TCP stream.
#[derive(Debug, Clone)]
pub struct IlinkFrameCodec {
    max_message_size: usize,
}

impl IlinkFrameCodec {
    /// Creates a codec with the default frame cap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for IlinkFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for IlinkFrameCodec {
    type Item = BytesMut;
    type Error = GatewayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match ilink_frame_length(src, self.max_message_size)? {
            Some(len) => Ok(Some(src.split_to(len))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use fixgate_sbe::messages::{KeepAliveLapsed, Sequence};
    use fixgate_tagvalue::{tags, MessageBuilder};

    fn fix_frame() -> BytesMut {
        let mut builder = MessageBuilder::new("FIX.4.4");
        builder
            .field_str(tags::MSG_TYPE, "0")
            .field_uint(tags::MSG_SEQ_NUM, 1);
        builder.finish()
    }

    fn ilink_frame() -> BytesMut {
        let mut frame = BytesMut::new();
        Sequence {
            uuid: 1,
            next_seq_no: 1,
            keep_alive_lapsed: KeepAliveLapsed::NotLapsed,
        }
        .encode(&mut frame);
        frame
    }

    #[test]
    fn test_fix_codec_splits_back_to_back_frames() {
        let mut codec = FixFrameCodec::new();
        let frame = fix_frame();
        let mut src = BytesMut::new();
        src.put_slice(&frame);
        src.put_slice(&frame);

        let first = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(first, frame);
        let second = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(second, frame);
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn test_fix_codec_waits_for_complete_frame() {
        let mut codec = FixFrameCodec::new();
        let frame = fix_frame();
        let mut src = BytesMut::from(&frame[..frame.len() - 3]);

        assert!(codec.decode(&mut src).unwrap().is_none());
        src.put_slice(&frame[frame.len() - 3..]);
        assert!(codec.decode(&mut src).unwrap().is_some());
    }

    #[test]
    fn test_fix_codec_rejects_garbage() {
        let mut codec = FixFrameCodec::new();
        let mut src = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);
        assert!(codec.decode(&mut src).is_err());
    }

    #[test]
    fn test_ilink_codec_splits_frames() {
        let mut codec = IlinkFrameCodec::new();
        let frame = ilink_frame();
        let mut src = BytesMut::new();
        src.put_slice(&frame);
        src.put_slice(&frame[..4]);

        let first = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(first, frame);
        assert!(codec.decode(&mut src).unwrap().is_none());
    }
}
