use bytes::{BufMut, BytesMut};
use log::trace;
use tokio_util::codec::{Decoder, Encoder};

use parley_bus_common::Message;

use crate::Error;

/// Smallest valid BSON document: length prefix and a trailing zero
const MIN_FRAME_LEN: usize = 5;
/// Frames above the limit are treated as a corrupted stream
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Bus frame codec.
///
/// Frames are BSON documents. A document starts with its own little-endian
/// `i32` length, so no additional framing is needed
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> crate::Result<Option<Message>> {
        if src.len() < 4 {
            return Ok(None);
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&src[..4]);
        let frame_len = i32::from_le_bytes(len_bytes);

        let frame_len = match usize::try_from(frame_len) {
            Ok(len) if (MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&len) => len,
            _ => return Err(Error::Protocol(format!("invalid frame length {frame_len}"))),
        };

        if src.len() < frame_len {
            trace!("Next frame len: {}. Buffer len {}", frame_len, src.len());

            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        let message = bson::from_slice(&frame)?;

        trace!("Incoming frame of len {frame_len}: {message:?}");
        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> crate::Result<()> {
        let bytes = bson::to_vec(&item)?;

        // The peer would drop the connection on reading it
        check_len(bytes.len())?;

        dst.reserve(bytes.len());
        dst.put_slice(&bytes);
        Ok(())
    }
}

/// Check `message` fits into a frame. Used to fail a reply before it's queued
pub(crate) fn check_frame_len(message: &Message) -> crate::Result<()> {
    check_len(bson::to_vec(message)?.len())
}

fn check_len(frame_len: usize) -> crate::Result<()> {
    if frame_len > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!(
            "frame of len {frame_len} exceeds the limit"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use parley_bus_common::{Body, Status};

    use super::*;

    fn encoded(message: Message) -> BytesMut {
        let mut buffer = BytesMut::new();
        MessageCodec.encode(message, &mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_partial_frame_waits_for_more_data() {
        let full = encoded(Message::data(1, 2, doc! { "message": "hi" }));
        let mut buffer = BytesMut::from(&full[..full.len() - 1]);

        assert!(MessageCodec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(&full[full.len() - 1..]);
        let message = MessageCodec.decode(&mut buffer).unwrap().unwrap();

        assert_eq!(message.seq, 1);
        assert_eq!(message.body, Body::Data { data: doc! { "message": "hi" } });
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut buffer = encoded(Message::status(1, 0, Status::Ok));
        buffer.extend_from_slice(&encoded(Message::status(2, 0, Status::NotFound)));

        let first = MessageCodec.decode(&mut buffer).unwrap().unwrap();
        let second = MessageCodec.decode(&mut buffer).unwrap().unwrap();

        assert_eq!(first, Message::status(1, 0, Status::Ok));
        assert_eq!(second, Message::status(2, 0, Status::NotFound));
        assert!(MessageCodec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_invalid_length_is_rejected() {
        let mut buffer = BytesMut::from(&(-1i32).to_le_bytes()[..]);
        assert!(matches!(
            MessageCodec.decode(&mut buffer),
            Err(Error::Protocol(_))
        ));

        let mut buffer = BytesMut::from(&((MAX_FRAME_LEN + 1) as i32).to_le_bytes()[..]);
        assert!(matches!(
            MessageCodec.decode(&mut buffer),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_oversized_frame_is_not_encoded() {
        let message = "x".repeat(MAX_FRAME_LEN);
        let mut buffer = BytesMut::new();

        assert!(matches!(
            MessageCodec.encode(Message::data(1, 2, doc! { "message": message }), &mut buffer),
            Err(Error::Protocol(_))
        ));
        assert!(buffer.is_empty());

        // Fits
        let message = "x".repeat(MAX_FRAME_LEN - 1024);
        assert!(MessageCodec
            .encode(Message::data(1, 2, doc! { "message": message }), &mut buffer)
            .is_ok());
        assert!(buffer.len() <= MAX_FRAME_LEN);
    }

    #[test]
    fn test_garbage_frame_fails_to_decode() {
        let mut buffer = encoded(Message::status(1, 0, Status::Ok));
        // Keep the length prefix, corrupt the first element type
        buffer[4] = 0x42;

        assert!(matches!(
            MessageCodec.decode(&mut buffer),
            Err(Error::Decode(_))
        ));
    }
}
