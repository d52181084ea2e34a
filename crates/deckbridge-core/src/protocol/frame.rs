//! Length-prefixed framing for the control channel.
//!
//! Each frame is a 4-byte big-endian body length followed by the body
//! produced by [`Message::encode`](super::Message::encode).

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use super::constants::{FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
use super::message::{Message, ProtocolError};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    TooLarge(usize),
    #[error("Connection closed mid-frame")]
    UnexpectedEof,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Prefix `body` with its length.
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>, FrameError> {
    if body.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    frame.write_u32::<BigEndian>(body.len() as u32)?;
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Encode a message straight into a complete frame.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let body = msg.encode()?;
    Ok(encode_frame(&body)?)
}

/// Write one frame and flush.
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> Result<(), FrameError> {
    let frame = encode_frame(body)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read the next frame body.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly on a frame
/// boundary.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError> {
    let len = match reader.read_u32::<BigEndian>() {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::UnexpectedEof
        } else {
            FrameError::Io(e)
        }
    })?;
    Ok(Some(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Rgb;
    use std::io::Cursor;

    #[test]
    fn test_frames_read_back_in_order() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"first").unwrap();
        write_frame(&mut wire, b"second").unwrap();

        let mut cursor = Cursor::new(wire);
        assert_eq!(read_frame(&mut cursor).unwrap().unwrap(), b"first");
        assert_eq!(read_frame(&mut cursor).unwrap().unwrap(), b"second");
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_length_prefix_is_big_endian() {
        let frame = encode_frame(b"abc").unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0, 3]);
    }

    #[test]
    fn test_partial_body_is_error() {
        let frame = encode_frame(b"hello").unwrap();
        let mut cursor = Cursor::new(&frame[..frame.len() - 1]);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(FrameError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_rejects_oversized_header() {
        let mut buf = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes().to_vec();
        buf.push(0);
        assert!(matches!(
            read_frame(&mut Cursor::new(buf)),
            Err(FrameError::TooLarge(_))
        ));
        assert!(encode_frame(&vec![0u8; MAX_FRAME_SIZE + 1]).is_err());
    }

    #[test]
    fn test_encode_message_frames_body() {
        let msg = Message::SetDeckColor {
            panel: 0,
            color: Rgb::new(1, 2, 3),
        };
        let frame = encode_message(&msg).unwrap();
        let body = read_frame(&mut Cursor::new(frame)).unwrap().unwrap();
        assert_eq!(Message::decode(&body).unwrap(), msg);
    }
}
