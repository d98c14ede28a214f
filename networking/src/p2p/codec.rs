//! Frame layout: `ver: u16 | ctrl: u8 | action: u8 | len: u32`, big endian,
//! followed by `len` bytes of snappy-compressed message body.

use snap::raw::{Decoder, Encoder, decompress_len};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::config::MAX_FRAME_BODY;
use super::message::{Msg, MsgHeader};
use crate::error::WireError;

pub const HEADER_LEN: usize = 8;

pub fn encode_frame(msg: &Msg) -> Result<Vec<u8>, WireError> {
    if msg.body.len() > MAX_FRAME_BODY {
        return Err(WireError::FrameTooLarge(msg.body.len()));
    }
    let body = Encoder::new().compress_vec(&msg.body)?;
    if body.len() > MAX_FRAME_BODY {
        return Err(WireError::FrameTooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&msg.header.ver.to_be_bytes());
    frame.push(msg.header.ctrl);
    frame.push(msg.header.action);
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn decode_header(raw: &[u8; HEADER_LEN]) -> (MsgHeader, usize) {
    let ver = u16::from_be_bytes([raw[0], raw[1]]);
    let len = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
    (MsgHeader::new(ver, raw[2], raw[3]), len)
}

/// Read one frame, rejecting bodies above [`MAX_FRAME_BODY`] before allocating them.
pub async fn read_frame<R>(reader: &mut R) -> Result<Msg, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; HEADER_LEN];
    reader.read_exact(&mut raw).await?;
    let (header, len) = decode_header(&raw);
    if len > MAX_FRAME_BODY {
        return Err(WireError::FrameTooLarge(len));
    }

    let mut compressed = vec![0u8; len];
    reader.read_exact(&mut compressed).await?;

    let decompressed = decompress_len(&compressed)?;
    if decompressed > MAX_FRAME_BODY {
        return Err(WireError::FrameTooLarge(decompressed));
    }
    let body = Decoder::new().decompress_vec(&compressed)?;
    Ok(Msg::new(header, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::message::{Ctrl, Ver};

    #[tokio::test]
    async fn reads_back_written_frames() {
        let first = Msg::new(MsgHeader::new(Ver::V1, Ctrl::SYNC, 2), b"hello".to_vec());
        let second = Msg::new(MsgHeader::new(Ver::V0, Ctrl::NET, 0), Vec::new());

        let mut stream = encode_frame(&first).unwrap();
        stream.extend(encode_frame(&second).unwrap());
        let mut reader = stream.as_slice();

        assert_eq!(read_frame(&mut reader).await.unwrap(), first);
        assert_eq!(read_frame(&mut reader).await.unwrap(), second);
        assert!(read_frame(&mut reader).await.unwrap_err().is_eof());
    }

    #[tokio::test]
    async fn rejects_oversized_length_prefix() {
        let mut frame = vec![0, 1, 1, 2];
        frame.extend_from_slice(&((MAX_FRAME_BODY as u32) + 1).to_be_bytes());
        let mut reader = frame.as_slice();

        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge(n) if n == MAX_FRAME_BODY + 1));
    }

    #[tokio::test]
    async fn rejects_corrupt_body() {
        let mut frame = vec![0, 1, 1, 2, 0, 0, 0, 3];
        frame.extend_from_slice(&[0xff, 0xff, 0xff]);
        let mut reader = frame.as_slice();

        assert!(read_frame(&mut reader).await.is_err());
    }
}
