//! RFB message framing for an established session.
//!
//! [`RfbCodec`] decodes client-to-server messages and encodes the
//! server-to-client messages this server sends. Only the raw encoding
//! is produced.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use vncd_core::Rect;

use crate::error::ServerError;
use crate::rfb::pixel_format::{WIRE_LEN, WirePixelFormat};

/// Raw encoding number.
pub const ENCODING_RAW: i32 = 0;

/// Largest cut-text payload accepted from a client.
pub const MAX_CUT_TEXT: usize = 1 << 20;

// ── Messages ─────────────────────────────────────────────────────

/// A decoded client-to-server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SetPixelFormat(WirePixelFormat),
    SetEncodings(Vec<i32>),
    FramebufferUpdateRequest { incremental: bool, rect: Rect },
    KeyEvent { down: bool, keysym: u32 },
    PointerEvent { buttons: u8, x: u16, y: u16 },
    ClientCutText(String),
}

/// One rectangle of raw pixels, already in the client's format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRect {
    pub rect: Rect,
    pub pixels: Bytes,
}

/// A server-to-client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    FramebufferUpdate(Vec<RawRect>),
}

// ── RfbCodec ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RfbCodec;

impl RfbCodec {
    /// Bytes needed for the complete message at the front of `src`, or
    /// `None` when even that cannot be known yet.
    fn frame_len(src: &[u8]) -> Result<Option<usize>, ServerError> {
        let Some(&kind) = src.first() else {
            return Ok(None);
        };
        let len = match kind {
            0 => 4 + WIRE_LEN,
            2 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                4 + 4 * u16::from_be_bytes([src[2], src[3]]) as usize
            }
            3 => 10,
            4 => 8,
            5 => 6,
            6 => {
                if src.len() < 8 {
                    return Ok(None);
                }
                let text = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
                if text > MAX_CUT_TEXT {
                    return Err(ServerError::Protocol(format!("cut text of {text} bytes")));
                }
                8 + text
            }
            other => {
                return Err(ServerError::Protocol(format!("unknown message type {other}")));
            }
        };
        Ok(Some(len))
    }
}

impl Decoder for RfbCodec {
    type Item = ClientMessage;
    type Error = ServerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(len) = Self::frame_len(src)? else {
            return Ok(None);
        };
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let mut msg = src.split_to(len);
        let kind = msg.get_u8();
        let message = match kind {
            0 => {
                msg.advance(3);
                ClientMessage::SetPixelFormat(WirePixelFormat::decode(&mut msg))
            }
            2 => {
                msg.advance(1);
                let count = msg.get_u16();
                ClientMessage::SetEncodings((0..count).map(|_| msg.get_i32()).collect())
            }
            3 => {
                let incremental = msg.get_u8() != 0;
                let (x, y) = (msg.get_u16(), msg.get_u16());
                let (w, h) = (msg.get_u16(), msg.get_u16());
                ClientMessage::FramebufferUpdateRequest {
                    incremental,
                    rect: Rect::new(x as u32, y as u32, w as u32, h as u32),
                }
            }
            4 => {
                let down = msg.get_u8() != 0;
                msg.advance(2);
                ClientMessage::KeyEvent {
                    down,
                    keysym: msg.get_u32(),
                }
            }
            5 => ClientMessage::PointerEvent {
                buttons: msg.get_u8(),
                x: msg.get_u16(),
                y: msg.get_u16(),
            },
            _ => {
                msg.advance(7);
                // ISO 8859-1 maps one-to-one onto the first 256 code points.
                ClientMessage::ClientCutText(msg.iter().map(|&b| b as char).collect())
            }
        };
        Ok(Some(message))
    }
}

impl Encoder<ServerMessage> for RfbCodec {
    type Error = ServerError;

    fn encode(&mut self, item: ServerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            ServerMessage::FramebufferUpdate(rects) => {
                let count = u16::try_from(rects.len())
                    .map_err(|_| ServerError::Protocol("too many rectangles".into()))?;
                dst.reserve(4 + rects.iter().map(|r| 12 + r.pixels.len()).sum::<usize>());
                dst.put_u8(0);
                dst.put_u8(0);
                dst.put_u16(count);
                for raw in rects {
                    dst.put_u16(raw.rect.x as u16);
                    dst.put_u16(raw.rect.y as u16);
                    dst.put_u16(raw.rect.width as u16);
                    dst.put_u16(raw.rect.height as u16);
                    dst.put_i32(ENCODING_RAW);
                    dst.put_slice(&raw.pixels);
                }
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<ClientMessage> {
        let mut codec = RfbCodec;
        let mut buf = BytesMut::from(bytes);
        let mut out = Vec::new();
        while let Some(m) = codec.decode(&mut buf).unwrap() {
            out.push(m);
        }
        assert!(buf.is_empty());
        out
    }

    #[test]
    fn decodes_back_to_back_messages() {
        let mut bytes = vec![3, 1, 0, 10, 0, 20, 0, 30, 0, 40];
        bytes.extend_from_slice(&[4, 1, 0, 0, 0, 0, 0xff, 0x0d]);
        bytes.extend_from_slice(&[5, 0b101, 0x01, 0x00, 0x00, 0x02]);
        bytes.extend_from_slice(&[2, 0, 0, 2, 0, 0, 0, 0, 0xff, 0xff, 0xff, 0x21]);

        assert_eq!(
            decode_all(&bytes),
            vec![
                ClientMessage::FramebufferUpdateRequest {
                    incremental: true,
                    rect: Rect::new(10, 20, 30, 40),
                },
                ClientMessage::KeyEvent {
                    down: true,
                    keysym: 0xff0d,
                },
                ClientMessage::PointerEvent {
                    buttons: 0b101,
                    x: 256,
                    y: 2,
                },
                ClientMessage::SetEncodings(vec![0, -223]),
            ]
        );
    }

    #[test]
    fn partial_input_waits() {
        let mut codec = RfbCodec;
        let mut buf = BytesMut::from(&[3u8, 0, 0, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[0, 0, 0, 4, 0, 4]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn cut_text_is_latin1() {
        let mut bytes = vec![6, 0, 0, 0, 0, 0, 0, 3];
        bytes.extend_from_slice(&[b'a', 0xE9, b'z']);
        assert_eq!(
            decode_all(&bytes),
            vec![ClientMessage::ClientCutText("aéz".into())]
        );
    }

    #[test]
    fn unknown_type_is_an_error() {
        let mut codec = RfbCodec;
        let mut buf = BytesMut::from(&[42u8, 0, 0][..]);
        assert!(matches!(codec.decode(&mut buf), Err(ServerError::Protocol(_))));
    }

    #[test]
    fn oversized_cut_text_is_rejected() {
        let mut codec = RfbCodec;
        let mut buf = BytesMut::from(&[6u8, 0, 0, 0, 0xff, 0xff, 0xff, 0xff][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn encodes_raw_update() {
        let mut codec = RfbCodec;
        let mut dst = BytesMut::new();
        let update = ServerMessage::FramebufferUpdate(vec![RawRect {
            rect: Rect::new(1, 2, 1, 1),
            pixels: Bytes::from_static(&[9, 9, 9, 9]),
        }]);
        codec.encode(update, &mut dst).unwrap();
        assert_eq!(
            &dst[..],
            &[0, 0, 0, 1, 0, 1, 0, 2, 0, 1, 0, 1, 0, 0, 0, 0, 9, 9, 9, 9]
        );
    }
}
