//! RFC 6455 framing.
//!
//! [`FrameCodec`] plugs into `tokio_util::codec::Framed`. Clients mask every
//! outbound frame with a fresh random key; inbound frames are unmasked when
//! masked. [`MessageAssembler`] joins fragmented data frames and passes
//! control frames straight through.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::types::DEFAULT_MAX_FRAME_SIZE;

/// Largest control frame payload.
const MAX_CONTROL_PAYLOAD: usize = 125;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text.
    Text,
    /// Binary.
    Binary,
    /// Close.
    Close,
    /// Ping.
    Ping,
    /// Pong.
    Pong,
}

impl OpCode {
    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Close, ping and pong.
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A single wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Opcode.
    pub opcode: OpCode,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl Frame {
    /// Unfragmented text frame.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Text,
            payload: Bytes::from(text.into()),
        }
    }

    /// Unfragmented binary frame.
    #[must_use]
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Binary,
            payload: payload.into(),
        }
    }

    /// Ping.
    #[must_use]
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Ping,
            payload: payload.into(),
        }
    }

    /// Pong echoing `payload`.
    #[must_use]
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Pong,
            payload: payload.into(),
        }
    }

    /// Close with an optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let mut payload = BytesMut::new();
        if let Some(code) = code {
            payload.put_u16(code);
            let limit = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
            let mut end = limit;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            payload.put_slice(&reason.as_bytes()[..end]);
        }
        Self {
            fin: true,
            opcode: OpCode::Close,
            payload: payload.freeze(),
        }
    }

    /// Status code and reason of a close frame.
    #[must_use]
    pub fn close_details(&self) -> Option<(u16, String)> {
        if self.opcode != OpCode::Close || self.payload.len() < 2 {
            return None;
        }
        let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let reason = String::from_utf8_lossy(&self.payload[2..]).into_owned();
        Some((code, reason))
    }
}

/// Frame-level errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// RSV bits set without a negotiated extension.
    #[error("reserved bits set")]
    ReservedBits,
    /// Opcode outside RFC 6455.
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    /// Control frames may not be fragmented.
    #[error("fragmented control frame")]
    FragmentedControl,
    /// Control frames carry at most 125 bytes.
    #[error("control frame payload of {0} bytes")]
    ControlTooLong(usize),
    /// Payload over the configured maximum.
    #[error("frame of {size} bytes exceeds maximum of {max}")]
    TooLarge {
        /// Announced size.
        size: u64,
        /// Limit.
        max: usize,
    },
    /// Continuation without a started message, or a new message mid-fragment.
    #[error("unexpected continuation state")]
    UnexpectedContinuation,
    /// Text message is not UTF-8.
    #[error("invalid utf-8 in text message")]
    InvalidUtf8,
    /// Socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which end of the connection the codec serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Masks outbound frames.
    Client,
    /// Sends unmasked frames.
    Server,
}

/// RFC 6455 frame codec.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    role: Role,
    max_frame_size: usize,
}

impl FrameCodec {
    /// Codec for the given role.
    #[must_use]
    pub const fn new(role: Role, max_frame_size: usize) -> Self {
        Self {
            role,
            max_frame_size,
        }
    }

    /// Client codec with the default size limit.
    #[must_use]
    pub const fn client() -> Self {
        Self::new(Role::Client, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Server codec with the default size limit.
    #[must_use]
    pub const fn server() -> Self {
        Self::new(Role::Server, DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    #[allow(clippy::cast_possible_truncation)]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < 2 {
            return Ok(None);
        }
        let b0 = src[0];
        let b1 = src[1];
        let fin = b0 & 0x80 != 0;
        if b0 & 0x70 != 0 {
            return Err(FrameError::ReservedBits);
        }
        let opcode = OpCode::from_u8(b0 & 0x0F).ok_or(FrameError::UnknownOpcode(b0 & 0x0F))?;
        let masked = b1 & 0x80 != 0;

        let (payload_len, mut header_len) = match b1 & 0x7F {
            126 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([src[2], src[3]])), 4)
            }
            127 => {
                if src.len() < 10 {
                    return Ok(None);
                }
                let mut len = [0_u8; 8];
                len.copy_from_slice(&src[2..10]);
                (u64::from_be_bytes(len), 10)
            }
            n => (u64::from(n), 2),
        };

        if opcode.is_control() {
            if !fin {
                return Err(FrameError::FragmentedControl);
            }
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(FrameError::ControlTooLong(payload_len as usize));
            }
        }
        if payload_len > self.max_frame_size as u64 {
            return Err(FrameError::TooLarge {
                size: payload_len,
                max: self.max_frame_size,
            });
        }

        let mask = if masked {
            if src.len() < header_len + 4 {
                return Ok(None);
            }
            let key = [
                src[header_len],
                src[header_len + 1],
                src[header_len + 2],
                src[header_len + 3],
            ];
            header_len += 4;
            Some(key)
        } else {
            None
        };

        let payload_len = payload_len as usize;
        let total = header_len + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let mut payload = src.split_to(payload_len);
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let mask = match self.role {
            Role::Client => Some(rand::rng().random::<[u8; 4]>()),
            Role::Server => None,
        };
        encode_frame(&frame, mask, dst);
        Ok(())
    }
}

/// Serialize `frame` into `dst`, masking with `mask` when given.
#[allow(clippy::cast_possible_truncation)]
pub fn encode_frame(frame: &Frame, mask: Option<[u8; 4]>, dst: &mut BytesMut) {
    let len = frame.payload.len();
    dst.reserve(len + 14);

    let fin = if frame.fin { 0x80 } else { 0 };
    dst.put_u8(fin | frame.opcode.as_u8());

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    if len < 126 {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= usize::from(u16::MAX) {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(len as u64);
    }

    match mask {
        Some(key) => {
            dst.put_slice(&key);
            let start = dst.len();
            dst.put_slice(&frame.payload);
            apply_mask(&mut dst[start..], key);
        }
        None => dst.put_slice(&frame.payload),
    }
}

fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// A complete message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message.
    Text(String),
    /// Binary message.
    Binary(Bytes),
    /// Ping with payload.
    Ping(Bytes),
    /// Pong with payload.
    Pong(Bytes),
    /// Close with optional code and reason.
    Close(Option<(u16, String)>),
}

/// Joins fragmented data frames into messages.
#[derive(Debug)]
pub struct MessageAssembler {
    pending: Option<(OpCode, BytesMut)>,
    max_message_size: usize,
}

impl MessageAssembler {
    /// Assembler rejecting messages over `max_message_size`.
    #[must_use]
    pub const fn new(max_message_size: usize) -> Self {
        Self {
            pending: None,
            max_message_size,
        }
    }

    /// Feed a frame; returns a message once one is complete.
    ///
    /// # Errors
    ///
    /// Returns an error on continuation misuse, oversize messages or invalid UTF-8.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, FrameError> {
        match frame.opcode {
            OpCode::Ping => Ok(Some(Message::Ping(frame.payload))),
            OpCode::Pong => Ok(Some(Message::Pong(frame.payload))),
            OpCode::Close => Ok(Some(Message::Close(frame.close_details()))),
            OpCode::Text | OpCode::Binary => {
                if self.pending.is_some() {
                    return Err(FrameError::UnexpectedContinuation);
                }
                if frame.fin {
                    return Self::finish(frame.opcode, frame.payload).map(Some);
                }
                self.pending = Some((frame.opcode, BytesMut::from(&frame.payload[..])));
                Ok(None)
            }
            OpCode::Continuation => {
                let Some((opcode, mut buffer)) = self.pending.take() else {
                    return Err(FrameError::UnexpectedContinuation);
                };
                if buffer.len() + frame.payload.len() > self.max_message_size {
                    return Err(FrameError::TooLarge {
                        size: (buffer.len() + frame.payload.len()) as u64,
                        max: self.max_message_size,
                    });
                }
                buffer.extend_from_slice(&frame.payload);
                if frame.fin {
                    Self::finish(opcode, buffer.freeze()).map(Some)
                } else {
                    self.pending = Some((opcode, buffer));
                    Ok(None)
                }
            }
        }
    }

    /// Drop any partial message.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    fn finish(opcode: OpCode, payload: Bytes) -> Result<Message, FrameError> {
        if opcode == OpCode::Text {
            String::from_utf8(payload.to_vec())
                .map(Message::Text)
                .map_err(|_| FrameError::InvalidUtf8)
        } else {
            Ok(Message::Binary(payload))
        }
    }
}
