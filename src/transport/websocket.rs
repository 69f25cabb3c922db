//! WebSocket framing (hybi-17 subset) and the WebSocket protocol handler.
//!
//! Only what a debugging frontend needs is supported: unfragmented text
//! frames and the close handshake. Everything else (binary, continuation,
//! ping/pong, extensions) is a protocol error and ends the connection.

use super::connection::Connection;
use thiserror::Error;
use tracing::{debug, warn};

pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;
pub const OPCODE_PING: u8 = 0x9;
pub const OPCODE_PONG: u8 = 0xA;

const FINAL_BIT: u8 = 0x80;
const RESERVED1_BIT: u8 = 0x40;
const RESERVED2_BIT: u8 = 0x20;
const RESERVED3_BIT: u8 = 0x10;
const OPCODE_MASK: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const PAYLOAD_LENGTH_MASK: u8 = 0x7F;

const MAX_SINGLE_BYTE_PAYLOAD_LENGTH: usize = 125;
const TWO_BYTE_PAYLOAD_LENGTH_FIELD: u8 = 126;
const EIGHT_BYTE_PAYLOAD_LENGTH_FIELD: u8 = 127;
const MASKING_KEY_WIDTH: usize = 4;
const MAX_PAYLOAD_LENGTH: u64 = 0x7FFF_FFFF_FFFF_FFFF;

/// Close frame with no status code, sent by both sides of the handshake.
pub const CLOSE_FRAME: [u8; 2] = [FINAL_BIT | OPCODE_CLOSE, 0x00];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("fragmented frames are not supported")]
    NotFinal,
    #[error("compressed frame received without negotiated extension")]
    Compressed,
    #[error("reserved bits set")]
    ReservedBits,
    #[error("unsupported opcode {0:#x}")]
    UnsupportedOpcode(u8),
    #[error("client frame is not masked")]
    Unmasked,
    #[error("payload length {0} too large")]
    TooLarge(u64),
    #[error("text payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Result of decoding the front of a receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameDecode {
    /// A complete text frame; `consumed` bytes can be dropped from the buffer.
    Text { payload: Vec<u8>, consumed: usize },
    /// The peer started (or answered) the close handshake.
    Close { consumed: usize },
    /// Not enough bytes yet; nothing was consumed.
    Incomplete,
    Error(FrameError),
}

/// XOR `data` with the repeating 4-byte key. Applying it twice is a no-op.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % MASKING_KEY_WIDTH];
    }
}

fn push_length(frame: &mut Vec<u8>, mask_bit: u8, len: usize) {
    if len <= MAX_SINGLE_BYTE_PAYLOAD_LENGTH {
        frame.push(mask_bit | len as u8);
    } else if len <= 0xFFFF {
        frame.push(mask_bit | TWO_BYTE_PAYLOAD_LENGTH_FIELD);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(mask_bit | EIGHT_BYTE_PAYLOAD_LENGTH_FIELD);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
}

/// Encode a server-to-client text frame. Server frames are never masked.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 10);
    frame.push(FINAL_BIT | OPCODE_TEXT);
    push_length(&mut frame, 0, payload.len());
    frame.extend_from_slice(payload);
    frame
}

/// Encode a masked client-to-server frame, as a frontend would send it.
pub fn encode_client_frame(opcode: u8, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 14);
    frame.push(FINAL_BIT | (opcode & OPCODE_MASK));
    push_length(&mut frame, MASK_BIT, payload.len());
    frame.extend_from_slice(&key);
    let start = frame.len();
    frame.extend_from_slice(payload);
    apply_mask(&mut frame[start..], key);
    frame
}

/// Decode the first frame in `buffer`.
///
/// With `client_frame` set the frame must carry a mask, as every frame
/// sent by a frontend must.
pub fn decode_frame(buffer: &[u8], client_frame: bool) -> FrameDecode {
    if buffer.len() < 2 {
        return FrameDecode::Incomplete;
    }

    let first = buffer[0];
    let second = buffer[1];

    if first & RESERVED1_BIT != 0 {
        return FrameDecode::Error(FrameError::Compressed);
    }
    if first & (RESERVED2_BIT | RESERVED3_BIT) != 0 {
        return FrameDecode::Error(FrameError::ReservedBits);
    }
    if first & FINAL_BIT == 0 {
        return FrameDecode::Error(FrameError::NotFinal);
    }

    let closed = match first & OPCODE_MASK {
        OPCODE_TEXT => false,
        OPCODE_CLOSE => true,
        other => return FrameDecode::Error(FrameError::UnsupportedOpcode(other)),
    };

    let masked = second & MASK_BIT != 0;
    if client_frame && !masked {
        return FrameDecode::Error(FrameError::Unmasked);
    }

    let mut pos = 2;
    let mut payload_length = u64::from(second & PAYLOAD_LENGTH_MASK);
    if payload_length > MAX_SINGLE_BYTE_PAYLOAD_LENGTH as u64 {
        let width = if payload_length == u64::from(TWO_BYTE_PAYLOAD_LENGTH_FIELD) {
            2
        } else {
            8
        };
        if buffer.len() < pos + width {
            return FrameDecode::Incomplete;
        }
        payload_length = buffer[pos..pos + width]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        pos += width;
    }

    let mask_width = if masked { MASKING_KEY_WIDTH } else { 0 };
    if payload_length > MAX_PAYLOAD_LENGTH
        || payload_length > (usize::MAX - pos - mask_width) as u64
    {
        return FrameDecode::Error(FrameError::TooLarge(payload_length));
    }
    let payload_length = payload_length as usize;

    let end = pos + mask_width + payload_length;
    if buffer.len() < end {
        return FrameDecode::Incomplete;
    }

    let mut payload = buffer[pos + mask_width..end].to_vec();
    if masked {
        let mut key = [0u8; 4];
        key.copy_from_slice(&buffer[pos..pos + MASKING_KEY_WIDTH]);
        apply_mask(&mut payload, key);
    }

    if closed {
        FrameDecode::Close { consumed: end }
    } else {
        FrameDecode::Text {
            payload,
            consumed: end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClosePhase {
    Open,
    /// We sent a close frame and wait for the peer to answer.
    CloseSent,
    Closed,
}

/// Protocol handler for an upgraded connection.
pub struct WsHandler {
    connection: Connection,
    buffer: Vec<u8>,
    phase: ClosePhase,
}

impl WsHandler {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            buffer: Vec::new(),
            phase: ClosePhase::Open,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ClosePhase::Closed
    }

    /// Feed received bytes; returns the text messages decoded from them.
    pub fn on_data(&mut self, data: &[u8]) -> Vec<String> {
        let mut messages = Vec::new();
        if self.is_closed() {
            return messages;
        }
        self.buffer.extend_from_slice(data);

        while !self.buffer.is_empty() {
            match decode_frame(&self.buffer, true) {
                FrameDecode::Text { payload, consumed } => {
                    self.buffer.drain(..consumed);
                    match String::from_utf8(payload) {
                        Ok(text) => messages.push(text),
                        Err(_) => {
                            self.protocol_error(FrameError::InvalidUtf8);
                            break;
                        }
                    }
                }
                FrameDecode::Close { .. } => {
                    self.buffer.clear();
                    self.close_frame_received();
                    break;
                }
                FrameDecode::Incomplete => break,
                FrameDecode::Error(e) => {
                    self.protocol_error(e);
                    break;
                }
            }
        }
        messages
    }

    pub fn on_eof(&mut self) {
        self.teardown();
    }

    pub fn write(&mut self, message: &[u8]) {
        if self.phase != ClosePhase::Open {
            debug!("Dropping {} byte message on closing socket", message.len());
            return;
        }
        if let Err(e) = self.connection.write_raw(encode_frame(message)) {
            debug!("WebSocket write failed: {}", e);
            self.teardown();
        }
    }

    /// Start the close handshake from our side.
    pub fn shutdown(&mut self) {
        if self.phase == ClosePhase::Open {
            debug!("Sending close frame to {:?}", self.connection.peer());
            self.phase = ClosePhase::CloseSent;
            if self.connection.write_raw(CLOSE_FRAME.to_vec()).is_err() {
                self.teardown();
            }
        }
    }

    /// Close without the handshake.
    pub fn terminate(&mut self) {
        self.teardown();
    }

    fn close_frame_received(&mut self) {
        match self.phase {
            ClosePhase::Open => {
                debug!("Peer {:?} started close handshake", self.connection.peer());
                // Reply in kind; the close below is queued behind the reply.
                let _ = self.connection.write_raw(CLOSE_FRAME.to_vec());
                self.teardown();
            }
            ClosePhase::CloseSent => self.teardown(),
            ClosePhase::Closed => {}
        }
    }

    fn protocol_error(&mut self, error: FrameError) {
        warn!(
            "WebSocket protocol error from {:?}: {}",
            self.connection.peer(),
            error
        );
        self.buffer.clear();
        self.teardown();
    }

    fn teardown(&mut self) {
        self.phase = ClosePhase::Closed;
        self.connection.close();
    }
}
