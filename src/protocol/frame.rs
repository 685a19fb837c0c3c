//! Link-layer frame codec
//!
//! A frame on the air is a 9-byte header (two control bytes, source and
//! target addresses, command byte), up to 21 payload bytes, and a 16-bit
//! CRC. Both control bytes are bit-packed; `msg_len` counts everything
//! after the first control byte, so an empty-payload frame carries
//! `msg_len == 8`.

use heapless::Vec;

use crate::config::Address;

/// Fixed header length (pre-payload, pre-CRC)
pub const HEADER_LEN: usize = 9;

/// Maximum payload length enforced on decode
pub const MAX_PAYLOAD: usize = 21;

/// CRC trailer length
pub const CRC_LEN: usize = 2;

/// Largest possible on-air frame
pub const MAX_FRAME: usize = HEADER_LEN + MAX_PAYLOAD + CRC_LEN;

/// Frame codec error
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameError {
    /// Trailing CRC does not match the frame contents
    BadCrc,
    /// Buffer too short to hold a header and CRC
    TooShort,
    /// Payload longer than the link layer allows
    PayloadTooLong,
    /// `msg_len` disagrees with the byte count on the wire
    LengthMismatch,
}

/// First control byte: `{msg_len:5, protocol:1, start_frame:1, end_frame:1}`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ctrl1 {
    /// Byte count after this control byte (8 + payload length)
    pub msg_len: u8,
    /// Protocol selector bit
    pub protocol: bool,
    /// First fragment of a logical message
    pub start_frame: bool,
    /// Last fragment of a logical message
    pub end_frame: bool,
}

impl Ctrl1 {
    fn to_byte(self) -> u8 {
        let mut byte = self.msg_len & 0x1F;
        if self.protocol {
            byte |= 0x20;
        }
        if self.start_frame {
            byte |= 0x40;
        }
        if self.end_frame {
            byte |= 0x80;
        }
        byte
    }

    fn from_byte(byte: u8) -> Self {
        Self {
            msg_len: byte & 0x1F,
            protocol: (byte & 0x20) != 0,
            start_frame: (byte & 0x40) != 0,
            end_frame: (byte & 0x80) != 0,
        }
    }
}

/// Second control byte: link flags
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Ctrl2 {
    /// Protocol version (2 bits)
    pub version: u8,
    /// Beacon flag
    pub beacon: bool,
    /// Routed flag
    pub routed: bool,
    /// Low-power mode: receiver wakes from deep sleep for this frame
    pub low_power: bool,
    /// Acknowledge request
    pub ack: bool,
    /// Priority flag
    pub prio: bool,
}

impl Ctrl2 {
    fn to_byte(self) -> u8 {
        let mut byte = self.version & 0x03;
        if self.beacon {
            byte |= 0x04;
        }
        if self.routed {
            byte |= 0x08;
        }
        if self.low_power {
            byte |= 0x10;
        }
        if self.ack {
            byte |= 0x20;
        }
        if self.prio {
            byte |= 0x40;
        }
        byte
    }

    fn from_byte(byte: u8) -> Self {
        Self {
            version: byte & 0x03,
            beacon: (byte & 0x04) != 0,
            routed: (byte & 0x08) != 0,
            low_power: (byte & 0x10) != 0,
            ack: (byte & 0x20) != 0,
            prio: (byte & 0x40) != 0,
        }
    }
}

/// A decoded link-layer frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// First control byte
    pub ctrl1: Ctrl1,
    /// Second control byte
    pub ctrl2: Ctrl2,
    /// Sender address
    pub source: Address,
    /// Receiver address (unicast or broadcast)
    pub target: Address,
    /// Command byte
    pub cmd: u8,
    /// Command payload
    pub payload: Vec<u8, MAX_PAYLOAD>,
}

impl Frame {
    /// Build a single-fragment frame with `msg_len` derived from the payload
    pub fn new(source: Address, target: Address, cmd: u8, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLong);
        }
        let mut buffer = Vec::new();
        buffer.extend_from_slice(payload).map_err(|_| FrameError::PayloadTooLong)?;
        Ok(Self {
            ctrl1: Ctrl1 {
                msg_len: (HEADER_LEN - 1 + payload.len()) as u8,
                protocol: false,
                start_frame: true,
                end_frame: true,
            },
            ctrl2: Ctrl2::default(),
            source,
            target,
            cmd,
            payload: buffer,
        })
    }

    /// Serialize to on-air bytes, CRC appended
    pub fn encode(&self) -> Vec<u8, MAX_FRAME> {
        let mut buffer: Vec<u8, MAX_FRAME> = Vec::new();
        // Infallible: MAX_FRAME bounds header + payload + CRC by construction
        let _ = buffer.push(self.ctrl1.to_byte());
        let _ = buffer.push(self.ctrl2.to_byte());
        let _ = buffer.extend_from_slice(&self.source);
        let _ = buffer.extend_from_slice(&self.target);
        let _ = buffer.push(self.cmd);
        let _ = buffer.extend_from_slice(&self.payload);
        let crc = compute_crc(&buffer);
        let _ = buffer.push((crc & 0xFF) as u8);
        let _ = buffer.push((crc >> 8) as u8);
        buffer
    }

    /// Parse on-air bytes, verifying CRC and length fields
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN + CRC_LEN {
            return Err(FrameError::TooShort);
        }

        let body = &bytes[..bytes.len() - CRC_LEN];
        let crc = compute_crc(body);
        let wire_crc = u16::from_le_bytes([bytes[bytes.len() - 2], bytes[bytes.len() - 1]]);
        if crc != wire_crc {
            return Err(FrameError::BadCrc);
        }

        let ctrl1 = Ctrl1::from_byte(body[0]);
        let payload_len = body.len() - HEADER_LEN;
        if payload_len > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLong);
        }
        if ctrl1.msg_len as usize != HEADER_LEN - 1 + payload_len {
            return Err(FrameError::LengthMismatch);
        }

        let mut payload = Vec::new();
        payload
            .extend_from_slice(&body[HEADER_LEN..])
            .map_err(|_| FrameError::PayloadTooLong)?;

        Ok(Self {
            ctrl1,
            ctrl2: Ctrl2::from_byte(body[1]),
            source: [body[2], body[3], body[4]],
            target: [body[5], body[6], body[7]],
            cmd: body[8],
            payload,
        })
    }
}

/// Compute the link-layer CRC-16 (reflected 0x8408, zero init, appended
/// low byte first on the wire)
pub fn compute_crc(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in bytes {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
