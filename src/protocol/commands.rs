//! Wire command catalog
//!
//! Command bytes are wire-defined and reproduced bit-exact. The 2W pairing
//! and authentication traffic uses the 0x28..0x3D range; device information
//! queries live at 0x50..0x57.

use crate::config::Address;

/// Commands understood by the controller
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum Command {
    /// Actuator operation (plug on/off and friends)
    Actuator = 0x00,
    /// Status query
    StatusQuery = 0x03,
    /// Status answer
    StatusAnswer = 0x04,
    /// Wake/discovery broadcast
    Discover = 0x28,
    /// Discovery response
    DiscoverAnswer = 0x29,
    /// Legacy pairing broadcast (dialect B)
    LegacyPairBroadcast = 0x2A,
    /// Alive check request
    AliveRequest = 0x2C,
    /// Alive check response
    AliveAnswer = 0x2D,
    /// Learning mode
    LearnMode = 0x2E,
    /// Pairing confirmation / status
    PairingStatus = 0x2F,
    /// Ask the peripheral for a challenge (key push)
    AskChallenge = 0x31,
    /// Encrypted key transfer
    KeyTransfer = 0x32,
    /// Key transfer acknowledge
    KeyTransferAck = 0x33,
    /// Priority address request (dialect B)
    PriorityAddressRequest = 0x36,
    /// Priority address response (dialect B)
    PriorityAddressAnswer = 0x37,
    /// Challenge (either direction)
    Challenge = 0x3C,
    /// Challenge response carrying a 6-byte MAC
    ChallengeAnswer = 0x3D,
    /// Name request
    NameRequest = 0x50,
    /// Name answer (16 bytes ASCII)
    NameAnswer = 0x51,
    /// General Info 1 request
    Info1Request = 0x54,
    /// General Info 1 answer (14 bytes)
    Info1Answer = 0x55,
    /// General Info 2 request
    Info2Request = 0x56,
    /// General Info 2 answer (16 bytes)
    Info2Answer = 0x57,
    /// Error/status report from the peripheral
    ErrorStatus = 0xFE,
}

impl Command {
    /// Map a wire command byte to a known command
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Command::Actuator),
            0x03 => Some(Command::StatusQuery),
            0x04 => Some(Command::StatusAnswer),
            0x28 => Some(Command::Discover),
            0x29 => Some(Command::DiscoverAnswer),
            0x2A => Some(Command::LegacyPairBroadcast),
            0x2C => Some(Command::AliveRequest),
            0x2D => Some(Command::AliveAnswer),
            0x2E => Some(Command::LearnMode),
            0x2F => Some(Command::PairingStatus),
            0x31 => Some(Command::AskChallenge),
            0x32 => Some(Command::KeyTransfer),
            0x33 => Some(Command::KeyTransferAck),
            0x36 => Some(Command::PriorityAddressRequest),
            0x37 => Some(Command::PriorityAddressAnswer),
            0x3C => Some(Command::Challenge),
            0x3D => Some(Command::ChallengeAnswer),
            0x50 => Some(Command::NameRequest),
            0x51 => Some(Command::NameAnswer),
            0x54 => Some(Command::Info1Request),
            0x55 => Some(Command::Info1Answer),
            0x56 => Some(Command::Info2Request),
            0x57 => Some(Command::Info2Answer),
            0xFE => Some(Command::ErrorStatus),
            _ => None,
        }
    }
}

/// Pairing confirmation status meaning success
pub const PAIRING_STATUS_OK: u8 = 0x02;

/// 0xFE status: peripheral not ready (pairing button not held)
pub const STATUS_NOT_READY: u8 = 0x08;

/// 0xFE status: authentication rejected
pub const STATUS_AUTH_REJECTED: u8 = 0x76;

/// Learning mode payload
pub const LEARN_MODE_PAYLOAD: [u8; 1] = [0x02];

/// Plug ON template (CMD 0x00), observed from captured traffic
pub const PLUG_ON_PAYLOAD: [u8; 6] = [0x01, 0xE7, 0x00, 0x00, 0x00, 0x00];

/// Plug OFF template (CMD 0x00), observed from captured traffic
pub const PLUG_OFF_PAYLOAD: [u8; 6] = [0x01, 0xE7, 0xC8, 0x00, 0x00, 0x00];

/// Status query template (CMD 0x03)
pub const STATUS_QUERY_PAYLOAD: [u8; 3] = [0x03, 0x00, 0x00];

/// Parsed 0x29 discovery answer
///
/// Wire layout: node type and subtype packed big-endian as 10|6 bits,
/// the peripheral's own address, manufacturer id, multi-info byte, and a
/// 16-bit timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscoveryAnswer {
    /// Node type (10 bits)
    pub node_type: u16,
    /// Node subtype (6 bits)
    pub node_subtype: u8,
    /// Address echoed by the peripheral
    pub address: Address,
    /// Manufacturer id
    pub manufacturer: u8,
    /// Raw multi-info byte
    pub multi_info: u8,
    /// Peripheral timestamp
    pub timestamp: u16,
}

impl DiscoveryAnswer {
    /// Length of the 0x29 payload
    pub const LEN: usize = 9;

    /// Parse a 0x29 payload
    pub fn from_bytes(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::LEN {
            return None;
        }
        let packed = u16::from_be_bytes([payload[0], payload[1]]);
        Some(Self {
            node_type: (packed >> 6) & 0x03FF,
            node_subtype: (packed & 0x3F) as u8,
            address: [payload[2], payload[3], payload[4]],
            manufacturer: payload[5],
            multi_info: payload[6],
            timestamp: u16::from_be_bytes([payload[7], payload[8]]),
        })
    }
}
