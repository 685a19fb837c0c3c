/// The pairing state machine
pub mod engine;

pub use engine::{PairingEngine, PairingError};

/// Outcome of offering an inbound frame to a protocol component
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dispatch {
    /// The frame belongs to this component; no further dispatch
    Consumed,
    /// Not for this component; offer it elsewhere
    Ignored,
}

/// Discovery broadcast retry interval
pub const DISCOVERY_RETRY_MS: u32 = 500;

/// Wait between protocol states before re-asserting the last outbound
pub const STATE_WAIT_MS: u32 = 5_000;

/// Delay before (re-)requesting device info after the key exchange
pub const INFO_RETRY_MS: u32 = 1_000;

/// Spacing between legacy pairing broadcasts (dialect B)
pub const BROADCAST_2A_SPACING_MS: u32 = 200;

/// Number of legacy pairing broadcasts (dialect B)
pub const BROADCAST_2A_COUNT: u8 = 4;

/// Spacing between transparent send retries while the radio is busy
pub const BUSY_RETRY_MS: u32 = 100;

/// Send retries before the busy radio is reported
pub const BUSY_RETRY_MAX: u8 = 5;

/// Tolerated not-ready (0xFE/0x08) reports before the session fails
pub const NOT_READY_MAX: u8 = 6;

/// Extra hold time before a wake-up broadcast leaves the radio
pub const WAKEUP_DELAY_MS: u32 = 250;
