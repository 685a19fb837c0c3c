/// Controller identity and runtime configuration
pub mod controller;

pub use controller::ControllerConfig;

/// Peripheral or controller address (3 bytes)
pub type Address = [u8; 3];
/// AES-128 key (16 bytes)
pub type AesKey = [u8; 16];

/// Address every 2W peripheral listens on for wake-up traffic
pub const BROADCAST_ADDRESS: Address = [0x00, 0x00, 0x3B];

/// Historical default controller address, overridable per build
pub const DEFAULT_CONTROLLER_ADDRESS: Address = [0xBA, 0x11, 0xAD];

/// Default deadline for a whole pairing session in milliseconds
pub const DEFAULT_PAIRING_TIMEOUT_MS: u32 = 30_000;
