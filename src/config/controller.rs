use super::{Address, AesKey, DEFAULT_CONTROLLER_ADDRESS, DEFAULT_PAIRING_TIMEOUT_MS};

/// Controller configuration
///
/// The system key is the 128-bit group secret pushed to peripherals at
/// pairing time. It must be injected before any pairing can start.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Controller address used as the source of every outbound frame
    pub controller_address: Address,
    /// 2W system key (required before pairing)
    pub system_key: Option<AesKey>,
    /// Deadline for a whole pairing session in milliseconds
    pub pairing_timeout_ms: u32,
}

impl ControllerConfig {
    /// Create a configuration with the given controller address
    pub fn new(controller_address: Address) -> Self {
        Self {
            controller_address,
            system_key: None,
            pairing_timeout_ms: DEFAULT_PAIRING_TIMEOUT_MS,
        }
    }

    /// Set the system key at construction time
    pub fn with_system_key(mut self, key: AesKey) -> Self {
        self.system_key = Some(key);
        self
    }

    /// Override the pairing deadline
    pub fn with_pairing_timeout(mut self, timeout_ms: u32) -> Self {
        self.pairing_timeout_ms = timeout_ms;
        self
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROLLER_ADDRESS)
    }
}
