//! In-memory registry of known 2W peripherals
//!
//! The registry is the single owner of device records and the authoritative
//! holder of pairing state. All access happens on the scheduler thread, so
//! records are mutated through plain `&mut` borrows, never shared.

use core::fmt::Write as _;

use heapless::{FnvIndexMap, String, Vec};
use log::{debug, info, warn};

use crate::config::{Address, AesKey};
use crate::crypto::CHALLENGE_SIZE;
use crate::protocol::commands::DiscoveryAnswer;

/// Registry capacity (power of two for the index map)
pub const MAX_DEVICES: usize = 16;

/// Largest retained outbound command (command byte plus payload)
pub const MAX_COMMAND_LEN: usize = 32;

/// Device name length on the wire
pub const NAME_LEN: usize = 16;

/// General Info 1 block length
pub const INFO1_LEN: usize = 14;

/// General Info 2 block length
pub const INFO2_LEN: usize = 16;

/// Pairing lifecycle of a peripheral
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PairingState {
    /// Not yet paired
    Unpaired,
    /// Discovery broadcast sent, waiting for 0x29
    Discovering,
    /// Alive check sent, waiting for 0x2D
    AliveCheck,
    /// Broadcasting 0x2A (dialect B)
    Broadcasting2A,
    /// 0x2A broadcasts done, 0x36 sent (dialect B)
    WaitingBeforeLearning,
    /// Learning mode entered, waiting for the peripheral's move
    LearningMode,
    /// We challenged the peripheral, waiting for 0x3D
    ChallengeSent,
    /// Peripheral challenged us and was answered
    ChallengeReceived,
    /// Pairing confirmed (0x2F), key transfer in flight
    PairingConfirmed,
    /// Key transfer acknowledged, gathering device info
    KeyExchanged,
    /// Fully paired and operational
    Paired,
    /// Pairing failed (terminal until a new attempt)
    PairingFailed,
}

impl PairingState {
    /// True while a pairing session is progressing
    pub fn is_pairing(self) -> bool {
        !matches!(
            self,
            PairingState::Unpaired | PairingState::Paired | PairingState::PairingFailed
        )
    }

    /// Canonical name, used for display and persistence
    pub fn as_str(self) -> &'static str {
        match self {
            PairingState::Unpaired => "UNPAIRED",
            PairingState::Discovering => "DISCOVERING",
            PairingState::AliveCheck => "ALIVE_CHECK",
            PairingState::Broadcasting2A => "BROADCASTING_2A",
            PairingState::WaitingBeforeLearning => "WAITING_BEFORE_LEARNING",
            PairingState::LearningMode => "LEARNING_MODE",
            PairingState::ChallengeSent => "CHALLENGE_SENT",
            PairingState::ChallengeReceived => "CHALLENGE_RECEIVED",
            PairingState::PairingConfirmed => "PAIRING_CONFIRMED",
            PairingState::KeyExchanged => "KEY_EXCHANGED",
            PairingState::Paired => "PAIRED",
            PairingState::PairingFailed => "PAIRING_FAILED",
        }
    }
}

/// Decoded multi-info byte from the discovery answer
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MultiInfo {
    /// Actuator turnaround time class (2 bits)
    pub actuator_turnaround_time: u8,
    /// Synchronized control group member
    pub sync_ctrl_grp: bool,
    /// RF support flag
    pub rf_support: bool,
    /// IO membership class (2 bits)
    pub io_membership: u8,
    /// Power save mode class (2 bits)
    pub power_save_mode: u8,
    /// Raw byte as received
    pub raw: u8,
}

impl MultiInfo {
    /// Decode the wire byte
    pub fn from_byte(byte: u8) -> Self {
        Self {
            actuator_turnaround_time: byte & 0x03,
            sync_ctrl_grp: (byte & 0x04) != 0,
            rf_support: (byte & 0x08) != 0,
            io_membership: (byte >> 4) & 0x03,
            power_save_mode: (byte >> 6) & 0x03,
            raw: byte,
        }
    }
}

/// Peripheral capabilities gathered during pairing
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Node type (10 bits)
    pub node_type: u16,
    /// Node subtype (6 bits)
    pub node_subtype: u8,
    /// Manufacturer id
    pub manufacturer: u8,
    /// Decoded multi-info byte
    pub multi_info: MultiInfo,
    /// Peripheral timestamp from discovery
    pub timestamp: u16,
    /// Device name (from 0x51)
    pub name: String<NAME_LEN>,
    /// General Info 1 block (from 0x55)
    pub general_info1: [u8; INFO1_LEN],
    /// General Info 1 received
    pub has_general_info1: bool,
    /// General Info 2 block (from 0x57)
    pub general_info2: [u8; INFO2_LEN],
    /// General Info 2 received
    pub has_general_info2: bool,
}

/// One known peripheral and its cryptographic state
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Peripheral address, never mutated after creation
    pub address: Address,
    /// Current pairing state
    pub pairing_state: PairingState,
    /// 2W system key as pushed during pairing
    pub system_key: AesKey,
    /// System key present
    pub has_system_key: bool,
    /// Derived session key (reserved, unused on the 2W path)
    pub session_key: AesKey,
    /// Session key present
    pub has_session_key: bool,
    /// Encrypted payload of the key transfer, kept for audit
    pub stack_key: AesKey,
    /// Stack key present
    pub has_stack_key: bool,
    /// Most recent challenge from the peripheral
    pub last_challenge: [u8; CHALLENGE_SIZE],
    /// Response emitted for the last challenge
    pub last_response: [u8; CHALLENGE_SIZE],
    /// A challenge is awaiting its 0x3D answer
    pub has_pending_challenge: bool,
    /// Most recent outbound command (command byte plus payload)
    pub last_command: Vec<u8, MAX_COMMAND_LEN>,
    /// Command byte of the most recent outbound command
    pub last_command_byte: u8,
    /// Capabilities gathered during pairing
    pub capabilities: Capabilities,
    /// Monotonic timestamp of the last frame from this peripheral
    pub last_seen: u32,
    /// Monotonic timestamp of the pairing start
    pub pairing_start_time: u32,
    /// Rolling command sequence number
    pub sequence_number: u16,
}

impl DeviceRecord {
    /// Create an unpaired record for `address`
    pub fn new(address: Address) -> Self {
        Self {
            address,
            pairing_state: PairingState::Unpaired,
            system_key: [0; 16],
            has_system_key: false,
            session_key: [0; 16],
            has_session_key: false,
            stack_key: [0; 16],
            has_stack_key: false,
            last_challenge: [0; CHALLENGE_SIZE],
            last_response: [0; CHALLENGE_SIZE],
            has_pending_challenge: false,
            last_command: Vec::new(),
            last_command_byte: 0,
            capabilities: Capabilities::default(),
            last_seen: 0,
            pairing_start_time: 0,
            sequence_number: 0,
        }
    }

    /// Lowercase hex form of the address
    pub fn address_hex(&self) -> String<6> {
        address_hex(&self.address)
    }

    /// Update the last-seen timestamp
    pub fn touch(&mut self, now: u32) {
        self.last_seen = now;
    }

    /// True while a pairing session is progressing on this record
    pub fn is_pairing(&self) -> bool {
        self.pairing_state.is_pairing()
    }

    /// Whether the pairing deadline has passed
    pub fn pairing_timed_out(&self, now: u32, timeout_ms: u32) -> bool {
        self.is_pairing() && now.wrapping_sub(self.pairing_start_time) > timeout_ms
    }

    /// Remember an outbound command for later challenge authentication
    pub fn store_command(&mut self, cmd: u8, payload: &[u8]) {
        self.last_command.clear();
        let _ = self.last_command.push(cmd);
        let take = payload.len().min(MAX_COMMAND_LEN - 1);
        let _ = self.last_command.extend_from_slice(&payload[..take]);
        self.last_command_byte = cmd;
    }

    fn zeroize_keys(&mut self) {
        self.system_key = [0; 16];
        self.has_system_key = false;
        self.session_key = [0; 16];
        self.has_session_key = false;
        self.stack_key = [0; 16];
        self.has_stack_key = false;
    }
}

/// Lowercase hex form of a 3-byte address
pub fn address_hex(address: &Address) -> String<6> {
    let mut s = String::new();
    for byte in address {
        let _ = write!(s, "{:02x}", byte);
    }
    s
}

/// Lowercase hex form of a 16-byte key, as handed to persistence
pub fn key_hex(key: &AesKey) -> String<32> {
    let mut s = String::new();
    for byte in key {
        let _ = write!(s, "{:02x}", byte);
    }
    s
}

/// Persistence collaborator error
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersistError;

/// Durable storage collaborator
///
/// Called with a completed record before any further outbound command
/// targets the device. The collaborator owns the on-disk representation
/// (a JSON object keyed by the lowercase-hex address, key material as
/// 32-char lowercase hex); the registry never reads it back.
pub trait Persistence {
    /// Store a snapshot of `record`
    fn persist(&mut self, record: &DeviceRecord) -> Result<(), PersistError>;
}

/// Persistence sink that drops every snapshot; for tests and RAM-only use
#[derive(Debug, Default)]
pub struct NullPersistence;

impl Persistence for NullPersistence {
    fn persist(&mut self, _record: &DeviceRecord) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Registry error
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegistryError {
    /// No record for the given address
    NotFound,
    /// Payload too short for the record field it updates
    Malformed,
    /// Registry is at capacity
    Full,
    /// Another record is already mid-pairing
    PairingBusy,
    /// Persistence collaborator failed
    Persist(PersistError),
}

/// The device registry
pub struct Registry<P: Persistence> {
    devices: FnvIndexMap<Address, DeviceRecord, MAX_DEVICES>,
    persistence: P,
}

impl<P: Persistence> Registry<P> {
    /// Create an empty registry around a persistence collaborator
    pub fn new(persistence: P) -> Self {
        Self {
            devices: FnvIndexMap::new(),
            persistence,
        }
    }

    /// Look up a record
    pub fn get(&self, address: &Address) -> Option<&DeviceRecord> {
        self.devices.get(address)
    }

    /// Look up a record for mutation
    pub fn get_mut(&mut self, address: &Address) -> Option<&mut DeviceRecord> {
        self.devices.get_mut(address)
    }

    /// Add a record if missing, returning a mutable borrow either way
    pub fn add(&mut self, address: Address) -> Result<&mut DeviceRecord, RegistryError> {
        if !self.devices.contains_key(&address) {
            let record = DeviceRecord::new(address);
            self.devices
                .insert(address, record)
                .map_err(|_| RegistryError::Full)?;
            info!("registry: added device {}", address_hex(&address));
        }
        self.devices.get_mut(&address).ok_or(RegistryError::NotFound)
    }

    /// Remove a record, zeroizing its key material
    pub fn remove(&mut self, address: &Address) -> Result<(), RegistryError> {
        match self.devices.get_mut(address) {
            Some(record) => {
                record.zeroize_keys();
                self.devices.remove(address);
                info!("registry: removed device {}", address_hex(address));
                Ok(())
            }
            None => Err(RegistryError::NotFound),
        }
    }

    /// Iterate over all records
    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    /// Iterate over records in a given state
    pub fn iter_by_state(&self, state: PairingState) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values().filter(move |r| r.pairing_state == state)
    }

    /// The record currently mid-pairing, if any
    pub fn find_in_pairing(&self) -> Option<&DeviceRecord> {
        self.devices.values().find(|r| r.is_pairing())
    }

    /// Number of known devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Begin pairing: creates the record if needed and marks it discovering
    ///
    /// At most one record may be mid-pairing at any instant.
    pub fn start_pairing(&mut self, address: Address, now: u32) -> Result<(), RegistryError> {
        if self
            .find_in_pairing()
            .is_some_and(|r| r.address != address)
        {
            return Err(RegistryError::PairingBusy);
        }
        let record = self.add(address)?;
        record.pairing_state = PairingState::Discovering;
        record.pairing_start_time = now;
        record.touch(now);
        info!("registry: pairing started for {}", address_hex(&address));
        Ok(())
    }

    /// Finish pairing: marks the record paired and persists it
    pub fn complete_pairing(&mut self, address: &Address) -> Result<(), RegistryError> {
        let record = self.devices.get_mut(address).ok_or(RegistryError::NotFound)?;
        record.pairing_state = PairingState::Paired;
        info!("registry: pairing completed for {}", address_hex(address));
        self.persistence
            .persist(record)
            .map_err(RegistryError::Persist)
    }

    /// Abort pairing: marks the record failed (it is not deleted)
    pub fn fail_pairing(&mut self, address: &Address) -> Result<(), RegistryError> {
        let record = self.devices.get_mut(address).ok_or(RegistryError::NotFound)?;
        record.pairing_state = PairingState::PairingFailed;
        warn!("registry: pairing failed for {}", address_hex(address));
        Ok(())
    }

    /// Update capabilities from a parsed 0x29 discovery answer
    pub fn update_from_discovery(
        &mut self,
        address: &Address,
        answer: &DiscoveryAnswer,
        now: u32,
    ) -> Result<(), RegistryError> {
        let record = self.devices.get_mut(address).ok_or(RegistryError::NotFound)?;
        record.capabilities.node_type = answer.node_type;
        record.capabilities.node_subtype = answer.node_subtype;
        record.capabilities.manufacturer = answer.manufacturer;
        record.capabilities.multi_info = MultiInfo::from_byte(answer.multi_info);
        record.capabilities.timestamp = answer.timestamp;
        record.touch(now);
        debug!(
            "registry: discovery info for {} type {} subtype {}",
            address_hex(address),
            answer.node_type,
            answer.node_subtype
        );
        Ok(())
    }

    /// Store the device name from a 0x51 answer (NUL-trimmed ASCII)
    pub fn update_from_name(&mut self, address: &Address, raw: &[u8], now: u32) -> Result<(), RegistryError> {
        let record = self.devices.get_mut(address).ok_or(RegistryError::NotFound)?;
        record.capabilities.name.clear();
        for &byte in raw.iter().take(NAME_LEN) {
            if byte == 0 {
                break;
            }
            let _ = record.capabilities.name.push(byte as char);
        }
        record.touch(now);
        Ok(())
    }

    /// Store the General Info 1 block from a 0x55 answer
    pub fn update_from_info1(&mut self, address: &Address, raw: &[u8], now: u32) -> Result<(), RegistryError> {
        if raw.len() < INFO1_LEN {
            return Err(RegistryError::Malformed);
        }
        let record = self.devices.get_mut(address).ok_or(RegistryError::NotFound)?;
        record.capabilities.general_info1.copy_from_slice(&raw[..INFO1_LEN]);
        record.capabilities.has_general_info1 = true;
        record.touch(now);
        Ok(())
    }

    /// Store the General Info 2 block from a 0x57 answer
    pub fn update_from_info2(&mut self, address: &Address, raw: &[u8], now: u32) -> Result<(), RegistryError> {
        if raw.len() < INFO2_LEN {
            return Err(RegistryError::Malformed);
        }
        let record = self.devices.get_mut(address).ok_or(RegistryError::NotFound)?;
        record.capabilities.general_info2.copy_from_slice(&raw[..INFO2_LEN]);
        record.capabilities.has_general_info2 = true;
        record.touch(now);
        Ok(())
    }

    /// Record a challenge received from the peripheral
    pub fn store_challenge(
        &mut self,
        address: &Address,
        challenge: &[u8; CHALLENGE_SIZE],
        now: u32,
    ) -> Result<(), RegistryError> {
        let record = self.devices.get_mut(address).ok_or(RegistryError::NotFound)?;
        record.last_challenge = *challenge;
        record.has_pending_challenge = true;
        record.touch(now);
        Ok(())
    }

    /// Record the response emitted for the pending challenge, clearing it
    pub fn store_response(
        &mut self,
        address: &Address,
        response: &[u8; CHALLENGE_SIZE],
        now: u32,
    ) -> Result<(), RegistryError> {
        let record = self.devices.get_mut(address).ok_or(RegistryError::NotFound)?;
        record.last_response = *response;
        record.has_pending_challenge = false;
        record.touch(now);
        Ok(())
    }

    /// Store the system key pushed to the peripheral
    pub fn store_system_key(&mut self, address: &Address, key: &AesKey, now: u32) -> Result<(), RegistryError> {
        let record = self.devices.get_mut(address).ok_or(RegistryError::NotFound)?;
        record.system_key = *key;
        record.has_system_key = true;
        record.touch(now);
        Ok(())
    }

    /// Store the encrypted key-transfer payload for audit
    pub fn store_stack_key(&mut self, address: &Address, key: &AesKey, now: u32) -> Result<(), RegistryError> {
        let record = self.devices.get_mut(address).ok_or(RegistryError::NotFound)?;
        record.stack_key = *key;
        record.has_stack_key = true;
        record.touch(now);
        Ok(())
    }

    /// Store a derived session key (reserved on the 2W path)
    pub fn store_session_key(&mut self, address: &Address, key: &AesKey, now: u32) -> Result<(), RegistryError> {
        let record = self.devices.get_mut(address).ok_or(RegistryError::NotFound)?;
        record.session_key = *key;
        record.has_session_key = true;
        record.touch(now);
        Ok(())
    }

    /// Mark every record whose pairing deadline expired as failed
    pub fn sweep_timed_out(&mut self, now: u32, timeout_ms: u32) {
        for record in self.devices.values_mut() {
            if record.pairing_timed_out(now, timeout_ms) {
                record.pairing_state = PairingState::PairingFailed;
                warn!("registry: pairing timeout for {}", address_hex(&record.address));
            }
        }
    }

    /// Drop every record, zeroizing key material first
    pub fn clear(&mut self) {
        for record in self.devices.values_mut() {
            record.zeroize_keys();
        }
        self.devices.clear();
    }
}
