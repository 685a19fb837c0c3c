//! Top-level controller facade
//!
//! Owns the registry, the pairing engine, the command gateway, and the
//! radio gateway as plain services with caller-controlled lifecycle.
//! Scheduling is single-threaded and cooperative: call
//! [`Controller::process`] from the main loop at 10 Hz or faster; all
//! protocol progress happens there.

use log::debug;
use rand_core::RngCore;

use crate::command::{CommandError, CommandEvent, CommandGateway};
use crate::config::{Address, AesKey, ControllerConfig};
use crate::crypto::{self, SelfCheckError};
use crate::pairing::{Dispatch, PairingEngine, PairingError};
use crate::protocol::frame::Frame;
use crate::radio::{Radio, RadioGateway};
use crate::registry::{DeviceRecord, Persistence, Registry, RegistryError};

/// Controller initialization error
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitError<E> {
    /// The cryptographic kernel failed its startup self-check
    Crypto(SelfCheckError),
    /// The radio driver failed to initialize
    Radio(E),
}

/// The controller: one configured identity commanding many peripherals
pub struct Controller<R: Radio, P: Persistence, RNG: RngCore> {
    config: ControllerConfig,
    registry: Registry<P>,
    gateway: RadioGateway<R>,
    engine: PairingEngine<RNG>,
    commands: CommandGateway,
}

impl<R: Radio, P: Persistence, RNG: RngCore> Controller<R, P, RNG> {
    /// Build and initialize the controller
    ///
    /// Runs the crypto self-check first; a failure there is fatal and the
    /// controller refuses to start.
    pub fn new(
        radio: R,
        persistence: P,
        rng: RNG,
        config: ControllerConfig,
    ) -> Result<Self, InitError<R::Error>> {
        crypto::self_check().map_err(InitError::Crypto)?;

        let mut gateway = RadioGateway::new(radio);
        gateway.init().map_err(InitError::Radio)?;

        let mut engine = PairingEngine::new(
            config.controller_address,
            config.pairing_timeout_ms,
            rng,
        );
        if let Some(key) = config.system_key {
            engine.set_system_key(key);
        }

        Ok(Self {
            commands: CommandGateway::new(config.controller_address),
            registry: Registry::new(persistence),
            engine,
            gateway,
            config,
        })
    }

    /// Inject or replace the 2W system key
    pub fn set_system_key(&mut self, key: AesKey) {
        self.config.system_key = Some(key);
        self.engine.set_system_key(key);
    }

    /// Drive the protocol: inbound dispatch, engine, and radio
    pub fn process(&mut self, now: u32) {
        while let Ok(Some(frame)) = self.gateway.receive() {
            self.dispatch(&frame, now);
        }
        self.engine.tick(&mut self.registry, &mut self.gateway, now);
        self.commands.tick(&mut self.registry, &mut self.gateway, now);
        let _ = self.gateway.tick(now);
    }

    fn dispatch(&mut self, frame: &Frame, now: u32) {
        // The pairing engine filters first: during a session it consumes
        // everything from its peer
        if self.engine.handle_inbound(&mut self.registry, &mut self.gateway, frame, now)
            == Dispatch::Consumed
        {
            return;
        }
        if self.commands.handle_inbound(&mut self.registry, &mut self.gateway, frame, now)
            == Dispatch::Consumed
        {
            return;
        }
        debug!("controller: cmd 0x{:02x} not handled", frame.cmd);
    }

    /// Begin pairing a peripheral
    pub fn start_pairing(&mut self, address: Address, now: u32) -> Result<(), PairingError> {
        self.engine.start_pairing(&mut self.registry, address, now)
    }

    /// Cancel the active pairing session
    pub fn cancel_pairing(&mut self) {
        self.engine.cancel(&mut self.registry);
    }

    /// Arm auto-pair for the next unknown peripheral that answers discovery
    pub fn enable_auto_pair(&mut self) {
        self.engine.enable_auto_pair();
    }

    /// Disarm auto-pair
    pub fn disable_auto_pair(&mut self) {
        self.engine.disable_auto_pair();
    }

    /// Whether a pairing session is active
    pub fn pairing_active(&self) -> bool {
        self.engine.is_active()
    }

    /// Address of the peripheral currently being paired
    pub fn pairing_device(&self) -> Option<Address> {
        self.engine.current_device()
    }

    /// Iterate over all known peripherals
    pub fn devices(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.registry.iter()
    }

    /// Look up one peripheral
    pub fn device_info(&self, address: &Address) -> Option<&DeviceRecord> {
        self.registry.get(address)
    }

    /// Delete a peripheral, zeroizing its key material
    pub fn remove_device(&mut self, address: &Address) -> Result<(), RegistryError> {
        self.registry.remove(address)
    }

    /// Switch a plug peripheral on
    pub fn plug_on(&mut self, address: &Address, now: u32) -> Result<(), CommandError<R::Error>> {
        self.commands
            .plug_on(&mut self.registry, &mut self.gateway, address, now)
    }

    /// Switch a plug peripheral off
    pub fn plug_off(&mut self, address: &Address, now: u32) -> Result<(), CommandError<R::Error>> {
        self.commands
            .plug_off(&mut self.registry, &mut self.gateway, address, now)
    }

    /// Query a peripheral's status
    pub fn query_status(&mut self, address: &Address, now: u32) -> Result<(), CommandError<R::Error>> {
        self.commands
            .query_status(&mut self.registry, &mut self.gateway, address, now)
    }

    /// Send an arbitrary command to a paired peripheral
    pub fn send_raw(
        &mut self,
        address: &Address,
        cmd: u8,
        payload: &[u8],
        now: u32,
    ) -> Result<(), CommandError<R::Error>> {
        self.commands
            .send_raw(&mut self.registry, &mut self.gateway, address, cmd, payload, now)
    }

    /// Drain one command event
    pub fn poll_event(&mut self) -> Option<CommandEvent> {
        self.commands.poll_event()
    }

    /// Re-run the cryptographic self-check
    pub fn verify_crypto(&self) -> Result<(), SelfCheckError> {
        crypto::self_check()
    }
}
