//! Authenticated command gateway
//!
//! Issues unsolicited commands to paired peripherals and answers the
//! mid-command challenges they raise. Every actuator command is subject to
//! a challenge/response: the peripheral sends a 6-byte challenge (0x3C)
//! and expects a MAC (0x3D) computed over the command byte being
//! authenticated, keyed by the device's system key.

use heapless::Deque;
use log::{debug, info, warn};

use crate::config::Address;
use crate::crypto::{self, CHALLENGE_SIZE};
use crate::pairing::{Dispatch, BUSY_RETRY_MS};
use crate::protocol::commands::{
    Command, PLUG_OFF_PAYLOAD, PLUG_ON_PAYLOAD, STATUS_QUERY_PAYLOAD,
};
use crate::protocol::frame::Frame;
use crate::radio::{GatewayError, Radio, RadioGateway, SendOptions};
use crate::registry::{address_hex, PairingState, Persistence, Registry};

/// Queued events surfaced to the operator layer
pub const EVENT_QUEUE_DEPTH: usize = 4;

/// Longest status answer payload retained in an event
pub const MAX_STATUS_LEN: usize = 21;

/// Command gateway error
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandError<E> {
    /// No record for the given address
    UnknownDevice,
    /// The device is not paired
    NotPaired,
    /// Payload exceeds the link-layer bound
    PayloadTooLong,
    /// Transient: the radio is busy, try again
    RadioBusy,
    /// Driver failure
    Radio(E),
}

/// Event surfaced after a command exchange
#[derive(Debug, Clone, PartialEq)]
pub enum CommandEvent {
    /// The peripheral confirmed a command with a status answer (0x04)
    StatusConfirmed {
        /// Responding peripheral
        address: Address,
        /// Raw status payload
        payload: heapless::Vec<u8, MAX_STATUS_LEN>,
    },
}

struct PendingAuth {
    address: Address,
    mac: [u8; CHALLENGE_SIZE],
    next_attempt: u32,
}

/// Gateway for post-pairing authenticated commands
pub struct CommandGateway {
    controller_address: Address,
    events: Deque<CommandEvent, EVENT_QUEUE_DEPTH>,
    pending_auth: Option<PendingAuth>,
}

impl CommandGateway {
    /// Create the gateway
    pub fn new(controller_address: Address) -> Self {
        Self {
            controller_address,
            events: Deque::new(),
            pending_auth: None,
        }
    }

    /// Switch a plug peripheral on
    pub fn plug_on<P: Persistence, R: Radio>(
        &mut self,
        registry: &mut Registry<P>,
        gateway: &mut RadioGateway<R>,
        address: &Address,
        now: u32,
    ) -> Result<(), CommandError<R::Error>> {
        self.send_command(registry, gateway, address, Command::Actuator as u8, &PLUG_ON_PAYLOAD, now)
    }

    /// Switch a plug peripheral off
    pub fn plug_off<P: Persistence, R: Radio>(
        &mut self,
        registry: &mut Registry<P>,
        gateway: &mut RadioGateway<R>,
        address: &Address,
        now: u32,
    ) -> Result<(), CommandError<R::Error>> {
        self.send_command(registry, gateway, address, Command::Actuator as u8, &PLUG_OFF_PAYLOAD, now)
    }

    /// Query a peripheral's status; the answer arrives as an event
    pub fn query_status<P: Persistence, R: Radio>(
        &mut self,
        registry: &mut Registry<P>,
        gateway: &mut RadioGateway<R>,
        address: &Address,
        now: u32,
    ) -> Result<(), CommandError<R::Error>> {
        self.send_command(
            registry,
            gateway,
            address,
            Command::StatusQuery as u8,
            &STATUS_QUERY_PAYLOAD,
            now,
        )
    }

    /// Send an arbitrary command to a paired peripheral
    pub fn send_raw<P: Persistence, R: Radio>(
        &mut self,
        registry: &mut Registry<P>,
        gateway: &mut RadioGateway<R>,
        address: &Address,
        cmd: u8,
        payload: &[u8],
        now: u32,
    ) -> Result<(), CommandError<R::Error>> {
        self.send_command(registry, gateway, address, cmd, payload, now)
    }

    /// Drain one queued event
    pub fn poll_event(&mut self) -> Option<CommandEvent> {
        self.events.pop_front()
    }

    /// Offer an inbound frame to the gateway
    ///
    /// Only challenges and status answers from paired devices belong here.
    pub fn handle_inbound<P: Persistence, R: Radio>(
        &mut self,
        registry: &mut Registry<P>,
        gateway: &mut RadioGateway<R>,
        frame: &Frame,
        now: u32,
    ) -> Dispatch {
        let paired = registry
            .get(&frame.source)
            .is_some_and(|r| r.pairing_state == PairingState::Paired);
        if !paired {
            return Dispatch::Ignored;
        }

        match Command::from_byte(frame.cmd) {
            Some(Command::Challenge) => self.on_challenge(registry, gateway, frame, now),
            Some(Command::StatusAnswer) => self.on_status_answer(registry, frame, now),
            _ => Dispatch::Ignored,
        }
    }

    /// Retry a challenge answer that previously hit a busy radio
    pub fn tick<P: Persistence, R: Radio>(
        &mut self,
        registry: &mut Registry<P>,
        gateway: &mut RadioGateway<R>,
        now: u32,
    ) {
        let (address, mac) = match &self.pending_auth {
            Some(pending) if now.wrapping_sub(pending.next_attempt) < u32::MAX / 2 => {
                (pending.address, pending.mac)
            }
            _ => return,
        };
        match self.emit_answer(gateway, &address, &mac, now) {
            Ok(()) => {
                let _ = registry.store_response(&address, &mac, now);
                self.pending_auth = None;
            }
            Err(CommandError::RadioBusy) => {
                if let Some(pending) = &mut self.pending_auth {
                    pending.next_attempt = now.wrapping_add(BUSY_RETRY_MS);
                }
            }
            Err(_) => {
                warn!("command: dropping challenge answer after driver error");
                self.pending_auth = None;
            }
        }
    }

    fn on_challenge<P: Persistence, R: Radio>(
        &mut self,
        registry: &mut Registry<P>,
        gateway: &mut RadioGateway<R>,
        frame: &Frame,
        now: u32,
    ) -> Dispatch {
        if frame.payload.len() < CHALLENGE_SIZE {
            return Dispatch::Consumed;
        }

        let (key, cmd_byte, already_pending) = match registry.get(&frame.source) {
            Some(record) if record.has_system_key && !record.last_command.is_empty() => (
                record.system_key,
                record.last_command_byte,
                record.has_pending_challenge,
            ),
            _ => {
                warn!(
                    "command: challenge from {} without stored command",
                    address_hex(&frame.source)
                );
                return Dispatch::Consumed;
            }
        };
        if already_pending {
            debug!("command: challenge while one is already pending, ignored");
            return Dispatch::Consumed;
        }

        let mut challenge = [0u8; CHALLENGE_SIZE];
        challenge.copy_from_slice(&frame.payload[..CHALLENGE_SIZE]);
        let _ = registry.store_challenge(&frame.source, &challenge, now);

        // The MAC covers the command byte being authenticated, not the
        // answer's own command byte
        let mac = crypto::mac_2w(&challenge, &key, &[cmd_byte]);
        debug!(
            "command: answering challenge from {} for cmd 0x{:02x}",
            address_hex(&frame.source),
            cmd_byte
        );

        match self.emit_answer(gateway, &frame.source, &mac, now) {
            Ok(()) => {
                let _ = registry.store_response(&frame.source, &mac, now);
            }
            Err(CommandError::RadioBusy) => {
                self.pending_auth = Some(PendingAuth {
                    address: frame.source,
                    mac,
                    next_attempt: now.wrapping_add(BUSY_RETRY_MS),
                });
            }
            Err(_) => {
                warn!("command: driver error while answering challenge");
            }
        }
        Dispatch::Consumed
    }

    fn on_status_answer<P: Persistence>(
        &mut self,
        registry: &mut Registry<P>,
        frame: &Frame,
        now: u32,
    ) -> Dispatch {
        if let Some(record) = registry.get_mut(&frame.source) {
            record.touch(now);
            record.has_pending_challenge = false;
        }
        info!("command: status confirmed by {}", address_hex(&frame.source));
        let mut payload = heapless::Vec::new();
        let take = frame.payload.len().min(MAX_STATUS_LEN);
        let _ = payload.extend_from_slice(&frame.payload[..take]);
        if self
            .events
            .push_back(CommandEvent::StatusConfirmed {
                address: frame.source,
                payload,
            })
            .is_err()
        {
            warn!("command: event queue full, status answer dropped");
        }
        Dispatch::Consumed
    }

    fn emit_answer<R: Radio>(
        &mut self,
        gateway: &mut RadioGateway<R>,
        address: &Address,
        mac: &[u8; CHALLENGE_SIZE],
        now: u32,
    ) -> Result<(), CommandError<R::Error>> {
        let frame = Frame::new(
            self.controller_address,
            *address,
            Command::ChallengeAnswer as u8,
            mac,
        )
        .map_err(|_| CommandError::PayloadTooLong)?;
        gateway
            .send(&frame, SendOptions::default(), now)
            .map_err(|err| match err {
                GatewayError::Busy => CommandError::RadioBusy,
                GatewayError::Radio(e) => CommandError::Radio(e),
            })
    }

    fn send_command<P: Persistence, R: Radio>(
        &mut self,
        registry: &mut Registry<P>,
        gateway: &mut RadioGateway<R>,
        address: &Address,
        cmd: u8,
        payload: &[u8],
        now: u32,
    ) -> Result<(), CommandError<R::Error>> {
        match registry.get(address) {
            Some(record) if record.pairing_state == PairingState::Paired => {}
            Some(_) => return Err(CommandError::NotPaired),
            None => return Err(CommandError::UnknownDevice),
        }

        let frame = Frame::new(self.controller_address, *address, cmd, payload)
            .map_err(|_| CommandError::PayloadTooLong)?;
        gateway.send(&frame, SendOptions::default(), now).map_err(|err| match err {
            GatewayError::Busy => CommandError::RadioBusy,
            GatewayError::Radio(e) => CommandError::Radio(e),
        })?;

        // Retained only after the send is accepted, so a later challenge
        // always authenticates what actually left the radio
        if let Some(record) = registry.get_mut(address) {
            record.store_command(cmd, payload);
            record.sequence_number = record.sequence_number.wrapping_add(1);
            record.touch(now);
        }
        info!(
            "command: sent 0x{:02x} to {}, authentication is automatic",
            cmd,
            address_hex(address)
        );
        Ok(())
    }
}
