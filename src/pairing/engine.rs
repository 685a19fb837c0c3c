//! The 2W pairing state machine
//!
//! Drives a single peripheral through discovery, learning, challenge
//! authentication, key transfer, and info gathering. All progress happens
//! from [`PairingEngine::handle_inbound`] or [`PairingEngine::tick`]; the
//! engine never blocks and never advances state before a send is accepted
//! by the radio gateway.
//!
//! Two peripheral dialects exist in the field. The canonical one (A)
//! answers learning mode with a challenge; the other (B) expects the
//! legacy pairing broadcast and a priority-address exchange, after which
//! the controller challenges the peripheral. The engine starts with A and
//! falls through to B on a priority-address answer or a state timeout.

use heapless::{Deque, Vec};
use log::{debug, info, warn};
use rand_core::RngCore;

use super::{
    Dispatch, BROADCAST_2A_COUNT, BROADCAST_2A_SPACING_MS, BUSY_RETRY_MAX, BUSY_RETRY_MS,
    DISCOVERY_RETRY_MS, INFO_RETRY_MS, NOT_READY_MAX, STATE_WAIT_MS, WAKEUP_DELAY_MS,
};
use crate::config::{Address, AesKey, BROADCAST_ADDRESS};
use crate::crypto::{self, CHALLENGE_SIZE};
use crate::protocol::commands::{
    Command, LEARN_MODE_PAYLOAD, PAIRING_STATUS_OK, STATUS_AUTH_REJECTED, STATUS_NOT_READY,
};
use crate::protocol::commands::DiscoveryAnswer;
use crate::protocol::frame::Frame;
use crate::radio::{Channel, GatewayError, Radio, RadioGateway, RadioState, SendOptions};
use crate::registry::{address_hex, PairingState, Persistence, Registry, RegistryError};

/// Longest frame data retained for challenge authentication
/// (command byte plus a wrapped key)
const AUTH_DATA_LEN: usize = 17;

/// Outbound queue depth; the protocol never stacks more than a key
/// transfer and its immediate authentication
const OUTBOX_DEPTH: usize = 4;

/// `start_pairing` error
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PairingError {
    /// Another session is already active
    AlreadyActive,
    /// No system key has been injected
    NoSystemKey,
    /// The registry is at capacity
    RegistryFull,
}

struct Outbound {
    frame: Frame,
    opts: SendOptions,
    // State entered once the gateway accepts the frame; the session never
    // advances while the radio refuses the send
    then_state: Option<PairingState>,
}

/// The pairing protocol engine
pub struct PairingEngine<RNG: RngCore> {
    rng: RNG,
    controller_address: Address,
    system_key: Option<AesKey>,
    pairing_timeout_ms: u32,

    active: bool,
    auto_pair: bool,
    peer: Address,
    last_step: u32,

    // Frame data of the most recent command subject to authentication
    auth_frame_data: Vec<u8, AUTH_DATA_LEN>,

    not_ready_count: u8,
    broadcasts_2a_left: u8,

    outbox: Deque<Outbound, OUTBOX_DEPTH>,
    busy_attempts: u8,
    last_send_attempt: u32,
}

impl<RNG: RngCore> PairingEngine<RNG> {
    /// Create an idle engine
    pub fn new(controller_address: Address, pairing_timeout_ms: u32, rng: RNG) -> Self {
        Self {
            rng,
            controller_address,
            system_key: None,
            pairing_timeout_ms,
            active: false,
            auto_pair: false,
            peer: [0; 3],
            last_step: 0,
            auth_frame_data: Vec::new(),
            not_ready_count: 0,
            broadcasts_2a_left: 0,
            outbox: Deque::new(),
            busy_attempts: 0,
            last_send_attempt: 0,
        }
    }

    /// Inject the 2W system key; required before any pairing
    pub fn set_system_key(&mut self, key: AesKey) {
        self.system_key = Some(key);
        info!("pairing: system key configured");
    }

    /// Whether a session is active
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Address of the peripheral currently being paired
    pub fn current_device(&self) -> Option<Address> {
        self.active.then_some(self.peer)
    }

    /// Arm auto-pair: the next discovery answer from an unknown
    /// peripheral starts a session for it. Self-clears on first use.
    pub fn enable_auto_pair(&mut self) {
        self.auto_pair = true;
        info!("pairing: auto-pair armed");
    }

    /// Disarm auto-pair
    pub fn disable_auto_pair(&mut self) {
        self.auto_pair = false;
    }

    /// Begin pairing `address`
    pub fn start_pairing<P: Persistence>(
        &mut self,
        registry: &mut Registry<P>,
        address: Address,
        now: u32,
    ) -> Result<(), PairingError> {
        if self.active {
            warn!("pairing: already in progress");
            return Err(PairingError::AlreadyActive);
        }
        if self.system_key.is_none() {
            warn!("pairing: no system key configured");
            return Err(PairingError::NoSystemKey);
        }
        match registry.start_pairing(address, now) {
            Ok(()) => {}
            Err(RegistryError::Full) => return Err(PairingError::RegistryFull),
            Err(_) => return Err(PairingError::AlreadyActive),
        }

        self.active = true;
        self.peer = address;
        // Past time so the first tick broadcasts immediately
        self.last_step = now.wrapping_sub(DISCOVERY_RETRY_MS);
        self.not_ready_count = 0;
        self.broadcasts_2a_left = 0;
        self.auth_frame_data.clear();
        self.outbox.clear();
        self.busy_attempts = 0;
        info!("pairing: session started for {}", address_hex(&address));
        Ok(())
    }

    /// Cancel the active session, resetting the target to unpaired
    ///
    /// Idempotent. A frame already handed to the gateway may still be
    /// transmitted; any late response is ignored because the session is
    /// gone.
    pub fn cancel<P: Persistence>(&mut self, registry: &mut Registry<P>) {
        if !self.active {
            return;
        }
        if let Some(record) = registry.get_mut(&self.peer) {
            record.pairing_state = PairingState::Unpaired;
        }
        self.active = false;
        self.outbox.clear();
        self.peer = [0; 3];
        info!("pairing: session cancelled");
    }

    /// Offer an inbound frame to the engine
    ///
    /// While a session is active every frame from the session's peer is
    /// consumed, even unexpected ones, so no other subsystem handles them
    /// twice.
    pub fn handle_inbound<P: Persistence, R: Radio>(
        &mut self,
        registry: &mut Registry<P>,
        gateway: &mut RadioGateway<R>,
        frame: &Frame,
        now: u32,
    ) -> Dispatch {
        if !self.active {
            return self.try_auto_pair(registry, gateway, frame, now);
        }
        if frame.source != self.peer {
            return Dispatch::Ignored;
        }

        let state = match registry.get_mut(&self.peer) {
            Some(record) => {
                record.touch(now);
                record.pairing_state
            }
            None => return Dispatch::Ignored,
        };
        debug!(
            "pairing: cmd 0x{:02x} from {} in {}",
            frame.cmd,
            address_hex(&frame.source),
            state.as_str()
        );

        let _ = match Command::from_byte(frame.cmd) {
            Some(Command::DiscoverAnswer) => self.on_discovery_answer(registry, frame, now),
            Some(Command::AliveAnswer) => self.on_alive_answer(registry, state, now),
            Some(Command::PriorityAddressAnswer) => self.on_priority_answer(registry, state, now),
            Some(Command::Challenge) => self.on_challenge(registry, state, frame, now),
            Some(Command::ChallengeAnswer) => self.on_challenge_answer(registry, state, frame, now),
            Some(Command::PairingStatus) => self.on_pairing_status(registry, frame, now),
            Some(Command::KeyTransferAck) => self.on_key_ack(registry, now),
            Some(Command::NameAnswer) => self.on_name_answer(registry, frame, now),
            Some(Command::Info1Answer) => self.on_info1_answer(registry, frame, now),
            Some(Command::Info2Answer) => self.on_info2_answer(registry, frame, now),
            Some(Command::ErrorStatus) => self.on_error_status(registry, frame),
            _ => {
                debug!("pairing: ignoring unexpected cmd 0x{:02x} during session", frame.cmd);
                Dispatch::Consumed
            }
        };

        self.flush(registry, gateway, now);
        Dispatch::Consumed
    }

    /// Drive timeouts, retries, and state-triggered sends
    ///
    /// Call at 10 Hz or faster.
    pub fn tick<P: Persistence, R: Radio>(
        &mut self,
        registry: &mut Registry<P>,
        gateway: &mut RadioGateway<R>,
        now: u32,
    ) {
        self.flush(registry, gateway, now);
        if !self.active {
            return;
        }

        let state = match registry.get(&self.peer) {
            Some(record) => {
                if record.pairing_timed_out(now, self.pairing_timeout_ms) {
                    warn!("pairing: deadline exceeded for {}", address_hex(&self.peer));
                    self.fail(registry);
                    return;
                }
                record.pairing_state
            }
            None => {
                self.cancel(registry);
                return;
            }
        };

        match state {
            PairingState::Discovering => {
                if now.wrapping_sub(self.last_step) >= DISCOVERY_RETRY_MS {
                    self.send_discover_broadcast();
                    self.last_step = now;
                }
            }
            PairingState::Broadcasting2A => {
                if now.wrapping_sub(self.last_step) >= BROADCAST_2A_SPACING_MS {
                    if self.broadcasts_2a_left > 0 {
                        self.broadcasts_2a_left -= 1;
                        self.send_legacy_broadcast();
                    } else {
                        self.send_cmd_then(
                            Command::PriorityAddressRequest as u8,
                            &[],
                            PairingState::WaitingBeforeLearning,
                        );
                    }
                    self.last_step = now;
                }
            }
            PairingState::LearningMode => {
                if now.wrapping_sub(self.last_step) >= STATE_WAIT_MS {
                    // No challenge from the peripheral; assume the other
                    // dialect and restart through the legacy broadcast.
                    info!("pairing: no challenge in learning mode, trying legacy dialect");
                    self.enter_dialect_b(registry, now);
                }
            }
            PairingState::AliveCheck => {
                if now.wrapping_sub(self.last_step) >= STATE_WAIT_MS {
                    debug!("pairing: re-asserting alive check");
                    self.send_cmd(Command::AliveRequest as u8, &[], |_| {});
                    self.last_step = now;
                }
            }
            PairingState::PairingConfirmed => {
                if now.wrapping_sub(self.last_step) >= STATE_WAIT_MS {
                    debug!("pairing: re-asserting challenge request");
                    self.send_authenticated(Command::AskChallenge as u8, &[]);
                    self.last_step = now;
                }
            }
            PairingState::KeyExchanged => {
                if now.wrapping_sub(self.last_step) >= INFO_RETRY_MS {
                    self.request_next_info(registry);
                    self.last_step = now;
                }
            }
            _ => {
                if now.wrapping_sub(self.last_step) >= STATE_WAIT_MS {
                    debug!("pairing: waiting for peripheral in {}", state.as_str());
                    self.last_step = now;
                }
            }
        }

        self.flush(registry, gateway, now);
    }

    // Inbound handlers

    fn try_auto_pair<P: Persistence, R: Radio>(
        &mut self,
        registry: &mut Registry<P>,
        gateway: &mut RadioGateway<R>,
        frame: &Frame,
        now: u32,
    ) -> Dispatch {
        if !self.auto_pair || frame.cmd != Command::DiscoverAnswer as u8 {
            return Dispatch::Ignored;
        }
        if registry.get(&frame.source).is_some_and(|r| r.pairing_state == PairingState::Paired) {
            return Dispatch::Ignored;
        }
        info!("pairing: auto-pair triggered by {}", address_hex(&frame.source));
        self.auto_pair = false;
        if self.start_pairing(registry, frame.source, now).is_err() {
            return Dispatch::Ignored;
        }
        self.on_discovery_answer(registry, frame, now);
        self.flush(registry, gateway, now);
        Dispatch::Consumed
    }

    fn on_discovery_answer<P: Persistence>(
        &mut self,
        registry: &mut Registry<P>,
        frame: &Frame,
        now: u32,
    ) -> Dispatch {
        let state = match registry.get(&self.peer) {
            Some(r) => r.pairing_state,
            None => return Dispatch::Consumed,
        };
        if state != PairingState::Discovering {
            return Dispatch::Consumed;
        }
        if let Some(answer) = DiscoveryAnswer::from_bytes(&frame.payload) {
            let _ = registry.update_from_discovery(&self.peer, &answer, now);
        }
        info!("pairing: {} answered discovery", address_hex(&self.peer));
        self.send_cmd_then(Command::AliveRequest as u8, &[], PairingState::AliveCheck);
        self.last_step = now;
        Dispatch::Consumed
    }

    fn on_alive_answer<P: Persistence>(
        &mut self,
        registry: &mut Registry<P>,
        state: PairingState,
        now: u32,
    ) -> Dispatch {
        if state != PairingState::AliveCheck {
            return Dispatch::Consumed;
        }
        self.record_auth_data(Command::LearnMode as u8);
        self.send_cmd_then(
            Command::LearnMode as u8,
            &LEARN_MODE_PAYLOAD,
            PairingState::LearningMode,
        );
        self.last_step = now;
        Dispatch::Consumed
    }

    fn on_priority_answer<P: Persistence>(
        &mut self,
        registry: &mut Registry<P>,
        state: PairingState,
        now: u32,
    ) -> Dispatch {
        match state {
            PairingState::LearningMode => {
                // The peripheral speaks the legacy dialect
                info!("pairing: priority answer, switching to legacy dialect");
                self.enter_dialect_b(registry, now);
            }
            PairingState::WaitingBeforeLearning => {
                let mut challenge = [0u8; CHALLENGE_SIZE];
                self.rng.fill_bytes(&mut challenge);
                let _ = registry.store_challenge(&self.peer, &challenge, now);
                self.record_auth_data(Command::Challenge as u8);
                self.send_cmd_then(
                    Command::Challenge as u8,
                    &challenge,
                    PairingState::ChallengeSent,
                );
                self.last_step = now;
            }
            _ => {}
        }
        Dispatch::Consumed
    }

    fn on_challenge<P: Persistence>(
        &mut self,
        registry: &mut Registry<P>,
        state: PairingState,
        frame: &Frame,
        now: u32,
    ) -> Dispatch {
        if frame.payload.len() < CHALLENGE_SIZE {
            warn!("pairing: short challenge payload");
            return Dispatch::Consumed;
        }
        let mut challenge = [0u8; CHALLENGE_SIZE];
        challenge.copy_from_slice(&frame.payload[..CHALLENGE_SIZE]);
        let _ = registry.store_challenge(&self.peer, &challenge, now);

        let key = match self.system_key {
            Some(key) => key,
            None => return Dispatch::Consumed,
        };

        match state {
            PairingState::LearningMode | PairingState::ChallengeSent => {
                // The peripheral authenticates our last command
                let mac = crypto::mac_2w(&challenge, &key, &self.auth_frame_data);
                self.send_cmd_then(
                    Command::ChallengeAnswer as u8,
                    &mac,
                    PairingState::ChallengeReceived,
                );
                let _ = registry.store_response(&self.peer, &mac, now);
                self.last_step = now;
            }
            PairingState::PairingConfirmed => {
                // Challenge answers our 0x31: wrap the system key against
                // it and authenticate the whole transfer frame in one go
                let wrapped = crypto::wrap_key_2w(&key, &challenge, &self.auth_frame_data);
                let _ = registry.store_stack_key(&self.peer, &wrapped, now);
                self.send_cmd(Command::KeyTransfer as u8, &wrapped, |_| {});
                self.auth_frame_data.clear();
                let _ = self.auth_frame_data.push(Command::KeyTransfer as u8);
                let _ = self.auth_frame_data.extend_from_slice(&wrapped);
                let mac = crypto::mac_2w(&challenge, &key, &self.auth_frame_data);
                self.send_cmd(Command::ChallengeAnswer as u8, &mac, |_| {});
                let _ = registry.store_response(&self.peer, &mac, now);
                self.last_step = now;
            }
            _ => {
                debug!("pairing: challenge in {} ignored", state.as_str());
            }
        }
        Dispatch::Consumed
    }

    fn on_challenge_answer<P: Persistence>(
        &mut self,
        registry: &mut Registry<P>,
        state: PairingState,
        frame: &Frame,
        now: u32,
    ) -> Dispatch {
        if state == PairingState::ChallengeSent && frame.payload.len() >= CHALLENGE_SIZE {
            // Dialect B: the peripheral answered our challenge. The key is
            // not shared yet, so the answer cannot be verified here; the
            // confirmation that follows decides the session.
            let mut response = [0u8; CHALLENGE_SIZE];
            response.copy_from_slice(&frame.payload[..CHALLENGE_SIZE]);
            let _ = registry.store_response(&self.peer, &response, now);
            self.set_state(registry, PairingState::ChallengeReceived);
            self.last_step = now;
        }
        Dispatch::Consumed
    }

    fn on_pairing_status<P: Persistence>(
        &mut self,
        registry: &mut Registry<P>,
        frame: &Frame,
        now: u32,
    ) -> Dispatch {
        let status = match frame.payload.first() {
            Some(&status) => status,
            None => return Dispatch::Consumed,
        };
        if status == PAIRING_STATUS_OK {
            info!("pairing: confirmed by {}", address_hex(&self.peer));
            self.set_state(registry, PairingState::PairingConfirmed);
            self.send_authenticated(Command::AskChallenge as u8, &[]);
            self.last_step = now;
        } else {
            warn!("pairing: rejected with status 0x{:02x}", status);
            self.fail(registry);
        }
        Dispatch::Consumed
    }

    fn on_key_ack<P: Persistence>(&mut self, registry: &mut Registry<P>, now: u32) -> Dispatch {
        info!("pairing: key transfer acknowledged");
        self.set_state(registry, PairingState::KeyExchanged);
        self.send_cmd(Command::NameRequest as u8, &[], |_| {});
        self.last_step = now;
        Dispatch::Consumed
    }

    fn on_name_answer<P: Persistence>(
        &mut self,
        registry: &mut Registry<P>,
        frame: &Frame,
        now: u32,
    ) -> Dispatch {
        if frame.payload.len() < 16 {
            return Dispatch::Consumed;
        }
        let _ = registry.update_from_name(&self.peer, &frame.payload, now);
        self.send_cmd(Command::Info1Request as u8, &[], |_| {});
        self.last_step = now;
        Dispatch::Consumed
    }

    fn on_info1_answer<P: Persistence>(
        &mut self,
        registry: &mut Registry<P>,
        frame: &Frame,
        now: u32,
    ) -> Dispatch {
        if frame.payload.len() < 14 {
            return Dispatch::Consumed;
        }
        let _ = registry.update_from_info1(&self.peer, &frame.payload, now);
        self.send_cmd(Command::Info2Request as u8, &[], |_| {});
        self.last_step = now;
        Dispatch::Consumed
    }

    fn on_info2_answer<P: Persistence>(
        &mut self,
        registry: &mut Registry<P>,
        frame: &Frame,
        now: u32,
    ) -> Dispatch {
        if frame.payload.len() < 16 {
            return Dispatch::Consumed;
        }
        let _ = registry.update_from_info2(&self.peer, &frame.payload, now);
        if let Some(key) = self.system_key {
            let _ = registry.store_system_key(&self.peer, &key, now);
        }
        match registry.complete_pairing(&self.peer) {
            Ok(()) => info!("pairing: {} fully paired", address_hex(&self.peer)),
            Err(err) => warn!("pairing: completed but persistence failed: {:?}", err),
        }
        self.active = false;
        Dispatch::Consumed
    }

    fn on_error_status<P: Persistence>(
        &mut self,
        registry: &mut Registry<P>,
        frame: &Frame,
    ) -> Dispatch {
        let status = match frame.payload.first() {
            Some(&status) => status,
            None => return Dispatch::Consumed,
        };
        match status {
            STATUS_NOT_READY => {
                self.not_ready_count += 1;
                warn!(
                    "pairing: peripheral not ready ({}/{}) - is the pairing button held?",
                    self.not_ready_count, NOT_READY_MAX
                );
                if self.not_ready_count > NOT_READY_MAX {
                    self.fail(registry);
                }
            }
            STATUS_AUTH_REJECTED => {
                warn!("pairing: authentication rejected by peripheral");
                self.fail(registry);
            }
            other => {
                debug!("pairing: peripheral status 0x{:02x}", other);
            }
        }
        Dispatch::Consumed
    }

    // Outbound helpers

    fn enter_dialect_b<P: Persistence>(&mut self, registry: &mut Registry<P>, now: u32) {
        self.broadcasts_2a_left = BROADCAST_2A_COUNT;
        self.set_state(registry, PairingState::Broadcasting2A);
        // Past time so the first broadcast leaves on the next tick
        self.last_step = now.wrapping_sub(BROADCAST_2A_SPACING_MS);
    }

    fn request_next_info<P: Persistence>(&mut self, registry: &mut Registry<P>) {
        let (has_name, has_info1) = match registry.get(&self.peer) {
            Some(record) => (
                !record.capabilities.name.is_empty(),
                record.capabilities.has_general_info1,
            ),
            None => return,
        };
        let cmd = if !has_name {
            Command::NameRequest
        } else if !has_info1 {
            Command::Info1Request
        } else {
            Command::Info2Request
        };
        debug!("pairing: re-requesting device info 0x{:02x}", cmd as u8);
        self.send_cmd(cmd as u8, &[], |_| {});
    }

    fn send_discover_broadcast(&mut self) {
        debug!("pairing: discovery broadcast");
        if let Ok(mut frame) = Frame::new(
            self.controller_address,
            BROADCAST_ADDRESS,
            Command::Discover as u8,
            &[],
        ) {
            frame.ctrl2.low_power = true;
            frame.ctrl2.prio = true;
            self.enqueue_frame(frame, |o| {
                o.short_preamble = false;
                o.delayed_ms = WAKEUP_DELAY_MS;
            });
        }
    }

    fn send_legacy_broadcast(&mut self) {
        debug!("pairing: legacy pairing broadcast");
        // The 12-byte body is opaque to the controller
        let body = [0u8; 12];
        if let Ok(frame) = Frame::new(
            self.controller_address,
            BROADCAST_ADDRESS,
            Command::LegacyPairBroadcast as u8,
            &body,
        ) {
            self.enqueue_frame(frame, |o| {
                o.short_preamble = false;
            });
        }
    }

    fn enqueue_frame(&mut self, frame: Frame, configure: impl FnOnce(&mut SendOptions)) {
        let mut opts = SendOptions {
            channel: Channel::Channel2,
            ..SendOptions::default()
        };
        configure(&mut opts);
        self.push_outbound(frame, opts, None);
    }

    fn push_outbound(&mut self, frame: Frame, opts: SendOptions, then_state: Option<PairingState>) {
        if self
            .outbox
            .push_back(Outbound {
                frame,
                opts,
                then_state,
            })
            .is_err()
        {
            warn!("pairing: outbound queue full, frame dropped");
        }
    }

    /// Send a session command and remember its command byte as the frame
    /// data for the next challenge
    ///
    /// Challenges authenticate the command byte that triggered them; only
    /// the key transfer is authenticated over its whole frame data, which
    /// its send path records explicitly.
    fn send_authenticated(&mut self, cmd: u8, payload: &[u8]) {
        self.record_auth_data(cmd);
        self.send_cmd(cmd, payload, |_| {});
    }

    fn record_auth_data(&mut self, cmd: u8) {
        self.auth_frame_data.clear();
        let _ = self.auth_frame_data.push(cmd);
    }

    fn send_cmd(&mut self, cmd: u8, payload: &[u8], configure: impl FnOnce(&mut SendOptions)) {
        self.build_and_enqueue(cmd, payload, configure, None);
    }

    /// Like [`Self::send_cmd`], entering `state` only once the gateway
    /// accepts the frame
    fn send_cmd_then(&mut self, cmd: u8, payload: &[u8], state: PairingState) {
        self.build_and_enqueue(cmd, payload, |_| {}, Some(state));
    }

    fn build_and_enqueue(
        &mut self,
        cmd: u8,
        payload: &[u8],
        configure: impl FnOnce(&mut SendOptions),
        then_state: Option<PairingState>,
    ) {
        if let Ok(mut frame) = Frame::new(self.controller_address, self.peer, cmd, payload) {
            if cmd == Command::PriorityAddressRequest as u8 {
                frame.ctrl2.prio = true;
            }
            let mut opts = SendOptions {
                channel: Channel::Channel2,
                ..SendOptions::default()
            };
            configure(&mut opts);
            self.push_outbound(frame, opts, then_state);
        }
    }

    /// Emit the next queued frame once the gateway is free
    ///
    /// One outstanding frame per session: the head leaves only after the
    /// gateway reported the previous transmission done. Busy retries are
    /// transparent and paced; the global pairing deadline is the backstop.
    fn flush<P: Persistence, R: Radio>(
        &mut self,
        registry: &mut Registry<P>,
        gateway: &mut RadioGateway<R>,
        now: u32,
    ) {
        if self.outbox.is_empty() {
            return;
        }
        if gateway.state() != RadioState::Rx {
            if now.wrapping_sub(self.last_send_attempt) >= BUSY_RETRY_MS {
                self.last_send_attempt = now;
                self.busy_attempts = self.busy_attempts.saturating_add(1);
                if self.busy_attempts == BUSY_RETRY_MAX {
                    warn!("pairing: radio busy through {} retries", BUSY_RETRY_MAX);
                }
            }
            return;
        }

        let head = match self.outbox.front() {
            Some(out) => out,
            None => return,
        };
        match gateway.send(&head.frame, head.opts, now) {
            Ok(()) => {
                let sent = self.outbox.pop_front();
                self.busy_attempts = 0;
                if let Some(state) = sent.and_then(|out| out.then_state) {
                    self.set_state(registry, state);
                }
            }
            Err(GatewayError::Busy) => {
                self.last_send_attempt = now;
                self.busy_attempts = self.busy_attempts.saturating_add(1);
            }
            Err(GatewayError::Radio(_)) => {
                warn!("pairing: radio driver error, failing session");
                self.fail(registry);
            }
        }
    }

    fn set_state<P: Persistence>(&mut self, registry: &mut Registry<P>, state: PairingState) {
        if let Some(record) = registry.get_mut(&self.peer) {
            debug!(
                "pairing: {} {} -> {}",
                address_hex(&self.peer),
                record.pairing_state.as_str(),
                state.as_str()
            );
            record.pairing_state = state;
        }
    }

    fn fail<P: Persistence>(&mut self, registry: &mut Registry<P>) {
        let _ = registry.fail_pairing(&self.peer);
        self.active = false;
        self.outbox.clear();
    }
}
