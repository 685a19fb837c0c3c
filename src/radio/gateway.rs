//! Half-duplex send/receive arbitration
//!
//! The radio is the single contended resource. The gateway owns it through
//! a three-state machine: `Rx` (listening), `Preamble` (a delayed or
//! long-preamble transmission is warming up), and `Tx` (bytes in flight).
//! `send` fails with `Busy` outside `Rx`; callers treat that as "try
//! again" and must not advance protocol state until a send is accepted.
//!
//! Ownership of an accepted frame transfers to the gateway; it stays
//! queued here until the driver reports the transmission complete.

use heapless::Vec;
use log::{debug, trace, warn};

use super::traits::{Radio, TxParams};
use super::Channel;
use crate::protocol::frame::{Frame, FrameError, MAX_FRAME};

/// Gateway radio state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RadioState {
    /// Listening; sends are accepted
    Rx,
    /// A transmission is scheduled or its preamble is running
    Preamble,
    /// Bytes are on the air
    Tx,
}

/// Per-send options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SendOptions {
    /// Channel to use
    pub channel: Channel,
    /// Milliseconds between hardware repeats
    pub repeat_time_ms: u32,
    /// Hardware repeat count (0 means no repeats)
    pub repeat: u8,
    /// Transmit even while another frame is queued, replacing it
    pub lock: bool,
    /// Short preamble during an active session; long for wake-up broadcasts
    pub short_preamble: bool,
    /// Milliseconds to hold the frame before transmitting (LPM wake time)
    pub delayed_ms: u32,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            channel: Channel::Channel2,
            repeat_time_ms: 25,
            repeat: 0,
            lock: false,
            short_preamble: true,
            delayed_ms: 0,
        }
    }
}

/// Gateway error
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GatewayError<E> {
    /// Transient: the radio is mid-transmission, try again
    Busy,
    /// Driver failure
    Radio(E),
}

struct PendingTx {
    bytes: Vec<u8, MAX_FRAME>,
    params: TxParams,
    due: u32,
}

/// Half-duplex radio gateway
pub struct RadioGateway<R: Radio> {
    radio: R,
    state: RadioState,
    pending: Option<PendingTx>,
    crc_errors: u32,
    malformed: u32,
}

impl<R: Radio> RadioGateway<R> {
    /// Wrap a radio driver
    pub fn new(radio: R) -> Self {
        Self {
            radio,
            state: RadioState::Rx,
            pending: None,
            crc_errors: 0,
            malformed: 0,
        }
    }

    /// Initialize the driver
    pub fn init(&mut self) -> Result<(), R::Error> {
        self.radio.init()
    }

    /// Current gateway state
    pub fn state(&self) -> RadioState {
        self.state
    }

    /// Frames dropped for CRC mismatch since startup
    pub fn crc_error_count(&self) -> u32 {
        self.crc_errors
    }

    /// Frames dropped for malformed framing since startup
    pub fn malformed_count(&self) -> u32 {
        self.malformed
    }

    /// Enqueue a frame for transmission
    ///
    /// Returns `Busy` while a previous transmission is queued or on the
    /// air, unless `opts.lock` forces replacement of a queued frame.
    pub fn send(&mut self, frame: &Frame, opts: SendOptions, now: u32) -> Result<(), GatewayError<R::Error>> {
        match self.state {
            RadioState::Rx => {}
            RadioState::Preamble if opts.lock => {
                trace!("gateway: lock send replaces queued frame");
                self.pending = None;
            }
            _ => return Err(GatewayError::Busy),
        }

        let params = TxParams {
            channel: opts.channel,
            short_preamble: opts.short_preamble,
            repeat: opts.repeat,
            repeat_time_ms: opts.repeat_time_ms,
        };
        let bytes = frame.encode();

        if opts.delayed_ms > 0 {
            self.pending = Some(PendingTx {
                bytes,
                params,
                due: now.wrapping_add(opts.delayed_ms),
            });
            self.state = RadioState::Preamble;
            trace!("gateway: frame 0x{:02x} held for {} ms", frame.cmd, opts.delayed_ms);
        } else {
            self.radio
                .transmit(&bytes, &params)
                .map_err(GatewayError::Radio)?;
            self.state = RadioState::Tx;
            debug!("gateway: frame 0x{:02x} on air ({} bytes)", frame.cmd, bytes.len());
        }
        Ok(())
    }

    /// Drive delayed transmissions and completion back to `Rx`
    pub fn tick(&mut self, now: u32) -> Result<(), R::Error> {
        match self.state {
            RadioState::Preamble => {
                let due = match &self.pending {
                    Some(p) => p.due,
                    None => {
                        self.state = RadioState::Rx;
                        return Ok(());
                    }
                };
                if now.wrapping_sub(due) < u32::MAX / 2 {
                    if let Some(pending) = self.pending.take() {
                        self.radio.transmit(&pending.bytes, &pending.params)?;
                        self.state = RadioState::Tx;
                        debug!("gateway: delayed frame on air ({} bytes)", pending.bytes.len());
                    }
                }
            }
            RadioState::Tx => {
                if !self.radio.is_transmitting()? {
                    self.state = RadioState::Rx;
                    trace!("gateway: transmission complete");
                }
            }
            RadioState::Rx => {}
        }
        Ok(())
    }

    /// Poll the driver for one inbound frame
    ///
    /// Frames with bad CRC are dropped silently and counted; malformed
    /// frames are dropped and counted separately.
    pub fn receive(&mut self) -> Result<Option<Frame>, R::Error> {
        let mut buffer = [0u8; MAX_FRAME * 2];
        let len = self.radio.receive(&mut buffer)?;
        if len == 0 {
            return Ok(None);
        }
        match Frame::decode(&buffer[..len]) {
            Ok(frame) => Ok(Some(frame)),
            Err(FrameError::BadCrc) => {
                self.crc_errors += 1;
                Ok(None)
            }
            Err(err) => {
                self.malformed += 1;
                warn!("gateway: dropped malformed frame: {:?}", err);
                Ok(None)
            }
        }
    }
}
