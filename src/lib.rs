//! Controller for a proprietary sub-GHz two-way (2W) home-automation radio
//! link, as used by motorized shutters, plugs, and valves.
//!
//! The crate impersonates a gateway and drives the full lifecycle of a 2W
//! peripheral: discovery, pairing, authenticated key transfer, and later
//! authenticated command/response exchanges.
//!
//! # Features
//! - Bit-exact link-layer frame codec with CRC-16
//! - AES-128 based key wrap and 6-byte MAC (1W and 2W variants)
//! - Command-driven pairing state machine with timeouts and retries
//! - Per-command challenge/response authentication
//! - Half-duplex radio arbitration over an opaque packet driver
//! - No unsafe code
//!
//! # Example
//! ```ignore
//! use homelink::{
//!     config::ControllerConfig,
//!     controller::Controller,
//! };
//!
//! let config = ControllerConfig::new([0xBA, 0x11, 0xAD]);
//! let mut controller = Controller::new(radio, persistence, rng, config).unwrap();
//! controller.set_system_key([0x00; 16]);
//!
//! // Pair a peripheral (hold its pairing button)
//! controller.start_pairing([0xFE, 0x90, 0xEE], now_ms).unwrap();
//!
//! // Drive the protocol from the main loop at >= 10 Hz
//! loop {
//!     controller.process(now_ms);
//! }
//! ```

#![warn(missing_docs)]
#![no_std]

/// Authenticated command gateway for paired peripherals
pub mod command;

/// Controller identity and link configuration
pub mod config;

/// Top-level controller facade
pub mod controller;

/// Cryptographic kernel: key wrap and MAC primitives
pub mod crypto;

/// Pairing protocol state machine
pub mod pairing;

/// Link-layer frames and the wire command catalog
pub mod protocol;

/// Half-duplex radio gateway and driver abstraction
pub mod radio;

/// In-memory registry of known peripherals
pub mod registry;
