//! Rocket Locator Receiver Protocol
//!
//! This crate provides types and utilities for decoding the byte stream a
//! locator receiver streams over its wireless serial link, and for encoding
//! the few requests the tracker sends back.
//!
//! # Protocol Overview
//!
//! The receiver emits fixed-length messages with no length prefix and no
//! checksum. Each message starts with a 3-byte ASCII header:
//!
//! - **Prelaunch** (`PRE`, 74 bytes): GPS fix, sensor health, arming state,
//!   raw accelerometer sample, and the locator's full configuration
//! - **Telemetry** (`TLM`, 84 bytes): GPS fix, flight state, and a batch of
//!   altitude-above-ground samples
//!
//! Requests (tracker → receiver) are `CFG`, `RCV` and `TST` messages, see
//! [`Command`].
//!
//! # Example
//!
//! ```rust,ignore
//! use rtrack_protocol::{Framer, FramerEvent, Message};
//!
//! let mut framer = Framer::default();
//! for event in framer.push(&received_bytes) {
//!     if let FramerEvent::Frame(frame) = event {
//!         let message = Message::decode(&frame)?;
//!     }
//! }
//! ```

mod codec;
mod commands;
mod constants;
mod error;
mod frame;
mod telemetry;
mod types;

pub use codec::*;
pub use commands::*;
pub use constants::*;
pub use error::*;
pub use frame::*;
pub use telemetry::*;
pub use types::*;
