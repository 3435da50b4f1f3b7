//! Pairing, connection supervision and command delivery for the rocket
//! locator receiver.
//!
//! The crate is organised around one supervisor task started by
//! [`Tracker::spawn`]:
//!
//! - [`ConnectionMachine`] tracks the pairing and connection lifecycle and
//!   emits [`LinkAction`]s. It does no I/O and is driven by events and ticks.
//! - [`BluetoothAdapter`] is the platform seam for enabling, discovery and
//!   bonding.
//! - [`Transport`] opens the byte stream to a bonded device. A session task
//!   owns the stream, frames and decodes it, and writes queued commands.
//! - [`CommandChannel`] enforces one in-flight command per kind and tracks
//!   acknowledgements.
//!
//! Readers observe the results through a [`TrackerHandle`]: the
//! [`LinkStatus`], the latest [`FlightSnapshot`] and the [`AckStates`].

pub mod adapter;
pub mod commands;
pub mod config;
pub mod device;
pub mod error;
pub mod machine;
pub mod phase;
mod session;
pub mod snapshot;
pub mod tracker;
pub mod transport;

pub use adapter::{AdapterState, AdapterView, BluetoothAdapter, BondRemoval};
pub use commands::{AckStates, CommandAckState, CommandChannel};
pub use config::{
    CommandConfig, ConfigError, DeviceConfig, FramingConfig, LinkConfig, SupervisionConfig,
    TrackerConfig,
};
pub use device::{BondState, DeviceHandle, PairedDevice};
pub use error::{LinkError, LinkResult};
pub use machine::{ConnectionMachine, LinkAction, LinkEvent};
pub use phase::{ConnectionPhase, SelectionStatus, UnavailableReason};
pub use snapshot::{FlightSnapshot, LinkStatus};
pub use tracker::{Tracker, TrackerHandle};
pub use transport::{TcpTransport, Transport};
