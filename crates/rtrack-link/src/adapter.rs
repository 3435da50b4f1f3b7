//! The Bluetooth adapter seam.
//!
//! Platform glue implements [`BluetoothAdapter`]. Its methods are called from
//! the supervisor task and must not block; results of the operations they
//! start come back later as [`LinkEvent`]s on the adapter's event channel.

use tokio::sync::mpsc;

use crate::device::{BondState, DeviceHandle};
use crate::error::LinkResult;
use crate::machine::LinkEvent;

/// Power state of the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Disabled,
    Enabled,
    /// The platform has no Bluetooth adapter.
    Unsupported,
}

/// Outcome of asking the platform to forget a bond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondRemoval {
    /// The platform removed the bond.
    Removed,
    /// The platform exposes no way to remove a bond. Only local state was
    /// cleared; the device may still be bonded at the platform level.
    Unsupported,
}

/// Operations the tracker needs from a Bluetooth adapter.
pub trait BluetoothAdapter: Send + 'static {
    fn state(&self) -> AdapterState;

    /// Ask the user to turn the adapter on. The answer arrives as
    /// [`LinkEvent::AdapterEnabled`] or [`LinkEvent::EnableDenied`].
    fn request_enable(&mut self) -> LinkResult<()>;

    /// Start scanning. Found devices arrive as [`LinkEvent::DeviceFound`].
    fn start_discovery(&mut self) -> LinkResult<()>;

    fn cancel_discovery(&mut self);

    fn is_discovering(&self) -> bool;

    /// Start bonding. Progress arrives as [`LinkEvent::BondStateChanged`].
    fn create_bond(&mut self, device: &DeviceHandle) -> LinkResult<()>;

    /// Forget a bond, cancelling it if bonding is in progress.
    fn remove_bond(&mut self, device: &DeviceHandle) -> BondRemoval;

    fn bond_state(&self, device: &DeviceHandle) -> BondState;

    /// Hand over the adapter's event stream. Called once when the tracker
    /// starts; adapters with nothing to report return `None`.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<LinkEvent>>;
}

/// What the state machine knows about the adapter at a supervision tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterView {
    pub state: AdapterState,
    pub discovering: bool,
    /// Bond state of the remembered device, if there is one.
    pub bond: Option<BondState>,
}

impl AdapterView {
    /// Sample an adapter for the given remembered device.
    pub fn sample<A: BluetoothAdapter + ?Sized>(adapter: &A, device: Option<&DeviceHandle>) -> Self {
        AdapterView {
            state: adapter.state(),
            discovering: adapter.is_discovering(),
            bond: device.map(|d| adapter.bond_state(d)),
        }
    }
}
