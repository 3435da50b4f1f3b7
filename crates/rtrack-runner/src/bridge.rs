//! Adapter for receivers reached through a serial-to-TCP bridge.
//!
//! There is no radio to manage: the bridge is always on and the configured
//! device counts as bonded, so the tracker goes straight to opening the
//! socket.

use rtrack_link::{
    AdapterState, BluetoothAdapter, BondRemoval, BondState, DeviceHandle, LinkError, LinkEvent,
    LinkResult,
};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct BridgeAdapter;

impl BluetoothAdapter for BridgeAdapter {
    fn state(&self) -> AdapterState {
        AdapterState::Enabled
    }

    fn request_enable(&mut self) -> LinkResult<()> {
        Ok(())
    }

    fn start_discovery(&mut self) -> LinkResult<()> {
        Err(LinkError::Adapter(
            "a TCP bridge cannot discover devices; configure an address".into(),
        ))
    }

    fn cancel_discovery(&mut self) {}

    fn is_discovering(&self) -> bool {
        false
    }

    fn create_bond(&mut self, device: &DeviceHandle) -> LinkResult<()> {
        debug!("Bridge: {} needs no bonding", device);
        Ok(())
    }

    fn remove_bond(&mut self, _device: &DeviceHandle) -> BondRemoval {
        BondRemoval::Unsupported
    }

    fn bond_state(&self, _device: &DeviceHandle) -> BondState {
        BondState::Bonded
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        None
    }
}
