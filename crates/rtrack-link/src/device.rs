//! Remote device identity and bond status.

use std::fmt;

use parking_lot::Mutex;

/// Bonding status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BondState {
    #[default]
    None,
    Bonding,
    Bonded,
}

/// Identity of a remote device as the adapter reports it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    /// Adapter-specific address.
    pub address: String,
    /// Advertised name, if the device sent one.
    pub name: Option<String>,
}

impl DeviceHandle {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        DeviceHandle {
            address: address.into(),
            name,
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// The device the tracker pairs with.
///
/// Held as `Arc<PairedDevice>` by the state machine and the session task.
/// The bond status is updated in place by the state machine.
#[derive(Debug)]
pub struct PairedDevice {
    handle: DeviceHandle,
    bond: Mutex<BondState>,
}

impl PairedDevice {
    pub fn new(handle: DeviceHandle) -> Self {
        PairedDevice {
            handle,
            bond: Mutex::new(BondState::None),
        }
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    pub fn address(&self) -> &str {
        &self.handle.address
    }

    pub fn bond_state(&self) -> BondState {
        *self.bond.lock()
    }

    /// Record a new bond state, returning the previous one.
    pub fn set_bond_state(&self, state: BondState) -> BondState {
        std::mem::replace(&mut *self.bond.lock(), state)
    }

    pub fn is_bonded(&self) -> bool {
        self.bond_state() == BondState::Bonded
    }
}
