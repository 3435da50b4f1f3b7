//! Connection state machine.
//!
//! [`ConnectionMachine`] decides what to do and never does it. The
//! supervisor feeds it adapter and socket events plus periodic ticks, and
//! carries out the [`LinkAction`]s it returns against the adapter and the
//! session task.
//!
//! ```text
//! Idle ─start─▶ Starting ─┬─ adapter off ─▶ BluetoothEnabling ─▶ Enabled
//!                         ├─ adapter on ──────────────────────▶ Enabled
//!                         └─ no adapter ──▶ BluetoothUnavailable
//!
//! Enabled ─┬─ no device ─────────▶ DeviceSelection ─confirm─▶ Pairing
//!          ├─ device, not bonded ▶ Pairing ─┬─ bonded ─▶ Paired ◀─▶ Connected / Disconnected
//!          └─ device, bonded ────▶ Paired   └─ none ───▶ PairFailed ─backoff─▶ Enabled
//! ```

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterState, AdapterView};
use crate::config::LinkConfig;
use crate::device::{BondState, DeviceHandle, PairedDevice};
use crate::phase::{ConnectionPhase, SelectionStatus, UnavailableReason};

/// Something that happened outside the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    AdapterEnabled,
    AdapterDisabled,
    /// The user refused to turn the adapter on.
    EnableDenied,
    DeviceFound(DeviceHandle),
    DiscoveryFinished,
    /// The user accepted a presented device.
    DeviceConfirmed(DeviceHandle),
    /// The user rejected a presented device.
    DeviceDeclined(DeviceHandle),
    BondStateChanged { address: String, state: BondState },
    AclConnected { address: String },
    AclDisconnected { address: String },
    SocketConnected,
    SocketLost,
}

/// Something the supervisor must do.
#[derive(Debug, Clone)]
pub enum LinkAction {
    RequestEnable,
    StartDiscovery,
    CancelDiscovery,
    /// Ask the user to confirm a discovered device.
    PresentDevice(DeviceHandle),
    /// Withdraw the device currently presented.
    DismissDevice,
    CreateBond(DeviceHandle),
    RemoveBond(DeviceHandle),
    /// Start a session task for the device.
    OpenSocket(Arc<PairedDevice>),
    /// Stop the session task, if any.
    CloseSocket,
}

/// Pairing and connection lifecycle.
#[derive(Debug)]
pub struct ConnectionMachine {
    config: LinkConfig,
    phase: ConnectionPhase,
    /// Set by `start`, cleared by `unpair`. An idle machine that was started
    /// restarts itself on the next tick.
    started: bool,
    device: Option<Arc<PairedDevice>>,
    presented: Option<DeviceHandle>,
    /// Discovery timeout, bonding timeout or retry backoff, by phase.
    deadline: Option<Instant>,
}

impl ConnectionMachine {
    /// Create an idle machine, optionally with a remembered device.
    pub fn new(config: LinkConfig, remembered: Option<DeviceHandle>) -> Self {
        ConnectionMachine {
            config,
            phase: ConnectionPhase::Idle,
            started: false,
            device: remembered.map(|h| Arc::new(PairedDevice::new(h))),
            presented: None,
            deadline: None,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// The remembered device.
    pub fn device(&self) -> Option<&Arc<PairedDevice>> {
        self.device.as_ref()
    }

    /// The discovered device awaiting user confirmation.
    pub fn presented_device(&self) -> Option<&DeviceHandle> {
        self.presented.as_ref()
    }

    /// When the supervisor should next call [`tick`](Self::tick).
    pub fn next_wakeup(&self, now: Instant) -> Instant {
        let tick = now + self.phase.supervision_interval(&self.config.supervision);
        match self.deadline {
            Some(deadline) if deadline > now => deadline.min(tick),
            _ => tick,
        }
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    /// Begin (or restart) the lifecycle.
    pub fn start(&mut self, view: &AdapterView) -> Vec<LinkAction> {
        self.started = true;
        match self.phase {
            ConnectionPhase::Idle | ConnectionPhase::BluetoothUnavailable(_) => {
                self.set_phase(ConnectionPhase::Starting);
                self.evaluate_start(view)
            }
            _ => Vec::new(),
        }
    }

    /// Periodic supervision.
    pub fn tick(&mut self, now: Instant, view: &AdapterView) -> Vec<LinkAction> {
        let deadline_passed = self.deadline.is_some_and(|d| now >= d);

        match self.phase {
            ConnectionPhase::Idle => {
                if !self.started {
                    return Vec::new();
                }
                self.set_phase(ConnectionPhase::Starting);
                self.evaluate_start(view)
            }

            ConnectionPhase::Starting => self.evaluate_start(view),

            ConnectionPhase::BluetoothEnabling => {
                match view.state {
                    AdapterState::Enabled => self.set_phase(ConnectionPhase::Enabled),
                    AdapterState::Unsupported => self.set_phase(ConnectionPhase::BluetoothUnavailable(
                        UnavailableReason::NotSupported,
                    )),
                    AdapterState::Disabled => {}
                }
                Vec::new()
            }

            ConnectionPhase::BluetoothUnavailable(UnavailableReason::NotEnabled) => {
                if view.state == AdapterState::Enabled {
                    self.set_phase(ConnectionPhase::Enabled);
                }
                Vec::new()
            }

            ConnectionPhase::BluetoothUnavailable(UnavailableReason::NotSupported) => Vec::new(),

            ConnectionPhase::Enabled => {
                if view.state != AdapterState::Enabled {
                    return self.adapter_lost();
                }
                self.evaluate_enabled(now, view)
            }

            ConnectionPhase::DeviceSelection(_) => {
                if view.state != AdapterState::Enabled {
                    return self.adapter_lost();
                }
                if deadline_passed && !view.discovering {
                    debug!("Link: device selection unresolved after discovery stopped");
                    return self.fail_pairing(now);
                }
                Vec::new()
            }

            ConnectionPhase::Pairing => {
                if view.state != AdapterState::Enabled {
                    return self.adapter_lost();
                }
                match (view.bond, self.device.clone()) {
                    (Some(BondState::Bonded), Some(device)) => self.on_bonded(device),
                    (Some(BondState::None), Some(_)) if deadline_passed => {
                        debug!("Link: bonding did not start before timeout");
                        self.fail_pairing(now)
                    }
                    (_, None) => {
                        warn!("Link: pairing without a device, restarting");
                        self.set_phase(ConnectionPhase::Enabled);
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }

            ConnectionPhase::PairFailed => {
                if deadline_passed {
                    self.deadline = None;
                    self.set_phase(ConnectionPhase::Enabled);
                }
                Vec::new()
            }

            ConnectionPhase::Paired | ConnectionPhase::Connected | ConnectionPhase::Disconnected => {
                if view.state != AdapterState::Enabled {
                    return self.adapter_lost();
                }
                if view.bond != Some(BondState::Bonded) {
                    return self.bond_lost();
                }
                Vec::new()
            }
        }
    }

    /// React to an adapter or socket event.
    pub fn handle(&mut self, event: LinkEvent, now: Instant) -> Vec<LinkAction> {
        match event {
            LinkEvent::AdapterEnabled => {
                if matches!(
                    self.phase,
                    ConnectionPhase::BluetoothEnabling
                        | ConnectionPhase::BluetoothUnavailable(UnavailableReason::NotEnabled)
                ) {
                    self.set_phase(ConnectionPhase::Enabled);
                }
                Vec::new()
            }

            LinkEvent::AdapterDisabled => match self.phase {
                ConnectionPhase::Idle
                | ConnectionPhase::BluetoothEnabling
                | ConnectionPhase::BluetoothUnavailable(_) => Vec::new(),
                _ => self.adapter_lost(),
            },

            LinkEvent::EnableDenied => {
                if self.phase == ConnectionPhase::BluetoothEnabling {
                    info!("Link: user declined to enable bluetooth");
                    self.set_phase(ConnectionPhase::BluetoothUnavailable(
                        UnavailableReason::NotEnabled,
                    ));
                }
                Vec::new()
            }

            LinkEvent::DeviceFound(handle) => {
                if !matches!(self.phase, ConnectionPhase::DeviceSelection(_)) {
                    return Vec::new();
                }
                self.set_phase(ConnectionPhase::DeviceSelection(SelectionStatus::InProgress));
                if self.presented.is_some() {
                    return Vec::new();
                }
                debug!("Link: presenting {}", handle);
                self.presented = Some(handle.clone());
                vec![LinkAction::PresentDevice(handle)]
            }

            LinkEvent::DiscoveryFinished => {
                if self.phase == ConnectionPhase::DeviceSelection(SelectionStatus::InProgress)
                    && self.presented.is_none()
                {
                    self.set_phase(ConnectionPhase::DeviceSelection(SelectionStatus::NoDevices));
                }
                Vec::new()
            }

            LinkEvent::DeviceConfirmed(handle) => {
                if !matches!(self.phase, ConnectionPhase::DeviceSelection(_)) {
                    return Vec::new();
                }
                info!("Link: pairing with {}", handle);
                self.presented = None;
                let device = Arc::new(PairedDevice::new(handle.clone()));
                device.set_bond_state(BondState::Bonding);
                self.device = Some(device);
                self.deadline = Some(now + self.config.discovery_timeout());
                self.set_phase(ConnectionPhase::Pairing);
                vec![LinkAction::CancelDiscovery, LinkAction::CreateBond(handle)]
            }

            LinkEvent::DeviceDeclined(handle) => {
                if !matches!(self.phase, ConnectionPhase::DeviceSelection(_))
                    || self.presented.as_ref() != Some(&handle)
                {
                    return Vec::new();
                }
                debug!("Link: {} declined, resuming discovery", handle);
                self.presented = None;
                self.deadline = Some(now + self.config.discovery_timeout());
                self.set_phase(ConnectionPhase::DeviceSelection(SelectionStatus::InProgress));
                vec![LinkAction::DismissDevice, LinkAction::StartDiscovery]
            }

            LinkEvent::BondStateChanged { address, state } => {
                let Some(device) = self.device.clone() else {
                    return Vec::new();
                };
                if device.address() != address {
                    return Vec::new();
                }
                device.set_bond_state(state);
                match (self.phase, state) {
                    (ConnectionPhase::Pairing, BondState::Bonded) => self.on_bonded(device),
                    (ConnectionPhase::Pairing, BondState::None) => self.fail_pairing(now),
                    (
                        ConnectionPhase::Paired
                        | ConnectionPhase::Connected
                        | ConnectionPhase::Disconnected,
                        BondState::None,
                    ) => self.bond_lost(),
                    _ => Vec::new(),
                }
            }

            LinkEvent::AclConnected { address } => {
                if self.is_device(&address) {
                    self.on_connected();
                }
                Vec::new()
            }

            LinkEvent::SocketConnected => {
                self.on_connected();
                Vec::new()
            }

            LinkEvent::AclDisconnected { address } => {
                if self.is_device(&address) {
                    self.on_disconnected();
                }
                Vec::new()
            }

            LinkEvent::SocketLost => {
                self.on_disconnected();
                Vec::new()
            }
        }
    }

    /// Forget the remembered device and go idle.
    ///
    /// The returned actions close the socket and ask the adapter to remove
    /// the bond. The machine stays idle until started again.
    pub fn unpair(&mut self) -> Vec<LinkAction> {
        let mut actions = vec![LinkAction::CloseSocket];
        if matches!(self.phase, ConnectionPhase::DeviceSelection(_)) {
            actions.push(LinkAction::CancelDiscovery);
        }
        if self.presented.take().is_some() {
            actions.push(LinkAction::DismissDevice);
        }
        if let Some(device) = self.device.take() {
            info!("Link: unpairing {}", device.handle());
            device.set_bond_state(BondState::None);
            actions.push(LinkAction::RemoveBond(device.handle().clone()));
        }
        self.started = false;
        self.deadline = None;
        self.set_phase(ConnectionPhase::Idle);
        actions
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn set_phase(&mut self, phase: ConnectionPhase) {
        if self.phase != phase {
            debug!("Link: {} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn is_device(&self, address: &str) -> bool {
        self.device.as_ref().is_some_and(|d| d.address() == address)
    }

    fn evaluate_start(&mut self, view: &AdapterView) -> Vec<LinkAction> {
        match view.state {
            AdapterState::Unsupported => {
                warn!("Link: no bluetooth adapter");
                self.set_phase(ConnectionPhase::BluetoothUnavailable(
                    UnavailableReason::NotSupported,
                ));
                Vec::new()
            }
            AdapterState::Disabled => {
                self.set_phase(ConnectionPhase::BluetoothEnabling);
                vec![LinkAction::RequestEnable]
            }
            AdapterState::Enabled => {
                self.set_phase(ConnectionPhase::Enabled);
                Vec::new()
            }
        }
    }

    fn evaluate_enabled(&mut self, now: Instant, view: &AdapterView) -> Vec<LinkAction> {
        let Some(device) = self.device.clone() else {
            self.deadline = Some(now + self.config.discovery_timeout());
            self.set_phase(ConnectionPhase::DeviceSelection(SelectionStatus::InProgress));
            return vec![LinkAction::StartDiscovery];
        };

        match view.bond.unwrap_or_default() {
            BondState::Bonded => self.on_bonded(device),
            BondState::Bonding => {
                device.set_bond_state(BondState::Bonding);
                self.deadline = Some(now + self.config.discovery_timeout());
                self.set_phase(ConnectionPhase::Pairing);
                Vec::new()
            }
            BondState::None => {
                device.set_bond_state(BondState::Bonding);
                self.deadline = Some(now + self.config.discovery_timeout());
                self.set_phase(ConnectionPhase::Pairing);
                vec![LinkAction::CreateBond(device.handle().clone())]
            }
        }
    }

    fn on_bonded(&mut self, device: Arc<PairedDevice>) -> Vec<LinkAction> {
        info!("Link: bonded with {}", device.handle());
        device.set_bond_state(BondState::Bonded);
        self.deadline = None;
        self.set_phase(ConnectionPhase::Paired);
        vec![LinkAction::OpenSocket(device)]
    }

    fn fail_pairing(&mut self, now: Instant) -> Vec<LinkAction> {
        let mut actions = vec![LinkAction::CancelDiscovery];
        if self.presented.take().is_some() {
            actions.push(LinkAction::DismissDevice);
        }
        self.deadline = Some(now + self.config.pair_retry_backoff());
        self.set_phase(ConnectionPhase::PairFailed);
        actions
    }

    fn bond_lost(&mut self) -> Vec<LinkAction> {
        if let Some(device) = &self.device {
            warn!("Link: bond with {} lost", device.handle());
            device.set_bond_state(BondState::None);
        }
        self.set_phase(ConnectionPhase::Enabled);
        vec![LinkAction::CloseSocket]
    }

    fn adapter_lost(&mut self) -> Vec<LinkAction> {
        let mut actions = Vec::new();
        if self.phase.is_linked() {
            actions.push(LinkAction::CloseSocket);
        }
        if matches!(self.phase, ConnectionPhase::DeviceSelection(_)) {
            actions.push(LinkAction::CancelDiscovery);
        }
        if self.presented.take().is_some() {
            actions.push(LinkAction::DismissDevice);
        }
        info!("Link: adapter disabled");
        self.deadline = None;
        self.set_phase(ConnectionPhase::Idle);
        actions
    }

    fn on_connected(&mut self) {
        if matches!(
            self.phase,
            ConnectionPhase::Paired | ConnectionPhase::Disconnected
        ) {
            self.set_phase(ConnectionPhase::Connected);
        }
    }

    fn on_disconnected(&mut self) {
        if matches!(self.phase, ConnectionPhase::Paired | ConnectionPhase::Connected) {
            self.set_phase(ConnectionPhase::Disconnected);
        }
    }
}
