//! End-to-end tests for the tracker supervisor.
//!
//! A scripted adapter stands in for the platform Bluetooth stack and an
//! in-memory duplex pipe stands in for the device socket. Time is paused, so
//! supervision ticks, timeouts and backoffs run instantly.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rtrack_link::{
    AdapterState, BluetoothAdapter, BondRemoval, BondState, CommandAckState, ConnectionPhase,
    DeviceHandle, LinkError, LinkEvent, LinkResult, PairedDevice, SelectionStatus, Tracker,
    TrackerConfig, TrackerHandle, Transport,
};
use rtrack_protocol::{
    write_f32_reversed, write_f64_reversed, Command, CommandKind, DeployChannel, FlightState,
    LocatorConfig, HEADER_LEN, OFFSET_AGL_SAMPLES, OFFSET_FLIGHT_STATE, OFFSET_LATITUDE,
    TELEMETRY_HEADER, TELEMETRY_LEN,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

const LOCATOR_ADDRESS: &str = "00:11:22:33:44:55";

// ============================================================================
// Test doubles
// ============================================================================

struct AdapterScript {
    state: AdapterState,
    discovering: bool,
    bonds: HashMap<String, BondState>,
    /// Complete bonding as soon as it is requested.
    bond_on_request: bool,
    can_remove_bonds: bool,
    enable_requests: usize,
    bond_requests: Vec<String>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

#[derive(Clone)]
struct ScriptHandle(Arc<Mutex<AdapterScript>>);

impl ScriptHandle {
    fn emit(&self, event: LinkEvent) {
        let _ = self.0.lock().events.send(event);
    }

    fn bond_requests(&self) -> usize {
        self.0.lock().bond_requests.len()
    }
}

struct ScriptedAdapter {
    script: ScriptHandle,
    events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
}

impl ScriptedAdapter {
    fn new(state: AdapterState) -> (Self, ScriptHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let script = ScriptHandle(Arc::new(Mutex::new(AdapterScript {
            state,
            discovering: false,
            bonds: HashMap::new(),
            bond_on_request: true,
            can_remove_bonds: false,
            enable_requests: 0,
            bond_requests: Vec::new(),
            events: tx,
        })));
        let adapter = ScriptedAdapter {
            script: script.clone(),
            events: Some(rx),
        };
        (adapter, script)
    }

    /// An enabled adapter already bonded with the locator.
    fn bonded() -> (Self, ScriptHandle) {
        let (adapter, script) = Self::new(AdapterState::Enabled);
        script
            .0
            .lock()
            .bonds
            .insert(LOCATOR_ADDRESS.to_string(), BondState::Bonded);
        (adapter, script)
    }
}

impl BluetoothAdapter for ScriptedAdapter {
    fn state(&self) -> AdapterState {
        self.script.0.lock().state
    }

    fn request_enable(&mut self) -> LinkResult<()> {
        self.script.0.lock().enable_requests += 1;
        Ok(())
    }

    fn start_discovery(&mut self) -> LinkResult<()> {
        self.script.0.lock().discovering = true;
        Ok(())
    }

    fn cancel_discovery(&mut self) {
        self.script.0.lock().discovering = false;
    }

    fn is_discovering(&self) -> bool {
        self.script.0.lock().discovering
    }

    fn create_bond(&mut self, device: &DeviceHandle) -> LinkResult<()> {
        let mut script = self.script.0.lock();
        script.bond_requests.push(device.address.clone());
        if script.bond_on_request {
            script.bonds.insert(device.address.clone(), BondState::Bonded);
            let _ = script.events.send(LinkEvent::BondStateChanged {
                address: device.address.clone(),
                state: BondState::Bonded,
            });
        }
        Ok(())
    }

    fn remove_bond(&mut self, device: &DeviceHandle) -> BondRemoval {
        let mut script = self.script.0.lock();
        if script.can_remove_bonds {
            script.bonds.remove(&device.address);
            BondRemoval::Removed
        } else {
            BondRemoval::Unsupported
        }
    }

    fn bond_state(&self, device: &DeviceHandle) -> BondState {
        self.script
            .0
            .lock()
            .bonds
            .get(&device.address)
            .copied()
            .unwrap_or_default()
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.events.take()
    }
}

/// Hands the far end of every connection to the test.
struct DuplexTransport {
    peers: mpsc::UnboundedSender<DuplexStream>,
    buffer: usize,
}

impl DuplexTransport {
    fn new() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        Self::with_buffer(1024)
    }

    /// Pipes that hold at most `buffer` unread bytes per direction.
    fn with_buffer(buffer: usize) -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (DuplexTransport { peers, buffer }, rx)
    }
}

impl Transport for DuplexTransport {
    type Stream = DuplexStream;

    fn connect(&self, _device: &PairedDevice) -> impl Future<Output = io::Result<DuplexStream>> + Send {
        let (ours, theirs) = tokio::io::duplex(self.buffer);
        let result = self
            .peers
            .send(theirs)
            .map(|_| ours)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "test finished"));
        std::future::ready(result)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn remembered_config() -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.device.address = Some(LOCATOR_ADDRESS.to_string());
    config.device.name = Some("Kestrel".to_string());
    config
}

fn telemetry_frame(state: FlightState, agl: f32) -> Vec<u8> {
    let mut buf = vec![0u8; TELEMETRY_LEN];
    buf[..HEADER_LEN].copy_from_slice(&TELEMETRY_HEADER);
    let mut gps = Vec::new();
    write_f64_reversed(&mut gps, 4512.3456);
    write_f64_reversed(&mut gps, 7530.0);
    buf[OFFSET_LATITUDE..OFFSET_LATITUDE + gps.len()].copy_from_slice(&gps);
    buf[OFFSET_FLIGHT_STATE] = state.index();
    let mut sample = Vec::new();
    write_f32_reversed(&mut sample, agl);
    buf[OFFSET_AGL_SAMPLES..OFFSET_AGL_SAMPLES + sample.len()].copy_from_slice(&sample);
    buf
}

async fn wait_for_phase(tracker: &TrackerHandle, phase: ConnectionPhase) {
    let mut status = tracker.subscribe_status();
    tokio::time::timeout(Duration::from_secs(60), status.wait_for(|s| s.phase == phase))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {phase}"))
        .expect("tracker stopped");
}

async fn wait_for_ack(tracker: &TrackerHandle, kind: CommandKind, state: CommandAckState) {
    let mut acks = tracker.subscribe_acks();
    tokio::time::timeout(Duration::from_secs(60), acks.wait_for(|a| a.get(kind) == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {kind} to reach {state:?}"))
        .expect("tracker stopped");
}

/// Start a tracker with a bonded, remembered device and wait for it to
/// connect. Returns the far end of the socket.
async fn connected_tracker() -> (
    TrackerHandle,
    ScriptHandle,
    DuplexStream,
    mpsc::UnboundedReceiver<DuplexStream>,
) {
    let (adapter, script) = ScriptedAdapter::bonded();
    let (transport, mut peers) = DuplexTransport::new();
    let tracker = Tracker::spawn(remembered_config(), adapter, transport);
    let peer = peers.recv().await.expect("session should connect");
    wait_for_phase(&tracker, ConnectionPhase::Connected).await;
    (tracker, script, peer, peers)
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_remembered_bonded_device_connects() {
    let (tracker, _script, _peer, _peers) = connected_tracker().await;

    let status = tracker.status();
    assert_eq!(status.phase, ConnectionPhase::Connected);
    assert_eq!(
        status.device.map(|d| d.address),
        Some(LOCATOR_ADDRESS.to_string())
    );

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disabled_adapter_requests_enable() {
    let (adapter, script) = ScriptedAdapter::new(AdapterState::Disabled);
    let (transport, _peers) = DuplexTransport::new();
    let tracker = Tracker::spawn(remembered_config(), adapter, transport);

    wait_for_phase(&tracker, ConnectionPhase::BluetoothEnabling).await;
    assert_eq!(script.0.lock().enable_requests, 1);

    // Commands need a connection.
    let result = tracker
        .send_command(Command::DeploymentTest(DeployChannel::One))
        .await;
    assert!(matches!(result, Err(LinkError::NotConnected)));

    {
        let mut s = script.0.lock();
        s.state = AdapterState::Enabled;
        s.bonds.insert(LOCATOR_ADDRESS.to_string(), BondState::Bonded);
    }
    script.emit(LinkEvent::AdapterEnabled);
    wait_for_phase(&tracker, ConnectionPhase::Connected).await;

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_discovered_device_auto_confirmed_and_paired() {
    let (adapter, script) = ScriptedAdapter::new(AdapterState::Enabled);
    let (transport, mut peers) = DuplexTransport::new();
    let mut config = TrackerConfig::default();
    config.device.auto_confirm_prefix = Some("Kestrel".to_string());
    let tracker = Tracker::spawn(config, adapter, transport);

    wait_for_phase(
        &tracker,
        ConnectionPhase::DeviceSelection(SelectionStatus::InProgress),
    )
    .await;
    assert!(script.0.lock().discovering);

    script.emit(LinkEvent::DeviceFound(DeviceHandle::new(
        LOCATOR_ADDRESS,
        Some("Kestrel-7".to_string()),
    )));

    let _peer = peers.recv().await.expect("session should connect");
    wait_for_phase(&tracker, ConnectionPhase::Connected).await;
    assert_eq!(script.bond_requests(), 1);
    assert!(!script.0.lock().discovering);
    assert_eq!(
        tracker.status().device.and_then(|d| d.name),
        Some("Kestrel-7".to_string())
    );

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_presented_device_waits_for_user() {
    let (adapter, script) = ScriptedAdapter::new(AdapterState::Enabled);
    let (transport, mut peers) = DuplexTransport::new();
    let tracker = Tracker::spawn(TrackerConfig::default(), adapter, transport);

    wait_for_phase(
        &tracker,
        ConnectionPhase::DeviceSelection(SelectionStatus::InProgress),
    )
    .await;

    let stranger = DeviceHandle::new("AA:BB:CC:DD:EE:FF", Some("Headphones".to_string()));
    script.emit(LinkEvent::DeviceFound(stranger.clone()));

    let mut status = tracker.subscribe_status();
    status
        .wait_for(|s| s.presented.as_ref() == Some(&stranger))
        .await
        .expect("tracker stopped");

    tracker.decline_device(stranger).await.unwrap();
    status
        .wait_for(|s| s.presented.is_none())
        .await
        .expect("tracker stopped");
    assert_eq!(script.bond_requests(), 0);

    let locator = DeviceHandle::new(LOCATOR_ADDRESS, Some("Kestrel".to_string()));
    script.emit(LinkEvent::DeviceFound(locator.clone()));
    status
        .wait_for(|s| s.presented.as_ref() == Some(&locator))
        .await
        .expect("tracker stopped");
    tracker.confirm_device(locator).await.unwrap();

    let _peer = peers.recv().await.expect("session should connect");
    wait_for_phase(&tracker, ConnectionPhase::Connected).await;

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pairing_timeout_fails_then_retries() {
    let (adapter, script) = ScriptedAdapter::new(AdapterState::Enabled);
    script.0.lock().bond_on_request = false;
    let (transport, _peers) = DuplexTransport::new();
    let tracker = Tracker::spawn(remembered_config(), adapter, transport);

    wait_for_phase(&tracker, ConnectionPhase::Pairing).await;
    assert_eq!(script.bond_requests(), 1);

    wait_for_phase(&tracker, ConnectionPhase::PairFailed).await;
    wait_for_phase(&tracker, ConnectionPhase::Pairing).await;
    assert_eq!(script.bond_requests(), 2);

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_session_reconnects_after_peer_closes() {
    let (tracker, _script, peer, mut peers) = connected_tracker().await;

    drop(peer);
    let mut peer = peers.recv().await.expect("session should reconnect");
    wait_for_phase(&tracker, ConnectionPhase::Connected).await;

    // The new connection carries data.
    peer.write_all(&telemetry_frame(FlightState::WaitingForLaunch, 3.5))
        .await
        .unwrap();
    let mut snapshot = tracker.subscribe_snapshot();
    let snap = snapshot
        .wait_for(|s| s.telemetry.is_some())
        .await
        .expect("tracker stopped")
        .clone();
    assert_eq!(snap.telemetry.and_then(|t| t.latest_agl()), Some(3.5));

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unpair_goes_idle_and_reports_capability_gap() {
    let (tracker, _script, mut peer, _peers) = connected_tracker().await;

    let removal = tracker.unpair().await.unwrap();
    assert_eq!(removal, Some(BondRemoval::Unsupported));

    let status = tracker.status();
    assert_eq!(status.phase, ConnectionPhase::Idle);
    assert!(status.device.is_none());

    // The socket was closed.
    let mut buf = [0u8; 8];
    assert_eq!(peer.read(&mut buf).await.unwrap(), 0);

    // Nothing restarts on its own.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(tracker.phase(), ConnectionPhase::Idle);

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_bond_loss_detected_while_frames_stream() {
    let (tracker, script, mut peer, _peers) = connected_tracker().await;
    {
        let mut s = script.0.lock();
        s.bond_on_request = false;
        // The platform forgets the bond without reporting it.
        s.bonds.insert(LOCATOR_ADDRESS.to_string(), BondState::None);
    }

    // One frame a second, well inside the connected supervision interval.
    tokio::spawn(async move {
        for _ in 0..60 {
            let frame = telemetry_frame(FlightState::WaitingForLaunch, 1.0);
            if peer.write_all(&frame).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });

    wait_for_phase(&tracker, ConnectionPhase::Pairing).await;
    assert!(tracker.snapshot().records > 0);

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unpair_completes_while_write_is_stuck() {
    let (adapter, _script) = ScriptedAdapter::bonded();
    let (transport, mut peers) = DuplexTransport::with_buffer(8);
    let tracker = Tracker::spawn(remembered_config(), adapter, transport);
    let _peer = peers.recv().await.expect("session should connect");
    wait_for_phase(&tracker, ConnectionPhase::Connected).await;

    // The peer never reads, so this 25-byte command cannot be fully written.
    tracker
        .send_command(Command::LocatorConfig(LocatorConfig::default()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        tracker.ack_state(CommandKind::LocatorConfig),
        CommandAckState::SendRequested
    );

    let removal = tokio::time::timeout(Duration::from_secs(10), tracker.unpair())
        .await
        .expect("unpair must not wait on the stuck write")
        .unwrap();
    assert_eq!(removal, Some(BondRemoval::Unsupported));
    assert_eq!(tracker.phase(), ConnectionPhase::Idle);

    tracker.shutdown().await;
}

// ============================================================================
// Data and commands
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_split_frames_reach_snapshot() {
    let (tracker, _script, mut peer, _peers) = connected_tracker().await;

    let frame = telemetry_frame(FlightState::Launched, 42.0);
    peer.write_all(&frame[..30]).await.unwrap();
    peer.write_all(&frame[30..]).await.unwrap();

    let mut snapshot = tracker.subscribe_snapshot();
    let snap = snapshot
        .wait_for(|s| s.records == 1)
        .await
        .expect("tracker stopped")
        .clone();
    let telemetry = snap.telemetry.expect("telemetry decoded");
    assert_eq!(telemetry.flight_state, FlightState::Launched);
    assert_eq!(telemetry.latest_agl(), Some(42.0));
    assert!(snap.prelaunch.is_none());

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_command_written_once_and_acknowledged() {
    let (tracker, _script, mut peer, _peers) = connected_tracker().await;

    tracker
        .send_command(Command::DeploymentTest(DeployChannel::Two))
        .await
        .unwrap();

    let mut written = [0u8; 4];
    peer.read_exact(&mut written).await.unwrap();
    assert_eq!(&written, b"TST\x02");

    // One in flight per kind.
    let duplicate = tracker
        .send_command(Command::DeploymentTest(DeployChannel::One))
        .await;
    assert!(matches!(
        duplicate,
        Err(LinkError::CommandBusy(CommandKind::DeploymentTest))
    ));

    wait_for_ack(&tracker, CommandKind::DeploymentTest, CommandAckState::Sent).await;
    peer.write_all(&telemetry_frame(FlightState::WaitingForLaunch, 0.0))
        .await
        .unwrap();
    wait_for_ack(
        &tracker,
        CommandKind::DeploymentTest,
        CommandAckState::AckUpdated,
    )
    .await;

    tracker.acknowledge(CommandKind::DeploymentTest).await.unwrap();
    wait_for_ack(&tracker, CommandKind::DeploymentTest, CommandAckState::Idle).await;

    // The slot is free again.
    tracker
        .send_command(Command::DeploymentTest(DeployChannel::One))
        .await
        .unwrap();

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_config_times_out() {
    let (tracker, _script, mut peer, _peers) = connected_tracker().await;

    let config = LocatorConfig {
        deploy_mode: 1,
        launch_detect_altitude: 100,
        deploy_delay_1: 0,
        deploy_delay_2: 2,
        deploy_altitude_1: 600,
        deploy_altitude_2: 300,
        deploy_signal_duration: 1,
        device_name: "Kestrel".to_string(),
    };
    tracker
        .send_command(Command::LocatorConfig(config))
        .await
        .unwrap();

    let mut header = [0u8; HEADER_LEN];
    peer.read_exact(&mut header).await.unwrap();
    assert_eq!(&header, b"CFG");

    // Telemetry does not acknowledge a locator configuration.
    peer.write_all(&telemetry_frame(FlightState::WaitingForLaunch, 0.0))
        .await
        .unwrap();

    wait_for_ack(
        &tracker,
        CommandKind::LocatorConfig,
        CommandAckState::NotAcknowledged,
    )
    .await;

    tracker.shutdown().await;
}
