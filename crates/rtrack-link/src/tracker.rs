//! The tracker service: supervisor task plus its handle.
//!
//! [`Tracker::spawn`] starts one supervisor task that owns the
//! [`ConnectionMachine`], the [`BluetoothAdapter`] and the
//! [`CommandChannel`], and starts a session task whenever the machine asks
//! for a socket. Everything else talks to it through a [`TrackerHandle`].

use std::collections::VecDeque;
use std::sync::Arc;

use rtrack_metrics::metric_defs;
use rtrack_protocol::{Command, CommandKind};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterView, BluetoothAdapter, BondRemoval};
use crate::commands::{AckStates, CommandAckState, CommandChannel};
use crate::config::TrackerConfig;
use crate::device::DeviceHandle;
use crate::error::{LinkError, LinkResult};
use crate::machine::{ConnectionMachine, LinkAction, LinkEvent};
use crate::phase::ConnectionPhase;
use crate::session::{Outbound, Session, SessionConfig, SessionEvent, SessionReport};
use crate::snapshot::{FlightSnapshot, LinkStatus};
use crate::transport::Transport;

/// Requests from a [`TrackerHandle`] to the supervisor.
#[derive(Debug)]
enum TrackerCommand {
    Start,
    Unpair {
        reply: oneshot::Sender<Option<BondRemoval>>,
    },
    ConfirmDevice(DeviceHandle),
    DeclineDevice(DeviceHandle),
    Send {
        command: Command,
        reply: oneshot::Sender<LinkResult<()>>,
    },
    Acknowledge(CommandKind),
    Shutdown,
}

/// Entry point for the tracker service.
pub struct Tracker;

impl Tracker {
    /// Spawn the supervisor on the current tokio runtime and start the
    /// connection lifecycle.
    pub fn spawn<A, T>(config: TrackerConfig, mut adapter: A, transport: T) -> TrackerHandle
    where
        A: BluetoothAdapter,
        T: Transport,
    {
        let remembered = config
            .device
            .address
            .clone()
            .map(|address| DeviceHandle::new(address, config.device.name.clone()));
        let machine = ConnectionMachine::new(config.link.clone(), remembered);

        let (status_tx, status_rx) = watch::channel(LinkStatus::default());
        let (snapshot_tx, snapshot_rx) = watch::channel(FlightSnapshot::default());
        let (acks_tx, acks_rx) = watch::channel(AckStates::default());
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let adapter_events = adapter.take_events();

        let supervisor = Supervisor {
            commands: CommandChannel::new(config.commands.ack_timeout()),
            config,
            machine,
            adapter,
            transport: Arc::new(transport),
            session: None,
            sessions_spawned: 0,
            session_tx,
            status: status_tx,
            snapshot: Arc::new(snapshot_tx),
            acks: acks_tx,
        };
        let task = tokio::spawn(supervisor.run(commands_rx, adapter_events, session_rx));

        TrackerHandle {
            commands: commands_tx,
            status: status_rx,
            snapshot: snapshot_rx,
            acks: acks_rx,
            task,
        }
    }
}

/// Handle to a running tracker.
///
/// Readers subscribe to the published state; none of the accessors block.
pub struct TrackerHandle {
    commands: mpsc::Sender<TrackerCommand>,
    status: watch::Receiver<LinkStatus>,
    snapshot: watch::Receiver<FlightSnapshot>,
    acks: watch::Receiver<AckStates>,
    task: JoinHandle<()>,
}

impl TrackerHandle {
    /// Current connection phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.status.borrow().phase
    }

    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    pub fn snapshot(&self) -> FlightSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<FlightSnapshot> {
        self.snapshot.clone()
    }

    pub fn ack_state(&self, kind: CommandKind) -> CommandAckState {
        self.acks.borrow().get(kind)
    }

    pub fn subscribe_acks(&self) -> watch::Receiver<AckStates> {
        self.acks.clone()
    }

    /// Queue a command for the device.
    ///
    /// Returns once the command is accepted for sending; follow its outcome
    /// through [`ack_state`](Self::ack_state).
    pub async fn send_command(&self, command: Command) -> LinkResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(TrackerCommand::Send { command, reply }).await?;
        rx.await.map_err(|_| LinkError::ChannelClosed)?
    }

    /// Clear a resolved command so another of its kind can be sent.
    pub async fn acknowledge(&self, kind: CommandKind) -> LinkResult<()> {
        self.request(TrackerCommand::Acknowledge(kind)).await
    }

    /// Forget the paired device and go idle.
    ///
    /// Returns how the adapter handled bond removal, or `None` if no device
    /// was remembered.
    pub async fn unpair(&self) -> LinkResult<Option<BondRemoval>> {
        let (reply, rx) = oneshot::channel();
        self.request(TrackerCommand::Unpair { reply }).await?;
        rx.await.map_err(|_| LinkError::ChannelClosed)
    }

    /// Restart the lifecycle after an unpair.
    pub async fn start(&self) -> LinkResult<()> {
        self.request(TrackerCommand::Start).await
    }

    pub async fn confirm_device(&self, device: DeviceHandle) -> LinkResult<()> {
        self.request(TrackerCommand::ConfirmDevice(device)).await
    }

    pub async fn decline_device(&self, device: DeviceHandle) -> LinkResult<()> {
        self.request(TrackerCommand::DeclineDevice(device)).await
    }

    /// Stop the tracker and wait for its tasks to exit.
    pub async fn shutdown(self) {
        let _ = self.commands.send(TrackerCommand::Shutdown).await;
        let _ = self.task.await;
    }

    async fn request(&self, command: TrackerCommand) -> LinkResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| LinkError::ChannelClosed)
    }
}

// ============================================================================
// Supervisor
// ============================================================================

struct Supervisor<A: BluetoothAdapter, T: Transport> {
    config: TrackerConfig,
    machine: ConnectionMachine,
    commands: CommandChannel,
    adapter: A,
    transport: Arc<T>,
    session: Option<Session>,
    /// Id for the next session; ids are never reused.
    sessions_spawned: u64,
    session_tx: mpsc::UnboundedSender<SessionReport>,
    status: watch::Sender<LinkStatus>,
    snapshot: Arc<watch::Sender<FlightSnapshot>>,
    acks: watch::Sender<AckStates>,
}

impl<A: BluetoothAdapter, T: Transport> Supervisor<A, T> {
    async fn run(
        mut self,
        mut commands_rx: mpsc::Receiver<TrackerCommand>,
        mut adapter_events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
        mut session_rx: mpsc::UnboundedReceiver<SessionReport>,
    ) {
        info!("Tracker: starting");
        let view = self.view();
        let actions = self.machine.start(&view);
        self.execute(actions).await;

        // Only a tick moves this later; events can only bring it forward.
        let mut next_tick = self.machine.next_wakeup(Instant::now());

        loop {
            let now = Instant::now();
            next_tick = next_tick.min(self.machine.next_wakeup(now));
            let mut wake = next_tick;
            if let Some(deadline) = self.commands.next_deadline() {
                wake = wake.min(deadline.max(now));
            }

            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {
                    let now = Instant::now();
                    if now >= next_tick {
                        let view = self.view();
                        let actions = self.machine.tick(now, &view);
                        self.execute(actions).await;
                        next_tick = self.machine.next_wakeup(now);
                    }
                    if self.commands.poll_timeouts(now) {
                        self.publish_acks();
                    }
                }

                command = commands_rx.recv() => match command {
                    // Every handle is gone or one asked to stop.
                    None | Some(TrackerCommand::Shutdown) => break,
                    Some(command) => self.handle_command(command).await,
                },

                Some(event) = next_adapter_event(&mut adapter_events) => {
                    let actions = self.machine.handle(event, Instant::now());
                    self.execute(actions).await;
                }

                Some(report) = session_rx.recv() => {
                    self.handle_session_report(report).await;
                }
            }
        }

        if let Some(session) = self.session.take() {
            session.close().await;
        }
        info!("Tracker: stopped");
    }

    fn view(&self) -> AdapterView {
        AdapterView::sample(&self.adapter, self.machine.device().map(|d| d.handle()))
    }

    async fn handle_command(&mut self, command: TrackerCommand) {
        match command {
            TrackerCommand::Start => {
                let view = self.view();
                let actions = self.machine.start(&view);
                self.execute(actions).await;
            }

            TrackerCommand::Unpair { reply } => {
                let actions = self.machine.unpair();
                let removal = self.execute(actions).await;
                let _ = reply.send(removal);
            }

            TrackerCommand::ConfirmDevice(device) => {
                let actions = self.machine.handle(LinkEvent::DeviceConfirmed(device), Instant::now());
                self.execute(actions).await;
            }

            TrackerCommand::DeclineDevice(device) => {
                let actions = self.machine.handle(LinkEvent::DeviceDeclined(device), Instant::now());
                self.execute(actions).await;
            }

            TrackerCommand::Send { command, reply } => {
                let result = self.send(command);
                let _ = reply.send(result);
                self.publish_acks();
            }

            TrackerCommand::Acknowledge(kind) => {
                if self.commands.acknowledge(kind) {
                    self.publish_acks();
                }
            }

            // Handled by the run loop.
            TrackerCommand::Shutdown => {}
        }
    }

    fn send(&mut self, command: Command) -> LinkResult<()> {
        let kind = command.kind();
        let bytes = self
            .commands
            .request(command, self.machine.phase(), Instant::now())?;
        let queued = self
            .session
            .as_ref()
            .is_some_and(|s| s.try_send(Outbound { kind, bytes }));
        if !queued {
            self.commands.mark_send_failed(kind);
        }
        Ok(())
    }

    async fn handle_session_report(&mut self, report: SessionReport) {
        let current = self.session.as_ref().map(Session::id);
        if current != Some(report.session) {
            debug!(
                "Tracker: dropping {:?} from closed session {}",
                report.event, report.session
            );
            return;
        }
        let now = Instant::now();
        match report.event {
            SessionEvent::Connected => {
                let actions = self.machine.handle(LinkEvent::SocketConnected, now);
                self.execute(actions).await;
            }
            SessionEvent::Lost => {
                let actions = self.machine.handle(LinkEvent::SocketLost, now);
                self.execute(actions).await;
            }
            SessionEvent::Decoded(message) => {
                if self.commands.observe(&message, now) {
                    self.publish_acks();
                }
            }
            SessionEvent::Written { kind, ok } => {
                if ok {
                    self.commands.mark_sent(kind, now);
                } else {
                    self.commands.mark_send_failed(kind);
                }
                self.publish_acks();
            }
        }
    }

    /// Carry out machine actions. Returns the bond removal outcome if one
    /// was requested.
    async fn execute(&mut self, actions: Vec<LinkAction>) -> Option<BondRemoval> {
        let mut removal = None;
        let mut queue: VecDeque<LinkAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                LinkAction::RequestEnable => {
                    if let Err(e) = self.adapter.request_enable() {
                        warn!("Tracker: enable request failed: {}", e);
                    }
                }
                LinkAction::StartDiscovery => {
                    if let Err(e) = self.adapter.start_discovery() {
                        warn!("Tracker: discovery failed to start: {}", e);
                    }
                }
                LinkAction::CancelDiscovery => self.adapter.cancel_discovery(),
                LinkAction::PresentDevice(device) => {
                    if self.auto_confirms(&device) {
                        info!("Tracker: auto-confirming {}", device);
                        let follow = self
                            .machine
                            .handle(LinkEvent::DeviceConfirmed(device), Instant::now());
                        queue.extend(follow);
                    }
                }
                LinkAction::DismissDevice => {}
                LinkAction::CreateBond(device) => {
                    if let Err(e) = self.adapter.create_bond(&device) {
                        warn!("Tracker: bonding with {} failed to start: {}", device, e);
                    }
                }
                LinkAction::RemoveBond(device) => {
                    let outcome = self.adapter.remove_bond(&device);
                    if outcome == BondRemoval::Unsupported {
                        warn!(
                            "Tracker: platform cannot remove the bond with {}; forgot it locally only",
                            device
                        );
                    }
                    removal = Some(outcome);
                }
                LinkAction::OpenSocket(device) => {
                    if let Some(old) = self.session.take() {
                        old.close().await;
                    }
                    debug!("Tracker: opening session for {}", device.handle());
                    self.sessions_spawned += 1;
                    self.session = Some(Session::spawn(
                        self.sessions_spawned,
                        device,
                        Arc::clone(&self.transport),
                        SessionConfig {
                            header_scan: self.config.framing.header_scan,
                            reconnect_backoff: self.config.link.reconnect_backoff(),
                            queue_depth: self.config.commands.queue_depth,
                        },
                        self.session_tx.clone(),
                        Arc::clone(&self.snapshot),
                    ));
                }
                LinkAction::CloseSocket => {
                    if let Some(session) = self.session.take() {
                        debug!("Tracker: closing session");
                        session.close().await;
                    }
                }
            }
        }
        self.publish_status();
        removal
    }

    fn auto_confirms(&self, device: &DeviceHandle) -> bool {
        match (&self.config.device.auto_confirm_prefix, &device.name) {
            (Some(prefix), Some(name)) => name.starts_with(prefix.as_str()),
            _ => false,
        }
    }

    fn publish_status(&self) {
        let status = LinkStatus {
            phase: self.machine.phase(),
            device: self.machine.device().map(|d| d.handle().clone()),
            presented: self.machine.presented_device().cloned(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            if current.phase != status.phase {
                info!("Tracker: {}", status.phase);
                metrics::gauge!(metric_defs::LINK_PHASE.name).set(status.phase.ordinal() as f64);
                if status.phase == ConnectionPhase::PairFailed {
                    metrics::counter!(metric_defs::LINK_PAIR_FAILURES.name).increment(1);
                }
            }
            *current = status;
            true
        });
    }

    fn publish_acks(&self) {
        let states = self.commands.states();
        self.acks.send_if_modified(|current| {
            let changed = *current != states;
            *current = states;
            changed
        });
    }
}

async fn next_adapter_event(
    events: &mut Option<mpsc::UnboundedReceiver<LinkEvent>>,
) -> Option<LinkEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
