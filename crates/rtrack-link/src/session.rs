//! Session task: owns the transport stream for one paired device.
//!
//! The task connects, reads and frames the stream, decodes frames into the
//! flight snapshot and writes queued commands. A read or write error drops
//! the stream and reconnects at once; a failed connect waits the reconnect
//! backoff before trying again. Dropping the [`Session`] stops the task.

use std::sync::Arc;
use std::time::Duration;

use rtrack_metrics::metric_defs;
use rtrack_protocol::{CommandKind, Framer, FramerEvent, HeaderScan, Message};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::device::PairedDevice;
use crate::snapshot::FlightSnapshot;
use crate::transport::Transport;

/// Read buffer size per socket read.
const READ_BUFFER_SIZE: usize = 256;

/// A command queued for the socket.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub kind: CommandKind,
    pub bytes: Vec<u8>,
}

/// What the session reports back to the supervisor.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Connected,
    Lost,
    Decoded(Message),
    Written { kind: CommandKind, ok: bool },
}

/// A [`SessionEvent`] tagged with the session that produced it.
///
/// Events still queued from a replaced session carry its old id and are
/// dropped by the supervisor.
#[derive(Debug)]
pub(crate) struct SessionReport {
    pub session: u64,
    pub event: SessionEvent,
}

struct Reporter {
    session: u64,
    tx: mpsc::UnboundedSender<SessionReport>,
}

impl Reporter {
    fn send(&self, event: SessionEvent) {
        let _ = self.tx.send(SessionReport {
            session: self.session,
            event,
        });
    }
}

pub(crate) struct SessionConfig {
    pub header_scan: HeaderScan,
    pub reconnect_backoff: Duration,
    pub queue_depth: usize,
}

/// Handle to a running session task.
pub(crate) struct Session {
    id: u64,
    outbound: mpsc::Sender<Outbound>,
    _shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Session {
    /// Spawn a session for `device`. `id` tags every event it reports.
    pub fn spawn<T: Transport>(
        id: u64,
        device: Arc<PairedDevice>,
        transport: Arc<T>,
        config: SessionConfig,
        events: mpsc::UnboundedSender<SessionReport>,
        snapshot: Arc<watch::Sender<FlightSnapshot>>,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::channel(config.queue_depth.max(1));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_session(
            device,
            transport,
            config,
            outbound_rx,
            shutdown_rx,
            Reporter { session: id, tx: events },
            snapshot,
        ));
        Session {
            id,
            outbound,
            _shutdown: shutdown,
            task,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a command without waiting. Fails if the queue is full or the
    /// task has stopped.
    pub fn try_send(&self, outbound: Outbound) -> bool {
        self.outbound.try_send(outbound).is_ok()
    }

    /// Stop the task and wait for it to exit.
    pub async fn close(self) {
        let Session {
            outbound,
            _shutdown,
            task,
            ..
        } = self;
        drop(outbound);
        drop(_shutdown);
        let _ = task.await;
    }
}

async fn run_session<T: Transport>(
    device: Arc<PairedDevice>,
    transport: Arc<T>,
    config: SessionConfig,
    mut outbound: mpsc::Receiver<Outbound>,
    mut shutdown: oneshot::Receiver<()>,
    events: Reporter,
    snapshot: Arc<watch::Sender<FlightSnapshot>>,
) {
    let mut framer = Framer::new(config.header_scan);
    let mut attempts: u64 = 0;

    loop {
        if attempts > 0 {
            metrics::counter!(metric_defs::LINK_RECONNECTS.name).increment(1);
        }
        attempts += 1;

        let connect = transport.connect(&device);
        let stream = tokio::select! {
            _ = &mut shutdown => return,
            result = connect => result,
        };
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Session[{}]: connect failed: {}", device.address(), e);
                events.send(SessionEvent::Lost);
                tokio::select! {
                    _ = &mut shutdown => return,
                    _ = tokio::time::sleep(config.reconnect_backoff) => continue,
                }
            }
        };

        info!("Session[{}]: connected", device.address());
        events.send(SessionEvent::Connected);
        framer.reset();

        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut read_buf = [0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Session[{}]: shutting down", device.address());
                    return;
                }

                result = reader.read(&mut read_buf) => {
                    match result {
                        Ok(0) => {
                            info!("Session[{}]: stream closed by peer", device.address());
                            break;
                        }
                        Ok(n) => {
                            trace!("Session[{}]: read {} bytes", device.address(), n);
                            for event in framer.push(&read_buf[..n]) {
                                handle_framer_event(&device, event, &events, &snapshot);
                            }
                        }
                        Err(e) => {
                            warn!("Session[{}]: read failed: {}", device.address(), e);
                            break;
                        }
                    }
                }

                Some(out) = outbound.recv() => {
                    // A peer that stops draining the socket must not block shutdown.
                    let result = tokio::select! {
                        _ = &mut shutdown => {
                            debug!("Session[{}]: shutting down mid-write", device.address());
                            return;
                        }
                        result = async {
                            writer.write_all(&out.bytes).await?;
                            writer.flush().await
                        } => result,
                    };
                    let ok = result.is_ok();
                    events.send(SessionEvent::Written { kind: out.kind, ok });
                    if let Err(e) = result {
                        warn!("Session[{}]: write of {} failed: {}", device.address(), out.kind, e);
                        break;
                    }
                    debug!("Session[{}]: wrote {} ({} bytes)", device.address(), out.kind, out.bytes.len());
                }
            }
        }

        // Abort any partial frame; the next connection starts clean.
        framer.reset();
        events.send(SessionEvent::Lost);
    }
}

fn handle_framer_event(
    device: &PairedDevice,
    event: FramerEvent,
    events: &Reporter,
    snapshot: &watch::Sender<FlightSnapshot>,
) {
    match event {
        FramerEvent::Frame(frame) => match Message::decode(&frame) {
            Ok(message) => {
                metrics::counter!(metric_defs::FRAMES_DECODED.name, "kind" => frame.kind.name())
                    .increment(1);
                let now = Instant::now();
                snapshot.send_modify(|s| s.apply(message.clone(), now));
                events.send(SessionEvent::Decoded(message));
            }
            Err(e) => {
                metrics::counter!(metric_defs::DECODE_ERRORS.name, "kind" => frame.kind.name())
                    .increment(1);
                debug!("Session[{}]: dropping {} frame: {}", device.address(), frame.kind, e);
            }
        },
        FramerEvent::Discarded { bytes } => {
            metrics::counter!(metric_defs::FRAMING_DISCARDED_BYTES.name).increment(bytes as u64);
        }
        FramerEvent::Overflow { discarded } => {
            metrics::counter!(metric_defs::FRAMING_OVERFLOWS.name).increment(1);
            debug!("Session[{}]: framing overflow, {} bytes dropped", device.address(), discarded);
        }
    }
}
