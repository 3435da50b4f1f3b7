//! Message framing over the receiver byte stream.
//!
//! The receiver sends fixed-length messages with no length prefix and no
//! delimiter. A message starts with a 3-byte ASCII header that implies its
//! length:
//!
//! ```text
//! +-----+----------------------------+
//! | PRE | 71 bytes                   |   74 bytes total
//! +-----+----------------------------+
//! | TLM | 81 bytes                   |   84 bytes total
//! +-----+----------------------------+
//! ```
//!
//! The framer runs `SearchingHeader -> Accumulating -> Complete | Overflow`.
//! How the header is searched for is selected by [`HeaderScan`].

use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::types::MessageKind;

/// How the framer looks for a header while searching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderScan {
    /// Treat input as one continuous stream and slide over it looking for a
    /// header. Headers split across reads are found, and several messages in
    /// one read are all emitted.
    #[default]
    Sliding,
    /// Every read made while searching must start with a header. While
    /// accumulating, whole reads are appended; a read that overshoots the
    /// buffer capacity without landing exactly on the message length
    /// overflows and resets framing.
    Anchored,
}

/// One complete message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    /// The whole message, header included.
    pub bytes: Bytes,
}

impl Frame {
    /// Message bytes, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Something the framer produced while consuming input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// A complete message.
    Frame(Frame),
    /// Accumulated bytes exceeded the buffer capacity and were dropped.
    Overflow { discarded: usize },
    /// Bytes that did not belong to any message were dropped.
    Discarded { bytes: usize },
}

/// Running framer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramerStats {
    pub frames: u64,
    pub discarded_bytes: u64,
    pub overflows: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramerState {
    SearchingHeader,
    Accumulating(MessageKind),
}

/// Splits the receiver byte stream into [`Frame`]s.
#[derive(Debug)]
pub struct Framer {
    mode: HeaderScan,
    state: FramerState,
    buffer: BytesMut,
    stats: FramerStats,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(HeaderScan::default())
    }
}

impl Framer {
    /// Create a framer using the given header-scan mode.
    pub fn new(mode: HeaderScan) -> Self {
        Framer {
            mode,
            state: FramerState::SearchingHeader,
            buffer: BytesMut::with_capacity(FRAME_BUFFER_CAPACITY),
            stats: FramerStats::default(),
        }
    }

    /// The header-scan mode in use.
    pub fn mode(&self) -> HeaderScan {
        self.mode
    }

    /// Counters since creation.
    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    /// Number of bytes held for the message in progress.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Kind of the message being accumulated, if a header has been matched.
    pub fn pending_kind(&self) -> Option<MessageKind> {
        match self.state {
            FramerState::SearchingHeader => None,
            FramerState::Accumulating(kind) => Some(kind),
        }
    }

    /// Abort the message in progress and go back to header search.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            debug!("framer reset, dropping {} buffered bytes", self.buffer.len());
        }
        self.buffer.clear();
        self.state = FramerState::SearchingHeader;
    }

    /// Consume one read worth of bytes.
    ///
    /// Events are returned in stream order.
    pub fn push(&mut self, data: &[u8]) -> Vec<FramerEvent> {
        let mut events = Vec::new();
        match self.mode {
            HeaderScan::Sliding => self.push_sliding(data, &mut events),
            HeaderScan::Anchored => self.push_anchored(data, &mut events),
        }
        events
    }

    fn push_sliding(&mut self, mut input: &[u8], events: &mut Vec<FramerEvent>) {
        loop {
            match self.state {
                FramerState::SearchingHeader => {
                    let room = FRAME_BUFFER_CAPACITY - self.buffer.len();
                    let take = room.min(input.len());
                    self.buffer.extend_from_slice(&input[..take]);
                    input = &input[take..];

                    match find_header(&self.buffer) {
                        Some((pos, kind)) => {
                            if pos > 0 {
                                self.discard(pos, events);
                            }
                            trace!("matched {} header", kind);
                            self.state = FramerState::Accumulating(kind);
                        }
                        None => {
                            let keep = partial_header_suffix(&self.buffer);
                            let drop = self.buffer.len() - keep;
                            if drop > 0 {
                                self.discard(drop, events);
                            }
                            if input.is_empty() {
                                return;
                            }
                        }
                    }
                }
                FramerState::Accumulating(kind) => {
                    let target = kind.frame_len();
                    if self.buffer.len() < target {
                        let take = (target - self.buffer.len()).min(input.len());
                        self.buffer.extend_from_slice(&input[..take]);
                        input = &input[take..];
                    }
                    if self.buffer.len() < target {
                        return;
                    }
                    let bytes = self.buffer.split_to(target).freeze();
                    self.emit(kind, bytes, events);
                    // Leftover bytes go back through header search.
                    self.state = FramerState::SearchingHeader;
                }
            }
        }
    }

    fn push_anchored(&mut self, input: &[u8], events: &mut Vec<FramerEvent>) {
        if input.is_empty() {
            return;
        }
        let kind = match self.state {
            FramerState::SearchingHeader => {
                self.buffer.clear();
                self.buffer.extend_from_slice(input);
                match MessageKind::from_header(&self.buffer) {
                    Some(kind) => {
                        trace!("matched {} header", kind);
                        self.state = FramerState::Accumulating(kind);
                        kind
                    }
                    None => {
                        let len = self.buffer.len();
                        self.discard(len, events);
                        return;
                    }
                }
            }
            FramerState::Accumulating(kind) => {
                self.buffer.extend_from_slice(input);
                kind
            }
        };

        let len = self.buffer.len();
        if len == kind.frame_len() {
            let bytes = self.buffer.split().freeze();
            self.emit(kind, bytes, events);
            self.state = FramerState::SearchingHeader;
        } else if len > FRAME_BUFFER_CAPACITY {
            debug!(
                "framer overflow: {} bytes buffered for {} message of {}",
                len,
                kind,
                kind.frame_len()
            );
            self.stats.overflows += 1;
            self.reset();
            events.push(FramerEvent::Overflow { discarded: len });
        }
    }

    fn discard(&mut self, n: usize, events: &mut Vec<FramerEvent>) {
        debug!("framer discarding {} unrecognized bytes", n);
        self.buffer.advance(n);
        self.stats.discarded_bytes += n as u64;
        events.push(FramerEvent::Discarded { bytes: n });
    }

    fn emit(&mut self, kind: MessageKind, bytes: Bytes, events: &mut Vec<FramerEvent>) {
        trace!("framed {} message ({} bytes)", kind, bytes.len());
        self.stats.frames += 1;
        events.push(FramerEvent::Frame(Frame { kind, bytes }));
    }
}

/// Find the first header in `buf`.
fn find_header(buf: &[u8]) -> Option<(usize, MessageKind)> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    (0..=buf.len() - HEADER_LEN)
        .find_map(|pos| MessageKind::from_header(&buf[pos..]).map(|kind| (pos, kind)))
}

/// Length of the longest suffix of `buf` that could still become a header.
fn partial_header_suffix(buf: &[u8]) -> usize {
    (1..HEADER_LEN)
        .rev()
        .filter(|&n| n <= buf.len())
        .find(|&n| {
            let tail = &buf[buf.len() - n..];
            MessageKind::ALL
                .iter()
                .any(|kind| kind.header().starts_with(tail))
        })
        .unwrap_or(0)
}
