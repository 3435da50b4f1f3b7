//! Link error types.

use std::io;

use rtrack_protocol::CommandKind;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the tracker link.
///
/// None of these are fatal to the tracker: transport errors lead to a
/// reconnect, pairing errors to a backoff and retry.
#[derive(Error, Debug)]
pub enum LinkError {
    /// The Bluetooth adapter refused or failed an operation.
    #[error("adapter error: {0}")]
    Adapter(String),

    /// Transport I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Commands need a paired or connected device.
    #[error("not connected to a paired device")]
    NotConnected,

    /// A command of this kind is still unresolved.
    #[error("a {0} command is already outstanding")]
    CommandBusy(CommandKind),

    /// The tracker task has stopped.
    #[error("tracker channel closed")]
    ChannelClosed,

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;
