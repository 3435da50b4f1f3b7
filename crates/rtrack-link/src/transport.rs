//! The byte-stream transport seam.

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::device::PairedDevice;

/// Opens a bidirectional byte stream to a bonded device.
///
/// The session task owns the returned stream exclusively. Dropping it closes
/// the connection.
pub trait Transport: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self, device: &PairedDevice) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Connects to the device address as a TCP `host:port`.
///
/// Used with serial-to-TCP bridges that expose the receiver's serial link
/// on the network.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn connect(&self, device: &PairedDevice) -> io::Result<TcpStream> {
        debug!("Transport: connecting to {}", device.address());
        let stream = TcpStream::connect(device.address()).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
