//! Transport layer for virtual fingerprint devices
//!
//! Provides the Unix-socket endpoint a virtual device listens on, the
//! framing of the stimulus protocols (status lines, scripted commands and
//! raw images), and a client used by stimulus programs and tests.

pub mod command;
pub mod endpoint;
pub mod error;
pub mod image;
pub mod line;
pub mod unix;

pub use command::Command;
pub use endpoint::{Endpoint, EndpointEvent};
pub use error::{Error, Result};
pub use image::{Frames, ImageReader};
pub use line::{LineReader, PrintId, StatusLine};
pub use unix::UnixTransport;

use async_trait::async_trait;
use bytes::BytesMut;

/// Client side of a stimulus connection
///
/// Stimulus programs and tests use this to play the sensor: they write
/// images, result codes or commands to a device's socket and read back
/// what the device announces.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection to the device socket
    ///
    /// # Errors
    ///
    /// Fails when nothing is listening or the connect times out.
    async fn connect(&mut self) -> Result<()>;

    /// Close the connection; the device sees its client go away
    async fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Write all of `data` to the device
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Wait up to `timeout_secs` for whatever the device writes next
    ///
    /// # Errors
    ///
    /// `ReadTimeout` when nothing arrives in time and `ConnectionClosed`
    /// once the device hung up.
    async fn receive(&mut self, timeout_secs: u64) -> Result<BytesMut>;

    /// Socket path, for log messages
    fn remote_addr(&self) -> String;
}
