//! Transport errors

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not connected to a device endpoint")]
    NotConnected,

    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    #[error("Timed out connecting to {0}")]
    ConnectionTimeout(String),

    #[error("Read timeout")]
    ReadTimeout,

    /// The peer closed the stream, or the endpoint task stopped
    #[error("Connection closed by remote")]
    ConnectionClosed,

    #[error("Socket I/O error: {0}")]
    Io(#[from] io::Error),

    /// No endpoint listens at the socket path
    #[error("No endpoint at {0}")]
    InvalidAddress(String),

    /// Peer sent something the framing cannot accept
    #[error("Protocol violation: {0}")]
    Protocol(String),
}

impl Error {
    /// Check if the stream should be considered gone
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::NotConnected | Self::Io(_))
    }
}
