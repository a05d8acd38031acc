//! Single-client Unix-socket endpoint for virtual devices
//!
//! The endpoint runs one task that accepts connections, reads from the
//! current client and writes queued output. Everything it observes is
//! reported as an [`EndpointEvent`] on the channel given at bind time, so
//! the owning device handles I/O on its own schedule.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};

const READ_CHUNK: usize = 4096;

/// Something that happened on the endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    /// A client connected
    Connected,

    /// The current client sent data
    Data(Bytes),

    /// The current client went away
    Disconnected,

    /// A delay requested with [`Endpoint::wake_after`] ran out
    Wakeup,
}

/// Listening socket with at most one connected client
pub struct Endpoint {
    path: PathBuf,
    outgoing: mpsc::UnboundedSender<Bytes>,
    events: mpsc::UnboundedSender<EndpointEvent>,
    runtime: Handle,
    task: JoinHandle<()>,
    timer: Option<JoinHandle<()>>,
}

impl Endpoint {
    /// Bind a listener at `path` and start serving it
    ///
    /// A stale socket file at `path` is removed first.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket cannot be bound or no tokio
    /// runtime is running.
    pub fn bind(path: impl AsRef<Path>, events: mpsc::UnboundedSender<EndpointEvent>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let runtime = Handle::try_current().map_err(io::Error::other)?;

        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed stale socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }

        let listener = UnixListener::bind(&path)?;
        info!("Listening on {}", path.display());

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(serve(listener, events.clone(), outgoing_rx));

        Ok(Self {
            path,
            outgoing,
            events,
            runtime,
            task,
            timer: None,
        })
    }

    /// Report [`EndpointEvent::Wakeup`] once `delay` has passed
    ///
    /// Only one wakeup is pending at a time; a new request replaces the
    /// previous one.
    pub fn wake_after(&mut self, delay: Duration) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        let events = self.events.clone();
        self.timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if events.send(EndpointEvent::Wakeup).is_err() {
                trace!("Endpoint owner gone before wakeup");
            }
        }));
    }

    /// Queue bytes for the connected client
    ///
    /// Data queued while no client is connected is dropped.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` once the endpoint task has stopped.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        self.outgoing
            .send(data.into())
            .map_err(|_| Error::ConnectionClosed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.task.abort();
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            trace!("Could not remove {}: {}", self.path.display(), e);
        }
        debug!("Closed endpoint {}", self.path.display());
    }
}

async fn serve(
    listener: UnixListener,
    events: mpsc::UnboundedSender<EndpointEvent>,
    mut outgoing: mpsc::UnboundedReceiver<Bytes>,
) {
    let mut client: Option<UnixStream> = None;
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        let event = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) if client.is_some() => {
                    warn!("Rejecting connection, a client is already connected");
                    drop(stream);
                    continue;
                }
                Ok((stream, _)) => {
                    debug!("Client connected");
                    client = Some(stream);
                    EndpointEvent::Connected
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            },

            read = read_client(&mut client, &mut buf) => match read {
                Ok(0) => {
                    debug!("Client disconnected");
                    client = None;
                    buf.clear();
                    EndpointEvent::Disconnected
                }
                Ok(n) => {
                    trace!("Received {} bytes: {:02X?}", n, &buf[..n.min(16)]);
                    EndpointEvent::Data(buf.split().freeze())
                }
                Err(e) => {
                    warn!("Read failed, dropping client: {}", e);
                    client = None;
                    buf.clear();
                    EndpointEvent::Disconnected
                }
            },

            data = outgoing.recv() => {
                let Some(data) = data else {
                    break;
                };
                let Some(stream) = client.as_mut() else {
                    trace!("No client, dropping {} bytes", data.len());
                    continue;
                };
                if let Err(e) = stream.write_all(&data).await {
                    warn!("Write failed, dropping client: {}", e);
                    client = None;
                    buf.clear();
                    EndpointEvent::Disconnected
                } else {
                    trace!("Sent {} bytes", data.len());
                    continue;
                }
            }
        };

        if events.send(event).is_err() {
            debug!("Endpoint owner gone, stopping");
            break;
        }
    }
}

async fn read_client(client: &mut Option<UnixStream>, buf: &mut BytesMut) -> io::Result<usize> {
    match client {
        Some(stream) => {
            buf.reserve(READ_CHUNK);
            stream.read_buf(buf).await
        }
        None => std::future::pending().await,
    }
}
