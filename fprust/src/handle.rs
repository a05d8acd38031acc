//! Async front end for a [`Device`]
//!
//! [`DeviceHandle::spawn`] moves the device onto its own task. The task
//! serves one request at a time and handles the device's endpoint traffic
//! in between, so actions that wait on a client make progress while the
//! caller awaits them.
//!
//! # Examples
//!
//! ```no_run
//! use fprust::drivers::VirtualMisDriver;
//! use fprust::{Device, DeviceHandle};
//!
//! #[tokio::main]
//! async fn main() -> fprust::Result<()> {
//!     let device = Device::new(VirtualMisDriver::new(), "/tmp/misdev.sock");
//!     let (handle, _events) = DeviceHandle::spawn(device);
//!
//!     handle.open().await?;
//!     let print = handle
//!         .enroll(handle.new_print(), |stage| println!("stage {}", stage.completed))
//!         .await?;
//!     println!("enrolled {}", print);
//!     handle.close().await?;
//!     Ok(())
//! }
//! ```

use fprust_core::Print;
use fprust_types::{DeviceInfo, Image};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::action::{EnrollStage, IdentifyOutcome, VerifyOutcome};
use crate::device::{Device, DeviceEvent, EnrollProgress};
use crate::driver::Driver;
use crate::error::{Error, Result};

type Reply<T> = oneshot::Sender<Result<T>>;

enum Request {
    Probe(Reply<()>),
    Open(Reply<()>),
    Close(Reply<()>),
    Enroll {
        template: Print,
        progress: EnrollProgress,
        reply: Reply<Print>,
    },
    Verify {
        print: Print,
        reply: Reply<VerifyOutcome>,
    },
    Identify {
        gallery: Vec<Print>,
        reply: Reply<IdentifyOutcome>,
    },
    Capture {
        wait_for_finger: bool,
        reply: Reply<Image>,
    },
    List(Reply<Vec<Print>>),
    Delete {
        print: Print,
        reply: Reply<()>,
    },
    Cancel(oneshot::Sender<bool>),
}

/// Cloneable handle to a device running on its own task
///
/// The task stops once every handle is dropped, closing the device if it
/// is still open.
#[derive(Clone)]
pub struct DeviceHandle {
    info: DeviceInfo,
    requests: mpsc::UnboundedSender<Request>,
}

impl DeviceHandle {
    /// Move `device` onto a new task
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<D: Driver + 'static>(mut device: Device<D>) -> (Self, DeviceEvents) {
        let info = device.info().clone();
        let events = DeviceEvents {
            rx: device.subscribe(),
        };
        let (requests, rx) = mpsc::unbounded_channel();

        tokio::spawn(run(device, rx));

        (Self { info, requests }, events)
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Create an empty print to pass as enroll template
    pub fn new_print(&self) -> Print {
        Print::new(self.info.driver_id, self.info.devtype)
    }

    pub async fn probe(&self) -> Result<()> {
        self.call(Request::Probe).await
    }

    pub async fn open(&self) -> Result<()> {
        self.call(Request::Open).await
    }

    pub async fn close(&self) -> Result<()> {
        self.call(Request::Close).await
    }

    /// Enroll a finger, calling `progress` for every stage
    pub async fn enroll(
        &self,
        template: Print,
        progress: impl FnMut(EnrollStage) + Send + 'static,
    ) -> Result<Print> {
        let progress: EnrollProgress = Box::new(progress);
        self.call(|reply| Request::Enroll {
            template,
            progress,
            reply,
        })
        .await
    }

    pub async fn verify(&self, print: Print) -> Result<VerifyOutcome> {
        self.call(|reply| Request::Verify { print, reply }).await
    }

    pub async fn identify(&self, gallery: Vec<Print>) -> Result<IdentifyOutcome> {
        self.call(|reply| Request::Identify { gallery, reply }).await
    }

    pub async fn capture(&self, wait_for_finger: bool) -> Result<Image> {
        self.call(|reply| Request::Capture {
            wait_for_finger,
            reply,
        })
        .await
    }

    pub async fn list_prints(&self) -> Result<Vec<Print>> {
        self.call(Request::List).await
    }

    pub async fn delete_print(&self, print: Print) -> Result<()> {
        self.call(|reply| Request::Delete { print, reply }).await
    }

    /// Ask the driver to stop the current action
    ///
    /// Returns `false` if nothing was running. The cancelled action's own
    /// future still resolves, usually with `Error::Cancelled`.
    pub async fn cancel(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Cancel(tx))
            .map_err(|_| Error::DeviceGone)?;
        rx.await.map_err(|_| Error::DeviceGone)
    }

    async fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(request(tx))
            .map_err(|_| Error::DeviceGone)?;
        rx.await.map_err(|_| Error::DeviceGone)?
    }
}

/// Finger and image notifications of a spawned device
pub struct DeviceEvents {
    rx: mpsc::UnboundedReceiver<DeviceEvent>,
}

impl DeviceEvents {
    /// Wait for the next event; `None` once the device task has stopped
    pub async fn recv(&mut self) -> Option<DeviceEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<DeviceEvent> {
        self.rx.try_recv().ok()
    }
}

fn respond<T: Send + 'static>(reply: Reply<T>) -> impl FnOnce(Result<T>) + Send + 'static {
    move |result| {
        if reply.send(result).is_err() {
            debug!("Caller stopped waiting for the result");
        }
    }
}

async fn run<D: Driver>(mut device: Device<D>, mut requests: mpsc::UnboundedReceiver<Request>) {
    debug!("Device task for {} started", device.info().device_id);

    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(request) => serve(&mut device, request),
                None => break,
            },
            Some(event) = device.next_io() => device.handle_io(event),
        }
    }

    if device.is_open() {
        device.close(|result| {
            if let Err(e) = result {
                warn!("Closing device on shutdown failed: {}", e);
            }
        });
    }
    debug!("Device task for {} stopped", device.info().device_id);
}

fn serve<D: Driver>(device: &mut Device<D>, request: Request) {
    match request {
        Request::Probe(reply) => device.probe(respond(reply)),
        Request::Open(reply) => device.open(respond(reply)),
        Request::Close(reply) => device.close(respond(reply)),
        Request::Enroll {
            template,
            progress,
            reply,
        } => device.enroll(template, progress, respond(reply)),
        Request::Verify { print, reply } => device.verify(print, respond(reply)),
        Request::Identify { gallery, reply } => device.identify(gallery, respond(reply)),
        Request::Capture {
            wait_for_finger,
            reply,
        } => device.capture(wait_for_finger, respond(reply)),
        Request::List(reply) => device.list_prints(respond(reply)),
        Request::Delete { print, reply } => device.delete_print(print, respond(reply)),
        Request::Cancel(reply) => {
            if reply.send(device.cancel()).is_err() {
                debug!("Caller stopped waiting for cancel");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::VerifyResult;
    use crate::drivers::FakeDriver;
    use fprust_core::PrintKind;
    use fprust_core::constants::drivers::FAKE;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn raw_print() -> Print {
        let mut print = Print::with_kind(FAKE, 0, PrintKind::Raw);
        print.add_item(&b"finger"[..]).unwrap();
        print
    }

    #[tokio::test]
    async fn test_actions_through_handle() {
        let mut driver = FakeDriver::new();
        driver.ret_result = VerifyResult::Match;
        let (handle, _events) = DeviceHandle::spawn(Device::new(driver, "fake"));

        assert!(matches!(handle.verify(raw_print()).await, Err(Error::NotOpen)));

        handle.open().await.unwrap();
        let outcome = handle.verify(raw_print()).await.unwrap();
        assert_eq!(outcome.result, VerifyResult::Match);

        let print = handle.enroll(handle.new_print(), |_| {}).await.unwrap();
        assert_eq!(print.kind(), PrintKind::Raw);

        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_with_nothing_running() {
        let (handle, _events) = DeviceHandle::spawn(Device::new(FakeDriver::new(), "fake"));
        handle.open().await.unwrap();
        assert!(!handle.cancel().await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_held_action() {
        let mut driver = FakeDriver::new();
        driver.hold = true;
        let (handle, _events) = DeviceHandle::spawn(Device::new(driver, "fake"));

        let pending = tokio::time::timeout(Duration::from_millis(50), handle.open()).await;
        assert!(pending.is_err());
        assert!(handle.cancel().await.unwrap());
    }

    #[tokio::test]
    async fn test_handle_reports_gone_device() {
        let (handle, mut events) = DeviceHandle::spawn(Device::new(FakeDriver::new(), "fake"));
        let info = handle.info().clone();
        assert_eq!(info.driver, "fake_test_dev");

        drop(handle);
        assert_eq!(events.recv().await, None);
    }
}
