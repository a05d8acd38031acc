//! Per-device action state machine
//!
//! [`Device`] accepts one action at a time, checks its preconditions and
//! hands it to the [`Driver`]. The driver reads the action input from
//! [`DeviceCore`] and finishes the action through one of the completion
//! methods, which invokes the caller's callback.

use fprust_core::{Print, PrintKind};
use fprust_transport::EndpointEvent;
use fprust_types::{DeviceInfo, Image, ScanType};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::action::{ActionState, DeviceAction, EnrollStage, IdentifyOutcome, VerifyOutcome};
use crate::driver::{Capabilities, Driver};
use crate::error::{Error, Result};

/// Single-shot completion callback
pub type Completion<T> = Box<dyn FnOnce(Result<T>) + Send>;

/// Enroll stage callback
pub type EnrollProgress = Box<dyn FnMut(EnrollStage) + Send>;

/// Notification broadcast to device subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Finger placed on (`true`) or lifted from the sensor
    FingerStatus(bool),

    /// The sensor produced an image
    ImageCaptured(Image),

    /// The number of enroll stages changed
    EnrollStagesChanged(u32),

    /// The sensor switched between press and swipe
    ScanTypeChanged(ScanType),
}

/// Input and callback of the action in flight
enum Pending {
    Probe(Completion<()>),
    Open(Completion<()>),
    Close(Completion<()>),
    Enroll {
        template: Option<Print>,
        progress: EnrollProgress,
        done: Completion<Print>,
    },
    Verify {
        print: Option<Print>,
        done: Completion<VerifyOutcome>,
    },
    Identify {
        gallery: Option<Vec<Print>>,
        done: Completion<IdentifyOutcome>,
    },
    Capture {
        wait_for_finger: bool,
        done: Completion<Image>,
    },
    List(Completion<Vec<Print>>),
    Delete {
        print: Option<Print>,
        done: Completion<()>,
    },
}

impl Pending {
    fn action(&self) -> DeviceAction {
        match self {
            Self::Probe(_) => DeviceAction::Probe,
            Self::Open(_) => DeviceAction::Open,
            Self::Close(_) => DeviceAction::Close,
            Self::Enroll { .. } => DeviceAction::Enroll,
            Self::Verify { .. } => DeviceAction::Verify,
            Self::Identify { .. } => DeviceAction::Identify,
            Self::Capture { .. } => DeviceAction::Capture,
            Self::List(_) => DeviceAction::List,
            Self::Delete { .. } => DeviceAction::Delete,
        }
    }

    /// Answer the caller with `error` without starting the action
    fn reject(self, error: Error) {
        match self {
            Self::Probe(done) | Self::Open(done) | Self::Close(done) => done(Err(error)),
            Self::Enroll { done, .. } => done(Err(error)),
            Self::Verify { done, .. } => done(Err(error)),
            Self::Identify { done, .. } => done(Err(error)),
            Self::Capture { done, .. } => done(Err(error)),
            Self::List(done) => done(Err(error)),
            Self::Delete { done, .. } => done(Err(error)),
        }
    }
}

/// Device state shared with the driver
///
/// Everything a driver may do to the action in flight goes through here.
/// Calling a completion method for an action that is not in progress is a
/// driver bug and panics.
pub struct DeviceCore {
    info: DeviceInfo,
    capabilities: Capabilities,
    print_kind: PrintKind,
    is_open: bool,
    action: DeviceAction,
    state: ActionState,
    cancelled: bool,
    pending: Option<Pending>,
    io_tx: mpsc::UnboundedSender<EndpointEvent>,
    io_rx: mpsc::UnboundedReceiver<EndpointEvent>,
    subscribers: Vec<mpsc::UnboundedSender<DeviceEvent>>,
}

impl DeviceCore {
    fn new(info: DeviceInfo, capabilities: Capabilities, print_kind: PrintKind) -> Self {
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        Self {
            info,
            capabilities,
            print_kind,
            is_open: false,
            action: DeviceAction::None,
            state: ActionState::NotStarted,
            cancelled: false,
            pending: None,
            io_tx,
            io_rx,
            subscribers: Vec::new(),
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn current_action(&self) -> DeviceAction {
        self.action
    }

    pub fn action_state(&self) -> ActionState {
        self.state
    }

    /// True once the caller asked to cancel the current action
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Channel an endpoint reports into; events reach [`Driver::handle_io`]
    pub fn io_sender(&self) -> mpsc::UnboundedSender<EndpointEvent> {
        self.io_tx.clone()
    }

    /// Create an empty print for this device
    pub fn new_print(&self) -> Print {
        Print::new(self.info.driver_id, self.info.devtype)
    }

    /// Broadcast an event to every subscriber
    pub fn emit(&mut self, event: DeviceEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Change the number of scans an enroll needs
    ///
    /// # Errors
    ///
    /// Returns a validation error for zero stages; the count is unchanged.
    pub fn set_enroll_stages(&mut self, stages: u32) -> Result<()> {
        if stages == 0 {
            return Err(fprust_types::Error::InvalidValue("enroll needs at least one stage".into()).into());
        }
        if self.info.nr_enroll_stages != stages {
            self.info.nr_enroll_stages = stages;
            self.emit(DeviceEvent::EnrollStagesChanged(stages));
        }
        Ok(())
    }

    pub fn set_scan_type(&mut self, scan_type: ScanType) {
        if self.info.scan_type != scan_type {
            self.info.scan_type = scan_type;
            self.emit(DeviceEvent::ScanTypeChanged(scan_type));
        }
    }

    /// Template print of the running enroll
    ///
    /// # Panics
    ///
    /// Panics if no enroll is in progress or the template was already taken.
    pub fn take_enroll_data(&mut self) -> Print {
        match self.pending.as_mut() {
            Some(Pending::Enroll { template, .. }) => template
                .take()
                .unwrap_or_else(|| panic!("enroll template taken twice")),
            _ => panic!("enroll data requested while {} is in progress", self.action),
        }
    }

    /// Print to verify against
    ///
    /// # Panics
    ///
    /// Panics if no verify is in progress or the print was already taken.
    pub fn take_verify_data(&mut self) -> Print {
        match self.pending.as_mut() {
            Some(Pending::Verify { print, .. }) => print
                .take()
                .unwrap_or_else(|| panic!("verify print taken twice")),
            _ => panic!("verify data requested while {} is in progress", self.action),
        }
    }

    /// Gallery to identify against
    ///
    /// # Panics
    ///
    /// Panics if no identify is in progress or the gallery was already taken.
    pub fn take_identify_data(&mut self) -> Vec<Print> {
        match self.pending.as_mut() {
            Some(Pending::Identify { gallery, .. }) => gallery
                .take()
                .unwrap_or_else(|| panic!("identify gallery taken twice")),
            _ => panic!("identify data requested while {} is in progress", self.action),
        }
    }

    /// Print to remove from the device
    ///
    /// # Panics
    ///
    /// Panics if no delete is in progress or the print was already taken.
    pub fn take_delete_data(&mut self) -> Print {
        match self.pending.as_mut() {
            Some(Pending::Delete { print, .. }) => print
                .take()
                .unwrap_or_else(|| panic!("delete print taken twice")),
            _ => panic!("delete data requested while {} is in progress", self.action),
        }
    }

    /// Whether the running capture waits for a finger
    ///
    /// # Panics
    ///
    /// Panics if no capture is in progress.
    pub fn capture_data(&self) -> bool {
        match &self.pending {
            Some(Pending::Capture { wait_for_finger, .. }) => *wait_for_finger,
            _ => panic!("capture data requested while {} is in progress", self.action),
        }
    }

    pub fn probe_complete(&mut self, result: Result<()>) {
        let Pending::Probe(done) = self.finish(DeviceAction::Probe) else {
            unreachable!()
        };
        done(result);
    }

    pub fn open_complete(&mut self, result: Result<()>) {
        let Pending::Open(done) = self.finish(DeviceAction::Open) else {
            unreachable!()
        };
        if result.is_ok() {
            self.is_open = true;
            info!("Opened {}", self.info);
        }
        done(result);
    }

    /// Finish a close; the device counts as closed even on error
    pub fn close_complete(&mut self, result: Result<()>) {
        let Pending::Close(done) = self.finish(DeviceAction::Close) else {
            unreachable!()
        };
        self.is_open = false;
        info!("Closed {}", self.info);
        done(result);
    }

    /// Report an intermediate enroll stage to the caller
    ///
    /// # Panics
    ///
    /// Panics if no enroll is in progress.
    pub fn enroll_progress(&mut self, stage: EnrollStage) {
        let Some(Pending::Enroll { progress, .. }) = self.pending.as_mut() else {
            panic!("enroll progress reported while {} is in progress", self.action);
        };

        debug!(
            completed = stage.completed,
            result = ?stage.result,
            "Enroll stage"
        );
        if let Some(error) = &stage.error {
            if !matches!(error, Error::Retry(_)) {
                warn!("Enroll stage carries a non-retry error: {}", error);
            }
        }

        progress(stage);
    }

    pub fn enroll_complete(&mut self, print: Option<Print>, error: Option<Error>) {
        let Pending::Enroll { done, .. } = self.finish(DeviceAction::Enroll) else {
            unreachable!()
        };
        done(resolve(DeviceAction::Enroll, print, error));
    }

    pub fn verify_complete(&mut self, outcome: Option<VerifyOutcome>, error: Option<Error>) {
        let Pending::Verify { done, .. } = self.finish(DeviceAction::Verify) else {
            unreachable!()
        };
        done(resolve(DeviceAction::Verify, outcome, error));
    }

    pub fn identify_complete(&mut self, outcome: Option<IdentifyOutcome>, error: Option<Error>) {
        let Pending::Identify { done, .. } = self.finish(DeviceAction::Identify) else {
            unreachable!()
        };
        done(resolve(DeviceAction::Identify, outcome, error));
    }

    pub fn capture_complete(&mut self, image: Option<Image>, error: Option<Error>) {
        let Pending::Capture { done, .. } = self.finish(DeviceAction::Capture) else {
            unreachable!()
        };
        done(resolve(DeviceAction::Capture, image, error));
    }

    pub fn list_complete(&mut self, prints: Option<Vec<Print>>, error: Option<Error>) {
        let Pending::List(done) = self.finish(DeviceAction::List) else {
            unreachable!()
        };
        done(resolve(DeviceAction::List, prints, error));
    }

    pub fn delete_complete(&mut self, result: Result<()>) {
        let Pending::Delete { done, .. } = self.finish(DeviceAction::Delete) else {
            unreachable!()
        };
        done(result);
    }

    /// Fail the current action with `error`, whichever it is
    ///
    /// # Panics
    ///
    /// Panics if no action is in progress.
    pub fn action_error(&mut self, error: Error) {
        debug!("{} failed: {}", self.action, error);
        match self.action {
            DeviceAction::None => panic!("action error reported with no action in progress: {}", error),
            DeviceAction::Probe => self.probe_complete(Err(error)),
            DeviceAction::Open => self.open_complete(Err(error)),
            DeviceAction::Close => self.close_complete(Err(error)),
            DeviceAction::Enroll => self.enroll_complete(None, Some(error)),
            DeviceAction::Verify => self.verify_complete(None, Some(error)),
            DeviceAction::Identify => self.identify_complete(None, Some(error)),
            DeviceAction::Capture => self.capture_complete(None, Some(error)),
            DeviceAction::List => self.list_complete(None, Some(error)),
            DeviceAction::Delete => self.delete_complete(Err(error)),
        }
    }

    /// Precondition checks, in order: open state, capability, busy, input
    fn check(&self, pending: &Pending) -> Result<()> {
        let action = pending.action();

        match action {
            DeviceAction::Probe => {}
            DeviceAction::Open if self.is_open => return Err(Error::AlreadyOpen),
            DeviceAction::Open => {}
            _ if !self.is_open => return Err(Error::NotOpen),
            _ => {}
        }

        if !self.capabilities.supports(action) {
            return Err(Error::ActionUnsupported(action));
        }

        if self.action != DeviceAction::None {
            return Err(Error::DeviceBusy);
        }

        match pending {
            Pending::Enroll { template: Some(template), .. } => {
                if template.kind() != PrintKind::Undefined {
                    return Err(Error::DataInvalid(format!(
                        "enroll template must be blank, got a {:?} print",
                        template.kind()
                    )));
                }
                if template.driver_id() != self.info.driver_id || template.devtype() != self.info.devtype {
                    return Err(self.incompatible(template));
                }
            }
            Pending::Verify { print: Some(print), .. } | Pending::Delete { print: Some(print), .. } => {
                self.check_compatible(print)?;
            }
            Pending::Identify { gallery: Some(gallery), .. } => {
                for print in gallery {
                    self.check_compatible(print)?;
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn check_compatible(&self, print: &Print) -> Result<()> {
        if fprust_core::compatible(
            self.info.driver_id,
            self.info.devtype,
            self.print_kind,
            print.driver_id(),
            print.devtype(),
            print.kind(),
        ) {
            Ok(())
        } else {
            Err(self.incompatible(print))
        }
    }

    fn incompatible(&self, print: &Print) -> Error {
        fprust_core::Error::Incompatible(format!("{} cannot be used with {}", print, self.info)).into()
    }

    fn start(&mut self, pending: Pending) {
        self.action = pending.action();
        self.state = ActionState::InProgress;
        self.cancelled = false;
        self.pending = Some(pending);
        debug!("Starting {} on {}", self.action, self.info.name);
    }

    /// End the action in flight and hand back its callback
    fn finish(&mut self, expected: DeviceAction) -> Pending {
        let pending = match self.pending.take() {
            Some(pending) if pending.action() == expected => pending,
            Some(other) => {
                let running = other.action();
                self.pending = Some(other);
                panic!("{} completed while {} is in progress", expected, running);
            }
            None => panic!("{} completed with no action in progress", expected),
        };

        self.action = DeviceAction::None;
        self.state = ActionState::NotStarted;
        self.cancelled = false;
        debug!("Completed {} on {}", expected, self.info.name);
        pending
    }
}

/// Turn a payload/error pair into the caller's result; the error wins
fn resolve<T>(action: DeviceAction, payload: Option<T>, error: Option<Error>) -> Result<T> {
    match (payload, error) {
        (Some(_), Some(error)) => {
            warn!("{} completed with both a result and an error, dropping the result", action);
            Err(error)
        }
        (None, Some(error)) => Err(error),
        (Some(payload), None) => Ok(payload),
        (None, None) => {
            warn!("{} completed without a result or an error", action);
            Err(Error::General(format!("{} finished without a result", action)))
        }
    }
}

/// A sensor driven by a [`Driver`]
///
/// # Examples
///
/// ```
/// use fprust::drivers::FakeDriver;
/// use fprust::Device;
///
/// let mut device = Device::new(FakeDriver::new(), "fake-0");
/// device.open(|result| assert!(result.is_ok()));
/// assert!(device.is_open());
/// ```
pub struct Device<D> {
    core: DeviceCore,
    driver: D,
}

impl<D: Driver> Device<D> {
    /// Create a device for `driver` at `device_id` (bus path or socket path)
    pub fn new(driver: D, device_id: impl Into<String>) -> Self {
        let descriptor = driver.descriptor();

        let mut info = DeviceInfo::new(descriptor.name.clone(), descriptor.driver_id, descriptor.devtype)
            .with_device_id(device_id)
            .with_name(descriptor.full_name.clone())
            .with_scan_type(descriptor.scan_type);
        info.nr_enroll_stages = descriptor.nr_enroll_stages.max(1);

        let core = DeviceCore::new(info, descriptor.capabilities, descriptor.print_kind);
        Self { core, driver }
    }

    pub fn info(&self) -> &DeviceInfo {
        self.core.info()
    }

    pub fn is_open(&self) -> bool {
        self.core.is_open()
    }

    pub fn current_action(&self) -> DeviceAction {
        self.core.current_action()
    }

    pub fn core(&self) -> &DeviceCore {
        &self.core
    }

    /// Mutable access to the core, for finishing held actions by hand
    pub fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Create an empty print to pass as enroll template
    pub fn new_print(&self) -> Print {
        self.core.new_print()
    }

    /// Receive finger and image events
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<DeviceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.core.subscribers.push(tx);
        rx
    }

    pub fn probe(&mut self, done: impl FnOnce(Result<()>) + Send + 'static) {
        self.dispatch(Pending::Probe(Box::new(done)));
    }

    pub fn open(&mut self, done: impl FnOnce(Result<()>) + Send + 'static) {
        self.dispatch(Pending::Open(Box::new(done)));
    }

    pub fn close(&mut self, done: impl FnOnce(Result<()>) + Send + 'static) {
        self.dispatch(Pending::Close(Box::new(done)));
    }

    /// Enroll a finger into `template`, which must come from [`Device::new_print`]
    pub fn enroll(
        &mut self,
        template: Print,
        progress: impl FnMut(EnrollStage) + Send + 'static,
        done: impl FnOnce(Result<Print>) + Send + 'static,
    ) {
        self.dispatch(Pending::Enroll {
            template: Some(template),
            progress: Box::new(progress),
            done: Box::new(done),
        });
    }

    pub fn verify(&mut self, print: Print, done: impl FnOnce(Result<VerifyOutcome>) + Send + 'static) {
        self.dispatch(Pending::Verify {
            print: Some(print),
            done: Box::new(done),
        });
    }

    pub fn identify(
        &mut self,
        gallery: Vec<Print>,
        done: impl FnOnce(Result<IdentifyOutcome>) + Send + 'static,
    ) {
        self.dispatch(Pending::Identify {
            gallery: Some(gallery),
            done: Box::new(done),
        });
    }

    pub fn capture(&mut self, wait_for_finger: bool, done: impl FnOnce(Result<Image>) + Send + 'static) {
        self.dispatch(Pending::Capture {
            wait_for_finger,
            done: Box::new(done),
        });
    }

    pub fn list_prints(&mut self, done: impl FnOnce(Result<Vec<Print>>) + Send + 'static) {
        self.dispatch(Pending::List(Box::new(done)));
    }

    pub fn delete_print(&mut self, print: Print, done: impl FnOnce(Result<()>) + Send + 'static) {
        self.dispatch(Pending::Delete {
            print: Some(print),
            done: Box::new(done),
        });
    }

    /// Ask the driver to stop the current action
    ///
    /// Returns `false` if there is nothing to cancel. The action still
    /// completes through its callback.
    pub fn cancel(&mut self) -> bool {
        if self.core.state != ActionState::InProgress {
            return false;
        }

        debug!("Cancelling {}", self.core.action);
        self.core.cancelled = true;
        self.core.state = ActionState::Cancelling;
        self.driver.cancel(&mut self.core);
        true
    }

    /// Forward an endpoint event to the driver
    pub fn handle_io(&mut self, event: EndpointEvent) {
        self.driver.handle_io(&mut self.core, event);
    }

    /// Wait for the next endpoint event
    pub async fn next_io(&mut self) -> Option<EndpointEvent> {
        self.core.io_rx.recv().await
    }

    /// Handle every endpoint event already queued, returning how many ran
    pub fn poll_io(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.core.io_rx.try_recv() {
            self.handle_io(event);
            handled += 1;
        }
        handled
    }

    fn dispatch(&mut self, pending: Pending) {
        if let Err(error) = self.core.check(&pending) {
            debug!("Rejecting {}: {}", pending.action(), error);
            pending.reject(error);
            return;
        }

        let action = pending.action();
        self.core.start(pending);

        let dev = &mut self.core;
        match action {
            DeviceAction::Probe => self.driver.probe(dev),
            DeviceAction::Open => self.driver.open(dev),
            DeviceAction::Close => self.driver.close(dev),
            DeviceAction::Enroll => self.driver.enroll(dev),
            DeviceAction::Verify => self.driver.verify(dev),
            DeviceAction::Identify => self.driver.identify(dev),
            DeviceAction::Capture => self.driver.capture(dev),
            DeviceAction::List => self.driver.list(dev),
            DeviceAction::Delete => self.driver.delete(dev),
            DeviceAction::None => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{EnrollResult, VerifyResult};
    use crate::drivers::FakeDriver;
    use crate::drivers::fake::FakeInput;
    use fprust_core::constants::drivers::FAKE;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    /// Callback that stores its result for inspection
    fn slot<T: Send + 'static>() -> (Arc<Mutex<Option<Result<T>>>>, impl FnOnce(Result<T>) + Send + 'static) {
        let slot = Arc::new(Mutex::new(None));
        let writer = slot.clone();
        (slot, move |result| *writer.lock().unwrap() = Some(result))
    }

    fn take<T>(slot: &Arc<Mutex<Option<Result<T>>>>) -> Option<Result<T>> {
        slot.lock().unwrap().take()
    }

    fn open_device() -> Device<FakeDriver> {
        let mut device = Device::new(FakeDriver::new(), "fake-0");
        let (opened, done) = slot();
        device.open(done);
        assert!(matches!(take(&opened), Some(Ok(()))));
        device
    }

    fn raw_print() -> Print {
        let mut print = Print::with_kind(FAKE, 0, PrintKind::Raw);
        print.add_item(&b"finger"[..]).unwrap();
        print
    }

    #[test]
    fn test_info_from_descriptor() {
        let device = Device::new(FakeDriver::new(), "fake-0");
        assert_eq!(device.info().driver, "fake_test_dev");
        assert_eq!(device.info().device_id, "fake-0");
        assert_eq!(device.info().nr_enroll_stages, 5);
        assert!(!device.is_open());
    }

    #[test]
    fn test_actions_require_open() {
        let mut device = Device::new(FakeDriver::new(), "fake-0");
        let (verified, done) = slot();
        device.verify(raw_print(), done);
        assert!(matches!(take(&verified), Some(Err(Error::NotOpen))));
        assert_eq!(device.driver().last_called, None);
    }

    #[test]
    fn test_open_twice() {
        let mut device = open_device();
        let (opened, done) = slot();
        device.open(done);
        assert!(matches!(take(&opened), Some(Err(Error::AlreadyOpen))));
    }

    #[test]
    fn test_close() {
        let mut device = open_device();
        let (closed, done) = slot();
        device.close(done);
        assert!(matches!(take(&closed), Some(Ok(()))));
        assert!(!device.is_open());
    }

    #[test]
    fn test_busy_leaves_running_action_alone() {
        let mut device = open_device();
        device.driver_mut().hold = true;

        let (first, done) = slot();
        device.verify(raw_print(), done);
        assert!(take(&first).is_none());
        assert_eq!(device.current_action(), DeviceAction::Verify);

        let (second, done) = slot();
        device.verify(raw_print(), done);
        assert!(matches!(take(&second), Some(Err(Error::DeviceBusy))));
        assert_eq!(device.current_action(), DeviceAction::Verify);

        device.core_mut().verify_complete(
            Some(VerifyOutcome {
                result: VerifyResult::Match,
                scanned: None,
            }),
            None,
        );
        let outcome = take(&first).unwrap().unwrap();
        assert_eq!(outcome.result, VerifyResult::Match);
        assert_eq!(device.current_action(), DeviceAction::None);
    }

    #[test]
    fn test_unsupported_action() {
        let mut device = Device::new(FakeDriver::with_capabilities(Capabilities::VERIFY), "fake-0");
        device.open(|_| {});

        let (deleted, done) = slot();
        device.delete_print(raw_print(), done);
        assert!(matches!(
            take(&deleted),
            Some(Err(Error::ActionUnsupported(DeviceAction::Delete)))
        ));
    }

    #[test]
    fn test_enroll_template_must_be_blank() {
        let mut device = open_device();
        let (enrolled, done) = slot();
        device.enroll(raw_print(), |_| {}, done);
        assert!(matches!(take(&enrolled), Some(Err(Error::DataInvalid(_)))));
    }

    #[test]
    fn test_incompatible_print_rejected() {
        let mut device = open_device();

        let mut foreign = Print::with_kind(0x7777, 0, PrintKind::Raw);
        foreign.add_item(&b"x"[..]).unwrap();

        let (verified, done) = slot();
        device.verify(foreign.clone(), done);
        assert!(take(&verified).unwrap().unwrap_err().is_incompatible());

        let (identified, done) = slot();
        device.identify(vec![raw_print(), foreign], done);
        assert!(take(&identified).unwrap().unwrap_err().is_incompatible());
    }

    #[test]
    fn test_enroll_reports_stages() {
        let mut device = open_device();
        let stages = Arc::new(Mutex::new(Vec::new()));
        let seen = stages.clone();

        let (enrolled, done) = slot();
        let template = device.new_print();
        device.enroll(
            template,
            move |stage: EnrollStage| seen.lock().unwrap().push((stage.completed, stage.result)),
            done,
        );

        let print = take(&enrolled).unwrap().unwrap();
        assert_eq!(print.kind(), PrintKind::Raw);

        let stages = stages.lock().unwrap();
        assert_eq!(stages.len(), 5);
        assert_eq!(stages[4], (5, EnrollResult::Complete));
        assert_eq!(stages[0], (1, EnrollResult::Pass));
    }

    #[test]
    fn test_error_wins_over_payload() {
        let mut device = open_device();
        device.driver_mut().hold = true;

        let (verified, done) = slot();
        device.verify(raw_print(), done);
        device.core_mut().verify_complete(
            Some(VerifyOutcome {
                result: VerifyResult::Match,
                scanned: None,
            }),
            Some(Error::General("sensor fault".into())),
        );

        assert!(matches!(take(&verified), Some(Err(Error::General(_)))));
    }

    #[test]
    fn test_missing_payload_is_general_error() {
        let mut device = open_device();

        let (listed, done) = slot();
        device.list_prints(done);
        assert!(matches!(take(&listed), Some(Err(Error::General(_)))));
    }

    #[test]
    fn test_list_returns_prints() {
        let mut device = open_device();
        device.driver_mut().ret_list = Some(vec![raw_print(), raw_print()]);

        let (listed, done) = slot();
        device.list_prints(done);
        assert_eq!(take(&listed).unwrap().unwrap().len(), 2);
    }

    #[test]
    fn test_driver_receives_input() {
        let mut device = open_device();

        device.delete_print(raw_print(), |_| {});
        assert_eq!(device.driver().last_called, Some(DeviceAction::Delete));
        assert_eq!(device.driver().last_input, Some(FakeInput::Print(raw_print())));

        device.capture(true, |_| {});
        assert_eq!(device.driver().last_input, Some(FakeInput::WaitForFinger(true)));
    }

    #[test]
    fn test_cancel_flag_observable() {
        let mut device = open_device();
        assert!(!device.cancel());

        device.driver_mut().hold = true;
        let (verified, done) = slot();
        device.verify(raw_print(), done);

        assert!(device.cancel());
        assert!(device.core().is_cancelled());
        assert_eq!(device.core().action_state(), ActionState::Cancelling);
        assert!(device.driver().cancel_called);
        assert!(!device.cancel());

        device.core_mut().action_error(Error::Cancelled);
        assert!(matches!(take(&verified), Some(Err(Error::Cancelled))));
        assert!(!device.core().is_cancelled());
        assert_eq!(device.core().action_state(), ActionState::NotStarted);
    }

    #[test]
    #[should_panic(expected = "completed with no action in progress")]
    fn test_double_completion_panics() {
        let mut device = open_device();
        device.driver_mut().hold = true;
        device.delete_print(raw_print(), |_| {});

        device.core_mut().delete_complete(Ok(()));
        device.core_mut().delete_complete(Ok(()));
    }

    #[test]
    #[should_panic(expected = "completed while verify is in progress")]
    fn test_wrong_completion_panics() {
        let mut device = open_device();
        device.driver_mut().hold = true;
        device.verify(raw_print(), |_| {});
        device.core_mut().delete_complete(Ok(()));
    }

    #[test]
    #[should_panic(expected = "taken twice")]
    fn test_input_taken_twice_panics() {
        let mut device = open_device();
        device.driver_mut().hold = true;
        device.verify(raw_print(), |_| {});
        device.core_mut().take_verify_data();
    }

    #[test]
    fn test_events_reach_subscribers() {
        let mut device = open_device();
        let mut events = device.subscribe();

        device.core_mut().emit(DeviceEvent::FingerStatus(true));
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::FingerStatus(true));

        drop(events);
        device.core_mut().emit(DeviceEvent::FingerStatus(false));
        assert!(device.core().subscribers.is_empty());
    }

    #[test]
    fn test_info_changes_are_broadcast() {
        let mut device = open_device();
        let mut events = device.subscribe();

        device.core_mut().set_enroll_stages(20).unwrap();
        device.core_mut().set_enroll_stages(20).unwrap();
        assert!(device.core_mut().set_enroll_stages(0).is_err());
        device.core_mut().set_scan_type(ScanType::Swipe);

        assert_eq!(device.info().nr_enroll_stages, 20);
        assert_eq!(device.info().scan_type, ScanType::Swipe);
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::EnrollStagesChanged(20));
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::ScanTypeChanged(ScanType::Swipe));
        assert!(events.try_recv().is_err());
    }
}
