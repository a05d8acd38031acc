//! Command-scripted virtual device
//!
//! A stimulus program connects to the device socket and writes
//! [`Command`]s. Scans, errors, retries, finger changes and delays are
//! queued and consumed in order while an enroll, verify or identify runs;
//! everything else acts at once. A scan is identified only by the id
//! the script names, so enrolling `SCAN a` five times produces a print
//! holding `a` and any later verify matches exactly the scans of `a`.
//!
//! The storage variant also keeps the ids it enrolled (or was told about
//! with `INSERT`) and supports identify, list and delete against them.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use fprust_core::constants::drivers::{VIRTUAL_DEVICE, VIRTUAL_DEVICE_STORAGE};
use fprust_core::{Print, PrintKind};
use fprust_transport::{Command, Endpoint, EndpointEvent, LineReader};
use fprust_types::ScanType;
use tracing::{debug, info, warn};

use crate::action::{
    DeviceAction, EnrollResult, EnrollStage, IdentifyOutcome, RetryReason, VerifyOutcome, VerifyResult,
};
use crate::device::{DeviceCore, DeviceEvent};
use crate::driver::{Capabilities, Driver, DriverDescriptor};
use crate::error::{Error, Result};

/// Scan action waiting for queued commands
enum Session {
    Idle,
    Enroll {
        template: Print,
        id: Option<String>,
        completed: u32,
    },
    Verify(Print),
    Identify(Vec<Print>),
}

pub struct VirtualDeviceDriver {
    descriptor: DriverDescriptor,
    storage: Option<BTreeSet<String>>,
    queue: VecDeque<Command>,
    session: Session,
    sleeping: bool,
    finger_present: bool,
    reader: LineReader,
    endpoint: Option<Endpoint>,
}

impl VirtualDeviceDriver {
    /// Enroll and verify only
    pub fn new() -> Self {
        Self::build(
            DriverDescriptor {
                name: "virtual_device".into(),
                full_name: "Virtual device for debugging".into(),
                driver_id: VIRTUAL_DEVICE,
                devtype: 0,
                capabilities: Capabilities::ENROLL | Capabilities::VERIFY,
                print_kind: PrintKind::Raw,
                nr_enroll_stages: 5,
                scan_type: ScanType::Swipe,
            },
            None,
        )
    }

    /// With on-device storage, identify, list and delete
    pub fn with_storage() -> Self {
        Self::build(
            DriverDescriptor {
                name: "virtual_device_storage".into(),
                full_name: "Virtual device with storage and identification for debugging".into(),
                driver_id: VIRTUAL_DEVICE_STORAGE,
                devtype: 0,
                capabilities: Capabilities::ENROLL
                    | Capabilities::VERIFY
                    | Capabilities::IDENTIFY
                    | Capabilities::LIST
                    | Capabilities::DELETE,
                print_kind: PrintKind::Raw,
                nr_enroll_stages: 5,
                scan_type: ScanType::Swipe,
            },
            Some(BTreeSet::new()),
        )
    }

    fn build(descriptor: DriverDescriptor, storage: Option<BTreeSet<String>>) -> Self {
        Self {
            descriptor,
            storage,
            queue: VecDeque::new(),
            session: Session::Idle,
            sleeping: false,
            finger_present: false,
            reader: LineReader::new(),
            endpoint: None,
        }
    }

    /// Ids held in device storage, `None` without storage
    pub fn stored_ids(&self) -> Option<impl Iterator<Item = &str>> {
        self.storage.as_ref().map(|ids| ids.iter().map(String::as_str))
    }

    /// Queued commands not consumed yet
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn lines_received(&mut self, dev: &mut DeviceCore, data: &[u8]) {
        self.reader.push(data);
        self.drain_lines(dev);
    }

    fn drain_lines(&mut self, dev: &mut DeviceCore) {
        while let Some(line) = self.reader.next_line() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match Command::parse(&line) {
                Ok(command) => self.command(dev, command),
                Err(e) => warn!("Ignoring command: {}", e),
            }
        }
    }

    fn command(&mut self, dev: &mut DeviceCore, command: Command) {
        debug!("Command {}", command);
        if command.is_queued() {
            self.queue.push_back(command);
            self.resume(dev);
            return;
        }

        match command {
            Command::Insert(id) => match self.storage.as_mut() {
                Some(storage) => {
                    storage.insert(id);
                }
                None => warn!("No storage to insert {} into", id),
            },
            Command::Remove(id) => match self.storage.as_mut() {
                Some(storage) => {
                    if !storage.remove(&id) {
                        warn!("Print {} was not stored", id);
                    }
                }
                None => warn!("No storage to remove {} from", id),
            },
            Command::List => self.send_list(),
            Command::SetEnrollStages(stages) => {
                if let Err(e) = dev.set_enroll_stages(stages) {
                    warn!("Keeping {} enroll stages: {}", dev.info().nr_enroll_stages, e);
                }
            }
            Command::SetScanType(scan_type) => dev.set_scan_type(scan_type),
            queued => warn!("{} should have been queued", queued),
        }
    }

    fn send_list(&self) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };

        let mut reply = BytesMut::new();
        for id in self.storage.iter().flatten() {
            reply.put_slice(id.as_bytes());
            reply.put_u8(b'\n');
        }
        reply.put_u8(b'\n');

        if let Err(e) = endpoint.send(reply.freeze()) {
            warn!("Could not send list: {}", e);
        }
    }

    /// Consume queued commands while a scan action waits for them
    fn resume(&mut self, dev: &mut DeviceCore) {
        while !self.sleeping && !matches!(self.session, Session::Idle) {
            let Some(command) = self.queue.pop_front() else {
                return;
            };

            match command {
                Command::Sleep(delay) => self.sleep(delay),
                Command::Finger(present) => self.report_finger_status(dev, present),
                Command::Scan(id) => self.scanned(dev, Ok(id)),
                Command::Error(code) => {
                    let error = device_error(code, dev.current_action());
                    self.scanned(dev, Err(error));
                }
                Command::Retry(code) => self.scanned(dev, Err(Error::Retry(retry_reason(code)))),
                other => warn!("Dropping unexpected queued command {}", other),
            }
        }
    }

    fn sleep(&mut self, delay: Duration) {
        let Some(endpoint) = self.endpoint.as_mut() else {
            return;
        };
        debug!("Sleeping {:?}", delay);
        endpoint.wake_after(delay);
        self.sleeping = true;
    }

    fn report_finger_status(&mut self, dev: &mut DeviceCore, present: bool) {
        if self.finger_present == present {
            return;
        }
        self.finger_present = present;
        dev.emit(DeviceEvent::FingerStatus(present));
    }

    fn scanned(&mut self, dev: &mut DeviceCore, scan: Result<String>) {
        match std::mem::replace(&mut self.session, Session::Idle) {
            Session::Idle => {}
            Session::Enroll {
                template,
                id,
                completed,
            } => self.enroll_scan(dev, template, id, completed, scan),
            Session::Verify(print) => self.verify_scan(dev, &print, scan),
            Session::Identify(gallery) => self.identify_scan(dev, gallery, scan),
        }
    }

    fn enroll_scan(
        &mut self,
        dev: &mut DeviceCore,
        template: Print,
        id: Option<String>,
        completed: u32,
        scan: Result<String>,
    ) {
        let scan_id = match scan {
            Ok(scan_id) => scan_id,
            Err(Error::Retry(reason)) => {
                self.enroll_retry(dev, completed, reason);
                self.session = Session::Enroll {
                    template,
                    id,
                    completed,
                };
                return;
            }
            Err(e) => {
                dev.enroll_complete(None, Some(e));
                return;
            }
        };

        if id.as_ref().is_some_and(|id| *id != scan_id) {
            info!("Scanned {} while enrolling {:?}", scan_id, id);
            self.enroll_retry(dev, completed, RetryReason::General);
            self.session = Session::Enroll {
                template,
                id,
                completed,
            };
            return;
        }

        let completed = completed + 1;
        if completed < dev.info().nr_enroll_stages {
            dev.enroll_progress(EnrollStage {
                completed,
                result: EnrollResult::Pass,
                print: None,
                error: None,
            });
            self.session = Session::Enroll {
                template,
                id: Some(scan_id),
                completed,
            };
            return;
        }

        let print = match self.scan_print(template, &scan_id) {
            Ok(print) => print,
            Err(e) => {
                dev.enroll_complete(None, Some(e));
                return;
            }
        };
        if let Some(storage) = self.storage.as_mut() {
            storage.insert(scan_id);
        }

        dev.enroll_progress(EnrollStage {
            completed,
            result: EnrollResult::Complete,
            print: Some(print.clone()),
            error: None,
        });
        dev.enroll_complete(Some(print), None);
    }

    fn enroll_retry(&self, dev: &mut DeviceCore, completed: u32, reason: RetryReason) {
        dev.enroll_progress(EnrollStage {
            completed,
            result: EnrollResult::Retry(reason),
            print: None,
            error: Some(Error::Retry(reason)),
        });
    }

    fn verify_scan(&mut self, dev: &mut DeviceCore, print: &Print, scan: Result<String>) {
        let outcome = scan.and_then(|scan_id| {
            let scanned = self.scan_print(dev.new_print(), &scan_id)?;
            let result = if print_id(print) == Some(scan_id.as_bytes()) && self.is_stored(&scan_id) {
                VerifyResult::Match
            } else {
                VerifyResult::NoMatch
            };
            Ok(VerifyOutcome {
                result,
                scanned: Some(scanned),
            })
        });

        match outcome {
            Ok(outcome) => dev.verify_complete(Some(outcome), None),
            Err(e) => dev.verify_complete(None, Some(e)),
        }
    }

    fn identify_scan(&mut self, dev: &mut DeviceCore, gallery: Vec<Print>, scan: Result<String>) {
        let outcome = scan.and_then(|scan_id| {
            let scanned = self.scan_print(dev.new_print(), &scan_id)?;
            let matched = if self.is_stored(&scan_id) {
                gallery
                    .into_iter()
                    .find(|print| print_id(print) == Some(scan_id.as_bytes()))
            } else {
                None
            };
            Ok(IdentifyOutcome {
                matched,
                scanned: Some(scanned),
            })
        });

        match outcome {
            Ok(outcome) => dev.identify_complete(Some(outcome), None),
            Err(e) => dev.identify_complete(None, Some(e)),
        }
    }

    /// A print without storage is accepted for any id
    fn is_stored(&self, id: &str) -> bool {
        self.storage.as_ref().map_or(true, |storage| storage.contains(id))
    }

    /// Raw print carrying `id` as its only item
    fn scan_print(&self, mut print: Print, id: &str) -> Result<Print> {
        print.set_kind(PrintKind::Raw)?;
        print.add_item(id.as_bytes().to_vec())?;
        print.set_device_stored(self.storage.is_some());
        Ok(print)
    }

    fn start(&mut self, dev: &mut DeviceCore, session: Session) {
        self.session = session;
        self.resume(dev);
    }
}

impl Default for VirtualDeviceDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for VirtualDeviceDriver {
    fn descriptor(&self) -> &DriverDescriptor {
        &self.descriptor
    }

    fn open(&mut self, dev: &mut DeviceCore) {
        match Endpoint::bind(&dev.info().device_id, dev.io_sender()) {
            Ok(endpoint) => {
                self.endpoint = Some(endpoint);
                dev.open_complete(Ok(()));
            }
            Err(e) => dev.open_complete(Err(e.into())),
        }
    }

    fn close(&mut self, dev: &mut DeviceCore) {
        self.endpoint = None;
        self.reader.clear();
        self.queue.clear();
        self.session = Session::Idle;
        self.sleeping = false;
        self.finger_present = false;
        dev.close_complete(Ok(()));
    }

    fn enroll(&mut self, dev: &mut DeviceCore) {
        let template = dev.take_enroll_data();
        self.start(
            dev,
            Session::Enroll {
                template,
                id: None,
                completed: 0,
            },
        );
    }

    fn verify(&mut self, dev: &mut DeviceCore) {
        let print = dev.take_verify_data();
        self.start(dev, Session::Verify(print));
    }

    fn identify(&mut self, dev: &mut DeviceCore) {
        let gallery = dev.take_identify_data();
        self.start(dev, Session::Identify(gallery));
    }

    fn list(&mut self, dev: &mut DeviceCore) {
        let Some(storage) = &self.storage else {
            dev.action_error(Error::ActionUnsupported(DeviceAction::List));
            return;
        };

        let prints: Result<Vec<Print>> = storage
            .iter()
            .map(|id| self.scan_print(dev.new_print(), id))
            .collect();
        match prints {
            Ok(prints) => dev.list_complete(Some(prints), None),
            Err(e) => dev.list_complete(None, Some(e)),
        }
    }

    fn delete(&mut self, dev: &mut DeviceCore) {
        let print = dev.take_delete_data();
        let Some(storage) = self.storage.as_mut() else {
            dev.action_error(Error::ActionUnsupported(DeviceAction::Delete));
            return;
        };

        let result = match print_id(&print) {
            None => Err(Error::DataInvalid("print holds no id".into())),
            Some(id) => {
                let id = String::from_utf8_lossy(id);
                if storage.remove(&*id) {
                    Ok(())
                } else {
                    Err(Error::DataNotFound)
                }
            }
        };
        dev.delete_complete(result);
    }

    fn cancel(&mut self, dev: &mut DeviceCore) {
        if !matches!(self.session, Session::Idle) {
            self.session = Session::Idle;
            dev.action_error(Error::Cancelled);
        }
    }

    fn handle_io(&mut self, dev: &mut DeviceCore, event: EndpointEvent) {
        match event {
            EndpointEvent::Connected => debug!("Script connected"),
            EndpointEvent::Data(data) => self.lines_received(dev, &data),
            EndpointEvent::Disconnected => {
                // A command without its newline ends with the connection
                if self.reader.pending() > 0 {
                    self.reader.push(b"\n");
                    self.drain_lines(dev);
                }
            }
            EndpointEvent::Wakeup => {
                self.sleeping = false;
                self.resume(dev);
            }
        }
    }
}

fn print_id(print: &Print) -> Option<&[u8]> {
    print.first_item().map(|item| item.data().as_ref())
}

/// Device error for an `ERROR` code
fn device_error(code: i32, action: DeviceAction) -> Error {
    match code {
        1 => Error::ActionUnsupported(action),
        2 => Error::NotOpen,
        3 => Error::AlreadyOpen,
        4 => Error::DeviceBusy,
        5 => Error::General("protocol error".into()),
        6 => Error::DataInvalid("scripted error".into()),
        7 => Error::DataNotFound,
        other => Error::General(format!("scripted error {}", other)),
    }
}

fn retry_reason(code: i32) -> RetryReason {
    match code {
        1 => RetryReason::TooShort,
        2 => RetryReason::CenterFinger,
        3 => RetryReason::RemoveFinger,
        _ => RetryReason::General,
    }
}
