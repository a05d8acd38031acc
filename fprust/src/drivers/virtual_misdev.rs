//! Virtual match-in-sensor device with on-device storage
//!
//! Prints live on the "sensor" and are referred to by a UUID stored as the
//! print's only item. The enrolled print is the caller's template, so its
//! username and description carry over. The driver announces its state to the connected
//! client with status lines and the client answers each action with a
//! result code, one per line:
//!
//! ```text
//! device -> client    ENROLL 6f1c1e0b-2c4a-4cfe-9c5d-0d6c1b8e2a11
//! client -> device    3
//! client -> device    1
//! device -> client    IDLE
//! ```

use fprust_core::constants::drivers::VIRTUAL_MISDEV;
use fprust_core::{Print, PrintKind};
use fprust_transport::line::{self, PrintId, StatusLine};
use fprust_transport::{Endpoint, EndpointEvent, LineReader};
use fprust_types::ScanType;
use tracing::{debug, info, warn};

use crate::action::{EnrollResult, EnrollStage, VerifyOutcome, VerifyResult};
use crate::device::DeviceCore;
use crate::driver::{Capabilities, Driver, DriverDescriptor};
use crate::error::Error;

/// Result code the client sends for an unknown print (`-ENOENT`)
pub const DELETE_NOT_FOUND: i32 = -2;

pub struct VirtualMisDriver {
    descriptor: DriverDescriptor,
    status: StatusLine,
    completed: u32,
    template: Option<Print>,
    reader: LineReader,
    endpoint: Option<Endpoint>,
}

impl VirtualMisDriver {
    pub fn new() -> Self {
        Self {
            descriptor: DriverDescriptor {
                name: "virtual_misdev".into(),
                full_name: "Virtual match-in-sensor device with internal storage".into(),
                driver_id: VIRTUAL_MISDEV,
                devtype: 0,
                capabilities: Capabilities::ENROLL | Capabilities::VERIFY | Capabilities::DELETE,
                print_kind: PrintKind::Raw,
                nr_enroll_stages: 1,
                scan_type: ScanType::Press,
            },
            status: StatusLine::Idle,
            completed: 0,
            template: None,
            reader: LineReader::new(),
            endpoint: None,
        }
    }

    /// State last announced to the client
    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    fn set_status(&mut self, status: StatusLine) {
        debug!("Status {}", status);
        self.status = status;
        self.send_status();
    }

    fn send_status(&self) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };
        if let Err(e) = endpoint.send(self.status.encode()) {
            warn!("Could not send status: {}", e);
        }
    }

    /// Id held by a device-stored print
    fn stored_id(print: &Print) -> crate::Result<PrintId> {
        let item = print
            .first_item()
            .ok_or_else(|| Error::DataInvalid("print holds no UUID".into()))?;
        PrintId::parse(item.data()).map_err(|e| Error::DataInvalid(e.to_string()))
    }

    fn lines_received(&mut self, dev: &mut DeviceCore, data: &[u8]) {
        self.reader.push(data);

        while let Some(line) = self.reader.next_line() {
            match line::parse_result_code(&line) {
                Ok(code) => self.handle_result(dev, code),
                Err(e) => warn!("Ignoring line: {}", e),
            }
        }
    }

    fn handle_result(&mut self, dev: &mut DeviceCore, code: i32) {
        match self.status.clone() {
            StatusLine::Idle => warn!("Received unexpected result code {} while idle", code),
            StatusLine::Enroll(id) => {
                info!("Reporting enroll result {}", code);
                let result = EnrollResult::from(code);
                if matches!(result, EnrollResult::Pass | EnrollResult::Complete) {
                    self.completed += 1;
                }

                let print = match result {
                    EnrollResult::Complete => match self.stored_print(dev, &id) {
                        Ok(print) => Some(print),
                        Err(e) => {
                            self.finish();
                            dev.enroll_complete(None, Some(e));
                            return;
                        }
                    },
                    _ => None,
                };
                let error = match result {
                    EnrollResult::Retry(reason) => Some(Error::Retry(reason)),
                    _ => None,
                };

                dev.enroll_progress(EnrollStage {
                    completed: self.completed,
                    result,
                    print: print.clone(),
                    error,
                });

                match result {
                    EnrollResult::Complete => {
                        self.finish();
                        dev.enroll_complete(print, None);
                    }
                    EnrollResult::Fail => {
                        self.finish();
                        dev.enroll_complete(None, Some(Error::EnrollFailed));
                    }
                    _ => {}
                }
            }
            StatusLine::Verify(_) => {
                info!("Reporting verify result {}", code);
                self.finish();
                let outcome = VerifyOutcome {
                    result: VerifyResult::from(code),
                    scanned: None,
                };
                dev.verify_complete(Some(outcome), None);
            }
            StatusLine::Delete(_) => {
                info!("Reporting delete result {}", code);
                self.finish();
                let result = match code {
                    0 => Ok(()),
                    DELETE_NOT_FOUND => Err(Error::DataNotFound),
                    other => Err(Error::General(format!("delete failed with code {}", other))),
                };
                dev.delete_complete(result);
            }
        }
    }

    fn stored_print(&mut self, dev: &DeviceCore, id: &PrintId) -> crate::Result<Print> {
        let mut print = self.template.take().unwrap_or_else(|| dev.new_print());
        print.set_kind(PrintKind::Raw)?;
        print.add_item(id.as_bytes().to_vec())?;
        print.set_device_stored(true);
        Ok(print)
    }

    fn finish(&mut self) {
        self.completed = 0;
        self.template = None;
        self.set_status(StatusLine::Idle);
    }
}

impl Default for VirtualMisDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for VirtualMisDriver {
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
        self.template = None;
        self.status = StatusLine::Idle;
        dev.close_complete(Ok(()));
    }

    fn enroll(&mut self, dev: &mut DeviceCore) {
        self.template = Some(dev.take_enroll_data());
        self.completed = 0;
        self.set_status(StatusLine::Enroll(PrintId::new_v4()));
    }

    fn verify(&mut self, dev: &mut DeviceCore) {
        let print = dev.take_verify_data();
        match Self::stored_id(&print) {
            Ok(id) => self.set_status(StatusLine::Verify(id)),
            Err(e) => dev.action_error(e),
        }
    }

    fn delete(&mut self, dev: &mut DeviceCore) {
        let print = dev.take_delete_data();
        match Self::stored_id(&print) {
            Ok(id) => self.set_status(StatusLine::Delete(id)),
            Err(e) => dev.action_error(e),
        }
    }

    fn cancel(&mut self, dev: &mut DeviceCore) {
        if matches!(self.status, StatusLine::Enroll(_) | StatusLine::Verify(_)) {
            self.finish();
            dev.action_error(Error::Cancelled);
        }
    }

    fn handle_io(&mut self, dev: &mut DeviceCore, event: EndpointEvent) {
        match event {
            EndpointEvent::Connected => self.send_status(),
            EndpointEvent::Data(data) => self.lines_received(dev, &data),
            EndpointEvent::Disconnected => {
                debug!("Client disconnected, {} is still waiting", dev.current_action());
                self.reader.clear();
            }
            EndpointEvent::Wakeup => {}
        }
    }
}
