//! Scriptable driver for exercising the action state machine
//!
//! Every hook records what it was called with and completes immediately
//! with the configured `ret_*` values, unless `hold` is set, in which case
//! the action stays in progress until the test completes it through
//! [`Device::core_mut`](crate::Device::core_mut).

use fprust_core::PrintKind;
use fprust_core::constants::drivers::FAKE;
use fprust_core::print::Print;
use fprust_types::{Image, ScanType};
use tracing::debug;

use crate::action::{DeviceAction, EnrollResult, EnrollStage, IdentifyOutcome, VerifyOutcome, VerifyResult};
use crate::device::DeviceCore;
use crate::driver::{Capabilities, Driver, DriverDescriptor};
use crate::error::Error;

/// Description a gallery print needs to be reported as identified
pub const FAKE_VERIFIED: &str = "fake-verified";

/// Action input the fake driver received
#[derive(Debug, Clone, PartialEq)]
pub enum FakeInput {
    Template(Print),
    Print(Print),
    Gallery(Vec<Print>),
    WaitForFinger(bool),
}

pub struct FakeDriver {
    descriptor: DriverDescriptor,

    /// Error every completion carries, taken by the next action
    pub ret_error: Option<Error>,

    /// Print returned by enroll and as the scanned print of verify/identify
    pub ret_print: Option<Print>,

    pub ret_result: VerifyResult,

    /// Print reported as identified, regardless of the gallery
    pub ret_match: Option<Print>,

    pub ret_image: Option<Image>,

    pub ret_list: Option<Vec<Print>>,

    /// Leave actions in progress after recording their input
    pub hold: bool,

    pub last_called: Option<DeviceAction>,

    pub last_input: Option<FakeInput>,

    pub cancel_called: bool,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::all())
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            descriptor: DriverDescriptor {
                name: "fake_test_dev".into(),
                full_name: "Virtual device for debugging".into(),
                driver_id: FAKE,
                devtype: 0,
                capabilities,
                print_kind: PrintKind::Raw,
                nr_enroll_stages: 5,
                scan_type: ScanType::Press,
            },
            ret_error: None,
            ret_print: None,
            ret_result: VerifyResult::NoMatch,
            ret_match: None,
            ret_image: None,
            ret_list: None,
            hold: false,
            last_called: None,
            last_input: None,
            cancel_called: false,
        }
    }

    fn record(&mut self, action: DeviceAction, input: Option<FakeInput>) -> bool {
        debug!("Fake driver {} called", action);
        self.last_called = Some(action);
        if input.is_some() {
            self.last_input = input;
        }
        !self.hold
    }

    fn unit_result(&mut self) -> crate::Result<()> {
        self.ret_error.take().map_or(Ok(()), Err)
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for FakeDriver {
    fn descriptor(&self) -> &DriverDescriptor {
        &self.descriptor
    }

    fn probe(&mut self, dev: &mut DeviceCore) {
        if self.record(DeviceAction::Probe, None) {
            let result = self.unit_result();
            dev.probe_complete(result);
        }
    }

    fn open(&mut self, dev: &mut DeviceCore) {
        if self.record(DeviceAction::Open, None) {
            let result = self.unit_result();
            dev.open_complete(result);
        }
    }

    fn close(&mut self, dev: &mut DeviceCore) {
        if self.record(DeviceAction::Close, None) {
            let result = self.unit_result();
            dev.close_complete(result);
        }
    }

    fn enroll(&mut self, dev: &mut DeviceCore) {
        let template = dev.take_enroll_data();
        if !self.record(DeviceAction::Enroll, Some(FakeInput::Template(template.clone()))) {
            return;
        }

        if let Some(error) = self.ret_error.take() {
            dev.enroll_complete(self.ret_print.take(), Some(error));
            return;
        }

        let print = match self.ret_print.take() {
            Some(print) => print,
            None => {
                let mut print = template;
                if let Err(e) = print.set_kind(PrintKind::Raw).and_then(|_| print.add_item(&b"fake-print"[..])) {
                    dev.enroll_complete(None, Some(e.into()));
                    return;
                }
                print
            }
        };

        let stages = dev.info().nr_enroll_stages;
        for completed in 1..=stages {
            let result = if completed == stages {
                EnrollResult::Complete
            } else {
                EnrollResult::Pass
            };
            dev.enroll_progress(EnrollStage {
                completed,
                result,
                print: None,
                error: None,
            });
        }

        dev.enroll_complete(Some(print), None);
    }

    fn verify(&mut self, dev: &mut DeviceCore) {
        let print = dev.take_verify_data();
        if !self.record(DeviceAction::Verify, Some(FakeInput::Print(print.clone()))) {
            return;
        }

        let error = self.ret_error.take();
        let outcome = VerifyOutcome {
            result: self.ret_result,
            scanned: Some(self.ret_print.take().unwrap_or(print)),
        };
        dev.verify_complete(Some(outcome), error);
    }

    fn identify(&mut self, dev: &mut DeviceCore) {
        let gallery = dev.take_identify_data();
        if !self.record(DeviceAction::Identify, Some(FakeInput::Gallery(gallery.clone()))) {
            return;
        }

        let error = self.ret_error.take();
        let matched = self.ret_match.take().or_else(|| {
            gallery
                .into_iter()
                .find(|print| print.description() == Some(FAKE_VERIFIED))
        });

        let outcome = IdentifyOutcome {
            matched,
            scanned: self.ret_print.take(),
        };
        dev.identify_complete(Some(outcome), error);
    }

    fn capture(&mut self, dev: &mut DeviceCore) {
        let wait_for_finger = dev.capture_data();
        if self.record(DeviceAction::Capture, Some(FakeInput::WaitForFinger(wait_for_finger))) {
            let error = self.ret_error.take();
            dev.capture_complete(self.ret_image.take(), error);
        }
    }

    fn list(&mut self, dev: &mut DeviceCore) {
        if self.record(DeviceAction::List, None) {
            let error = self.ret_error.take();
            dev.list_complete(self.ret_list.take(), error);
        }
    }

    fn delete(&mut self, dev: &mut DeviceCore) {
        let print = dev.take_delete_data();
        if self.record(DeviceAction::Delete, Some(FakeInput::Print(print))) {
            let result = self.unit_result();
            dev.delete_complete(result);
        }
    }

    fn cancel(&mut self, _dev: &mut DeviceCore) {
        self.cancel_called = true;
    }
}
