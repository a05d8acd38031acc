//! Driver contract
//!
//! A driver implements the hooks for the actions it supports. Hooks are
//! called by [`Device`](crate::Device) after it has checked the action's
//! preconditions, and each started action must be finished through exactly
//! one completion call on the [`DeviceCore`] it is given, either from the
//! hook itself or later from [`Driver::handle_io`].

use bitflags::bitflags;
use fprust_core::PrintKind;
use fprust_transport::EndpointEvent;
use fprust_types::ScanType;
use tracing::trace;

use crate::action::DeviceAction;
use crate::device::DeviceCore;
use crate::error::Error;

bitflags! {
    /// Optional actions a driver implements
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const ENROLL = 1 << 0;
        const VERIFY = 1 << 1;
        const IDENTIFY = 1 << 2;
        const CAPTURE = 1 << 3;
        const LIST = 1 << 4;
        const DELETE = 1 << 5;
    }
}

impl Capabilities {
    /// Capability required to run `action`, if any
    pub fn required_for(action: DeviceAction) -> Option<Self> {
        match action {
            DeviceAction::Enroll => Some(Self::ENROLL),
            DeviceAction::Verify => Some(Self::VERIFY),
            DeviceAction::Identify => Some(Self::IDENTIFY),
            DeviceAction::Capture => Some(Self::CAPTURE),
            DeviceAction::List => Some(Self::LIST),
            DeviceAction::Delete => Some(Self::DELETE),
            DeviceAction::None | DeviceAction::Probe | DeviceAction::Open | DeviceAction::Close => None,
        }
    }

    /// Check whether `action` can run with this set
    pub fn supports(self, action: DeviceAction) -> bool {
        Self::required_for(action).is_none_or(|required| self.contains(required))
    }
}

/// Static description of a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverDescriptor {
    /// Short name, e.g. `virtual_image`
    pub name: String,

    /// Human readable name
    pub full_name: String,

    /// Numeric driver id written into prints
    pub driver_id: u16,

    pub devtype: u32,

    pub capabilities: Capabilities,

    /// Kind of the prints this driver produces and accepts
    pub print_kind: PrintKind,

    pub nr_enroll_stages: u32,

    pub scan_type: ScanType,
}

/// Driver hooks
///
/// Unsupported actions never reach their hook because the device checks
/// [`DriverDescriptor::capabilities`] first; the defaults still answer with
/// `ActionUnsupported` so a wrong descriptor cannot leave an action hanging.
pub trait Driver: Send {
    fn descriptor(&self) -> &DriverDescriptor;

    /// Check that the hardware is present
    fn probe(&mut self, dev: &mut DeviceCore) {
        dev.probe_complete(Ok(()));
    }

    fn open(&mut self, dev: &mut DeviceCore);

    fn close(&mut self, dev: &mut DeviceCore);

    fn enroll(&mut self, dev: &mut DeviceCore) {
        dev.action_error(Error::ActionUnsupported(DeviceAction::Enroll));
    }

    fn verify(&mut self, dev: &mut DeviceCore) {
        dev.action_error(Error::ActionUnsupported(DeviceAction::Verify));
    }

    fn identify(&mut self, dev: &mut DeviceCore) {
        dev.action_error(Error::ActionUnsupported(DeviceAction::Identify));
    }

    fn capture(&mut self, dev: &mut DeviceCore) {
        dev.action_error(Error::ActionUnsupported(DeviceAction::Capture));
    }

    fn list(&mut self, dev: &mut DeviceCore) {
        dev.action_error(Error::ActionUnsupported(DeviceAction::List));
    }

    fn delete(&mut self, dev: &mut DeviceCore) {
        dev.action_error(Error::ActionUnsupported(DeviceAction::Delete));
    }

    /// Called once when the caller cancels the current action
    ///
    /// Cancellation is advisory: the driver finishes the action whenever it
    /// sees fit, usually with `Error::Cancelled`.
    fn cancel(&mut self, _dev: &mut DeviceCore) {}

    /// Called for every event of the driver's endpoint
    fn handle_io(&mut self, _dev: &mut DeviceCore, event: EndpointEvent) {
        trace!(?event, "Ignoring endpoint event");
    }
}

impl<D: Driver + ?Sized> Driver for Box<D> {
    fn descriptor(&self) -> &DriverDescriptor {
        (**self).descriptor()
    }

    fn probe(&mut self, dev: &mut DeviceCore) {
        (**self).probe(dev)
    }

    fn open(&mut self, dev: &mut DeviceCore) {
        (**self).open(dev)
    }

    fn close(&mut self, dev: &mut DeviceCore) {
        (**self).close(dev)
    }

    fn enroll(&mut self, dev: &mut DeviceCore) {
        (**self).enroll(dev)
    }

    fn verify(&mut self, dev: &mut DeviceCore) {
        (**self).verify(dev)
    }

    fn identify(&mut self, dev: &mut DeviceCore) {
        (**self).identify(dev)
    }

    fn capture(&mut self, dev: &mut DeviceCore) {
        (**self).capture(dev)
    }

    fn list(&mut self, dev: &mut DeviceCore) {
        (**self).list(dev)
    }

    fn delete(&mut self, dev: &mut DeviceCore) {
        (**self).delete(dev)
    }

    fn cancel(&mut self, dev: &mut DeviceCore) {
        (**self).cancel(dev)
    }

    fn handle_io(&mut self, dev: &mut DeviceCore, event: EndpointEvent) {
        (**self).handle_io(dev, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_lookup() {
        let caps = Capabilities::ENROLL | Capabilities::VERIFY;

        assert!(caps.supports(DeviceAction::Open));
        assert!(caps.supports(DeviceAction::Verify));
        assert!(!caps.supports(DeviceAction::Delete));
        assert_eq!(Capabilities::required_for(DeviceAction::List), Some(Capabilities::LIST));
    }
}
