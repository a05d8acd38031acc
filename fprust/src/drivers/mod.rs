//! Bundled drivers

pub mod fake;
pub mod virtual_device;
pub mod virtual_imgdev;
pub mod virtual_misdev;

pub use fake::FakeDriver;
pub use virtual_device::VirtualDeviceDriver;
pub use virtual_imgdev::VirtualImageDriver;
pub use virtual_misdev::VirtualMisDriver;
