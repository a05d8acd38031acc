//! Type definitions for fprust

pub mod device_info;
pub mod error;
pub mod image;

pub use device_info::{DeviceInfo, ScanType};
pub use error::{Error, Result};
pub use image::{Image, Minutia};
