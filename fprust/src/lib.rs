//! # fprust
//!
//! Fingerprint sensor abstraction with one asynchronous action protocol
//! for every kind of sensor.
//!
//! ## Features
//!
//! - One action at a time per device, with precondition checks and
//!   exactly-once completion
//! - Multi-stage enroll, verify, identify, capture, list and delete
//! - Shared minutiae pipeline for image sensors
//! - Virtual image, match-in-sensor and command-scripted devices driven
//!   over Unix sockets
//! - A Tokio actor front end ([`DeviceHandle`])
//!
//! ## Quick Start
//!
//! ```no_run
//! use fprust::drivers::VirtualImageDriver;
//! use fprust::{Device, DeviceHandle};
//!
//! #[tokio::main]
//! async fn main() -> fprust::Result<()> {
//!     let device = Device::new(VirtualImageDriver::new(), "/tmp/fp-image.sock");
//!     let (handle, _events) = DeviceHandle::spawn(device);
//!
//!     handle.open().await?;
//!     let image = handle.capture(true).await?;
//!     println!("captured {}x{}", image.width(), image.height());
//!     handle.close().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod config;
pub mod device;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod handle;
pub mod image_device;

// Re-exports
pub use action::{
    ActionState, DeviceAction, EnrollResult, EnrollStage, IdentifyOutcome, RetryReason, VerifyOutcome,
    VerifyResult,
};
pub use config::VirtualConfig;
pub use device::{Device, DeviceCore, DeviceEvent};
pub use driver::{Capabilities, Driver, DriverDescriptor};
pub use error::{Error, Result};
pub use handle::{DeviceEvents, DeviceHandle};
pub use image_device::ImagePipeline;

// Re-export types
pub use fprust_core::{Print, PrintKind};
pub use fprust_types::{DeviceInfo, Image, Minutia, ScanType};
