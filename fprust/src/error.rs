//! High-level error types

use crate::action::{DeviceAction, RetryReason};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Print data error: {0}")]
    Core(#[from] fprust_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] fprust_transport::Error),

    #[error("Type error: {0}")]
    Types(#[from] fprust_types::Error),

    /// Another action is in progress
    #[error("Device is busy with another action")]
    DeviceBusy,

    #[error("Action not supported by this device: {0}")]
    ActionUnsupported(DeviceAction),

    #[error("Device is not open")]
    NotOpen,

    #[error("Device is already open")]
    AlreadyOpen,

    /// The print does not exist on the device
    #[error("Print not found on device")]
    DataNotFound,

    #[error("Invalid print data: {0}")]
    DataInvalid(String),

    #[error("Action cancelled")]
    Cancelled,

    #[error("Enrollment failed")]
    EnrollFailed,

    #[error("Retry: {0}")]
    Retry(RetryReason),

    #[error("Device error: {0}")]
    General(String),

    /// The device task stopped before answering
    #[error("Device task is gone")]
    DeviceGone,
}

impl Error {
    /// Check if error is recoverable (retry might succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Retry(_) | Self::DeviceBusy | Self::Cancelled
        )
    }

    /// Check if the print was rejected as incompatible with the device
    pub fn is_incompatible(&self) -> bool {
        matches!(self, Self::Core(fprust_core::Error::Incompatible(_)))
    }
}
