//! Device information structures

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// How the finger is presented to the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanType {
    /// Finger is swiped across a narrow sensor
    Swipe,

    /// Finger is pressed onto an area sensor
    #[default]
    Press,
}

impl FromStr for ScanType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "swipe" => Ok(Self::Swipe),
            "press" => Ok(Self::Press),
            other => Err(Error::UnknownScanType(other.to_string())),
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Swipe => write!(f, "swipe"),
            Self::Press => write!(f, "press"),
        }
    }
}

/// Device information
///
/// Identifies one sensor instance: which driver runs it, which device
/// range (devtype) it belongs to, and where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Short driver name (e.g. `virtual_image`)
    pub driver: String,

    /// Numeric driver identifier stored in prints
    pub driver_id: u16,

    /// Device type within the driver (model/revision)
    pub devtype: u32,

    /// Bus path or virtual endpoint name
    pub device_id: String,

    /// Human readable name
    pub name: String,

    /// Number of scans needed to complete an enrollment
    pub nr_enroll_stages: u32,

    /// Press or swipe sensor
    pub scan_type: ScanType,
}

impl DeviceInfo {
    pub fn new(driver: impl Into<String>, driver_id: u16, devtype: u32) -> Self {
        let driver = driver.into();
        Self {
            name: driver.clone(),
            driver,
            driver_id,
            devtype,
            device_id: String::new(),
            nr_enroll_stages: 1,
            scan_type: ScanType::default(),
        }
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the number of enroll stages
    ///
    /// # Errors
    ///
    /// A device needs at least one stage to enroll anything.
    pub fn with_enroll_stages(mut self, stages: u32) -> Result<Self> {
        if stages == 0 {
            return Err(Error::InvalidValue("enroll stages must be at least 1".into()));
        }
        self.nr_enroll_stages = stages;
        Ok(self)
    }

    pub fn with_scan_type(mut self, scan_type: ScanType) -> Self {
        self.scan_type = scan_type;
        self
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device[{}: driver={} (0x{:04X}), devtype=0x{:08X}, id={}]",
            self.name, self.driver, self.driver_id, self.devtype, self.device_id
        )
    }
}
