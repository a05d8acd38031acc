//! Virtual device configuration
//!
//! Virtual devices are enabled by pointing an environment variable at the
//! socket path they should listen on:
//!
//! | variable                     | device                                    |
//! |------------------------------|-------------------------------------------|
//! | `FP_VIRTUAL_IMAGE`           | [`VirtualImageDriver`]                    |
//! | `FP_VIRTUAL_MISDEV`          | [`VirtualMisDriver`]                      |
//! | `FP_VIRTUAL_DEVICE`          | [`VirtualDeviceDriver`]                   |
//! | `FP_VIRTUAL_DEVICE_STORAGE`  | [`VirtualDeviceDriver`] with storage      |
//! | `FP_VIRTUAL_FAKE_DEVICE`     | [`FakeDriver`], value is its id           |

use std::env;
use std::path::PathBuf;

use fprust_core::constants::{DEFAULT_ENROLL_STAGES, DEFAULT_MATCH_THRESHOLD};
use tracing::debug;

use crate::device::Device;
use crate::driver::Driver;
use crate::drivers::{FakeDriver, VirtualDeviceDriver, VirtualImageDriver, VirtualMisDriver};
use crate::error::Result;

pub const ENV_VIRTUAL_IMAGE: &str = "FP_VIRTUAL_IMAGE";
pub const ENV_VIRTUAL_MISDEV: &str = "FP_VIRTUAL_MISDEV";
pub const ENV_VIRTUAL_DEVICE: &str = "FP_VIRTUAL_DEVICE";
pub const ENV_VIRTUAL_DEVICE_STORAGE: &str = "FP_VIRTUAL_DEVICE_STORAGE";
pub const ENV_VIRTUAL_FAKE: &str = "FP_VIRTUAL_FAKE_DEVICE";

/// Which virtual devices to create, and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualConfig {
    /// Socket path of the virtual image device
    pub image_path: Option<PathBuf>,

    /// Socket path of the virtual match-in-sensor device
    pub misdev_path: Option<PathBuf>,

    /// Socket path of the scripted virtual device
    pub device_path: Option<PathBuf>,

    /// Socket path of the scripted virtual device with storage
    pub storage_path: Option<PathBuf>,

    /// Device id of the fake device
    pub fake: Option<String>,

    /// Match threshold of the virtual image device
    pub match_threshold: u32,

    /// Images the virtual image device needs per enroll
    pub enroll_stages: u32,
}

impl Default for VirtualConfig {
    fn default() -> Self {
        Self {
            image_path: None,
            misdev_path: None,
            device_path: None,
            storage_path: None,
            fake: None,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            enroll_stages: DEFAULT_ENROLL_STAGES,
        }
    }
}

impl VirtualConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read device paths from the environment
    ///
    /// Empty variables count as unset.
    pub fn from_env() -> Self {
        let var = |name: &str| env::var(name).ok().filter(|value| !value.is_empty());

        Self {
            image_path: var(ENV_VIRTUAL_IMAGE).map(PathBuf::from),
            misdev_path: var(ENV_VIRTUAL_MISDEV).map(PathBuf::from),
            device_path: var(ENV_VIRTUAL_DEVICE).map(PathBuf::from),
            storage_path: var(ENV_VIRTUAL_DEVICE_STORAGE).map(PathBuf::from),
            fake: var(ENV_VIRTUAL_FAKE),
            ..Self::default()
        }
    }

    pub fn with_image_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    pub fn with_misdev_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.misdev_path = Some(path.into());
        self
    }

    pub fn with_device_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_path = Some(path.into());
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn with_fake(mut self, device_id: impl Into<String>) -> Self {
        self.fake = Some(device_id.into());
        self
    }

    pub fn with_match_threshold(mut self, threshold: u32) -> Self {
        self.match_threshold = threshold;
        self
    }

    /// Set the image device's enroll stage count
    ///
    /// # Errors
    ///
    /// Returns a validation error for zero stages.
    pub fn with_enroll_stages(mut self, stages: u32) -> Result<Self> {
        if stages == 0 {
            return Err(fprust_types::Error::InvalidValue("enroll needs at least one stage".into()).into());
        }
        self.enroll_stages = stages;
        Ok(self)
    }

    /// Create one closed device per configured endpoint
    pub fn discover(&self) -> Vec<Device<Box<dyn Driver>>> {
        let mut devices = Vec::new();

        if let Some(path) = &self.image_path {
            let driver = VirtualImageDriver::new()
                .with_threshold(self.match_threshold)
                .with_enroll_stages(self.enroll_stages);
            devices.push(Device::new(Box::new(driver) as Box<dyn Driver>, path.to_string_lossy()));
        }

        if let Some(path) = &self.misdev_path {
            let driver = VirtualMisDriver::new();
            devices.push(Device::new(Box::new(driver) as Box<dyn Driver>, path.to_string_lossy()));
        }

        if let Some(path) = &self.device_path {
            let driver = VirtualDeviceDriver::new();
            devices.push(Device::new(Box::new(driver) as Box<dyn Driver>, path.to_string_lossy()));
        }

        if let Some(path) = &self.storage_path {
            let driver = VirtualDeviceDriver::with_storage();
            devices.push(Device::new(Box::new(driver) as Box<dyn Driver>, path.to_string_lossy()));
        }

        if let Some(device_id) = &self.fake {
            devices.push(Device::new(Box::new(FakeDriver::new()) as Box<dyn Driver>, device_id.clone()));
        }

        debug!("Discovered {} virtual devices", devices.len());
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Serializes tests that touch the process environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: [&str; 5] = [
        ENV_VIRTUAL_IMAGE,
        ENV_VIRTUAL_MISDEV,
        ENV_VIRTUAL_DEVICE,
        ENV_VIRTUAL_DEVICE_STORAGE,
        ENV_VIRTUAL_FAKE,
    ];

    fn set_env(vars: &[(&str, &str)]) {
        for name in ALL_VARS {
            // SAFETY: every test touching these variables holds ENV_LOCK
            unsafe { env::remove_var(name) };
        }
        for (name, value) in vars {
            // SAFETY: as above
            unsafe { env::set_var(name, value) };
        }
    }

    #[test]
    fn test_defaults() {
        let config = VirtualConfig::new();
        assert_eq!(config.match_threshold, 40);
        assert_eq!(config.enroll_stages, 5);
        assert!(config.discover().is_empty());
    }

    #[test]
    fn test_discover_configured_devices() {
        let config = VirtualConfig::new()
            .with_image_path("/tmp/image.sock")
            .with_misdev_path("/tmp/misdev.sock")
            .with_device_path("/tmp/device.sock")
            .with_storage_path("/tmp/storage.sock")
            .with_fake("fake-0")
            .with_enroll_stages(3)
            .unwrap();

        let devices = config.discover();
        let names: Vec<_> = devices.iter().map(|d| d.info().driver.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "virtual_image",
                "virtual_misdev",
                "virtual_device",
                "virtual_device_storage",
                "fake_test_dev"
            ]
        );

        assert_eq!(devices[0].info().device_id, "/tmp/image.sock");
        assert_eq!(devices[0].info().nr_enroll_stages, 3);
        assert_eq!(devices[1].info().nr_enroll_stages, 1);
        assert_eq!(devices[3].info().device_id, "/tmp/storage.sock");
        assert!(devices.iter().all(|d| !d.is_open()));
    }

    #[test]
    fn test_from_env_discovers_devices() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        set_env(&[
            (ENV_VIRTUAL_IMAGE, "/tmp/env-image.sock"),
            (ENV_VIRTUAL_MISDEV, "/tmp/env-misdev.sock"),
            (ENV_VIRTUAL_DEVICE_STORAGE, "/tmp/env-storage.sock"),
            (ENV_VIRTUAL_FAKE, "fake-env"),
        ]);

        let config = VirtualConfig::from_env();
        set_env(&[]);

        assert_eq!(config.image_path, Some(PathBuf::from("/tmp/env-image.sock")));
        assert_eq!(config.device_path, None);

        let devices: Vec<(String, String)> = config
            .discover()
            .iter()
            .map(|d| (d.info().driver.clone(), d.info().device_id.clone()))
            .collect();
        assert_eq!(
            devices,
            vec![
                ("virtual_image".to_string(), "/tmp/env-image.sock".to_string()),
                ("virtual_misdev".to_string(), "/tmp/env-misdev.sock".to_string()),
                ("virtual_device_storage".to_string(), "/tmp/env-storage.sock".to_string()),
                ("fake_test_dev".to_string(), "fake-env".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_env_vars_are_unset() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        set_env(&[(ENV_VIRTUAL_IMAGE, ""), (ENV_VIRTUAL_DEVICE, "/tmp/env-device.sock")]);

        let config = VirtualConfig::from_env();
        set_env(&[]);

        assert_eq!(config.image_path, None);
        let devices = config.discover();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].info().driver, "virtual_device");
        assert_eq!(devices[0].info().nr_enroll_stages, 5);
    }

    #[test]
    fn test_zero_stages_rejected() {
        let err = VirtualConfig::new().with_enroll_stages(0).unwrap_err();
        assert!(matches!(err, crate::Error::Types(_)));
    }
}
