//! Print format and matcher constants

/// Tag of the legacy single-item format
pub const TAG_FP1: &[u8; 3] = b"FP1";

/// Tag of the current multi-item format
pub const TAG_FP2: &[u8; 3] = b"FP2";

/// Fixed header: tag (3) + driver id (2) + devtype (4) + kind (1)
pub const HEADER_SIZE: usize = 10;

/// Size of the length prefix in front of every FP2 item
pub const ITEM_LENGTH_SIZE: usize = 4;

/// Hard limit of minutiae per template
pub const MAX_MINUTIAE: usize = 200;

/// Bytes per serialized minutiae row (x, y, theta as i32)
pub const XYT_ROW_SIZE: usize = 12;

/// Largest absolute x or y a stored minutiae row may carry
pub const MAX_COORDINATE: i32 = 65535;

/// Default score a template must reach to count as a match
pub const DEFAULT_MATCH_THRESHOLD: u32 = 40;

/// Default number of scans for an image device enrollment
pub const DEFAULT_ENROLL_STAGES: u32 = 5;

/// Driver identifiers written into prints
pub mod drivers {
    /// Virtual image-capture device
    pub const VIRTUAL_IMAGE: u16 = 0x0100;

    /// Virtual match-in-sensor device
    pub const VIRTUAL_MISDEV: u16 = 0x0101;

    /// Scriptable fake device
    pub const FAKE: u16 = 0x0102;

    /// Command-scripted virtual device
    pub const VIRTUAL_DEVICE: u16 = 0x0103;

    /// Command-scripted virtual device with on-device storage
    pub const VIRTUAL_DEVICE_STORAGE: u16 = 0x0104;
}
