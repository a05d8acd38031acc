//! Device actions and their results

use std::fmt;

use fprust_core::Print;

use crate::error::Error;

/// Action a device can be asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceAction {
    #[default]
    None,
    Probe,
    Open,
    Close,
    Enroll,
    Verify,
    Identify,
    Capture,
    List,
    Delete,
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Probe => "probe",
            Self::Open => "open",
            Self::Close => "close",
            Self::Enroll => "enroll",
            Self::Verify => "verify",
            Self::Identify => "identify",
            Self::Capture => "capture",
            Self::List => "list",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Progress of the current action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionState {
    #[default]
    NotStarted,
    InProgress,
    Cancelling,
}

/// Why a scan has to be repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Scan was unusable
    General,
    /// Swipe was too short
    TooShort,
    /// Finger was not centered on the sensor
    CenterFinger,
    /// Finger has to be lifted and placed again
    RemoveFinger,
}

impl RetryReason {
    fn from_code(code: i32) -> Option<Self> {
        match code {
            100 => Some(Self::General),
            101 => Some(Self::TooShort),
            102 => Some(Self::CenterFinger),
            103 => Some(Self::RemoveFinger),
            _ => None,
        }
    }

    fn code(self) -> i32 {
        match self {
            Self::General => 100,
            Self::TooShort => 101,
            Self::CenterFinger => 102,
            Self::RemoveFinger => 103,
        }
    }
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::General => "scan failed, try again",
            Self::TooShort => "swipe was too short",
            Self::CenterFinger => "center the finger on the sensor",
            Self::RemoveFinger => "remove the finger and try again",
        };
        f.write_str(text)
    }
}

/// Result code of one enroll stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollResult {
    Complete,
    Fail,
    Pass,
    Retry(RetryReason),
    /// A code outside the known set, kept as received
    Unknown(i32),
}

impl EnrollResult {
    pub fn code(self) -> i32 {
        match self {
            Self::Complete => 1,
            Self::Fail => 2,
            Self::Pass => 3,
            Self::Retry(reason) => reason.code(),
            Self::Unknown(code) => code,
        }
    }
}

impl From<i32> for EnrollResult {
    fn from(code: i32) -> Self {
        match code {
            1 => Self::Complete,
            2 => Self::Fail,
            3 => Self::Pass,
            other => RetryReason::from_code(other)
                .map(Self::Retry)
                .unwrap_or(Self::Unknown(other)),
        }
    }
}

/// Result code of a verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyResult {
    NoMatch,
    Match,
    Retry(RetryReason),
    /// A code outside the known set, kept as received
    Unknown(i32),
}

impl VerifyResult {
    pub fn code(self) -> i32 {
        match self {
            Self::NoMatch => 0,
            Self::Match => 1,
            Self::Retry(reason) => reason.code(),
            Self::Unknown(code) => code,
        }
    }

    pub fn is_match(self) -> bool {
        self == Self::Match
    }
}

impl From<i32> for VerifyResult {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::NoMatch,
            1 => Self::Match,
            other => RetryReason::from_code(other)
                .map(Self::Retry)
                .unwrap_or(Self::Unknown(other)),
        }
    }
}

/// One intermediate enroll report
#[derive(Debug)]
pub struct EnrollStage {
    /// Stages completed so far
    pub completed: u32,

    pub result: EnrollResult,

    /// Print derived from this stage's scan, if the driver has one
    pub print: Option<Print>,

    /// Retry condition for this stage
    pub error: Option<Error>,
}

/// Result of a verification
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOutcome {
    pub result: VerifyResult,

    /// Print built from the scan, when the driver exposes it
    pub scanned: Option<Print>,
}

/// Result of an identification
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IdentifyOutcome {
    /// Gallery entry that matched
    pub matched: Option<Print>,

    /// Print built from the scan, when the driver exposes it
    pub scanned: Option<Print>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_enroll_result_codes() {
        assert_eq!(EnrollResult::from(1), EnrollResult::Complete);
        assert_eq!(EnrollResult::from(3), EnrollResult::Pass);
        assert_eq!(EnrollResult::from(101), EnrollResult::Retry(RetryReason::TooShort));
        assert_eq!(EnrollResult::from(200), EnrollResult::Unknown(200));

        for code in [1, 2, 3, 100, 101, 102, 103, 200, -7] {
            assert_eq!(EnrollResult::from(code).code(), code);
        }
    }

    #[test]
    fn test_verify_result_codes() {
        assert_eq!(VerifyResult::from(0), VerifyResult::NoMatch);
        assert!(VerifyResult::from(1).is_match());
        assert_eq!(VerifyResult::from(103), VerifyResult::Retry(RetryReason::RemoveFinger));

        for code in [0, 1, 5, 100, 102, -1] {
            assert_eq!(VerifyResult::from(code).code(), code);
        }
    }

    #[test]
    fn test_action_display() {
        assert_eq!(DeviceAction::Delete.to_string(), "delete");
        assert_eq!(DeviceAction::default(), DeviceAction::None);
    }
}
