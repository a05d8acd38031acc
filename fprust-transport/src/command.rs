//! Scripted device command protocol
//!
//! A stimulus program scripts the scripted virtual device with one command
//! per line (or per connection, when it closes without a newline):
//!
//! ```text
//! INSERT <id>              store a print on the device
//! REMOVE <id>              drop a stored print
//! LIST                     ask for the stored ids
//! SCAN <id>                next scan reads the print <id>
//! ERROR <code>             next scan fails with a device error
//! RETRY <code>             next scan asks for a retry
//! FINGER <0|1>             finger lifted or placed
//! SLEEP <ms>               pause before the next queued command
//! SET_ENROLL_STAGES <n>    change the enroll stage count
//! SET_SCAN_TYPE <type>     `press` or `swipe`
//! ```
//!
//! `LIST` is answered with one id per line followed by an empty line.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use fprust_types::ScanType;

use crate::error::{Error, Result};

/// One instruction for the scripted device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Insert(String),
    Remove(String),
    List,
    Scan(String),
    Error(i32),
    Retry(i32),
    Finger(bool),
    Sleep(Duration),
    SetEnrollStages(u32),
    SetScanType(ScanType),
}

impl Command {
    /// Parse a command line, newline stripped
    ///
    /// # Errors
    ///
    /// Returns `Protocol` for unknown commands, missing arguments and
    /// arguments of the wrong type.
    ///
    /// # Examples
    ///
    /// ```
    /// use fprust_transport::Command;
    ///
    /// assert_eq!(Command::parse(b"SCAN p1").unwrap(), Command::Scan("p1".into()));
    /// assert!(Command::parse(b"SCAN").is_err());
    /// ```
    pub fn parse(line: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(line)
            .map_err(|_| Error::Protocol("command is not UTF-8".into()))?
            .trim();

        let (name, value) = match text.split_once(' ') {
            Some((name, value)) => (name, Some(value.trim())),
            None => (text, None),
        };
        let arg = || value.filter(|v| !v.is_empty()).ok_or_else(|| missing(name));

        match name {
            "INSERT" => Ok(Self::Insert(arg()?.to_string())),
            "REMOVE" => Ok(Self::Remove(arg()?.to_string())),
            "LIST" => Ok(Self::List),
            "SCAN" => Ok(Self::Scan(arg()?.to_string())),
            "ERROR" => Ok(Self::Error(number(name, arg()?)?)),
            "RETRY" => Ok(Self::Retry(number(name, arg()?)?)),
            "FINGER" => match arg()? {
                "0" => Ok(Self::Finger(false)),
                "1" => Ok(Self::Finger(true)),
                other => Err(Error::Protocol(format!("FINGER expects 0 or 1, got {:?}", other))),
            },
            "SLEEP" => Ok(Self::Sleep(Duration::from_millis(number(name, arg()?)?))),
            "SET_ENROLL_STAGES" => Ok(Self::SetEnrollStages(number(name, arg()?)?)),
            "SET_SCAN_TYPE" => arg()?
                .parse()
                .map(Self::SetScanType)
                .map_err(|e| Error::Protocol(format!("SET_SCAN_TYPE: {}", e))),
            other => Err(Error::Protocol(format!("unknown command {:?}", other))),
        }
    }

    /// Encode including the trailing newline
    pub fn encode(&self) -> Bytes {
        Bytes::from(format!("{}\n", self))
    }

    /// Whether the command waits in the scan queue instead of acting at once
    pub fn is_queued(&self) -> bool {
        matches!(
            self,
            Self::Scan(_) | Self::Error(_) | Self::Retry(_) | Self::Finger(_) | Self::Sleep(_)
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert(id) => write!(f, "INSERT {}", id),
            Self::Remove(id) => write!(f, "REMOVE {}", id),
            Self::List => write!(f, "LIST"),
            Self::Scan(id) => write!(f, "SCAN {}", id),
            Self::Error(code) => write!(f, "ERROR {}", code),
            Self::Retry(code) => write!(f, "RETRY {}", code),
            Self::Finger(present) => write!(f, "FINGER {}", u8::from(*present)),
            Self::Sleep(delay) => write!(f, "SLEEP {}", delay.as_millis()),
            Self::SetEnrollStages(stages) => write!(f, "SET_ENROLL_STAGES {}", stages),
            Self::SetScanType(scan_type) => write!(f, "SET_SCAN_TYPE {}", scan_type),
        }
    }
}

fn missing(name: &str) -> Error {
    Error::Protocol(format!("{} needs an argument", name))
}

fn number<T: std::str::FromStr>(name: &str, arg: &str) -> Result<T> {
    arg.parse()
        .map_err(|_| Error::Protocol(format!("{} expects a number, got {:?}", name, arg)))
}
