//! Line-oriented status protocol
//!
//! The device announces its state as one of `IDLE`, `ENROLL <uuid>`,
//! `VERIFY <uuid>` or `DELETE <uuid>`; the stimulus answers each action with
//! a decimal result code. Every message ends with `\n`.

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Length of a hyphenated UUID string
pub const UUID_LEN: usize = 36;

/// Accumulates stream data and hands out complete lines
///
/// # Examples
///
/// ```
/// use fprust_transport::LineReader;
///
/// let mut reader = LineReader::new();
/// reader.push(b"200\n3");
/// assert_eq!(reader.next_line().as_deref(), Some(&b"200"[..]));
/// assert_eq!(reader.next_line(), None);
///
/// reader.push(b"\n");
/// assert_eq!(reader.next_line().as_deref(), Some(&b"3"[..]));
/// ```
#[derive(Debug, Default)]
pub struct LineReader {
    buf: BytesMut,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Remove and return the next complete line without its newline
    pub fn next_line(&mut self) -> Option<Bytes> {
        let end = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line = self.buf.split_to(end + 1);
        line.truncate(end);
        trace!("Line: {:?}", String::from_utf8_lossy(&line));
        Some(line.freeze())
    }

    /// Drop any buffered partial line
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Bytes waiting for a newline
    pub fn pending(&self) -> usize {
        self.buf.remaining()
    }
}

/// Parse a result line as a decimal integer
///
/// Surrounding whitespace (including a `\r`) is ignored.
pub fn parse_result_code(line: &[u8]) -> Result<i32> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::Protocol("result line is not UTF-8".into()))?;

    text.trim()
        .parse()
        .map_err(|_| Error::Protocol(format!("expected a result code, got {:?}", text)))
}

/// Parse a print handle, which must be a 36-byte hyphenated UUID
pub fn parse_uuid(data: &[u8]) -> Result<Uuid> {
    if data.len() != UUID_LEN {
        return Err(Error::Protocol(format!(
            "UUID must be {} bytes, got {}",
            UUID_LEN,
            data.len()
        )));
    }

    Uuid::try_parse_ascii(data).map_err(|e| Error::Protocol(format!("invalid UUID: {}", e)))
}

/// Handle of a print stored on the device
///
/// Keeps the bytes it was parsed from, so an id in upper case or any other
/// accepted spelling is sent back exactly as stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrintId {
    uuid: Uuid,
    text: Bytes,
}

impl PrintId {
    /// Fresh random id in lowercase hyphenated form
    pub fn new_v4() -> Self {
        Self::from(Uuid::new_v4())
    }

    /// Parse a stored id, see [`parse_uuid`]
    pub fn parse(data: &[u8]) -> Result<Self> {
        let uuid = parse_uuid(data)?;
        Ok(Self {
            uuid,
            text: Bytes::copy_from_slice(data),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The id as stored in the print
    pub fn as_bytes(&self) -> &[u8] {
        &self.text
    }
}

impl From<Uuid> for PrintId {
    fn from(uuid: Uuid) -> Self {
        Self {
            uuid,
            text: Bytes::from(uuid.hyphenated().to_string()),
        }
    }
}

impl fmt::Display for PrintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.text))
    }
}

/// State announcement sent by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    Idle,
    Enroll(PrintId),
    Verify(PrintId),
    Delete(PrintId),
}

impl StatusLine {
    /// Encode including the trailing newline
    pub fn encode(&self) -> Bytes {
        Bytes::from(format!("{}\n", self))
    }

    /// Parse a line as produced by [`StatusLine::encode`], newline stripped
    pub fn parse(line: &[u8]) -> Result<Self> {
        if line == b"IDLE" {
            return Ok(Self::Idle);
        }

        let space = line
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| Error::Protocol(format!("unknown status {:?}", String::from_utf8_lossy(line))))?;
        let (command, id) = (&line[..space], PrintId::parse(&line[space + 1..])?);

        match command {
            b"ENROLL" => Ok(Self::Enroll(id)),
            b"VERIFY" => Ok(Self::Verify(id)),
            b"DELETE" => Ok(Self::Delete(id)),
            other => Err(Error::Protocol(format!(
                "unknown status {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Enroll(id) => write!(f, "ENROLL {}", id),
            Self::Verify(id) => write!(f, "VERIFY {}", id),
            Self::Delete(id) => write!(f, "DELETE {}", id),
        }
    }
}
