//! Fixed-width integer codec with a running cursor
//!
//! Used by the print storage format and by drivers that parse raw sensor
//! frames. This layer does no bounds checking: callers validate buffer
//! lengths at the format boundary before reaching for it.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Widest integer the codec handles; larger widths are clamped
pub const MAX_WIDTH: usize = 8;

/// Byte order of an encoded integer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Byte order of the host
    #[cfg(target_endian = "little")]
    pub const NATIVE: Endian = Endian::Little;

    /// Byte order of the host
    #[cfg(target_endian = "big")]
    pub const NATIVE: Endian = Endian::Big;
}

/// Read a `width`-byte unsigned integer at `*offset` and advance the cursor
///
/// Widths above 8 are clamped to 8; a width of 0 reads nothing and
/// returns 0.
///
/// # Panics
///
/// Panics if `buf` holds fewer than `*offset + width` bytes.
///
/// # Examples
///
/// ```
/// use fprust_core::codec::{self, Endian};
///
/// let buf = [0x34, 0x12, 0xAA];
/// let mut offset = 0;
/// assert_eq!(codec::extract(&buf, &mut offset, 2, Endian::Little), 0x1234);
/// assert_eq!(offset, 2);
/// ```
pub fn extract(buf: &[u8], offset: &mut usize, width: usize, order: Endian) -> u64 {
    let width = width.min(MAX_WIDTH);
    if width == 0 {
        return 0;
    }

    let bytes = &buf[*offset..*offset + width];
    let value = match order {
        Endian::Little => LittleEndian::read_uint(bytes, width),
        Endian::Big => BigEndian::read_uint(bytes, width),
    };

    *offset += width;
    value
}

/// Write the low `width` bytes of `value` at `*offset` and advance the cursor
///
/// Same clamping rules as [`extract`]. Bits of `value` above `width`
/// bytes are dropped.
///
/// # Panics
///
/// Panics if `buf` holds fewer than `*offset + width` bytes.
pub fn encode(value: u64, buf: &mut [u8], offset: &mut usize, width: usize, order: Endian) {
    let width = width.min(MAX_WIDTH);
    if width == 0 {
        return;
    }

    let value = if width == MAX_WIDTH {
        value
    } else {
        value & ((1u64 << (width * 8)) - 1)
    };

    let bytes = &mut buf[*offset..*offset + width];
    match order {
        Endian::Little => LittleEndian::write_uint(bytes, value, width),
        Endian::Big => BigEndian::write_uint(bytes, value, width),
    }

    *offset += width;
}

/// Read a signed 32-bit integer (two's complement)
pub fn extract_i32(buf: &[u8], offset: &mut usize, order: Endian) -> i32 {
    extract(buf, offset, 4, order) as u32 as i32
}

/// Write a signed 32-bit integer (two's complement)
pub fn encode_i32(value: i32, buf: &mut [u8], offset: &mut usize, order: Endian) {
    encode(value as u32 as u64, buf, offset, 4, order);
}
