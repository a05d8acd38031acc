//! Binary storage format for prints
//!
//! # Layout
//!
//! ```text
//! ┌───────┬───────────┬───────────┬──────┬──────────────────────────────┐
//! │  Tag  │ Driver ID │  Devtype  │ Kind │ Items (FP2) / Payload (FP1)  │
//! │ 3 B   │ u16 LE    │ u32 LE    │ u8   │ { u32 LE length, bytes }*    │
//! └───────┴───────────┴───────────┴──────┴──────────────────────────────┘
//! ```
//!
//! Only FP2 is written. FP1 buffers carry a single opaque payload after the
//! header and are still read.
//!
//! Items are written starting with the most recently added one, and items
//! read back are added in wire order. A round trip therefore reverses the
//! insertion order of the payload list.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::{
    codec::{self, Endian},
    constants::{HEADER_SIZE, ITEM_LENGTH_SIZE, TAG_FP1, TAG_FP2},
    error::{Error, Result},
    minutiae::XytTemplate,
    print::{Print, PrintData, PrintKind},
};

/// Serialize a print into an FP2 buffer
///
/// # Errors
///
/// Returns `EmptyPrint` if the print has no items or templates.
///
/// # Examples
///
/// ```
/// use fprust_core::{format, Print, PrintKind};
///
/// let mut print = Print::with_kind(0x0101, 0, PrintKind::Raw);
/// print.add_item(&b"abc"[..]).unwrap();
///
/// let bytes = format::serialize(&print).unwrap();
/// assert_eq!(&bytes[..3], b"FP2");
/// assert_eq!(bytes.len(), 10 + 4 + 3);
/// ```
pub fn serialize(print: &Print) -> Result<Bytes> {
    let payloads: Vec<Bytes> = match print.data() {
        PrintData::Undefined => Vec::new(),
        PrintData::Raw(items) => items.iter().rev().map(|item| item.data().clone()).collect(),
        PrintData::Minutiae(templates) => templates.iter().rev().map(XytTemplate::to_bytes).collect(),
    };

    if payloads.is_empty() {
        return Err(Error::EmptyPrint);
    }

    let total: usize = payloads.iter().map(|p| ITEM_LENGTH_SIZE + p.len()).sum();
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + total);

    buf.put_slice(TAG_FP2);
    buf.put_u16_le(print.driver_id());
    buf.put_u32_le(print.devtype());
    buf.put_u8(print.kind().into());

    for payload in &payloads {
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(payload);
    }

    debug!(
        items = payloads.len(),
        len = buf.len(),
        "Serialized {:?} print",
        print.kind()
    );
    trace!("FP2 buffer: {}", hex::encode(&buf));

    Ok(buf.freeze())
}

/// Parse an FP1 or FP2 buffer
///
/// # Errors
///
/// - `InvalidFormat` for an unknown tag, an unknown kind byte or a buffer
///   shorter than the 10-byte header
/// - `CorruptData` if the item list does not fit the buffer or holds no
///   items
///
/// No partially parsed print is ever returned.
pub fn deserialize(buf: &[u8]) -> Result<Print> {
    trace!("Parsing print buffer: {}", hex::encode(buf));

    if buf.len() < HEADER_SIZE {
        return Err(Error::InvalidFormat(format!(
            "buffer of {} bytes is shorter than the {} byte header",
            buf.len(),
            HEADER_SIZE
        )));
    }

    let tag = &buf[..3];
    let is_legacy = if tag == TAG_FP1 {
        true
    } else if tag == TAG_FP2 {
        false
    } else {
        return Err(Error::InvalidFormat(format!(
            "unknown format tag {}",
            hex::encode(tag)
        )));
    };

    let mut offset = 3;
    let driver_id = codec::extract(buf, &mut offset, 2, Endian::Little) as u16;
    let devtype = codec::extract(buf, &mut offset, 4, Endian::Little) as u32;
    let kind = PrintKind::try_from(codec::extract(buf, &mut offset, 1, Endian::Little) as u8)?;

    let payloads = if is_legacy {
        vec![&buf[HEADER_SIZE..]]
    } else {
        split_items(&buf[HEADER_SIZE..])?
    };

    let mut print = Print::with_kind(driver_id, devtype, kind);
    for payload in payloads {
        match kind {
            PrintKind::Raw => print.add_item(Bytes::copy_from_slice(payload))?,
            PrintKind::Minutiae => print.add_template(XytTemplate::from_bytes(payload)?)?,
            PrintKind::Undefined => {
                return Err(Error::CorruptData("payload on a print of undefined kind".into()));
            }
        }
    }

    debug!(
        legacy = is_legacy,
        driver_id,
        devtype,
        "Parsed {:?} print with {} entries",
        kind,
        print.data().len()
    );

    Ok(print)
}

/// Split an FP2 item list into borrowed payloads
fn split_items(buf: &[u8]) -> Result<Vec<&[u8]>> {
    let mut items = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let remaining = buf.len() - offset;
        if remaining < ITEM_LENGTH_SIZE {
            warn!("Corrupted print data: {} trailing bytes", remaining);
            return Err(Error::CorruptData(format!(
                "{} trailing bytes cannot hold an item length",
                remaining
            )));
        }

        let length = codec::extract(buf, &mut offset, ITEM_LENGTH_SIZE, Endian::Little) as usize;
        let available = buf.len() - offset;
        if length > available {
            warn!("Corrupted print data: item of {} bytes, {} left", length, available);
            return Err(Error::CorruptData(format!(
                "item declares {} bytes but only {} remain",
                length, available
            )));
        }

        items.push(&buf[offset..offset + length]);
        offset += length;
    }

    if items.is_empty() {
        return Err(Error::CorruptData("FP2 buffer holds no items".into()));
    }

    Ok(items)
}

impl Print {
    /// Serialize into an FP2 buffer, see [`serialize`]
    pub fn to_bytes(&self) -> Result<Bytes> {
        serialize(self)
    }

    /// Parse an FP1 or FP2 buffer, see [`deserialize`]
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        deserialize(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minutiae::XytRow;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn raw_print(items: &[&[u8]]) -> Print {
        let mut print = Print::with_kind(0x0101, 0x0A0B_0C0D, PrintKind::Raw);
        for item in items {
            print.add_item(Bytes::copy_from_slice(item)).unwrap();
        }
        print
    }

    fn item_bytes(print: &Print) -> Vec<Vec<u8>> {
        print.items().iter().map(|i| i.as_ref().to_vec()).collect()
    }

    #[test]
    fn test_serialize_layout() {
        let print = raw_print(&[b"first", b"second"]);
        let bytes = serialize(&print).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(b"FP2");
        expected.extend_from_slice(&0x0101u16.to_le_bytes());
        expected.extend_from_slice(&0x0A0B_0C0Du32.to_le_bytes());
        expected.push(1);
        expected.extend_from_slice(&6u32.to_le_bytes());
        expected.extend_from_slice(b"second");
        expected.extend_from_slice(&5u32.to_le_bytes());
        expected.extend_from_slice(b"first");

        assert_eq!(bytes.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_round_trip_reverses_order() {
        let print = raw_print(&[b"a", b"bb", b"ccc"]);
        let parsed = deserialize(&serialize(&print).unwrap()).unwrap();

        assert_eq!(parsed.driver_id(), 0x0101);
        assert_eq!(parsed.devtype(), 0x0A0B_0C0D);
        assert_eq!(parsed.kind(), PrintKind::Raw);
        assert_eq!(
            item_bytes(&parsed),
            vec![b"ccc".to_vec(), b"bb".to_vec(), b"a".to_vec()]
        );
        assert_eq!(parsed.first_item().unwrap().as_ref(), b"a");
    }

    #[test]
    fn test_serialize_empty() {
        let print = Print::with_kind(1, 1, PrintKind::Raw);
        assert!(matches!(serialize(&print), Err(Error::EmptyPrint)));
        assert!(matches!(serialize(&Print::new(1, 1)), Err(Error::EmptyPrint)));
    }

    #[test]
    fn test_fp1_single_payload() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"FP1");
        buf.extend_from_slice(&7u16.to_le_bytes());
        buf.extend_from_slice(&9u32.to_le_bytes());
        buf.push(1);
        buf.extend_from_slice(b"legacy-blob");

        let print = deserialize(&buf).unwrap();
        assert_eq!(print.driver_id(), 7);
        assert_eq!(print.devtype(), 9);
        assert_eq!(item_bytes(&print), vec![b"legacy-blob".to_vec()]);
    }

    #[test]
    fn test_unknown_tag() {
        let mut buf = serialize(&raw_print(&[b"x"])).unwrap().to_vec();
        buf[2] = b'3';
        assert!(matches!(deserialize(&buf), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_short_buffer() {
        assert!(matches!(deserialize(b"FP2\x01"), Err(Error::InvalidFormat(_))));
        assert!(matches!(deserialize(b""), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_fp2_without_items() {
        let buf = &serialize(&raw_print(&[b"x"])).unwrap()[..HEADER_SIZE];
        assert!(matches!(deserialize(buf), Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_lying_item_length() {
        let mut buf = serialize(&raw_print(&[b"abcd"])).unwrap().to_vec();
        buf[HEADER_SIZE] = 5;
        assert!(matches!(deserialize(&buf), Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_truncated_length_prefix() {
        let mut buf = serialize(&raw_print(&[b"abcd"])).unwrap().to_vec();
        buf.extend_from_slice(&[1, 0]);
        assert!(matches!(deserialize(&buf), Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_minutiae_round_trip() {
        let t1 = XytTemplate::from_rows(vec![XytRow::new(1, 2, 3)]).unwrap();
        let t2 = XytTemplate::from_rows(vec![XytRow::new(4, 5, -6), XytRow::new(7, 8, 9)]).unwrap();

        let mut print = Print::with_kind(0x0100, 0, PrintKind::Minutiae);
        print.add_template(t1.clone()).unwrap();
        print.add_template(t2.clone()).unwrap();

        let parsed = Print::from_bytes(&print.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.kind(), PrintKind::Minutiae);
        assert_eq!(parsed.templates(), &[t2, t1]);
    }

    #[test]
    fn test_minutiae_item_not_row_aligned() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"FP2");
        buf.extend_from_slice(&[0, 1, 0, 0, 0, 0, 2]);
        buf.extend_from_slice(&5u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 5]);
        assert!(matches!(deserialize(&buf), Err(Error::CorruptData(_))));
    }

    proptest! {
        #[test]
        fn prop_round_trip_preserves_reversed_items(
            driver_id: u16,
            devtype: u32,
            items in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 1..8),
        ) {
            let mut print = Print::with_kind(driver_id, devtype, PrintKind::Raw);
            for item in &items {
                print.add_item(item.clone()).unwrap();
            }

            let parsed = deserialize(&serialize(&print).unwrap()).unwrap();
            prop_assert_eq!(parsed.driver_id(), driver_id);
            prop_assert_eq!(parsed.devtype(), devtype);

            let mut expected = items.clone();
            expected.reverse();
            prop_assert_eq!(item_bytes(&parsed), expected);
        }

        #[test]
        fn prop_truncation_never_yields_partial_print(
            items in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..16), 1..5),
            cut in 1usize..64,
        ) {
            let mut print = Print::with_kind(1, 1, PrintKind::Raw);
            for item in &items {
                print.add_item(item.clone()).unwrap();
            }
            let buf = serialize(&print).unwrap();
            prop_assume!(cut < buf.len() - HEADER_SIZE);

            // Cutting exactly on an item boundary leaves a shorter valid list
            let mut boundary = HEADER_SIZE;
            let mut boundaries = Vec::new();
            for item in items.iter().rev() {
                boundary += ITEM_LENGTH_SIZE + item.len();
                boundaries.push(boundary);
            }
            prop_assume!(!boundaries.contains(&(buf.len() - cut)));

            let truncated = &buf[..buf.len() - cut];
            prop_assert!(deserialize(truncated).is_err());
        }
    }
}
