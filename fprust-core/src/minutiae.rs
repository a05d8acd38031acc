//! Canonical minutiae templates
//!
//! Every template that reaches the matcher goes through [`minutiae_to_xyt`],
//! so two derivations from the same minutiae set produce identical rows.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use fprust_types::{Image, Minutia};

use crate::{
    codec::{self, Endian},
    constants::{MAX_COORDINATE, MAX_MINUTIAE, XYT_ROW_SIZE},
    error::{Error, Result},
};

/// One row of a canonical template
///
/// `theta` is in degrees, folded to (-180, 180].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct XytRow {
    pub x: i32,
    pub y: i32,
    pub theta: i32,
}

impl XytRow {
    pub fn new(x: i32, y: i32, theta: i32) -> Self {
        Self { x, y, theta }
    }

    /// Whether the row fits the canonical ranges
    ///
    /// Coordinates lie within ±65535 and theta within (-180, 180].
    pub fn is_canonical(&self) -> bool {
        self.x.abs() <= MAX_COORDINATE
            && self.y.abs() <= MAX_COORDINATE
            && self.theta > -180
            && self.theta <= 180
    }
}

/// Canonical minutiae template: at most 200 rows sorted by (x, y)
#[derive(Clone, PartialEq, Eq, Default)]
pub struct XytTemplate {
    rows: Vec<XytRow>,
}

impl XytTemplate {
    /// Build a template from rows that are already canonical
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when more than 200 rows are given or a row is
    /// out of range.
    pub fn from_rows(rows: Vec<XytRow>) -> Result<Self> {
        if rows.len() > MAX_MINUTIAE {
            return Err(Error::InvalidInput(format!(
                "template holds {} minutiae, limit is {}",
                rows.len(),
                MAX_MINUTIAE
            )));
        }
        if let Some(row) = rows.iter().find(|row| !row.is_canonical()) {
            return Err(Error::InvalidInput(format!("minutia out of range: {:?}", row)));
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[XytRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Encode as consecutive little-endian `(x, y, theta)` i32 triples
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.rows.len() * XYT_ROW_SIZE);
        for row in &self.rows {
            buf.put_i32_le(row.x);
            buf.put_i32_le(row.y);
            buf.put_i32_le(row.theta);
        }
        buf.freeze()
    }

    /// Decode a template written by [`XytTemplate::to_bytes`]
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the length is not a whole number of rows,
    /// exceeds the minutiae limit or holds a row out of range.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() % XYT_ROW_SIZE != 0 {
            return Err(Error::CorruptData(format!(
                "minutiae item of {} bytes is not a multiple of {}",
                data.len(),
                XYT_ROW_SIZE
            )));
        }

        let count = data.len() / XYT_ROW_SIZE;
        if count > MAX_MINUTIAE {
            return Err(Error::CorruptData(format!(
                "minutiae item holds {} rows, limit is {}",
                count, MAX_MINUTIAE
            )));
        }

        let mut offset = 0;
        let mut rows = Vec::with_capacity(count);
        for index in 0..count {
            let x = codec::extract_i32(data, &mut offset, Endian::Little);
            let y = codec::extract_i32(data, &mut offset, Endian::Little);
            let theta = codec::extract_i32(data, &mut offset, Endian::Little);
            let row = XytRow::new(x, y, theta);
            if !row.is_canonical() {
                return Err(Error::CorruptData(format!(
                    "minutiae row {} out of range: {:?}",
                    index, row
                )));
            }
            rows.push(row);
        }

        Ok(Self { rows })
    }
}

impl fmt::Debug for XytTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XytTemplate")
            .field("rows", &self.rows.len())
            .finish()
    }
}

/// Source of minutiae for a captured image
///
/// Implemented by the image-processing pipeline; a sensor that attaches
/// minutiae to its images never reaches the extractor.
pub trait MinutiaeExtractor: Send + Sync {
    /// Detect minutiae in `image`
    fn detect(&self, image: &Image) -> Result<Vec<Minutia>>;
}

/// Extractor that only accepts images with minutiae already attached
#[derive(Debug, Default, Clone, Copy)]
pub struct AttachedMinutiae;

impl MinutiaeExtractor for AttachedMinutiae {
    fn detect(&self, image: &Image) -> Result<Vec<Minutia>> {
        image
            .minutiae()
            .map(<[Minutia]>::to_vec)
            .ok_or_else(|| Error::InvalidInput("image carries no minutiae".into()))
    }
}

/// Convert extractor output to a canonical template
///
/// Keeps the first 200 minutiae, moves the origin to the bottom left,
/// turns the direction (units of 11.25 degrees) into a NIST angle folded to
/// (-180, 180], clamps coordinates to ±65535 and sorts the rows by (x, y).
///
/// # Examples
///
/// ```
/// use fprust_core::minutiae::{minutiae_to_xyt, XytRow};
/// use fprust_types::Minutia;
///
/// let template = minutiae_to_xyt(&[Minutia::new(10, 20, 8, 0.9)], 100, 100);
/// assert_eq!(template.rows(), &[XytRow::new(10, 80, 180)]);
/// ```
pub fn minutiae_to_xyt(minutiae: &[Minutia], _width: u32, height: u32) -> XytTemplate {
    let mut rows: Vec<XytRow> = minutiae
        .iter()
        .take(MAX_MINUTIAE)
        .map(|m| {
            let degrees = (f64::from(m.direction.rem_euclid(32)) * 11.25).round() as i32;
            let mut theta = (270 - degrees) % 360;
            if theta < 0 {
                theta += 360;
            }
            if theta > 180 {
                theta -= 360;
            }
            let y = i32::try_from(height).unwrap_or(i32::MAX).saturating_sub(m.y);
            XytRow::new(clamp_coordinate(m.x), clamp_coordinate(y), theta)
        })
        .collect();

    rows.sort_by_key(|row| (row.x, row.y));

    XytTemplate { rows }
}

fn clamp_coordinate(value: i32) -> i32 {
    value.clamp(-MAX_COORDINATE, MAX_COORDINATE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_angle_conversion() {
        let cases = [(0, -90), (8, 180), (16, 90), (24, 0), (31, -79)];
        for (direction, expected) in cases {
            let template = minutiae_to_xyt(&[Minutia::new(0, 0, direction, 1.0)], 10, 10);
            assert_eq!(template.rows()[0].theta, expected, "direction {direction}");
        }
    }

    #[test]
    fn test_angle_stays_in_range() {
        for direction in -40..80 {
            let template = minutiae_to_xyt(&[Minutia::new(0, 0, direction, 1.0)], 10, 10);
            let theta = template.rows()[0].theta;
            assert!(theta > -180 && theta <= 180, "theta {theta}");
        }
    }

    #[test]
    fn test_sorted_and_flipped() {
        let minutiae = [
            Minutia::new(30, 5, 0, 0.1),
            Minutia::new(10, 40, 0, 0.5),
            Minutia::new(10, 2, 0, 0.9),
        ];
        let template = minutiae_to_xyt(&minutiae, 64, 50);

        let coords: Vec<_> = template.rows().iter().map(|r| (r.x, r.y)).collect();
        assert_eq!(coords, vec![(10, 10), (10, 48), (30, 45)]);
    }

    #[test]
    fn test_clamped_to_limit() {
        let minutiae: Vec<_> = (0..250).map(|i| Minutia::new(i, i, 0, 1.0)).collect();
        let template = minutiae_to_xyt(&minutiae, 300, 300);
        assert_eq!(template.len(), MAX_MINUTIAE);
        assert_eq!(template.rows().last().map(|r| r.x), Some(199));
    }

    #[test]
    fn test_bytes_round_trip() {
        let template = XytTemplate::from_rows(vec![XytRow::new(1, 2, -3), XytRow::new(4, 5, 180)])
            .unwrap();
        let bytes = template.to_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[8..12], &(-3i32).to_le_bytes());
        assert_eq!(XytTemplate::from_bytes(&bytes).unwrap(), template);
    }

    #[test]
    fn test_from_bytes_rejects_partial_row() {
        let result = XytTemplate::from_bytes(&[0u8; 13]);
        assert!(matches!(result, Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_from_bytes_rejects_oversized() {
        let result = XytTemplate::from_bytes(&vec![0u8; (MAX_MINUTIAE + 1) * XYT_ROW_SIZE]);
        assert!(matches!(result, Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_from_bytes_rejects_out_of_range_rows() {
        let encode = |row: [i32; 3]| row.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>();

        for row in [[i32::MIN, 0, 0], [0, 70_000, 0], [0, 0, -180], [0, 0, 181], [1, 1, i32::MIN]] {
            let result = XytTemplate::from_bytes(&encode(row));
            assert!(matches!(result, Err(Error::CorruptData(_))), "row {row:?}");
        }

        let edge = XytTemplate::from_bytes(&encode([-65535, 65535, 180])).unwrap();
        assert_eq!(edge.rows(), &[XytRow::new(-65535, 65535, 180)]);
    }

    #[test]
    fn test_extreme_minutiae_stay_canonical() {
        let template = minutiae_to_xyt(&[Minutia::new(i32::MIN, i32::MIN, i32::MIN, 1.0)], 10, u32::MAX);
        assert!(template.rows().iter().all(XytRow::is_canonical));
        assert_eq!(XytTemplate::from_bytes(&template.to_bytes()).unwrap(), template);
    }

    #[test]
    fn test_from_rows_rejects_out_of_range_rows() {
        let result = XytTemplate::from_rows(vec![XytRow::new(i32::MIN, 0, 0), XytRow::new(i32::MAX, 0, 0)]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_attached_extractor() {
        let image = Image::new(1, 1, vec![0u8]).unwrap();
        assert!(AttachedMinutiae.detect(&image).is_err());

        let image = image.with_minutiae(vec![Minutia::new(0, 0, 1, 0.5)]);
        assert_eq!(AttachedMinutiae.detect(&image).unwrap().len(), 1);
    }
}
