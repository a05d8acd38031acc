//! Captured fingerprint images and the minutiae detected in them

use std::fmt;

use bytes::Bytes;

use crate::error::{Error, Result};

/// A single minutia as reported by the extraction pipeline
///
/// Coordinates are in image pixels with the origin at the top left.
/// `direction` uses the extractor's units of 11.25 degrees (0..32).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Minutia {
    pub x: i32,
    pub y: i32,
    pub direction: i32,
    pub reliability: f64,
}

impl Minutia {
    pub fn new(x: i32, y: i32, direction: i32, reliability: f64) -> Self {
        Self {
            x,
            y,
            direction,
            reliability,
        }
    }
}

/// 8-bit grayscale image
#[derive(Clone, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    data: Bytes,
    minutiae: Option<Vec<Minutia>>,
}

impl Image {
    /// Create an image from raw pixel data
    ///
    /// # Errors
    ///
    /// Returns an error if `data` does not hold exactly `width * height` bytes.
    pub fn new(width: u32, height: u32, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(Error::InvalidImage(format!(
                "image of {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            data,
            minutiae: None,
        })
    }

    /// Attach minutiae detected by an external pipeline
    pub fn with_minutiae(mut self, minutiae: Vec<Minutia>) -> Self {
        self.minutiae = Some(minutiae);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Minutiae attached to the image, if detection already ran
    pub fn minutiae(&self) -> Option<&[Minutia]> {
        self.minutiae.as_deref()
    }

    /// Pixel value at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get((y * self.width + x) as usize).copied()
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("data_len", &self.data.len())
            .field("minutiae", &self.minutiae.as_ref().map(|m| m.len()))
            .finish()
    }
}
