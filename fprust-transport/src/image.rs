//! Image framing protocol
//!
//! # Frame Structure
//!
//! ```text
//! ┌─────────────┬─────────────┬──────────────────────────┐
//! │    Width    │   Height    │          Pixels          │
//! │ i32 native  │ i32 native  │  width * height bytes    │
//! └─────────────┴─────────────┴──────────────────────────┘
//! ```
//!
//! Pixels are 8-bit grayscale, row-major.

use bytes::{Buf, Bytes, BytesMut};
use fprust_core::codec::{self, Endian};
use fprust_types::Image;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Size of the width/height header
pub const HEADER_SIZE: usize = 8;

/// Largest pixel payload accepted in one frame (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Images completed by one [`ImageReader::push`]
///
/// A protocol error stops reading; images completed before it are still
/// returned.
#[derive(Debug, Default)]
pub struct Frames {
    pub images: Vec<Image>,
    pub error: Option<Error>,
}

/// Reassembles images from a byte stream
#[derive(Debug, Default)]
pub struct ImageReader {
    buf: BytesMut,
    header: Option<(u32, u32)>,
}

impl ImageReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes and return every image completed by them
    ///
    /// A header with non-positive dimensions or a frame larger than
    /// [`MAX_FRAME_SIZE`] is reported as `Protocol` error in
    /// [`Frames::error`]. The reader is then reset and the rest of the
    /// chunk is discarded.
    pub fn push(&mut self, data: &[u8]) -> Frames {
        self.buf.extend_from_slice(data);
        let mut frames = Frames::default();

        loop {
            match self.next_image() {
                Ok(Some(image)) => frames.images.push(image),
                Ok(None) => break,
                Err(e) => {
                    frames.error = Some(e);
                    break;
                }
            }
        }

        frames
    }

    fn next_image(&mut self) -> Result<Option<Image>> {
        let (width, height) = match self.header {
            Some(header) => header,
            None => {
                if self.buf.len() < HEADER_SIZE {
                    return Ok(None);
                }
                let header = self.read_header()?;
                self.header = Some(header);
                header
            }
        };

        let size = width as usize * height as usize;
        if self.buf.len() < size {
            trace!(have = self.buf.len(), need = size, "Waiting for pixel data");
            return Ok(None);
        }

        let pixels = self.buf.split_to(size).freeze();
        self.header = None;

        let image = Image::new(width, height, pixels).map_err(|e| Error::Protocol(e.to_string()))?;
        debug!("Received {}x{} image", width, height);
        Ok(Some(image))
    }

    fn read_header(&mut self) -> Result<(u32, u32)> {
        let mut offset = 0;
        let width = codec::extract_i32(&self.buf, &mut offset, Endian::NATIVE);
        let height = codec::extract_i32(&self.buf, &mut offset, Endian::NATIVE);

        if width <= 0 || height <= 0 {
            warn!("Rejecting image header {}x{}", width, height);
            self.reset();
            return Err(Error::Protocol(format!(
                "invalid image dimensions {}x{}",
                width, height
            )));
        }

        let size = width as u64 * height as u64;
        if size > MAX_FRAME_SIZE as u64 {
            warn!("Rejecting {} byte image frame", size);
            self.reset();
            return Err(Error::Protocol(format!(
                "image of {}x{} exceeds {} bytes",
                width, height, MAX_FRAME_SIZE
            )));
        }

        self.buf.advance(HEADER_SIZE);
        Ok((width as u32, height as u32))
    }

    /// Discard any partial frame
    pub fn reset(&mut self) {
        self.buf.clear();
        self.header = None;
    }

    /// True while a frame is partially received
    pub fn in_progress(&self) -> bool {
        self.header.is_some() || !self.buf.is_empty()
    }
}

/// Build one frame for sending to a device
pub fn encode_frame(width: i32, height: i32, pixels: &[u8]) -> Bytes {
    let mut buf = vec![0u8; HEADER_SIZE + pixels.len()];
    let mut offset = 0;
    codec::encode_i32(width, &mut buf, &mut offset, Endian::NATIVE);
    codec::encode_i32(height, &mut buf, &mut offset, Endian::NATIVE);
    buf[offset..].copy_from_slice(pixels);
    Bytes::from(buf)
}
