//! In-memory print record
//!
//! A [`Print`] is what a device produces on enroll and consumes on verify,
//! identify and delete. Its payload is a tagged union: raw driver items or
//! canonical minutiae templates, never both.

use std::fmt;

use bytes::Bytes;
use chrono::NaiveDate;
use fprust_types::Image;
use tracing::debug;

use crate::{
    error::{Error, Result},
    minutiae::{MinutiaeExtractor, XytTemplate, minutiae_to_xyt},
};

/// Payload kind of a print
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PrintKind {
    #[default]
    Undefined = 0,
    Raw = 1,
    Minutiae = 2,
}

impl TryFrom<u8> for PrintKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Undefined),
            1 => Ok(Self::Raw),
            2 => Ok(Self::Minutiae),
            other => Err(Error::InvalidFormat(format!("unknown print kind: {}", other))),
        }
    }
}

impl From<PrintKind> for u8 {
    fn from(kind: PrintKind) -> u8 {
        kind as u8
    }
}

/// Opaque driver-defined blob inside a raw print
#[derive(Clone, PartialEq, Eq)]
pub struct PrintDataItem(Bytes);

impl PrintDataItem {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn data(&self) -> &Bytes {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for PrintDataItem {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PrintDataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrintDataItem({})", hex::encode(&self.0))
    }
}

/// Print payload, one variant per [`PrintKind`]
///
/// Both lists are kept in insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PrintData {
    #[default]
    Undefined,
    Raw(Vec<PrintDataItem>),
    Minutiae(Vec<XytTemplate>),
}

impl PrintData {
    pub fn kind(&self) -> PrintKind {
        match self {
            Self::Undefined => PrintKind::Undefined,
            Self::Raw(_) => PrintKind::Raw,
            Self::Minutiae(_) => PrintKind::Minutiae,
        }
    }

    /// Number of items or templates
    pub fn len(&self) -> usize {
        match self {
            Self::Undefined => 0,
            Self::Raw(items) => items.len(),
            Self::Minutiae(templates) => templates.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An enrolled or scanned finger
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Print {
    driver_id: u16,
    devtype: u32,
    data: PrintData,
    device_stored: bool,
    image: Option<Image>,
    username: Option<String>,
    description: Option<String>,
    enroll_date: Option<NaiveDate>,
}

impl Print {
    /// Create an empty print of undefined kind for a driver and devtype
    ///
    /// # Examples
    ///
    /// ```
    /// use fprust_core::{Print, PrintKind};
    ///
    /// let mut print = Print::new(0x0101, 0);
    /// print.set_kind(PrintKind::Raw).unwrap();
    /// print.add_item(b"handle".to_vec()).unwrap();
    /// assert_eq!(print.first_item().unwrap().as_ref(), b"handle");
    /// ```
    pub fn new(driver_id: u16, devtype: u32) -> Self {
        Self {
            driver_id,
            devtype,
            ..Self::default()
        }
    }

    /// Create an empty print with its kind already assigned
    pub fn with_kind(driver_id: u16, devtype: u32, kind: PrintKind) -> Self {
        let mut print = Self::new(driver_id, devtype);
        print.data = empty_payload(kind);
        print
    }

    pub fn driver_id(&self) -> u16 {
        self.driver_id
    }

    pub fn devtype(&self) -> u32 {
        self.devtype
    }

    pub fn kind(&self) -> PrintKind {
        self.data.kind()
    }

    pub fn data(&self) -> &PrintData {
        &self.data
    }

    /// Assign the payload kind
    ///
    /// # Errors
    ///
    /// Returns `KindAlreadySet` once a kind other than `Undefined` is set.
    pub fn set_kind(&mut self, kind: PrintKind) -> Result<()> {
        let current = self.kind();
        if current != PrintKind::Undefined {
            return Err(Error::KindAlreadySet { current });
        }
        self.data = empty_payload(kind);
        Ok(())
    }

    /// Add an opaque item to a raw print
    ///
    /// # Errors
    ///
    /// Returns `KindMismatch` unless the print is of kind `Raw`.
    pub fn add_item(&mut self, data: impl Into<Bytes>) -> Result<()> {
        match &mut self.data {
            PrintData::Raw(items) => {
                items.push(PrintDataItem::new(data));
                Ok(())
            }
            other => Err(Error::KindMismatch {
                expected: PrintKind::Raw,
                actual: other.kind(),
            }),
        }
    }

    /// Raw items in insertion order (empty for other kinds)
    pub fn items(&self) -> &[PrintDataItem] {
        match &self.data {
            PrintData::Raw(items) => items,
            _ => &[],
        }
    }

    /// The most recently added raw item
    pub fn first_item(&self) -> Option<&PrintDataItem> {
        self.items().last()
    }

    /// Minutiae templates in insertion order (empty for other kinds)
    pub fn templates(&self) -> &[XytTemplate] {
        match &self.data {
            PrintData::Minutiae(templates) => templates,
            _ => &[],
        }
    }

    /// Append a canonical template to a minutiae print
    ///
    /// # Errors
    ///
    /// Returns `KindMismatch` unless the print is of kind `Minutiae`.
    pub fn add_template(&mut self, template: XytTemplate) -> Result<()> {
        match &mut self.data {
            PrintData::Minutiae(templates) => {
                templates.push(template);
                Ok(())
            }
            other => Err(Error::KindMismatch {
                expected: PrintKind::Minutiae,
                actual: other.kind(),
            }),
        }
    }

    /// Derive a template from a captured image and append it
    ///
    /// Minutiae attached to the image are used as-is; otherwise `extractor`
    /// detects them. The image is kept on the print.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the print is not of kind `Minutiae` or no
    /// minutiae were found, and any error raised by the extractor.
    pub fn add_from_image(&mut self, image: &Image, extractor: &dyn MinutiaeExtractor) -> Result<()> {
        if self.kind() != PrintKind::Minutiae {
            return Err(Error::InvalidInput(format!(
                "cannot add image data to a {:?} print",
                self.kind()
            )));
        }

        let detected;
        let minutiae = match image.minutiae() {
            Some(minutiae) => minutiae,
            None => {
                detected = extractor.detect(image)?;
                &detected[..]
            }
        };

        if minutiae.is_empty() {
            return Err(Error::InvalidInput("no minutiae found in image".into()));
        }

        debug!(count = minutiae.len(), "Adding template from image");
        let template = minutiae_to_xyt(minutiae, image.width(), image.height());
        self.add_template(template)?;
        self.image = Some(image.clone());
        Ok(())
    }

    /// Append the single template of another minutiae print
    ///
    /// Used to accumulate enroll stages into one template print.
    ///
    /// # Errors
    ///
    /// Returns `KindMismatch` if either print is not of kind `Minutiae` and
    /// `UnsupportedInput` if `other` does not hold exactly one template.
    pub fn add_print(&mut self, other: &Print) -> Result<()> {
        if other.kind() != PrintKind::Minutiae {
            return Err(Error::KindMismatch {
                expected: PrintKind::Minutiae,
                actual: other.kind(),
            });
        }

        match other.templates() {
            [template] => self.add_template(template.clone()),
            templates => Err(Error::UnsupportedInput(format!(
                "expected a single template, got {}",
                templates.len()
            ))),
        }
    }

    /// Check whether `other` was produced for the same driver, devtype and kind
    pub fn is_compatible_with(&self, other: &Print) -> bool {
        compatible(
            self.driver_id,
            self.devtype,
            self.kind(),
            other.driver_id,
            other.devtype,
            other.kind(),
        )
    }

    pub fn device_stored(&self) -> bool {
        self.device_stored
    }

    pub fn set_device_stored(&mut self, device_stored: bool) {
        self.device_stored = device_stored;
    }

    pub fn image(&self) -> Option<&Image> {
        self.image.as_ref()
    }

    pub fn set_image(&mut self, image: Image) {
        self.image = Some(image);
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = Some(username.into());
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    pub fn enroll_date(&self) -> Option<NaiveDate> {
        self.enroll_date
    }

    pub fn set_enroll_date(&mut self, date: NaiveDate) {
        self.enroll_date = Some(date);
    }
}

impl fmt::Display for Print {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Print[driver=0x{:04X}, devtype=0x{:08X}, kind={:?}, entries={}",
            self.driver_id,
            self.devtype,
            self.kind(),
            self.data.len()
        )?;
        if let Some(description) = &self.description {
            write!(f, ", description={}", description)?;
        }
        write!(f, "]")
    }
}

fn empty_payload(kind: PrintKind) -> PrintData {
    match kind {
        PrintKind::Undefined => PrintData::Undefined,
        PrintKind::Raw => PrintData::Raw(Vec::new()),
        PrintKind::Minutiae => PrintData::Minutiae(Vec::new()),
    }
}

/// Structural compatibility of two (driver, devtype, kind) triples
///
/// No payload inspection takes place.
pub fn compatible(
    driver_id1: u16,
    devtype1: u32,
    kind1: PrintKind,
    driver_id2: u16,
    devtype2: u32,
    kind2: PrintKind,
) -> bool {
    if driver_id1 != driver_id2 {
        debug!("Driver ID mismatch: {:#06x} vs {:#06x}", driver_id1, driver_id2);
        return false;
    }

    if devtype1 != devtype2 {
        debug!("Devtype mismatch: {:#x} vs {:#x}", devtype1, devtype2);
        return false;
    }

    if kind1 != kind2 {
        debug!("Kind mismatch: {:?} vs {:?}", kind1, kind2);
        return false;
    }

    true
}
