//! Errors raised while building shared types

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Image dimensions and pixel data disagree
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Unknown scan type: {0}")]
    UnknownScanType(String),
}
