//! # fprust-core
//!
//! Print data model for fingerprint sensors.
//!
//! This crate provides:
//! - A fixed-width integer codec over byte buffers
//! - The in-memory print record and its FP1/FP2 storage format
//! - Canonical minutiae templates
//! - Minutiae matching with a pluggable scorer

pub mod codec;
pub mod constants;
pub mod error;
pub mod format;
pub mod matching;
pub mod minutiae;
pub mod print;

pub use error::{Error, Result};
pub use matching::{MatchResult, PairTableScorer, Scorer, match_prints};
pub use minutiae::{MinutiaeExtractor, XytRow, XytTemplate, minutiae_to_xyt};
pub use print::{Print, PrintData, PrintDataItem, PrintKind, compatible};
