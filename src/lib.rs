//! Duplicate cover detection for a thumbnail library.
//!
//! [`Fingerprinter`] turns thumbnail bytes into a checksum plus dHash/aHash
//! values, [`Database`] keeps them per profile, and [`DuplicateFinder`]
//! clusters stored fingerprints into groups of likely duplicates.

pub mod core;
pub mod database;
pub mod services;

pub use crate::core::cancel::CancellationToken;
pub use crate::core::duplicate::{DuplicateFinder, ScanError};
pub use crate::core::models::{
    ComputedFingerprint, Crop, DuplicatePair, DuplicateScanConfig, DuplicateScanResult,
    FingerprintRecord, HashKind, NotDuplicatePair, PairReason, PerceptualHash, ScanFingerprint,
    ScanStats,
};
pub use crate::core::perceptual::{FingerprintError, Fingerprinter};
pub use crate::database::{Database, DatabaseError};
pub use crate::services::{IndexError, IndexOptions, IndexReport, Indexer};
