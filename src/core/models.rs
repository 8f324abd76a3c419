use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Perceptual hash family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    DHash,
    AHash,
}

impl HashKind {
    pub const ALL: [HashKind; 2] = [HashKind::DHash, HashKind::AHash];

    pub fn as_str(&self) -> &'static str {
        match self {
            HashKind::DHash => "dhash",
            HashKind::AHash => "ahash",
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dhash" => Ok(HashKind::DHash),
            "ahash" => Ok(HashKind::AHash),
            other => Err(format!("unknown hash kind: {}", other)),
        }
    }
}

/// Region of the thumbnail a hash was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Crop {
    Full,
    Center90,
    Center75,
}

impl Crop {
    pub const ALL: [Crop; 3] = [Crop::Full, Crop::Center90, Crop::Center75];

    /// Percentage of width and height kept by this crop.
    pub fn percent(&self) -> u32 {
        match self {
            Crop::Full => 100,
            Crop::Center90 => 90,
            Crop::Center75 => 75,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Crop::Full => "full",
            Crop::Center90 => "center90",
            Crop::Center75 => "center75",
        }
    }
}

impl fmt::Display for Crop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Crop {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Crop::Full),
            "center90" => Ok(Crop::Center90),
            "center75" => Ok(Crop::Center75),
            other => Err(format!("unknown crop: {}", other)),
        }
    }
}

/// One 64-bit perceptual hash of one crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerceptualHash {
    pub kind: HashKind,
    pub crop: Crop,
    pub value: u64,
}

/// Everything the hasher derives from one thumbnail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedFingerprint {
    pub aspect_ratio: f64,
    pub checksum: String,
    pub hashes: Vec<PerceptualHash>,
}

impl ComputedFingerprint {
    pub fn hash(&self, kind: HashKind, crop: Crop) -> Option<u64> {
        self.hashes
            .iter()
            .find(|h| h.kind == kind && h.crop == crop)
            .map(|h| h.value)
    }

    /// Flatten into the view the scan engine consumes.
    pub fn to_scan_fingerprint(&self, arcid: impl Into<String>) -> Option<ScanFingerprint> {
        Some(ScanFingerprint {
            arcid: arcid.into(),
            checksum: self.checksum.clone(),
            dhash: self.hash(HashKind::DHash, Crop::Center90)?,
            ahash: self.hash(HashKind::AHash, Crop::Center90)?,
        })
    }
}

/// Persisted unit, one per (profile, arcid, kind, crop).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub profile_id: String,
    pub arcid: String,
    pub kind: HashKind,
    pub crop: Crop,
    pub hash: u64,
    pub aspect_ratio: f64,
    pub thumbnail_checksum: String,
    pub updated_at: DateTime<Utc>,
}

/// Scan-ready view of one item; only the center-90 crop hashes are carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFingerprint {
    pub arcid: String,
    pub checksum: String,
    pub dhash: u64,
    pub ahash: u64,
}

/// A user decision that two items are not duplicates of each other.
///
/// Fields are private so the canonical orientation (`arcid_a <= arcid_b`)
/// cannot be bypassed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotDuplicatePair {
    arcid_a: String,
    arcid_b: String,
    created_at: DateTime<Utc>,
}

impl NotDuplicatePair {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self::with_timestamp(first, second, Utc::now())
    }

    pub fn with_timestamp(
        first: impl Into<String>,
        second: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let (arcid_a, arcid_b) = canonical_pair(first.into(), second.into());
        Self {
            arcid_a,
            arcid_b,
            created_at,
        }
    }

    pub fn arcid_a(&self) -> &str {
        &self.arcid_a
    }

    pub fn arcid_b(&self) -> &str {
        &self.arcid_b
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_self_pair(&self) -> bool {
        self.arcid_a == self.arcid_b
    }
}

/// Order two identifiers so the lexicographically smaller one comes first.
pub fn canonical_pair(a: String, b: String) -> (String, String) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateScanConfig {
    pub exact_checksum: bool,
    pub approximate: bool,
    pub dhash_threshold: u32,
    pub ahash_threshold: u32,
    /// LSH buckets larger than this are skipped without comparisons.
    pub bucket_max_size: usize,
}

impl Default for DuplicateScanConfig {
    fn default() -> Self {
        Self {
            exact_checksum: true,
            approximate: true,
            dhash_threshold: 8,
            ahash_threshold: 8,
            bucket_max_size: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairReason {
    ExactCover,
    SimilarCover,
}

impl fmt::Display for PairReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairReason::ExactCover => f.write_str("exact cover"),
            PairReason::SimilarCover => f.write_str("similar cover"),
        }
    }
}

/// Distance substituted for a missing Hamming distance when scoring.
const MISSING_DISTANCE: u32 = 99;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicatePair {
    arcid_a: String,
    arcid_b: String,
    reason: PairReason,
    dhash_distance: Option<u32>,
    ahash_distance: Option<u32>,
}

impl DuplicatePair {
    pub fn exact(first: impl Into<String>, second: impl Into<String>) -> Self {
        let (arcid_a, arcid_b) = canonical_pair(first.into(), second.into());
        Self {
            arcid_a,
            arcid_b,
            reason: PairReason::ExactCover,
            dhash_distance: None,
            ahash_distance: None,
        }
    }

    pub fn similar(
        first: impl Into<String>,
        second: impl Into<String>,
        dhash_distance: u32,
        ahash_distance: u32,
    ) -> Self {
        let (arcid_a, arcid_b) = canonical_pair(first.into(), second.into());
        Self {
            arcid_a,
            arcid_b,
            reason: PairReason::SimilarCover,
            dhash_distance: Some(dhash_distance),
            ahash_distance: Some(ahash_distance),
        }
    }

    pub fn arcid_a(&self) -> &str {
        &self.arcid_a
    }

    pub fn arcid_b(&self) -> &str {
        &self.arcid_b
    }

    pub fn reason(&self) -> PairReason {
        self.reason
    }

    pub fn dhash_distance(&self) -> Option<u32> {
        self.dhash_distance
    }

    pub fn ahash_distance(&self) -> Option<u32> {
        self.ahash_distance
    }

    /// Lower is more alike. Exact matches always score 0.
    pub fn score(&self) -> u32 {
        match self.reason {
            PairReason::ExactCover => 0,
            PairReason::SimilarCover => {
                self.dhash_distance.unwrap_or(MISSING_DISTANCE)
                    + self.ahash_distance.unwrap_or(MISSING_DISTANCE)
            }
        }
    }

    pub fn involves(&self, arcid: &str) -> bool {
        self.arcid_a == arcid || self.arcid_b == arcid
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    pub items_scanned: usize,
    pub exact_groups: usize,
    pub approximate_candidates: usize,
    pub approximate_edges: usize,
    pub skipped_buckets: usize,
    pub excluded_pairs: usize,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateScanResult {
    pub groups: Vec<Vec<String>>,
    pub pairs: Vec<DuplicatePair>,
    pub stats: ScanStats,
}

impl DuplicateScanResult {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.pairs.is_empty()
    }

    /// Copy of the result with the given items removed, e.g. after the caller
    /// deleted some of them. Groups that drop below two members disappear.
    pub fn without_items<F>(&self, removed: F) -> DuplicateScanResult
    where
        F: Fn(&str) -> bool,
    {
        let groups = self
            .groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .filter(|id| !removed(id))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .filter(|group| group.len() >= 2)
            .collect();

        let pairs = self
            .pairs
            .iter()
            .filter(|pair| !removed(&pair.arcid_a) && !removed(&pair.arcid_b))
            .cloned()
            .collect();

        DuplicateScanResult {
            groups,
            pairs,
            stats: self.stats.clone(),
        }
    }
}
