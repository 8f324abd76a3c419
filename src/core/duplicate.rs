//! Duplicate scan over precomputed fingerprints.
//!
//! Two phases feed one union-find:
//! - exact: items with identical thumbnail checksums, linked in a star
//!   around the first item seen with that checksum
//! - approximate: items whose center-90 dHash agrees on at least one 16-bit
//!   band are compared, and linked when both dHash and aHash distances are
//!   within the configured thresholds
//!
//! Connected components become the reported groups.

use crate::core::cancel::CancellationToken;
use crate::core::hash::{self, BAND_COUNT};
use crate::core::models::{
    DuplicatePair, DuplicateScanConfig, DuplicateScanResult, NotDuplicatePair, ScanFingerprint,
    ScanStats,
};
use crate::core::union_find::UnionFind;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Scan cancelled")]
    Cancelled,

    #[error("Scan worker failed: {0}")]
    Worker(String),
}

/// Unordered pair of item indices packed as `min << 32 | max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PairKey(u64);

impl PairKey {
    fn new(a: usize, b: usize) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        PairKey(((lo as u64) << 32) | hi as u64)
    }
}

/// LSH bucket key: (band index, band value).
type BucketKey = (u8, u16);

#[derive(Debug, Clone, Default)]
pub struct DuplicateFinder {
    config: DuplicateScanConfig,
}

impl DuplicateFinder {
    pub fn new(config: DuplicateScanConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DuplicateScanConfig {
        &self.config
    }

    /// Run one scan. `fingerprints` must hold at most one row per arcid.
    ///
    /// Exclusions naming unknown items or the same item twice are ignored.
    /// The cancellation token is polled once per LSH bucket; a cancelled
    /// scan yields no result.
    pub fn scan(
        &self,
        fingerprints: &[ScanFingerprint],
        not_duplicates: &[NotDuplicatePair],
        cancel: &CancellationToken,
    ) -> Result<DuplicateScanResult, ScanError> {
        if fingerprints.is_empty() {
            return Ok(DuplicateScanResult::default());
        }

        let start = Instant::now();
        let mut state = ScanState::new(fingerprints, not_duplicates);

        if self.config.exact_checksum {
            let phase_start = Instant::now();
            state.link_exact();
            debug!(
                "Exact phase took {:.2}s, {} groups",
                phase_start.elapsed().as_secs_f64(),
                state.stats.exact_groups
            );
        }

        if self.config.approximate {
            let phase_start = Instant::now();
            state.link_similar(&self.config, cancel)?;
            debug!(
                "Approximate phase took {:.2}s, {} candidates, {} edges, {} buckets skipped",
                phase_start.elapsed().as_secs_f64(),
                state.stats.approximate_candidates,
                state.stats.approximate_edges,
                state.stats.skipped_buckets
            );
        }

        let mut result = state.finish();
        result.stats.duration_seconds = start.elapsed().as_secs_f64();
        info!(
            "Scanned {} items: {} groups, {} pairs",
            result.stats.items_scanned,
            result.groups.len(),
            result.pairs.len()
        );
        Ok(result)
    }

    /// [`scan`](Self::scan) on tokio's blocking pool so async callers are
    /// not stalled.
    pub async fn scan_in_background(
        &self,
        fingerprints: Vec<ScanFingerprint>,
        not_duplicates: Vec<NotDuplicatePair>,
        cancel: CancellationToken,
    ) -> Result<DuplicateScanResult, ScanError> {
        let finder = self.clone();
        tokio::task::spawn_blocking(move || finder.scan(&fingerprints, &not_duplicates, &cancel))
            .await
            .map_err(|e| ScanError::Worker(e.to_string()))?
    }
}

struct ScanState<'a> {
    items: &'a [ScanFingerprint],
    excluded: HashSet<PairKey>,
    // exclusions already counted in the stats
    applied: HashSet<PairKey>,
    union_find: UnionFind,
    pairs: Vec<DuplicatePair>,
    stats: ScanStats,
}

impl<'a> ScanState<'a> {
    fn new(items: &'a [ScanFingerprint], not_duplicates: &[NotDuplicatePair]) -> Self {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if index.contains_key(item.arcid.as_str()) {
                debug!("Duplicate scan row for {}", item.arcid);
                continue;
            }
            index.insert(item.arcid.as_str(), i);
        }

        let excluded = not_duplicates
            .iter()
            .filter(|pair| !pair.is_self_pair())
            .filter_map(|pair| {
                let a = *index.get(pair.arcid_a())?;
                let b = *index.get(pair.arcid_b())?;
                (a != b).then(|| PairKey::new(a, b))
            })
            .collect();

        Self {
            items,
            excluded,
            applied: HashSet::new(),
            union_find: UnionFind::new(items.len()),
            pairs: Vec::new(),
            stats: ScanStats {
                items_scanned: items.len(),
                ..ScanStats::default()
            },
        }
    }

    fn link_exact(&mut self) {
        let mut by_checksum: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, item) in self.items.iter().enumerate() {
            by_checksum.entry(item.checksum.as_str()).or_default().push(i);
        }

        for members in by_checksum.values() {
            if members.len() < 2 {
                continue;
            }
            self.stats.exact_groups += 1;

            let anchor = members[0];
            for &member in &members[1..] {
                // identical bytes always cluster; an exclusion only hides the pair
                self.union_find.union(anchor, member);
                if self.is_excluded(PairKey::new(anchor, member)) {
                    continue;
                }
                self.pairs.push(DuplicatePair::exact(
                    self.items[anchor].arcid.as_str(),
                    self.items[member].arcid.as_str(),
                ));
            }
        }
    }

    fn link_similar(
        &mut self,
        config: &DuplicateScanConfig,
        cancel: &CancellationToken,
    ) -> Result<(), ScanError> {
        let mut buckets: BTreeMap<BucketKey, Vec<usize>> = BTreeMap::new();
        for (i, item) in self.items.iter().enumerate() {
            for band in 0..BAND_COUNT {
                buckets
                    .entry((band as u8, hash::band(item.dhash, band)))
                    .or_default()
                    .push(i);
            }
        }

        let mut seen: HashSet<PairKey> = HashSet::new();
        for (&(band, value), members) in &buckets {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            if members.len() > config.bucket_max_size {
                debug!(
                    "Skipping bucket band={} value={:#06x} with {} items",
                    band,
                    value,
                    members.len()
                );
                self.stats.skipped_buckets += 1;
                continue;
            }

            for (pos, &i) in members.iter().enumerate() {
                for &j in &members[pos + 1..] {
                    let key = PairKey::new(i, j);
                    if !seen.insert(key) {
                        continue;
                    }
                    if self.is_excluded(key) {
                        continue;
                    }
                    self.compare(i, j, config);
                }
            }
        }
        Ok(())
    }

    /// Whether `key` is excluded. Each exclusion is counted once per scan.
    fn is_excluded(&mut self, key: PairKey) -> bool {
        if !self.excluded.contains(&key) {
            return false;
        }
        if self.applied.insert(key) {
            self.stats.excluded_pairs += 1;
        }
        true
    }

    fn compare(&mut self, i: usize, j: usize, config: &DuplicateScanConfig) {
        self.stats.approximate_candidates += 1;

        let items = self.items;
        let (a, b) = (&items[i], &items[j]);
        let dhash_distance = hash::hamming(a.dhash, b.dhash);
        if dhash_distance > config.dhash_threshold {
            return;
        }
        let ahash_distance = hash::hamming(a.ahash, b.ahash);
        if ahash_distance > config.ahash_threshold {
            return;
        }
        // already reported as an exact match
        if config.exact_checksum && a.checksum == b.checksum {
            return;
        }

        let pair = DuplicatePair::similar(
            a.arcid.as_str(),
            b.arcid.as_str(),
            dhash_distance,
            ahash_distance,
        );
        self.union_find.union(i, j);
        self.stats.approximate_edges += 1;
        self.pairs.push(pair);
    }

    fn finish(mut self) -> DuplicateScanResult {
        let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..self.items.len() {
            let root = self.union_find.find(i);
            components.entry(root).or_default().push(i);
        }

        let mut groups: Vec<Vec<String>> = components
            .into_values()
            .filter(|members| members.len() >= 2)
            .map(|members| {
                let mut ids: Vec<String> = members
                    .iter()
                    .map(|&i| self.items[i].arcid.clone())
                    .collect();
                ids.sort();
                ids
            })
            .collect();
        groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));

        let mut pairs = self.pairs;
        pairs.sort_by(|x, y| {
            x.score()
                .cmp(&y.score())
                .then(x.reason().cmp(&y.reason()))
                .then_with(|| (x.arcid_a(), x.arcid_b()).cmp(&(y.arcid_a(), y.arcid_b())))
        });
        let mut emitted: HashSet<(String, String)> = HashSet::with_capacity(pairs.len());
        pairs.retain(|pair| {
            emitted.insert((pair.arcid_a().to_owned(), pair.arcid_b().to_owned()))
        });

        DuplicateScanResult {
            groups,
            pairs,
            stats: self.stats,
        }
    }
}
