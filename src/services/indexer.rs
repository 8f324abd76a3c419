use crate::core::cancel::CancellationToken;
use crate::core::models::ComputedFingerprint;
use crate::core::perceptual::{FingerprintError, Fingerprinter};
use crate::database::{Database, DatabaseError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: [&str; 8] =
    ["jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff"];

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("Store error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Leave items that already have stored fingerprints untouched.
    pub skip_existing: bool,
    /// Worker threads; defaults to the number of logical CPUs.
    pub threads: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexProgress {
    pub files_processed: usize,
    pub total_files: usize,
    pub current_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexReport {
    pub discovered: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub failed: Vec<IndexFailure>,
    pub duration_seconds: f64,
}

/// Fingerprints a local directory of thumbnails into the store. The file
/// stem of every image is used as its arcid.
pub struct Indexer {
    options: IndexOptions,
    fingerprinter: Fingerprinter,
    progress_sender: Option<mpsc::UnboundedSender<IndexProgress>>,
    cancellation_token: CancellationToken,
}

impl Indexer {
    pub fn new(options: IndexOptions) -> Self {
        Self {
            options,
            fingerprinter: Fingerprinter,
            progress_sender: None,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<IndexProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_supported_format(path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
    }

    pub fn index_directory(
        &self,
        db: &Database,
        profile_id: &str,
        root: &Path,
    ) -> Result<IndexReport, IndexError> {
        let start = Instant::now();

        if !root.is_dir() {
            return Err(IndexError::InvalidPath {
                path: root.to_string_lossy().to_string(),
            });
        }

        let mut report = IndexReport::default();
        let discovered = self.discover_files(root)?;
        report.discovered = discovered.len();
        log::info!("Discovered {} images under {}", discovered.len(), root.display());

        let mut owners: HashMap<String, PathBuf> = HashMap::new();
        let mut pending = Vec::new();
        for path in discovered {
            let Some(arcid) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            if let Some(owner) = owners.get(&arcid) {
                log::warn!("{} shares its arcid with {}", path.display(), owner.display());
                report.failed.push(IndexFailure {
                    reason: format!("arcid {} already used by {}", arcid, owner.display()),
                    path,
                });
                continue;
            }
            owners.insert(arcid.clone(), path.clone());

            if self.options.skip_existing && db.fingerprints().contains(profile_id, &arcid)? {
                report.skipped += 1;
                continue;
            }
            pending.push((arcid, path));
        }

        let results = self.fingerprint_all(&pending)?;

        let store = db.fingerprints();
        for ((arcid, path), result) in pending.iter().zip(results) {
            match result {
                Ok(fingerprint) => {
                    store.upsert_item(profile_id, arcid, &fingerprint)?;
                    report.indexed += 1;
                }
                Err(reason) => {
                    log::warn!("Failed to fingerprint {}: {}", path.display(), reason);
                    report.failed.push(IndexFailure {
                        path: path.clone(),
                        reason,
                    });
                }
            }
        }

        report.duration_seconds = start.elapsed().as_secs_f64();
        log::info!(
            "Indexed {} items ({} skipped, {} failed) in {:.2}s",
            report.indexed,
            report.skipped,
            report.failed.len(),
            report.duration_seconds
        );
        Ok(report)
    }

    fn discover_files(&self, root: &Path) -> Result<Vec<PathBuf>, IndexError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if self.cancellation_token.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            let path = entry.path();
            if path.is_file() && Self::is_supported_format(path) {
                files.push(path.to_path_buf());
            }
        }
        Ok(files)
    }

    fn fingerprint_all(
        &self,
        pending: &[(String, PathBuf)],
    ) -> Result<Vec<Result<ComputedFingerprint, String>>, IndexError> {
        let threads = self.options.threads.unwrap_or_else(num_cpus::get).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| IndexError::ThreadPool(e.to_string()))?;
        log::debug!("Fingerprinting {} files on {} threads", pending.len(), threads);

        let total_files = pending.len();
        let processed = AtomicUsize::new(0);
        let results: Vec<Option<Result<ComputedFingerprint, String>>> = pool.install(|| {
            pending
                .par_iter()
                .map(|(_, path)| {
                    if self.cancellation_token.is_cancelled() {
                        return None;
                    }
                    let result = self.fingerprint_file(path);

                    let files_processed = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    self.send_progress(IndexProgress {
                        files_processed,
                        total_files,
                        current_file: path.to_string_lossy().to_string(),
                    });
                    Some(result)
                })
                .collect()
        });

        if self.cancellation_token.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(IndexError::Cancelled)
    }

    fn fingerprint_file(&self, path: &Path) -> Result<ComputedFingerprint, String> {
        let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
        self.fingerprinter
            .compute(&bytes)
            .map_err(|e: FingerprintError| e.to_string())
    }

    fn send_progress(&self, progress: IndexProgress) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(progress);
        }
    }
}
