use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coverdupe::core::hash::hex;
use coverdupe::database::get_database_path;
use coverdupe::database::repositories::settings::{apply_setting, KEYS};
use coverdupe::services::IndexProgress;
use coverdupe::{
    CancellationToken, ComputedFingerprint, Database, DuplicateFinder, DuplicateScanResult,
    IndexError, IndexOptions, Indexer, ScanError,
};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(
    name = "coverdupe",
    version,
    about = "Find duplicate and near-duplicate covers by thumbnail fingerprint"
)]
struct Cli {
    /// Fingerprint database (default: `<data dir>/coverdupe/coverdupe.db`)
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Profile whose fingerprints and exclusions are used
    #[arg(long, value_name = "NAME", default_value = "default", global = true)]
    profile: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute and print fingerprints without storing them
    Fingerprint {
        /// Thumbnail files
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
        #[arg(long)]
        json: bool,
    },

    /// Fingerprint every image under a directory into the database
    Index {
        /// Directory to index
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Keep items that already have fingerprints
        #[arg(long)]
        skip_existing: bool,
        /// Worker threads (default: number of CPUs)
        #[arg(long, value_name = "N")]
        threads: Option<usize>,
    },

    /// Find duplicate groups among stored fingerprints
    Scan {
        /// Skip the identical-checksum phase
        #[arg(long)]
        no_exact: bool,
        /// Skip the perceptual-hash phase
        #[arg(long)]
        no_approximate: bool,
        #[arg(long, value_name = "N")]
        dhash_threshold: Option<u32>,
        #[arg(long, value_name = "N")]
        ahash_threshold: Option<u32>,
        #[arg(long, value_name = "N")]
        bucket_max_size: Option<usize>,
        #[arg(long)]
        json: bool,
    },

    /// Manage pairs marked as "not duplicates"
    Exclusions {
        #[command(subcommand)]
        command: ExclusionCmd,
    },

    /// Show or change stored scan settings
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

#[derive(Subcommand, Debug)]
enum ExclusionCmd {
    /// Mark two items as not duplicates
    Add { first: String, second: String },

    /// Forget a not-duplicate decision
    Remove { first: String, second: String },

    /// List all not-duplicate decisions
    List {
        #[arg(long)]
        json: bool,
    },

    /// Remove every not-duplicate decision of the profile
    Clear {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCmd {
    /// Print the effective scan settings
    Show {
        #[arg(long)]
        json: bool,
    },

    /// Store one setting, e.g. `duplicates.dhash_threshold 6`
    Set { key: String, value: String },

    /// Restore default settings
    Reset,
}

#[derive(Serialize)]
struct FingerprintOutput<'a> {
    path: &'a Path,
    #[serde(flatten)]
    fingerprint: &'a ComputedFingerprint,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let Cli {
        db: db_path,
        profile,
        command,
    } = Cli::parse();

    match command {
        Commands::Fingerprint { files, json } => print_fingerprints(&files, json)?,

        Commands::Index {
            path,
            skip_existing,
            threads,
        } => {
            println!("▶ Indexing thumbnails in: {}", path.display());
            let options = IndexOptions {
                skip_existing,
                threads,
            };
            let db = open_database(db_path.as_deref())?;
            run_index(db, profile, path, options).await?;
        }

        Commands::Scan {
            no_exact,
            no_approximate,
            dhash_threshold,
            ahash_threshold,
            bucket_max_size,
            json,
        } => {
            let db = open_database(db_path.as_deref())?;
            let mut config = db.settings().load()?;
            config.exact_checksum &= !no_exact;
            config.approximate &= !no_approximate;
            if let Some(value) = dhash_threshold {
                config.dhash_threshold = value;
            }
            if let Some(value) = ahash_threshold {
                config.ahash_threshold = value;
            }
            if let Some(value) = bucket_max_size {
                config.bucket_max_size = value;
            }

            let fingerprints = db.fingerprints().scan_view(&profile)?;
            let exclusions = db.exclusions().list(&profile)?;
            if !json {
                println!(
                    "▶ Scanning {} items ({} exclusions) in profile {}",
                    fingerprints.len(),
                    exclusions.len(),
                    profile
                );
            }

            let cancel = CancellationToken::new();
            let watcher = spawn_ctrl_c_watcher(cancel.clone());
            let outcome = DuplicateFinder::new(config)
                .scan_in_background(fingerprints, exclusions, cancel)
                .await;
            watcher.abort();

            match outcome {
                Ok(result) if json => println!("{}", serde_json::to_string_pretty(&result)?),
                Ok(result) => print_scan_result(&result),
                Err(ScanError::Cancelled) => anyhow::bail!("Scan cancelled; no result produced"),
                Err(e) => return Err(e).context("Duplicate scan failed"),
            }
        }

        Commands::Exclusions { command } => {
            let db = open_database(db_path.as_deref())?;
            let repo = db.exclusions();
            match command {
                ExclusionCmd::Add { first, second } => {
                    if repo.add(&profile, &first, &second)? {
                        println!("✅ Marked {} and {} as not duplicates", first, second);
                    } else if first == second {
                        println!("⚠️  An item cannot be excluded from itself");
                    } else {
                        println!("{} and {} were already marked", first, second);
                    }
                }
                ExclusionCmd::Remove { first, second } => {
                    if repo.remove(&profile, &first, &second)? {
                        println!("🧹 Removed exclusion {} / {}", first, second);
                    } else {
                        println!("No exclusion for {} / {}", first, second);
                    }
                }
                ExclusionCmd::List { json } => {
                    let pairs = repo.list(&profile)?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&pairs)?);
                    } else if pairs.is_empty() {
                        println!("No exclusions.");
                    } else {
                        println!("🗂️  {} exclusion(s):", pairs.len());
                        for pair in &pairs {
                            println!(
                                "   {} ≠ {}  ({})",
                                pair.arcid_a(),
                                pair.arcid_b(),
                                pair.created_at().to_rfc3339()
                            );
                        }
                    }
                }
                ExclusionCmd::Clear { yes } => {
                    let confirmed = yes
                        || Confirm::new()
                            .with_prompt(format!("Remove all exclusions of profile {}?", profile))
                            .default(false)
                            .interact()?;
                    if confirmed {
                        let removed = repo.clear(&profile)?;
                        println!("🧹 Removed {} exclusion(s)", removed);
                    } else {
                        println!("Nothing removed.");
                    }
                }
            }
        }

        Commands::Config { command } => {
            let db = open_database(db_path.as_deref())?;
            let settings = db.settings();
            match command {
                ConfigCmd::Show { json } => {
                    let config = settings.load()?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&config)?);
                    } else {
                        println!("duplicates.exact_checksum  = {}", config.exact_checksum);
                        println!("duplicates.approximate     = {}", config.approximate);
                        println!("duplicates.dhash_threshold = {}", config.dhash_threshold);
                        println!("duplicates.ahash_threshold = {}", config.ahash_threshold);
                        println!("duplicates.bucket_max_size = {}", config.bucket_max_size);
                    }
                }
                ConfigCmd::Set { key, value } => {
                    let mut config = settings.load()?;
                    apply_setting(&mut config, &key, &value).map_err(|e| {
                        anyhow::anyhow!("{} (known settings: {})", e, KEYS.join(", "))
                    })?;
                    settings.save(&config)?;
                    println!("✅ {} = {}", key, value);
                }
                ConfigCmd::Reset => {
                    settings.reset()?;
                    println!("✅ Settings restored to defaults");
                }
            }
        }
    }

    Ok(())
}

fn open_database(path: Option<&Path>) -> Result<Database> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => get_database_path()?,
    };
    Database::open(&path).with_context(|| format!("Failed to open database {}", path.display()))
}

fn print_fingerprints(files: &[PathBuf], json: bool) -> Result<()> {
    let fingerprinter = coverdupe::Fingerprinter;
    let computed: Vec<(&PathBuf, ComputedFingerprint)> =
        benchmark("fingerprinting", || -> Result<_> {
            let mut out = Vec::with_capacity(files.len());
            for path in files {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let fingerprint = fingerprinter
                    .compute(&bytes)
                    .with_context(|| format!("Failed to fingerprint {}", path.display()))?;
                out.push((path, fingerprint));
            }
            Ok(out)
        })?;

    if json {
        let output: Vec<FingerprintOutput> = computed
            .iter()
            .map(|(path, fingerprint)| FingerprintOutput { path, fingerprint })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for (path, fingerprint) in &computed {
        println!("\n✨ {}", path.display());
        println!("   checksum     {}", fingerprint.checksum);
        println!("   aspect ratio {:.4}", fingerprint.aspect_ratio);
        for hash in &fingerprint.hashes {
            println!(
                "   {:<5} {:<8} {}",
                hash.kind.as_str(),
                hash.crop.as_str(),
                hex(hash.value)
            );
        }
    }
    Ok(())
}

async fn run_index(
    db: Database,
    profile: String,
    root: PathBuf,
    options: IndexOptions,
) -> Result<()> {
    let bar = ProgressBar::new(0);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}",
    )?);
    bar.enable_steady_tick(Duration::from_millis(100));

    let (tx, mut rx) = mpsc::unbounded_channel::<IndexProgress>();
    let progress_bar = bar.clone();
    let progress_task = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            progress_bar.set_length(progress.total_files as u64);
            progress_bar.set_position(progress.files_processed as u64);
            progress_bar.set_message(progress.current_file);
        }
    });

    let indexer = Indexer::new(options).with_progress_sender(tx);
    let watcher = spawn_ctrl_c_watcher(indexer.cancellation_token());
    let outcome =
        tokio::task::spawn_blocking(move || indexer.index_directory(&db, &profile, &root))
            .await
            .context("Indexing task failed")?;
    watcher.abort();
    // the sender is dropped with the indexer, so the task drains and ends
    let _ = progress_task.await;

    let report = match outcome {
        Ok(report) => report,
        Err(IndexError::Cancelled) => {
            bar.abandon_with_message("cancelled");
            anyhow::bail!("Indexing cancelled; no fingerprints were stored");
        }
        Err(e) => {
            bar.abandon();
            return Err(e).context("Indexing failed");
        }
    };
    bar.finish_with_message("done");

    println!(
        "✅ Indexed {} of {} images ({} skipped) in {:.2}s",
        report.indexed, report.discovered, report.skipped, report.duration_seconds
    );
    if !report.failed.is_empty() {
        println!("⚠️  {} file(s) failed:", report.failed.len());
        for failure in &report.failed {
            println!("   {}: {}", failure.path.display(), failure.reason);
        }
    }
    Ok(())
}

fn print_scan_result(result: &DuplicateScanResult) {
    let stats = &result.stats;
    if result.is_empty() {
        println!("No duplicates found.");
    } else {
        println!("Found {} duplicate group(s):", result.groups.len());
        for (i, group) in result.groups.iter().enumerate() {
            println!("\n✨ Group {}:", i + 1);
            for arcid in group {
                println!("   ▶ {}", arcid);
            }
        }

        println!("\n{} pair(s):", result.pairs.len());
        for pair in &result.pairs {
            match (pair.dhash_distance(), pair.ahash_distance()) {
                (Some(dh), Some(ah)) => println!(
                    "   {} ↔ {}  {} (dHash {}, aHash {})",
                    pair.arcid_a(),
                    pair.arcid_b(),
                    pair.reason(),
                    dh,
                    ah
                ),
                _ => println!(
                    "   {} ↔ {}  {}",
                    pair.arcid_a(),
                    pair.arcid_b(),
                    pair.reason()
                ),
            }
        }
    }

    println!(
        "\n⏱ {} items in {:.2}s: {} exact groups, {} candidates, {} edges, {} skipped buckets, {} excluded",
        stats.items_scanned,
        stats.duration_seconds,
        stats.exact_groups,
        stats.approximate_candidates,
        stats.approximate_edges,
        stats.skipped_buckets,
        stats.excluded_pairs
    );
}

fn spawn_ctrl_c_watcher(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⚠️  Cancelling…");
            token.cancel();
        }
    })
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    eprintln!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
