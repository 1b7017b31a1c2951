//! ExamIngest - Answer sheet ingestion from photographs
//!
//! Normalizes a photographed exam answer sheet, reads the student identity
//! and per-question scores, reconciles the identity with a registry and
//! appends consistent results to a CSV table. Anything that fails a check
//! is saved for manual inspection.

mod analysis;
mod capture;
mod config;
mod ingest;
mod storage;
mod vision;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::analysis::{PendingCorrection, ScoreValidator};
use crate::capture::Rotation;
use crate::config::AppConfig;
use crate::ingest::{
    CorrectionSource, IngestionController, NoCorrection, QuarantineReason, SubmissionOutcome,
    SubmissionReport,
};
use crate::storage::{CsvResultsSink, DirectoryQuarantine, Registry};
use crate::vision::{SheetBoundary, SheetNormalizer};

/// ExamIngest - Answer sheet ingestion from photographs
#[derive(Parser, Debug)]
#[command(name = "exam-ingest")]
#[command(about = "Read exam answer sheets from photos into a results table")]
struct Args {
    /// Configuration file (defaults to <config dir>/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process answer sheet photos, one after another
    Process {
        /// Student registry CSV (Family Name, First Name, Student Number)
        #[arg(short, long)]
        registry: Option<PathBuf>,

        /// Results CSV to append to (created when missing)
        #[arg(long)]
        results: PathBuf,

        /// Clockwise rotation applied before normalization (0, 90, 180, 270)
        #[arg(long, default_value = "0")]
        rotate: u32,

        /// Reject inconsistent scores without prompting for a correction
        #[arg(long)]
        no_correction: bool,

        /// Directory for quarantined sheets
        #[arg(long)]
        quarantine_dir: Option<PathBuf>,

        /// Answer sheet photos
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Write the canonical image for a photo, for template calibration
    Normalize {
        image: PathBuf,

        /// Output image path
        #[arg(short, long)]
        output: PathBuf,

        /// Clockwise rotation applied before normalization (0, 90, 180, 270)
        #[arg(long, default_value = "0")]
        rotate: u32,
    },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // API keys may come from a local .env file
    dotenvy::dotenv().ok();

    match args.command {
        Command::Process {
            registry,
            results,
            rotate,
            no_correction,
            quarantine_dir,
            images,
        } => {
            let config = load_or_create_config(args.config.as_deref())?;
            let options = ProcessOptions {
                registry,
                results,
                rotation: parse_rotation(rotate)?,
                no_correction,
                quarantine_dir,
            };
            run_process(&config, &options, &images)
        }
        Command::Normalize {
            image,
            output,
            rotate,
        } => {
            let config = load_or_create_config(args.config.as_deref())?;
            run_normalize(&config, &image, &output, parse_rotation(rotate)?)
        }
        Command::InitConfig { force } => init_config(args.config.as_deref(), force),
    }
}

struct ProcessOptions {
    registry: Option<PathBuf>,
    results: PathBuf,
    rotation: Rotation,
    no_correction: bool,
    quarantine_dir: Option<PathBuf>,
}

fn parse_rotation(degrees: u32) -> Result<Rotation> {
    Rotation::from_degrees(degrees)
        .with_context(|| format!("Unsupported rotation {} (use 0, 90, 180 or 270)", degrees))
}

fn default_config_path() -> Result<PathBuf> {
    Ok(storage::get_config_dir()?.join("config.toml"))
}

/// Load configuration from file or fall back to defaults
fn load_or_create_config(path: Option<&Path>) -> Result<AppConfig> {
    // An explicit path must load
    if let Some(path) = path {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_path) = default_config_path() {
        if config_path.exists() {
            let config = config::load_config(&config_path)?;
            info!("Loaded configuration from {:?}", config_path);
            return Ok(config);
        }
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn init_config(path: Option<&Path>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };
    if path.exists() && !force {
        bail!("{:?} already exists (use --force to overwrite)", path);
    }
    config::save_config(&AppConfig::default(), &path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn normalizer_for(config: &AppConfig) -> SheetNormalizer {
    SheetNormalizer::new(
        config.general.canonical_width,
        config.general.canonical_height,
        config.normalizer.clone(),
    )
}

fn run_normalize(config: &AppConfig, image: &Path, output: &Path, rotation: Rotation) -> Result<()> {
    let raw = capture::load_sheet(image, rotation)?;
    let canonical = normalizer_for(config).normalize(&raw.image);

    canonical
        .image
        .save(output)
        .with_context(|| format!("Failed to write {:?}", output))?;

    match canonical.boundary {
        SheetBoundary::Detected { corners } => println!("Sheet boundary: {:?}", corners),
        SheetBoundary::NotFound(reason) => println!("Sheet boundary not found: {}", reason),
    }
    println!("Wrote {}", output.display());
    Ok(())
}

fn run_process(config: &AppConfig, options: &ProcessOptions, images: &[PathBuf]) -> Result<()> {
    let regions = config.region_table()?;
    let registry = options
        .registry
        .as_deref()
        .map(Registry::load_csv)
        .transpose()?;
    let extractor = vision::build_field_extractor(&config.backends)?;

    let quarantine_dir = match options
        .quarantine_dir
        .clone()
        .or_else(|| config.storage.quarantine_dir.clone())
    {
        Some(dir) => dir,
        None => storage::default_quarantine_dir()?,
    };
    let mut quarantine = DirectoryQuarantine::new(&quarantine_dir)?;
    let mut results = CsvResultsSink::open(&options.results)?;
    info!(
        "Appending results to {:?}, quarantining to {:?}",
        results.path(),
        quarantine.dir()
    );

    // The canonical frame must be the one the template was validated against
    let (width, height) = regions.dimensions();
    let controller = IngestionController::new(
        SheetNormalizer::new(width, height, config.normalizer.clone()),
        extractor,
        regions,
        registry,
        ScoreValidator::new(config.general.max_item_score),
        config.general.confidence_threshold,
    );

    let mut corrections: Box<dyn CorrectionSource> = if options.no_correction {
        Box::new(NoCorrection)
    } else {
        Box::new(StdinCorrection)
    };

    let mut tally = Tally::default();
    for path in images {
        info!("Processing {:?}", path);
        let report = capture::load_sheet(path, options.rotation).and_then(|raw| {
            let report =
                controller.process(&raw.image, corrections.as_mut(), &mut results, &mut quarantine);
            debug!("{:?} took {:?}", raw.source, raw.loaded_at.elapsed());
            report
        });

        match report {
            Ok(report) => {
                print_report(path, &report);
                tally.record(&report.outcome);
            }
            Err(e) => {
                error!("Failed to process {:?}: {:#}", path, e);
                tally.failed += 1;
            }
        }
    }

    println!(
        "\n{} accepted, {} quarantined, {} failed",
        tally.accepted, tally.quarantined, tally.failed
    );
    Ok(())
}

#[derive(Debug, Default)]
struct Tally {
    accepted: usize,
    quarantined: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, outcome: &SubmissionOutcome) {
        match outcome {
            SubmissionOutcome::Accepted(_) => self.accepted += 1,
            SubmissionOutcome::Quarantined { .. } => self.quarantined += 1,
            SubmissionOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

fn print_report(path: &Path, report: &SubmissionReport) {
    println!("\n== {}", path.display());
    if !report.boundary_detected() {
        println!("Sheet boundary not found, used the uncropped photo");
    }

    if let Some(identity) = &report.identity {
        let rows = [
            (
                "Family Name",
                &identity.extracted.family_name,
                &identity.matched.family_name,
                identity.confidence.family_name,
            ),
            (
                "First Name",
                &identity.extracted.first_name,
                &identity.matched.first_name,
                identity.confidence.first_name,
            ),
            (
                "Student Number",
                &identity.extracted.student_number,
                &identity.matched.student_number,
                identity.confidence.student_number,
            ),
        ];
        println!("{:<16} {:<24} {:<24} {:>10}", "Field", "Extracted", "Matched", "Confidence");
        for (field, extracted, matched, confidence) in rows {
            println!("{:<16} {:<24} {:<24} {:>10}", field, extracted, matched, confidence);
        }
    }

    if let Some(scores) = &report.scores {
        let items: Vec<String> = scores
            .items
            .iter()
            .map(|(name, score)| format!("{}={}", name, score))
            .collect();
        println!("Scores: {} (total {})", items.join(" "), scores.total);
    }

    match &report.outcome {
        SubmissionOutcome::Accepted(record) => {
            println!("ACCEPTED: {} {}", record.student_number, record.family_name)
        }
        SubmissionOutcome::Quarantined { entry, reason } => {
            let why = match reason {
                QuarantineReason::LowConfidence { threshold, .. } => {
                    format!("identity confidence below {}", threshold)
                }
                QuarantineReason::ScoreMismatch { item_sum, total } => {
                    format!("items sum to {} but total is {}", item_sum, total)
                }
            };
            match &entry.location {
                Some(location) => println!("QUARANTINED ({}): {}", why, location.display()),
                None => println!("QUARANTINED ({}): {}", why, entry.key),
            }
        }
        SubmissionOutcome::Failed { error } => println!("FAILED: {}", error),
    }
}

/// Prompts on the terminal for one corrected value per item
struct StdinCorrection;

impl CorrectionSource for StdinCorrection {
    fn correct(&mut self, pending: &PendingCorrection) -> Result<Option<Vec<(String, u32)>>> {
        let scores = pending.scores();
        println!(
            "Item scores sum to {} but the total reads {}. Enter corrected values (Enter keeps the current one).",
            scores.item_sum(),
            scores.total
        );

        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        let mut overrides = Vec::new();

        for (name, current) in &scores.items {
            loop {
                print!("  {} [{}] (0-{}): ", name, current, pending.max_item_score());
                io::stdout().flush()?;

                let Some(line) = lines.next() else {
                    // Input closed, keep what was entered so far
                    return Ok(Some(overrides));
                };
                let line = line?;
                let input = line.trim();
                if input.is_empty() {
                    break;
                }

                match input.parse::<u32>() {
                    Ok(value) => match pending.check_override(name, value) {
                        Ok(()) => {
                            overrides.push((name.clone(), value));
                            break;
                        }
                        Err(e) => println!("  {}", e),
                    },
                    Err(_) => println!("  Not a number: {:?}", input),
                }
            }
        }

        Ok(Some(overrides))
    }
}
