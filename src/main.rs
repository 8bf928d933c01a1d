use votergate::{
    camera::ImageDirSource,
    cli::{print_json, spawn_progress_reporter, ConsoleAnnouncer},
    common::{Config, GateError, Paths},
    core::{EnrolledTemplateStore, OnnxFaceExtractor, ReceiptSigner, VideoFrameSource, VoterGate},
    storage::FileTemplateStore,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::RngCore;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Hex-encoded HMAC key for eligibility receipts.
const RECEIPT_KEY_ENV: &str = "VOTERGATE_RECEIPT_KEY";

#[derive(Parser)]
#[command(name = "votergate")]
#[command(about = "Liveness-checked face verification for voter eligibility")]
struct Cli {
    /// Enable development mode (keeps templates and config under ./dev_data)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture samples and store the averaged template for a voter
    Enroll {
        #[arg(short, long)]
        user: String,
        /// Read frames from a directory of images instead of the camera
        #[arg(short, long)]
        frames: Option<PathBuf>,
    },
    /// Capture samples and compare them against the voter's template
    Verify {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        frames: Option<PathBuf>,
        /// Hex challenge to bind into the receipt (random when omitted)
        #[arg(long)]
        challenge: Option<String>,
    },
    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let paths = Paths::new(cli.dev)?;
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file());
    let config = load_config(&config_path)?;

    match cli.command {
        Commands::CheckConfig => {
            print_json(&config)?;
        }
        Commands::Enroll { user, frames } => {
            let gate = build_gate(&config, &paths)?;
            let mut source = open_source(&config, frames.as_deref())?;
            let reporter = spawn_progress_reporter(gate.capture_handle(), Duration::from_millis(200));

            let outcome = gate.register(&user, source.as_mut(), &ConsoleAnnouncer).await;
            reporter.abort();

            let registration = outcome.with_context(|| format!("Enrollment failed for {}", user))?;
            print_json(&json!({
                "user_id": registration.user_id,
                "samples": registration.result.sample_count,
                "quality": registration.result.quality,
                "consistency": registration.result.consistency,
                "dimension": registration.result.embedding.len(),
                "has_landmarks": registration.result.landmarks.is_some(),
            }))?;
        }
        Commands::Verify { user, frames, challenge } => {
            let challenge = match challenge {
                Some(text) => parse_hex("challenge", &text)?,
                None => {
                    let mut bytes = vec![0u8; 16];
                    rand::thread_rng().fill_bytes(&mut bytes);
                    bytes
                }
            };

            let gate = build_gate(&config, &paths)?;
            // Unknown voters fail here, before the camera opens
            gate.store().fetch(&user)?;
            let mut source = open_source(&config, frames.as_deref())?;
            let reporter = spawn_progress_reporter(gate.capture_handle(), Duration::from_millis(200));

            let outcome = gate.verify(&user, &challenge, source.as_mut(), &ConsoleAnnouncer).await;
            reporter.abort();

            let verification = outcome.with_context(|| format!("Verification failed for {}", user))?;
            print_json(&json!({
                "user_id": verification.receipt.user_id,
                "is_match": verification.comparison.is_match,
                "similarity": verification.comparison.similarity,
                "confidence": verification.comparison.confidence,
                "threshold": verification.comparison.threshold,
                "challenge": verification.receipt.challenge_hex(),
                "issued_at": verification.receipt.issued_at,
                "signature": verification.receipt.signature_hex(),
            }))?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        return Ok(Config::load_from_path(path)?);
    }
    tracing::warn!("No config at {}, using defaults", path.display());
    let config = Config::default();
    config.validate()?;
    Ok(config)
}

fn build_gate(config: &Config, paths: &Paths) -> Result<VoterGate<FileTemplateStore>> {
    let templates_dir = match &config.storage.templates_dir {
        Some(dir) => dir.clone(),
        None => paths.templates_dir()?,
    };
    let store = FileTemplateStore::new(templates_dir)?;

    let extractor = OnnxFaceExtractor::new(config).context("Failed to load face models")?;
    let signer = receipt_signer()?;

    Ok(VoterGate::new(config, Arc::new(extractor), store, signer)?)
}

fn receipt_signer() -> Result<ReceiptSigner> {
    match std::env::var(RECEIPT_KEY_ENV) {
        Ok(text) => {
            let key = parse_hex(RECEIPT_KEY_ENV, &text)?;
            Ok(ReceiptSigner::new(&key)?)
        }
        Err(_) => {
            tracing::warn!("{} not set; receipts are signed with a throwaway key", RECEIPT_KEY_ENV);
            Ok(ReceiptSigner::random())
        }
    }
}

fn parse_hex(what: &str, text: &str) -> std::result::Result<Vec<u8>, GateError> {
    hex::decode(text.trim())
        .map_err(|e| GateError::InvalidSample(format!("{} is not valid hex: {}", what, e)))
}

fn open_source(config: &Config, frames: Option<&Path>) -> Result<Box<dyn VideoFrameSource>> {
    if let Some(dir) = frames {
        return Ok(Box::new(ImageDirSource::new(dir)?));
    }
    camera_source(config)
}

#[cfg(feature = "camera")]
fn camera_source(config: &Config) -> Result<Box<dyn VideoFrameSource>> {
    Ok(Box::new(votergate::camera::V4lCamera::new(&config.camera)))
}

#[cfg(not(feature = "camera"))]
fn camera_source(_config: &Config) -> Result<Box<dyn VideoFrameSource>> {
    anyhow::bail!("Built without camera support; pass --frames DIR or rebuild with --features camera")
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    }
}
