//! ckd-sentinel: run CKD predictions from the command line.
//!
//! Reads `LabObservation` JSON (one object or an array per input, stdin when
//! no input is given) and prints one `PredictionResult` JSON line per
//! observation.

use std::io::{IsTerminal, Read};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ckd_sentinel::adapters::sanitize::{self, SanitizingMakeWriter};
use ckd_sentinel::adapters::FsArtifactSource;
use ckd_sentinel::application::guidance::{alert_status, lifestyle_advice, AlertStatus, LifestyleAdvice};
use ckd_sentinel::application::{KnownConditions, LazyModelBundle, PredictionService};
use ckd_sentinel::config::{LogMode, SentinelConfig};
use ckd_sentinel::{LabObservation, PredictionAudit, PredictionResult};

#[derive(Parser)]
#[command(name = "ckd-sentinel", version, about = "CKD eGFR prediction, staging and guidance")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "CKD_CONFIG")]
    config: Option<PathBuf>,

    /// Model directory (overrides configuration)
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Patient is known to be diabetic
    #[arg(long)]
    diabetic: bool,

    /// Include the audit record (both stage opinions, full attributions)
    #[arg(long)]
    audit: bool,

    /// Include lifestyle advice and alert status
    #[arg(long)]
    guidance: bool,

    /// Observation files; `-` or nothing reads stdin
    inputs: Vec<PathBuf>,
}

#[derive(Serialize)]
struct Output<'a> {
    #[serde(flatten)]
    result: &'a PredictionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    audit: Option<&'a PredictionAudit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lifestyle: Option<LifestyleAdvice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alert: Option<AlertStatus>,
}

fn init_logging(config: &SentinelConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    sanitize::set_max_bytes(config.sanitize_max_bytes);

    let (writer, guard) = match config.log_mode {
        LogMode::File => {
            if let Some(parent) = config.log_file.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {parent:?}"))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.log_file)
                .with_context(|| format!("Failed to open log file {:?}", config.log_file))?;
            tracing_appender::non_blocking(file)
        }
        LogMode::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogMode::Stderr => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(config.log_mode == LogMode::Stderr && std::io::stderr().is_terminal())
                .with_writer(SanitizingMakeWriter::new(writer)),
        )
        .init();
    Ok(guard)
}

/// Decode every record; a bad record is reported on its own line and does
/// not stop the rest of the batch.
fn read_observations(inputs: &[PathBuf]) -> Result<Vec<ckd_sentinel::Result<LabObservation>>> {
    let mut texts = Vec::new();
    if inputs.is_empty() || inputs.iter().any(|p| p.as_os_str() == "-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        texts.push(("stdin".to_string(), buf));
    }
    for path in inputs.iter().filter(|p| p.as_os_str() != "-") {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {path:?}"))?;
        texts.push((path.display().to_string(), text));
    }

    let mut observations = Vec::new();
    for (origin, text) in texts {
        let value: serde_json::Value =
            serde_json::from_str(&text).with_context(|| format!("{origin}: invalid JSON"))?;
        match value {
            serde_json::Value::Array(items) => {
                observations.extend(items.into_iter().map(LabObservation::from_json));
            }
            other => observations.push(LabObservation::from_json(other)),
        }
    }
    Ok(observations)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SentinelConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }
    let _guard = init_logging(&config)?;

    tracing::info!("Starting ckd-sentinel...");

    let policy = config.signature_policy()?;
    let source = FsArtifactSource::open(&config.model_dir, &policy)
        .with_context(|| format!("Failed to open model directory {:?}", config.model_dir))?;
    let models = LazyModelBundle::new(Box::new(source));
    let service = PredictionService::new(models.get()?);

    let observations = read_observations(&cli.inputs)?;
    let known = KnownConditions {
        diabetes: cli.diabetic,
    };

    let mut failures = 0usize;
    for (i, obs) in observations.iter().enumerate() {
        let outcome = obs
            .as_ref()
            .map_err(Clone::clone)
            .and_then(|obs| service.predict_with_audit(obs, known));
        match outcome {
            Ok((result, audit)) => {
                let output = Output {
                    result: &result,
                    audit: cli.audit.then_some(&audit),
                    lifestyle: cli.guidance.then(|| lifestyle_advice(result.ckd_stage)),
                    alert: cli.guidance.then(|| alert_status(result.ckd_stage)),
                };
                println!("{}", serde_json::to_string(&output)?);
            }
            Err(e) => {
                failures += 1;
                tracing::warn!("Observation {i} rejected: {e}");
                println!("{}", serde_json::json!({ "error": e.to_string() }));
            }
        }
    }

    tracing::info!(
        "Processed {} observation(s), {} rejected",
        observations.len(),
        failures
    );
    if failures > 0 {
        bail!("{failures} observation(s) could not be predicted");
    }
    Ok(())
}
