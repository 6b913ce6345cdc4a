//! Offline training job.
//!
//! Generates a synthetic cohort, tunes the SVR with the Grey Wolf Optimizer,
//! fits the stage classifier, calibrates confidence and writes a model
//! directory with an unsigned manifest.
//!
//! # Usage
//!
//! ```bash
//! tune_svr --out models/ --seed 42 --samples 5000
//! sign_model sign models/            # then sign the result
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ckd_sentinel::adapters::sanitize::SanitizingMakeWriter;
use ckd_sentinel::training::{export, train, KernelChoice, TrainingConfig};

#[derive(Parser)]
#[command(name = "tune_svr", about = "Train and export CKD model artifacts")]
struct Cli {
    /// Output model directory
    #[arg(long, default_value = "models")]
    out: PathBuf,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Synthetic cohort size
    #[arg(long, default_value_t = 5000)]
    samples: usize,

    #[arg(long, default_value_t = 12)]
    wolves: usize,

    #[arg(long, default_value_t = 30)]
    iterations: usize,

    /// `linear` or `rbf`
    #[arg(long, default_value = "linear")]
    kernel: KernelChoice,

    /// Rows kept as the attribution background
    #[arg(long, default_value_t = 16)]
    background_size: usize,

    /// Training rows per candidate fit during the search
    #[arg(long, default_value_t = 600)]
    search_rows: usize,

    /// Training rows for the final fit
    #[arg(long, default_value_t = 1500)]
    max_fit_rows: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(std::io::stderr)))
        .init();

    let config = TrainingConfig {
        samples: cli.samples,
        seed: cli.seed,
        n_wolves: cli.wolves,
        max_iter: cli.iterations,
        kernel: cli.kernel,
        background_size: cli.background_size,
        search_rows: cli.search_rows,
        max_fit_rows: cli.max_fit_rows,
        ..TrainingConfig::default()
    };

    let artifacts = train(&config).context("Training failed")?;
    let manifest = export(&artifacts, &cli.out)
        .with_context(|| format!("Failed to export to {:?}", cli.out))?;

    let report = &artifacts.report;
    println!("kernel              {:?}", report.kernel);
    println!("C                   {:.4}", report.c);
    println!("epsilon             {:.4}", report.epsilon);
    println!("validation RMSE     {:.3}", report.validation_rmse);
    println!("stage accuracy      {:.3}", report.stage_accuracy);
    println!("classifier accuracy {:.3}", report.classifier_accuracy);
    println!("support vectors     {}", report.support_vectors);
    println!("artifacts           {}", manifest.files.len());
    println!("Wrote {:?} (unsigned; run sign_model to sign)", cli.out);
    Ok(())
}
