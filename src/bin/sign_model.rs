//! Model signing utility.
//!
//! Writes `manifest.json` (SHA-256 of every bundle artifact) and an Ed25519
//! `model.sig` over the exact manifest bytes, and generates signing keys.
//!
//! # Usage
//!
//! ```bash
//! sign_model keygen --out-seed secrets/model.seed --out-pub models/model.pub
//! CKD_MODEL_SIGNING_KEY_B64_FILE=secrets/model.seed sign_model sign models/ --serial 42
//! sign_model sign models/ --unsigned   # manifest only
//! ```
//!
//! # Security
//!
//! - Signing seed read from a file (`--key-file` or
//!   `CKD_MODEL_SIGNING_KEY_B64_FILE`); the raw env var is accepted only in
//!   debug builds
//! - Seed material zeroized after use
//! - Seed files written with 0600 permissions (Unix)

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose;
use base64::Engine;
use clap::{Parser, Subcommand};
use ed25519_dalek::{Signature, Signer, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use ckd_sentinel::adapters::fs_artifacts::{sha256_hex, MANIFEST_FILE, SIGNATURE_FILE};
use ckd_sentinel::adapters::ModelManifest;
use ckd_sentinel::application::bundle::ARTIFACT_NAMES;

const KEY_FILE_ENV: &str = "CKD_MODEL_SIGNING_KEY_B64_FILE";
const KEY_ENV_DEBUG: &str = "CKD_MODEL_SIGNING_KEY_B64";

#[derive(Parser)]
#[command(name = "sign_model", about = "Bind and sign CKD model artifacts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write manifest.json and model.sig for a model directory
    Sign {
        model_dir: PathBuf,
        /// Monotonic serial (defaults to the creation timestamp)
        #[arg(long)]
        serial: Option<u64>,
        /// File holding the base64 signing seed
        #[arg(long)]
        key_file: Option<PathBuf>,
        /// Write the manifest without a signature
        #[arg(long)]
        unsigned: bool,
    },
    /// Generate an Ed25519 signing seed and public key
    Keygen {
        #[arg(long)]
        out_seed: PathBuf,
        #[arg(long)]
        out_pub: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct Seed([u8; 32]);

fn read_seed_b64(key_file: Option<&Path>) -> Result<Zeroizing<String>> {
    let from_file = key_file
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(KEY_FILE_ENV).ok().map(|p| PathBuf::from(p.trim())));

    let secret = if let Some(path) = from_file {
        Zeroizing::new(
            fs::read_to_string(&path)
                .with_context(|| format!("Failed reading signing key file {path:?}"))?,
        )
    } else if cfg!(debug_assertions) {
        match std::env::var(KEY_ENV_DEBUG) {
            Ok(v) => Zeroizing::new(v),
            Err(_) => bail!("Missing signing key. Provide --key-file or {KEY_FILE_ENV}."),
        }
    } else {
        bail!("Missing signing key. Provide --key-file or {KEY_FILE_ENV}.");
    };

    let trimmed = Zeroizing::new(secret.trim().to_string());
    if trimmed.is_empty() {
        bail!("Empty signing key");
    }
    Ok(trimmed)
}

fn read_seed(key_file: Option<&Path>) -> Result<Seed> {
    let b64 = read_seed_b64(key_file)?;
    let raw = Zeroizing::new(
        general_purpose::STANDARD
            .decode(b64.as_bytes())
            .context("Invalid base64 in signing key")?,
    );
    let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
        anyhow::anyhow!("Signing seed must be 32 bytes after base64 decode (got {})", raw.len())
    })?;
    Ok(Seed(bytes))
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn sign(model_dir: &Path, serial: Option<u64>, key_file: Option<&Path>, unsigned: bool) -> Result<()> {
    let mut files = BTreeMap::new();
    for name in ARTIFACT_NAMES {
        let path = model_dir.join(name);
        let bytes = fs::read(&path).with_context(|| format!("Failed to read {path:?}"))?;
        files.insert(name.to_string(), sha256_hex(&bytes));
    }

    let created_at = unix_now();
    let manifest = ModelManifest {
        version: 1,
        serial: Some(serial.unwrap_or_else(|| u64::try_from(created_at).unwrap_or(1))),
        created_at: Some(created_at),
        files,
    };
    let manifest_bytes =
        serde_json::to_vec_pretty(&manifest).context("Failed to serialize manifest.json")?;
    let manifest_path = model_dir.join(MANIFEST_FILE);
    fs::write(&manifest_path, &manifest_bytes)
        .with_context(|| format!("Failed to write {manifest_path:?}"))?;
    println!("Wrote manifest: {manifest_path:?}");

    let sig_path = model_dir.join(SIGNATURE_FILE);
    if unsigned {
        if sig_path.exists() {
            fs::remove_file(&sig_path)
                .with_context(|| format!("Failed to remove stale {sig_path:?}"))?;
        }
        return Ok(());
    }

    let seed = read_seed(key_file)?;
    let signing_key = SigningKey::from_bytes(&seed.0);
    let sig: Signature = signing_key.sign(&manifest_bytes);
    fs::write(&sig_path, sig.to_bytes()).with_context(|| format!("Failed to write {sig_path:?}"))?;

    println!("Wrote signature: {sig_path:?}");
    println!(
        "Public key (base64)={}",
        general_purpose::STANDARD.encode(signing_key.verifying_key().as_bytes())
    );
    Ok(())
}

fn write_new(path: &Path, contents: &[u8], mode: u32, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("Refusing to overwrite existing file {path:?}. Use --force.");
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {parent:?}"))?;
    }
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    opts.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;
    let mut file = opts.open(path).with_context(|| format!("Failed to open {path:?}"))?;
    file.write_all(contents)?;
    file.write_all(b"\n")?;
    Ok(())
}

fn keygen(out_seed: &Path, out_pub: Option<&Path>, force: bool) -> Result<()> {
    let mut seed = Seed([0u8; 32]);
    OsRng.fill_bytes(&mut seed.0);
    let signing_key = SigningKey::from_bytes(&seed.0);

    let seed_b64 = Zeroizing::new(general_purpose::STANDARD.encode(seed.0));
    let pub_b64 = general_purpose::STANDARD.encode(signing_key.verifying_key().as_bytes());

    write_new(out_seed, seed_b64.as_bytes(), 0o600, force)?;
    println!("Wrote signing seed (base64) to {out_seed:?}");
    if let Some(path) = out_pub {
        write_new(path, pub_b64.as_bytes(), 0o644, force)?;
        println!("Wrote public key (base64) to {path:?}");
    }
    println!("Public key (base64)={pub_b64}");
    Ok(())
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Sign {
            model_dir,
            serial,
            key_file,
            unsigned,
        } => sign(&model_dir, serial, key_file.as_deref(), unsigned),
        Command::Keygen {
            out_seed,
            out_pub,
            force,
        } => keygen(&out_seed, out_pub.as_deref(), force),
    }
}
