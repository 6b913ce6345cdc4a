//! Model directory integrity: manifest hashes and Ed25519 signatures.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};

use ckd_sentinel::adapters::fs_artifacts::{sha256_hex, MANIFEST_FILE, SIGNATURE_FILE};
use ckd_sentinel::adapters::{FsArtifactSource, ModelManifest, SignaturePolicy};
use ckd_sentinel::application::bundle::{ARTIFACT_NAMES, REGRESSOR_ARTIFACT};
use ckd_sentinel::{LazyModelBundle, ModelBundle, PipelineError};

fn bundled_models() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("models")
}

fn copy_models(dst: &Path) {
    for name in ARTIFACT_NAMES.iter().chain(&[MANIFEST_FILE]) {
        fs::copy(bundled_models().join(name), dst.join(name)).expect("copy artifact");
    }
}

/// Rewrite the manifest for the current files and sign it.
fn sign(dir: &Path, key: &SigningKey) {
    let files = ARTIFACT_NAMES
        .iter()
        .map(|name| {
            let bytes = fs::read(dir.join(name)).expect("read artifact");
            ((*name).to_string(), sha256_hex(&bytes))
        })
        .collect();
    let manifest = ModelManifest {
        version: 1,
        serial: Some(7),
        created_at: None,
        files,
    };
    let bytes = serde_json::to_vec_pretty(&manifest).expect("serialize");
    fs::write(dir.join(MANIFEST_FILE), &bytes).expect("write manifest");
    fs::write(dir.join(SIGNATURE_FILE), key.sign(&bytes).to_bytes()).expect("write signature");
}

fn policy(key: &SigningKey) -> SignaturePolicy {
    let b64 = general_purpose::STANDARD.encode(key.verifying_key().as_bytes());
    SignaturePolicy {
        require_signature: true,
        verifying_key: Some(SignaturePolicy::verifying_key_from_b64(&b64).expect("valid key")),
    }
}

#[test]
fn test_bundled_manifest_matches_files() {
    let source = FsArtifactSource::open(bundled_models(), &SignaturePolicy::default()).expect("opens");
    ModelBundle::load(&source).expect("loads");
}

#[test]
fn test_signed_directory_loads() {
    let dir = tempfile::tempdir().expect("tempdir");
    copy_models(dir.path());
    let key = SigningKey::from_bytes(&[9u8; 32]);
    sign(dir.path(), &key);

    let source = FsArtifactSource::open(dir.path(), &policy(&key)).expect("signature verifies");
    ModelBundle::load(&source).expect("loads");
}

#[test]
fn test_tampered_artifact_is_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    copy_models(dir.path());
    let key = SigningKey::from_bytes(&[9u8; 32]);
    sign(dir.path(), &key);

    let path = dir.path().join(REGRESSOR_ARTIFACT);
    let tampered = fs::read_to_string(&path)
        .expect("read")
        .replacen("\"intercept\": ", "\"intercept\": 1", 1);
    fs::write(&path, tampered).expect("write");

    let source = FsArtifactSource::open(dir.path(), &policy(&key)).expect("manifest still verifies");
    let lazy = LazyModelBundle::new(Box::new(source));
    assert!(matches!(lazy.get(), Err(PipelineError::ModelUnavailable(_))));
}

#[test]
fn test_wrong_signing_key_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    copy_models(dir.path());
    sign(dir.path(), &SigningKey::from_bytes(&[9u8; 32]));

    let other = SigningKey::from_bytes(&[3u8; 32]);
    assert!(FsArtifactSource::open(dir.path(), &policy(&other)).is_err());
}

#[test]
fn test_unsigned_directory_rejected_when_signature_required() {
    let dir = tempfile::tempdir().expect("tempdir");
    copy_models(dir.path());
    let key = SigningKey::from_bytes(&[9u8; 32]);
    assert!(FsArtifactSource::open(dir.path(), &policy(&key)).is_err());
}
