//! Filesystem artifact source: a model directory bound by a manifest.
//!
//! # Security
//!
//! - `manifest.json` binds every artifact by SHA-256; unbound or modified
//!   files are refused
//! - When a verifying key is configured, `model.sig` (Ed25519 over the exact
//!   manifest bytes) is checked before the manifest is trusted
//! - With `require_signature`, a missing signature or key is fatal
//!
//! Verification happens once in [`FsArtifactSource::open`] and again per file
//! on [`ArtifactSource::read`], so a file swapped after startup is still
//! caught at load time.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ports::{ArtifactError, ArtifactSource};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SIGNATURE_FILE: &str = "model.sig";

/// Manifest written by `sign_model`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: u32,
    #[serde(default)]
    pub serial: Option<u64>,
    #[serde(default)]
    pub created_at: Option<i64>,
    /// Relative file name -> lowercase hex SHA-256
    pub files: BTreeMap<String, String>,
}

/// How strictly signatures are enforced.
#[derive(Debug, Clone, Default)]
pub struct SignaturePolicy {
    pub require_signature: bool,
    pub verifying_key: Option<VerifyingKey>,
}

impl SignaturePolicy {
    /// Parse a base64-encoded 32-byte Ed25519 public key.
    ///
    /// # Errors
    /// Returns `ArtifactError::Signature` for bad encoding or length.
    pub fn verifying_key_from_b64(b64: &str) -> Result<VerifyingKey, ArtifactError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64.trim())
            .map_err(|_| ArtifactError::Signature("invalid public key base64".into()))?;
        let raw: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            ArtifactError::Signature("invalid public key length (expected 32 bytes)".into())
        })?;
        VerifyingKey::from_bytes(&raw)
            .map_err(|_| ArtifactError::Signature("invalid verifying key".into()))
    }
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().map(|b| format!("{b:02x}")).collect()
}

// Constant-time compare for ASCII strings (used for SHA-256 hex digests).
fn constant_time_eq_str(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn read_file(path: &Path, name: &str) -> Result<Vec<u8>, ArtifactError> {
    fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ArtifactError::NotFound(name.to_string())
        } else {
            ArtifactError::Io {
                name: name.to_string(),
                source,
            }
        }
    })
}

/// Model directory whose contents are bound by a verified manifest.
#[derive(Debug)]
pub struct FsArtifactSource {
    dir: PathBuf,
    manifest: ModelManifest,
    signed: bool,
}

impl FsArtifactSource {
    /// Open a model directory and verify its manifest.
    ///
    /// # Errors
    /// Returns an error if the manifest is missing or malformed, the signature
    /// check fails, or the policy requires a signature that is not present.
    pub fn open(dir: impl Into<PathBuf>, policy: &SignaturePolicy) -> Result<Self, ArtifactError> {
        let dir = dir.into();
        let manifest_bytes = read_file(&dir.join(MANIFEST_FILE), MANIFEST_FILE)?;

        let signed = Self::verify_signature(&dir, &manifest_bytes, policy)?;

        let manifest: ModelManifest =
            serde_json::from_slice(&manifest_bytes).map_err(|e| ArtifactError::Malformed {
                name: MANIFEST_FILE.into(),
                reason: e.to_string(),
            })?;
        if manifest.version != 1 {
            return Err(ArtifactError::Malformed {
                name: MANIFEST_FILE.into(),
                reason: format!("unsupported manifest version {}", manifest.version),
            });
        }
        if manifest.files.is_empty() {
            return Err(ArtifactError::Malformed {
                name: MANIFEST_FILE.into(),
                reason: "manifest binds no files".into(),
            });
        }
        if let Some(bad) = manifest
            .files
            .keys()
            .find(|rel| rel.contains("..") || Path::new(rel.as_str()).is_absolute())
        {
            return Err(ArtifactError::Integrity(format!(
                "manifest entry {bad:?} escapes the model directory"
            )));
        }

        tracing::info!(
            "Opened model directory {:?} ({} artifacts, signed={})",
            dir,
            manifest.files.len(),
            signed
        );

        Ok(Self {
            dir,
            manifest,
            signed,
        })
    }

    fn verify_signature(
        dir: &Path,
        manifest_bytes: &[u8],
        policy: &SignaturePolicy,
    ) -> Result<bool, ArtifactError> {
        let sig_path = dir.join(SIGNATURE_FILE);
        let Some(key) = policy.verifying_key.as_ref() else {
            if policy.require_signature {
                return Err(ArtifactError::Signature(
                    "signature required but no verifying key configured".into(),
                ));
            }
            tracing::warn!("No model verifying key configured; relying on manifest hashes only");
            return Ok(false);
        };

        if !sig_path.exists() {
            if policy.require_signature {
                return Err(ArtifactError::Signature(format!(
                    "signature required but {SIGNATURE_FILE} is missing"
                )));
            }
            tracing::warn!("Model directory is not signed; relying on manifest hashes only");
            return Ok(false);
        }

        let sig_bytes = read_file(&sig_path, SIGNATURE_FILE)?;
        let raw: [u8; 64] = sig_bytes.as_slice().try_into().map_err(|_| {
            ArtifactError::Signature("invalid signature length (expected 64 bytes)".into())
        })?;
        key.verify(manifest_bytes, &Signature::from_bytes(&raw))
            .map_err(|_| ArtifactError::Signature("manifest signature does not verify".into()))?;

        tracing::info!("Model manifest signature verified");
        Ok(true)
    }

    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.signed
    }
}

impl ArtifactSource for FsArtifactSource {
    fn describe(&self) -> String {
        format!("{}", self.dir.display())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, ArtifactError> {
        let expected = self.manifest.files.get(name).ok_or_else(|| {
            ArtifactError::Integrity(format!("{name} is not bound by {MANIFEST_FILE}"))
        })?;
        let bytes = read_file(&self.dir.join(name), name)?;
        if !constant_time_eq_str(&sha256_hex(&bytes), &expected.to_ascii_lowercase()) {
            return Err(ArtifactError::Integrity(format!("hash mismatch for {name}")));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::RngCore;
    use tempfile::tempdir;

    fn write_manifest(dir: &Path, files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut map = BTreeMap::new();
        for (rel, contents) in files {
            std::fs::write(dir.join(rel), contents).expect("write artifact");
            map.insert((*rel).to_string(), sha256_hex(contents));
        }
        let manifest = ModelManifest {
            version: 1,
            serial: Some(7),
            created_at: Some(1_700_000_000),
            files: map,
        };
        let bytes = serde_json::to_vec(&manifest).expect("serialize manifest");
        std::fs::write(dir.join(MANIFEST_FILE), &bytes).expect("write manifest");
        bytes
    }

    fn signing_key() -> SigningKey {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        SigningKey::from_bytes(&seed)
    }

    #[test]
    fn test_reads_bound_artifact() {
        let temp = tempdir().expect("tempdir");
        write_manifest(temp.path(), &[("a.json", b"{}")]);

        let source = FsArtifactSource::open(temp.path(), &SignaturePolicy::default())
            .expect("open model dir");
        assert_eq!(source.read("a.json").expect("read"), b"{}");
        assert!(!source.is_signed());
    }

    #[test]
    fn test_refuses_tampered_and_unbound_files() {
        let temp = tempdir().expect("tempdir");
        write_manifest(temp.path(), &[("a.json", b"{}")]);
        std::fs::write(temp.path().join("a.json"), b"{\"x\":1}").expect("tamper");
        std::fs::write(temp.path().join("b.json"), b"{}").expect("extra file");

        let source = FsArtifactSource::open(temp.path(), &SignaturePolicy::default())
            .expect("open model dir");
        assert!(matches!(source.read("a.json"), Err(ArtifactError::Integrity(_))));
        assert!(matches!(source.read("b.json"), Err(ArtifactError::Integrity(_))));
    }

    #[test]
    fn test_missing_bound_file_is_not_found() {
        let temp = tempdir().expect("tempdir");
        write_manifest(temp.path(), &[("a.json", b"{}")]);
        std::fs::remove_file(temp.path().join("a.json")).expect("remove");

        let source = FsArtifactSource::open(temp.path(), &SignaturePolicy::default())
            .expect("open model dir");
        assert!(matches!(source.read("a.json"), Err(ArtifactError::NotFound(_))));
    }

    #[test]
    fn test_signature_verification() {
        let temp = tempdir().expect("tempdir");
        let manifest = write_manifest(temp.path(), &[("a.json", b"{}")]);
        let key = signing_key();
        let sig: Signature = key.sign(&manifest);
        std::fs::write(temp.path().join(SIGNATURE_FILE), sig.to_bytes()).expect("write sig");

        let policy = SignaturePolicy {
            require_signature: true,
            verifying_key: Some(key.verifying_key()),
        };
        let source = FsArtifactSource::open(temp.path(), &policy).expect("signed dir opens");
        assert!(source.is_signed());

        let other = SignaturePolicy {
            require_signature: true,
            verifying_key: Some(signing_key().verifying_key()),
        };
        let err = FsArtifactSource::open(temp.path(), &other).expect_err("wrong key must fail");
        assert!(matches!(err, ArtifactError::Signature(_)));
    }

    #[test]
    fn test_required_signature_missing() {
        let temp = tempdir().expect("tempdir");
        write_manifest(temp.path(), &[("a.json", b"{}")]);
        let policy = SignaturePolicy {
            require_signature: true,
            verifying_key: Some(signing_key().verifying_key()),
        };
        let err = FsArtifactSource::open(temp.path(), &policy).expect_err("must fail closed");
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_rejects_path_escape() {
        let temp = tempdir().expect("tempdir");
        let manifest = ModelManifest {
            version: 1,
            serial: None,
            created_at: None,
            files: BTreeMap::from([("../secret".to_string(), "00".to_string())]),
        };
        std::fs::write(
            temp.path().join(MANIFEST_FILE),
            serde_json::to_vec(&manifest).expect("serialize"),
        )
        .expect("write manifest");
        assert!(FsArtifactSource::open(temp.path(), &SignaturePolicy::default()).is_err());
    }

    #[test]
    fn test_verifying_key_from_b64() {
        let key = signing_key().verifying_key();
        let b64 = base64::engine::general_purpose::STANDARD.encode(key.to_bytes());
        let parsed = SignaturePolicy::verifying_key_from_b64(&b64).expect("valid key");
        assert_eq!(parsed, key);
        assert!(SignaturePolicy::verifying_key_from_b64("AAAA").is_err());
    }
}
