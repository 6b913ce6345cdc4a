//! Runtime configuration for the binaries.
//!
//! Sources, later ones win:
//! 1. Built-in defaults
//! 2. TOML file (`--config` or `CKD_CONFIG`)
//! 3. `CKD_*` environment variables
//!
//! | Variable                            | Field                 |
//! |-------------------------------------|-----------------------|
//! | `CKD_MODEL_DIR`                     | `model_dir`           |
//! | `CKD_REQUIRE_SIGNATURE`             | `require_signature`   |
//! | `CKD_MODEL_SIGNING_PUBKEY_B64_FILE` | `verifying_key_file`  |
//! | `CKD_LOG_MODE`                      | `log_mode`            |
//! | `CKD_LOG_FILE`                      | `log_file`            |
//! | `CKD_SANITIZE_MAX_BYTES`            | `sanitize_max_bytes`  |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::adapters::SignaturePolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Verifying key unusable: {0}")]
    VerifyingKey(String),
}

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    /// stderr, so stdout stays clean for JSON results
    #[default]
    Stderr,
    Stdout,
    File,
}

impl std::str::FromStr for LogMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stderr" => Ok(Self::Stderr),
            "stdout" => Ok(Self::Stdout),
            "file" => Ok(Self::File),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SentinelConfig {
    /// Directory holding the model artifacts and `manifest.json`
    pub model_dir: PathBuf,
    /// Refuse to load an unsigned model directory
    pub require_signature: bool,
    /// File holding the base64 Ed25519 public key for `model.sig`
    pub verifying_key_file: Option<PathBuf>,
    pub log_mode: LogMode,
    pub log_file: PathBuf,
    /// Per-call byte cap for log sanitization
    pub sanitize_max_bytes: usize,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            require_signature: false,
            verifying_key_file: None,
            log_mode: LogMode::default(),
            log_file: PathBuf::from("ckd-sentinel.log"),
            sanitize_max_bytes: 16 * 1024,
        }
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Ok(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

impl SentinelConfig {
    /// Load defaults, then the optional TOML file, then the process environment.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or an
    /// environment override has an invalid value.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or is not valid TOML for
    /// this struct.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `CKD_*` overrides from `lookup`.
    ///
    /// # Errors
    /// Returns `InvalidValue` for unparseable overrides.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("CKD_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CKD_REQUIRE_SIGNATURE") {
            self.require_signature = parse_bool("CKD_REQUIRE_SIGNATURE", &v)?;
        }
        if let Some(v) = lookup("CKD_MODEL_SIGNING_PUBKEY_B64_FILE") {
            self.verifying_key_file = Some(PathBuf::from(v.trim()));
        }
        if let Some(v) = lookup("CKD_LOG_MODE") {
            self.log_mode = v.parse().map_err(|()| ConfigError::InvalidValue {
                key: "CKD_LOG_MODE",
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("CKD_LOG_FILE") {
            self.log_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("CKD_SANITIZE_MAX_BYTES") {
            self.sanitize_max_bytes =
                v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "CKD_SANITIZE_MAX_BYTES",
                    value: v.clone(),
                })?;
        }
        Ok(())
    }

    /// # Errors
    /// Returns `InvalidValue` for settings that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sanitize_max_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sanitize_max_bytes",
                value: "0".into(),
            });
        }
        if self.require_signature && self.verifying_key_file.is_none() {
            return Err(ConfigError::InvalidValue {
                key: "verifying_key_file",
                value: "required when require_signature is set".into(),
            });
        }
        Ok(())
    }

    /// Signature policy for opening `model_dir`.
    ///
    /// # Errors
    /// Returns an error if the verifying key file cannot be read or decoded.
    pub fn signature_policy(&self) -> Result<SignaturePolicy, ConfigError> {
        let verifying_key = match &self.verifying_key_file {
            Some(path) => {
                let b64 = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Some(
                    SignaturePolicy::verifying_key_from_b64(&b64)
                        .map_err(|e| ConfigError::VerifyingKey(e.to_string()))?,
                )
            }
            None => None,
        };
        Ok(SignaturePolicy {
            require_signature: self.require_signature,
            verifying_key,
        })
    }
}
