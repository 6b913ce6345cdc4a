//! Artifact source port: Trait for resolving model artifacts by name.
//!
//! This trait abstracts where model blobs live (a signed directory, memory)
//! from the code that parses them into a `ModelBundle`.

/// Errors raised while resolving or verifying artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Artifact unreadable: {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Signature verification failed: {0}")]
    Signature(String),

    #[error("Malformed artifact {name}: {reason}")]
    Malformed { name: String, reason: String },
}

/// Read-only access to named model artifacts.
///
/// Implementations are consulted only while a bundle is being loaded; the
/// prediction path never touches them.
pub trait ArtifactSource: Send + Sync {
    /// Human-readable location, used in log messages.
    fn describe(&self) -> String;

    /// Read the full contents of an artifact.
    ///
    /// # Errors
    /// Returns `ArtifactError::NotFound` if no artifact has that name, or an
    /// integrity/IO error if it cannot be trusted.
    fn read(&self, name: &str) -> Result<Vec<u8>, ArtifactError>;
}
