//! In-memory artifact source, for tests and for embedding a bundle in a
//! host process that already holds the artifact bytes.

use std::collections::BTreeMap;

use crate::ports::{ArtifactError, ArtifactSource};

#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactSource {
    label: String,
    artifacts: BTreeMap<String, Vec<u8>>,
}

impl MemoryArtifactSource {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            artifacts: BTreeMap::new(),
        }
    }

    /// Add or replace an artifact.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.artifacts.insert(name.into(), bytes.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.artifacts.remove(name)
    }
}

impl ArtifactSource for MemoryArtifactSource {
    fn describe(&self) -> String {
        format!("memory:{}", self.label)
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, ArtifactError> {
        self.artifacts
            .get(name)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(name.to_string()))
    }
}
