//! Build artifacts and the storage collaborator they are handed to.

pub mod fs;
pub mod memory;

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// A built binary on its way to the store. Named after its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub file_path: PathBuf,
    pub content: Vec<u8>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, file_path: impl Into<PathBuf>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            file_path: file_path.into(),
            content,
        }
    }

    /// File name the artifact is stored under (last component of `file_path`).
    pub fn file_name(&self) -> StoreResult<String> {
        self.file_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| StoreError::InvalidName(self.file_path.display().to_string()))
    }

    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.content))
    }
}

/// What remains known about an artifact after it was handed off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub file_name: String,

    /// SHA-256 of the content, hex encoded.
    pub digest: String,

    pub size_bytes: u64,
}

impl ArtifactRef {
    pub fn for_artifact(artifact: &Artifact) -> StoreResult<Self> {
        Ok(Self {
            name: artifact.name.clone(),
            file_name: artifact.file_name()?,
            digest: artifact.digest(),
            size_bytes: artifact.content.len() as u64,
        })
    }
}

/// Artifact storage keyed by artifact name.
///
/// Storing under an existing name replaces the previous artifact.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(&self, artifact: Artifact) -> StoreResult<ArtifactRef>;

    async fn get(&self, name: &str) -> StoreResult<Artifact>;

    /// All stored artifacts, ordered by name.
    async fn list(&self) -> StoreResult<Vec<ArtifactRef>>;
}

/// Reject names that would escape a directory-backed store.
pub(crate) fn validate_name(name: &str) -> StoreResult<()> {
    let path = Path::new(name);
    let single_normal_component = matches!(
        path.components().collect::<Vec<_>>().as_slice(),
        [std::path::Component::Normal(_)]
    );
    if name.is_empty() || name.contains(['/', '\\']) || !single_normal_component {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
