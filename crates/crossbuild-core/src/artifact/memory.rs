use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Artifact, ArtifactRef, ArtifactStore};
use crate::error::{StoreError, StoreResult};

/// In-memory artifact store backed by a `BTreeMap<name, artifact>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<BTreeMap<String, Artifact>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names currently stored, in order.
    pub fn names(&self) -> Vec<String> {
        let artifacts = self.artifacts.lock().unwrap_or_else(|e| e.into_inner());
        artifacts.keys().cloned().collect()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn store(&self, artifact: Artifact) -> StoreResult<ArtifactRef> {
        let reference = ArtifactRef::for_artifact(&artifact)?;
        let mut artifacts = self.artifacts.lock().unwrap_or_else(|e| e.into_inner());
        artifacts.insert(artifact.name.clone(), artifact);
        Ok(reference)
    }

    async fn get(&self, name: &str) -> StoreResult<Artifact> {
        let artifacts = self.artifacts.lock().unwrap_or_else(|e| e.into_inner());
        artifacts
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn list(&self) -> StoreResult<Vec<ArtifactRef>> {
        let artifacts = self.artifacts.lock().unwrap_or_else(|e| e.into_inner());
        artifacts.values().map(ArtifactRef::for_artifact).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_replaces_by_name() {
        let store = MemoryArtifactStore::new();
        store
            .store(Artifact::new("t", "/a/cs", b"one".to_vec()))
            .await
            .unwrap();
        store
            .store(Artifact::new("t", "/a/cs", b"two".to_vec()))
            .await
            .unwrap();

        assert_eq!(store.names(), vec!["t".to_string()]);
        assert_eq!(store.get("t").await.unwrap().content, b"two");
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_name() {
        let store = MemoryArtifactStore::new();
        for name in ["b", "a", "c"] {
            store
                .store(Artifact::new(name, "/x/cs", vec![1]))
                .await
                .unwrap();
        }
        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
