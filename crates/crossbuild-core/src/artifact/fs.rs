use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use super::{validate_name, Artifact, ArtifactRef, ArtifactStore};
use crate::error::{StoreError, StoreResult};

const METADATA_FILE: &str = "artifact.json";

/// Directory-backed artifact store.
///
/// Layout: `<root>/<artifact name>/<file name>` plus `<root>/<artifact name>/artifact.json`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_sync(root: &Path, artifact: &Artifact) -> StoreResult<ArtifactRef> {
        validate_name(&artifact.name)?;
        let reference = ArtifactRef::for_artifact(artifact)?;
        validate_name(&reference.file_name)?;

        let dir = root.join(&artifact.name);
        fs::create_dir_all(&dir)?;

        let previous = Self::read_ref(&dir).ok();

        write_atomic(&dir, &dir.join(&reference.file_name), &artifact.content)?;
        write_atomic(
            &dir,
            &dir.join(METADATA_FILE),
            &serde_json::to_vec_pretty(&reference)?,
        )?;

        if let Some(old) = previous {
            if old.file_name != reference.file_name {
                let _ = fs::remove_file(dir.join(&old.file_name));
            }
        }

        Ok(reference)
    }

    fn read_ref(dir: &Path) -> StoreResult<ArtifactRef> {
        let bytes = fs::read(dir.join(METADATA_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn get_sync(root: &Path, name: &str) -> StoreResult<Artifact> {
        validate_name(name)?;
        let dir = root.join(name);
        let reference = Self::read_ref(&dir).map_err(|e| match e {
            StoreError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                StoreError::NotFound(name.to_string())
            }
            other => other,
        })?;
        let file_path = dir.join(&reference.file_name);
        let content = fs::read(&file_path)?;
        Ok(Artifact::new(name, file_path, content))
    }

    fn list_sync(root: &Path) -> StoreResult<Vec<ArtifactRef>> {
        let mut refs = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match Self::read_ref(&entry.path()) {
                Ok(reference) => refs.push(reference),
                Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(refs)
    }
}

/// Write to a temp file in `dir`, then rename over `path`.
fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> StoreResult<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store(&self, artifact: Artifact) -> StoreResult<ArtifactRef> {
        let root = self.root.clone();
        blocking(move || Self::store_sync(&root, &artifact)).await
    }

    async fn get(&self, name: &str) -> StoreResult<Artifact> {
        let root = self.root.clone();
        let name = name.to_string();
        blocking(move || Self::get_sync(&root, &name)).await
    }

    async fn list(&self) -> StoreResult<Vec<ArtifactRef>> {
        let root = self.root.clone();
        blocking(move || Self::list_sync(&root)).await
    }
}
