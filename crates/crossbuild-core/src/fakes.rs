//! In-process fakes for the toolchain, compiler and compressor (testing only)
//!
//! Each fake counts its calls so tests can assert which steps actually ran.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::collaborators::{BuildRequest, Compiler, CompressRequest, Compressor, Toolchain};
use crate::error::StepError;

// ---------------------------------------------------------------------------
// FakeToolchain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    Succeed,
    Fail,
    Hang,
}

/// Toolchain that succeeds, fails, or never returns.
#[derive(Debug)]
pub struct FakeToolchain {
    behaviour: Behaviour,
    calls: Arc<AtomicUsize>,
}

impl FakeToolchain {
    pub fn ok() -> Self {
        Self::with(Behaviour::Succeed)
    }

    pub fn failing() -> Self {
        Self::with(Behaviour::Fail)
    }

    pub fn hanging() -> Self {
        Self::with(Behaviour::Hang)
    }

    fn with(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn install(&self, _channel: &str, target: &str) -> Result<(), StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail => Err(StepError::Toolchain {
                target: target.to_string(),
                reason: "toolchain unavailable".to_string(),
            }),
            Behaviour::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// FakeCompiler
// ---------------------------------------------------------------------------

/// Compiler that writes a stub binary at the request's output path, or
/// writes nothing.
#[derive(Debug)]
pub struct FakeCompiler {
    workspace: Option<PathBuf>,
    failing_targets: HashSet<String>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<BuildRequest>>>,
}

impl FakeCompiler {
    /// Writes a binary into `workspace` on every successful build.
    pub fn writing(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: Some(workspace.into()),
            failing_targets: HashSet::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reports success but produces no binary.
    pub fn silent() -> Self {
        Self {
            workspace: None,
            failing_targets: HashSet::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail the build for `target`.
    pub fn failing_for(mut self, target: impl Into<String>) -> Self {
        self.failing_targets.insert(target.into());
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Arc<Mutex<Vec<BuildRequest>>> {
        self.requests.clone()
    }
}

#[async_trait]
impl Compiler for FakeCompiler {
    async fn build(&self, request: &BuildRequest) -> Result<(), StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        if self.failing_targets.contains(&request.target) {
            return Err(StepError::Build {
                target: request.target.clone(),
                reason: "error: could not compile `cs`".to_string(),
            });
        }

        if let Some(workspace) = &self.workspace {
            let path = workspace.join(&request.output_path);
            write_stub(&path, &request.target)
                .await
                .map_err(|e| StepError::Build {
                    target: request.target.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}

async fn write_stub(path: &Path, target: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, format!("binary for {}", target)).await
}

// ---------------------------------------------------------------------------
// FakeCompressor
// ---------------------------------------------------------------------------

/// Compressor that always succeeds or always fails; never touches the file.
#[derive(Debug)]
pub struct FakeCompressor {
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl FakeCompressor {
    pub fn ok() -> Self {
        Self {
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Compressor for FakeCompressor {
    async fn compress(&self, request: &CompressRequest) -> Result<(), StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StepError::Compression {
                path: request.file_path.clone(),
                reason: "NotCompressibleException".to_string(),
            });
        }
        Ok(())
    }
}
