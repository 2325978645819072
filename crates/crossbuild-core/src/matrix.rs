//! Build matrix definition and expansion into job descriptors.

use crate::collaborators::CompressionSettings;
use crate::error::ConfigError;
use crate::step::{default_steps, StepKind, StepTemplate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::PathBuf;
use uuid::Uuid;

/// Default name of the binary produced by the build step.
pub const DEFAULT_BINARY_NAME: &str = "cs";

/// Default cargo target directory, relative to the workspace.
pub const DEFAULT_TARGET_DIR: &str = "target";

/// One row of the build matrix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatrixEntry {
    /// Platform triple, e.g. `x86_64-unknown-linux-musl`.
    #[serde(default)]
    pub target: String,

    /// Execution environment label, e.g. `ubuntu-latest`.
    #[serde(default)]
    pub runs_on: String,

    /// Route the build through the cross-compilation environment.
    #[serde(default)]
    pub use_cross: bool,

    /// Suffix of the produced binary, e.g. `.exe`.
    #[serde(default)]
    pub file_extension: String,

    /// Disabled rows are dropped during expansion.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Explicit location of the built binary, relative to the workspace.
    #[serde(default)]
    pub output_path: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

impl MatrixEntry {
    /// Create an enabled native entry.
    pub fn new(target: impl Into<String>, runs_on: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            runs_on: runs_on.into(),
            use_cross: false,
            file_extension: String::new(),
            enabled: true,
            output_path: None,
        }
    }

    /// Build through the cross-compilation environment.
    pub fn with_cross(mut self) -> Self {
        self.use_cross = true;
        self
    }

    /// Set the binary file extension.
    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.file_extension = ext.into();
        self
    }

    /// Override where the build leaves the binary.
    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Disable this entry.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A complete build matrix plus the step templates every job runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatrixDefinition {
    #[serde(default)]
    pub entries: Vec<MatrixEntry>,

    #[serde(default = "default_steps")]
    pub steps: Vec<StepTemplate>,

    #[serde(default = "default_binary_name")]
    pub binary_name: String,

    /// Cargo target directory, relative to the workspace.
    #[serde(default = "default_target_dir")]
    pub target_dir: PathBuf,

    /// Settings for every compress step.
    #[serde(default)]
    pub compression: CompressionSettings,
}

fn default_binary_name() -> String {
    DEFAULT_BINARY_NAME.to_string()
}

fn default_target_dir() -> PathBuf {
    PathBuf::from(DEFAULT_TARGET_DIR)
}

impl MatrixDefinition {
    /// Create a definition with the default step sequence.
    pub fn new(entries: Vec<MatrixEntry>) -> Self {
        Self {
            entries,
            steps: default_steps(),
            binary_name: default_binary_name(),
            target_dir: default_target_dir(),
            compression: CompressionSettings::default(),
        }
    }

    /// Replace the step sequence.
    pub fn with_steps(mut self, steps: Vec<StepTemplate>) -> Self {
        self.steps = steps;
        self
    }

    /// Set the name of the built binary.
    pub fn with_binary_name(mut self, name: impl Into<String>) -> Self {
        self.binary_name = name.into();
        self
    }

    /// Build into `dir` instead of `target`.
    pub fn with_target_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target_dir = dir.into();
        self
    }

    /// Path the build is expected to produce for `entry`.
    pub fn output_path_for(&self, entry: &MatrixEntry) -> PathBuf {
        match &entry.output_path {
            Some(path) => path.clone(),
            None => self
                .target_dir
                .join(&entry.target)
                .join("release")
                .join(format!("{}{}", self.binary_name, entry.file_extension)),
        }
    }

    /// SHA-256 over enabled targets and step names, in order.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for entry in self.entries.iter().filter(|e| e.enabled) {
            hasher.update(entry.target.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(b"\x01");
        for step in &self.steps {
            hasher.update(step.name.as_bytes());
            hasher.update(b"\0");
        }
        hex::encode(hasher.finalize())
    }
}

/// A concrete job: one enabled matrix row plus its resolved steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobDescriptor {
    pub job_id: Uuid,
    pub entry: MatrixEntry,
    pub steps: Vec<StepTemplate>,

    /// Cargo target directory handed to the build step.
    pub target_dir: PathBuf,

    /// Where the build leaves the binary and where publish picks it up.
    pub output_path: PathBuf,

    pub compression: CompressionSettings,
}

impl JobDescriptor {
    pub fn target(&self) -> &str {
        &self.entry.target
    }
}

/// Expand a matrix into one descriptor per enabled row, in matrix order.
///
/// Every row, disabled or not, must carry a `target` and `runs_on`, and
/// targets must be unique across the whole matrix.
pub fn expand_matrix(definition: &MatrixDefinition) -> Result<Vec<JobDescriptor>, ConfigError> {
    if definition.steps.is_empty() {
        return Err(ConfigError::EmptySteps);
    }

    let mut step_names = HashSet::new();
    let mut published = false;
    for step in &definition.steps {
        if !step_names.insert(step.name.as_str()) {
            return Err(ConfigError::DuplicateStep {
                name: step.name.clone(),
            });
        }
        if published && !step.continue_on_error {
            return Err(ConfigError::FatalStepAfterPublish {
                name: step.name.clone(),
            });
        }
        published |= step.kind == StepKind::Publish;
    }

    let mut targets = HashSet::new();
    for (index, entry) in definition.entries.iter().enumerate() {
        if entry.target.trim().is_empty() {
            return Err(ConfigError::MissingField {
                index,
                field: "target",
            });
        }
        if entry.runs_on.trim().is_empty() {
            return Err(ConfigError::MissingField {
                index,
                field: "runs_on",
            });
        }
        if !targets.insert(entry.target.as_str()) {
            return Err(ConfigError::DuplicateTarget {
                target: entry.target.clone(),
            });
        }
    }

    Ok(definition
        .entries
        .iter()
        .filter(|entry| entry.enabled)
        .map(|entry| JobDescriptor {
            job_id: Uuid::new_v4(),
            entry: entry.clone(),
            steps: definition.steps.clone(),
            target_dir: definition.target_dir.clone(),
            output_path: definition.output_path_for(entry),
            compression: definition.compression.clone(),
        })
        .collect())
}
