//! Error types for matrix expansion, step execution and artifact storage.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or expanding a build matrix.
///
/// Any of these aborts the run before a single job starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A matrix row is missing a required field.
    #[error("matrix entry #{index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    /// Two matrix rows share the same target.
    #[error("duplicate target in matrix: {target}")]
    DuplicateTarget { target: String },

    /// Two step templates share the same name.
    #[error("duplicate step name: {name}")]
    DuplicateStep { name: String },

    /// The step template list is empty.
    #[error("step template list is empty")]
    EmptySteps,

    /// A fatal step follows the publish step, so a failed job could leave a
    /// published artifact behind.
    #[error("step '{name}' runs after publish and must set continue_on_error")]
    FatalStepAfterPublish { name: String },

    /// The matrix file could not be read.
    #[error("failed to read matrix file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The matrix file is not valid TOML for a matrix definition.
    #[error("failed to parse matrix file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// An environment override carries an unusable value.
    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Errors produced by a single pipeline step.
///
/// These never escape a job; they are recorded in its `JobResult`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    #[error("toolchain install failed for {target}: {reason}")]
    Toolchain { target: String, reason: String },

    #[error("build failed for {target}: {reason}")]
    Build { target: String, reason: String },

    #[error("compression failed for {path}: {reason}")]
    Compression { path: PathBuf, reason: String },

    #[error("publish failed for {target}: {reason}")]
    Publish { target: String, reason: String },
}

/// Errors from the artifact storage collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Convenience result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_target_displays_target() {
        let err = ConfigError::DuplicateTarget {
            target: "x86_64-unknown-linux-musl".to_string(),
        };
        assert!(err.to_string().contains("x86_64-unknown-linux-musl"));
    }

    #[test]
    fn test_missing_field_displays_index_and_field() {
        let err = ConfigError::MissingField {
            index: 2,
            field: "runs_on",
        };
        let msg = err.to_string();
        assert!(msg.contains("#2"));
        assert!(msg.contains("runs_on"));
    }

    #[test]
    fn test_step_error_displays_reason() {
        let err = StepError::Build {
            target: "aarch64-apple-darwin".to_string(),
            reason: "exit code 101".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("aarch64-apple-darwin"));
        assert!(msg.contains("exit code 101"));
    }
}
