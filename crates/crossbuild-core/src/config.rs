//! Matrix file loading and environment overrides.

use crate::error::ConfigError;
use crate::matrix::MatrixDefinition;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default artifact store location, relative to the workspace.
pub const DEFAULT_ARTIFACTS_DIR: &str = ".crossbuild/artifacts";

pub const ENV_ARTIFACTS_DIR: &str = "CROSSBUILD_ARTIFACTS_DIR";
pub const ENV_MAX_PARALLEL: &str = "CROSSBUILD_MAX_PARALLEL";

/// Everything needed to run a matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub definition: MatrixDefinition,

    /// Concurrent job limit (0 = unlimited).
    pub max_parallel: usize,

    pub artifacts_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct MatrixFile {
    #[serde(flatten)]
    definition: MatrixDefinition,

    #[serde(default)]
    max_parallel: usize,

    #[serde(default)]
    artifacts_dir: Option<PathBuf>,
}

impl RunConfig {
    pub fn new(definition: MatrixDefinition) -> Self {
        Self {
            definition,
            max_parallel: 0,
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
        }
    }

    /// Load a TOML matrix file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    /// Parse TOML matrix text; `path` is only used in error messages.
    pub fn parse(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: MatrixFile = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            definition: file.definition,
            max_parallel: file.max_parallel,
            artifacts_dir: file
                .artifacts_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACTS_DIR)),
        })
    }

    /// Apply `CROSSBUILD_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Empty or blank values count as unset.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(dir) = lookup(ENV_ARTIFACTS_DIR) {
            self.artifacts_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_MAX_PARALLEL) {
            self.max_parallel = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_MAX_PARALLEL,
                value,
            })?;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CompressionAlgorithm;
    use crate::step::StepKind;
    use std::collections::HashMap;

    const MATRIX: &str = r#"
binary_name = "cs"
max_parallel = 2

[[entries]]
target = "x86_64-unknown-linux-musl"
runs_on = "ubuntu-latest"
use_cross = true

[[entries]]
target = "x86_64-pc-windows-msvc"
runs_on = "windows-latest"
file_extension = ".exe"
enabled = false
"#;

    #[test]
    fn test_parse_matrix_file() {
        let config = RunConfig::parse(MATRIX, Path::new("matrix.toml")).expect("parse");
        let entries = &config.definition.entries;
        assert_eq!(entries.len(), 2);
        assert!(entries[0].use_cross);
        assert!(entries[0].enabled);
        assert_eq!(entries[0].file_extension, "");
        assert!(!entries[1].enabled);
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.artifacts_dir, PathBuf::from(DEFAULT_ARTIFACTS_DIR));
        assert_eq!(config.definition.target_dir, PathBuf::from("target"));
    }

    #[test]
    fn test_omitted_steps_use_default_sequence() {
        let config = RunConfig::parse(MATRIX, Path::new("matrix.toml")).expect("parse");
        let kinds: Vec<StepKind> = config.definition.steps.iter().map(|s| s.kind).collect();
        assert_eq!(kinds.len(), 4);
        assert_eq!(kinds[2], StepKind::Compress);
        assert!(config.definition.steps[2].continue_on_error);
    }

    #[test]
    fn test_custom_steps() {
        let raw = r#"
[[entries]]
target = "aarch64-apple-darwin"
runs_on = "macos-latest"

[[steps]]
name = "build"
kind = "build"

[[steps]]
name = "publish"
kind = "publish"
"#;
        let config = RunConfig::parse(raw, Path::new("m.toml")).expect("parse");
        assert_eq!(config.definition.steps.len(), 2);
        assert_eq!(config.definition.steps[1].kind, StepKind::Publish);
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = RunConfig::parse("entries = 3", Path::new("broken.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = RunConfig::load("/nonexistent/matrix.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_ARTIFACTS_DIR, "/tmp/artifacts"),
            (ENV_MAX_PARALLEL, "8"),
        ]
        .into_iter()
        .collect();
        let config = RunConfig::new(MatrixDefinition::new(vec![]))
            .apply_overrides(|v| vars.get(v).map(|s| s.to_string()))
            .expect("overrides");
        assert_eq!(config.artifacts_dir, PathBuf::from("/tmp/artifacts"));
        assert_eq!(config.max_parallel, 8);
    }

    #[test]
    fn test_blank_overrides_are_ignored() {
        let mut config = RunConfig::new(MatrixDefinition::new(vec![]));
        config.max_parallel = 3;
        let config = config
            .apply_overrides(|_| Some("  ".to_string()))
            .expect("blank values are unset");
        assert_eq!(config.max_parallel, 3);
        assert_eq!(config.artifacts_dir, PathBuf::from(DEFAULT_ARTIFACTS_DIR));
    }

    #[test]
    fn test_target_dir_and_compression_tables() {
        let raw = r#"
target_dir = "out"
artifacts_dir = "dist"

[compression]
level = "fast"
algorithm = "nrv2b"

[[entries]]
target = "x86_64-unknown-linux-musl"
runs_on = "ubuntu-latest"
"#;
        let config = RunConfig::parse(raw, Path::new("m.toml")).expect("parse");
        assert_eq!(config.definition.target_dir, PathBuf::from("out"));
        assert_eq!(config.artifacts_dir, PathBuf::from("dist"));
        assert_eq!(
            config.definition.compression.algorithm,
            CompressionAlgorithm::Nrv2b
        );
        assert!(!config.definition.compression.strip_symbols);
    }

    #[test]
    fn test_invalid_max_parallel_override() {
        let err = RunConfig::new(MatrixDefinition::new(vec![]))
            .apply_overrides(|v| (v == ENV_MAX_PARALLEL).then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                var: ENV_MAX_PARALLEL,
                ..
            }
        ));
    }
}
