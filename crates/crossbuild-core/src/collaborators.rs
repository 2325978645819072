//! External collaborators invoked by the pipeline steps.
//!
//! Each collaborator is a trait so jobs can run against fakes in tests; the
//! `Rustup`, `Cargo` and `Upx` implementations drive the real tools through
//! [`CommandRunner`].

use crate::artifact::ArtifactStore;
use crate::error::StepError;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Toolchain channel every job installs.
pub const TOOLCHAIN_CHANNEL: &str = "stable";

/// Compression effort.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    Fast,
    #[default]
    Best,
}

/// Compression algorithm.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompressionAlgorithm {
    Nrv2b,
    #[default]
    Lzma,
}

/// The `[compression]` table of a matrix file.
///
/// Defaults to `--best --lzma` with symbols kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompressionSettings {
    #[serde(default)]
    pub level: CompressionLevel,

    #[serde(default)]
    pub algorithm: CompressionAlgorithm,

    /// Run `strip` on the binary before compressing it.
    #[serde(default)]
    pub strip_symbols: bool,
}

/// Request to compile the binary for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub target: String,
    pub runs_on: String,
    pub release: bool,

    /// Route through the cross-compilation environment instead of the native toolchain.
    pub use_cross: bool,

    /// Passed as `--target-dir`, relative to the workspace.
    pub target_dir: PathBuf,

    /// Where the binary is expected once the build succeeds.
    pub output_path: PathBuf,
}

/// Request to compress a built binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressRequest {
    pub file_path: PathBuf,
    pub level: CompressionLevel,
    pub algorithm: CompressionAlgorithm,
    pub strip_symbols: bool,
}

impl CompressRequest {
    pub fn new(file_path: PathBuf, settings: &CompressionSettings) -> Self {
        Self {
            file_path,
            level: settings.level,
            algorithm: settings.algorithm,
            strip_symbols: settings.strip_symbols,
        }
    }
}

#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Make the compiler for `target` available on `channel`.
    async fn install(&self, channel: &str, target: &str) -> Result<(), StepError>;
}

#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile; the binary lands at the job's output path.
    async fn build(&self, request: &BuildRequest) -> Result<(), StepError>;
}

#[async_trait]
pub trait Compressor: Send + Sync {
    async fn compress(&self, request: &CompressRequest) -> Result<(), StepError>;
}

/// Everything a job needs from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub toolchain: Arc<dyn Toolchain>,
    pub compiler: Arc<dyn Compiler>,
    pub compressor: Arc<dyn Compressor>,
    pub store: Arc<dyn ArtifactStore>,
}

impl Collaborators {
    /// Real tools, building inside `workspace`.
    pub fn process(workspace: impl Into<PathBuf>, store: Arc<dyn ArtifactStore>) -> Self {
        let workspace = workspace.into();
        Self {
            toolchain: Arc::new(RustupToolchain),
            compiler: Arc::new(CargoCompiler::new(workspace.clone())),
            compressor: Arc::new(UpxCompressor::new(workspace)),
            store,
        }
    }
}

/// `rustup toolchain install <channel> --profile minimal --target <target>`
pub struct RustupToolchain;

impl RustupToolchain {
    pub fn command(channel: &str, target: &str) -> CommandSpec {
        CommandSpec::new(
            "rustup",
            [
                "toolchain",
                "install",
                channel,
                "--profile",
                "minimal",
                "--target",
                target,
            ],
        )
    }
}

#[async_trait]
impl Toolchain for RustupToolchain {
    async fn install(&self, channel: &str, target: &str) -> Result<(), StepError> {
        let fail = |reason: String| StepError::Toolchain {
            target: target.to_string(),
            reason,
        };
        let output = CommandRunner::run(&Self::command(channel, target))
            .await
            .map_err(|e| fail(e.to_string()))?;
        check(output).map_err(fail)
    }
}

/// `cargo build --release --target <t> --target-dir <dir>`, or `cross build ...`
/// when routed to cross.
pub struct CargoCompiler {
    workspace: PathBuf,
}

impl CargoCompiler {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn command(&self, request: &BuildRequest) -> CommandSpec {
        let program = if request.use_cross { "cross" } else { "cargo" };
        let mut args = vec!["build".to_string()];
        if request.release {
            args.push("--release".to_string());
        }
        args.push("--target".to_string());
        args.push(request.target.clone());
        args.push("--target-dir".to_string());
        args.push(request.target_dir.display().to_string());
        CommandSpec::new(program, args).in_dir(&self.workspace)
    }
}

#[async_trait]
impl Compiler for CargoCompiler {
    async fn build(&self, request: &BuildRequest) -> Result<(), StepError> {
        let fail = |reason: String| StepError::Build {
            target: request.target.clone(),
            reason,
        };
        let command = self.command(request);
        info!(
            triple = %request.target,
            runs_on = %request.runs_on,
            command = %command.display(),
            "Compiling"
        );
        let output = CommandRunner::run(&command)
            .await
            .map_err(|e| fail(format!("{}: {}", command.program, e)))?;
        check(output).map_err(fail)
    }
}

/// `upx --best --lzma <file>`, optionally preceded by `strip <file>`.
pub struct UpxCompressor {
    workspace: PathBuf,
}

impl UpxCompressor {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn command(&self, request: &CompressRequest) -> CommandSpec {
        let level = match request.level {
            CompressionLevel::Fast => "-1",
            CompressionLevel::Best => "--best",
        };
        let algorithm = match request.algorithm {
            CompressionAlgorithm::Nrv2b => "--nrv2b",
            CompressionAlgorithm::Lzma => "--lzma",
        };
        CommandSpec::new(
            "upx",
            [
                level.to_string(),
                algorithm.to_string(),
                request.file_path.display().to_string(),
            ],
        )
        .in_dir(&self.workspace)
    }
}

#[async_trait]
impl Compressor for UpxCompressor {
    async fn compress(&self, request: &CompressRequest) -> Result<(), StepError> {
        let fail = |reason: String| StepError::Compression {
            path: request.file_path.clone(),
            reason,
        };

        if request.strip_symbols {
            let strip = CommandSpec::new("strip", [request.file_path.display().to_string()])
                .in_dir(&self.workspace);
            let output = CommandRunner::run(&strip)
                .await
                .map_err(|e| fail(format!("strip: {}", e)))?;
            check(output).map_err(fail)?;
        }

        let output = CommandRunner::run(&self.command(request))
            .await
            .map_err(|e| fail(format!("upx: {}", e)))?;
        check(output).map_err(fail)
    }
}

fn check(output: CommandOutput) -> Result<(), String> {
    if output.success() {
        Ok(())
    } else {
        Err(output.failure_reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MUSL: &str = "x86_64-unknown-linux-musl";

    fn request(use_cross: bool) -> BuildRequest {
        BuildRequest {
            target: MUSL.to_string(),
            runs_on: "ubuntu-latest".to_string(),
            release: true,
            use_cross,
            target_dir: PathBuf::from("target"),
            output_path: PathBuf::from("target/x86_64-unknown-linux-musl/release/cs"),
        }
    }

    #[test]
    fn test_native_build_uses_cargo() {
        let compiler = CargoCompiler::new("/src");
        let command = compiler.command(&request(false));
        assert_eq!(command.program, "cargo");
        assert_eq!(
            command.args,
            vec!["build", "--release", "--target", MUSL, "--target-dir", "target"]
        );
        assert_eq!(command.current_dir, Some(PathBuf::from("/src")));
    }

    #[test]
    fn test_cross_build_routes_to_cross_with_same_args() {
        let compiler = CargoCompiler::new("/src");
        let native = compiler.command(&request(false));
        let cross = compiler.command(&request(true));
        assert_eq!(cross.program, "cross");
        assert_eq!(cross.args, native.args);
    }

    #[test]
    fn test_custom_target_dir_is_passed_to_build() {
        let mut request = request(true);
        request.target_dir = PathBuf::from("out");
        let command = CargoCompiler::new("/src").command(&request);
        assert!(command
            .args
            .ends_with(&["--target-dir".to_string(), "out".to_string()]));
    }

    #[test]
    fn test_toolchain_command() {
        let command = RustupToolchain::command(TOOLCHAIN_CHANNEL, "aarch64-apple-darwin");
        assert_eq!(command.program, "rustup");
        assert!(command.args.contains(&"stable".to_string()));
        assert!(command
            .args
            .ends_with(&["--target".to_string(), "aarch64-apple-darwin".to_string()]));
    }

    #[test]
    fn test_upx_default_command() {
        let compressor = UpxCompressor::new("/src");
        let request = CompressRequest::new(
            PathBuf::from("target/x86_64-unknown-linux-musl/release/cs"),
            &CompressionSettings::default(),
        );
        assert!(!request.strip_symbols);

        let command = compressor.command(&request);
        assert_eq!(command.program, "upx");
        assert_eq!(
            command.args,
            vec![
                "--best",
                "--lzma",
                "target/x86_64-unknown-linux-musl/release/cs"
            ]
        );
    }

    #[test]
    fn test_upx_fast_nrv2b_command() {
        let settings = CompressionSettings {
            level: CompressionLevel::Fast,
            algorithm: CompressionAlgorithm::Nrv2b,
            strip_symbols: true,
        };
        let request = CompressRequest::new(PathBuf::from("cs"), &settings);
        assert!(request.strip_symbols);

        let command = UpxCompressor::new("/src").command(&request);
        assert_eq!(command.args, vec!["-1", "--nrv2b", "cs"]);
    }

    #[test]
    fn test_compression_settings_from_toml() {
        let settings: CompressionSettings =
            toml::from_str("level = \"fast\"\nstrip_symbols = true").expect("parse");
        assert_eq!(settings.level, CompressionLevel::Fast);
        assert_eq!(settings.algorithm, CompressionAlgorithm::Lzma);
        assert!(settings.strip_symbols);
    }
}
