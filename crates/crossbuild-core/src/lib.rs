//! crossbuild - multi-target build & release orchestration
//!
//! Expands a declarative build matrix into independent jobs and runs each
//! job's step sequence:
//! - install the toolchain for the target
//! - build natively or through `cross`
//! - compress the binary (non-fatal)
//! - publish the binary to the artifact store under the target's name
//!
//! Jobs run concurrently with fail-fast disabled; failures are reported as
//! data in the per-target result map.

pub mod artifact;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod fakes;
pub mod job;
pub mod matrix;
pub mod orchestrator;
pub mod report;
pub mod runner;
pub mod step;
pub mod telemetry;

// Re-export key types
pub use artifact::fs::FsArtifactStore;
pub use artifact::memory::MemoryArtifactStore;
pub use artifact::{Artifact, ArtifactRef, ArtifactStore};
pub use collaborators::{
    BuildRequest, CargoCompiler, Collaborators, Compiler, CompressRequest, CompressionSettings,
    Compressor, RustupToolchain, Toolchain, UpxCompressor, TOOLCHAIN_CHANNEL,
};
pub use config::RunConfig;
pub use error::{ConfigError, StepError, StoreError};
pub use job::{JobOutcome, JobResult, JobRunner, JobState, StepOutcome, StepResult};
pub use matrix::{expand_matrix, JobDescriptor, MatrixDefinition, MatrixEntry};
pub use orchestrator::{CancelSignal, Orchestrator, RunResults};
pub use report::RunReport;
pub use runner::{CommandOutput, CommandRunner, CommandSpec};
pub use step::{default_steps, StepKind, StepTemplate};
pub use telemetry::init_tracing;

/// crossbuild version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
