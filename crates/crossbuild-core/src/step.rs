//! Step templates: the ordered actions every job runs.

use serde::{Deserialize, Serialize};

/// The action a step performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// rustup toolchain install stable --target <target>
    InstallToolchain,

    /// cargo build --release --target <target> --target-dir <dir> (or `cross build`)
    Build,

    /// upx <level> <algorithm> <binary>, `--best --lzma` unless configured
    Compress,

    /// Hand the binary to the artifact store.
    Publish,
}

impl StepKind {
    /// Default step name for this kind.
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::InstallToolchain => "install_toolchain",
            StepKind::Build => "build",
            StepKind::Compress => "compress",
            StepKind::Publish => "publish",
        }
    }

    /// Default timeout for this kind, in seconds.
    pub fn default_timeout_secs(&self) -> u64 {
        match self {
            StepKind::InstallToolchain => 600,
            StepKind::Build => 3600,
            StepKind::Compress => 600,
            StepKind::Publish => 300,
        }
    }
}

/// Template for one step of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepTemplate {
    /// Step name, unique within a matrix definition.
    pub name: String,

    /// What the step does.
    pub kind: StepKind,

    /// A failure is recorded but does not fail the job or stop later steps.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Timeout in seconds (0 = none).
    #[serde(default)]
    pub timeout_secs: u64,
}

impl StepTemplate {
    /// Create a fatal step template for `kind` with its default name and timeout.
    pub fn from_kind(kind: StepKind) -> Self {
        Self {
            name: kind.name().to_string(),
            kind,
            continue_on_error: false,
            timeout_secs: kind.default_timeout_secs(),
        }
    }

    /// Mark this step as non-fatal.
    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    /// Override the timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// The standard release sequence: install, build, compress (non-fatal), publish.
pub fn default_steps() -> Vec<StepTemplate> {
    vec![
        StepTemplate::from_kind(StepKind::InstallToolchain),
        StepTemplate::from_kind(StepKind::Build),
        StepTemplate::from_kind(StepKind::Compress).continue_on_error(),
        StepTemplate::from_kind(StepKind::Publish),
    ]
}
