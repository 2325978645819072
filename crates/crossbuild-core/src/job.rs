//! Execution of one job's step sequence.

use crate::artifact::{Artifact, ArtifactRef};
use crate::collaborators::{BuildRequest, Collaborators, CompressRequest, TOOLCHAIN_CHANNEL};
use crate::error::StepError;
use crate::matrix::JobDescriptor;
use crate::step::{StepKind, StepTemplate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed,
    Skipped,
}

/// Overall outcome of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed,

    /// The run was cancelled before this job was launched.
    Cancelled,
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Installing,
    Building,
    Compressing,
    Publishing,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    fn for_step(kind: StepKind) -> Self {
        match kind {
            StepKind::InstallToolchain => JobState::Installing,
            StepKind::Build => JobState::Building,
            StepKind::Compress => JobState::Compressing,
            StepKind::Publish => JobState::Publishing,
        }
    }
}

/// A recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateTransition {
    pub state: JobState,
    pub at: DateTime<Utc>,
}

/// Result of one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepResult {
    pub step_name: String,
    pub outcome: StepOutcome,
    pub continue_on_error: bool,

    /// Error message when the step failed.
    pub error: Option<String>,

    pub duration_ms: u64,
}

impl StepResult {
    fn skipped(template: &StepTemplate) -> Self {
        Self {
            step_name: template.name.clone(),
            outcome: StepOutcome::Skipped,
            continue_on_error: template.continue_on_error,
            error: None,
            duration_ms: 0,
        }
    }

    /// A failure that does not count against the job.
    pub fn is_warning(&self) -> bool {
        self.outcome == StepOutcome::Failed && self.continue_on_error
    }
}

/// Result of a whole job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobResult {
    pub job_id: Uuid,
    pub target: String,
    pub runs_on: String,
    pub outcome: JobOutcome,
    pub steps: Vec<StepResult>,
    pub transitions: Vec<StateTransition>,

    /// Present only when the publish step handed an artifact to the store.
    pub artifact: Option<ArtifactRef>,

    pub duration_ms: u64,
}

impl JobResult {
    /// Result for a job that never launched.
    pub fn cancelled(descriptor: &JobDescriptor) -> Self {
        let now = Utc::now();
        Self {
            job_id: descriptor.job_id,
            target: descriptor.entry.target.clone(),
            runs_on: descriptor.entry.runs_on.clone(),
            outcome: JobOutcome::Cancelled,
            steps: descriptor.steps.iter().map(StepResult::skipped).collect(),
            transitions: vec![
                StateTransition {
                    state: JobState::Pending,
                    at: now,
                },
                StateTransition {
                    state: JobState::Cancelled,
                    at: now,
                },
            ],
            artifact: None,
            duration_ms: 0,
        }
    }

    /// Result for a job whose task died before reporting.
    pub fn aborted(descriptor: &JobDescriptor, reason: impl Into<String>) -> Self {
        let mut result = Self::cancelled(descriptor);
        result.outcome = JobOutcome::Failed;
        if let Some(last) = result.transitions.last_mut() {
            last.state = JobState::Failed;
        }
        if let Some(first) = result.steps.first_mut() {
            first.outcome = StepOutcome::Failed;
            first.error = Some(reason.into());
        }
        result
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == JobOutcome::Succeeded
    }

    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_name == name)
    }

    /// Number of steps that failed without failing the job.
    pub fn warning_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_warning()).count()
    }

    pub fn final_state(&self) -> Option<JobState> {
        self.transitions.last().map(|t| t.state)
    }
}

/// Runs a job's steps strictly in order against a set of collaborators.
#[derive(Clone)]
pub struct JobRunner {
    collaborators: Collaborators,
    workspace: PathBuf,
}

impl JobRunner {
    pub fn new(collaborators: Collaborators, workspace: impl Into<PathBuf>) -> Self {
        Self {
            collaborators,
            workspace: workspace.into(),
        }
    }

    /// Execute every step of `descriptor`.
    ///
    /// A failing step without `continue_on_error` ends the job: later steps
    /// are recorded as skipped and never run. Job failures are returned as
    /// data, never as `Err`.
    pub async fn run_job(&self, descriptor: &JobDescriptor) -> JobResult {
        let start = Instant::now();
        let target = descriptor.target();
        let mut transitions = vec![StateTransition {
            state: JobState::Pending,
            at: Utc::now(),
        }];
        let mut steps = Vec::with_capacity(descriptor.steps.len());
        let mut artifact = None;
        let mut failed = false;

        info!(
            job_id = %descriptor.job_id,
            triple = %target,
            runs_on = %descriptor.entry.runs_on,
            use_cross = descriptor.entry.use_cross,
            "Starting job"
        );

        for template in &descriptor.steps {
            if failed {
                steps.push(StepResult::skipped(template));
                continue;
            }

            transitions.push(StateTransition {
                state: JobState::for_step(template.kind),
                at: Utc::now(),
            });
            info!(triple = %target, step = %template.name, "Executing step");

            let step_start = Instant::now();
            let result = self.execute_step(template, descriptor).await;
            let duration_ms = step_start.elapsed().as_millis() as u64;

            let (outcome, error_message) = match result {
                Ok(published) => {
                    if published.is_some() {
                        artifact = published;
                    }
                    (StepOutcome::Succeeded, None)
                }
                Err(e) if template.continue_on_error => {
                    warn!(
                        triple = %target,
                        step = %template.name,
                        error = %e,
                        "Step failed, continuing"
                    );
                    (StepOutcome::Failed, Some(e.to_string()))
                }
                Err(e) => {
                    error!(triple = %target, step = %template.name, error = %e, "Step failed");
                    failed = true;
                    (StepOutcome::Failed, Some(e.to_string()))
                }
            };

            steps.push(StepResult {
                step_name: template.name.clone(),
                outcome,
                continue_on_error: template.continue_on_error,
                error: error_message,
                duration_ms,
            });
        }

        let (outcome, final_state) = if failed {
            (JobOutcome::Failed, JobState::Failed)
        } else {
            (JobOutcome::Succeeded, JobState::Succeeded)
        };
        transitions.push(StateTransition {
            state: final_state,
            at: Utc::now(),
        });

        info!(triple = %target, outcome = ?outcome, "Job finished");

        JobResult {
            job_id: descriptor.job_id,
            target: target.to_string(),
            runs_on: descriptor.entry.runs_on.clone(),
            outcome,
            steps,
            transitions,
            artifact,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn execute_step(
        &self,
        template: &StepTemplate,
        descriptor: &JobDescriptor,
    ) -> Result<Option<ArtifactRef>, StepError> {
        let step = self.dispatch(template.kind, descriptor);
        if template.timeout_secs == 0 {
            return step.await;
        }

        tokio::time::timeout(Duration::from_secs(template.timeout_secs), step)
            .await
            .unwrap_or_else(|_| {
                Err(step_error(
                    template.kind,
                    descriptor,
                    &self.binary_path(descriptor),
                    format!("timed out after {} seconds", template.timeout_secs),
                ))
            })
    }

    async fn dispatch(
        &self,
        kind: StepKind,
        descriptor: &JobDescriptor,
    ) -> Result<Option<ArtifactRef>, StepError> {
        let entry = &descriptor.entry;
        match kind {
            StepKind::InstallToolchain => {
                self.collaborators
                    .toolchain
                    .install(TOOLCHAIN_CHANNEL, &entry.target)
                    .await?;
                Ok(None)
            }
            StepKind::Build => {
                let request = BuildRequest {
                    target: entry.target.clone(),
                    runs_on: entry.runs_on.clone(),
                    release: true,
                    use_cross: entry.use_cross,
                    target_dir: descriptor.target_dir.clone(),
                    output_path: descriptor.output_path.clone(),
                };
                self.collaborators.compiler.build(&request).await?;
                Ok(None)
            }
            StepKind::Compress => {
                let request =
                    CompressRequest::new(self.binary_path(descriptor), &descriptor.compression);
                self.collaborators.compressor.compress(&request).await?;
                Ok(None)
            }
            StepKind::Publish => self.publish(descriptor).await.map(Some),
        }
    }

    async fn publish(&self, descriptor: &JobDescriptor) -> Result<ArtifactRef, StepError> {
        let target = descriptor.target();
        let fail = |reason: String| StepError::Publish {
            target: target.to_string(),
            reason,
        };

        let path = self.binary_path(descriptor);
        let content = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                fail(format!("expected binary not found at {}", path.display()))
            } else {
                fail(format!("failed to read {}: {}", path.display(), e))
            }
        })?;

        let reference = self
            .collaborators
            .store
            .store(Artifact::new(target, path, content))
            .await
            .map_err(|e| fail(e.to_string()))?;

        info!(
            triple = %target,
            digest = %reference.digest,
            size_bytes = reference.size_bytes,
            "Published artifact"
        );
        Ok(reference)
    }

    fn binary_path(&self, descriptor: &JobDescriptor) -> PathBuf {
        self.workspace.join(&descriptor.output_path)
    }
}

fn step_error(
    kind: StepKind,
    descriptor: &JobDescriptor,
    path: &Path,
    reason: String,
) -> StepError {
    let target = descriptor.target().to_string();
    match kind {
        StepKind::InstallToolchain => StepError::Toolchain { target, reason },
        StepKind::Build => StepError::Build { target, reason },
        StepKind::Compress => StepError::Compression {
            path: path.to_path_buf(),
            reason,
        },
        StepKind::Publish => StepError::Publish { target, reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::memory::MemoryArtifactStore;
    use crate::fakes::{FakeCompiler, FakeCompressor, FakeToolchain};
    use crate::matrix::{expand_matrix, MatrixDefinition, MatrixEntry};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    const MUSL: &str = "x86_64-unknown-linux-musl";

    fn descriptor_for(definition: MatrixDefinition) -> JobDescriptor {
        expand_matrix(&definition).expect("expand").remove(0)
    }

    fn descriptor() -> JobDescriptor {
        descriptor_for(MatrixDefinition::new(vec![
            MatrixEntry::new(MUSL, "ubuntu-latest").with_cross()
        ]))
    }

    fn runner(
        dir: &Path,
        toolchain: FakeToolchain,
        compiler: FakeCompiler,
        compressor: FakeCompressor,
    ) -> (JobRunner, Arc<MemoryArtifactStore>) {
        let store = Arc::new(MemoryArtifactStore::new());
        let collaborators = Collaborators {
            toolchain: Arc::new(toolchain),
            compiler: Arc::new(compiler),
            compressor: Arc::new(compressor),
            store: store.clone(),
        };
        (JobRunner::new(collaborators, dir), store)
    }

    #[tokio::test]
    async fn test_successful_job_walks_every_state() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, store) = runner(
            dir.path(),
            FakeToolchain::ok(),
            FakeCompiler::writing(dir.path()),
            FakeCompressor::ok(),
        );

        let result = runner.run_job(&descriptor()).await;

        assert_eq!(result.outcome, JobOutcome::Succeeded);
        let states: Vec<JobState> = result.transitions.iter().map(|t| t.state).collect();
        assert_eq!(
            states,
            vec![
                JobState::Pending,
                JobState::Installing,
                JobState::Building,
                JobState::Compressing,
                JobState::Publishing,
                JobState::Succeeded
            ]
        );
        assert!(result
            .steps
            .iter()
            .all(|s| s.outcome == StepOutcome::Succeeded));
        assert_eq!(store.names(), vec![MUSL.to_string()]);
    }

    #[tokio::test]
    async fn test_toolchain_failure_skips_everything_else() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = FakeCompiler::writing(dir.path());
        let calls = compiler.calls();
        let (runner, store) = runner(
            dir.path(),
            FakeToolchain::failing(),
            compiler,
            FakeCompressor::ok(),
        );

        let result = runner.run_job(&descriptor()).await;

        assert_eq!(result.outcome, JobOutcome::Failed);
        assert_eq!(result.steps[0].outcome, StepOutcome::Failed);
        assert!(result.steps[1..]
            .iter()
            .all(|s| s.outcome == StepOutcome::Skipped));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store.names().is_empty());
        assert_eq!(result.final_state(), Some(JobState::Failed));
    }

    #[tokio::test]
    async fn test_compress_failure_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, store) = runner(
            dir.path(),
            FakeToolchain::ok(),
            FakeCompiler::writing(dir.path()),
            FakeCompressor::failing(),
        );

        let result = runner.run_job(&descriptor()).await;

        assert_eq!(result.outcome, JobOutcome::Succeeded);
        assert_eq!(result.warning_count(), 1);
        assert_eq!(
            result.step("compress").map(|s| s.outcome),
            Some(StepOutcome::Failed)
        );
        assert_eq!(
            result.step("publish").map(|s| s.outcome),
            Some(StepOutcome::Succeeded)
        );
        assert!(result.artifact.is_some());
        assert_eq!(store.names().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_binary_fails_publish() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, store) = runner(
            dir.path(),
            FakeToolchain::ok(),
            FakeCompiler::silent(),
            FakeCompressor::ok(),
        );

        let result = runner.run_job(&descriptor()).await;

        assert_eq!(result.outcome, JobOutcome::Failed);
        let publish = result.step("publish").expect("publish step");
        assert_eq!(publish.outcome, StepOutcome::Failed);
        assert!(publish
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("expected binary not found"));
        assert!(result.artifact.is_none());
        assert!(store.names().is_empty());
    }

    #[tokio::test]
    async fn test_custom_target_dir_reaches_build_and_publish() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = FakeCompiler::writing(dir.path());
        let requests = compiler.requests();
        let (runner, store) = runner(
            dir.path(),
            FakeToolchain::ok(),
            compiler,
            FakeCompressor::ok(),
        );
        let descriptor = descriptor_for(
            MatrixDefinition::new(vec![MatrixEntry::new(MUSL, "ubuntu-latest")])
                .with_target_dir("out"),
        );

        let result = runner.run_job(&descriptor).await;

        assert_eq!(result.outcome, JobOutcome::Succeeded);
        let requests = requests.lock().unwrap();
        assert_eq!(requests[0].target_dir, PathBuf::from("out"));
        assert!(dir
            .path()
            .join("out/x86_64-unknown-linux-musl/release/cs")
            .is_file());
        assert_eq!(store.names(), vec![MUSL.to_string()]);
    }

    #[tokio::test]
    async fn test_step_timeout_fails_step() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _store) = runner(
            dir.path(),
            FakeToolchain::hanging(),
            FakeCompiler::writing(dir.path()),
            FakeCompressor::ok(),
        );
        let mut descriptor = descriptor();
        descriptor.steps[0].timeout_secs = 1;

        tokio::time::pause();
        let result = runner.run_job(&descriptor).await;

        assert_eq!(result.outcome, JobOutcome::Failed);
        assert!(result.steps[0]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("timed out"));
    }

    #[test]
    fn test_cancelled_result_has_only_skipped_steps() {
        let result = JobResult::cancelled(&descriptor());
        assert_eq!(result.outcome, JobOutcome::Cancelled);
        assert!(result
            .steps
            .iter()
            .all(|s| s.outcome == StepOutcome::Skipped));
        assert_eq!(result.final_state(), Some(JobState::Cancelled));
        assert!(result
            .final_state()
            .map(|s| s.is_terminal())
            .unwrap_or(false));
    }
}
