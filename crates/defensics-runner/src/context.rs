//! Host scheduler seam consumed by the build step

use crate::outcome::{CiOutcome, FailureCause};
use crate::reporter::PublishedArtifact;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors raised by a job context implementation
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("outcome for this build was already reported")]
    AlreadyReported,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed {what}: {source}")]
    Serialize {
        what: &'static str,
        source: serde_json::Error,
    },
}

/// What the orchestration core needs from the host job scheduler.
///
/// One context serves exactly one build.
pub trait JobContext: Send + Sync {
    /// Hand the final outcome back to the host. Called once per build.
    fn report_outcome(
        &self,
        outcome: CiOutcome,
        causes: &[FailureCause],
    ) -> Result<(), ContextError>;

    /// Attach a published report to the build (and link it from the job)
    fn attach_artifact(&self, artifact: &PublishedArtifact) -> Result<(), ContextError>;

    /// Token the host cancels when it interrupts the build
    fn cancellation(&self) -> CancellationToken;

    /// Directory for build-scoped files
    fn artifact_dir(&self) -> &Path;
}

#[cfg(any(test, feature = "test-support"))]
pub use recording::RecordingJobContext;

#[cfg(any(test, feature = "test-support"))]
mod recording {
    use super::*;
    use std::sync::Mutex;

    /// In-memory job context that records everything it is handed
    #[derive(Debug)]
    pub struct RecordingJobContext {
        artifact_dir: PathBuf,
        cancel: CancellationToken,
        outcomes: Mutex<Vec<(CiOutcome, Vec<FailureCause>)>>,
        artifacts: Mutex<Vec<PublishedArtifact>>,
    }

    impl RecordingJobContext {
        pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
            Self {
                artifact_dir: artifact_dir.into(),
                cancel: CancellationToken::new(),
                outcomes: Mutex::new(Vec::new()),
                artifacts: Mutex::new(Vec::new()),
            }
        }

        /// Simulate the host interrupting the build
        pub fn interrupt(&self) {
            self.cancel.cancel();
        }

        pub fn outcomes(&self) -> Vec<(CiOutcome, Vec<FailureCause>)> {
            self.outcomes.lock().unwrap().clone()
        }

        pub fn artifacts(&self) -> Vec<PublishedArtifact> {
            self.artifacts.lock().unwrap().clone()
        }
    }

    impl JobContext for RecordingJobContext {
        fn report_outcome(
            &self,
            outcome: CiOutcome,
            causes: &[FailureCause],
        ) -> Result<(), ContextError> {
            self.outcomes
                .lock()
                .unwrap()
                .push((outcome, causes.to_vec()));
            Ok(())
        }

        fn attach_artifact(&self, artifact: &PublishedArtifact) -> Result<(), ContextError> {
            self.artifacts.lock().unwrap().push(artifact.clone());
            Ok(())
        }

        fn cancellation(&self) -> CancellationToken {
            self.cancel.clone()
        }

        fn artifact_dir(&self) -> &Path {
            &self.artifact_dir
        }
    }
}
