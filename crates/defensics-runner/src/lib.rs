//! Run orchestration for the Defensics CI build step
//!
//! A build submits one fuzzing run, polls it to a terminal state, classifies
//! the result into a CI outcome and publishes the report when the run
//! produced one. The host scheduler is reached only through [`JobContext`].

pub mod build_dir;
pub mod cancel;
pub mod config;
pub mod context;
pub mod logging;
pub mod outcome;
pub mod poller;
pub mod reporter;
pub mod step;

#[cfg(test)]
mod testing;

pub use build_dir::{BuildDirContext, JobLink, OutcomeRecord, read_job_link, read_outcome};
pub use cancel::{CancellationBridge, DEFAULT_CANCEL_DEADLINE};
pub use config::{ConfigError, InstanceConfig, JobConfig, PollConfiguration, StepConfig};
pub use context::{ContextError, JobContext};
pub use outcome::{CiOutcome, Classification, FailureCause, classify};
pub use poller::{PollError, PolledRun, RunPoller};
pub use reporter::{PublishedArtifact, REPORT_URL_NAME, ReportError, ResultReporter};
pub use step::{BuildStep, StepResult};

#[cfg(any(test, feature = "test-support"))]
pub use context::RecordingJobContext;
