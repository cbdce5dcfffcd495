//! One build: submit, poll, classify, publish, report the outcome once

use crate::cancel::CancellationBridge;
use crate::config::PollConfiguration;
use crate::context::JobContext;
use crate::outcome::{CiOutcome, FailureCause, classify};
use crate::poller::{PollError, RunPoller};
use crate::reporter::{PublishedArtifact, ResultReporter};
use defensics_api::{ErasedDefensicsApi, Run, RunId, RunState, SuiteInstanceRequest};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What one execution of the build step produced
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub outcome: CiOutcome,
    pub run_id: Option<RunId>,
    pub causes: Vec<FailureCause>,
    pub artifact: Option<PublishedArtifact>,
    pub polls: u32,
}

impl StepResult {
    fn new(outcome: CiOutcome, run_id: Option<RunId>) -> Self {
        Self {
            outcome,
            run_id,
            causes: Vec::new(),
            artifact: None,
            polls: 0,
        }
    }

    fn with_cause(mut self, cause: FailureCause) -> Self {
        self.causes.push(cause);
        self
    }

    fn interrupted(mut self) -> Self {
        self.outcome = self.outcome.combine(CiOutcome::Aborted);
        self.causes.push(FailureCause::Interrupted);
        self
    }
}

/// Build step bound to one API server and one suite instance
pub struct BuildStep {
    api: Arc<dyn ErasedDefensicsApi>,
    suite_instance_id: String,
    poller: RunPoller,
    reporter: ResultReporter,
}

impl BuildStep {
    pub fn new(
        api: Arc<dyn ErasedDefensicsApi>,
        suite_instance_id: impl Into<String>,
        poll_config: PollConfiguration,
        save_result_package: bool,
    ) -> Self {
        Self {
            poller: RunPoller::new(Arc::clone(&api), poll_config),
            reporter: ResultReporter::new(Arc::clone(&api), save_result_package),
            suite_instance_id: suite_instance_id.into(),
            api,
        }
    }

    /// Run the step to completion and hand exactly one outcome to `ctx`.
    pub async fn execute(&self, ctx: &dyn JobContext) -> StepResult {
        let result = self.run(ctx).await;

        for cause in &result.causes {
            match result.run_id.as_ref() {
                Some(run_id) => warn!(%run_id, "{cause}"),
                None => warn!("{cause}"),
            }
        }
        if let Err(e) = ctx.report_outcome(result.outcome, &result.causes) {
            error!("Failed to report build outcome {}: {e}", result.outcome);
        }
        info!(outcome = %result.outcome, "Defensics build step finished");
        result
    }

    async fn run(&self, ctx: &dyn JobContext) -> StepResult {
        let bridge = CancellationBridge::new(ctx.cancellation());
        if bridge.is_interrupted() {
            return StepResult::new(CiOutcome::Aborted, None).with_cause(FailureCause::Interrupted);
        }

        let request = SuiteInstanceRequest::new(self.suite_instance_id.clone());
        info!(
            server = self.api.server_name(),
            suite_instance = %self.suite_instance_id,
            "Submitting Defensics run"
        );
        // Never dropped mid-flight: the server may already own the run. The
        // per-request timeout bounds the wait.
        let created = self.api.create_run(&request).await;
        if bridge.is_interrupted() {
            let run_id = created.ok().map(|run| run.id);
            if let Some(run_id) = &run_id {
                info!(%run_id, "Build interrupted during submission, aborting run");
                bridge.abort_remote(self.api.as_ref(), run_id).await;
            }
            return StepResult::new(CiOutcome::Aborted, run_id)
                .with_cause(FailureCause::Interrupted);
        }
        let run = match created {
            Ok(run) => run,
            Err(e) => {
                return StepResult::new(CiOutcome::Failure, None).with_cause(
                    FailureCause::SubmissionFailed {
                        message: e.to_string(),
                    },
                );
            }
        };
        info!(run_id = %run.id, "Run created");

        // An interrupt here falls through to the poller, which aborts the run.
        tokio::select! {
            biased;
            _ = bridge.token().cancelled() => {}
            _ = self.check_configuration(&run.id) => {}
        }

        let polled = match self.poller.poll_until_terminal(&run.id, bridge.token()).await {
            Ok(polled) => polled,
            Err(e) => return self.poll_failed(e, &run.id, &bridge).await,
        };

        let mut result = StepResult::new(CiOutcome::Success, Some(run.id.clone()));
        result.polls = polled.polls;
        self.finish(polled.run, &bridge, ctx, result).await
    }

    async fn poll_failed(
        &self,
        err: PollError,
        run_id: &RunId,
        bridge: &CancellationBridge,
    ) -> StepResult {
        let result = StepResult::new(CiOutcome::Failure, Some(run_id.clone()));
        match err {
            PollError::Cancelled { polls, .. } => {
                info!(%run_id, "Build interrupted, aborting run");
                bridge.abort_remote(self.api.as_ref(), run_id).await;
                let mut result = StepResult::new(CiOutcome::Aborted, Some(run_id.clone()))
                    .with_cause(FailureCause::Interrupted);
                result.polls = polls;
                result
            }
            PollError::Unreachable {
                attempts, source, ..
            } => result.with_cause(FailureCause::Unreachable {
                attempts,
                message: source.to_string(),
            }),
            PollError::Rejected { source, .. } => result.with_cause(FailureCause::Rejected {
                status: source.status(),
                message: source.to_string(),
            }),
        }
    }

    async fn finish(
        &self,
        run: Run,
        bridge: &CancellationBridge,
        ctx: &dyn JobContext,
        mut result: StepResult,
    ) -> StepResult {
        let summary = if run.state == RunState::Completed {
            let fetched = tokio::select! {
                biased;
                _ = bridge.token().cancelled() => return result.interrupted(),
                fetched = self.reporter.fetch_summary(&run) => fetched,
            };
            match fetched {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!(run_id = %run.id, "{e}");
                    None
                }
            }
        } else {
            None
        };

        let classification = classify(&run, summary.as_ref());
        result.outcome = classification.outcome;
        result.causes.extend(classification.cause);

        // An interrupt that lands after the terminal poll still wins.
        if bridge.is_interrupted() {
            return result.interrupted();
        }

        let Some(summary) = summary.filter(|_| classification.publish_report) else {
            return result;
        };
        // The artifact is attached last, so a dropped publish attaches nothing.
        let published = tokio::select! {
            biased;
            _ = bridge.token().cancelled() => return result.interrupted(),
            published = self.reporter.report(&run, &summary, ctx) => published,
        };
        match published {
            Ok(artifact) => result.artifact = Some(artifact),
            Err(e) => {
                result.outcome = result.outcome.combine(CiOutcome::Failure);
                result.causes.push(FailureCause::ReportUnavailable {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    /// Log the configuration the server applied; mismatches are warnings only
    async fn check_configuration(&self, run_id: &RunId) {
        match self.api.get_run_configuration(run_id).await {
            Ok(config) => {
                debug!(%run_id, ?config, "Run configuration");
                let applied = config
                    .suite_instance_id
                    .as_deref()
                    .or(config.test_plan.as_deref());
                if let Some(applied) = applied {
                    if applied != self.suite_instance_id {
                        warn!(
                            %run_id,
                            "Server applied suite instance '{applied}', expected '{}'",
                            self.suite_instance_id
                        );
                    }
                }
            }
            Err(e) => warn!(%run_id, "Failed to fetch run configuration: {e}"),
        }
    }
}
