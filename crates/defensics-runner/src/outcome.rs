//! Mapping of remote run results onto CI outcomes

use defensics_api::{Run, RunState, Verdict, VerdictSummary};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result handed back to the host scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CiOutcome {
    Success,
    Failure,
    Aborted,
}

impl CiOutcome {
    fn severity(self) -> u8 {
        match self {
            CiOutcome::Success => 0,
            CiOutcome::Failure => 1,
            CiOutcome::Aborted => 2,
        }
    }

    /// The worse of two outcomes
    pub fn combine(self, other: CiOutcome) -> CiOutcome {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Process exit code used by the command-line host
    pub fn exit_code(self) -> i32 {
        match self {
            CiOutcome::Success => 0,
            CiOutcome::Failure => 1,
            CiOutcome::Aborted => 2,
        }
    }
}

impl fmt::Display for CiOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CiOutcome::Success => "SUCCESS",
            CiOutcome::Failure => "FAILURE",
            CiOutcome::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Why a build did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// The run could not be created
    SubmissionFailed { message: String },
    /// The server stayed unreachable for the whole retry budget
    Unreachable { attempts: u32, message: String },
    /// The server refused the status request
    Rejected {
        status: Option<u16>,
        message: String,
    },
    /// The server reported the run as failed
    RunFailed { state: RunState },
    /// The run completed without a passing verdict
    TestCaseFailures {
        verdict: Verdict,
        failed_test_cases: u64,
    },
    /// The run completed but its statistics could not be fetched
    StatisticsUnavailable,
    /// The report could not be fetched or published
    ReportUnavailable { message: String },
    /// Classification was asked for a run that is still in progress
    NotTerminal { state: RunState },
    /// The host interrupted the build
    Interrupted,
    /// The run was cancelled on the server side
    RemoteCancelled,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::SubmissionFailed { message } => {
                write!(f, "failed to submit run: {message}")
            }
            FailureCause::Unreachable { attempts, message } => write!(
                f,
                "API server unreachable after {attempts} consecutive attempts: {message}"
            ),
            FailureCause::Rejected { status, message } => match status {
                Some(status) => write!(f, "API server rejected request (HTTP {status}): {message}"),
                None => write!(f, "API server rejected request: {message}"),
            },
            FailureCause::RunFailed { state } => write!(f, "run ended in state {state}"),
            FailureCause::TestCaseFailures {
                verdict,
                failed_test_cases,
            } => write!(
                f,
                "run verdict {verdict} with {failed_test_cases} failed test case(s)"
            ),
            FailureCause::StatisticsUnavailable => {
                f.write_str("run completed but result statistics are unavailable")
            }
            FailureCause::ReportUnavailable { message } => {
                write!(f, "report could not be published: {message}")
            }
            FailureCause::NotTerminal { state } => {
                write!(f, "run is still in progress (state {state})")
            }
            FailureCause::Interrupted => f.write_str("build was interrupted"),
            FailureCause::RemoteCancelled => f.write_str("run was cancelled on the server"),
        }
    }
}

/// CI outcome of a run plus whether its report gets published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub outcome: CiOutcome,
    pub publish_report: bool,
    pub cause: Option<FailureCause>,
}

impl Classification {
    pub fn success() -> Self {
        Self {
            outcome: CiOutcome::Success,
            publish_report: true,
            cause: None,
        }
    }

    pub fn failure(cause: FailureCause) -> Self {
        Self {
            outcome: CiOutcome::Failure,
            publish_report: false,
            cause: Some(cause),
        }
    }

    pub fn aborted(cause: FailureCause) -> Self {
        Self {
            outcome: CiOutcome::Aborted,
            publish_report: false,
            cause: Some(cause),
        }
    }
}

/// Classify a terminal run snapshot.
///
/// The verdict is only consulted for COMPLETED runs; every other state maps
/// to a fixed outcome. A report is published only for completed runs that
/// produced statistics.
pub fn classify(run: &Run, summary: Option<&VerdictSummary>) -> Classification {
    match run.state {
        RunState::Completed => match summary {
            Some(summary) if summary.is_pass() => Classification::success(),
            Some(summary) => Classification {
                outcome: CiOutcome::Failure,
                publish_report: true,
                cause: Some(FailureCause::TestCaseFailures {
                    verdict: summary.verdict,
                    failed_test_cases: summary.failed_test_cases,
                }),
            },
            None => Classification::failure(FailureCause::StatisticsUnavailable),
        },
        RunState::Error | RunState::Failed => {
            Classification::failure(FailureCause::RunFailed { state: run.state })
        }
        RunState::Canceled => Classification::aborted(FailureCause::RemoteCancelled),
        state => Classification::failure(FailureCause::NotTerminal { state }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use defensics_api::create_test_run;

    const ALL_STATES: [RunState; 12] = [
        RunState::Idle,
        RunState::Loading,
        RunState::Loaded,
        RunState::Starting,
        RunState::Running,
        RunState::Pausing,
        RunState::Paused,
        RunState::Stopping,
        RunState::Completed,
        RunState::Error,
        RunState::Failed,
        RunState::Canceled,
    ];

    fn summary(verdict: Verdict, failed: u64) -> VerdictSummary {
        VerdictSummary {
            verdict,
            run_test_cases: 50,
            passed_test_cases: 50 - failed,
            failed_test_cases: failed,
        }
    }

    #[test]
    fn test_completed_pass_is_success_with_report() {
        let run = create_test_run("run-1", RunState::Completed);
        let result = classify(&run, Some(&summary(Verdict::Pass, 0)));
        assert_eq!(result, Classification::success());
        assert!(result.publish_report);
    }

    #[test]
    fn test_completed_fail_is_failure_with_report() {
        let run = create_test_run("run-1", RunState::Completed);
        let result = classify(&run, Some(&summary(Verdict::Fail, 3)));
        assert_eq!(result.outcome, CiOutcome::Failure);
        assert!(result.publish_report);
        assert_eq!(
            result.cause,
            Some(FailureCause::TestCaseFailures {
                verdict: Verdict::Fail,
                failed_test_cases: 3
            })
        );
    }

    #[test]
    fn test_pass_verdict_with_failed_cases_fails() {
        let run = create_test_run("run-1", RunState::Completed);
        let result = classify(&run, Some(&summary(Verdict::Pass, 1)));
        assert_eq!(result.outcome, CiOutcome::Failure);
        assert!(result.publish_report);
    }

    #[test]
    fn test_unknown_verdict_fails_with_report() {
        let run = create_test_run("run-1", RunState::Completed);
        let result = classify(&run, Some(&summary(Verdict::Unknown, 0)));
        assert_eq!(result.outcome, CiOutcome::Failure);
        assert!(result.publish_report);
    }

    #[test]
    fn test_completed_without_statistics_fails_without_report() {
        let run = create_test_run("run-1", RunState::Completed);
        let result = classify(&run, None);
        assert_eq!(
            result,
            Classification::failure(FailureCause::StatisticsUnavailable)
        );
    }

    #[test]
    fn test_error_state_fails_without_report() {
        let run = create_test_run("run-1", RunState::Error);
        let result = classify(&run, Some(&summary(Verdict::Pass, 0)));
        assert_eq!(result.outcome, CiOutcome::Failure);
        assert!(!result.publish_report);
        assert_eq!(
            result.cause,
            Some(FailureCause::RunFailed {
                state: RunState::Error
            })
        );
    }

    #[test]
    fn test_canceled_state_aborts() {
        let run = create_test_run("run-1", RunState::Canceled);
        let result = classify(&run, Some(&summary(Verdict::Pass, 0)));
        assert_eq!(result.outcome, CiOutcome::Aborted);
        assert!(!result.publish_report);
    }

    #[test]
    fn test_only_completed_runs_publish() {
        let verdicts = [None, Some(summary(Verdict::Pass, 0)), Some(summary(Verdict::Fail, 2))];
        for state in ALL_STATES {
            if state == RunState::Completed {
                continue;
            }
            let run = create_test_run("run-1", state);
            for verdict in &verdicts {
                let result = classify(&run, verdict.as_ref());
                assert!(!result.publish_report, "{state} must not publish a report");
                assert_ne!(result.outcome, CiOutcome::Success, "{state} cannot succeed");
            }
        }
    }

    #[test]
    fn test_classify_is_deterministic() {
        let inputs = [None, Some(summary(Verdict::Pass, 0)), Some(summary(Verdict::Fail, 7))];
        for state in ALL_STATES {
            let run = create_test_run("run-1", state);
            for input in &inputs {
                assert_eq!(classify(&run, input.as_ref()), classify(&run, input.as_ref()));
            }
        }
    }

    #[test]
    fn test_combine_keeps_worse_outcome() {
        assert_eq!(CiOutcome::Success.combine(CiOutcome::Failure), CiOutcome::Failure);
        assert_eq!(CiOutcome::Failure.combine(CiOutcome::Success), CiOutcome::Failure);
        assert_eq!(CiOutcome::Failure.combine(CiOutcome::Aborted), CiOutcome::Aborted);
        assert_eq!(CiOutcome::Aborted.combine(CiOutcome::Failure), CiOutcome::Aborted);
        assert_eq!(CiOutcome::Success.combine(CiOutcome::Success), CiOutcome::Success);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(CiOutcome::Success.exit_code(), 0);
        assert_eq!(CiOutcome::Failure.exit_code(), 1);
        assert_eq!(CiOutcome::Aborted.exit_code(), 2);
    }

    #[test]
    fn test_cause_serializes_with_kind_tag() {
        let json = serde_json::to_string(&FailureCause::RunFailed {
            state: RunState::Error,
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"run_failed","state":"ERROR"}"#);
        assert_eq!(
            FailureCause::RunFailed {
                state: RunState::Error
            }
            .to_string(),
            "run ended in state ERROR"
        );
    }
}
