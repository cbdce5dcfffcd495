//! Stateful in-memory Defensics server for tests

use crate::client::DefensicsApi;
use crate::error::TransportError;
use crate::model::{
    ReportArtifact, Run, RunConfiguration, RunId, RunState, SuiteInstanceRequest, Verdict,
    VerdictSummary,
};
use chrono::{TimeZone, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Record of facade calls for test assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    CreateRun(String),
    GetRun(RunId),
    CancelRun(RunId),
    GetReport(RunId),
    GetResultStatistics(RunId),
    GetRunConfiguration(RunId),
    GetResultPackage(RunId),
}

#[derive(Debug)]
struct FakeState {
    run_id: RunId,
    suite_instance_id: Option<String>,
    /// Remaining scripted states; the last one repeats forever
    script: VecDeque<RunState>,
    current: RunState,
    cancelled: bool,
    summary: VerdictSummary,
    report: ReportArtifact,
    pending_get_run_failures: u32,
    permanent_get_run_status: Option<u16>,
    fail_create: bool,
    fail_cancel: bool,
    fail_report: bool,
    fail_statistics: bool,
    calls: Vec<FakeCall>,
}

/// Fake API server. Clones share state, so a test can keep one handle while
/// the build step owns another. Construct a fresh one per scenario.
#[derive(Debug, Clone)]
pub struct FakeDefensicsServer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDefensicsServer {
    /// A server whose run goes STARTING, RUNNING, COMPLETED with a PASS verdict
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                run_id: RunId::new("run-1"),
                suite_instance_id: None,
                script: VecDeque::from([
                    RunState::Starting,
                    RunState::Running,
                    RunState::Completed,
                ]),
                current: RunState::Idle,
                cancelled: false,
                summary: VerdictSummary {
                    verdict: Verdict::Pass,
                    run_test_cases: 100,
                    passed_test_cases: 100,
                    failed_test_cases: 0,
                },
                report: ReportArtifact {
                    file_name: "report.html".to_string(),
                    content_type: Some("text/html".to_string()),
                    bytes: b"<html><body>Defensics report</body></html>".to_vec(),
                },
                pending_get_run_failures: 0,
                permanent_get_run_status: None,
                fail_create: false,
                fail_cancel: false,
                fail_report: false,
                fail_statistics: false,
                calls: Vec::new(),
            })),
        }
    }

    /// Script the states returned by consecutive `get_run` calls
    pub fn with_states(self, states: Vec<RunState>) -> Self {
        self.lock().script = states.into();
        self
    }

    /// Set the verdict and failed test case count of the finished run
    pub fn with_verdict(self, verdict: Verdict, failed_test_cases: u64) -> Self {
        {
            let mut state = self.lock();
            state.summary.verdict = verdict;
            state.summary.failed_test_cases = failed_test_cases;
            state.summary.passed_test_cases =
                state.summary.run_test_cases.saturating_sub(failed_test_cases);
        }
        self
    }

    /// Make the next `count` `get_run` calls fail with HTTP 503
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.fail_next_get_runs(count);
        self
    }

    /// Make every `get_run` call fail with the given status
    pub fn with_permanent_failure(self, status: u16) -> Self {
        self.lock().permanent_get_run_status = Some(status);
        self
    }

    pub fn failing_create(self) -> Self {
        self.lock().fail_create = true;
        self
    }

    pub fn failing_cancel(self) -> Self {
        self.lock().fail_cancel = true;
        self
    }

    pub fn failing_report(self) -> Self {
        self.lock().fail_report = true;
        self
    }

    pub fn failing_statistics(self) -> Self {
        self.lock().fail_statistics = true;
        self
    }

    /// Queue transient `get_run` failures on a running scenario
    pub fn fail_next_get_runs(&self, count: u32) {
        self.lock().pending_get_run_failures += count;
    }

    /// Get a copy of the call log for assertions
    pub fn calls(&self) -> Vec<FakeCall> {
        self.lock().calls.clone()
    }

    /// Number of logged calls matching the predicate
    pub fn count_calls(&self, predicate: impl Fn(&FakeCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Whether a cancel request reached the server
    pub fn was_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        // A panicking test thread must not hide the call log from others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for FakeDefensicsServer {
    fn default() -> Self {
        Self::new()
    }
}

fn unavailable(operation: &'static str) -> TransportError {
    TransportError::Status {
        operation,
        status: 503,
        message: "service unavailable".to_string(),
    }
}

fn not_found(operation: &'static str, run_id: &RunId) -> TransportError {
    TransportError::Status {
        operation,
        status: 404,
        message: format!("run {run_id} not found"),
    }
}

impl FakeState {
    fn snapshot(&self) -> Run {
        Run {
            id: self.run_id.clone(),
            state: self.current,
            suite_instance_id: self.suite_instance_id.clone(),
            created_at: Utc.with_ymd_and_hms(2026, 2, 13, 10, 0, 0).single(),
        }
    }

    fn check_run(&self, operation: &'static str, run_id: &RunId) -> Result<(), TransportError> {
        if self.suite_instance_id.is_none() || *run_id != self.run_id {
            return Err(not_found(operation, run_id));
        }
        Ok(())
    }
}

impl DefensicsApi for FakeDefensicsServer {
    async fn create_run(&self, request: &SuiteInstanceRequest) -> Result<Run, TransportError> {
        let mut state = self.lock();
        state
            .calls
            .push(FakeCall::CreateRun(request.suite_instance_id().to_string()));
        if state.fail_create {
            return Err(unavailable("create run"));
        }
        state.suite_instance_id = Some(request.suite_instance_id().to_string());
        state.current = RunState::Idle;
        Ok(state.snapshot())
    }

    async fn get_run(&self, run_id: &RunId) -> Result<Run, TransportError> {
        let mut state = self.lock();
        state.calls.push(FakeCall::GetRun(run_id.clone()));
        if let Some(status) = state.permanent_get_run_status {
            return Err(TransportError::Status {
                operation: "get run",
                status,
                message: "rejected".to_string(),
            });
        }
        if state.pending_get_run_failures > 0 {
            state.pending_get_run_failures -= 1;
            return Err(unavailable("get run"));
        }
        state.check_run("get run", run_id)?;

        if state.cancelled {
            state.current = RunState::Canceled;
        } else if let Some(next) = state.script.pop_front() {
            state.current = next;
            if state.script.is_empty() {
                state.script.push_back(next);
            }
        }
        Ok(state.snapshot())
    }

    async fn cancel_run(&self, run_id: &RunId) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(FakeCall::CancelRun(run_id.clone()));
        if state.fail_cancel {
            return Err(unavailable("cancel run"));
        }
        state.check_run("cancel run", run_id)?;
        state.cancelled = true;
        Ok(())
    }

    async fn get_report(&self, run_id: &RunId) -> Result<ReportArtifact, TransportError> {
        let mut state = self.lock();
        state.calls.push(FakeCall::GetReport(run_id.clone()));
        if state.fail_report {
            return Err(unavailable("get report"));
        }
        state.check_run("get report", run_id)?;
        Ok(state.report.clone())
    }

    async fn get_result_statistics(
        &self,
        run_id: &RunId,
    ) -> Result<VerdictSummary, TransportError> {
        let mut state = self.lock();
        state.calls.push(FakeCall::GetResultStatistics(run_id.clone()));
        if state.fail_statistics {
            return Err(unavailable("get result statistics"));
        }
        state.check_run("get result statistics", run_id)?;
        Ok(state.summary.clone())
    }

    async fn get_run_configuration(
        &self,
        run_id: &RunId,
    ) -> Result<RunConfiguration, TransportError> {
        let mut state = self.lock();
        state.calls.push(FakeCall::GetRunConfiguration(run_id.clone()));
        state.check_run("get run configuration", run_id)?;
        Ok(RunConfiguration {
            suite_instance_id: state.suite_instance_id.clone(),
            test_plan: state.suite_instance_id.clone(),
            settings: BTreeMap::new(),
        })
    }

    async fn get_result_package(&self, run_id: &RunId) -> Result<ReportArtifact, TransportError> {
        let mut state = self.lock();
        state.calls.push(FakeCall::GetResultPackage(run_id.clone()));
        state.check_run("get result package", run_id)?;
        Ok(ReportArtifact {
            file_name: "result-package.zip".to_string(),
            content_type: Some("application/zip".to_string()),
            bytes: b"PK\x05\x06".to_vec(),
        })
    }

    fn server_name(&self) -> &str {
        "FakeDefensicsServer"
    }
}

/// Helper function to create a test run snapshot
pub fn create_test_run(id: &str, state: RunState) -> Run {
    Run {
        id: RunId::new(id),
        state,
        suite_instance_id: Some("http.testplan".to_string()),
        created_at: Utc.with_ymd_and_hms(2026, 2, 13, 10, 0, 0).single(),
    }
}
