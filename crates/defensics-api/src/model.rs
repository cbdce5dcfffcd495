//! Records exchanged with the Defensics API server

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Server-assigned run identifier. Opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Run created, nothing loaded yet
    Idle,
    /// Suite is being loaded
    Loading,
    /// Suite loaded, waiting for start
    Loaded,
    /// Fuzzing is starting
    Starting,
    /// Fuzzing in progress
    Running,
    /// Pause requested
    Pausing,
    /// Fuzzing paused
    Paused,
    /// Stop requested
    Stopping,
    /// Run finished and produced results
    Completed,
    /// Run ended in an error
    Error,
    /// Run failed fatally on the server
    #[serde(alias = "FATAL")]
    Failed,
    /// Run was cancelled before completion
    #[serde(alias = "CANCELLED")]
    Canceled,
}

impl RunState {
    /// Whether no further transition can follow this state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Error | RunState::Failed | RunState::Canceled
        )
    }

    /// Position of the state on the path toward a terminal state.
    ///
    /// Pausing and resuming move back and forth between 4 and 6, everything
    /// else only ever moves forward.
    pub fn phase(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Loading => 1,
            RunState::Loaded => 2,
            RunState::Starting => 3,
            RunState::Running | RunState::Pausing | RunState::Paused => 4,
            RunState::Stopping => 5,
            RunState::Completed | RunState::Error | RunState::Failed | RunState::Canceled => 6,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "IDLE",
            RunState::Loading => "LOADING",
            RunState::Loaded => "LOADED",
            RunState::Starting => "STARTING",
            RunState::Running => "RUNNING",
            RunState::Pausing => "PAUSING",
            RunState::Paused => "PAUSED",
            RunState::Stopping => "STOPPING",
            RunState::Completed => "COMPLETED",
            RunState::Error => "ERROR",
            RunState::Failed => "FAILED",
            RunState::Canceled => "CANCELED",
        };
        f.write_str(name)
    }
}

/// Snapshot of one fuzzing run as reported by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: RunId,
    pub state: RunState,
    /// Suite instance assigned to the run (absent until the server binds one)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite_instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Request payload binding a run to a suite instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteInstanceRequest {
    suite_instance_id: String,
}

impl SuiteInstanceRequest {
    pub fn new(suite_instance_id: impl Into<String>) -> Self {
        Self {
            suite_instance_id: suite_instance_id.into(),
        }
    }

    pub fn suite_instance_id(&self) -> &str {
        &self.suite_instance_id
    }
}

/// Overall verdict of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
    Error,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Error => "ERROR",
            Verdict::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Result statistics of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictSummary {
    pub verdict: Verdict,
    #[serde(default)]
    pub run_test_cases: u64,
    #[serde(default)]
    pub passed_test_cases: u64,
    #[serde(default)]
    pub failed_test_cases: u64,
}

impl VerdictSummary {
    /// A run passes only with a PASS verdict and no failed test case.
    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass && self.failed_test_cases == 0
    }
}

/// Server-side configuration of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite_instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_plan: Option<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

/// Downloaded report or result package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}
