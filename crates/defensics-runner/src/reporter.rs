//! Fetches run results and publishes the report as a build artifact

use crate::context::{ContextError, JobContext};
use chrono::{DateTime, Utc};
use defensics_api::{ErasedDefensicsApi, Run, RunId, TransportError, VerdictSummary};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Stable URL name of the published report action
pub const REPORT_URL_NAME: &str = "defensics-report";

const SUMMARY_FILE: &str = "summary.json";

/// A report attached to a build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    pub url_name: String,
    pub run_id: RunId,
    pub report_path: PathBuf,
    pub summary_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_package_path: Option<PathBuf>,
    pub summary: VerdictSummary,
    pub published_at: DateTime<Utc>,
}

/// Errors raised while publishing a report
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to fetch result statistics of run {run_id}")]
    Statistics {
        run_id: RunId,
        #[source]
        source: TransportError,
    },

    #[error("failed to download report of run {run_id}")]
    Download {
        run_id: RunId,
        #[source]
        source: TransportError,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize result summary: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to attach report to build: {source}")]
    Attach {
        #[source]
        source: ContextError,
    },
}

/// Fetches statistics and report files for finished runs
pub struct ResultReporter {
    api: Arc<dyn ErasedDefensicsApi>,
    save_result_package: bool,
}

impl ResultReporter {
    pub fn new(api: Arc<dyn ErasedDefensicsApi>, save_result_package: bool) -> Self {
        Self {
            api,
            save_result_package,
        }
    }

    /// Fetch verdict and test case counts of a finished run
    pub async fn fetch_summary(&self, run: &Run) -> Result<VerdictSummary, ReportError> {
        self.api
            .get_result_statistics(&run.id)
            .await
            .map_err(|source| ReportError::Statistics {
                run_id: run.id.clone(),
                source,
            })
    }

    /// Download the report of `run` into the build's artifact directory and
    /// attach it to the build.
    ///
    /// The optional result package is best-effort: a failed download is
    /// logged and the report is still published.
    pub async fn report(
        &self,
        run: &Run,
        summary: &VerdictSummary,
        ctx: &dyn JobContext,
    ) -> Result<PublishedArtifact, ReportError> {
        let report = self
            .api
            .get_report(&run.id)
            .await
            .map_err(|source| ReportError::Download {
                run_id: run.id.clone(),
                source,
            })?;

        let dir = ctx.artifact_dir().join(REPORT_URL_NAME);
        create_dir(&dir)?;

        let report_path = dir.join(sanitize_file_name(&report.file_name));
        write_file(&report_path, &report.bytes)?;
        debug!(run_id = %run.id, path = %report_path.display(), "Wrote report");

        let summary_path = dir.join(SUMMARY_FILE);
        let summary_json = serde_json::to_vec_pretty(summary)
            .map_err(|source| ReportError::Serialize { source })?;
        write_file(&summary_path, &summary_json)?;

        let result_package_path = if self.save_result_package {
            self.save_package(&run.id, &dir).await
        } else {
            None
        };

        let artifact = PublishedArtifact {
            url_name: REPORT_URL_NAME.to_string(),
            run_id: run.id.clone(),
            report_path,
            summary_path,
            result_package_path,
            summary: summary.clone(),
            published_at: Utc::now(),
        };
        ctx.attach_artifact(&artifact)
            .map_err(|source| ReportError::Attach { source })?;

        info!(
            run_id = %run.id,
            verdict = %summary.verdict,
            failed = summary.failed_test_cases,
            "Published report"
        );
        Ok(artifact)
    }

    async fn save_package(&self, run_id: &RunId, dir: &Path) -> Option<PathBuf> {
        let package = match self.api.get_result_package(run_id).await {
            Ok(package) => package,
            Err(e) => {
                warn!(%run_id, "Failed to download result package: {e}");
                return None;
            }
        };
        let path = dir.join(sanitize_file_name(&package.file_name));
        match std::fs::write(&path, &package.bytes) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(%run_id, "Failed to write result package to {}: {e}", path.display());
                None
            }
        }
    }
}

fn create_dir(path: &Path) -> Result<(), ReportError> {
    std::fs::create_dir_all(path).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ReportError> {
    std::fs::write(path, bytes).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Keep server-supplied names inside the report directory
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "." || base == ".." {
        "report.html".to_string()
    } else {
        base.to_string()
    }
}
