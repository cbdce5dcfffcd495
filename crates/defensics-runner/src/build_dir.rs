//! File-system job context: one build directory per build, plus an optional
//! job directory shared by all builds of the same job.
//!
//! Layout:
//! ```text
//! <build-dir>/result.json        outcome, written once
//! <build-dir>/artifacts.json     manifest of attached reports
//! <build-dir>/artifacts/         build-scoped files
//! <job-dir>/defensics-report.json link to the latest published report
//! ```

use crate::context::{ContextError, JobContext};
use crate::outcome::{CiOutcome, FailureCause};
use crate::reporter::{PublishedArtifact, REPORT_URL_NAME};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const RESULT_FILE: &str = "result.json";
const MANIFEST_FILE: &str = "artifacts.json";
const ARTIFACT_DIR: &str = "artifacts";

/// Outcome record persisted in `result.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub outcome: CiOutcome,
    #[serde(default)]
    pub causes: Vec<FailureCause>,
    pub reported_at: DateTime<Utc>,
}

/// Job-level link to the latest published report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLink {
    pub url_name: String,
    pub build_dir: PathBuf,
    pub artifact: PublishedArtifact,
}

/// Job context backed by directories on disk
#[derive(Debug)]
pub struct BuildDirContext {
    build_dir: PathBuf,
    artifact_dir: PathBuf,
    job_dir: Option<PathBuf>,
    cancel: CancellationToken,
    reported: Mutex<bool>,
}

impl BuildDirContext {
    /// Create the build directory layout
    pub fn create(
        build_dir: impl Into<PathBuf>,
        job_dir: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> Result<Self, ContextError> {
        let build_dir = build_dir.into();
        let artifact_dir = build_dir.join(ARTIFACT_DIR);
        create_dir(&artifact_dir)?;
        if let Some(job_dir) = &job_dir {
            create_dir(job_dir)?;
        }
        let reported = build_dir.join(RESULT_FILE).exists();
        Ok(Self {
            build_dir,
            artifact_dir,
            job_dir,
            cancel,
            reported: Mutex::new(reported),
        })
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn result_path(&self) -> PathBuf {
        self.build_dir.join(RESULT_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.build_dir.join(MANIFEST_FILE)
    }

    /// Path of the job-level link, if this build belongs to a job
    pub fn job_link_path(&self) -> Option<PathBuf> {
        self.job_dir.as_ref().map(|dir| job_link_path(dir))
    }

    /// Artifacts attached to this build so far
    pub fn artifacts(&self) -> Result<Vec<PublishedArtifact>, ContextError> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path, "artifact manifest")
    }
}

fn job_link_path(job_dir: &Path) -> PathBuf {
    job_dir.join(format!("{REPORT_URL_NAME}.json"))
}

/// Read the outcome a build reported, if any
pub fn read_outcome(build_dir: &Path) -> Result<Option<OutcomeRecord>, ContextError> {
    let path = build_dir.join(RESULT_FILE);
    if !path.exists() {
        return Ok(None);
    }
    read_json(&path, "outcome record").map(Some)
}

/// Read the job-level report link, if any build published one
pub fn read_job_link(job_dir: &Path) -> Result<Option<JobLink>, ContextError> {
    let path = job_link_path(job_dir);
    if !path.exists() {
        return Ok(None);
    }
    read_json(&path, "job link").map(Some)
}

impl JobContext for BuildDirContext {
    fn report_outcome(
        &self,
        outcome: CiOutcome,
        causes: &[FailureCause],
    ) -> Result<(), ContextError> {
        let mut reported = self
            .reported
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *reported {
            return Err(ContextError::AlreadyReported);
        }
        let record = OutcomeRecord {
            outcome,
            causes: causes.to_vec(),
            reported_at: Utc::now(),
        };
        write_json(&self.result_path(), &record, "outcome record")?;
        *reported = true;
        info!(%outcome, path = %self.result_path().display(), "Recorded build outcome");
        Ok(())
    }

    fn attach_artifact(&self, artifact: &PublishedArtifact) -> Result<(), ContextError> {
        let mut manifest = self.artifacts()?;
        manifest.push(artifact.clone());
        write_json(&self.manifest_path(), &manifest, "artifact manifest")?;

        if let Some(job_dir) = &self.job_dir {
            let link = JobLink {
                url_name: artifact.url_name.clone(),
                build_dir: self.build_dir.clone(),
                artifact: artifact.clone(),
            };
            write_json(&job_link_path(job_dir), &link, "job link")?;
            debug!(run_id = %artifact.run_id, "Updated job-level report link");
        }
        Ok(())
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }
}

fn create_dir(path: &Path) -> Result<(), ContextError> {
    std::fs::create_dir_all(path).map_err(|source| ContextError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &'static str) -> Result<T, ContextError> {
    let content = std::fs::read(path).map_err(|source| ContextError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&content).map_err(|source| ContextError::Serialize { what, source })
}

/// Write JSON via a temp file and rename so readers never see a partial file
fn write_json<T: Serialize>(
    path: &Path,
    value: &T,
    what: &'static str,
) -> Result<(), ContextError> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|source| ContextError::Serialize { what, source })?;
    let io_err = |source| ContextError::Io {
        path: path.to_path_buf(),
        source,
    };

    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, json).map_err(io_err)?;
    // std::fs::rename does not replace existing files on Windows
    if path.exists() {
        std::fs::remove_file(path).map_err(io_err)?;
    }
    std::fs::rename(&temp_path, path).map_err(io_err)
}
