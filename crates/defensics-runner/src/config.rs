//! Job configuration: Defensics instances, step parameters, poll settings

use defensics_api::ClientSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Environment override capping the polling interval, in seconds
pub const POLL_INTERVAL_ENV: &str = "DEFENSICS_MAX_POLLING_INTERVAL";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Errors while loading or validating a job configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse job configuration: {source}")]
    Parse {
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize job configuration: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },

    #[error("invalid job configuration: {message}")]
    Invalid { message: String },

    #[error("credentials '{credentials_id}' are not available")]
    MissingCredentials { credentials_id: String },
}

/// One Defensics API server the step can run against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Display name, referenced from `[step].instance`
    pub name: String,
    /// Server URL
    pub url: String,
    /// Accept invalid TLS certificates
    #[serde(default)]
    pub certificate_validation_disabled: bool,
    /// Name of the environment variable holding the API token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_id: Option<String>,
    /// Timeout of every single API request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl InstanceConfig {
    /// Look up the API token named by `credentials_id`.
    ///
    /// Returns `Ok(None)` when the instance has no credentials configured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingCredentials` if the credential is named but
    /// empty or absent.
    pub fn resolve_token(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<String>, ConfigError> {
        let Some(id) = self.credentials_id.as_deref() else {
            return Ok(None);
        };
        match lookup(id) {
            Some(token) if !token.trim().is_empty() => Ok(Some(token)),
            _ => Err(ConfigError::MissingCredentials {
                credentials_id: id.to_string(),
            }),
        }
    }

    /// Connection settings for the HTTP facade
    pub fn client_settings(&self, token: Option<String>) -> ClientSettings {
        ClientSettings {
            name: self.name.clone(),
            url: self.url.clone(),
            token,
            certificate_validation_disabled: self.certificate_validation_disabled,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

/// Parameters of the build step itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Name of the instance to run against
    pub instance: String,
    /// Test plan / suite instance to fuzz with
    pub test_plan: String,
    /// Also download the zipped result package
    #[serde(default)]
    pub save_result_package: bool,
    /// Polling interval in seconds (default 30)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    /// Consecutive failed polls tolerated before giving up (default 5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u32>,
}

/// Complete job configuration as stored in the job file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
    pub step: StepConfig,
}

impl JobConfig {
    /// Read and validate a job file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a job configuration
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: JobConfig =
            toml::from_str(content).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back into the job file format
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }

    /// Write the job file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - no instance is configured, or two share a name
    /// - an instance URL does not parse
    /// - `[step].instance` names no configured instance
    /// - `test_plan` is empty
    /// - a poll interval or request timeout of zero is configured
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instances.is_empty() {
            return Err(invalid("at least one [[instances]] entry is required"));
        }

        let mut names = HashSet::new();
        for instance in &self.instances {
            if instance.name.trim().is_empty() {
                return Err(invalid("instance name cannot be empty"));
            }
            if !names.insert(instance.name.as_str()) {
                return Err(invalid(format!("duplicate instance name '{}'", instance.name)));
            }
            url::Url::parse(&instance.url).map_err(|e| {
                invalid(format!(
                    "instance '{}' has invalid url '{}': {e}",
                    instance.name, instance.url
                ))
            })?;
            if instance.request_timeout_secs == 0 {
                return Err(invalid(format!(
                    "instance '{}': request_timeout_secs must be at least 1",
                    instance.name
                )));
            }
        }

        if !names.contains(self.step.instance.as_str()) {
            return Err(invalid(format!(
                "step references unknown instance '{}'",
                self.step.instance
            )));
        }
        if self.step.test_plan.trim().is_empty() {
            return Err(invalid("step test_plan cannot be empty"));
        }
        if self.step.poll_interval_secs == Some(0) {
            return Err(invalid("poll_interval_secs must be at least 1"));
        }
        if self.step.max_consecutive_failures == Some(0) {
            return Err(invalid("max_consecutive_failures must be at least 1"));
        }
        Ok(())
    }

    /// The instance selected by `[step].instance`
    pub fn selected_instance(&self) -> Result<&InstanceConfig, ConfigError> {
        self.instances
            .iter()
            .find(|instance| instance.name == self.step.instance)
            .ok_or_else(|| {
                invalid(format!(
                    "step references unknown instance '{}'",
                    self.step.instance
                ))
            })
    }

    /// Resolve the effective poll settings, reading the environment once
    pub fn poll_configuration(&self, env: impl Fn(&str) -> Option<String>) -> PollConfiguration {
        let mut config = PollConfiguration::resolve(self.step.poll_interval_secs, env);
        if let Some(max) = self.step.max_consecutive_failures {
            config.max_consecutive_failures = max;
        }
        config
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

/// Effective polling behaviour for one run; fixed once the loop starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfiguration {
    /// Sleep between two status requests
    pub interval: Duration,
    /// Consecutive transient failures after which the run counts as unreachable
    pub max_consecutive_failures: u32,
    /// First retry delay; doubles per consecutive failure, capped at `interval`
    pub retry_backoff: Duration,
}

impl Default for PollConfiguration {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl PollConfiguration {
    /// Combine the configured interval with the `DEFENSICS_MAX_POLLING_INTERVAL`
    /// cap. Unparseable or zero overrides are ignored with a warning.
    pub fn resolve(configured_secs: Option<u64>, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut secs = configured_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS).max(1);
        if let Some(raw) = env(POLL_INTERVAL_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(max) if max >= 1 => secs = secs.min(max),
                _ => warn!("Ignoring invalid {POLL_INTERVAL_ENV}={raw:?}"),
            }
        }
        Self {
            interval: Duration::from_secs(secs),
            ..Self::default()
        }
    }

    /// Resolve against the process environment
    pub fn from_env(configured_secs: Option<u64>) -> Self {
        Self::resolve(configured_secs, |key| std::env::var(key).ok())
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max.max(1);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Delay before retrying after the given number of consecutive failures
    pub fn retry_delay(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        let delay = self.retry_backoff.saturating_mul(1u32 << exponent);
        delay.min(self.interval)
    }
}
