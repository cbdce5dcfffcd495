//! HTTP implementation of the facade on top of `reqwest`

use crate::client::DefensicsApi;
use crate::error::TransportError;
use crate::model::{
    ReportArtifact, Run, RunConfiguration, RunId, SuiteInstanceRequest, VerdictSummary,
};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

const USER_AGENT_VALUE: &str = concat!("defensics-step/", env!("CARGO_PKG_VERSION"));
const API_ROOT: &str = "/api/v2/";
const MAX_ERROR_BODY: usize = 500;

/// Connection settings for one Defensics instance
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Display name of the instance, used in logs
    pub name: String,
    /// Server URL; a bare host gets the default API root appended
    pub url: String,
    /// Bearer token, if the server requires authentication
    pub token: Option<String>,
    /// Accept invalid TLS certificates
    pub certificate_validation_disabled: bool,
    /// Upper bound for every single request
    pub request_timeout: Duration,
}

/// Every JSON body of the API is wrapped in a `data` member.
#[derive(Deserialize)]
struct Item<T> {
    data: T,
}

/// Defensics API client speaking REST/JSON
#[derive(Debug)]
pub struct HttpDefensicsClient {
    http: reqwest::Client,
    base: Url,
    name: String,
}

impl HttpDefensicsClient {
    /// Build a client for the given instance.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidRequest` if the URL cannot be used as an
    /// API root, the token is not a valid header value, or the TLS backend
    /// fails to initialize.
    pub fn new(settings: ClientSettings) -> Result<Self, TransportError> {
        let base = normalize_base(&settings.url)?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        if let Some(token) = settings.token.as_deref() {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|e| TransportError::InvalidRequest {
                    message: format!("invalid authorization token: {e}"),
                })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.request_timeout.max(Duration::from_secs(1)))
            .danger_accept_invalid_certs(settings.certificate_validation_disabled)
            .build()
            .map_err(|e| TransportError::InvalidRequest {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base,
            name: settings.name,
        })
    }

    /// Normalized API root every endpoint is resolved against
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::InvalidRequest {
                message: format!("{} cannot be used as a base URL", self.base),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        operation: &'static str,
        url: Url,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, TransportError> {
        debug!("{operation}: {url}");
        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(operation, url.as_str(), e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            operation,
            status: status.as_u16(),
            message: truncate(&body, MAX_ERROR_BODY),
        })
    }

    async fn request_data<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        url: Url,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TransportError> {
        let response = self.send(operation, url, request).await?;
        let item: Item<T> = response
            .json()
            .await
            .map_err(|e| TransportError::Decode {
                operation,
                message: e.to_string(),
            })?;
        Ok(item.data)
    }

    async fn request_bytes(
        &self,
        operation: &'static str,
        url: Url,
        request: reqwest::RequestBuilder,
        fallback_name: &str,
    ) -> Result<ReportArtifact, TransportError> {
        let response = self.send(operation, url.clone(), request).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(operation, url.as_str(), e))?;

        Ok(ReportArtifact {
            file_name: file_name_for(fallback_name, content_type.as_deref()),
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

impl DefensicsApi for HttpDefensicsClient {
    async fn create_run(&self, request: &SuiteInstanceRequest) -> Result<Run, TransportError> {
        let url = self.endpoint(&["runs"])?;
        let builder = self.http.post(url.clone()).json(request);
        self.request_data("create run", url, builder).await
    }

    async fn get_run(&self, run_id: &RunId) -> Result<Run, TransportError> {
        let url = self.endpoint(&["runs", run_id.as_str()])?;
        let builder = self.http.get(url.clone());
        self.request_data("get run", url, builder).await
    }

    async fn cancel_run(&self, run_id: &RunId) -> Result<(), TransportError> {
        let url = self.endpoint(&["runs", run_id.as_str(), "cancel"])?;
        let builder = self.http.post(url.clone());
        self.send("cancel run", url, builder).await?;
        Ok(())
    }

    async fn get_report(&self, run_id: &RunId) -> Result<ReportArtifact, TransportError> {
        let url = self.endpoint(&["runs", run_id.as_str(), "report"])?;
        let builder = self.http.get(url.clone());
        self.request_bytes("get report", url, builder, "report").await
    }

    async fn get_result_statistics(
        &self,
        run_id: &RunId,
    ) -> Result<VerdictSummary, TransportError> {
        let url = self.endpoint(&["runs", run_id.as_str(), "result-statistics"])?;
        let builder = self.http.get(url.clone());
        self.request_data("get result statistics", url, builder).await
    }

    async fn get_run_configuration(
        &self,
        run_id: &RunId,
    ) -> Result<RunConfiguration, TransportError> {
        let url = self.endpoint(&["runs", run_id.as_str(), "configuration"])?;
        let builder = self.http.get(url.clone());
        self.request_data("get run configuration", url, builder).await
    }

    async fn get_result_package(&self, run_id: &RunId) -> Result<ReportArtifact, TransportError> {
        let url = self.endpoint(&["runs", run_id.as_str(), "result-package"])?;
        let builder = self.http.get(url.clone());
        self.request_bytes("get result package", url, builder, "result-package")
            .await
    }

    fn server_name(&self) -> &str {
        &self.name
    }
}

fn normalize_base(raw: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| TransportError::InvalidRequest {
        message: format!("invalid server URL '{raw}': {e}"),
    })?;
    if url.cannot_be_a_base() {
        return Err(TransportError::InvalidRequest {
            message: format!("server URL '{raw}' cannot be used as a base URL"),
        });
    }
    if url.path().is_empty() || url.path() == "/" {
        url.set_path(API_ROOT);
    } else if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn map_reqwest_error(operation: &'static str, url: &str, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_decode() {
        TransportError::Decode {
            operation,
            message: error.to_string(),
        }
    } else {
        TransportError::Connect {
            url: url.to_string(),
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }
}

fn file_name_for(stem: &str, content_type: Option<&str>) -> String {
    let mime = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase());
    let extension = match mime.as_deref() {
        Some("text/html") => "html",
        Some("application/pdf") => "pdf",
        Some("application/zip") | Some("application/x-zip-compressed") => "zip",
        Some("application/json") => "json",
        Some("text/plain") => "txt",
        _ => "bin",
    };
    format!("{stem}.{extension}")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_gets_api_root() {
        let url = normalize_base("http://localhost:1080").unwrap();
        assert_eq!(url.as_str(), "http://localhost:1080/api/v2/");
        let url = normalize_base("http://localhost:1080/").unwrap();
        assert_eq!(url.as_str(), "http://localhost:1080/api/v2/");
    }

    #[test]
    fn test_explicit_path_is_kept() {
        let url = normalize_base("https://defensics.example.com/custom/api").unwrap();
        assert_eq!(url.as_str(), "https://defensics.example.com/custom/api/");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = normalize_base("not a url").unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest { .. }));
        let err = normalize_base("mailto:someone@example.com").unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest { .. }));
    }

    #[test]
    fn test_endpoint_escapes_run_id() {
        let client = HttpDefensicsClient::new(ClientSettings {
            name: "test".to_string(),
            url: "http://localhost:1080/".to_string(),
            token: None,
            certificate_validation_disabled: false,
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();
        let url = client.endpoint(&["runs", "a/b", "report"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:1080/api/v2/runs/a%2Fb/report");
    }

    #[test]
    fn test_file_name_from_content_type() {
        assert_eq!(file_name_for("report", Some("text/html; charset=utf-8")), "report.html");
        assert_eq!(file_name_for("result-package", Some("application/zip")), "result-package.zip");
        assert_eq!(file_name_for("report", None), "report.bin");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 4), "abcd...");
    }
}
