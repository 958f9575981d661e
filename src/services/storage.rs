//! Storage collaborator: trait and the Drive relay HTTP adapter.
//!
//! The relay endpoint accepts a JSON description of an already-converted
//! artifact (its download URL, the target name, and the credential payload)
//! and copies it into Drive server-side, so the document bytes never pass
//! through this process a second time.
//!
//! Every failure here is an [`UploadError`] — the non-fatal kind. The
//! orchestrator downgrades it to a warning; only direct callers of the
//! trait see it as an `Err`.

use crate::config::ConvertConfig;
use crate::error::{Pdf2SheetError, UploadError};
use crate::output::UploadResult;
use crate::progress::ProgressHandle;
use crate::services::credentials::CredentialStore;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::{debug, info};

// Raw upload-phase milestones.
const PROGRESS_CREDENTIAL_READY: f32 = 10.0;
const PROGRESS_RESPONDED: f32 = 60.0;

/// Relays a converted artifact into remote storage.
///
/// Implemented by [`DriveRelayClient`] and by the generated
/// [`MockStorageUploader`] in tests. Must not be invoked unless the
/// credential store reports initialized; hitting it anyway yields
/// [`UploadError::NotInitialized`].
#[cfg_attr(any(test, feature = "test-export-mocks"), mockall::automock)]
#[async_trait]
pub trait StorageUploader: Send + Sync {
    /// Copy the artifact at `source_url` into storage under `file_name`.
    async fn upload<'a>(
        &self,
        source_url: &'a str,
        file_name: &'a str,
        progress: ProgressHandle,
    ) -> Result<UploadResult, UploadError>;
}

/// HTTP adapter for the Drive relay endpoint.
pub struct DriveRelayClient {
    http: reqwest::Client,
    endpoint: String,
    credentials: Arc<CredentialStore>,
}

impl DriveRelayClient {
    /// Build a client from the configuration and a shared credential store.
    ///
    /// Fails when the configuration carries no relay endpoint.
    pub fn new(
        config: &ConvertConfig,
        credentials: Arc<CredentialStore>,
    ) -> Result<Self, Pdf2SheetError> {
        let endpoint = config.drive_endpoint.clone().ok_or_else(|| {
            Pdf2SheetError::InvalidConfig("Drive relay endpoint is not configured".into())
        })?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Pdf2SheetError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint,
            credentials,
        })
    }
}

#[async_trait]
impl StorageUploader for DriveRelayClient {
    async fn upload<'a>(
        &self,
        source_url: &'a str,
        file_name: &'a str,
        progress: ProgressHandle,
    ) -> Result<UploadResult, UploadError> {
        let Some(key) = self.credentials.credential().await else {
            return Err(UploadError::NotInitialized);
        };
        progress.on_progress(PROGRESS_CREDENTIAL_READY);
        debug!("Relaying '{}' to {}", file_name, self.endpoint);

        let body = DriveUploadBody {
            file_url: source_url,
            file_name,
            service_account_key: &key,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| UploadError::Unreachable {
                reason: e.to_string(),
            })?;
        progress.on_progress(PROGRESS_RESPONDED);

        let status = response.status();
        let text = response.text().await.map_err(|e| UploadError::Unreachable {
            reason: e.to_string(),
        })?;
        let result = resolve_view_link(status, &text)?;
        progress.on_progress(100.0);
        info!("Stored '{}' at {}", file_name, result.view_url);
        Ok(result)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, serde::Serialize)]
struct DriveUploadBody<'a> {
    #[serde(rename = "fileUrl")]
    file_url: &'a str,
    #[serde(rename = "fileName")]
    file_name: &'a str,
    #[serde(rename = "serviceAccountKey")]
    service_account_key: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct DriveUploadResponse {
    #[serde(rename = "webViewLink")]
    web_view_link: Option<String>,
    id: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct DriveErrorBody {
    error: Option<String>,
}

/// Resolve the view link from a relay response, falling back to a link
/// constructed from the returned file id.
fn resolve_view_link(status: StatusCode, body: &str) -> Result<UploadResult, UploadError> {
    if !status.is_success() {
        let message = serde_json::from_str::<DriveErrorBody>(body)
            .ok()
            .and_then(|e| e.error)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unrecognised status")
                    .to_string()
            });
        return Err(UploadError::Remote {
            status: status.as_u16(),
            message,
        });
    }

    let parsed: DriveUploadResponse =
        serde_json::from_str(body).map_err(|_| UploadError::MissingLink)?;
    if let Some(link) = parsed.web_view_link.filter(|l| !l.is_empty()) {
        return Ok(UploadResult { view_url: link });
    }
    if let Some(id) = parsed.id.filter(|i| !i.is_empty()) {
        return Ok(UploadResult {
            view_url: drive_view_url(&id),
        });
    }
    Err(UploadError::MissingLink)
}

/// Deterministic view URL for a Drive file id.
fn drive_view_url(id: &str) -> String {
    format!("https://drive.google.com/file/d/{id}/view")
}
