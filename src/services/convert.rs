//! Conversion collaborator: trait, tagged outcome, and the
//! ConvertAPI-compatible HTTP adapter.
//!
//! ## Why a tagged outcome instead of an error?
//!
//! A password-protected document is not a fault — it is a request for more
//! input. Returning it as [`Converted::SecretRequired`] instead of an `Err`
//! makes it impossible for a caller to accidentally funnel the recoverable
//! case into generic failure handling. Genuine faults (rejection, transport,
//! empty response) stay on the error path.

use crate::config::ConvertConfig;
use crate::error::Pdf2SheetError;
use crate::output::ConversionResult;
use crate::progress::ProgressHandle;
use crate::request::SourceDocument;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::multipart;
use reqwest::StatusCode;
use tracing::{debug, info};

/// Error code the service pairs with a password-related message when the
/// document is protected.
const SECRET_REQUIRED_CODE: i64 = 5003;

static RE_PASSWORD_HINT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)password").unwrap());

// Raw conversion-phase milestones, reported through the sink as the call
// moves past each observable stage.
const PROGRESS_PREPARED: f32 = 5.0;
const PROGRESS_FORM_READY: f32 = 15.0;
const PROGRESS_RESPONDED: f32 = 50.0;
const PROGRESS_BODY_READ: f32 = 75.0;

/// Outcome of one conversion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Converted {
    /// The service produced an artifact.
    Ready(ConversionResult),
    /// The document is protected; resubmit with a secret.
    SecretRequired,
}

/// Performs the document → spreadsheet conversion.
///
/// Implementations must report progress monotonically through the call via
/// the sink. The trait is implemented by [`ConvertApiClient`] and by the
/// generated [`MockConversionClient`] in tests.
#[cfg_attr(any(test, feature = "test-export-mocks"), mockall::automock)]
#[async_trait]
pub trait ConversionClient: Send + Sync {
    /// Convert `document`, optionally unlocking it with `secret`.
    async fn convert<'a>(
        &self,
        document: &'a SourceDocument,
        secret: Option<&'a str>,
        progress: ProgressHandle,
    ) -> Result<Converted, Pdf2SheetError>;
}

/// HTTP adapter for a ConvertAPI-compatible conversion service.
///
/// One instance holds one connection pool; clone-free sharing happens via
/// `Arc` at the orchestrator boundary.
pub struct ConvertApiClient {
    http: reqwest::Client,
    base_url: String,
    api_secret: String,
    source_format: String,
    target_format: String,
}

impl ConvertApiClient {
    /// Build a client from the configuration.
    pub fn new(config: &ConvertConfig) -> Result<Self, Pdf2SheetError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Pdf2SheetError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.api_base_url.clone(),
            api_secret: config.api_secret.clone(),
            source_format: config.source_format.clone(),
            target_format: config.target_format.clone(),
        })
    }

    fn route(&self) -> String {
        format!(
            "{}/convert/{}/to/{}",
            self.base_url, self.source_format, self.target_format
        )
    }
}

#[async_trait]
impl ConversionClient for ConvertApiClient {
    async fn convert<'a>(
        &self,
        document: &'a SourceDocument,
        secret: Option<&'a str>,
        progress: ProgressHandle,
    ) -> Result<Converted, Pdf2SheetError> {
        progress.on_progress(PROGRESS_PREPARED);
        let (file_name, data) = document.load().await?;
        debug!("Submitting '{}' ({} bytes) to {}", file_name, data.len(), self.route());

        let mut form = multipart::Form::new()
            .part(
                "File",
                multipart::Part::bytes(data).file_name(file_name.clone()),
            )
            // StoreFile makes the service keep the artifact and hand back a
            // download URL instead of inlining the bytes.
            .text("StoreFile", "true");
        if let Some(secret) = secret {
            form = form.text("Password", secret.to_string());
        }
        progress.on_progress(PROGRESS_FORM_READY);

        let url = format!("{}?Secret={}", self.route(), self.api_secret);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_secret)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Pdf2SheetError::ConversionUnreachable {
                reason: e.to_string(),
            })?;
        progress.on_progress(PROGRESS_RESPONDED);

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Pdf2SheetError::ConversionUnreachable {
                reason: e.to_string(),
            })?;
        progress.on_progress(PROGRESS_BODY_READ);

        let outcome = classify_response(status, &body, &file_name, &self.target_format)?;
        match &outcome {
            Converted::Ready(result) => {
                progress.on_progress(100.0);
                info!("Converted '{}' -> '{}'", file_name, result.file_name);
            }
            Converted::SecretRequired => {
                info!("'{}' is protected; a secret is required", file_name);
            }
        }
        Ok(outcome)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────
// Field names follow the service's PascalCase JSON.

#[derive(Debug, serde::Deserialize)]
struct ConvertApiSuccessBody {
    #[serde(rename = "Files", default)]
    files: Vec<ConvertApiFile>,
}

#[derive(Debug, serde::Deserialize)]
struct ConvertApiFile {
    #[serde(rename = "Url")]
    url: String,
    #[serde(rename = "FileName")]
    file_name: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ConvertApiErrorBody {
    #[serde(rename = "Code")]
    code: Option<i64>,
    #[serde(rename = "Message")]
    message: Option<String>,
}

/// Classify a raw service response into an outcome or a fatal error.
///
/// Success bodies that cannot be parsed, or that carry an empty `Files`
/// list, count as "no usable output reference".
fn classify_response(
    status: StatusCode,
    body: &str,
    source_name: &str,
    target_format: &str,
) -> Result<Converted, Pdf2SheetError> {
    if !status.is_success() {
        if let Ok(err) = serde_json::from_str::<ConvertApiErrorBody>(body) {
            if is_secret_required(&err) {
                return Ok(Converted::SecretRequired);
            }
            if let Some(message) = err.message {
                return Err(Pdf2SheetError::ConversionFailed {
                    status: status.as_u16(),
                    message,
                });
            }
        }
        return Err(Pdf2SheetError::ConversionFailed {
            status: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("unrecognised status")
                .to_string(),
        });
    }

    let parsed: ConvertApiSuccessBody = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) => return Err(Pdf2SheetError::EmptyConversionResult),
    };
    match parsed.files.into_iter().next() {
        None => Err(Pdf2SheetError::EmptyConversionResult),
        Some(file) => {
            let file_name = file
                .file_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| converted_file_name(source_name, target_format));
            Ok(Converted::Ready(ConversionResult {
                download_url: file.url,
                file_name,
            }))
        }
    }
}

/// The protected-document indicator: the known code AND a password-related
/// message. Either alone is treated as an ordinary rejection.
fn is_secret_required(err: &ConvertApiErrorBody) -> bool {
    err.code == Some(SECRET_REQUIRED_CODE)
        && err
            .message
            .as_deref()
            .is_some_and(|m| RE_PASSWORD_HINT.is_match(m))
}

/// Display name for the artifact when the service omits one: the source
/// name with its extension swapped for the target format.
fn converted_file_name(source_name: &str, target_format: &str) -> String {
    let stem = match source_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => source_name,
    };
    format!("{stem}.{target_format}")
}
