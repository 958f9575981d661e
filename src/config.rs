//! Configuration for the conversion service and the optional storage relay.
//!
//! Everything is controlled through [`ConvertConfig`], built via its
//! [`ConvertConfigBuilder`]. One struct holds every knob, so a config can
//! be shared across tasks, logged whole, and diffed when two runs disagree.
//!
//! # Design choice: builder over constructor
//! Callers set the handful of fields they care about and inherit documented
//! defaults for the rest; `build()` rejects combinations that would
//! otherwise only surface as a failure at the network boundary.

use crate::error::Pdf2SheetError;
use std::fmt;
use std::path::PathBuf;

/// Environment variable carrying the conversion service secret.
pub const ENV_API_SECRET: &str = "CONVERTAPI_SECRET";
/// Environment variable overriding the conversion service base URL.
pub const ENV_API_BASE_URL: &str = "CONVERTAPI_BASE_URL";
/// Environment variable carrying the storage relay endpoint.
pub const ENV_DRIVE_ENDPOINT: &str = "DRIVE_RELAY_URL";
/// Environment variable overriding the credential file location.
pub const ENV_CREDENTIALS_PATH: &str = "PDF2SHEET_CREDENTIALS";

/// Configuration for conversion runs.
///
/// Built via [`ConvertConfig::builder()`] or [`ConvertConfig::from_env()`].
///
/// # Example
/// ```rust
/// use pdf2sheet::ConvertConfig;
///
/// let config = ConvertConfig::builder()
///     .api_secret("top-secret")
///     .drive_endpoint("https://relay.example.com/upload")
///     .build()
///     .unwrap();
/// assert_eq!(config.target_format, "xlsx");
/// ```
#[derive(Clone)]
pub struct ConvertConfig {
    /// Base URL of the ConvertAPI-compatible service. Default:
    /// `https://v2.convertapi.com`. Never carries a trailing slash; the
    /// builder strips one.
    pub api_base_url: String,

    /// API secret for the conversion service. Required, non-empty.
    ///
    /// Sent both as the `Secret` query parameter and as a bearer
    /// `Authorization` header, matching what the service accepts from
    /// either generation of its API.
    pub api_secret: String,

    /// Source format segment of the conversion route. Default: `pdf`.
    pub source_format: String,

    /// Target format segment of the conversion route. Default: `xlsx`.
    ///
    /// Also drives the display-name fallback: when the service omits a
    /// file name, the source name's extension is swapped for this one.
    pub target_format: String,

    /// Per-request timeout in seconds for both remote services. Default: 120.
    ///
    /// Conversion of a large scanned statement can take tens of seconds on
    /// the service side; two minutes covers the slow tail without letting a
    /// dead connection hang a run forever.
    pub request_timeout_secs: u64,

    /// Storage relay endpoint. `None` means storage is unconfigured: runs
    /// complete on conversion alone and never enter the upload phase.
    pub drive_endpoint: Option<String>,

    /// Consecutive upload failures tolerated before the run report flips
    /// `storage_degraded`. Default: 3.
    ///
    /// Upload failures are always non-fatal; this threshold only controls
    /// when the condition is surfaced as a persistent-misconfiguration
    /// signal rather than a one-off blip.
    pub upload_failure_threshold: u32,

    /// Where the credential store persists its slot. `None` lets the
    /// embedding application decide (the CLI falls back to
    /// `$PDF2SHEET_CREDENTIALS`, then `$HOME/.config/pdf2sheet/credentials.json`).
    pub credentials_path: Option<PathBuf>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://v2.convertapi.com".to_string(),
            api_secret: String::new(),
            source_format: "pdf".to_string(),
            target_format: "xlsx".to_string(),
            request_timeout_secs: 120,
            drive_endpoint: None,
            upload_failure_threshold: 3,
            credentials_path: None,
        }
    }
}

impl fmt::Debug for ConvertConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertConfig")
            .field("api_base_url", &self.api_base_url)
            .field("api_secret", &"<redacted>")
            .field("source_format", &self.source_format)
            .field("target_format", &self.target_format)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("drive_endpoint", &self.drive_endpoint)
            .field("upload_failure_threshold", &self.upload_failure_threshold)
            .field("credentials_path", &self.credentials_path)
            .finish()
    }
}

impl ConvertConfig {
    /// Create a new builder for `ConvertConfig`.
    pub fn builder() -> ConvertConfigBuilder {
        ConvertConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a configuration from the environment.
    ///
    /// Reads [`ENV_API_SECRET`] (required), [`ENV_API_BASE_URL`],
    /// [`ENV_DRIVE_ENDPOINT`], and [`ENV_CREDENTIALS_PATH`].
    pub fn from_env() -> Result<Self, Pdf2SheetError> {
        let mut builder = Self::builder();
        match std::env::var(ENV_API_SECRET) {
            Ok(secret) => builder = builder.api_secret(secret),
            Err(_) => {
                return Err(Pdf2SheetError::InvalidConfig(format!(
                    "{ENV_API_SECRET} is not set"
                )))
            }
        }
        if let Ok(base) = std::env::var(ENV_API_BASE_URL) {
            builder = builder.api_base_url(base);
        }
        if let Ok(endpoint) = std::env::var(ENV_DRIVE_ENDPOINT) {
            builder = builder.drive_endpoint(endpoint);
        }
        if let Ok(path) = std::env::var(ENV_CREDENTIALS_PATH) {
            builder = builder.credentials_path(PathBuf::from(path));
        }
        builder.build()
    }

    /// True when a storage relay endpoint is configured.
    pub fn storage_configured(&self) -> bool {
        self.drive_endpoint.is_some()
    }
}

/// Builder for [`ConvertConfig`].
#[derive(Debug)]
pub struct ConvertConfigBuilder {
    config: ConvertConfig,
}

impl ConvertConfigBuilder {
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        let url: String = url.into();
        self.config.api_base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn api_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.api_secret = secret.into();
        self
    }

    pub fn source_format(mut self, fmt: impl Into<String>) -> Self {
        self.config.source_format = fmt.into();
        self
    }

    pub fn target_format(mut self, fmt: impl Into<String>) -> Self {
        self.config.target_format = fmt.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn drive_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.drive_endpoint = Some(endpoint.into());
        self
    }

    pub fn upload_failure_threshold(mut self, n: u32) -> Self {
        self.config.upload_failure_threshold = n.max(1);
        self
    }

    pub fn credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.credentials_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConvertConfig, Pdf2SheetError> {
        let c = &self.config;
        if c.api_secret.trim().is_empty() {
            return Err(Pdf2SheetError::InvalidConfig(format!(
                "API secret must not be empty (set {ENV_API_SECRET})"
            )));
        }
        if !c.api_base_url.starts_with("http://") && !c.api_base_url.starts_with("https://") {
            return Err(Pdf2SheetError::InvalidConfig(format!(
                "API base URL must be http(s), got '{}'",
                c.api_base_url
            )));
        }
        if c.source_format.is_empty() || c.target_format.is_empty() {
            return Err(Pdf2SheetError::InvalidConfig(
                "Source and target formats must not be empty".into(),
            ));
        }
        if let Some(endpoint) = &c.drive_endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(Pdf2SheetError::InvalidConfig(format!(
                    "Drive endpoint must be http(s), got '{endpoint}'"
                )));
            }
        }
        Ok(self.config)
    }
}
