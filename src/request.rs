//! Request types: the source document and the per-run submission.
//!
//! A [`ConversionRequest`] is consumed by one call to
//! [`crate::Orchestrator::start`]. Resubmitting after a
//! [`crate::RunState::SecretRequired`] suspension means building a new
//! request with the same document and a populated secret — the orchestrator
//! treats that as a fresh run.

use crate::error::Pdf2SheetError;
use std::fmt;
use std::path::{Path, PathBuf};

/// The source document for a run — a path on disk or named in-memory bytes.
///
/// Bytes inputs exist so embedding callers (servers, tests) can hand over a
/// document they already hold without a temp file round-trip.
#[derive(Clone)]
pub enum SourceDocument {
    /// Read from the file system when the conversion phase starts.
    Path(PathBuf),
    /// Already-loaded document bytes with the display name to submit.
    Bytes { name: String, data: Vec<u8> },
}

impl SourceDocument {
    /// The display name submitted to the conversion service.
    ///
    /// For paths this is the final component; a path with no usable file
    /// name falls back to `"document.pdf"`.
    pub fn display_name(&self) -> String {
        match self {
            SourceDocument::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document.pdf".to_string()),
            SourceDocument::Bytes { name, .. } => name.clone(),
        }
    }

    /// Load the document bytes, reading from disk for path inputs.
    ///
    /// No format sniffing happens here; the conversion service is the
    /// authority on whether it can handle the bytes.
    pub async fn load(&self) -> Result<(String, Vec<u8>), Pdf2SheetError> {
        match self {
            SourceDocument::Path(path) => {
                let data = tokio::fs::read(path).await.map_err(|e| {
                    Pdf2SheetError::DocumentUnreadable {
                        path: path.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Ok((self.display_name(), data))
            }
            SourceDocument::Bytes { name, data } => Ok((name.clone(), data.clone())),
        }
    }

    /// The on-disk path, when this document is a path input.
    pub fn path(&self) -> Option<&Path> {
        match self {
            SourceDocument::Path(p) => Some(p),
            SourceDocument::Bytes { .. } => None,
        }
    }
}

impl fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDocument::Path(path) => f.debug_tuple("Path").field(path).finish(),
            SourceDocument::Bytes { name, data } => f
                .debug_struct("Bytes")
                .field("name", name)
                .field("len", &data.len())
                .finish(),
        }
    }
}

/// One submission to the orchestrator.
///
/// Immutable once a run starts; the orchestrator takes it by value.
///
/// # Example
/// ```rust
/// use pdf2sheet::{ConversionRequest, SourceDocument};
///
/// let request = ConversionRequest::new(SourceDocument::Path("statement.pdf".into()))
///     .with_consent(true)
///     .with_secret("1234");
/// assert!(request.consent);
/// ```
#[derive(Clone, Default)]
pub struct ConversionRequest {
    /// The document to convert. Absent on a deliberately empty request;
    /// `start()` fails validation without touching the network.
    pub document: Option<SourceDocument>,
    /// Secret unlocking a protected document. Populated on resubmission
    /// after a SecretRequired suspension.
    pub secret: Option<String>,
    /// Explicit caller consent to send the document to remote services.
    /// Defaults to false; a run never starts without it.
    pub consent: bool,
}

impl ConversionRequest {
    /// A request for the given document, consent not yet given.
    pub fn new(document: SourceDocument) -> Self {
        Self {
            document: Some(document),
            secret: None,
            consent: false,
        }
    }

    /// Attach the secret for a protected document.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Set the consent flag.
    pub fn with_consent(mut self, consent: bool) -> Self {
        self.consent = consent;
        self
    }
}

impl fmt::Debug for ConversionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionRequest")
            .field("document", &self.document)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("consent", &self.consent)
            .finish()
    }
}
