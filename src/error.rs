//! Error types for the pdf2sheet library.
//!
//! The two enums mirror the two failure classes a run can hit:
//!
//! * [`Pdf2SheetError`] — **Fatal**: the run cannot produce a spreadsheet at
//!   all (consent withheld, no document, conversion service rejected the
//!   request). Ends the run in [`crate::RunState::Failed`].
//!
//! * [`UploadError`] — **Non-fatal**: the storage relay failed after the
//!   conversion already succeeded. Recorded as a warning on the run report;
//!   the run still completes and the download URL stays valid.
//!
//! The separation lets callers decide their own tolerance: treat a missing
//! Drive copy as a shrug, or watch the warning stream and re-relay later.
//!
//! A password-protected input is deliberately *neither* of these — it is the
//! [`crate::Converted::SecretRequired`] outcome, because it is a request for
//! more input, not a fault.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2sheet library.
///
/// Upload-phase failures use [`UploadError`] and are recorded on
/// [`crate::RunReport`] rather than propagated here.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum Pdf2SheetError {
    // ── Request validation (no network is touched) ────────────────────────
    /// The caller did not tick the consent flag.
    #[error("Consent is required before the document is sent anywhere.\nSet consent on the request (CLI: pass --consent).")]
    ConsentRequired,

    /// The request carries no source document.
    #[error("No source document was provided.\nAttach a PDF to the request before starting a run.")]
    DocumentMissing,

    // ── Document input ────────────────────────────────────────────────────
    /// The source document could not be read from disk.
    #[error("Could not read document '{path}': {reason}\nCheck the path exists and is readable.")]
    DocumentUnreadable { path: PathBuf, reason: String },

    // ── Conversion service ────────────────────────────────────────────────
    /// The conversion service answered with a non-success status.
    #[error("Conversion service rejected the request: HTTP {status} {message}")]
    ConversionFailed { status: u16, message: String },

    /// The conversion service could not be reached at all.
    #[error("Could not reach the conversion service: {reason}\nCheck your internet connection and the configured base URL.")]
    ConversionUnreachable { reason: String },

    /// The service reported success but returned no output files.
    #[error("Conversion reported success but returned no output files.\nThe document may be empty or unsupported.")]
    EmptyConversionResult,

    // ── Credentials ───────────────────────────────────────────────────────
    /// The service-account payload failed validation.
    #[error("Credential payload was rejected: {reason}\nExpected a service-account key as a JSON object.")]
    CredentialRejected { reason: String },

    /// The credential backing store failed to read or write.
    #[error("Credential storage failed: {reason}")]
    CredentialStorage { reason: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Pdf2SheetError {
    /// True for the pre-network validation failures.
    ///
    /// These never touched a remote service; the caller can correct the
    /// request and start again without penalty.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ConsentRequired | Self::DocumentMissing)
    }
}

/// A non-fatal error from the storage relay phase.
///
/// Recorded on [`crate::RunReport`] as a warning when the upload fails.
/// The run still ends in Complete; only the remote copy is missing.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum UploadError {
    /// No credential is persisted, so the relay cannot authenticate.
    #[error("Storage is not connected.\nInitialize it with a service-account key first (CLI: --connect-drive <key.json>).")]
    NotInitialized,

    /// The relay endpoint answered with a non-success status.
    #[error("Storage relay rejected the upload: HTTP {status} {message}")]
    Remote { status: u16, message: String },

    /// The relay endpoint could not be reached at all.
    #[error("Could not reach the storage relay: {reason}")]
    Unreachable { reason: String },

    /// The relay answered success but exposed neither a view link nor a
    /// file id to build one from.
    #[error("Storage relay returned no usable link for the uploaded copy")]
    MissingLink,
}
