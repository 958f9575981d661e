//! # pdf2sheet
//!
//! Convert PDF documents (bank statements, invoices, reports) to spreadsheets
//! via a ConvertAPI-compatible service, with optional delivery of the result
//! into Google Drive through a relay endpoint.
//!
//! ## Why this crate?
//!
//! The interesting part is not the HTTP calls — it is the orchestration
//! between them. A run sequences two independent remote phases with one
//! unified progress scale and three very different failure classes: local
//! validation problems (fix the request, try again), a password-protected
//! document (suspend, ask for the secret, resume), and storage-relay
//! failures (downgrade to a warning — a missing Drive copy must never
//! invalidate a finished conversion). [`Orchestrator`] encodes exactly those
//! rules and nothing else; the collaborators behind it are swappable traits.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ConversionRequest
//!  │
//!  ├─ 1. Validate  consent + document present (no network yet)
//!  ├─ 2. Convert   multipart POST to the conversion service
//!  │               ├─ protected? → SecretRequired, resubmit with secret
//!  │               └─ ok → ConversionResult (download URL + name)
//!  ├─ 3. Relay     optional JSON POST to the Drive relay
//!  │               └─ failure → warning, run still completes
//!  └─ 4. Report    state / progress / results / warning snapshot
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2sheet::{
//!     ConvertApiClient, ConvertConfig, ConversionRequest, Orchestrator, SourceDocument,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConvertConfig::from_env()?; // CONVERTAPI_SECRET
//!     let orchestrator = Orchestrator::new(Arc::new(ConvertApiClient::new(&config)?));
//!
//!     let request = ConversionRequest::new(SourceDocument::Path("statement.pdf".into()))
//!         .with_consent(true);
//!     orchestrator.start(request).await;
//!
//!     if let Some(result) = orchestrator.conversion_result() {
//!         println!("{} -> {}", result.file_name, result.download_url);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2sheet` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `test-export-mocks` | on | Exports mockall mocks of the collaborator traits for downstream tests |
//!
//! Disable both when embedding only the library:
//! ```toml
//! pdf2sheet = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod progress;
pub mod request;
pub mod services;
pub mod state;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConvertConfig, ConvertConfigBuilder, ENV_API_BASE_URL, ENV_API_SECRET, ENV_CREDENTIALS_PATH,
    ENV_DRIVE_ENDPOINT,
};
pub use error::{Pdf2SheetError, UploadError};
pub use orchestrator::Orchestrator;
pub use output::{ConversionResult, RunReport, UploadResult};
pub use progress::{
    overall_progress, NoopObserver, NoopProgress, Phase, ProgressHandle, ProgressSink,
    RunObserver, CONVERT_PHASE_WEIGHT,
};
pub use request::{ConversionRequest, SourceDocument};
pub use services::{
    ConversionClient, ConvertApiClient, Converted, CredentialBackend, CredentialStore,
    DriveRelayClient, FileBackend, MemoryBackend, StorageUploader, StoredCredential,
};
pub use state::RunState;

#[cfg(any(test, feature = "test-export-mocks"))]
pub use services::{MockConversionClient, MockStorageUploader};
