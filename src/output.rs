//! Result types produced by a run.
//!
//! [`ConversionResult`] and [`UploadResult`] are immutable once produced and
//! are discarded by [`crate::Orchestrator::reset`]. [`RunReport`] is a
//! point-in-time snapshot of everything observable about the current or most
//! recent run — callers poll it instead of juggling seven accessors, and the
//! CLI serialises it for `--json` output.

use crate::error::{Pdf2SheetError, UploadError};
use crate::state::RunState;
use serde::{Deserialize, Serialize};

/// The primary artifact of a run: where to download the spreadsheet.
///
/// Produced exactly once per successful conversion phase. Stays valid even
/// when the follow-up storage relay fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Download URL of the converted spreadsheet.
    pub download_url: String,
    /// Display name of the artifact, e.g. `statement.xlsx`.
    pub file_name: String,
}

/// The relayed copy in remote storage.
///
/// Produced at most once per run, only when storage is configured and the
/// upload phase succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Browser-openable view URL of the stored copy.
    pub view_url: String,
}

/// Snapshot of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Current lifecycle state.
    pub state: RunState,
    /// Overall weighted progress, 0–100.
    pub progress: f32,
    /// Present once the conversion phase has succeeded.
    pub conversion: Option<ConversionResult>,
    /// Present only when the storage relay succeeded.
    pub upload: Option<UploadResult>,
    /// The captured upload failure, when the relay failed but the run
    /// completed anyway.
    pub upload_warning: Option<UploadError>,
    /// The fatal error, when the run ended in Failed.
    pub error: Option<Pdf2SheetError>,
    /// True once consecutive upload failures reached the configured
    /// threshold. Cleared by the next upload success.
    pub storage_degraded: bool,
    /// Wall-clock duration of the conversion phase, if it ran to an end.
    pub convert_ms: Option<u64>,
    /// Wall-clock duration of the upload phase, if it ran to an end.
    pub upload_ms: Option<u64>,
}

impl RunReport {
    /// True when the run completed but the storage copy is missing.
    pub fn has_warning(&self) -> bool {
        self.upload_warning.is_some()
    }
}
