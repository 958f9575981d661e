//! The run state machine: validation, conversion, optional storage relay,
//! and the bookkeeping that keeps stale async responses from corrupting a
//! newer run.
//!
//! ## Why a generation counter instead of task aborts?
//!
//! The two remote calls cannot be aborted mid-flight in any useful way — the
//! conversion service will finish (and bill) the job whether or not anyone
//! is listening. What *can* be guaranteed is that a response landing after
//! [`Orchestrator::reset`] changes nothing: every run carries a generation
//! number, and every post-await commit re-checks it under the lock before
//! touching state. A mismatch means the run was superseded and the commit is
//! dropped on the floor. Cancellation is therefore cooperative and
//! observable, not an accident of scheduling.
//!
//! The lock is a plain [`std::sync::Mutex`] held only for field updates,
//! never across an await; observer callbacks fire after it is released.

use crate::error::{Pdf2SheetError, UploadError};
use crate::output::RunReport;
use crate::progress::{overall_progress, NoopObserver, Phase, ProgressSink, RunObserver};
use crate::request::{ConversionRequest, SourceDocument};
use crate::services::{ConversionClient, Converted, StorageUploader};
use crate::state::RunState;
use crate::{ConversionResult, UploadResult};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Drives one conversion run end to end.
///
/// Collaborators are injected, so embedders and tests decide what sits
/// behind the traits. One instance runs at most one run at a time; a
/// `start()` while a run is in flight is refused, never queued.
///
/// # Example
/// ```rust,no_run
/// use pdf2sheet::{
///     ConvertApiClient, ConvertConfig, ConversionRequest, Orchestrator, SourceDocument,
/// };
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), pdf2sheet::Pdf2SheetError> {
/// let config = ConvertConfig::builder().api_secret("secret").build()?;
/// let orchestrator = Orchestrator::new(Arc::new(ConvertApiClient::new(&config)?));
///
/// let request = ConversionRequest::new(SourceDocument::Path("statement.pdf".into()))
///     .with_consent(true);
/// orchestrator.start(request).await;
/// println!("run ended in {}", orchestrator.state());
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    converter: Arc<dyn ConversionClient>,
    uploader: Option<Arc<dyn StorageUploader>>,
    observer: Arc<dyn RunObserver>,
    upload_failure_threshold: u32,
    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<Inner>,
}

struct Inner {
    state: RunState,
    progress: f32,
    generation: u64,
    conversion: Option<ConversionResult>,
    upload: Option<UploadResult>,
    upload_warning: Option<UploadError>,
    error: Option<Pdf2SheetError>,
    consecutive_upload_failures: u32,
    convert_ms: Option<u64>,
    upload_ms: Option<u64>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: RunState::Idle,
            progress: 0.0,
            generation: 0,
            conversion: None,
            upload: None,
            upload_warning: None,
            error: None,
            consecutive_upload_failures: 0,
            convert_ms: None,
            upload_ms: None,
        }
    }

    /// Clear everything scoped to a single run. The generation and the
    /// cross-run upload-failure counter are managed by the callers.
    fn clear_run(&mut self) {
        self.progress = 0.0;
        self.conversion = None;
        self.upload = None;
        self.upload_warning = None;
        self.error = None;
        self.convert_ms = None;
        self.upload_ms = None;
    }
}

impl Orchestrator {
    /// An orchestrator with no storage relay and no observer.
    pub fn new(converter: Arc<dyn ConversionClient>) -> Self {
        Self {
            converter,
            uploader: None,
            observer: Arc::new(NoopObserver),
            upload_failure_threshold: 3,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::new()),
            }),
        }
    }

    /// Configure the storage relay. Runs then enter the upload phase after
    /// a successful conversion instead of completing immediately.
    pub fn with_uploader(mut self, uploader: Arc<dyn StorageUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Install a run observer.
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Consecutive upload failures tolerated before reports flip
    /// `storage_degraded`. Clamped to at least 1; default 3.
    pub fn with_upload_failure_threshold(mut self, n: u32) -> Self {
        self.upload_failure_threshold = n.max(1);
        self
    }

    /// Run one conversion end to end.
    ///
    /// Observable through the accessors and the installed
    /// [`RunObserver`]; the method itself returns nothing. Refused (with a
    /// log line, without touching the in-flight run) when called while a
    /// run is active. A run suspended in
    /// [`RunState::SecretRequired`] is resumed by calling this again with
    /// the same document and a populated secret — that is a new run.
    ///
    /// # Arguments
    /// * `request` — the document, optional secret, and consent flag
    pub async fn start(&self, request: ConversionRequest) {
        // ── Step 1: claim the run slot ───────────────────────────────────
        let generation = {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.state.is_active() {
                warn!("A run is already in flight; start() refused");
                return;
            }
            inner.generation += 1;
            inner.state = RunState::Validating;
            inner.clear_run();
            inner.generation
        };
        self.observer.on_state_change(RunState::Validating);
        self.observer.on_progress(0.0);
        info!("Starting run {generation}");

        // ── Step 2: validate before any network ──────────────────────────
        let document = match validate(&request) {
            Ok(document) => document,
            Err(error) => {
                self.fail(generation, error);
                return;
            }
        };

        // ── Step 3: conversion phase ─────────────────────────────────────
        if !self.transition(generation, RunState::Converting) {
            return;
        }
        let storage_configured = self.uploader.is_some();
        let sink: Arc<dyn ProgressSink> = Arc::new(PhaseSink {
            shared: Arc::clone(&self.shared),
            observer: Arc::clone(&self.observer),
            phase: Phase::Convert,
            storage_configured,
            generation,
        });
        let convert_start = Instant::now();
        let outcome = self
            .converter
            .convert(document, request.secret.as_deref(), sink)
            .await;
        let convert_ms = convert_start.elapsed().as_millis() as u64;

        let result = match outcome {
            Err(error) => {
                self.commit(generation, |inner| inner.convert_ms = Some(convert_ms));
                self.fail(generation, error);
                return;
            }
            Ok(Converted::SecretRequired) => {
                let committed = self.commit(generation, |inner| {
                    inner.state = RunState::SecretRequired;
                    inner.convert_ms = Some(convert_ms);
                });
                if committed {
                    info!("Run {generation} suspended: the document needs a secret");
                    self.observer.on_state_change(RunState::SecretRequired);
                }
                return;
            }
            Ok(Converted::Ready(result)) => result,
        };

        let committed = self.commit(generation, |inner| {
            inner.convert_ms = Some(convert_ms);
            inner.conversion = Some(result.clone());
        });
        if !committed {
            return;
        }
        debug!("Conversion produced '{}' in {convert_ms}ms", result.file_name);

        // ── Step 4: storage relay, or complete immediately ───────────────
        let Some(uploader) = &self.uploader else {
            self.complete(generation);
            return;
        };
        if !self.transition(generation, RunState::Uploading) {
            return;
        }
        let sink: Arc<dyn ProgressSink> = Arc::new(PhaseSink {
            shared: Arc::clone(&self.shared),
            observer: Arc::clone(&self.observer),
            phase: Phase::Upload,
            storage_configured,
            generation,
        });
        let upload_start = Instant::now();
        let uploaded = uploader
            .upload(&result.download_url, &result.file_name, sink)
            .await;
        let upload_ms = upload_start.elapsed().as_millis() as u64;

        // ── Step 5: classify the relay outcome ───────────────────────────
        // An upload failure is recorded, surfaced as a warning, and then the
        // run completes anyway — the conversion result is never invalidated
        // by a storage-side failure.
        match uploaded {
            Ok(upload) => {
                let committed = self.commit(generation, |inner| {
                    inner.upload_ms = Some(upload_ms);
                    inner.upload = Some(upload);
                    inner.consecutive_upload_failures = 0;
                });
                if committed {
                    self.complete(generation);
                }
            }
            Err(warning) => {
                let mut failures = 0;
                let committed = self.commit(generation, |inner| {
                    inner.upload_ms = Some(upload_ms);
                    inner.upload_warning = Some(warning.clone());
                    inner.consecutive_upload_failures += 1;
                    failures = inner.consecutive_upload_failures;
                });
                if committed {
                    warn!("Upload failed, completing with a warning: {warning}");
                    if failures >= self.upload_failure_threshold {
                        warn!(
                            "{failures} consecutive upload failures; storage looks \
                             persistently misconfigured"
                        );
                    }
                    self.observer.on_upload_warning(&warning);
                    self.complete(generation);
                }
            }
        }
    }

    /// Return to Idle, discarding the current run's results.
    ///
    /// Bumps the generation so any response still in flight from the
    /// superseded run is discarded when it lands. The cross-run
    /// upload-failure counter is deliberately kept.
    pub fn reset(&self) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.generation += 1;
            inner.state = RunState::Idle;
            inner.clear_run();
        }
        debug!("Orchestrator reset");
        self.observer.on_state_change(RunState::Idle);
    }

    // ── Accessors ────────────────────────────────────────────────────────

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.shared.inner.lock().unwrap().state
    }

    /// Overall weighted progress, 0–100.
    pub fn progress(&self) -> f32 {
        self.shared.inner.lock().unwrap().progress
    }

    /// The conversion result, once the conversion phase has succeeded.
    pub fn conversion_result(&self) -> Option<ConversionResult> {
        self.shared.inner.lock().unwrap().conversion.clone()
    }

    /// The upload result, only when the storage relay succeeded.
    pub fn upload_result(&self) -> Option<UploadResult> {
        self.shared.inner.lock().unwrap().upload.clone()
    }

    /// The captured upload failure, when the relay failed this run.
    pub fn upload_warning(&self) -> Option<UploadError> {
        self.shared.inner.lock().unwrap().upload_warning.clone()
    }

    /// The fatal error, when the run ended in Failed.
    pub fn last_error(&self) -> Option<Pdf2SheetError> {
        self.shared.inner.lock().unwrap().error.clone()
    }

    /// True once consecutive upload failures reached the threshold.
    pub fn storage_degraded(&self) -> bool {
        self.shared.inner.lock().unwrap().consecutive_upload_failures
            >= self.upload_failure_threshold
    }

    /// Snapshot of everything observable about the current run.
    pub fn report(&self) -> RunReport {
        let inner = self.shared.inner.lock().unwrap();
        RunReport {
            state: inner.state,
            progress: inner.progress,
            conversion: inner.conversion.clone(),
            upload: inner.upload.clone(),
            upload_warning: inner.upload_warning.clone(),
            error: inner.error.clone(),
            storage_degraded: inner.consecutive_upload_failures >= self.upload_failure_threshold,
            convert_ms: inner.convert_ms,
            upload_ms: inner.upload_ms,
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    /// Apply `apply` under the lock iff the run is still current.
    ///
    /// Every mutation after an await goes through here; a stale generation
    /// means reset() superseded the run and the response must change
    /// nothing.
    fn commit<F: FnOnce(&mut Inner)>(&self, generation: u64, apply: F) -> bool {
        let mut inner = self.shared.inner.lock().unwrap();
        if inner.generation != generation {
            debug!("Discarding stale response from superseded run {generation}");
            return false;
        }
        apply(&mut inner);
        true
    }

    fn transition(&self, generation: u64, state: RunState) -> bool {
        let committed = self.commit(generation, |inner| inner.state = state);
        if committed {
            debug!("Run {generation}: state -> {state}");
            self.observer.on_state_change(state);
        }
        committed
    }

    fn fail(&self, generation: u64, error: Pdf2SheetError) {
        let committed = self.commit(generation, |inner| {
            inner.state = RunState::Failed;
            inner.error = Some(error.clone());
        });
        if committed {
            warn!("Run {generation} failed: {error}");
            self.observer.on_state_change(RunState::Failed);
        }
    }

    /// Terminal success. Progress is forced to 100 here so the invariant
    /// "Complete implies 100" holds on both the with-storage and
    /// without-storage paths, including the warning path.
    fn complete(&self, generation: u64) {
        let committed = self.commit(generation, |inner| {
            inner.state = RunState::Complete;
            inner.progress = 100.0;
        });
        if committed {
            info!("Run {generation} complete");
            self.observer.on_progress(100.0);
            self.observer.on_state_change(RunState::Complete);
        }
    }
}

/// Synchronous precondition checks; no collaborator is touched before these
/// pass. Consent is checked first.
fn validate(request: &ConversionRequest) -> Result<&SourceDocument, Pdf2SheetError> {
    if !request.consent {
        return Err(Pdf2SheetError::ConsentRequired);
    }
    request.document.as_ref().ok_or(Pdf2SheetError::DocumentMissing)
}

/// The sink handed to a collaborator for one phase of one run.
///
/// Applies the weighted mapping, drops updates from superseded runs, and
/// max-merges so a single observer never sees progress move backwards.
struct PhaseSink {
    shared: Arc<Shared>,
    observer: Arc<dyn RunObserver>,
    phase: Phase,
    storage_configured: bool,
    generation: u64,
}

impl ProgressSink for PhaseSink {
    fn on_progress(&self, percent: f32) {
        let overall = overall_progress(self.phase, percent, self.storage_configured);
        let advanced = {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.generation != self.generation {
                return;
            }
            if overall > inner.progress {
                inner.progress = overall;
                true
            } else {
                false
            }
        };
        if advanced {
            self.observer.on_progress(overall);
        }
    }
}
