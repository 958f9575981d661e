//! Integration tests for the conversion orchestrator.
//!
//! Both remote collaborators are mocked, so these tests cover the full state
//! machine, the weighted progress contract, and the upload-failure asymmetry
//! without any network access. They always run.
//!
//! Run with:
//!   cargo test --test orchestrator -- --nocapture

use async_trait::async_trait;
use pdf2sheet::{
    ConversionClient, ConversionRequest, ConversionResult, Converted, MockConversionClient,
    MockStorageUploader, Orchestrator, Pdf2SheetError, ProgressHandle, RunObserver, RunState,
    SourceDocument, UploadError, UploadResult,
};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// An in-memory document; no filesystem access in these tests.
fn doc(name: &str) -> SourceDocument {
    SourceDocument::Bytes {
        name: name.to_string(),
        data: b"%PDF-1.4 test".to_vec(),
    }
}

fn request(name: &str) -> ConversionRequest {
    ConversionRequest::new(doc(name)).with_consent(true)
}

fn ready(url: &str, file_name: &str) -> Converted {
    Converted::Ready(ConversionResult {
        download_url: url.to_string(),
        file_name: file_name.to_string(),
    })
}

/// Records every observer event for later assertions.
#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<RunState>>,
    progress: Mutex<Vec<f32>>,
    warnings: Mutex<Vec<String>>,
}

impl Recorder {
    fn states(&self) -> Vec<RunState> {
        self.states.lock().unwrap().clone()
    }

    fn progress(&self) -> Vec<f32> {
        self.progress.lock().unwrap().clone()
    }

    fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }
}

impl RunObserver for Recorder {
    fn on_state_change(&self, state: RunState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_progress(&self, overall: f32) {
        self.progress.lock().unwrap().push(overall);
    }

    fn on_upload_warning(&self, warning: &UploadError) {
        self.warnings.lock().unwrap().push(warning.to_string());
    }
}

fn assert_non_decreasing(values: &[f32], context: &str) {
    for pair in values.windows(2) {
        assert!(
            pair[1] >= pair[0],
            "[{context}] progress moved backwards: {pair:?} in {values:?}"
        );
    }
}

/// A converter that parks inside `convert` until the test releases it, so a
/// test can act while a run is genuinely in flight.
struct GatedConverter {
    entered: Mutex<Option<oneshot::Sender<()>>>,
    release: Mutex<Option<oneshot::Receiver<()>>>,
}

impl GatedConverter {
    fn new() -> (Arc<Self>, oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let gate = Arc::new(Self {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        });
        (gate, entered_rx, release_tx)
    }
}

#[async_trait]
impl ConversionClient for GatedConverter {
    async fn convert<'a>(
        &self,
        _document: &'a SourceDocument,
        _secret: Option<&'a str>,
        _progress: ProgressHandle,
    ) -> Result<Converted, Pdf2SheetError> {
        if let Some(tx) = self.entered.lock().unwrap().take() {
            tx.send(()).ok();
        }
        let release = self.release.lock().unwrap().take();
        if let Some(release) = release {
            release.await.ok();
        }
        Ok(ready("https://files.example/gated", "gated.xlsx"))
    }
}

// ── Full-run scenarios ───────────────────────────────────────────────────────

/// A consented document converts, the run completes, and progress lands on
/// exactly 100 — without storage the convert phase owns the whole scale.
/// The document name is deliberately not a .pdf: the orchestrator does not
/// second-guess what the remote service accepts.
#[tokio::test]
async fn test_full_run_without_storage_completes() {
    let mut converter = MockConversionClient::new();
    converter
        .expect_convert()
        .withf(|document, secret, _progress| {
            document.display_name() == "statement.doc" && secret.is_none()
        })
        .times(1)
        .returning(|_, _, progress| {
            for milestone in [5.0, 15.0, 50.0, 75.0, 100.0] {
                progress.on_progress(milestone);
            }
            Ok(ready("https://files.example/R1", "statement.xlsx"))
        });

    let recorder = Arc::new(Recorder::default());
    let orchestrator = Orchestrator::new(Arc::new(converter)).with_observer(recorder.clone());

    orchestrator.start(request("statement.doc")).await;

    assert_eq!(orchestrator.state(), RunState::Complete);
    assert!(orchestrator.state().is_terminal());
    assert_eq!(orchestrator.progress(), 100.0);
    assert_eq!(
        orchestrator.conversion_result(),
        Some(ConversionResult {
            download_url: "https://files.example/R1".to_string(),
            file_name: "statement.xlsx".to_string(),
        })
    );
    assert!(orchestrator.upload_result().is_none(), "no storage configured");
    assert!(orchestrator.upload_warning().is_none());
    assert!(orchestrator.last_error().is_none());

    assert_eq!(
        recorder.states(),
        vec![RunState::Validating, RunState::Converting, RunState::Complete]
    );
    // Identity mapping without storage; completion re-emits the final 100.
    assert_eq!(
        recorder.progress(),
        vec![0.0, 5.0, 15.0, 50.0, 75.0, 100.0, 100.0]
    );
}

/// Without consent the run fails in validation and the converter is never
/// touched — `times(0)` makes the mock panic on any call.
#[tokio::test]
async fn test_missing_consent_fails_before_any_network() {
    let mut converter = MockConversionClient::new();
    converter.expect_convert().times(0);

    let recorder = Arc::new(Recorder::default());
    let orchestrator = Orchestrator::new(Arc::new(converter)).with_observer(recorder.clone());

    orchestrator
        .start(ConversionRequest::new(doc("statement.pdf")))
        .await;

    assert_eq!(orchestrator.state(), RunState::Failed);
    let error = orchestrator.last_error().expect("a validation error");
    assert!(matches!(error, Pdf2SheetError::ConsentRequired));
    assert!(error.is_validation());
    assert_eq!(orchestrator.progress(), 0.0);
    assert_eq!(recorder.states(), vec![RunState::Validating, RunState::Failed]);
}

#[tokio::test]
async fn test_missing_document_fails_validation() {
    let mut converter = MockConversionClient::new();
    converter.expect_convert().times(0);

    let orchestrator = Orchestrator::new(Arc::new(converter));
    orchestrator
        .start(ConversionRequest::default().with_consent(true))
        .await;

    assert_eq!(orchestrator.state(), RunState::Failed);
    assert!(matches!(
        orchestrator.last_error(),
        Some(Pdf2SheetError::DocumentMissing)
    ));
}

/// A password-protected document suspends the run; resubmitting the same
/// document with the secret is a fresh run that completes. The first run's
/// progress is preserved during the suspension and only cleared when the
/// resubmission starts.
#[tokio::test]
async fn test_password_resubmission_resumes_the_run() {
    let mut converter = MockConversionClient::new();
    converter
        .expect_convert()
        .withf(|_document, secret, _progress| secret.is_none())
        .times(1)
        .returning(|_, _, progress| {
            progress.on_progress(5.0);
            progress.on_progress(15.0);
            Ok(Converted::SecretRequired)
        });
    converter
        .expect_convert()
        .withf(|document, secret, _progress| {
            document.display_name() == "protected.pdf" && matches!(*secret, Some("1234"))
        })
        .times(1)
        .returning(|_, _, progress| {
            for milestone in [5.0, 15.0, 50.0, 75.0, 100.0] {
                progress.on_progress(milestone);
            }
            Ok(ready("https://files.example/R2", "protected.xlsx"))
        });

    let recorder = Arc::new(Recorder::default());
    let orchestrator = Orchestrator::new(Arc::new(converter)).with_observer(recorder.clone());

    orchestrator.start(request("protected.pdf")).await;

    assert_eq!(orchestrator.state(), RunState::SecretRequired);
    assert!(orchestrator.state().is_suspended());
    assert!(!orchestrator.state().is_terminal());
    assert!(orchestrator.conversion_result().is_none());
    assert!(orchestrator.last_error().is_none(), "suspension is not failure");
    assert_eq!(orchestrator.progress(), 15.0, "progress survives the suspension");

    orchestrator
        .start(request("protected.pdf").with_secret("1234"))
        .await;

    assert_eq!(orchestrator.state(), RunState::Complete);
    assert_eq!(orchestrator.progress(), 100.0);
    assert_eq!(
        orchestrator.conversion_result().map(|r| r.file_name),
        Some("protected.xlsx".to_string())
    );
    assert_eq!(
        recorder.states(),
        vec![
            RunState::Validating,
            RunState::Converting,
            RunState::SecretRequired,
            RunState::Validating,
            RunState::Converting,
            RunState::Complete,
        ]
    );
    // The second 0.0 is the new run clearing the suspended run's progress.
    assert_eq!(
        recorder.progress(),
        vec![0.0, 5.0, 15.0, 0.0, 5.0, 15.0, 50.0, 75.0, 100.0, 100.0]
    );
}

/// A conversion-service error is fatal: the run ends in Failed with the error
/// preserved, and the uploader is never consulted.
#[tokio::test]
async fn test_conversion_error_fails_the_run() {
    let mut converter = MockConversionClient::new();
    converter.expect_convert().times(1).returning(|_, _, progress| {
        progress.on_progress(5.0);
        Err(Pdf2SheetError::ConversionFailed {
            status: 500,
            message: "engine unavailable".to_string(),
        })
    });

    let mut uploader = MockStorageUploader::new();
    uploader.expect_upload().times(0);

    let recorder = Arc::new(Recorder::default());
    let orchestrator = Orchestrator::new(Arc::new(converter))
        .with_uploader(Arc::new(uploader))
        .with_observer(recorder.clone());

    orchestrator.start(request("statement.pdf")).await;

    assert_eq!(orchestrator.state(), RunState::Failed);
    assert!(orchestrator.state().is_terminal());
    assert!(orchestrator.conversion_result().is_none());
    assert!(orchestrator.progress() < 100.0, "failure must not force 100");
    let error = orchestrator.last_error().expect("the conversion error is preserved");
    assert!(matches!(
        error,
        Pdf2SheetError::ConversionFailed { status: 500, .. }
    ));
    assert!(!error.is_validation());

    let report = orchestrator.report();
    assert!(report.error.is_some());
    assert!(!report.has_warning());
    assert_eq!(
        recorder.states(),
        vec![RunState::Validating, RunState::Converting, RunState::Failed]
    );
}

// ── Storage relay scenarios ──────────────────────────────────────────────────

/// A failed upload is downgraded to a warning and the run completes anyway:
/// the conversion result stays valid, progress still reaches 100, and the
/// observer hears about the warning exactly once.
#[tokio::test]
async fn test_upload_failure_completes_with_warning() {
    let mut converter = MockConversionClient::new();
    converter
        .expect_convert()
        .times(1)
        .returning(|_, _, _| Ok(ready("https://files.example/R1", "statement.xlsx")));

    let mut uploader = MockStorageUploader::new();
    uploader
        .expect_upload()
        .withf(|source_url, file_name, _progress| {
            source_url == "https://files.example/R1" && file_name == "statement.xlsx"
        })
        .times(1)
        .returning(|_, _, _| {
            Err(UploadError::Remote {
                status: 500,
                message: "relay exploded".to_string(),
            })
        });

    let recorder = Arc::new(Recorder::default());
    let orchestrator = Orchestrator::new(Arc::new(converter))
        .with_uploader(Arc::new(uploader))
        .with_observer(recorder.clone());

    orchestrator.start(request("statement.pdf")).await;

    assert_eq!(orchestrator.state(), RunState::Complete, "never Failed on upload");
    assert_eq!(orchestrator.progress(), 100.0);
    assert!(orchestrator.conversion_result().is_some());
    assert!(orchestrator.upload_result().is_none());
    assert!(matches!(
        orchestrator.upload_warning(),
        Some(UploadError::Remote { status: 500, .. })
    ));
    assert!(orchestrator.last_error().is_none());
    assert!(!orchestrator.storage_degraded(), "one failure is a blip");

    assert_eq!(recorder.warnings().len(), 1);
    assert_eq!(
        recorder.states(),
        vec![
            RunState::Validating,
            RunState::Converting,
            RunState::Uploading,
            RunState::Complete,
        ]
    );
}

#[tokio::test]
async fn test_upload_success_relays_and_completes() {
    let mut converter = MockConversionClient::new();
    converter
        .expect_convert()
        .times(1)
        .returning(|_, _, _| Ok(ready("https://files.example/R1", "statement.xlsx")));

    let mut uploader = MockStorageUploader::new();
    uploader.expect_upload().times(1).returning(|_, _, _| {
        Ok(UploadResult {
            view_url: "https://drive.google.com/file/d/abc/view".to_string(),
        })
    });

    let orchestrator =
        Orchestrator::new(Arc::new(converter)).with_uploader(Arc::new(uploader));

    orchestrator.start(request("statement.pdf")).await;

    assert_eq!(orchestrator.state(), RunState::Complete);
    assert_eq!(
        orchestrator.upload_result().map(|u| u.view_url),
        Some("https://drive.google.com/file/d/abc/view".to_string())
    );
    assert!(orchestrator.upload_warning().is_none());

    let report = orchestrator.report();
    assert!(report.convert_ms.is_some());
    assert!(report.upload_ms.is_some());
    assert!(!report.has_warning());
}

/// With storage configured the convert phase is compressed into [0, 85] and
/// the upload phase owns the remainder, so the observer sees one
/// non-decreasing sweep across both phases.
#[tokio::test]
async fn test_progress_is_weighted_and_monotonic_with_storage() {
    let mut converter = MockConversionClient::new();
    converter.expect_convert().times(1).returning(|_, _, progress| {
        for milestone in [5.0, 15.0, 50.0, 75.0, 100.0] {
            progress.on_progress(milestone);
        }
        Ok(ready("https://files.example/R1", "statement.xlsx"))
    });

    let mut uploader = MockStorageUploader::new();
    uploader.expect_upload().times(1).returning(|_, _, progress| {
        for milestone in [10.0, 60.0, 100.0] {
            progress.on_progress(milestone);
        }
        Ok(UploadResult {
            view_url: "https://drive.google.com/file/d/abc/view".to_string(),
        })
    });

    let recorder = Arc::new(Recorder::default());
    let orchestrator = Orchestrator::new(Arc::new(converter))
        .with_uploader(Arc::new(uploader))
        .with_observer(recorder.clone());

    orchestrator.start(request("statement.pdf")).await;

    let seen = recorder.progress();
    assert_non_decreasing(&seen, "weighted sweep");
    assert_eq!(seen.first(), Some(&0.0));
    assert_eq!(seen.last(), Some(&100.0));

    // Conversion finishing raw-100 must land on the 85% handoff point.
    assert!(
        seen.iter().any(|p| (p - 85.0).abs() < 1e-3),
        "expected the 85% handoff in {seen:?}"
    );
    // Nothing the convert phase reports may cross the handoff.
    let handoff = seen.iter().position(|p| (p - 85.0).abs() < 1e-3).unwrap();
    for p in &seen[..handoff] {
        assert!(*p < 85.0, "convert phase crossed its weight: {p} in {seen:?}");
    }

    assert_eq!(orchestrator.progress(), 100.0);
}

// ── Concurrency and cancellation ─────────────────────────────────────────────

/// `start()` while a run is in flight is refused outright, not queued; the
/// in-flight run is unaffected and completes normally.
#[tokio::test]
async fn test_start_while_running_is_refused() {
    let (converter, entered, release) = GatedConverter::new();
    let recorder = Arc::new(Recorder::default());
    let orchestrator = Arc::new(Orchestrator::new(converter).with_observer(recorder.clone()));

    let first = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.start(request("first.pdf")).await }
    });
    entered.await.expect("the first run must reach the converter");

    // Second submission while the first is parked inside convert().
    orchestrator.start(request("second.pdf")).await;
    assert_eq!(orchestrator.state(), RunState::Converting, "refusal changes nothing");
    assert!(orchestrator.conversion_result().is_none());

    release.send(()).ok();
    first.await.expect("first run task");

    assert_eq!(orchestrator.state(), RunState::Complete);
    assert_eq!(
        orchestrator.conversion_result().map(|r| r.file_name),
        Some("gated.xlsx".to_string())
    );
    // Exactly one run was admitted.
    let validations = recorder
        .states()
        .iter()
        .filter(|s| **s == RunState::Validating)
        .count();
    assert_eq!(validations, 1);
}

/// `reset()` during an in-flight run returns to Idle immediately; when the
/// superseded response finally lands it is discarded, leaving the
/// orchestrator exactly as the reset left it.
#[tokio::test]
async fn test_reset_discards_the_in_flight_response() {
    let (converter, entered, release) = GatedConverter::new();
    let recorder = Arc::new(Recorder::default());
    let orchestrator = Arc::new(Orchestrator::new(converter).with_observer(recorder.clone()));

    let run = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.start(request("stale.pdf")).await }
    });
    entered.await.expect("the run must reach the converter");

    orchestrator.reset();
    assert_eq!(orchestrator.state(), RunState::Idle);

    // Let the superseded conversion finish and try to commit.
    release.send(()).ok();
    run.await.expect("superseded run task");

    assert_eq!(orchestrator.state(), RunState::Idle);
    assert_eq!(orchestrator.progress(), 0.0);
    assert!(orchestrator.conversion_result().is_none());
    assert!(orchestrator.last_error().is_none());
    assert!(
        !recorder.states().contains(&RunState::Complete),
        "a stale response must not complete a reset orchestrator, saw {:?}",
        recorder.states()
    );
}

// ── Degradation across runs ──────────────────────────────────────────────────

/// Upload failures stay warnings forever, but three in a row flip the
/// degradation flag; the counter survives reset() and clears on the next
/// successful upload.
#[tokio::test]
async fn test_repeated_upload_failures_flag_degradation() {
    let mut converter = MockConversionClient::new();
    converter
        .expect_convert()
        .times(4)
        .returning(|_, _, _| Ok(ready("https://files.example/R1", "statement.xlsx")));

    let mut uploader = MockStorageUploader::new();
    uploader.expect_upload().times(3).returning(|_, _, _| {
        Err(UploadError::Unreachable {
            reason: "connection refused".to_string(),
        })
    });
    uploader.expect_upload().times(1).returning(|_, _, _| {
        Ok(UploadResult {
            view_url: "https://drive.google.com/file/d/abc/view".to_string(),
        })
    });

    let orchestrator = Orchestrator::new(Arc::new(converter))
        .with_uploader(Arc::new(uploader))
        .with_upload_failure_threshold(3);

    for attempt in 1..=3 {
        orchestrator.start(request("statement.pdf")).await;
        assert_eq!(
            orchestrator.state(),
            RunState::Complete,
            "attempt {attempt} must still complete"
        );
    }
    assert!(orchestrator.storage_degraded());
    assert!(orchestrator.report().storage_degraded);

    // Degradation describes the storage side, not a run, so reset keeps it.
    orchestrator.reset();
    assert!(orchestrator.storage_degraded());

    orchestrator.start(request("statement.pdf")).await;
    assert_eq!(orchestrator.state(), RunState::Complete);
    assert!(!orchestrator.storage_degraded(), "a success clears the streak");
}

// ── Reporting ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_report_serialises_and_round_trips() {
    let mut converter = MockConversionClient::new();
    converter
        .expect_convert()
        .times(1)
        .returning(|_, _, _| Ok(ready("https://files.example/R1", "statement.xlsx")));

    // A failed relay puts a warning payload on the report; the round trip
    // must carry it unchanged.
    let mut uploader = MockStorageUploader::new();
    uploader.expect_upload().times(1).returning(|_, _, _| {
        Err(UploadError::Remote {
            status: 502,
            message: "relay unavailable".to_string(),
        })
    });

    let orchestrator = Orchestrator::new(Arc::new(converter)).with_uploader(Arc::new(uploader));
    orchestrator.start(request("statement.pdf")).await;

    let report = orchestrator.report();
    assert!(report.has_warning());
    let json = serde_json::to_string_pretty(&report).expect("report must serialise");
    assert!(json.contains("\"complete\""), "got: {json}");
    assert!(json.contains("https://files.example/R1"), "got: {json}");

    let back: pdf2sheet::RunReport =
        serde_json::from_str(&json).expect("report must deserialise");
    assert_eq!(back, report);
}
