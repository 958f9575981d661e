//! Progress reporting: per-phase sinks, the caller-facing observer, and the
//! weighted mapping that folds two phases into one 0–100 scale.
//!
//! # Why callbacks instead of channels?
//!
//! Callbacks are the integration point that presumes the least: a host can
//! fan events out to a broadcast channel, push them over a WebSocket, or
//! drive a terminal bar, and the library never learns which. Both traits are
//! `Send + Sync` so the orchestrator can hand them across await points
//! freely.
//!
//! Two traits exist because two different parties talk:
//!
//! * [`ProgressSink`] is what the orchestrator hands *into* a collaborator
//!   ([`crate::ConversionClient`], [`crate::StorageUploader`]). Adapters
//!   report raw 0–100 progress for their own phase and know nothing about
//!   weighting.
//! * [`RunObserver`] is what the caller installs *on* the orchestrator. It
//!   receives already-weighted overall progress, state changes, and upload
//!   warnings.
//!
//! # Example
//!
//! ```rust
//! use pdf2sheet::RunObserver;
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct Recorder {
//!     seen: Mutex<Vec<f32>>,
//! }
//!
//! impl RunObserver for Recorder {
//!     fn on_progress(&self, overall: f32) {
//!         self.seen.lock().unwrap().push(overall);
//!     }
//! }
//!
//! let observer: Arc<dyn RunObserver> = Arc::new(Recorder::default());
//! observer.on_progress(42.5);
//! ```

use crate::error::UploadError;
use crate::state::RunState;
use std::sync::Arc;

/// Fraction of the overall scale the conversion phase occupies when a
/// storage relay is configured. The upload phase carries the remainder.
pub const CONVERT_PHASE_WEIGHT: f32 = 0.85;

/// The two sequential remote phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Document → spreadsheet conversion.
    Convert,
    /// Relay of the converted artifact into remote storage.
    Upload,
}

/// Raw progress channel handed to a collaborator for one phase.
///
/// Adapters call [`ProgressSink::on_progress`] with values in 0–100 for
/// their own phase; the orchestrator's sink implementation applies the
/// weighted mapping and discards stale or backwards updates. Adapters must
/// still report monotonically within the call.
pub trait ProgressSink: Send + Sync {
    /// Report raw phase progress.
    ///
    /// # Arguments
    /// * `percent` — phase-local progress in 0–100
    fn on_progress(&self, percent: f32) {
        let _ = percent;
    }
}

/// A no-op sink for direct adapter use outside an orchestrated run.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {}

/// Convenience alias matching the parameter type of the collaborator traits.
pub type ProgressHandle = Arc<dyn ProgressSink>;

/// Observes one orchestrator across runs.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Methods are invoked outside the orchestrator's
/// internal lock, so implementations may call accessors freely.
pub trait RunObserver: Send + Sync {
    /// Called on every state transition, including Idle after a reset.
    ///
    /// # Arguments
    /// * `state` — the state just entered
    fn on_state_change(&self, state: RunState) {
        let _ = state;
    }

    /// Called whenever the overall progress value advances.
    ///
    /// # Arguments
    /// * `overall` — weighted overall progress in 0–100, non-decreasing
    ///   within a run
    fn on_progress(&self, overall: f32) {
        let _ = overall;
    }

    /// Called when the upload phase fails and is downgraded to a warning.
    ///
    /// The run still completes; present this as degraded, never as failure.
    ///
    /// # Arguments
    /// * `warning` — the captured upload error
    fn on_upload_warning(&self, warning: &UploadError) {
        let _ = warning;
    }
}

/// A no-op implementation for callers that don't need run events.
///
/// This is the default when no observer is installed.
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Map raw phase progress onto the overall 0–100 scale.
///
/// Pure, so the weighting is testable apart from the orchestrator. The
/// convert phase spans `[0, w₁·100]` where w₁ is 1.0 without storage and
/// [`CONVERT_PHASE_WEIGHT`] with it; the upload phase spans the remainder,
/// offset so the handoff between phases never moves backwards.
/// `storage_configured` is irrelevant for the upload phase, which only runs
/// when storage is configured.
///
/// Input is clamped to 0–100 first, so the result is always in 0–100.
pub fn overall_progress(phase: Phase, raw: f32, storage_configured: bool) -> f32 {
    let raw = raw.clamp(0.0, 100.0);
    match phase {
        Phase::Convert => {
            let weight = if storage_configured {
                CONVERT_PHASE_WEIGHT
            } else {
                1.0
            };
            raw * weight
        }
        Phase::Upload => CONVERT_PHASE_WEIGHT * 100.0 + raw * (1.0 - CONVERT_PHASE_WEIGHT),
    }
}
