//! Run lifecycle states.
//!
//! One [`RunState`] is active per orchestrator instance at any time. The
//! states split three ways: active (work in flight), suspended (waiting for
//! the caller to supply a secret), and terminal (Complete or Failed).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a conversion run.
///
/// Transitions are driven exclusively by [`crate::Orchestrator`]:
///
/// ```text
/// Idle ─start()─► Validating ─► Converting ─┬─► Complete
///                     │                     ├─► Uploading ─► Complete
///                     │                     ├─► SecretRequired ─start()─► Converting
///                     ▼                     └─► Failed
///                   Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No run has started, or the orchestrator was reset.
    Idle,
    /// Precondition checks are running; no network has been touched yet.
    Validating,
    /// The conversion service call is in flight.
    Converting,
    /// The document is protected; waiting for the caller to resubmit with a
    /// secret. Suspended, not failed.
    SecretRequired,
    /// The storage relay call is in flight.
    Uploading,
    /// The run produced a conversion result. An upload warning may be
    /// attached; it does not change the state.
    Complete,
    /// The run ended without a conversion result.
    Failed,
}

impl RunState {
    /// True when the run has ended and a new one may start.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Complete | RunState::Failed)
    }

    /// True while a phase is in flight; `start()` is refused in these states.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunState::Validating | RunState::Converting | RunState::Uploading
        )
    }

    /// True when the run is waiting for the caller to supply a secret.
    pub fn is_suspended(&self) -> bool {
        matches!(self, RunState::SecretRequired)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Validating => "validating",
            RunState::Converting => "converting",
            RunState::SecretRequired => "secret_required",
            RunState::Uploading => "uploading",
            RunState::Complete => "complete",
            RunState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}
