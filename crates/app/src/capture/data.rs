use std::path::PathBuf;

use chrono::{DateTime, Utc};
use ml_core::HazardVerdict;
use serde::Serialize;

use crate::capture::uploader::UploadResult;

/// Workflow phases, in the order a successful session visits them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Phase {
    Idle,
    Capturing,
    Classifying,
    Persisting,
    Uploading,
    ErrorFlash,
}

impl Phase {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Capturing => "capturing",
            Phase::Classifying => "classifying",
            Phase::Persisting => "persisting",
            Phase::Uploading => "uploading",
            Phase::ErrorFlash => "error_flash",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SessionOutcome {
    /// Every step succeeded.
    Completed,
    /// Image captured, but classification, persistence or an upload failed.
    Degraded,
    /// No image; nothing was classified or uploaded.
    CaptureFailed,
}

/// Per-file upload summary kept in the report.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct UploadSummary {
    pub(crate) local_path: PathBuf,
    pub(crate) remote_path: String,
    pub(crate) success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

impl From<&UploadResult> for UploadSummary {
    fn from(result: &UploadResult) -> Self {
        Self {
            local_path: result.local_path.clone(),
            remote_path: result.remote_path.clone(),
            success: result.success(),
            error: result.error().map(ToString::to_string),
        }
    }
}

/// Record of one capture session, from button edge back to idle.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct SessionReport {
    pub(crate) number: u64,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) image: Option<PathBuf>,
    pub(crate) captured_at: Option<DateTime<Utc>>,
    pub(crate) verdict: Option<HazardVerdict>,
    pub(crate) sidecar: Option<PathBuf>,
    pub(crate) uploads: Vec<UploadSummary>,
    /// Phases that failed and flashed the error pattern.
    pub(crate) failures: Vec<Phase>,
    pub(crate) outcome: SessionOutcome,
}

impl SessionReport {
    pub(crate) fn new(number: u64) -> Self {
        Self {
            number,
            started_at: Utc::now(),
            image: None,
            captured_at: None,
            verdict: None,
            sidecar: None,
            uploads: Vec::new(),
            failures: Vec::new(),
            outcome: SessionOutcome::Completed,
        }
    }

    pub(crate) fn record_failure(&mut self, phase: Phase) {
        self.failures.push(phase);
        if self.outcome == SessionOutcome::Completed {
            self.outcome = SessionOutcome::Degraded;
        }
    }
}
