//! Capture session state machine.
//!
//! `Idle → Capturing → Classifying → Persisting → Uploading → Idle`, with
//! `ErrorFlash` entered from any failing phase. Only a capture failure ends a
//! session early; every other failure is recorded and the session carries on,
//! so the image is uploaded even when classification fails.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ml_core::{ClassifyError, HazardClassifierClient, HazardVerdict};
use tracing::{debug, error, info, info_span, warn};

use crate::capture::{
    config::{IMAGE_FILE_NAME, SIDECAR_FILE_NAME},
    data::{Phase, SessionOutcome, SessionReport, UploadSummary},
    hardware::HardwareContext,
    indicator::IndicatorState,
    uploader::{RemoteStore, UploadResult},
};

/// Remote vision classifier seam.
pub(crate) trait HazardClassifier {
    fn classify(&self, image: &Path) -> Result<HazardVerdict, ClassifyError>;
}

impl HazardClassifier for HazardClassifierClient {
    fn classify(&self, image: &Path) -> Result<HazardVerdict, ClassifyError> {
        HazardClassifierClient::classify(self, image)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct WorkflowSettings {
    /// Where the verdict sidecar is written.
    pub(crate) sidecar_path: PathBuf,
    /// Upload timestamped copies besides the pointer objects.
    pub(crate) keep_history: bool,
    /// Blink period while the classifier request is in flight.
    pub(crate) blink_period: Duration,
    pub(crate) error_flashes: u32,
    pub(crate) error_flash_interval: Duration,
}

impl WorkflowSettings {
    pub(crate) fn new(sidecar_path: PathBuf, keep_history: bool) -> Self {
        Self {
            sidecar_path,
            keep_history,
            blink_period: Duration::from_millis(500),
            error_flashes: 3,
            error_flash_interval: Duration::from_millis(200),
        }
    }
}

pub(crate) struct CaptureWorkflow<'a> {
    settings: WorkflowSettings,
    classifier: &'a dyn HazardClassifier,
    store: &'a dyn RemoteStore,
    phase: Phase,
    sessions: u64,
}

impl<'a> CaptureWorkflow<'a> {
    pub(crate) fn new(
        settings: WorkflowSettings,
        classifier: &'a dyn HazardClassifier,
        store: &'a dyn RemoteStore,
    ) -> Self {
        Self {
            settings,
            classifier,
            store,
            phase: Phase::Idle,
            sessions: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn sessions(&self) -> u64 {
        self.sessions
    }

    /// Return to `Idle` after a session was cut short; yields the phase it was in.
    pub(crate) fn recover(&mut self) -> Phase {
        let interrupted = self.phase;
        self.transition(Phase::Idle);
        interrupted
    }

    /// Run one session to completion. Never fails: every fault is logged,
    /// flashed on the indicator and recorded in the returned report.
    pub(crate) fn run_session(&mut self, hw: &mut HardwareContext) -> SessionReport {
        self.sessions += 1;
        let mut report = SessionReport::new(self.sessions);
        let span = info_span!("session", number = report.number);
        let _span_guard = span.enter();
        let started = Instant::now();
        metrics::counter!("zenith_sessions_total").increment(1);

        self.transition(Phase::Capturing);
        hw.indicator.set_state(IndicatorState::Capturing);
        info!("Getting photo.");
        let frame = match info_span!("session.capture").in_scope(|| hw.camera.capture()) {
            Ok(frame) => frame,
            Err(err) => {
                error!("Capture failed: {err}");
                report.failures.push(Phase::Capturing);
                report.outcome = SessionOutcome::CaptureFailed;
                self.flash_error(hw);
                self.finish(hw, &report, started);
                return report;
            }
        };
        debug!(path = %frame.path.display(), width = frame.width, height = frame.height, "photo captured");
        report.image = Some(frame.path.clone());
        report.captured_at = DateTime::from_timestamp_millis(frame.timestamp_ms);

        self.transition(Phase::Classifying);
        info!("Sending image for hazard analysis...");
        let classified = {
            let _blink = hw
                .indicator
                .blink(IndicatorState::Classifying, self.settings.blink_period);
            info_span!("session.classify").in_scope(|| self.classifier.classify(&frame.path))
        };
        match classified {
            Ok(verdict) => {
                metrics::counter!("zenith_classifications_total", "outcome" => "verdict").increment(1);
                if verdict.is_hazard() {
                    warn!("[Hazard Detected] {verdict}");
                } else {
                    info!("[Hazard Detected] {verdict}");
                }
                report.verdict = Some(verdict);
            }
            Err(err) => {
                metrics::counter!("zenith_classifications_total", "outcome" => "failed").increment(1);
                warn!("Error analyzing image: {err}");
                report.record_failure(Phase::Classifying);
                self.flash_error(hw);
            }
        }

        self.transition(Phase::Persisting);
        let sidecar = self.settings.sidecar_path.clone();
        match write_sidecar(&sidecar, report.verdict.as_ref()) {
            Ok(()) => report.sidecar = Some(sidecar),
            Err(err) => {
                error!("{err:#}");
                report.record_failure(Phase::Persisting);
                self.flash_error(hw);
            }
        }

        self.transition(Phase::Uploading);
        hw.indicator.set_state(IndicatorState::Uploading);
        let captured_at = report.captured_at.unwrap_or(report.started_at);
        let results = info_span!("session.upload").in_scope(|| {
            self.upload_all(&frame.path, report.sidecar.as_deref(), captured_at)
        });
        let failed = results.iter().filter(|result| !result.success()).count();
        report.uploads = results.iter().map(UploadSummary::from).collect();
        if failed > 0 {
            warn!("{failed} of {} uploads failed", results.len());
            report.record_failure(Phase::Uploading);
            self.flash_error(hw);
        } else {
            let names: Vec<&str> = results.iter().map(|r| r.remote_path.as_str()).collect();
            info!("Upload complete. Uploaded files: {}", names.join(", "));
        }

        self.finish(hw, &report, started);
        report
    }

    /// Image first, then sidecar; each attempt is independent of the other.
    /// Without a sidecar written this session only the image goes out.
    fn upload_all(
        &self,
        image: &Path,
        sidecar: Option<&Path>,
        captured_at: DateTime<Utc>,
    ) -> Vec<UploadResult> {
        let mut jobs = vec![("image", image, IMAGE_FILE_NAME.to_string(), true)];
        if let Some(sidecar) = sidecar {
            jobs.push(("sidecar", sidecar, SIDECAR_FILE_NAME.to_string(), true));
        } else {
            warn!("no verdict file this session; skipping {SIDECAR_FILE_NAME} upload");
        }
        if self.settings.keep_history {
            let stamp = captured_at.format("%Y%m%d_%H%M%S");
            jobs.push(("image", image, format!("capture_{stamp}.jpg"), false));
            if let Some(sidecar) = sidecar {
                jobs.push(("sidecar", sidecar, format!("capture_{stamp}.json"), false));
            }
        }

        jobs.into_iter()
            .map(|(file, local, remote, replace)| {
                let result = self.store.upload(local, &remote, replace);
                let outcome = if result.success() { "ok" } else { "failed" };
                metrics::counter!("zenith_uploads_total", "file" => file, "outcome" => outcome)
                    .increment(1);
                result
            })
            .collect()
    }

    fn flash_error(&mut self, hw: &mut HardwareContext) {
        let resume = self.phase;
        self.transition(Phase::ErrorFlash);
        hw.indicator
            .flash_error(self.settings.error_flashes, self.settings.error_flash_interval);
        self.phase = resume;
    }

    fn finish(&mut self, hw: &mut HardwareContext, report: &SessionReport, started: Instant) {
        self.transition(Phase::Idle);
        hw.indicator.set_state(IndicatorState::Idle);
        metrics::histogram!("zenith_session_duration_seconds").record(started.elapsed().as_secs_f64());
        info!(
            outcome = ?report.outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "session finished"
        );
    }

    fn transition(&mut self, next: Phase) {
        debug!(from = self.phase.label(), to = next.label(), "phase");
        self.phase = next;
    }
}

/// Write the verdict as pretty JSON; a missing verdict is written as `null`.
///
/// The previous session's file is removed first so a failed write never leaves
/// an older verdict behind.
pub(crate) fn write_sidecar(path: &Path, verdict: Option<&HazardVerdict>) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to remove stale sidecar {}", path.display()));
        }
    }
    let json = serde_json::to_string_pretty(&verdict).context("failed to serialise verdict")?;
    fs::write(path, json).with_context(|| format!("failed to write sidecar {}", path.display()))
}
