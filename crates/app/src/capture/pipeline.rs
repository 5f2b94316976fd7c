use std::{
    fs,
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use ml_core::{ClassifierConfig, HazardClassifierClient, HazardVerdict};
use tracing::{debug, error, info, warn};

use crate::capture::{
    config::{FirmwareConfig, display_work_dir},
    data::SessionReport,
    hardware::{ButtonInput, HardwareContext},
    indicator::IndicatorState,
    telemetry,
    trigger::EdgeDetector,
    uploader::{FtpUploader, SuppaFtpConnector},
    workflow::{CaptureWorkflow, WorkflowSettings},
};

pub(crate) const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

const COUNTDOWN_TICK: Duration = Duration::from_millis(100);

/// Shared shutdown flag, raised by Ctrl+C, SIGTERM or SIGHUP; the handler is
/// installed on first use.
fn shutdown_flag() -> Arc<AtomicBool> {
    static SHUTDOWN: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    SHUTDOWN
        .get_or_init(|| {
            let shutdown = Arc::new(AtomicBool::new(false));
            let handler_shutdown = shutdown.clone();
            if let Err(err) = ctrlc::set_handler(move || {
                handler_shutdown.store(true, Ordering::SeqCst);
            }) {
                warn!("Failed to install shutdown signal handler: {err}");
            }
            shutdown
        })
        .clone()
}

/// Run the firmware until Ctrl+C or SIGTERM: open the hardware, count down, then start one
/// capture session per button press.
pub fn run(config: FirmwareConfig) -> Result<()> {
    let shutdown = shutdown_flag();
    info!("Zenith Go firmware v{FIRMWARE_VERSION}");

    let (classifier, uploader, mut hw) = prepare(&config)?;
    let settings = WorkflowSettings::new(config.sidecar_path(), config.keep_history);
    let mut workflow = CaptureWorkflow::new(settings, &classifier, &uploader);

    if countdown(config.countdown_secs, &shutdown) {
        hw.indicator.set_state(IndicatorState::Idle);
        info!("Ready for button input");
        serve(&mut hw, &mut workflow, &shutdown, config.poll_interval);
    }

    info!("Shutting down after {} session(s)", workflow.sessions());
    hw.close();
    info!("Goodbye!");
    Ok(())
}

/// Run exactly one capture session right away, without waiting for the button.
pub fn run_once(config: FirmwareConfig) -> Result<SessionReport> {
    info!("Zenith Go firmware v{FIRMWARE_VERSION} (single session)");
    let (classifier, uploader, mut hw) = prepare(&config)?;
    let settings = WorkflowSettings::new(config.sidecar_path(), config.keep_history);
    let mut workflow = CaptureWorkflow::new(settings, &classifier, &uploader);

    let report = workflow.run_session(&mut hw);
    hw.close();
    Ok(report)
}

/// Classify an existing image file and return the verdict.
pub fn classify_file(config: ClassifierConfig, image: &Path) -> Result<HazardVerdict> {
    let client = HazardClassifierClient::new(config)?;
    let verdict = client
        .classify(image)
        .with_context(|| format!("failed to classify {}", image.display()))?;
    Ok(verdict)
}

fn prepare(
    config: &FirmwareConfig,
) -> Result<(
    HazardClassifierClient,
    FtpUploader<SuppaFtpConnector>,
    HardwareContext,
)> {
    if let Some(addr) = config.telemetry.metrics_addr {
        telemetry::init_metrics(addr)?;
    }

    fs::create_dir_all(&config.work_dir).with_context(|| {
        format!(
            "failed to create work directory {}",
            config.work_dir.display()
        )
    })?;
    info!(
        "Work directory: {}",
        display_work_dir(&config.work_dir).display()
    );
    debug!(image = %config.image_path().display(), sidecar = %config.sidecar_path().display(), "local files");

    let classifier = HazardClassifierClient::new(config.classifier.clone())
        .context("failed to build classifier client")?;
    let uploader = FtpUploader::new(
        SuppaFtpConnector::from(&config.ftp),
        &config.ftp.username,
        &config.ftp.password,
        &config.ftp.remote_dir,
    );
    let hw = HardwareContext::open(config).context("failed to open hardware")?;
    Ok((classifier, uploader, hw))
}

/// Count down `secs` seconds, logging each one. Returns `false` when
/// interrupted by shutdown.
fn countdown(secs: u32, shutdown: &AtomicBool) -> bool {
    for remaining in (1..=secs).rev() {
        info!("Starting in {remaining}...");
        let ticks = Duration::from_secs(1).as_millis() / COUNTDOWN_TICK.as_millis();
        for _ in 0..ticks {
            if shutdown.load(Ordering::SeqCst) {
                return false;
            }
            thread::sleep(COUNTDOWN_TICK);
        }
    }
    !shutdown.load(Ordering::SeqCst)
}

/// Poll the button until shutdown, running one session per rising edge.
fn serve(
    hw: &mut HardwareContext,
    workflow: &mut CaptureWorkflow<'_>,
    shutdown: &AtomicBool,
    poll_interval: Duration,
) {
    let mut edge = EdgeDetector::default();
    while !shutdown.load(Ordering::SeqCst) {
        if button_triggered(hw.button.as_mut(), &mut edge) {
            run_guarded(hw, workflow);
            if !shutdown.load(Ordering::SeqCst) {
                info!("Ready for button input");
            }
        }
        thread::sleep(poll_interval);
    }
}

/// Sample the button once. A read error counts as released.
fn button_triggered(button: &mut dyn ButtonInput, edge: &mut EdgeDetector) -> bool {
    let pressed = match button.is_pressed() {
        Ok(pressed) => pressed,
        Err(err) => {
            warn!("Button read failed: {err}");
            false
        }
    };
    let fired = edge.update(pressed);
    if fired {
        debug!("button rising edge");
    }
    fired
}

/// Run one session; a panic inside it is logged and flashed instead of
/// unwinding through the loop.
fn run_guarded(hw: &mut HardwareContext, workflow: &mut CaptureWorkflow<'_>) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| workflow.run_session(hw)));
    match outcome {
        Ok(report) => debug!(
            number = report.number,
            outcome = ?report.outcome,
            failures = report.failures.len(),
            "session report"
        ),
        Err(_) => {
            let phase = workflow.recover();
            error!("Capture session aborted unexpectedly during {}", phase.label());
            hw.indicator.flash_error(3, Duration::from_millis(200));
            hw.indicator.set_state(IndicatorState::Idle);
        }
    }
}
