//! Button-triggered capture firmware.
//!
//! - [`config`]: CLI flags and the validated [`FirmwareConfig`].
//! - [`hardware`]: GPIO and camera seams plus the owned [`hardware::HardwareContext`].
//! - [`indicator`]: status LED patterns and the blink animation.
//! - [`trigger`]: rising-edge latch for the button.
//! - [`workflow`]: one capture → classify → persist → upload session.
//! - [`uploader`]: FTP transfer of the image and verdict sidecar.
//! - [`pipeline`]: the polling loop and the one-shot entry points.

pub(crate) mod config;
pub(crate) mod data;
pub(crate) mod hardware;
pub(crate) mod indicator;
pub(crate) mod pipeline;
pub(crate) mod telemetry;
pub(crate) mod trigger;
pub(crate) mod uploader;
pub(crate) mod workflow;

pub use config::{FirmwareArgs, FirmwareConfig, TelemetryOptions};
pub use pipeline::{classify_file, run, run_once};
