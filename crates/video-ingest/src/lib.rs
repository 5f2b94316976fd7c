//! Still-image capture for the capture firmware.
//!
//! Frames are grabbed by an external tool (`ffmpeg` for V4L2 cameras,
//! `rpicam-still` for the Pi camera stack) straight into a JPEG file, then
//! optionally rotated in place for sensors mounted upside down.

mod camera;
mod ffmpeg;
mod transform;
mod types;

pub use camera::{StillCamera, StillCameraConfig};
pub use transform::rotate_in_place;
pub use types::{CaptureBackend, CaptureError, Rotation, StillFrame};
