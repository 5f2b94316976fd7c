use std::{io, path::PathBuf, process::ExitStatus};

use thiserror::Error;

/// Still JPEG frame written to disk by a capture backend.
#[derive(Clone, Debug)]
pub struct StillFrame {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
}

/// External program used to grab a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureBackend {
    /// `ffmpeg` reading a single frame from a V4L2 device.
    Ffmpeg,
    /// `rpicam-still` driving the Raspberry Pi camera stack.
    Rpicam,
}

impl CaptureBackend {
    pub fn program(self) -> &'static str {
        match self {
            CaptureBackend::Ffmpeg => "ffmpeg",
            CaptureBackend::Rpicam => "rpicam-still",
        }
    }
}

/// Clockwise rotation applied after capture, for sensors mounted upside down or sideways.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open camera device {device:?}")]
    Open { device: String },
    #[error("failed to launch {program}")]
    Spawn {
        program: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Tool {
        program: &'static str,
        status: ExitStatus,
        stderr: String,
    },
    #[error("capture produced no image at {}", path.display())]
    MissingOutput { path: PathBuf },
    #[error("failed to post-process {}", path.display())]
    PostProcess {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}
