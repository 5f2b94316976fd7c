//! Single-shot camera capture driven by an external capture tool.

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    ffmpeg,
    transform::rotate_in_place,
    types::{CaptureBackend, CaptureError, Rotation, StillFrame},
};

/// Capture settings fixed for the lifetime of a [`StillCamera`].
#[derive(Clone, Debug)]
pub struct StillCameraConfig {
    pub backend: CaptureBackend,
    /// V4L2 device for the FFmpeg backend; ignored by `rpicam-still`.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub rotation: Rotation,
    /// File every capture overwrites.
    pub output: PathBuf,
}

/// Camera handle that writes one JPEG per [`StillCamera::capture`] call.
pub struct StillCamera {
    config: StillCameraConfig,
    device: String,
    released: bool,
}

impl StillCamera {
    /// Check that the configured camera is reachable and prepare the output directory.
    pub fn open(config: StillCameraConfig) -> Result<Self, CaptureError> {
        let device = match config.backend {
            CaptureBackend::Ffmpeg => {
                let device = ffmpeg::device_path(&config.device);
                if !Path::new(&device).exists() {
                    return Err(CaptureError::Open { device });
                }
                device
            }
            CaptureBackend::Rpicam => {
                list_cameras(CaptureBackend::Rpicam.program())?;
                CaptureBackend::Rpicam.program().to_string()
            }
        };

        if let Some(parent) = config.output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        debug!(
            backend = config.backend.program(),
            device = %device,
            width = config.width,
            height = config.height,
            rotation = config.rotation.degrees(),
            "camera opened"
        );

        Ok(Self {
            config,
            device,
            released: false,
        })
    }

    /// Grab a still frame into the configured output file.
    ///
    /// Any stale file from an earlier capture is removed first so a tool that exits
    /// successfully without writing cannot hand back the previous image. Rotation is
    /// applied in place before the frame is returned.
    pub fn capture(&mut self) -> Result<StillFrame, CaptureError> {
        if self.released {
            return Err(CaptureError::Open {
                device: self.device.clone(),
            });
        }

        let output = self.config.output.clone();
        match fs::remove_file(&output) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let program = self.config.backend.program();
        let mut cmd = self.command(&output);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let result = cmd
            .output()
            .map_err(|source| CaptureError::Spawn { program, source })?;
        if !result.status.success() {
            return Err(CaptureError::Tool {
                program,
                status: result.status,
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        if !output.is_file() {
            return Err(CaptureError::MissingOutput { path: output });
        }

        rotate_in_place(&output, self.config.rotation, self.config.jpeg_quality)?;

        let (width, height) = match self.config.rotation {
            Rotation::Cw90 | Rotation::Cw270 => (self.config.height, self.config.width),
            Rotation::None | Rotation::Cw180 => (self.config.width, self.config.height),
        };

        Ok(StillFrame {
            path: output,
            width,
            height,
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }

    /// Release the camera; later captures fail with [`CaptureError::Open`].
    pub fn release(&mut self) {
        if !self.released {
            debug!(device = %self.device, "camera released");
            self.released = true;
        }
    }

    fn command(&self, output: &Path) -> Command {
        match self.config.backend {
            CaptureBackend::Ffmpeg => ffmpeg::still_command(
                &self.device,
                (self.config.width, self.config.height),
                self.config.jpeg_quality,
                output,
            ),
            CaptureBackend::Rpicam => rpicam_command(
                (self.config.width, self.config.height),
                self.config.jpeg_quality,
                output,
            ),
        }
    }
}

impl Drop for StillCamera {
    fn drop(&mut self) {
        if !self.released {
            warn!(device = %self.device, "camera dropped without explicit release");
            self.release();
        }
    }
}

/// Run `<program> --list-cameras` and fail unless at least one camera is attached.
fn list_cameras(program: &'static str) -> Result<(), CaptureError> {
    let result = Command::new(program)
        .arg("--list-cameras")
        .stdin(Stdio::null())
        .output()
        .map_err(|source| CaptureError::Spawn { program, source })?;
    let listing = format!(
        "{}{}",
        String::from_utf8_lossy(&result.stdout),
        String::from_utf8_lossy(&result.stderr)
    );
    if !result.status.success() || !lists_a_camera(&listing) {
        return Err(CaptureError::Open {
            device: program.to_string(),
        });
    }
    Ok(())
}

/// `rpicam-still --list-cameras` prints one `N : sensor [...]` line per camera.
fn lists_a_camera(listing: &str) -> bool {
    !listing.contains("No cameras available")
        && listing.lines().any(|line| {
            line.trim_start()
                .split_once(" : ")
                .is_some_and(|(index, _)| index.trim().parse::<u32>().is_ok())
        })
}

fn rpicam_command(target_size: (u32, u32), jpeg_quality: u8, output: &Path) -> Command {
    let mut cmd = Command::new(CaptureBackend::Rpicam.program());
    cmd.arg("--nopreview")
        .arg("--immediate")
        .arg("--width")
        .arg(target_size.0.to_string())
        .arg("--height")
        .arg(target_size.1.to_string())
        .arg("--quality")
        .arg(jpeg_quality.to_string())
        .arg("--output")
        .arg(output);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    /// FFmpeg-backed config whose "device" is a plain file, so `open` succeeds
    /// without camera hardware.
    fn config(device: &tempfile::NamedTempFile, output: PathBuf) -> StillCameraConfig {
        StillCameraConfig {
            backend: CaptureBackend::Ffmpeg,
            device: device.path().to_string_lossy().into_owned(),
            width: 1280,
            height: 720,
            jpeg_quality: 85,
            rotation: Rotation::None,
            output,
        }
    }

    #[test]
    fn open_rejects_missing_v4l_device() {
        let dir = tempfile::tempdir().unwrap();
        let device = tempfile::NamedTempFile::new().unwrap();
        let mut cfg = config(&device, dir.path().join("latest_image.jpg"));
        cfg.device = "/dev/video-does-not-exist".into();

        let err = StillCamera::open(cfg).err().unwrap();
        assert!(matches!(err, CaptureError::Open { .. }));
    }

    #[test]
    fn open_creates_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("captures").join("latest_image.jpg");
        let device = tempfile::NamedTempFile::new().unwrap();
        let mut camera = StillCamera::open(config(&device, output.clone())).unwrap();
        assert!(output.parent().unwrap().is_dir());
        camera.release();
    }

    #[test]
    fn released_camera_refuses_capture() {
        let dir = tempfile::tempdir().unwrap();
        let device = tempfile::NamedTempFile::new().unwrap();
        let mut camera = StillCamera::open(config(&device, dir.path().join("img.jpg"))).unwrap();
        camera.release();
        assert!(matches!(camera.capture(), Err(CaptureError::Open { .. })));
    }

    #[test]
    fn missing_rpicam_tool_fails_open() {
        let err = list_cameras("rpicam-still-not-installed").unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Spawn {
                program: "rpicam-still-not-installed",
                ..
            }
        ));
    }

    #[test]
    fn camera_listing_requires_a_sensor_line() {
        let attached = "Available cameras\n-----------------\n0 : imx708 [4608x2592 10-bit RGGB] (/base/soc/i2c0mux/i2c@1/imx708@1a)\n";
        assert!(lists_a_camera(attached));
        assert!(!lists_a_camera("No cameras available!\n"));
        assert!(!lists_a_camera(""));
    }

    #[test]
    fn rpicam_command_targets_output_file() {
        let cmd = rpicam_command((1280, 720), 90, Path::new("out.jpg"));
        let args: Vec<String> = cmd
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(cmd.get_program(), "rpicam-still");
        assert!(args.windows(2).any(|w| w[0] == "--width" && w[1] == "1280"));
        assert!(args.windows(2).any(|w| w[0] == "--quality" && w[1] == "90"));
        assert_eq!(args.last().unwrap(), "out.jpg");
    }
}
