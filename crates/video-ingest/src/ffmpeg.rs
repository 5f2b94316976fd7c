use std::{path::Path, process::Command};

/// Build an FFmpeg invocation that grabs exactly one frame from a V4L2 device and
/// writes it as JPEG to `output`.
pub(crate) fn still_command(
    device: &str,
    target_size: (u32, u32),
    jpeg_quality: u8,
    output: &Path,
) -> Command {
    let size_arg = format!("{}x{}", target_size.0, target_size.1);

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-f")
        .arg("video4linux2")
        .arg("-video_size")
        .arg(&size_arg)
        .arg("-i")
        .arg(device)
        .arg("-frames:v")
        .arg("1")
        .arg("-q:v")
        .arg(mjpeg_qscale(jpeg_quality).to_string())
        .arg(output);

    cmd
}

/// Map a 1-100 JPEG quality onto the MJPEG encoder's 2-31 qscale (lower is better).
pub(crate) fn mjpeg_qscale(quality: u8) -> u8 {
    let quality = quality.clamp(1, 100) as u32;
    (2 + (100 - quality) * 29 / 99) as u8
}

/// Normalise `0`, `video0` or `/dev/video0` style identifiers into a device path.
pub(crate) fn device_path(device: &str) -> String {
    if let Some(index) = parse_device_index(device) {
        return format!("/dev/video{index}");
    }
    if let Some(stripped) = device.strip_prefix("video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return format!("/dev/{device}");
        }
    }
    device.to_string()
}

pub(crate) fn parse_device_index(device: &str) -> Option<u32> {
    if let Ok(index) = device.parse::<u32>() {
        return Some(index);
    }
    if let Some(stripped) = device.strip_prefix("/dev/video") {
        if stripped.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = stripped.parse::<u32>() {
                return Some(index);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn qscale_spans_encoder_range() {
        assert_eq!(mjpeg_qscale(100), 2);
        assert_eq!(mjpeg_qscale(1), 31);
        assert_eq!(mjpeg_qscale(0), 31);
        assert!(mjpeg_qscale(85) < mjpeg_qscale(50));
    }

    #[test]
    fn device_identifiers_resolve_to_dev_paths() {
        assert_eq!(device_path("0"), "/dev/video0");
        assert_eq!(device_path("video2"), "/dev/video2");
        assert_eq!(device_path("/dev/video1"), "/dev/video1");
        assert_eq!(device_path("/dev/v4l/by-id/cam"), "/dev/v4l/by-id/cam");
    }

    #[test]
    fn still_command_requests_single_frame() {
        let output = PathBuf::from("/tmp/latest_image.jpg");
        let cmd = still_command("/dev/video0", (1280, 720), 100, &output);
        let args: Vec<String> = cmd
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        assert_eq!(cmd.get_program(), "ffmpeg");
        let frames = args.iter().position(|a| a == "-frames:v").unwrap();
        assert_eq!(args[frames + 1], "1");
        let size = args.iter().position(|a| a == "-video_size").unwrap();
        assert_eq!(args[size + 1], "1280x720");
        assert_eq!(args.last().unwrap(), "/tmp/latest_image.jpg");
    }
}
