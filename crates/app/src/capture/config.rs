//! Configuration parsing for the capture firmware.
//!
//! CLI flags (each with an environment fallback) are collected into the `*Args`
//! structs below and validated into a [`FirmwareConfig`] that downstream stages
//! use without re-parsing flags.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Result, anyhow, bail};
use clap::{Args, ValueEnum};
use ml_core::{ClassifierConfig, DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use video_ingest::{CaptureBackend, Rotation, StillCameraConfig};

use crate::capture::hardware::board_to_bcm;

/// Local file every capture overwrites; also the remote "latest" pointer name.
pub(crate) const IMAGE_FILE_NAME: &str = "latest_image.jpg";
/// Local sidecar holding the verdict; also its remote pointer name.
pub(crate) const SIDECAR_FILE_NAME: &str = "response.json";

const DEFAULT_FTP_PORT: u16 = 21;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
/// Program used to grab stills.
pub enum CameraBackendArg {
    /// FFmpeg reading a V4L2 device.
    Ffmpeg,
    /// `rpicam-still` (Raspberry Pi camera stack).
    Rpicam,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
/// Where the button and status LED live.
pub enum GpioBackend {
    /// Raspberry Pi header pins (requires the `rpi` feature).
    Rpi,
    /// Stdin-driven button and log-only LED, for bench testing.
    Sim,
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by every stage of the firmware.
pub struct FirmwareConfig {
    pub camera: StillCameraConfig,
    pub classifier: ClassifierConfig,
    pub ftp: FtpSettings,
    pub gpio: GpioSettings,
    pub work_dir: PathBuf,
    pub poll_interval: Duration,
    pub countdown_secs: u32,
    /// Also upload a timestamped copy of each image and sidecar.
    pub keep_history: bool,
    pub telemetry: TelemetryOptions,
}

impl FirmwareConfig {
    pub(crate) fn image_path(&self) -> PathBuf {
        self.work_dir.join(IMAGE_FILE_NAME)
    }

    pub(crate) fn sidecar_path(&self) -> PathBuf {
        self.work_dir.join(SIDECAR_FILE_NAME)
    }
}

#[derive(Clone, Debug)]
pub struct FtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Remote directory prefix, without trailing slash.
    pub remote_dir: String,
    pub passive: bool,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
/// Pin assignments use physical BOARD numbering.
pub struct GpioSettings {
    pub backend: GpioBackend,
    pub button_pin: u8,
    pub red_pin: u8,
    pub green_pin: u8,
    pub blue_pin: u8,
    pub pwm_frequency_hz: f64,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for logging and metrics.
pub struct TelemetryOptions {
    /// Lower the default log filter to `debug`.
    pub verbose: bool,
    /// Write a Chrome trace JSON file capturing session spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Serve Prometheus metrics on this address.
    pub metrics_addr: Option<SocketAddr>,
}

/// Camera flags.
#[derive(Debug, Args)]
pub struct CameraArgs {
    /// Capture program.
    #[arg(id = "camera_backend", long = "camera-backend", value_enum, default_value = "rpicam", env = "ZENITH_CAMERA_BACKEND")]
    pub backend: CameraBackendArg,
    /// V4L2 device (index or path) used by the ffmpeg backend.
    #[arg(long = "camera-device", value_name = "DEVICE", default_value = "/dev/video0", env = "ZENITH_CAMERA_DEVICE")]
    pub device: String,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 1280)]
    pub width: u32,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 720)]
    pub height: u32,
    /// JPEG quality (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = 85)]
    pub jpeg_quality: u8,
    /// Clockwise rotation applied after capture (0, 90, 180, 270).
    #[arg(long = "rotate", value_name = "DEGREES", default_value_t = 0, env = "ZENITH_ROTATE")]
    pub rotate: u16,
}

/// Classifier flags.
#[derive(Debug, Args)]
pub struct ClassifierArgs {
    /// Bearer token for the chat-completions endpoint.
    #[arg(long = "api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    /// Base URL of the chat-completions API.
    #[arg(long = "api-base", value_name = "URL", default_value = DEFAULT_BASE_URL, env = "ZENITH_API_BASE")]
    pub base_url: String,
    /// Vision-capable model name.
    #[arg(long = "model", default_value = DEFAULT_MODEL, env = "ZENITH_MODEL")]
    pub model: String,
    /// Reply token budget.
    #[arg(long = "max-tokens", value_name = "N", default_value_t = DEFAULT_MAX_TOKENS)]
    pub max_tokens: u32,
    /// Request timeout in seconds.
    #[arg(id = "api_timeout_secs", long = "api-timeout", value_name = "SECS", default_value_t = 30)]
    pub timeout_secs: u64,
}

/// FTP upload flags.
#[derive(Debug, Args)]
pub struct FtpArgs {
    /// FTP server as `host` or `host:port`.
    #[arg(long = "ftp-address", value_name = "HOST[:PORT]", env = "FTP_ADDRESS")]
    pub address: Option<String>,
    /// FTP login user.
    #[arg(long = "ftp-username", env = "FTP_USERNAME")]
    pub username: Option<String>,
    /// FTP login password.
    #[arg(long = "ftp-password", env = "FTP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Remote directory receiving uploads.
    #[arg(long = "ftp-dir", value_name = "DIR", default_value = "capture", env = "ZENITH_FTP_DIR")]
    pub remote_dir: String,
    /// Use passive mode instead of active mode.
    #[arg(long = "ftp-passive", action = clap::ArgAction::SetTrue)]
    pub passive: bool,
    /// Connect and read timeout in seconds.
    #[arg(id = "ftp_timeout_secs", long = "ftp-timeout", value_name = "SECS", default_value_t = 30)]
    pub timeout_secs: u64,
}

/// GPIO flags (BOARD pin numbering).
#[derive(Debug, Args)]
pub struct GpioArgs {
    /// Hardware backend for the button and LED.
    #[arg(id = "gpio_backend", long = "gpio", value_enum, default_value = "rpi", env = "ZENITH_GPIO")]
    pub backend: GpioBackend,
    /// Capture button input pin.
    #[arg(long = "button-pin", value_name = "PIN", default_value_t = 22)]
    pub button_pin: u8,
    /// Red LED pin.
    #[arg(long = "red-pin", value_name = "PIN", default_value_t = 11)]
    pub red_pin: u8,
    /// Green LED pin.
    #[arg(long = "green-pin", value_name = "PIN", default_value_t = 13)]
    pub green_pin: u8,
    /// Blue LED pin.
    #[arg(long = "blue-pin", value_name = "PIN", default_value_t = 15)]
    pub blue_pin: u8,
    /// Software PWM frequency for the LED channels.
    #[arg(long = "pwm-frequency", value_name = "HZ", default_value_t = 100.0)]
    pub pwm_frequency_hz: f64,
}

/// Logging and metrics flags.
#[derive(Debug, Args)]
pub struct TelemetryArgs {
    /// Enable verbose (debug) logging.
    #[arg(long = "verbose", short = 'v', action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Serve Prometheus metrics on this address.
    #[arg(long = "metrics-addr", value_name = "ADDR", env = "ZENITH_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

/// Full flag set for the `run` and `once` subcommands.
#[derive(Debug, Args)]
pub struct FirmwareArgs {
    #[command(flatten)]
    pub camera: CameraArgs,
    #[command(flatten)]
    pub classifier: ClassifierArgs,
    #[command(flatten)]
    pub ftp: FtpArgs,
    #[command(flatten)]
    pub gpio: GpioArgs,
    #[command(flatten)]
    pub telemetry: TelemetryArgs,
    /// Directory for the local image and sidecar files.
    #[arg(long = "work-dir", value_name = "DIR", default_value = ".", env = "ZENITH_WORK_DIR")]
    pub work_dir: PathBuf,
    /// Button poll interval in milliseconds.
    #[arg(long = "poll-interval", value_name = "MS", default_value_t = 200)]
    pub poll_interval_ms: u64,
    /// Seconds to count down before arming the button.
    #[arg(long = "countdown", value_name = "SECS", default_value_t = 5)]
    pub countdown_secs: u32,
    /// Also upload timestamped copies next to the latest pointer objects.
    #[arg(long = "keep-history", action = clap::ArgAction::SetTrue)]
    pub keep_history: bool,
}

impl From<TelemetryArgs> for TelemetryOptions {
    fn from(args: TelemetryArgs) -> Self {
        Self {
            verbose: args.verbose,
            chrome_trace_path: args.chrome_trace,
            metrics_addr: args.metrics_addr,
        }
    }
}

impl TryFrom<ClassifierArgs> for ClassifierConfig {
    type Error = anyhow::Error;

    fn try_from(args: ClassifierArgs) -> Result<Self> {
        let api_key = args
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("Missing API key. Provide --api-key or set OPENAI_API_KEY."))?;
        if args.max_tokens == 0 {
            bail!("--max-tokens must be at least 1");
        }
        if args.timeout_secs == 0 {
            bail!("--api-timeout must be at least 1 second");
        }

        Ok(Self {
            api_key,
            base_url: args.base_url,
            model: args.model,
            max_tokens: args.max_tokens,
            timeout: Duration::from_secs(args.timeout_secs),
        })
    }
}

impl TryFrom<FtpArgs> for FtpSettings {
    type Error = anyhow::Error;

    fn try_from(args: FtpArgs) -> Result<Self> {
        let address = args
            .address
            .ok_or_else(|| anyhow!("Missing FTP server. Provide --ftp-address or set FTP_ADDRESS."))?;
        let (host, port) = parse_ftp_address(&address)?;
        let username = args
            .username
            .ok_or_else(|| anyhow!("Missing FTP user. Provide --ftp-username or set FTP_USERNAME."))?;
        let password = args.password.unwrap_or_default();
        if args.timeout_secs == 0 {
            bail!("--ftp-timeout must be at least 1 second");
        }

        Ok(Self {
            host,
            port,
            username,
            password,
            remote_dir: args.remote_dir.trim_matches('/').to_string(),
            passive: args.passive,
            timeout: Duration::from_secs(args.timeout_secs),
        })
    }
}

impl TryFrom<GpioArgs> for GpioSettings {
    type Error = anyhow::Error;

    fn try_from(args: GpioArgs) -> Result<Self> {
        let pins = [
            ("--button-pin", args.button_pin),
            ("--red-pin", args.red_pin),
            ("--green-pin", args.green_pin),
            ("--blue-pin", args.blue_pin),
        ];
        for (flag, pin) in pins {
            if board_to_bcm(pin).is_none() {
                bail!("{flag} {pin} is not a GPIO pin on the 40-pin header");
            }
        }
        for (i, (flag, pin)) in pins.iter().enumerate() {
            if let Some((other, _)) = pins[i + 1..].iter().find(|(_, p)| p == pin) {
                bail!("{flag} and {other} both use pin {pin}");
            }
        }
        if args.pwm_frequency_hz.is_nan() || args.pwm_frequency_hz <= 0.0 {
            bail!("--pwm-frequency must be positive");
        }

        Ok(Self {
            backend: args.backend,
            button_pin: args.button_pin,
            red_pin: args.red_pin,
            green_pin: args.green_pin,
            blue_pin: args.blue_pin,
            pwm_frequency_hz: args.pwm_frequency_hz,
        })
    }
}

impl TryFrom<FirmwareArgs> for FirmwareConfig {
    type Error = anyhow::Error;

    fn try_from(args: FirmwareArgs) -> Result<Self> {
        let camera_args = args.camera;
        if camera_args.width == 0 || camera_args.height == 0 {
            bail!("Capture width and height must be positive integers");
        }
        if !(1..=100).contains(&camera_args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        let rotation = Rotation::from_degrees(camera_args.rotate)
            .ok_or_else(|| anyhow!("--rotate must be one of 0, 90, 180, 270"))?;
        if args.poll_interval_ms == 0 {
            bail!("--poll-interval must be at least 1 ms");
        }

        let camera = StillCameraConfig {
            backend: match camera_args.backend {
                CameraBackendArg::Ffmpeg => CaptureBackend::Ffmpeg,
                CameraBackendArg::Rpicam => CaptureBackend::Rpicam,
            },
            device: camera_args.device,
            width: camera_args.width,
            height: camera_args.height,
            jpeg_quality: camera_args.jpeg_quality,
            rotation,
            output: args.work_dir.join(IMAGE_FILE_NAME),
        };

        Ok(Self {
            camera,
            classifier: args.classifier.try_into()?,
            ftp: args.ftp.try_into()?,
            gpio: args.gpio.try_into()?,
            work_dir: args.work_dir,
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            countdown_secs: args.countdown_secs,
            keep_history: args.keep_history,
            telemetry: args.telemetry.into(),
        })
    }
}

/// Split `host` or `host:port`; bare hosts use the standard control port.
pub(crate) fn parse_ftp_address(address: &str) -> Result<(String, u16)> {
    let address = address.trim();
    if address.is_empty() {
        bail!("FTP address must not be empty");
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            let port = port
                .parse::<u16>()
                .map_err(|_| anyhow!("invalid FTP port in {address:?}"))?;
            Ok((host.to_string(), port))
        }
        _ => Ok((address.to_string(), DEFAULT_FTP_PORT)),
    }
}

/// Relative work directories are resolved against the current directory so log
/// lines show where files actually land.
pub(crate) fn display_work_dir(path: &Path) -> PathBuf {
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        args: FirmwareArgs,
    }

    fn parse(extra: &[&str]) -> Result<FirmwareConfig> {
        let mut argv = vec![
            "zenith-go",
            "--api-key",
            "sk-test",
            "--ftp-address",
            "ftp.example.net",
            "--ftp-username",
            "cam",
            "--ftp-password",
            "secret",
        ];
        argv.extend_from_slice(extra);
        let cli = TestCli::try_parse_from(argv)?;
        FirmwareConfig::try_from(cli.args)
    }

    #[test]
    fn flattened_flag_ids_are_unique() {
        use clap::CommandFactory;

        TestCli::command().debug_assert();
    }

    #[test]
    fn backend_and_timeout_flags_stay_independent() {
        let config = parse(&[
            "--gpio",
            "sim",
            "--camera-backend",
            "ffmpeg",
            "--api-timeout",
            "7",
            "--ftp-timeout",
            "9",
        ])
        .unwrap();
        assert_eq!(config.gpio.backend, GpioBackend::Sim);
        assert_eq!(config.camera.backend, CaptureBackend::Ffmpeg);
        assert_eq!(config.classifier.timeout, Duration::from_secs(7));
        assert_eq!(config.ftp.timeout, Duration::from_secs(9));
    }

    #[test]
    fn defaults_match_field_deployment() {
        let config = parse(&[]).unwrap();
        assert_eq!((config.camera.width, config.camera.height), (1280, 720));
        assert_eq!(config.camera.backend, CaptureBackend::Rpicam);
        assert_eq!(config.camera.output, PathBuf::from(".").join(IMAGE_FILE_NAME));
        assert_eq!(config.ftp.port, 21);
        assert_eq!(config.ftp.remote_dir, "capture");
        assert!(!config.ftp.passive);
        assert_eq!(config.gpio.button_pin, 22);
        assert_eq!(
            (config.gpio.red_pin, config.gpio.green_pin, config.gpio.blue_pin),
            (11, 13, 15)
        );
        assert_eq!(config.poll_interval, Duration::from_millis(200));
        assert_eq!(config.classifier.max_tokens, 100);
        assert_eq!(config.sidecar_path(), PathBuf::from(".").join(SIDECAR_FILE_NAME));
    }

    #[test]
    fn rejects_unsupported_rotation() {
        let err = parse(&["--rotate", "45"]).unwrap_err();
        assert!(err.to_string().contains("--rotate"));
    }

    #[test]
    fn rejects_out_of_range_quality() {
        assert!(parse(&["--jpeg-quality", "0"]).is_err());
        assert!(parse(&["--jpeg-quality", "100"]).is_ok());
    }

    #[test]
    fn rejects_shared_or_non_gpio_pins() {
        let err = parse(&["--red-pin", "22"]).unwrap_err();
        assert!(err.to_string().contains("pin 22"));
        let err = parse(&["--button-pin", "2"]).unwrap_err();
        assert!(err.to_string().contains("--button-pin"));
    }

    #[test]
    fn remote_dir_is_trimmed() {
        let config = parse(&["--ftp-dir", "/capture/site-a/"]).unwrap();
        assert_eq!(config.ftp.remote_dir, "capture/site-a");
    }

    #[test]
    fn ftp_address_accepts_optional_port() {
        assert_eq!(parse_ftp_address("10.0.0.5").unwrap(), ("10.0.0.5".into(), 21));
        assert_eq!(
            parse_ftp_address("files.local:2121").unwrap(),
            ("files.local".into(), 2121)
        );
        assert!(parse_ftp_address("files.local:ftp").is_err());
        assert!(parse_ftp_address("  ").is_err());
    }

    #[test]
    fn missing_api_key_is_reported() {
        let args = ClassifierArgs {
            api_key: Some("   ".into()),
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            max_tokens: 100,
            timeout_secs: 30,
        };
        let err = ClassifierConfig::try_from(args).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
