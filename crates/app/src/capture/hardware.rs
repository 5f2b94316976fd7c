//! Hardware seams (button, status LED, camera) and the owned context that
//! acquires and releases them.
//!
//! Two GPIO backends exist: Raspberry Pi header pins via `rppal` (feature
//! `rpi`) and a bench simulator where Enter on stdin presses the button and
//! LED writes go to the log.

use std::io::{self, BufRead};

use crossbeam_channel::{Receiver, unbounded};
use thiserror::Error;
use tracing::{debug, info};
use video_ingest::{CaptureError, StillCamera, StillFrame};

use crate::capture::{
    config::{FirmwareConfig, GpioBackend, GpioSettings},
    indicator::{IndicatorState, LedPattern, StatusIndicator},
    telemetry,
};

#[derive(Debug, Error)]
pub(crate) enum HardwareError {
    #[error("GPIO error: {0}")]
    Gpio(String),
    #[error("GPIO backend {0:?} is not available in this build")]
    BackendUnavailable(GpioBackend),
    #[error(transparent)]
    Camera(#[from] CaptureError),
}

/// Digital input sampled by the polling loop. `true` means pressed.
pub(crate) trait ButtonInput {
    fn is_pressed(&mut self) -> Result<bool, HardwareError>;
}

/// Three PWM channels behind one RGB LED.
pub(crate) trait RgbLed {
    fn write(&mut self, pattern: LedPattern) -> Result<(), HardwareError>;
}

/// Still-image producer used by the capture workflow.
pub(crate) trait ImageSource {
    fn capture(&mut self) -> Result<StillFrame, CaptureError>;
    fn release(&mut self);
}

impl ImageSource for StillCamera {
    fn capture(&mut self) -> Result<StillFrame, CaptureError> {
        StillCamera::capture(self)
    }

    fn release(&mut self) {
        StillCamera::release(self);
    }
}

/// Every hardware handle the firmware owns, released together on `close` or drop.
pub(crate) struct HardwareContext {
    pub(crate) button: Box<dyn ButtonInput>,
    pub(crate) indicator: StatusIndicator,
    pub(crate) camera: Box<dyn ImageSource>,
    closed: bool,
}

impl HardwareContext {
    pub(crate) fn open(config: &FirmwareConfig) -> Result<Self, HardwareError> {
        let (button, led) = open_gpio(&config.gpio)?;
        // The indicator is built before the camera so a camera failure still
        // leaves the LED switched off on the way out.
        let indicator = StatusIndicator::new(led);
        let camera = StillCamera::open(config.camera.clone())?;
        Ok(Self::from_parts(button, indicator, Box::new(camera)))
    }

    pub(crate) fn from_parts(
        button: Box<dyn ButtonInput>,
        indicator: StatusIndicator,
        camera: Box<dyn ImageSource>,
    ) -> Self {
        Self {
            button,
            indicator,
            camera,
            closed: false,
        }
    }

    /// Switch the LED off and release the camera. Idempotent.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.indicator.shutdown();
        self.camera.release();
        self.closed = true;
        debug!("hardware released");
    }
}

impl Drop for HardwareContext {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_gpio(
    settings: &GpioSettings,
) -> Result<(Box<dyn ButtonInput>, Box<dyn RgbLed + Send>), HardwareError> {
    match settings.backend {
        GpioBackend::Sim => {
            info!("Simulated GPIO: press Enter to trigger a capture");
            debug!(
                button = settings.button_pin,
                red = settings.red_pin,
                green = settings.green_pin,
                blue = settings.blue_pin,
                pwm_hz = settings.pwm_frequency_hz,
                "simulating pins"
            );
            Ok((Box::new(SimButton::from_stdin()?), Box::new(LogLed)))
        }
        #[cfg(feature = "rpi")]
        GpioBackend::Rpi => rpi::open(settings),
        #[cfg(not(feature = "rpi"))]
        GpioBackend::Rpi => Err(HardwareError::BackendUnavailable(GpioBackend::Rpi)),
    }
}

/// Map a physical header pin (BOARD numbering) to its BCM GPIO number.
pub(crate) fn board_to_bcm(pin: u8) -> Option<u8> {
    let bcm = match pin {
        3 => 2,
        5 => 3,
        7 => 4,
        8 => 14,
        10 => 15,
        11 => 17,
        12 => 18,
        13 => 27,
        15 => 22,
        16 => 23,
        18 => 24,
        19 => 10,
        21 => 9,
        22 => 25,
        23 => 11,
        24 => 8,
        26 => 7,
        27 => 0,
        28 => 1,
        29 => 5,
        31 => 6,
        32 => 12,
        33 => 13,
        35 => 19,
        36 => 16,
        37 => 26,
        38 => 20,
        40 => 21,
        _ => return None,
    };
    Some(bcm)
}

/// Button pressed by a line on stdin; each press reads high for exactly one poll.
pub(crate) struct SimButton {
    presses: Receiver<()>,
}

impl SimButton {
    fn from_stdin() -> Result<Self, HardwareError> {
        let (tx, rx) = unbounded();
        telemetry::spawn_thread("sim-button", move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                if line.is_err() || tx.send(()).is_err() {
                    break;
                }
            }
            debug!("stdin closed; simulated button detached");
        })
        .map_err(|err| HardwareError::Gpio(format!("failed to spawn stdin reader: {err}")))?;
        Ok(Self { presses: rx })
    }

    #[cfg(test)]
    pub(crate) fn from_receiver(presses: Receiver<()>) -> Self {
        Self { presses }
    }
}

impl ButtonInput for SimButton {
    fn is_pressed(&mut self) -> Result<bool, HardwareError> {
        Ok(self.presses.try_recv().is_ok())
    }
}

/// LED that only logs what it would display.
struct LogLed;

impl RgbLed for LogLed {
    fn write(&mut self, pattern: LedPattern) -> Result<(), HardwareError> {
        let state = [
            IndicatorState::Off,
            IndicatorState::Idle,
            IndicatorState::Capturing,
            IndicatorState::Uploading,
            IndicatorState::Error,
        ]
        .into_iter()
        .find(|state| state.pattern() == pattern)
        .map(IndicatorState::label)
        .unwrap_or("custom");
        debug!(
            red = pattern.red,
            green = pattern.green,
            blue = pattern.blue,
            state,
            "sim led"
        );
        Ok(())
    }
}

#[cfg(feature = "rpi")]
mod rpi {
    use rppal::gpio::{Gpio, InputPin, OutputPin};

    use super::*;

    pub(super) fn open(
        settings: &GpioSettings,
    ) -> Result<(Box<dyn ButtonInput>, Box<dyn RgbLed + Send>), HardwareError> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let pin = |board: u8| -> Result<rppal::gpio::Pin, HardwareError> {
            let bcm = board_to_bcm(board)
                .ok_or_else(|| HardwareError::Gpio(format!("board pin {board} is not a GPIO pin")))?;
            gpio.get(bcm).map_err(gpio_err)
        };

        let button = RpiButton {
            pin: pin(settings.button_pin)?.into_input_pulldown(),
        };
        let led = RpiLed {
            channels: [
                pin(settings.red_pin)?.into_output_low(),
                pin(settings.green_pin)?.into_output_low(),
                pin(settings.blue_pin)?.into_output_low(),
            ],
            frequency_hz: settings.pwm_frequency_hz,
        };
        info!(
            button = settings.button_pin,
            red = settings.red_pin,
            green = settings.green_pin,
            blue = settings.blue_pin,
            "Raspberry Pi GPIO ready"
        );
        Ok((Box::new(button), Box::new(led)))
    }

    fn gpio_err(err: rppal::gpio::Error) -> HardwareError {
        HardwareError::Gpio(err.to_string())
    }

    struct RpiButton {
        pin: InputPin,
    }

    impl ButtonInput for RpiButton {
        fn is_pressed(&mut self) -> Result<bool, HardwareError> {
            Ok(self.pin.is_high())
        }
    }

    /// Software-PWM RGB LED; pins reset to their original mode on drop.
    struct RpiLed {
        channels: [OutputPin; 3],
        frequency_hz: f64,
    }

    impl RgbLed for RpiLed {
        fn write(&mut self, pattern: LedPattern) -> Result<(), HardwareError> {
            let duties = [pattern.red, pattern.green, pattern.blue];
            for (channel, duty) in self.channels.iter_mut().zip(duties) {
                match duty.min(100) {
                    0 => {
                        channel.clear_pwm().map_err(gpio_err)?;
                        channel.set_low();
                    }
                    100 => {
                        channel.clear_pwm().map_err(gpio_err)?;
                        channel.set_high();
                    }
                    duty => channel
                        .set_pwm_frequency(self.frequency_hz, f64::from(duty) / 100.0)
                        .map_err(gpio_err)?,
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::capture::indicator::tests::RecordingLed;

    struct CountingCamera {
        releases: Arc<Mutex<u32>>,
    }

    impl ImageSource for CountingCamera {
        fn capture(&mut self) -> Result<StillFrame, CaptureError> {
            Err(CaptureError::Open {
                device: "test".into(),
            })
        }

        fn release(&mut self) {
            *self.releases.lock().unwrap() += 1;
        }
    }

    #[test]
    fn board_pins_map_to_bcm() {
        assert_eq!(board_to_bcm(11), Some(17));
        assert_eq!(board_to_bcm(13), Some(27));
        assert_eq!(board_to_bcm(15), Some(22));
        assert_eq!(board_to_bcm(22), Some(25));
        assert_eq!(board_to_bcm(1), None);
        assert_eq!(board_to_bcm(6), None);
        assert_eq!(board_to_bcm(41), None);
    }

    #[test]
    fn sim_button_reads_high_once_per_press() {
        let (tx, rx) = unbounded();
        let mut button = SimButton::from_receiver(rx);
        assert!(!button.is_pressed().unwrap());
        tx.send(()).unwrap();
        assert!(button.is_pressed().unwrap());
        assert!(!button.is_pressed().unwrap());
    }

    #[test]
    fn drop_releases_everything_once() {
        let led = RecordingLed::default();
        let releases = Arc::new(Mutex::new(0));
        let (_tx, rx) = unbounded();
        {
            let mut hw = HardwareContext::from_parts(
                Box::new(SimButton::from_receiver(rx)),
                StatusIndicator::new(Box::new(led.clone())),
                Box::new(CountingCamera {
                    releases: releases.clone(),
                }),
            );
            hw.indicator.set_state(IndicatorState::Uploading);
            hw.close();
        }
        assert_eq!(*releases.lock().unwrap(), 1);
        assert_eq!(led.history().last(), Some(&LedPattern::OFF));
    }

    #[cfg(not(feature = "rpi"))]
    #[test]
    fn rpi_backend_requires_feature() {
        let settings = GpioSettings {
            backend: GpioBackend::Rpi,
            button_pin: 22,
            red_pin: 11,
            green_pin: 13,
            blue_pin: 15,
            pwm_frequency_hz: 100.0,
        };
        assert!(matches!(
            open_gpio(&settings),
            Err(HardwareError::BackendUnavailable(GpioBackend::Rpi))
        ));
    }
}
