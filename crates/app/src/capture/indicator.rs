//! Tri-colour status LED driven through PWM duty cycles.
//!
//! Patterns are fixed per [`IndicatorState`]. Writes never fail from the
//! caller's point of view: hardware errors are logged and swallowed. The LED is
//! switched off when the indicator is dropped.

use std::{
    marker::PhantomData,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use tracing::{debug, warn};

use crate::capture::{hardware::RgbLed, telemetry};

/// Duty cycle per colour channel, in percent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct LedPattern {
    pub(crate) red: u8,
    pub(crate) green: u8,
    pub(crate) blue: u8,
}

impl LedPattern {
    pub(crate) const OFF: LedPattern = LedPattern::rgb(0, 0, 0);

    pub(crate) const fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum IndicatorState {
    Off,
    Idle,
    Capturing,
    Classifying,
    Uploading,
    Error,
}

impl IndicatorState {
    pub(crate) fn pattern(self) -> LedPattern {
        match self {
            IndicatorState::Off => LedPattern::OFF,
            IndicatorState::Idle => LedPattern::rgb(0, 10, 0),
            IndicatorState::Capturing | IndicatorState::Classifying => LedPattern::rgb(0, 0, 100),
            IndicatorState::Uploading => LedPattern::rgb(0, 100, 100),
            IndicatorState::Error => LedPattern::rgb(100, 0, 0),
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            IndicatorState::Off => "off",
            IndicatorState::Idle => "idle",
            IndicatorState::Capturing => "capturing",
            IndicatorState::Classifying => "classifying",
            IndicatorState::Uploading => "uploading",
            IndicatorState::Error => "error",
        }
    }
}

type SharedLed = Arc<Mutex<Box<dyn RgbLed + Send>>>;

pub(crate) struct StatusIndicator {
    led: SharedLed,
    state: IndicatorState,
}

impl StatusIndicator {
    pub(crate) fn new(led: Box<dyn RgbLed + Send>) -> Self {
        let led = Arc::new(Mutex::new(led));
        write_pattern(&led, LedPattern::OFF);
        Self {
            led,
            state: IndicatorState::Off,
        }
    }

    pub(crate) fn state(&self) -> IndicatorState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: IndicatorState) {
        if state != self.state {
            debug!(from = self.state.label(), to = state.label(), "indicator");
        }
        write_pattern(&self.led, state.pattern());
        self.state = state;
    }

    /// Blink `state`'s pattern until the returned guard is dropped.
    ///
    /// The guard borrows the indicator mutably, so no other state can be set while
    /// the animation runs; dropping it stops and joins the animation thread.
    pub(crate) fn blink(&mut self, state: IndicatorState, period: Duration) -> BlinkGuard<'_> {
        self.state = state;
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let led = self.led.clone();
        let half = period / 2;
        let on = state.pattern();

        let spawned = telemetry::spawn_thread("indicator-blink", move || {
            loop {
                write_pattern(&led, on);
                if !matches!(stop_rx.recv_timeout(half), Err(RecvTimeoutError::Timeout)) {
                    break;
                }
                write_pattern(&led, LedPattern::OFF);
                if !matches!(stop_rx.recv_timeout(half), Err(RecvTimeoutError::Timeout)) {
                    break;
                }
            }
        });

        match spawned {
            Ok(handle) => BlinkGuard {
                stop: Some(stop_tx),
                handle: Some(handle),
                _indicator: PhantomData,
            },
            Err(err) => {
                warn!("failed to spawn indicator animation, holding solid pattern: {err}");
                write_pattern(&self.led, on);
                BlinkGuard {
                    stop: None,
                    handle: None,
                    _indicator: PhantomData,
                }
            }
        }
    }

    /// Flash the error pattern `flashes` times, blocking, and leave the LED dark.
    pub(crate) fn flash_error(&mut self, flashes: u32, interval: Duration) {
        debug!(from = self.state.label(), to = "error", "indicator");
        self.state = IndicatorState::Error;
        for _ in 0..flashes {
            write_pattern(&self.led, IndicatorState::Error.pattern());
            thread::sleep(interval);
            write_pattern(&self.led, LedPattern::OFF);
            thread::sleep(interval);
        }
    }

    /// Switch the LED off.
    pub(crate) fn shutdown(&mut self) {
        self.set_state(IndicatorState::Off);
    }
}

impl Drop for StatusIndicator {
    fn drop(&mut self) {
        write_pattern(&self.led, LedPattern::OFF);
    }
}

/// Running blink animation; see [`StatusIndicator::blink`].
pub(crate) struct BlinkGuard<'a> {
    stop: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
    _indicator: PhantomData<&'a mut StatusIndicator>,
}

impl Drop for BlinkGuard<'_> {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("indicator animation thread panicked");
            }
        }
    }
}

fn write_pattern(led: &SharedLed, pattern: LedPattern) {
    let mut guard = match led.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Err(err) = guard.write(pattern) {
        warn!("failed to drive status LED: {err}");
    }
}
