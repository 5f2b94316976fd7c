/// Rising-edge latch for the capture button.
///
/// Fires once when the input goes high while armed, then stays disarmed until
/// the input has been read low at least once. A button held through a whole
/// capture session therefore never starts a second session.
#[derive(Debug)]
pub(crate) struct EdgeDetector {
    armed: bool,
}

impl Default for EdgeDetector {
    fn default() -> Self {
        Self { armed: true }
    }
}

impl EdgeDetector {
    /// Feed one sample; returns `true` when a new session should start.
    pub(crate) fn update(&mut self, pressed: bool) -> bool {
        if !pressed {
            self.armed = true;
            return false;
        }
        let fired = self.armed;
        self.armed = false;
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triggers(samples: &[bool]) -> usize {
        let mut edge = EdgeDetector::default();
        samples.iter().filter(|&&s| edge.update(s)).count()
    }

    #[test]
    fn held_button_fires_once() {
        assert_eq!(triggers(&[true, true, true, true]), 1);
    }

    #[test]
    fn release_rearms() {
        assert_eq!(triggers(&[false, true, true, false, true, false]), 2);
    }

    #[test]
    fn idle_input_never_fires() {
        assert_eq!(triggers(&[false; 16]), 0);
    }

    #[test]
    fn every_press_after_release_fires_exactly_once() {
        let mut edge = EdgeDetector::default();
        for _ in 0..5 {
            assert!(edge.update(true));
            assert!(!edge.update(true));
            assert!(!edge.update(false));
        }
    }
}
