//! Live measurement of the player's arm span from the two hand devices.

use nalgebra::Vector3;
use tracing::{debug, info};

/// Seconds the reading must stay within [`MIN_DIFFERENCE_TO_RESET`] before
/// the measurement completes.
pub const STABLE_MEASUREMENT_TIMEOUT: f32 = 3.0;
/// Metres of change that restart the stability timer.
pub const MIN_DIFFERENCE_TO_RESET: f32 = 0.02;
/// Seconds between two samples.
pub const SAMPLE_INTERVAL: f32 = 0.1;

/// Result of feeding one frame to the measurer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArmSpanEvent {
    Updated(f32),
    Completed(f32),
}

#[derive(Debug, Clone, Default)]
pub struct ArmSpanMeasurer {
    measuring: bool,
    last_change: f32,
    next_sample: f32,
    value: f32,
}

impl ArmSpanMeasurer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_measuring(&self) -> bool {
        self.measuring
    }

    /// Starts measuring at time `now`. Ignored while already measuring or
    /// when either hand is missing.
    pub fn start(&mut self, now: f32, hands_assigned: bool) -> bool {
        if self.measuring || !hands_assigned {
            return false;
        }

        info!("measuring arm span");
        self.measuring = true;
        self.value = 0.0;
        self.last_change = now;
        self.next_sample = now;
        true
    }

    pub fn cancel(&mut self) {
        if self.measuring {
            debug!("arm span measurement cancelled");
            self.measuring = false;
        }
    }

    /// Feeds the current hand positions. `None` means a hand is no longer
    /// available, which ends the measurement.
    pub fn sample(
        &mut self,
        now: f32,
        hands: Option<(Vector3<f32>, Vector3<f32>)>,
    ) -> Option<ArmSpanEvent> {
        if !self.measuring || now < self.next_sample {
            return None;
        }
        self.next_sample += SAMPLE_INTERVAL;

        match hands {
            Some((left, right)) if now - self.last_change < STABLE_MEASUREMENT_TIMEOUT => {
                let span = (left - right).norm();
                if (span - self.value).abs() >= MIN_DIFFERENCE_TO_RESET {
                    self.last_change = now;
                }

                self.value = (self.value + span) / 2.0;
                Some(ArmSpanEvent::Updated(self.value))
            }
            _ => {
                self.measuring = false;
                info!(arm_span = self.value, "arm span measured");
                Some(ArmSpanEvent::Completed(self.value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hands(span: f32) -> Option<(Vector3<f32>, Vector3<f32>)> {
        Some((Vector3::new(-span / 2.0, 1.4, 0.0), Vector3::new(span / 2.0, 1.4, 0.0)))
    }

    #[test]
    fn needs_both_hands_to_start() {
        let mut measurer = ArmSpanMeasurer::new();
        assert!(!measurer.start(0.0, false));
        assert!(measurer.start(0.0, true));
        assert!(!measurer.start(0.5, true));
    }

    #[test]
    fn converges_and_completes_once_stable() {
        let mut measurer = ArmSpanMeasurer::new();
        measurer.start(0.0, true);

        let mut completed = None;
        for step in 0..200 {
            let now = step as f32 * SAMPLE_INTERVAL;
            if let Some(ArmSpanEvent::Completed(value)) = measurer.sample(now, hands(1.7)) {
                completed = Some((now, value));
                break;
            }
        }

        let (now, value) = completed.expect("measurement should complete");
        assert!((value - 1.7).abs() < MIN_DIFFERENCE_TO_RESET);
        assert!(now >= STABLE_MEASUREMENT_TIMEOUT);
        assert!(!measurer.is_measuring());
    }

    #[test]
    fn samples_at_a_fixed_interval() {
        let mut measurer = ArmSpanMeasurer::new();
        measurer.start(0.0, true);

        assert_eq!(measurer.sample(0.0, hands(1.0)), Some(ArmSpanEvent::Updated(0.5)));
        assert_eq!(measurer.sample(0.05, hands(1.0)), None);
        assert_eq!(measurer.sample(0.1, hands(1.0)), Some(ArmSpanEvent::Updated(0.75)));
    }

    #[test]
    fn losing_a_hand_completes_early() {
        let mut measurer = ArmSpanMeasurer::new();
        measurer.start(0.0, true);
        measurer.sample(0.0, hands(1.6));

        assert_eq!(measurer.sample(0.1, None), Some(ArmSpanEvent::Completed(0.8)));
    }

    #[test]
    fn cancel_stops_without_completing() {
        let mut measurer = ArmSpanMeasurer::new();
        measurer.start(0.0, true);
        measurer.cancel();

        assert!(!measurer.is_measuring());
        assert_eq!(measurer.sample(0.0, hands(1.6)), None);
    }
}
