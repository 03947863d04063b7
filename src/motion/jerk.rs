//! Jerk gesture detection
//!
//! The detector is a peak detector with hysteresis. It fires on the first falling
//! sample after a jerk peak that exceeded `threshold`, then stays disarmed until
//! the jerk magnitude decays below `threshold * threshold_ratio`. A minimum spacing
//! of `delay_secs` between firings is enforced on top of that.
//!
//! ```text
//!  |mag|      peak
//!    ▲         /\
//!  T ┼ - - - -/- \- - - - - - - - -
//!    │       /    \  fire here
//! T·r┼ - - -/- - - \- - - - - - - -   re-arm below this line
//!    │_____/        \______________
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{HistoryBuffer, Vector3};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JerkSettings {
    /// Minimum seconds between two firings
    pub delay_secs: f64,
    /// Peak magnitude required to fire
    pub threshold: f64,
    /// Fraction of `threshold` the signal must drop below to re-arm
    pub threshold_ratio: f64,
}

impl Default for JerkSettings {
    fn default() -> Self {
        Self {
            delay_secs: 0.25,
            threshold: 0.5,
            threshold_ratio: 0.5,
        }
    }
}

#[derive(Clone, Debug)]
pub struct JerkDetector {
    settings: JerkSettings,
    armed: bool,
}

impl JerkDetector {
    pub fn new(settings: JerkSettings) -> Self {
        Self {
            settings,
            armed: false,
        }
    }

    pub fn settings(&self) -> &JerkSettings {
        &self.settings
    }

    pub fn update_settings(&mut self, settings: JerkSettings) {
        self.settings = settings;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether the latest jerk sample is the falling edge of a peak that may fire.
    ///
    /// `since_last_fire` is the number of seconds since the previous JERK,
    /// infinite if none has fired yet. Does not change the detector.
    pub fn peak_passed(&self, jerk_history: &HistoryBuffer<Vector3>, since_last_fire: f64) -> bool {
        let prev = jerk_history.prev().magnitude();
        let current = jerk_history.now().magnitude();

        let passed = self.armed
            && prev > current
            && prev > self.settings.threshold
            && since_last_fire > self.settings.delay_secs;
        if passed {
            debug!(
                "Jerk peak {:.4} passed (now {:.4}), {:.3}s since last fire",
                prev, current, since_last_fire
            );
        }
        passed
    }

    /// Marks a JERK as fired. No further firing until [`settle`](Self::settle) re-arms.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Re-arms once the latest jerk magnitude decays below `threshold * threshold_ratio`.
    pub fn settle(&mut self, jerk_history: &HistoryBuffer<Vector3>) {
        let current = jerk_history.now().magnitude();
        if current < self.settings.threshold * self.settings.threshold_ratio {
            if !self.armed {
                debug!("Jerk detector re-armed at {:.4}", current);
            }
            self.armed = true;
        }
    }

    /// Runs a full detection step on the latest sample. Returns `true` when a JERK fires.
    pub fn evaluate(&mut self, jerk_history: &HistoryBuffer<Vector3>, since_last_fire: f64) -> bool {
        let fired = self.peak_passed(jerk_history, since_last_fire);
        if fired {
            self.disarm();
        }
        self.settle(jerk_history);
        fired
    }
}

impl Default for JerkDetector {
    fn default() -> Self {
        Self::new(JerkSettings::default())
    }
}
