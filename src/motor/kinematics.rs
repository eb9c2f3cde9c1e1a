// Step/degree conversions for geared stepper axes
//
// A motor step turns the output axis by `degrees_per_step / reduction_ratio`.

use serde::{Deserialize, Serialize};

/// Inclusive travel limits of an axis in motor steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRange {
    pub min: i32,
    pub max: i32,
}

impl StepRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Home (step 0) must lie inside the range
    pub fn is_valid(&self) -> bool {
        self.min <= 0 && 0 <= self.max
    }

    pub fn contains(&self, step: i64) -> bool {
        i64::from(self.min) <= step && step <= i64::from(self.max)
    }
}

/// Axis degrees covered by a single motor step
pub fn step_resolution(degrees_per_step: f64, reduction_ratio: f64) -> f64 {
    degrees_per_step / reduction_ratio
}

/// Convert an axis angle to the nearest whole number of motor steps
pub fn degrees_to_steps(degrees: f64, degrees_per_step: f64, reduction_ratio: f64) -> i64 {
    (degrees * reduction_ratio / degrees_per_step).round() as i64
}

/// Axis angle reached after `steps` motor steps from home
pub fn steps_to_degrees(steps: i32, degrees_per_step: f64, reduction_ratio: f64) -> f64 {
    f64::from(steps) * degrees_per_step / reduction_ratio
}

/// Rotate payload: [direction, magnitude_lo, magnitude_hi], direction 1 = backward
///
/// Returns `None` when the magnitude does not fit 16 bits.
pub fn encode_rotation(delta_steps: i64) -> Option<[u8; 3]> {
    let backward = u8::from(delta_steps < 0);
    let magnitude = u16::try_from(delta_steps.unsigned_abs()).ok()?;
    let [lo, hi] = magnitude.to_le_bytes();
    Some([backward, lo, hi])
}
