// Stepper motor control for the projector axes
//
// Provides:
// - Degree/step conversion with per-axis gear reduction
// - Travel range enforcement and host-side position tracking
// - Power and acceleration tuning commands

mod driver;
pub mod kinematics;

pub use driver::{MotorDriver, MotorState};
pub use kinematics::StepRange;
