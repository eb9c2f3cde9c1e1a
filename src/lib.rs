// Host-side driver for the planetarium projector's LED and stepper boards
//
// Boards sit on a shared I2C bus and speak a small checksummed
// command/status protocol (see `protocol`).

pub mod config;
pub mod error;
pub mod led;
pub mod messages;
pub mod motor;
pub mod protocol;
pub mod runtime;
pub mod watchdog;

pub use error::{Error, Result};
pub use led::LedDriver;
pub use motor::MotorDriver;
