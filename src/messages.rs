// Message types exchanged with the runtime over Zenoh

use serde::{Deserialize, Serialize};

/// Motor command from scripts/teleop -> runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MotorCommand {
    RotateSteps { device: usize, steps: i64 },
    RotateDegrees { device: usize, degrees: f64 },
    MoveTo { device: usize, degrees: f64 },
    Power { device: usize, power: f64 },
    Zero { device: usize },
}

/// One LED update inside an `LedCommand`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedEntry {
    pub led: usize,
    pub brightness: f64,
}

/// Batched brightness update from scripts -> runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedCommand {
    pub entries: Vec<LedEntry>,
}

impl LedCommand {
    pub fn as_pairs(&self) -> Vec<(usize, f64)> {
        self.entries.iter().map(|e| (e.led, e.brightness)).collect()
    }
}

/// Position snapshot published by the runtime for one motor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorSnapshot {
    pub device: usize,
    pub position: i32,
    pub degrees: f64,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CommandFailed,
}
