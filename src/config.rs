// Bus addresses, calibration and timing defaults, plus the JSON config file
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::motor::StepRange;
use crate::protocol::RetryPolicy;

// Slave addresses on the bus
pub const ADDR_LED_1: u8 = 0x30;
pub const ADDR_LED_2: u8 = 0x31;
pub const ADDR_MOTOR_1: u8 = 0x40;
pub const ADDR_MOTOR_2: u8 = 0x41;

// I2C character device the boards hang off
pub const DEFAULT_BUS: &str = "/dev/i2c-1";

// LED boards drive this many channels each
pub const LEDS_PER_DEVICE: usize = 6;

// Motor calibration
pub const DEGREES_PER_STEP: f64 = 1.8;
pub const REDUCTION_RATIO: f64 = 1.0;
pub const STEP_RANGE: StepRange = StepRange::new(-20_000, 20_000);

// Status polling for ordinary commands
pub const COMMAND_RETRY: RetryPolicy = RetryPolicy::new(10, Duration::from_millis(10));

// Rotations answer NOT_READY until the move finishes
pub const ROTATE_RETRY: RetryPolicy = RetryPolicy::new(3000, Duration::from_millis(10));

// Runtime loop frequency
pub const LOOP_HZ: u64 = 20;

// Zenoh topics
pub const TOPIC_CMD_MOTOR: &str = "planetproj/cmd/motor";
pub const TOPIC_CMD_LED: &str = "planetproj/cmd/led";
pub const TOPIC_STATE_MOTOR: &str = "planetproj/state/motor";
pub const TOPIC_HEALTH: &str = "planetproj/state/health";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Calibration of one motor board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorDeviceConfig {
    pub address: u8,
    #[serde(default = "default_reduction_ratio")]
    pub reduction_ratio: f64,
    #[serde(default = "default_step_range")]
    pub step_range: StepRange,
}

impl MotorDeviceConfig {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            reduction_ratio: REDUCTION_RATIO,
            step_range: STEP_RANGE,
        }
    }
}

fn default_reduction_ratio() -> f64 {
    REDUCTION_RATIO
}

fn default_step_range() -> StepRange {
    STEP_RANGE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    pub degrees_per_step: f64,
    pub retry: RetryPolicy,
    pub rotate_retry: RetryPolicy,
    pub devices: Vec<MotorDeviceConfig>,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            degrees_per_step: DEGREES_PER_STEP,
            retry: COMMAND_RETRY,
            rotate_retry: ROTATE_RETRY,
            devices: vec![
                MotorDeviceConfig::new(ADDR_MOTOR_1),
                MotorDeviceConfig::new(ADDR_MOTOR_2),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    pub addresses: Vec<u8>,
    pub channels_per_device: usize,
    pub retry: RetryPolicy,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            addresses: vec![ADDR_LED_1, ADDR_LED_2],
            channels_per_device: LEDS_PER_DEVICE,
            retry: COMMAND_RETRY,
        }
    }
}

/// Everything the host needs to reach and drive the boards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: String,
    pub dry_run: bool,
    pub motor: MotorConfig,
    pub led: LedConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: DEFAULT_BUS.to_string(),
            dry_run: false,
            motor: MotorConfig::default(),
            led: LedConfig::default(),
        }
    }
}

impl Config {
    /// Load a JSON config file; omitted fields keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Every bus address may only be claimed by one board
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = Vec::new();
        let motor_addrs = self.motor.devices.iter().map(|d| d.address);
        for addr in motor_addrs.chain(self.led.addresses.iter().copied()) {
            if seen.contains(&addr) {
                return Err(ConfigError::Invalid(format!(
                    "address 0x{:02X} is used twice",
                    addr
                )));
            }
            seen.push(addr);
        }
        Ok(())
    }

    /// `(name, address)` of every configured board, LEDs first
    pub fn slaves(&self) -> Vec<(String, u8)> {
        let leds = self
            .led
            .addresses
            .iter()
            .enumerate()
            .map(|(i, &a)| (format!("led{}", i + 1), a));
        let motors = self
            .motor
            .devices
            .iter()
            .enumerate()
            .map(|(i, d)| (format!("motor{}", i + 1), d.address));
        leds.chain(motors).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bus, "/dev/i2c-1");
        assert_eq!(config.led.addresses, vec![0x30, 0x31]);
        assert_eq!(config.motor.devices.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "dry_run": true,
            "motor": {
                "devices": [
                    { "address": 66, "reduction_ratio": 50.0,
                      "step_range": { "min": -500, "max": 9000 } }
                ],
                "rotate_retry": { "max_attempts": 100, "poll_delay_ms": 50 }
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.dry_run);
        assert_eq!(config.bus, DEFAULT_BUS);
        assert_eq!(config.motor.degrees_per_step, DEGREES_PER_STEP);
        assert_eq!(config.motor.devices[0].address, 0x42);
        assert_eq!(config.motor.devices[0].step_range, StepRange::new(-500, 9000));
        assert_eq!(
            config.motor.rotate_retry,
            RetryPolicy::new(100, Duration::from_millis(50))
        );
        assert_eq!(config.motor.retry, COMMAND_RETRY);
        assert_eq!(config.led, LedConfig::default());
    }

    #[test]
    fn test_device_defaults() {
        let device: MotorDeviceConfig = serde_json::from_str(r#"{ "address": 64 }"#).unwrap();
        assert_eq!(device, MotorDeviceConfig::new(ADDR_MOTOR_1));
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut config = Config::default();
        config.led.addresses.push(ADDR_MOTOR_1);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_slaves() {
        let slaves = Config::default().slaves();
        assert_eq!(
            slaves,
            vec![
                ("led1".to_string(), 0x30),
                ("led2".to_string(), 0x31),
                ("motor1".to_string(), 0x40),
                ("motor2".to_string(), 0x41),
            ]
        );
    }
}
