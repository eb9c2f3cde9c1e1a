// Stepper motor boards
//
// Tracks the step position of every axis on the host side and only moves
// it once the board has confirmed the rotate command.

use tracing::{debug, info};

use super::kinematics::{
    StepRange, degrees_to_steps, encode_rotation, step_resolution, steps_to_degrees,
};
use crate::config::MotorConfig;
use crate::error::{Error, Result};
use crate::protocol::{Bus, CommandTransport, Register, RetryPolicy};

/// Coil channels that receive a POWER command
const POWER_CHANNELS: [u8; 2] = [0, 1];

/// Host-side state of one motor board
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorState {
    pub position: i32,
    pub reduction_ratio: f64,
    pub step_range: StepRange,
}

/// Driver for the stepper motor boards on one bus
pub struct MotorDriver<B> {
    transport: CommandTransport<B>,
    motors: Vec<MotorState>,
    degrees_per_step: f64,
    retry: RetryPolicy,
    rotate_retry: RetryPolicy,
}

impl<B: Bus> MotorDriver<B> {
    /// Create a driver for the boards listed in `config`, all at step 0
    pub fn new(bus: B, config: &MotorConfig) -> Result<Self> {
        if !(config.degrees_per_step > 0.0 && config.degrees_per_step.is_finite()) {
            return Err(Error::validation(format!(
                "degrees_per_step must be positive, got {}",
                config.degrees_per_step
            )));
        }

        let mut motors = Vec::with_capacity(config.devices.len());
        for (i, device) in config.devices.iter().enumerate() {
            if !(device.reduction_ratio > 0.0 && device.reduction_ratio.is_finite()) {
                return Err(Error::validation(format!(
                    "motor {} reduction_ratio must be positive, got {}",
                    i, device.reduction_ratio
                )));
            }
            if !device.step_range.is_valid() {
                return Err(Error::validation(format!(
                    "motor {} step range [{}, {}] does not contain 0",
                    i, device.step_range.min, device.step_range.max
                )));
            }
            motors.push(MotorState {
                position: 0,
                reduction_ratio: device.reduction_ratio,
                step_range: device.step_range,
            });
        }

        let addresses = config.devices.iter().map(|d| d.address).collect();
        let transport = CommandTransport::new(bus, addresses)?;
        info!("Motor driver ready for {:02X?}", transport.addresses());

        Ok(Self {
            transport,
            motors,
            degrees_per_step: config.degrees_per_step,
            retry: config.retry,
            rotate_retry: config.rotate_retry,
        })
    }

    pub fn num_devices(&self) -> usize {
        self.motors.len()
    }

    pub fn transport(&self) -> &CommandTransport<B> {
        &self.transport
    }

    fn state(&self, device: usize) -> Result<&MotorState> {
        self.motors.get(device).ok_or_else(|| {
            Error::validation(format!(
                "motor index {} is not in [0, {})",
                device,
                self.motors.len()
            ))
        })
    }

    pub fn motor_state(&self, device: usize) -> Result<MotorState> {
        self.state(device).copied()
    }

    /// Current step position of `device`
    pub fn position(&self, device: usize) -> Result<i32> {
        Ok(self.state(device)?.position)
    }

    pub fn step_range(&self, device: usize) -> Result<StepRange> {
        Ok(self.state(device)?.step_range)
    }

    /// Current axis angle of `device` in degrees
    pub fn current_degrees(&self, device: usize) -> Result<f64> {
        let state = self.state(device)?;
        Ok(steps_to_degrees(
            state.position,
            self.degrees_per_step,
            state.reduction_ratio,
        ))
    }

    /// Axis degrees per motor step of `device`
    pub fn resolution(&self, device: usize) -> Result<f64> {
        let state = self.state(device)?;
        Ok(step_resolution(self.degrees_per_step, state.reduction_ratio))
    }

    /// Move `device` by `delta_steps`, refusing moves that leave its step range
    ///
    /// The position is only updated after the board confirms the command.
    pub fn rotate_steps_relative(&mut self, device: usize, delta_steps: i64) -> Result<()> {
        let state = *self.state(device)?;
        if delta_steps == 0 {
            return Ok(());
        }

        let out_of_range = |target| Error::OutOfRange {
            device,
            target,
            min: state.step_range.min,
            max: state.step_range.max,
        };
        let target = i64::from(state.position)
            .checked_add(delta_steps)
            .ok_or_else(|| out_of_range(i64::from(state.position).saturating_add(delta_steps)))?;
        if !state.step_range.contains(target) {
            return Err(out_of_range(target));
        }

        let payload = encode_rotation(delta_steps).ok_or_else(|| {
            Error::validation(format!(
                "step delta {} does not fit in 16 bits",
                delta_steps
            ))
        })?;

        debug!(
            "Rotating motor {} by {} steps ({} -> {})",
            device, delta_steps, state.position, target
        );
        self.transport.send_and_confirm(
            device,
            Register::Rotate as u8,
            &payload,
            self.rotate_retry,
        )?;

        // target is inside an i32 step range
        self.motors[device].position = target as i32;
        Ok(())
    }

    /// Move `device` by an axis angle, rounded to the nearest step
    pub fn rotate_degrees_relative(&mut self, device: usize, delta_degrees: f64) -> Result<()> {
        let state = *self.state(device)?;
        if !delta_degrees.is_finite() {
            return Err(Error::validation(format!(
                "rotation of {} degrees is not a finite angle",
                delta_degrees
            )));
        }
        if delta_degrees == 0.0 {
            return Ok(());
        }
        let delta_steps = degrees_to_steps(
            delta_degrees,
            self.degrees_per_step,
            state.reduction_ratio,
        );
        self.rotate_steps_relative(device, delta_steps)
    }

    /// Move `device` to an absolute axis angle measured from step 0
    pub fn rotate_degrees_absolute(&mut self, device: usize, target_degrees: f64) -> Result<()> {
        let delta = target_degrees - self.current_degrees(device)?;
        if delta == 0.0 {
            return Ok(());
        }
        self.rotate_degrees_relative(device, delta)
    }

    /// Drive both coil channels of `device` at `power` in [0, 1]
    pub fn set_power(&mut self, device: usize, power: f64) -> Result<()> {
        self.state(device)?;
        if !(0.0..=1.0).contains(&power) {
            return Err(Error::validation(format!(
                "power {} is not in range [0, 1]",
                power
            )));
        }
        let value = (power * 255.0).round() as u8;
        for channel in POWER_CHANNELS {
            self.transport.send_and_confirm(
                device,
                Register::Power as u8,
                &[channel, value],
                self.retry,
            )?;
        }
        Ok(())
    }

    /// Declare the current position of `device` to be step 0 (no bus I/O)
    pub fn zero_position(&mut self, device: usize) -> Result<()> {
        self.state(device)?;
        info!("Motor {} zeroed at step {}", device, self.motors[device].position);
        self.motors[device].position = 0;
        Ok(())
    }

    /// Highest acceleration table index the board may ramp up to
    pub fn set_max_index(&mut self, device: usize, max_index: u16) -> Result<()> {
        self.state(device)?;
        self.transport.send_and_confirm(
            device,
            Register::MaxIndex as u8,
            &max_index.to_le_bytes(),
            self.retry,
        )
    }

    /// Acceleration table entries advanced per step while ramping
    pub fn set_index_step(&mut self, device: usize, index_step: u16) -> Result<()> {
        self.state(device)?;
        self.transport.send_and_confirm(
            device,
            Register::IndexStep as u8,
            &index_step.to_le_bytes(),
            self.retry,
        )
    }

    /// Select the board's coil drive mode (raw firmware mode number)
    pub fn set_drive_mode(&mut self, device: usize, mode: u8) -> Result<()> {
        self.state(device)?;
        self.transport
            .send_and_confirm(device, Register::DriveMode as u8, &[mode], self.retry)
    }
}
