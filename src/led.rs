// LED brightness boards
//
// LED `i` lives on board `i / channels_per_device`, channel
// `i % channels_per_device`. One BRIGHTNESS command per board carries
// all of its updates as [channel, value] pairs.

use tracing::debug;

use crate::config::LedConfig;
use crate::error::{Error, Result};
use crate::protocol::{Bus, CommandTransport, Register, RetryPolicy};

/// Driver for the LED boards on one bus
pub struct LedDriver<B> {
    transport: CommandTransport<B>,
    channels_per_device: usize,
    brightness: Vec<f64>,
    retry: RetryPolicy,
}

impl<B: Bus> LedDriver<B> {
    /// Create a driver with every LED off
    pub fn new(bus: B, config: &LedConfig) -> Result<Self> {
        if !(1..=256).contains(&config.channels_per_device) {
            return Err(Error::validation(format!(
                "channels_per_device must be in [1, 256], got {}",
                config.channels_per_device
            )));
        }
        let transport = CommandTransport::new(bus, config.addresses.clone())?;
        let num_leds = transport.num_devices() * config.channels_per_device;
        Ok(Self {
            transport,
            channels_per_device: config.channels_per_device,
            brightness: vec![0.0; num_leds],
            retry: config.retry,
        })
    }

    pub fn num_leds(&self) -> usize {
        self.brightness.len()
    }

    pub fn num_devices(&self) -> usize {
        self.transport.num_devices()
    }

    pub fn transport(&self) -> &CommandTransport<B> {
        &self.transport
    }

    fn check_led(&self, led: usize) -> Result<()> {
        if led >= self.brightness.len() {
            return Err(Error::validation(format!(
                "LED index {} is not in [0, {})",
                led,
                self.brightness.len()
            )));
        }
        Ok(())
    }

    /// Last confirmed brightness of `led`
    pub fn get_brightness(&self, led: usize) -> Result<f64> {
        self.check_led(led)?;
        Ok(self.brightness[led])
    }

    pub fn set_brightness(&mut self, led: usize, brightness: f64) -> Result<()> {
        self.set_brightness_multi(&[(led, brightness)])
    }

    /// Set several LEDs at once, one command per affected board
    ///
    /// Every entry is validated before anything is written. A board's
    /// cached values change only after that board confirms its command.
    pub fn set_brightness_multi(&mut self, entries: &[(usize, f64)]) -> Result<()> {
        for &(led, brightness) in entries {
            self.check_led(led)?;
            if !(0.0..=1.0).contains(&brightness) {
                return Err(Error::validation(format!(
                    "brightness {} of LED {} is not in range [0, 1]",
                    brightness, led
                )));
            }
        }

        // Per board: (led, brightness) in first-appearance order, last value wins
        let mut batches: Vec<Vec<(usize, f64)>> = vec![Vec::new(); self.num_devices()];
        for &(led, brightness) in entries {
            let batch = &mut batches[led / self.channels_per_device];
            match batch.iter_mut().find(|(l, _)| *l == led) {
                Some(entry) => entry.1 = brightness,
                None => batch.push((led, brightness)),
            }
        }

        for (device, batch) in batches.iter().enumerate() {
            if batch.is_empty() {
                continue;
            }
            let payload: Vec<u8> = batch
                .iter()
                .flat_map(|&(led, brightness)| {
                    [
                        (led % self.channels_per_device) as u8,
                        (brightness * 255.0).round() as u8,
                    ]
                })
                .collect();
            debug!("Setting {} LEDs on board {}", batch.len(), device);
            self.transport.send_and_confirm(
                device,
                Register::Brightness as u8,
                &payload,
                self.retry,
            )?;
            for &(led, brightness) in batch {
                self.brightness[led] = brightness;
            }
        }
        Ok(())
    }
}
