// Slave liveness check: address every board and see who acknowledges
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::protocol::{Bus, SlaveStatus};

/// Probe result for one board
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlaveHealth {
    pub name: String,
    pub address: u8,
    pub status: SlaveStatus,
}

impl SlaveHealth {
    pub fn is_alive(&self) -> bool {
        self.status.is_alive()
    }
}

/// Probe every `(name, address)` pair in order
pub fn check_slaves<B: Bus>(bus: &mut B, slaves: &[(String, u8)]) -> Result<Vec<SlaveHealth>> {
    let mut report = Vec::with_capacity(slaves.len());
    for (name, address) in slaves {
        let status = bus.probe(*address)?;
        match status {
            SlaveStatus::Alive => info!("Slave {} (0x{:02X}) is alive", name, address),
            SlaveStatus::Busy => {
                warn!("Slave {} (0x{:02X}) is busy (maybe alive)", name, address)
            }
            SlaveStatus::Dead => warn!("Slave {} (0x{:02X}) is dead", name, address),
        }
        report.push(SlaveHealth {
            name: name.clone(),
            address: *address,
            status,
        });
    }
    Ok(report)
}
