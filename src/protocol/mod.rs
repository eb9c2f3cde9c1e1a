// Slave board protocol: frame codec, bus access and the retrying transport

pub mod bus;
pub mod frame;
pub mod transport;

pub use bus::{Bus, DryRunBus, I2cBus, SlaveStatus};
pub use frame::{Register, Status};
pub use transport::{CommandTransport, RetryPolicy};
