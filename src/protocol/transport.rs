// Command transport: one frame out, then poll the slave until it reports
// a terminal status or the retry budget runs out.

use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::bus::Bus;
use super::frame::{self, CMD_STATUS, STATUS_LEN, Status};
use crate::error::{Error, Result};

/// How many status polls a command may take and how far apart they are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(rename = "poll_delay_ms", with = "millis")]
    pub poll_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, poll_delay: Duration) -> Self {
        Self {
            max_attempts,
            poll_delay,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// What a single poll tells the retry loop to do next
enum Poll {
    Done,
    Wait,
    Resend,
}

/// Sends commands to an ordered list of slave addresses over one bus
pub struct CommandTransport<B> {
    bus: B,
    addresses: Vec<u8>,
}

impl<B: Bus> CommandTransport<B> {
    pub fn new(bus: B, addresses: Vec<u8>) -> Result<Self> {
        if addresses.is_empty() {
            return Err(Error::validation("at least one device address is required"));
        }
        Ok(Self { bus, addresses })
    }

    pub fn num_devices(&self) -> usize {
        self.addresses.len()
    }

    pub fn addresses(&self) -> &[u8] {
        &self.addresses
    }

    pub fn is_dry_run(&self) -> bool {
        self.bus.is_dry_run()
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Fail with `Validation` unless `device` indexes a configured address
    pub fn check_device(&self, device: usize) -> Result<u8> {
        self.addresses.get(device).copied().ok_or_else(|| {
            Error::validation(format!(
                "device index {} is not in [0, {})",
                device,
                self.addresses.len()
            ))
        })
    }

    /// Send one command and wait for the slave to confirm it
    ///
    /// Checksum errors and `WRONG_CHECKSUM` resend the frame, `NOT_READY`
    /// keeps polling. Rejections and malformed replies end the exchange
    /// immediately. A dry-run bus gets the frame written and succeeds
    /// without polling.
    pub fn send_and_confirm(
        &mut self,
        device: usize,
        register: u8,
        payload: &[u8],
        policy: RetryPolicy,
    ) -> Result<()> {
        let address = self.check_device(device)?;
        let frame = frame::encode(register, payload);
        debug!(
            "Writing to dev {} (0x{:02X}): {:02X?}",
            device, address, frame
        );

        self.bus.select(address)?;
        self.bus.write(&frame)?;
        if self.bus.is_dry_run() {
            return Ok(());
        }

        for attempt in 1..=policy.max_attempts {
            sleep(policy.poll_delay);
            match self.poll(device, register, Some(frame.as_slice()))? {
                Poll::Done => {
                    debug!("Device {} confirmed after {} polls", device, attempt);
                    return Ok(());
                }
                Poll::Wait => {}
                Poll::Resend => {
                    warn!("Resending frame to dev {} (poll {})", device, attempt);
                    self.bus.write(&frame)?;
                }
            }
        }

        warn!(
            "Device {} gave no terminal status in {} polls",
            device, policy.max_attempts
        );
        Err(Error::Timeout {
            device,
            attempts: policy.max_attempts,
        })
    }

    /// Read a single status reply from `device` with nothing to resend
    ///
    /// Returns the decoded status; a corrupted reply fails with `Checksum`.
    pub fn poll_status(&mut self, device: usize) -> Result<Status> {
        let address = self.check_device(device)?;
        if self.bus.is_dry_run() {
            info!("[dry-run] status of dev {} assumed SUCCESS", device);
            return Ok(Status::Success);
        }
        self.bus.select(address)?;
        let (cmd_id, code) = self.read_status()?;
        if cmd_id != CMD_STATUS {
            return Err(Error::ProtocolMismatch { device, cmd_id });
        }
        Status::from_code(code).ok_or(Error::UnknownStatus {
            device,
            status: code,
        })
    }

    fn read_status(&mut self) -> Result<(u8, u8)> {
        let mut response = [0u8; STATUS_LEN];
        self.bus.read(&mut response)?;
        frame::decode_status(&response)
    }

    fn poll(&mut self, device: usize, register: u8, cached: Option<&[u8]>) -> Result<Poll> {
        let (cmd_id, code) = match self.read_status() {
            Ok(reply) => reply,
            Err(Error::Checksum { .. }) if cached.is_some() => return Ok(Poll::Resend),
            Err(e) => return Err(e),
        };

        if cmd_id != CMD_STATUS {
            warn!(
                "Slave returned cmd=0x{:02X} instead of STATUS(0x{:02X})",
                cmd_id, CMD_STATUS
            );
            return Err(Error::ProtocolMismatch { device, cmd_id });
        }

        match Status::from_code(code) {
            Some(Status::Success) => Ok(Poll::Done),
            Some(Status::NotReady) => Ok(Poll::Wait),
            Some(Status::WrongChecksum) => {
                warn!("Device {} reported a corrupted frame", device);
                Ok(Poll::Resend)
            }
            Some(status @ (Status::UnknownCommand | Status::InvalidValue)) => {
                Err(Error::CommandRejected {
                    device,
                    register,
                    status,
                })
            }
            None => Err(Error::UnknownStatus {
                device,
                status: code,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use crate::protocol::SlaveStatus;

    /// Bus that replays canned status replies and records every write
    #[derive(Default)]
    struct ScriptedBus {
        replies: VecDeque<[u8; 4]>,
        writes: Vec<Vec<u8>>,
        reads: usize,
    }

    impl ScriptedBus {
        fn with_statuses(codes: &[u8]) -> Self {
            let mut bus = Self::default();
            for &code in codes {
                bus.push_status(code);
            }
            bus
        }

        fn push_status(&mut self, code: u8) {
            let reply = frame::encode(CMD_STATUS, &[code]);
            self.replies.push_back(reply.try_into().unwrap());
        }
    }

    impl Bus for ScriptedBus {
        fn select(&mut self, _address: u8) -> io::Result<()> {
            Ok(())
        }

        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            self.writes.push(bytes.to_vec());
            Ok(bytes.len())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
            self.reads += 1;
            let reply = self
                .replies
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no reply"))?;
            buf.copy_from_slice(&reply);
            Ok(())
        }

        fn probe(&mut self, _address: u8) -> io::Result<SlaveStatus> {
            Ok(SlaveStatus::Alive)
        }
    }

    const FAST: RetryPolicy = RetryPolicy::new(5, Duration::ZERO);

    fn transport(bus: ScriptedBus) -> CommandTransport<ScriptedBus> {
        CommandTransport::new(bus, vec![0x40, 0x41]).unwrap()
    }

    #[test]
    fn test_success_on_first_poll() {
        let mut t = transport(ScriptedBus::with_statuses(&[0x00]));
        t.send_and_confirm(0, 0x31, &[0, 255], FAST).unwrap();
        assert_eq!(t.bus().writes, vec![vec![0x31, 0x00, 0xFF, 0x65, 0xEC]]);
        assert_eq!(t.bus().reads, 1);
    }

    #[test]
    fn test_not_ready_then_success() {
        let mut t = transport(ScriptedBus::with_statuses(&[0x03, 0x03, 0x03, 0x00]));
        t.send_and_confirm(1, 0x31, &[0, 1], FAST).unwrap();
        // Polling alone never resends
        assert_eq!(t.bus().writes.len(), 1);
        assert_eq!(t.bus().reads, 4);
    }

    #[test]
    fn test_not_ready_exhausts_budget() {
        let mut t = transport(ScriptedBus::with_statuses(&[0x03; 5]));
        let err = t.send_and_confirm(0, 0x31, &[0, 1], FAST).unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                device: 0,
                attempts: 5
            }
        ));
    }

    #[test]
    fn test_wrong_checksum_resends() {
        let mut t = transport(ScriptedBus::with_statuses(&[0x01, 0x00]));
        t.send_and_confirm(0, 0x20, &[0, 128], FAST).unwrap();
        assert_eq!(t.bus().writes.len(), 2);
        assert_eq!(t.bus().writes[0], t.bus().writes[1]);
    }

    #[test]
    fn test_corrupted_reply_resends() {
        let mut bus = ScriptedBus::default();
        bus.replies.push_back([CMD_STATUS, 0x00, 0xDE, 0xAD]);
        bus.push_status(0x00);
        let mut t = transport(bus);
        t.send_and_confirm(0, 0x20, &[0, 128], FAST).unwrap();
        assert_eq!(t.bus().writes.len(), 2);
    }

    #[test]
    fn test_rejections_are_fatal() {
        for (code, expected) in [(0x02, Status::UnknownCommand), (0x04, Status::InvalidValue)] {
            let mut t = transport(ScriptedBus::with_statuses(&[code, 0x00]));
            let err = t.send_and_confirm(0, 0x34, &[7], FAST).unwrap_err();
            match err {
                Error::CommandRejected {
                    device,
                    register,
                    status,
                } => {
                    assert_eq!(device, 0);
                    assert_eq!(register, 0x34);
                    assert_eq!(status, expected);
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(t.bus().reads, 1);
        }
    }

    #[test]
    fn test_unknown_status_is_fatal() {
        let mut t = transport(ScriptedBus::with_statuses(&[0x07, 0x00]));
        let err = t.send_and_confirm(0, 0x31, &[0, 0], FAST).unwrap_err();
        assert!(matches!(err, Error::UnknownStatus { status: 0x07, .. }));
    }

    #[test]
    fn test_wrong_cmd_id_is_fatal() {
        let mut bus = ScriptedBus::default();
        let reply = frame::encode(0x11, &[0x00]);
        bus.replies.push_back(reply.try_into().unwrap());
        bus.push_status(0x00);
        let mut t = transport(bus);
        let err = t.send_and_confirm(0, 0x31, &[0, 0], FAST).unwrap_err();
        assert!(matches!(err, Error::ProtocolMismatch { cmd_id: 0x11, .. }));
        assert_eq!(t.bus().writes.len(), 1);
    }

    #[test]
    fn test_bad_device_index_touches_nothing() {
        let mut t = transport(ScriptedBus::with_statuses(&[0x00]));
        let err = t.send_and_confirm(2, 0x31, &[0, 0], FAST).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(t.bus().writes.is_empty());
    }

    #[test]
    fn test_poll_status_without_cached_frame() {
        let mut bus = ScriptedBus::default();
        bus.replies.push_back([CMD_STATUS, 0x00, 0x00, 0x00]);
        bus.push_status(0x03);
        let mut t = transport(bus);
        assert!(matches!(t.poll_status(0), Err(Error::Checksum { .. })));
        assert_eq!(t.poll_status(0).unwrap(), Status::NotReady);
    }

    #[test]
    fn test_empty_address_list_rejected() {
        let result = CommandTransport::new(ScriptedBus::default(), Vec::new());
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_bus_failure_propagates() {
        // No scripted replies: the read itself fails
        let mut t = transport(ScriptedBus::default());
        let err = t.send_and_confirm(0, 0x31, &[0, 0], FAST).unwrap_err();
        assert!(matches!(err, Error::Bus(_)));
    }
}
