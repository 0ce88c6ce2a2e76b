//! Transaction bridge.
//!
//! The bridge IP core runs one request/response exchange at a time, either to the expander bus
//! or to the DAC bus. An exchange is: load the data registers, select the destination, pulse the
//! start bit, then poll the completion bit a bounded number of times.

use embedded_hal::delay::DelayNs;
use fugit::MillisDurationU32;
use tracing::{debug, warn};

use crate::{
    config::EngineConfig,
    error::{Error, Result},
    registers::{
        BridgeRegister, CONFIG_DEST_EXPANDER, CMD_START, DacCommand, ExpanderFrame,
        STATUS_COMPLETE,
    },
    types::{Destination, EXPANDER_COUNT},
};

/// Raw access to the bridge's 32-bit register block.
///
/// On the target this is a volatile read/write into the mapped IO window. Register access itself
/// cannot fail; a dead bus shows up as an exchange that never completes.
pub trait RegisterAccess {
    fn read(&mut self, register: BridgeRegister) -> u32;
    fn write(&mut self, register: BridgeRegister, value: u32);
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &mut T {
    fn read(&mut self, register: BridgeRegister) -> u32 {
        T::read(self, register)
    }

    fn write(&mut self, register: BridgeRegister, value: u32) {
        T::write(self, register, value)
    }
}

/// Data carried by one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// One expander register transaction.
    Expander(ExpanderFrame),
    /// One command per DAC chip, all sent in the same exchange.
    Dac([DacCommand; EXPANDER_COUNT]),
}

impl Payload {
    pub fn destination(&self) -> Destination {
        match self {
            Payload::Expander(_) => Destination::Expander,
            Payload::Dac(_) => Destination::Dac,
        }
    }
}

/// The bridge driver. Owns the register block and the delay source used for polling and for the
/// sequencer's waits.
pub struct Bridge<R: RegisterAccess, D: DelayNs> {
    registers: R,
    delay: D,
    poll_attempts: u32,
    poll_interval: MillisDurationU32,
}

impl<R: RegisterAccess, D: DelayNs> Bridge<R, D> {
    pub fn new(registers: R, delay: D, config: &EngineConfig) -> Self {
        Self {
            registers,
            delay,
            poll_attempts: config.bridge_poll_attempts,
            poll_interval: config.bridge_poll_interval,
        }
    }

    /// Run one exchange and wait for it to complete.
    ///
    /// Returns [`Error::BridgeTimeout`] if the completion bit is not seen within the configured
    /// number of polls. There is no retry.
    pub fn execute(&mut self, payload: Payload) -> Result<()> {
        match payload {
            Payload::Expander(frame) => {
                self.registers.write(BridgeRegister::DataIn1, frame.to_word());
                self.registers
                    .write(BridgeRegister::Config, CONFIG_DEST_EXPANDER);
            }
            Payload::Dac([chip1, chip2, chip3]) => {
                self.registers.write(BridgeRegister::DataIn1, chip1.to_word());
                self.registers.write(BridgeRegister::DataIn2, chip2.to_word());
                self.registers.write(BridgeRegister::DataIn3, chip3.to_word());
                self.registers.write(BridgeRegister::Config, 0);
            }
        }
        self.start_and_wait(payload.destination())
    }

    /// Value returned by the last expander read.
    pub fn read_result(&mut self) -> u8 {
        (self.registers.read(BridgeRegister::DataOut) & 0xFF) as u8
    }

    /// Block for `duration`.
    pub fn pause(&mut self, duration: MillisDurationU32) {
        self.delay.delay_ms(duration.to_millis());
    }

    pub fn release(self) -> (R, D) {
        (self.registers, self.delay)
    }

    fn start_and_wait(&mut self, destination: Destination) -> Result<()> {
        self.registers.write(BridgeRegister::Cmd, CMD_START);
        self.registers.write(BridgeRegister::Cmd, 0);

        for attempt in 0..self.poll_attempts {
            self.pause(self.poll_interval);
            if self.registers.read(BridgeRegister::Status) & STATUS_COMPLETE != 0 {
                debug!(%destination, attempt, "bridge exchange complete");
                return Ok(());
            }
        }

        warn!(%destination, attempts = self.poll_attempts, "bridge exchange timed out");
        Err(Error::BridgeTimeout { destination })
    }
}
