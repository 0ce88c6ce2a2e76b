//! DAC driver.
//!
//! Three DAC chips sit on their own bus behind the bridge, one per expander. Chip `n` drives the
//! set-points of channels `3n..3n+3`, one output per slot. A single bridge exchange carries one
//! command for each chip, so updating the whole bank takes one exchange per slot position.

use embedded_hal::delay::DelayNs;
use tracing::debug;

use crate::{
    bridge::{Bridge, Payload, RegisterAccess},
    error::Result,
    registers::DacCommand,
    types::{CHANNEL_COUNT, CHANNELS_PER_EXPANDER, EXPANDER_COUNT},
};

/// The commands sent in the exchange for output `slot`, chip by chip.
pub fn slot_commands(values: &[u16; CHANNEL_COUNT], slot: usize, mark: u8) -> [DacCommand; EXPANDER_COUNT] {
    core::array::from_fn(|chip| {
        DacCommand::set_output(slot, values[chip * CHANNELS_PER_EXPANDER + slot], mark)
    })
}

/// Borrowed view of the DAC bus.
pub struct Dacs<'a, R: RegisterAccess, D: DelayNs> {
    bridge: &'a mut Bridge<R, D>,
    mark: u8,
}

impl<'a, R: RegisterAccess, D: DelayNs> Dacs<'a, R, D> {
    pub fn new(bridge: &'a mut Bridge<R, D>, mark: u8) -> Self {
        Self { bridge, mark }
    }

    /// Push all nine set-points. Values above 12 bits are clamped.
    pub fn set_values(&mut self, values: &[u16; CHANNEL_COUNT]) -> Result<()> {
        for slot in 0..CHANNELS_PER_EXPANDER {
            let commands = slot_commands(values, slot, self.mark);
            debug!(slot, ?commands, "dac exchange");
            self.bridge.execute(Payload::Dac(commands))?;
        }
        Ok(())
    }
}
