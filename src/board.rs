//! The HV board: bridge, expanders, DACs and the channel control block in one owned value.
//!
//! [`Board`] carries the on/off sequencer and the command operations. It takes `&mut self`
//! everywhere; sharing it between the command path, the interrupt path and the protection loop
//! is the job of the caller (see `controller::HvController`).

use embedded_hal::delay::DelayNs;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use crate::{
    bridge::{Bridge, RegisterAccess},
    channel::{ChannelState, ControlBlock},
    config::EngineConfig,
    dac::Dacs,
    error::{Error, Result},
    expander::Expanders,
    registers::DAC_VALUE_MAX,
    types::{CHANNEL_COUNT, ChannelId, ChannelMask, EXPANDER_COUNT, PinKind, PinLevel, StatusBitmask},
};

pub struct Board<R: RegisterAccess, D: DelayNs> {
    pub(crate) bridge: Bridge<R, D>,
    pub(crate) config: EngineConfig,
    pub(crate) block: ControlBlock,
    initialized: bool,
}

impl<R: RegisterAccess, D: DelayNs> Board<R, D> {
    pub fn new(registers: R, delay: D, config: EngineConfig) -> Self {
        Self {
            bridge: Bridge::new(registers, delay, &config),
            config,
            block: ControlBlock::new(),
            initialized: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn control_block(&self) -> &ControlBlock {
        &self.block
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Give back the register block and the delay.
    pub fn release(self) -> (R, D) {
        self.bridge.release()
    }

    pub(crate) fn expanders(&mut self) -> Expanders<'_, R, D> {
        Expanders::new(&mut self.bridge, &self.config)
    }

    /// Run the expander init sequence. Must succeed before any channel operation.
    pub fn init(&mut self) -> Result<()> {
        self.initialized = false;
        self.expanders().init()?;
        // Every line is low and disarmed now. Set-points survive.
        for channel in ChannelId::all() {
            self.block.record_turn_off(channel);
        }
        self.initialized = true;
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Disable both interrupts of the channel, drive its ON/OFF line low and let it discharge.
    pub(crate) fn power_off(&mut self, channel: ChannelId) -> Result<()> {
        let mut expanders = self.expanders();
        expanders.update_interrupts(channel.expander_index(), 0, channel.pin_pair_mask())?;
        expanders.drive_actuation(channel, PinLevel::Low)?;
        self.bridge.pause(self.config.discharge_delay);
        Ok(())
    }

    /// Pulse the ON/OFF line until the supply holds it high on its own.
    fn pulse_on(&mut self, channel: ChannelId) -> Result<bool> {
        for attempt in 1..=self.config.turn_on_attempts {
            self.expanders().drive_actuation(channel, PinLevel::High)?;
            self.bridge.pause(self.config.drive_high_delay);
            self.expanders().release_actuation(channel)?;
            self.bridge.pause(self.config.sense_settle_delay);
            let level = self.expanders().read_pin(channel, PinKind::Actuation)?;
            debug!(%channel, attempt, ?level, "turn-on attempt");
            if level.is_high() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Switch one channel on.
    ///
    /// On success the channel is marked wanted and healthy with clean fault tracking. Interrupts
    /// stay disabled until [`Board::arm_interrupt`]. If the line never reads back high the channel
    /// is turned off again and [`Error::TurnOnFailure`] is returned.
    pub fn turn_on(&mut self, channel: ChannelId) -> Result<()> {
        self.ensure_initialized()?;
        self.power_off(channel)?;
        if self.pulse_on(channel)? {
            self.block.record_turn_on(channel);
            info!(%channel, "channel on");
            return Ok(());
        }

        self.power_off(channel)?;
        self.block.record_turn_off(channel);
        warn!(%channel, attempts = self.config.turn_on_attempts, "channel did not come up");
        Err(Error::TurnOnFailure { channel })
    }

    /// Switch one channel off and forget the user's request for it.
    pub fn turn_off(&mut self, channel: ChannelId) -> Result<()> {
        self.ensure_initialized()?;
        self.power_off(channel)?;
        self.block.record_turn_off(channel);
        info!(%channel, "channel off");
        Ok(())
    }

    /// Turn on every channel in `mask`, lowest index first, arming each one after it settles.
    ///
    /// Channels that do not come up are skipped and reported together in
    /// [`Error::TurnOnFailures`]. Any other error stops the walk.
    pub fn turn_on_mask(&mut self, mask: ChannelMask) -> Result<()> {
        self.ensure_initialized()?;
        let mut failed = ChannelMask::default();
        for channel in mask.iter() {
            match self.turn_on(channel) {
                Ok(()) => {
                    self.bridge.pause(self.config.arm_settle_delay);
                    self.arm_interrupt(channel)?;
                }
                Err(Error::TurnOnFailure { channel }) => failed.insert(channel),
                Err(e) => return Err(e),
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::TurnOnFailures { failed })
        }
    }

    /// Turn off every channel in `mask`, lowest index first.
    pub fn turn_off_mask(&mut self, mask: ChannelMask) -> Result<()> {
        self.ensure_initialized()?;
        for channel in mask.iter() {
            self.turn_off(channel)?;
        }
        Ok(())
    }

    /// Check both lines of a channel and arm the ones that are high.
    ///
    /// A high line gets its interrupt enabled against high and loses its pending flag. A low line
    /// keeps its interrupt disabled and is flagged pending, so the protection loop ages it.
    pub fn arm_interrupt(&mut self, channel: ChannelId) -> Result<()> {
        self.ensure_initialized()?;
        let pair = channel.pin_pair_mask();
        let mut expanders = self.expanders();
        let gpio = expanders.read_gpio(channel.expander_index())?;
        let high = gpio & pair;
        expanders.update_interrupts(channel.expander_index(), high, pair & !high)?;

        for kind in PinKind::iter() {
            self.block.slot_mut(channel, kind).pending_fault = high & channel.pin_mask(kind) == 0;
        }
        debug!(%channel, armed = high, "interrupts armed");
        Ok(())
    }

    /// Store a set-point. It reaches the hardware on the next [`Board::load_dac`].
    pub fn set_dac(&mut self, channel: ChannelId, value: u16) -> Result<()> {
        if value > DAC_VALUE_MAX {
            return Err(Error::DacValueOutOfRange { channel, value });
        }
        self.block.channel_mut(channel).dac_value = value;
        Ok(())
    }

    pub fn dac_value(&self, channel: ChannelId) -> u16 {
        self.block.channel(channel).dac_value
    }

    /// Push all stored set-points to the DAC chips.
    pub fn load_dac(&mut self) -> Result<()> {
        let mut values = [0u16; CHANNEL_COUNT];
        for channel in ChannelId::all() {
            values[channel.index()] = self.dac_value(channel);
        }
        Dacs::new(&mut self.bridge, self.config.dac_channel_mark).set_values(&values)?;
        info!(?values, "dac loaded");
        Ok(())
    }

    /// Live level of all monitored lines.
    pub fn read_status(&mut self) -> Result<StatusBitmask> {
        self.ensure_initialized()?;
        let mut status = StatusBitmask::default();
        let mut expanders = self.expanders();
        for expander in 0..EXPANDER_COUNT {
            status.merge_expander(expander, expanders.read_gpio(expander)?);
        }
        Ok(status)
    }

    pub fn channel_state(&self, channel: ChannelId) -> ChannelState {
        self.block.snapshot(channel)
    }
}
