//! Engine configuration.
//!
//! Every timing constant and threshold of the channel engine lives here. [`EngineConfig::default`]
//! matches the production board; the `with_*` setters exist mostly so tests and bench setups can
//! shorten delays or thresholds.

use fugit::MillisDurationU32;

use crate::registers::DAC_CHANNEL_MARK;
use crate::types::EXPANDER_COUNT;

/// Settings for the bridge, the drivers, the on/off sequencer and the protection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bus address of each expander. Bit 0 is the read flag and must be clear.
    pub expander_addresses: [u8; EXPANDER_COUNT],
    /// How many times the bridge status register is polled before giving up.
    pub bridge_poll_attempts: u32,
    /// Delay before each status poll.
    pub bridge_poll_interval: MillisDurationU32,
    /// How many times the sequencer pulses the ON/OFF line before declaring a turn-on failure.
    pub turn_on_attempts: u32,
    /// Time the ON/OFF line is held low before a turn-on, to discharge the supply.
    pub discharge_delay: MillisDurationU32,
    /// Time the ON/OFF line is driven high during one turn-on attempt.
    pub drive_high_delay: MillisDurationU32,
    /// Time between releasing the ON/OFF line and sampling it.
    pub sense_settle_delay: MillisDurationU32,
    /// Time between a user turn-on and arming the channel's interrupts.
    pub arm_settle_delay: MillisDurationU32,
    /// Period of the protection service loop.
    pub service_period: MillisDurationU32,
    /// A line pending for more than this many service ticks shuts its channel off.
    pub low_duration_limit_ticks: u32,
    /// A line with more than this many fault edges since turn-on shuts its channel off.
    pub fault_event_limit: u32,
    /// Mark field written into every DAC command.
    pub dac_channel_mark: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expander_addresses: [0x40, 0x42, 0x44],
            bridge_poll_attempts: 10,
            bridge_poll_interval: MillisDurationU32::millis(1),
            turn_on_attempts: 10,
            discharge_delay: MillisDurationU32::millis(10),
            drive_high_delay: MillisDurationU32::millis(10),
            sense_settle_delay: MillisDurationU32::millis(5),
            arm_settle_delay: MillisDurationU32::millis(100),
            service_period: MillisDurationU32::millis(10),
            low_duration_limit_ticks: 100,
            fault_event_limit: 1000,
            dac_channel_mark: DAC_CHANNEL_MARK,
        }
    }
}

impl EngineConfig {
    pub fn with_expander_addresses(mut self, addresses: [u8; EXPANDER_COUNT]) -> Self {
        self.expander_addresses = addresses;
        self
    }

    pub fn with_bridge_polling(mut self, attempts: u32, interval: MillisDurationU32) -> Self {
        self.bridge_poll_attempts = attempts;
        self.bridge_poll_interval = interval;
        self
    }

    pub fn with_turn_on_attempts(mut self, attempts: u32) -> Self {
        self.turn_on_attempts = attempts;
        self
    }

    pub fn with_arm_settle_delay(mut self, delay: MillisDurationU32) -> Self {
        self.arm_settle_delay = delay;
        self
    }

    pub fn with_service_period(mut self, period: MillisDurationU32) -> Self {
        self.service_period = period;
        self
    }

    /// Set both protection thresholds.
    pub fn with_protection_limits(mut self, low_duration_ticks: u32, fault_events: u32) -> Self {
        self.low_duration_limit_ticks = low_duration_ticks;
        self.fault_event_limit = fault_events;
        self
    }

    /// Address used to reach all expanders at once while hardware addressing is off.
    pub fn broadcast_address(&self) -> u8 {
        self.expander_addresses[0]
    }

    /// Worst-case sustained low time before a shutoff, in milliseconds.
    pub fn low_duration_limit_ms(&self) -> u32 {
        self.service_period.to_millis().saturating_mul(self.low_duration_limit_ticks)
    }
}
