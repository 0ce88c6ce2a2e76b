//! This module contains the small value types shared by the drivers and the engine.

use core::fmt;

use strum_macros::{EnumCount, EnumIter};

use crate::error::{Error, Result};

/// Number of HV channels on the board.
pub const CHANNEL_COUNT: usize = 9;

/// Number of port expanders (and DAC chips) on the board.
pub const EXPANDER_COUNT: usize = 3;

/// Channels hosted by a single expander.
pub const CHANNELS_PER_EXPANDER: usize = 3;

/// Monitored lines per expander: one ON/OFF and one Status line per channel.
pub const PINS_PER_EXPANDER: usize = CHANNELS_PER_EXPANDER * 2;

/// Monitored lines across the whole bank.
pub const SLOT_COUNT: usize = CHANNEL_COUNT * 2;

/// Index of one HV channel, always in `0..9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u8);

impl ChannelId {
    pub const fn new(index: u8) -> Result<Self> {
        if (index as usize) < CHANNEL_COUNT {
            Ok(Self(index))
        } else {
            Err(Error::InvalidChannel(index))
        }
    }

    /// Iterate over every channel in ascending order.
    pub fn all() -> impl Iterator<Item = ChannelId> {
        (0..CHANNEL_COUNT as u8).map(ChannelId)
    }

    /// Recover the owning channel from a bank-wide slot index.
    pub(crate) const fn from_slot_index(slot_index: usize) -> Self {
        Self((slot_index / 2) as u8)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Which expander hosts this channel's lines.
    pub const fn expander_index(self) -> usize {
        self.index() / CHANNELS_PER_EXPANDER
    }

    /// Position of this channel inside its expander (and inside its DAC chip).
    pub const fn slot_in_expander(self) -> usize {
        self.index() % CHANNELS_PER_EXPANDER
    }

    /// GPIO bit of the given line inside the hosting expander.
    pub const fn pin_mask(self, kind: PinKind) -> u8 {
        1 << (self.slot_in_expander() * 2 + kind.offset())
    }

    /// Both monitored lines of this channel inside the hosting expander.
    pub const fn pin_pair_mask(self) -> u8 {
        self.pin_mask(PinKind::Actuation) | self.pin_mask(PinKind::Status)
    }

    /// Bank-wide slot index of the given line (bit position in status and pending masks).
    pub const fn slot_index(self, kind: PinKind) -> usize {
        self.index() * 2 + kind.offset()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

/// The two monitored lines every channel owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumCount)]
pub enum PinKind {
    /// ON/OFF line. Driven as an output to switch the supply, read as an input to verify it.
    Actuation,
    /// Status line. Input only, held high by a healthy supply.
    Status,
}

impl PinKind {
    const fn offset(self) -> usize {
        match self {
            PinKind::Actuation => 0,
            PinKind::Status => 1,
        }
    }
}

/// Which bus a bridge exchange is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Expander,
    Dac,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Expander => f.write_str("expander"),
            Destination::Dac => f.write_str("dac"),
        }
    }
}

/// Logic level of a monitored line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinLevel {
    #[default]
    Low,
    High,
}

impl PinLevel {
    pub const fn is_high(self) -> bool {
        matches!(self, PinLevel::High)
    }
}

impl From<bool> for PinLevel {
    fn from(value: bool) -> Self {
        match value {
            true => PinLevel::High,
            false => PinLevel::Low,
        }
    }
}

impl From<PinLevel> for bool {
    fn from(value: PinLevel) -> Self {
        value.is_high()
    }
}

/// Set of channels, one bit per channel (bit 0 = channel 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelMask(u16);

impl ChannelMask {
    /// All nine channels.
    pub const ALL: ChannelMask = ChannelMask((1 << CHANNEL_COUNT) - 1);

    /// Build a mask from raw bits. Bits above channel 8 are dropped.
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, channel: ChannelId) -> bool {
        self.0 & (1 << channel.0) != 0
    }

    pub fn insert(&mut self, channel: ChannelId) {
        self.0 |= 1 << channel.0;
    }

    /// Selected channels in ascending order.
    pub fn iter(self) -> impl Iterator<Item = ChannelId> {
        ChannelId::all().filter(move |ch| self.contains(*ch))
    }
}

impl From<ChannelId> for ChannelMask {
    fn from(value: ChannelId) -> Self {
        Self(1 << value.0)
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#05x}", self.0)
    }
}

/// Live level of all 18 monitored lines.
///
/// Bit `2k` is the ON/OFF line of channel `k`, bit `2k + 1` its Status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusBitmask(u32);

impl StatusBitmask {
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & ((1 << SLOT_COUNT) - 1))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn level(self, channel: ChannelId, kind: PinKind) -> PinLevel {
        if self.0 & (1 << channel.slot_index(kind)) != 0 {
            PinLevel::High
        } else {
            PinLevel::Low
        }
    }

    /// Fold one expander's GPIO byte into the bank-wide mask.
    pub(crate) fn merge_expander(&mut self, expander: usize, gpio: u8) {
        let used = gpio as u32 & ((1 << PINS_PER_EXPANDER) - 1);
        self.0 |= used << (PINS_PER_EXPANDER * expander);
    }
}

/// Eight upper-case hex digits, as published by the exposure layer.
impl fmt::Display for StatusBitmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}
