//! Channel control block.
//!
//! Bookkeeping for the nine channels and their eighteen monitored lines. Nothing in here touches
//! hardware; the board updates the block only once the matching bus exchanges have succeeded.

use strum::IntoEnumIterator;

use crate::types::{
    CHANNEL_COUNT, ChannelId, ChannelMask, PINS_PER_EXPANDER, PinKind, SLOT_COUNT,
};

/// Per-channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Channel {
    /// The user asked for this channel to be on.
    pub desired_on: bool,
    /// The channel came up and has not tripped since.
    pub healthy: bool,
    /// Stored DAC set-point, applied on the next load.
    pub dac_value: u16,
}

/// Fault tracking for one monitored line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PinSlot {
    /// Line was seen low and its interrupt is disabled.
    pub pending_fault: bool,
    /// Service ticks spent pending in a row.
    pub low_duration_ticks: u32,
    /// Low edges seen since the last successful turn-on.
    pub fault_event_count: u32,
}

impl PinSlot {
    fn clear(&mut self) {
        *self = PinSlot::default();
    }
}

/// Copy of one channel and both of its lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelState {
    pub channel: Channel,
    pub actuation: PinSlot,
    pub status: PinSlot,
}

/// State of the whole bank.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControlBlock {
    channels: [Channel; CHANNEL_COUNT],
    slots: [PinSlot; SLOT_COUNT],
}

impl ControlBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self, channel: ChannelId) -> &Channel {
        &self.channels[channel.index()]
    }

    pub(crate) fn channel_mut(&mut self, channel: ChannelId) -> &mut Channel {
        &mut self.channels[channel.index()]
    }

    pub fn slot(&self, channel: ChannelId, kind: PinKind) -> &PinSlot {
        &self.slots[channel.slot_index(kind)]
    }

    pub(crate) fn slot_mut(&mut self, channel: ChannelId, kind: PinKind) -> &mut PinSlot {
        &mut self.slots[channel.slot_index(kind)]
    }

    /// All slots with their bank-wide index.
    pub(crate) fn slots_mut(&mut self) -> impl Iterator<Item = (usize, &mut PinSlot)> {
        self.slots.iter_mut().enumerate()
    }

    pub fn snapshot(&self, channel: ChannelId) -> ChannelState {
        ChannelState {
            channel: *self.channel(channel),
            actuation: *self.slot(channel, PinKind::Actuation),
            status: *self.slot(channel, PinKind::Status),
        }
    }

    /// Pending lines as a bank-wide bitmask, same layout as the status read.
    pub fn pending_mask(&self) -> u32 {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.pending_fault)
            .fold(0, |mask, (index, _)| mask | 1 << index)
    }

    /// Flag the lines an expander reported in its interrupt flags.
    pub(crate) fn mark_pending(&mut self, expander: usize, flags: u8) -> u32 {
        let mut marked = 0;
        for pin in 0..PINS_PER_EXPANDER {
            if flags & (1 << pin) != 0 {
                let index = expander * PINS_PER_EXPANDER + pin;
                self.slots[index].pending_fault = true;
                marked |= 1 << index;
            }
        }
        marked
    }

    /// Healthy channels with at least one pending line.
    pub fn needs_rearm(&self) -> ChannelMask {
        let mut mask = ChannelMask::default();
        for channel in ChannelId::all() {
            let pending = PinKind::iter().any(|kind| self.slot(channel, kind).pending_fault);
            if self.channel(channel).healthy && pending {
                mask.insert(channel);
            }
        }
        mask
    }

    fn clear_slots(&mut self, channel: ChannelId) {
        for kind in PinKind::iter() {
            self.slot_mut(channel, kind).clear();
        }
    }

    /// The channel came up.
    pub(crate) fn record_turn_on(&mut self, channel: ChannelId) {
        let ch = self.channel_mut(channel);
        ch.desired_on = true;
        ch.healthy = true;
        self.clear_slots(channel);
    }

    /// The user turned the channel off, or it never came up.
    pub(crate) fn record_turn_off(&mut self, channel: ChannelId) {
        let ch = self.channel_mut(channel);
        ch.desired_on = false;
        ch.healthy = false;
        self.clear_slots(channel);
    }

    /// Protection shut the channel off. User intent is kept.
    pub(crate) fn record_auto_off(&mut self, channel: ChannelId) {
        self.channel_mut(channel).healthy = false;
        self.clear_slots(channel);
    }
}
