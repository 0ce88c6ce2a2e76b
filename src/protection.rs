//! Protection service loop.
//!
//! One [`Board::service_tick`] runs per service period. It ages pending lines, counts new fault
//! edges, shuts off channels that stay low too long or flap too often, and re-arms lines of
//! healthy channels that have recovered.

use embedded_hal::delay::DelayNs;
use strum_macros::Display;
use tracing::{trace, warn};

use crate::{
    board::Board,
    bridge::RegisterAccess,
    error::Result,
    types::{CHANNEL_COUNT, ChannelId, ChannelMask},
};

/// Why protection switched a channel off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ShutoffReason {
    /// A line stayed low for longer than the low-duration limit.
    #[strum(serialize = "sustained low")]
    LowDuration,
    /// A line went low more often than the fault-event limit.
    #[strum(serialize = "too many faults")]
    FaultCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shutoff {
    pub channel: ChannelId,
    pub reason: ShutoffReason,
}

/// What one service tick did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceReport {
    /// At most one entry per channel.
    pub shut_off: heapless::Vec<Shutoff, CHANNEL_COUNT>,
    pub rearmed: ChannelMask,
}

impl ServiceReport {
    pub fn is_quiet(&self) -> bool {
        self.shut_off.is_empty() && self.rearmed.is_empty()
    }
}

impl<R: RegisterAccess, D: DelayNs> Board<R, D> {
    /// Force a channel off after a protection trip. The user's request is kept.
    pub fn auto_off(&mut self, channel: ChannelId) -> Result<()> {
        self.power_off(channel)?;
        self.block.record_auto_off(channel);
        Ok(())
    }

    fn trip(&mut self, tripped: ChannelMask, reason: ShutoffReason, report: &mut ServiceReport) -> Result<()> {
        for channel in tripped.iter() {
            self.auto_off(channel)?;
            warn!(%channel, %reason, "protection shut channel off");
            // A tripped channel has clean slots, so it cannot trip again in the same tick.
            let _ = report.shut_off.push(Shutoff { channel, reason });
        }
        Ok(())
    }

    /// One period of the protection loop.
    ///
    /// Counters are aged and fault edges counted before any bus traffic. Both trip conditions are
    /// levels, so a shutoff cut short by a bridge timeout is retried on the next tick.
    pub fn service_tick(&mut self) -> Result<ServiceReport> {
        let mut report = ServiceReport::default();

        let low_limit = self.config.low_duration_limit_ticks;
        let mut sustained = ChannelMask::default();
        for (index, slot) in self.block.slots_mut() {
            if slot.pending_fault {
                slot.low_duration_ticks = slot.low_duration_ticks.saturating_add(1);
                if slot.low_duration_ticks > low_limit {
                    sustained.insert(ChannelId::from_slot_index(index));
                }
            } else {
                slot.low_duration_ticks = 0;
            }
        }

        let fault_limit = self.config.fault_event_limit;
        let mut flapping = ChannelMask::default();
        for (index, slot) in self.block.slots_mut() {
            // First tick of a new pending period.
            if slot.low_duration_ticks == 1 {
                slot.fault_event_count = slot.fault_event_count.saturating_add(1);
            }
            let channel = ChannelId::from_slot_index(index);
            if slot.fault_event_count > fault_limit && !sustained.contains(channel) {
                flapping.insert(channel);
            }
        }

        self.trip(sustained, ShutoffReason::LowDuration, &mut report)?;
        self.trip(flapping, ShutoffReason::FaultCount, &mut report)?;

        for channel in self.block.needs_rearm().iter() {
            self.arm_interrupt(channel)?;
            report.rearmed.insert(channel);
        }

        if !report.is_quiet() {
            trace!(?report, "service tick");
        }
        Ok(report)
    }
}
