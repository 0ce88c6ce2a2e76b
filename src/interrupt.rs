//! Two-stage handling of the shared expander interrupt line.
//!
//! All eighteen monitored lines share one physical interrupt. The immediate stage only masks the
//! line and queues work; the deferred stage reads the expanders, disarms the lines that fired and
//! flags them pending for the protection loop. It never re-arms anything itself.

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::delay::DelayNs;
use tracing::{debug, warn};

use crate::{
    board::Board,
    bridge::RegisterAccess,
    error::Result,
    registers::ExpanderRegister,
    types::EXPANDER_COUNT,
};

/// Masking control of the platform's interrupt line.
pub trait InterruptLine: Send + Sync {
    /// Stop further delivery. Must not block.
    fn disable(&self);
    fn enable(&self);
}

/// An interrupt line that only records whether it is masked.
#[derive(Debug)]
pub struct SoftInterruptLine {
    enabled: AtomicBool,
}

impl SoftInterruptLine {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl Default for SoftInterruptLine {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptLine for SoftInterruptLine {
    fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }
}

impl<T: InterruptLine + ?Sized> InterruptLine for &T {
    fn disable(&self) {
        T::disable(self)
    }

    fn enable(&self) {
        T::enable(self)
    }
}

#[cfg(feature = "std")]
impl<T: InterruptLine + ?Sized> InterruptLine for std::sync::Arc<T> {
    fn disable(&self) {
        T::disable(self)
    }

    fn enable(&self) {
        T::enable(self)
    }
}

impl<R: RegisterAccess, D: DelayNs> Board<R, D> {
    /// Deferred stage: disarm the lines that fired and flag them pending.
    ///
    /// Returns the bank-wide mask of lines newly flagged. Each expander is committed on its own,
    /// so a failure on a later expander keeps the work already done on earlier ones.
    pub fn service_interrupt(&mut self) -> Result<u32> {
        let mut marked = 0;
        for expander in 0..EXPANDER_COUNT {
            let mut expanders = self.expanders();
            let snapshot = expanders.interrupt_snapshot(expander)?;
            if snapshot.flags == 0 {
                continue;
            }
            expanders.write(
                expander,
                ExpanderRegister::GpIntEn,
                snapshot.enabled & !snapshot.flags,
            )?;
            debug!(
                expander,
                flags = snapshot.flags,
                captured = snapshot.captured,
                "expander interrupt"
            );
            marked |= self.block.mark_pending(expander, snapshot.flags);
        }
        Ok(marked)
    }

    /// Run the deferred stage and unmask `line`, whatever the outcome.
    pub fn handle_deferred_interrupt(&mut self, line: &impl InterruptLine) -> Result<u32> {
        let result = self.service_interrupt();
        if let Err(e) = &result {
            warn!(error = %e, "deferred interrupt pass failed");
        }
        line.enable();
        result
    }
}

#[cfg(feature = "std")]
pub use self::trigger::IrqTrigger;

#[cfg(feature = "std")]
pub(crate) use self::trigger::DeferredWork;

#[cfg(feature = "std")]
mod trigger {
    use std::sync::{
        Arc,
        mpsc::{SyncSender, TrySendError},
    };

    use super::InterruptLine;

    /// Messages for the deferred interrupt worker.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum DeferredWork {
        Interrupt,
        Shutdown,
    }

    /// Immediate stage, to be called from the platform interrupt handler.
    #[derive(Clone)]
    pub struct IrqTrigger {
        line: Arc<dyn InterruptLine>,
        queue: SyncSender<DeferredWork>,
    }

    impl IrqTrigger {
        pub(crate) fn new(line: Arc<dyn InterruptLine>, queue: SyncSender<DeferredWork>) -> Self {
            Self { line, queue }
        }

        /// Mask the line and schedule the deferred stage. Never blocks.
        ///
        /// Returns `false` if the controller is gone, in which case the line stays masked.
        pub fn on_interrupt(&self) -> bool {
            self.line.disable();
            match self.queue.try_send(DeferredWork::Interrupt) {
                // A full queue already holds a pass that will see this event.
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            }
        }
    }

    impl core::fmt::Debug for IrqTrigger {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.debug_struct("IrqTrigger").finish_non_exhaustive()
        }
    }
}
