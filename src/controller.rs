//! Threaded front end for a [`Board`].
//!
//! The board sits behind one lock shared by three actors: callers of the command methods, the
//! periodic protection loop and the deferred interrupt worker. Every multi-register sequence runs
//! with the lock held, which also keeps bridge exchanges strictly one at a time.

use std::{
    sync::{
        Arc,
        mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use embedded_hal::delay::DelayNs;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    board::Board,
    bridge::RegisterAccess,
    channel::ChannelState,
    error::Result,
    interrupt::{DeferredWork, InterruptLine, IrqTrigger},
    types::{ChannelId, ChannelMask, StatusBitmask},
};

type SharedBoard<R, D> = Arc<Mutex<Board<R, D>>>;

/// Running HV engine.
///
/// Dropping the controller stops both workers. Channels are left as they are.
pub struct HvController<R, D>
where
    R: RegisterAccess + Send + 'static,
    D: DelayNs + Send + 'static,
{
    board: SharedBoard<R, D>,
    stop: Option<Sender<()>>,
    deferred: SyncSender<DeferredWork>,
    workers: Vec<JoinHandle<()>>,
}

impl<R, D> HvController<R, D>
where
    R: RegisterAccess + Send + 'static,
    D: DelayNs + Send + 'static,
{
    /// Initialise the board if needed and start the protection loop and the interrupt worker.
    ///
    /// The returned [`IrqTrigger`] is the immediate interrupt stage; hook it into the platform's
    /// handler for `line`.
    pub fn start(mut board: Board<R, D>, line: impl InterruptLine + 'static) -> Result<(Self, IrqTrigger)> {
        if !board.is_initialized() {
            board.init()?;
        }
        let period = Duration::from_millis(board.config().service_period.to_millis().into());
        let low_limit_ms = board.config().low_duration_limit_ms();
        let board = Arc::new(Mutex::new(board));
        let line: Arc<dyn InterruptLine> = Arc::new(line);

        let (stop_tx, stop_rx) = mpsc::channel();
        let service = {
            let board = board.clone();
            thread::spawn(move || service_loop(board, stop_rx, period))
        };

        // One slot: a queued pass covers every interrupt raised before it runs.
        let (work_tx, work_rx) = mpsc::sync_channel(1);
        let deferred = {
            let board = board.clone();
            let line = line.clone();
            thread::spawn(move || deferred_loop(board, work_rx, line))
        };

        info!(?period, low_limit_ms, "hv controller started");
        let trigger = IrqTrigger::new(line, work_tx.clone());
        Ok((
            Self {
                board,
                stop: Some(stop_tx),
                deferred: work_tx,
                workers: vec![service, deferred],
            },
            trigger,
        ))
    }

    /// Turn on the channels in `mask`. See [`Board::turn_on_mask`].
    pub fn turn_on(&self, mask: ChannelMask) -> Result<()> {
        self.board.lock().turn_on_mask(mask)
    }

    /// Turn off the channels in `mask`.
    pub fn turn_off(&self, mask: ChannelMask) -> Result<()> {
        self.board.lock().turn_off_mask(mask)
    }

    pub fn set_dac(&self, channel: ChannelId, value: u16) -> Result<()> {
        self.board.lock().set_dac(channel, value)
    }

    pub fn dac_value(&self, channel: ChannelId) -> u16 {
        self.board.lock().dac_value(channel)
    }

    pub fn load_dac(&self) -> Result<()> {
        self.board.lock().load_dac()
    }

    pub fn read_status(&self) -> Result<StatusBitmask> {
        self.board.lock().read_status()
    }

    pub fn channel_state(&self, channel: ChannelId) -> ChannelState {
        self.board.lock().channel_state(channel)
    }

    /// Stop the workers and wait for them.
    pub fn shutdown(mut self) {
        self.stop_workers();
    }

    fn stop_workers(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        // Dropping the sender wakes the service loop.
        self.stop.take();
        // Triggers may still hold senders, so the interrupt worker needs an explicit message.
        if self.deferred.send(DeferredWork::Shutdown).is_err() {
            warn!("interrupt worker already gone");
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("hv controller worker panicked");
            }
        }
        info!("hv controller stopped");
    }
}

impl<R, D> Drop for HvController<R, D>
where
    R: RegisterAccess + Send + 'static,
    D: DelayNs + Send + 'static,
{
    fn drop(&mut self) {
        self.stop_workers();
    }
}

/// Run one service tick per period until `stop` fires or disconnects.
fn service_loop<R, D>(board: SharedBoard<R, D>, stop: Receiver<()>, period: Duration)
where
    R: RegisterAccess,
    D: DelayNs,
{
    let mut next_tick = Instant::now() + period;
    loop {
        match stop.recv_timeout(next_tick.saturating_duration_since(Instant::now())) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        if let Err(e) = board.lock().service_tick() {
            warn!(error = %e, "service tick failed");
        }

        // Best effort: a late tick does not cause a burst of catch-up ticks.
        next_tick = (next_tick + period).max(Instant::now());
    }
    debug!("service loop stopped");
}

/// Deferred interrupt stage. Runs one pass per queued notification.
fn deferred_loop<R, D>(board: SharedBoard<R, D>, queue: Receiver<DeferredWork>, line: Arc<dyn InterruptLine>)
where
    R: RegisterAccess,
    D: DelayNs,
{
    while let Ok(work) = queue.recv() {
        match work {
            DeferredWork::Interrupt => {
                // Failures are logged by the board; the line is unmasked either way.
                if let Ok(marked) = board.lock().handle_deferred_interrupt(&line) {
                    debug!(marked, "deferred interrupt pass");
                }
            }
            DeferredWork::Shutdown => break,
        }
    }
    debug!("interrupt worker stopped");
}
