//! This crate commands and protects the bank of high-voltage power-supply channels on the
//! HVHK board of a detector readout system.
//!
//! The board exposes nine HV channels. Each one has:
//! * an ON/OFF (actuation) line, driven to switch the supply on and read back to confirm it,
//! * a Status line, pulled low by the supply when something is wrong,
//! * a 12-bit DAC set-point.
//!
//! All of this sits behind one register-mapped bridge which multiplexes the bus to three
//! 8-bit port expanders (three channels each) and the bus to three DAC chips.
//!
//! The crate is split in two layers:
//! * [`board::Board`] is the engine. It owns the drivers and the channel control block and is
//!   driven through `&mut self` only, so it also works in `no_std` environments when the
//!   default `std` feature is turned off.
//! * [`controller::HvController`] (`std` feature) puts the board behind a single lock and runs
//!   the periodic protection loop and the deferred half of the interrupt pipeline on their own
//!   threads.
//!
//! Typical bring-up:
//!
//! ```ignore
//! let board = Board::new(registers, delay, EngineConfig::default());
//! let (controller, irq) = HvController::start(board, line)?;
//! // Hook `irq.on_interrupt()` into the platform interrupt handler.
//! controller.set_dac(ChannelId::new(4)?, 2048)?;
//! controller.load_dac()?;
//! controller.turn_on(ChannelMask::from_bits(0b1_0000))?;
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod board;
pub mod bridge;
pub mod channel;
pub mod config;
#[cfg(feature = "std")]
pub mod controller;
pub mod dac;
pub mod error;
pub mod expander;
pub mod interrupt;
pub mod protection;
pub mod registers;
pub mod types;

#[cfg(test)]
mod mock_bridge;
