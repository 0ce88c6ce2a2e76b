//! Our error types for the HV channel engine.

use thiserror::Error;

use crate::types::{ChannelId, ChannelMask, Destination};

pub type Result<T> = core::result::Result<T, Error>;

/// Custom error type for HVHK bridge, expander and channel operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The bridge never reported completion of the exchange.
    #[error("Bridge transaction to {destination} timed out")]
    BridgeTimeout { destination: Destination },
    /// Direction register readback did not match what init wrote.
    #[error("Port expanders not present or unpowered (IODIR {found:#04x}, expected {expected:#04x})")]
    ExpanderNotPresent { expected: u8, found: u8 },
    #[error("Channel {channel} did not come up")]
    TurnOnFailure { channel: ChannelId },
    #[error("Channels {failed} did not come up")]
    TurnOnFailures { failed: ChannelMask },
    #[error("Invalid channel index {0}")]
    InvalidChannel(u8),
    #[error("DAC value {value} out of range for channel {channel}")]
    DacValueOutOfRange { channel: ChannelId, value: u16 },
    /// A channel operation was attempted before the expanders were initialised.
    #[error("Expanders not initialised")]
    NotInitialized,
}
