//! Port expander driver.
//!
//! Each expander hosts the ON/OFF and Status lines of three channels on pins 0..6. Registers are
//! reached one at a time through the bridge using a packed [`ExpanderFrame`].

use embedded_hal::delay::DelayNs;
use tracing::{debug, error, info};

use crate::{
    bridge::{Bridge, Payload, RegisterAccess},
    config::EngineConfig,
    error::{Error, Result},
    registers::{ExpanderFrame, ExpanderRegister, Iocon},
    types::{CHANNELS_PER_EXPANDER, ChannelId, EXPANDER_COUNT, PinKind, PinLevel},
};

/// Direction mask programmed at init: ON/OFF pins are outputs, every other pin is an input.
pub const fn direction_mask() -> u8 {
    let mut actuation = 0u8;
    let mut slot = 0;
    while slot < CHANNELS_PER_EXPANDER {
        actuation |= 1 << (slot * 2);
        slot += 1;
    }
    !actuation & 0x3F
}

/// Registers that hold the interrupt configuration of a pin.
const INTERRUPT_REGISTERS: [ExpanderRegister; 3] = [
    ExpanderRegister::DefVal,
    ExpanderRegister::IntCon,
    ExpanderRegister::GpIntEn,
];

/// Interrupt state of one expander as seen by the deferred interrupt stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptSnapshot {
    pub flags: u8,
    pub captured: u8,
    pub enabled: u8,
}

/// Borrowed view of the expander bus.
pub struct Expanders<'a, R: RegisterAccess, D: DelayNs> {
    bridge: &'a mut Bridge<R, D>,
    addresses: [u8; EXPANDER_COUNT],
    broadcast: u8,
}

impl<'a, R: RegisterAccess, D: DelayNs> Expanders<'a, R, D> {
    pub fn new(bridge: &'a mut Bridge<R, D>, config: &EngineConfig) -> Self {
        Self {
            bridge,
            addresses: config.expander_addresses,
            broadcast: config.broadcast_address(),
        }
    }

    /// Read one register of the expander at `address`.
    pub fn get_register(&mut self, address: u8, register: ExpanderRegister) -> Result<u8> {
        self.bridge
            .execute(Payload::Expander(ExpanderFrame::read(address, register)))?;
        let value = self.bridge.read_result();
        debug!(address, ?register, value, "expander read");
        Ok(value)
    }

    /// Write one register of the expander at `address`.
    pub fn set_register(&mut self, address: u8, register: ExpanderRegister, value: u8) -> Result<()> {
        debug_assert!(!register.is_read_only(), "{register:?} is read-only");
        debug!(address, ?register, value, "expander write");
        self.bridge
            .execute(Payload::Expander(ExpanderFrame::write(address, register, value)))
    }

    pub fn read(&mut self, expander: usize, register: ExpanderRegister) -> Result<u8> {
        self.get_register(self.addresses[expander], register)
    }

    pub fn write(&mut self, expander: usize, register: ExpanderRegister, value: u8) -> Result<()> {
        self.set_register(self.addresses[expander], register, value)
    }

    /// Read-modify-write one register. Returns the value written.
    pub fn modify(
        &mut self,
        expander: usize,
        register: ExpanderRegister,
        f: impl FnOnce(u8) -> u8,
    ) -> Result<u8> {
        let value = f(self.read(expander, register)?);
        self.write(expander, register, value)?;
        Ok(value)
    }

    /// Bring all three expanders into their operating configuration.
    ///
    /// Every channel ends up off with its ON/OFF line driven low and all interrupts disabled.
    /// Fails with [`Error::ExpanderNotPresent`] if the direction register does not read back.
    pub fn init(&mut self) -> Result<()> {
        // Addressing may still be on from a previous run, so hit every address.
        for address in self.addresses {
            self.set_register(address, ExpanderRegister::IoCon, Iocon::operating(false).bits())?;
        }

        // With HAEN off all chips answer on the broadcast address.
        let broadcast = self.broadcast;
        let direction = direction_mask();
        for (register, value) in [
            (ExpanderRegister::IPol, 0),
            (ExpanderRegister::GpIntEn, 0),
            (ExpanderRegister::DefVal, 0),
            (ExpanderRegister::IntCon, 0),
            (ExpanderRegister::Gpio, 0),
            (ExpanderRegister::OLat, 0),
            (ExpanderRegister::IoDir, direction),
            (ExpanderRegister::GpPu, 0),
        ] {
            self.set_register(broadcast, register, value)?;
        }
        self.set_register(broadcast, ExpanderRegister::IoCon, Iocon::operating(true).bits())?;

        let found = self.get_register(broadcast, ExpanderRegister::IoDir)?;
        if found != direction {
            error!(found, expected = direction, "port expanders not present");
            return Err(Error::ExpanderNotPresent {
                expected: direction,
                found,
            });
        }
        info!("port expanders initialised");
        Ok(())
    }

    /// Enable interrupts on the `enable` pins and disable them on the `disable` pins.
    ///
    /// An enabled pin interrupts when it deviates from high.
    pub fn update_interrupts(&mut self, expander: usize, enable: u8, disable: u8) -> Result<()> {
        let mut values = [0u8; INTERRUPT_REGISTERS.len()];
        for (value, register) in values.iter_mut().zip(INTERRUPT_REGISTERS) {
            *value = (self.read(expander, register)? | enable) & !disable;
        }
        for (value, register) in values.into_iter().zip(INTERRUPT_REGISTERS) {
            self.write(expander, register, value)?;
        }
        Ok(())
    }

    /// Drive the channel's ON/OFF pin as an output at `level`.
    pub fn drive_actuation(&mut self, channel: ChannelId, level: PinLevel) -> Result<()> {
        let expander = channel.expander_index();
        let bit = channel.pin_mask(PinKind::Actuation);
        self.modify(expander, ExpanderRegister::OLat, |latch| match level {
            PinLevel::High => latch | bit,
            PinLevel::Low => latch & !bit,
        })?;
        self.modify(expander, ExpanderRegister::IoDir, |dir| dir & !bit)?;
        Ok(())
    }

    /// Stop driving the channel's ON/OFF pin so it can be sensed.
    pub fn release_actuation(&mut self, channel: ChannelId) -> Result<()> {
        let bit = channel.pin_mask(PinKind::Actuation);
        self.modify(channel.expander_index(), ExpanderRegister::IoDir, |dir| dir | bit)?;
        Ok(())
    }

    /// Live levels of all pins of one expander.
    pub fn read_gpio(&mut self, expander: usize) -> Result<u8> {
        self.read(expander, ExpanderRegister::Gpio)
    }

    pub fn read_pin(&mut self, channel: ChannelId, kind: PinKind) -> Result<PinLevel> {
        let gpio = self.read_gpio(channel.expander_index())?;
        Ok(PinLevel::from(gpio & channel.pin_mask(kind) != 0))
    }

    /// Read the interrupt flags, capture and enable registers of one expander, in that order.
    pub fn interrupt_snapshot(&mut self, expander: usize) -> Result<InterruptSnapshot> {
        Ok(InterruptSnapshot {
            flags: self.read(expander, ExpanderRegister::IntF)?,
            captured: self.read(expander, ExpanderRegister::IntCap)?,
            enabled: self.read(expander, ExpanderRegister::GpIntEn)?,
        })
    }
}
