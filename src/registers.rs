//! This module is used to define the registers of the HVHK bridge and the port expanders
//! behind it, plus the packed command words carried through the bridge.

use modular_bitfield::prelude::*;
use strum_macros::EnumIter;

/// 32-bit registers of the bridge IP core, as word offsets from its base address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum BridgeRegister {
    /// __R/W__ - Command register.
    ///
    /// Writing [`CMD_START`] then `0` starts one exchange.
    Cmd = 0,
    /// __R__ - Transfer status. See [`STATUS_COMPLETE`].
    Status = 1,
    /// __R/W__ - Transfer configuration. See [`CONFIG_DEST_EXPANDER`].
    Config = 2,
    /// __R/W__ - Expander transaction word, or command for DAC chip 1.
    DataIn1 = 4,
    /// __R__ - Register value returned by an expander read.
    DataOut = 5,
    /// __R/W__ - Command for DAC chip 2.
    DataIn2 = 6,
    /// __R/W__ - Command for DAC chip 3.
    DataIn3 = 7,
}

impl From<BridgeRegister> for u32 {
    fn from(value: BridgeRegister) -> Self {
        value as u32
    }
}

/// Command register: start a transfer.
pub const CMD_START: u32 = 1 << 0;

/// Status register: the last transfer is complete.
pub const STATUS_COMPLETE: u32 = 1 << 0;

/// Config register: route the transfer to the expander bus (clear routes it to the DAC bus).
pub const CONFIG_DEST_EXPANDER: u32 = 1 << 0;

/// The 8-bit register file of each port expander.
#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter)]
#[repr(u8)]
pub enum ExpanderRegister {
    /// __R/W__ - Direction. `1` input, `0` output.
    IoDir = 0x00,
    /// __R/W__ - Input polarity. `1` inverted.
    IPol = 0x01,
    /// __R/W__ - Interrupt-on-change enable.
    GpIntEn = 0x02,
    /// __R/W__ - Compare value used when INTCON selects compare mode.
    DefVal = 0x03,
    /// __R/W__ - Interrupt control. `1` compare against DEFVAL, `0` compare against previous value.
    IntCon = 0x04,
    /// __R/W__ - Configuration. See [`Iocon`].
    IoCon = 0x05,
    /// __R/W__ - Pull-up enable.
    GpPu = 0x06,
    /// __R__ - Interrupt flags. `1` the pin caused the pending interrupt.
    IntF = 0x07,
    /// __R__ - GPIO levels captured when the interrupt fired.
    IntCap = 0x08,
    /// __R/W__ - Port levels. Writes go to the output latch.
    Gpio = 0x09,
    /// __R/W__ - Output latch.
    OLat = 0x0A,
}

impl ExpanderRegister {
    pub const fn is_read_only(self) -> bool {
        matches!(self, ExpanderRegister::IntF | ExpanderRegister::IntCap)
    }
}

impl From<ExpanderRegister> for u8 {
    fn from(value: ExpanderRegister) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for ExpanderRegister {
    type Error = ();
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ExpanderRegister as ER;
        match value {
            0x00 => Ok(ER::IoDir),
            0x01 => Ok(ER::IPol),
            0x02 => Ok(ER::GpIntEn),
            0x03 => Ok(ER::DefVal),
            0x04 => Ok(ER::IntCon),
            0x05 => Ok(ER::IoCon),
            0x06 => Ok(ER::GpPu),
            0x07 => Ok(ER::IntF),
            0x08 => Ok(ER::IntCap),
            0x09 => Ok(ER::Gpio),
            0x0A => Ok(ER::OLat),
            _ => Err(()),
        }
    }
}

/// Expander IOCON register.
#[bitfield(bits = 8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iocon {
    #[skip]
    unused0: B1,
    /// INT output is active-high.
    pub intpol: bool,
    /// INT output is open-drain.
    pub odr: bool,
    /// Hardware address pins are honoured.
    pub haen: bool,
    /// Slew-rate control disabled.
    pub disslw: bool,
    /// Sequential addressing disabled.
    pub seqop: bool,
    #[skip]
    unused6: B2,
}

impl Iocon {
    /// Operating configuration: byte mode, no slew control, open-drain INT.
    pub fn operating(haen: bool) -> Self {
        Iocon::new()
            .with_seqop(true)
            .with_disslw(true)
            .with_odr(true)
            .with_haen(haen)
    }

    pub fn bits(self) -> u8 {
        self.into_bytes()[0]
    }
}

/// Opcode bit selecting a read.
pub const EXPANDER_OPCODE_READ: u8 = 0x01;

/// One expander transaction, carried in `DataIn1`.
#[bitfield(bits = 32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpanderFrame {
    /// Value written to the register (ignored on reads).
    pub reg_data: B8,
    pub reg_addr: B8,
    /// Expander bus address, bit 0 is the read flag.
    pub opcode: B8,
    #[skip]
    reserved: B8,
}

impl ExpanderFrame {
    pub fn write(address: u8, register: ExpanderRegister, value: u8) -> Self {
        ExpanderFrame::new()
            .with_opcode(address & !EXPANDER_OPCODE_READ)
            .with_reg_addr(register.into())
            .with_reg_data(value)
    }

    pub fn read(address: u8, register: ExpanderRegister) -> Self {
        ExpanderFrame::new()
            .with_opcode(address | EXPANDER_OPCODE_READ)
            .with_reg_addr(register.into())
    }

    pub fn is_read(&self) -> bool {
        self.opcode() & EXPANDER_OPCODE_READ != 0
    }

    pub fn to_word(self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }

    pub fn from_word(word: u32) -> Self {
        Self::from_bytes(word.to_le_bytes())
    }
}

/// Mark the DAC expects in every "set output" command.
pub const DAC_CHANNEL_MARK: u8 = 0x3;

/// Largest DAC code.
pub const DAC_VALUE_MAX: u16 = 4095;

/// One DAC chip command, carried in `DataIn1`/`DataIn2`/`DataIn3`.
#[bitfield(bits = 32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DacCommand {
    #[skip]
    reserved0: B4,
    pub value: B12,
    /// One-hot output select inside the chip.
    pub channel_mask: B3,
    #[skip]
    reserved1: B1,
    pub channel_mark: B4,
    #[skip]
    reserved2: B8,
}

impl DacCommand {
    /// Command for output `slot` of a chip. `value` is clamped to 12 bits.
    pub fn set_output(slot: usize, value: u16, mark: u8) -> Self {
        DacCommand::new()
            .with_value(value.min(DAC_VALUE_MAX))
            .with_channel_mask(1 << slot)
            .with_channel_mark(mark & 0x0F)
    }

    pub fn to_word(self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }

    pub fn from_word(word: u32) -> Self {
        Self::from_bytes(word.to_le_bytes())
    }
}
