//! We use this mocking module in unit tests to emulate the HVHK bridge and everything behind it.
//!
//! The simulated board has three 8-bit port expanders with hardware addresses 0x40/0x42/0x44,
//! three DAC chips that only log what they receive, and nine supplies. A supply latches on when
//! its ON/OFF line is driven high and drops when it is driven low; while latched it holds both of
//! its lines high once the ON/OFF pin is released to an input.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use embedded_hal::delay::DelayNs;

use crate::bridge::RegisterAccess;
use crate::registers::{
    BridgeRegister, CMD_START, CONFIG_DEST_EXPANDER, ExpanderFrame, ExpanderRegister, Iocon,
    STATUS_COMPLETE,
};
use crate::types::{CHANNELS_PER_EXPANDER, ChannelId, EXPANDER_COUNT, PINS_PER_EXPANDER, PinKind};

/// Value read from a bus nobody answers on.
const FLOATING_BUS: u8 = 0xFF;

#[derive(Debug, Default, Clone, Copy)]
struct SimExpander {
    iodir: u8,
    ipol: u8,
    gpinten: u8,
    defval: u8,
    intcon: u8,
    iocon: u8,
    gppu: u8,
    intf: u8,
    intcap: u8,
    olat: u8,
    /// Levels seen at the last interrupt evaluation, for compare-to-previous mode.
    previous: u8,
}

impl SimExpander {
    fn power_on() -> Self {
        // Power-on reset: every pin is an input.
        Self {
            iodir: 0xFF,
            ..Default::default()
        }
    }

    fn hardware_address(index: usize) -> u8 {
        0x40 | ((index as u8) << 1)
    }

    fn responds_to(&self, index: usize, address: u8) -> bool {
        let haen = Iocon::from_bytes([self.iocon]).haen();
        if haen {
            address == Self::hardware_address(index)
        } else {
            address == Self::hardware_address(0)
        }
    }
}

#[derive(Debug)]
struct SimState {
    registers: [u32; 8],
    expanders: [SimExpander; EXPANDER_COUNT],
    /// Supply latch per channel.
    latched: [bool; CHANNELS_PER_EXPANDER * EXPANDER_COUNT],
    /// Bank-wide slot bits forced low from outside.
    forced_low: u32,
    dac_log: Vec<[u32; 3]>,
    start_pulses: u32,
    status_polls: u32,
    stalled: bool,
    absent: bool,
}

impl SimState {
    fn new() -> Self {
        Self {
            registers: [0; 8],
            expanders: [SimExpander::power_on(); EXPANDER_COUNT],
            latched: [false; CHANNELS_PER_EXPANDER * EXPANDER_COUNT],
            forced_low: 0,
            dac_log: Vec::new(),
            start_pulses: 0,
            status_polls: 0,
            stalled: false,
            absent: false,
        }
    }

    fn forced(&self, expander: usize, pin: usize) -> bool {
        self.forced_low & (1 << (expander * PINS_PER_EXPANDER + pin)) != 0
    }

    /// Live pin levels of one expander.
    fn levels(&self, expander: usize) -> u8 {
        let chip = &self.expanders[expander];
        let mut levels = 0u8;
        for pin in 0..8 {
            let bit = 1 << pin;
            let high = if pin < PINS_PER_EXPANDER && self.forced(expander, pin) {
                false
            } else if chip.iodir & bit == 0 {
                chip.olat & bit != 0
            } else if pin < PINS_PER_EXPANDER {
                self.latched[expander * CHANNELS_PER_EXPANDER + pin / 2]
            } else {
                false
            };
            if high {
                levels |= bit;
            }
        }
        levels
    }

    /// Supplies follow their ON/OFF line while it is driven.
    fn update_supplies(&mut self) {
        for expander in 0..EXPANDER_COUNT {
            let chip = self.expanders[expander];
            for slot in 0..CHANNELS_PER_EXPANDER {
                let pin = slot * 2;
                let bit = 1u8 << pin;
                if chip.iodir & bit == 0 {
                    self.latched[expander * CHANNELS_PER_EXPANDER + slot] =
                        chip.olat & bit != 0 && !self.forced(expander, pin);
                }
            }
        }
    }

    fn evaluate_interrupts(&mut self) {
        for expander in 0..EXPANDER_COUNT {
            let levels = self.levels(expander);
            let chip = &mut self.expanders[expander];
            let compare = (levels ^ chip.defval) & chip.intcon;
            let change = (levels ^ chip.previous) & !chip.intcon;
            let fired = (compare | change) & chip.gpinten & !chip.intf;
            if fired != 0 {
                if chip.intf == 0 {
                    chip.intcap = levels;
                }
                chip.intf |= fired;
            }
            chip.previous = levels;
        }
    }

    fn settle(&mut self) {
        self.update_supplies();
        self.evaluate_interrupts();
    }

    fn expander_transaction(&mut self, frame: ExpanderFrame) {
        if self.absent {
            self.registers[BridgeRegister::DataOut as usize] = FLOATING_BUS as u32;
            return;
        }
        let address = frame.opcode() & !crate::registers::EXPANDER_OPCODE_READ;
        let Ok(register) = ExpanderRegister::try_from(frame.reg_addr()) else {
            return;
        };
        let targets: Vec<usize> = (0..EXPANDER_COUNT)
            .filter(|&i| self.expanders[i].responds_to(i, address))
            .collect();

        if frame.is_read() {
            let value = match targets.first() {
                Some(&index) => self.read_expander(index, register),
                None => FLOATING_BUS,
            };
            self.registers[BridgeRegister::DataOut as usize] = value as u32;
        } else {
            for index in targets {
                self.write_expander(index, register, frame.reg_data());
            }
            self.settle();
        }
    }

    fn read_expander(&mut self, index: usize, register: ExpanderRegister) -> u8 {
        let levels = self.levels(index);
        let chip = &mut self.expanders[index];
        match register {
            ExpanderRegister::IoDir => chip.iodir,
            ExpanderRegister::IPol => chip.ipol,
            ExpanderRegister::GpIntEn => chip.gpinten,
            ExpanderRegister::DefVal => chip.defval,
            ExpanderRegister::IntCon => chip.intcon,
            ExpanderRegister::IoCon => chip.iocon,
            ExpanderRegister::GpPu => chip.gppu,
            ExpanderRegister::IntF => chip.intf,
            ExpanderRegister::IntCap => {
                // Reading the capture clears the interrupt.
                chip.intf = 0;
                chip.intcap
            }
            ExpanderRegister::Gpio => levels ^ chip.ipol,
            ExpanderRegister::OLat => chip.olat,
        }
    }

    fn write_expander(&mut self, index: usize, register: ExpanderRegister, value: u8) {
        let chip = &mut self.expanders[index];
        match register {
            ExpanderRegister::IoDir => chip.iodir = value,
            ExpanderRegister::IPol => chip.ipol = value,
            ExpanderRegister::GpIntEn => chip.gpinten = value,
            ExpanderRegister::DefVal => chip.defval = value,
            ExpanderRegister::IntCon => chip.intcon = value,
            ExpanderRegister::IoCon => chip.iocon = value,
            ExpanderRegister::GpPu => chip.gppu = value,
            ExpanderRegister::IntF | ExpanderRegister::IntCap => {}
            ExpanderRegister::Gpio | ExpanderRegister::OLat => chip.olat = value,
        }
    }

    fn start(&mut self) {
        self.start_pulses += 1;
        self.registers[BridgeRegister::Status as usize] = 0;
        if self.stalled {
            return;
        }
        if self.registers[BridgeRegister::Config as usize] & CONFIG_DEST_EXPANDER != 0 {
            let frame = ExpanderFrame::from_word(self.registers[BridgeRegister::DataIn1 as usize]);
            self.expander_transaction(frame);
        } else {
            self.dac_log.push([
                self.registers[BridgeRegister::DataIn1 as usize],
                self.registers[BridgeRegister::DataIn2 as usize],
                self.registers[BridgeRegister::DataIn3 as usize],
            ]);
        }
        self.registers[BridgeRegister::Status as usize] = STATUS_COMPLETE;
    }
}

/// Shared handle on the simulated board. Clones see the same hardware.
#[derive(Debug, Clone)]
pub struct SimBridge {
    state: Arc<Mutex<SimState>>,
}

impl SimBridge {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new())),
        }
    }

    /// Lock the shared state. Poison left by a panicking test thread is ignored.
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A bridge with no expanders answering on the bus.
    pub fn without_expanders() -> Self {
        let sim = Self::new();
        sim.state().absent = true;
        sim
    }

    /// Stop the bridge from ever reporting completion.
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
    }

    /// Pull one monitored line low (or let it go again).
    pub fn force_low(&self, channel: ChannelId, kind: PinKind, forced: bool) {
        let mut state = self.state();
        let bit = 1 << channel.slot_index(kind);
        if forced {
            state.forced_low |= bit;
        } else {
            state.forced_low &= !bit;
        }
        state.settle();
    }

    /// Whether any expander is asserting the shared interrupt line.
    pub fn interrupt_asserted(&self) -> bool {
        self.state().expanders.iter().any(|chip| chip.intf != 0)
    }

    pub fn register(&self, register: BridgeRegister) -> u32 {
        self.state().registers[register as usize]
    }

    pub fn expander_register(&self, expander: usize, register: ExpanderRegister) -> u8 {
        let state = self.state();
        let chip = &state.expanders[expander];
        match register {
            ExpanderRegister::IoDir => chip.iodir,
            ExpanderRegister::IPol => chip.ipol,
            ExpanderRegister::GpIntEn => chip.gpinten,
            ExpanderRegister::DefVal => chip.defval,
            ExpanderRegister::IntCon => chip.intcon,
            ExpanderRegister::IoCon => chip.iocon,
            ExpanderRegister::GpPu => chip.gppu,
            ExpanderRegister::IntF => chip.intf,
            ExpanderRegister::IntCap => chip.intcap,
            ExpanderRegister::Gpio => state.levels(expander),
            ExpanderRegister::OLat => chip.olat,
        }
    }

    /// Whether the channel's ON/OFF pin is currently an output.
    pub fn actuation_is_output(&self, channel: ChannelId) -> bool {
        let iodir = self.expander_register(channel.expander_index(), ExpanderRegister::IoDir);
        iodir & channel.pin_mask(PinKind::Actuation) == 0
    }

    /// Whether the channel's line has its interrupt enabled in compare-to-high mode.
    pub fn interrupt_armed(&self, channel: ChannelId, kind: PinKind) -> bool {
        let expander = channel.expander_index();
        let bit = channel.pin_mask(kind);
        [
            ExpanderRegister::GpIntEn,
            ExpanderRegister::IntCon,
            ExpanderRegister::DefVal,
        ]
        .into_iter()
        .all(|register| self.expander_register(expander, register) & bit != 0)
    }

    pub fn supply_latched(&self, channel: ChannelId) -> bool {
        self.state().latched[channel.index()]
    }

    pub fn dac_exchanges(&self) -> Vec<[u32; 3]> {
        self.state().dac_log.clone()
    }

    pub fn start_pulses(&self) -> u32 {
        self.state().start_pulses
    }

    pub fn status_polls(&self) -> u32 {
        self.state().status_polls
    }
}

impl RegisterAccess for SimBridge {
    fn read(&mut self, register: BridgeRegister) -> u32 {
        let mut state = self.state();
        if register == BridgeRegister::Status {
            state.status_polls += 1;
        }
        state.registers[register as usize]
    }

    fn write(&mut self, register: BridgeRegister, value: u32) {
        let mut state = self.state();
        if register == BridgeRegister::Cmd {
            let rising = value & CMD_START != 0
                && state.registers[BridgeRegister::Cmd as usize] & CMD_START == 0;
            state.registers[register as usize] = value;
            if rising {
                state.start();
            }
            return;
        }
        state.registers[register as usize] = value;
    }
}

/// Delay that only counts the time it was asked to wait.
#[derive(Debug, Default, Clone)]
pub struct CountingDelay {
    elapsed_ns: u64,
}

impl CountingDelay {
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns / 1_000_000
    }
}

impl DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns += ns as u64;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.elapsed_ns += ms as u64 * 1_000_000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(sim: &mut SimBridge, frame: ExpanderFrame) -> u8 {
        sim.write(BridgeRegister::DataIn1, frame.to_word());
        sim.write(BridgeRegister::Config, CONFIG_DEST_EXPANDER);
        sim.write(BridgeRegister::Cmd, CMD_START);
        sim.write(BridgeRegister::Cmd, 0);
        sim.read(BridgeRegister::DataOut) as u8
    }

    #[test]
    fn broadcast_until_haen_is_set() {
        let mut sim = SimBridge::new();
        exchange(&mut sim, ExpanderFrame::write(0x40, ExpanderRegister::GpPu, 0x11));
        for expander in 0..EXPANDER_COUNT {
            assert_eq!(sim.expander_register(expander, ExpanderRegister::GpPu), 0x11);
        }
        // Nobody answers at 0x42 yet.
        assert_eq!(
            exchange(&mut sim, ExpanderFrame::read(0x42, ExpanderRegister::GpPu)),
            FLOATING_BUS
        );

        exchange(
            &mut sim,
            ExpanderFrame::write(0x40, ExpanderRegister::IoCon, Iocon::operating(true).bits()),
        );
        exchange(&mut sim, ExpanderFrame::write(0x42, ExpanderRegister::GpPu, 0x22));
        assert_eq!(sim.expander_register(0, ExpanderRegister::GpPu), 0x11);
        assert_eq!(sim.expander_register(1, ExpanderRegister::GpPu), 0x22);
    }

    #[test]
    fn supply_latches_while_driven_high() {
        let mut sim = SimBridge::new();
        let ch = ChannelId::new(0).unwrap();
        exchange(&mut sim, ExpanderFrame::write(0x40, ExpanderRegister::OLat, 0x01));
        exchange(&mut sim, ExpanderFrame::write(0x40, ExpanderRegister::IoDir, 0xFE));
        assert!(sim.supply_latched(ch));
        exchange(&mut sim, ExpanderFrame::write(0x40, ExpanderRegister::IoDir, 0xFF));
        assert_eq!(
            exchange(&mut sim, ExpanderFrame::read(0x40, ExpanderRegister::Gpio)) & 0x03,
            0x03
        );
    }

    #[test]
    fn clones_share_one_board() {
        let sim = SimBridge::new();
        let ch = ChannelId::new(7).unwrap();
        let remote = sim.clone();
        std::thread::spawn(move || remote.force_low(ch, PinKind::Actuation, true))
            .join()
            .unwrap();
        let bit = ch.pin_mask(PinKind::Actuation);
        assert_eq!(sim.expander_register(ch.expander_index(), ExpanderRegister::Gpio) & bit, 0);
    }

    #[test]
    fn compare_interrupt_fires_on_low() {
        let mut sim = SimBridge::new();
        let ch = ChannelId::new(0).unwrap();
        exchange(&mut sim, ExpanderFrame::write(0x40, ExpanderRegister::OLat, 0x01));
        exchange(&mut sim, ExpanderFrame::write(0x40, ExpanderRegister::IoDir, 0xFE));
        exchange(&mut sim, ExpanderFrame::write(0x40, ExpanderRegister::IoDir, 0xFF));
        for register in [
            ExpanderRegister::DefVal,
            ExpanderRegister::IntCon,
            ExpanderRegister::GpIntEn,
        ] {
            exchange(&mut sim, ExpanderFrame::write(0x40, register, 0x02));
        }
        assert!(!sim.interrupt_asserted());

        sim.force_low(ch, PinKind::Status, true);
        assert!(sim.interrupt_asserted());
        assert_eq!(sim.expander_register(0, ExpanderRegister::IntF), 0x02);
        exchange(&mut sim, ExpanderFrame::read(0x40, ExpanderRegister::IntCap));
        assert!(!sim.interrupt_asserted());
    }
}
