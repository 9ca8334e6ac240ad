//! Register address space.
//!
//! The single source of truth for every cell the diagnostic monitor can
//! touch: the GPIOB and GPIOD register banks, USART3, and raw memory words.
//! Cells are addressed either symbolically (device letter + register index)
//! or by absolute address; both roads lead to the same storage, so a memory
//! query aimed inside a peripheral window aliases the named register.
//!
//! | Device | Registers (index = word offset from base)                |
//! |--------|----------------------------------------------------------|
//! | B, D   | MODER OTYPER OSPEEDR PUPDR IDR ODR BSRR LCKR AFRL AFRH   |
//! | U      | SR DR BRR CR1 CR2 CR3 GTPR                               |
//!
//! Raw memory outside the peripheral windows is a sparse map of 32-bit
//! words, bounds-checked against the simulated flash, SRAM, and peripheral
//! ranges. Invalid selectors are faults; they never create cells.

use std::collections::HashMap;

use crate::error::{DiagError, Result};
use crate::{
    FLASH_END, FLASH_START, GPIOB_BASE, GPIOD_BASE, PERIPH_END, PERIPH_START, SRAM_END,
    SRAM_START, USART3_BASE,
};

/// GPIO register names by index.
pub const GPIO_REG_NAMES: [&str; 10] = [
    "MODER", "OTYPER", "OSPEEDR", "PUPDR", "IDR", "ODR", "BSRR", "LCKR", "AFRL", "AFRH",
];
pub const GPIO_MODER: u8 = 0;
pub const GPIO_IDR: u8 = 4;
pub const GPIO_ODR: u8 = 5;
pub const GPIO_REG_COUNT: u8 = 10;

/// USART register names by index.
pub const USART_REG_NAMES: [&str; 7] = ["SR", "DR", "BRR", "CR1", "CR2", "CR3", "GTPR"];
pub const USART_SR: u8 = 0;
pub const USART_DR: u8 = 1;
pub const USART_REG_COUNT: u8 = 7;

/// USART status bits, matching the firmware's view of USART3.
pub const USART_SR_RXNE: u32 = 1 << 5;
pub const USART_SR_TXE: u32 = 1 << 7;

/// Diagnostic-visible devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    GpioB,
    GpioD,
    Usart3,
}

impl Device {
    /// Parse a device letter (already lowercased).
    pub fn from_char(c: char) -> Option<Device> {
        match c {
            'b' => Some(Device::GpioB),
            'd' => Some(Device::GpioD),
            'u' => Some(Device::Usart3),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Device::GpioB => "GPIOB",
            Device::GpioD => "GPIOD",
            Device::Usart3 => "USART3",
        }
    }

    pub fn base(self) -> u32 {
        match self {
            Device::GpioB => GPIOB_BASE,
            Device::GpioD => GPIOD_BASE,
            Device::Usart3 => USART3_BASE,
        }
    }

    fn reg_count(self) -> u8 {
        match self {
            Device::GpioB | Device::GpioD => GPIO_REG_COUNT,
            Device::Usart3 => USART_REG_COUNT,
        }
    }

    /// Register name for diagnostics/logging.
    pub fn reg_name(self, index: u8) -> &'static str {
        match self {
            Device::GpioB | Device::GpioD => GPIO_REG_NAMES[index as usize],
            Device::Usart3 => USART_REG_NAMES[index as usize],
        }
    }
}

/// One command's resolved target cell. Transient: built per command from the
/// token, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A named device register
    Register(Device, u8),
    /// A raw memory word (word-aligned address outside the device windows)
    Memory(u32),
}

/// One GPIO port: ten 32-bit registers indexed by word offset.
pub struct GpioPort {
    pub regs: [u32; GPIO_REG_COUNT as usize],
}

impl GpioPort {
    pub fn new() -> Self {
        GpioPort {
            regs: [0; GPIO_REG_COUNT as usize],
        }
    }

    pub fn reset(&mut self) {
        self.regs = [0; GPIO_REG_COUNT as usize];
    }

    /// True if MODER configures `pin` as a general-purpose output (mode 01).
    pub fn is_output(&self, pin: u8) -> bool {
        (self.regs[GPIO_MODER as usize] >> (pin * 2)) & 0b11 == 0b01
    }
}

impl Default for GpioPort {
    fn default() -> Self {
        Self::new()
    }
}

/// USART3 register bank. The transmitter is always ready in simulation, so
/// SR resets with TXE set.
pub struct Usart {
    pub regs: [u32; USART_REG_COUNT as usize],
}

impl Usart {
    pub fn new() -> Self {
        let mut regs = [0; USART_REG_COUNT as usize];
        regs[USART_SR as usize] = USART_SR_TXE;
        Usart { regs }
    }

    pub fn reset(&mut self) {
        *self = Usart::new();
    }
}

impl Default for Usart {
    fn default() -> Self {
        Self::new()
    }
}

/// The full diagnostic address space.
pub struct RegisterFile {
    pub gpio_b: GpioPort,
    pub gpio_d: GpioPort,
    pub usart3: Usart,
    /// Sparse raw-memory words (RCC enables, firmware variables, ...)
    mem: HashMap<u32, u32>,
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile {
            gpio_b: GpioPort::new(),
            gpio_d: GpioPort::new(),
            usart3: Usart::new(),
            mem: HashMap::new(),
        }
    }

    /// Power-on state: all GPIO registers zero, USART ready, raw memory empty.
    pub fn reset(&mut self) {
        self.gpio_b.reset();
        self.gpio_d.reset();
        self.usart3.reset();
        self.mem.clear();
    }

    /// Validate a symbolic register selector.
    pub fn check_register(device: Device, index: u8) -> Result<()> {
        if index >= device.reg_count() {
            return Err(DiagError::BadRegister {
                device: device.name(),
                index,
            });
        }
        Ok(())
    }

    /// Resolve an absolute address to a target cell.
    ///
    /// Device register windows are matched first, so a memory query into a
    /// peripheral aliases the named register. Everything else must fall in
    /// a simulated memory range.
    pub fn resolve_addr(addr: u32) -> Result<Target> {
        if addr & 3 != 0 {
            return Err(DiagError::Unaligned(addr));
        }
        for device in [Device::GpioB, Device::GpioD, Device::Usart3] {
            let base = device.base();
            let span = device.reg_count() as u32 * 4;
            if (base..base + span).contains(&addr) {
                return Ok(Target::Register(device, ((addr - base) / 4) as u8));
            }
        }
        let in_flash = (FLASH_START..FLASH_END).contains(&addr);
        let in_sram = (SRAM_START..SRAM_END).contains(&addr);
        let in_periph = (PERIPH_START..PERIPH_END).contains(&addr);
        if in_flash || in_sram || in_periph {
            Ok(Target::Memory(addr))
        } else {
            Err(DiagError::BadAddress(addr))
        }
    }

    /// Access class: IDR reflects electrical pin state and cannot be written
    /// by a bit-action (input simulation goes through the pin bank instead).
    pub fn is_read_only(target: Target) -> bool {
        matches!(
            target,
            Target::Register(Device::GpioB | Device::GpioD, GPIO_IDR)
        )
    }

    /// Read a cell. Targets come pre-validated from the selector parsers.
    pub fn read(&self, target: Target) -> u32 {
        match target {
            Target::Register(Device::GpioB, i) => self.gpio_b.regs[i as usize],
            Target::Register(Device::GpioD, i) => self.gpio_d.regs[i as usize],
            Target::Register(Device::Usart3, i) => self.usart3.regs[i as usize],
            // Unwritten words read as zero; reading never creates a cell
            Target::Memory(addr) => self.mem.get(&addr).copied().unwrap_or(0),
        }
    }

    /// Store a cell value. The value has been fully computed by the caller,
    /// so this is the single commit point of a read-modify-write cycle.
    pub fn write(&mut self, target: Target, value: u32) {
        match target {
            Target::Register(Device::GpioB, i) => self.gpio_b.regs[i as usize] = value,
            Target::Register(Device::GpioD, i) => self.gpio_d.regs[i as usize] = value,
            Target::Register(Device::Usart3, i) => self.usart3.regs[i as usize] = value,
            Target::Memory(addr) => {
                self.mem.insert(addr, value);
            }
        }
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}
