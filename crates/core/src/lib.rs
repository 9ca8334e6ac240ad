//! # wms-core
//!
//! Diagnostic monitor core for a simulated STM32F407 "washing machine
//! simulator" trainer board. Exposes the running firmware's virtual
//! peripheral registers (GPIOB, GPIOD, USART3, raw memory) to an external
//! controller over an unframed byte stream, lets it simulate physical input
//! events, and reports output-pin transitions asynchronously — all without
//! the firmware knowing a diagnostic session exists.
//!
//! ## Architecture
//!
//! - [`Board`] — register file + input pin banks + console glue; the surface
//!   the CPU/peripheral simulator and the monitor both talk to
//! - [`bus`] — register address space: device/register selectors, raw memory
//!   map, access classes
//! - [`action`] — the closed bit-action set (`? = s r t | & ^`)
//! - [`pins`] — input pin simulation (push / latch / drop)
//! - [`notify`] — output-register change notification (`+D<n>` / `-D<n>`)
//! - [`monitor`] — unbuffered command tokenizer/dispatcher and per-connection
//!   [`monitor::Session`]
//!
//! The transport (TCP/Telnet framing, character echo, backspace editing) and
//! the instruction-level CPU simulator live outside this crate. Cell access
//! is not internally synchronized: callers hand the monitor a `&mut Board`,
//! and embedders that run firmware concurrently share the board behind a
//! mutex.

pub mod action;
pub mod bus;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod pins;

use std::sync::mpsc::{self, Receiver, Sender};

use bus::{
    Device, RegisterFile, Target, GPIO_IDR, GPIO_MODER, GPIO_ODR, USART_DR, USART_SR, USART_SR_TXE,
};
use error::{DiagError, Result};
use pins::PinBank;

pub use bus::{Device as DeviceKind, Target as Cell};
pub use monitor::Session;

// STM32F407 address map (the subset the trainer board uses)
/// GPIOB register bank base
pub const GPIOB_BASE: u32 = 0x4002_0400;
/// GPIOD register bank base
pub const GPIOD_BASE: u32 = 0x4002_0C00;
/// USART3 register bank base
pub const USART3_BASE: u32 = 0x4000_4800;
/// RCC AHB1 peripheral clock enable (bit 3 = GPIOD)
pub const RCC_AHB1ENR: u32 = 0x4002_3830;

// Simulated memory ranges for raw-address queries (half-open)
pub const FLASH_START: u32 = 0x0800_0000;
pub const FLASH_END: u32 = 0x0810_0000;
pub const SRAM_START: u32 = 0x2000_0000;
pub const SRAM_END: u32 = 0x2002_0000;
pub const PERIPH_START: u32 = 0x4000_0000;
pub const PERIPH_END: u32 = 0x5100_0000;

// GPIOD pin assignments on the trainer board
pub const PIN_DOOR: u8 = 0;
pub const PIN_PS1: u8 = 1;
pub const PIN_PS2: u8 = 2;
pub const PIN_PS3: u8 = 3;
pub const PIN_CANCEL: u8 = 4;
pub const PIN_ACCEPT: u8 = 5;
pub const PIN_SENSOR: u8 = 6;
pub const PIN_LED_A: u8 = 8;
pub const PIN_LED_B: u8 = 9;
pub const PIN_LED_C: u8 = 10;
pub const PIN_LED_D: u8 = 11;
pub const PIN_MOTOR: u8 = 12;
pub const PIN_DIRECTION: u8 = 13;
pub const PIN_LATCH: u8 = 14;

/// The simulated board: authoritative register cells plus the simulated
/// external world (input stimuli, console output).
///
/// Both the firmware simulator and diagnostic sessions go through
/// [`Board::read_word`] / [`Board::write_word`], so reconciliation of input
/// levels and output-change publication happen on every committed access no
/// matter who made it.
pub struct Board {
    /// Register address space (single source of truth for cell values)
    pub bus: RegisterFile,
    /// Simulated external stimuli on GPIOB pins
    pub pins_b: PinBank,
    /// Simulated external stimuli on GPIOD pins
    pub pins_d: PinBank,
    /// Console bytes: firmware USART3 transmits and `p` print commands
    pub console_buf: Vec<u8>,
    /// True once a `halt` stopped the simulated CPU
    pub halted: bool,
    /// Committed GPIOD ODR values, fanned out to session watchers
    odr_watchers: Vec<Sender<u32>>,
}

impl Board {
    pub fn new() -> Self {
        Board {
            bus: RegisterFile::new(),
            pins_b: PinBank::new(),
            pins_d: PinBank::new(),
            console_buf: Vec::new(),
            halted: false,
            odr_watchers: Vec::new(),
        }
    }

    /// Restore power-on state: registers zeroed, pins released, console
    /// cleared, CPU running. Watchers stay subscribed; sessions re-seed
    /// their own notification baselines.
    pub fn reset(&mut self) {
        log::info!("board reset");
        self.bus.reset();
        self.pins_b.reset();
        self.pins_d.reset();
        self.console_buf.clear();
        self.halted = false;
    }

    /// Stop the simulated CPU. The embedder observes the flag and idles its
    /// execution loop; `reset` clears it.
    pub fn halt(&mut self) {
        log::info!("board halted");
        self.halted = true;
    }

    /// Subscribe to committed GPIOD ODR values. The channel is unbounded,
    /// so publication never blocks the register write path.
    pub fn watch_odr(&mut self) -> Receiver<u32> {
        let (tx, rx) = mpsc::channel();
        self.odr_watchers.push(tx);
        rx
    }

    /// Current GPIOD output-data value.
    pub fn odr(&self) -> u32 {
        self.bus.gpio_d.regs[GPIO_ODR as usize]
    }

    /// Read a cell. IDR reads reconcile pin levels first; USART3 SR always
    /// reports the transmitter ready.
    pub fn read_word(&mut self, target: Target) -> u32 {
        match target {
            Target::Register(Device::GpioB | Device::GpioD, GPIO_IDR) => {
                self.reconcile_inputs();
                self.bus.read(target)
            }
            Target::Register(Device::Usart3, USART_SR) => self.bus.read(target) | USART_SR_TXE,
            _ => self.bus.read(target),
        }
    }

    /// Commit a fully-computed value to a cell.
    ///
    /// GPIOD ODR commits are published to watchers in order; ODR and MODER
    /// commits re-reconcile the visible IDR; USART3 DR commits transmit the
    /// low byte to the console.
    pub fn write_word(&mut self, target: Target, value: u32) {
        self.bus.write(target, value);
        match target {
            Target::Register(Device::GpioD, GPIO_ODR) => {
                self.publish_odr(value);
                self.reconcile_inputs();
            }
            Target::Register(Device::GpioB, GPIO_ODR)
            | Target::Register(Device::GpioB | Device::GpioD, GPIO_MODER) => {
                self.reconcile_inputs();
            }
            Target::Register(Device::Usart3, USART_DR) => {
                self.console_buf.push(value as u8);
            }
            _ => {}
        }
    }

    /// Read by absolute address (the firmware simulator's view).
    pub fn read_addr(&mut self, addr: u32) -> Result<u32> {
        let target = RegisterFile::resolve_addr(addr)?;
        Ok(self.read_word(target))
    }

    /// Write by absolute address (the firmware simulator's view).
    pub fn write_addr(&mut self, addr: u32, value: u32) -> Result<()> {
        let target = RegisterFile::resolve_addr(addr)?;
        self.write_word(target, value);
        Ok(())
    }

    /// Apply a simulated input-pin operation and republish the IDR.
    pub fn push_pin(&mut self, device: Device, pin: u32) -> Result<()> {
        self.pin_bank(device)?.push(pin)?;
        self.reconcile_inputs();
        Ok(())
    }

    pub fn latch_pin(&mut self, device: Device, pin: u32) -> Result<()> {
        self.pin_bank(device)?.latch(pin)?;
        self.reconcile_inputs();
        Ok(())
    }

    pub fn drop_pin(&mut self, device: Device, pin: u32) -> Result<()> {
        self.pin_bank(device)?.drop_pin(pin)?;
        self.reconcile_inputs();
        Ok(())
    }

    /// Append printable output to the console (the `p` command).
    pub fn console_write(&mut self, text: &str) {
        self.console_buf.extend_from_slice(text.as_bytes());
        self.console_buf.push(b'\n');
    }

    /// Take and clear accumulated console output bytes.
    pub fn take_console_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.console_buf)
    }

    /// Recompute the visible IDR of both ports from MODER, ODR, and the
    /// simulated pin levels: an output pin mirrors its ODR bit, anything
    /// else shows the published input level. Pin state itself is never the
    /// cell the firmware reads.
    pub fn reconcile_inputs(&mut self) {
        for (port, bank) in [
            (&mut self.bus.gpio_b, &self.pins_b),
            (&mut self.bus.gpio_d, &self.pins_d),
        ] {
            let odr = port.regs[GPIO_ODR as usize];
            let levels = bank.levels();
            let mut idr = 0u32;
            for pin in 0..pins::PIN_COUNT {
                let bit = 1u32 << pin;
                if port.is_output(pin) {
                    idr |= odr & bit;
                } else {
                    idr |= levels & bit;
                }
            }
            port.regs[GPIO_IDR as usize] = idr;
        }
    }

    fn pin_bank(&mut self, device: Device) -> Result<&mut PinBank> {
        match device {
            Device::GpioB => Ok(&mut self.pins_b),
            Device::GpioD => Ok(&mut self.pins_d),
            Device::Usart3 => Err(DiagError::Malformed),
        }
    }

    fn publish_odr(&mut self, value: u32) {
        // prune watchers whose session has gone away
        self.odr_watchers.retain(|tx| tx.send(value).is_ok());
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}
