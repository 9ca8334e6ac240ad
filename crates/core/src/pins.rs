//! Input pin simulation.
//!
//! Models externally-applied stimuli (button pushes, latched keys, sensor
//! pulses) separately from the cell the firmware reads. The bank publishes
//! pin levels; the board reconciles them into the visible IDR. Firmware
//! never sees this state directly.
//!
//! A push is a level, not a pulse: the pin stays high until an explicit
//! drop. A latch additionally pins the level high against anything but a
//! drop, modelling toggle-style keys (door open, PS keys) that stay
//! asserted until released.

use crate::error::{DiagError, Result};

/// Width of one simulated port's input bank.
pub const PIN_COUNT: u8 = 16;

/// One simulated stimulus channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputPin {
    /// Current simulated level
    pub level: bool,
    /// Level survives until an explicit drop
    pub latched: bool,
}

/// Bank of simulated input pins for one GPIO port.
pub struct PinBank {
    pins: [InputPin; PIN_COUNT as usize],
}

impl PinBank {
    pub fn new() -> Self {
        PinBank {
            pins: [InputPin::default(); PIN_COUNT as usize],
        }
    }

    /// Release every pin (simulated reset).
    pub fn reset(&mut self) {
        self.pins = [InputPin::default(); PIN_COUNT as usize];
    }

    /// `p` — drive the pin high. Stays high until dropped.
    pub fn push(&mut self, pin: u32) -> Result<()> {
        self.pin_mut(pin)?.level = true;
        Ok(())
    }

    /// `l` — drive the pin high and latch it there.
    pub fn latch(&mut self, pin: u32) -> Result<()> {
        let p = self.pin_mut(pin)?;
        p.level = true;
        p.latched = true;
        Ok(())
    }

    /// `d` — return the pin to low, clearing any push or latch.
    pub fn drop_pin(&mut self, pin: u32) -> Result<()> {
        let p = self.pin_mut(pin)?;
        p.level = false;
        p.latched = false;
        Ok(())
    }

    /// Combined level mask across the bank (bit n = pin n level).
    pub fn levels(&self) -> u32 {
        self.pins
            .iter()
            .enumerate()
            .fold(0, |acc, (n, p)| acc | ((p.level as u32) << n))
    }

    fn pin_mut(&mut self, pin: u32) -> Result<&mut InputPin> {
        self.pins
            .get_mut(pin as usize)
            .ok_or(DiagError::BadPin(pin))
    }
}

impl Default for PinBank {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_is_a_level() {
        let mut bank = PinBank::new();
        bank.push(0).unwrap();
        // no decay without an explicit drop
        assert_eq!(bank.levels(), 0x1);
        assert_eq!(bank.levels(), 0x1);
        bank.drop_pin(0).unwrap();
        assert_eq!(bank.levels(), 0);
    }

    #[test]
    fn test_latch_persists_until_drop() {
        let mut bank = PinBank::new();
        bank.latch(3).unwrap();
        bank.push(3).unwrap();
        assert_eq!(bank.levels(), 0x8);
        bank.drop_pin(3).unwrap();
        assert_eq!(bank.levels(), 0);
        // the latch went away with the drop
        bank.push(3).unwrap();
        bank.drop_pin(3).unwrap();
        assert_eq!(bank.levels(), 0);
    }

    #[test]
    fn test_independent_pins() {
        let mut bank = PinBank::new();
        bank.push(1).unwrap();
        bank.latch(5).unwrap();
        assert_eq!(bank.levels(), (1 << 1) | (1 << 5));
        bank.drop_pin(1).unwrap();
        assert_eq!(bank.levels(), 1 << 5);
    }

    #[test]
    fn test_pin_out_of_range() {
        let mut bank = PinBank::new();
        assert_eq!(bank.push(16), Err(DiagError::BadPin(16)));
        assert!(bank.push(15).is_ok());
    }
}
