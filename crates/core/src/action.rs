//! Bit-action evaluator.
//!
//! Every register and memory query carries one action character selecting
//! what to do with the target cell. The action set is closed: it is an enum
//! with a single exhaustive `apply`, so an unhandled action cannot slip
//! through at runtime.
//!
//! All mutations are full read-modify-write cycles: the new value is
//! computed in its entirety before the caller commits it, so no partially
//! applied state is ever observable.

use crate::error::{DiagError, Result};

/// One of the fixed cell actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitAction {
    /// `?` — read the cell, no mutation
    Read,
    /// `=` — replace the whole value with the parameter
    Assign,
    /// `s` — set one bit (parameter is a bit index 0–31)
    SetBit,
    /// `r` — clear one bit
    ClearBit,
    /// `t` — toggle one bit
    ToggleBit,
    /// `|` — OR the parameter mask in
    OrMask,
    /// `&` — AND with the complement of the parameter mask
    AndNotMask,
    /// `^` — XOR the parameter mask in
    XorMask,
}

impl BitAction {
    /// Map an action character (lowercased) to its variant.
    pub fn from_char(c: char) -> Option<BitAction> {
        match c {
            '?' => Some(BitAction::Read),
            '=' => Some(BitAction::Assign),
            's' => Some(BitAction::SetBit),
            'r' => Some(BitAction::ClearBit),
            't' => Some(BitAction::ToggleBit),
            '|' => Some(BitAction::OrMask),
            '&' => Some(BitAction::AndNotMask),
            '^' => Some(BitAction::XorMask),
            _ => None,
        }
    }

    /// True if the action writes the cell back.
    pub fn mutates(self) -> bool {
        !matches!(self, BitAction::Read)
    }

    /// True if the action requires a parameter. `Read` is the only action
    /// without one.
    pub fn wants_param(self) -> bool {
        self.mutates()
    }

    /// Compute the value the cell holds after this action.
    ///
    /// Parameter presence has already been validated by the dispatcher;
    /// single-bit actions still range-check the index here.
    pub fn apply(self, current: u32, param: u32) -> Result<u32> {
        match self {
            BitAction::Read => Ok(current),
            BitAction::Assign => Ok(param),
            BitAction::SetBit => Ok(current | bit(param)?),
            BitAction::ClearBit => Ok(current & !bit(param)?),
            BitAction::ToggleBit => Ok(current ^ bit(param)?),
            BitAction::OrMask => Ok(current | param),
            BitAction::AndNotMask => Ok(current & !param),
            BitAction::XorMask => Ok(current ^ param),
        }
    }
}

/// Turn a bit index into its mask, rejecting indices above 31.
fn bit(index: u32) -> Result<u32> {
    if index > 31 {
        return Err(DiagError::BadBitIndex(index));
    }
    Ok(1u32 << index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_then_read() {
        let v = BitAction::Assign.apply(0xFFFF_FFFF, 0x1234_ABCD).unwrap();
        assert_eq!(BitAction::Read.apply(v, 0).unwrap(), 0x1234_ABCD);
    }

    #[test]
    fn test_set_reset_inverse() {
        let orig = 0xA5A5_0000;
        let set = BitAction::SetBit.apply(orig, 3).unwrap();
        assert_eq!(set, orig | 0x8);
        assert_eq!(BitAction::ClearBit.apply(set, 3).unwrap(), orig);
    }

    #[test]
    fn test_toggle_twice_restores() {
        let orig = 0x0000_F0F0;
        let once = BitAction::ToggleBit.apply(orig, 7).unwrap();
        assert_ne!(once, orig);
        assert_eq!(BitAction::ToggleBit.apply(once, 7).unwrap(), orig);
    }

    #[test]
    fn test_or_then_andnot_clears_mask() {
        let orig = 0x1234_5678;
        let mask = 0x0000_0FF0;
        let ored = BitAction::OrMask.apply(orig, mask).unwrap();
        let cleared = BitAction::AndNotMask.apply(ored, mask).unwrap();
        assert_eq!(cleared, orig & !mask);
        // bits outside the mask untouched
        assert_eq!(cleared & !mask, orig & !mask);
    }

    #[test]
    fn test_xor_mask() {
        assert_eq!(BitAction::XorMask.apply(0xFF00, 0x0FF0).unwrap(), 0xF0F0);
    }

    #[test]
    fn test_bit_index_out_of_range() {
        assert_eq!(
            BitAction::SetBit.apply(0, 32),
            Err(DiagError::BadBitIndex(32))
        );
        assert!(BitAction::ToggleBit.apply(0, 31).is_ok());
    }
}
