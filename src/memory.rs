//! Address classes of Panasonic PLC memory.
//!
//! This module defines the [`MemoryClass`] enum. A class decides how a
//! register is addressed on the wire and how the memory manager groups it.
//!
//! # Classes Overview
//!
//! | Class | Description | Word Access | Bit Access | Max address |
//! |-------|-------------|:-----------:|:----------:|------------:|
//! | X | External inputs | ✗ | ✓ | 109 |
//! | Y | External outputs | ✗ | ✓ | 109 |
//! | R | Internal relays | ✗ | ✓ | 999 |
//! | DT | Data registers | ✓ | ✗ | 99999 |
//! | FL | File registers | ✓ | ✗ | 99999 |
//!
//! For bit classes the address is the word ("area") number; the bit inside the
//! word is carried separately as a hex digit `0`–`F`.
//!
//! # Example
//!
//! ```
//! use mewtocol::MemoryClass;
//!
//! assert!(MemoryClass::R.supports_bit_access());
//! assert!(MemoryClass::DT.is_word_addressable());
//! assert_eq!(MemoryClass::DT.to_string(), "DT");
//! ```

use crate::error::{MewtocolError, Result};

/// Highest word address of the data and file register classes.
pub const MAX_WORD_ADDRESS: u32 = 99_999;

/// Address classes available in Panasonic PLCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MemoryClass {
    /// X (external input) relays.
    X,
    /// Y (external output) relays.
    Y,
    /// R (internal) relays.
    R,
    /// DT data registers.
    DT,
    /// FL file registers.
    FL,
}

impl MemoryClass {
    /// Returns the code used by `RD`/`WD` commands for word access.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidAddressing` for relay classes.
    pub(crate) fn word_code(self) -> Result<char> {
        match self {
            MemoryClass::DT => Ok('D'),
            MemoryClass::FL => Ok('F'),
            other => Err(MewtocolError::invalid_addressing(format!(
                "{other} area does not support word range access"
            ))),
        }
    }

    /// Returns the code used by `RCS`/`WCS`/`RCC` commands for relay access.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidAddressing` for word classes.
    pub(crate) fn bit_code(self) -> Result<char> {
        match self {
            MemoryClass::X => Ok('X'),
            MemoryClass::Y => Ok('Y'),
            MemoryClass::R => Ok('R'),
            other => Err(MewtocolError::invalid_addressing(format!(
                "{other} area does not support bit access"
            ))),
        }
    }

    /// Returns whether this class is addressed bit by bit.
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::MemoryClass;
    ///
    /// assert!(MemoryClass::X.supports_bit_access());
    /// assert!(!MemoryClass::DT.supports_bit_access());
    /// ```
    pub fn supports_bit_access(self) -> bool {
        matches!(self, MemoryClass::X | MemoryClass::Y | MemoryClass::R)
    }

    /// Returns whether this class is addressed in 16-bit words.
    pub fn is_word_addressable(self) -> bool {
        !self.supports_bit_access()
    }

    /// Highest valid address for this class.
    ///
    /// For relay classes this is the highest word ("area") number.
    pub fn max_address(self) -> u32 {
        match self {
            MemoryClass::X | MemoryClass::Y => 109,
            MemoryClass::R => 999,
            MemoryClass::DT | MemoryClass::FL => MAX_WORD_ADDRESS,
        }
    }
}

impl std::fmt::Display for MemoryClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryClass::X => write!(f, "X"),
            MemoryClass::Y => write!(f, "Y"),
            MemoryClass::R => write!(f, "R"),
            MemoryClass::DT => write!(f, "DT"),
            MemoryClass::FL => write!(f, "FL"),
        }
    }
}
