//! Bit manipulation helpers shared by the value codec and status decoding.
//!
//! All helpers work on 32-bit words so the same functions serve 16-bit and
//! 32-bit bit-vectors. Bit 0 is the LSB.
//!
//! # Example
//!
//! ```
//! use mewtocol::utils::{get_bit, set_bit, value_to_bits, bits_to_value};
//!
//! let value: u32 = 0b1010_0101;
//! assert!(get_bit(value, 0));
//! assert!(!get_bit(value, 1));
//!
//! let bits = value_to_bits(value, 16);
//! assert_eq!(bits.len(), 16);
//! assert_eq!(bits_to_value(&bits), value);
//!
//! assert_eq!(set_bit(0, 4, true), 0b1_0000);
//! ```

/// Gets a single bit from a word.
///
/// # Example
///
/// ```
/// use mewtocol::utils::get_bit;
///
/// let value: u32 = 0b0000_0000_0000_0101; // bits 0 and 2 are set
/// assert!(get_bit(value, 0));
/// assert!(!get_bit(value, 1));
/// assert!(get_bit(value, 2));
/// ```
#[inline]
pub fn get_bit(value: u32, bit: u8) -> bool {
    bit < 32 && (value & (1 << bit)) != 0
}

/// Sets or clears a single bit in a word.
///
/// Positions above 31 leave the value unchanged.
///
/// # Example
///
/// ```
/// use mewtocol::utils::set_bit;
///
/// assert_eq!(set_bit(0, 5, true), 0b0010_0000);
/// assert_eq!(set_bit(0b0010_0000, 5, false), 0);
/// ```
#[inline]
pub fn set_bit(value: u32, bit: u8, state: bool) -> u32 {
    if bit >= 32 {
        value
    } else if state {
        value | (1 << bit)
    } else {
        value & !(1 << bit)
    }
}

/// Expands the lowest `width` bits of a word, index 0 first.
pub fn value_to_bits(value: u32, width: u8) -> Vec<bool> {
    (0..width.min(32)).map(|i| get_bit(value, i)).collect()
}

/// Packs booleans back into a word, index 0 into the LSB.
///
/// Entries beyond the 32nd are ignored.
pub fn bits_to_value(bits: &[bool]) -> u32 {
    bits.iter()
        .take(32)
        .enumerate()
        .fold(0, |acc, (i, &b)| set_bit(acc, i as u8, b))
}

/// Formats the lowest `width` bits of a word in grouped binary form.
///
/// # Example
///
/// ```
/// use mewtocol::utils::format_binary;
///
/// assert_eq!(format_binary(0x00A5, 16), "0b0000_0000_1010_0101");
/// ```
pub fn format_binary(value: u32, width: u8) -> String {
    let width = usize::from(width.min(32));
    let binary = format!("{:0width$b}", value & mask(width), width = width);
    let groups: Vec<&str> = binary
        .as_bytes()
        .chunks(4)
        .map(|c| std::str::from_utf8(c).unwrap_or_default())
        .collect();
    format!("0b{}", groups.join("_"))
}

fn mask(width: usize) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}
