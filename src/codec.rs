//! Typed values and their byte layout in PLC memory.
//!
//! The PLC transmits memory as a sequence of 16-bit words, each word as a
//! little-endian byte pair. Values wider than one word keep that byte order
//! inside each word but place the two words swapped relative to a plain
//! little-endian `u32`:
//!
//! | Value | Little-endian bytes | Transmitted bytes |
//! |-------|---------------------|-------------------|
//! | `0x1122_3344u32` | `44 33 22 11` | `22 11 44 33` |
//!
//! Text is stored as a reserved-capacity word, a used-length word and the
//! padded ASCII bytes. Arrays are row-major sequences of fixed-size elements.
//!
//! # Example
//!
//! ```
//! use mewtocol::{decode, encode, PlcType, PlcValue};
//!
//! let bytes = encode(&PlcType::DInt, &PlcValue::DInt(-2)).unwrap();
//! assert_eq!(decode(&PlcType::DInt, &bytes).unwrap(), PlcValue::DInt(-2));
//!
//! let text = PlcType::Text { capacity: 8 };
//! let bytes = encode(&text, &PlcValue::Text("PUMP".into())).unwrap();
//! assert_eq!(bytes.len(), 12);
//! ```

use std::time::Duration;

use crate::error::{MewtocolError, Result};
use crate::memory::MAX_WORD_ADDRESS;
use crate::utils::{bits_to_value, format_binary, get_bit, set_bit, value_to_bits};

/// Milliseconds per count of the PLC's `TIME` type.
pub const TIME_UNIT_MS: u64 = 10;

/// Maximum number of array dimensions.
pub const MAX_ARRAY_DIMENSIONS: usize = 3;

/// Declared logical type of a register.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PlcType {
    /// Single relay bit.
    Bool,
    /// Signed 16-bit integer.
    Int,
    /// Unsigned 16-bit integer.
    Word,
    /// Signed 32-bit integer.
    DInt,
    /// Unsigned 32-bit integer.
    DWord,
    /// 32-bit IEEE float.
    Real,
    /// 32-bit duration counted in [`TIME_UNIT_MS`] steps.
    Time,
    /// 16 individually addressable bits.
    Bits16,
    /// 32 individually addressable bits.
    Bits32,
    /// Fixed-capacity ASCII text.
    Text {
        /// Reserved capacity in bytes.
        capacity: u16,
    },
    /// Raw byte range.
    Bytes {
        /// Number of bytes exposed to the caller.
        len: u16,
    },
    /// Row-major array of up to three dimensions.
    Array {
        /// Element type (any non-array word type).
        element: Box<PlcType>,
        /// Dimensions, outermost first.
        shape: Vec<usize>,
    },
}

impl PlcType {
    /// Maps an enumeration's underlying integer width to the type it decodes through.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::Validation` for widths other than 16 and 32.
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::PlcType;
    ///
    /// assert_eq!(PlcType::enumeration(16).unwrap(), PlcType::Word);
    /// assert_eq!(PlcType::enumeration(32).unwrap(), PlcType::DWord);
    /// assert!(PlcType::enumeration(8).is_err());
    /// ```
    pub fn enumeration(underlying_bits: u8) -> Result<Self> {
        match underlying_bits {
            16 => Ok(PlcType::Word),
            32 => Ok(PlcType::DWord),
            other => Err(MewtocolError::validation(format!(
                "enumerations must have a 16 or 32 bit underlying type, got {other} bits"
            ))),
        }
    }

    /// Creates a one dimensional array type.
    pub fn array(element: PlcType, len: usize) -> Self {
        PlcType::Array {
            element: Box::new(element),
            shape: vec![len],
        }
    }

    /// Number of bytes this type occupies in PLC memory.
    ///
    /// Always even, since memory is word addressed. A `Bool` occupies the
    /// word that holds its bit.
    pub fn byte_len(&self) -> usize {
        match self {
            PlcType::Bool | PlcType::Int | PlcType::Word | PlcType::Bits16 => 2,
            PlcType::DInt | PlcType::DWord | PlcType::Real | PlcType::Time | PlcType::Bits32 => 4,
            PlcType::Text { capacity } => 4 + round_up_even(usize::from(*capacity)),
            PlcType::Bytes { len } => round_up_even(usize::from(*len)),
            PlcType::Array { element, shape } => shape
                .iter()
                .fold(element.byte_len(), |bytes, &dim| bytes.saturating_mul(dim)),
        }
    }

    /// Like [`PlcType::byte_len`], but `None` when an array size overflows.
    pub fn checked_byte_len(&self) -> Option<usize> {
        match self {
            PlcType::Array { element, shape } => shape
                .iter()
                .try_fold(element.checked_byte_len()?, |bytes, &dim| bytes.checked_mul(dim)),
            other => Some(other.byte_len()),
        }
    }

    /// Number of 16-bit words this type occupies.
    pub fn word_len(&self) -> usize {
        self.byte_len() / 2
    }

    /// Checks that the type can be declared at all.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::Validation` for zero-sized text/byte ranges,
    /// arrays of arrays or bits, arrays outside 1–3 dimensions, and arrays
    /// larger than a whole memory class.
    pub fn validate(&self) -> Result<()> {
        match self {
            PlcType::Text { capacity: 0 } => {
                Err(MewtocolError::validation("text capacity must be greater than 0"))
            }
            PlcType::Bytes { len: 0 } => {
                Err(MewtocolError::validation("byte range must not be empty"))
            }
            PlcType::Array { element, shape } => {
                if shape.is_empty() || shape.len() > MAX_ARRAY_DIMENSIONS {
                    return Err(MewtocolError::validation(format!(
                        "arrays must have 1 to {MAX_ARRAY_DIMENSIONS} dimensions, got {}",
                        shape.len()
                    )));
                }
                if shape.contains(&0) {
                    return Err(MewtocolError::validation("array dimensions must be non-zero"));
                }
                match element.as_ref() {
                    PlcType::Array { .. } | PlcType::Bool => {
                        return Err(MewtocolError::validation(format!(
                            "{element} is not a valid array element type"
                        )))
                    }
                    inner => inner.validate()?,
                }
                match self.checked_byte_len() {
                    Some(bytes) if bytes / 2 <= MAX_WORD_ADDRESS as usize + 1 => Ok(()),
                    _ => Err(MewtocolError::validation(format!(
                        "{self} does not fit in PLC memory"
                    ))),
                }
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for PlcType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlcType::Bool => write!(f, "BOOL"),
            PlcType::Int => write!(f, "INT"),
            PlcType::Word => write!(f, "WORD"),
            PlcType::DInt => write!(f, "DINT"),
            PlcType::DWord => write!(f, "DWORD"),
            PlcType::Real => write!(f, "REAL"),
            PlcType::Time => write!(f, "TIME"),
            PlcType::Bits16 => write!(f, "BITS16"),
            PlcType::Bits32 => write!(f, "BITS32"),
            PlcType::Text { capacity } => write!(f, "STRING[{capacity}]"),
            PlcType::Bytes { len } => write!(f, "BYTES[{len}]"),
            PlcType::Array { element, shape } => {
                let dims: Vec<String> = shape.iter().map(|d| format!("0..{}", d.saturating_sub(1))).collect();
                write!(f, "ARRAY[{}] OF {element}", dims.join(","))
            }
        }
    }
}

/// A 16 or 32 bit wide bit-vector.
///
/// Equality compares the bit pattern and width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BitVector {
    bits: u32,
    width: u8,
}

impl BitVector {
    /// Creates a 16-bit vector.
    pub fn from_u16(bits: u16) -> Self {
        Self {
            bits: u32::from(bits),
            width: 16,
        }
    }

    /// Creates a 32-bit vector.
    pub fn from_u32(bits: u32) -> Self {
        Self { bits, width: 32 }
    }

    /// Creates a vector from booleans, index 0 first; width is 16 or 32.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::Validation` when more than 32 bits are given.
    pub fn from_bools(bools: &[bool]) -> Result<Self> {
        let width = match bools.len() {
            0..=16 => 16,
            17..=32 => 32,
            n => {
                return Err(MewtocolError::validation(format!(
                    "bit-vectors hold at most 32 bits, got {n}"
                )))
            }
        };
        Ok(Self {
            bits: bits_to_value(bools),
            width,
        })
    }

    /// Returns bit `index`, false if out of range.
    pub fn get(&self, index: u8) -> bool {
        index < self.width && get_bit(self.bits, index)
    }

    /// Sets bit `index`; out of range indices are ignored.
    pub fn set(&mut self, index: u8, state: bool) {
        if index < self.width {
            self.bits = set_bit(self.bits, index, state);
        }
    }

    /// Width in bits.
    pub fn width(&self) -> u8 {
        self.width
    }

    /// Raw bit pattern.
    pub fn raw(&self) -> u32 {
        self.bits
    }

    /// Expands to booleans, index 0 first.
    pub fn to_bools(&self) -> Vec<bool> {
        value_to_bits(self.bits, self.width)
    }
}

impl std::fmt::Display for BitVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_binary(self.bits, self.width))
    }
}

/// Row-major array value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlcArray {
    shape: Vec<usize>,
    values: Vec<PlcValue>,
}

impl PlcArray {
    /// Creates an array from its shape and row-major values.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::Validation` if the value count does not equal
    /// the product of the dimensions.
    pub fn new(shape: Vec<usize>, values: Vec<PlcValue>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if shape.is_empty() || expected != values.len() {
            return Err(MewtocolError::validation(format!(
                "shape {shape:?} needs {expected} values, got {}",
                values.len()
            )));
        }
        Ok(Self { shape, values })
    }

    /// Creates a one dimensional array.
    pub fn from_vec(values: Vec<PlcValue>) -> Self {
        Self {
            shape: vec![values.len()],
            values,
        }
    }

    /// Dimensions, outermost first.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Values in row-major order.
    pub fn values(&self) -> &[PlcValue] {
        &self.values
    }

    /// Returns the element at a multi-dimensional index.
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::{PlcArray, PlcValue};
    ///
    /// let values = (0..6).map(PlcValue::Int).collect();
    /// let array = PlcArray::new(vec![2, 3], values).unwrap();
    /// assert_eq!(array.get(&[1, 0]), Some(&PlcValue::Int(3)));
    /// assert_eq!(array.get(&[2, 0]), None);
    /// ```
    pub fn get(&self, index: &[usize]) -> Option<&PlcValue> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut flat = 0;
        for (&i, &dim) in index.iter().zip(&self.shape) {
            if i >= dim {
                return None;
            }
            flat = flat * dim + i;
        }
        self.values.get(flat)
    }
}

/// A decoded register value.
///
/// Equality is structural for arrays and bit-pattern based for floats, so
/// re-reading an unchanged `NaN` does not count as a change.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PlcValue {
    /// `BOOL`.
    Bool(bool),
    /// `INT`.
    Int(i16),
    /// `WORD` or 16-bit enumeration.
    Word(u16),
    /// `DINT`.
    DInt(i32),
    /// `DWORD` or 32-bit enumeration.
    DWord(u32),
    /// `REAL`.
    Real(f32),
    /// `TIME`.
    Time(Duration),
    /// `BITS16` / `BITS32`.
    Bits(BitVector),
    /// `STRING`.
    Text(String),
    /// Raw byte range.
    Bytes(Vec<u8>),
    /// `ARRAY`.
    Array(PlcArray),
}

impl PartialEq for PlcValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PlcValue::Bool(a), PlcValue::Bool(b)) => a == b,
            (PlcValue::Int(a), PlcValue::Int(b)) => a == b,
            (PlcValue::Word(a), PlcValue::Word(b)) => a == b,
            (PlcValue::DInt(a), PlcValue::DInt(b)) => a == b,
            (PlcValue::DWord(a), PlcValue::DWord(b)) => a == b,
            (PlcValue::Real(a), PlcValue::Real(b)) => a.to_bits() == b.to_bits(),
            (PlcValue::Time(a), PlcValue::Time(b)) => a == b,
            (PlcValue::Bits(a), PlcValue::Bits(b)) => a == b,
            (PlcValue::Text(a), PlcValue::Text(b)) => a == b,
            (PlcValue::Bytes(a), PlcValue::Bytes(b)) => a == b,
            (PlcValue::Array(a), PlcValue::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for PlcValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlcValue::Bool(v) => write!(f, "{v}"),
            PlcValue::Int(v) => write!(f, "{v}"),
            PlcValue::Word(v) => write!(f, "{v}"),
            PlcValue::DInt(v) => write!(f, "{v}"),
            PlcValue::DWord(v) => write!(f, "{v}"),
            PlcValue::Real(v) => write!(f, "{v}"),
            PlcValue::Time(v) => write!(f, "T#{}ms", v.as_millis()),
            PlcValue::Bits(v) => write!(f, "{v}"),
            PlcValue::Text(v) => write!(f, "'{v}'"),
            PlcValue::Bytes(v) => write!(f, "{}", hex::encode_upper(v)),
            PlcValue::Array(a) => {
                let items: Vec<String> = a.values.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

/// Encodes a value into the bytes PLC memory holds for `ty`.
///
/// # Errors
///
/// - `MewtocolError::Validation` if the value variant does not fit the type,
///   text is too long or not ASCII, or a duration is out of range
/// - `MewtocolError::ShapeMismatch` if an array's shape differs from the declaration
pub fn encode(ty: &PlcType, value: &PlcValue) -> Result<Vec<u8>> {
    match (ty, value) {
        (PlcType::Bool, PlcValue::Bool(v)) => Ok(u16::from(*v).to_le_bytes().to_vec()),
        (PlcType::Int, PlcValue::Int(v)) => Ok(v.to_le_bytes().to_vec()),
        (PlcType::Word, PlcValue::Word(v)) => Ok(v.to_le_bytes().to_vec()),
        (PlcType::DInt, PlcValue::DInt(v)) => Ok(u32_to_wire(*v as u32).to_vec()),
        (PlcType::DWord, PlcValue::DWord(v)) => Ok(u32_to_wire(*v).to_vec()),
        (PlcType::Real, PlcValue::Real(v)) => Ok(u32_to_wire(v.to_bits()).to_vec()),
        (PlcType::Time, PlcValue::Time(v)) => {
            let counts = u32::try_from(v.as_millis() / u128::from(TIME_UNIT_MS)).map_err(|_| {
                MewtocolError::validation(format!("duration {v:?} exceeds the TIME range"))
            })?;
            Ok(u32_to_wire(counts).to_vec())
        }
        (PlcType::Bits16, PlcValue::Bits(v)) if v.width() == 16 => {
            Ok((v.raw() as u16).to_le_bytes().to_vec())
        }
        (PlcType::Bits32, PlcValue::Bits(v)) if v.width() == 32 => {
            Ok(u32_to_wire(v.raw()).to_vec())
        }
        (PlcType::Text { capacity }, PlcValue::Text(s)) => encode_text(*capacity, s),
        (PlcType::Bytes { len }, PlcValue::Bytes(b)) => {
            if b.len() != usize::from(*len) {
                return Err(MewtocolError::validation(format!(
                    "byte range holds {len} bytes, got {}",
                    b.len()
                )));
            }
            let mut out = b.clone();
            out.resize(ty.byte_len(), 0);
            Ok(out)
        }
        (PlcType::Array { element, shape }, PlcValue::Array(array)) => {
            if array.shape() != shape.as_slice() {
                return Err(MewtocolError::ShapeMismatch {
                    expected: shape.clone(),
                    actual: array.shape().to_vec(),
                });
            }
            let mut out = Vec::with_capacity(ty.byte_len());
            for item in array.values() {
                out.extend(encode(element, item)?);
            }
            Ok(out)
        }
        (ty, value) => Err(MewtocolError::validation(format!(
            "value {value} does not match declared type {ty}"
        ))),
    }
}

/// Decodes the bytes PLC memory holds for `ty`.
///
/// Only the first `ty.byte_len()` bytes are used.
///
/// # Errors
///
/// - `MewtocolError::InvalidResponse` if fewer bytes than required are given
///   or a text's used length exceeds its capacity
/// - `MewtocolError::Validation` if a text's capacity word differs from the
///   declared capacity
pub fn decode(ty: &PlcType, bytes: &[u8]) -> Result<PlcValue> {
    let needed = ty.byte_len();
    if bytes.len() < needed {
        return Err(MewtocolError::invalid_response(format!(
            "{ty} needs {needed} bytes, got {}",
            bytes.len()
        )));
    }
    let bytes = &bytes[..needed];

    Ok(match ty {
        PlcType::Bool => PlcValue::Bool(u16_from_wire(bytes) != 0),
        PlcType::Int => PlcValue::Int(u16_from_wire(bytes) as i16),
        PlcType::Word => PlcValue::Word(u16_from_wire(bytes)),
        PlcType::DInt => PlcValue::DInt(u32_from_wire(bytes) as i32),
        PlcType::DWord => PlcValue::DWord(u32_from_wire(bytes)),
        PlcType::Real => PlcValue::Real(f32::from_bits(u32_from_wire(bytes))),
        PlcType::Time => PlcValue::Time(Duration::from_millis(
            u64::from(u32_from_wire(bytes)) * TIME_UNIT_MS,
        )),
        PlcType::Bits16 => PlcValue::Bits(BitVector::from_u16(u16_from_wire(bytes))),
        PlcType::Bits32 => PlcValue::Bits(BitVector::from_u32(u32_from_wire(bytes))),
        PlcType::Text { capacity } => PlcValue::Text(decode_text(*capacity, bytes)?),
        PlcType::Bytes { len } => PlcValue::Bytes(bytes[..usize::from(*len)].to_vec()),
        PlcType::Array { element, shape } => {
            let values = bytes
                .chunks_exact(element.byte_len())
                .map(|chunk| decode(element, chunk))
                .collect::<Result<Vec<_>>>()?;
            PlcValue::Array(PlcArray::new(shape.clone(), values)?)
        }
    })
}

fn encode_text(capacity: u16, text: &str) -> Result<Vec<u8>> {
    if !text.is_ascii() {
        return Err(MewtocolError::validation(format!(
            "text '{text}' contains non-ASCII characters"
        )));
    }
    let used = u16::try_from(text.len())
        .ok()
        .filter(|&n| n <= capacity)
        .ok_or_else(|| {
            MewtocolError::validation(format!(
                "text of {} bytes exceeds capacity {capacity}",
                text.len()
            ))
        })?;

    let mut out = Vec::with_capacity(4 + usize::from(capacity) + 1);
    out.extend_from_slice(&capacity.to_le_bytes());
    out.extend_from_slice(&used.to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out.resize(4 + round_up_even(usize::from(capacity)), 0);
    Ok(out)
}

fn decode_text(capacity: u16, bytes: &[u8]) -> Result<String> {
    let reserved = u16_from_wire(&bytes[0..2]);
    if reserved != capacity {
        return Err(MewtocolError::validation(format!(
            "text reserves {reserved} bytes in PLC memory but was declared with capacity {capacity}"
        )));
    }
    let used = u16_from_wire(&bytes[2..4]);
    if used > capacity {
        return Err(MewtocolError::invalid_response(format!(
            "text length {used} exceeds capacity {capacity}"
        )));
    }
    let body = &bytes[4..4 + usize::from(used)];
    Ok(String::from_utf8_lossy(body).into_owned())
}

fn u16_from_wire(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn u32_to_wire(value: u32) -> [u8; 4] {
    let b = value.to_le_bytes();
    [b[2], b[3], b[0], b[1]]
}

fn u32_from_wire(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[2], bytes[3], bytes[0], bytes[1]])
}

fn round_up_even(n: usize) -> usize {
    n + (n & 1)
}
