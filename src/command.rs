//! MEWTOCOL command payloads.
//!
//! Each command renders the body that follows `%<station>#` and names the
//! response code the PLC echoes back. Framing (checksum and terminator) is
//! added by [`Command::to_frame`].
//!
//! # Command Types
//!
//! ## Status
//! - [`StatusCommand`] - `RT`, CPU type, version and mode flags
//! - [`ExtendedStatusCommand`] - `EX00RT00`, status of newer CPUs
//! - [`ModeCommand`] - `RM`, switch between RUN and PROGRAM
//!
//! ## Word Memory
//! - [`ReadWordCommand`] - `RD`, read a DT/FL range
//! - [`WriteWordCommand`] - `WD`, write a DT/FL range
//!
//! ## Relays
//! - [`ReadBitCommand`] - `RCS`, read one contact
//! - [`WriteBitCommand`] - `WCS`, write one contact
//! - [`ReadRelayWordCommand`] - `RCC`, read whole relay words
//! - [`WriteRelayWordCommand`] - `WCC`, write whole relay words
//!
//! # Example
//!
//! ```
//! use mewtocol::command::{Command, ReadBitCommand};
//! use mewtocol::frame::ChecksumKind;
//! use mewtocol::{MemoryClass, Station};
//!
//! let cmd = ReadBitCommand::new(MemoryClass::X, 0, 0).unwrap();
//! assert_eq!(cmd.body(), "RCSX0000");
//! assert_eq!(
//!     cmd.to_frame(Station::Unit(1), ChecksumKind::Bcc),
//!     "%01#RCSX00001D\r"
//! );
//! ```

use crate::error::{MewtocolError, Result};
use crate::frame::{build_frame, ChecksumKind, Station};
use crate::memory::{MemoryClass, MAX_WORD_ADDRESS};

/// A request that can be sent to a PLC.
pub trait Command {
    /// Text following `%<station>#`.
    fn body(&self) -> String;

    /// Code of a successful response (`$<code>`).
    fn response_code(&self) -> &'static str;

    /// Renders the complete frame for `station`.
    fn to_frame(&self, station: Station, kind: ChecksumKind) -> String {
        build_frame(&format!("%{station}#{}", self.body()), kind)
    }
}

/// Reads the PLC status (`RT`).
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCommand;

impl Command for StatusCommand {
    fn body(&self) -> String {
        "RT".to_string()
    }

    fn response_code(&self) -> &'static str {
        "RT"
    }
}

/// Reads the extended PLC status (`EX00RT00`) of FP7-class CPUs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendedStatusCommand;

impl Command for ExtendedStatusCommand {
    fn body(&self) -> String {
        "EX00RT00".to_string()
    }

    fn response_code(&self) -> &'static str {
        "EX"
    }
}

/// PLC operation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperationMode {
    /// Program is executing.
    Run,
    /// Program is stopped and can be edited.
    Program,
}

/// Switches the PLC between RUN and PROGRAM (`RM`).
#[derive(Debug, Clone, Copy)]
pub struct ModeCommand {
    mode: OperationMode,
}

impl ModeCommand {
    /// Creates a mode switch command.
    pub fn new(mode: OperationMode) -> Self {
        Self { mode }
    }
}

impl Command for ModeCommand {
    fn body(&self) -> String {
        match self.mode {
            OperationMode::Run => "RMR".to_string(),
            OperationMode::Program => "RMP".to_string(),
        }
    }

    fn response_code(&self) -> &'static str {
        "RM"
    }
}

fn check_word_range(class: MemoryClass, start: u32, count: usize) -> Result<u32> {
    if count == 0 {
        return Err(MewtocolError::invalid_parameter(
            "count",
            "must be greater than 0",
        ));
    }
    let end = u64::from(start) + count as u64 - 1;
    if end > u64::from(MAX_WORD_ADDRESS) {
        return Err(MewtocolError::invalid_addressing(format!(
            "{class}{start} + {count} words exceeds {class}{MAX_WORD_ADDRESS}"
        )));
    }
    Ok(end as u32)
}

/// Reads a range of data or file registers (`RD`).
#[derive(Debug, Clone)]
pub struct ReadWordCommand {
    code: char,
    start: u32,
    end: u32,
}

impl ReadWordCommand {
    /// Creates a read of `count` words starting at `start`.
    ///
    /// # Errors
    ///
    /// - `MewtocolError::InvalidAddressing` for relay classes or a range past 99999
    /// - `MewtocolError::InvalidParameter` if `count` is 0
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::command::{Command, ReadWordCommand};
    /// use mewtocol::MemoryClass;
    ///
    /// let cmd = ReadWordCommand::new(MemoryClass::DT, 100, 2).unwrap();
    /// assert_eq!(cmd.body(), "RDD0010000101");
    /// ```
    pub fn new(class: MemoryClass, start: u32, count: usize) -> Result<Self> {
        let code = class.word_code()?;
        let end = check_word_range(class, start, count)?;
        Ok(Self { code, start, end })
    }

    /// Number of words the response carries.
    pub fn word_count(&self) -> usize {
        (self.end - self.start + 1) as usize
    }
}

impl Command for ReadWordCommand {
    fn body(&self) -> String {
        format!("RD{}{:05}{:05}", self.code, self.start, self.end)
    }

    fn response_code(&self) -> &'static str {
        "RD"
    }
}

/// Writes a range of data or file registers (`WD`).
#[derive(Debug, Clone)]
pub struct WriteWordCommand {
    code: char,
    start: u32,
    end: u32,
    data: Vec<u8>,
}

impl WriteWordCommand {
    /// Creates a write of `data` (memory bytes in transmission order).
    ///
    /// # Errors
    ///
    /// - `MewtocolError::InvalidAddressing` for relay classes or a range past 99999
    /// - `MewtocolError::InvalidParameter` if `data` is empty or not whole words
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::command::{Command, WriteWordCommand};
    /// use mewtocol::MemoryClass;
    ///
    /// let cmd = WriteWordCommand::new(MemoryClass::DT, 0, &[0x34, 0x12]).unwrap();
    /// assert_eq!(cmd.body(), "WDD00000000003412");
    /// ```
    pub fn new(class: MemoryClass, start: u32, data: &[u8]) -> Result<Self> {
        let code = class.word_code()?;
        if data.len() % 2 != 0 {
            return Err(MewtocolError::invalid_parameter(
                "data",
                "must contain whole 16-bit words",
            ));
        }
        let end = check_word_range(class, start, data.len() / 2)?;
        Ok(Self {
            code,
            start,
            end,
            data: data.to_vec(),
        })
    }

    /// Creates a write from 16-bit words.
    ///
    /// # Errors
    ///
    /// Same as [`WriteWordCommand::new`].
    pub fn from_words(class: MemoryClass, start: u32, words: &[u16]) -> Result<Self> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        Self::new(class, start, &bytes)
    }
}

impl Command for WriteWordCommand {
    fn body(&self) -> String {
        format!(
            "WD{}{:05}{:05}{}",
            self.code,
            self.start,
            self.end,
            hex::encode_upper(&self.data)
        )
    }

    fn response_code(&self) -> &'static str {
        "WD"
    }
}

fn check_relay_address(class: MemoryClass, area: u32, bit: Option<u8>) -> Result<char> {
    let code = class.bit_code()?;
    if area > class.max_address() {
        return Err(MewtocolError::invalid_addressing(format!(
            "{class}{area} exceeds {class}{}",
            class.max_address()
        )));
    }
    if let Some(bit) = bit {
        if bit > 15 {
            return Err(MewtocolError::invalid_parameter("bit", "must be 0-15"));
        }
    }
    Ok(code)
}

/// Reads a single contact (`RCS`).
#[derive(Debug, Clone, Copy)]
pub struct ReadBitCommand {
    code: char,
    area: u32,
    bit: u8,
}

impl ReadBitCommand {
    /// Creates a read of contact `bit` (0–15) of relay word `area`.
    ///
    /// # Errors
    ///
    /// - `MewtocolError::InvalidAddressing` for word classes or an area out of range
    /// - `MewtocolError::InvalidParameter` if `bit > 15`
    pub fn new(class: MemoryClass, area: u32, bit: u8) -> Result<Self> {
        let code = check_relay_address(class, area, Some(bit))?;
        Ok(Self { code, area, bit })
    }
}

impl Command for ReadBitCommand {
    fn body(&self) -> String {
        format!("RCS{}{:03}{:X}", self.code, self.area, self.bit)
    }

    fn response_code(&self) -> &'static str {
        "RC"
    }
}

/// Writes a single contact (`WCS`).
#[derive(Debug, Clone, Copy)]
pub struct WriteBitCommand {
    code: char,
    area: u32,
    bit: u8,
    value: bool,
}

impl WriteBitCommand {
    /// Creates a write of contact `bit` (0–15) of relay word `area`.
    ///
    /// # Errors
    ///
    /// Same as [`ReadBitCommand::new`].
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::command::{Command, WriteBitCommand};
    /// use mewtocol::MemoryClass;
    ///
    /// let cmd = WriteBitCommand::new(MemoryClass::R, 1, 0xA, true).unwrap();
    /// assert_eq!(cmd.body(), "WCSR001A1");
    /// ```
    pub fn new(class: MemoryClass, area: u32, bit: u8, value: bool) -> Result<Self> {
        let code = check_relay_address(class, area, Some(bit))?;
        Ok(Self {
            code,
            area,
            bit,
            value,
        })
    }
}

impl Command for WriteBitCommand {
    fn body(&self) -> String {
        format!(
            "WCS{}{:03}{:X}{}",
            self.code,
            self.area,
            self.bit,
            if self.value { '1' } else { '0' }
        )
    }

    fn response_code(&self) -> &'static str {
        "WC"
    }
}

/// Reads whole relay words (`RCC`).
#[derive(Debug, Clone, Copy)]
pub struct ReadRelayWordCommand {
    code: char,
    start: u32,
    end: u32,
}

impl ReadRelayWordCommand {
    /// Creates a read of `count` relay words starting at `start`.
    ///
    /// # Errors
    ///
    /// - `MewtocolError::InvalidAddressing` for word classes or a range out of bounds
    /// - `MewtocolError::InvalidParameter` if `count` is 0
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::command::{Command, ReadRelayWordCommand};
    /// use mewtocol::MemoryClass;
    ///
    /// let cmd = ReadRelayWordCommand::new(MemoryClass::R, 10, 1).unwrap();
    /// assert_eq!(cmd.body(), "RCCR00100010");
    /// ```
    pub fn new(class: MemoryClass, start: u32, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(MewtocolError::invalid_parameter(
                "count",
                "must be greater than 0",
            ));
        }
        let end = start.saturating_add(count as u32 - 1);
        check_relay_address(class, start, None)?;
        let code = check_relay_address(class, end, None)?;
        Ok(Self { code, start, end })
    }
}

impl Command for ReadRelayWordCommand {
    fn body(&self) -> String {
        format!("RCC{}{:04}{:04}", self.code, self.start, self.end)
    }

    fn response_code(&self) -> &'static str {
        "RC"
    }
}

/// Writes whole relay words (`WCC`).
#[derive(Debug, Clone)]
pub struct WriteRelayWordCommand {
    code: char,
    start: u32,
    end: u32,
    words: Vec<u16>,
}

impl WriteRelayWordCommand {
    /// Creates a write of `words` starting at relay word `start`.
    ///
    /// # Errors
    ///
    /// - `MewtocolError::InvalidAddressing` for word classes or a range out of bounds
    /// - `MewtocolError::InvalidParameter` if `words` is empty
    pub fn new(class: MemoryClass, start: u32, words: &[u16]) -> Result<Self> {
        if words.is_empty() {
            return Err(MewtocolError::invalid_parameter("words", "must not be empty"));
        }
        let end = start.saturating_add(words.len() as u32 - 1);
        check_relay_address(class, start, None)?;
        let code = check_relay_address(class, end, None)?;
        Ok(Self {
            code,
            start,
            end,
            words: words.to_vec(),
        })
    }
}

impl Command for WriteRelayWordCommand {
    fn body(&self) -> String {
        let bytes: Vec<u8> = self.words.iter().flat_map(|w| w.to_le_bytes()).collect();
        format!(
            "WCC{}{:04}{:04}{}",
            self.code,
            self.start,
            self.end,
            hex::encode_upper(bytes)
        )
    }

    fn response_code(&self) -> &'static str {
        "WC"
    }
}
