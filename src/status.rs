//! Decoding of the `RT` status response.
//!
//! # Layout
//!
//! | Field | Chars | Encoding |
//! |-------|------:|----------|
//! | CPU type | 2 | hex |
//! | CPU version | 2 | decimal digits, rendered `x.y` |
//! | Program capacity | 2 | decimal, thousands of steps |
//! | Operation mode | 2 | hex flags, see [`PlcInfo::mode_flags`] |
//! | Link unit | 2 | hex |
//! | Error flags | 2 | hex |
//! | Self-diagnostic error | 4 | decimal |
//!
//! # Example
//!
//! ```
//! use mewtocol::PlcInfo;
//!
//! let info = PlcInfo::parse("20230381000000000").unwrap();
//! assert_eq!(info.cpu_type, 0x20);
//! assert_eq!(info.version, "2.3");
//! assert_eq!(info.program_capacity, 3);
//! assert!(info.is_run_mode());
//! assert!(info.is_remote_mode());
//! ```

use crate::error::{MewtocolError, Result};
use crate::utils::get_bit;

/// Operation mode bit: program running.
pub const MODE_RUN: u8 = 0;
/// Operation mode bit: test run.
pub const MODE_TEST: u8 = 1;
/// Operation mode bit: break condition expected.
pub const MODE_BREAK_EXPECTED: u8 = 2;
/// Operation mode bit: halted at a break.
pub const MODE_BREAK: u8 = 3;
/// Operation mode bit: outputs enabled in test mode.
pub const MODE_OUTPUT_ENABLED: u8 = 4;
/// Operation mode bit: single step run.
pub const MODE_STEP_RUN: u8 = 5;
/// Operation mode bit: message instruction active.
pub const MODE_MESSAGE: u8 = 6;
/// Operation mode bit: mode selector on REMOTE.
pub const MODE_REMOTE: u8 = 7;

/// Minimum length of the `RT` data block.
const RT_DATA_LEN: usize = 16;

/// PLC status captured at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlcInfo {
    /// CPU type code.
    pub cpu_type: u8,
    /// CPU firmware version (`x.y`).
    pub version: String,
    /// Program capacity in thousands of steps.
    pub program_capacity: u16,
    /// Raw operation mode flags.
    pub mode_flags: u8,
    /// Link unit information.
    pub link: u8,
    /// Error flags.
    pub error_flags: u8,
    /// Self-diagnostic error code, 0 when healthy.
    pub self_diagnostic_error: u16,
}

impl PlcInfo {
    /// Parses the data block following `$RT`.
    ///
    /// Trailing characters beyond the known fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidResponse` if the block is short or a
    /// field is not a number.
    pub fn parse(data: &str) -> Result<Self> {
        if data.len() < RT_DATA_LEN || !data.is_char_boundary(RT_DATA_LEN) {
            return Err(MewtocolError::invalid_response(format!(
                "status block too short: {data:?}"
            )));
        }

        let version = field(data, 2, 2)?;
        if !version.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MewtocolError::invalid_response(format!(
                "bad CPU version: {version:?}"
            )));
        }

        Ok(Self {
            cpu_type: hex_u8(field(data, 0, 2)?)?,
            version: format!("{}.{}", &version[..1], &version[1..]),
            program_capacity: dec_u16(field(data, 4, 2)?)?,
            mode_flags: hex_u8(field(data, 6, 2)?)?,
            link: hex_u8(field(data, 8, 2)?)?,
            error_flags: hex_u8(field(data, 10, 2)?)?,
            self_diagnostic_error: dec_u16(field(data, 12, 4)?)?,
        })
    }

    /// Whether the program is running.
    pub fn is_run_mode(&self) -> bool {
        self.flag(MODE_RUN)
    }

    /// Whether the CPU is in test mode.
    pub fn is_test_mode(&self) -> bool {
        self.flag(MODE_TEST)
    }

    /// Whether the CPU is halted at a break.
    pub fn is_break(&self) -> bool {
        self.flag(MODE_BREAK)
    }

    /// Whether the mode selector is on REMOTE, allowing mode switching.
    pub fn is_remote_mode(&self) -> bool {
        self.flag(MODE_REMOTE)
    }

    /// Whether the CPU reports a self-diagnostic error.
    pub fn has_error(&self) -> bool {
        self.self_diagnostic_error != 0 || self.error_flags != 0
    }

    /// Tests one operation mode bit (see the `MODE_*` constants).
    pub fn flag(&self, bit: u8) -> bool {
        get_bit(u32::from(self.mode_flags), bit)
    }
}

impl std::fmt::Display for PlcInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CPU {:02X} v{} {}k steps, {}",
            self.cpu_type,
            self.version,
            self.program_capacity,
            if self.is_run_mode() { "RUN" } else { "PROG" }
        )
    }
}

fn field(data: &str, start: usize, len: usize) -> Result<&str> {
    data.get(start..start + len)
        .ok_or_else(|| MewtocolError::invalid_response("status field out of range"))
}

fn hex_u8(s: &str) -> Result<u8> {
    u8::from_str_radix(s, 16)
        .map_err(|_| MewtocolError::invalid_response(format!("bad hex field: {s:?}")))
}

fn dec_u16(s: &str) -> Result<u16> {
    s.parse::<u16>()
        .map_err(|_| MewtocolError::invalid_response(format!("bad decimal field: {s:?}")))
}
