//! MEWTOCOL frame building, checksums and multi-frame reassembly.
//!
//! # Frame Structure
//!
//! Every command and response is a line of ASCII text:
//!
//! | Component | Size | Description |
//! |-----------|------|-------------|
//! | `%` | 1 | Start of frame |
//! | Station | 2 | `01`–`99`, or `EE` for any station |
//! | `#` / `$` / `!` | 1 | Command / response / error response |
//! | Body | Variable | Command code and payload |
//! | Checksum | 2 (BCC) or 4 (CRC-16) | Uppercase hex, `**` skips the check |
//! | `&` | 0–1 | Present when more frames follow |
//! | CR | 1 | Terminator |
//!
//! Long responses arrive as several partial frames ending in `&` CR. After
//! each partial frame the client sends [`continuation_request`]; the final
//! frame ends with a plain CR. [`FrameAssembler`] tracks this exchange and
//! splices the partial payloads into one logical response.
//!
//! # Example
//!
//! ```
//! use mewtocol::frame::{bcc, build_frame, ChecksumKind};
//!
//! assert_eq!(bcc("%01#RCSX0000"), 0x1D);
//! assert_eq!(build_frame("%01#RCSX0000", ChecksumKind::Bcc), "%01#RCSX00001D\r");
//! ```

use crc::{Crc, CRC_16_MODBUS};

use crate::error::{MewtocolError, Result};

/// Frame terminator.
pub const TERMINATOR: char = '\r';

/// Marker placed before the terminator when more frames follow.
pub const CONTINUATION_MARKER: char = '&';

/// Checksum placeholder telling the receiver to skip verification.
pub const NO_CHECKSUM: &str = "**";

/// CRC calculator for the extended protocol.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Checksum variant appended to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumKind {
    /// Block check character: XOR of all bytes, two hex digits.
    #[default]
    Bcc,
    /// CRC-16 residue used by the extended protocol, four hex digits.
    Crc16,
}

impl ChecksumKind {
    /// Number of characters the checksum occupies in a frame.
    pub fn width(self) -> usize {
        match self {
            ChecksumKind::Bcc => 2,
            ChecksumKind::Crc16 => 4,
        }
    }
}

/// Station number addressed by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Station {
    /// A specific station, 1–99.
    Unit(u8),
    /// Any station (`EE`), for point-to-point links.
    #[default]
    Any,
}

impl Station {
    /// Creates a station from its number.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidParameter` unless `1 <= number <= 99`.
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::Station;
    ///
    /// assert_eq!(Station::new(1).unwrap().to_string(), "01");
    /// assert_eq!(Station::Any.to_string(), "EE");
    /// assert!(Station::new(100).is_err());
    /// ```
    pub fn new(number: u8) -> Result<Self> {
        if (1..=99).contains(&number) {
            Ok(Station::Unit(number))
        } else {
            Err(MewtocolError::invalid_parameter("station", "must be 1-99"))
        }
    }
}

impl std::fmt::Display for Station {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Station::Unit(n) => write!(f, "{n:02}"),
            Station::Any => write!(f, "EE"),
        }
    }
}

/// Computes the block check character of a payload.
pub fn bcc(payload: &str) -> u8 {
    payload.bytes().fold(0, |acc, b| acc ^ b)
}

/// Computes the CRC-16 residue of a payload.
pub fn crc16(payload: &str) -> u16 {
    CRC16.checksum(payload.as_bytes())
}

/// Renders the checksum of `payload` as uppercase hex.
///
/// # Example
///
/// ```
/// use mewtocol::frame::{checksum, ChecksumKind};
///
/// assert_eq!(checksum("%01#RT", ChecksumKind::Bcc).len(), 2);
/// assert_eq!(checksum("%01#RT", ChecksumKind::Crc16).len(), 4);
/// ```
pub fn checksum(payload: &str, kind: ChecksumKind) -> String {
    match kind {
        ChecksumKind::Bcc => format!("{:02X}", bcc(payload)),
        ChecksumKind::Crc16 => format!("{:04X}", crc16(payload)),
    }
}

/// Appends the checksum and terminator to a payload.
pub fn build_frame(payload: &str, kind: ChecksumKind) -> String {
    let mut frame = String::with_capacity(payload.len() + kind.width() + 1);
    frame.push_str(payload);
    frame.push_str(&checksum(payload, kind));
    frame.push(TERMINATOR);
    frame
}

/// Builds the frame that asks the PLC for the next partial response.
///
/// # Example
///
/// ```
/// use mewtocol::frame::continuation_request;
/// use mewtocol::Station;
///
/// assert_eq!(continuation_request(Station::Unit(1)), "%01**&\r");
/// ```
pub fn continuation_request(station: Station) -> String {
    format!("%{station}{NO_CHECKSUM}{CONTINUATION_MARKER}{TERMINATOR}")
}

/// Whether a received frame completes the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The final (or only) frame arrived.
    Complete,
    /// A partial frame arrived; send a continuation request.
    NeedsContinuation,
}

/// Splits a frame into `(payload, checksum, is_partial)`.
fn split_frame(frame: &str, kind: ChecksumKind) -> Result<(&str, &str, bool)> {
    let body = frame.strip_suffix(TERMINATOR).unwrap_or(frame);
    let (body, partial) = match body.strip_suffix(CONTINUATION_MARKER) {
        Some(rest) => (rest, true),
        None => (body, false),
    };
    let width = kind.width();
    if body.len() < width + 1 || !body.is_char_boundary(body.len() - width) {
        return Err(MewtocolError::invalid_response(format!(
            "frame too short: {:?}",
            frame
        )));
    }
    let (payload, sum) = body.split_at(body.len() - width);
    Ok((payload, sum, partial))
}

/// Recomputes a received frame's checksum and compares it.
///
/// A checksum made only of `*` characters is accepted unverified.
///
/// # Errors
///
/// Returns `MewtocolError::ChecksumMismatch` if the checksum is wrong, or
/// `MewtocolError::InvalidResponse` if the frame is too short to carry one.
///
/// # Example
///
/// ```
/// use mewtocol::frame::{build_frame, verify_frame, ChecksumKind};
///
/// let frame = build_frame("%01$RC1", ChecksumKind::Bcc);
/// assert!(verify_frame(&frame, ChecksumKind::Bcc).is_ok());
/// assert!(verify_frame("%01$RC100\r", ChecksumKind::Bcc).is_err());
/// ```
pub fn verify_frame(frame: &str, kind: ChecksumKind) -> Result<()> {
    let (payload, received, _) = split_frame(frame, kind)?;
    if received.bytes().all(|b| b == b'*') {
        return Ok(());
    }
    let expected = checksum(payload, kind);
    if expected.eq_ignore_ascii_case(received) {
        Ok(())
    } else {
        Err(MewtocolError::ChecksumMismatch {
            expected,
            received: received.to_string(),
        })
    }
}

/// Splices partial frames into one logical response.
///
/// Each part loses its checksum, continuation marker and terminator. Parts
/// after the first also lose the repeated `%<station>` prefix and, if the
/// PLC repeats it, the `$<code>` response header of the first part.
///
/// # Errors
///
/// Returns `MewtocolError::InvalidResponse` if `parts` is empty or a part is
/// too short to carry a checksum.
///
/// # Example
///
/// ```
/// use mewtocol::frame::{splice_frames, ChecksumKind};
///
/// let logical = splice_frames(&["%01$RD0100AA&\r", "%0102003F\r"], ChecksumKind::Bcc).unwrap();
/// assert_eq!(logical, "%01$RD01000200");
/// ```
pub fn splice_frames<S: AsRef<str>>(parts: &[S], kind: ChecksumKind) -> Result<String> {
    let (first, rest) = parts
        .split_first()
        .ok_or_else(|| MewtocolError::invalid_response("no frames received"))?;

    let (head, _, _) = split_frame(first.as_ref(), kind)?;
    let mut logical = head.to_string();

    // `%01$RD...` -> `$RD`
    let header = head
        .get(3..6)
        .filter(|h| h.starts_with('$'))
        .map(str::to_string);

    for part in rest {
        let (payload, _, _) = split_frame(part.as_ref(), kind)?;
        let mut data = payload;
        if data.starts_with('%') && data.len() >= 3 {
            data = &data[3..];
        }
        if let Some(header) = &header {
            data = data.strip_prefix(header.as_str()).unwrap_or(data);
        }
        logical.push_str(data);
    }

    Ok(logical)
}

/// Collects the frames of one response.
///
/// # Example
///
/// ```
/// use mewtocol::frame::{build_frame, ChecksumKind, FrameAssembler, FrameStatus};
///
/// let mut assembler = FrameAssembler::new(ChecksumKind::Bcc);
/// let frame = build_frame("%01$RC1", ChecksumKind::Bcc);
/// assert_eq!(assembler.push(&frame).unwrap(), FrameStatus::Complete);
/// assert_eq!(assembler.finish().unwrap(), "%01$RC1");
/// ```
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    kind: ChecksumKind,
    parts: Vec<String>,
}

impl FrameAssembler {
    /// Creates an empty assembler for frames carrying `kind` checksums.
    pub fn new(kind: ChecksumKind) -> Self {
        Self {
            kind,
            parts: Vec::new(),
        }
    }

    /// Verifies and stores one received frame.
    ///
    /// # Errors
    ///
    /// - `MewtocolError::InvalidResponse` if the frame is not terminated or too short
    /// - `MewtocolError::ChecksumMismatch` if its checksum is wrong
    pub fn push(&mut self, frame: &str) -> Result<FrameStatus> {
        if !frame.ends_with(TERMINATOR) {
            return Err(MewtocolError::invalid_response(format!(
                "unterminated frame: {:?}",
                frame
            )));
        }
        verify_frame(frame, self.kind)?;
        let (_, _, partial) = split_frame(frame, self.kind)?;
        self.parts.push(frame.to_string());
        Ok(if partial {
            FrameStatus::NeedsContinuation
        } else {
            FrameStatus::Complete
        })
    }

    /// Number of frames received so far.
    pub fn frame_count(&self) -> usize {
        self.parts.len()
    }

    /// Returns the spliced logical response.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidResponse` if no frame was pushed.
    pub fn finish(self) -> Result<String> {
        splice_frames(&self.parts, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bcc_reference_frame() {
        assert_eq!(
            build_frame("%01#RCSX0000", ChecksumKind::Bcc),
            "%01#RCSX00001D\r"
        );
    }

    #[test]
    fn test_built_frames_verify() {
        for payload in ["%01#RT", "%EE#RDD0010000105", "%05#WCSR0010", "%01$RD63000000"] {
            for kind in [ChecksumKind::Bcc, ChecksumKind::Crc16] {
                let frame = build_frame(payload, kind);
                assert_eq!(checksum(payload, kind), checksum(payload, kind));
                assert!(verify_frame(&frame, kind).is_ok(), "{frame:?}");
            }
        }
    }

    #[test]
    fn test_crc16_known_value() {
        // CRC-16/MODBUS check value
        assert_eq!(crc16("123456789"), 0x4B37);
        assert_eq!(checksum("123456789", ChecksumKind::Crc16), "4B37");
    }

    #[test]
    fn test_checksum_mismatch() {
        let err = verify_frame("%01$RC1FF\r", ChecksumKind::Bcc).unwrap_err();
        assert!(matches!(err, MewtocolError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_placeholder_checksum_accepted() {
        assert!(verify_frame("%01**&\r", ChecksumKind::Bcc).is_ok());
    }

    #[test]
    fn test_lowercase_checksum_accepted() {
        let frame = build_frame("%01$RDA", ChecksumKind::Bcc).to_lowercase();
        let frame = format!("%01$RDA{}", &frame[7..]);
        assert!(verify_frame(&frame, ChecksumKind::Bcc).is_ok());
    }

    #[test]
    fn test_station_display() {
        assert_eq!(Station::Unit(1).to_string(), "01");
        assert_eq!(Station::Unit(42).to_string(), "42");
        assert_eq!(Station::Any.to_string(), "EE");
        assert!(Station::new(0).is_err());
    }

    #[test]
    fn test_continuation_request() {
        assert_eq!(continuation_request(Station::Unit(1)), "%01**&\r");
        assert_eq!(continuation_request(Station::Any), "%EE**&\r");
    }

    #[test]
    fn test_multi_frame_reassembly() {
        let logical =
            splice_frames(&["%01$RDaaaa&\r", "%01$RDbbbbCS\r"], ChecksumKind::Bcc).unwrap();
        // each part drops its two checksum characters, the second its repeated prefix
        assert_eq!(logical, "%01$RDaabbbb");
    }

    #[test]
    fn test_assembler_requests_continuation() {
        let first = format!("{}&\r", &build_frame("%01$RD0100", ChecksumKind::Bcc)[..12]);
        let last = build_frame("%010200", ChecksumKind::Bcc);

        let mut assembler = FrameAssembler::new(ChecksumKind::Bcc);
        assert_eq!(assembler.push(&first).unwrap(), FrameStatus::NeedsContinuation);
        assert_eq!(assembler.push(&last).unwrap(), FrameStatus::Complete);
        assert_eq!(assembler.frame_count(), 2);
        assert_eq!(assembler.finish().unwrap(), "%01$RD01000200");
    }

    #[test]
    fn test_assembler_rejects_unterminated() {
        let mut assembler = FrameAssembler::new(ChecksumKind::Bcc);
        assert!(assembler.push("%01$RC1").is_err());
    }

    #[test]
    fn test_error_frame_splices_to_code() {
        let frame = build_frame("%01!42", ChecksumKind::Bcc);
        let mut assembler = FrameAssembler::new(ChecksumKind::Bcc);
        assert_eq!(assembler.push(&frame).unwrap(), FrameStatus::Complete);
        assert_eq!(assembler.finish().unwrap(), "%01!42");
    }

    #[test]
    fn test_empty_splice() {
        let parts: [&str; 0] = [];
        assert!(splice_frames(&parts, ChecksumKind::Bcc).is_err());
    }
}
