//! MEWTOCOL response parsing and validation.
//!
//! This module parses the logical response produced by
//! [`FrameAssembler`](crate::frame::FrameAssembler): a frame with checksum,
//! continuation markers and terminator already removed.
//!
//! # Response Structure
//!
//! | Component | Size | Description |
//! |-----------|------|-------------|
//! | `%` | 1 | Start of frame |
//! | Station | 2 | Responding station |
//! | `$` or `!` | 1 | Success or error |
//! | Code | 2 | Echo of the command code (`RD`, `WC`, ...) or error code |
//! | Data | Variable | Hex encoded memory or status fields |
//!
//! # Example
//!
//! ```
//! use mewtocol::MewtocolResponse;
//!
//! let response = MewtocolResponse::parse("%01$RD34120100").unwrap();
//! assert_eq!(response.code, "RD");
//! assert_eq!(response.to_words().unwrap(), vec![0x1234, 0x0001]);
//!
//! let err = MewtocolResponse::parse("%01!61").unwrap_err();
//! assert_eq!(err.to_string(), "PLC error 61: Data error");
//! ```

use crate::error::{MewtocolError, Result};

/// Parsed successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MewtocolResponse {
    /// Station field as sent by the PLC (`01`, `EE`, ...).
    pub station: String,
    /// Two letter response code.
    pub code: String,
    /// Remaining payload characters.
    pub data: String,
}

impl MewtocolResponse {
    /// Parses a logical response.
    ///
    /// # Errors
    ///
    /// - `MewtocolError::PlcError` for `%<station>!<code>` error responses
    /// - `MewtocolError::InvalidResponse` for anything not shaped like a response
    pub fn parse(logical: &str) -> Result<Self> {
        let rest = logical
            .strip_prefix('%')
            .ok_or_else(|| MewtocolError::invalid_response(format!("missing '%': {logical:?}")))?;

        if rest.len() < 3 || !rest.is_char_boundary(2) {
            return Err(MewtocolError::invalid_response(format!(
                "response too short: {logical:?}"
            )));
        }
        let (station, rest) = rest.split_at(2);

        match rest.as_bytes().first() {
            Some(b'!') => Err(parse_error_code(&rest[1..], logical)),
            Some(b'$') => {
                let body = &rest[1..];
                if body.len() < 2 || !body.is_char_boundary(2) {
                    return Err(MewtocolError::invalid_response(format!(
                        "missing response code: {logical:?}"
                    )));
                }
                let (code, data) = body.split_at(2);
                Ok(Self {
                    station: station.to_string(),
                    code: code.to_string(),
                    data: data.to_string(),
                })
            }
            _ => Err(MewtocolError::invalid_response(format!(
                "expected '$' or '!': {logical:?}"
            ))),
        }
    }

    /// Checks that the response answers the expected command.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidResponse` on a code mismatch.
    pub fn expect_code(&self, code: &str) -> Result<()> {
        if self.code == code {
            Ok(())
        } else {
            Err(MewtocolError::invalid_response(format!(
                "expected {code} response, got {}",
                self.code
            )))
        }
    }

    /// Decodes the hex payload into memory bytes, in transmission order.
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidResponse` if the payload is not hex.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.data)
            .map_err(|e| MewtocolError::invalid_response(format!("bad hex payload: {e}")))
    }

    /// Decodes the payload into 16-bit words (little-endian byte pairs).
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidResponse` if the payload is not whole words.
    pub fn to_words(&self) -> Result<Vec<u16>> {
        let bytes = self.to_bytes()?;
        if bytes.len() % 2 != 0 {
            return Err(MewtocolError::invalid_response(
                "data length must be even for word conversion",
            ));
        }
        Ok(bytes
            .chunks_exact(2)
            .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
            .collect())
    }

    /// Decodes a single contact state (`0` or `1`).
    ///
    /// # Errors
    ///
    /// Returns `MewtocolError::InvalidResponse` for anything else.
    pub fn to_bit(&self) -> Result<bool> {
        match self.data.as_str() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(MewtocolError::invalid_response(format!(
                "invalid contact value: {other:?}"
            ))),
        }
    }
}

fn parse_error_code(digits: &str, logical: &str) -> MewtocolError {
    match digits.get(..2).and_then(|d| d.parse::<u8>().ok()) {
        Some(code) => MewtocolError::plc_error(code),
        None => MewtocolError::invalid_response(format!("malformed error response: {logical:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_read_response() {
        let response = MewtocolResponse::parse("%01$RD63000000").unwrap();
        assert_eq!(response.station, "01");
        assert_eq!(response.code, "RD");
        assert_eq!(response.data, "63000000");
        assert_eq!(response.to_bytes().unwrap(), vec![0x63, 0, 0, 0]);
        assert_eq!(response.to_words().unwrap(), vec![0x63, 0]);
    }

    #[test]
    fn test_parse_error_response() {
        let err = MewtocolResponse::parse("%EE!40").unwrap_err();
        assert!(matches!(err, MewtocolError::PlcError { code: 40, .. }));
    }

    #[test]
    fn test_parse_malformed_error_response() {
        let err = MewtocolResponse::parse("%01!x").unwrap_err();
        assert!(matches!(err, MewtocolError::InvalidResponse { .. }));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(MewtocolResponse::parse("").is_err());
        assert!(MewtocolResponse::parse("%0").is_err());
        assert!(MewtocolResponse::parse("%01#RD").is_err());
        assert!(MewtocolResponse::parse("01$RD").is_err());
    }

    #[test]
    fn test_expect_code() {
        let response = MewtocolResponse::parse("%01$WD").unwrap();
        assert!(response.expect_code("WD").is_ok());
        assert!(response.expect_code("RD").is_err());
        assert!(response.data.is_empty());
    }

    #[test]
    fn test_to_bit() {
        assert!(MewtocolResponse::parse("%01$RC1").unwrap().to_bit().unwrap());
        assert!(!MewtocolResponse::parse("%01$RC0").unwrap().to_bit().unwrap());
        assert!(MewtocolResponse::parse("%01$RC2").unwrap().to_bit().is_err());
    }

    #[test]
    fn test_odd_payload() {
        let response = MewtocolResponse::parse("%01$RDZZ").unwrap();
        assert!(response.to_bytes().is_err());
        let response = MewtocolResponse::parse("%01$RD12").unwrap();
        assert!(response.to_words().is_err());
    }
}
