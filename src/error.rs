//! Error types for the MEWTOCOL client.
//!
//! Errors fall into a few families that the session treats differently:
//!
//! | Family | Variants | Session reaction |
//! |--------|----------|------------------|
//! | Timeout | [`MewtocolError::Timeout`] | none, next poll cycle retries |
//! | Protocol | [`MewtocolError::PlcError`] | surfaced to the caller |
//! | Configuration mismatch | [`MewtocolError::ConfigurationMismatch`] | surfaced distinctly |
//! | Transport fault | [`MewtocolError::Io`], [`MewtocolError::ConnectionLost`] | disconnect and clear registers |
//! | Validation | [`MewtocolError::Validation`], [`MewtocolError::InvalidAddressing`], ... | raised at registration/encode time |

use std::io;
use thiserror::Error;

/// Result type alias for MEWTOCOL operations.
pub type Result<T> = std::result::Result<T, MewtocolError>;

/// Errors that can occur while talking to a PLC or declaring registers.
#[derive(Debug, Error)]
pub enum MewtocolError {
    /// Error code returned by the PLC in a `%<station>!<code>` response.
    #[error("PLC error {code:02}: {description}")]
    PlcError {
        /// Two digit error code from the response.
        code: u8,
        /// Human readable description of the code.
        description: &'static str,
    },

    /// A reply started but did not complete within the configured timeout.
    #[error("Communication timeout")]
    Timeout,

    /// The transport delivered zero bytes without failing.
    ///
    /// This usually means wrong serial settings (baud rate, parity) rather
    /// than an absent device.
    #[error("No bytes received, transport settings probably do not match the PLC")]
    ConfigurationMismatch,

    /// I/O error on the underlying socket or serial port.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The connection was closed by the peer or torn down after a fault.
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// Why the connection is considered lost.
        reason: String,
    },

    /// An operation needed an open session.
    #[error("Not connected")]
    NotConnected,

    /// Register declaration or value rejected before anything was sent.
    #[error("Validation failed: {reason}")]
    Validation {
        /// Description of the validation failure.
        reason: String,
    },

    /// Invalid memory addressing.
    #[error("Invalid addressing: {reason}")]
    InvalidAddressing {
        /// Description of the addressing error.
        reason: String,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// An array value does not match the declared shape.
    #[error("Array shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Declared dimensions.
        expected: Vec<usize>,
        /// Dimensions of the supplied value.
        actual: Vec<usize>,
    },

    /// Invalid response received from the PLC.
    #[error("Invalid response: {reason}")]
    InvalidResponse {
        /// Description of the response error.
        reason: String,
    },

    /// A frame checksum did not match its payload.
    #[error("Checksum mismatch: expected {expected}, received {received}")]
    ChecksumMismatch {
        /// Checksum computed over the payload.
        expected: String,
        /// Checksum carried by the frame.
        received: String,
    },

    /// The poll scheduler was asked for a transition its state does not allow.
    #[error("Invalid poller transition from {from} on {event}")]
    InvalidStateTransition {
        /// State the poller was in.
        from: &'static str,
        /// Event that was rejected.
        event: &'static str,
    },
}

impl MewtocolError {
    /// Creates a new `PlcError` from a two digit code, looking up its description.
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::MewtocolError;
    ///
    /// let err = MewtocolError::plc_error(40);
    /// assert_eq!(err.to_string(), "PLC error 40: BCC error");
    /// ```
    pub fn plc_error(code: u8) -> Self {
        Self::PlcError {
            code,
            description: error_code_description(code),
        }
    }

    /// Creates a new `Validation` error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidAddressing` error.
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::MewtocolError;
    ///
    /// let err = MewtocolError::invalid_addressing("DT area does not support bit access");
    /// ```
    pub fn invalid_addressing(reason: impl Into<String>) -> Self {
        Self::InvalidAddressing {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidParameter` error.
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidResponse` error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Creates a new `ConnectionLost` error.
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    /// Returns whether this error must tear the session down.
    ///
    /// Timeouts, PLC error codes and validation errors leave the connection
    /// open; socket and port failures do not.
    ///
    /// # Example
    ///
    /// ```
    /// use mewtocol::MewtocolError;
    ///
    /// assert!(!MewtocolError::Timeout.is_transport_fault());
    /// assert!(MewtocolError::connection_lost("peer closed").is_transport_fault());
    /// ```
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionLost { .. })
    }
}

/// Returns the description of a MEWTOCOL error code.
///
/// Unknown codes map to `"Unknown error"`.
///
/// # Example
///
/// ```
/// use mewtocol::error_code_description;
///
/// assert_eq!(error_code_description(61), "Data error");
/// assert_eq!(error_code_description(99), "Unknown error");
/// ```
pub fn error_code_description(code: u8) -> &'static str {
    match code {
        20 => "Not used",
        21 => "NACK error",
        22 => "WACK error",
        23 => "Station number overlap error",
        24 => "Transmission format error",
        25 => "Hardware error",
        26 => "Station number setting error",
        27 => "Not supported error",
        28 => "No response error",
        29 => "Buffer closed error",
        30 => "Time-out error",
        32 => "Transmission impossible error",
        33 => "Communication stop error",
        36 => "No local station error",
        38 => "Other station number error",
        40 => "BCC error",
        41 => "Format error",
        42 => "Not supported command error",
        43 => "Multiple frames procedure error",
        50 => "Link setting error",
        51 => "Transmission time-out error",
        52 => "Transmission/receive disable error",
        53 => "Busy error",
        60 => "Parameter error",
        61 => "Data error",
        62 => "Register error",
        63 => "PLC mode error",
        65 => "Protect error",
        66 => "Address error",
        67 => "Missing data error",
        _ => "Unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plc_error_display() {
        let err = MewtocolError::plc_error(42);
        assert_eq!(err.to_string(), "PLC error 42: Not supported command error");
    }

    #[test]
    fn test_plc_error_unknown_code() {
        let err = MewtocolError::plc_error(7);
        assert_eq!(err.to_string(), "PLC error 07: Unknown error");
    }

    #[test]
    fn test_validation_display() {
        let err = MewtocolError::validation("DT99999 + 2 words overflows");
        assert_eq!(
            err.to_string(),
            "Validation failed: DT99999 + 2 words overflows"
        );
    }

    #[test]
    fn test_timeout_is_not_fatal() {
        assert!(!MewtocolError::Timeout.is_transport_fault());
        assert!(!MewtocolError::ConfigurationMismatch.is_transport_fault());
        assert!(!MewtocolError::plc_error(61).is_transport_fault());
    }

    #[test]
    fn test_io_is_fatal() {
        let err = MewtocolError::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(err.is_transport_fault());
    }

    #[test]
    fn test_shape_mismatch_display() {
        let err = MewtocolError::ShapeMismatch {
            expected: vec![2, 3],
            actual: vec![3, 2],
        };
        assert_eq!(
            err.to_string(),
            "Array shape mismatch: expected [2, 3], got [3, 2]"
        );
    }
}
