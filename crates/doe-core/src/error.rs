use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::Location;
use thiserror::Error;

/// Result type alias for envelope and decoding operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while building, encoding or decoding scan envelopes
#[derive(Error, Debug)]
pub enum CoreError {
    /// JSON encoding/decoding of an envelope failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A DNS name or message could not be built or parsed
    #[error("DNS error: {0}")]
    Dns(String),

    /// The envelope carried a different scan type than expected
    #[error("unexpected scan type: expected {expected}, found {found}")]
    UnexpectedType {
        /// Scan type the caller asked for
        expected: String,
        /// Scan type found in the envelope
        found: String,
    },

    /// A value failed validation
    #[error("invalid value: {0}")]
    Invalid(String),
}

impl From<hickory_proto::ProtoError> for CoreError {
    fn from(err: hickory_proto::ProtoError) -> Self {
        Self::Dns(err.to_string())
    }
}

/// Broad classification of a scan error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller violated the input contract (host empty, port out of range)
    QueryConfig,
    /// Network or protocol failure
    Query,
    /// TLS certificate verification failed
    Certificate,
    /// Generic scan-level failure (publishing, blocklist, storage)
    Scan,
    /// Uncategorized
    Unknown,
}

impl ErrorKind {
    /// Stable identifier used in logs and stored envelopes
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::QueryConfig => "query_config",
            Self::Query => "query",
            Self::Certificate => "certificate",
            Self::Scan => "scan",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Specific cause of a scan error, finer grained than [`ErrorKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCause {
    /// Input parameters rejected before any I/O
    InvalidParameter,
    /// Connection could not be dialed
    Dial,
    /// TLS/QUIC session could not be established
    Session,
    /// Stream read or write failed
    Stream,
    /// Operation did not complete within its timeout
    Timeout,
    /// No response arrived after all retries
    NoResponse,
    /// Response had the truncation bit set and no fallback was possible
    Truncated,
    /// DNS message could not be packed
    Pack,
    /// DNS message could not be unpacked
    Unpack,
    /// Stream closed without any payload
    EmptyResponse,
    /// HTTP exchange returned a non-success status
    HttpStatus,
    /// TLS certificate verification failed
    CertificateVerification,
    /// SVCB record is missing a required key or carries a malformed one
    SvcbRequiredKey,
    /// SVCB record carries an unrecognized key
    SvcbUnknownKey,
    /// Recognized SVCB key whose value could not be decoded
    SvcbCast,
    /// Redirection response carried no glue records
    NoGlueRecords,
    /// Resolver does not advertise the requested protocol
    ResolverDoesNotAdvertiseProtocol,
    /// Publishing a follow-up scan failed
    Producer,
    /// Host matched the blocklist
    Blocked,
    /// Anything else
    Other,
}

/// A taxonomized error attached to a scan envelope.
///
/// Errors are data: they are accumulated on the envelope and stored with it
/// so negative results survive. The `location` breadcrumb records the call
/// site that produced the error.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} error ({cause:?}) at {location}: {message}")]
pub struct ScanError {
    /// Broad classification
    pub kind: ErrorKind,
    /// Specific cause
    pub cause: ErrorCause,
    /// Whether the error makes the result unusable
    pub critical: bool,
    /// Call site that created the error
    pub location: String,
    /// Underlying error text
    pub message: String,
    /// Context appended by successive [`ScanError::add_info`] calls
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub additional_info: String,
}

impl ScanError {
    /// Create a new error, capturing the caller's location
    #[track_caller]
    pub fn new(
        kind: ErrorKind,
        cause: ErrorCause,
        critical: bool,
        message: impl fmt::Display,
    ) -> Self {
        let caller = Location::caller();
        Self {
            kind,
            cause,
            critical,
            location: format!("{}:{}", caller.file(), caller.line()),
            message: message.to_string(),
            additional_info: String::new(),
        }
    }

    /// Input contract violation (always critical)
    #[track_caller]
    pub fn query_config(message: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::QueryConfig,
            ErrorCause::InvalidParameter,
            true,
            message,
        )
    }

    /// Critical network or protocol failure
    #[track_caller]
    pub fn query(cause: ErrorCause, message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Query, cause, true, message)
    }

    /// TLS verification failure (critical for the attempt, triggers escalation)
    #[track_caller]
    pub fn certificate(message: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::Certificate,
            ErrorCause::CertificateVerification,
            true,
            message,
        )
    }

    /// Generic scan-level failure
    #[track_caller]
    pub fn scan(cause: ErrorCause, critical: bool, message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Scan, cause, critical, message)
    }

    /// The "no response after all retries" error
    #[track_caller]
    pub fn no_response(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Query, ErrorCause::NoResponse, true, message)
    }

    /// Mark this error as non-critical
    #[must_use]
    pub const fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    /// Append context to the error
    #[must_use]
    pub fn add_info(mut self, info: impl fmt::Display) -> Self {
        if !self.additional_info.is_empty() {
            self.additional_info.push_str("; ");
        }
        self.additional_info.push_str(&info.to_string());
        self
    }

    /// Returns true if this is the "no response" error
    #[must_use]
    pub fn is_no_response(&self) -> bool {
        self.cause == ErrorCause::NoResponse
    }

    /// Returns true if this error was caused by certificate verification
    #[must_use]
    pub fn is_certificate_error(&self) -> bool {
        self.kind == ErrorKind::Certificate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_breadcrumb() {
        let err = ScanError::query(ErrorCause::Dial, "connection refused");
        assert!(err.location.contains("error.rs"));
        assert!(err.critical);
        assert_eq!(err.kind, ErrorKind::Query);
    }

    #[test]
    fn test_add_info_accumulates() {
        let err = ScanError::no_response("nothing")
            .add_info("udp attempts=3")
            .add_info("tcp attempts=1");
        assert_eq!(err.additional_info, "udp attempts=3; tcp attempts=1");
        assert!(err.is_no_response());
    }

    #[test]
    fn test_non_critical() {
        let err = ScanError::scan(ErrorCause::Producer, true, "publish failed").non_critical();
        assert!(!err.critical);
    }

    #[test]
    fn test_serialization() {
        let err = ScanError::certificate("expired");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"kind\":\"certificate\""));
        assert!(!json.contains("additional_info"));
        let parsed: ScanError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
        assert!(parsed.is_certificate_error());
    }
}
