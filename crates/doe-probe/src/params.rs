//! Input checks run before any network I/O.

use doe_core::ScanError;

/// Reject empty hosts and port 0.
///
/// Ports above 65535 and negative timeouts cannot be represented by the
/// query types and are rejected when the envelope is decoded.
#[track_caller]
pub fn validate(host: &str, port: u16) -> Result<(), ScanError> {
    if host.trim().is_empty() {
        return Err(ScanError::query_config("host must not be empty"));
    }
    if port == 0 {
        return Err(ScanError::query_config("port must be in 1..=65535"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use doe_core::ErrorKind;

    #[test]
    fn test_validate() {
        assert!(validate("8.8.8.8", 53).is_ok());
        assert!(validate("dns.google.", 65535).is_ok());

        let err = validate("", 53).unwrap_err();
        assert_eq!(err.kind, ErrorKind::QueryConfig);
        assert!(err.critical);

        assert!(validate("  ", 53).is_err());
        assert_eq!(validate("8.8.8.8", 0).unwrap_err().kind, ErrorKind::QueryConfig);
    }
}
