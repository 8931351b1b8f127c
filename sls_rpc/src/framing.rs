//! Payload framing at the invocation boundary.
//!
//! An invocation payload is a JSON string whose value is the base64 text of the
//! protocol bytes. Both directions use the same convention, and it has to stay
//! bit-for-bit compatible with peers written against the platform SDKs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::PayloadDecodeError;

/// Wraps raw protocol bytes into an invocation payload.
///
/// ```
/// assert_eq!(sls_rpc::framing::wrap_payload(b"1234"), "\"MTIzNA==\"");
/// ```
pub fn wrap_payload(bytes: &[u8]) -> String {
    serde_json::Value::String(STANDARD.encode(bytes)).to_string()
}

/// Unwraps an invocation payload into the raw protocol bytes it carries.
pub fn unwrap_payload(payload: &[u8]) -> Result<Vec<u8>, PayloadDecodeError> {
    let text: String = serde_json::from_slice(payload)
        .map_err(|e| PayloadDecodeError::new(payload, format!("invalid JSON string: {}", e)))?;
    STANDARD
        .decode(text.as_bytes())
        .map_err(|e| PayloadDecodeError::new(payload, format!("invalid base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_payload() {
        assert_eq!(wrap_payload(b""), "\"\"");
        assert_eq!(wrap_payload(&[0x80, 0x01, 0x00, 0x02]), "\"gAEAAg==\"");
    }

    #[test]
    fn test_unwrap_payload() {
        assert_eq!(unwrap_payload(b"\"MTIzNA==\"").unwrap(), b"1234");
        assert_eq!(unwrap_payload(b"\"\"").unwrap(), b"");
    }

    #[test]
    fn test_unwrap_not_json() {
        let e = unwrap_payload(b"MTIzNA==").unwrap_err();
        assert_eq!(e.payload, b"MTIzNA==");
    }

    #[test]
    fn test_unwrap_not_a_string() {
        let e = unwrap_payload(br#"{"errorMessage":"boom"}"#).unwrap_err();
        assert_eq!(e.payload, br#"{"errorMessage":"boom"}"#);
    }

    #[test]
    fn test_unwrap_not_base64() {
        let e = unwrap_payload(b"\"not base64!\"").unwrap_err();
        assert!(e.reason.starts_with("invalid base64"));
    }
}
