//! Error types for RESP protocol decoding.

use bytes::Bytes;

use crate::prefix::Prefix;

/// Error type for RESP scanning and navigation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Need more data to complete parsing.
    /// This is not a fatal error - the caller should buffer more data and retry.
    #[error("incomplete data")]
    Incomplete,

    /// Invalid type prefix byte.
    #[error("invalid prefix byte: {0:#04x}")]
    InvalidPrefix(u8),

    /// Invalid integer format.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid bulk string length.
    #[error("invalid bulk string length")]
    InvalidLength,

    /// Protocol violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Collection size exceeds maximum allowed limit.
    #[error("collection too large: {0} elements exceeds limit")]
    CollectionTooLarge(usize),

    /// Nesting depth exceeds maximum allowed limit.
    #[error("nesting too deep: depth {0} exceeds limit")]
    NestingTooDeep(usize),

    /// Bulk string exceeds maximum allowed size.
    #[error("bulk string too long: {len} bytes exceeds {max} byte limit")]
    BulkStringTooLong { len: usize, max: usize },

    /// Invalid floating point number.
    #[error("invalid double: {0}")]
    InvalidDouble(String),

    /// Invalid boolean value.
    #[error("invalid boolean: expected 't' or 'f'")]
    InvalidBoolean,

    /// Invalid verbatim string format.
    #[error("invalid verbatim string format")]
    InvalidVerbatimFormat,

    /// A scalar operation was attempted on an aggregate or vice versa.
    #[error("wrong type: expected {expected}, found {found:?}")]
    WrongType {
        expected: &'static str,
        found: Prefix,
    },

    /// The caller-supplied buffer cannot hold the payload.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

impl ParseError {
    /// Returns true if this error indicates more data is needed.
    #[inline]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::Incomplete)
    }

    pub(crate) fn wrong_type(expected: &'static str, found: Prefix) -> Self {
        ParseError::WrongType { expected, found }
    }
}

/// An error reply sent by the server (`-ERR ...` or `!<len>\r\n...`).
///
/// This is a well-formed value, not a protocol failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    message: Bytes,
    bulk: bool,
}

impl ServerError {
    pub fn new(message: Bytes, bulk: bool) -> Self {
        Self { message, bulk }
    }

    /// Raw message bytes as sent by the server.
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// True if this came from a bulk error (`!`) rather than a simple error.
    pub fn is_bulk(&self) -> bool {
        self.bulk
    }

    /// The leading error code, e.g. `ERR` or `WRONGTYPE`.
    pub fn kind(&self) -> &str {
        let end = self
            .message
            .iter()
            .position(|&b| b == b' ')
            .unwrap_or(self.message.len());
        let code = &self.message[..end];
        if !code.is_empty() && code.iter().all(|b| b.is_ascii_uppercase()) {
            // all ASCII, so this cannot fail
            std::str::from_utf8(code).unwrap_or("")
        } else {
            ""
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.message))
    }
}

impl std::error::Error for ServerError {}

/// Error from the convenience read path: either the bytes were bad, or the
/// server answered with an error value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("server error: {0}")]
    Server(#[from] ServerError),
}

impl ReadError {
    /// Returns the server error, if that is what this is.
    pub fn as_server(&self) -> Option<&ServerError> {
        match self {
            ReadError::Server(e) => Some(e),
            ReadError::Parse(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_incomplete() {
        assert!(ParseError::Incomplete.is_incomplete());
        assert!(!ParseError::InvalidPrefix(0x00).is_incomplete());
        assert!(!ParseError::InvalidInteger("test".to_string()).is_incomplete());
        assert!(!ParseError::InvalidLength.is_incomplete());
        assert!(!ParseError::Protocol("test".to_string()).is_incomplete());
        assert!(!ParseError::CollectionTooLarge(100).is_incomplete());
        assert!(!ParseError::BulkStringTooLong { len: 100, max: 50 }.is_incomplete());
        assert!(!ParseError::wrong_type("scalar", Prefix::Array).is_incomplete());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", ParseError::Incomplete), "incomplete data");
        assert_eq!(
            format!("{}", ParseError::InvalidPrefix(0x42)),
            "invalid prefix byte: 0x42"
        );
        assert_eq!(
            format!("{}", ParseError::InvalidInteger("bad".to_string())),
            "invalid integer: bad"
        );
        assert_eq!(
            format!("{}", ParseError::Protocol("error".to_string())),
            "protocol error: error"
        );
        assert_eq!(
            format!("{}", ParseError::CollectionTooLarge(999999)),
            "collection too large: 999999 elements exceeds limit"
        );
        assert_eq!(
            format!("{}", ParseError::wrong_type("scalar", Prefix::Map)),
            "wrong type: expected scalar, found Map"
        );
    }

    #[test]
    fn test_server_error_kind() {
        let err = ServerError::new(Bytes::from_static(b"WRONGTYPE Operation against a key"), false);
        assert_eq!(err.kind(), "WRONGTYPE");
        assert!(!err.is_bulk());
        assert_eq!(err.to_string(), "WRONGTYPE Operation against a key");

        let err = ServerError::new(Bytes::from_static(b"oops lowercase"), true);
        assert_eq!(err.kind(), "");
        assert!(err.is_bulk());
    }

    #[test]
    fn test_read_error_distinguishes_server() {
        let server: ReadError = ServerError::new(Bytes::from_static(b"ERR x"), false).into();
        assert!(server.as_server().is_some());
        let parse: ReadError = ParseError::InvalidLength.into();
        assert!(parse.as_server().is_none());
        assert_eq!(server.to_string(), "server error: ERR x");
    }
}
