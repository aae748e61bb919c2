//! The one-byte type discriminator that starts every RESP value.

use crate::error::ParseError;

/// Wire discriminator for a RESP value.
///
/// The prefix alone decides whether a value carries a payload (scalar) or
/// child values (aggregate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prefix {
    /// `+OK\r\n`
    SimpleString,
    /// `-ERR message\r\n`
    SimpleError,
    /// `:1000\r\n`
    Integer,
    /// `$6\r\nfoobar\r\n`
    BulkString,
    /// `!<len>\r\n<error>\r\n`
    BulkError,
    /// `_\r\n`
    Null,
    /// `#t\r\n`
    Boolean,
    /// `,3.14\r\n`
    Double,
    /// `(12345678901234567890\r\n`
    BigNumber,
    /// `=<len>\r\ntxt:<data>\r\n`
    VerbatimString,
    /// `*<count>\r\n...`
    Array,
    /// `%<pairs>\r\n...`
    Map,
    /// `~<count>\r\n...`
    Set,
    /// `><count>\r\n...`
    Push,
    /// `|<pairs>\r\n...` followed by the annotated value.
    Attribute,
}

/// Marker for a chunk of a streamed scalar: `;<len>\r\n<bytes>\r\n`.
pub const STREAM_CHUNK: u8 = b';';

/// Marker that closes a streamed aggregate: `.\r\n`.
pub const STREAM_END: u8 = b'.';

/// Length/count placeholder for the streaming form: `$?\r\n`, `*?\r\n`.
pub const STREAMING_LENGTH: &[u8] = b"?";

impl Prefix {
    /// Decode a prefix byte.
    pub fn from_byte(b: u8) -> Result<Self, ParseError> {
        Ok(match b {
            b'+' => Prefix::SimpleString,
            b'-' => Prefix::SimpleError,
            b':' => Prefix::Integer,
            b'$' => Prefix::BulkString,
            b'!' => Prefix::BulkError,
            b'_' => Prefix::Null,
            b'#' => Prefix::Boolean,
            b',' => Prefix::Double,
            b'(' => Prefix::BigNumber,
            b'=' => Prefix::VerbatimString,
            b'*' => Prefix::Array,
            b'%' => Prefix::Map,
            b'~' => Prefix::Set,
            b'>' => Prefix::Push,
            b'|' => Prefix::Attribute,
            other => return Err(ParseError::InvalidPrefix(other)),
        })
    }

    /// The wire byte for this prefix.
    pub const fn as_byte(self) -> u8 {
        match self {
            Prefix::SimpleString => b'+',
            Prefix::SimpleError => b'-',
            Prefix::Integer => b':',
            Prefix::BulkString => b'$',
            Prefix::BulkError => b'!',
            Prefix::Null => b'_',
            Prefix::Boolean => b'#',
            Prefix::Double => b',',
            Prefix::BigNumber => b'(',
            Prefix::VerbatimString => b'=',
            Prefix::Array => b'*',
            Prefix::Map => b'%',
            Prefix::Set => b'~',
            Prefix::Push => b'>',
            Prefix::Attribute => b'|',
        }
    }

    /// True if the value has child values rather than a payload.
    #[inline]
    pub const fn is_aggregate(self) -> bool {
        matches!(
            self,
            Prefix::Array | Prefix::Map | Prefix::Set | Prefix::Push | Prefix::Attribute
        )
    }

    /// True if the value carries a single payload.
    #[inline]
    pub const fn is_scalar(self) -> bool {
        !self.is_aggregate()
    }

    /// True for scalars whose payload is length-prefixed (`$`, `!`, `=`).
    #[inline]
    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            Prefix::BulkString | Prefix::BulkError | Prefix::VerbatimString
        )
    }

    /// True for scalars whose payload is the rest of the header line.
    #[inline]
    pub const fn is_line(self) -> bool {
        self.is_scalar() && !self.is_blob()
    }

    /// True for `-` and `!`.
    #[inline]
    pub const fn is_error(self) -> bool {
        matches!(self, Prefix::SimpleError | Prefix::BulkError)
    }

    /// Children per declared unit of count (maps and attributes count pairs).
    #[inline]
    pub const fn arity(self) -> usize {
        match self {
            Prefix::Map | Prefix::Attribute => 2,
            _ => 1,
        }
    }

    /// Whether the streaming form (`?` length) is allowed for this prefix.
    #[inline]
    pub const fn allows_streaming(self) -> bool {
        matches!(
            self,
            Prefix::BulkString | Prefix::Array | Prefix::Map | Prefix::Set | Prefix::Push
        )
    }

    /// Whether a negative length/count is an accepted null (`$-1`, `*-1`).
    #[inline]
    pub const fn allows_null_length(self) -> bool {
        matches!(
            self,
            Prefix::BulkString | Prefix::Array | Prefix::Map | Prefix::Set
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Prefix; 15] = [
        Prefix::SimpleString,
        Prefix::SimpleError,
        Prefix::Integer,
        Prefix::BulkString,
        Prefix::BulkError,
        Prefix::Null,
        Prefix::Boolean,
        Prefix::Double,
        Prefix::BigNumber,
        Prefix::VerbatimString,
        Prefix::Array,
        Prefix::Map,
        Prefix::Set,
        Prefix::Push,
        Prefix::Attribute,
    ];

    #[test]
    fn test_byte_mapping() {
        for p in ALL {
            assert_eq!(Prefix::from_byte(p.as_byte()).unwrap(), p);
        }
        assert_eq!(Prefix::from_byte(b'x'), Err(ParseError::InvalidPrefix(b'x')));
        assert!(Prefix::from_byte(STREAM_CHUNK).is_err());
        assert!(Prefix::from_byte(STREAM_END).is_err());
    }

    #[test]
    fn test_partition() {
        let aggregates = ALL.iter().filter(|p| p.is_aggregate()).count();
        let scalars = ALL.iter().filter(|p| p.is_scalar()).count();
        assert_eq!(aggregates, 5);
        assert_eq!(scalars, 10);
        for p in ALL {
            assert_ne!(p.is_aggregate(), p.is_scalar());
            if p.is_scalar() {
                assert_ne!(p.is_blob(), p.is_line());
            }
        }
    }

    #[test]
    fn test_arity() {
        assert_eq!(Prefix::Map.arity(), 2);
        assert_eq!(Prefix::Attribute.arity(), 2);
        assert_eq!(Prefix::Array.arity(), 1);
        assert_eq!(Prefix::Push.arity(), 1);
    }
}
