use bytes::Bytes;
use resp_proto::{ParseError, Prefix, Reader, ServerError, Value};

/// One complete top-level reply, exactly as framed off the wire.
///
/// The bytes are split out of the transport's receive buffer, so a frame
/// owns its memory and can outlive the read that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    pub(crate) fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// A lazy reader over the frame.
    #[inline]
    pub fn reader(&self) -> Reader<'_> {
        Reader::new(&self.bytes)
    }

    /// Materialize the frame. Payloads are zero-copy slices of the frame
    /// unless the wire delivered them in chunks.
    pub fn to_value(&self) -> Result<Value, ParseError> {
        Value::parse_bytes(&self.bytes).map(|(value, _)| value)
    }

    /// Whether this is an out-of-band push message (attributes skipped).
    pub fn is_push(&self) -> bool {
        matches!(self.reader().prefix(), Ok(Prefix::Push))
    }

    /// The server error carried by this frame, if it is one.
    pub fn server_error(&self) -> Option<ServerError> {
        self.reader().server_error().ok().flatten()
    }

    /// The frame as a value, with a server error reply turned into
    /// [`Error::Server`](crate::Error::Server).
    pub fn into_value(self) -> Result<Value, crate::Error> {
        if let Some(err) = self.server_error() {
            return Err(crate::Error::Server(err));
        }
        Ok(self.to_value()?)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
