//! Owned RESP value tree.
//!
//! [`Value`] is the eager counterpart of [`Reader`](crate::Reader): every
//! payload is materialized and every aggregate is collected. Parsing goes
//! through the resumable scanner first, so a `Value` is only ever built from
//! a frame that is known to be complete and within the configured limits.
//!
//! Streaming forms collapse into their fixed counterparts: a chunked bulk
//! string becomes one `BulkString`, a streamed array an `Array`.

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ParseError;
use crate::reader::Reader;
use crate::scan::{ParseOptions, frame_len};

/// A RESP2 or RESP3 value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `+OK\r\n`
    SimpleString(Bytes),
    /// `-ERR message\r\n`
    Error(Bytes),
    /// `:1000\r\n`
    Integer(i64),
    /// `$6\r\nfoobar\r\n`
    BulkString(Bytes),
    /// `_\r\n`, `$-1\r\n` or `*-1\r\n`. Encoded in the RESP2 form.
    Null,
    /// `*2\r\n...`
    Array(Vec<Value>),
    /// `#t\r\n` or `#f\r\n`
    Boolean(bool),
    /// `,3.14159\r\n`
    Double(f64),
    /// `(12345678901234567890\r\n`, kept as the decimal text.
    BigNumber(Bytes),
    /// `!<len>\r\n<error>\r\n`
    BulkError(Bytes),
    /// `=<len>\r\ntxt:<data>\r\n`
    VerbatimString {
        /// 3-byte format identifier (e.g. `txt`, `mkd`)
        format: [u8; 3],
        data: Bytes,
    },
    /// `%<pairs>\r\n<key><val>...`
    Map(Vec<(Value, Value)>),
    /// `~<len>\r\n<elem>...`
    Set(Vec<Value>),
    /// `><len>\r\n<elem>...`, sent by the server without a request.
    Push(Vec<Value>),
    /// `|<pairs>\r\n<attrs>...<value>`
    Attribute {
        attrs: Vec<(Value, Value)>,
        /// The value the attributes annotate.
        value: Box<Value>,
    },
}

impl Value {
    // ========================================================================
    // Constructors
    // ========================================================================

    pub fn simple_string(s: &[u8]) -> Self {
        Value::SimpleString(Bytes::copy_from_slice(s))
    }

    pub fn error(msg: &[u8]) -> Self {
        Value::Error(Bytes::copy_from_slice(msg))
    }

    pub fn integer(n: i64) -> Self {
        Value::Integer(n)
    }

    pub fn bulk_string(data: &[u8]) -> Self {
        Value::BulkString(Bytes::copy_from_slice(data))
    }

    pub fn null() -> Self {
        Value::Null
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(elements)
    }

    pub fn boolean(b: bool) -> Self {
        Value::Boolean(b)
    }

    pub fn double(d: f64) -> Self {
        Value::Double(d)
    }

    pub fn big_number(num: &[u8]) -> Self {
        Value::BigNumber(Bytes::copy_from_slice(num))
    }

    pub fn bulk_error(msg: &[u8]) -> Self {
        Value::BulkError(Bytes::copy_from_slice(msg))
    }

    pub fn verbatim_string(format: [u8; 3], data: &[u8]) -> Self {
        Value::VerbatimString {
            format,
            data: Bytes::copy_from_slice(data),
        }
    }

    pub fn map(entries: Vec<(Value, Value)>) -> Self {
        Value::Map(entries)
    }

    pub fn set(elements: Vec<Value>) -> Self {
        Value::Set(elements)
    }

    pub fn push(elements: Vec<Value>) -> Self {
        Value::Push(elements)
    }

    pub fn attribute(attrs: Vec<(Value, Value)>, value: Value) -> Self {
        Value::Attribute {
            attrs,
            value: Box::new(value),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for simple and bulk errors.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_) | Value::BulkError(_))
    }

    #[inline]
    pub fn is_push(&self) -> bool {
        matches!(self, Value::Push(_))
    }

    /// The value with any attribute wrapper removed.
    pub fn unwrap_attributes(&self) -> &Value {
        match self {
            Value::Attribute { value, .. } => value.unwrap_attributes(),
            other => other,
        }
    }

    /// Payload of any string-like value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::SimpleString(b)
            | Value::BulkString(b)
            | Value::Error(b)
            | Value::BulkError(b)
            | Value::BigNumber(b) => Some(b),
            Value::VerbatimString { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Elements of an array, set or push.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) | Value::Set(v) | Value::Push(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    // ========================================================================
    // Parsing
    // ========================================================================

    /// Parse one value from the front of `data`.
    ///
    /// Returns the value and the number of bytes consumed, or
    /// `ParseError::Incomplete` if `data` ends before the value does.
    #[inline]
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParseError> {
        Self::parse_with_options(data, &ParseOptions::default())
    }

    /// Parse with custom limits.
    pub fn parse_with_options(
        data: &[u8],
        options: &ParseOptions,
    ) -> Result<(Self, usize), ParseError> {
        let n = frame_len(data, options)?;
        let value = Reader::new(&data[..n])
            .with_options(*options)
            .to_value()?;
        Ok((value, n))
    }

    /// Parse zero-copy: payloads that are stored contiguously in `data` are
    /// returned as slices of it.
    #[inline]
    pub fn parse_bytes(data: &Bytes) -> Result<(Self, usize), ParseError> {
        Self::parse_bytes_with_options(data, &ParseOptions::default())
    }

    pub fn parse_bytes_with_options(
        data: &Bytes,
        options: &ParseOptions,
    ) -> Result<(Self, usize), ParseError> {
        let n = frame_len(data, options)?;
        let make = |payload: Cow<'_, [u8]>| match payload {
            Cow::Borrowed(slice) => data.slice_ref(slice),
            Cow::Owned(vec) => Bytes::from(vec),
        };
        let value = Reader::new(&data[..n])
            .with_options(*options)
            .to_value_with(&make)?;
        Ok((value, n))
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Encode into `buf`, returning the number of bytes written.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is too small. Use `encoded_len()` to size it.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        let available = buf.len();
        let mut dst = buf;
        self.put(&mut dst);
        available - dst.len()
    }

    /// Append the encoding to `dst`.
    pub fn encode_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        self.put(dst);
    }

    fn put<B: BufMut>(&self, out: &mut B) {
        match self {
            Value::SimpleString(s) => put_line(out, b'+', s),
            Value::Error(msg) => put_line(out, b'-', msg),
            Value::Integer(n) => {
                let mut fmt = itoa::Buffer::new();
                put_line(out, b':', fmt.format(*n).as_bytes());
            }
            Value::BulkString(data) => put_blob(out, b'$', None, data),
            Value::Null => out.put_slice(b"$-1\r\n"),
            Value::Array(elements) => {
                put_header(out, b'*', elements.len());
                elements.iter().for_each(|e| e.put(out));
            }
            Value::Boolean(b) => out.put_slice(if *b { b"#t\r\n" } else { b"#f\r\n" }),
            Value::Double(d) => {
                let mut fmt = ryu::Buffer::new();
                put_line(out, b',', format_double(&mut fmt, *d));
            }
            Value::BigNumber(n) => put_line(out, b'(', n),
            Value::BulkError(msg) => put_blob(out, b'!', None, msg),
            Value::VerbatimString { format, data } => put_blob(out, b'=', Some(format), data),
            Value::Map(entries) => {
                put_header(out, b'%', entries.len());
                for (k, v) in entries {
                    k.put(out);
                    v.put(out);
                }
            }
            Value::Set(elements) => {
                put_header(out, b'~', elements.len());
                elements.iter().for_each(|e| e.put(out));
            }
            Value::Push(elements) => {
                put_header(out, b'>', elements.len());
                elements.iter().for_each(|e| e.put(out));
            }
            Value::Attribute { attrs, value } => {
                put_header(out, b'|', attrs.len());
                for (k, v) in attrs {
                    k.put(out);
                    v.put(out);
                }
                value.put(out);
            }
        }
    }

    /// Exact length of [`encode`](Self::encode) output.
    pub fn encoded_len(&self) -> usize {
        match self {
            Value::SimpleString(s) | Value::Error(s) | Value::BigNumber(s) => s.len() + 3,
            Value::Integer(n) => itoa::Buffer::new().format(*n).len() + 3,
            Value::BulkString(data) | Value::BulkError(data) => blob_len(data.len()),
            Value::VerbatimString { data, .. } => blob_len(data.len() + 4),
            Value::Null => 5,
            Value::Boolean(_) => 4,
            Value::Double(d) => format_double(&mut ryu::Buffer::new(), *d).len() + 3,
            Value::Array(elements) | Value::Set(elements) | Value::Push(elements) => {
                header_len(elements.len())
                    + elements.iter().map(Value::encoded_len).sum::<usize>()
            }
            Value::Map(entries) => header_len(entries.len()) + pairs_len(entries),
            Value::Attribute { attrs, value } => {
                header_len(attrs.len()) + pairs_len(attrs) + value.encoded_len()
            }
        }
    }
}

// ============================================================================
// Encoding helpers
// ============================================================================

fn format_double(fmt: &mut ryu::Buffer, d: f64) -> &[u8] {
    if d.is_nan() {
        b"nan"
    } else if d.is_infinite() {
        if d.is_sign_positive() { b"inf" } else { b"-inf" }
    } else {
        fmt.format_finite(d).as_bytes()
    }
}

#[inline]
fn header_len(count: usize) -> usize {
    itoa::Buffer::new().format(count).len() + 3
}

#[inline]
fn blob_len(len: usize) -> usize {
    header_len(len) + len + 2
}

fn pairs_len(pairs: &[(Value, Value)]) -> usize {
    pairs
        .iter()
        .map(|(k, v)| k.encoded_len() + v.encoded_len())
        .sum()
}

fn put_line<B: BufMut>(out: &mut B, prefix: u8, body: &[u8]) {
    out.put_u8(prefix);
    out.put_slice(body);
    out.put_slice(b"\r\n");
}

fn put_header<B: BufMut>(out: &mut B, prefix: u8, count: usize) {
    let mut fmt = itoa::Buffer::new();
    put_line(out, prefix, fmt.format(count).as_bytes());
}

fn put_blob<B: BufMut>(out: &mut B, prefix: u8, format: Option<&[u8; 3]>, data: &[u8]) {
    match format {
        Some(tag) => {
            put_header(out, prefix, data.len() + 4);
            out.put_slice(tag);
            out.put_u8(b':');
        }
        None => put_header(out, prefix, data.len()),
    }
    out.put_slice(data);
    out.put_slice(b"\r\n");
}

// ============================================================================
// Common replies
// ============================================================================

impl Value {
    pub const OK: &'static [u8] = b"+OK\r\n";
    pub const PONG: &'static [u8] = b"+PONG\r\n";
    pub const NULL_BULK: &'static [u8] = b"$-1\r\n";
    pub const RESP3_NULL: &'static [u8] = b"_\r\n";
    pub const EMPTY_ARRAY: &'static [u8] = b"*0\r\n";
}
