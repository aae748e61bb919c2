//! Lazy, navigable view over one framed RESP value.
//!
//! A [`Reader`] does not decode anything up front. It looks at the bytes only
//! when asked a question (what is the prefix, how long is the payload, what
//! is the next child) and reads no further than the answer requires. Fixed
//! and streaming shapes answer the same questions, so a caller reading a
//! bulk string does not care whether the server sent it as `$5` or as a
//! sequence of `;` chunks.
//!
//! Readers borrow the frame bytes and cannot outlive them.
//!
//! ```
//! use resp_proto::Reader;
//!
//! let reader = Reader::new(b"*3\r\n:1\r\n:2\r\n:3\r\n");
//! assert_eq!(reader.count().unwrap(), Some(3));
//!
//! let mut sum = 0;
//! let mut children = reader.children().unwrap();
//! while let Some(child) = children.next_child().unwrap() {
//!     sum += child.read_i64().unwrap();
//! }
//! assert_eq!(sum, 6);
//! ```

use std::borrow::Cow;

use bytes::Bytes;

use crate::cursor::Cursor;
use crate::error::{ParseError, ReadError, ServerError};
use crate::prefix::{Prefix, STREAM_CHUNK, STREAM_END, STREAMING_LENGTH};
use crate::scan::{
    ParseOptions, Scan, ScanState, parse_boolean, parse_double, parse_integer, parse_length,
};
use crate::value::Value;

/// What an attribute callback did with one key/value pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeAction {
    /// The pair was recognized and consumed.
    Handled,
    /// The pair is not interesting to this caller.
    PassThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Length {
    Null,
    Streaming,
    Known(usize),
}

/// A view positioned at the start of one value.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    cursor: Cursor<'a>,
    options: ParseOptions,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::from_cursor(Cursor::new(data))
    }

    pub fn from_cursor(cursor: Cursor<'a>) -> Self {
        Self {
            cursor,
            options: ParseOptions::default(),
        }
    }

    /// Use `options` for nested skips and depth checks.
    pub fn with_options(mut self, options: ParseOptions) -> Self {
        self.options = options;
        self
    }

    /// The cursor at the start of this value, attributes included.
    pub fn cursor(&self) -> Cursor<'a> {
        self.cursor
    }

    /// Prefix of the first unit, which may be an attribute.
    pub fn raw_prefix(&self) -> Result<Prefix, ParseError> {
        Prefix::from_byte(self.cursor.peek().ok_or(ParseError::Incomplete)?)
    }

    /// Prefix of the value itself, after any attributes.
    pub fn prefix(&self) -> Result<Prefix, ParseError> {
        let cursor = self.value_cursor()?;
        Prefix::from_byte(cursor.peek().ok_or(ParseError::Incomplete)?)
    }

    /// Step past any leading attributes without looking at them.
    pub fn skip_attributes(&mut self) -> Result<(), ParseError> {
        self.cursor = self.value_cursor()?;
        Ok(())
    }

    /// Offer each leading attribute pair to `f`, then step past the
    /// attributes. Returns how many pairs `f` handled.
    pub fn with_attributes<F>(&mut self, mut f: F) -> Result<usize, ParseError>
    where
        F: FnMut(&Reader<'a>, &Reader<'a>) -> Result<AttributeAction, ParseError>,
    {
        let mut handled = 0;
        while self.cursor.peek() == Some(Prefix::Attribute.as_byte()) {
            let mut pairs = Children::open(self.cursor, self.options)?;
            while let Some((key, value)) = pairs.next_pair()? {
                if f(&key, &value)? == AttributeAction::Handled {
                    handled += 1;
                }
            }
            self.cursor = pairs.finish()?;
        }
        Ok(handled)
    }

    fn value_cursor(&self) -> Result<Cursor<'a>, ParseError> {
        let mut cursor = self.cursor;
        while cursor.peek() == Some(Prefix::Attribute.as_byte()) {
            cursor = Children::open(cursor, self.options)?.finish()?;
        }
        Ok(cursor)
    }

    fn header(&self) -> Result<(Prefix, Cow<'a, [u8]>, Cursor<'a>), ParseError> {
        let mut cursor = self.value_cursor()?;
        let (prefix, body) = read_header(&mut cursor)?;
        Ok((prefix, body, cursor))
    }

    /// True for `_`, `$-1` and `*-1` (and the other null lengths). An empty
    /// string or empty aggregate is not null.
    pub fn is_null(&self) -> Result<bool, ParseError> {
        let (prefix, body, _) = self.header()?;
        Ok(match prefix {
            Prefix::Null => true,
            p if p.is_blob() || p.is_aggregate() => parse_len(p, &body)? == Length::Null,
            _ => false,
        })
    }

    /// True for simple and bulk errors.
    pub fn is_error(&self) -> Result<bool, ParseError> {
        Ok(self.prefix()?.is_error())
    }

    pub fn is_aggregate(&self) -> Result<bool, ParseError> {
        Ok(self.prefix()?.is_aggregate())
    }

    /// True if the length or count was not declared up front.
    pub fn is_streaming(&self) -> Result<bool, ParseError> {
        let (prefix, body, _) = self.header()?;
        if prefix.is_blob() || prefix.is_aggregate() {
            return Ok(parse_len(prefix, &body)? == Length::Streaming);
        }
        Ok(false)
    }

    /// Payload view. Fails with `WrongType` on an aggregate.
    pub fn scalar(&self) -> Result<Scalar<'a>, ParseError> {
        let (prefix, body, mut cursor) = self.header()?;
        if prefix.is_aggregate() {
            return Err(ParseError::wrong_type("scalar", prefix));
        }
        let mut format = None;
        let payload = match prefix {
            Prefix::Null => Payload::Null,
            p if p.is_line() => Payload::Line(body),
            p => match parse_len(p, &body)? {
                Length::Null => Payload::Null,
                Length::Streaming => Payload::Chunked(cursor),
                Length::Known(len) => {
                    if cursor.remaining() < len + 2 {
                        return Err(ParseError::Incomplete);
                    }
                    let mut len = len;
                    if p == Prefix::VerbatimString {
                        if len < 4 || cursor.byte_at(3) != Some(b':') {
                            return Err(ParseError::InvalidVerbatimFormat);
                        }
                        let mut tag = [0u8; 3];
                        cursor.copy_to(&mut tag);
                        cursor.advance(1);
                        format = Some(tag);
                        len -= 4;
                    }
                    Payload::Fixed { cursor, len }
                }
            },
        };
        Ok(Scalar {
            prefix,
            payload,
            format,
        })
    }

    /// Child iterator. Fails with `WrongType` on a scalar.
    pub fn children(&self) -> Result<Children<'a>, ParseError> {
        Children::open(self.value_cursor()?, self.options)
    }

    /// Declared logical element count (maps count keys and values).
    ///
    /// `None` for a streaming or null aggregate.
    pub fn count(&self) -> Result<Option<usize>, ParseError> {
        let (prefix, body, _) = self.header()?;
        if !prefix.is_aggregate() {
            return Err(ParseError::wrong_type("aggregate", prefix));
        }
        Ok(match parse_len(prefix, &body)? {
            Length::Known(n) => Some(n * prefix.arity()),
            Length::Null | Length::Streaming => None,
        })
    }

    /// True if the aggregate has exactly `n` logical children.
    ///
    /// A streaming aggregate is walked, but never past the header of child
    /// `n + 1`.
    pub fn has_count(&self, n: usize) -> Result<bool, ParseError> {
        if let Some(count) = self.count()? {
            return Ok(count == n);
        }
        if self.is_null()? {
            return Ok(false);
        }
        let mut children = self.children()?;
        for _ in 0..n {
            if children.next_child()?.is_none() {
                return Ok(false);
            }
        }
        Ok(children.next_child()?.is_none())
    }

    /// Byte length of the whole value, attributes included.
    pub fn skip(&self) -> Result<usize, ParseError> {
        let mut cursor = self.cursor;
        skip_value(&mut cursor, &self.options)?;
        Ok(cursor.position() - self.cursor.position())
    }

    /// Careful path: the server error this value carries, if it is one.
    pub fn server_error(&self) -> Result<Option<ServerError>, ParseError> {
        let scalar = match self.prefix()? {
            p if p.is_error() => self.scalar()?,
            _ => return Ok(None),
        };
        let message = Bytes::copy_from_slice(&scalar.to_bytes()?);
        Ok(Some(ServerError::new(
            message,
            scalar.prefix() == Prefix::BulkError,
        )))
    }

    fn check_server_error(&self) -> Result<(), ReadError> {
        match self.server_error()? {
            Some(err) => Err(ReadError::Server(err)),
            None => Ok(()),
        }
    }

    /// Payload bytes, `None` for null. Error values are raised.
    pub fn read_bytes(&self) -> Result<Option<Cow<'a, [u8]>>, ReadError> {
        self.check_server_error()?;
        let scalar = self.scalar()?;
        if scalar.is_null() {
            return Ok(None);
        }
        Ok(Some(scalar.to_bytes()?))
    }

    /// Payload as UTF-8, `None` for null. Error values are raised.
    pub fn read_str(&self) -> Result<Option<Cow<'a, str>>, ReadError> {
        self.check_server_error()?;
        let scalar = self.scalar()?;
        if scalar.is_null() {
            return Ok(None);
        }
        Ok(Some(scalar.to_str()?))
    }

    pub fn read_i64(&self) -> Result<i64, ReadError> {
        self.check_server_error()?;
        Ok(self.scalar()?.parse_i64()?)
    }

    pub fn read_f64(&self) -> Result<f64, ReadError> {
        self.check_server_error()?;
        Ok(self.scalar()?.parse_f64()?)
    }

    pub fn read_bool(&self) -> Result<bool, ReadError> {
        self.check_server_error()?;
        Ok(self.scalar()?.parse_bool()?)
    }

    /// Succeeds on any non-error reply.
    pub fn read_ok(&self) -> Result<(), ReadError> {
        self.check_server_error()
    }

    /// Materialize an owned [`Value`], copying payloads.
    pub fn to_value(&self) -> Result<Value, ParseError> {
        self.to_value_with(&|bytes: Cow<'a, [u8]>| Bytes::copy_from_slice(&bytes))
    }

    /// Materialize an owned [`Value`], letting `make` turn each payload into
    /// `Bytes` (for example by slicing a shared frame buffer).
    pub fn to_value_with<F>(&self, make: &F) -> Result<Value, ParseError>
    where
        F: Fn(Cow<'a, [u8]>) -> Bytes,
    {
        self.build(make, 0)
    }

    fn build<F>(&self, make: &F, depth: usize) -> Result<Value, ParseError>
    where
        F: Fn(Cow<'a, [u8]>) -> Bytes,
    {
        if depth > self.options.max_depth {
            return Err(ParseError::NestingTooDeep(depth));
        }
        let prefix = self.raw_prefix()?;
        if prefix.is_scalar() {
            return scalar_value(self.scalar()?, make);
        }
        if prefix == Prefix::Attribute {
            return self.build_annotated(make, depth);
        }
        if self.is_null()? {
            return Ok(Value::Null);
        }

        let mut children = Children::open(self.cursor, self.options)?;
        match prefix {
            Prefix::Map => {
                let mut entries = Vec::with_capacity(children.capacity_hint());
                while let Some((k, v)) = children.next_pair()? {
                    entries.push((k.build(make, depth + 1)?, v.build(make, depth + 1)?));
                }
                Ok(Value::Map(entries))
            }
            _ => {
                let mut elements = Vec::with_capacity(children.capacity_hint());
                while let Some(child) = children.next_child()? {
                    elements.push(child.build(make, depth + 1)?);
                }
                Ok(match prefix {
                    Prefix::Set => Value::Set(elements),
                    Prefix::Push => Value::Push(elements),
                    _ => Value::Array(elements),
                })
            }
        }
    }

    // Attributes chain without bound on the wire, so walk them in a loop and
    // wrap the annotated value from the inside out.
    fn build_annotated<F>(&self, make: &F, depth: usize) -> Result<Value, ParseError>
    where
        F: Fn(Cow<'a, [u8]>) -> Bytes,
    {
        let mut layers = Vec::new();
        let mut cursor = self.cursor;
        while cursor.peek() == Some(Prefix::Attribute.as_byte()) {
            let level = depth + layers.len();
            if level > self.options.max_depth {
                return Err(ParseError::NestingTooDeep(level));
            }
            let mut pairs = Children::open(cursor, self.options)?;
            let mut attrs = Vec::new();
            while let Some((k, v)) = pairs.next_pair()? {
                attrs.push((k.build(make, level + 1)?, v.build(make, level + 1)?));
            }
            layers.push(attrs);
            cursor = pairs.finish()?;
        }

        let inner = Reader {
            cursor,
            options: self.options,
        };
        let mut value = inner.build(make, depth + layers.len())?;
        while let Some(attrs) = layers.pop() {
            value = Value::Attribute {
                attrs,
                value: Box::new(value),
            };
        }
        Ok(value)
    }
}

fn scalar_value<'a, F>(scalar: Scalar<'a>, make: &F) -> Result<Value, ParseError>
where
    F: Fn(Cow<'a, [u8]>) -> Bytes,
{
    if scalar.is_null() {
        return Ok(Value::Null);
    }
    Ok(match scalar.prefix() {
        Prefix::SimpleString => Value::SimpleString(make(scalar.to_bytes()?)),
        Prefix::SimpleError => Value::Error(make(scalar.to_bytes()?)),
        Prefix::Integer => Value::Integer(scalar.parse_i64()?),
        Prefix::Boolean => Value::Boolean(scalar.parse_bool()?),
        Prefix::Double => Value::Double(scalar.parse_f64()?),
        Prefix::BigNumber => Value::BigNumber(make(scalar.to_bytes()?)),
        Prefix::BulkError => Value::BulkError(make(scalar.to_bytes()?)),
        Prefix::VerbatimString => Value::VerbatimString {
            format: scalar.format().unwrap_or(*b"txt"),
            data: make(scalar.to_bytes()?),
        },
        Prefix::BulkString => Value::BulkString(make(scalar.to_bytes()?)),
        other => return Err(ParseError::wrong_type("scalar", other)),
    })
}

// ============================================================================
// Scalars
// ============================================================================

#[derive(Debug, Clone)]
enum Payload<'a> {
    Null,
    Line(Cow<'a, [u8]>),
    Fixed { cursor: Cursor<'a>, len: usize },
    /// Positioned at the first `;` chunk header.
    Chunked(Cursor<'a>),
}

/// Shape-independent access to one scalar payload.
#[derive(Debug, Clone)]
pub struct Scalar<'a> {
    prefix: Prefix,
    payload: Payload<'a>,
    format: Option<[u8; 3]>,
}

impl<'a> Scalar<'a> {
    pub fn prefix(&self) -> Prefix {
        self.prefix
    }

    /// True for a null scalar. Null payloads read as empty, so check this
    /// first when null and empty mean different things.
    pub fn is_null(&self) -> bool {
        matches!(self.payload, Payload::Null)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.payload, Payload::Chunked(_))
    }

    /// The 3-byte encoding tag of a verbatim string (e.g. `txt`).
    pub fn format(&self) -> Option<[u8; 3]> {
        self.format
    }

    /// Total payload length. Walks every chunk header of a streamed payload.
    pub fn len(&self) -> Result<usize, ParseError> {
        match &self.payload {
            Payload::Null => Ok(0),
            Payload::Line(line) => Ok(line.len()),
            Payload::Fixed { len, .. } => Ok(*len),
            Payload::Chunked(start) => {
                let mut cursor = *start;
                let mut total = 0;
                while let Some(len) = next_chunk_header(&mut cursor)? {
                    skip_chunk_body(&mut cursor, len)?;
                    total += len;
                }
                Ok(total)
            }
        }
    }

    pub fn is_empty(&self) -> Result<bool, ParseError> {
        self.is_len(0)
    }

    /// True if the payload is exactly `n` bytes.
    ///
    /// A streamed payload stops as soon as the running total passes `n`,
    /// so at most `n + 1` chunks are examined.
    pub fn is_len(&self, n: usize) -> Result<bool, ParseError> {
        let Payload::Chunked(start) = &self.payload else {
            return Ok(self.len()? == n);
        };
        let mut cursor = *start;
        let mut total = 0;
        while let Some(len) = next_chunk_header(&mut cursor)? {
            total += len;
            if total > n {
                return Ok(false);
            }
            skip_chunk_body(&mut cursor, len)?;
        }
        Ok(total == n)
    }

    /// The payload as one borrowed slice, if it is stored contiguously.
    pub fn try_span(&self) -> Option<&'a [u8]> {
        match &self.payload {
            Payload::Line(Cow::Borrowed(line)) => Some(*line),
            Payload::Fixed { cursor, len } => cursor.span(*len),
            _ => None,
        }
    }

    /// Copy the payload into `buf`, returning the number of bytes written.
    pub fn copy_to(&self, buf: &mut [u8]) -> Result<usize, ParseError> {
        let needed = self.len()?;
        if needed > buf.len() {
            return Err(ParseError::BufferTooSmall {
                needed,
                available: buf.len(),
            });
        }
        match &self.payload {
            Payload::Null => {}
            Payload::Line(line) => buf[..needed].copy_from_slice(line),
            Payload::Fixed { cursor, len } => {
                let mut cursor = *cursor;
                cursor.copy_to(&mut buf[..*len]);
            }
            Payload::Chunked(start) => {
                let mut cursor = *start;
                let mut filled = 0;
                while let Some(len) = next_chunk_header(&mut cursor)? {
                    cursor.copy_to(&mut buf[filled..filled + len]);
                    expect_crlf(&mut cursor)?;
                    filled += len;
                }
            }
        }
        Ok(needed)
    }

    /// The payload, borrowed when contiguous.
    pub fn to_bytes(&self) -> Result<Cow<'a, [u8]>, ParseError> {
        match &self.payload {
            Payload::Null => Ok(Cow::Borrowed(&[])),
            Payload::Line(line) => Ok(line.clone()),
            Payload::Fixed { cursor, len } => {
                let mut cursor = *cursor;
                cursor.read_exact(*len).ok_or(ParseError::Incomplete)
            }
            Payload::Chunked(start) => {
                let mut cursor = *start;
                let mut out = Vec::new();
                while let Some(len) = next_chunk_header(&mut cursor)? {
                    let chunk = cursor.read_exact(len).ok_or(ParseError::Incomplete)?;
                    expect_crlf(&mut cursor)?;
                    out.extend_from_slice(&chunk);
                }
                Ok(Cow::Owned(out))
            }
        }
    }

    /// Compare against `literal`, stopping at the first difference.
    pub fn eq_literal(&self, literal: &[u8]) -> Result<bool, ParseError> {
        let Payload::Chunked(start) = &self.payload else {
            if let Some(span) = self.try_span() {
                return Ok(span == literal);
            }
            if !self.is_len(literal.len())? {
                return Ok(false);
            }
            return Ok(*self.to_bytes()? == *literal);
        };
        let mut cursor = *start;
        let mut matched = 0;
        while let Some(len) = next_chunk_header(&mut cursor)? {
            if matched + len > literal.len() {
                return Ok(false);
            }
            let chunk = cursor.read_exact(len).ok_or(ParseError::Incomplete)?;
            if *chunk != literal[matched..matched + len] {
                return Ok(false);
            }
            expect_crlf(&mut cursor)?;
            matched += len;
        }
        Ok(matched == literal.len())
    }

    pub fn to_str(&self) -> Result<Cow<'a, str>, ParseError> {
        let invalid = |e: std::str::Utf8Error| ParseError::Protocol(format!("invalid utf-8: {e}"));
        match self.to_bytes()? {
            Cow::Borrowed(b) => std::str::from_utf8(b).map(Cow::Borrowed).map_err(invalid),
            Cow::Owned(v) => String::from_utf8(v)
                .map(Cow::Owned)
                .map_err(|e| invalid(e.utf8_error())),
        }
    }

    fn textual(&self, expected: &'static str) -> Result<(), ParseError> {
        match self.prefix {
            Prefix::Integer
            | Prefix::Double
            | Prefix::BigNumber
            | Prefix::SimpleString
            | Prefix::BulkString
            | Prefix::VerbatimString => Ok(()),
            other => Err(ParseError::wrong_type(expected, other)),
        }
    }

    pub fn parse_i64(&self) -> Result<i64, ParseError> {
        self.textual("integer")?;
        parse_integer(&self.to_bytes()?)
    }

    pub fn parse_f64(&self) -> Result<f64, ParseError> {
        self.textual("double")?;
        parse_double(&self.to_bytes()?)
    }

    pub fn parse_bool(&self) -> Result<bool, ParseError> {
        match self.prefix {
            Prefix::Boolean => parse_boolean(&self.to_bytes()?),
            other => Err(ParseError::wrong_type("boolean", other)),
        }
    }
}

// ============================================================================
// Aggregates
// ============================================================================

/// Iterator over the children of one aggregate, fixed or streaming.
///
/// Each call to [`next_child`](Self::next_child) first skips the child
/// returned by the previous call, so unread children cost a scan but no
/// decoding.
#[derive(Debug, Clone)]
pub struct Children<'a> {
    cursor: Cursor<'a>,
    prefix: Prefix,
    remaining: Option<usize>,
    pending: bool,
    done: bool,
    options: ParseOptions,
}

impl<'a> Children<'a> {
    fn open(mut cursor: Cursor<'a>, options: ParseOptions) -> Result<Self, ParseError> {
        let (prefix, body) = read_header(&mut cursor)?;
        if !prefix.is_aggregate() {
            return Err(ParseError::wrong_type("aggregate", prefix));
        }
        let remaining = match parse_len(prefix, &body)? {
            Length::Null => Some(0),
            Length::Streaming => None,
            Length::Known(n) => Some(n * prefix.arity()),
        };
        Ok(Self {
            cursor,
            prefix,
            remaining,
            pending: false,
            done: false,
            options,
        })
    }

    pub fn prefix(&self) -> Prefix {
        self.prefix
    }

    /// Children not yet returned, if the count was declared.
    pub fn remaining(&self) -> Option<usize> {
        self.remaining
    }

    fn capacity_hint(&self) -> usize {
        self.remaining.unwrap_or(0).min(self.options.max_collection_elements)
    }

    /// Move to the next child, or `None` once the aggregate is exhausted.
    pub fn next_child(&mut self) -> Result<Option<Reader<'a>>, ParseError> {
        if self.done {
            return Ok(None);
        }
        let result = self.advance();
        if result.is_err() {
            self.done = true;
        }
        result
    }

    fn advance(&mut self) -> Result<Option<Reader<'a>>, ParseError> {
        if self.pending {
            skip_value(&mut self.cursor, &self.options)?;
            self.pending = false;
        }
        match self.remaining {
            Some(0) => {
                self.done = true;
                return Ok(None);
            }
            Some(ref mut n) => *n -= 1,
            None => {
                if self.cursor.peek().ok_or(ParseError::Incomplete)? == STREAM_END {
                    let line = self.cursor.read_line().ok_or(ParseError::Incomplete)?;
                    if line.len() != 1 {
                        return Err(ParseError::Protocol("malformed stream end".to_string()));
                    }
                    self.done = true;
                    return Ok(None);
                }
            }
        }
        Prefix::from_byte(self.cursor.peek().ok_or(ParseError::Incomplete)?)?;
        self.pending = true;
        Ok(Some(Reader {
            cursor: self.cursor,
            options: self.options,
        }))
    }

    /// Next key/value pair of a map or attribute.
    pub fn next_pair(&mut self) -> Result<Option<(Reader<'a>, Reader<'a>)>, ParseError> {
        let Some(key) = self.next_child()? else {
            return Ok(None);
        };
        match self.next_child()? {
            Some(value) => Ok(Some((key, value))),
            None => Err(ParseError::Protocol("key without value".to_string())),
        }
    }

    /// Skip whatever is left and return the cursor just past the aggregate.
    pub fn finish(mut self) -> Result<Cursor<'a>, ParseError> {
        while self.next_child()?.is_some() {}
        Ok(self.cursor)
    }
}

impl<'a> Iterator for Children<'a> {
    type Item = Result<Reader<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_child().transpose()
    }
}

// ============================================================================
// Wire helpers
// ============================================================================

fn read_header<'a>(cursor: &mut Cursor<'a>) -> Result<(Prefix, Cow<'a, [u8]>), ParseError> {
    let prefix = Prefix::from_byte(cursor.peek().ok_or(ParseError::Incomplete)?)?;
    let line = cursor.read_line().ok_or(ParseError::Incomplete)?;
    let body = match line {
        Cow::Borrowed(b) => Cow::Borrowed(&b[1..]),
        Cow::Owned(mut v) => {
            v.remove(0);
            Cow::Owned(v)
        }
    };
    Ok((prefix, body))
}

fn parse_len(prefix: Prefix, body: &[u8]) -> Result<Length, ParseError> {
    if body == STREAMING_LENGTH {
        if !prefix.allows_streaming() {
            return Err(ParseError::Protocol(format!(
                "{prefix:?} has no streaming form"
            )));
        }
        return Ok(Length::Streaming);
    }
    let n = parse_integer(body)?;
    if n == -1 && prefix.allows_null_length() {
        return Ok(Length::Null);
    }
    usize::try_from(n)
        .map(Length::Known)
        .map_err(|_| ParseError::InvalidLength)
}

fn next_chunk_header(cursor: &mut Cursor<'_>) -> Result<Option<usize>, ParseError> {
    let first = cursor.peek().ok_or(ParseError::Incomplete)?;
    if first != STREAM_CHUNK {
        return Err(ParseError::Protocol(format!(
            "expected stream chunk, found {first:#04x}"
        )));
    }
    let line = cursor.read_line().ok_or(ParseError::Incomplete)?;
    match parse_length(&line[1..])? {
        0 => Ok(None),
        len => Ok(Some(len)),
    }
}

fn skip_chunk_body(cursor: &mut Cursor<'_>, len: usize) -> Result<(), ParseError> {
    if !cursor.advance(len) {
        return Err(ParseError::Incomplete);
    }
    expect_crlf(cursor)
}

fn expect_crlf(cursor: &mut Cursor<'_>) -> Result<(), ParseError> {
    match cursor.eat_crlf() {
        Some(true) => Ok(()),
        Some(false) => Err(ParseError::Protocol("missing trailing CRLF".to_string())),
        None => Err(ParseError::Incomplete),
    }
}

fn skip_value(cursor: &mut Cursor<'_>, options: &ParseOptions) -> Result<(), ParseError> {
    match ScanState::with_options(*options).scan(cursor)? {
        Scan::Complete(_) => Ok(()),
        Scan::Incomplete => Err(ParseError::Incomplete),
    }
}
