//! Resumable framing of one top-level RESP value.
//!
//! [`ScanState`] walks a value one wire unit at a time (a header line, a
//! fixed-length payload, or a stream chunk) and remembers how far it got.
//! When the bytes run out it reports [`Scan::Incomplete`]; the caller keeps
//! the state, appends more bytes, and presents the same frame start again.
//! Already validated units are skipped in O(1), so framing a value that
//! arrives one byte at a time costs the same as framing it whole.
//!
//! ```
//! use resp_proto::{Cursor, Scan, ScanState};
//!
//! let wire = b"*2\r\n$3\r\nfoo\r\n:7\r\n";
//! let mut state = ScanState::new();
//! let mut buf = Vec::new();
//!
//! for chunk in wire.chunks(3) {
//!     buf.extend_from_slice(chunk);
//!     let mut cursor = Cursor::new(&buf);
//!     if let Scan::Complete(n) = state.scan(&mut cursor).unwrap() {
//!         assert_eq!(n, wire.len());
//!     }
//! }
//! ```

use crate::cursor::Cursor;
use crate::error::ParseError;
use crate::prefix::{Prefix, STREAM_CHUNK, STREAM_END, STREAMING_LENGTH};

/// Default maximum number of elements in a collection (array, map, set, etc.).
///
/// This limit prevents denial-of-service attacks where a malicious peer sends
/// a message claiming to have billions of elements.
pub const DEFAULT_MAX_COLLECTION_ELEMENTS: usize = 1024 * 1024;

/// Default maximum size of a bulk string (or one stream chunk) in bytes (512MB,
/// the server-side ceiling).
pub const DEFAULT_MAX_BULK_STRING_LEN: usize = 512 * 1024 * 1024;

/// Default maximum nesting depth for aggregates.
///
/// Typical replies (commands, pub/sub messages, cluster maps) rarely exceed
/// 3 levels of nesting.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Default maximum total items across all collections in a single frame.
///
/// Without this, nested collections could claim
/// `max_collection_elements ^ max_depth` elements.
pub const DEFAULT_MAX_TOTAL_ITEMS: usize = 4 * 1024 * 1024;

/// Limits applied while framing a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Maximum number of elements in a single collection.
    pub max_collection_elements: usize,
    /// Maximum size of a bulk string or stream chunk in bytes.
    pub max_bulk_string_len: usize,
    /// Maximum nesting depth for aggregates.
    pub max_depth: usize,
    /// Maximum total items across all collections in one frame.
    pub max_total_items: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ParseOptions {
    /// Create new parse options with default values.
    pub const fn new() -> Self {
        Self {
            max_collection_elements: DEFAULT_MAX_COLLECTION_ELEMENTS,
            max_bulk_string_len: DEFAULT_MAX_BULK_STRING_LEN,
            max_depth: DEFAULT_MAX_DEPTH,
            max_total_items: DEFAULT_MAX_TOTAL_ITEMS,
        }
    }

    /// Set the maximum collection element count.
    pub const fn max_collection_elements(mut self, count: usize) -> Self {
        self.max_collection_elements = count;
        self
    }

    /// Set the maximum bulk string length.
    pub const fn max_bulk_string_len(mut self, len: usize) -> Self {
        self.max_bulk_string_len = len;
        self
    }

    /// Set the maximum nesting depth.
    pub const fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set the maximum total items across all collections.
    pub const fn max_total_items(mut self, count: usize) -> Self {
        self.max_total_items = count;
        self
    }
}

/// Outcome of one [`ScanState::scan`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// A whole value was framed; it spans this many bytes from the frame start.
    Complete(usize),
    /// More bytes are needed. Keep the state and retry.
    Incomplete,
}

#[derive(Debug, Clone, Copy)]
struct Level {
    prefix: Prefix,
    /// Children still expected; `None` for the streaming form.
    remaining: Option<usize>,
    /// Children seen so far in the streaming form.
    seen: usize,
    /// Attributes chained in front of this attribute, restored when it
    /// closes. Zero for other aggregates.
    chain: usize,
}

enum Step {
    Continue,
    Pending,
    Done,
}

/// Progress record for framing one top-level value.
#[derive(Debug, Clone)]
pub struct ScanState {
    options: ParseOptions,
    offset: usize,
    stack: Vec<Level>,
    payload: Option<(Prefix, usize)>,
    chunked: bool,
    total_items: usize,
    /// Attributes already read in front of the value being framed. Each
    /// one wraps the value one level deeper.
    attr_chain: usize,
}

impl Default for ScanState {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanState {
    pub fn new() -> Self {
        Self::with_options(ParseOptions::default())
    }

    pub fn with_options(options: ParseOptions) -> Self {
        Self {
            options,
            offset: 0,
            stack: Vec::new(),
            payload: None,
            chunked: false,
            total_items: 0,
            attr_chain: 0,
        }
    }

    /// Forget all progress, keeping the options and allocated capacity.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.stack.clear();
        self.payload = None;
        self.chunked = false;
        self.total_items = 0;
        self.attr_chain = 0;
    }

    /// Bytes of the current frame already validated.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Current aggregate nesting depth.
    #[inline]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// True if no byte of a frame has been validated yet.
    #[inline]
    pub fn is_fresh(&self) -> bool {
        self.offset == 0
            && self.stack.is_empty()
            && self.payload.is_none()
            && !self.chunked
            && self.attr_chain == 0
    }

    /// Minimum bytes known to be required past [`offset`](Self::offset).
    ///
    /// Exact while waiting on a fixed-length payload; `None` when waiting for
    /// a header line of unknown length.
    pub fn bytes_needed(&self) -> Option<usize> {
        self.payload.map(|(_, len)| len + 2)
    }

    /// Try to frame one complete value starting at `cursor`.
    ///
    /// The cursor must be positioned at the start of the frame on every call
    /// for the same value; bytes before [`offset`](Self::offset) are not
    /// re-examined. On [`Scan::Complete`] the cursor is advanced past the
    /// value and the state is reset for the next frame. On
    /// [`Scan::Incomplete`] and on error the cursor does not move.
    pub fn scan(&mut self, cursor: &mut Cursor<'_>) -> Result<Scan, ParseError> {
        let start = cursor.position();
        let mut cur = *cursor;
        if !cur.advance(self.offset) {
            return Ok(Scan::Incomplete);
        }
        loop {
            match self.step(&mut cur)? {
                Step::Pending => return Ok(Scan::Incomplete),
                Step::Continue => {
                    self.offset = cur.position() - start;
                }
                Step::Done => {
                    let n = cur.position() - start;
                    *cursor = cur;
                    self.reset();
                    return Ok(Scan::Complete(n));
                }
            }
        }
    }

    // Consume one wire unit. `cur` and `self` are only modified when the
    // whole unit is present and valid.
    fn step(&mut self, cur: &mut Cursor<'_>) -> Result<Step, ParseError> {
        let mut c = *cur;

        if let Some((prefix, len)) = self.payload {
            if c.remaining() < len + 2 {
                return Ok(Step::Pending);
            }
            if prefix == Prefix::VerbatimString && (len < 4 || c.byte_at(3) != Some(b':')) {
                return Err(ParseError::InvalidVerbatimFormat);
            }
            c.advance(len);
            if c.eat_crlf() != Some(true) {
                return Err(ParseError::Protocol("missing trailing CRLF".to_string()));
            }
            *cur = c;
            self.payload = None;
            if self.chunked {
                return Ok(Step::Continue);
            }
            return self.finish_value();
        }

        let Some(first) = c.peek() else {
            return Ok(Step::Pending);
        };

        if self.chunked {
            if first != STREAM_CHUNK {
                return Err(ParseError::Protocol(format!(
                    "expected stream chunk, found {first:#04x}"
                )));
            }
            let Some(line) = c.read_line() else {
                return Ok(Step::Pending);
            };
            let len = parse_length(&line[1..])?;
            if len == 0 {
                *cur = c;
                self.chunked = false;
                return self.finish_value();
            }
            self.check_blob_len(len)?;
            *cur = c;
            self.payload = Some((Prefix::BulkString, len));
            return Ok(Step::Continue);
        }

        if first == STREAM_END {
            let Some(line) = c.read_line() else {
                return Ok(Step::Pending);
            };
            if line.len() != 1 {
                return Err(ParseError::Protocol("malformed stream end".to_string()));
            }
            match self.stack.last() {
                Some(level) if level.remaining.is_none() => {
                    if level.seen % level.prefix.arity() != 0 {
                        return Err(ParseError::Protocol(
                            "streamed map ended between key and value".to_string(),
                        ));
                    }
                }
                _ => return Err(ParseError::Protocol("unexpected stream end".to_string())),
            }
            *cur = c;
            self.stack.pop();
            return self.finish_value();
        }

        let prefix = Prefix::from_byte(first)?;
        let Some(line) = c.read_line() else {
            return Ok(Step::Pending);
        };
        let body = &line[1..];

        match prefix {
            Prefix::SimpleString | Prefix::SimpleError => {}
            Prefix::Integer => {
                parse_integer(body)?;
            }
            Prefix::Null => {
                if !body.is_empty() {
                    return Err(ParseError::Protocol("expected CRLF after null".to_string()));
                }
            }
            Prefix::Boolean => {
                parse_boolean(body)?;
            }
            Prefix::Double => {
                parse_double(body)?;
            }
            Prefix::BigNumber => validate_big_number(body)?,
            Prefix::BulkString | Prefix::BulkError | Prefix::VerbatimString => {
                if body == STREAMING_LENGTH {
                    if !prefix.allows_streaming() {
                        return Err(ParseError::Protocol(format!(
                            "{prefix:?} has no streaming form"
                        )));
                    }
                    *cur = c;
                    self.chunked = true;
                    return Ok(Step::Continue);
                }
                let len = parse_integer(body)?;
                if len < 0 {
                    if len == -1 && prefix.allows_null_length() {
                        *cur = c;
                        return self.finish_value();
                    }
                    return Err(ParseError::InvalidLength);
                }
                let len = len as usize;
                self.check_blob_len(len)?;
                *cur = c;
                self.payload = Some((prefix, len));
                return Ok(Step::Continue);
            }
            Prefix::Array | Prefix::Map | Prefix::Set | Prefix::Push | Prefix::Attribute => {
                let depth = self.stack.len() + self.attr_chain;
                if depth >= self.options.max_depth {
                    return Err(ParseError::NestingTooDeep(depth));
                }
                if body == STREAMING_LENGTH {
                    if !prefix.allows_streaming() {
                        return Err(ParseError::Protocol(format!(
                            "{prefix:?} has no streaming form"
                        )));
                    }
                    *cur = c;
                    self.attr_chain = 0;
                    self.stack.push(Level {
                        prefix,
                        remaining: None,
                        seen: 0,
                        chain: 0,
                    });
                    return Ok(Step::Continue);
                }
                let count = parse_integer(body)?;
                if count < 0 {
                    if count == -1 && prefix.allows_null_length() {
                        *cur = c;
                        return self.finish_value();
                    }
                    return Err(ParseError::InvalidLength);
                }
                let count = count as usize;
                if count > self.options.max_collection_elements {
                    return Err(ParseError::CollectionTooLarge(count));
                }
                let children = count
                    .checked_mul(prefix.arity())
                    .ok_or(ParseError::CollectionTooLarge(count))?;
                // an attribute header is an item of its own, even when empty
                let own = usize::from(prefix == Prefix::Attribute);
                let total = self
                    .total_items
                    .checked_add(children)
                    .and_then(|t| t.checked_add(own))
                    .ok_or(ParseError::CollectionTooLarge(usize::MAX))?;
                if total > self.options.max_total_items {
                    return Err(ParseError::CollectionTooLarge(total));
                }
                *cur = c;
                self.total_items = total;
                let chain = if prefix == Prefix::Attribute {
                    self.attr_chain + 1
                } else {
                    0
                };
                if children == 0 {
                    if prefix == Prefix::Attribute {
                        // the annotated value still follows
                        self.attr_chain = chain;
                        return Ok(Step::Continue);
                    }
                    return self.finish_value();
                }
                self.attr_chain = 0;
                self.stack.push(Level {
                    prefix,
                    remaining: Some(children),
                    seen: 0,
                    chain,
                });
                return Ok(Step::Continue);
            }
        }

        *cur = c;
        self.finish_value()
    }

    // A value just ended: count it against its parent, closing every fixed
    // aggregate that this completes.
    fn finish_value(&mut self) -> Result<Step, ParseError> {
        self.attr_chain = 0;
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Ok(Step::Done);
            };
            match top.remaining.as_mut() {
                Some(remaining) => {
                    *remaining -= 1;
                    if *remaining > 0 {
                        return Ok(Step::Continue);
                    }
                    let closed = self.stack.pop();
                    if let Some(level) = closed
                        && level.prefix == Prefix::Attribute
                    {
                        // an attribute is not a value of its own
                        self.attr_chain = level.chain;
                        return Ok(Step::Continue);
                    }
                }
                None => {
                    top.seen += 1;
                    self.total_items += 1;
                    if top.seen > self.options.max_collection_elements.saturating_mul(top.prefix.arity())
                        || self.total_items > self.options.max_total_items
                    {
                        return Err(ParseError::CollectionTooLarge(top.seen));
                    }
                    return Ok(Step::Continue);
                }
            }
        }
    }

    fn check_blob_len(&self, len: usize) -> Result<(), ParseError> {
        if len > self.options.max_bulk_string_len {
            return Err(ParseError::BulkStringTooLong {
                len,
                max: self.options.max_bulk_string_len,
            });
        }
        Ok(())
    }
}

/// Frame one value from `data`, returning its length in bytes.
///
/// Convenience for callers that already hold the whole buffer.
pub fn frame_len(data: &[u8], options: &ParseOptions) -> Result<usize, ParseError> {
    let mut state = ScanState::with_options(*options);
    match state.scan(&mut Cursor::new(data))? {
        Scan::Complete(n) => Ok(n),
        Scan::Incomplete => Err(ParseError::Incomplete),
    }
}

// ============================================================================
// Line payload helpers (shared with the reader)
// ============================================================================

pub(crate) fn parse_integer(body: &[u8]) -> Result<i64, ParseError> {
    let s = std::str::from_utf8(body).map_err(|e| ParseError::InvalidInteger(e.to_string()))?;
    s.parse()
        .map_err(|e: std::num::ParseIntError| ParseError::InvalidInteger(e.to_string()))
}

pub(crate) fn parse_length(body: &[u8]) -> Result<usize, ParseError> {
    let n = parse_integer(body)?;
    usize::try_from(n).map_err(|_| ParseError::InvalidLength)
}

pub(crate) fn parse_boolean(body: &[u8]) -> Result<bool, ParseError> {
    match body {
        b"t" => Ok(true),
        b"f" => Ok(false),
        _ => Err(ParseError::InvalidBoolean),
    }
}

pub(crate) fn parse_double(body: &[u8]) -> Result<f64, ParseError> {
    let s = std::str::from_utf8(body).map_err(|e| ParseError::InvalidDouble(e.to_string()))?;
    Ok(match s {
        "inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        "nan" => f64::NAN,
        _ => s
            .parse()
            .map_err(|e: std::num::ParseFloatError| ParseError::InvalidDouble(e.to_string()))?,
    })
}

pub(crate) fn validate_big_number(body: &[u8]) -> Result<(), ParseError> {
    let digits = match body.first() {
        Some(b'-') | Some(b'+') => &body[1..],
        _ => body,
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::InvalidInteger(
            String::from_utf8_lossy(body).into_owned(),
        ));
    }
    Ok(())
}
