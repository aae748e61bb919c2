//! Incremental RESP2/RESP3 protocol layer for clients.
//!
//! The crate is split along the path a reply takes:
//!
//! - **Framing** ([`ScanState`]): decide whether the bytes received so far
//!   hold one complete top-level value. Framing is resumable; progress is
//!   kept in the state so partial input is never re-validated.
//! - **Navigation** ([`Reader`]): a lazy view over a framed value. Scalar
//!   payloads and aggregate children are read on demand, the same way for
//!   fixed and streaming shapes.
//! - **Materialization** ([`Value`]): an owned tree, for callers who want
//!   everything at once.
//!
//! Requests go the other way through [`WriteRequest`] implementations:
//! the [`Request`] builders, or a [`Formatter`] applied to a typed value.
//!
//! Bytes can come from one buffer or from several segments through a
//! [`Cursor`]; nothing is copied unless a payload straddles a segment
//! boundary.
//!
//! # Example
//!
//! ```
//! use resp_proto::{Cursor, Reader, Request, Scan, ScanState, WriteRequest};
//! use bytes::BytesMut;
//!
//! let mut out = BytesMut::new();
//! Request::get(b"greeting").write_to(&mut out);
//!
//! let reply = b"$5\r\nhello\r\n";
//! let mut state = ScanState::new();
//! let mut cursor = Cursor::new(reply);
//! let Scan::Complete(n) = state.scan(&mut cursor).unwrap() else {
//!     panic!("reply is complete");
//! };
//! let reader = Reader::new(&reply[..n]);
//! assert_eq!(reader.read_str().unwrap().as_deref(), Some("hello"));
//! ```

mod cursor;
mod error;
mod prefix;
mod reader;
mod request;
mod scan;
mod value;
mod writer;

pub use cursor::Cursor;
pub use error::{ParseError, ReadError, ServerError};
pub use prefix::{Prefix, STREAM_CHUNK, STREAM_END, STREAMING_LENGTH};
pub use reader::{AttributeAction, Children, Reader, Scalar};
pub use request::{Condition, Expiry, Request, SetRequest};
pub use scan::{
    DEFAULT_MAX_BULK_STRING_LEN, DEFAULT_MAX_COLLECTION_ELEMENTS, DEFAULT_MAX_DEPTH,
    DEFAULT_MAX_TOTAL_ITEMS, ParseOptions, Scan, ScanState, frame_len,
};
pub use value::Value;
pub use writer::{
    Arg, ArgWriter, Args, Formatted, Formatter, Part, Plain, Template, WriteRequest, bulk_len,
    write_command,
};
