//! Ready-made request builders.
//!
//! [`Request`] covers commands whose arguments are a flat list of byte
//! strings; [`SetRequest`] carries the options of `SET`. Both implement
//! [`WriteRequest`], so they can be handed straight to a transport.
//!
//! # Example
//!
//! ```
//! use resp_proto::Request;
//!
//! let mut buf = vec![0u8; 64];
//! let len = Request::get(b"mykey").encode(&mut buf);
//! assert_eq!(&buf[..len], b"*2\r\n$3\r\nGET\r\n$5\r\nmykey\r\n");
//!
//! let set = Request::set(b"mykey", b"myvalue").ex(3600);
//! assert_eq!(set.encoded_len(), set.encode(&mut buf));
//! ```

use bytes::{BufMut, BytesMut};

use crate::writer::{ArgWriter, WriteRequest, bulk_len};

/// A command as a flat list of arguments, the first being the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    args: Vec<&'a [u8]>,
}

impl<'a> Request<'a> {
    /// Create a request from raw arguments.
    #[inline]
    pub fn new(args: Vec<&'a [u8]>) -> Self {
        Self { args }
    }

    /// Start a custom command.
    #[inline]
    pub fn cmd(name: &'a [u8]) -> Self {
        Self { args: vec![name] }
    }

    /// Append one argument.
    #[inline]
    pub fn arg(mut self, arg: &'a [u8]) -> Self {
        self.args.push(arg);
        self
    }

    pub fn ping() -> Self {
        Self::cmd(b"PING")
    }

    pub fn echo(message: &'a [u8]) -> Self {
        Self::cmd(b"ECHO").arg(message)
    }

    /// `HELLO <protover>`, the handshake that switches the protocol version.
    pub fn hello(protover: &'a [u8]) -> Self {
        Self::cmd(b"HELLO").arg(protover)
    }

    pub fn get(key: &'a [u8]) -> Self {
        Self::cmd(b"GET").arg(key)
    }

    /// `SET`, with options added on the returned builder.
    pub fn set(key: &'a [u8], value: &'a [u8]) -> SetRequest<'a> {
        SetRequest {
            key,
            value,
            expiry: None,
            condition: None,
        }
    }

    pub fn del(key: &'a [u8]) -> Self {
        Self::cmd(b"DEL").arg(key)
    }

    pub fn incr(key: &'a [u8]) -> Self {
        Self::cmd(b"INCR").arg(key)
    }

    pub fn mget(keys: &[&'a [u8]]) -> Self {
        let mut args = Vec::with_capacity(1 + keys.len());
        args.push(&b"MGET"[..]);
        args.extend_from_slice(keys);
        Self { args }
    }

    pub fn subscribe(channel: &'a [u8]) -> Self {
        Self::cmd(b"SUBSCRIBE").arg(channel)
    }

    pub fn config_get(key: &'a [u8]) -> Self {
        Self::cmd(b"CONFIG").arg(b"GET").arg(key)
    }

    pub fn config_set(key: &'a [u8], value: &'a [u8]) -> Self {
        Self::cmd(b"CONFIG").arg(b"SET").arg(key).arg(value)
    }

    pub fn flushdb() -> Self {
        Self::cmd(b"FLUSHDB")
    }

    pub fn args(&self) -> &[&'a [u8]] {
        &self.args
    }

    fn put<B: BufMut>(&self, out: &mut B) {
        let mut writer = ArgWriter::begin(out, self.args.len());
        for arg in &self.args {
            writer.arg(*arg);
        }
        writer.finish();
    }

    /// Encode into `buf`, returning the number of bytes written.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is too small.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        let available = buf.len();
        let mut dst = buf;
        self.put(&mut dst);
        available - dst.len()
    }

    pub fn encoded_len(&self) -> usize {
        header_len(self.args.len()) + self.args.iter().map(|a| bulk_len(a.len())).sum::<usize>()
    }
}

impl WriteRequest for Request<'_> {
    fn write_to(&self, out: &mut BytesMut) {
        out.reserve(self.encoded_len());
        self.put(out);
    }

    fn command(&self) -> &[u8] {
        self.args.first().copied().unwrap_or_default()
    }
}

/// Expiration option of `SET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// `EX <seconds>`
    Seconds(u64),
    /// `PX <milliseconds>`
    Millis(u64),
}

/// Existence condition of `SET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// `NX`: only if the key does not exist.
    IfAbsent,
    /// `XX`: only if the key exists.
    IfPresent,
}

/// Builder for `SET` with options. Setting one expiry replaces the other;
/// likewise for the existence condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetRequest<'a> {
    key: &'a [u8],
    value: &'a [u8],
    expiry: Option<Expiry>,
    condition: Option<Condition>,
}

impl<'a> SetRequest<'a> {
    #[inline]
    pub fn ex(mut self, seconds: u64) -> Self {
        self.expiry = Some(Expiry::Seconds(seconds));
        self
    }

    #[inline]
    pub fn px(mut self, milliseconds: u64) -> Self {
        self.expiry = Some(Expiry::Millis(milliseconds));
        self
    }

    #[inline]
    pub fn nx(mut self) -> Self {
        self.condition = Some(Condition::IfAbsent);
        self
    }

    #[inline]
    pub fn xx(mut self) -> Self {
        self.condition = Some(Condition::IfPresent);
        self
    }

    pub fn expiry(&self) -> Option<Expiry> {
        self.expiry
    }

    pub fn condition(&self) -> Option<Condition> {
        self.condition
    }

    fn argc(&self) -> usize {
        3 + self.expiry.map_or(0, |_| 2) + self.condition.map_or(0, |_| 1)
    }

    fn put<B: BufMut>(&self, out: &mut B) {
        let mut writer = ArgWriter::begin(out, self.argc());
        writer.arg(b"SET").arg(self.key).arg(self.value);
        match self.expiry {
            Some(Expiry::Seconds(s)) => {
                writer.arg(b"EX").arg(&s);
            }
            Some(Expiry::Millis(ms)) => {
                writer.arg(b"PX").arg(&ms);
            }
            None => {}
        }
        match self.condition {
            Some(Condition::IfAbsent) => {
                writer.arg(b"NX");
            }
            Some(Condition::IfPresent) => {
                writer.arg(b"XX");
            }
            None => {}
        }
        writer.finish();
    }

    /// Encode into `buf`, returning the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        let available = buf.len();
        let mut dst = buf;
        self.put(&mut dst);
        available - dst.len()
    }

    pub fn encoded_len(&self) -> usize {
        let mut len = header_len(self.argc())
            + bulk_len(3)
            + bulk_len(self.key.len())
            + bulk_len(self.value.len());
        if let Some(Expiry::Seconds(n) | Expiry::Millis(n)) = self.expiry {
            len += bulk_len(2) + bulk_len(itoa::Buffer::new().format(n).len());
        }
        if self.condition.is_some() {
            len += bulk_len(2);
        }
        len
    }
}

impl WriteRequest for SetRequest<'_> {
    fn write_to(&self, out: &mut BytesMut) {
        out.reserve(self.encoded_len());
        self.put(out);
    }

    fn command(&self) -> &[u8] {
        b"SET"
    }
}

#[inline]
fn header_len(argc: usize) -> usize {
    1 + itoa::Buffer::new().format(argc).len() + 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(req: &impl WriteRequest) -> Vec<u8> {
        let mut out = BytesMut::new();
        req.write_to(&mut out);
        out.to_vec()
    }

    #[test]
    fn test_encode_ping() {
        assert_eq!(encoded(&Request::ping()), b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn test_encode_get() {
        assert_eq!(
            encoded(&Request::get(b"mykey")),
            b"*2\r\n$3\r\nGET\r\n$5\r\nmykey\r\n"
        );
    }

    #[test]
    fn test_encode_set() {
        assert_eq!(
            encoded(&Request::set(b"foo", b"bar")),
            b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n"
        );
    }

    #[test]
    fn test_encode_set_options() {
        assert_eq!(
            encoded(&Request::set(b"k", b"v").ex(3600)),
            b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nEX\r\n$4\r\n3600\r\n"
        );
        assert_eq!(
            encoded(&Request::set(b"k", b"v").px(5).nx()),
            b"*6\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nPX\r\n$1\r\n5\r\n$2\r\nNX\r\n"
        );
    }

    #[test]
    fn test_set_options_replace() {
        let req = Request::set(b"k", b"v").ex(10).px(20);
        assert_eq!(req.expiry(), Some(Expiry::Millis(20)));
        let req = Request::set(b"k", b"v").nx().xx();
        assert_eq!(req.condition(), Some(Condition::IfPresent));
    }

    #[test]
    fn test_encode_mget() {
        let req = Request::mget(&[&b"a"[..], &b"bb"[..]]);
        assert_eq!(encoded(&req), b"*3\r\n$4\r\nMGET\r\n$1\r\na\r\n$2\r\nbb\r\n");
        assert_eq!(encoded(&Request::mget(&[])), b"*1\r\n$4\r\nMGET\r\n");
    }

    #[test]
    fn test_encode_custom() {
        let req = Request::cmd(b"HSET").arg(b"h").arg(b"f").arg(b"v");
        assert_eq!(req.command(), b"HSET");
        assert_eq!(
            encoded(&req),
            b"*4\r\n$4\r\nHSET\r\n$1\r\nh\r\n$1\r\nf\r\n$1\r\nv\r\n"
        );
        assert_eq!(
            encoded(&Request::config_get(b"maxmemory")),
            b"*3\r\n$6\r\nCONFIG\r\n$3\r\nGET\r\n$9\r\nmaxmemory\r\n"
        );
    }

    #[test]
    fn test_encoded_len_matches() {
        let requests = [
            Request::ping(),
            Request::hello(b"3"),
            Request::mget(&[&b"a"[..], &b"b"[..], &b"c"[..]]),
            Request::new(vec![&b"X"[..]; 12]),
        ];
        for req in &requests {
            assert_eq!(req.encoded_len(), encoded(req).len());
        }
        let big = vec![b'x'; 100_000];
        let sets = [
            Request::set(b"k", b"v"),
            Request::set(b"k", &big).ex(1_000_000),
            Request::set(b"k", b"v").px(1).xx(),
        ];
        for req in &sets {
            assert_eq!(req.encoded_len(), encoded(req).len());
        }
    }

    #[test]
    fn test_slice_encode_matches_write_to() {
        let req = Request::set(b"key", b"value").ex(60).nx();
        let mut buf = vec![0u8; req.encoded_len()];
        let n = req.encode(&mut buf);
        assert_eq!(n, buf.len());
        assert_eq!(buf, encoded(&req));
    }
}
