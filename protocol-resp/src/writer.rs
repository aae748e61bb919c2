//! Command serialization.
//!
//! Every command goes out as an array of bulk strings: `*<argc>\r\n` followed
//! by `$<len>\r\n<arg>\r\n` per argument. What varies per command is the
//! order in which fixed tokens and caller values appear, and that is the job
//! of a [`Formatter`]. Formatters are plain values with no interior state,
//! so one `static` formatter can serve every connection at once.
//!
//! ```
//! use bytes::BytesMut;
//! use resp_proto::{Formatted, Part, Template, WriteRequest};
//!
//! static SET_EX: Template = Template::new(&[Part::Arg(0), Part::Arg(1), Part::Literal(b"EX"), Part::Arg(2)]);
//!
//! let req = Formatted::new(b"SET", &SET_EX, (&b"k"[..], "v", 60u64));
//! let mut out = BytesMut::new();
//! req.write_to(&mut out);
//! assert_eq!(&out[..], b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nEX\r\n$2\r\n60\r\n");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// A value that can be sent as one command argument.
///
/// Numbers are rendered in canonical base-10 (`itoa`) or shortest
/// round-trip (`ryu`) form, never through locale-aware formatting.
pub trait Arg {
    /// Call `f` with the argument's wire bytes.
    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R;
}

impl Arg for [u8] {
    #[inline]
    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self)
    }
}

impl<const N: usize> Arg for [u8; N] {
    #[inline]
    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self)
    }
}

impl Arg for str {
    #[inline]
    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self.as_bytes())
    }
}

impl Arg for String {
    #[inline]
    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self.as_bytes())
    }
}

impl Arg for Vec<u8> {
    #[inline]
    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self)
    }
}

impl Arg for Bytes {
    #[inline]
    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self)
    }
}

impl<T: Arg + ?Sized> Arg for &T {
    #[inline]
    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        (**self).with_bytes(f)
    }
}

macro_rules! integer_arg {
    ($($t:ty),*) => {$(
        impl Arg for $t {
            #[inline]
            fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
                let mut buf = itoa::Buffer::new();
                f(buf.format(*self).as_bytes())
            }
        }
    )*};
}

integer_arg!(i32, i64, u32, u64, usize);

impl Arg for f64 {
    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        if self.is_finite() {
            let mut buf = ryu::Buffer::new();
            f(buf.format_finite(*self).as_bytes())
        } else if self.is_nan() {
            f(b"nan")
        } else if self.is_sign_positive() {
            f(b"+inf")
        } else {
            f(b"-inf")
        }
    }
}

/// Appends the arguments of one command.
pub struct ArgWriter<'a, B: BufMut = BytesMut> {
    out: &'a mut B,
    expected: usize,
    written: usize,
}

impl<'a, B: BufMut> ArgWriter<'a, B> {
    /// Write the `*<argc>` header.
    pub fn begin(out: &'a mut B, argc: usize) -> Self {
        let mut fmt = itoa::Buffer::new();
        out.put_u8(b'*');
        out.put_slice(fmt.format(argc).as_bytes());
        out.put_slice(b"\r\n");
        Self {
            out,
            expected: argc,
            written: 0,
        }
    }

    pub fn arg<A: Arg + ?Sized>(&mut self, arg: &A) -> &mut Self {
        arg.with_bytes(|bytes| put_bulk(self.out, bytes));
        self.written += 1;
        self
    }

    /// Arguments written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn finish(self) {
        debug_assert_eq!(
            self.written, self.expected,
            "argument count does not match header"
        );
    }
}

fn put_bulk<B: BufMut>(out: &mut B, bytes: &[u8]) {
    let mut fmt = itoa::Buffer::new();
    out.put_u8(b'$');
    out.put_slice(fmt.format(bytes.len()).as_bytes());
    out.put_slice(b"\r\n");
    out.put_slice(bytes);
    out.put_slice(b"\r\n");
}

/// Wire length of one argument.
#[inline]
pub fn bulk_len(len: usize) -> usize {
    1 + itoa::Buffer::new().format(len).len() + 2 + len + 2
}

/// A positional bundle of arguments (tuples, slices, vectors).
pub trait Args {
    fn count(&self) -> usize;

    /// Write argument `index`. Out-of-range indices write nothing.
    fn write_nth<B: BufMut>(&self, index: usize, out: &mut ArgWriter<'_, B>);
}

impl<T: Arg> Args for [T] {
    fn count(&self) -> usize {
        self.len()
    }

    fn write_nth<B: BufMut>(&self, index: usize, out: &mut ArgWriter<'_, B>) {
        if let Some(arg) = self.get(index) {
            out.arg(arg);
        }
    }
}

impl<T: Arg> Args for Vec<T> {
    fn count(&self) -> usize {
        self.len()
    }

    fn write_nth<B: BufMut>(&self, index: usize, out: &mut ArgWriter<'_, B>) {
        self.as_slice().write_nth(index, out)
    }
}

impl Args for () {
    fn count(&self) -> usize {
        0
    }

    fn write_nth<B: BufMut>(&self, _: usize, _: &mut ArgWriter<'_, B>) {}
}

macro_rules! tuple_args {
    ($n:expr; $($idx:tt $name:ident),+) => {
        impl<$($name: Arg),+> Args for ($($name,)+) {
            fn count(&self) -> usize {
                $n
            }

            fn write_nth<Buf: BufMut>(&self, index: usize, out: &mut ArgWriter<'_, Buf>) {
                match index {
                    $($idx => { out.arg(&self.$idx); })+
                    _ => {}
                }
            }
        }
    };
}

tuple_args!(1; 0 A);
tuple_args!(2; 0 A, 1 B);
tuple_args!(3; 0 A, 1 B, 2 C);
tuple_args!(4; 0 A, 1 B, 2 C, 3 D);
tuple_args!(5; 0 A, 1 B, 2 C, 3 D, 4 E);
tuple_args!(6; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F);

/// Maps a request value of shape `V` to the arguments following the
/// command name.
pub trait Formatter<V: ?Sized>: Send + Sync {
    fn arg_count(&self, command: &[u8], value: &V) -> usize;

    fn write_args<B: BufMut>(&self, command: &[u8], value: &V, out: &mut ArgWriter<'_, B>);
}

/// Writes every argument in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plain;

impl<V: Args + ?Sized> Formatter<V> for Plain {
    fn arg_count(&self, _: &[u8], value: &V) -> usize {
        value.count()
    }

    fn write_args<B: BufMut>(&self, _: &[u8], value: &V, out: &mut ArgWriter<'_, B>) {
        for i in 0..value.count() {
            value.write_nth(i, out);
        }
    }
}

/// One slot of a [`Template`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    /// A fixed token such as `EX` or `WITHSCORES`.
    Literal(&'static [u8]),
    /// The argument at this index.
    Arg(usize),
    /// Every argument from this index on.
    Rest(usize),
}

/// Interleaves literals and positional arguments in a fixed order.
#[derive(Debug, Clone, Copy)]
pub struct Template {
    parts: &'static [Part],
}

impl Template {
    pub const fn new(parts: &'static [Part]) -> Self {
        Self { parts }
    }
}

impl<V: Args + ?Sized> Formatter<V> for Template {
    fn arg_count(&self, _: &[u8], value: &V) -> usize {
        self.parts
            .iter()
            .map(|part| match *part {
                Part::Literal(_) => 1,
                Part::Arg(i) => usize::from(i < value.count()),
                Part::Rest(from) => value.count().saturating_sub(from),
            })
            .sum()
    }

    fn write_args<B: BufMut>(&self, _: &[u8], value: &V, out: &mut ArgWriter<'_, B>) {
        for part in self.parts {
            match *part {
                Part::Literal(token) => {
                    out.arg(token);
                }
                Part::Arg(i) => value.write_nth(i, out),
                Part::Rest(from) => {
                    for i in from..value.count() {
                        value.write_nth(i, out);
                    }
                }
            }
        }
    }
}

/// Serialize `command` followed by the formatter's arguments.
pub fn write_command<V, F, B>(out: &mut B, command: &[u8], formatter: &F, value: &V)
where
    V: ?Sized,
    F: Formatter<V> + ?Sized,
    B: BufMut,
{
    let argc = 1 + formatter.arg_count(command, value);
    let mut writer = ArgWriter::begin(out, argc);
    writer.arg(command);
    formatter.write_args(command, value, &mut writer);
    writer.finish();
}

/// Anything that can serialize itself as one command.
pub trait WriteRequest {
    fn write_to(&self, out: &mut BytesMut);

    /// The command name, for logging and profiling.
    fn command(&self) -> &[u8];
}

impl<T: WriteRequest + ?Sized> WriteRequest for &T {
    fn write_to(&self, out: &mut BytesMut) {
        (**self).write_to(out)
    }

    fn command(&self) -> &[u8] {
        (**self).command()
    }
}

/// A command name, a formatter, and the value it formats.
#[derive(Debug, Clone, Copy)]
pub struct Formatted<'f, F, V> {
    command: &'static [u8],
    formatter: &'f F,
    value: V,
}

impl<'f, F, V> Formatted<'f, F, V> {
    pub fn new(command: &'static [u8], formatter: &'f F, value: V) -> Self {
        Self {
            command,
            formatter,
            value,
        }
    }
}

impl<F: Formatter<V>, V> WriteRequest for Formatted<'_, F, V> {
    fn write_to(&self, out: &mut BytesMut) {
        write_command(out, self.command, self.formatter, &self.value);
    }

    fn command(&self) -> &[u8] {
        self.command
    }
}
