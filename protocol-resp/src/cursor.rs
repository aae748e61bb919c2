//! Read-only, position-tracking view over possibly segmented bytes.
//!
//! A [`Cursor`] never copies bytes on its own. Callers that need a contiguous
//! view across a segment boundary get an owned copy (`Cow::Owned`) only for
//! that request; everything else is borrowed from the segments.
//!
//! The cursor borrows the underlying memory, so it cannot outlive the decode
//! call that created it.

use std::borrow::Cow;

#[derive(Debug, Clone, Copy)]
enum Segments<'a> {
    One(&'a [u8]),
    Many(&'a [&'a [u8]]),
}

impl<'a> Segments<'a> {
    #[inline]
    fn count(&self) -> usize {
        match self {
            Segments::One(_) => 1,
            Segments::Many(s) => s.len(),
        }
    }

    #[inline]
    fn get(&self, i: usize) -> &'a [u8] {
        match self {
            Segments::One(s) => s,
            Segments::Many(s) => s[i],
        }
    }
}

/// A cursor over one or more byte segments.
///
/// `Cursor` is `Copy`: saving a position is a copy, and restoring it is an
/// assignment. Decoders work on a copy and commit only on success.
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    segments: Segments<'a>,
    seg: usize,
    off: usize,
    pos: usize,
    len: usize,
}

impl<'a> Cursor<'a> {
    /// Cursor over a single contiguous buffer.
    pub fn new(data: &'a [u8]) -> Self {
        let mut cursor = Self {
            segments: Segments::One(data),
            seg: 0,
            off: 0,
            pos: 0,
            len: data.len(),
        };
        cursor.normalize();
        cursor
    }

    /// Cursor over several buffers, read in order as one sequence.
    pub fn segmented(segments: &'a [&'a [u8]]) -> Self {
        let mut cursor = Self {
            segments: Segments::Many(segments),
            seg: 0,
            off: 0,
            pos: 0,
            len: segments.iter().map(|s| s.len()).sum(),
        };
        cursor.normalize();
        cursor
    }

    /// Bytes consumed since the cursor was created.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.len - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// True if the cursor spans more than one segment.
    pub fn is_segmented(&self) -> bool {
        self.segments.count() > 1
    }

    // Skip exhausted (and empty) segments so `seg` always points at a byte
    // when one remains.
    #[inline]
    fn normalize(&mut self) {
        let count = self.segments.count();
        while self.seg < count && self.off >= self.segments.get(self.seg).len() {
            self.seg += 1;
            self.off = 0;
        }
    }

    /// The contiguous bytes left in the current segment.
    #[inline]
    pub fn chunk(&self) -> &'a [u8] {
        if self.seg < self.segments.count() {
            &self.segments.get(self.seg)[self.off..]
        } else {
            &[]
        }
    }

    /// Next byte without consuming it.
    #[inline]
    pub fn peek(&self) -> Option<u8> {
        self.chunk().first().copied()
    }

    /// Byte at `rel` bytes past the current position.
    pub fn byte_at(&self, rel: usize) -> Option<u8> {
        if rel >= self.remaining() {
            return None;
        }
        let mut rel = rel;
        let mut s = self.seg;
        let mut o = self.off;
        loop {
            let seg = self.segments.get(s);
            let avail = seg.len() - o;
            if rel < avail {
                return Some(seg[o + rel]);
            }
            rel -= avail;
            s += 1;
            o = 0;
        }
    }

    /// Move forward `n` bytes. Returns false (without moving) if fewer than
    /// `n` bytes remain.
    pub fn advance(&mut self, n: usize) -> bool {
        if n > self.remaining() {
            return false;
        }
        let mut n = n;
        while n > 0 {
            let avail = self.chunk().len();
            let step = avail.min(n);
            self.off += step;
            self.pos += step;
            n -= step;
            self.normalize();
        }
        true
    }

    /// The next `n` bytes as a borrowed slice, if they are contiguous.
    /// Does not advance.
    #[inline]
    pub fn span(&self, n: usize) -> Option<&'a [u8]> {
        let chunk = self.chunk();
        if chunk.len() >= n {
            Some(&chunk[..n])
        } else {
            None
        }
    }

    /// Consume the next `n` bytes, borrowing when contiguous and copying only
    /// when they straddle a segment boundary.
    pub fn read_exact(&mut self, n: usize) -> Option<Cow<'a, [u8]>> {
        if let Some(span) = self.span(n) {
            self.advance(n);
            return Some(Cow::Borrowed(span));
        }
        if n > self.remaining() {
            return None;
        }
        let mut out = vec![0u8; n];
        self.copy_to(&mut out);
        Some(Cow::Owned(out))
    }

    /// Copy exactly `dst.len()` bytes into `dst` and advance past them.
    /// Returns false (without moving) if not enough bytes remain.
    pub fn copy_to(&mut self, dst: &mut [u8]) -> bool {
        if dst.len() > self.remaining() {
            return false;
        }
        let mut filled = 0;
        while filled < dst.len() {
            let chunk = self.chunk();
            let step = chunk.len().min(dst.len() - filled);
            dst[filled..filled + step].copy_from_slice(&chunk[..step]);
            filled += step;
            self.off += step;
            self.pos += step;
            self.normalize();
        }
        true
    }

    /// Offset (from the current position) of the next `\r\n`, if present.
    pub fn find_crlf(&self) -> Option<usize> {
        let count = self.segments.count();
        let mut base = 0;
        let mut s = self.seg;
        let mut o = self.off;
        while s < count {
            let slice = &self.segments.get(s)[o..];
            let mut from = 0;
            while let Some(i) = memchr::memchr(b'\r', &slice[from..]) {
                let at = from + i;
                let next = if at + 1 < slice.len() {
                    Some(slice[at + 1])
                } else {
                    self.byte_at(base + at + 1)
                };
                match next {
                    Some(b'\n') => return Some(base + at),
                    None => return None,
                    Some(_) => from = at + 1,
                }
            }
            base += slice.len();
            s += 1;
            o = 0;
        }
        None
    }

    /// Consume one `\r\n`-terminated line, returning it without the
    /// terminator. Returns `None` (without moving) if no terminator is
    /// available yet.
    pub fn read_line(&mut self) -> Option<Cow<'a, [u8]>> {
        let end = self.find_crlf()?;
        let line = self.read_exact(end)?;
        self.advance(2);
        Some(line)
    }

    /// Consume `\r\n` if it is next. `None` means not enough bytes yet.
    pub fn eat_crlf(&mut self) -> Option<bool> {
        match (self.byte_at(0), self.byte_at(1)) {
            (Some(b'\r'), Some(b'\n')) => {
                self.advance(2);
                Some(true)
            }
            (Some(b'\r'), None) | (None, _) => None,
            _ => Some(false),
        }
    }
}
