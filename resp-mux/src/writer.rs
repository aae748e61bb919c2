//! Dedicated writer task.
//!
//! Callers never touch the write half. Serialized requests travel over a
//! bounded mpsc channel to one task that moves their remotes onto the
//! pending queue and then writes their bytes, so queue order and byte order
//! are the same order: the order the channel accepted them in. Frames that
//! are already waiting are coalesced into one vectored write.

use std::io::IoSlice;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::Error;
use crate::metrics;
use crate::transport::{InFlight, Shared, TransportState};

/// Serialized requests plus the operations awaiting their replies, in
/// request order.
pub(crate) struct Outbound {
    pub(crate) bytes: Bytes,
    pub(crate) requests: Requests,
}

pub(crate) enum Requests {
    One(InFlight),
    Many(Vec<InFlight>),
}

impl Requests {
    pub(crate) fn len(&self) -> usize {
        match self {
            Requests::One(_) => 1,
            Requests::Many(v) => v.len(),
        }
    }
}

impl IntoIterator for Requests {
    type Item = InFlight;
    type IntoIter = RequestsIter;

    fn into_iter(self) -> RequestsIter {
        match self {
            Requests::One(one) => RequestsIter::One(Some(one)),
            Requests::Many(many) => RequestsIter::Many(many.into_iter()),
        }
    }
}

pub(crate) enum RequestsIter {
    One(Option<InFlight>),
    Many(std::vec::IntoIter<InFlight>),
}

impl Iterator for RequestsIter {
    type Item = InFlight;

    fn next(&mut self) -> Option<InFlight> {
        match self {
            RequestsIter::One(one) => one.take(),
            RequestsIter::Many(many) => many.next(),
        }
    }
}

/// Receive outbound frames until the transport stops, writing each batch.
pub(crate) async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Outbound>,
    mut writer: W,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Unpin,
{
    let max_batch = shared.config.max_batch_frames;
    let mut frames: Vec<Outbound> = Vec::with_capacity(max_batch);
    let mut batch: Vec<Bytes> = Vec::with_capacity(max_batch);

    loop {
        let first = tokio::select! {
            frame = rx.recv() => match frame {
                Some(f) => f,
                // Every transport handle is gone: drain like `close` and
                // keep the write half open until the read loop is done.
                None => {
                    if shared.drain() {
                        debug!("all transport handles dropped, draining");
                    }
                    while shared.state() != TransportState::Closed {
                        shared.stop_writer.notified().await;
                    }
                    break;
                }
            },
            _ = shared.stop_writer.notified() => break,
        };

        frames.push(first);
        while frames.len() < max_batch {
            match rx.try_recv() {
                Ok(frame) => frames.push(frame),
                Err(_) => break,
            }
        }

        batch.clear();
        let requests = frames.iter().map(|f| f.requests.len()).sum::<usize>();
        if !shared.admit(frames.drain(..), &mut batch) {
            break;
        }

        let bytes: usize = batch.iter().map(Bytes::len).sum();
        if let Err(e) = write_batch(&mut writer, &batch).await {
            shared.fail(Error::from(e));
            break;
        }
        metrics::BYTES_SENT.add(bytes as u64);
        metrics::REQUESTS_WRITTEN.add(requests as u64);
        trace!(frames = batch.len(), requests, bytes, "write batch flushed");
    }

    // Anything still queued never reached the wire.
    rx.close();
    while let Ok(frame) = rx.try_recv() {
        shared.reject(frame);
    }
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "write half shutdown failed");
    }
}

/// Write all of `batch`, resuming after partial vectored writes.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(Bytes::len).sum();
    let slices: Vec<IoSlice<'_>> = batch.iter().map(|b| IoSlice::new(b)).collect();

    let written = writer.write_vectored(&slices).await?;
    if written == total_size {
        writer.flush().await?;
        return Ok(());
    }
    if written == 0 {
        return Err(write_zero());
    }

    let mut total_written = written;
    while total_written < total_size {
        let remaining = remaining_slices(batch, total_written);
        let written = writer.write_vectored(&remaining).await?;
        if written == 0 {
            return Err(write_zero());
        }
        total_written += written;
    }

    writer.flush().await
}

fn write_zero() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::WriteZero, "write_vectored returned 0")
}

/// Slices for whatever is left after the first `skip` bytes of `batch`.
fn remaining_slices(batch: &[Bytes], skip: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut start = 0;
    for frame in batch {
        let end = start + frame.len();
        if skip < end {
            slices.push(IoSlice::new(&frame[skip.saturating_sub(start)..]));
        }
        start = end;
    }
    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts at most `limit` bytes per write call.
    struct Trickle {
        out: Vec<u8>,
        limit: usize,
    }

    impl AsyncWrite for Trickle {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            let n = buf.len().min(self.limit);
            self.out.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_remaining_slices_skip_into_middle() {
        let batch = [
            Bytes::from_static(b"abc"),
            Bytes::from_static(b"defg"),
            Bytes::from_static(b"h"),
        ];
        let rest = remaining_slices(&batch, 4);
        let joined: Vec<u8> = rest.iter().flat_map(|s| s.iter().copied()).collect();
        assert_eq!(joined, b"efgh");

        let rest = remaining_slices(&batch, 3);
        assert_eq!(rest.len(), 2);
        assert!(remaining_slices(&batch, 8).is_empty());
    }

    #[tokio::test]
    async fn test_write_batch_survives_partial_writes() {
        let batch = [
            Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"),
            Bytes::from_static(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"),
        ];
        let mut sink = Trickle {
            out: Vec::new(),
            limit: 3,
        };
        write_batch(&mut sink, &batch).await.unwrap();
        assert_eq!(sink.out, [&batch[0][..], &batch[1][..]].concat());
    }

    #[tokio::test]
    async fn test_write_zero_is_an_error() {
        let mut sink = Trickle {
            out: Vec::new(),
            limit: 0,
        };
        let err = write_batch(&mut sink, &[Bytes::from_static(b"+x\r\n")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WriteZero);
    }
}
