//! Forward-only sink that hands serialized PDF bytes to the response body.

use actix_web::web::Bytes;
use std::io::{self, Write};
use std::mem;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// Bytes buffered before a chunk is sent downstream.
pub const CHUNK_SIZE: usize = 64 * 1024;

pub type ChunkSender = mpsc::Sender<io::Result<Bytes>>;

/// Blocking writer feeding a bounded channel of body chunks.
///
/// Must run off the async executor (it uses `blocking_send`). Consumed by
/// [`ChunkWriter::finish`], which sends the tail and closes the stream. A
/// dropped receiver turns every further write into `BrokenPipe`.
pub struct ChunkWriter {
    tx: ChunkSender,
    buf: Vec<u8>,
    chunk_size: usize,
    written: u64,
}

impl ChunkWriter {
    pub fn new(tx: ChunkSender) -> Self {
        Self::with_chunk_size(tx, CHUNK_SIZE)
    }

    pub fn with_chunk_size(tx: ChunkSender, chunk_size: usize) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(chunk_size),
            chunk_size: chunk_size.max(1),
            written: 0,
        }
    }

    /// Send any buffered bytes and close the stream. Returns the total byte count.
    pub fn finish(mut self) -> io::Result<u64> {
        self.send_buffered()?;
        Ok(self.written)
    }

    /// Forward a failure to the reader so the response ends in an error
    /// instead of looking like a complete (truncated) document.
    pub fn abort(self, err: io::Error) {
        let _ = self.tx.blocking_send(Err(err));
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(mem::replace(
            &mut self.buf,
            Vec::with_capacity(self.chunk_size),
        ));
        let len = chunk.len() as u64;
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body receiver dropped"))?;
        self.written += len;
        Ok(())
    }
}

/// Move chunks from the serializer to the response body, giving up when the
/// body has not accepted a chunk within `stall_timeout`.
///
/// Returning drops `from`, so a serializer parked in [`ChunkWriter`] wakes up
/// with `BrokenPipe` instead of holding its thread forever. Resolves to the
/// number of bytes handed to the body.
pub async fn forward_chunks(
    mut from: mpsc::Receiver<io::Result<Bytes>>,
    to: ChunkSender,
    stall_timeout: Duration,
) -> io::Result<u64> {
    let mut forwarded = 0u64;
    while let Some(item) = from.recv().await {
        let len = item.as_ref().map_or(0, |chunk| chunk.len() as u64);
        match to.send_timeout(item, stall_timeout).await {
            Ok(()) => forwarded += len,
            Err(SendTimeoutError::Timeout(_)) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "client stopped reading for {:.1}s after {} bytes",
                        stall_timeout.as_secs_f64(),
                        forwarded
                    ),
                ));
            }
            Err(SendTimeoutError::Closed(_)) => {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "response body receiver dropped",
                ));
            }
        }
    }
    Ok(forwarded)
}

impl Write for ChunkWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.tx.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "response body receiver dropped",
            ));
        }
        self.buf.extend_from_slice(data);
        if self.buf.len() >= self.chunk_size {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_chunks_arrive_in_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let producer = thread::spawn(move || {
            let mut writer = ChunkWriter::with_chunk_size(tx, 4);
            writer.write_all(b"%PDF-1.5\n").unwrap();
            writer.write_all(b"%%EOF").unwrap();
            writer.finish().unwrap()
        });

        let mut received = Vec::new();
        let mut chunks = 0;
        while let Some(chunk) = rx.blocking_recv() {
            received.extend_from_slice(&chunk.unwrap());
            chunks += 1;
        }
        assert_eq!(producer.join().unwrap(), 14);
        assert_eq!(received, b"%PDF-1.5\n%%EOF");
        assert_eq!(chunks, 2);
    }

    #[test]
    fn test_small_output_is_held_until_finish() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut writer = ChunkWriter::with_chunk_size(tx, 1024);
        writer.write_all(b"abc").unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(writer.finish().unwrap(), 3);
        assert_eq!(&rx.try_recv().unwrap().unwrap()[..], b"abc");
        // Sender dropped by finish: the stream is closed.
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn test_dropped_receiver_is_broken_pipe() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let mut writer = ChunkWriter::with_chunk_size(tx, 2);
        let err = writer.write_all(b"abcdef").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_forward_passes_everything_through() {
        let (writer_tx, writer_rx) = mpsc::channel(2);
        let (body_tx, mut body_rx) = mpsc::channel(2);
        let forwarder = tokio::spawn(forward_chunks(writer_rx, body_tx, Duration::from_secs(5)));
        let producer = tokio::task::spawn_blocking(move || {
            let mut writer = ChunkWriter::with_chunk_size(writer_tx, 3);
            writer.write_all(b"%PDF-").unwrap();
            writer.write_all(b"%%EOF").unwrap();
            writer.finish()
        });

        let mut received = Vec::new();
        while let Some(chunk) = body_rx.recv().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received, b"%PDF-%%EOF");
        assert_eq!(producer.await.unwrap().unwrap(), 10);
        assert_eq!(forwarder.await.unwrap().unwrap(), 10);
    }

    #[tokio::test]
    async fn test_stalled_reader_releases_writer() {
        let (writer_tx, writer_rx) = mpsc::channel(1);
        // Kept alive but never read, like a client that stopped reading.
        let (body_tx, _body_rx) = mpsc::channel(1);
        let forwarder = tokio::spawn(forward_chunks(writer_rx, body_tx, Duration::from_millis(50)));
        let producer = tokio::task::spawn_blocking(move || {
            let mut writer = ChunkWriter::with_chunk_size(writer_tx, 4);
            for _ in 0..100 {
                writer.write_all(b"data")?;
            }
            writer.finish()
        });

        let err = producer.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        let err = forwarder.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_forward_stops_when_body_dropped() {
        let (writer_tx, writer_rx) = mpsc::channel(1);
        let (body_tx, body_rx) = mpsc::channel(1);
        drop(body_rx);
        writer_tx.send(Ok(Bytes::from_static(b"x"))).await.unwrap();
        let err = forward_chunks(writer_rx, body_tx, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_abort_delivers_error() {
        let (tx, mut rx) = mpsc::channel(4);
        let writer = ChunkWriter::new(tx);
        writer.abort(io::Error::other("serializer failed"));
        let item = rx.blocking_recv().unwrap();
        assert!(item.is_err());
        assert!(rx.blocking_recv().is_none());
    }
}
