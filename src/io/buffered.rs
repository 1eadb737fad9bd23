//! Fixed-capacity buffering over a [`Reader`] or [`Writer`].

use super::{Error, Reader, Result, Writer};

const DEFAULT_CAPACITY: usize = 1024;

/// Buffers reads from an underlying [`Reader`].
///
/// The underlying reader is never asked for more than `capacity` bytes at a
/// time. Requests larger than the buffered amount drain the buffer, read
/// capacity-sized chunks straight into the caller's buffer, and refill the
/// internal buffer once for the final partial chunk.
#[derive(Debug)]
pub struct BufReader<R> {
    inner: R,
    buf: Vec<u8>,
    cap: usize,
    // failure held back because a read had already transferred bytes
    pending_error: Option<Error>,
}

impl<R: Reader> BufReader<R> {
    /// Wraps `inner` with the default 1 KiB buffer.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_CAPACITY)
    }

    /// Wraps `inner` with a buffer of `capacity` bytes.
    pub fn with_capacity(inner: R, capacity: usize) -> Self {
        BufReader {
            inner,
            buf: Vec::with_capacity(capacity),
            cap: capacity.max(1),
            pending_error: None,
        }
    }

    /// The fixed buffer capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Number of unconsumed bytes currently buffered.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next byte without consuming it, refilling the buffer if it
    /// is empty. `Ok(None)` means the stream ended.
    pub async fn peek(&mut self) -> Result<Option<u8>> {
        if self.buf.is_empty() {
            match self.fill().await {
                Ok(()) => {}
                Err(Error::Closed) => return Ok(None),
                Err(err) => return Err(err),
            }
        }

        Ok(self.buf.first().copied())
    }

    /// Switches to `other`, clearing the buffer and any held-back error, and
    /// returning the previous stream. The capacity is preserved.
    pub fn reset(&mut self, other: R) -> R {
        self.buf.clear();
        self.pending_error = None;
        std::mem::replace(&mut self.inner, other)
    }

    /// Shared reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Mutable reference to the underlying reader.
    ///
    /// Reading from it directly bypasses (and desynchronizes) the buffer.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Discards the buffer and returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    // Surfaces the transferred count now and holds the error for the next
    // call; with nothing transferred the error goes out immediately.
    fn report_partial(&mut self, total: usize, err: Error) -> Result<usize> {
        if total > 0 {
            self.pending_error = Some(err);
            Ok(total)
        } else {
            Err(err)
        }
    }

    async fn fill(&mut self) -> Result<()> {
        if self.buf.len() == self.cap {
            return Ok(());
        }

        let start = self.buf.len();
        self.buf.resize(self.cap, 0);
        match self.inner.read(&mut self.buf[start..]).await {
            Ok(n) => {
                self.buf.truncate(start + n);
                Ok(())
            }
            Err(err) => {
                self.buf.truncate(start);
                Err(err)
            }
        }
    }
}

impl<R: Reader> Reader for BufReader<R> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }

        // easy way out
        let len = buf.len();
        if len <= self.buf.len() {
            buf.copy_from_slice(&self.buf[..len]);
            self.buf.drain(..len);
            return Ok(len);
        }

        let mut total = 0;
        if !self.buf.is_empty() {
            buf[..self.buf.len()].copy_from_slice(&self.buf);
            total += self.buf.len();
            self.buf.clear();
        }

        // The buffer is now empty. While the remaining request exceeds the
        // capacity, skip the copy and read straight into the caller's buffer.
        while len - total > self.cap {
            match self.inner.read(&mut buf[total..total + self.cap]).await {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(err) => return self.report_partial(total, err),
            }
        }

        // Refill once for the final partial chunk and hand out what arrived.
        let leftover = len - total;
        if leftover > 0 {
            let fill_err = self.fill().await.err();

            let available = leftover.min(self.buf.len());
            buf[total..total + available].copy_from_slice(&self.buf[..available]);
            self.buf.drain(..available);
            total += available;

            // only report an error if the request could not be fulfilled
            if available < leftover {
                if let Some(err) = fill_err {
                    return self.report_partial(total, err);
                }
            }
        }

        Ok(total)
    }
}

/// Buffers writes to an underlying [`Writer`].
///
/// Writes fill the buffer and flush it when full; writes larger than the
/// capacity bypass the buffer after the initial fill. A short write from the
/// underlying stream shifts the unflushed bytes left and they are retried on
/// the next flush.
#[derive(Debug)]
pub struct BufWriter<W> {
    inner: W,
    buf: Vec<u8>,
    cap: usize,
    // failure held back because a write had already accepted bytes
    pending_error: Option<Error>,
}

impl<W: Writer> BufWriter<W> {
    /// Wraps `inner` with the default 1 KiB buffer.
    pub fn new(inner: W) -> Self {
        Self::with_capacity(inner, DEFAULT_CAPACITY)
    }

    /// Wraps `inner` with a buffer of `capacity` bytes.
    pub fn with_capacity(inner: W, capacity: usize) -> Self {
        BufWriter {
            inner,
            buf: Vec::with_capacity(capacity),
            cap: capacity.max(1),
            pending_error: None,
        }
    }

    /// The fixed buffer capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Number of unflushed bytes currently buffered.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Switches to `other`, dropping any unflushed bytes and any held-back
    /// error, and returning the previous stream. The capacity is preserved.
    pub fn reset(&mut self, other: W) -> W {
        self.buf.clear();
        self.pending_error = None;
        std::mem::replace(&mut self.inner, other)
    }

    /// Mutable reference to the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Returns the underlying writer, dropping any unflushed bytes.
    pub fn into_inner(self) -> W {
        self.inner
    }

    // Surfaces the accepted count now and holds the error for the next call;
    // with nothing accepted the error goes out immediately.
    fn report_partial(&mut self, total: usize, err: Error) -> Result<usize> {
        if total > 0 {
            self.pending_error = Some(err);
            Ok(total)
        } else {
            Err(err)
        }
    }

    // Writes buffered bytes down until none remain; on failure the bytes
    // already taken are shifted out so the rest is retried on the next flush.
    async fn flush_buffered(&mut self) -> Result<()> {
        let mut written = 0;
        while written < self.buf.len() {
            match self.inner.write(&self.buf[written..]).await {
                Ok(0) => {
                    self.buf.drain(..written);
                    return Err(Error::Closed);
                }
                Ok(n) => written += n,
                Err(err) => {
                    self.buf.drain(..written);
                    return Err(err);
                }
            }
        }

        self.buf.clear();
        Ok(())
    }
}

impl<W: Writer> Writer for BufWriter<W> {
    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }

        // fill up the buffer as much as possible first...
        let mut total = 0;
        if self.buf.len() < self.cap {
            let available = (self.cap - self.buf.len()).min(data.len());
            self.buf.extend_from_slice(&data[..available]);
            total += available;
        }

        // we might be done!
        if total == data.len() {
            return Ok(total);
        }

        // The buffer is full and there is more to write, so flush it.
        if let Err(err) = self.flush_buffered().await {
            return self.report_partial(total, err);
        }

        // Bypass the buffer while writes are larger than the capacity.
        while data.len() - total > self.cap {
            match self.inner.write(&data[total..total + self.cap]).await {
                Ok(0) => return self.report_partial(total, Error::Closed),
                Ok(n) => total += n,
                Err(err) => return self.report_partial(total, err),
            }
        }

        // The rest fits in the (empty) buffer.
        let leftover = data.len() - total;
        self.buf.extend_from_slice(&data[total..]);
        total += leftover;

        Ok(total)
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        self.flush_buffered().await?;
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block_on;

    // Serves a canned byte sequence in slices of at most `chunk` bytes,
    // recording the size of every request made to it.
    struct ShortReader {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
        requests: Vec<usize>,
    }

    impl ShortReader {
        fn new(data: &[u8], chunk: usize) -> Self {
            ShortReader {
                data: data.to_vec(),
                pos: 0,
                chunk,
                requests: Vec::new(),
            }
        }
    }

    impl Reader for ShortReader {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            self.requests.push(buf.len());
            if self.pos == self.data.len() {
                return Err(Error::Closed);
            }
            let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn small_reads_come_from_the_buffer() {
        block_on(async {
            let src = ShortReader::new(b"abcdefgh", 64);
            let mut reader = BufReader::with_capacity(src, 4);

            let mut buf = [0u8; 2];
            assert_eq!(reader.read(&mut buf).await, Ok(2));
            assert_eq!(&buf, b"ab");
            assert_eq!(reader.buffered(), 2);

            assert_eq!(reader.read(&mut buf).await, Ok(2));
            assert_eq!(&buf, b"cd");

            // two caller reads, one underlying read
            assert_eq!(reader.get_ref().requests.len(), 1);
        });
    }

    #[test]
    fn never_requests_more_than_capacity() {
        block_on(async {
            let src = ShortReader::new(&[7u8; 64], 64);
            let mut reader = BufReader::with_capacity(src, 8);

            let mut buf = [0u8; 30];
            assert_eq!(reader.read(&mut buf).await, Ok(30));
            assert!(reader.get_ref().requests.iter().all(|&r| r <= 8));
        });
    }

    #[test]
    fn large_read_returns_exactly_what_was_asked() {
        block_on(async {
            let data: Vec<u8> = (0..=255).collect();
            let src = ShortReader::new(&data, 3);
            let mut reader = BufReader::with_capacity(src, 16);

            let mut buf = vec![0u8; 256];
            let mut total = 0;
            while total < buf.len() {
                total += reader.read(&mut buf[total..]).await.unwrap();
            }
            assert_eq!(buf, data);
        });
    }

    #[test]
    fn peek_refills_and_does_not_consume() {
        block_on(async {
            let mut reader = BufReader::with_capacity(&b"xy"[..], 4);
            assert_eq!(reader.peek().await, Ok(Some(b'x')));
            assert_eq!(reader.peek().await, Ok(Some(b'x')));

            let mut buf = [0u8; 2];
            assert_eq!(reader.read(&mut buf).await, Ok(2));
            assert_eq!(reader.peek().await, Ok(None));
        });
    }

    #[test]
    fn reset_switches_streams_and_clears() {
        block_on(async {
            let mut reader = BufReader::with_capacity(&b"first"[..], 8);
            assert_eq!(reader.peek().await, Ok(Some(b'f')));

            reader.reset(&b"second"[..]);
            assert_eq!(reader.buffered(), 0);
            assert_eq!(reader.capacity(), 8);
            assert_eq!(reader.peek().await, Ok(Some(b's')));
        });
    }

    // Serves one chunk of data, then a hard error on every later request.
    struct FailingReader {
        data: Vec<u8>,
        served: bool,
    }

    impl Reader for FailingReader {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            if self.served {
                return Err(Error::Sys(5));
            }
            self.served = true;
            let n = buf.len().min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            Ok(n)
        }
    }

    #[test]
    fn trailing_error_surfaces_on_the_next_read() {
        block_on(async {
            let src = FailingReader {
                data: b"abcd".to_vec(),
                served: false,
            };
            let mut reader = BufReader::with_capacity(src, 4);

            // the partial transfer comes back first, the failure afterwards
            let mut buf = [0u8; 8];
            assert_eq!(reader.read(&mut buf).await, Ok(4));
            assert_eq!(&buf[..4], b"abcd");
            assert_eq!(reader.read(&mut buf).await, Err(Error::Sys(5)));
        });
    }

    #[test]
    fn end_of_stream_is_closed() {
        block_on(async {
            let mut reader = BufReader::with_capacity(&b"ab"[..], 4);
            let mut buf = [0u8; 4];
            assert_eq!(reader.read(&mut buf).await, Ok(2));
            assert_eq!(reader.read(&mut buf).await, Err(Error::Closed));
        });
    }

    // Accepts at most `chunk` bytes per write, recording everything accepted.
    struct ShortWriter {
        data: Vec<u8>,
        chunk: usize,
    }

    impl Writer for ShortWriter {
        async fn write(&mut self, buf: &[u8]) -> Result<usize> {
            let n = buf.len().min(self.chunk);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        async fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writer_buffers_until_flush() {
        block_on(async {
            let sink = ShortWriter {
                data: Vec::new(),
                chunk: 64,
            };
            let mut writer = BufWriter::with_capacity(sink, 8);

            assert_eq!(writer.write(b"abc").await, Ok(3));
            assert!(writer.get_mut().data.is_empty());
            assert_eq!(writer.buffered(), 3);

            writer.flush().await.unwrap();
            assert_eq!(writer.get_mut().data, b"abc");
            assert_eq!(writer.buffered(), 0);
        });
    }

    // Refuses every write outright.
    struct FailingWriter;

    impl Writer for FailingWriter {
        async fn write(&mut self, _buf: &[u8]) -> Result<usize> {
            Err(Error::Sys(32))
        }

        async fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writer_defers_errors_past_accepted_bytes() {
        block_on(async {
            let mut writer = BufWriter::with_capacity(FailingWriter, 4);

            // the first four bytes are buffered; the failed flush is held
            // back until the next call
            let data = [9u8; 12];
            assert_eq!(writer.write(&data).await, Ok(4));
            assert_eq!(writer.buffered(), 4);
            assert_eq!(writer.write(&data[4..]).await, Err(Error::Sys(32)));
        });
    }

    #[test]
    fn writer_size_never_exceeds_capacity() {
        block_on(async {
            let sink = ShortWriter {
                data: Vec::new(),
                chunk: 3,
            };
            let mut writer = BufWriter::with_capacity(sink, 8);

            let data: Vec<u8> = (0..100).collect();
            let mut total = 0;
            while total < data.len() {
                total += writer.write(&data[total..]).await.unwrap();
                assert!(writer.buffered() <= writer.capacity());
            }
            writer.flush().await.unwrap();

            assert_eq!(writer.get_mut().data, data);
        });
    }
}
