//! HTTP/1.1 chunked transfer framing.
//!
//! A chunk is an ASCII decimal size, CRLF, that many payload bytes, CRLF; a
//! zero size terminates the stream. The reader yields payload bytes only and
//! never hands framing back to the caller.

use crate::io::{Error, Reader, Result, Writer};

// one chunk per write, capped so the size always fits eight digits
const MAX_CHUNK: usize = 99_999_999;

/// Decodes a chunked transfer stream from an underlying [`Reader`].
///
/// After the terminating zero-size chunk every read reports
/// [`Error::Closed`]; any framing violation reports
/// [`Error::IllegalSequence`]. A violation hit after payload bytes were
/// already copied out surfaces the count first and the error on the next
/// call.
#[derive(Debug)]
pub struct ChunkedReader<R> {
    inner: R,
    // payload bytes left in the current chunk
    chunk_left: usize,
    done: bool,
    // failure held back because a read had already transferred bytes
    pending_error: Option<Error>,
}

impl<R: Reader> ChunkedReader<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        ChunkedReader {
            inner,
            chunk_left: 0,
            done: false,
            pending_error: None,
        }
    }

    /// Mutable reference to the underlying reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    async fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.inner.read(&mut byte).await?;
        Ok(byte[0])
    }

    // Parses `<decimal-size>\r\n`. At least one digit is required.
    async fn next_chunk_size(&mut self) -> Result<usize> {
        let mut size: usize = 0;
        let mut seen_digit = false;

        loop {
            match self.read_byte().await? {
                digit @ b'0'..=b'9' => {
                    size = size
                        .checked_mul(10)
                        .and_then(|s| s.checked_add((digit - b'0') as usize))
                        .ok_or(Error::IllegalSequence)?;
                    seen_digit = true;
                }
                b'\r' => {
                    if !seen_digit || self.read_byte().await? != b'\n' {
                        return Err(Error::IllegalSequence);
                    }
                    return Ok(size);
                }
                _ => return Err(Error::IllegalSequence),
            }
        }
    }

    // Consumes the CRLF that closes a chunk (or the terminal chunk). Both
    // bytes are read unconditionally so a violation never leaves half a
    // terminator on the stream.
    async fn expect_crlf(&mut self) -> Result<()> {
        let first = self.read_byte().await?;
        let second = self.read_byte().await?;
        if first != b'\r' || second != b'\n' {
            return Err(Error::IllegalSequence);
        }
        Ok(())
    }

    // Surfaces the transferred count now and holds the error for the next
    // call; with nothing transferred the error goes out immediately.
    fn defer(&mut self, total: usize, err: Error) -> Result<usize> {
        if total > 0 {
            self.pending_error = Some(err);
            Ok(total)
        } else {
            Err(err)
        }
    }
}

impl<R: Reader> Reader for ChunkedReader<R> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        if self.done {
            return Err(Error::Closed);
        }

        let mut total = 0;

        while total < buf.len() {
            if self.chunk_left == 0 {
                let size = match self.next_chunk_size().await {
                    Ok(size) => size,
                    Err(err) => return self.defer(total, err),
                };

                if size == 0 {
                    match self.expect_crlf().await {
                        Ok(()) => {}
                        Err(err) => return self.defer(total, err),
                    }
                    self.done = true;
                    break;
                }
                self.chunk_left = size;
            }

            let want = (buf.len() - total).min(self.chunk_left);
            match self.inner.read(&mut buf[total..total + want]).await {
                Ok(n) => {
                    total += n;
                    self.chunk_left -= n;
                }
                Err(err) => return self.defer(total, err),
            }

            if self.chunk_left == 0 {
                match self.expect_crlf().await {
                    Ok(()) => {}
                    Err(err) => return self.defer(total, err),
                }
            }
        }

        if total == 0 && self.done {
            return Err(Error::Closed);
        }
        Ok(total)
    }
}

/// Encodes writes as chunked transfer frames on an underlying [`Writer`].
///
/// Each write emits one or more complete chunks. The terminating
/// `0 CRLF CRLF` is only written by [`finish`], which is the caller's duty
/// when the payload ends; afterwards the writer refuses further writes.
///
/// [`finish`]: ChunkedWriter::finish
#[derive(Debug)]
pub struct ChunkedWriter<W> {
    inner: W,
    closed: bool,
}

impl<W: Writer> ChunkedWriter<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        ChunkedWriter {
            inner,
            closed: false,
        }
    }

    /// Writes the terminating zero-size chunk and flushes. Idempotent.
    pub async fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.inner.write_all(b"0\r\n\r\n").await?;
        self.inner.flush().await?;
        self.closed = true;
        Ok(())
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Writer> Writer for ChunkedWriter<W> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::InvalidArgument);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        let mut size_buf = [0u8; 16];

        while written < buf.len() {
            let len = (buf.len() - written).min(MAX_CHUNK);

            let header = format_size(len, &mut size_buf);
            self.inner.write_all(header).await?;
            self.inner.write_all(&buf[written..written + len]).await?;
            self.inner.write_all(b"\r\n").await?;

            written += len;
        }

        Ok(written)
    }

    async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await
    }
}

// Renders `<len>\r\n` into `buf` and returns the used prefix.
fn format_size(len: usize, buf: &mut [u8; 16]) -> &[u8] {
    let mut digits = [0u8; 12];
    let mut i = digits.len();
    let mut value = len;
    loop {
        i -= 1;
        digits[i] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }

    let count = digits.len() - i;
    buf[..count].copy_from_slice(&digits[i..]);
    buf[count] = b'\r';
    buf[count + 1] = b'\n';
    &buf[..count + 2]
}
