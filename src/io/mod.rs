//! Byte-oriented I/O: the error taxonomy, the suspendable [`Reader`] and
//! [`Writer`] contracts, and adapters over them.
//!
//! Short reads and writes are legal everywhere; callers that need a full
//! transfer loop (or use [`Writer::write_all`]). End-of-stream is reported as
//! [`Error::Closed`] on a non-empty buffer, so `Ok(0)` is reserved for
//! zero-length requests.

use std::fmt::Display;
use std::future::Future;
use std::io::ErrorKind;

mod buffered;
mod limit;

pub use buffered::{BufReader, BufWriter};
pub use limit::LimitReader;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure categories for runtime and codec operations.
///
/// The many OS error codes that imply a half-closed or reset connection are
/// collapsed onto [`Error::Closed`]; anything else OS-level is carried as
/// [`Error::Sys`] with its errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Peer closed, descriptor shut down, or end of stream.
    Closed,
    /// A reactor deadline fired before the operation became ready.
    TimedOut,
    /// Misuse of an API surface.
    InvalidArgument,
    /// A parser saw a violation of the wire format.
    IllegalSequence,
    /// A bounded resource ran out.
    ResourceExhausted,
    /// Non-blocking operation would block; suppressed by awaiting readiness.
    WouldBlock,
    /// The scheduler shut down while the operation was pending.
    Cancelled,
    /// Any other OS error, by errno.
    Sys(i32),
}

impl Error {
    fn description_str(&self) -> &'static str {
        match *self {
            Error::Closed => "closed",
            Error::TimedOut => "timed out",
            Error::InvalidArgument => "invalid argument",
            Error::IllegalSequence => "illegal byte sequence",
            Error::ResourceExhausted => "resource exhausted",
            Error::WouldBlock => "operation would block",
            Error::Cancelled => "cancelled",
            Error::Sys(_) => "system error",
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Error::Sys(errno) => write!(f, "system error (errno {})", errno),
            _ => f.write_str(self.description_str()),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::WouldBlock => Error::WouldBlock,
            ErrorKind::TimedOut => Error::TimedOut,
            ErrorKind::InvalidInput => Error::InvalidArgument,
            ErrorKind::InvalidData => Error::IllegalSequence,
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof => Error::Closed,
            _ => Error::Sys(err.raw_os_error().unwrap_or(-1)),
        }
    }
}

/// A suspendable source of bytes.
///
/// `read` transfers up to `buf.len()` bytes and returns the count. Short reads
/// do not imply an error. `Ok(0)` is only returned for an empty `buf`;
/// end-of-stream on a non-empty buffer is `Err(Error::Closed)`.
pub trait Reader: Send {
    /// Reads up to `buf.len()` bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send;
}

/// A suspendable sink for bytes.
///
/// `write` transfers up to `buf.len()` bytes and returns the count; callers
/// must loop (or use [`Writer::write_all`]) for a full transfer.
pub trait Writer: Send {
    /// Writes up to `buf.len()` bytes from `buf`.
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Pushes any buffered bytes down to the underlying sink.
    fn flush(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Writes the whole of `buf`, looping over short writes. Returns the first
    /// error encountered; bytes written before it are lost to the caller.
    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = Result<()>> + Send
    where
        Self: Sized,
    {
        async move {
            let mut total = 0;
            while total < buf.len() {
                match self.write(&buf[total..]).await? {
                    0 => return Err(Error::Closed),
                    n => total += n,
                }
            }
            Ok(())
        }
    }
}

impl<R: Reader> Reader for &mut R {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf).await
    }
}

impl<W: Writer> Writer for &mut W {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf).await
    }

    async fn flush(&mut self) -> Result<()> {
        (**self).flush().await
    }
}

/// In-memory reader over a byte slice; completes immediately.
impl Reader for &[u8] {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.is_empty() {
            return Err(Error::Closed);
        }

        let n = buf.len().min(self.len());
        let (head, tail) = self.split_at(n);
        buf[..n].copy_from_slice(head);
        *self = tail;
        Ok(n)
    }
}

/// In-memory writer appending to a vector; completes immediately.
impl Writer for Vec<u8> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Copies `reader` to `writer` until end of stream, returning the number of
/// bytes moved. The reader's `Closed` terminates the copy successfully; every
/// other error is surfaced.
pub async fn copy<R: Reader, W: Writer>(reader: &mut R, writer: &mut W) -> Result<u64> {
    let mut buf = [0u8; 4096];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(n) => n,
            Err(Error::Closed) => return Ok(total),
            Err(err) => return Err(err),
        };

        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block_on;

    #[test]
    fn slice_reader_reads_and_advances() {
        block_on(async {
            let mut src: &[u8] = b"hello";
            let mut buf = [0u8; 3];
            assert_eq!(src.read(&mut buf).await, Ok(3));
            assert_eq!(&buf, b"hel");
            assert_eq!(src.read(&mut buf).await, Ok(2));
            assert_eq!(&buf[..2], b"lo");
            assert_eq!(src.read(&mut buf).await, Err(Error::Closed));
        });
    }

    #[test]
    fn zero_length_read_is_ok_zero() {
        block_on(async {
            let mut src: &[u8] = b"data";
            assert_eq!(src.read(&mut []).await, Ok(0));
        });
    }

    #[test]
    fn write_all_then_copy_round_trips() {
        block_on(async {
            let mut out = Vec::new();
            out.write_all(b"one").await.unwrap();
            out.write_all(b"two").await.unwrap();
            assert_eq!(out, b"onetwo");

            let mut src: &[u8] = &out;
            let mut dst = Vec::new();
            assert_eq!(copy(&mut src, &mut dst).await, Ok(6));
            assert_eq!(dst, b"onetwo");
        });
    }

    #[test]
    fn closed_errno_family_collapses() {
        let err = std::io::Error::from(ErrorKind::BrokenPipe);
        assert_eq!(Error::from(err), Error::Closed);

        let err = std::io::Error::from(ErrorKind::WouldBlock);
        assert_eq!(Error::from(err), Error::WouldBlock);
    }
}
