//! A reader with a byte budget.

use super::{Error, Reader, Result};

/// Wraps a [`Reader`] and caps the total number of bytes it will ever yield.
///
/// Each read is clipped to the remaining budget; once the budget is spent,
/// every read reports [`Error::Closed`]. HTTP bodies bounded by
/// `Content-Length` are read through this.
#[derive(Debug)]
pub struct LimitReader<R> {
    inner: R,
    remaining: usize,
}

impl<R: Reader> LimitReader<R> {
    /// Wraps `inner`, allowing at most `limit` bytes out.
    pub fn new(inner: R, limit: usize) -> Self {
        LimitReader {
            inner,
            remaining: limit,
        }
    }

    /// Bytes still available under the budget.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Mutable reference to the underlying reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Reader> Reader for LimitReader<R> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            return Err(Error::Closed);
        }

        let clipped = buf.len().min(self.remaining);
        let n = self.inner.read(&mut buf[..clipped]).await?;
        self.remaining -= n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block_on;

    #[test]
    fn clips_reads_to_the_budget() {
        block_on(async {
            let mut reader = LimitReader::new(&b"abcdefgh"[..], 5);
            let mut buf = [0u8; 8];

            assert_eq!(reader.read(&mut buf).await, Ok(5));
            assert_eq!(&buf[..5], b"abcde");
            assert_eq!(reader.remaining(), 0);
            assert_eq!(reader.read(&mut buf).await, Err(Error::Closed));
        });
    }

    #[test]
    fn total_never_exceeds_the_limit() {
        block_on(async {
            let mut reader = LimitReader::new(&b"abcdefgh"[..], 6);
            let mut buf = [0u8; 4];
            let mut total = 0;

            loop {
                match reader.read(&mut buf).await {
                    Ok(n) => total += n,
                    Err(Error::Closed) => break,
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }

            assert_eq!(total, 6);
        });
    }

    #[test]
    fn zero_limit_reports_closed_immediately() {
        block_on(async {
            let mut reader = LimitReader::new(&b"abc"[..], 0);
            let mut buf = [0u8; 4];
            assert_eq!(reader.read(&mut buf).await, Err(Error::Closed));
        });
    }
}
