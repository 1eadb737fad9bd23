//! A connected TCP stream socket.

use std::fmt;
use std::io::{ErrorKind, Read as _, Write as _};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use mio::Interest;

use crate::io::{Error, Reader, Result, Writer};
use crate::runtime::Scheduler;

/// A TCP stream whose reads and writes suspend on the scheduler's reactor.
///
/// Reads and writes attempt the non-blocking syscall first; on `WouldBlock`
/// they await readiness and retry. Partial transfers are legal. A zero-byte
/// OS read on a non-empty buffer surfaces as [`Error::Closed`]. Dropping the
/// stream closes the handle exactly once.
pub struct TcpStream {
    io: mio::net::TcpStream,
    scheduler: Scheduler,
    timeout: Option<Duration>,
}

impl TcpStream {
    /// Opens a connection to `addr`.
    ///
    /// The connect is issued non-blocking; the stream is returned once the
    /// socket reports writability without a pending error.
    pub async fn connect(scheduler: &Scheduler, addr: SocketAddr) -> Result<TcpStream> {
        let mut io = mio::net::TcpStream::connect(addr)?;

        scheduler.poll(&mut io, Interest::WRITABLE, None).await?;
        if let Some(err) = io.take_error()? {
            return Err(err.into());
        }
        match io.peer_addr() {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotConnected => return Err(Error::Closed),
            Err(err) => return Err(err.into()),
        }

        log::trace!("connected to {}", addr);
        Ok(Self::from_mio(scheduler, io))
    }

    /// Adopts an already-connected standard-library stream.
    pub fn from_std(scheduler: &Scheduler, stream: std::net::TcpStream) -> Result<TcpStream> {
        stream.set_nonblocking(true)?;
        Ok(Self::from_mio(scheduler, mio::net::TcpStream::from_std(stream)))
    }

    pub(crate) fn from_mio(scheduler: &Scheduler, io: mio::net::TcpStream) -> TcpStream {
        TcpStream {
            io,
            scheduler: scheduler.clone(),
            timeout: None,
        }
    }

    /// Bounds each subsequent read and write; `None` removes the bound.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// The configured per-operation timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The local address of the socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.io.local_addr().map_err(Error::from)
    }

    /// The peer's address.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.io.peer_addr().map_err(Error::from)
    }

    /// Sets `TCP_NODELAY`.
    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        self.io.set_nodelay(nodelay).map_err(Error::from)
    }

    /// Shuts down the read half, write half, or both.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        self.io.shutdown(how).map_err(Error::from)
    }
}

impl Reader for TcpStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            match self.io.read(buf) {
                Ok(0) => return Err(Error::Closed),
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    self.scheduler
                        .poll(&mut self.io, Interest::READABLE, self.timeout)
                        .await?;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Writer for TcpStream {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            match self.io.write(buf) {
                Ok(0) => return Err(Error::Closed),
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    self.scheduler
                        .poll(&mut self.io, Interest::WRITABLE, self.timeout)
                        .await?;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        loop {
            match self.io.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    self.scheduler
                        .poll(&mut self.io, Interest::WRITABLE, self.timeout)
                        .await?;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl fmt::Debug for TcpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpStream")
            .field("io", &self.io)
            .field("timeout", &self.timeout)
            .finish()
    }
}
