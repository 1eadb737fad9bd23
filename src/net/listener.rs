//! A TCP listener with suspendable accept.

use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use mio::Interest;
use socket2::{Domain, Protocol, Socket, Type};

use crate::io::{Error, Result};
use crate::runtime::Scheduler;

use super::TcpStream;

/// Options applied to the listening socket at bind time.
#[derive(Debug, Clone)]
pub struct ListenConfig {
    /// Maximum pending-connection backlog handed to `listen(2)`.
    pub backlog: u32,
    /// Enables `SO_KEEPALIVE` on the listening socket.
    pub keepalive: bool,
    /// Receive timeout (`SO_RCVTIMEO`) on the listening socket, if any.
    pub recv_timeout: Option<Duration>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        ListenConfig {
            backlog: 1024,
            keepalive: false,
            recv_timeout: None,
        }
    }
}

/// A bound, listening TCP socket whose `accept` suspends on the reactor.
pub struct TcpListener {
    io: mio::net::TcpListener,
    scheduler: Scheduler,
}

impl TcpListener {
    /// Binds to `addr` with [`ListenConfig::default`].
    pub fn bind(scheduler: &Scheduler, addr: SocketAddr) -> Result<TcpListener> {
        Self::bind_with(scheduler, addr, &ListenConfig::default())
    }

    /// Binds to `addr`, applying `config` to the new socket.
    ///
    /// `SO_REUSEADDR` is always set.
    pub fn bind_with(
        scheduler: &Scheduler,
        addr: SocketAddr,
        config: &ListenConfig,
    ) -> Result<TcpListener> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        if config.keepalive {
            socket.set_keepalive(true)?;
        }
        if let Some(timeout) = config.recv_timeout {
            socket.set_read_timeout(Some(timeout))?;
        }
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(config.backlog.min(i32::MAX as u32) as i32)?;

        let listener = mio::net::TcpListener::from_std(socket.into());
        log::debug!("listening on {}", listener.local_addr()?);

        Ok(TcpListener {
            io: listener,
            scheduler: scheduler.clone(),
        })
    }

    /// The bound local address (useful after binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.io.local_addr().map_err(Error::from)
    }

    /// Accepts one connection, suspending until a peer arrives.
    ///
    /// The accepted stream shares this listener's scheduler.
    pub async fn accept(&mut self) -> Result<(TcpStream, SocketAddr)> {
        loop {
            match self.io.accept() {
                Ok((stream, peer)) => {
                    log::trace!("accepted connection from {}", peer);
                    return Ok((TcpStream::from_mio(&self.scheduler, stream), peer));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    self.scheduler
                        .poll(&mut self.io, Interest::READABLE, None)
                        .await?;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpListener").field("io", &self.io).finish()
    }
}
