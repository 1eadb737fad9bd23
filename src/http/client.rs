//! An HTTP client with per-host connection pooling.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use crate::io::{BufReader, BufWriter, Error, Reader, Result};
use crate::net::TcpStream;
use crate::pool::{Pool, Pooled};
use crate::runtime::Scheduler;

use super::h1::{self, Body, DEFAULT_MAX_LINE};
use super::{Request, Response, Version};

/// The body reader of a client response. It owns the borrowed connection;
/// dropping the response returns the connection to its pool.
pub type ResponseBody = Body<BufReader<Pooled<TcpStream>>>;

/// Client construction options.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connections kept per `host:port` pool (target and maximum).
    pub connections_per_host: usize,
    /// Bounds waiting for a pooled connection and each socket operation on
    /// the borrowed connection.
    pub timeout: Option<Duration>,
    /// Reuse connections across exchanges. When off, requests carry
    /// `Connection: close` and sockets never return to the pool.
    pub keepalive: bool,
    /// Cap on start-line and header-line bytes when decoding responses.
    pub max_line: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connections_per_host: 2,
            timeout: None,
            keepalive: true,
            max_line: DEFAULT_MAX_LINE,
        }
    }
}

/// An HTTP/1.1 client.
///
/// Connections are pooled per `host:port`; pools are created lazily on first
/// use under a writer lock and dispensed under a reader lock.
pub struct Client {
    scheduler: Scheduler,
    pools: RwLock<HashMap<String, Pool<TcpStream>>>,
    config: ClientConfig,
}

impl Client {
    /// A client with default options.
    pub fn new(scheduler: &Scheduler) -> Client {
        Self::with_config(scheduler, ClientConfig::default())
    }

    /// A client with the given options.
    pub fn with_config(scheduler: &Scheduler, config: ClientConfig) -> Client {
        Client {
            scheduler: scheduler.clone(),
            pools: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Performs one exchange: borrows a connection for the request's host,
    /// encodes the request, and decodes the response head.
    ///
    /// The response body is left on the connection for the caller to read;
    /// the connection returns to its pool once the body has been consumed and
    /// the response dropped. Only HTTP/1.x requests are supported —
    /// [`Version::H2`] is refused with [`Error::InvalidArgument`].
    pub async fn send<B: Reader>(&self, request: &mut Request<B>) -> Result<Response<ResponseBody>> {
        match request.version {
            Version::Http10 | Version::Http11 => {}
            Version::H2 => return Err(Error::InvalidArgument),
        }

        let host = request.url.host_port();
        let pool = self.pool_for(&host);

        // bounded, so a busy pool cannot park the worker forever
        let mut connection = pool.get_timeout(self.config.timeout)?;
        connection.set_timeout(self.config.timeout);

        if !request.headers.contains("host") {
            request.headers.set("Host", request.url.host.clone());
        }
        if !self.config.keepalive {
            request.headers.set("Connection", "close");
        }

        log::debug!("{} {} -> {}", request.method, request.url.target(), host);

        {
            let mut out = BufWriter::new(&mut connection);
            h1::encode_request(request, &mut out).await?;
        }

        let reader = BufReader::new(connection);
        let mut response = h1::decode_response_with(reader, self.config.max_line).await?;

        let close_requested = response
            .headers
            .get("connection")
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false);
        if !self.config.keepalive || close_requested {
            response.body.get_mut().get_mut().discard_on_drop();
        }

        Ok(response)
    }

    // Finds the host's pool under the reader lock, creating it under the
    // writer lock on first use.
    fn pool_for(&self, host: &str) -> Pool<TcpStream> {
        {
            let pools = match self.pools.read() {
                Ok(pools) => pools,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(pool) = pools.get(host) {
                return pool.clone();
            }
        }

        let mut pools = match self.pools.write() {
            Ok(pools) => pools,
            Err(poisoned) => poisoned.into_inner(),
        };

        // check again in case someone else added it first
        if let Some(pool) = pools.get(host) {
            return pool.clone();
        }

        let scheduler = self.scheduler.clone();
        let addr = host.to_owned();
        let size = self.config.connections_per_host.max(1);
        let pool = Pool::new(size, size, move || {
            log::debug!("opening connection to {}", addr);
            let stream = std::net::TcpStream::connect(addr.as_str()).map_err(Error::from)?;
            stream.set_nodelay(true).map_err(Error::from)?;
            TcpStream::from_std(&scheduler, stream)
        });

        pools.insert(host.to_owned(), pool.clone());
        pool
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hosts = match self.pools.read() {
            Ok(pools) => pools.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        f.debug_struct("Client")
            .field("hosts", &hosts)
            .field("config", &self.config)
            .finish()
    }
}
