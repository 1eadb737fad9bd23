//! The request side of the data model.

use super::{Headers, Method, Version};

/// The pieces of a URL the client consumes. Full URL parsing is out of scope;
/// callers fill the fields in.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Url {
    /// `"http"` unless told otherwise.
    pub scheme: String,
    /// Hostname or address literal.
    pub host: String,
    /// Explicit port, if any.
    pub port: Option<u16>,
    /// Request path, `/`-prefixed.
    pub path: String,
}

impl Url {
    /// A `http://host/path` URL.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Url {
            scheme: "http".to_owned(),
            host: host.into(),
            port: None,
            path: path.into(),
        }
    }

    /// Same, with an explicit port.
    pub fn with_port(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Url {
            scheme: "http".to_owned(),
            host: host.into(),
            port: Some(port),
            path: path.into(),
        }
    }

    /// The `host:port` key used for per-host connection pooling. The port
    /// falls back to 80.
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(80))
    }

    /// The request target for the start line; `/` when the path is empty.
    pub fn target(&self) -> &str {
        if self.path.is_empty() {
            "/"
        } else {
            &self.path
        }
    }
}

impl std::fmt::Display for Url {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        f.write_str(self.target())
    }
}

/// An HTTP request.
///
/// On the client side `body` is a [`Reader`] supplying the outgoing payload;
/// a decoded server-side request carries the bounded body reader instead.
///
/// [`Reader`]: crate::io::Reader
#[derive(Debug)]
pub struct Request<B = &'static [u8]> {
    /// Request method.
    pub method: Method,
    /// Protocol version; only HTTP/1.1 is implemented on the wire.
    pub version: Version,
    /// Target URL.
    pub url: Url,
    /// Header multimap.
    pub headers: Headers,
    /// Payload source, if any.
    pub body: Option<B>,
}

impl Request<&'static [u8]> {
    /// A bodyless HTTP/1.1 request.
    pub fn new(method: Method, url: Url) -> Self {
        Request {
            method,
            version: Version::Http11,
            url,
            headers: Headers::new(),
            body: None,
        }
    }
}

impl<B> Request<B> {
    /// The same request carrying `body`.
    pub fn with_body<B2>(self, body: B2) -> Request<B2> {
        Request {
            method: self.method,
            version: self.version,
            url: self.url,
            headers: self.headers,
            body: Some(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_defaults_to_80() {
        assert_eq!(Url::new("example.com", "/").host_port(), "example.com:80");
        assert_eq!(
            Url::with_port("example.com", 8080, "/").host_port(),
            "example.com:8080"
        );
    }

    #[test]
    fn empty_path_targets_root() {
        let url = Url::new("example.com", "");
        assert_eq!(url.target(), "/");
        assert_eq!(url.to_string(), "http://example.com/");
    }
}
