//! The HTTP/1.1 wire codec: encoding and decoding of requests and responses
//! over the crate's [`Reader`]/[`Writer`] contracts, per RFC 9112 for the
//! encoded subset.
//!
//! Outgoing messages are strict; incoming messages are parsed permissively
//! with respect to optional whitespace around header values. Header folding
//! (obs-fold), trailers, and `Expect: 100-continue` are unsupported and
//! rejected rather than guessed.

use crate::io::{self, BufReader, Error, LimitReader, Reader, Result, Writer};

use super::chunked::{ChunkedReader, ChunkedWriter};
use super::{Headers, Method, Request, Response, Status, Url, Version};

/// Default cap on the byte length of a start line or header line.
pub const DEFAULT_MAX_LINE: usize = 8192;

/// A decoded message body, bounded by the message's framing headers.
///
/// Bodies yield only payload bytes and report [`Error::Closed`] at the end.
/// The underlying reader stays owned by the body so that, for pooled client
/// connections, dropping the finished body returns the connection.
#[derive(Debug)]
pub enum Body<R> {
    /// No framing header: a zero-length body.
    Empty(R),
    /// `Content-Length`: at most that many bytes.
    Limited(LimitReader<R>),
    /// `Transfer-Encoding: chunked`.
    Chunked(ChunkedReader<R>),
}

impl<R: Reader> Body<R> {
    /// Mutable reference to the underlying reader.
    pub fn get_mut(&mut self) -> &mut R {
        match self {
            Body::Empty(inner) => inner,
            Body::Limited(limit) => limit.get_mut(),
            Body::Chunked(chunked) => chunked.get_mut(),
        }
    }

    /// Returns the underlying reader, abandoning any unread payload.
    pub fn into_inner(self) -> R {
        match self {
            Body::Empty(inner) => inner,
            Body::Limited(limit) => limit.into_inner(),
            Body::Chunked(chunked) => chunked.into_inner(),
        }
    }
}

impl<R: Reader> Reader for Body<R> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Body::Empty(_) => {
                if buf.is_empty() {
                    Ok(0)
                } else {
                    Err(Error::Closed)
                }
            }
            Body::Limited(limit) => limit.read(buf).await,
            Body::Chunked(chunked) => chunked.read(buf).await,
        }
    }
}

/// Encodes `request` onto `out`: start line, headers, blank line, body.
///
/// The body goes out verbatim, or framed by a chunked writer (terminator
/// included) when `Transfer-Encoding: chunked` is set. The writer is flushed.
pub async fn encode_request<W, B>(request: &mut Request<B>, out: &mut W) -> Result<()>
where
    W: Writer,
    B: Reader,
{
    out.write_all(request.method.as_str().as_bytes()).await?;
    out.write_all(b" ").await?;
    out.write_all(request.url.target().as_bytes()).await?;
    out.write_all(b" ").await?;
    out.write_all(request.version.as_str().as_bytes()).await?;
    out.write_all(b"\r\n").await?;

    encode_headers(&request.headers, out).await?;

    if let Some(body) = &mut request.body {
        encode_body(body, &request.headers, out).await?;
    }

    out.flush().await
}

/// Encodes `response` onto `out`: status line, headers, blank line, body.
pub async fn encode_response<W, B>(response: &mut Response<B>, out: &mut W) -> Result<()>
where
    W: Writer,
    B: Reader,
{
    out.write_all(response.version.as_str().as_bytes()).await?;
    let status_line = format!(" {} {}\r\n", response.status.code(), response.status.reason());
    out.write_all(status_line.as_bytes()).await?;

    encode_headers(&response.headers, out).await?;
    encode_body(&mut response.body, &response.headers, out).await?;

    out.flush().await
}

async fn encode_headers<W: Writer>(headers: &Headers, out: &mut W) -> Result<()> {
    for (name, value) in headers.iter() {
        out.write_all(name.as_bytes()).await?;
        out.write_all(b": ").await?;
        out.write_all(value.as_bytes()).await?;
        out.write_all(b"\r\n").await?;
    }
    out.write_all(b"\r\n").await
}

async fn encode_body<R, W>(body: &mut R, headers: &Headers, out: &mut W) -> Result<()>
where
    R: Reader,
    W: Writer,
{
    if is_chunked(headers)? {
        let mut framed = ChunkedWriter::new(&mut *out);
        io::copy(body, &mut framed).await?;
        framed.finish().await?;
    } else {
        io::copy(body, out).await?;
    }
    Ok(())
}

/// Decodes one request from `reader` using [`DEFAULT_MAX_LINE`].
pub async fn decode_request<R: Reader>(reader: BufReader<R>) -> Result<Request<Body<BufReader<R>>>> {
    decode_request_with(reader, DEFAULT_MAX_LINE).await
}

/// Decodes one request from `reader`, rejecting lines over `max_line` bytes.
///
/// The returned request's body is bounded by the framing headers and owns the
/// reader.
pub async fn decode_request_with<R: Reader>(
    mut reader: BufReader<R>,
    max_line: usize,
) -> Result<Request<Body<BufReader<R>>>> {
    let line = read_line(&mut reader, max_line).await?;
    let mut tokens = line.splitn(3, ' ');

    let method = tokens
        .next()
        .and_then(Method::parse)
        .ok_or(Error::IllegalSequence)?;
    let target = tokens.next().ok_or(Error::IllegalSequence)?;
    if target.is_empty() {
        return Err(Error::IllegalSequence);
    }
    let version = tokens
        .next()
        .and_then(Version::parse)
        .ok_or(Error::IllegalSequence)?;

    let url = Url {
        scheme: "http".to_owned(),
        host: String::new(),
        port: None,
        path: target.to_owned(),
    };

    let headers = decode_headers(&mut reader, max_line).await?;
    if headers.contains("expect") {
        // 100-continue handling is unsupported
        return Err(Error::IllegalSequence);
    }

    let body = body_for(reader, &headers)?;
    Ok(Request {
        method,
        version,
        url,
        headers,
        body: Some(body),
    })
}

/// Decodes one response from `reader` using [`DEFAULT_MAX_LINE`].
pub async fn decode_response<R: Reader>(reader: BufReader<R>) -> Result<Response<Body<BufReader<R>>>> {
    decode_response_with(reader, DEFAULT_MAX_LINE).await
}

/// Decodes one response from `reader`, rejecting lines over `max_line` bytes.
pub async fn decode_response_with<R: Reader>(
    mut reader: BufReader<R>,
    max_line: usize,
) -> Result<Response<Body<BufReader<R>>>> {
    let line = read_line(&mut reader, max_line).await?;
    let mut tokens = line.splitn(3, ' ');

    let version = tokens
        .next()
        .and_then(Version::parse)
        .ok_or(Error::IllegalSequence)?;
    let status = tokens
        .next()
        .and_then(parse_status)
        .ok_or(Error::IllegalSequence)?;
    // the reason phrase, if any, is cosmetic; the canonical one is used

    let headers = decode_headers(&mut reader, max_line).await?;
    let body = body_for(reader, &headers)?;

    Ok(Response {
        version,
        status,
        headers,
        body,
    })
}

// Reads one CRLF-terminated line, excluding the terminator. A bare LF is a
// wire-format violation, as is a line longer than `max`.
async fn read_line<R: Reader>(reader: &mut BufReader<R>, max: usize) -> Result<String> {
    let mut line = Vec::new();

    loop {
        let mut byte = [0u8; 1];
        reader.read(&mut byte).await?;

        if byte[0] == b'\n' {
            if line.pop() != Some(b'\r') {
                return Err(Error::IllegalSequence);
            }
            break;
        }

        line.push(byte[0]);
        if line.len() > max {
            return Err(Error::IllegalSequence);
        }
    }

    String::from_utf8(line).map_err(|_| Error::IllegalSequence)
}

async fn decode_headers<R: Reader>(reader: &mut BufReader<R>, max_line: usize) -> Result<Headers> {
    let mut headers = Headers::new();

    loop {
        let line = read_line(reader, max_line).await?;
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // obs-fold continuation lines are unsupported
            return Err(Error::IllegalSequence);
        }

        let (name, value) = line.split_once(':').ok_or(Error::IllegalSequence)?;
        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(Error::IllegalSequence);
        }

        headers.add(name, value.trim_matches([' ', '\t']));
    }

    Ok(headers)
}

fn parse_status(token: &str) -> Option<Status> {
    if token.len() != 3 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse::<u16>().ok().map(Status)
}

fn is_chunked(headers: &Headers) -> Result<bool> {
    match headers.get("transfer-encoding") {
        None => Ok(false),
        Some(value) if value.eq_ignore_ascii_case("chunked") => Ok(true),
        Some(_) => Err(Error::IllegalSequence),
    }
}

fn body_for<R: Reader>(reader: BufReader<R>, headers: &Headers) -> Result<Body<BufReader<R>>> {
    if is_chunked(headers)? {
        return Ok(Body::Chunked(ChunkedReader::new(reader)));
    }

    if let Some(value) = headers.get("content-length") {
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::IllegalSequence);
        }
        let length: usize = value.parse().map_err(|_| Error::IllegalSequence)?;
        return Ok(Body::Limited(LimitReader::new(reader, length)));
    }

    Ok(Body::Empty(reader))
}
