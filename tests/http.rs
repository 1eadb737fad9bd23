//! End-to-end HTTP exchanges against loopback servers built from the crate's
//! own listener and codec.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nett::http::{h1, Client, Headers, Method, Request, Response, Status, Url, Version};
use nett::io::{BufReader, Error, Reader, Result, Writer};
use nett::net::TcpListener;
use nett::runtime::{block_on, Scheduler};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn drain<R: Reader>(body: &mut R) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        match body.read(&mut buf).await {
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(Error::Closed) => return Ok(out),
            Err(err) => return Err(err),
        }
    }
}

fn local_url(addr: std::net::SocketAddr, path: &str) -> Url {
    Url::with_port("127.0.0.1", addr.port(), path)
}

// Serves `exchanges` requests over a single accepted connection, responding
// to each with a fixed Content-Length body.
async fn serve_fixed(
    mut listener: TcpListener,
    exchanges: usize,
    payload: &'static [u8],
    accepted: Arc<AtomicUsize>,
) -> Result<()> {
    let (mut stream, _) = listener.accept().await?;
    accepted.fetch_add(1, Ordering::SeqCst);

    for _ in 0..exchanges {
        let reader = BufReader::new(&mut stream);
        let request = h1::decode_request(reader).await?;
        assert_eq!(request.method, Method::Get);
        drop(request);

        let mut response = Response::new(Status::OK, payload);
        response
            .headers
            .set("Content-Length", payload.len().to_string());
        h1::encode_response(&mut response, &mut stream).await?;
    }

    Ok(())
}

#[test]
fn get_with_content_length() {
    init_logging();
    let scheduler = Scheduler::new().unwrap();

    let listener = TcpListener::bind(&scheduler, "127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let server = scheduler.spawn(serve_fixed(
        listener,
        1,
        b"hello world",
        Arc::clone(&accepted),
    ));

    let client = Client::new(&scheduler);
    let mut request = Request::new(Method::Get, local_url(addr, "/"));

    let body = block_on(async {
        let mut response = client.send(&mut request).await?;
        assert_eq!(response.status, Status::OK);
        assert_eq!(response.status.reason(), "OK");
        assert_eq!(response.headers.get("content-length"), Some("11"));
        drain(&mut response.body).await
    })
    .unwrap();

    assert_eq!(body, b"hello world");
    assert_eq!(block_on(server), Ok(Ok(())));
    scheduler.shutdown();
}

#[test]
fn chunked_response_body() {
    init_logging();
    let scheduler = Scheduler::new().unwrap();

    let mut listener = TcpListener::bind(&scheduler, "127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();

    let server = scheduler.spawn(async move {
        let (mut stream, _) = listener.accept().await?;

        // consume the request head
        let reader = BufReader::new(&mut stream);
        let request = h1::decode_request(reader).await?;
        drop(request);

        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                  5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
            )
            .await?;
        Ok::<_, Error>(())
    });

    let client = Client::new(&scheduler);
    let mut request = Request::new(Method::Get, local_url(addr, "/stream"));

    let body = block_on(async {
        let mut response = client.send(&mut request).await?;
        assert_eq!(response.status, Status::OK);
        assert_eq!(
            response.headers.get("transfer-encoding"),
            Some("chunked")
        );

        let body = drain(&mut response.body).await?;
        // a drained chunked body keeps reporting end of stream
        let mut buf = [0u8; 8];
        assert_eq!(response.body.read(&mut buf).await, Err(Error::Closed));
        Ok::<_, Error>(body)
    })
    .unwrap();

    assert_eq!(body, b"hello world");
    assert_eq!(block_on(server), Ok(Ok(())));
    scheduler.shutdown();
}

#[test]
fn keep_alive_reuses_one_connection() {
    init_logging();
    let scheduler = Scheduler::new().unwrap();

    let listener = TcpListener::bind(&scheduler, "127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let server = scheduler.spawn(serve_fixed(listener, 2, b"pong", Arc::clone(&accepted)));

    let client = Client::new(&scheduler);

    block_on(async {
        for _ in 0..2 {
            let mut request = Request::new(Method::Get, local_url(addr, "/ping"));
            let mut response = client.send(&mut request).await?;
            assert_eq!(drain(&mut response.body).await?, b"pong");
        }
        Ok::<_, Error>(())
    })
    .unwrap();

    assert_eq!(block_on(server), Ok(Ok(())));
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    scheduler.shutdown();
}

#[test]
fn distinct_hosts_get_distinct_pools() {
    init_logging();
    let scheduler = Scheduler::new().unwrap();

    let listener_a = TcpListener::bind(&scheduler, "127.0.0.1:0".parse().unwrap()).unwrap();
    let listener_b = TcpListener::bind(&scheduler, "127.0.0.1:0".parse().unwrap()).unwrap();
    let addr_a = listener_a.local_addr().unwrap();
    let addr_b = listener_b.local_addr().unwrap();

    let accepted_a = Arc::new(AtomicUsize::new(0));
    let accepted_b = Arc::new(AtomicUsize::new(0));

    let server_a = scheduler.spawn(serve_fixed(listener_a, 1, b"from-a", Arc::clone(&accepted_a)));
    let server_b = scheduler.spawn(serve_fixed(listener_b, 1, b"from-b", Arc::clone(&accepted_b)));

    let client = Client::new(&scheduler);

    block_on(async {
        let mut request = Request::new(Method::Get, local_url(addr_a, "/"));
        let mut response = client.send(&mut request).await?;
        assert_eq!(drain(&mut response.body).await?, b"from-a");

        let mut request = Request::new(Method::Get, local_url(addr_b, "/"));
        let mut response = client.send(&mut request).await?;
        assert_eq!(drain(&mut response.body).await?, b"from-b");
        Ok::<_, Error>(())
    })
    .unwrap();

    assert_eq!(block_on(server_a), Ok(Ok(())));
    assert_eq!(block_on(server_b), Ok(Ok(())));
    assert_eq!(accepted_a.load(Ordering::SeqCst), 1);
    assert_eq!(accepted_b.load(Ordering::SeqCst), 1);
    scheduler.shutdown();
}

#[test]
fn http2_requests_are_refused() {
    init_logging();
    let scheduler = Scheduler::new().unwrap();
    let client = Client::new(&scheduler);

    let mut request = Request::new(Method::Get, Url::new("example.com", "/"));
    request.version = Version::H2;

    let result = block_on(async { client.send(&mut request).await });
    assert!(matches!(result, Err(Error::InvalidArgument)));
    scheduler.shutdown();
}

#[test]
fn header_multimap_survives_the_wire() {
    init_logging();

    let mut headers = Headers::new();
    headers.add("Set-Cookie", "a=1");
    headers.add("Set-Cookie", "b=2");
    headers.set("Content-Length", "0");

    block_on(async {
        let mut response = Response::new(Status::NOT_FOUND, &b""[..]);
        response.headers = headers;

        let mut wire = Vec::new();
        h1::encode_response(&mut response, &mut wire).await.unwrap();

        let decoded = h1::decode_response(BufReader::new(&wire[..])).await.unwrap();
        assert_eq!(decoded.status, Status::NOT_FOUND);
        let cookies: Vec<_> = decoded.headers.get_all("set-cookie").collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
    });
}
