use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nett::http::h1;
use nett::io::BufReader;
use nett::runtime::block_on;

const REQ: &[u8] = b"\
GET /api/v1.0/weather/forecast HTTP/1.1\r\n\
Host: www.example.org\r\n\r\n";

const REQ_MED: &[u8] = b"\
GET /api/v1.0/weather/forecast HTTP/1.1\r\n\
Accept:*/*\r\n\
Accept-Encoding:gzip,deflate,br\r\n\
Accept-Language:en-US,en;q=0.5\r\n\
Cache-Control:no-cache\r\n\
Connection:keep-alive\r\n\
DNT:1\r\n\
Host: www.example.org\r\n\
Pragma:no-cache\r\n\
Referrer:https://www.example.org\r\n\
Sec-Fetch-Dest:empty\r\n\
Sec-Fetch-Mode:cors\r\n\
Sec-Fetch-Site:same-origin\r\n\
User-Agent:Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/109.0\r\n\r\n";

const REQ_CHUNKED: &[u8] = b"\
POST /upload HTTP/1.1\r\n\
Host: www.example.org\r\n\
Transfer-Encoding: chunked\r\n\r\n\
24\r\nthe quick brown fox jumps over the l\r\n\
9\r\nazy dog!!\r\n\
0\r\n\r\n";

fn benchmark(c: &mut Criterion) {
    let inputs = [("small", REQ), ("medium", REQ_MED), ("chunked", REQ_CHUNKED)];

    let mut group = c.benchmark_group("decode_request");
    for (name, input) in inputs.iter() {
        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), input, |b, &input| {
            b.iter(|| {
                block_on(async {
                    let request = h1::decode_request(BufReader::new(input)).await.unwrap();
                    request.method
                })
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
