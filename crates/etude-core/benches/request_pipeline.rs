use criterion::{Criterion, black_box, criterion_group, criterion_main};
use etude_core::HttpStatus;
use etude_core::conn::{RequestParser, ResponseWriter};

const GET: &[u8] = b"GET /index.html HTTP/1.1\r\nHost: localhost:9990\r\n\
User-Agent: bench/1.0\r\nAccept: text/html\r\nConnection: keep-alive\r\n\r\n";

const POST: &[u8] = b"POST /register HTTP/1.1\r\nHost: localhost\r\n\
Content-Type: application/x-www-form-urlencoded\r\nContent-Length: 27\r\n\r\n\
username=alice&password=pw1";

fn parse_whole(c: &mut Criterion) {
    c.bench_function("parse_get_single_read", |b| {
        let mut parser = RequestParser::new();
        b.iter(|| {
            parser.reset();
            black_box(parser.advance(black_box(GET), "index.html"))
        })
    });

    c.bench_function("parse_post_single_read", |b| {
        let mut parser = RequestParser::new();
        b.iter(|| {
            parser.reset();
            black_box(parser.advance(black_box(POST), "index.html"))
        })
    });
}

fn parse_fragmented(c: &mut Criterion) {
    c.bench_function("parse_get_16_byte_reads", |b| {
        let mut parser = RequestParser::new();
        b.iter(|| {
            parser.reset();
            let mut end = 0;
            while end < GET.len() {
                end = (end + 16).min(GET.len());
                parser.advance(black_box(&GET[..end]), "index.html");
            }
            black_box(parser.state())
        })
    });
}

fn build_head(c: &mut Criterion) {
    c.bench_function("response_head", |b| {
        let mut buf = [0u8; 1024];
        b.iter(|| {
            let mut writer = ResponseWriter::new(&mut buf);
            writer
                .head(HttpStatus::FileReady, "text/html", black_box(4096), true)
                .ok();
            black_box(writer.len())
        })
    });
}

criterion_group!(benches, parse_whole, parse_fragmented, build_head);
criterion_main!(benches);
