//! Minimal blocking HTTP/1.1 server for exercising the engine.
//!
//! Routes:
//! - `/bytes/N`: N bytes of [`pattern`]
//! - `/slow/N`: N bytes in 16 chunks, 50ms apart
//! - `/redirect-loop`: redirects to itself
//! - `/redirect-once`: redirects to `/bytes/64`
//! - `/flaky/N`: first request stalls after N/2 bytes, later ones honour `Range`
//! - `/hang`: never responds
//! - `/count/N`: N bytes after 150ms, tracking concurrent requests
//! - anything else: 404

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[derive(Default)]
struct Stats {
    requests: Mutex<Vec<(String, Option<String>)>>,
    current: AtomicUsize,
    peak: AtomicUsize,
    flaky_hits: AtomicUsize,
}

pub struct TestServer {
    addr: SocketAddr,
    stats: Arc<Stats>,
}

impl TestServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(Stats::default());
        let accept_stats = stats.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let stats = accept_stats.clone();
                thread::spawn(move || handle(stream, &stats));
            }
        });
        Self { addr, stats }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// `Range` headers seen for requests to `path`.
    pub fn ranges_for(&self, path: &str) -> Vec<Option<String>> {
        self.stats
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, range)| range.clone())
            .collect()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }
}

fn handle(stream: TcpStream, stats: &Stats) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();
    let mut range = None;
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("range") {
                range = Some(value.trim().to_string());
            }
        }
    }
    stats
        .requests
        .lock()
        .unwrap()
        .push((path.clone(), range.clone()));

    let mut stream = reader.into_inner();
    let _ = respond(&mut stream, &path, range.as_deref(), stats);
}

fn range_start(range: Option<&str>) -> Option<usize> {
    range?
        .strip_prefix("bytes=")?
        .trim_end_matches('-')
        .parse()
        .ok()
}

fn head(stream: &mut TcpStream, status: &str, extra: &[String], len: usize) -> std::io::Result<()> {
    let mut head = format!("HTTP/1.1 {status}\r\nContent-Length: {len}\r\nConnection: close\r\n");
    for header in extra {
        head.push_str(header);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes())
}

fn respond(stream: &mut TcpStream, path: &str, range: Option<&str>, stats: &Stats) -> std::io::Result<()> {
    let mut parts = path.trim_start_matches('/').splitn(2, '/');
    let route = parts.next().unwrap_or("");
    let size: usize = parts.next().and_then(|n| n.parse().ok()).unwrap_or(0);

    match route {
        "bytes" => {
            head(stream, "200 OK", &[], size)?;
            stream.write_all(&pattern(size))
        }
        "slow" => {
            let body = pattern(size);
            head(stream, "200 OK", &[], size)?;
            let step = size.div_ceil(16).max(1);
            for chunk in body.chunks(step) {
                stream.write_all(chunk)?;
                stream.flush()?;
                thread::sleep(Duration::from_millis(50));
            }
            Ok(())
        }
        "redirect-loop" => head(stream, "302 Found", &["Location: /redirect-loop".into()], 0),
        "redirect-once" => head(stream, "302 Found", &["Location: /bytes/64".into()], 0),
        "flaky" => {
            let body = pattern(size);
            let first = stats.flaky_hits.fetch_add(1, Ordering::SeqCst) == 0;
            if first {
                head(stream, "200 OK", &[], size)?;
                stream.write_all(&body[..size / 2])?;
                stream.flush()?;
                thread::sleep(Duration::from_secs(3));
                return Ok(());
            }
            match range_start(range) {
                Some(start) if start < size => {
                    let content_range = format!("Content-Range: bytes {start}-{}/{size}", size - 1);
                    head(stream, "206 Partial Content", &[content_range], size - start)?;
                    stream.write_all(&body[start..])
                }
                _ => {
                    head(stream, "200 OK", &[], size)?;
                    stream.write_all(&body)
                }
            }
        }
        "hang" => {
            thread::sleep(Duration::from_secs(3));
            Ok(())
        }
        "count" => {
            let now = stats.current.fetch_add(1, Ordering::SeqCst) + 1;
            stats.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(150));
            stats.current.fetch_sub(1, Ordering::SeqCst);
            head(stream, "200 OK", &[], size)?;
            stream.write_all(&pattern(size))
        }
        _ => head(stream, "404 Not Found", &[], 0),
    }
}
