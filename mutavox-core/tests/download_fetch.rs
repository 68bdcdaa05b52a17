//! Asset fetcher behavior against a local HTTP server: idempotent skip,
//! byte-range resume, full-redownload fallback, and verification failure.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use sha2::{Digest, Sha256};

use mutavox_core::{AssetFetcher, AssetHashStore, FetchOutcome, FetchRequest, MutavoxError};

struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn request_count(&self) -> usize {
        self.requests.lock().expect("request log lock").len()
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("request log lock").clone()
    }
}

/// Serve `body` on every path, one connection at a time. The listener thread
/// is leaked; the test process reaps it on exit.
fn spawn_server(body: Vec<u8>, range_support: bool) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&requests);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            handle_connection(&mut stream, &body, range_support, &log);
        }
    });

    TestServer { addr, requests }
}

fn handle_connection(
    stream: &mut TcpStream,
    body: &[u8],
    range_support: bool,
    log: &Mutex<Vec<String>>,
) {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(clone) => clone,
        Err(_) => return,
    });

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let method = request_line
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();

    let mut range_from: Option<u64> = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("range") {
                range_from = value
                    .trim()
                    .strip_prefix("bytes=")
                    .and_then(|spec| spec.trim_end_matches('-').parse().ok());
            }
        }
    }

    log.lock().expect("request log lock").push(match range_from {
        Some(from) => format!("{method} range={from}"),
        None => method.clone(),
    });

    let total = body.len() as u64;
    let accept_ranges = if range_support {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    let result = match (method.as_str(), range_from) {
        ("HEAD", _) => stream.write_all(
            format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {total}\r\n{accept_ranges}Connection: close\r\n\r\n"
            )
            .as_bytes(),
        ),
        ("GET", Some(from)) if range_support && from < total => {
            let rest = &body[from as usize..];
            stream
                .write_all(
                    format!(
                        "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
                        rest.len(),
                        from,
                        total - 1,
                        total
                    )
                    .as_bytes(),
                )
                .and_then(|()| stream.write_all(rest))
        }
        ("GET", _) => stream
            .write_all(
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {total}\r\n{accept_ranges}Connection: close\r\n\r\n"
                )
                .as_bytes(),
            )
            .and_then(|()| stream.write_all(body)),
        _ => stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"),
    };
    let _ = result;
    let _ = stream.flush();
}

fn test_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().fold(String::new(), |mut s, b| {
        use std::fmt::Write as _;
        let _ = write!(s, "{b:02x}");
        s
    })
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("mutavox-download-tests")
        .join(format!("{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn fetcher_for(dir: &PathBuf) -> AssetFetcher {
    let store = AssetHashStore::open(dir.join("assets.json"));
    AssetFetcher::new(store).expect("build fetcher")
}

#[test]
fn verified_fetch_is_idempotent_with_zero_transfers() {
    let body = test_body(100_000);
    let expected = sha256_hex(&body);
    let server = spawn_server(body.clone(), true);
    let dir = temp_dir("idempotent");

    let fetcher = fetcher_for(&dir);
    let request = FetchRequest {
        url: server.url("/model.bin"),
        dest: dir.join("model.bin"),
        expected_hash: Some(expected),
    };

    let outcome = fetcher.fetch(&request).expect("first fetch");
    assert_eq!(outcome, FetchOutcome::Downloaded { bytes: 100_000 });
    assert_eq!(std::fs::read(&request.dest).expect("read dest"), body);

    let transfers_after_first = server.request_count();
    let outcome = fetcher.fetch(&request).expect("second fetch");
    assert_eq!(outcome, FetchOutcome::AlreadyVerified);
    // The verified file short-circuits before any network traffic.
    assert_eq!(server.request_count(), transfers_after_first);
}

#[test]
fn partial_file_resumes_via_byte_range() {
    let body = test_body(200_000);
    let expected = sha256_hex(&body);
    let server = spawn_server(body.clone(), true);
    let dir = temp_dir("resume");

    let dest = dir.join("model.bin");
    std::fs::write(&dest, &body[..80_000]).expect("seed partial file");

    let fetcher = fetcher_for(&dir);
    let outcome = fetcher
        .fetch(&FetchRequest {
            url: server.url("/model.bin"),
            dest: dest.clone(),
            expected_hash: Some(expected),
        })
        .expect("resumed fetch");

    assert_eq!(outcome, FetchOutcome::Resumed { bytes: 120_000 });
    let on_disk = std::fs::read(&dest).expect("read dest");
    assert_eq!(on_disk.len(), 200_000);
    assert_eq!(on_disk, body);
    assert!(
        server.requests().iter().any(|r| r == "GET range=80000"),
        "expected a byte-range request, got {:?}",
        server.requests()
    );
}

#[test]
fn resume_falls_back_to_full_download_without_range_support() {
    let body = test_body(60_000);
    let expected = sha256_hex(&body);
    let server = spawn_server(body.clone(), false);
    let dir = temp_dir("no-ranges");

    let dest = dir.join("model.bin");
    std::fs::write(&dest, &body[..10_000]).expect("seed partial file");

    let fetcher = fetcher_for(&dir);
    let outcome = fetcher
        .fetch(&FetchRequest {
            url: server.url("/model.bin"),
            dest: dest.clone(),
            expected_hash: Some(expected),
        })
        .expect("full re-download");

    assert_eq!(outcome, FetchOutcome::Downloaded { bytes: 60_000 });
    assert_eq!(std::fs::read(&dest).expect("read dest"), body);
}

#[test]
fn oversized_partial_file_forces_clean_redownload() {
    let body = test_body(50_000);
    let expected = sha256_hex(&body);
    let server = spawn_server(body.clone(), true);
    let dir = temp_dir("oversized");

    let dest = dir.join("model.bin");
    // Larger than the advertised content-length: resume is impossible.
    std::fs::write(&dest, test_body(70_000)).expect("seed oversized file");

    let fetcher = fetcher_for(&dir);
    let outcome = fetcher
        .fetch(&FetchRequest {
            url: server.url("/model.bin"),
            dest: dest.clone(),
            expected_hash: Some(expected),
        })
        .expect("clean re-download");

    assert_eq!(outcome, FetchOutcome::Downloaded { bytes: 50_000 });
    assert_eq!(std::fs::read(&dest).expect("read dest"), body);
}

#[test]
fn hash_mismatch_fails_and_records_nothing() {
    let body = test_body(30_000);
    let server = spawn_server(body, true);
    let dir = temp_dir("mismatch");
    let dest = dir.join("model.bin");

    let fetcher = fetcher_for(&dir);
    let err = fetcher
        .fetch(&FetchRequest {
            url: server.url("/model.bin"),
            dest: dest.clone(),
            expected_hash: Some("0".repeat(64)),
        })
        .expect_err("verification must fail");
    assert!(matches!(err, MutavoxError::DownloadVerification { .. }));

    // No success-cache entry survives a failed verification.
    let store = AssetHashStore::open(dir.join("assets.json"));
    assert_eq!(store.recorded_hash(&dest), None);
}

#[test]
fn unhashed_complete_file_is_recorded_then_trusted() {
    let body = test_body(40_000);
    let server = spawn_server(body.clone(), true);
    let dir = temp_dir("recorded");
    let dest = dir.join("model.bin");

    let fetcher = fetcher_for(&dir);
    let request = FetchRequest {
        url: server.url("/model.bin"),
        dest: dest.clone(),
        expected_hash: None,
    };

    // No expected hash: the file downloads, nothing is recorded yet.
    let outcome = fetcher.fetch(&request).expect("initial fetch");
    assert_eq!(outcome, FetchOutcome::Downloaded { bytes: 40_000 });

    // Second fetch sees a complete file, confirms the length against the
    // server and records the digest.
    let outcome = fetcher.fetch(&request).expect("second fetch");
    assert_eq!(outcome, FetchOutcome::AlreadyVerified);
    let transfers = server.request_count();

    // Third fetch trusts the recorded digest without touching the network.
    let outcome = fetcher.fetch(&request).expect("third fetch");
    assert_eq!(outcome, FetchOutcome::AlreadyVerified);
    assert_eq!(server.request_count(), transfers);
}
