use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::AppConfig;

/// Config rooted in a scratch directory, on an OS-assigned lock port.
pub fn test_config(dir: &Path, api_base: &str) -> Arc<AppConfig> {
    Arc::new(AppConfig {
        github_repo: "owner/name".to_string(),
        api_base: api_base.to_string(),
        lock_port: 0,
        accept_poll_ms: 20,
        data_dir: Some(dir.join("data")),
        local_version_file: dir.join("VERSION.txt"),
        ..AppConfig::default()
    })
}

/// A loopback port with nothing listening on it (bound once, then released).
pub fn dead_port() -> u16 {
    let l = TcpListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap().port()
}

/// Serves the same HTTP response to every connection and counts requests.
pub struct CannedServer {
    pub base: String,
    hits: Arc<AtomicUsize>,
    last_request: Arc<Mutex<String>>,
}

impl CannedServer {
    pub fn start(status: u16, body: &str) -> Self {
        Self::start_with_delay(status, body, Duration::ZERO)
    }

    pub fn start_with_delay(status: u16, body: &str, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let last_request = Arc::new(Mutex::new(String::new()));

        let body = body.to_string();
        let hits2 = hits.clone();
        let last2 = last_request.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let req = read_request(&mut stream);
                *last2.lock().unwrap() = req;
                hits2.fetch_add(1, Ordering::SeqCst);
                thread::sleep(delay);
                let resp = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason(status),
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes());
                let _ = stream.flush();
            }
        });

        Self {
            base,
            hits,
            last_request,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> String {
        self.last_request.lock().unwrap().clone()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

fn read_request(stream: &mut TcpStream) -> String {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
