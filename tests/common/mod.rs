//! In-process stand-in for a Habitat CouchDB server

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// One request as seen by the fake server
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

type Responder = dyn Fn(&RecordedRequest, usize) -> (u16, String) + Send + Sync;

/// HTTP/1.1 server answering every request via `responder`
///
/// The responder gets the request and its zero-based index. Every
/// connection is closed after one response.
pub struct FakeHabitat {
    port: u16,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl FakeHabitat {
    pub fn start<F>(responder: F) -> Self
    where
        F: Fn(&RecordedRequest, usize) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let responder: Arc<Responder> = Arc::new(responder);

        let recorded = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                handle_connection(stream, &recorded, responder.as_ref());
            }
        });

        Self { port, requests }
    }

    /// Base URL with trailing slash, as it appears in configuration
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Wait until at least `count` requests arrived, or `limit` elapses
    pub async fn wait_for_requests(&self, count: usize, limit: Duration) -> Vec<RecordedRequest> {
        let deadline = Instant::now() + limit;
        loop {
            let requests = self.requests();
            if requests.len() >= count || Instant::now() >= deadline {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn handle_connection(stream: TcpStream, recorded: &Mutex<Vec<RecordedRequest>>, responder: &Responder) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).unwrap_or(0) == 0 {
            break;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).unwrap();

    let request = RecordedRequest {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    };

    let index = {
        let mut requests = recorded.lock().unwrap();
        requests.push(request.clone());
        requests.len() - 1
    };

    let (status, body) = responder(&request, index);
    let response = format!(
        "HTTP/1.1 {} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    let mut stream = stream;
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}
