//! Minimal in-process WebDAV server for tests.
//!
//! Answers one request per connection (`Connection: close`) and records
//! every request it sees.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

pub const TOKEN: &str = "opaquelocktoken:fake-0001";

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// How the server answers.
#[derive(Debug, Clone)]
pub struct Behaviour {
    pub lock_status: u16,
    /// Return the token in a `Lock-Token` header; otherwise only in the body.
    pub token_in_header: bool,
    pub put_status: u16,
    pub get_body: Vec<u8>,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            lock_status: 200,
            token_in_header: true,
            put_status: 204,
            get_body: b"remote body".to_vec(),
        }
    }
}

#[derive(Clone)]
pub struct FakeDav {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    behaviour: Arc<Mutex<Behaviour>>,
}

impl FakeDav {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake dav");
        let addr = listener.local_addr().expect("local addr");
        let server = Self {
            base_url: format!("http://{addr}"),
            requests: Arc::default(),
            behaviour: Arc::default(),
        };
        let worker = server.clone();
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let worker = worker.clone();
                thread::spawn(move || worker.serve(stream));
            }
        });
        server
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn set(&self, update: impl FnOnce(&mut Behaviour)) {
        update(&mut self.behaviour.lock().unwrap());
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    pub fn last(&self, method: &str) -> Option<Recorded> {
        self.requests().into_iter().rev().find(|r| r.method == method)
    }

    fn serve(&self, stream: TcpStream) {
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
        let Some(request) = read_request(&mut reader) else {
            return;
        };
        let behaviour = self.behaviour.lock().unwrap().clone();
        self.requests.lock().unwrap().push(request.clone());

        let (status, headers, body): (u16, Vec<(&str, String)>, Vec<u8>) =
            match request.method.as_str() {
                "LOCK" if behaviour.lock_status != 200 => (behaviour.lock_status, vec![], vec![]),
                "LOCK" => {
                    let body = format!(
                        "<?xml version=\"1.0\"?><D:prop xmlns:D=\"DAV:\"><D:lockdiscovery>\
                         <D:activelock><D:locktoken><D:href>{TOKEN}</D:href></D:locktoken>\
                         </D:activelock></D:lockdiscovery></D:prop>"
                    );
                    let headers = if behaviour.token_in_header {
                        vec![("Lock-Token", format!("<{TOKEN}>"))]
                    } else {
                        vec![]
                    };
                    (200, headers, body.into_bytes())
                }
                "UNLOCK" => (204, vec![], vec![]),
                "PUT" => (behaviour.put_status, vec![], vec![]),
                "GET" => (200, vec![], behaviour.get_body),
                _ => (405, vec![], vec![]),
            };
        write_response(stream, status, &headers, &body);
    }
}

fn read_request(reader: &mut BufReader<TcpStream>) -> Option<Recorded> {
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_owned();
    let path = parts.next()?.to_owned();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
        }
    }

    let length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).ok()?;

    Some(Recorded {
        method,
        path,
        headers,
        body,
    })
}

fn write_response(mut stream: TcpStream, status: u16, headers: &[(&str, String)], body: &[u8]) {
    let mut head = format!(
        "HTTP/1.1 {status} Fake\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}
