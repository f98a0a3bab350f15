use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

/// One canned HTTP response, served once and in order.
pub struct CannedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl CannedResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Local HTTP server answering each connection with the next canned
/// response. Records `METHOD /path?query` of every request it served.
pub struct ScriptedServer {
    base_url: String,
    listener: Option<TcpListener>,
    worker: Option<JoinHandle<Vec<String>>>,
}

impl ScriptedServer {
    pub fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
        let address = listener.local_addr().expect("local addr");
        Self {
            base_url: format!("http://{address}"),
            listener: Some(listener),
            worker: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    pub fn serve(&mut self, responses: Vec<CannedResponse>) {
        let listener = self.listener.take().expect("serve called once");
        self.worker = Some(thread::spawn(move || {
            let mut seen = Vec::new();
            for response in responses {
                let (stream, _) = listener.accept().expect("accept");
                seen.push(answer(stream, &response));
            }
            seen
        }));
    }

    /// Waits until every canned response has been served.
    pub fn finish(mut self) -> Vec<String> {
        self.worker
            .take()
            .expect("server was started")
            .join()
            .expect("server thread")
    }
}

fn answer(stream: TcpStream, response: &CannedResponse) -> String {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).expect("request line");

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("header line");
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().expect("content length");
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).expect("request body");

    let mut head = format!(
        "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
        response.status,
        reason(response.status),
        response.body.len()
    );
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    let stream = reader.get_mut();
    stream.write_all(head.as_bytes()).expect("write head");
    stream
        .write_all(response.body.as_bytes())
        .expect("write body");
    stream.flush().expect("flush");

    let request_line = request_line.trim_end();
    match request_line.rsplit_once(' ') {
        Some((target, _version)) => target.to_string(),
        None => request_line.to_string(),
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
