//! Minimal HTTP/1.1 plumbing: read one request off a socket, write one response.

use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

/// Longest accepted header block.
const MAX_HEADER_BYTES: usize = 64 * 1024;
/// A client that sends nothing for this long is dropped.
const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

#[derive(Debug)]
pub enum ReadOutcome {
    Request(HttpRequest),
    /// Declared body is over the limit; the body was not read.
    TooLarge { declared: usize },
    /// Chunked or otherwise unsized bodies are not supported.
    LengthRequired,
    Malformed(String),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        create_response(self.status, status_text(self.status), &self.body).into_bytes()
    }
}

/// Read a single request. Bodies are sized by `Content-Length` only.
pub async fn read_request<S>(stream: &mut S, max_body: usize) -> std::io::Result<ReadOutcome>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut temp_buf = [0u8; 8192];

    let headers_end = loop {
        if let Some(pos) = find_header_end(&buffer) {
            break pos;
        }
        if buffer.len() > MAX_HEADER_BYTES {
            return Ok(ReadOutcome::Malformed("header block too large".to_string()));
        }
        let n = read_some(stream, &mut temp_buf).await?;
        if n == 0 {
            return Ok(if buffer.is_empty() {
                ReadOutcome::Closed
            } else {
                ReadOutcome::Malformed("connection closed inside headers".to_string())
            });
        }
        buffer.extend_from_slice(&temp_buf[..n]);
    };

    let head = String::from_utf8_lossy(&buffer[..headers_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Ok(ReadOutcome::Malformed(format!("bad request line: {:?}", request_line)));
    }

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    if headers.contains_key("transfer-encoding") {
        return Ok(ReadOutcome::LengthRequired);
    }
    let content_length = match extract_content_length(&headers) {
        Ok(length) => length.unwrap_or(0),
        Err(msg) => return Ok(ReadOutcome::Malformed(msg)),
    };
    if content_length > max_body {
        return Ok(ReadOutcome::TooLarge {
            declared: content_length,
        });
    }

    let body_start = headers_end + 4;
    let mut body = buffer.split_off(body_start.min(buffer.len()));
    while body.len() < content_length {
        let n = read_some(stream, &mut temp_buf).await?;
        if n == 0 {
            return Ok(ReadOutcome::Malformed("connection closed inside body".to_string()));
        }
        body.extend_from_slice(&temp_buf[..n]);
    }
    body.truncate(content_length);

    Ok(ReadOutcome::Request(HttpRequest {
        method: parts[0].to_uppercase(),
        path: normalize_path(parts[1]),
        headers,
        body,
    }))
}

async fn read_some<S>(stream: &mut S, buf: &mut [u8]) -> std::io::Result<usize>
where
    S: AsyncRead + Unpin,
{
    match timeout(READ_IDLE_TIMEOUT, stream.read(buf)).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "request read timeout",
        )),
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn extract_content_length(headers: &HashMap<String, String>) -> Result<Option<usize>, String> {
    match headers.get("content-length") {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("invalid Content-Length: {:?}", value)),
        None => Ok(None),
    }
}

/// Strip the query string and any trailing slash (except for the root).
fn normalize_path(raw: &str) -> String {
    let path = raw.split('?').next().unwrap_or(raw);
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

pub fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type, X-File-Name\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
