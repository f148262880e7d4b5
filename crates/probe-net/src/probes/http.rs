//! HTTP probe (C7.2): request synthesis with header suppression, Basic
//! auth, chunked/content-length body reading under a cap, and a
//! status/content/checksum check pipeline run by [`probe`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};
use regex::Regex;
use sha1::Sha1;

use crate::socket::Socket;
use crate::{Error, Result};

/// Bodies larger than this are truncated; the probe still runs its content
/// checks against whatever was read.
const BODY_CAP: usize = 500_000;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub host: String,
    /// Extra headers, applied after the synthesized defaults so a request
    /// can override one by name.
    pub headers: Vec<(String, String)>,
    /// Names of synthesized default headers to omit entirely (exact,
    /// case-insensitive match).
    pub suppress_headers: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub body: Option<Vec<u8>>,
    /// Response bodies beyond this many bytes are truncated. Defaults to
    /// [`BODY_CAP`].
    pub body_cap: usize,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: "/".to_string(),
            host: String::new(),
            headers: Vec::new(),
            suppress_headers: Vec::new(),
            username: None,
            password: None,
            body: None,
            body_cap: BODY_CAP,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub truncated: bool,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn md5_hex(&self) -> String {
        let mut hasher = Md5::new();
        hasher.update(&self.body);
        hex::encode(hasher.finalize())
    }

    pub fn sha1_hex(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(&self.body);
        hex::encode(hasher.finalize())
    }
}

/// A content check's polarity: the body must or must not match.
#[derive(Debug, Clone)]
pub enum ContentCheck {
    Matches(Regex),
    NotMatches(Regex),
}

impl ContentCheck {
    pub fn evaluate(&self, body: &[u8]) -> bool {
        let text = String::from_utf8_lossy(body);
        match self {
            ContentCheck::Matches(re) => re.is_match(&text),
            ContentCheck::NotMatches(re) => !re.is_match(&text),
        }
    }
}

/// How the actual status is compared against the configured one to decide
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusComparator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl StatusComparator {
    fn holds(self, actual: u16, configured: u16) -> bool {
        match self {
            StatusComparator::Eq => actual == configured,
            StatusComparator::Ne => actual != configured,
            StatusComparator::Gt => actual > configured,
            StatusComparator::Ge => actual >= configured,
            StatusComparator::Lt => actual < configured,
            StatusComparator::Le => actual <= configured,
        }
    }
}

/// The status expectation a response is validated against (§4.6.2 step 1).
/// Defaults to the spec's own default: fail when `status >= 400`.
#[derive(Debug, Clone, Copy)]
pub struct StatusExpectation {
    pub comparator: StatusComparator,
    pub status: u16,
}

impl Default for StatusExpectation {
    fn default() -> Self {
        Self {
            comparator: StatusComparator::Ge,
            status: 400,
        }
    }
}

/// A checksum verified over the collected body (§4.6.2 step 5).
#[derive(Debug, Clone)]
pub enum Checksum {
    Md5(String),
    Sha1(String),
}

impl Checksum {
    fn verify(&self, resp: &HttpResponse) -> Result<()> {
        let (actual, expected) = match self {
            Checksum::Md5(expected) => (resp.md5_hex(), expected),
            Checksum::Sha1(expected) => (resp.sha1_hex(), expected),
        };
        if actual.len() != expected.len() {
            return Err(Error::Protocol(format!(
                "checksum length mismatch: expected {expected}, got {actual}"
            )));
        }
        if actual.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "checksum mismatch: expected {expected}, got {actual}"
            )))
        }
    }
}

/// What a probe run validates the response against, beyond "connected and
/// got a status line".
#[derive(Debug, Clone, Default)]
pub struct HttpCheck {
    pub status: StatusExpectation,
    pub content: Option<ContentCheck>,
    pub checksum: Option<Checksum>,
}

fn is_suppressed(name: &str, suppressed: &[String]) -> bool {
    suppressed.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// Reject a request-line or header component that carries a bare CR or LF:
/// such a value could smuggle an extra header or a second request into the
/// stream if written verbatim.
fn reject_crlf(field: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::Protocol(format!(
            "{field} contains a CR or LF byte"
        )));
    }
    Ok(())
}

fn write_header(out: &mut String, name: &str, value: &str, suppressed: &[String]) -> Result<()> {
    if !is_suppressed(name, suppressed) {
        reject_crlf("header name", name)?;
        reject_crlf("header value", value)?;
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    Ok(())
}

pub fn send_request(socket: &mut Socket, req: &HttpRequest) -> Result<()> {
    reject_crlf("method", &req.method)?;
    reject_crlf("path", &req.path)?;
    let mut out = format!("{} {} HTTP/1.1\r\n", req.method, req.path);

    write_header(&mut out, "Host", &req.host, &req.suppress_headers)?;
    write_header(&mut out, "User-Agent", "probe-net", &req.suppress_headers)?;
    write_header(&mut out, "Accept", "*/*", &req.suppress_headers)?;
    write_header(&mut out, "Accept-Encoding", "identity", &req.suppress_headers)?;
    write_header(&mut out, "Connection", "close", &req.suppress_headers)?;
    if let (Some(user), Some(pass)) = (&req.username, &req.password) {
        let encoded = BASE64.encode(format!("{user}:{pass}"));
        write_header(&mut out, "Authorization", &format!("Basic {encoded}"), &req.suppress_headers)?;
    }
    if let Some(body) = &req.body {
        write_header(
            &mut out,
            "Content-Length",
            &body.len().to_string(),
            &req.suppress_headers,
        )?;
    }
    for (name, value) in &req.headers {
        reject_crlf("header name", name)?;
        reject_crlf("header value", value)?;
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");

    socket.write_all(out.as_bytes())?;
    if let Some(body) = &req.body {
        socket.write_all(body)?;
    }
    Ok(())
}

/// Parse the status line and headers, then read the body only if
/// `read_body` is set — §4.6.2 step 3 only requires a body when a content
/// regex or checksum is configured.
pub fn read_response(socket: &mut Socket, cap: usize, read_body: bool) -> Result<HttpResponse> {
    let status_line = socket.read_line()?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| Error::Protocol(format!("malformed status line: {status_line:?}")))?;

    let mut headers = Vec::new();
    loop {
        let line = socket.read_line()?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::Protocol(format!("malformed header line: {line:?}")));
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let chunked = headers
        .iter()
        .any(|(n, v)| n.eq_ignore_ascii_case("Transfer-Encoding") && v.eq_ignore_ascii_case("chunked"));
    let content_length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, v)| v.parse::<usize>().ok());

    let (body, truncated) = if !read_body {
        (Vec::new(), false)
    } else if chunked {
        read_chunked_body(socket, cap)?
    } else if let Some(len) = content_length {
        if len == 0 {
            return Err(Error::Protocol(
                "content check configured but response has no body".to_string(),
            ));
        }
        read_sized_body(socket, len, cap)?
    } else {
        return Err(Error::Protocol(
            "content check configured but response has no Content-Length".to_string(),
        ));
    };

    Ok(HttpResponse {
        status,
        headers,
        body,
        truncated,
    })
}

/// Run the full request/response cycle and validate it against `check`:
/// status comparator, then content regex, then checksum, in that order
/// (§4.6.2 steps 1-5).
pub fn probe(socket: &mut Socket, req: &HttpRequest, check: &HttpCheck) -> Result<HttpResponse> {
    send_request(socket, req)?;
    let need_body = check.content.is_some() || check.checksum.is_some();
    let resp = read_response(socket, req.body_cap, need_body)?;

    if check
        .status
        .comparator
        .holds(resp.status, check.status.status)
    {
        return Err(Error::Protocol(format!(
            "status {} failed the configured expectation",
            resp.status
        )));
    }
    if let Some(content) = &check.content {
        if !content.evaluate(&resp.body) {
            return Err(Error::Protocol(
                "response body failed the content check".to_string(),
            ));
        }
    }
    if let Some(checksum) = &check.checksum {
        checksum.verify(&resp)?;
    }
    Ok(resp)
}

fn read_sized_body(socket: &mut Socket, len: usize, cap: usize) -> Result<(Vec<u8>, bool)> {
    let capped = len.min(cap);
    let mut buf = vec![0u8; capped];
    socket.read_exact(&mut buf)?;
    if len > capped {
        discard(socket, len - capped)?;
    }
    Ok((buf, len > cap))
}

fn read_chunked_body(socket: &mut Socket, cap: usize) -> Result<(Vec<u8>, bool)> {
    let mut body = Vec::new();
    let mut truncated = false;
    loop {
        let size_line = socket.read_line()?;
        let size_text = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_text, 16)
            .map_err(|_| Error::Protocol(format!("malformed chunk size: {size_line:?}")))?;
        if size == 0 {
            // trailing headers terminator
            let _ = socket.read_line()?;
            break;
        }
        let mut remaining = size;
        while remaining > 0 {
            let mut buf = vec![0u8; remaining.min(4096)];
            socket.read_exact(&mut buf)?;
            if body.len() < cap {
                let take = (cap - body.len()).min(buf.len());
                body.extend_from_slice(&buf[..take]);
                if take < buf.len() {
                    truncated = true;
                }
            } else {
                truncated = true;
            }
            remaining -= buf.len();
        }
        // trailing CRLF after each chunk's data
        let mut crlf = [0u8; 2];
        socket.read_exact(&mut crlf)?;
    }
    Ok((body, truncated))
}

fn discard(socket: &mut Socket, mut remaining: usize) -> Result<()> {
    let mut sink = [0u8; 4096];
    while remaining > 0 {
        let take = remaining.min(sink.len());
        socket.read_exact(&mut sink[..take])?;
        remaining -= take;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    fn serve(response: &'static [u8]) -> (std::net::SocketAddr, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).unwrap();
            request.extend_from_slice(&buf[..n]);
            stream.write_all(response).unwrap();
            request
        });
        (addr, handle)
    }

    #[test]
    fn suppressed_header_is_omitted_and_auth_header_is_base64() {
        let (addr, handle) = serve(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        let req = HttpRequest {
            host: "example.test".to_string(),
            username: Some("alice".to_string()),
            password: Some("secret".to_string()),
            suppress_headers: vec!["User-Agent".to_string()],
            ..HttpRequest::default()
        };
        send_request(&mut socket, &req).unwrap();
        let sent = String::from_utf8_lossy(&handle.join().unwrap()).into_owned();
        assert!(!sent.contains("User-Agent"));
        assert!(sent.contains("Authorization: Basic YWxpY2U6c2VjcmV0"));
        assert!(sent.contains("Accept: */*"));
        assert!(sent.contains("Accept-Encoding: identity"));
    }

    #[test]
    fn crlf_in_host_is_rejected_instead_of_injecting_a_header() {
        let (addr, _handle) = serve(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        let req = HttpRequest {
            host: "example.test\r\nX-Injected: 1".to_string(),
            ..HttpRequest::default()
        };
        let err = send_request(&mut socket, &req).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn crlf_in_a_custom_header_value_is_rejected() {
        let (addr, _handle) = serve(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        let req = HttpRequest {
            host: "example.test".to_string(),
            headers: vec![("X-Custom".to_string(), "a\r\nX-Injected: 1".to_string())],
            ..HttpRequest::default()
        };
        let err = send_request(&mut socket, &req).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn suppressing_accept_does_not_drop_accept_encoding() {
        let (addr, handle) = serve(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        let req = HttpRequest {
            host: "example.test".to_string(),
            suppress_headers: vec!["Accept".to_string()],
            ..HttpRequest::default()
        };
        send_request(&mut socket, &req).unwrap();
        let sent = String::from_utf8_lossy(&handle.join().unwrap()).into_owned();
        assert!(!sent.contains("Accept:"));
        assert!(sent.contains("Accept-Encoding: identity"));
    }

    #[test]
    fn content_length_body_round_trips() {
        let (addr, _handle) = serve(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        socket.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let resp = read_response(&mut socket, BODY_CAP, true).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hello");
        assert!(!resp.truncated);
    }

    #[test]
    fn chunked_body_is_reassembled() {
        let (addr, _handle) = serve(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        );
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        socket.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let resp = read_response(&mut socket, BODY_CAP, true).unwrap();
        assert_eq!(resp.body, b"hello world");
    }

    #[test]
    fn chunk_spanning_the_cap_in_one_read_is_marked_truncated() {
        let (addr, _handle) = serve(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nb\r\nhello world\r\n0\r\n\r\n",
        );
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        socket.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let resp = read_response(&mut socket, 5, true).unwrap();
        assert_eq!(resp.body, b"hello");
        assert!(resp.truncated);
    }

    #[test]
    fn status_only_check_does_not_require_a_body() {
        let (addr, _handle) = serve(b"HTTP/1.1 404 Not Found\r\n\r\n");
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        let req = HttpRequest {
            host: "example.test".to_string(),
            ..HttpRequest::default()
        };
        let err = probe(&mut socket, &req, &HttpCheck::default()).unwrap_err();
        match err {
            Error::Protocol(msg) => assert!(msg.contains("404")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn chunked_body_with_md5_checksum_passes() {
        let (addr, _handle) = serve(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        );
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        let req = HttpRequest {
            host: "example.test".to_string(),
            ..HttpRequest::default()
        };
        let check = HttpCheck {
            checksum: Some(Checksum::Md5(
                "5d41402abc4b2a76b9719d911017c592".to_string(),
            )),
            ..HttpCheck::default()
        };
        let resp = probe(&mut socket, &req, &check).unwrap();
        assert_eq!(resp.body, b"hello");
    }

    #[test]
    fn content_check_failure_reports_protocol_error() {
        let (addr, _handle) = serve(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        let req = HttpRequest {
            host: "example.test".to_string(),
            ..HttpRequest::default()
        };
        let check = HttpCheck {
            content: Some(ContentCheck::Matches(Regex::new("goodbye").unwrap())),
            ..HttpCheck::default()
        };
        let err = probe(&mut socket, &req, &check).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn content_check_polarity() {
        let matches = ContentCheck::Matches(Regex::new("ok").unwrap());
        let not_matches = ContentCheck::NotMatches(Regex::new("error").unwrap());
        assert!(matches.evaluate(b"all ok"));
        assert!(not_matches.evaluate(b"all ok"));
        assert!(!not_matches.evaluate(b"an error occurred"));
    }

    #[test]
    fn md5_and_sha1_are_stable() {
        let resp = HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: b"hello".to_vec(),
            truncated: false,
        };
        assert_eq!(resp.md5_hex(), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(resp.sha1_hex(), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }
}
