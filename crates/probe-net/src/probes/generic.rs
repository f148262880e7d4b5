//! Generic send/expect probe (C7.1): write an optional payload, optionally
//! read a response back and match it against a pattern.

use std::time::Duration;

use regex::bytes::Regex;

use crate::socket::Socket;
use crate::{Error, Result};

/// Secondary read timeout once a payload has been sent and a reply is
/// expected. Independent of the socket's connect/overall timeout.
const SECONDARY_TIMEOUT: Duration = Duration::from_millis(200);

/// Tunable knobs for a generic send/expect probe. No parsed file format
/// backs this; callers build one directly with the defaults they need.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Upper bound on the response buffer `expect` reads into.
    pub response_cap: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { response_cap: 4096 }
    }
}

/// Unescape literal `\0` two-character sequences into NUL bytes, leaving
/// everything else untouched, so a probe's `send` string can embed binary
/// NULs.
pub fn unescape(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() && bytes[i + 1] == b'0' {
            out.push(0);
            i += 2;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

/// Send an optional payload, then optionally read a response and match it
/// against `expect`. The first byte is read under the socket's current
/// timeout; the remainder under [`SECONDARY_TIMEOUT`]. The socket's prior
/// timeout is restored before returning on every path.
pub fn probe(
    socket: &mut Socket,
    send: Option<&str>,
    expect: Option<&Regex>,
    config: &ProbeConfig,
) -> Result<()> {
    if let Some(payload) = send {
        socket.write_all(&unescape(payload))?;
    }

    let Some(pattern) = expect else {
        return Ok(());
    };

    let original_timeout = socket.get_timeout()?;
    let result = read_response(socket, original_timeout, config.response_cap);

    let response = result?;
    if pattern.is_match(&response) {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "response did not match expected pattern: {:?}",
            String::from_utf8_lossy(&response)
        )))
    }
}

/// Read one byte under `first_byte_timeout`, then the remainder under
/// [`SECONDARY_TIMEOUT`] into a buffer capped at `cap`, restoring
/// `first_byte_timeout` on every exit path. Embedded NUL bytes are escaped
/// to the two-character `\0` sequence so they can be matched literally in a
/// pattern; every other byte (the response may not be valid UTF-8 at all)
/// is passed through unchanged, matching the donor's byte-for-byte regex
/// match rather than re-decoding the response as text.
fn read_response(
    socket: &mut Socket,
    first_byte_timeout: Option<Duration>,
    cap: usize,
) -> Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(cap.min(4096));
    let mut one = [0u8; 1];
    let n = socket.read(&mut one)?;
    if n > 0 {
        raw.push(one[0]);
    }

    if let Err(e) = socket.set_timeout(Some(SECONDARY_TIMEOUT)) {
        let _ = socket.set_timeout(first_byte_timeout);
        return Err(e);
    }
    let rest = read_remainder(socket, cap.saturating_sub(raw.len()));
    socket.set_timeout(first_byte_timeout)?;
    raw.extend(rest?);

    let mut escaped = Vec::with_capacity(raw.len());
    for byte in raw {
        let emitted_len = if byte == 0 { 2 } else { 1 };
        if escaped.len() + emitted_len > cap {
            break;
        }
        if byte == 0 {
            escaped.extend_from_slice(b"\\0");
        } else {
            escaped.push(byte);
        }
    }
    Ok(escaped)
}

fn read_remainder(socket: &mut Socket, cap: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; cap.min(4096)];
    match socket.read(&mut buf) {
        Ok(n) => Ok(buf[..n].to_vec()),
        Err(Error::Io(e)) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn unescape_converts_nul_sequence() {
        assert_eq!(unescape(r"ping\0"), vec![b'p', b'i', b'n', b'g', 0]);
        assert_eq!(unescape("plain"), b"plain".to_vec());
    }

    #[test]
    fn matching_response_succeeds_and_restores_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 16];
            let n = stream.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"PING\r\n");
            stream.write_all(b"+PONG\r\n").unwrap();
        });
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        socket.set_timeout(Some(Duration::from_secs(5))).unwrap();
        let pattern = Regex::new("PONG").unwrap();
        probe(
            &mut socket,
            Some("PING\r\n"),
            Some(&pattern),
            &ProbeConfig::default(),
        )
        .unwrap();
        assert_eq!(socket.get_timeout().unwrap(), Some(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn mismatched_response_is_a_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf);
            stream.write_all(b"-ERR\r\n").unwrap();
        });
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        let pattern = Regex::new("PONG").unwrap();
        let err = probe(
            &mut socket,
            Some("PING\r\n"),
            Some(&pattern),
            &ProbeConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        handle.join().unwrap();
    }

    #[test]
    fn embedded_nul_is_escaped_in_the_matched_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf);
            stream.write_all(b"ok\0done").unwrap();
        });
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        let pattern = Regex::new(r"ok\\0done").unwrap();
        probe(
            &mut socket,
            Some("hi\r\n"),
            Some(&pattern),
            &ProbeConfig::default(),
        )
        .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn high_bytes_in_a_binary_response_are_matched_verbatim() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf);
            stream.write_all(&[0xFF, 0xFE, b'!']).unwrap();
        });
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        let pattern = Regex::new(r"\xff\xfe!").unwrap();
        probe(
            &mut socket,
            Some("hi\r\n"),
            Some(&pattern),
            &ProbeConfig::default(),
        )
        .unwrap();
        handle.join().unwrap();
    }
}
