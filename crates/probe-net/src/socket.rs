//! Thin socket abstraction (C6): one small surface the protocol probes
//! drive instead of touching `std::net`/`std::os::unix::net` directly, so a
//! probe can escalate to a secondary timeout and restore the original one
//! on every exit path.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Past this many bytes without a `\n`, [`Socket::read_line`] gives up
/// rather than growing its buffer forever against an unterminated stream.
const MAX_LINE_LEN: usize = 16 * 1024;

/// A connected stream, TCP or Unix domain, behind one read/write/timeout
/// contract.
pub enum Socket {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Socket {
    pub fn open_tcp(addr: impl ToSocketAddrs, connect_timeout: Duration) -> Result<Self> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Protocol("no address resolved".to_string()))?;
        let stream = TcpStream::connect_timeout(&addr, connect_timeout)?;
        Ok(Socket::Tcp(stream))
    }

    pub fn open_unix(path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(path)?;
        Ok(Socket::Unix(stream))
    }

    /// Set both the read and write timeout. `None` blocks indefinitely.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match self {
            Socket::Tcp(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)?;
            }
            Socket::Unix(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)?;
            }
        }
        Ok(())
    }

    pub fn get_timeout(&self) -> Result<Option<Duration>> {
        Ok(match self {
            Socket::Tcp(s) => s.read_timeout()?,
            Socket::Unix(s) => s.read_timeout()?,
        })
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Socket::Tcp(s) => s.read(buf)?,
            Socket::Unix(s) => s.read(buf)?,
        };
        Ok(n)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        let n = self.read(&mut b)?;
        if n == 0 {
            return Err(Error::Protocol("peer closed the connection".to_string()));
        }
        Ok(b[0])
    }

    /// Read until `\n` (exclusive), one byte at a time, up to
    /// [`MAX_LINE_LEN`]. EOF before a terminator is an error, not a partial
    /// line: HTTP framing always ends headers with a blank `\r\n`, so a
    /// stream that closes mid-line is truncated, not merely unterminated.
    /// Fine for the line-oriented parts of HTTP and the generic probe;
    /// protocols with binary framing read exact byte counts instead.
    pub fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        loop {
            let byte = self.read_byte()?;
            if byte == b'\n' {
                break;
            }
            if byte != b'\r' {
                if line.len() >= MAX_LINE_LEN {
                    return Err(Error::Protocol(format!(
                        "line exceeded {MAX_LINE_LEN} bytes without a terminator"
                    )));
                }
                line.push(byte);
            }
        }
        String::from_utf8(line).map_err(|e| Error::Protocol(e.to_string()))
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self {
            Socket::Tcp(s) => s.read_exact(buf)?,
            Socket::Unix(s) => s.read_exact(buf)?,
        }
        Ok(())
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Socket::Tcp(s) => s.write_all(buf)?,
            Socket::Unix(s) => s.write_all(buf)?,
        }
        Ok(())
    }

    pub fn peer_address(&self) -> Result<String> {
        Ok(match self {
            Socket::Tcp(s) => s.peer_addr()?.to_string(),
            Socket::Unix(_) => "unix".to_string(),
        })
    }

    pub fn close(&mut self) -> Result<()> {
        match self {
            Socket::Tcp(s) => s.shutdown(std::net::Shutdown::Both)?,
            Socket::Unix(s) => s.shutdown(std::net::Shutdown::Both)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn read_line_strips_crlf() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"hello world\r\n").unwrap();
        });
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        assert_eq!(socket.read_line().unwrap(), "hello world");
        handle.join().unwrap();
    }

    #[test]
    fn set_timeout_round_trips() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _handle = thread::spawn(move || {
            let _ = listener.accept();
        });
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        socket.set_timeout(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(socket.get_timeout().unwrap(), Some(Duration::from_millis(200)));
    }
}
