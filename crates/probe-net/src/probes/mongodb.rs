//! MongoDB wire protocol ping (C7.3): an `OP_QUERY` against `admin.$cmd`
//! asking `{ismaster: 1, helloOk: true}`, validated against the resulting
//! `OP_REPLY`.

use crate::socket::Socket;
use crate::{Error, Result};

const OP_QUERY: i32 = 2004;
const OP_REPLY: i32 = 1;
const REQUEST_ID: i32 = 1;

/// A real `ismaster` document is well under a kilobyte; refuse to allocate
/// past this even if a peer reports a much larger BSON length.
const MAX_DOCUMENT_LEN: usize = 64 * 1024;

/// BSON-encode `{ismaster: 1, helloOk: true}`.
fn ismaster_document() -> Vec<u8> {
    let mut doc = Vec::new();
    // ismaster: int32(1)
    doc.push(0x10);
    doc.extend_from_slice(b"ismaster\0");
    doc.extend_from_slice(&1i32.to_le_bytes());
    // helloOk: bool(true)
    doc.push(0x08);
    doc.extend_from_slice(b"helloOk\0");
    doc.push(1);
    doc.push(0); // document terminator
    let len = (doc.len() + 4) as i32;
    let mut out = len.to_le_bytes().to_vec();
    out.extend_from_slice(&doc);
    out
}

fn op_query_message() -> Vec<u8> {
    let collection = b"admin.$cmd\0";
    let document = ismaster_document();

    let mut body = Vec::new();
    body.extend_from_slice(&0i32.to_le_bytes()); // flags
    body.extend_from_slice(collection);
    body.extend_from_slice(&0i32.to_le_bytes()); // numberToSkip
    body.extend_from_slice(&(-1i32).to_le_bytes()); // numberToReturn
    body.extend_from_slice(&document);

    let message_length = (16 + body.len()) as i32;
    let mut message = Vec::new();
    message.extend_from_slice(&message_length.to_le_bytes());
    message.extend_from_slice(&REQUEST_ID.to_le_bytes());
    message.extend_from_slice(&0i32.to_le_bytes()); // responseTo
    message.extend_from_slice(&OP_QUERY.to_le_bytes());
    message.extend_from_slice(&body);
    message
}

/// Send the `ismaster` ping and validate the reply's envelope and first
/// BSON element well enough to know the peer answered as a mongod would.
pub fn ping(socket: &mut Socket) -> Result<()> {
    socket.write_all(&op_query_message())?;

    let mut header = [0u8; 16];
    socket.read_exact(&mut header)?;
    let message_length = i32::from_le_bytes(header[0..4].try_into().unwrap());
    let response_to = i32::from_le_bytes(header[8..12].try_into().unwrap());
    let op_code = i32::from_le_bytes(header[12..16].try_into().unwrap());

    if (message_length as usize) < 51 {
        return Err(Error::Protocol(format!(
            "reply too short: {message_length} bytes"
        )));
    }
    if response_to != REQUEST_ID {
        return Err(Error::Protocol(format!(
            "unexpected response id: {response_to}"
        )));
    }
    if op_code != OP_REPLY {
        return Err(Error::Protocol(format!("unexpected opcode: {op_code}")));
    }

    let mut reply_header = [0u8; 20];
    socket.read_exact(&mut reply_header)?;
    let number_returned = i32::from_le_bytes(reply_header[16..20].try_into().unwrap());
    if number_returned < 1 {
        return Err(Error::Protocol("no documents returned".to_string()));
    }

    let mut doc_len_buf = [0u8; 4];
    socket.read_exact(&mut doc_len_buf)?;
    let doc_len = i32::from_le_bytes(doc_len_buf);
    if doc_len < 11 {
        return Err(Error::Protocol(format!(
            "first document too short: {doc_len} bytes"
        )));
    }
    if doc_len as usize > MAX_DOCUMENT_LEN {
        return Err(Error::Protocol(format!(
            "first document too large: {doc_len} bytes"
        )));
    }

    let mut rest = vec![0u8; (doc_len as usize).saturating_sub(4)];
    socket.read_exact(&mut rest)?;

    // helloOk: true is a 10-byte boolean element: tag, "helloOk\0", value.
    let expected = {
        let mut el = vec![0x08];
        el.extend_from_slice(b"helloOk\0");
        el.push(1);
        el
    };
    if !contains_subsequence(&rest, &expected) {
        return Err(Error::Protocol(
            "ismaster reply missing helloOk:true".to_string(),
        ));
    }

    Ok(())
}

fn contains_subsequence(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    fn valid_reply() -> Vec<u8> {
        let mut doc = Vec::new();
        doc.push(0x08);
        doc.extend_from_slice(b"helloOk\0");
        doc.push(1);
        doc.push(0);
        let doc_len = (doc.len() + 4) as i32;
        let mut doc_with_len = doc_len.to_le_bytes().to_vec();
        doc_with_len.extend_from_slice(&doc);

        let mut reply_body = Vec::new();
        reply_body.extend_from_slice(&0i32.to_le_bytes()); // responseFlags
        reply_body.extend_from_slice(&0i64.to_le_bytes()); // cursorId
        reply_body.extend_from_slice(&0i32.to_le_bytes()); // startingFrom
        reply_body.extend_from_slice(&1i32.to_le_bytes()); // numberReturned
        reply_body.extend_from_slice(&doc_with_len);

        let message_length = (16 + reply_body.len()) as i32;
        let mut message = Vec::new();
        message.extend_from_slice(&message_length.to_le_bytes());
        message.extend_from_slice(&2i32.to_le_bytes()); // requestId
        message.extend_from_slice(&REQUEST_ID.to_le_bytes()); // responseTo
        message.extend_from_slice(&OP_REPLY.to_le_bytes());
        message.extend_from_slice(&reply_body);
        message
    }

    #[test]
    fn valid_ismaster_reply_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).unwrap();
            stream.write_all(&valid_reply()).unwrap();
        });
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        ping(&mut socket).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn mismatched_response_to_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).unwrap();
            let mut reply = valid_reply();
            // responseTo lives at byte offset 8..12; corrupt it.
            reply[8..12].copy_from_slice(&99i32.to_le_bytes());
            stream.write_all(&reply).unwrap();
        });
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        let err = ping(&mut socket).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        handle.join().unwrap();
    }

    #[test]
    fn oversized_document_length_is_rejected_without_allocating() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).unwrap();

            let mut reply_body = Vec::new();
            reply_body.extend_from_slice(&0i32.to_le_bytes()); // responseFlags
            reply_body.extend_from_slice(&0i64.to_le_bytes()); // cursorId
            reply_body.extend_from_slice(&0i32.to_le_bytes()); // startingFrom
            reply_body.extend_from_slice(&1i32.to_le_bytes()); // numberReturned
            reply_body.extend_from_slice(&i32::MAX.to_le_bytes()); // claimed doc length

            let message_length = (16 + reply_body.len()) as i32;
            let mut message = Vec::new();
            message.extend_from_slice(&message_length.to_le_bytes());
            message.extend_from_slice(&2i32.to_le_bytes());
            message.extend_from_slice(&REQUEST_ID.to_le_bytes());
            message.extend_from_slice(&OP_REPLY.to_le_bytes());
            message.extend_from_slice(&reply_body);
            let _ = stream.write_all(&message);
        });
        let mut socket = Socket::open_tcp(addr, Duration::from_secs(1)).unwrap();
        let err = ping(&mut socket).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        handle.join().unwrap();
    }
}
