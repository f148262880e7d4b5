//! MQTT v3.1.1 connect/disconnect probe (C7.4): a CONNECT with a one-second
//! keep-alive and a client id scoped to this process's incarnation,
//! validated against CONNACK, followed by a best-effort DISCONNECT no
//! matter how the CONNACK turned out.

use crate::socket::Socket;
use crate::{Error, Result};

fn encode_remaining_length(mut len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
    out
}

fn encode_str(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = (bytes.len() as u16).to_be_bytes().to_vec();
    out.extend_from_slice(bytes);
    out
}

fn send_connect(socket: &mut Socket, client_id: &str) -> Result<()> {
    let mut payload = encode_str("MQTT");
    payload.push(4); // protocol level: MQTT 3.1.1
    payload.push(0x02); // connect flags: clean session
    payload.extend_from_slice(&1u16.to_be_bytes()); // keep alive: 1s
    payload.extend_from_slice(&encode_str(client_id));

    let mut packet = vec![0x10u8];
    packet.extend_from_slice(&encode_remaining_length(payload.len()));
    packet.extend_from_slice(&payload);
    socket.write_all(&packet)
}

fn read_connack(socket: &mut Socket) -> Result<()> {
    let packet_type = socket.read_byte()?;
    if packet_type & 0xF0 != 0x20 {
        return Err(Error::Protocol(format!(
            "expected CONNACK, got packet type {packet_type:#x}"
        )));
    }
    let remaining_length = socket.read_byte()?;
    if remaining_length != 2 {
        return Err(Error::Protocol(format!(
            "unexpected CONNACK remaining length: {remaining_length}"
        )));
    }
    let _session_present = socket.read_byte()?;
    match socket.read_byte()? {
        0 => Ok(()),
        1 => Err(Error::Protocol("unacceptable protocol version".to_string())),
        2 => Err(Error::Protocol("identifier rejected".to_string())),
        3 => Err(Error::Protocol("server unavailable".to_string())),
        4 => Err(Error::Protocol("bad user name or password".to_string())),
        5 => Err(Error::Protocol("not authorized".to_string())),
        other => Err(Error::Protocol(format!("unknown return code {other}"))),
    }
}

fn send_disconnect(socket: &mut Socket) {
    if let Err(e) = socket.write_all(&[0xE0, 0x00]) {
        log::debug!("mqtt disconnect send failed: {e}");
    }
}

/// Connect with client id `monit-<incarnation>`, validate CONNACK, then
/// disconnect regardless of outcome.
pub fn ping(socket: &mut Socket, incarnation: u64) -> Result<()> {
    let client_id = format!("monit-{incarnation}");
    let result = send_connect(socket, &client_id).and_then(|_| read_connack(socket));
    send_disconnect(socket);
    result
}
