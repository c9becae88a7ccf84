//! Loopback servers and wire helpers shared by the integration tests.
#![allow(dead_code)]

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Bind a listener on an ephemeral loopback port.
pub async fn listener() -> (TcpListener, String) {
    let _ = tracing_subscriber::fmt::try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    (listener, base)
}

/// Read one request head (through the blank line) as a lossy string.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        if n == 0 {
            break;
        }
        buf.push(byte[0]);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Pull a header value (case-insensitive) out of a raw head.
pub fn header_value(head: &str, name: &str) -> Option<String> {
    for line in head.lines().skip(1) {
        if let Some((k, v)) = line.split_once(':') {
            if k.trim().eq_ignore_ascii_case(name) {
                return Some(v.trim().to_owned());
            }
        }
    }
    None
}

/// Read exactly `n` body bytes.
pub async fn read_body(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

/// Read raw bytes until the terminator appears (inclusive).
pub async fn read_until(stream: &mut TcpStream, terminator: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(terminator) {
        let n = stream.read(&mut byte).await.unwrap();
        if n == 0 {
            break;
        }
        buf.push(byte[0]);
    }
    buf
}

/// Write a complete response with a sized body and keep-alive semantics.
pub async fn respond(stream: &mut TcpStream, status: &str, extra_headers: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}\r\n",
        status,
        body.len(),
        extra_headers,
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();
    stream.flush().await.unwrap();
}

// ===== WebSocket test-side codec =====

pub mod ws {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use sha1::{Digest, Sha1};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

    /// Answer the upgrade handshake on a fresh server connection.
    ///
    /// Returns the request head so tests can assert on offered headers.
    pub async fn accept(stream: &mut TcpStream) -> String {
        let head = super::read_head(stream).await;
        let key = super::header_value(&head, "sec-websocket-key").expect("client sends a key");
        let mut sha = Sha1::new();
        sha.update(key.as_bytes());
        sha.update(GUID.as_bytes());
        let accept = BASE64.encode(sha.finalize());
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            accept,
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        head
    }

    /// A decoded client frame: (opcode, fin, unmasked payload).
    pub async fn read_frame(stream: &mut TcpStream) -> (u8, bool, Vec<u8>) {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await.unwrap();
        let fin = header[0] & 0x80 != 0;
        let opcode = header[0] & 0x0F;
        let masked = header[1] & 0x80 != 0;
        assert!(masked, "client frames must be masked");
        let mut len = (header[1] & 0x7F) as u64;
        if len == 126 {
            let mut ext = [0u8; 2];
            stream.read_exact(&mut ext).await.unwrap();
            len = u16::from_be_bytes(ext) as u64;
        } else if len == 127 {
            let mut ext = [0u8; 8];
            stream.read_exact(&mut ext).await.unwrap();
            len = u64::from_be_bytes(ext);
        }
        let mut key = [0u8; 4];
        stream.read_exact(&mut key).await.unwrap();
        let mut payload = vec![0u8; len as usize];
        stream.read_exact(&mut payload).await.unwrap();
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
        (opcode, fin, payload)
    }

    /// Write an unmasked server frame.
    pub async fn write_frame(stream: &mut TcpStream, opcode: u8, fin: bool, payload: &[u8]) {
        let mut frame = Vec::with_capacity(payload.len() + 10);
        frame.push(if fin { 0x80 | opcode } else { opcode });
        match payload.len() {
            len if len < 126 => frame.push(len as u8),
            len if len <= u16::MAX as usize => {
                frame.push(126);
                frame.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                frame.push(127);
                frame.extend_from_slice(&(len as u64).to_be_bytes());
            }
        }
        frame.extend_from_slice(payload);
        stream.write_all(&frame).await.unwrap();
        stream.flush().await.unwrap();
    }
}
