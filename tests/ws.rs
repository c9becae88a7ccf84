//! WebSocket engine tests against a scripted loopback server.

mod support;

use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpListener;

use gale::ws::{Message, WsOptions};
use gale::{ErrorKind, HttpClient, RequestOptions};

const OP_TEXT: u8 = 0x1;
const OP_BINARY: u8 = 0x2;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;
const OP_PONG: u8 = 0xA;

async fn ws_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/chat", listener.local_addr().unwrap());
    (listener, url)
}

/// Accept one session and echo data frames, answering pings, until close.
fn spawn_echo(listener: TcpListener, text_prefix: &'static str) {
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::ws::accept(&mut stream).await;
        loop {
            let (opcode, _fin, payload) = support::ws::read_frame(&mut stream).await;
            match opcode {
                OP_TEXT => {
                    let mut reply = text_prefix.as_bytes().to_vec();
                    reply.extend_from_slice(&payload);
                    support::ws::write_frame(&mut stream, OP_TEXT, true, &reply).await;
                }
                OP_BINARY => {
                    support::ws::write_frame(&mut stream, OP_BINARY, true, &payload).await;
                }
                OP_PING => {
                    support::ws::write_frame(&mut stream, OP_PONG, true, &payload).await;
                }
                OP_CLOSE => {
                    support::ws::write_frame(&mut stream, OP_CLOSE, true, &payload).await;
                    return;
                }
                _ => {}
            }
        }
    });
}

#[tokio::test]
async fn text_echo() {
    let (listener, url) = ws_listener().await;
    spawn_echo(listener, "Echo: ");

    let client = HttpClient::new();
    let ws = client.websocket(url, WsOptions::new()).await.unwrap();

    ws.send_text("hello").await.unwrap();
    let text = ws.receive_text(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(text, "Echo: hello");
}

#[tokio::test]
async fn binary_round_trip() {
    let (listener, url) = ws_listener().await;
    spawn_echo(listener, "");

    let client = HttpClient::new();
    let ws = client.websocket(url, WsOptions::new()).await.unwrap();

    ws.send_bytes(&[0x01, 0x02, 0x03]).await.unwrap();
    let data = ws
        .receive_bytes(Some(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(&data[..], &[0x01, 0x02, 0x03]);
}

#[tokio::test]
async fn json_messages() {
    let (listener, url) = ws_listener().await;
    spawn_echo(listener, "");

    let client = HttpClient::new();
    let ws = client.websocket(url, WsOptions::new()).await.unwrap();

    ws.send_json(&serde_json::json!({"n": 1})).await.unwrap();
    let value: serde_json::Value = ws
        .receive_json(Some(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(value["n"], 1);
}

#[tokio::test]
async fn ping_resolves_with_the_pong_payload() {
    let (listener, url) = ws_listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::ws::accept(&mut stream).await;
        let (opcode, _, payload) = support::ws::read_frame(&mut stream).await;
        assert_eq!(opcode, OP_PING);
        support::ws::write_frame(&mut stream, OP_PONG, true, &payload).await;
        support::ws::write_frame(&mut stream, OP_TEXT, true, b"after-pong").await;
        // wait for the close before dropping the socket
        let _ = support::ws::read_frame(&mut stream).await;
    });

    let client = HttpClient::new();
    let ws = client.websocket(url, WsOptions::new()).await.unwrap();

    let pong = ws.ping(b"probe").await.unwrap();
    // the pong is observed while the consumer reads
    let text = ws.receive_text(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(text, "after-pong");
    let payload = pong.await.unwrap();
    assert_eq!(&payload[..], b"probe");
}

#[tokio::test]
async fn fragmented_messages_reassemble() {
    let (listener, url) = ws_listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::ws::accept(&mut stream).await;
        support::ws::write_frame(&mut stream, OP_TEXT, false, b"Hel").await;
        support::ws::write_frame(&mut stream, 0x0, false, b"lo, ").await;
        support::ws::write_frame(&mut stream, 0x0, true, b"world").await;
        let _ = support::ws::read_frame(&mut stream).await;
    });

    let client = HttpClient::new();
    let ws = client.websocket(url, WsOptions::new()).await.unwrap();
    let text = ws.receive_text(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(text, "Hello, world");
}

#[tokio::test]
async fn control_frames_interleave_with_fragments() {
    let (listener, url) = ws_listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::ws::accept(&mut stream).await;
        support::ws::write_frame(&mut stream, OP_TEXT, false, b"split").await;
        // a ping between the fragments
        support::ws::write_frame(&mut stream, OP_PING, true, b"mid").await;
        support::ws::write_frame(&mut stream, 0x0, true, b" done").await;
        // expect the pong the client owes us
        let (opcode, _, payload) = support::ws::read_frame(&mut stream).await;
        assert_eq!(opcode, OP_PONG);
        assert_eq!(payload, b"mid");
        let _ = support::ws::read_frame(&mut stream).await;
    });

    let client = HttpClient::new();
    let ws = client.websocket(url, WsOptions::new()).await.unwrap();
    let text = ws.receive_text(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(text, "split done");
    ws.close_default().await.unwrap();
}

#[tokio::test]
async fn server_close_ends_the_message_stream() {
    let (listener, url) = ws_listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::ws::accept(&mut stream).await;
        support::ws::write_frame(&mut stream, OP_TEXT, true, b"last words").await;
        let mut close = 1001u16.to_be_bytes().to_vec();
        close.extend_from_slice(b"going away");
        support::ws::write_frame(&mut stream, OP_CLOSE, true, &close).await;
        // the client echoes the close
        let (opcode, _, _) = support::ws::read_frame(&mut stream).await;
        assert_eq!(opcode, OP_CLOSE);
    });

    let client = HttpClient::new();
    let ws = client.websocket(url, WsOptions::new()).await.unwrap();

    let messages: Vec<Message> = ws
        .clone()
        .messages()
        .map(|m| m.unwrap())
        .collect::<Vec<_>>()
        .await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], Message::Text("last words".into()));
    assert_eq!(
        messages[1],
        Message::Close {
            code: 1001,
            reason: "going away".into()
        }
    );

    // the session is closed afterwards
    let err = ws.receive().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::WsClosed { .. }));
    let err = ws.send_text("too late").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::WsClosed { .. }));
}

#[tokio::test]
async fn handshake_rejects_bad_accept_key() {
    let (listener, url) = ws_listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::read_head(&mut stream).await;
        let response = "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: bm90IHRoZSByaWdodCBrZXk=\r\n\r\n";
        tokio::io::AsyncWriteExt::write_all(&mut stream, response.as_bytes())
            .await
            .unwrap();
    });

    let client = HttpClient::new();
    let err = client.websocket(url, WsOptions::new()).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::WsHandshake));
}

#[tokio::test]
async fn handshake_rejects_non_101() {
    let (listener, url) = ws_listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::read_head(&mut stream).await;
        support::respond(&mut stream, "403 Forbidden", "", b"no").await;
    });

    let client = HttpClient::new();
    let err = client.websocket(url, WsOptions::new()).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::WsHandshake));
    assert_eq!(err.status().map(|s| s.as_u16()), Some(403));
}

#[tokio::test]
async fn subprotocols_are_offered_and_selected() {
    let (listener, url) = ws_listener().await;
    let offered = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let head = support::read_head(&mut stream).await;
        let offered = support::header_value(&head, "sec-websocket-protocol");

        // minimal handshake with a selected protocol
        let key = support::header_value(&head, "sec-websocket-key").unwrap();
        use base64::Engine as _;
        use sha1::Digest as _;
        let mut sha = sha1::Sha1::new();
        sha.update(key.as_bytes());
        sha.update(b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11");
        let accept = base64::engine::general_purpose::STANDARD.encode(sha.finalize());
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\nSec-WebSocket-Protocol: chat.v2\r\n\r\n",
        );
        tokio::io::AsyncWriteExt::write_all(&mut stream, response.as_bytes())
            .await
            .unwrap();
        offered
    });

    let client = HttpClient::new();
    let ws = client
        .websocket(
            url,
            WsOptions::new().subprotocol("chat.v1").subprotocol("chat.v2"),
        )
        .await
        .unwrap();
    assert_eq!(ws.subprotocol(), Some("chat.v2"));
    assert_eq!(offered.await.unwrap().as_deref(), Some("chat.v1, chat.v2"));
}

#[tokio::test]
async fn concurrent_reads_are_rejected() {
    let (listener, url) = ws_listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::ws::accept(&mut stream).await;
        // keep the session open but silent
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let client = HttpClient::new();
    let ws = client.websocket(url, WsOptions::new()).await.unwrap();

    let reader = {
        let ws = ws.clone();
        tokio::spawn(async move { ws.receive().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = ws.receive().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ConcurrentRead));
    reader.abort();
}

#[tokio::test]
async fn keepalive_pings_flow_while_consuming() {
    let (listener, url) = ws_listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::ws::accept(&mut stream).await;
        let (opcode, _, payload) = support::ws::read_frame(&mut stream).await;
        assert_eq!(opcode, OP_PING);
        support::ws::write_frame(&mut stream, OP_PONG, true, &payload).await;
        support::ws::write_frame(&mut stream, OP_TEXT, true, b"alive").await;
        let _ = support::ws::read_frame(&mut stream).await;
    });

    let client = HttpClient::new();
    let ws = client
        .websocket(
            url,
            WsOptions::new().keepalive(Duration::from_millis(50), Duration::from_secs(5)),
        )
        .await
        .unwrap();

    // the consumer read observes both the pong and the text frame
    let text = ws.receive_text(Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(text, "alive");
    ws.close_default().await.unwrap();
}

#[tokio::test]
async fn ws_scheme_requires_ws_urls_to_share_http_pools() {
    // a ws:// URL and its http:// twin use one pool key; exercised by
    // performing a normal request and a handshake against one server
    let (listener, base) = support::listener().await;
    let ws_url = base.replace("http://", "ws://") + "/chat";
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let head = support::read_head(&mut stream).await;
        assert!(head.starts_with("GET /plain"));
        support::respond(&mut stream, "200 OK", "", b"plain").await;

        // the upgrade arrives on the same kept-alive connection
        support::ws::accept(&mut stream).await;
        let (opcode, _, _) = support::ws::read_frame(&mut stream).await;
        assert_eq!(opcode, OP_CLOSE);
    });

    let client = HttpClient::new();
    let mut res = client
        .get(format!("{base}/plain"), RequestOptions::new())
        .await
        .unwrap();
    res.content().await.unwrap();

    let ws = client.websocket(ws_url, WsOptions::new()).await.unwrap();
    ws.close_default().await.unwrap();

    let stats = client.pool_stats(base).unwrap();
    assert_eq!(stats.created, 1, "the upgrade reused the pooled connection");
}
