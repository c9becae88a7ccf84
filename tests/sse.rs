//! SSE engine tests: dispatch order, reconnection, dedup, validation.

mod support;

use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use gale::sse::SseOptions;
use gale::{ErrorKind, HttpClient, Method, RequestOptions};

async fn respond_stream(stream: &mut tokio::net::TcpStream, events: &str) {
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\n\r\n",
        events.len(),
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(events.as_bytes()).await.unwrap();
    stream.flush().await.unwrap();
}

#[tokio::test]
async fn events_dispatch_in_wire_order() {
    let (listener, base) = support::listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let head = support::read_head(&mut stream).await;
        assert_eq!(
            support::header_value(&head, "accept").as_deref(),
            Some("text/event-stream")
        );
        respond_stream(&mut stream, "data: x\n\ndata: y\n\n").await;
    });

    let client = HttpClient::new();
    let mut source = client
        .sse(format!("{base}/events"), SseOptions::new().reconnect(false))
        .await
        .unwrap();

    let first = source.next_event().await.unwrap().unwrap();
    assert_eq!(first.data, "x");
    let second = source.next_event().await.unwrap().unwrap();
    assert_eq!(second.data, "y");
    assert_eq!(source.next_event().await.unwrap(), None);
}

#[tokio::test]
async fn reconnect_sends_last_event_id_and_dedups() {
    let (listener, base) = support::listener().await;
    tokio::spawn(async move {
        // first connection: one event, then EOF
        let (mut stream, _) = listener.accept().await.unwrap();
        let head = support::read_head(&mut stream).await;
        assert!(support::header_value(&head, "last-event-id").is_none());
        respond_stream(&mut stream, "id: 1\ndata: event 1\n\n").await;
        drop(stream);

        // second connection: resumes after id 1
        let (mut stream, _) = listener.accept().await.unwrap();
        let head = support::read_head(&mut stream).await;
        assert_eq!(
            support::header_value(&head, "last-event-id").as_deref(),
            Some("1")
        );
        respond_stream(&mut stream, "id: 2\ndata: event 2\n\n").await;
        drop(stream);
    });

    let client = HttpClient::new();
    let mut source = client
        .sse(
            format!("{base}/events"),
            SseOptions::new().retry_delay(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    let first = source.next_event().await.unwrap().unwrap();
    assert_eq!((first.id.as_deref(), first.data.as_str()), (Some("1"), "event 1"));
    let second = source.next_event().await.unwrap().unwrap();
    assert_eq!((second.id.as_deref(), second.data.as_str()), (Some("2"), "event 2"));
    source.close();
}

#[tokio::test]
async fn duplicated_first_event_after_reconnect_is_dropped() {
    let (listener, base) = support::listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::read_head(&mut stream).await;
        respond_stream(&mut stream, "id: 7\ndata: repeated\n\n").await;
        drop(stream);

        // the server replays the last event, then continues
        let (mut stream, _) = listener.accept().await.unwrap();
        support::read_head(&mut stream).await;
        respond_stream(&mut stream, "id: 7\ndata: repeated\n\nid: 8\ndata: fresh\n\n").await;
        drop(stream);
    });

    let client = HttpClient::new();
    let mut source = client
        .sse(
            format!("{base}/events"),
            SseOptions::new().retry_delay(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    let first = source.next_event().await.unwrap().unwrap();
    assert_eq!(first.data, "repeated");
    let second = source.next_event().await.unwrap().unwrap();
    assert_eq!(second.data, "fresh", "the replayed event must be skipped");
    source.close();
}

#[tokio::test]
async fn server_retry_field_updates_the_delay() {
    let (listener, base) = support::listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::read_head(&mut stream).await;
        respond_stream(&mut stream, "retry: 25\ndata: a\n\n").await;
    });

    let client = HttpClient::new();
    let mut source = client
        .sse(
            format!("{base}/events"),
            SseOptions::new().retry_delay(Duration::from_secs(10)),
        )
        .await
        .unwrap();

    let event = source.next_event().await.unwrap().unwrap();
    assert_eq!(event.retry, Some(Duration::from_millis(25)));
    assert_eq!(source.retry_delay(), Duration::from_millis(25));
    source.close();
}

#[tokio::test]
async fn named_events_and_comments() {
    let (listener, base) = support::listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::read_head(&mut stream).await;
        respond_stream(
            &mut stream,
            ": keepalive\n\nevent: tick\ndata: 1\n\ndata: plain\n\n",
        )
        .await;
    });

    let client = HttpClient::new();
    let events: Vec<_> = client
        .sse(format!("{base}/events"), SseOptions::new().reconnect(false))
        .await
        .unwrap()
        .events()
        .map(|e| e.unwrap())
        .collect()
        .await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event, "tick");
    assert_eq!(events[0].data, "1");
    assert_eq!(events[1].event, "message");
    assert_eq!(events[1].data, "plain");
}

#[tokio::test]
async fn wrong_content_type_is_a_connection_error() {
    let (listener, base) = support::listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::read_head(&mut stream).await;
        support::respond(&mut stream, "200 OK", "Content-Type: text/html\r\n", b"nope").await;
    });

    let client = HttpClient::new();
    let err = client
        .sse(format!("{base}/events"), SseOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::SseConnection));
}

#[tokio::test]
async fn non_2xx_is_a_connection_error() {
    let (listener, base) = support::listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::read_head(&mut stream).await;
        support::respond(&mut stream, "503 Service Unavailable", "", b"").await;
    });

    let client = HttpClient::new();
    let err = client
        .sse(format!("{base}/events"), SseOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::SseConnection));
    assert_eq!(err.status().map(|s| s.as_u16()), Some(503));
}

#[tokio::test]
async fn malformed_retry_is_a_parsing_error() {
    let (listener, base) = support::listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        support::read_head(&mut stream).await;
        respond_stream(&mut stream, "retry: not-a-number\ndata: x\n\n").await;
    });

    let client = HttpClient::new();
    let mut source = client
        .sse(format!("{base}/events"), SseOptions::new())
        .await
        .unwrap();
    let err = source.next_event().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::SseParsing));
}

#[tokio::test]
async fn post_sse_with_json_body() {
    let (listener, base) = support::listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let head = support::read_head(&mut stream).await;
        assert!(head.starts_with("POST /stream"), "{head:?}");
        let len: usize = support::header_value(&head, "content-length")
            .unwrap()
            .parse()
            .unwrap();
        let body = support::read_body(&mut stream, len).await;
        assert_eq!(body, br#"{"stream":true}"#);
        respond_stream(&mut stream, "data: streamed\n\n").await;
    });

    let client = HttpClient::new();
    let mut source = client
        .sse(
            format!("{base}/stream"),
            SseOptions::new()
                .method(Method::POST)
                .reconnect(false)
                .options(
                    RequestOptions::new()
                        .json(&serde_json::json!({"stream": true}))
                        .unwrap(),
                ),
        )
        .await
        .unwrap();

    let event = source.next_event().await.unwrap().unwrap();
    assert_eq!(event.data, "streamed");
}
