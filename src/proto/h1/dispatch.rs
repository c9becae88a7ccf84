//! One request/response exchange on a leased connection.

use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use tracing::{debug, trace};

use crate::body::{Body, Kind};
use crate::conn::Connection;
use crate::error::{Error, Result, TimeoutPhase};
use crate::timeout::Deadline;

use super::encode;
use super::parse::{self, ResponseHead};

/// Write the request and read the response head.
///
/// The connection's parse buffer is left positioned at the first body byte.
/// Informational responses other than 101 are consumed and skipped.
pub(crate) async fn exchange(
    conn: &mut Connection,
    head: &[u8],
    body: &mut Body,
    sock_read: Duration,
    deadline: Deadline,
) -> Result<ResponseHead> {
    write_request(conn, head, body, deadline).await?;
    read_head(conn, sock_read, deadline).await
}

async fn write_request(
    conn: &mut Connection,
    head: &[u8],
    body: &mut Body,
    deadline: Deadline,
) -> Result<()> {
    let write = async {
        match body.kind {
            Kind::Empty => {
                conn.write_all(head).await?;
            }
            Kind::Full(ref data) => {
                // one buffer, one syscall for small requests
                let mut buf = BytesMut::with_capacity(head.len() + data.len());
                buf.extend_from_slice(head);
                buf.extend_from_slice(data);
                conn.write_all(&buf).await?;
            }
            Kind::Stream(ref mut stream) => {
                conn.write_all(head).await?;
                let mut frame = BytesMut::new();
                while let Some(block) = stream.next().await {
                    let block = block?;
                    frame.clear();
                    encode::write_chunk(&mut frame, &block);
                    if !frame.is_empty() {
                        conn.write_all(&frame).await?;
                    }
                }
                conn.write_all(encode::CHUNKED_TERMINATOR).await?;
            }
            Kind::Multipart(ref form) => {
                conn.write_all(head).await?;
                form.write_to(conn).await?;
            }
        }
        conn.flush().await
    };
    match deadline.remaining()? {
        Some(budget) => tokio::time::timeout(budget, write)
            .await
            .map_err(|_| Error::timeout(TimeoutPhase::Write))?,
        None => write.await,
    }
}

async fn read_head(
    conn: &mut Connection,
    sock_read: Duration,
    deadline: Deadline,
) -> Result<ResponseHead> {
    let mut received_any = !conn.read_buf.is_empty();
    loop {
        if let Some(head) = parse::parse_head(&mut conn.read_buf)? {
            if head.status.is_informational() && head.status != http::StatusCode::SWITCHING_PROTOCOLS
            {
                // 100 Continue and friends: not the real response
                trace!(status = %head.status, "skipping informational response");
                continue;
            }
            conn.set_keep_alive(head.keep_alive());
            debug!(status = %head.status, "response head received");
            return Ok(head);
        }
        let budget = deadline.clamp(sock_read)?;
        if conn.fill_buf(budget).await? == 0 {
            return if received_any {
                Err(Error::parse("connection closed inside response head"))
            } else {
                // a clean close before any byte: the reuse-staleness signal
                Err(Error::io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before response",
                )))
            };
        }
        received_any = true;
    }
}
