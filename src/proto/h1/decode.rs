//! Decoders to handle different Transfer-Encodings.
//!
//! If a message body does not include a Transfer-Encoding, it *should*
//! include a Content-Length header.

use std::fmt;
use std::time::Duration;

use bytes::{Buf, Bytes};

use crate::conn::Connection;
use crate::error::{Error, Result};

use super::parse::BodyLength;

use self::Kind::{Chunked, Eof, Length};

/// Reads one response body off a connection, one block at a time.
#[derive(Clone, PartialEq)]
pub(crate) struct Decoder {
    kind: Kind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    /// A body delimited by a Content-Length of this many remaining bytes.
    Length(u64),
    /// A chunked body, with the framing state and the current chunk's
    /// remaining size.
    Chunked(ChunkedState, u64),
    /// A body delimited by connection close. The bool records whether EOF
    /// has been seen.
    Eof(bool),
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum ChunkedState {
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    End,
}

impl Decoder {
    pub(crate) fn new(len: BodyLength) -> Decoder {
        let kind = match len {
            BodyLength::Length(n) => Length(n),
            BodyLength::Chunked => Chunked(ChunkedState::Size, 0),
            BodyLength::Eof => Eof(false),
        };
        Decoder { kind }
    }

    pub(crate) fn is_chunked(&self) -> bool {
        matches!(self.kind, Chunked(..))
    }

    /// True when the body, as framed, has been fully delivered.
    pub(crate) fn is_eof(&self) -> bool {
        matches!(
            self.kind,
            Length(0) | Chunked(ChunkedState::End, _) | Eof(true)
        )
    }

    /// Whether reaching the end of this body leaves the connection usable.
    ///
    /// A close-delimited body by definition ends with the connection.
    pub(crate) fn keeps_connection(&self) -> bool {
        !matches!(self.kind, Eof(_))
    }

    /// Produce the next block of body bytes.
    ///
    /// An empty block signals the end of the body. Each underlying read is
    /// bounded by `read_budget`.
    pub(crate) async fn decode(
        &mut self,
        conn: &mut Connection,
        read_budget: Duration,
    ) -> Result<Bytes> {
        match self.kind {
            Length(ref mut remaining) => {
                if *remaining == 0 {
                    return Ok(Bytes::new());
                }
                if conn.read_buf.is_empty() && conn.fill_buf(read_budget).await? == 0 {
                    return Err(Error::parse("connection closed before body completed"));
                }
                let take = (*remaining).min(conn.read_buf.len() as u64) as usize;
                *remaining -= take as u64;
                Ok(conn.read_buf.split_to(take).freeze())
            }
            Chunked(ref mut state, ref mut size) => {
                loop {
                    let mut block = None;
                    // advances the chunked state
                    *state = state.step(conn, read_budget, size, &mut block).await?;
                    if *state == ChunkedState::End {
                        return Ok(Bytes::new());
                    }
                    if let Some(block) = block {
                        return Ok(block);
                    }
                }
            }
            Eof(ref mut seen) => {
                if *seen {
                    return Ok(Bytes::new());
                }
                if conn.read_buf.is_empty() && conn.fill_buf(read_budget).await? == 0 {
                    *seen = true;
                    return Ok(Bytes::new());
                }
                Ok(conn.read_buf.split().freeze())
            }
        }
    }
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.kind, f)
    }
}

async fn next_byte(conn: &mut Connection, read_budget: Duration) -> Result<u8> {
    if conn.read_buf.is_empty() && conn.fill_buf(read_budget).await? == 0 {
        return Err(Error::parse("unexpected eof during chunk framing"));
    }
    Ok(conn.read_buf.get_u8())
}

impl ChunkedState {
    async fn step(
        &self,
        conn: &mut Connection,
        read_budget: Duration,
        size: &mut u64,
        block: &mut Option<Bytes>,
    ) -> Result<ChunkedState> {
        use self::ChunkedState::*;
        match *self {
            Size => {
                match next_byte(conn, read_budget).await? {
                    b @ b'0'..=b'9' => {
                        checked_size(size, (b - b'0') as u64)?;
                    }
                    b @ b'a'..=b'f' => {
                        checked_size(size, (b + 10 - b'a') as u64)?;
                    }
                    b @ b'A'..=b'F' => {
                        checked_size(size, (b + 10 - b'A') as u64)?;
                    }
                    b'\t' | b' ' => return Ok(SizeLws),
                    b';' => return Ok(Extension),
                    b'\r' => return Ok(SizeLf),
                    _ => return Err(Error::parse("invalid chunk size line")),
                }
                Ok(Size)
            }
            SizeLws => match next_byte(conn, read_budget).await? {
                // LWS can follow the chunk size, but no more digits can come
                b'\t' | b' ' => Ok(SizeLws),
                b';' => Ok(Extension),
                b'\r' => Ok(SizeLf),
                _ => Err(Error::parse("invalid chunk size linear white space")),
            },
            Extension => match next_byte(conn, read_budget).await? {
                b'\r' => Ok(SizeLf),
                // no supported extensions
                _ => Ok(Extension),
            },
            SizeLf => match next_byte(conn, read_budget).await? {
                b'\n' if *size == 0 => Ok(EndCr),
                b'\n' => Ok(Body),
                _ => Err(Error::parse("invalid chunk size LF")),
            },
            Body => {
                if conn.read_buf.is_empty() && conn.fill_buf(read_budget).await? == 0 {
                    return Err(Error::parse("unexpected eof inside a chunk"));
                }
                let take = (*size).min(conn.read_buf.len() as u64) as usize;
                *size -= take as u64;
                *block = Some(conn.read_buf.split_to(take).freeze());
                if *size == 0 {
                    Ok(BodyCr)
                } else {
                    Ok(Body)
                }
            }
            BodyCr => match next_byte(conn, read_budget).await? {
                b'\r' => Ok(BodyLf),
                _ => Err(Error::parse("invalid chunk body CR")),
            },
            BodyLf => match next_byte(conn, read_budget).await? {
                b'\n' => Ok(Size),
                _ => Err(Error::parse("invalid chunk body LF")),
            },
            // optional trailer section after the zero chunk; skipped
            Trailer => match next_byte(conn, read_budget).await? {
                b'\r' => Ok(TrailerLf),
                _ => Ok(Trailer),
            },
            TrailerLf => match next_byte(conn, read_budget).await? {
                b'\n' => Ok(EndCr),
                _ => Err(Error::parse("invalid trailer end LF")),
            },
            EndCr => match next_byte(conn, read_budget).await? {
                b'\r' => Ok(EndLf),
                _ => Ok(Trailer),
            },
            EndLf => match next_byte(conn, read_budget).await? {
                b'\n' => Ok(End),
                _ => Err(Error::parse("invalid chunk end LF")),
            },
            End => Ok(End),
        }
    }
}

fn checked_size(size: &mut u64, digit: u64) -> Result<()> {
    *size = size
        .checked_mul(16)
        .and_then(|s| s.checked_add(digit))
        .ok_or_else(|| Error::parse("chunk size overflows"))?;
    Ok(())
}
