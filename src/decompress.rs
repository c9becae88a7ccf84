//! Streaming decompression of response bodies.
//!
//! Push decoders: each body block is written in, whatever inflated output
//! it produced is taken out. `deflate` sniffs the first bytes to accept
//! both zlib-wrapped and raw streams, which servers disagree about.

use std::io::Write;

use bytes::Bytes;
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};
use http::header::{HeaderMap, CONTENT_ENCODING};

use crate::error::{Error, Result};

pub(crate) struct Decompressor {
    inner: Inner,
}

enum Inner {
    Gzip(GzDecoder<Vec<u8>>),
    Zlib(ZlibDecoder<Vec<u8>>),
    RawDeflate(DeflateDecoder<Vec<u8>>),
    /// `deflate` before the first bytes reveal which framing it is.
    SniffDeflate(Vec<u8>),
    Done,
}

impl Decompressor {
    /// Pick a decompressor from the response's `Content-Encoding`, if the
    /// encoding is one that is handled.
    pub(crate) fn from_headers(headers: &HeaderMap) -> Option<Decompressor> {
        let encoding = headers.get(CONTENT_ENCODING)?.to_str().ok()?;
        match encoding.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(Decompressor {
                inner: Inner::Gzip(GzDecoder::new(Vec::new())),
            }),
            "deflate" => Some(Decompressor {
                inner: Inner::SniffDeflate(Vec::new()),
            }),
            _ => None,
        }
    }

    /// Feed one compressed block, returning the bytes it inflated to.
    pub(crate) fn push(&mut self, block: &[u8]) -> Result<Bytes> {
        match self.inner {
            Inner::Gzip(ref mut dec) => {
                dec.write_all(block).map_err(Error::decompress)?;
                Ok(take_output(dec.get_mut()))
            }
            Inner::Zlib(ref mut dec) => {
                dec.write_all(block).map_err(Error::decompress)?;
                Ok(take_output(dec.get_mut()))
            }
            Inner::RawDeflate(ref mut dec) => {
                dec.write_all(block).map_err(Error::decompress)?;
                Ok(take_output(dec.get_mut()))
            }
            Inner::SniffDeflate(ref mut pending) => {
                pending.extend_from_slice(block);
                if pending.len() < 2 {
                    return Ok(Bytes::new());
                }
                let buffered = std::mem::take(pending);
                // zlib: low nibble 8 and a valid header checksum
                let header = u16::from_be_bytes([buffered[0], buffered[1]]);
                let zlib = buffered[0] & 0x0f == 8 && header % 31 == 0;
                self.inner = if zlib {
                    Inner::Zlib(ZlibDecoder::new(Vec::new()))
                } else {
                    Inner::RawDeflate(DeflateDecoder::new(Vec::new()))
                };
                self.push(&buffered)
            }
            Inner::Done => Err(Error::decompress("write after finish")),
        }
    }

    /// Signal the end of the compressed stream and drain the tail.
    ///
    /// A truncated stream errors here even if every block decoded cleanly.
    pub(crate) fn finish(&mut self) -> Result<Bytes> {
        let inner = std::mem::replace(&mut self.inner, Inner::Done);
        match inner {
            Inner::Gzip(dec) => dec.finish().map(Into::into).map_err(Error::decompress),
            Inner::Zlib(dec) => dec.finish().map(Into::into).map_err(Error::decompress),
            Inner::RawDeflate(dec) => dec.finish().map(Into::into).map_err(Error::decompress),
            // an empty deflate body never got past sniffing; nothing to emit
            Inner::SniffDeflate(pending) if pending.is_empty() => Ok(Bytes::new()),
            Inner::SniffDeflate(_) => Err(Error::decompress("truncated deflate stream")),
            Inner::Done => Ok(Bytes::new()),
        }
    }
}

fn take_output(out: &mut Vec<u8>) -> Bytes {
    Bytes::from(std::mem::take(out))
}

impl std::fmt::Debug for Decompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.inner {
            Inner::Gzip(_) => "gzip",
            Inner::Zlib(_) | Inner::RawDeflate(_) | Inner::SniffDeflate(_) => "deflate",
            Inner::Done => "done",
        };
        f.debug_tuple("Decompressor").field(&name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;

    fn headers(encoding: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(CONTENT_ENCODING, encoding.parse().unwrap());
        map
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn drain(dec: &mut Decompressor, compressed: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        // one byte at a time: block boundaries must not matter
        for b in compressed {
            out.extend_from_slice(&dec.push(std::slice::from_ref(b)).unwrap());
        }
        out.extend_from_slice(&dec.finish().unwrap());
        out
    }

    #[test]
    fn gzip_round_trip() {
        let mut dec = Decompressor::from_headers(&headers("gzip")).unwrap();
        assert_eq!(drain(&mut dec, &gzip(b"Hello, world")), b"Hello, world");
    }

    #[test]
    fn deflate_zlib_round_trip() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"zlib framed").unwrap();
        let compressed = enc.finish().unwrap();

        let mut dec = Decompressor::from_headers(&headers("deflate")).unwrap();
        assert_eq!(drain(&mut dec, &compressed), b"zlib framed");
    }

    #[test]
    fn deflate_raw_round_trip() {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"raw deflate").unwrap();
        let compressed = enc.finish().unwrap();

        let mut dec = Decompressor::from_headers(&headers("deflate")).unwrap();
        assert_eq!(drain(&mut dec, &compressed), b"raw deflate");
    }

    #[test]
    fn identity_and_unknown_encodings_pass_through() {
        assert!(Decompressor::from_headers(&HeaderMap::new()).is_none());
        assert!(Decompressor::from_headers(&headers("br")).is_none());
    }

    #[test]
    fn corrupt_gzip_errors() {
        let mut compressed = gzip(b"Hello, world");
        let mid = compressed.len() / 2;
        compressed[mid] ^= 0xff;
        let mut dec = Decompressor::from_headers(&headers("gzip")).unwrap();
        let result = (|| {
            for b in &compressed {
                dec.push(std::slice::from_ref(b))?;
            }
            dec.finish()
        })();
        assert!(result.is_err());
    }

    #[test]
    fn truncated_gzip_errors_on_finish() {
        let compressed = gzip(b"Hello, world");
        let mut dec = Decompressor::from_headers(&headers("gzip")).unwrap();
        dec.push(&compressed[..compressed.len() - 4]).unwrap();
        assert!(dec.finish().is_err());
    }
}
