//! `multipart/form-data` composition.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use http::header::HeaderValue;
use rand::Rng;

use crate::error::{Error, Result};

/// File parts stream in reads of this size rather than preloading.
const FILE_CHUNK_SIZE: usize = 1024 * 1024;

/// A `multipart/form-data` body under construction.
///
/// Text fields live in memory; file parts are read from disk while the
/// request body is written, so large uploads never load fully.
pub struct MultipartForm {
    boundary: String,
    parts: Vec<Part>,
}

enum Part {
    Text {
        name: String,
        value: Bytes,
    },
    File {
        name: String,
        filename: String,
        content_type: Option<String>,
        path: PathBuf,
        len: u64,
    },
}

impl MultipartForm {
    /// Start an empty form with a fresh random boundary.
    pub fn new() -> MultipartForm {
        let mut rng = rand::thread_rng();
        let boundary = (0..32)
            .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap())
            .collect();
        MultipartForm {
            boundary,
            parts: Vec::new(),
        }
    }

    /// The boundary token in use.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Add a text field.
    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<Bytes>) -> &mut Self {
        self.parts.push(Part::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Add a file part read from `path` when the request is sent.
    ///
    /// The part's filename defaults to the path's final component; the
    /// file's current size is captured now so the body can be sized.
    pub async fn add_file(
        &mut self,
        name: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<&mut Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_owned());
        self.add_file_with(name, path, filename, None).await
    }

    /// Like [`add_file`](Self::add_file) with explicit filename and
    /// content type.
    pub async fn add_file_with(
        &mut self,
        name: impl Into<String>,
        path: impl AsRef<Path>,
        filename: impl Into<String>,
        content_type: Option<&str>,
    ) -> Result<&mut Self> {
        let path = path.as_ref().to_path_buf();
        let meta = tokio::fs::metadata(&path).await.map_err(Error::builder)?;
        self.parts.push(Part::File {
            name: name.into(),
            filename: filename.into(),
            content_type: content_type.map(str::to_owned),
            path,
            len: meta.len(),
        });
        Ok(self)
    }

    pub(crate) fn content_type(&self) -> HeaderValue {
        HeaderValue::from_str(&format!("multipart/form-data; boundary={}", self.boundary))
            .expect("boundary is ascii")
    }

    fn part_header(&self, part: &Part) -> Vec<u8> {
        let mut head = format!("--{}\r\n", self.boundary).into_bytes();
        match part {
            Part::Text { name, .. } => {
                head.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
            }
            Part::File {
                name,
                filename,
                content_type,
                ..
            } => {
                head.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                if let Some(ct) = content_type {
                    head.extend_from_slice(format!("Content-Type: {}\r\n", ct).as_bytes());
                }
                head.extend_from_slice(b"\r\n");
            }
        }
        head
    }

    fn trailer(&self) -> Vec<u8> {
        format!("--{}--\r\n", self.boundary).into_bytes()
    }

    /// Exact size of the encoded body.
    pub(crate) fn content_length(&self) -> u64 {
        let mut total = 0u64;
        for part in &self.parts {
            total += self.part_header(part).len() as u64;
            total += match part {
                Part::Text { value, .. } => value.len() as u64,
                Part::File { len, .. } => *len,
            };
            total += 2; // the CRLF ending each part
        }
        total + self.trailer().len() as u64
    }

    /// Write the encoded body to a connection-like sink.
    ///
    /// File parts are streamed in [`FILE_CHUNK_SIZE`] reads. The number of
    /// bytes written always equals [`content_length`](Self::content_length);
    /// a file that changed size since it was added is an error.
    pub(crate) async fn write_to(&self, conn: &mut crate::conn::Connection) -> Result<()> {
        use tokio::io::AsyncReadExt;

        for part in &self.parts {
            conn.write_all(&self.part_header(part)).await?;
            match part {
                Part::Text { value, .. } => {
                    conn.write_all(value).await?;
                }
                Part::File { path, len, .. } => {
                    let mut file = tokio::fs::File::open(path).await.map_err(Error::builder)?;
                    let mut remaining = *len;
                    let mut buf = vec![0u8; FILE_CHUNK_SIZE.min(*len as usize).max(1)];
                    while remaining > 0 {
                        let want = buf.len().min(remaining as usize);
                        let read = file.read(&mut buf[..want]).await.map_err(Error::io)?;
                        if read == 0 {
                            return Err(Error::builder("file shrank while uploading"));
                        }
                        conn.write_all(&buf[..read]).await?;
                        remaining -= read as u64;
                    }
                }
            }
            conn.write_all(b"\r\n").await?;
        }
        conn.write_all(&self.trailer()).await?;
        Ok(())
    }
}

impl Default for MultipartForm {
    fn default() -> MultipartForm {
        MultipartForm::new()
    }
}

impl std::fmt::Debug for MultipartForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartForm")
            .field("boundary", &self.boundary)
            .field("parts", &self.parts.len())
            .finish()
    }
}
