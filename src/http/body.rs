//! Request bodies.
//!
//! [`BodyReader`] drains exactly `Content-Length` bytes from the connection.
//! Up to `Limits::max_body` bytes are kept in memory. The moment the running
//! total would pass that threshold everything received so far moves into an
//! anonymous temporary file and the rest is streamed there in `chunk_size`
//! reads, so a single connection never holds more than `max_body` bytes of
//! body in memory.
//!
//! Handlers see the same [`Body`] in both cases: an [`AsyncRead`] that yields
//! the body once, front to back.

use std::io::{self, Cursor, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, ReadBuf};

use crate::config::Limits;
use crate::error::ConnectionError;
use crate::http::io::read_some;

#[derive(Debug)]
enum Storage {
    Memory(Cursor<Bytes>),
    Spilled(File),
}

/// A request body of known length, readable once from front to back.
///
/// The bytes live either in memory or in an anonymous temporary file; the
/// file is removed when the body is dropped.
#[derive(Debug)]
pub struct Body {
    storage: Storage,
    len: u64,
}

impl Body {
    /// A zero-length body, used when no Content-Length was sent.
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// An in-memory body, mostly useful for building requests in tests.
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self {
            len: bytes.len() as u64,
            storage: Storage::Memory(Cursor::new(bytes)),
        }
    }

    /// Total body length, independent of how much has been read.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True when the request declared no body bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when the body was moved to temporary storage.
    pub fn is_spilled(&self) -> bool {
        matches!(self.storage, Storage::Spilled(_))
    }

    /// Reads the unread remainder of the body into memory.
    pub async fn read_to_bytes(&mut self) -> io::Result<Bytes> {
        let mut out = Vec::new();
        self.read_to_end(&mut out).await?;
        Ok(Bytes::from(out))
    }
}

impl AsyncRead for Body {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().storage {
            Storage::Memory(cursor) => Pin::new(cursor).poll_read(cx, buf),
            Storage::Spilled(file) => Pin::new(file).poll_read(cx, buf),
        }
    }
}

enum Spool {
    Memory(BytesMut),
    File(File),
}

impl Spool {
    async fn write(&mut self, data: &[u8], threshold: usize) -> io::Result<()> {
        if let Spool::Memory(buf) = self {
            if buf.len() + data.len() <= threshold {
                buf.extend_from_slice(data);
                return Ok(());
            }

            let mut file = spill_file().await?;
            file.write_all(&buf[..]).await?;
            tracing::debug!(threshold, buffered = buf.len(), "spilling request body to disk");
            *self = Spool::File(file);
        }

        if let Spool::File(file) = self {
            file.write_all(data).await?;
        }
        Ok(())
    }

    async fn finish(self, len: u64) -> io::Result<Body> {
        let storage = match self {
            Spool::Memory(buf) => Storage::Memory(Cursor::new(buf.freeze())),
            Spool::File(mut file) => {
                file.flush().await?;
                file.seek(SeekFrom::Start(0)).await?;
                Storage::Spilled(file)
            }
        };
        Ok(Body { storage, len })
    }
}

/// Anonymous temp file; the OS reclaims it once the handle is dropped.
async fn spill_file() -> io::Result<File> {
    let file = tokio::task::spawn_blocking(tempfile::tempfile)
        .await
        .map_err(io::Error::other)??;
    Ok(File::from_std(file))
}

/// Drains a Content-Length body off a connection.
pub struct BodyReader<'a> {
    limits: &'a Limits,
    timeout: Option<Duration>,
}

impl<'a> BodyReader<'a> {
    /// Uses `limits.max_body` as the spill threshold and `limits.chunk_size`
    /// as the read size. `timeout` bounds each individual read.
    pub fn new(limits: &'a Limits, timeout: Option<Duration>) -> Self {
        Self { limits, timeout }
    }

    /// Reads a body of `content_length` bytes.
    ///
    /// `prefix` holds body bytes that already arrived together with the
    /// head; bytes past `content_length` are ignored. `scratch` is the read
    /// buffer, grown to `chunk_size` if it is smaller.
    ///
    /// Memory use is capped by `max_body`, disk use is not: a body past the
    /// threshold is written out in full. Set `Limits::max_content_length`
    /// to refuse oversized declarations before any body byte is read.
    pub async fn read<S>(
        &self,
        stream: &mut S,
        prefix: &[u8],
        content_length: u64,
        scratch: &mut Vec<u8>,
    ) -> Result<Body, ConnectionError>
    where
        S: AsyncRead + Unpin + ?Sized,
    {
        if content_length == 0 {
            return Ok(Body::empty());
        }

        let threshold = self.limits.max_body;
        let prefix_len = prefix.len().min(usize::try_from(content_length).unwrap_or(usize::MAX));
        let initial = usize::try_from(content_length).map_or(threshold, |len| len.min(threshold));

        let mut spool = Spool::Memory(BytesMut::with_capacity(initial));
        spool.write(&prefix[..prefix_len], threshold).await?;
        let mut received = prefix_len as u64;

        let chunk = self.limits.chunk_size.max(1);
        if scratch.len() < chunk {
            scratch.resize(chunk, 0);
        }
        while received < content_length {
            let want = (content_length - received).min(chunk as u64) as usize;
            let n = read_some(stream, &mut scratch[..want], self.timeout).await?;
            if n == 0 {
                tracing::debug!(received, content_length, "client closed during body");
                return Err(ConnectionError::ClientDisconnected);
            }
            spool.write(&scratch[..n], threshold).await?;
            received += n as u64;
        }

        Ok(spool.finish(content_length).await?)
    }
}
