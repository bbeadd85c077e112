//! Length-prefixed JSON framing
//!
//! Wire format: [4-byte big-endian length][JSON payload], payloads capped at
//! 1MB. [`FrameReader`] keeps partial frames in its own buffer, so a pending
//! read can lose a `select!` race without dropping bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};

const MAX_FRAME_SIZE: u32 = 1024 * 1024;
const HEADER_LEN: usize = 4;
const READ_CHUNK: usize = 4096;

/// Buffered frame reader over one half of a connection
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Next decoded frame.
    ///
    /// Cancel safe: bytes already read stay buffered for the next call.
    /// A `Protocol` error consumed the bad frame and the stream is still
    /// usable; `FrameTooLarge` is not recoverable.
    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<T> {
        loop {
            if let Some(payload) = self.take_frame()? {
                return serde_json::from_slice(&payload)
                    .map_err(|e| Error::Protocol(format!("Invalid JSON: {e}")));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                if !self.buf.is_empty() {
                    debug!(buffered = self.buf.len(), "Stream ended mid-frame");
                }
                return Err(Error::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Split one complete payload off the front of the buffer
    fn take_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(header) = self.buf.first_chunk::<HEADER_LEN>() else {
            return Ok(None);
        };
        let len = u32::from_be_bytes(*header);

        if len == 0 {
            self.buf.drain(..HEADER_LEN);
            return Err(Error::Protocol("Empty frame".into()));
        }
        if len > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge {
                len: len as usize,
                max: MAX_FRAME_SIZE,
            });
        }

        let end = HEADER_LEN + len as usize;
        if self.buf.len() < end {
            return Ok(None);
        }
        let payload = self.buf[HEADER_LEN..end].to_vec();
        self.buf.drain(..end);
        Ok(Some(payload))
    }
}

/// Write one frame and flush
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(msg)
        .map_err(|e| Error::Protocol(format!("Serialization failed: {e}")))?;
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(Error::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
