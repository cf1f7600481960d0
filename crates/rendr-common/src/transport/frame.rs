use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{RendrError, Result};

/// Default maximum frame size (100 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Reads newline-terminated frames from a buffered stream.
///
/// Blank lines are skipped. A line longer than `max_frame_size` is an error,
/// and so is data left unterminated when the peer closes the stream.
pub struct FrameReader<R> {
    inner: R,
    max_frame_size: usize,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_frame_size(inner, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size,
        }
    }

    /// Reads the next frame without its terminator.
    ///
    /// Returns `Ok(None)` on a clean end of stream.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        // One extra byte leaves room for the terminator of a maximum-size frame
        let limit = self.max_frame_size as u64 + 1;

        loop {
            let mut buf = Vec::new();
            let read = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut buf)
                .await?;

            if read == 0 {
                return Ok(None);
            }

            if buf.last() != Some(&b'\n') {
                if buf.len() as u64 >= limit {
                    return Err(RendrError::FrameTooLarge {
                        len: buf.len(),
                        max: self.max_frame_size,
                    });
                }
                return Err(RendrError::Protocol(format!(
                    "stream closed inside a frame ({} bytes unterminated)",
                    buf.len()
                )));
            }

            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }

            if !buf.is_empty() {
                return Ok(Some(buf));
            }
        }
    }
}

/// Writes pre-encoded frames, flushing after each one.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes one frame. `line` must already end with `\n`.
    pub async fn write_frame(&mut self, line: &[u8]) -> Result<()> {
        self.inner.write_all(line).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shuts down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
