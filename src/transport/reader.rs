// MIT License - Copyright (c) 2026 Peter Wright
// Reassembles a chunked byte stream into complete frames

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::constants::CRLF;
use crate::error::{Result, SecCtlError};
use crate::protocol::{decode_frame, Frame};

const READ_CHUNK: usize = 4096;

/// Reads frames off a byte stream.
///
/// Reads are accumulated until the bytes received so far end in CR LF,
/// which is the only point at which the buffer can be split without
/// cutting a frame in half. The buffer is then split on every CR LF and
/// each non-empty segment decoded, in order.
///
/// Any error poisons the reader: the stream position is unknown after a
/// failure, so every later call fails too.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
    chunk: Vec<u8>,
    poisoned: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            chunk: vec![0u8; READ_CHUNK],
            poisoned: false,
        }
    }

    /// Block until at least one delimiter-terminated batch has arrived and
    /// return its frames. The batch may hold no frames if it was only
    /// delimiters.
    pub async fn read_frames(&mut self) -> Result<Vec<Frame>> {
        if self.poisoned {
            return Err(SecCtlError::Io(io::Error::other(
                "frame reader failed earlier",
            )));
        }
        let result = self.read_batch().await;
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    async fn read_batch(&mut self) -> Result<Vec<Frame>> {
        loop {
            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                return Err(SecCtlError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )));
            }
            self.buf.extend_from_slice(&self.chunk[..n]);
            if self.buf.ends_with(CRLF) {
                break;
            }
        }

        let batch = std::mem::take(&mut self.buf);
        trace!("Reassembled {} bytes", batch.len());
        split_delimited(&batch)
            .into_iter()
            .filter(|segment| !segment.is_empty())
            .map(decode_frame)
            .collect()
    }
}

/// Split on every CR LF. The trailing delimiter yields an empty last
/// segment.
fn split_delimited(bytes: &[u8]) -> Vec<&[u8]> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + CRLF.len() <= bytes.len() {
        if &bytes[i..i + CRLF.len()] == CRLF {
            segments.push(&bytes[start..i]);
            i += CRLF.len();
            start = i;
        } else {
            i += 1;
        }
    }
    segments.push(&bytes[start..]);
    segments
}
