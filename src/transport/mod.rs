// MIT License - Copyright (c) 2026 Peter Wright
// Duplex site transport: frame reassembly and message framing

pub mod reader;

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::error::Result;
use crate::message::SiteMessage;
use crate::protocol::Frame;

pub use reader::FrameReader;

/// Yields site messages one at a time from a byte stream.
///
/// A single reassembled batch can hold several frames; the extras are
/// queued and handed out, in order, by later calls.
pub struct MessageReader<R> {
    frames: FrameReader<R>,
    pending: VecDeque<Frame>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            frames: FrameReader::new(reader),
            pending: VecDeque::new(),
        }
    }

    pub async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }
            self.pending.extend(self.frames.read_frames().await?);
        }
    }

    pub async fn next_message(&mut self) -> Result<SiteMessage> {
        let frame = self.next_frame().await?;
        SiteMessage::from_frame(&frame)
    }
}

/// Writes site messages to a byte stream. Clones share the stream; each
/// frame is written whole under the lock.
pub struct MessageWriter<W> {
    writer: Arc<Mutex<W>>,
}

impl<W> Clone for MessageWriter<W> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
        }
    }
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub async fn send(&self, msg: &SiteMessage) -> Result<()> {
        let frame = msg.to_frame()?;
        debug!("Sending {} ({} bytes)", msg.kind(), frame.data.len());
        self.send_frame(&frame).await
    }

    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        frame.write_to(&mut *writer).await.map_err(|e| {
            error!("Failed to write frame {:03}: {}", frame.code, e);
            e
        })
    }

    /// Flush and close the write side. Errors are ignored since the peer
    /// may already be gone.
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
