//! Chunked writer
//!
//! Splits a payload into bounded frames and pushes them through a [`Link`].
//! How completion is reported depends on the link's [`WriteMode`]:
//!
//! - `Confirmed`: one chunk in flight at a time, the next chunk is issued
//!   only after the previous one was acknowledged. Success means every
//!   chunk was acknowledged.
//! - `FireAndForget`: chunks are issued back-to-back with a fixed pause in
//!   between. Success means every chunk was handed to the stream; delivery
//!   is not confirmed.
//!
//! The mode is returned in the [`WriteReport`] so callers know which of the
//! two guarantees they got.

use crate::error::{BridgeError, BridgeResult};
use crate::infrastructure::bluetooth::protocol::DEFAULT_CHUNK_SIZE;
use crate::infrastructure::bluetooth::transport::{Link, WriteMode};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Cursor over one outbound payload.
#[derive(Debug)]
pub struct WriteJob<'a> {
    payload: &'a [u8],
    offset: usize,
    chunk_size: usize,
}

impl<'a> WriteJob<'a> {
    pub fn new(payload: &'a [u8], chunk_size: usize) -> Self {
        Self {
            payload,
            offset: 0,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_complete(&self) -> bool {
        self.offset == self.payload.len()
    }

    /// Number of chunks the whole payload splits into.
    pub fn chunk_count(&self) -> usize {
        self.payload.len().div_ceil(self.chunk_size)
    }

    /// Slice at the cursor, without advancing.
    pub fn peek(&self) -> Option<&'a [u8]> {
        if self.is_complete() {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(self.payload.len());
        Some(&self.payload[self.offset..end])
    }

    /// Move the cursor past the chunk returned by [`WriteJob::peek`].
    pub fn advance(&mut self) {
        self.offset = (self.offset + self.chunk_size).min(self.payload.len());
    }
}

impl<'a> Iterator for WriteJob<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.peek()?;
        self.advance();
        Some(chunk)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub bytes: usize,
    pub chunks: usize,
    pub delivery: WriteMode,
}

#[derive(Debug, Clone)]
pub struct ChunkedWriter {
    chunk_size: usize,
    inter_chunk_delay: Duration,
}

impl Default for ChunkedWriter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, Duration::from_millis(10))
    }
}

impl ChunkedWriter {
    pub fn new(chunk_size: usize, inter_chunk_delay: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            inter_chunk_delay,
        }
    }

    /// Push `payload` through `link`.
    ///
    /// The first failing chunk ends the job; nothing is retried. The caller
    /// owns teardown of the link on error.
    #[instrument(skip(self, link, payload), fields(len = payload.len()))]
    pub async fn write(&self, link: &mut dyn Link, payload: &[u8]) -> BridgeResult<WriteReport> {
        if !link.is_connected() || !link.has_sink() {
            return Err(BridgeError::NotConnected);
        }

        let delivery = link.write_mode();
        let mut job = WriteJob::new(payload, self.chunk_size);
        let total = job.chunk_count();
        let mut sent = 0usize;

        while let Some(chunk) = job.peek() {
            if sent > 0 && delivery == WriteMode::FireAndForget && !self.inter_chunk_delay.is_zero() {
                tokio::time::sleep(self.inter_chunk_delay).await;
            }

            debug!("Writing chunk {}/{} ({} bytes)", sent + 1, total, chunk.len());
            if let Err(e) = link.write_chunk(chunk).await {
                warn!(
                    "Chunk {}/{} failed at offset {}: {}",
                    sent + 1,
                    total,
                    job.offset(),
                    e
                );
                return Err(BridgeError::write(e));
            }

            job.advance();
            sent += 1;
        }

        match delivery {
            WriteMode::Confirmed => info!("{} bytes acknowledged in {} chunks", payload.len(), sent),
            WriteMode::FireAndForget => info!("{} bytes issued in {} chunks", payload.len(), sent),
        }

        Ok(WriteReport {
            bytes: payload.len(),
            chunks: sent,
            delivery,
        })
    }
}

/// Convert caller-supplied integers to bytes. Values outside `0..=255` are
/// rejected, never truncated.
pub fn bytes_from_values(values: &[i64]) -> BridgeResult<Vec<u8>> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            u8::try_from(*value).map_err(|_| {
                BridgeError::InvalidArgument(format!(
                    "Byte value {} at index {} is outside 0..=255",
                    value, index
                ))
            })
        })
        .collect()
}
