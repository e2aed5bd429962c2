//! # Sequential Log
//!
//! Public face of the engine. Any number of tasks may call [`SequentialLog::write`]
//! and [`SequentialLog::get`] at once.
//!
//! ```text
//!  write() ──┐
//!  write() ──┼──> bounded queue ──> writer task ──> active segment (fsync)
//!  write() ──┘         │                 │
//!                      │                 └──> block index (tail entry)
//!            oneshot reply <─────────────┘
//!
//!  get() ───────────────────────────────────> block index ──> segment file
//! ```
//!
//! Writes are acknowledged only after the segment file is synced. The first
//! I/O failure on the write or read path shuts the engine down: the caller
//! that hit it gets the `Io` error and every later call gets `Closed`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use seqlog_core::config::LogConfig;
use seqlog_core::error::{Error, Result};
use seqlog_core::metrics::{Metrics, MetricsSnapshot};

use crate::block::BlockIndex;
use crate::codec::SegmentLayout;
use crate::file::check_dir;
use crate::recovery::recover;
use crate::writer::SegmentWriter;

struct WriteRequest {
    payload: Bytes,
    response: oneshot::Sender<Result<u64>>,
}

/// Segmented append-only log over a directory of fixed-size files.
pub struct SequentialLog {
    dir: PathBuf,
    layout: SegmentLayout,
    blocks: Arc<BlockIndex>,
    last_offset: Arc<AtomicU64>,
    metrics: Metrics,
    write_tx: mpsc::Sender<WriteRequest>,
    shutdown: Arc<watch::Sender<bool>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl SequentialLog {
    /// Recover every segment in `config.data_dir` and start the writer.
    pub async fn open(config: LogConfig) -> Result<Self> {
        config.validate()?;
        check_dir(&config.data_dir)?;

        let dir = config.data_dir.clone();
        let layout = SegmentLayout::from_config(&config);
        let blocks = Arc::new(BlockIndex::new(layout));
        let last_offset = Arc::new(AtomicU64::new(0));
        let metrics = Metrics::new();

        let writer = {
            let dir = dir.clone();
            let blocks = Arc::clone(&blocks);
            let published = Arc::clone(&last_offset);
            let metrics = metrics.clone();
            let skip_corrupt = config.skip_corrupt_segments;
            let poll_interval = config.rotation_poll_interval();
            tokio::task::spawn_blocking(move || {
                let recovered = recover(&dir, &layout, skip_corrupt, &blocks, &metrics)?;
                SegmentWriter::resume(
                    &dir,
                    layout,
                    recovered,
                    blocks,
                    published,
                    poll_interval,
                    metrics,
                )
            })
            .await
            .map_err(|e| Error::Internal {
                message: format!("recovery task failed: {}", e),
            })??
        };

        let (write_tx, write_rx) = mpsc::channel::<WriteRequest>(config.queue_capacity);
        let (shutdown, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown);

        let handle = tokio::spawn(Self::writer_loop(
            writer,
            write_rx,
            Arc::clone(&shutdown),
            Arc::clone(&blocks),
        ));

        info!(
            "Opened log at {:?}: {} segment(s), last_offset={}",
            dir,
            blocks.len(),
            last_offset.load(Ordering::Acquire)
        );

        Ok(Self {
            dir,
            layout,
            blocks,
            last_offset,
            metrics,
            write_tx,
            shutdown,
            writer: Mutex::new(Some(handle)),
        })
    }

    /// Append `payload` and return its offset once it is durable.
    pub async fn write(&self, payload: impl Into<Bytes>) -> Result<u64> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let payload = payload.into();
        let limit = self.layout.data_size();
        if payload.len() as u64 > limit {
            self.metrics.record_rejected_write();
            return Err(Error::SizeLimitExceeded {
                size: payload.len(),
                limit,
            });
        }

        let (tx, rx) = oneshot::channel();
        let request = WriteRequest {
            payload,
            response: tx,
        };

        let mut closed = self.shutdown.subscribe();
        tokio::select! {
            sent = self.write_tx.send(request) => sent.map_err(|_| Error::Closed)?,
            _ = wait_closed(&mut closed) => return Err(Error::Closed),
        }

        // the writer drops queued requests when it stops
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Read the payload stored at `offset`.
    pub fn get(&self, offset: u64) -> Result<Bytes> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        match self.blocks.get(offset) {
            Ok(payload) => {
                self.metrics.record_read(true);
                Ok(payload)
            }
            Err(e @ Error::NotFound { .. }) => {
                self.metrics.record_read(false);
                Err(e)
            }
            Err(e @ Error::Io { .. }) => {
                error!("Read path failed, shutting down log at {:?}: {}", self.dir, e);
                self.shutdown.send_replace(true);
                self.blocks.close();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Every stored payload in ascending offset order.
    pub fn dump(&self) -> Result<Vec<Bytes>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.blocks.dump()
    }

    /// Append each payload in order, returning the assigned offsets.
    pub async fn load<I, P>(&self, payloads: I) -> Result<Vec<u64>>
    where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        let mut offsets = Vec::new();
        for payload in payloads {
            offsets.push(self.write(payload).await?);
        }
        Ok(offsets)
    }

    /// Stop the writer, flush the active segment and release every handle.
    /// Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.send_replace(true);

        let handle = self.writer.lock().take();
        if let Some(handle) = handle {
            handle.await.map_err(|e| Error::Internal {
                message: format!("writer task failed: {}", e),
            })?;
            info!("Closed log at {:?}", self.dir);
        }

        self.blocks.close();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Highest durable offset, 0 when nothing has been written.
    pub fn last_offset(&self) -> u64 {
        self.last_offset.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn writer_loop(
        mut writer: SegmentWriter,
        mut rx: mpsc::Receiver<WriteRequest>,
        shutdown: Arc<watch::Sender<bool>>,
        blocks: Arc<BlockIndex>,
    ) {
        let mut closed = shutdown.subscribe();

        loop {
            let request = tokio::select! {
                biased;
                _ = wait_closed(&mut closed) => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            match writer.append(&request.payload).await {
                Ok(offset) => {
                    let _ = request.response.send(Ok(offset));
                }
                Err(e) => {
                    error!("Write path failed, shutting down: {}", e);
                    let _ = request.response.send(Err(e));
                    shutdown.send_replace(true);
                    blocks.close();
                    break;
                }
            }
        }

        rx.close();
        if let Err(e) = writer.finish().await {
            error!("Final sync failed: {}", e);
        }
    }
}

impl Drop for SequentialLog {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// Resolves once the shutdown flag is set or its sender is gone.
async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    loop {
        let closed = *rx.borrow_and_update();
        if closed || rx.changed().await.is_err() {
            return;
        }
    }
}
