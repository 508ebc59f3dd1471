//! Recycled read buffers.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;

/// A bounded free-list of read buffers shared by all connections.
///
/// Connections take a buffer when accepted and give it back when dropped,
/// so a busy server stops allocating once the pool has warmed up.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
    max_pooled: usize,
    drained: AtomicBool,
}

impl BufferPool {
    /// Creates an empty pool that hands out `buffer_size`-byte buffers and
    /// keeps at most `max_pooled` of them around.
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_pooled)),
            buffer_size,
            max_pooled,
            drained: AtomicBool::new(false),
        }
    }

    /// Takes a buffer from the pool, allocating if it is empty.
    pub fn take(&self) -> BytesMut {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size))
    }

    /// Returns a buffer. Dropped instead if the pool is full or drained.
    pub fn put(&self, mut buf: BytesMut) {
        if self.drained.load(Ordering::Acquire) {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            buf.clear();
            free.push(buf);
        }
    }

    /// Frees every pooled buffer and stops accepting returns.
    pub fn drain(&self) {
        self.drained.store(true, Ordering::Release);
        let released = {
            let mut free = self.free.lock();
            std::mem::take(&mut *free).len()
        };
        tracing::debug!(released, "buffer pool drained");
    }

    /// Number of idle buffers currently pooled.
    pub fn pooled(&self) -> usize {
        self.free.lock().len()
    }

    /// Size of freshly allocated buffers.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
