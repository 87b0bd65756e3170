//! Pooled scratch buffers for photo decodes
//!
//! Each decode checks out its own buffer, so concurrent decodes never
//! share one. The guard hands the buffer back when it goes out of scope,
//! which covers success, failure and cancellation alike.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

/// Initial capacity of a freshly allocated buffer
pub const SCRATCH_CAPACITY: usize = 32 * 1024;

/// Buffers that grew past this are dropped instead of pooled
pub const MAX_RETAINED_CAPACITY: usize = 32 * 1024 * 1024;

/// A small pool of reusable byte buffers with exclusive checkout
#[derive(Debug)]
pub struct ScratchPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
}

impl ScratchPool {
    /// Create a pool that keeps at most `max_pooled` idle buffers
    pub fn new(max_pooled: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
        }
    }

    /// Take a buffer out of the pool, allocating if none is idle.
    /// The buffer is always empty on checkout.
    pub fn checkout(&self) -> ScratchBuffer<'_> {
        let buf = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(SCRATCH_CAPACITY));
        ScratchBuffer { pool: self, buf }
    }

    /// Number of idle buffers waiting in the pool
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn give_back(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new(4)
    }
}

/// A checked-out buffer; returns itself to the pool on drop
#[derive(Debug)]
pub struct ScratchBuffer<'a> {
    pool: &'a ScratchPool,
    buf: Vec<u8>,
}

impl Deref for ScratchBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for ScratchBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for ScratchBuffer<'_> {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buf));
    }
}
