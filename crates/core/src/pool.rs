//! Bounded pool of reusable frame buffers.
//!
//! Capture and encode threads allocate one buffer per frame; at 30 fps and
//! several megabytes per frame that churn is what exhausts memory. The pool
//! keeps released buffers in buckets keyed by `(width, height, format)` and
//! hands them back out on the next matching [`FrameBufferPool::get`].
//!
//! Two limits bound what the pool holds while idle:
//!
//! - at most `max_buffers_per_bucket` queued buffers per bucket;
//! - at most `max_bytes` queued bytes overall. Making room evicts the
//!   oldest queued buffers first, across all buckets.
//!
//! The resident byte counter always equals the sum of queued buffer sizes.
//! Buffers that are handed out are owned by the caller and not counted.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::error::PoolError;

/// Pixel layouts produced by the capture path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit RGBA, 4 bytes per pixel.
    Rgba8888,
    /// 16-bit RGB, 2 bytes per pixel.
    Rgb565,
    /// YUV 4:2:0 semi-planar (Y plane + interleaved VU), 12 bits per pixel.
    Nv21,
    /// YUV 4:2:0 planar, 12 bits per pixel.
    I420,
}

impl PixelFormat {
    /// Bytes needed for a `width` x `height` frame, `None` on overflow.
    pub fn frame_size(self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            Self::Rgba8888 => pixels.checked_mul(4),
            Self::Rgb565 => pixels.checked_mul(2),
            Self::Nv21 | Self::I420 => pixels.checked_mul(3).map(|n| n.div_ceil(2)),
        }
    }
}

/// Bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferShape {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// A frame-sized byte buffer, owned by whoever holds it.
#[derive(Debug)]
pub struct FrameBuffer {
    shape: BufferShape,
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn shape(&self) -> BufferShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// Source of fresh buffer memory.
///
/// Allocation failure is reported as `None`, never as a panic or abort.
pub trait BufferAllocator: Send + Sync {
    fn allocate(&self, bytes: usize) -> Option<Vec<u8>>;
}

/// Global-heap allocator using fallible reservation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, bytes: usize) -> Option<Vec<u8>> {
        let mut data = Vec::new();
        data.try_reserve_exact(bytes).ok()?;
        data.resize(bytes, 0);
        Some(data)
    }
}

/// What [`FrameBufferPool::release`] did with a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Queued for reuse.
    Pooled,
    /// Freed: bucket full or no room under the byte cap.
    Discarded,
}

/// Counters read by diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub discards: u64,
    pub fallback_copies: u64,
    pub allocation_failures: u64,
    pub resident_bytes: usize,
    pub max_bytes: usize,
    pub queued_buffers: usize,
}

impl PoolStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Queued {
    data: Vec<u8>,
    /// Release order across all buckets, for oldest-first eviction.
    seq: u64,
}

#[derive(Default)]
struct PoolState {
    buckets: HashMap<BufferShape, VecDeque<Queued>>,
    resident_bytes: usize,
    next_seq: u64,
    stats: PoolStats,
}

impl PoolState {
    fn take(&mut self, shape: &BufferShape) -> Option<Vec<u8>> {
        let bucket = self.buckets.get_mut(shape)?;
        let queued = bucket.pop_front()?;
        if bucket.is_empty() {
            self.buckets.remove(shape);
        }
        self.resident_bytes -= queued.data.len();
        Some(queued.data)
    }

    /// Free the oldest queued buffer in any bucket. Returns false when nothing is queued.
    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .buckets
            .iter()
            .filter_map(|(shape, bucket)| bucket.front().map(|q| (q.seq, *shape)))
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, shape)| shape);

        match oldest.and_then(|shape| self.take(&shape)) {
            Some(data) => {
                self.stats.evictions += 1;
                tracing::trace!(bytes = data.len(), "evicted pooled buffer");
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) -> usize {
        let freed = self.buckets.values().map(VecDeque::len).sum();
        self.buckets.clear();
        self.resident_bytes = 0;
        freed
    }

    fn queued_buffers(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }
}

/// Thread-safe bounded frame buffer pool.
///
/// Bucket and byte accounting sit behind one mutex; allocation and buffer
/// zeroing happen outside it.
pub struct FrameBufferPool<A: BufferAllocator = HeapAllocator> {
    config: PoolConfig,
    allocator: A,
    state: Mutex<PoolState>,
}

impl FrameBufferPool<HeapAllocator> {
    pub fn new(config: PoolConfig) -> Self {
        Self::with_allocator(config, HeapAllocator)
    }
}

impl Default for FrameBufferPool<HeapAllocator> {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl<A: BufferAllocator> FrameBufferPool<A> {
    pub fn with_allocator(config: PoolConfig, allocator: A) -> Self {
        Self {
            config,
            allocator,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Get a zeroed buffer for a `width` x `height` frame in `format`.
    ///
    /// Reuses a queued buffer when one matches. Otherwise allocates; if that
    /// fails the whole pool is cleared once and the allocation retried.
    pub fn get(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<FrameBuffer, PoolError> {
        let shape = BufferShape {
            width,
            height,
            format,
        };
        let bytes = format
            .frame_size(width, height)
            .ok_or(PoolError::AllocationFailed { bytes: usize::MAX })?;

        let reused = {
            let mut state = self.state.lock();
            let reused = state.take(&shape);
            if reused.is_some() {
                state.stats.hits += 1;
            } else {
                state.stats.misses += 1;
            }
            reused
        };

        if let Some(mut data) = reused {
            data.fill(0);
            return Ok(FrameBuffer { shape, data });
        }

        if let Some(data) = self.allocator.allocate(bytes) {
            return Ok(FrameBuffer { shape, data });
        }

        tracing::warn!(bytes, width, height, ?format, "frame buffer allocation failed, clearing pool");
        self.clear();

        match self.allocator.allocate(bytes) {
            Some(data) => Ok(FrameBuffer { shape, data }),
            None => {
                self.state.lock().stats.allocation_failures += 1;
                tracing::error!(bytes, "frame buffer allocation failed after clearing pool");
                Err(PoolError::AllocationFailed { bytes })
            }
        }
    }

    /// Return a buffer to the pool.
    ///
    /// Buffers whose length does not match their shape (direct copies of
    /// odd-sized sources) are never queued.
    pub fn release(&self, buffer: FrameBuffer) -> ReleaseOutcome {
        let FrameBuffer { shape, data } = buffer;
        let size = data.len();
        let max_bytes = self.config.max_bytes;

        let mut state = self.state.lock();

        if shape.format.frame_size(shape.width, shape.height) != Some(size) {
            state.stats.discards += 1;
            tracing::trace!(size, ?shape, "released buffer does not fit its shape, discarded");
            return ReleaseOutcome::Discarded;
        }

        let bucket_len = state.buckets.get(&shape).map_or(0, VecDeque::len);
        if bucket_len >= self.config.max_buffers_per_bucket || size > max_bytes {
            state.stats.discards += 1;
            tracing::trace!(size, bucket_len, "released buffer discarded");
            return ReleaseOutcome::Discarded;
        }

        while state.resident_bytes + size > max_bytes {
            if !state.evict_oldest() {
                break;
            }
        }

        if state.resident_bytes + size > max_bytes {
            state.stats.discards += 1;
            return ReleaseOutcome::Discarded;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.resident_bytes += size;
        state
            .buckets
            .entry(shape)
            .or_default()
            .push_back(Queued { data, seq });
        ReleaseOutcome::Pooled
    }

    /// Copy `source` pixels into a pooled buffer.
    ///
    /// Never fails: when no pooled buffer can be obtained, or its size does
    /// not match `source`, the pixels are copied into a plain allocation.
    pub fn copy(&self, source: &[u8], width: u32, height: u32, format: PixelFormat) -> FrameBuffer {
        let shape = BufferShape {
            width,
            height,
            format,
        };
        match self.get(width, height, format) {
            Ok(mut dst) if dst.len() == source.len() => {
                dst.as_mut_slice().copy_from_slice(source);
                dst
            }
            result => {
                if let Ok(dst) = result {
                    self.release(dst);
                }
                self.state.lock().stats.fallback_copies += 1;
                tracing::debug!(len = source.len(), ?format, "pooled copy unavailable, copying directly");
                FrameBuffer {
                    shape,
                    data: source.to_vec(),
                }
            }
        }
    }

    /// Free every queued buffer. Returns how many were freed.
    pub fn clear(&self) -> usize {
        let freed = self.state.lock().clear();
        tracing::debug!(freed, "frame buffer pool cleared");
        freed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            resident_bytes: state.resident_bytes,
            max_bytes: self.config.max_bytes,
            queued_buffers: state.queued_buffers(),
            ..state.stats
        }
    }

    #[cfg(test)]
    fn queued_bytes(&self) -> usize {
        self.state
            .lock()
            .buckets
            .values()
            .flat_map(|b| b.iter().map(|q| q.data.len()))
            .sum()
    }
}
