//! Media buffers
//!
//! A [`MediaBuffer`] is one unit of audio or video payload travelling between
//! pipeline stages. The payload is a `bytes::Bytes`, so cloning a buffer
//! (sharing it with another stage) only bumps a reference count.
//!
//! Buffers leased from a [`BufferPool`] count against the pool until the last
//! clone is recycled or dropped:
//!
//! ```text
//!   pool.lease(buf) ──► stage A ──clone──► stage B
//!        in_flight+1       │                  │
//!                          ▼                  ▼
//!                      recycle()          recycle()  ──► in_flight-1
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::mixer::SourceId;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a buffer (shared by all of its clones)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buf-{}", self.0)
    }
}

/// Kind of media carried by a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Audio samples
    Audio,
    /// Video frame
    Video,
}

/// Format metadata attached to a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferInfo {
    /// Video frame dimensions
    Video {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
    /// Audio sample format
    Audio {
        /// Sample rate in Hz
        sample_rate: u32,
        /// Channel count
        channels: u16,
    },
}

/// A unit of audio or video payload
///
/// Cheap to clone: clones share the payload and the pool lease.
#[derive(Debug, Clone)]
pub struct MediaBuffer {
    id: BufferId,
    kind: MediaKind,
    payload: Bytes,
    timestamp: u32,
    key_frame: bool,
    source: Option<SourceId>,
    info: BufferInfo,
    lease: Option<Arc<Lease>>,
}

impl MediaBuffer {
    /// Create a video buffer
    pub fn video(payload: Bytes, width: u32, height: u32, timestamp: u32) -> Self {
        Self {
            id: BufferId::next(),
            kind: MediaKind::Video,
            payload,
            timestamp,
            key_frame: false,
            source: None,
            info: BufferInfo::Video { width, height },
            lease: None,
        }
    }

    /// Create an audio buffer
    pub fn audio(payload: Bytes, sample_rate: u32, channels: u16, timestamp: u32) -> Self {
        Self {
            id: BufferId::next(),
            kind: MediaKind::Audio,
            payload,
            timestamp,
            key_frame: false,
            source: None,
            info: BufferInfo::Audio {
                sample_rate,
                channels,
            },
            lease: None,
        }
    }

    /// Tag the buffer with the source it came from
    pub fn with_source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    /// Mark the buffer as a key frame (or as a key-frame request, for raw input)
    pub fn with_key_frame(mut self, key_frame: bool) -> Self {
        self.key_frame = key_frame;
        self
    }

    /// Buffer id
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Media kind
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Payload bytes
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Timestamp (RTP clock units)
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Whether this buffer is a key frame
    pub fn is_key_frame(&self) -> bool {
        self.key_frame
    }

    /// Source the buffer came from, if known
    pub fn source(&self) -> Option<SourceId> {
        self.source
    }

    /// Format metadata
    pub fn info(&self) -> BufferInfo {
        self.info
    }

    /// Whether this buffer counts against a pool
    pub fn is_pooled(&self) -> bool {
        self.lease.is_some()
    }

    /// Return this handle's share of the buffer.
    ///
    /// The pool slot is released once every clone has been recycled.
    pub fn recycle(self) {
        drop(self);
    }
}

#[derive(Debug)]
struct PoolShared {
    name: String,
    capacity: usize,
    in_flight: AtomicUsize,
}

#[derive(Debug)]
struct Lease {
    pool: Arc<PoolShared>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.pool.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded pool of in-flight buffers
///
/// The pool does not own memory; it bounds how many leased buffers may be
/// alive at once so a stalled stage surfaces as an allocation error instead
/// of unbounded growth.
#[derive(Debug, Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool allowing `capacity` buffers in flight
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                name: name.into(),
                capacity,
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Attach a pool lease to a buffer.
    ///
    /// Fails with [`Error::Allocation`] when the pool is exhausted.
    pub fn lease(&self, mut buffer: MediaBuffer) -> Result<MediaBuffer> {
        let shared = &self.shared;
        shared
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < shared.capacity).then_some(n + 1)
            })
            .map_err(|_| {
                Error::Allocation(format!(
                    "buffer pool '{}' exhausted (capacity {})",
                    shared.name, shared.capacity
                ))
            })?;

        buffer.lease = Some(Arc::new(Lease {
            pool: Arc::clone(shared),
        }));
        Ok(buffer)
    }

    /// Number of leased buffers still alive
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Maximum number of buffers in flight
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_buffer() {
        let buf = MediaBuffer::video(Bytes::from_static(&[1, 2, 3]), 2, 1, 90);
        assert_eq!(buf.kind(), MediaKind::Video);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.timestamp(), 90);
        assert_eq!(buf.info(), BufferInfo::Video { width: 2, height: 1 });
        assert!(!buf.is_pooled());
        assert!(buf.source().is_none());
    }

    #[test]
    fn test_clone_shares_id() {
        let buf = MediaBuffer::audio(Bytes::from_static(&[0, 0]), 8000, 1, 0)
            .with_source(SourceId::new(3));
        let shared = buf.clone();
        assert_eq!(buf.id(), shared.id());
        assert_eq!(shared.source(), Some(SourceId::new(3)));

        let other = MediaBuffer::audio(Bytes::new(), 8000, 1, 0);
        assert_ne!(buf.id(), other.id());
        assert!(other.is_empty());
    }

    #[test]
    fn test_pool_lease_and_recycle() {
        let pool = BufferPool::new("test", 2);

        let a = pool
            .lease(MediaBuffer::video(Bytes::new(), 0, 0, 0))
            .unwrap();
        let b = pool
            .lease(MediaBuffer::video(Bytes::new(), 0, 0, 0))
            .unwrap();
        assert_eq!(pool.in_flight(), 2);
        assert!(a.is_pooled());

        let err = pool
            .lease(MediaBuffer::video(Bytes::new(), 0, 0, 0))
            .unwrap_err();
        assert!(matches!(err, Error::Allocation(_)));

        a.recycle();
        assert_eq!(pool.in_flight(), 1);

        // The lease is held until every clone is gone
        let b2 = b.clone();
        b.recycle();
        assert_eq!(pool.in_flight(), 1);
        b2.recycle();
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_pool_capacity() {
        let pool = BufferPool::new("cap", 8);
        assert_eq!(pool.capacity(), 8);
        assert_eq!(pool.in_flight(), 0);
    }
}
