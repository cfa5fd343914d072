//! Per-source sink adapter
//!
//! Created by the hub when a source registers and shared with any transport
//! thread that asks for it. The adapter may outlive the source's
//! registration: once closed, or once its slot has a new occupant, every
//! delivery reports [`DeliveryStatus::Dropped`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::media::{MediaBuffer, MediaKind};

use super::buffer_manager::BufferManager;
use super::slot::SlotHandle;
use super::source::{DeliveryStatus, MediaSink, SourceId};

/// Routes one source's media into its slot's buffers
#[derive(Debug)]
pub struct SinkAdapter {
    source: SourceId,
    handle: SlotHandle,
    voice_channel: Option<i32>,
    buffers: Arc<BufferManager>,
    closed: AtomicBool,
}

impl SinkAdapter {
    pub(crate) fn new(
        source: SourceId,
        handle: SlotHandle,
        voice_channel: Option<i32>,
        buffers: Arc<BufferManager>,
    ) -> Self {
        Self {
            source,
            handle,
            voice_channel,
            buffers,
            closed: AtomicBool::new(false),
        }
    }

    /// Source this adapter serves
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Slot assigned at registration
    pub fn slot(&self) -> usize {
        self.handle.slot
    }

    /// Voice-engine channel used for lip sync, if one was given
    pub fn voice_channel(&self) -> Option<i32> {
        self.voice_channel
    }

    /// Whether the source has been removed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting media
    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(source = %self.source, slot = self.handle.slot, "Sink adapter closed");
        }
    }

    fn deliver(&self, kind: MediaKind, buffer: MediaBuffer) -> DeliveryStatus {
        if self.is_closed() {
            return DeliveryStatus::Dropped;
        }
        if buffer.kind() != kind {
            tracing::debug!(
                source = %self.source,
                expected = ?kind,
                actual = ?buffer.kind(),
                "Media kind mismatch, dropping"
            );
            return DeliveryStatus::Dropped;
        }

        let buffer = match buffer.source() {
            Some(_) => buffer,
            None => buffer.with_source(self.source),
        };
        let queued = match kind {
            MediaKind::Video => self.buffers.put_video(self.handle, buffer),
            MediaKind::Audio => self.buffers.put_audio(self.handle, buffer),
        };

        if queued {
            DeliveryStatus::Accepted
        } else {
            DeliveryStatus::Dropped
        }
    }
}

impl MediaSink for SinkAdapter {
    fn deliver_audio(&self, buffer: MediaBuffer) -> DeliveryStatus {
        self.deliver(MediaKind::Audio, buffer)
    }

    fn deliver_video(&self, buffer: MediaBuffer) -> DeliveryStatus {
        self.deliver(MediaKind::Video, buffer)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::mixer::BufferConfig;

    fn setup() -> (Arc<BufferManager>, SinkAdapter) {
        let buffers = Arc::new(BufferManager::new(BufferConfig::default()).unwrap());
        let handle = SlotHandle {
            slot: 0,
            generation: 1,
        };
        buffers.activate(handle);
        let sink = SinkAdapter::new(SourceId::new(5), handle, Some(3), buffers.clone());
        (buffers, sink)
    }

    fn frame() -> MediaBuffer {
        MediaBuffer::video(Bytes::from(vec![0u8; 6]), 2, 2, 0)
    }

    #[test]
    fn test_delivery_tags_source() {
        let (buffers, sink) = setup();

        assert_eq!(sink.deliver_video(frame()), DeliveryStatus::Accepted);
        let queued = buffers.video_for_composition(0).unwrap();
        assert_eq!(queued.source(), Some(SourceId::new(5)));
        assert_eq!(sink.voice_channel(), Some(3));
    }

    #[test]
    fn test_closed_sink_drops() {
        let (buffers, sink) = setup();
        sink.close();
        sink.close();

        assert!(sink.is_closed());
        assert_eq!(sink.deliver_video(frame()), DeliveryStatus::Dropped);
        assert!(buffers.video_for_composition(0).is_none());
    }

    #[test]
    fn test_kind_mismatch_drops() {
        let (_buffers, sink) = setup();
        assert_eq!(sink.deliver_audio(frame()), DeliveryStatus::Dropped);
    }

    #[test]
    fn test_released_slot_drops() {
        let (buffers, sink) = setup();
        buffers.deactivate(SlotHandle {
            slot: 0,
            generation: 1,
        });

        assert_eq!(sink.deliver_video(frame()), DeliveryStatus::Dropped);
    }
}
