//! Per-slot jitter buffers
//!
//! Sources deliver at their own jittery rates while the compositor reads at
//! a fixed cadence. Each active slot keeps a short queue per media kind:
//!
//! 1. `put_*` never blocks: a full queue drops its oldest frame
//! 2. At composition time frames older than the target latency are skipped
//! 3. An empty video queue repeats the last composed frame; an empty audio
//!    queue reports no data so the mixer substitutes silence
//! 4. Audio is handed out in fixed-size sample blocks: the tail of a frame
//!    longer than one block carries over to the next read, and a short
//!    block is padded with silence
//!
//! Queues are keyed by slot and generation. A sink adapter still holding a
//! released slot's old generation cannot write into the slot's next occupant.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::media::{AudioFrame, MediaBuffer, MediaKind};
use crate::stats::SlotStats;

use super::config::BufferConfig;
use super::slot::SlotHandle;

/// Bounded frame queue for one media kind
#[derive(Debug)]
struct FrameQueue {
    frames: VecDeque<MediaBuffer>,
    accepted: u64,
}

impl FrameQueue {
    fn new(depth: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(depth),
            accepted: 0,
        }
    }

    /// Push a frame, returning how many old frames were evicted
    fn push(&mut self, frame: MediaBuffer, depth: usize) -> u64 {
        let mut evicted = 0;
        while self.frames.len() >= depth {
            if let Some(old) = self.frames.pop_front() {
                old.recycle();
                evicted += 1;
            }
        }
        self.frames.push_back(frame);
        self.accepted += 1;
        evicted
    }

    /// Pop the frame due now, skipping anything beyond `target`
    fn pop_due(&mut self, target: usize) -> (Option<MediaBuffer>, u64) {
        let mut skipped = 0;
        while self.frames.len() > target {
            if let Some(old) = self.frames.pop_front() {
                old.recycle();
                skipped += 1;
            }
        }
        (self.frames.pop_front(), skipped)
    }

    fn clear(&mut self) -> usize {
        let n = self.frames.len();
        for frame in self.frames.drain(..) {
            frame.recycle();
        }
        n
    }
}

/// Buffered state of one occupied slot
#[derive(Debug)]
struct SlotQueue {
    generation: u64,
    video: FrameQueue,
    audio: FrameQueue,
    last_video: Option<MediaBuffer>,
    /// Decoded samples not yet mixed
    pcm: VecDeque<i16>,
    dropped: u64,
    repeated: u64,
}

impl SlotQueue {
    fn new(generation: u64, depth: usize) -> Self {
        Self {
            generation,
            video: FrameQueue::new(depth),
            audio: FrameQueue::new(depth),
            last_video: None,
            pcm: VecDeque::new(),
            dropped: 0,
            repeated: 0,
        }
    }
}

/// Jitter buffers for all active slots
#[derive(Debug)]
pub struct BufferManager {
    config: BufferConfig,
    slots: RwLock<Vec<Option<Arc<Mutex<SlotQueue>>>>>,
}

impl BufferManager {
    /// Create a buffer manager, validating its configuration
    pub fn new(config: BufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            slots: RwLock::new(Vec::new()),
        })
    }

    /// Buffering configuration
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Start buffering for a newly occupied slot
    pub fn activate(&self, handle: SlotHandle) {
        let mut slots = self.slots.write();
        if slots.len() <= handle.slot {
            slots.resize_with(handle.slot + 1, || None);
        }
        slots[handle.slot] = Some(Arc::new(Mutex::new(SlotQueue::new(
            handle.generation,
            self.config.queue_depth,
        ))));
    }

    /// Stop buffering for a released slot, discarding queued frames.
    ///
    /// Returns the number of frames discarded; a stale generation is ignored.
    pub fn deactivate(&self, handle: SlotHandle) -> usize {
        let mut slots = self.slots.write();
        let Some(entry) = slots.get_mut(handle.slot) else {
            return 0;
        };
        let matches = entry
            .as_ref()
            .map(|q| q.lock().generation == handle.generation)
            .unwrap_or(false);
        if !matches {
            return 0;
        }

        let discarded = entry
            .take()
            .map(|queue| {
                let mut queue = queue.lock();
                queue.last_video = None;
                queue.pcm.clear();
                queue.video.clear() + queue.audio.clear()
            })
            .unwrap_or(0);

        tracing::debug!(slot = handle.slot, discarded = discarded, "Slot buffers released");
        discarded
    }

    /// Queue a video frame. Returns false if the slot is not active for
    /// this generation.
    pub fn put_video(&self, handle: SlotHandle, frame: MediaBuffer) -> bool {
        self.put(handle, MediaKind::Video, frame)
    }

    /// Queue an audio frame. Returns false if the slot is not active for
    /// this generation.
    pub fn put_audio(&self, handle: SlotHandle, frame: MediaBuffer) -> bool {
        self.put(handle, MediaKind::Audio, frame)
    }

    fn put(&self, handle: SlotHandle, kind: MediaKind, frame: MediaBuffer) -> bool {
        let Some(queue) = self.queue(handle.slot) else {
            return false;
        };
        let mut queue = queue.lock();
        if queue.generation != handle.generation {
            return false;
        }

        let depth = self.config.queue_depth;
        let evicted = match kind {
            MediaKind::Video => queue.video.push(frame, depth),
            MediaKind::Audio => queue.audio.push(frame, depth),
        };
        if evicted > 0 {
            queue.dropped += evicted;
            tracing::trace!(slot = handle.slot, kind = ?kind, evicted = evicted, "Queue full, dropped oldest");
        }
        true
    }

    /// Video frame for the current composition instant.
    ///
    /// Falls back to the previous frame when nothing new arrived; `None`
    /// means the slot has never delivered video.
    pub fn video_for_composition(&self, slot: usize) -> Option<MediaBuffer> {
        let queue = self.queue(slot)?;
        let mut queue = queue.lock();

        let (frame, skipped) = queue.video.pop_due(self.config.target_latency);
        queue.dropped += skipped;

        match frame {
            Some(frame) => {
                queue.last_video = Some(frame.clone());
                Some(frame)
            }
            None => {
                let last = queue.last_video.clone();
                if last.is_some() {
                    queue.repeated += 1;
                }
                last
            }
        }
    }

    /// Exactly `len` interleaved samples for the current mix.
    ///
    /// Frames are decoded into a per-slot sample queue; whatever one read
    /// leaves over is returned first by the next. A short read is padded with
    /// silence. Frames whose format differs from `sample_rate`/`channels` are
    /// dropped. `None` means the slot has nothing to contribute.
    pub fn audio_for_composition(
        &self,
        slot: usize,
        sample_rate: u32,
        channels: u16,
        len: usize,
    ) -> Option<Vec<i16>> {
        let queue = self.queue(slot)?;
        let mut guard = queue.lock();
        let queue = &mut *guard;

        let mut first = true;
        while queue.pcm.len() < len {
            let buffer = if first {
                first = false;
                let (frame, skipped) = queue.audio.pop_due(self.config.target_latency);
                queue.dropped += skipped;
                frame
            } else {
                queue.audio.frames.pop_front()
            };
            let Some(buffer) = buffer else {
                break;
            };

            match AudioFrame::from_buffer(&buffer) {
                Ok(frame) if frame.sample_rate() == sample_rate && frame.channels() == channels => {
                    queue.pcm.extend(frame.samples());
                }
                Ok(frame) => {
                    queue.dropped += 1;
                    tracing::debug!(
                        slot = slot,
                        sample_rate = frame.sample_rate(),
                        channels = frame.channels(),
                        "Audio format differs from output, dropping frame"
                    );
                }
                Err(e) => {
                    queue.dropped += 1;
                    tracing::debug!(slot = slot, error = %e, "Dropping undecodable audio frame");
                }
            }
            buffer.recycle();
        }

        if queue.pcm.is_empty() {
            return None;
        }
        let take = len.min(queue.pcm.len());
        let mut samples: Vec<i16> = queue.pcm.drain(..take).collect();
        samples.resize(len, 0);
        Some(samples)
    }

    /// Active slot indices, ascending
    pub fn active_slots(&self) -> Vec<usize> {
        self.slots
            .read()
            .iter()
            .enumerate()
            .filter_map(|(slot, q)| q.as_ref().map(|_| slot))
            .collect()
    }

    /// Counters for one slot
    pub fn slot_stats(&self, slot: usize) -> Option<SlotStats> {
        let queue = self.queue(slot)?;
        let queue = queue.lock();
        Some(SlotStats {
            slot,
            source: None,
            video_frames: queue.video.accepted,
            audio_frames: queue.audio.accepted,
            dropped_frames: queue.dropped,
            repeated_frames: queue.repeated,
            queued_video: queue.video.frames.len(),
            queued_audio: queue.audio.frames.len(),
        })
    }

    fn queue(&self, slot: usize) -> Option<Arc<Mutex<SlotQueue>>> {
        self.slots.read().get(slot)?.clone()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::error::Error;

    fn manager(depth: usize, latency: usize) -> BufferManager {
        BufferManager::new(
            BufferConfig::default()
                .queue_depth(depth)
                .target_latency(latency),
        )
        .unwrap()
    }

    fn handle(slot: usize, generation: u64) -> SlotHandle {
        SlotHandle { slot, generation }
    }

    fn video(ts: u32) -> MediaBuffer {
        MediaBuffer::video(Bytes::from(vec![0u8; 6]), 2, 2, ts)
    }

    fn audio(ts: u32) -> MediaBuffer {
        MediaBuffer::audio(Bytes::from(vec![0u8; 4]), 8000, 1, ts)
    }

    fn pcm(samples: &[i16]) -> MediaBuffer {
        AudioFrame::new(8000, 1, samples.to_vec()).into_buffer(0)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = BufferManager::new(BufferConfig::default().queue_depth(0));
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_put_requires_active_slot() {
        let buffers = manager(4, 2);

        // Nothing activated yet
        assert!(!buffers.put_video(handle(0, 1), video(0)));

        buffers.activate(handle(0, 1));
        assert!(buffers.put_video(handle(0, 1), video(0)));
        assert_eq!(buffers.active_slots(), vec![0]);
    }

    #[test]
    fn test_drop_oldest_on_overflow() {
        let buffers = manager(2, 2);
        buffers.activate(handle(0, 1));

        for ts in 0..5 {
            assert!(buffers.put_video(handle(0, 1), video(ts)));
        }

        let stats = buffers.slot_stats(0).unwrap();
        assert_eq!(stats.video_frames, 5);
        assert_eq!(stats.dropped_frames, 3);
        assert_eq!(stats.queued_video, 2);

        // Oldest surviving frame comes out first
        assert_eq!(buffers.video_for_composition(0).unwrap().timestamp(), 3);
    }

    #[test]
    fn test_catch_up_to_target_latency() {
        let buffers = manager(4, 1);
        buffers.activate(handle(0, 1));

        for ts in [0, 33, 66, 99] {
            buffers.put_video(handle(0, 1), video(ts));
        }

        // Three frames are skipped so composition shows the newest
        assert_eq!(buffers.video_for_composition(0).unwrap().timestamp(), 99);
        assert_eq!(buffers.slot_stats(0).unwrap().dropped_frames, 3);
    }

    #[test]
    fn test_video_repeats_last_frame() {
        let buffers = manager(4, 2);
        buffers.activate(handle(0, 1));

        // Never delivered: no data
        assert!(buffers.video_for_composition(0).is_none());

        buffers.put_video(handle(0, 1), video(10));
        assert_eq!(buffers.video_for_composition(0).unwrap().timestamp(), 10);
        assert_eq!(buffers.video_for_composition(0).unwrap().timestamp(), 10);
        assert_eq!(buffers.slot_stats(0).unwrap().repeated_frames, 1);
    }

    #[test]
    fn test_audio_does_not_repeat() {
        let buffers = manager(4, 2);
        buffers.activate(handle(0, 1));

        buffers.put_audio(handle(0, 1), audio(0));
        assert!(buffers.audio_for_composition(0, 8000, 1, 2).is_some());
        assert!(buffers.audio_for_composition(0, 8000, 1, 2).is_none());
    }

    #[test]
    fn test_per_slot_order_preserved() {
        let buffers = manager(4, 4);
        buffers.activate(handle(0, 1));

        for block in [[1, 2], [3, 4], [5, 6]] {
            buffers.put_audio(handle(0, 1), pcm(&block));
        }
        let order: Vec<Vec<i16>> = (0..3)
            .filter_map(|_| buffers.audio_for_composition(0, 8000, 1, 2))
            .collect();
        assert_eq!(order, vec![vec![1, 2], vec![3, 4], vec![5, 6]]);
    }

    #[test]
    fn test_long_audio_frame_carries_over() {
        let buffers = manager(4, 2);
        buffers.activate(handle(0, 1));

        let samples: Vec<i16> = (1..=10).collect();
        buffers.put_audio(handle(0, 1), pcm(&samples));

        assert_eq!(buffers.audio_for_composition(0, 8000, 1, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(buffers.audio_for_composition(0, 8000, 1, 4).unwrap(), vec![5, 6, 7, 8]);
        // Short tail is padded with silence
        assert_eq!(buffers.audio_for_composition(0, 8000, 1, 4).unwrap(), vec![9, 10, 0, 0]);
        assert!(buffers.audio_for_composition(0, 8000, 1, 4).is_none());
    }

    #[test]
    fn test_short_audio_frames_joined() {
        let buffers = manager(4, 2);
        buffers.activate(handle(0, 1));

        buffers.put_audio(handle(0, 1), pcm(&[1, 2]));
        buffers.put_audio(handle(0, 1), pcm(&[3, 4]));

        assert_eq!(buffers.audio_for_composition(0, 8000, 1, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(buffers.slot_stats(0).unwrap().dropped_frames, 0);
    }

    #[test]
    fn test_audio_in_other_format_dropped() {
        let buffers = manager(4, 2);
        buffers.activate(handle(0, 1));

        let stereo = AudioFrame::new(8000, 2, vec![7; 8]).into_buffer(0);
        buffers.put_audio(handle(0, 1), stereo);

        assert!(buffers.audio_for_composition(0, 8000, 1, 4).is_none());
        assert_eq!(buffers.slot_stats(0).unwrap().dropped_frames, 1);
    }

    #[test]
    fn test_deactivate_discards_pending_samples() {
        let buffers = manager(4, 2);
        buffers.activate(handle(0, 1));
        buffers.put_audio(handle(0, 1), pcm(&[1, 2, 3, 4]));
        buffers.audio_for_composition(0, 8000, 1, 2);

        buffers.deactivate(handle(0, 1));
        buffers.activate(handle(0, 2));
        assert!(buffers.audio_for_composition(0, 8000, 1, 2).is_none());
    }

    #[test]
    fn test_stale_generation_cannot_write() {
        let buffers = manager(4, 2);
        buffers.activate(handle(0, 1));
        buffers.put_video(handle(0, 1), video(0));

        // Slot 0 released and handed to a new occupant
        assert_eq!(buffers.deactivate(handle(0, 1)), 1);
        buffers.activate(handle(0, 2));

        assert!(!buffers.put_video(handle(0, 1), video(1)));
        assert!(buffers.video_for_composition(0).is_none());
    }

    #[test]
    fn test_deactivate_stale_generation_ignored() {
        let buffers = manager(4, 2);
        buffers.activate(handle(1, 5));

        assert_eq!(buffers.deactivate(handle(1, 4)), 0);
        assert_eq!(buffers.active_slots(), vec![1]);

        buffers.deactivate(handle(1, 5));
        assert!(buffers.active_slots().is_empty());
        assert!(buffers.slot_stats(1).is_none());
    }
}
