//! Statistics for the mixing hub

use std::time::Duration;

use crate::mixer::SourceId;

/// Per-slot ingest statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotStats {
    /// Slot index
    pub slot: usize,
    /// Source currently holding the slot
    pub source: Option<SourceId>,
    /// Video frames accepted into the queue
    pub video_frames: u64,
    /// Audio frames accepted into the queue
    pub audio_frames: u64,
    /// Frames evicted by drop-oldest or skipped to catch up
    pub dropped_frames: u64,
    /// Ticks that reused the previous video frame
    pub repeated_frames: u64,
    /// Video frames waiting for composition
    pub queued_video: usize,
    /// Audio frames waiting for composition
    pub queued_audio: usize,
}

impl SlotStats {
    /// Create zeroed stats for a slot
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            ..Default::default()
        }
    }

    /// Frames accepted of either kind
    pub fn delivered(&self) -> u64 {
        self.video_frames + self.audio_frames
    }

    /// Share of accepted frames that never reached composition, in percent
    pub fn drop_ratio(&self) -> f64 {
        let delivered = self.delivered();
        if delivered > 0 {
            self.dropped_frames as f64 * 100.0 / delivered as f64
        } else {
            0.0
        }
    }
}

/// Hub-wide statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    /// Whether the hub is operational
    pub ready: bool,
    /// Registered sources
    pub sources: usize,
    /// Per-slot statistics, ascending by slot
    pub slots: Vec<SlotStats>,
    /// Video composition ticks run
    pub video_ticks: u64,
    /// Audio mix ticks run
    pub audio_ticks: u64,
    /// Encoded video packets handed to the output receiver
    pub video_packets: u64,
    /// Encoded audio packets handed to the output receiver
    pub audio_packets: u64,
    /// Time since the hub was constructed
    pub uptime: Duration,
}

impl HubStats {
    /// Dropped frames over all slots
    pub fn total_dropped(&self) -> u64 {
        self.slots.iter().map(|s| s.dropped_frames).sum()
    }

    /// Statistics of one slot
    pub fn slot(&self, slot: usize) -> Option<&SlotStats> {
        self.slots.iter().find(|s| s.slot == slot)
    }

    /// Output video rate since construction
    pub fn output_frame_rate(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.video_packets as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_stats_new() {
        let stats = SlotStats::new(3);
        assert_eq!(stats.slot, 3);
        assert!(stats.source.is_none());
        assert_eq!(stats.delivered(), 0);
        assert_eq!(stats.drop_ratio(), 0.0);
    }

    #[test]
    fn test_slot_stats_drop_ratio() {
        let mut stats = SlotStats::new(0);
        stats.video_frames = 30;
        stats.audio_frames = 10;
        stats.dropped_frames = 4;

        // 4 of 40 frames
        assert!((stats.drop_ratio() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hub_stats_totals() {
        let mut first = SlotStats::new(0);
        first.dropped_frames = 2;
        let mut second = SlotStats::new(2);
        second.dropped_frames = 5;

        let stats = HubStats {
            ready: true,
            sources: 2,
            slots: vec![first, second],
            ..Default::default()
        };

        assert_eq!(stats.total_dropped(), 7);
        assert_eq!(stats.slot(2).map(|s| s.dropped_frames), Some(5));
        assert!(stats.slot(1).is_none());
    }

    #[test]
    fn test_output_frame_rate() {
        let stats = HubStats {
            video_packets: 300,
            uptime: Duration::from_secs(10),
            ..Default::default()
        };
        assert!((stats.output_frame_rate() - 30.0).abs() < f64::EPSILON);

        // Zero uptime must not divide by zero
        assert_eq!(HubStats::default().output_frame_rate(), 0.0);
    }
}
