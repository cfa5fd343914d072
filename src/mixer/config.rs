//! Mixer configuration

use std::time::Duration;

use crate::error::{Error, Result};
use crate::media::{AudioCodecInfo, VideoCodecId, VideoCodecInfo};

use super::layout::LayoutConfig;

/// SSRC of the composited output stream when none is configured
pub const DEFAULT_SSRC: u32 = 0x4D43_5530;

/// Duration of one mixed audio frame
pub const AUDIO_FRAME: Duration = Duration::from_millis(10);

/// Per-slot jitter buffer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    /// Frames held per slot and media kind before the oldest is dropped
    pub queue_depth: usize,

    /// Frames allowed to wait for composition; older ones are skipped to
    /// catch up
    pub target_latency: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            queue_depth: 4,
            target_latency: 2,
        }
    }
}

impl BufferConfig {
    /// Set the per-slot queue depth
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Set the target latency in frames
    pub fn target_latency(mut self, frames: usize) -> Self {
        self.target_latency = frames;
        self
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 {
            return Err(Error::configuration("buffer-manager", "queue depth must be positive"));
        }
        if self.target_latency == 0 || self.target_latency > self.queue_depth {
            return Err(Error::configuration(
                "buffer-manager",
                format!(
                    "target latency {} outside 1..={}",
                    self.target_latency, self.queue_depth
                ),
            ));
        }
        Ok(())
    }
}

/// Mixing hub configuration options
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Output video codec; its frame rate sets the composition cadence
    pub video: VideoCodecInfo,

    /// Output audio codec
    pub audio: AudioCodecInfo,

    /// Stream identifier of the composited output
    pub ssrc: u32,

    /// Per-slot buffering
    pub buffer: BufferConfig,

    /// Canvas layout
    pub layout: LayoutConfig,

    /// Maximum registered sources (0 = unlimited)
    pub max_sources: usize,

    /// Composited buffers allowed in flight between compositor and receiver
    pub output_buffers: usize,

    /// Schedule composition ticks on the task runner at construction
    pub autostart: bool,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            video: VideoCodecInfo::new(VideoCodecId::I420, 640, 480),
            audio: AudioCodecInfo::pcmu(),
            ssrc: DEFAULT_SSRC,
            buffer: BufferConfig::default(),
            layout: LayoutConfig::default(),
            max_sources: 0, // Unlimited
            output_buffers: 8,
            autostart: true,
        }
    }
}

impl MixerConfig {
    /// Set the output video codec
    pub fn video(mut self, codec: VideoCodecInfo) -> Self {
        self.video = codec;
        self
    }

    /// Set the output audio codec
    pub fn audio(mut self, codec: AudioCodecInfo) -> Self {
        self.audio = codec;
        self
    }

    /// Set the output SSRC
    pub fn ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }

    /// Set buffering options
    pub fn buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }

    /// Set the layout
    pub fn layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    /// Set maximum registered sources
    pub fn max_sources(mut self, max: usize) -> Self {
        self.max_sources = max;
        self
    }

    /// Set the output buffer pool size
    pub fn output_buffers(mut self, count: usize) -> Self {
        self.output_buffers = count;
        self
    }

    /// Drive composition manually with `run_composition_tick`
    pub fn manual_ticks(mut self) -> Self {
        self.autostart = false;
        self
    }

    /// Interval between video composition ticks
    pub fn composition_interval(&self) -> Option<Duration> {
        self.video.frame_interval()
    }

    /// Check the configuration before any collaborator is built
    pub fn validate(&self) -> Result<()> {
        self.buffer.validate()?;

        if self.composition_interval().is_none() {
            return Err(Error::configuration("mixer", "frame rate must be positive"));
        }
        let (w, h) = (self.video.width, self.video.height);
        if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
            return Err(Error::configuration(
                "mixer",
                format!("canvas {}x{} must be non-empty and even", w, h),
            ));
        }
        if self.output_buffers == 0 {
            return Err(Error::configuration("mixer", "output buffer pool must not be empty"));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(Error::configuration("mixer", "audio rate and channels must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MixerConfig::default();

        assert_eq!(config.video.width, 640);
        assert_eq!(config.video.height, 480);
        assert_eq!(config.ssrc, DEFAULT_SSRC);
        assert_eq!(config.max_sources, 0);
        assert!(config.autostart);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_composition_interval_from_frame_rate() {
        let config = MixerConfig::default().video(
            VideoCodecInfo::new(VideoCodecId::I420, 320, 240).frame_rate(25),
        );

        assert_eq!(config.composition_interval(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_builder_chaining() {
        let config = MixerConfig::default()
            .ssrc(42)
            .max_sources(8)
            .buffer(BufferConfig::default().queue_depth(8).target_latency(3))
            .layout(LayoutConfig::default().columns(2))
            .manual_ticks();

        assert_eq!(config.ssrc, 42);
        assert_eq!(config.max_sources, 8);
        assert_eq!(config.buffer.queue_depth, 8);
        assert_eq!(config.buffer.target_latency, 3);
        assert_eq!(config.layout.columns, 2);
        assert!(!config.autostart);
    }

    #[test]
    fn test_validate_rejects_zero_queue_depth() {
        let config = MixerConfig::default().buffer(BufferConfig::default().queue_depth(0));

        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_validate_rejects_latency_beyond_depth() {
        let buffer = BufferConfig::default().queue_depth(2).target_latency(3);
        assert!(buffer.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_odd_canvas() {
        let config =
            MixerConfig::default().video(VideoCodecInfo::new(VideoCodecId::I420, 641, 480));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_frame_rate() {
        let config = MixerConfig::default()
            .video(VideoCodecInfo::new(VideoCodecId::I420, 640, 480).frame_rate(0));
        assert!(config.validate().is_err());
    }
}
