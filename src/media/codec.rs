//! Codec descriptors
//!
//! Immutable values describing a negotiated codec. They are the only
//! configuration exchanged with processing elements and encoders, and are
//! never mutated once a pipeline has been built.

use std::time::Duration;

/// Video codec identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodecId {
    /// VP8
    Vp8,
    /// VP9
    Vp9,
    /// H.264/AVC
    H264,
    /// Raw planar YUV 4:2:0 (no compression)
    I420,
}

impl VideoCodecId {
    /// Codec name as used in SDP
    pub fn name(&self) -> &'static str {
        match self {
            VideoCodecId::Vp8 => "VP8",
            VideoCodecId::Vp9 => "VP9",
            VideoCodecId::H264 => "H264",
            VideoCodecId::I420 => "I420",
        }
    }

    /// Payload type commonly negotiated for this codec
    pub fn default_payload_type(&self) -> u8 {
        match self {
            VideoCodecId::Vp8 => 100,
            VideoCodecId::Vp9 => 101,
            VideoCodecId::H264 => 127,
            VideoCodecId::I420 => 96,
        }
    }
}

/// Audio codec identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodecId {
    /// G.711 mu-law, 8 bits per sample
    PcmMulaw8k,
    /// Linear 16-bit PCM
    PcmL16,
    /// Opus
    Opus,
}

impl AudioCodecId {
    /// Codec name as used in SDP
    pub fn name(&self) -> &'static str {
        match self {
            AudioCodecId::PcmMulaw8k => "PCMU",
            AudioCodecId::PcmL16 => "L16",
            AudioCodecId::Opus => "opus",
        }
    }

    /// Bytes per encoded sample, or `None` for frame-based codecs
    pub fn bytes_per_sample(&self) -> Option<u16> {
        match self {
            AudioCodecId::PcmMulaw8k => Some(1),
            AudioCodecId::PcmL16 => Some(2),
            AudioCodecId::Opus => None,
        }
    }
}

/// Negotiated video codec parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoCodecInfo {
    /// Codec
    pub codec: VideoCodecId,
    /// RTP payload type
    pub payload_type: u8,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Target bitrate in kbps
    pub bit_rate: u32,
    /// Frames per second
    pub frame_rate: u32,
}

impl VideoCodecInfo {
    /// Create a descriptor with the codec's default payload type, 500 kbps and 30 fps
    pub fn new(codec: VideoCodecId, width: u32, height: u32) -> Self {
        Self {
            codec,
            payload_type: codec.default_payload_type(),
            width,
            height,
            bit_rate: 500,
            frame_rate: 30,
        }
    }

    /// Set the payload type
    pub fn payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = payload_type;
        self
    }

    /// Set the bitrate (kbps)
    pub fn bit_rate(mut self, kbps: u32) -> Self {
        self.bit_rate = kbps;
        self
    }

    /// Set the frame rate
    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps;
        self
    }

    /// Time between two frames, or `None` if the frame rate is zero
    pub fn frame_interval(&self) -> Option<Duration> {
        if self.frame_rate == 0 {
            return None;
        }
        Some(Duration::from_micros(1_000_000 / u64::from(self.frame_rate)))
    }
}

/// Negotiated audio codec parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioCodecInfo {
    /// Codec
    pub codec: AudioCodecId,
    /// Bitrate in kbps
    pub bit_rate: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
}

impl AudioCodecInfo {
    /// G.711 mu-law, 8 kHz mono
    pub fn pcmu() -> Self {
        Self {
            codec: AudioCodecId::PcmMulaw8k,
            bit_rate: 64,
            sample_rate: 8000,
            channels: 1,
        }
    }

    /// Linear 16-bit PCM at the given rate and channel count
    pub fn l16(sample_rate: u32, channels: u16) -> Self {
        Self {
            codec: AudioCodecId::PcmL16,
            bit_rate: sample_rate * u32::from(channels) * 16 / 1000,
            sample_rate,
            channels,
        }
    }

    /// Opus, 48 kHz stereo
    pub fn opus() -> Self {
        Self {
            codec: AudioCodecId::Opus,
            bit_rate: 64,
            sample_rate: 48000,
            channels: 2,
        }
    }

    /// Number of interleaved samples in a frame of the given duration
    pub fn samples_per_frame(&self, duration: Duration) -> usize {
        let per_channel = u64::from(self.sample_rate) * duration.as_micros() as u64 / 1_000_000;
        per_channel as usize * usize::from(self.channels)
    }
}
