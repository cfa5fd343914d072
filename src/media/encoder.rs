//! Encoder boundary
//!
//! Codec implementations live outside the mixing core; the compositor only
//! talks to them through [`VideoEncoder`] and [`AudioEncoder`]. Two built-in
//! encoders cover the uncompressed formats: [`RawVideoEncoder`] (I420
//! passthrough) and [`PcmAudioEncoder`] (L16 and G.711 mu-law).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

use super::codec::{AudioCodecId, AudioCodecInfo, VideoCodecId, VideoCodecInfo};
use super::frame::{AudioFrame, VideoFrame};

/// Output of an encoder
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Encoded payload
    pub payload: Bytes,
    /// Whether the payload can be decoded without earlier frames
    pub key_frame: bool,
}

/// Video encoder used by the compositor
pub trait VideoEncoder: Send {
    /// Encoder name for logs
    fn name(&self) -> &str;

    /// Validate and store the output codec.
    ///
    /// Fails with [`Error::Configuration`] if the codec is not supported.
    fn configure(&mut self, codec: &VideoCodecInfo) -> Result<()>;

    /// Encode one composited frame
    fn encode(&mut self, frame: &VideoFrame, force_key_frame: bool) -> Result<EncodedFrame>;
}

/// Audio encoder used by the compositor
pub trait AudioEncoder: Send {
    /// Encoder name for logs
    fn name(&self) -> &str;

    /// Validate and store the output codec
    fn configure(&mut self, codec: &AudioCodecInfo) -> Result<()>;

    /// Encode one mixed frame
    fn encode(&mut self, frame: &AudioFrame) -> Result<EncodedFrame>;
}

/// Passthrough encoder emitting raw I420 frames
///
/// Emits a key frame on the first frame, on request, and every
/// `2 * frame_rate` frames.
#[derive(Debug, Default)]
pub struct RawVideoEncoder {
    codec: Option<VideoCodecInfo>,
    frames_since_key: Option<u32>,
}

impl RawVideoEncoder {
    /// Create an unconfigured encoder
    pub fn new() -> Self {
        Self::default()
    }
}

impl VideoEncoder for RawVideoEncoder {
    fn name(&self) -> &str {
        "raw-video"
    }

    fn configure(&mut self, codec: &VideoCodecInfo) -> Result<()> {
        if codec.codec != VideoCodecId::I420 {
            return Err(Error::configuration(
                self.name(),
                format!("cannot produce {}", codec.codec.name()),
            ));
        }
        if codec.width == 0 || codec.height == 0 {
            return Err(Error::configuration(
                self.name(),
                format!("invalid dimensions {}x{}", codec.width, codec.height),
            ));
        }
        self.codec = Some(*codec);
        self.frames_since_key = None;
        Ok(())
    }

    fn encode(&mut self, frame: &VideoFrame, force_key_frame: bool) -> Result<EncodedFrame> {
        let codec = self
            .codec
            .ok_or_else(|| Error::configuration("raw-video", "encoder not configured"))?;
        if frame.width() != codec.width || frame.height() != codec.height {
            return Err(Error::Malformed(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                codec.width,
                codec.height
            )));
        }

        let key_interval = codec.frame_rate.max(1) * 2;
        let key_frame = match self.frames_since_key {
            None => true,
            Some(n) => force_key_frame || n + 1 >= key_interval,
        };
        self.frames_since_key = Some(if key_frame {
            0
        } else {
            self.frames_since_key.unwrap_or(0) + 1
        });

        Ok(EncodedFrame {
            payload: frame.data().clone(),
            key_frame,
        })
    }
}

/// Encoder for uncompressed telephony formats
#[derive(Debug, Default)]
pub struct PcmAudioEncoder {
    codec: Option<AudioCodecInfo>,
}

impl PcmAudioEncoder {
    /// Create an unconfigured encoder
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioEncoder for PcmAudioEncoder {
    fn name(&self) -> &str {
        "pcm-audio"
    }

    fn configure(&mut self, codec: &AudioCodecInfo) -> Result<()> {
        match codec.codec {
            AudioCodecId::PcmL16 | AudioCodecId::PcmMulaw8k => {}
            other => {
                return Err(Error::configuration(
                    self.name(),
                    format!("cannot produce {}", other.name()),
                ))
            }
        }
        if codec.sample_rate == 0 || codec.channels == 0 {
            return Err(Error::configuration(
                self.name(),
                format!(
                    "invalid format {} Hz x {} channels",
                    codec.sample_rate, codec.channels
                ),
            ));
        }
        self.codec = Some(*codec);
        Ok(())
    }

    fn encode(&mut self, frame: &AudioFrame) -> Result<EncodedFrame> {
        let codec = self
            .codec
            .ok_or_else(|| Error::configuration("pcm-audio", "encoder not configured"))?;

        let payload = match codec.codec {
            AudioCodecId::PcmMulaw8k => {
                Bytes::from(frame.samples().iter().map(|s| linear_to_mulaw(*s)).collect::<Vec<_>>())
            }
            // RTP carries L16 in network byte order
            _ => {
                let mut out = BytesMut::with_capacity(frame.samples().len() * 2);
                for sample in frame.samples() {
                    out.put_i16(*sample);
                }
                out.freeze()
            }
        };

        Ok(EncodedFrame {
            payload,
            key_frame: true,
        })
    }
}

/// G.711 mu-law compression of one sample
pub fn linear_to_mulaw(sample: i16) -> u8 {
    const BIAS: i32 = 0x84;
    const CLIP: i32 = 32635;

    let mut value = i32::from(sample);
    let sign = if value < 0 {
        value = -value;
        0x80
    } else {
        0
    };
    value = value.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && value & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (value >> (exponent + 3)) & 0x0F;

    !((sign | (exponent << 4) | mantissa) as u8)
}
