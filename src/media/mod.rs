//! Media types for the mixing core
//!
//! This module provides:
//! - Reference-counted media buffers and a bounded buffer pool
//! - Codec descriptors
//! - Decoded frame views (I420 video, 16-bit PCM audio)
//! - The encoder boundary and the built-in uncompressed encoders

pub mod buffer;
pub mod codec;
pub mod encoder;
pub mod frame;

pub use buffer::{BufferId, BufferInfo, BufferPool, MediaBuffer, MediaKind};
pub use codec::{AudioCodecId, AudioCodecInfo, VideoCodecId, VideoCodecInfo};
pub use encoder::{
    AudioEncoder, EncodedFrame, PcmAudioEncoder, RawVideoEncoder, VideoEncoder,
};
pub use frame::{AudioFrame, Canvas, Plane, VideoFrame};
