//! Encoder element
//!
//! Wraps a [`VideoEncoder`] or [`AudioEncoder`] as a pipeline stage. Raw
//! video buffers marked as key frames are encoded as forced key frames.

use crate::error::{Error, Result};
use crate::media::{AudioEncoder, AudioFrame, MediaBuffer, VideoEncoder, VideoFrame};

use super::element::{BufferMessage, Element, ElementConfig, PadOutput};

enum Encoder {
    Video(Box<dyn VideoEncoder>),
    Audio(Box<dyn AudioEncoder>),
}

/// Encodes raw frames arriving on `sink` and pushes them on `src`
pub struct EncodeElement {
    name: String,
    encoder: Encoder,
    configured: bool,
}

impl EncodeElement {
    /// Wrap a video encoder
    pub fn video(name: impl Into<String>, encoder: Box<dyn VideoEncoder>) -> Self {
        Self {
            name: name.into(),
            encoder: Encoder::Video(encoder),
            configured: false,
        }
    }

    /// Wrap an audio encoder
    pub fn audio(name: impl Into<String>, encoder: Box<dyn AudioEncoder>) -> Self {
        Self {
            name: name.into(),
            encoder: Encoder::Audio(encoder),
            configured: false,
        }
    }
}

impl Element for EncodeElement {
    fn name(&self) -> &str {
        &self.name
    }

    fn sink_pads(&self) -> &[&'static str] {
        &["sink"]
    }

    fn src_pads(&self) -> &[&'static str] {
        &["src"]
    }

    fn init(&mut self, config: &ElementConfig) -> Result<()> {
        match (&mut self.encoder, config) {
            (Encoder::Video(encoder), ElementConfig::Video(codec)) => encoder.configure(codec)?,
            (Encoder::Audio(encoder), ElementConfig::Audio(codec)) => encoder.configure(codec)?,
            _ => {
                return Err(Error::configuration(
                    self.name.clone(),
                    "stream kind does not match the encoder",
                ))
            }
        }
        self.configured = true;
        Ok(())
    }

    fn process_chain(&mut self, _pad: &str, message: BufferMessage, out: &mut PadOutput) -> Result<()> {
        if !self.configured {
            return Err(Error::configuration(self.name.clone(), "not initialized"));
        }
        let input = message.buffer;

        let mut encoded = match &mut self.encoder {
            Encoder::Video(encoder) => {
                let frame = VideoFrame::from_buffer(&input)?;
                let result = encoder.encode(&frame, input.is_key_frame())?;
                MediaBuffer::video(result.payload, frame.width(), frame.height(), input.timestamp())
                    .with_key_frame(result.key_frame)
            }
            Encoder::Audio(encoder) => {
                let frame = AudioFrame::from_buffer(&input)?;
                let result = encoder.encode(&frame)?;
                MediaBuffer::audio(
                    result.payload,
                    frame.sample_rate(),
                    frame.channels(),
                    input.timestamp(),
                )
                .with_key_frame(result.key_frame)
            }
        };
        if let Some(source) = input.source() {
            encoded = encoded.with_source(source);
        }

        out.push("src", BufferMessage::transfer(encoded));
        Ok(())
    }
}
