//! Processing element contract
//!
//! An element is one named pipeline stage with input ("sink") and output
//! ("src") pads. The pipeline hands it one buffer at a time; the element may
//! push any number of derived buffers to its own src pads.

use crate::error::Result;
use crate::media::{AudioCodecInfo, BufferId, MediaBuffer, VideoCodecInfo};

/// How a buffer is handed to the next stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The receiver now owns the buffer and recycles it when done
    Transfer,
    /// The sender keeps its own reference; the receiver must not rely on
    /// being the last holder and releases what it retains via `recycle`
    Shared,
}

/// A buffer travelling along a pad link
#[derive(Debug, Clone)]
pub struct BufferMessage {
    /// The buffer
    pub buffer: MediaBuffer,
    /// Transfer or shared retain
    pub ownership: Ownership,
}

impl BufferMessage {
    /// Hand the buffer over
    pub fn transfer(buffer: MediaBuffer) -> Self {
        Self {
            buffer,
            ownership: Ownership::Transfer,
        }
    }

    /// Share the buffer
    pub fn shared(buffer: MediaBuffer) -> Self {
        Self {
            buffer,
            ownership: Ownership::Shared,
        }
    }
}

/// Configuration passed to [`Element::init`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementConfig {
    /// Video stream configuration
    Video(VideoCodecInfo),
    /// Audio stream configuration
    Audio(AudioCodecInfo),
    /// Element needs no stream configuration
    Passthrough,
}

/// Buffers produced by one `process_chain` call
#[derive(Debug, Default)]
pub struct PadOutput {
    pushed: Vec<(&'static str, BufferMessage)>,
}

impl PadOutput {
    /// Push a buffer on one of the element's src pads
    pub fn push(&mut self, pad: &'static str, message: BufferMessage) {
        self.pushed.push((pad, message));
    }

    /// Number of buffers pushed
    pub fn len(&self) -> usize {
        self.pushed.len()
    }

    /// Whether nothing was pushed
    pub fn is_empty(&self) -> bool {
        self.pushed.is_empty()
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, (&'static str, BufferMessage)> {
        self.pushed.drain(..)
    }
}

/// A pipeline stage
pub trait Element: Send {
    /// Element name (unique within a pipeline)
    fn name(&self) -> &str;

    /// Input pads
    fn sink_pads(&self) -> &[&'static str];

    /// Output pads
    fn src_pads(&self) -> &[&'static str] {
        &[]
    }

    /// Validate and store the stream configuration.
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) when the
    /// configuration is incompatible with the element.
    fn init(&mut self, config: &ElementConfig) -> Result<()>;

    /// Consume one buffer arriving on `pad`.
    ///
    /// The element must not keep the buffer past this call unless it retains
    /// a clone, which it later releases through [`Element::recycle`].
    fn process_chain(&mut self, pad: &str, message: BufferMessage, out: &mut PadOutput)
        -> Result<()>;

    /// Release anything held against `buffer`. Must be idempotent.
    fn recycle(&mut self, _buffer: BufferId) {}

    /// Drive element-internal work such as flushing to storage
    fn handle_process(&mut self) -> Result<()> {
        Ok(())
    }

    /// Flush and finalize on teardown. Called at most once by the pipeline.
    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}
