//! Output element
//!
//! Terminal stage handing encoded buffers to the transport's
//! [`OutputReceiver`], stamped with the output stream's SSRC.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::mixer::{OutputPacket, OutputReceiver};

use super::element::{BufferMessage, Element, ElementConfig, PadOutput};

/// Sends every buffer it receives to an [`OutputReceiver`]
pub struct ReceiverElement {
    name: String,
    ssrc: u32,
    receiver: Arc<dyn OutputReceiver>,
    sent: Arc<AtomicU64>,
}

impl ReceiverElement {
    /// Create an output stage for the stream identified by `ssrc`
    pub fn new(name: impl Into<String>, ssrc: u32, receiver: Arc<dyn OutputReceiver>) -> Self {
        Self {
            name: name.into(),
            ssrc,
            receiver,
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of packets handed to the receiver
    pub fn sent_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.sent)
    }
}

impl Element for ReceiverElement {
    fn name(&self) -> &str {
        &self.name
    }

    fn sink_pads(&self) -> &[&'static str] {
        &["sink"]
    }

    fn init(&mut self, _config: &ElementConfig) -> Result<()> {
        Ok(())
    }

    fn process_chain(&mut self, _pad: &str, message: BufferMessage, _out: &mut PadOutput) -> Result<()> {
        let buffer = message.buffer;
        self.receiver.receive(OutputPacket {
            kind: buffer.kind(),
            ssrc: self.ssrc,
            timestamp: buffer.timestamp(),
            key_frame: buffer.is_key_frame(),
            payload: buffer.payload().clone(),
        });
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
