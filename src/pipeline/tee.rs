//! Tee element
//!
//! Fans one input out to two src pads. Both outputs share the input's payload,
//! so they are tagged [`Ownership::Shared`](super::Ownership::Shared).

use crate::error::Result;

use super::element::{BufferMessage, Element, ElementConfig, PadOutput};

/// Duplicates every buffer onto `src_0` and `src_1`
#[derive(Debug)]
pub struct Tee {
    name: String,
    forwarded: u64,
}

impl Tee {
    /// Create a tee
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            forwarded: 0,
        }
    }

    /// Number of input buffers fanned out
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }
}

impl Element for Tee {
    fn name(&self) -> &str {
        &self.name
    }

    fn sink_pads(&self) -> &[&'static str] {
        &["sink"]
    }

    fn src_pads(&self) -> &[&'static str] {
        &["src_0", "src_1"]
    }

    fn init(&mut self, _config: &ElementConfig) -> Result<()> {
        Ok(())
    }

    fn process_chain(&mut self, _pad: &str, message: BufferMessage, out: &mut PadOutput) -> Result<()> {
        out.push("src_0", BufferMessage::shared(message.buffer.clone()));
        out.push("src_1", BufferMessage::shared(message.buffer));
        self.forwarded += 1;
        Ok(())
    }
}
