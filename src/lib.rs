//! Mixing core of a multipoint (MCU) media server
//!
//! Receives decoded audio and video from many concurrently connected
//! participants, assigns each one a reusable slot, routes congestion
//! feedback back toward the sources, and composites every slot into a
//! single encoded output stream.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mcu_mixer::{MediaSource, MixingHub, OutputPacket, OutputReceiver, SourceId};
//! use mcu_mixer::media::VideoFrame;
//!
//! struct Transport;
//!
//! impl OutputReceiver for Transport {
//!     fn receive(&self, packet: OutputPacket) {
//!         println!("{:?} packet, {} bytes", packet.kind, packet.payload.len());
//!     }
//! }
//!
//! struct Participant(SourceId);
//!
//! impl MediaSource for Participant {
//!     fn id(&self) -> SourceId {
//!         self.0
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> mcu_mixer::Result<()> {
//!     let hub = MixingHub::new(Arc::new(Transport));
//!
//!     let participant = Arc::new(Participant(SourceId::new(1)));
//!     let slot = hub.add_source(participant)?;
//!     println!("participant mixed in slot {}", slot);
//!
//!     let frame = VideoFrame::blank(320, 240).into_buffer(0);
//!     hub.deliver_video_data(frame, SourceId::new(1))?;
//!
//!     hub.shutdown().await
//! }
//! ```
//!
//! # Modules
//!
//! - [`mixer`]: hub, slot table, buffer manager, task runner, compositor
//! - [`pipeline`]: processing elements linked through named pads
//! - [`media`]: buffers, frames, codec descriptors and encoders
//! - [`stats`]: hub and per-slot statistics

pub mod error;
pub mod media;
pub mod mixer;
pub mod pipeline;
pub mod stats;

pub use error::{Error, Result};
pub use mixer::{
    BufferConfig, DeliveryStatus, FeedbackSink, MediaSink, MediaSource, MixerConfig, MixingHub,
    OutputPacket, OutputReceiver, SourceId,
};
pub use stats::{HubStats, SlotStats};
