//! Processing-element chains
//!
//! Media pipelines (decode, buffer, mix, encode, write) are assembled from
//! [`Element`]s connected through named pads inside a [`Pipeline`]:
//!
//! ```text
//!   raw canvas ──► [encode] ──src──► sink── [output] ──► OutputReceiver
//!   mixed PCM  ──► [tee] ──src_0──► [pcm-writer] (WAV file)
//!                        ──src_1──► [encode] ──► [output]
//! ```
//!
//! A buffer pushed along a link is either transferred (the receiver now owns
//! it) or shared (the sender keeps a reference). An element that retains a
//! shared buffer beyond `process_chain` releases it through `recycle`.

pub mod element;
pub mod encode;
pub mod graph;
pub mod output;
pub mod pcm_writer;
pub mod tee;

pub use element::{BufferMessage, Element, ElementConfig, Ownership, PadOutput};
pub use encode::EncodeElement;
pub use graph::{ElementId, Pipeline, PipelineState};
pub use output::ReceiverElement;
pub use pcm_writer::PcmWriter;
pub use tee::Tee;
