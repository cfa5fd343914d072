//! Mixing core
//!
//! The hub owns the slot table and routes media; the buffer manager smooths
//! jitter per slot; the task runner drives the output processor's ticks.
//!
//! # Architecture
//!
//! ```text
//!   transport threads                control thread
//!   deliver_*_data()                 add_source / remove_source
//!         │  (read lock)                    │  (write lock)
//!         ▼                                 ▼
//!   ┌──────────────────────────────────────────────────┐
//!   │ MixingHub                                        │
//!   │   SlotTable: SourceId ⇄ slot (generation-checked)│
//!   │   Arc<SinkAdapter> per source                    │
//!   │   feedback route (at most one consumer)          │
//!   └────────────┬─────────────────────────────────────┘
//!                ▼
//!   BufferManager: per-slot bounded queues (drop-oldest)
//!                ▲
//!                │ video_for_composition / audio_for_composition
//!   TaskRunner ──► OutputProcessor ──► encode ──► OutputReceiver (SSRC)
//! ```

pub mod buffer_manager;
pub mod compositor;
pub mod config;
pub mod hub;
pub mod layout;
pub mod sink;
pub mod slot;
pub mod source;
pub mod task_runner;

pub use buffer_manager::BufferManager;
pub use compositor::{CompositionReport, OutputProcessor};
pub use config::{BufferConfig, MixerConfig, AUDIO_FRAME, DEFAULT_SSRC};
pub use hub::MixingHub;
pub use layout::{grid_regions, LayoutConfig, Region};
pub use sink::SinkAdapter;
pub use slot::{SlotHandle, SlotTable};
pub use source::{
    DeliveryStatus, FeedbackSink, MediaSink, MediaSource, OutputPacket, OutputReceiver, SourceId,
};
pub use task_runner::{PeriodicTask, TaskId, TaskRunner};
