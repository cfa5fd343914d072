//! Capabilities exchanged with the transport layer
//!
//! A participant connection implements whichever of these it supports: it is
//! always a [`MediaSource`], may hand out a [`FeedbackSink`] for congestion
//! reports, and receives media through the [`MediaSink`] the hub creates for
//! it. The composited stream leaves the hub through an [`OutputReceiver`].

use std::sync::Arc;

use bytes::Bytes;

use crate::media::{MediaBuffer, MediaKind};

/// Stable identifier of a registered source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    /// Create an identifier from a transport-assigned number
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// Result of a best-effort delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The frame was queued for composition
    Accepted,
    /// The frame was discarded (sink closed or slot released)
    Dropped,
}

impl DeliveryStatus {
    /// Whether the frame was queued
    pub fn is_accepted(&self) -> bool {
        matches!(self, DeliveryStatus::Accepted)
    }
}

/// One participant's inbound media feed
pub trait MediaSource: Send + Sync {
    /// Identity used for registration
    fn id(&self) -> SourceId;

    /// Consumer for feedback addressed to this source, if it accepts any
    fn feedback_sink(&self) -> Option<Arc<dyn FeedbackSink>> {
        None
    }

    /// Ask the remote sender for a fresh key frame
    fn request_key_frame(&self) {}
}

/// Accepts decoded media
pub trait MediaSink: Send + Sync {
    /// Deliver one decoded audio frame
    fn deliver_audio(&self, buffer: MediaBuffer) -> DeliveryStatus;

    /// Deliver one decoded video frame
    fn deliver_video(&self, buffer: MediaBuffer) -> DeliveryStatus;
}

/// Accepts raw feedback payloads (RTCP receiver reports, NACK, REMB)
pub trait FeedbackSink: Send + Sync {
    /// Forward one feedback payload verbatim
    fn deliver_feedback(&self, payload: Bytes);
}

/// One encoded packet of the composited stream
#[derive(Debug, Clone)]
pub struct OutputPacket {
    /// Audio or video
    pub kind: MediaKind,
    /// Stream identifier of the composited output
    pub ssrc: u32,
    /// Media timestamp (90 kHz for video, sample clock for audio)
    pub timestamp: u32,
    /// Whether a decoder can start from this packet
    pub key_frame: bool,
    /// Encoded payload
    pub payload: Bytes,
}

/// Transport-side consumer of the composited stream
pub trait OutputReceiver: Send + Sync {
    /// Take one encoded packet
    fn receive(&self, packet: OutputPacket);
}
