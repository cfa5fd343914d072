//! Output processor
//!
//! On every tick, reads one frame per active slot from the buffer manager,
//! composes them and runs the result through an encode → send pipeline:
//!
//! ```text
//!   video tick: slots ──► grid canvas ──► [video-encoder] ──► [video-output]
//!   audio tick: slots ──► summed PCM  ──► [audio-encoder] ──► [audio-output]
//!                                                                  │
//!                                                      OutputReceiver (SSRC)
//! ```
//!
//! Video and audio each have their own pipeline behind their own lock, so a
//! slow video encode never delays the audio cadence.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::media::{
    AudioCodecInfo, AudioEncoder, AudioFrame, BufferPool, Canvas, VideoCodecInfo,
    VideoEncoder, VideoFrame,
};
use crate::pipeline::{
    BufferMessage, ElementConfig, ElementId, EncodeElement, Pipeline, ReceiverElement,
};

use super::buffer_manager::BufferManager;
use super::config::{MixerConfig, AUDIO_FRAME};
use super::layout::{grid_regions, LayoutConfig};
use super::source::OutputReceiver;
use super::task_runner::PeriodicTask;

/// RTP clock rate for video
const VIDEO_CLOCK_RATE: u64 = 90_000;

/// Slots that contributed to one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositionReport {
    /// Video tick number (starting at 1)
    pub tick: u64,
    /// Slots whose frame was drawn on the canvas
    pub video_slots: Vec<usize>,
    /// Slots whose PCM was mixed
    pub audio_slots: Vec<usize>,
    /// Whether the video frame was forced to be a key frame
    pub key_frame: bool,
}

struct Stage {
    pipeline: Pipeline,
    entry: ElementId,
    timestamp: u32,
    sent: Arc<AtomicU64>,
}

impl Stage {
    fn build(
        kind: &str,
        config: ElementConfig,
        encoder: EncodeElement,
        ssrc: u32,
        receiver: Arc<dyn OutputReceiver>,
    ) -> Result<Self> {
        let mut pipeline = Pipeline::new(format!("{}-output", kind));
        let output = ReceiverElement::new(format!("{}-sender", kind), ssrc, receiver);
        let sent = output.sent_counter();

        let entry = pipeline.add(Box::new(encoder))?;
        let sender = pipeline.add(Box::new(output))?;
        pipeline.link(entry, "src", sender, "sink")?;
        pipeline.configure(entry, &config)?;
        pipeline.configure(sender, &ElementConfig::Passthrough)?;
        pipeline.start()?;

        Ok(Self {
            pipeline,
            entry,
            timestamp: 0,
            sent,
        })
    }
}

/// Composites buffered slots into the single output stream
pub struct OutputProcessor {
    buffers: Arc<BufferManager>,
    video_codec: VideoCodecInfo,
    audio_codec: AudioCodecInfo,
    layout: LayoutConfig,
    pool: BufferPool,
    video: Mutex<Stage>,
    audio: Mutex<Stage>,
    force_key_frame: AtomicBool,
    video_ticks: AtomicU64,
    audio_ticks: AtomicU64,
}

impl OutputProcessor {
    /// Build and start both output pipelines.
    ///
    /// Fails if an encoder rejects the configured output codec.
    pub fn new(
        config: &MixerConfig,
        buffers: Arc<BufferManager>,
        receiver: Arc<dyn OutputReceiver>,
        video_encoder: Box<dyn VideoEncoder>,
        audio_encoder: Box<dyn AudioEncoder>,
    ) -> Result<Self> {
        let video = Stage::build(
            "video",
            ElementConfig::Video(config.video),
            EncodeElement::video("video-encoder", video_encoder),
            config.ssrc,
            Arc::clone(&receiver),
        )?;
        let audio = Stage::build(
            "audio",
            ElementConfig::Audio(config.audio),
            EncodeElement::audio("audio-encoder", audio_encoder),
            config.ssrc,
            receiver,
        )?;

        Ok(Self {
            buffers,
            video_codec: config.video,
            audio_codec: config.audio,
            layout: config.layout,
            pool: BufferPool::new("composite", config.output_buffers),
            video: Mutex::new(video),
            audio: Mutex::new(audio),
            force_key_frame: AtomicBool::new(false),
            video_ticks: AtomicU64::new(0),
            audio_ticks: AtomicU64::new(0),
        })
    }

    /// Make the next composite a key frame
    pub fn request_key_frame(&self) {
        self.force_key_frame.store(true, Ordering::Release);
    }

    /// Compose and send one video frame.
    ///
    /// With no active slot nothing is sent. Returns the slots drawn and
    /// whether the frame was a forced key frame.
    pub fn run_video_tick(&self) -> Result<(Vec<usize>, bool)> {
        let slots = self.buffers.active_slots();
        let mut stage = self.video.lock();
        let tick = self.video_ticks.fetch_add(1, Ordering::Relaxed) + 1;

        // The RTP clock runs whether or not this tick sends a frame
        let timestamp = stage.timestamp;
        let step = VIDEO_CLOCK_RATE / u64::from(self.video_codec.frame_rate.max(1));
        stage.timestamp = timestamp.wrapping_add(step as u32);

        if slots.is_empty() {
            return Ok((Vec::new(), false));
        }

        let (width, height) = (self.video_codec.width, self.video_codec.height);
        let regions = grid_regions(&self.layout, slots.len(), width, height);
        let mut canvas = Canvas::new(width, height);
        let mut drawn = Vec::with_capacity(slots.len());

        for (&slot, region) in slots.iter().zip(regions) {
            let Some(buffer) = self.buffers.video_for_composition(slot) else {
                continue;
            };
            match VideoFrame::from_buffer(&buffer) {
                Ok(frame) => {
                    canvas.draw(&frame, region);
                    drawn.push(slot);
                }
                Err(e) => {
                    tracing::debug!(slot = slot, error = %e, "Skipping undecodable video frame");
                }
            }
        }

        let key_frame = self.force_key_frame.swap(false, Ordering::AcqRel);
        let composite = self.pool.lease(
            canvas
                .into_frame()
                .into_buffer(timestamp)
                .with_key_frame(key_frame),
        );
        let composite = match composite {
            Ok(buffer) => buffer,
            Err(e) => {
                // Retry the key frame on the next tick
                if key_frame {
                    self.request_key_frame();
                }
                tracing::warn!(tick = tick, error = %e, "No output buffer, skipping video tick");
                return Ok((Vec::new(), false));
            }
        };

        let entry = stage.entry;
        stage
            .pipeline
            .push(entry, "sink", BufferMessage::transfer(composite))?;

        tracing::trace!(tick = tick, slots = drawn.len(), key_frame = key_frame, "Video composited");
        Ok((drawn, key_frame))
    }

    /// Mix and send one audio frame.
    ///
    /// Slots without audio contribute silence; when no slot contributed,
    /// nothing is sent. Returns the slots mixed.
    pub fn run_audio_tick(&self) -> Result<Vec<usize>> {
        let slots = self.buffers.active_slots();
        let mut stage = self.audio.lock();
        self.audio_ticks.fetch_add(1, Ordering::Relaxed);

        let rate = self.audio_codec.sample_rate;
        let channels = self.audio_codec.channels;
        let len = self.audio_codec.samples_per_frame(AUDIO_FRAME);

        let timestamp = stage.timestamp;
        stage.timestamp = timestamp.wrapping_add((len / usize::from(channels.max(1))) as u32);

        let mut sum = vec![0i32; len];
        let mut mixed = Vec::with_capacity(slots.len());

        for slot in slots {
            let Some(samples) = self.buffers.audio_for_composition(slot, rate, channels, len) else {
                continue;
            };
            for (acc, sample) in sum.iter_mut().zip(samples) {
                *acc += i32::from(sample);
            }
            mixed.push(slot);
        }

        if mixed.is_empty() {
            return Ok(mixed);
        }

        let samples = sum
            .into_iter()
            .map(|s| s.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16)
            .collect();
        let frame = AudioFrame::new(rate, channels, samples);
        let composite = match self.pool.lease(frame.into_buffer(timestamp)) {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!(error = %e, "No output buffer, skipping audio tick");
                return Ok(Vec::new());
            }
        };

        let entry = stage.entry;
        stage
            .pipeline
            .push(entry, "sink", BufferMessage::transfer(composite))?;

        Ok(mixed)
    }

    /// Run one video tick followed by one audio tick
    pub fn run_tick(&self) -> Result<CompositionReport> {
        let (video_slots, key_frame) = self.run_video_tick()?;
        let audio_slots = self.run_audio_tick()?;
        Ok(CompositionReport {
            tick: self.video_ticks.load(Ordering::Relaxed),
            video_slots,
            audio_slots,
            key_frame,
        })
    }

    /// Video ticks run so far
    pub fn video_ticks(&self) -> u64 {
        self.video_ticks.load(Ordering::Relaxed)
    }

    /// Audio ticks run so far
    pub fn audio_ticks(&self) -> u64 {
        self.audio_ticks.load(Ordering::Relaxed)
    }

    /// Video packets handed to the receiver
    pub fn video_packets(&self) -> u64 {
        self.video.lock().sent.load(Ordering::Relaxed)
    }

    /// Audio packets handed to the receiver
    pub fn audio_packets(&self) -> u64 {
        self.audio.lock().sent.load(Ordering::Relaxed)
    }

    /// Composited buffers currently in flight
    pub fn buffers_in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    /// Finalize both pipelines. Idempotent.
    pub fn finalize(&self) -> Result<()> {
        let video = self.video.lock().pipeline.finalize();
        let audio = self.audio.lock().pipeline.finalize();
        video.and(audio)
    }
}

impl std::fmt::Debug for OutputProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputProcessor")
            .field("video_codec", &self.video_codec)
            .field("audio_codec", &self.audio_codec)
            .field("video_ticks", &self.video_ticks())
            .field("audio_ticks", &self.audio_ticks())
            .finish()
    }
}

/// Periodic video composition
pub(crate) struct VideoTick(pub(crate) Arc<OutputProcessor>);

impl PeriodicTask for VideoTick {
    fn name(&self) -> &str {
        "video-composition"
    }

    fn run(&self) {
        if let Err(e) = self.0.run_video_tick() {
            tracing::warn!(error = %e, "Video composition tick failed");
        }
    }
}

/// Periodic audio mixing
pub(crate) struct AudioTick(pub(crate) Arc<OutputProcessor>);

impl PeriodicTask for AudioTick {
    fn name(&self) -> &str {
        "audio-mix"
    }

    fn run(&self) {
        if let Err(e) = self.0.run_audio_tick() {
            tracing::warn!(error = %e, "Audio mix tick failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::error::Error;
    use crate::media::{MediaBuffer, MediaKind, PcmAudioEncoder, Plane, RawVideoEncoder, VideoCodecId};
    use crate::mixer::{BufferConfig, OutputPacket, SlotHandle};

    #[derive(Default)]
    struct Collect {
        packets: Mutex<Vec<OutputPacket>>,
    }

    impl OutputReceiver for Collect {
        fn receive(&self, packet: OutputPacket) {
            self.packets.lock().push(packet);
        }
    }

    impl Collect {
        fn of_kind(&self, kind: MediaKind) -> Vec<OutputPacket> {
            self.packets
                .lock()
                .iter()
                .filter(|p| p.kind == kind)
                .cloned()
                .collect()
        }
    }

    fn config() -> MixerConfig {
        MixerConfig::default()
            .video(VideoCodecInfo::new(VideoCodecId::I420, 8, 8))
            .audio(AudioCodecInfo::l16(8000, 1))
            .ssrc(77)
    }

    fn processor(config: &MixerConfig) -> (Arc<BufferManager>, Arc<Collect>, OutputProcessor) {
        let buffers = Arc::new(BufferManager::new(BufferConfig::default()).unwrap());
        let receiver = Arc::new(Collect::default());
        let output = OutputProcessor::new(
            config,
            buffers.clone(),
            receiver.clone(),
            Box::new(RawVideoEncoder::new()),
            Box::new(PcmAudioEncoder::new()),
        )
        .unwrap();
        (buffers, receiver, output)
    }

    fn handle(slot: usize) -> SlotHandle {
        SlotHandle {
            slot,
            generation: slot as u64 + 1,
        }
    }

    #[test]
    fn test_encoder_rejecting_codec_fails_construction() {
        let config = config().video(VideoCodecInfo::new(VideoCodecId::Vp8, 8, 8));
        let buffers = Arc::new(BufferManager::new(BufferConfig::default()).unwrap());
        let result = OutputProcessor::new(
            &config,
            buffers,
            Arc::new(Collect::default()),
            Box::new(RawVideoEncoder::new()),
            Box::new(PcmAudioEncoder::new()),
        );
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_video_tick_without_slots_sends_nothing() {
        let (_buffers, receiver, output) = processor(&config());

        let (slots, _) = output.run_video_tick().unwrap();
        assert!(slots.is_empty());
        assert!(receiver.packets.lock().is_empty());
        assert_eq!(output.video_ticks(), 1);
    }

    #[test]
    fn test_video_grid_composition() {
        let (buffers, receiver, output) = processor(&config());
        buffers.activate(handle(0));
        buffers.activate(handle(1));

        // Slot 0 is bright, slot 1 never delivers and stays background
        let bright = VideoFrame::filled(4, 4, 200, 128, 128).into_buffer(0);
        assert!(buffers.put_video(handle(0), bright));

        let (slots, _) = output.run_video_tick().unwrap();
        assert_eq!(slots, vec![0]);

        let packets = receiver.of_kind(MediaKind::Video);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].ssrc, 77);
        assert!(packets[0].key_frame);

        let frame = VideoFrame::new(8, 8, packets[0].payload.clone()).unwrap();
        let y = frame.plane(Plane::Y);
        // Left cell (x < 4) is the bright source, right cell is black
        assert_eq!(y[0], 200);
        assert_eq!(y[4], 16);
    }

    #[test]
    fn test_video_timestamps_advance_on_rtp_clock() {
        let (buffers, receiver, output) = processor(&config());
        buffers.activate(handle(0));
        buffers.put_video(handle(0), VideoFrame::blank(8, 8).into_buffer(0));

        output.run_video_tick().unwrap();
        output.run_video_tick().unwrap();

        let packets = receiver.of_kind(MediaKind::Video);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].timestamp, 0);
        assert_eq!(packets[1].timestamp, 3000);
    }

    #[test]
    fn test_key_frame_request_forces_next_frame() {
        let (buffers, receiver, output) = processor(&config());
        buffers.activate(handle(0));
        buffers.put_video(handle(0), VideoFrame::blank(8, 8).into_buffer(0));

        output.run_video_tick().unwrap();
        output.run_video_tick().unwrap();
        output.request_key_frame();
        let (_, forced) = output.run_video_tick().unwrap();
        assert!(forced);

        let flags: Vec<bool> = receiver
            .of_kind(MediaKind::Video)
            .iter()
            .map(|p| p.key_frame)
            .collect();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[test]
    fn test_audio_mix_clips() {
        let (buffers, receiver, output) = processor(&config());
        buffers.activate(handle(0));
        buffers.activate(handle(1));
        buffers.activate(handle(2));

        let loud = |v: i16| AudioFrame::new(8000, 1, vec![v; 80]).into_buffer(0);
        buffers.put_audio(handle(0), loud(30_000));
        buffers.put_audio(handle(1), loud(10_000));
        // Slot 2 delivers nothing and contributes silence

        let slots = output.run_audio_tick().unwrap();
        assert_eq!(slots, vec![0, 1]);

        let packets = receiver.of_kind(MediaKind::Audio);
        assert_eq!(packets.len(), 1);
        // L16 output is big-endian
        let first = i16::from_be_bytes([packets[0].payload[0], packets[0].payload[1]]);
        assert_eq!(first, i16::MAX);
        assert_eq!(packets[0].payload.len(), 160);
    }

    fn l16_samples(packet: &OutputPacket) -> Vec<i16> {
        packet
            .payload
            .chunks_exact(2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn test_audio_frame_sizes_independent_of_tick() {
        let (buffers, receiver, output) = processor(&config());
        buffers.activate(handle(0));
        let delivered: Vec<i16> = (1..=280).collect();

        // 20 ms frame spans two ticks
        let long = AudioFrame::new(8000, 1, delivered[..160].to_vec()).into_buffer(0);
        buffers.put_audio(handle(0), long);
        assert_eq!(output.run_audio_tick().unwrap(), vec![0]);
        assert_eq!(output.run_audio_tick().unwrap(), vec![0]);

        // Two 5 ms frames fill one tick
        for chunk in delivered[160..240].chunks(40) {
            buffers.put_audio(handle(0), AudioFrame::new(8000, 1, chunk.to_vec()).into_buffer(0));
        }
        output.run_audio_tick().unwrap();

        // A lone 5 ms frame is padded with silence
        let short = AudioFrame::new(8000, 1, delivered[240..].to_vec()).into_buffer(0);
        buffers.put_audio(handle(0), short);
        output.run_audio_tick().unwrap();

        let mixed: Vec<i16> = receiver
            .of_kind(MediaKind::Audio)
            .iter()
            .flat_map(l16_samples)
            .collect();
        assert_eq!(mixed.len(), 320);
        assert_eq!(&mixed[..280], &delivered[..]);
        assert!(mixed[280..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_audio_timestamps_count_silent_ticks() {
        let (buffers, receiver, output) = processor(&config());
        buffers.activate(handle(0));
        let frame = || AudioFrame::new(8000, 1, vec![100; 80]).into_buffer(0);

        buffers.put_audio(handle(0), frame());
        output.run_audio_tick().unwrap();
        for _ in 0..10 {
            assert!(output.run_audio_tick().unwrap().is_empty());
        }
        buffers.put_audio(handle(0), frame());
        output.run_audio_tick().unwrap();

        let timestamps: Vec<u32> = receiver
            .of_kind(MediaKind::Audio)
            .iter()
            .map(|p| p.timestamp)
            .collect();
        assert_eq!(timestamps, vec![0, 880]);
    }

    #[test]
    fn test_video_timestamps_count_empty_ticks() {
        let (buffers, receiver, output) = processor(&config());
        buffers.activate(handle(0));
        buffers.put_video(handle(0), VideoFrame::blank(8, 8).into_buffer(0));
        output.run_video_tick().unwrap();

        // No active slot for two ticks
        buffers.deactivate(handle(0));
        output.run_video_tick().unwrap();
        output.run_video_tick().unwrap();

        let next = SlotHandle { slot: 0, generation: 9 };
        buffers.activate(next);
        buffers.put_video(next, VideoFrame::blank(8, 8).into_buffer(0));
        output.run_video_tick().unwrap();

        let timestamps: Vec<u32> = receiver
            .of_kind(MediaKind::Video)
            .iter()
            .map(|p| p.timestamp)
            .collect();
        assert_eq!(timestamps, vec![0, 9000]);
    }

    #[test]
    fn test_audio_tick_without_data_sends_nothing() {
        let (buffers, receiver, output) = processor(&config());
        buffers.activate(handle(0));

        assert!(output.run_audio_tick().unwrap().is_empty());
        assert!(receiver.packets.lock().is_empty());
        assert_eq!(output.audio_ticks(), 1);
    }

    #[test]
    fn test_audio_format_mismatch_skipped() {
        let (buffers, _receiver, output) = processor(&config());
        buffers.activate(handle(0));

        let wrong_rate = AudioFrame::new(16000, 1, vec![1; 160]).into_buffer(0);
        buffers.put_audio(handle(0), wrong_rate);
        assert!(output.run_audio_tick().unwrap().is_empty());
    }

    #[test]
    fn test_undecodable_video_skipped() {
        let (buffers, _receiver, output) = processor(&config());
        buffers.activate(handle(0));
        buffers.put_video(handle(0), MediaBuffer::video(Bytes::from_static(&[1, 2, 3]), 8, 8, 0));

        let (slots, _) = output.run_video_tick().unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn test_output_buffers_released_after_send() {
        let (buffers, _receiver, output) = processor(&config());
        buffers.activate(handle(0));
        buffers.put_video(handle(0), VideoFrame::blank(8, 8).into_buffer(0));

        for _ in 0..20 {
            output.run_video_tick().unwrap();
        }
        assert_eq!(output.buffers_in_flight(), 0);
        assert_eq!(output.video_packets(), 20);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let (_buffers, _receiver, output) = processor(&config());
        assert!(output.finalize().is_ok());
        assert!(output.finalize().is_ok());
    }
}
