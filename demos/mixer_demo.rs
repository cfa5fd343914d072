//! Mixer Demo - Mixes three synthetic participants into one stream
//!
//! Run with: cargo run --example mixer_demo -- [output_dir]
//!
//! This example demonstrates:
//! - Registering sources with `MixingHub` and getting their slots
//! - Delivering video and audio from concurrent producer tasks
//! - Removing a participant mid-stream
//! - Recording the mixed audio to a WAV file with a `PcmWriter` pipeline
//!
//! # Architecture
//!
//! ```text
//!   participant-1 ──┐
//!   participant-2 ──┼──► MixingHub ──► Recorder (OutputReceiver)
//!   participant-3 ──┘                    │
//!                                        ├── video: count packets
//!                                        └── audio: PcmWriter ──► mix.wav
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use mcu_mixer::media::{AudioCodecInfo, AudioFrame, MediaBuffer, MediaKind, VideoFrame};
use mcu_mixer::pipeline::{BufferMessage, ElementConfig, ElementId, PcmWriter, Pipeline};
use mcu_mixer::{
    MediaSource, MixerConfig, MixingHub, OutputPacket, OutputReceiver, SourceId,
};

const PARTICIPANTS: u64 = 3;

/// Receives the mixed output: counts video, records audio
struct Recorder {
    pipeline: Mutex<Pipeline>,
    writer: ElementId,
    audio: AudioCodecInfo,
    video_packets: AtomicU64,
    key_frames: AtomicU64,
}

impl Recorder {
    fn create(path: &PathBuf, audio: AudioCodecInfo) -> mcu_mixer::Result<Self> {
        let mut pipeline = Pipeline::new("recorder");
        let writer = pipeline.add(Box::new(PcmWriter::create("mix-wav", path)?))?;
        pipeline.configure(writer, &ElementConfig::Audio(audio))?;
        pipeline.start()?;

        Ok(Self {
            pipeline: Mutex::new(pipeline),
            writer,
            audio,
            video_packets: AtomicU64::new(0),
            key_frames: AtomicU64::new(0),
        })
    }

    fn finish(&self) -> mcu_mixer::Result<()> {
        self.pipeline.lock().finalize()
    }
}

impl OutputReceiver for Recorder {
    fn receive(&self, packet: OutputPacket) {
        match packet.kind {
            MediaKind::Video => {
                self.video_packets.fetch_add(1, Ordering::Relaxed);
                if packet.key_frame {
                    self.key_frames.fetch_add(1, Ordering::Relaxed);
                }
            }
            MediaKind::Audio => {
                let buffer = MediaBuffer::audio(
                    packet.payload,
                    self.audio.sample_rate,
                    self.audio.channels,
                    packet.timestamp,
                );
                let mut pipeline = self.pipeline.lock();
                let mut result = pipeline.push(self.writer, "sink", BufferMessage::transfer(buffer));
                if result.is_ok() {
                    result = pipeline.handle_process();
                }
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Failed to record audio packet");
                }
            }
        }
    }
}

struct Participant {
    id: SourceId,
}

impl MediaSource for Participant {
    fn id(&self) -> SourceId {
        self.id
    }

    fn request_key_frame(&self) {
        tracing::info!(source = %self.id, "Key frame requested");
    }
}

/// Feed one participant: a flat-colour picture and a square-wave tone
fn spawn_producer(hub: Arc<MixingHub>, id: SourceId, audio: AudioCodecInfo) -> JoinHandle<()> {
    tokio::spawn(async move {
        let n = id.as_u64();
        let luma = (40 + n * 60).min(235) as u8;
        let samples_per_frame = audio.samples_per_frame(Duration::from_millis(10));
        let period = (n * 8) as usize;
        let mut ticker = tokio::time::interval(Duration::from_millis(10));
        let mut step: u32 = 0;

        loop {
            ticker.tick().await;

            let samples = (0..samples_per_frame)
                .map(|i| if (i / period) % 2 == 0 { 2000 } else { -2000 })
                .collect();
            let pcm = AudioFrame::new(audio.sample_rate, audio.channels, samples)
                .into_buffer(step * samples_per_frame as u32);

            let delivered = hub.deliver_audio_data(pcm, id).and_then(|_| {
                if step % 3 == 0 {
                    let frame = VideoFrame::filled(160, 120, luma, 128, 128).into_buffer(step * 900);
                    hub.deliver_video_data(frame, id)?;
                }
                Ok(())
            });
            if let Err(e) = delivered {
                // Source was removed: stop producing
                tracing::info!(source = %id, error = %e, "Producer stopped");
                break;
            }
            step = step.wrapping_add(1);
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("mcu_mixer=info".parse()?),
        )
        .init();

    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&output_dir)?;
    let wav_path = output_dir.join("mix.wav");

    let config = MixerConfig::default();
    let audio = config.audio;
    let recorder = Arc::new(Recorder::create(&wav_path, audio)?);

    let hub = Arc::new(MixingHub::with_config(recorder.clone(), config));
    if let Some(e) = hub.init_error() {
        return Err(format!("hub not ready: {}", e).into());
    }

    let participants: Vec<Arc<Participant>> = (1..=PARTICIPANTS)
        .map(|n| Arc::new(Participant { id: SourceId::new(n) }))
        .collect();

    let mut producers = Vec::new();
    for participant in &participants {
        let slot = hub.add_source(participant.clone())?;
        tracing::info!(source = %participant.id, slot = slot, "Participant joined");
        producers.push(spawn_producer(Arc::clone(&hub), participant.id, audio));
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    let leaving = participants[1].id;
    let slot = hub.remove_source(leaving)?;
    tracing::info!(source = %leaving, slot = slot, "Participant left");
    hub.on_request_iframe()?;

    tokio::time::sleep(Duration::from_secs(1)).await;

    let stats = hub.stats();
    tracing::info!(
        sources = stats.sources,
        video_ticks = stats.video_ticks,
        audio_ticks = stats.audio_ticks,
        dropped = stats.total_dropped(),
        fps = stats.output_frame_rate(),
        "Hub statistics"
    );
    for slot in &stats.slots {
        tracing::info!(
            slot = slot.slot,
            video = slot.video_frames,
            audio = slot.audio_frames,
            repeated = slot.repeated_frames,
            "Slot statistics"
        );
    }

    for producer in producers {
        producer.abort();
        let _ = producer.await;
    }
    match Arc::try_unwrap(hub) {
        Ok(hub) => hub.shutdown().await?,
        Err(_) => tracing::warn!("Hub still shared, dropping without shutdown"),
    }
    recorder.finish()?;

    println!(
        "{} video packets ({} key frames), mixed audio written to {}",
        recorder.video_packets.load(Ordering::Relaxed),
        recorder.key_frames.load(Ordering::Relaxed),
        wav_path.display()
    );
    Ok(())
}
