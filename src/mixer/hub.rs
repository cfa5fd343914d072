//! Mixing hub
//!
//! The registry of active sources and the router for everything flowing
//! through the mixer. Structural changes (`add_source`, `remove_source`)
//! take the slot table's write lock and only touch indices and pointers;
//! deliveries take the read lock just long enough to clone the source's
//! sink adapter, then write into the buffer manager without holding it.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::media::{AudioEncoder, MediaBuffer, PcmAudioEncoder, RawVideoEncoder, VideoEncoder};
use crate::stats::HubStats;

use super::buffer_manager::BufferManager;
use super::compositor::{AudioTick, CompositionReport, OutputProcessor, VideoTick};
use super::config::{MixerConfig, AUDIO_FRAME};
use super::sink::SinkAdapter;
use super::slot::SlotTable;
use super::source::{
    DeliveryStatus, FeedbackSink, MediaSink, MediaSource, OutputReceiver, SourceId,
};
use super::task_runner::TaskRunner;

struct Registration {
    source: Weak<dyn MediaSource>,
    sink: Arc<SinkAdapter>,
}

struct FeedbackRoute {
    /// Source that offered the consumer, `None` if set explicitly
    owner: Option<SourceId>,
    sink: Arc<dyn FeedbackSink>,
}

#[derive(Default)]
struct Registry {
    slots: SlotTable,
    sources: HashMap<SourceId, Registration>,
    feedback: Option<FeedbackRoute>,
}

/// Collaborators of an operational hub
struct Core {
    registry: RwLock<Registry>,
    buffers: Arc<BufferManager>,
    output: Arc<OutputProcessor>,
    runner: TaskRunner,
}

impl Core {
    fn start(
        config: &MixerConfig,
        receiver: Arc<dyn OutputReceiver>,
        video_encoder: Box<dyn VideoEncoder>,
        audio_encoder: Box<dyn AudioEncoder>,
    ) -> Result<Self> {
        config.validate()?;

        let runner = TaskRunner::start()?;
        let buffers = Arc::new(BufferManager::new(config.buffer)?);
        let output = Arc::new(OutputProcessor::new(
            config,
            Arc::clone(&buffers),
            receiver,
            video_encoder,
            audio_encoder,
        )?);

        if config.autostart {
            let cadence = config
                .composition_interval()
                .ok_or_else(|| Error::configuration("mixer", "frame rate must be positive"))?;
            runner.schedule(cadence, Arc::new(VideoTick(Arc::clone(&output))))?;
            runner.schedule(AUDIO_FRAME, Arc::new(AudioTick(Arc::clone(&output))))?;
        }

        Ok(Self {
            registry: RwLock::new(Registry::default()),
            buffers,
            output,
            runner,
        })
    }

    /// Close every sink adapter and forget all sources
    fn close_sources(&self) -> usize {
        let mut registry = self.registry.write();
        let closed = registry.sources.len();
        for (_, registration) in registry.sources.drain() {
            registration.sink.close();
        }
        registry.feedback = None;
        closed
    }
}

/// The mixing core: source registry, delivery router and composition driver
///
/// Must be constructed inside a tokio runtime. Construction never fails
/// outright; a hub whose collaborators could not start reports
/// [`is_ready`](Self::is_ready) `false` and refuses every operation with
/// [`Error::NotReady`].
pub struct MixingHub {
    config: MixerConfig,
    core: Option<Core>,
    init_error: Option<String>,
    started_at: Instant,
}

impl MixingHub {
    /// Create a hub with default configuration
    pub fn new(receiver: Arc<dyn OutputReceiver>) -> Self {
        Self::with_config(receiver, MixerConfig::default())
    }

    /// Create a hub using the built-in raw video and PCM audio encoders
    pub fn with_config(receiver: Arc<dyn OutputReceiver>, config: MixerConfig) -> Self {
        Self::with_encoders(
            receiver,
            config,
            Box::new(RawVideoEncoder::new()),
            Box::new(PcmAudioEncoder::new()),
        )
    }

    /// Create a hub with caller-supplied encoders
    pub fn with_encoders(
        receiver: Arc<dyn OutputReceiver>,
        config: MixerConfig,
        video_encoder: Box<dyn VideoEncoder>,
        audio_encoder: Box<dyn AudioEncoder>,
    ) -> Self {
        let started_at = Instant::now();

        match Core::start(&config, receiver, video_encoder, audio_encoder) {
            Ok(core) => {
                tracing::info!(
                    ssrc = config.ssrc,
                    width = config.video.width,
                    height = config.video.height,
                    frame_rate = config.video.frame_rate,
                    autostart = config.autostart,
                    "Mixing hub ready"
                );
                Self {
                    config,
                    core: Some(core),
                    init_error: None,
                    started_at,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Mixing hub failed to initialize");
                Self {
                    config,
                    core: None,
                    init_error: Some(e.to_string()),
                    started_at,
                }
            }
        }
    }

    /// Whether all collaborators started
    pub fn is_ready(&self) -> bool {
        self.core.is_some()
    }

    /// Why the hub is not ready
    pub fn init_error(&self) -> Option<&str> {
        self.init_error.as_deref()
    }

    /// Hub configuration
    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    fn core(&self) -> Result<&Core> {
        self.core.as_ref().ok_or_else(|| {
            Error::NotReady(
                self.init_error
                    .clone()
                    .unwrap_or_else(|| "hub is shut down".to_string()),
            )
        })
    }

    /// Register a source in the lowest free slot
    pub fn add_source(&self, source: Arc<dyn MediaSource>) -> Result<usize> {
        self.add_source_with_voice_channel(source, None)
    }

    /// Register a source whose audio is synchronised with a voice-engine channel
    pub fn add_source_with_voice_channel(
        &self,
        source: Arc<dyn MediaSource>,
        voice_channel: Option<i32>,
    ) -> Result<usize> {
        let core = self.core()?;
        let id = source.id();
        let feedback = source.feedback_sink();

        let mut registry = core.registry.write();
        if registry.sources.contains_key(&id) {
            return Err(Error::SourceAlreadyRegistered(id));
        }
        let max = self.config.max_sources;
        if max > 0 && registry.slots.len() >= max {
            return Err(Error::Allocation(format!("source limit of {} reached", max)));
        }

        let handle = registry.slots.assign(id)?;
        core.buffers.activate(handle);
        let sink = Arc::new(SinkAdapter::new(
            id,
            handle,
            voice_channel,
            Arc::clone(&core.buffers),
        ));
        registry.sources.insert(
            id,
            Registration {
                source: Arc::downgrade(&source),
                sink,
            },
        );

        let mut feedback_route = false;
        if registry.feedback.is_none() {
            if let Some(sink) = feedback {
                registry.feedback = Some(FeedbackRoute {
                    owner: Some(id),
                    sink,
                });
                feedback_route = true;
            }
        }
        let sources = registry.slots.len();
        drop(registry);

        tracing::info!(
            source = %id,
            slot = handle.slot,
            voice_channel = ?voice_channel,
            feedback_route = feedback_route,
            sources = sources,
            "Source added"
        );
        Ok(handle.slot)
    }

    /// Unregister a source and free its slot.
    ///
    /// A transport thread still holding the source's sink adapter keeps it
    /// alive; its deliveries are dropped from now on.
    pub fn remove_source(&self, source: SourceId) -> Result<usize> {
        let core = self.core()?;

        let mut registry = core.registry.write();
        let handle = match registry.slots.release(source) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::debug!(source = %source, "Remove of unregistered source");
                return Err(e);
            }
        };
        let registration = registry.sources.remove(&source);
        let owned_route = registry
            .feedback
            .as_ref()
            .is_some_and(|route| route.owner == Some(source));
        if owned_route {
            registry.feedback = None;
        }
        drop(registry);

        if let Some(registration) = registration {
            registration.sink.close();
        }
        let discarded = core.buffers.deactivate(handle);

        tracing::info!(
            source = %source,
            slot = handle.slot,
            discarded = discarded,
            feedback_route_cleared = owned_route,
            "Source removed"
        );
        Ok(handle.slot)
    }

    /// Shared sink adapter of a registered source
    pub fn sink_for(&self, source: SourceId) -> Result<Arc<SinkAdapter>> {
        let core = self.core()?;
        let registry = core.registry.read();
        match registry.sources.get(&source) {
            Some(registration) => Ok(Arc::clone(&registration.sink)),
            None => {
                tracing::debug!(source = %source, "Delivery for unknown source");
                Err(Error::UnknownSource(source))
            }
        }
    }

    /// Route a decoded audio frame into the source's slot
    pub fn deliver_audio_data(&self, buffer: MediaBuffer, source: SourceId) -> Result<DeliveryStatus> {
        let sink = self.sink_for(source)?;
        Ok(sink.deliver_audio(buffer))
    }

    /// Route a decoded video frame into the source's slot
    pub fn deliver_video_data(&self, buffer: MediaBuffer, source: SourceId) -> Result<DeliveryStatus> {
        let sink = self.sink_for(source)?;
        Ok(sink.deliver_video(buffer))
    }

    /// Forward feedback to the registered consumer; a no-op without one
    pub fn deliver_feedback(&self, payload: Bytes) -> Result<()> {
        let core = self.core()?;
        let route = core
            .registry
            .read()
            .feedback
            .as_ref()
            .map(|route| Arc::clone(&route.sink));

        match route {
            Some(sink) => sink.deliver_feedback(payload),
            None => tracing::trace!(len = payload.len(), "No feedback consumer, discarding"),
        }
        Ok(())
    }

    /// Replace the feedback route, or clear it with `None`
    pub fn set_feedback_sink(&self, sink: Option<Arc<dyn FeedbackSink>>) -> Result<()> {
        let core = self.core()?;
        core.registry.write().feedback = sink.map(|sink| FeedbackRoute { owner: None, sink });
        Ok(())
    }

    /// Whether feedback currently has somewhere to go
    pub fn has_feedback_route(&self) -> bool {
        self.core
            .as_ref()
            .is_some_and(|core| core.registry.read().feedback.is_some())
    }

    /// Ask every source for a key frame and force the next composite to be one
    pub fn on_request_iframe(&self) -> Result<()> {
        let core = self.core()?;
        core.output.request_key_frame();

        let sources: Vec<Arc<dyn MediaSource>> = core
            .registry
            .read()
            .sources
            .values()
            .filter_map(|registration| registration.source.upgrade())
            .collect();
        for source in &sources {
            source.request_key_frame();
        }

        tracing::debug!(sources = sources.len(), "Key frame requested");
        Ok(())
    }

    /// Stream identifier of the composited output
    pub fn send_ssrc(&self) -> u32 {
        self.config.ssrc
    }

    /// Slot of a registered source
    pub fn slot_of(&self, source: SourceId) -> Option<usize> {
        self.core.as_ref()?.registry.read().slots.slot_of(source)
    }

    /// Source occupying `slot`.
    ///
    /// Fails with [`Error::UnknownSlot`] for a free or never-assigned slot.
    pub fn source_in_slot(&self, slot: usize) -> Result<SourceId> {
        self.core()?
            .registry
            .read()
            .slots
            .source_at(slot)
            .ok_or(Error::UnknownSlot(slot))
    }

    /// Occupied slots, ascending
    pub fn active_slots(&self) -> Vec<usize> {
        self.core
            .as_ref()
            .map(|core| core.registry.read().slots.occupied())
            .unwrap_or_default()
    }

    /// Number of registered sources
    pub fn source_count(&self) -> usize {
        self.core
            .as_ref()
            .map(|core| core.registry.read().slots.len())
            .unwrap_or(0)
    }

    /// Run one composition tick now, outside the task runner's cadence
    pub fn run_composition_tick(&self) -> Result<CompositionReport> {
        self.core()?.output.run_tick()
    }

    /// Snapshot of hub statistics
    pub fn stats(&self) -> HubStats {
        let uptime = self.started_at.elapsed();
        let Some(core) = self.core.as_ref() else {
            return HubStats {
                uptime,
                ..Default::default()
            };
        };

        let occupied: Vec<(usize, Option<SourceId>)> = {
            let registry = core.registry.read();
            registry
                .slots
                .occupied()
                .into_iter()
                .map(|slot| (slot, registry.slots.source_at(slot)))
                .collect()
        };
        let slots = occupied
            .into_iter()
            .filter_map(|(slot, source)| {
                let mut stats = core.buffers.slot_stats(slot)?;
                stats.source = source;
                Some(stats)
            })
            .collect::<Vec<_>>();

        HubStats {
            ready: true,
            sources: slots.len(),
            slots,
            video_ticks: core.output.video_ticks(),
            audio_ticks: core.output.audio_ticks(),
            video_packets: core.output.video_packets(),
            audio_packets: core.output.audio_packets(),
            uptime,
        }
    }

    /// Tear down: close all sink adapters, drain the task runner, then
    /// finalize the output pipelines.
    ///
    /// This is the only teardown that waits for in-flight ticks to finish
    /// before finalizing; dropping the hub without it is best effort.
    pub async fn shutdown(mut self) -> Result<()> {
        let Some(core) = self.core.take() else {
            return Ok(());
        };

        let closed = core.close_sources();
        core.runner.shutdown().await;
        let result = core.output.finalize();

        tracing::info!(closed_sources = closed, "Mixing hub shut down");
        result
    }
}

/// Best-effort fallback for hubs not passed to [`MixingHub::shutdown`].
///
/// Tasks are aborted but not awaited, so a tick already running on another
/// worker may still push into the finalized pipelines; that push fails and is
/// logged.
impl Drop for MixingHub {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            core.close_sources();
            let Core { runner, output, .. } = core;
            // Aborts outstanding ticks
            drop(runner);
            if let Err(e) = output.finalize() {
                tracing::warn!(error = %e, "Output finalize failed during drop");
            }
        }
    }
}

impl std::fmt::Debug for MixingHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixingHub")
            .field("ready", &self.is_ready())
            .field("ssrc", &self.config.ssrc)
            .field("sources", &self.source_count())
            .field("init_error", &self.init_error)
            .finish()
    }
}
