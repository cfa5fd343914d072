//! PCM writer element
//!
//! Writes audio buffers arriving on its sink pad into a WAV container. The
//! header is written with a zero data size when the first bytes go out and
//! rewritten with the real sizes at finalize.
//!
//! Payloads are written byte for byte, so the input must already be in WAV
//! sample order: L16 expects raw little-endian PCM as produced by
//! `AudioFrame` (not the big-endian output of `PcmAudioEncoder`), and PCMU
//! expects the encoder's mu-law bytes.
//!
//! Incoming buffers are held (zero-copy) until `handle_process` flushes them
//! to the underlying stream, or until the upstream recycles them, which
//! flushes everything up to and including that buffer so byte order is kept.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::media::{AudioCodecId, AudioCodecInfo, BufferId, BufferInfo, MediaBuffer, MediaKind};

use super::element::{BufferMessage, Element, ElementConfig, PadOutput};

/// Byte offset of the RIFF chunk size field
const WAV_RIFF_SIZE_OFFSET: u64 = 4;

/// Byte offset of the data chunk size field
const WAV_DATA_SIZE_OFFSET: u64 = 40;

/// Size of the canonical WAV header
const WAV_HEADER_SIZE: u32 = 44;

/// Size of the fmt chunk body
const WAV_FMT_CHUNK_SIZE: u32 = 16;

/// WAVE format tag for linear PCM
const WAVE_FORMAT_PCM: u16 = 1;

/// WAVE format tag for G.711 mu-law
const WAVE_FORMAT_MULAW: u16 = 7;

/// RIFF and data chunk sizes for `data_size` payload bytes, saturated at
/// the 4 GiB limit of the 32-bit size fields
fn chunk_sizes(data_size: u64) -> (u32, u32) {
    let max_data = u32::MAX - (WAV_HEADER_SIZE - 8);
    let data = u32::try_from(data_size).unwrap_or(max_data).min(max_data);
    (WAV_HEADER_SIZE - 8 + data, data)
}

/// Writes PCM audio to a WAV stream
///
/// Place it before the encoder for L16 and after it for PCMU.
pub struct PcmWriter<W: Write + Seek + Send> {
    name: String,
    stream: Option<W>,
    codec: Option<AudioCodecInfo>,
    header_written: bool,
    data_size: u64,
    held: Vec<MediaBuffer>,
    finalized: bool,
}

impl PcmWriter<BufWriter<File>> {
    /// Create a writer backed by a new file
    pub fn create(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self::new(name, BufWriter::new(file)))
    }
}

impl<W: Write + Seek + Send> PcmWriter<W> {
    /// Create a writer over any seekable stream
    pub fn new(name: impl Into<String>, stream: W) -> Self {
        Self {
            name: name.into(),
            stream: Some(stream),
            codec: None,
            header_written: false,
            data_size: 0,
            held: Vec::new(),
            finalized: false,
        }
    }

    /// Payload bytes written to the stream so far
    pub fn bytes_written(&self) -> u64 {
        self.data_size
    }

    /// Number of buffers waiting to be written
    pub fn pending(&self) -> usize {
        self.held.len()
    }

    /// Finalize and give back the underlying stream
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        self.stream
            .take()
            .ok_or_else(|| Error::Pipeline(format!("'{}' has no stream", self.name)))
    }

    fn format_tag(codec: &AudioCodecInfo) -> u16 {
        match codec.codec {
            AudioCodecId::PcmMulaw8k => WAVE_FORMAT_MULAW,
            _ => WAVE_FORMAT_PCM,
        }
    }

    fn write_header(stream: &mut W, codec: &AudioCodecInfo, data_size: u32) -> std::io::Result<()> {
        let bytes_per_sample = codec.codec.bytes_per_sample().unwrap_or(2);
        let block_align = codec.channels * bytes_per_sample;
        let byte_rate = codec.sample_rate * u32::from(block_align);

        stream.write_all(b"RIFF")?;
        stream.write_all(&chunk_sizes(u64::from(data_size)).0.to_le_bytes())?;
        stream.write_all(b"WAVE")?;

        stream.write_all(b"fmt ")?;
        stream.write_all(&WAV_FMT_CHUNK_SIZE.to_le_bytes())?;
        stream.write_all(&Self::format_tag(codec).to_le_bytes())?;
        stream.write_all(&codec.channels.to_le_bytes())?;
        stream.write_all(&codec.sample_rate.to_le_bytes())?;
        stream.write_all(&byte_rate.to_le_bytes())?;
        stream.write_all(&block_align.to_le_bytes())?;
        stream.write_all(&(bytes_per_sample * 8).to_le_bytes())?;

        stream.write_all(b"data")?;
        stream.write_all(&data_size.to_le_bytes())?;
        Ok(())
    }

    /// Write the first `count` held buffers
    fn write_held(&mut self, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let codec = self
            .codec
            .ok_or_else(|| Error::configuration(self.name.clone(), "not initialized"))?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::Pipeline(format!("'{}' is already finalized", self.name)))?;

        if !self.header_written {
            Self::write_header(stream, &codec, 0)?;
            self.header_written = true;
        }
        for buffer in self.held.drain(..count) {
            stream.write_all(buffer.payload())?;
            self.data_size += buffer.len() as u64;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        if self.codec.is_none() {
            self.held.clear();
            return Ok(());
        }
        self.write_held(self.held.len())?;

        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        if self.header_written {
            let (riff_size, data_size) = chunk_sizes(self.data_size);
            stream.seek(SeekFrom::Start(WAV_RIFF_SIZE_OFFSET))?;
            stream.write_all(&riff_size.to_le_bytes())?;
            stream.seek(SeekFrom::Start(WAV_DATA_SIZE_OFFSET))?;
            stream.write_all(&data_size.to_le_bytes())?;
            stream.seek(SeekFrom::End(0))?;
        }
        stream.flush()?;

        tracing::info!(
            element = %self.name,
            bytes = self.data_size,
            "PCM writer finalized"
        );
        Ok(())
    }
}

impl<W: Write + Seek + Send> Element for PcmWriter<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn sink_pads(&self) -> &[&'static str] {
        &["sink"]
    }

    fn init(&mut self, config: &ElementConfig) -> Result<()> {
        let ElementConfig::Audio(codec) = config else {
            return Err(Error::configuration(self.name.clone(), "expects an audio stream"));
        };
        if codec.codec.bytes_per_sample().is_none() {
            return Err(Error::configuration(
                self.name.clone(),
                format!("cannot store {} as PCM", codec.codec.name()),
            ));
        }
        if codec.sample_rate == 0 || codec.channels == 0 {
            return Err(Error::configuration(
                self.name.clone(),
                format!("invalid format {} Hz x {} channels", codec.sample_rate, codec.channels),
            ));
        }
        self.codec = Some(*codec);
        Ok(())
    }

    fn process_chain(&mut self, _pad: &str, message: BufferMessage, _out: &mut PadOutput) -> Result<()> {
        let codec = self
            .codec
            .ok_or_else(|| Error::configuration(self.name.clone(), "not initialized"))?;
        if self.finalized {
            return Err(Error::Pipeline(format!("'{}' is already finalized", self.name)));
        }

        let buffer = message.buffer;
        if buffer.kind() != MediaKind::Audio {
            return Err(Error::Malformed(format!("'{}' only accepts audio", self.name)));
        }
        if let BufferInfo::Audio {
            sample_rate,
            channels,
        } = buffer.info()
        {
            if sample_rate != codec.sample_rate || channels != codec.channels {
                return Err(Error::Malformed(format!(
                    "'{}' expects {} Hz x {}, got {sample_rate} Hz x {channels}",
                    self.name, codec.sample_rate, codec.channels
                )));
            }
        }

        self.held.push(buffer);
        Ok(())
    }

    fn recycle(&mut self, buffer: BufferId) {
        let Some(position) = self.held.iter().position(|b| b.id() == buffer) else {
            return;
        };
        if let Err(e) = self.write_held(position + 1) {
            tracing::warn!(element = %self.name, error = %e, "Failed to flush recycled buffer");
            if let Some(position) = self.held.iter().position(|b| b.id() == buffer) {
                self.held.drain(..=position);
            }
        }
    }

    fn handle_process(&mut self) -> Result<()> {
        self.write_held(self.held.len())?;
        if let Some(stream) = self.stream.as_mut() {
            stream.flush()?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.finish()
    }
}

impl<W: Write + Seek + Send> Drop for PcmWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!(element = %self.name, error = %e, "PCM writer finalize on drop failed");
        }
    }
}
