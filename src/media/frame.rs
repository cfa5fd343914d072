//! Decoded frame views
//!
//! Inbound buffers carry decoded media: video as planar I420 (Y plane, then
//! quarter-size U and V planes), audio as interleaved little-endian i16 PCM.
//! The views here validate a buffer against its declared format and give the
//! compositor typed access to the samples.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::mixer::Region;

use super::buffer::{BufferInfo, MediaBuffer, MediaKind};

/// Luma value for black
const BLACK_Y: u8 = 16;
/// Neutral chroma value
const NEUTRAL_UV: u8 = 128;

/// Size in bytes of an I420 frame
pub fn i420_len(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    w * h + 2 * cw * ch
}

/// I420 plane selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    /// Luma
    Y,
    /// Blue-difference chroma
    U,
    /// Red-difference chroma
    V,
}

impl Plane {
    const ALL: [Plane; 3] = [Plane::Y, Plane::U, Plane::V];
}

/// Offset, width and height of a plane within an I420 frame
fn plane_layout(width: u32, height: u32, plane: Plane) -> (usize, usize, usize) {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    match plane {
        Plane::Y => (0, w, h),
        Plane::U => (w * h, cw, ch),
        Plane::V => (w * h + cw * ch, cw, ch),
    }
}

/// A decoded I420 video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    data: Bytes,
}

impl VideoFrame {
    /// Wrap I420 data, checking that the length matches the dimensions
    pub fn new(width: u32, height: u32, data: Bytes) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::Malformed(format!(
                "video frame has empty dimensions {width}x{height}"
            )));
        }
        let expected = i420_len(width, height);
        if data.len() != expected {
            return Err(Error::Malformed(format!(
                "I420 {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A frame filled with one YUV colour
    pub fn filled(width: u32, height: u32, y: u8, u: u8, v: u8) -> Self {
        let mut data = vec![0u8; i420_len(width, height)];
        for plane in Plane::ALL {
            let (offset, pw, ph) = plane_layout(width, height, plane);
            let value = match plane {
                Plane::Y => y,
                Plane::U => u,
                Plane::V => v,
            };
            data[offset..offset + pw * ph].fill(value);
        }
        Self {
            width,
            height,
            data: Bytes::from(data),
        }
    }

    /// A black frame
    pub fn blank(width: u32, height: u32) -> Self {
        Self::filled(width, height, BLACK_Y, NEUTRAL_UV, NEUTRAL_UV)
    }

    /// Parse a video buffer
    pub fn from_buffer(buffer: &MediaBuffer) -> Result<Self> {
        match (buffer.kind(), buffer.info()) {
            (MediaKind::Video, BufferInfo::Video { width, height }) => {
                Self::new(width, height, buffer.payload().clone())
            }
            _ => Err(Error::Malformed(format!(
                "{} is not a video buffer",
                buffer.id()
            ))),
        }
    }

    /// Wrap the frame in a media buffer
    pub fn into_buffer(self, timestamp: u32) -> MediaBuffer {
        MediaBuffer::video(self.data, self.width, self.height, timestamp)
    }

    /// Frame width
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw I420 bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Bytes of a single plane
    pub fn plane(&self, plane: Plane) -> &[u8] {
        let (offset, pw, ph) = plane_layout(self.width, self.height, plane);
        &self.data[offset..offset + pw * ph]
    }
}

/// Mutable I420 canvas the compositor draws into
#[derive(Debug)]
pub struct Canvas {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Canvas {
    /// A black canvas
    pub fn new(width: u32, height: u32) -> Self {
        let frame = VideoFrame::blank(width, height);
        Self {
            width,
            height,
            data: frame.data.to_vec(),
        }
    }

    /// Scale `frame` (nearest neighbour) into `region`.
    ///
    /// Regions must lie inside the canvas and have even origin and size so
    /// chroma planes stay aligned; parts outside the canvas are clipped.
    pub fn draw(&mut self, frame: &VideoFrame, region: Region) {
        for plane in Plane::ALL {
            let (dst_offset, dst_w, dst_h) = plane_layout(self.width, self.height, plane);
            let src = frame.plane(plane);
            let (_, src_w, src_h) = plane_layout(frame.width, frame.height, plane);

            let shift = usize::from(plane != Plane::Y);
            let rx = region.x as usize >> shift;
            let ry = region.y as usize >> shift;
            let rw = (region.width as usize >> shift).min(dst_w.saturating_sub(rx));
            let rh = (region.height as usize >> shift).min(dst_h.saturating_sub(ry));
            if rw == 0 || rh == 0 {
                continue;
            }

            for dy in 0..rh {
                let sy = dy * src_h / rh;
                let dst_row = dst_offset + (ry + dy) * dst_w + rx;
                let src_row = sy * src_w;
                for dx in 0..rw {
                    let sx = dx * src_w / rw;
                    self.data[dst_row + dx] = src[src_row + sx];
                }
            }
        }
    }

    /// Finish drawing and freeze the canvas into a frame
    pub fn into_frame(self) -> VideoFrame {
        VideoFrame {
            width: self.width,
            height: self.height,
            data: Bytes::from(self.data),
        }
    }
}

/// Interleaved 16-bit PCM audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    sample_rate: u32,
    channels: u16,
    samples: Vec<i16>,
}

impl AudioFrame {
    /// Create a frame from interleaved samples
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    /// A silent frame of `len` interleaved samples
    pub fn silence(sample_rate: u32, channels: u16, len: usize) -> Self {
        Self::new(sample_rate, channels, vec![0; len])
    }

    /// Parse an audio buffer (little-endian i16 payload)
    pub fn from_buffer(buffer: &MediaBuffer) -> Result<Self> {
        let (sample_rate, channels) = match (buffer.kind(), buffer.info()) {
            (
                MediaKind::Audio,
                BufferInfo::Audio {
                    sample_rate,
                    channels,
                },
            ) => (sample_rate, channels),
            _ => {
                return Err(Error::Malformed(format!(
                    "{} is not an audio buffer",
                    buffer.id()
                )))
            }
        };
        if channels == 0 || sample_rate == 0 {
            return Err(Error::Malformed(format!(
                "audio buffer declares {sample_rate} Hz x {channels} channels"
            )));
        }

        let payload = buffer.payload();
        if payload.len() % 2 != 0 {
            return Err(Error::Malformed(format!(
                "PCM payload has odd length {}",
                payload.len()
            )));
        }

        let samples = payload
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self::new(sample_rate, channels, samples))
    }

    /// Serialize as little-endian PCM
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            out.put_i16_le(*sample);
        }
        out.freeze()
    }

    /// Wrap the frame in a media buffer
    pub fn into_buffer(self, timestamp: u32) -> MediaBuffer {
        MediaBuffer::audio(self.to_bytes(), self.sample_rate, self.channels, timestamp)
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Whether every sample is zero
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|s| *s == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i420_len() {
        assert_eq!(i420_len(4, 4), 16 + 4 + 4);
        // Odd dimensions round chroma up
        assert_eq!(i420_len(3, 3), 9 + 4 + 4);
    }

    #[test]
    fn test_video_frame_length_check() {
        assert!(VideoFrame::new(4, 4, Bytes::from(vec![0u8; 24])).is_ok());
        assert!(matches!(
            VideoFrame::new(4, 4, Bytes::from(vec![0u8; 23])),
            Err(Error::Malformed(_))
        ));
        assert!(VideoFrame::new(0, 4, Bytes::new()).is_err());
    }

    #[test]
    fn test_filled_planes() {
        let frame = VideoFrame::filled(4, 2, 200, 10, 20);
        assert!(frame.plane(Plane::Y).iter().all(|b| *b == 200));
        assert!(frame.plane(Plane::U).iter().all(|b| *b == 10));
        assert!(frame.plane(Plane::V).iter().all(|b| *b == 20));
        assert_eq!(frame.plane(Plane::U).len(), 2);
    }

    #[test]
    fn test_from_buffer_rejects_audio() {
        let buf = MediaBuffer::audio(Bytes::from_static(&[0, 0]), 8000, 1, 0);
        assert!(VideoFrame::from_buffer(&buf).is_err());
    }

    #[test]
    fn test_canvas_draw_region() {
        let mut canvas = Canvas::new(8, 4);
        let red = VideoFrame::filled(2, 2, 80, 90, 240);
        canvas.draw(
            &red,
            Region {
                x: 4,
                y: 0,
                width: 4,
                height: 4,
            },
        );
        let out = canvas.into_frame();

        let y = out.plane(Plane::Y);
        // Left half untouched, right half painted
        assert_eq!(y[0], BLACK_Y);
        assert_eq!(y[3], BLACK_Y);
        assert_eq!(y[4], 80);
        assert_eq!(y[7], 80);
        assert_eq!(y[8 * 3 + 7], 80);

        let v = out.plane(Plane::V);
        // Chroma is 4x2: columns 2..4 painted
        assert_eq!(v[0], NEUTRAL_UV);
        assert_eq!(v[2], 240);
        assert_eq!(v[7], 240);
    }

    #[test]
    fn test_canvas_clips_oversized_region() {
        let mut canvas = Canvas::new(4, 4);
        let white = VideoFrame::filled(2, 2, 235, 128, 128);
        canvas.draw(
            &white,
            Region {
                x: 2,
                y: 2,
                width: 8,
                height: 8,
            },
        );
        let out = canvas.into_frame();
        assert_eq!(out.plane(Plane::Y)[15], 235);
        assert_eq!(out.plane(Plane::Y)[0], BLACK_Y);
    }

    #[test]
    fn test_audio_frame_from_buffer() {
        let frame = AudioFrame::new(8000, 1, vec![1, -2, 300]);
        let buf = frame.clone().into_buffer(160);
        assert_eq!(buf.len(), 6);

        let parsed = AudioFrame::from_buffer(&buf).unwrap();
        assert_eq!(parsed, frame);
        assert!(!parsed.is_silent());
    }

    #[test]
    fn test_audio_frame_odd_payload() {
        let buf = MediaBuffer::audio(Bytes::from_static(&[1, 2, 3]), 8000, 1, 0);
        assert!(matches!(
            AudioFrame::from_buffer(&buf),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn test_silence() {
        let frame = AudioFrame::silence(16000, 2, 320);
        assert!(frame.is_silent());
        assert_eq!(frame.samples().len(), 320);
    }
}
