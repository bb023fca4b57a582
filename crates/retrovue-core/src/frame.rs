// crates/retrovue-core/src/frame.rs
//
// Frame value types that flow from producers through the ring buffer to the
// output sink. No clocks, no threads, just owned data.
//
// Layout convention for VideoFrame pixel buffers (packed YUV420P):
//   [0 .. w*h]                       Y plane, stride = w
//   [w*h .. w*h + (w/2)*(h/2)]       U plane, stride = w/2
//   [w*h + (w/2)*(h/2) .. end]       V plane, stride = w/2
//
// "Packed" means strides carry no padding: each row is exactly w (or w/2)
// bytes. Producers that decode from containers with padded rows must strip
// the padding before pushing.

/// Reserved asset URI carried by synthesized black frames.
pub const PAD_URI: &str = "pad://black";

/// One decoded video frame in packed YUV420P.
///
/// Ownership is a single-writer → single-reader hand-off: the producer
/// allocates it, the ring buffer moves it, the render loop consumes it once
/// and routes it to the sink.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width:     u32,
    pub height:    u32,
    /// Presentation time, microseconds in CT (channel continuity time).
    pub pts:       i64,
    /// Decode time, microseconds. Equal to pts for all in-core frames;
    /// producers deliver frames in presentation order.
    pub dts:       i64,
    /// Nominal display duration in seconds (1/fps for constant-rate sources).
    pub duration:  f64,
    /// Origin of the frame's pixels. `pad://black` marks a pad frame.
    pub asset_uri: String,
    /// True for any frame whose pts is on the channel's CT timeline.
    pub has_ct:    bool,
    pub data:      Vec<u8>,
}

impl VideoFrame {
    /// Allocate a zeroed frame. `width` and `height` must be even; YUV420
    /// subsamples chroma 2x2, so odd dimensions have no valid plane split.
    pub fn new(width: u32, height: u32, pts: i64, duration: f64, asset_uri: impl Into<String>) -> Self {
        debug_assert!(width % 2 == 0 && height % 2 == 0,
            "VideoFrame::new: dimensions must be even for YUV420: {width}x{height}");
        let data = vec![0u8; Self::buffer_len(width, height)];
        Self {
            width,
            height,
            pts,
            dts: pts,
            duration,
            asset_uri: asset_uri.into(),
            has_ct: false,
            data,
        }
    }

    /// Total byte length of a packed YUV420P buffer at the given dimensions.
    pub fn buffer_len(width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        w * h + 2 * ((w / 2) * (h / 2))
    }

    /// Frame duration in whole microseconds.
    pub fn duration_us(&self) -> i64 {
        (self.duration * 1_000_000.0).round() as i64
    }

    pub fn is_pad(&self) -> bool {
        self.asset_uri == PAD_URI
    }

    fn y_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn uv_len(&self) -> usize {
        (self.width as usize / 2) * (self.height as usize / 2)
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.y_len()]
    }

    pub fn u_plane(&self) -> &[u8] {
        let y = self.y_len();
        &self.data[y..y + self.uv_len()]
    }

    pub fn v_plane(&self) -> &[u8] {
        let start = self.y_len() + self.uv_len();
        &self.data[start..start + self.uv_len()]
    }

    pub fn y_plane_mut(&mut self) -> &mut [u8] {
        let y = self.y_len();
        &mut self.data[..y]
    }

    pub fn u_plane_mut(&mut self) -> &mut [u8] {
        let (y, uv) = (self.y_len(), self.uv_len());
        &mut self.data[y..y + uv]
    }

    pub fn v_plane_mut(&mut self) -> &mut [u8] {
        let (y, uv) = (self.y_len(), self.uv_len());
        &mut self.data[y + uv..y + 2 * uv]
    }
}

/// One audio frame of interleaved signed 16-bit little-endian PCM.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Presentation time, microseconds in CT.
    pub pts:         i64,
    pub sample_rate: u32,
    pub channels:    u16,
    /// Samples per channel. `data.len()` = nb_samples · channels · 2.
    pub nb_samples:  usize,
    pub data:        Vec<u8>,
}

impl AudioFrame {
    /// Zero-filled (digital silence) frame in the given format.
    pub fn silence(pts: i64, sample_rate: u32, channels: u16, nb_samples: usize) -> Self {
        Self {
            pts,
            sample_rate,
            channels,
            nb_samples,
            data: vec![0u8; nb_samples * channels as usize * 2],
        }
    }

    /// Build a frame from interleaved i16 samples.
    pub fn from_samples(pts: i64, sample_rate: u32, channels: u16, samples: &[i16]) -> Self {
        debug_assert_eq!(samples.len() % channels as usize, 0,
            "AudioFrame::from_samples: trailing partial frame");
        let mut data = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        Self {
            pts,
            sample_rate,
            channels,
            nb_samples: samples.len() / channels as usize,
            data,
        }
    }

    /// Playback duration in whole microseconds.
    pub fn duration_us(&self) -> i64 {
        (self.nb_samples as i64 * 1_000_000) / self.sample_rate as i64
    }
}
