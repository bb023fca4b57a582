// crates/retrovue-playout/src/pad.rs
//
// Pad synthesis: the black frames and silence the render loop emits to keep
// the channel's signal continuous when every other option has run out.
//
// Pad pts derivation is the one rule in this file that must not be
// "optimized": pad pts = now_utc − epoch_utc, never last_pts + period.
// Accumulating from last_pts drifts whenever CT and the wall clock diverge
// and jumps across segment switches. The loop in output.rs owns that
// computation; this module owns the payloads and the format lock constants.

use retrovue_core::{AudioFrame, VideoFrame, PAD_URI};

/// Canonical pad audio format, locked at channel start. The downstream
/// transport writes its program map once per session; emitting any other
/// rate or channel count after that would require a mid-stream remap that
/// receivers cannot reliably follow.
pub const PAD_SAMPLE_RATE: u32 = 48_000;
pub const PAD_CHANNELS: u16 = 2;

/// YUV420 black: luma at broadcast black level, chroma neutral.
const BLACK_Y: u8 = 16;
const NEUTRAL_UV: u8 = 128;

/// Why a pad frame was emitted. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadReason {
    /// The input lane was observed empty before the pop attempt.
    BufferTrulyEmpty,
    /// The pop failed for any other reason (e.g. no input buffer attached).
    Unknown,
}

/// Pad bookkeeping owned by the render thread.
///
/// Dimensions and duration are learned once, from the first real frame of
/// the channel session, and survive segment switches: pad frames must
/// match the session's picture geometry, not some segment's.
pub struct PadState {
    pub initialized: bool,
    pub width:       u32,
    pub height:      u32,
    pub duration_us: i64,
    /// True once the format lock engaged at channel start. Never cleared.
    pub audio_format_locked: bool,
    /// Fractional sample residue carried between pad audio frames so the
    /// cumulative sample count stays phase-accurate with video. At 30 fps
    /// a frame period is worth exactly 1600 samples; at 29.97 it is
    /// 1601.6, and dropping the .6 would drift audio 48 ms behind per hour.
    pub audio_sample_remainder: f64,
}

/// Fallback geometry if pads are required before any real frame taught us
/// the session's dimensions (only possible for content-less segments).
const FALLBACK_WIDTH: u32 = 640;
const FALLBACK_HEIGHT: u32 = 360;

impl PadState {
    pub fn new() -> Self {
        Self {
            initialized: false,
            width:       FALLBACK_WIDTH,
            height:      FALLBACK_HEIGHT,
            duration_us: crate::pacing::DEFAULT_FRAME_PERIOD_US,
            audio_format_locked:     false,
            audio_sample_remainder:  0.0,
        }
    }

    /// Latch pad geometry and duration from the session's first real frame.
    pub fn learn_from(&mut self, frame: &VideoFrame) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        self.width = frame.width;
        self.height = frame.height;
        let d = frame.duration_us();
        if d > 0 {
            self.duration_us = d;
        }
    }

    /// Synthesize a black frame at the given CT pts.
    pub fn black_frame(&self, pts: i64) -> VideoFrame {
        let mut f = VideoFrame::new(
            self.width,
            self.height,
            pts,
            self.duration_us as f64 / 1_000_000.0,
            PAD_URI,
        );
        f.has_ct = true;
        f.y_plane_mut().fill(BLACK_Y);
        f.u_plane_mut().fill(NEUTRAL_UV);
        f.v_plane_mut().fill(NEUTRAL_UV);
        f
    }

    /// Synthesize one video frame's worth of silence in the locked format.
    ///
    /// nb_samples = floor(rate · period / 1e6 + remainder); the fractional
    /// part carries into the next call.
    pub fn silence_frame(&mut self, pts: i64, frame_period_us: i64) -> AudioFrame {
        let exact = PAD_SAMPLE_RATE as f64 * frame_period_us as f64 / 1_000_000.0
            + self.audio_sample_remainder;
        let nb_samples = exact.floor() as usize;
        self.audio_sample_remainder = exact - nb_samples as f64;
        AudioFrame::silence(pts, PAD_SAMPLE_RATE, PAD_CHANNELS, nb_samples)
    }
}

impl Default for PadState {
    fn default() -> Self {
        Self::new()
    }
}
