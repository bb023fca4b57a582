// crates/retrovue-playout/src/producer.rs
//
// Producer harness: the dedicated thread that fills a FrameRingBuffer from
// a FrameSource. The render loop never sees any of this; to the engine a
// producer is only "the thing filling my current input buffer", behind the
// ring buffer's message-passing boundary.
//
// File decoders live upstream and are not part of this crate; BarsSource
// and SlateSource cover channel sign-on, slates, and the test suite.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{debug, info, warn};
use uuid::Uuid;

use retrovue_core::{AudioFrame, FrameRingBuffer, VideoFrame};

use crate::pad::{PAD_CHANNELS, PAD_SAMPLE_RATE};

/// Backoff while the ring buffer is full. The buffer's bounded capacity is
/// the rate limiter; this only keeps the retry loop off the lock.
const FULL_BUFFER_BACKOFF: Duration = Duration::from_millis(2);

// ── Source contract ───────────────────────────────────────────────────────────

/// One tick's worth of content. Sources are pulled by the producer thread;
/// they never touch the ring buffer themselves.
pub trait FrameSource: Send {
    /// Nominal frame duration in microseconds (constant per source).
    fn frame_duration_us(&self) -> i64;

    /// Produce the frame presented at `pts`, or None when the asset ends.
    /// Returned frames carry their pixel data only; the producer thread
    /// stamps pts/dts/has_ct so CT assignment stays in one place.
    fn next_video(&mut self, pts: i64) -> Option<VideoFrame>;

    /// Audio matching the video tick at `pts`, `nb_samples` per channel in
    /// the canonical format, or None for video-only sources.
    fn next_audio(&mut self, pts: i64, nb_samples: usize) -> Option<AudioFrame>;
}

// ── Producer thread ───────────────────────────────────────────────────────────

enum ProducerCmd {
    Pause,
    Resume,
    Stop,
}

/// Handle to a running producer thread. Dropping the handle stops and
/// joins the thread.
pub struct Producer {
    id:     Uuid,
    cmd_tx: Sender<ProducerCmd>,
    stop:   Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Producer {
    /// Spawn a thread that pulls `source` and fills `buffer`, stamping
    /// video pts contiguously from `start_pts`. The thread runs ahead of
    /// real time until the buffer's capacity backpressures it.
    pub fn spawn(
        source:    Box<dyn FrameSource>,
        buffer:    Arc<FrameRingBuffer>,
        start_pts: i64,
    ) -> Self {
        let id = Uuid::new_v4();
        let (cmd_tx, cmd_rx) = bounded::<ProducerCmd>(4);
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let handle =
            thread::spawn(move || pump(source, buffer, start_pts, cmd_rx, thread_stop, id));

        info!("[producer] {id} spawned, start_pts={start_pts}");
        Self { id, cmd_tx, stop, handle: Some(handle) }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Suspend generation. Queued frames stay in the buffer; the render
    /// loop drains them and then starves; this is how the test suite
    /// provokes freeze and pad behavior deterministically.
    pub fn pause(&self) {
        let _ = self.cmd_tx.try_send(ProducerCmd::Pause);
    }

    pub fn resume(&self) {
        let _ = self.cmd_tx.try_send(ProducerCmd::Resume);
    }

    /// Stop and join. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.cmd_tx.try_send(ProducerCmd::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!("[producer] {} joined", self.id);
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump(
    mut source: Box<dyn FrameSource>,
    buffer:     Arc<FrameRingBuffer>,
    start_pts:  i64,
    cmd_rx:     Receiver<ProducerCmd>,
    stop:       Arc<AtomicBool>,
    id:         Uuid,
) {
    let period_us = source.frame_duration_us();
    if period_us <= 0 {
        warn!("[producer] {id} source reports non-positive frame duration, aborting");
        return;
    }

    let mut pts = start_pts;
    let mut paused = false;
    let mut audio_remainder = 0.0f64;

    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        match cmd_rx.try_recv() {
            Ok(ProducerCmd::Pause) => paused = true,
            Ok(ProducerCmd::Resume) => paused = false,
            Ok(ProducerCmd::Stop) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => {}
        }
        if paused {
            thread::sleep(FULL_BUFFER_BACKOFF);
            continue;
        }

        let Some(mut video) = source.next_video(pts) else {
            info!("[producer] {id} source ended at pts={pts}");
            return;
        };
        video.pts = pts;
        video.dts = pts;
        video.has_ct = true;
        video.duration = period_us as f64 / 1_000_000.0;

        // Same residue scheme as pad silence: fractional samples carry so
        // audio stays phase-locked to the video tick count.
        let exact = PAD_SAMPLE_RATE as f64 * period_us as f64 / 1_000_000.0 + audio_remainder;
        let nb_samples = exact.floor() as usize;
        audio_remainder = exact - nb_samples as f64;
        let audio = source.next_audio(pts, nb_samples).map(|mut af| {
            af.pts = pts;
            af
        });

        if !push_with_backoff(&buffer, Lane::Video(video), &stop) {
            return;
        }
        if let Some(af) = audio {
            if !push_with_backoff(&buffer, Lane::Audio(af), &stop) {
                return;
            }
        }

        pts += period_us;
    }
}

enum Lane {
    Video(VideoFrame),
    Audio(AudioFrame),
}

/// Push one frame, backing off while the lane is full. False when the stop
/// flag ended the wait.
fn push_with_backoff(buffer: &FrameRingBuffer, frame: Lane, stop: &AtomicBool) -> bool {
    let mut slot = Some(frame);
    while let Some(frame) = slot.take() {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let rejected = match frame {
            Lane::Video(f) => buffer.try_push_video(f).err().map(Lane::Video),
            Lane::Audio(f) => buffer.try_push_audio(f).err().map(Lane::Audio),
        };
        if let Some(back) = rejected {
            slot = Some(back);
            thread::sleep(FULL_BUFFER_BACKOFF);
        }
    }
    true
}

// ── Built-in sources ──────────────────────────────────────────────────────────

/// 75 % color bars with a sweeping white column and a 1 kHz stereo tone.
/// The bread-and-butter sign-on source: every lane of the pipeline gets
/// exercised (moving luma, static chroma, continuous audio).
pub struct BarsSource {
    width:       u32,
    height:      u32,
    period_us:   i64,
    frame_index: u64,
    tone_phase:  f64,
}

/// BT.601 75 % bar values, left to right: white, yellow, cyan, green,
/// magenta, red, blue, black.
const BAR_YUV: [(u8, u8, u8); 8] = [
    (180, 128, 128),
    (162, 44, 142),
    (131, 156, 44),
    (112, 72, 58),
    (84, 184, 198),
    (65, 100, 212),
    (35, 212, 114),
    (16, 128, 128),
];

const TONE_HZ: f64 = 1_000.0;
const TONE_AMPLITUDE: f64 = 0.25;

impl BarsSource {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            period_us: (1_000_000.0 / fps).round() as i64,
            frame_index: 0,
            tone_phase: 0.0,
        }
    }
}

impl FrameSource for BarsSource {
    fn frame_duration_us(&self) -> i64 {
        self.period_us
    }

    fn next_video(&mut self, _pts: i64) -> Option<VideoFrame> {
        let mut f = VideoFrame::new(
            self.width,
            self.height,
            0,
            self.period_us as f64 / 1_000_000.0,
            "gen://bars",
        );
        let (w, h) = (self.width as usize, self.height as usize);
        let bar_w = (w / BAR_YUV.len()).max(1);

        {
            let y = f.y_plane_mut();
            for col in 0..w {
                let (luma, _, _) = BAR_YUV[(col / bar_w).min(BAR_YUV.len() - 1)];
                for row in 0..h {
                    y[row * w + col] = luma;
                }
            }
        }
        let (uv_w, uv_h) = (w / 2, h / 2);
        {
            let u = f.u_plane_mut();
            for col in 0..uv_w {
                let (_, cb, _) = BAR_YUV[((col * 2) / bar_w).min(BAR_YUV.len() - 1)];
                for row in 0..uv_h {
                    u[row * uv_w + col] = cb;
                }
            }
        }
        {
            let v = f.v_plane_mut();
            for col in 0..uv_w {
                let (_, _, cr) = BAR_YUV[((col * 2) / bar_w).min(BAR_YUV.len() - 1)];
                for row in 0..uv_h {
                    v[row * uv_w + col] = cr;
                }
            }
        }

        // Sweeping white column so downstream monitors show motion.
        let sweep = ((self.frame_index as usize) * 2) % w;
        let y = f.y_plane_mut();
        for row in 0..h {
            y[row * w + sweep] = 235;
        }

        self.frame_index += 1;
        Some(f)
    }

    fn next_audio(&mut self, _pts: i64, nb_samples: usize) -> Option<AudioFrame> {
        let mut samples = Vec::with_capacity(nb_samples * PAD_CHANNELS as usize);
        let step = TONE_HZ / PAD_SAMPLE_RATE as f64;
        for _ in 0..nb_samples {
            let s = (self.tone_phase * std::f64::consts::TAU).sin() * TONE_AMPLITUDE;
            let s = (s * i16::MAX as f64) as i16;
            samples.push(s); // L
            samples.push(s); // R
            self.tone_phase = (self.tone_phase + step) % 1.0;
        }
        Some(AudioFrame::from_samples(0, PAD_SAMPLE_RATE, PAD_CHANNELS, &samples))
    }
}

/// Solid-color slate, video only. Audio silence for slates comes from the
/// pad path once the engine starves the audio lane.
pub struct SlateSource {
    width:     u32,
    height:    u32,
    period_us: i64,
    yuv:       (u8, u8, u8),
    /// Frames remaining, or None for an unbounded slate.
    remaining: Option<u64>,
}

impl SlateSource {
    pub fn new(width: u32, height: u32, fps: f64, yuv: (u8, u8, u8)) -> Self {
        Self {
            width,
            height,
            period_us: (1_000_000.0 / fps).round() as i64,
            yuv,
            remaining: None,
        }
    }

    /// Limit the slate to `frames` frames; the source then reports EOF.
    pub fn take_frames(mut self, frames: u64) -> Self {
        self.remaining = Some(frames);
        self
    }
}

impl FrameSource for SlateSource {
    fn frame_duration_us(&self) -> i64 {
        self.period_us
    }

    fn next_video(&mut self, _pts: i64) -> Option<VideoFrame> {
        if let Some(remaining) = &mut self.remaining {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        let mut f = VideoFrame::new(
            self.width,
            self.height,
            0,
            self.period_us as f64 / 1_000_000.0,
            "gen://slate",
        );
        f.y_plane_mut().fill(self.yuv.0);
        f.u_plane_mut().fill(self.yuv.1);
        f.v_plane_mut().fill(self.yuv.2);
        Some(f)
    }

    fn next_audio(&mut self, _pts: i64, _nb_samples: usize) -> Option<AudioFrame> {
        None
    }
}
