// crates/retrovue-playout/src/stats.rs
//
// Output statistics. Written only by the render thread; read from anywhere.
// All counters are Relaxed atomics; readers are observational and may see
// a snapshot torn across fields, which is acceptable for dashboards and
// tests that poll for "at least N".

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct OutputStats {
    /// Every video frame routed (real + freeze + pad).
    pub video_frames:   AtomicU64,
    pub real_frames:    AtomicU64,
    pub freeze_frames:  AtomicU64,
    pub pad_frames:     AtomicU64,
    /// Every audio frame routed (producer + synthesized).
    pub audio_frames:     AtomicU64,
    pub pad_audio_frames: AtomicU64,
    /// Real frames whose CT had already passed when they reached the gate.
    pub pacing_late_events: AtomicU64,
    /// Closed probe windows that exceeded 2x the target rate (latched at 1).
    pub pacing_violations:  AtomicU64,
    /// Producer frames dropped for pts <= last emitted real pts.
    pub nonmonotonic_drops: AtomicU64,
    pub longest_freeze_streak: AtomicU64,
    /// Pts of the last routed video frame of any kind, for diagnostics.
    /// The authoritative last-real-frame pts lives in ProgramOutput.
    pub last_routed_pts: AtomicI64,
}

/// Plain copy of the counters at one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub video_frames:   u64,
    pub real_frames:    u64,
    pub freeze_frames:  u64,
    pub pad_frames:     u64,
    pub audio_frames:     u64,
    pub pad_audio_frames: u64,
    pub pacing_late_events: u64,
    pub pacing_violations:  u64,
    pub nonmonotonic_drops: u64,
    pub longest_freeze_streak: u64,
    pub last_routed_pts: i64,
}

impl OutputStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Raise `longest_freeze_streak` to `streak` if it is a new maximum.
    pub fn record_freeze_streak(&self, streak: u32) {
        self.longest_freeze_streak
            .fetch_max(streak as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            video_frames:   self.video_frames.load(Ordering::Relaxed),
            real_frames:    self.real_frames.load(Ordering::Relaxed),
            freeze_frames:  self.freeze_frames.load(Ordering::Relaxed),
            pad_frames:     self.pad_frames.load(Ordering::Relaxed),
            audio_frames:     self.audio_frames.load(Ordering::Relaxed),
            pad_audio_frames: self.pad_audio_frames.load(Ordering::Relaxed),
            pacing_late_events: self.pacing_late_events.load(Ordering::Relaxed),
            pacing_violations:  self.pacing_violations.load(Ordering::Relaxed),
            nonmonotonic_drops: self.nonmonotonic_drops.load(Ordering::Relaxed),
            longest_freeze_streak: self.longest_freeze_streak.load(Ordering::Relaxed),
            last_routed_pts: self.last_routed_pts.load(Ordering::Relaxed),
        }
    }
}
