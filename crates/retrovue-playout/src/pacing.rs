// crates/retrovue-playout/src/pacing.rs
//
// Frame-period pacing for the render loop: the per-iteration cadence state,
// the two-phase deadline waits, and the fast-emission diagnostic probe.
//
// Wait strategy (used for both the pacing gate and the CT gate): coarse
// thread::sleep while more than ~1 ms remains (OS sleep granularity), then
// yield to the scheduler until within 200 µs, then spin. Every phase polls
// the stop flag so shutdown latency stays under one frame period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::warn;
use retrovue_core::VideoFrame;

/// Default inter-frame interval until the first real frame teaches us the
/// channel's actual rate: 33_333 µs ≈ 30 fps.
pub const DEFAULT_FRAME_PERIOD_US: i64 = 33_333;

/// How long starvation is bridged by re-emitting the last real frame
/// before the loop falls back to pad frames.
pub const FREEZE_WINDOW_US: i64 = 250_000;

/// Stop spinning and hand the wait back to the caller when within this
/// margin of the target. The emission fudge allowance is 500 µs; arriving
/// up to 200 µs early stays well inside it.
const SPIN_MARGIN_US: i64 = 200;

/// Above this remainder we trust thread::sleep; below it we yield-spin.
const SLEEP_FLOOR_US: i64 = 1_000;

// ── Cadence state ─────────────────────────────────────────────────────────────

/// Pacing bookkeeping owned exclusively by the render thread.
///
/// Survives segment switches and pipeline resets: resetting the cadence on
/// a switch would emit one frame at the wrong interval and break the
/// downstream mux timing.
pub struct PacingState {
    /// Wall time of the last emitted video frame; 0 = nothing emitted yet.
    pub last_emission_us: i64,
    pub frame_period_us:  i64,
    pub in_freeze_mode:   bool,
    pub freeze_start_us:  i64,
    /// Consecutive freeze re-emissions in the current starvation event.
    pub freeze_streak:    u32,
    /// Cached last real frame, re-emitted while frozen.
    pub last_emitted_frame: Option<VideoFrame>,
}

impl PacingState {
    pub fn new() -> Self {
        Self {
            last_emission_us:   0,
            frame_period_us:    DEFAULT_FRAME_PERIOD_US,
            in_freeze_mode:     false,
            freeze_start_us:    0,
            freeze_streak:      0,
            last_emitted_frame: None,
        }
    }

    pub fn enter_freeze(&mut self, now_us: i64) {
        self.in_freeze_mode = true;
        self.freeze_start_us = now_us;
        self.freeze_streak = 0;
    }

    /// Leave freeze mode, returning the streak length for the stats block.
    pub fn exit_freeze(&mut self) -> u32 {
        self.in_freeze_mode = false;
        let streak = self.freeze_streak;
        self.freeze_streak = 0;
        streak
    }

    pub fn freeze_window_exceeded(&self, now_us: i64) -> bool {
        self.in_freeze_mode && now_us - self.freeze_start_us > FREEZE_WINDOW_US
    }
}

impl Default for PacingState {
    fn default() -> Self {
        Self::new()
    }
}

// ── Deadline waits ────────────────────────────────────────────────────────────

/// Wait until `now_fn()` reaches `deadline_us − SPIN_MARGIN_US`.
///
/// Two-phase: chunked sleeps while > 1 ms remains, yield-spin for the rest.
/// Sleep chunks are capped at 1 ms so a stop request is observed promptly.
/// Returns false if the stop flag cut the wait short.
pub fn wait_until_us(deadline_us: i64, now_fn: &dyn Fn() -> i64, stop: &AtomicBool) -> bool {
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = deadline_us - now_fn();
        if remaining <= SPIN_MARGIN_US {
            return true;
        }
        if remaining > SLEEP_FLOOR_US {
            let chunk = (remaining - SLEEP_FLOOR_US).min(1_000) as u64;
            std::thread::sleep(Duration::from_micros(chunk));
        } else {
            std::thread::yield_now();
            std::hint::spin_loop();
        }
    }
}

/// Stop-aware sleep in 1 ms chunks. Used by the sink gate, where precision
/// does not matter but shutdown latency does.
pub fn sleep_with_stop(duration: Duration, stop: &AtomicBool) {
    let mut remaining = duration;
    let chunk = Duration::from_millis(1);
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let step = remaining.min(chunk);
        std::thread::sleep(step);
        remaining -= step;
    }
}

// ── Fast-emission probe ───────────────────────────────────────────────────────

/// Rolling 1-second diagnostic window watching for a runaway loop.
///
/// Purely observational: it never changes pacing. If the measured rate over
/// a closed window exceeds 2× the target, one `INV-PACING-002` line is
/// logged and the probe latches so operators get a single correlatable
/// event instead of a log flood.
pub struct PacingProbe {
    window_start_us:     i64,
    emissions_in_window: u32,
    fast_emissions:      u32,
    latched:             bool,
}

const PROBE_WINDOW_US: i64 = 1_000_000;
/// An inter-emission gap below this fraction of the frame period counts as
/// a fast emission.
const FAST_FRACTION: f64 = 0.3;

impl PacingProbe {
    pub fn new() -> Self {
        Self {
            window_start_us:     0,
            emissions_in_window: 0,
            fast_emissions:      0,
            latched:             false,
        }
    }

    /// Record one emission. `interval_us` is the gap since the previous
    /// emission (i64::MAX for the first). Returns true only for the single
    /// window close that trips the latch.
    pub fn on_emission(&mut self, now_us: i64, interval_us: i64, frame_period_us: i64) -> bool {
        if self.window_start_us == 0 {
            self.window_start_us = now_us;
        }
        self.emissions_in_window += 1;
        if (interval_us as f64) < FAST_FRACTION * frame_period_us as f64 {
            self.fast_emissions += 1;
        }

        let elapsed = now_us - self.window_start_us;
        if elapsed < PROBE_WINDOW_US {
            return false;
        }

        let measured_fps = self.emissions_in_window as f64 * 1_000_000.0 / elapsed as f64;
        let target_fps   = 1_000_000.0 / frame_period_us as f64;
        let tripped = measured_fps > 2.0 * target_fps && !self.latched;

        if tripped {
            self.latched = true;
            warn!(
                "[pacing] INV-PACING-002 output rate {measured_fps:.1} fps exceeds 2x target \
                 {target_fps:.1} fps ({} emissions, {} fast, window {} ms)",
                self.emissions_in_window,
                self.fast_emissions,
                elapsed / 1_000,
            );
        }

        self.window_start_us = now_us;
        self.emissions_in_window = 0;
        self.fast_emissions = 0;
        tripped
    }
}

impl Default for PacingProbe {
    fn default() -> Self {
        Self::new()
    }
}
