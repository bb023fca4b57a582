// crates/retrovue-playout/src/output.rs
//
// ProgramOutput: the real-time render loop at the heart of the playout
// engine. One dedicated thread dequeues frames from the current input
// buffer, paces them against the master clock, bridges producer starvation
// with freeze frames and then black pads, gates release on CT, and routes
// everything to the output bus.
//
// The loop never drops a real frame to catch up: late frames emit
// immediately and pacing resumes at the next deadline. In a broadcast
// chain a pad or a repeated frame is invisible; a dropped frame is a
// visible stutter.
//
// All public API that the channel manager calls lives here.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use retrovue_core::helpers::time::format_ct;
use retrovue_core::{AudioFrame, FrameRingBuffer, MasterClock, VideoFrame};

use crate::pacing::{sleep_with_stop, wait_until_us, PacingProbe, PacingState};
use crate::pad::{PadReason, PadState, PAD_CHANNELS, PAD_SAMPLE_RATE};
use crate::sink::{AudioSinkFn, OutputBus, SuccessorFn, VideoSinkFn};
use crate::stats::{OutputStats, StatsSnapshot};

/// Idle tick while no sink is attached. Nothing is consumed during this
/// state, so precision is irrelevant; only shutdown latency bounds it.
const SINK_GATE_TICK: Duration = Duration::from_millis(10);

/// A real frame is counted late when its CT had passed by more than this
/// at the gate. Matches the overall emission fudge allowance.
const LATENESS_FUDGE_US: i64 = 500;

// ── Shared state ──────────────────────────────────────────────────────────────

/// State reachable from both the render thread and external callers. Every
/// externally-writable pointer has its own mutex; observability fields are
/// atomics so the control surface never blocks on the render thread.
struct Shared {
    /// Time authority. None = pace on a steady fallback, skip CT gating.
    clock: Option<Arc<dyn MasterClock>>,

    input:           Mutex<Option<Arc<FrameRingBuffer>>>,
    bus:             Mutex<Option<Arc<dyn OutputBus>>>,
    side_sink:       Mutex<Option<VideoSinkFn>>,
    audio_side_sink: Mutex<Option<AudioSinkFn>>,
    successor:       Mutex<Option<SuccessorFn>>,

    stop:               AtomicBool,
    reset_requested:    AtomicBool,
    no_content_segment: AtomicBool,
    /// Engaged by start(), never cleared; the downstream mux writes its
    /// program map once per session.
    audio_format_locked: AtomicBool,

    // Segment observability. first_pts / successor latch reset on every
    // set_input_buffer; first_real_frame_emitted and last_pts survive.
    first_real_frame_emitted: AtomicBool,
    first_pts_set:            AtomicBool,
    first_pts:                AtomicI64,
    /// Pts of the last *real* emitted frame; −1 before the first one.
    /// Freeze and pad emissions do not move it.
    last_pts:                 AtomicI64,
    successor_fired:          AtomicBool,
    audio_mismatch_logged:    AtomicBool,

    stats: OutputStats,

    /// Render-thread-private state, parked here between start/stop cycles
    /// so pacing cadence and pad geometry survive a restart.
    render_state: Mutex<Option<RenderState>>,
}

/// Owned exclusively by the render thread while it runs.
struct RenderState {
    pacing: PacingState,
    pad:    PadState,
    probe:  PacingProbe,
    /// Fallback monotonic reference when no clock is attached.
    steady: Instant,
    /// Pts of the last routed video frame of any kind. Only used to derive
    /// emergency pad pts when the clock is missing.
    last_video_pts: i64,
    /// Consecutive pads in the current starvation event; 0→1 transitions
    /// are the only pad emissions that log.
    consecutive_pads: u64,
}

impl RenderState {
    fn new() -> Self {
        Self {
            pacing: PacingState::new(),
            pad:    PadState::new(),
            probe:  PacingProbe::new(),
            steady: Instant::now(),
            last_video_pts:   0,
            consecutive_pads: 0,
        }
    }
}

fn wall_now(clock: &Option<Arc<dyn MasterClock>>, steady: Instant) -> i64 {
    match clock {
        Some(c) => c.now_utc_us(),
        None => steady.elapsed().as_micros() as i64,
    }
}

// ── ProgramOutput ─────────────────────────────────────────────────────────────

/// The playout engine for one channel. Construct, attach a sink and an
/// input buffer, `start()`, and the channel is on air.
pub struct ProgramOutput {
    shared: Arc<Shared>,
    render: Option<JoinHandle<()>>,
}

impl ProgramOutput {
    pub fn new(clock: Option<Arc<dyn MasterClock>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                clock,
                input:           Mutex::new(None),
                bus:             Mutex::new(None),
                side_sink:       Mutex::new(None),
                audio_side_sink: Mutex::new(None),
                successor:       Mutex::new(None),
                stop:               AtomicBool::new(false),
                reset_requested:    AtomicBool::new(false),
                no_content_segment: AtomicBool::new(false),
                audio_format_locked: AtomicBool::new(false),
                first_real_frame_emitted: AtomicBool::new(false),
                first_pts_set:            AtomicBool::new(false),
                first_pts:                AtomicI64::new(0),
                last_pts:                 AtomicI64::new(-1),
                successor_fired:          AtomicBool::new(false),
                audio_mismatch_logged:    AtomicBool::new(false),
                stats: OutputStats::new(),
                render_state: Mutex::new(None),
            }),
            render: None,
        }
    }

    /// Lock the canonical pad audio format and spawn the render thread.
    ///
    /// The format lock survives stop()/start() cycles on the same channel.
    pub fn start(&mut self) -> Result<()> {
        if self.render.is_some() {
            bail!("program output already running");
        }
        self.shared.audio_format_locked.store(true, Ordering::Relaxed);
        self.shared.stop.store(false, Ordering::Relaxed);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("program-output".into())
            .spawn(move || render_loop(shared))?;
        self.render = Some(handle);
        info!("[output] started (audio format locked {PAD_SAMPLE_RATE} Hz / {PAD_CHANNELS} ch)");
        Ok(())
    }

    /// Stop the render thread and join it. Idempotent. Every wait inside
    /// the loop polls the stop flag, so worst-case latency is one frame
    /// period plus a sink-gate tick.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.render.take() {
            let _ = handle.join();
            info!("[output] stopped");
        }
    }

    /// Hot segment switch: swap the input buffer; the loop observes the
    /// new pointer on its next iteration. Pacing, pad geometry, freeze
    /// state, the audio format lock, and `last_emitted_pts` all survive;
    /// continuity across segments comes from *keeping* this state.
    pub fn set_input_buffer(&self, buffer: Option<Arc<FrameRingBuffer>>) {
        *self.shared.input.lock() = buffer;
        self.shared.first_pts_set.store(false, Ordering::Relaxed);
        self.shared.first_pts.store(0, Ordering::Relaxed);
        self.shared.successor_fired.store(false, Ordering::Relaxed);
        self.shared.audio_mismatch_logged.store(false, Ordering::Relaxed);
        info!("[output] input buffer switched (last_pts {})",
            format_ct(self.shared.last_pts.load(Ordering::Relaxed)));
    }

    /// Install the output bus. Installing the same bus again is a no-op;
    /// installing a different one while one is present is a programming
    /// error and aborts the process: sinks downstream have per-session
    /// state that cannot survive a silent rebind.
    pub fn set_output_bus(&self, bus: Arc<dyn OutputBus>) {
        let mut slot = self.shared.bus.lock();
        match slot.as_ref() {
            None => *slot = Some(bus),
            Some(existing) if Arc::ptr_eq(existing, &bus) => {}
            Some(_) => {
                error!("[output] attempt to replace an installed output bus");
                std::process::abort();
            }
        }
    }

    pub fn clear_output_bus(&self) {
        *self.shared.bus.lock() = None;
    }

    pub fn set_side_sink(&self, sink: VideoSinkFn) {
        *self.shared.side_sink.lock() = Some(sink);
    }

    pub fn clear_side_sink(&self) {
        *self.shared.side_sink.lock() = None;
    }

    pub fn set_audio_side_sink(&self, sink: AudioSinkFn) {
        *self.shared.audio_side_sink.lock() = Some(sink);
    }

    pub fn clear_audio_side_sink(&self) {
        *self.shared.audio_side_sink.lock() = None;
    }

    /// Register the per-segment single-shot observer. Invoked on the
    /// render thread with the registration mutex held briefly; the
    /// callback must not block.
    pub fn set_on_successor_video_emitted(&self, cb: SuccessorFn) {
        *self.shared.successor.lock() = Some(cb);
    }

    /// Declare the current segment content-less: pads may flow before any
    /// real frame has aired.
    pub fn set_no_content_segment(&self, no_content: bool) {
        self.shared.no_content_segment.store(no_content, Ordering::Relaxed);
    }

    /// Pts of the last real emitted frame; −1 before the first.
    pub fn last_emitted_pts(&self) -> i64 {
        self.shared.last_pts.load(Ordering::Relaxed)
    }

    /// First real pts of the current segment; 0 until one is emitted.
    pub fn first_emitted_pts(&self) -> i64 {
        self.shared.first_pts.load(Ordering::Relaxed)
    }

    /// Drop everything queued in the current input buffer and refresh the
    /// pacing reference stamp. `last_emitted_pts`, cadence, and pad state
    /// are preserved, same continuity argument as a segment switch.
    pub fn reset_pipeline(&self) {
        if let Some(buffer) = self.shared.input.lock().as_ref() {
            buffer.clear();
        }
        self.shared.reset_requested.store(true, Ordering::Relaxed);
        info!("[output] pipeline reset");
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for ProgramOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Render loop ───────────────────────────────────────────────────────────────

/// What this iteration will route, decided by the pop attempt.
enum Emission {
    /// Freshly popped producer frame.
    Real(VideoFrame),
    /// Re-emission of the cached last real frame (starvation ≤ 250 ms).
    Freeze(VideoFrame),
    /// Synthesized black frame (starvation beyond the freeze window).
    Pad(VideoFrame, PadReason),
}

fn render_loop(shared: Arc<Shared>) {
    // Adopt (or create) the persistent render state so cadence and pad
    // geometry carry across stop/start cycles.
    let mut st = shared
        .render_state
        .lock()
        .take()
        .unwrap_or_else(RenderState::new);
    st.pad.audio_format_locked = shared.audio_format_locked.load(Ordering::Relaxed);

    info!("[output] render loop running (period {} us)", st.pacing.frame_period_us);

    while !shared.stop.load(Ordering::Relaxed) {
        iterate(&shared, &mut st);
    }

    *shared.render_state.lock() = Some(st);
    debug!("[output] render loop exited");
}

/// One frame period of work. Mirrors the loop contract step for step; the
/// numbered comments are the authoritative order.
fn iterate(shared: &Shared, st: &mut RenderState) {
    // 1. Sink gate: nothing is consumed while nobody is listening.
    let have_sink = shared.bus.lock().is_some() || shared.side_sink.lock().is_some();
    if !have_sink {
        sleep_with_stop(SINK_GATE_TICK, &shared.stop);
        return;
    }

    // External pipeline reset refreshes only the cadence reference.
    if shared.reset_requested.swap(false, Ordering::Relaxed) {
        st.pacing.last_emission_us = wall_now(&shared.clock, st.steady);
        debug!("[output] pacing reference refreshed");
    }

    // 2. Pacing gate.
    let now_fn = {
        let clock = shared.clock.clone();
        let steady = st.steady;
        move || wall_now(&clock, steady)
    };
    if st.pacing.last_emission_us == 0 {
        st.pacing.last_emission_us = now_fn();
    } else {
        let deadline = st.pacing.last_emission_us + st.pacing.frame_period_us;
        if !wait_until_us(deadline, &now_fn, &shared.stop) {
            return; // stop requested mid-wait
        }
    }
    let now_us = now_fn();

    // 3. Buffer snapshot under the switch mutex.
    let buffer = shared.input.lock().clone();

    // 4. Content-before-pad gate: the channel does not open on black.
    let first_real = shared.first_real_frame_emitted.load(Ordering::Relaxed);
    let no_content = shared.no_content_segment.load(Ordering::Relaxed);
    let queued = buffer.as_ref().map(|b| b.size_video()).unwrap_or(0);
    if !first_real && !no_content && queued == 0 {
        st.pacing.last_emission_us = now_us;
        return;
    }
    let truly_empty = queued == 0;

    // 5. Pop attempt.
    let emission = match buffer.as_ref().and_then(|b| b.pop_video()) {
        Some(frame) => {
            let last_real = shared.last_pts.load(Ordering::Relaxed);
            if st.pacing.last_emitted_frame.is_some() && frame.pts <= last_real {
                // Producer contract violation; dropping beats corrupting
                // downstream mux timing. The tick falls through to the
                // starvation path so cadence is unaffected.
                warn!(
                    "[output] INV-OUTPUT-SAFETY-RAIL dropped non-monotonic frame \
                     pts {} <= last {} ({})",
                    format_ct(frame.pts),
                    format_ct(last_real),
                    frame.asset_uri,
                );
                OutputStats::bump(&shared.stats.nonmonotonic_drops);
                starvation_emission(shared, st, now_us, false)
            } else {
                real_emission(shared, st, frame)
            }
        }
        None => starvation_emission(shared, st, now_us, truly_empty),
    };

    // 6. Audio drain while video waits on CT.
    drain_due_audio(shared, buffer.as_deref());

    // 7. Pad audio coupling: silence keeps the mux fed, but only in the
    // locked format and only when no real audio is in flight.
    if let Emission::Pad(pad_frame, _) = &emission {
        let lane_empty = buffer.as_ref().map(|b| b.is_audio_empty()).unwrap_or(true);
        if lane_empty && st.pad.audio_format_locked {
            let silence = st.pad.silence_frame(pad_frame.pts, st.pacing.frame_period_us);
            route_audio(shared, silence);
            OutputStats::bump(&shared.stats.audio_frames);
            OutputStats::bump(&shared.stats.pad_audio_frames);
        }
    }

    // 8. CT gate for the selected video frame. Pad pts is derived from
    // "now", so pads are due by construction. Late frames are never
    // dropped; they emit immediately.
    let (frame, is_real, is_pad) = match emission {
        Emission::Real(f) => (f, true, false),
        Emission::Freeze(f) => (f, false, false),
        Emission::Pad(f, _) => (f, false, true),
    };
    if is_real {
        if let Some(clock) = &shared.clock {
            let deadline = clock.scheduled_to_utc_us(frame.pts);
            let now = clock.now_utc_us();
            if now > deadline + LATENESS_FUDGE_US {
                OutputStats::bump(&shared.stats.pacing_late_events);
            } else if !wait_until_us(deadline, &now_fn, &shared.stop) {
                return;
            }
        }
    }

    // 9. Route video: bus preferred, side sink otherwise.
    let pts = frame.pts;
    route_video(shared, frame);
    OutputStats::bump(&shared.stats.video_frames);
    shared.stats.last_routed_pts.store(pts, Ordering::Relaxed);
    match (is_real, is_pad) {
        (true, _) => OutputStats::bump(&shared.stats.real_frames),
        (false, false) => OutputStats::bump(&shared.stats.freeze_frames),
        (false, true) => OutputStats::bump(&shared.stats.pad_frames),
    }

    // 10/11. Latches and the successor observer fire on fresh producer
    // frames only: a frozen predecessor frame must not confirm that the
    // new segment has begun airing.
    if is_real {
        shared.first_real_frame_emitted.store(true, Ordering::Relaxed);
        if !shared.first_pts_set.swap(true, Ordering::Relaxed) {
            shared.first_pts.store(pts, Ordering::Relaxed);
        }
        if !shared.successor_fired.load(Ordering::Relaxed) {
            let successor = shared.successor.lock();
            if let Some(cb) = successor.as_ref() {
                shared.successor_fired.store(true, Ordering::Relaxed);
                cb(pts);
            }
        }
        shared.last_pts.store(pts, Ordering::Relaxed);
    }
    st.last_video_pts = pts;

    // 12. Audio drain, post-video: anything that came due while we waited.
    drain_due_audio(shared, buffer.as_deref());

    // 13. Bookkeeping: the probe watches cadence, then the emission stamp
    // paces the next iteration.
    let end_us = now_fn();
    let interval = end_us - st.pacing.last_emission_us;
    if st.probe.on_emission(end_us, interval, st.pacing.frame_period_us) {
        OutputStats::bump(&shared.stats.pacing_violations);
    }
    st.pacing.last_emission_us = end_us;
}

/// Case A: a fresh producer frame. Learns session geometry on the first
/// one and ends any freeze in progress.
fn real_emission(shared: &Shared, st: &mut RenderState, frame: VideoFrame) -> Emission {
    if !st.pad.initialized {
        st.pad.learn_from(&frame);
        st.pacing.frame_period_us = st.pad.duration_us;
        info!(
            "[output] learned session format {}x{} period {} us",
            frame.width, frame.height, st.pacing.frame_period_us,
        );
    }
    if st.pacing.in_freeze_mode {
        let streak = st.pacing.exit_freeze();
        shared.stats.record_freeze_streak(streak);
        debug!("[output] recovered from freeze after {streak} repeats");
    }
    st.consecutive_pads = 0;
    st.pacing.last_emitted_frame = Some(frame.clone());
    Emission::Real(frame)
}

/// Cases B and C: the input lane had nothing for us.
fn starvation_emission(
    shared: &Shared,
    st: &mut RenderState,
    now_us: i64,
    truly_empty: bool,
) -> Emission {
    // Freezing is only the entry into a starvation event. Once the window
    // has expired and the first pad went out, the event stays in pad mode
    // until a real frame recovers it; re-freezing on a stale frame after
    // seconds of black would flash old content.
    if let Some(cached) = st.pacing.last_emitted_frame.as_ref() {
        if st.consecutive_pads == 0 && !st.pacing.freeze_window_exceeded(now_us) {
            // Case B: bridge with the cached last real frame.
            let frame = cached.clone();
            if !st.pacing.in_freeze_mode {
                st.pacing.enter_freeze(now_us);
                warn!(
                    "[output] input starved at {}, freezing last frame",
                    format_ct(st.last_video_pts),
                );
            }
            st.pacing.freeze_streak += 1;
            return Emission::Freeze(frame);
        }
    }

    // Case C: pad. Pad pts tracks CT directly, never accumulated from
    // last_pts, which would drift against the wall clock and jump across
    // switches. The last_video_pts fallback exists only for a missing
    // clock.
    if st.pacing.in_freeze_mode {
        let streak = st.pacing.exit_freeze();
        shared.stats.record_freeze_streak(streak);
    }
    let pad_pts = match &shared.clock {
        Some(clock) => clock.now_utc_us() - clock.epoch_utc_us(),
        None => st.last_video_pts + st.pad.duration_us,
    };
    let reason = if truly_empty {
        PadReason::BufferTrulyEmpty
    } else {
        PadReason::Unknown
    };
    st.consecutive_pads += 1;
    if st.consecutive_pads == 1 {
        warn!(
            "[output] padding black at {} (reason {:?})",
            format_ct(pad_pts),
            reason,
        );
    }
    Emission::Pad(st.pad.black_frame(pad_pts), reason)
}

/// Pop and route every audio frame whose CT has arrived, stopping at the
/// first future one. With no clock, audio releases immediately on pop.
fn drain_due_audio(shared: &Shared, buffer: Option<&FrameRingBuffer>) {
    let Some(buffer) = buffer else { return };
    loop {
        let Some(pts) = buffer.peek_audio_pts() else { return };
        let due = match &shared.clock {
            Some(clock) => clock.scheduled_to_utc_us(pts) <= clock.now_utc_us(),
            None => true,
        };
        if !due {
            return;
        }
        let Some(frame) = buffer.pop_audio() else { return };

        if shared.audio_format_locked.load(Ordering::Relaxed)
            && (frame.sample_rate != PAD_SAMPLE_RATE || frame.channels != PAD_CHANNELS)
            && !shared.audio_mismatch_logged.swap(true, Ordering::Relaxed)
        {
            warn!(
                "[output] producer audio {} Hz / {} ch does not match locked format \
                 {PAD_SAMPLE_RATE} Hz / {PAD_CHANNELS} ch",
                frame.sample_rate, frame.channels,
            );
        }

        route_audio(shared, frame);
        OutputStats::bump(&shared.stats.audio_frames);
    }
}

fn route_video(shared: &Shared, frame: VideoFrame) {
    let bus = shared.bus.lock().clone();
    if let Some(bus) = bus {
        bus.route_video(frame);
        return;
    }
    let sink = shared.side_sink.lock().clone();
    if let Some(sink) = sink {
        sink(frame);
    }
    // Neither attached: the sink was cleared mid-iteration. Dropping one
    // frame here is fine; the sink gate idles the loop next tick.
}

fn route_audio(shared: &Shared, frame: AudioFrame) {
    let bus = shared.bus.lock().clone();
    if let Some(bus) = bus {
        bus.route_audio(frame);
        return;
    }
    let sink = shared.audio_side_sink.lock().clone();
    if let Some(sink) = sink {
        sink(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use retrovue_core::SessionClock;

    /// 5 ms frames keep the scenarios fast while exercising the same
    /// pacing paths as broadcast rates.
    const PERIOD_US: i64 = 5_000;

    struct CollectingBus {
        video: Mutex<Vec<VideoFrame>>,
        audio: Mutex<Vec<AudioFrame>>,
    }

    impl CollectingBus {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                video: Mutex::new(Vec::new()),
                audio: Mutex::new(Vec::new()),
            })
        }

        fn video_count(&self) -> usize {
            self.video.lock().len()
        }

        fn audio_count(&self) -> usize {
            self.audio.lock().len()
        }

        fn videos(&self) -> Vec<VideoFrame> {
            self.video.lock().clone()
        }

        fn audios(&self) -> Vec<AudioFrame> {
            self.audio.lock().clone()
        }
    }

    impl OutputBus for CollectingBus {
        fn route_video(&self, frame: VideoFrame) {
            self.video.lock().push(frame);
        }

        fn route_audio(&self, frame: AudioFrame) {
            self.audio.lock().push(frame);
        }
    }

    fn real_frame(pts: i64) -> VideoFrame {
        let mut f = VideoFrame::new(64, 32, pts, PERIOD_US as f64 / 1_000_000.0, "file:///asset.mp4");
        f.has_ct = true;
        f
    }

    fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn engine_with_bus() -> (ProgramOutput, Arc<CollectingBus>, Arc<FrameRingBuffer>) {
        // RUST_LOG=debug shows the loop's decisions when a scenario fails.
        let _ = env_logger::builder().is_test(true).try_init();
        let clock: Arc<dyn MasterClock> = Arc::new(SessionClock::starting_now());
        let out = ProgramOutput::new(Some(clock));
        let bus = CollectingBus::new();
        out.set_output_bus(bus.clone());
        let ring = Arc::new(FrameRingBuffer::new());
        out.set_input_buffer(Some(Arc::clone(&ring)));
        (out, bus, ring)
    }

    #[test]
    fn happy_path_routes_every_frame_paced_and_in_order() {
        let (mut out, bus, ring) = engine_with_bus();
        for i in 0..40 {
            assert!(ring.push_video(real_frame(i * PERIOD_US)));
        }

        let started = Instant::now();
        out.start().unwrap();
        assert!(wait_for(|| bus.video_count() >= 40, Duration::from_secs(3)));
        let elapsed = started.elapsed();
        out.stop();

        let vids = bus.videos();
        let first_40 = &vids[..40];
        for pair in first_40.windows(2) {
            assert!(pair[1].pts > pair[0].pts, "pts regressed: {} after {}", pair[1].pts, pair[0].pts);
        }
        assert!(first_40.iter().all(|f| !f.is_pad()));
        assert_eq!(out.last_emitted_pts(), 39 * PERIOD_US);

        let snap = out.stats();
        assert_eq!(snap.pad_frames, 0);
        assert_eq!(snap.pacing_violations, 0);
        assert_eq!(snap.real_frames, 40);

        // Pacing bound: 39 inter-frame gaps of ~5 ms each, minus the fudge.
        assert!(elapsed >= Duration::from_micros((39 * (PERIOD_US - 500)) as u64),
            "40 frames arrived in {elapsed:?}, pacing gate not holding");
    }

    #[test]
    fn short_starvation_freezes_without_padding() {
        let (mut out, bus, ring) = engine_with_bus();
        for i in 0..5 {
            ring.push_video(real_frame(i * PERIOD_US));
        }
        out.start().unwrap();
        assert!(wait_for(|| bus.video_count() >= 5, Duration::from_secs(2)));

        // Gap well inside the 250 ms freeze window.
        thread::sleep(Duration::from_millis(60));
        for i in 5..10 {
            ring.push_video(real_frame(i * PERIOD_US));
        }
        assert!(wait_for(
            || bus.videos().iter().any(|f| f.pts == 9 * PERIOD_US),
            Duration::from_secs(2),
        ));
        out.stop();

        let snap = out.stats();
        assert!(snap.freeze_frames > 0, "gap produced no freeze frames");
        assert_eq!(snap.pad_frames, 0, "gap under the freeze window must not pad");

        // Freeze repeats carry the last real frame verbatim: its pts and a
        // non-pad asset uri.
        let vids = bus.videos();
        let repeats: Vec<_> = vids.iter().skip(5).take_while(|f| f.pts == 4 * PERIOD_US).collect();
        assert!(!repeats.is_empty());
        assert!(repeats.iter().all(|f| f.asset_uri == "file:///asset.mp4"));
        assert_eq!(snap.real_frames, 10);
    }

    #[test]
    fn long_starvation_pads_with_ct_derived_pts_and_silence() {
        let (mut out, bus, ring) = engine_with_bus();
        let fired: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
        let fired_in_cb = Arc::clone(&fired);
        out.set_on_successor_video_emitted(Arc::new(move |pts| {
            fired_in_cb.lock().push(pts);
        }));

        for i in 0..3 {
            ring.push_video(real_frame(i * PERIOD_US));
        }
        out.start().unwrap();
        assert!(wait_for(|| out.stats().pad_frames >= 5, Duration::from_secs(2)));
        out.stop();

        let snap = out.stats();
        assert!(snap.freeze_frames > 0, "pads must be preceded by the freeze window");
        assert!(snap.pad_frames >= 5);

        let vids = bus.videos();
        let first_pad = vids.iter().position(|f| f.is_pad()).unwrap();
        assert!(vids[..first_pad].iter().all(|f| !f.is_pad()));

        // Pad pts tracks CT (now − epoch): the freeze window alone puts it
        // past 250 ms, nowhere near last_pts + period accumulation (~20 ms).
        let pads: Vec<_> = vids.iter().filter(|f| f.is_pad()).collect();
        assert!(pads[0].pts >= 200_000, "pad pts {} looks accumulated, not CT-derived", pads[0].pts);
        for pair in pads.windows(2) {
            assert!(pair[1].pts > pair[0].pts);
        }
        assert!(pads.iter().all(|f| f.has_ct));

        // Pad audio in the locked canonical format, phase-coupled to video.
        assert!(snap.pad_audio_frames > 0);
        let audio = bus.audios();
        assert!(audio.iter().all(|a| a.sample_rate == 48_000 && a.channels == 2));

        // Successor fired exactly once, on the first real frame, never on
        // freeze or pad emissions.
        assert_eq!(*fired.lock(), vec![0]);

        // Pads and freezes do not move the last real pts.
        assert_eq!(out.last_emitted_pts(), 2 * PERIOD_US);
    }

    #[test]
    fn hot_switch_preserves_last_pts_until_successor_airs() {
        let (mut out, bus, ring_a) = engine_with_bus();
        for i in 0..10 {
            ring_a.push_video(real_frame(i * PERIOD_US));
        }
        out.start().unwrap();
        assert!(wait_for(|| bus.video_count() >= 10, Duration::from_secs(2)));
        assert_eq!(out.last_emitted_pts(), 9 * PERIOD_US);

        let fired: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
        let fired_in_cb = Arc::clone(&fired);
        out.set_on_successor_video_emitted(Arc::new(move |pts| {
            fired_in_cb.lock().push(pts);
        }));

        // Switch to a still-empty successor buffer: the loop freezes on
        // segment A's last frame meanwhile.
        let ring_b = Arc::new(FrameRingBuffer::new());
        out.set_input_buffer(Some(Arc::clone(&ring_b)));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(out.last_emitted_pts(), 9 * PERIOD_US, "freeze moved last_pts");
        assert!(fired.lock().is_empty(), "freeze re-emission confirmed the successor");

        // Successor starts feeding, continuing CT from where A stopped.
        for i in 10..13 {
            ring_b.push_video(real_frame(i * PERIOD_US));
        }
        assert!(wait_for(
            || bus.videos().iter().any(|f| f.pts == 12 * PERIOD_US),
            Duration::from_secs(2),
        ));
        out.stop();

        assert_eq!(*fired.lock(), vec![10 * PERIOD_US]);
        assert_eq!(out.first_emitted_pts(), 10 * PERIOD_US);
        assert_eq!(out.last_emitted_pts(), 12 * PERIOD_US);
    }

    #[test]
    fn no_pad_before_first_content_unless_declared() {
        let (mut out, bus, _ring) = engine_with_bus();
        out.start().unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(bus.video_count(), 0, "padded before any content aired");

        out.set_no_content_segment(true);
        assert!(wait_for(|| bus.video_count() > 0, Duration::from_secs(2)));
        out.stop();

        let vids = bus.videos();
        assert!(vids[0].is_pad());
        // No real frame ever taught the session geometry, so the fallback applies.
        assert_eq!((vids[0].width, vids[0].height), (640, 360));
    }

    #[test]
    fn audio_released_only_when_ct_due() {
        let (mut out, bus, ring) = engine_with_bus();
        out.set_no_content_segment(true); // keep iterations flowing with pads

        ring.push_audio(AudioFrame::silence(0, 48_000, 2, 240));
        ring.push_audio(AudioFrame::silence(5_000_000, 48_000, 2, 240));
        out.start().unwrap();

        assert!(wait_for(|| bus.audio_count() >= 1, Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(100));
        out.stop();

        let audio = bus.audios();
        // The due frame was released; the one scheduled 5 s out was not,
        // and its presence kept pad silence out of the lane.
        assert!(audio.iter().all(|a| a.pts == 0));
        assert_eq!(ring.size_audio(), 1);
        assert_eq!(out.stats().pad_audio_frames, 0);
    }

    #[test]
    fn restart_preserves_learned_format_and_lock() {
        let (mut out, bus, ring) = engine_with_bus();
        for i in 0..3 {
            ring.push_video(real_frame(i * PERIOD_US));
        }
        out.start().unwrap();
        assert!(wait_for(|| bus.video_count() >= 3, Duration::from_secs(2)));
        out.stop();

        // Second run of the same channel: no new frames, so the loop goes
        // freeze → pad. Pad geometry must be the learned 64x32, proving
        // pad and pacing state survived the stop/start cycle.
        out.start().unwrap();
        assert!(wait_for(|| out.stats().pad_frames > 0, Duration::from_secs(2)));
        out.stop();

        let pads: Vec<_> = bus.videos().into_iter().filter(|f| f.is_pad()).collect();
        assert!(!pads.is_empty());
        assert!(pads.iter().all(|f| (f.width, f.height) == (64, 32)));
        // Pad silence still in the locked canonical format.
        assert!(bus.audios().iter().all(|a| a.sample_rate == 48_000 && a.channels == 2));
    }

    #[test]
    fn reset_pipeline_clears_lanes_but_not_continuity() {
        let (out, _bus, ring) = engine_with_bus();
        ring.push_video(real_frame(0));
        ring.push_audio(AudioFrame::silence(0, 48_000, 2, 240));

        out.reset_pipeline();
        assert_eq!(ring.size_video(), 0);
        assert_eq!(ring.size_audio(), 0);
        // Continuity state untouched: nothing has aired yet.
        assert_eq!(out.last_emitted_pts(), -1);
        assert_eq!(out.first_emitted_pts(), 0);
    }

    #[test]
    fn bus_install_is_idempotent_and_clearable() {
        let out = ProgramOutput::new(None);
        let bus = CollectingBus::new();
        out.set_output_bus(bus.clone());
        // Same Arc again: allowed, nothing changes.
        out.set_output_bus(bus.clone());
        // Clear, then a different bus is fine.
        out.clear_output_bus();
        let other = CollectingBus::new();
        out.set_output_bus(other);
    }

    #[test]
    fn stop_returns_within_a_frame_period() {
        let (mut out, _bus, _ring) = engine_with_bus();
        out.set_no_content_segment(true);
        out.start().unwrap();
        assert!(wait_for(|| out.stats().pad_frames > 0, Duration::from_secs(2)));

        let begin = Instant::now();
        out.stop();
        // One default frame period plus a sink-gate tick, with margin.
        assert!(begin.elapsed() < Duration::from_millis(150),
            "stop took {:?}", begin.elapsed());
    }

    #[test]
    fn double_start_is_an_error() {
        let (mut out, _bus, _ring) = engine_with_bus();
        out.start().unwrap();
        assert!(out.start().is_err());
        out.stop();
    }

    #[test]
    fn live_producer_keeps_channel_padless() {
        use crate::producer::{BarsSource, Producer};

        let (mut out, bus, ring) = engine_with_bus();
        let mut producer = Producer::spawn(
            Box::new(BarsSource::new(64, 32, 200.0)),
            Arc::clone(&ring),
            0,
        );
        out.start().unwrap();
        assert!(wait_for(|| bus.video_count() >= 30, Duration::from_secs(3)));
        out.stop();
        producer.stop();

        // A producer running ahead of real time never starves the loop.
        let snap = out.stats();
        assert_eq!(snap.pad_frames, 0);
        assert_eq!(snap.pad_audio_frames, 0);

        let vids = bus.videos();
        for pair in vids[..30].windows(2) {
            assert!(pair[1].pts > pair[0].pts);
        }
        // The tone track flowed through the CT gate alongside video.
        assert!(bus.audio_count() > 0);
        assert!(bus.audios().iter().all(|a| a.sample_rate == 48_000 && a.channels == 2));
    }

    #[test]
    fn missing_clock_still_emits_and_pads() {
        let mut out = ProgramOutput::new(None);
        let bus = CollectingBus::new();
        out.set_output_bus(bus.clone());
        let ring = Arc::new(FrameRingBuffer::new());
        out.set_input_buffer(Some(Arc::clone(&ring)));

        for i in 0..3 {
            ring.push_video(real_frame(i * PERIOD_US));
        }
        // Audio with a far-future pts releases immediately without a clock.
        ring.push_audio(AudioFrame::silence(10_000_000, 48_000, 2, 240));

        out.start().unwrap();
        assert!(wait_for(|| out.stats().pad_frames > 0, Duration::from_secs(2)));
        out.stop();

        assert!(bus.audio_count() >= 1);
        let vids = bus.videos();
        assert_eq!(vids[0].pts, 0);
        // Clockless pads fall back to accumulation from the last emission.
        let pads: Vec<_> = vids.iter().filter(|f| f.is_pad()).collect();
        for pair in pads.windows(2) {
            assert!(pair[1].pts > pair[0].pts);
        }
    }
}
