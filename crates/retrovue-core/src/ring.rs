// crates/retrovue-core/src/ring.rs
//
// FrameRingBuffer: the producer → render-loop hand-off point.
//
// Two independent bounded FIFOs (a video lane and an audio lane). The lanes
// share nothing: audio and video are paced independently by presentation
// time, so cross-lane ordering is deliberately not guaranteed.
//
// Failure semantics are silent and non-blocking on both sides: a full lane
// fails push (the producer's backpressure signal), an empty lane returns
// None on pop/peek. No lane ever blocks the render thread.

use std::collections::VecDeque;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::frame::{AudioFrame, VideoFrame};

/// Default video-lane capacity: ~2 s of lookahead at 30 fps.
pub const DEFAULT_VIDEO_CAPACITY: usize = 64;
/// Default audio-lane capacity. Audio frames are small and producers often
/// emit several per video frame, so the lane is deeper.
pub const DEFAULT_AUDIO_CAPACITY: usize = 256;

struct Lane<T> {
    queue:    VecDeque<T>,
    capacity: usize,
}

impl<T> Lane<T> {
    fn new(capacity: usize) -> Self {
        Self { queue: VecDeque::with_capacity(capacity), capacity }
    }
}

/// Bounded two-lane frame queue. One producer and one consumer per lane may
/// operate concurrently; each lane is guarded by its own mutex, held only
/// for the duration of a single queue operation (or a live peek guard).
pub struct FrameRingBuffer {
    video: Mutex<Lane<VideoFrame>>,
    audio: Mutex<Lane<AudioFrame>>,
}

impl FrameRingBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_VIDEO_CAPACITY, DEFAULT_AUDIO_CAPACITY)
    }

    pub fn with_capacity(video_capacity: usize, audio_capacity: usize) -> Self {
        Self {
            video: Mutex::new(Lane::new(video_capacity.max(1))),
            audio: Mutex::new(Lane::new(audio_capacity.max(1))),
        }
    }

    /// False when the video lane is full; the frame is dropped in that
    /// case. Producers that must not lose the frame use [`try_push_video`]
    /// and retry after a backoff.
    ///
    /// [`try_push_video`]: FrameRingBuffer::try_push_video
    pub fn push_video(&self, frame: VideoFrame) -> bool {
        self.try_push_video(frame).is_ok()
    }

    pub fn push_audio(&self, frame: AudioFrame) -> bool {
        self.try_push_audio(frame).is_ok()
    }

    /// Push that hands the frame back on a full lane, crossbeam
    /// `try_send` style, so the producer can hold it and retry.
    pub fn try_push_video(&self, frame: VideoFrame) -> Result<(), VideoFrame> {
        let mut lane = self.video.lock();
        if lane.queue.len() >= lane.capacity {
            return Err(frame);
        }
        lane.queue.push_back(frame);
        Ok(())
    }

    pub fn try_push_audio(&self, frame: AudioFrame) -> Result<(), AudioFrame> {
        let mut lane = self.audio.lock();
        if lane.queue.len() >= lane.capacity {
            return Err(frame);
        }
        lane.queue.push_back(frame);
        Ok(())
    }

    pub fn pop_video(&self) -> Option<VideoFrame> {
        self.video.lock().queue.pop_front()
    }

    pub fn pop_audio(&self) -> Option<AudioFrame> {
        self.audio.lock().queue.pop_front()
    }

    /// Non-destructive look at the video lane head. The returned guard
    /// holds the lane lock, so it is valid exactly until dropped, and the
    /// lane cannot be mutated while it lives. Drop it before pushing or
    /// popping on the same lane from the same thread.
    pub fn peek_video(&self) -> Option<MappedMutexGuard<'_, VideoFrame>> {
        MutexGuard::try_map(self.video.lock(), |lane| lane.queue.front_mut()).ok()
    }

    pub fn peek_audio(&self) -> Option<MappedMutexGuard<'_, AudioFrame>> {
        MutexGuard::try_map(self.audio.lock(), |lane| lane.queue.front_mut()).ok()
    }

    /// Pts of the audio-lane head without keeping the lock. This is what
    /// the render loop's drain actually needs (copy the key, decide, then
    /// pop) so the lock is never held across a routing call.
    pub fn peek_audio_pts(&self) -> Option<i64> {
        self.audio.lock().queue.front().map(|f| f.pts)
    }

    pub fn size_video(&self) -> usize {
        self.video.lock().queue.len()
    }

    pub fn size_audio(&self) -> usize {
        self.audio.lock().queue.len()
    }

    pub fn is_audio_empty(&self) -> bool {
        self.audio.lock().queue.is_empty()
    }

    /// Drop all frames on both lanes. Capacities are unchanged.
    pub fn clear(&self) {
        self.video.lock().queue.clear();
        self.audio.lock().queue.clear();
    }
}

impl Default for FrameRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}
