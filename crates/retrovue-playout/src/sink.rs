// crates/retrovue-playout/src/sink.rs
//
// Sink-side contract consumed by the render loop. The engine routes frames
// out through either a bus (both streams, preferred) or a pair of
// per-stream side sinks; the sink encodes/muxes/transmits on its own
// threads. The engine never blocks on the sink.

use std::sync::Arc;

use retrovue_core::{AudioFrame, VideoFrame};

/// Combined audio + video route. When a bus is installed it supersedes the
/// per-stream side sinks.
///
/// Implementations must be non-blocking and must not panic across this
/// boundary. A slow sink throttles nothing here (pacing owns the cadence),
/// it simply receives frames late. Dropping frames is the sink's decision.
pub trait OutputBus: Send + Sync {
    fn route_video(&self, frame: VideoFrame);
    fn route_audio(&self, frame: AudioFrame);
}

/// Per-stream video route, used when no bus is installed.
pub type VideoSinkFn = Arc<dyn Fn(VideoFrame) + Send + Sync>;

/// Per-stream audio route, used when no bus is installed.
pub type AudioSinkFn = Arc<dyn Fn(AudioFrame) + Send + Sync>;

/// Per-segment single-shot observer: invoked with the pts of the first
/// non-pad video frame routed after a segment switch.
pub type SuccessorFn = Arc<dyn Fn(i64) + Send + Sync>;
