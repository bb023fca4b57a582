// crates/retrovue-playout/src/lib.rs
//
// The RetroVue Air playout runtime. ProgramOutput drives one channel:
// producers fill a FrameRingBuffer, the render loop paces frames against
// the master clock and routes them to the output bus, bridging starvation
// with freeze frames and black pads so the signal never stalls.

pub mod output;
pub mod pacing;
pub mod pad;
pub mod producer;
pub mod sink;
pub mod stats;

pub use output::ProgramOutput;
pub use pacing::{DEFAULT_FRAME_PERIOD_US, FREEZE_WINDOW_US};
pub use pad::{PadReason, PAD_CHANNELS, PAD_SAMPLE_RATE};
pub use producer::{BarsSource, FrameSource, Producer, SlateSource};
pub use sink::{AudioSinkFn, OutputBus, SuccessorFn, VideoSinkFn};
pub use stats::StatsSnapshot;
pub use retrovue_core::{AudioFrame, FrameRingBuffer, MasterClock, SessionClock, VideoFrame, PAD_URI};
