// crates/retrovue-core/src/lib.rs
//
// Leaf components of the RetroVue Air playout engine: frame value types,
// the master clock, and the producer → consumer frame ring buffer.
// Pure data and small synchronization primitives; no threads are spawned
// here and nothing does I/O. The render loop lives in retrovue-playout.

pub mod clock;
pub mod frame;
pub mod helpers;
pub mod ring;

pub use clock::{MasterClock, SessionClock};
pub use frame::{AudioFrame, VideoFrame, PAD_URI};
pub use ring::FrameRingBuffer;
