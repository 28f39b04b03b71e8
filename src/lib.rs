//! framefeed
//!
//! Paced background video capture with a non-blocking single-slot frame
//! hand-off.
//!
//! # Architecture
//!
//! Exactly two actors: a capture worker thread (producer) and the caller's
//! render/poll loop (consumer). The worker grabs frames from a source
//! capability, publishes them into a single-capacity latest-wins slot, and
//! sleeps for a pacing-computed duration so delivery stays aligned to
//! wall-clock time for both live devices and looped file playback. The
//! consumer polls the slot with a try-lock and never waits on the worker.
//!
//! # Module structure
//!
//! - `source`: the `Source` capability contract, the open-time negotiation
//!   adapter, and the built-in backends (synthetic, optional V4L2)
//! - `slot`: the single-slot, drop-oldest hand-off channel and sink contract
//! - `pacer`: playback window, pacing algorithm, and the worker loop
//! - `capture`: lifecycle (open/start/stop/close) and the consumer surface
//! - `exposure`: exposure/gain shadow controller
//! - `config`: runtime configuration for the feedd demo daemon

pub mod capture;
pub mod config;
pub mod exposure;
pub mod pacer;
pub mod slot;
pub mod source;

pub use capture::Capture;
pub use config::FeedConfig;
pub use exposure::{ExposureGain, EXPOSURE_PUSH_SCALE, EXPOSURE_READ_SCALE};
pub use pacer::{GrabOutcome, Pacer, PlaybackWindow};
pub use slot::{FrameSink, FrameSlot, PixelFormat, RawFrame};
pub use source::{
    fourcc_code, fourcc_tag, BackendPreference, OpenOptions, Source, SourceAdapter,
    SourceProperty, SourceTarget, SyntheticConfig, SyntheticSource,
};
#[cfg(feature = "backend-v4l2")]
pub use source::V4l2Source;

/// Dimensions reported before a source has been opened.
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

/// Pacing interval used when neither the source nor the caller supplies a
/// frame rate.
pub const DEFAULT_INTERVAL_MS: f64 = 10.0;
