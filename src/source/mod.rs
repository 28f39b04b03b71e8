//! Capture sources.
//!
//! This module defines the capability contract every backend satisfies and the
//! adapter that negotiates open-time settings over it:
//! - `Source`: grab/retrieve/get/set/release, the seam between the capture
//!   engine and the device/codec bindings. Any implementation is
//!   substitutable; the pacer is composed over it by injection.
//! - `SourceAdapter`: open/close, property overrides, the mandatory probe
//!   grab, and the negotiated-value fallbacks.
//! - `SyntheticSource`: deterministic in-memory backend (`stub://` targets)
//!   for tests and demos.
//! - `V4l2Source` (feature: backend-v4l2): live V4L2 devices.
//!
//! The adapter performs no validation beyond what the capability itself
//! performs; window bookkeeping lives in `PlaybackWindow`.

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

use crate::exposure::EXPOSURE_READ_SCALE;
use crate::pacer::PlaybackWindow;
use crate::slot::{PixelFormat, RawFrame};
use crate::DEFAULT_INTERVAL_MS;

mod synthetic;
#[cfg(feature = "backend-v4l2")]
pub mod v4l2;

pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "backend-v4l2")]
pub use v4l2::V4l2Source;

/// Properties a capture capability exposes through `get`/`set`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceProperty {
    Width,
    Height,
    Fps,
    Fourcc,
    /// Index of the next frame to be grabbed.
    PosFrames,
    /// Decoder timestamp of the current position, in milliseconds.
    PosMsec,
    /// Total frames in a file/network source; `<= 0` for live devices.
    FrameCount,
    Exposure,
    Gain,
}

/// The device/codec capability the capture engine is built over.
///
/// `grab` pulls the next frame into the backend; `retrieve` decodes and hands
/// it out. Splitting the two keeps the slot critical section short: grab can
/// run unlocked, retrieve happens under the publish lock.
pub trait Source: Send {
    /// Advance to the next frame. `false` means no frame was available; the
    /// caller decides whether that is a transient skip or end-of-range.
    fn grab(&mut self) -> bool;

    /// Decode and return the last grabbed frame.
    fn retrieve(&mut self) -> Option<RawFrame>;

    fn get(&self, prop: SourceProperty) -> f64;

    fn set(&mut self, prop: SourceProperty, value: f64) -> bool;

    /// Release the underlying resource. Further grabs fail.
    fn release(&mut self);

    fn is_opened(&self) -> bool;

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Bgr8
    }
}

/// What to open: a live device index or a file/network path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceTarget {
    Device(u32),
    Path(String),
}

impl SourceTarget {
    /// A bare integer selects a device; anything else is a path or URI.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        match spec.parse::<u32>() {
            Ok(index) => SourceTarget::Device(index),
            Err(_) => SourceTarget::Path(spec.to_string()),
        }
    }
}

impl fmt::Display for SourceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTarget::Device(index) => write!(f, "device {}", index),
            SourceTarget::Path(path) => f.write_str(path),
        }
    }
}

/// Backend preference at open time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendPreference {
    /// Pick whatever fits the target.
    #[default]
    Any,
    /// Force the synthetic backend regardless of target.
    Synthetic,
    #[cfg(feature = "backend-v4l2")]
    V4l2,
}

impl FromStr for BackendPreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "any" => Ok(BackendPreference::Any),
            "synthetic" | "stub" => Ok(BackendPreference::Synthetic),
            #[cfg(feature = "backend-v4l2")]
            "v4l2" => Ok(BackendPreference::V4l2),
            other => Err(anyhow!("unknown backend preference '{}'", other)),
        }
    }
}

/// Open-time capture settings. Zero/empty leaves the source default in place.
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Four-character codec tag, e.g. "MJPG". Empty keeps the source codec.
    pub fourcc: String,
    pub backend: BackendPreference,
}

/// Pack a four-character codec tag into the numeric form capture backends
/// expect (first character in the low byte).
pub fn fourcc_code(tag: &str) -> Option<f64> {
    let bytes = tag.as_bytes();
    if bytes.len() != 4 {
        return None;
    }
    let mut code: u32 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        code |= (b as u32) << (8 * i);
    }
    Some(code as f64)
}

/// Printable form of a packed codec tag. Non-alphanumeric bytes come out as
/// `?`, so an unset codec reads as "????".
pub fn fourcc_tag(code: i32) -> String {
    let code = code as u32;
    (0..4)
        .map(|i| {
            let c = ((code >> (8 * i)) & 0x7f) as u8 as char;
            if c.is_ascii_alphanumeric() {
                c
            } else {
                '?'
            }
        })
        .collect()
}

fn open_backend(target: &SourceTarget, options: &OpenOptions) -> Result<Box<dyn Source>> {
    if options.backend == BackendPreference::Synthetic {
        return Ok(Box::new(SyntheticSource::live_from_options(options)));
    }
    match target {
        SourceTarget::Path(path) if path.starts_with("stub://") => {
            Ok(Box::new(SyntheticSource::from_stub(path, options)?))
        }
        SourceTarget::Device(index) => open_device(*index, options),
        SourceTarget::Path(path) => Err(anyhow!(
            "Source: no file backend available for {}; use a stub:// source",
            path
        )),
    }
}

#[cfg(feature = "backend-v4l2")]
fn open_device(index: u32, options: &OpenOptions) -> Result<Box<dyn Source>> {
    Ok(Box::new(V4l2Source::open_index(index, options)?))
}

#[cfg(not(feature = "backend-v4l2"))]
fn open_device(index: u32, _options: &OpenOptions) -> Result<Box<dyn Source>> {
    Err(anyhow!(
        "Source: no device backend compiled in for device {}; enable backend-v4l2 or use a stub:// source",
        index
    ))
}

/// Wraps an opened capability: applies open-time overrides, performs the
/// mandatory probe grab, and caches the negotiated geometry and pacing
/// interval.
pub struct SourceAdapter {
    source: Box<dyn Source>,
    opened: bool,
    width: u32,
    height: u32,
    interval_ms: f64,
    format: PixelFormat,
    window: PlaybackWindow,
    exposure: i32,
    gain: i32,
    probe: Option<RawFrame>,
}

impl SourceAdapter {
    /// Open the backend selected by `target` and negotiate settings over it.
    pub fn open(target: &SourceTarget, options: &OpenOptions) -> Result<Self> {
        let source = open_backend(target, options)?;
        Self::from_source(source, &target.to_string(), options)
    }

    /// Adapt an already-opened capability. This is the injection seam: any
    /// `Source` implementation goes through the same negotiation.
    pub fn from_source(
        mut source: Box<dyn Source>,
        label: &str,
        options: &OpenOptions,
    ) -> Result<Self> {
        // Requested overrides; zero/empty keeps the source default.
        if let Some(code) = fourcc_code(&options.fourcc) {
            source.set(SourceProperty::Fourcc, code);
        }
        if options.width > 0 {
            source.set(SourceProperty::Width, options.width as f64);
        }
        if options.height > 0 {
            source.set(SourceProperty::Height, options.height as f64);
        }
        if options.fps > 0.0 {
            source.set(SourceProperty::Fps, options.fps);
        }

        let fps = source.get(SourceProperty::Fps);
        let mut interval_ms = if fps > 0.0 {
            1000.0 / fps
        } else if options.fps > 0.0 {
            1000.0 / options.fps
        } else {
            DEFAULT_INTERVAL_MS
        };

        // The window must be read before the probe grab moves the position.
        let start = source.get(SourceProperty::PosFrames);
        let total = source.get(SourceProperty::FrameCount);
        let window = PlaybackWindow::at_open(start, total)?;

        // One synchronous probe confirms the source actually delivers frames.
        // A handle that opens but cannot grab is unusable.
        if !source.grab() {
            source.release();
            return Err(anyhow!("Source: probe grab failed for {}", label));
        }

        // Like the dimensions below, some backends only report a rate once
        // the first grab has negotiated the stream.
        if fps <= 0.0 && options.fps <= 0.0 {
            let negotiated = source.get(SourceProperty::Fps);
            if negotiated > 0.0 {
                interval_ms = 1000.0 / negotiated;
            }
        }

        let mut width = source.get(SourceProperty::Width) as u32;
        let mut height = source.get(SourceProperty::Height) as u32;
        // Some backends report zero until the first decode.
        if width == 0 {
            width = options.width;
        }
        if height == 0 {
            height = options.height;
        }

        let exposure = (source.get(SourceProperty::Exposure) * EXPOSURE_READ_SCALE).round() as i32;
        let gain = source.get(SourceProperty::Gain).round() as i32;
        let format = source.pixel_format();
        let probe = source.retrieve();

        log::debug!(
            "Source: opened {} in:{} out:{} {}x{} fourcc:{}",
            label,
            window.in_point(),
            window.out_point(),
            width,
            height,
            fourcc_tag(source.get(SourceProperty::Fourcc) as i32),
        );

        Ok(Self {
            source,
            opened: true,
            width,
            height,
            interval_ms,
            format,
            window,
            exposure,
            gain,
            probe,
        })
    }

    pub fn grab(&mut self) -> bool {
        self.source.grab()
    }

    pub fn retrieve(&mut self) -> Option<RawFrame> {
        self.source.retrieve()
    }

    /// The frame decoded by the open-time probe; published as the first frame.
    pub(crate) fn take_probe_frame(&mut self) -> Option<RawFrame> {
        self.probe.take()
    }

    pub fn get(&self, prop: SourceProperty) -> f64 {
        self.source.get(prop)
    }

    pub fn set(&mut self, prop: SourceProperty, value: f64) -> bool {
        self.source.set(prop, value)
    }

    /// Index of the next frame to be grabbed.
    pub fn position(&self) -> f64 {
        self.source.get(SourceProperty::PosFrames)
    }

    /// Decoder timestamp at the current position, for pacing drift correction.
    pub fn timestamp_ms(&self) -> f64 {
        self.source.get(SourceProperty::PosMsec)
    }

    pub fn seek(&mut self, frame: f64) -> bool {
        self.source.set(SourceProperty::PosFrames, frame)
    }

    pub fn window(&self) -> PlaybackWindow {
        self.window
    }

    pub fn set_in_point(&mut self, frame: f64) -> Result<()> {
        self.window.set_in_point(frame)
    }

    pub fn set_out_point(&mut self, frame: f64) -> Result<()> {
        self.window.set_out_point(frame)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn interval_ms(&self) -> f64 {
        self.interval_ms
    }

    pub fn fps(&self) -> f64 {
        1000.0 / self.interval_ms
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    /// Packed codec tag as reported by the capability.
    pub fn codec(&self) -> i32 {
        self.source.get(SourceProperty::Fourcc) as i32
    }

    /// Printable codec tag, e.g. "MJPG" or "????" when unset.
    pub fn codec_tag(&self) -> String {
        fourcc_tag(self.codec())
    }

    pub(crate) fn exposure_shadow(&self) -> i32 {
        self.exposure
    }

    pub(crate) fn gain_shadow(&self) -> i32 {
        self.gain
    }

    pub fn is_opened(&self) -> bool {
        self.opened && self.source.is_opened()
    }

    /// Release the capability. Idempotent.
    pub fn close(&mut self) {
        if self.opened {
            self.source.release();
            self.opened = false;
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
