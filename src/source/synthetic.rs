//! Synthetic capture backend.
//!
//! Deterministic in-memory source used by tests and demos, selected with
//! `stub://` targets:
//! - `stub://live`: live device, no frame count, no window semantics.
//! - `stub://clip`: finite clip of 300 frames with position/seek semantics.
//! - `stub://clip/N`: finite clip of N frames.
//!
//! Pixel content is a rolling pattern with per-frame noise so consecutive
//! frames are distinguishable downstream.

use anyhow::{anyhow, Result};

use super::{OpenOptions, Source, SourceProperty};
use crate::slot::{PixelFormat, RawFrame};

const DEFAULT_FPS: f64 = 30.0;
const DEFAULT_CLIP_FRAMES: f64 = 300.0;

/// Settings for a synthetic source. Tests construct this directly; `stub://`
/// targets derive it from the open options.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// `<= 0` behaves as a live device with no frame count.
    pub total_frames: f64,
    /// Report zero width/height from property reads, as some real backends do
    /// before the first decode.
    pub report_zero_dimensions: bool,
    /// Refuse every grab, including the open-time probe.
    pub fail_grabs: bool,
    /// Device-scale exposure value reported at open.
    pub exposure: f64,
    /// Gain value reported at open.
    pub gain: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: DEFAULT_FPS,
            total_frames: -1.0,
            report_zero_dimensions: false,
            fail_grabs: false,
            exposure: 0.0,
            gain: 0.0,
        }
    }
}

/// In-memory source satisfying the `Source` capability contract.
pub struct SyntheticSource {
    config: SyntheticConfig,
    opened: bool,
    /// Index of the next frame to be grabbed.
    pos: f64,
    /// A grab has happened and the frame awaits retrieval.
    pending: bool,
    frame_counter: u64,
    scene_state: u8,
    fourcc: f64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            opened: true,
            pos: 0.0,
            pending: false,
            frame_counter: 0,
            scene_state: 0,
            fourcc: 0.0,
        }
    }

    /// Build from a `stub://` target.
    pub(crate) fn from_stub(path: &str, options: &OpenOptions) -> Result<Self> {
        let mode = path.trim_start_matches("stub://");
        let total_frames = match mode {
            "" | "live" => -1.0,
            "clip" => DEFAULT_CLIP_FRAMES,
            other => match other.strip_prefix("clip/") {
                Some(count) => count
                    .parse::<f64>()
                    .ok()
                    .filter(|count| *count > 0.0)
                    .ok_or_else(|| anyhow!("Source: bad stub clip length in '{}'", path))?,
                None => return Err(anyhow!("Source: unknown stub mode '{}'", path)),
            },
        };
        let mut config = Self::config_from_options(options);
        config.total_frames = total_frames;
        log::info!("Source: synthetic backend for {}", path);
        Ok(Self::new(config))
    }

    /// A live synthetic source shaped by the open options; used when the
    /// backend preference forces the synthetic backend.
    pub(crate) fn live_from_options(options: &OpenOptions) -> Self {
        Self::new(Self::config_from_options(options))
    }

    fn config_from_options(options: &OpenOptions) -> SyntheticConfig {
        let mut config = SyntheticConfig::default();
        if options.width > 0 {
            config.width = options.width;
        }
        if options.height > 0 {
            config.height = options.height;
        }
        if options.fps > 0.0 {
            config.fps = options.fps;
        }
        config
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count =
            self.config.width as usize * self.config.height as usize * PixelFormat::Bgr8.bytes_per_pixel();

        // Shift the "scene" now and then so frames are not all alike.
        if self.frame_counter % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let noise: u8 = rand::random();

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_counter + self.scene_state as u64 + noise as u64)
                % 256) as u8;
        }
        pixels
    }
}

impl Source for SyntheticSource {
    fn grab(&mut self) -> bool {
        if !self.opened || self.config.fail_grabs {
            return false;
        }
        if self.config.total_frames > 0.0 && self.pos >= self.config.total_frames {
            return false;
        }
        self.pos += 1.0;
        self.pending = true;
        true
    }

    fn retrieve(&mut self) -> Option<RawFrame> {
        if !self.pending {
            return None;
        }
        self.pending = false;
        self.frame_counter += 1;
        let pixels = self.generate_pixels();
        Some(RawFrame::new(
            pixels,
            self.config.width,
            self.config.height,
            PixelFormat::Bgr8,
        ))
    }

    fn get(&self, prop: SourceProperty) -> f64 {
        match prop {
            SourceProperty::Width => {
                if self.config.report_zero_dimensions {
                    0.0
                } else {
                    self.config.width as f64
                }
            }
            SourceProperty::Height => {
                if self.config.report_zero_dimensions {
                    0.0
                } else {
                    self.config.height as f64
                }
            }
            SourceProperty::Fps => self.config.fps,
            SourceProperty::Fourcc => self.fourcc,
            SourceProperty::PosFrames => self.pos,
            SourceProperty::PosMsec => {
                if self.config.fps > 0.0 {
                    self.pos * 1000.0 / self.config.fps
                } else {
                    0.0
                }
            }
            SourceProperty::FrameCount => self.config.total_frames,
            SourceProperty::Exposure => self.config.exposure,
            SourceProperty::Gain => self.config.gain,
        }
    }

    fn set(&mut self, prop: SourceProperty, value: f64) -> bool {
        match prop {
            SourceProperty::Width => {
                if value > 0.0 {
                    self.config.width = value as u32;
                    true
                } else {
                    false
                }
            }
            SourceProperty::Height => {
                if value > 0.0 {
                    self.config.height = value as u32;
                    true
                } else {
                    false
                }
            }
            SourceProperty::Fps => {
                if value > 0.0 {
                    self.config.fps = value;
                    true
                } else {
                    false
                }
            }
            SourceProperty::Fourcc => {
                self.fourcc = value;
                true
            }
            SourceProperty::PosFrames => {
                self.pos = if self.config.total_frames > 0.0 {
                    value.clamp(0.0, self.config.total_frames)
                } else {
                    value.max(0.0)
                };
                self.pending = false;
                true
            }
            SourceProperty::PosMsec | SourceProperty::FrameCount => false,
            SourceProperty::Exposure => {
                self.config.exposure = value;
                true
            }
            SourceProperty::Gain => {
                self.config.gain = value;
                true
            }
        }
    }

    fn release(&mut self) {
        self.opened = false;
        self.pending = false;
    }

    fn is_opened(&self) -> bool {
        self.opened
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieve_requires_a_preceding_grab() {
        let mut source = SyntheticSource::new(SyntheticConfig::default());
        assert!(source.retrieve().is_none());
        assert!(source.grab());
        assert!(source.retrieve().is_some());
        assert!(source.retrieve().is_none());
    }

    #[test]
    fn clip_grabs_fail_past_the_frame_count() {
        let config = SyntheticConfig {
            total_frames: 3.0,
            ..SyntheticConfig::default()
        };
        let mut source = SyntheticSource::new(config);

        for _ in 0..3 {
            assert!(source.grab());
            assert!(source.retrieve().is_some());
        }
        assert_eq!(source.get(SourceProperty::PosFrames), 3.0);
        assert!(!source.grab());

        // Seeking back re-enables grabbing.
        assert!(source.set(SourceProperty::PosFrames, 0.0));
        assert!(source.grab());
    }

    #[test]
    fn seek_clamps_into_the_clip() {
        let config = SyntheticConfig {
            total_frames: 10.0,
            ..SyntheticConfig::default()
        };
        let mut source = SyntheticSource::new(config);
        source.set(SourceProperty::PosFrames, 25.0);
        assert_eq!(source.get(SourceProperty::PosFrames), 10.0);
        source.set(SourceProperty::PosFrames, -5.0);
        assert_eq!(source.get(SourceProperty::PosFrames), 0.0);
    }

    #[test]
    fn position_timestamps_follow_the_frame_rate() {
        let config = SyntheticConfig {
            total_frames: 100.0,
            fps: 25.0,
            ..SyntheticConfig::default()
        };
        let mut source = SyntheticSource::new(config);
        assert!(source.grab());
        assert_eq!(source.get(SourceProperty::PosMsec), 40.0);
    }

    #[test]
    fn stub_targets_select_mode_and_length() -> Result<()> {
        let options = OpenOptions::default();
        let live = SyntheticSource::from_stub("stub://live", &options)?;
        assert!(live.get(SourceProperty::FrameCount) <= 0.0);

        let clip = SyntheticSource::from_stub("stub://clip/42", &options)?;
        assert_eq!(clip.get(SourceProperty::FrameCount), 42.0);

        assert!(SyntheticSource::from_stub("stub://bogus", &options).is_err());
        assert!(SyntheticSource::from_stub("stub://clip/0", &options).is_err());
        Ok(())
    }

    #[test]
    fn release_stops_grabs() {
        let mut source = SyntheticSource::new(SyntheticConfig::default());
        assert!(source.grab());
        source.release();
        assert!(!source.is_opened());
        assert!(!source.grab());
        assert!(source.retrieve().is_none());
    }
}
