//! V4L2 live-device backend (feature: backend-v4l2).
//!
//! Satisfies the `Source` capability contract over a local device node. The
//! device format is negotiated lazily on the first grab, so open-time property
//! overrides (width/height/fps via `set`) land before the buffer stream is
//! built. Exposure/gain pushes are reported as unsupported; the shadow
//! controller keeps its local values either way.

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use super::{OpenOptions, Source, SourceProperty};
use crate::slot::{PixelFormat, RawFrame};

pub struct V4l2Source {
    device_path: String,
    opened: bool,
    /// Requested geometry/rate, applied when the stream is built.
    want_width: u32,
    want_height: u32,
    want_fps: f64,
    /// Geometry actually negotiated with the driver.
    active_width: u32,
    active_height: u32,
    active_fps: f64,
    state: Option<DeviceState>,
    pending: Option<Vec<u8>>,
    frames_grabbed: u64,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    /// Open `/dev/videoN` for device index N.
    pub fn open_index(index: u32, options: &OpenOptions) -> Result<Self> {
        Self::open_path(&format!("/dev/video{}", index), options)
    }

    pub fn open_path(path: &str, options: &OpenOptions) -> Result<Self> {
        // Existence check only; format negotiation waits for the first grab
        // so later property overrides still apply.
        v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))?;
        Ok(Self {
            device_path: path.to_string(),
            opened: true,
            want_width: options.width,
            want_height: options.height,
            want_fps: options.fps,
            active_width: options.width,
            active_height: options.height,
            active_fps: options.fps,
            state: None,
            pending: None,
            frames_grabbed: 0,
        })
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {}", self.device_path))?;

        let mut format = device.format().context("read v4l2 format")?;
        if self.want_width > 0 {
            format.width = self.want_width;
        }
        if self.want_height > 0 {
            format.height = self.want_height;
        }
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.want_fps > 0.0 {
            // Nearest integer rate; a plain cast would floor 29.97 to 29.
            let params = v4l::video::capture::Parameters::with_fps(self.want_fps.round() as u32);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.device_path,
                    err
                );
            }
        }
        if let Ok(params) = device.params() {
            let interval = params.interval;
            if interval.numerator > 0 {
                self.active_fps = interval.denominator as f64 / interval.numerator as f64;
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{})",
            self.device_path,
            self.active_width,
            self.active_height
        );
        Ok(())
    }
}

impl Source for V4l2Source {
    fn grab(&mut self) -> bool {
        use v4l::io::traits::CaptureStream;

        if !self.opened {
            return false;
        }
        if self.state.is_none() {
            if let Err(err) = self.connect() {
                log::warn!("V4l2Source: connect failed: {:#}", err);
                return false;
            }
        }
        let Some(state) = self.state.as_mut() else {
            return false;
        };
        match state.with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec())) {
            Ok(buf) => {
                self.pending = Some(buf);
                self.frames_grabbed += 1;
                true
            }
            Err(err) => {
                log::warn!("V4l2Source: grab failed: {}", err);
                false
            }
        }
    }

    fn retrieve(&mut self) -> Option<RawFrame> {
        let pixels = self.pending.take()?;
        Some(RawFrame::new(
            pixels,
            self.active_width,
            self.active_height,
            PixelFormat::Rgb8,
        ))
    }

    fn get(&self, prop: SourceProperty) -> f64 {
        match prop {
            SourceProperty::Width => self.active_width as f64,
            SourceProperty::Height => self.active_height as f64,
            SourceProperty::Fps => self.active_fps,
            SourceProperty::Fourcc => super::fourcc_code("RGB3").unwrap_or(0.0),
            SourceProperty::PosFrames => self.frames_grabbed as f64,
            SourceProperty::PosMsec => 0.0,
            // Live device: no frame count, no window semantics.
            SourceProperty::FrameCount => -1.0,
            SourceProperty::Exposure | SourceProperty::Gain => 0.0,
        }
    }

    fn set(&mut self, prop: SourceProperty, value: f64) -> bool {
        match prop {
            SourceProperty::Width if self.state.is_none() && value > 0.0 => {
                self.want_width = value as u32;
                self.active_width = value as u32;
                true
            }
            SourceProperty::Height if self.state.is_none() && value > 0.0 => {
                self.want_height = value as u32;
                self.active_height = value as u32;
                true
            }
            SourceProperty::Fps if self.state.is_none() && value > 0.0 => {
                self.want_fps = value;
                self.active_fps = value;
                true
            }
            // Hardware control pushes are not wired up for this backend.
            SourceProperty::Exposure | SourceProperty::Gain => false,
            _ => false,
        }
    }

    fn release(&mut self) {
        self.state = None;
        self.pending = None;
        self.opened = false;
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb8
    }
}
