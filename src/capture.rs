//! Capture lifecycle and the consumer-facing surface.
//!
//! `Capture` composes a source adapter, the frame slot, and the pacer-driven
//! worker thread. Exactly two actors touch shared state: the worker publishes
//! into the slot, and the caller's render/poll loop consumes from it. The run
//! flag is the explicit cancellation signal, checked once per worker
//! iteration.
//!
//! State machine: STOPPED → RUNNING → STOPPED, no intermediate states.
//! Teardown always runs stop() then close(), so no worker thread outlives the
//! owning `Capture` and the source is released on every exit path.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::exposure::ExposureGain;
use crate::pacer::{run_capture_loop, Pacer};
use crate::slot::{lock_or_recover, FrameSink, FrameSlot, PixelFormat};
use crate::source::{fourcc_tag, OpenOptions, SourceAdapter, SourceTarget};
use crate::{DEFAULT_HEIGHT, DEFAULT_INTERVAL_MS, DEFAULT_WIDTH};

/// A paced background capture with a non-blocking frame hand-off.
pub struct Capture {
    source: Option<Arc<Mutex<SourceAdapter>>>,
    slot: FrameSlot,
    run: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    epoch: Instant,
    exposure_gain: ExposureGain,
    width: u32,
    height: u32,
    interval_ms: f64,
    format: PixelFormat,
}

impl Capture {
    pub fn new() -> Self {
        Self {
            source: None,
            slot: FrameSlot::new(),
            run: Arc::new(AtomicBool::new(false)),
            worker: None,
            epoch: Instant::now(),
            exposure_gain: ExposureGain::default(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            interval_ms: DEFAULT_INTERVAL_MS,
            format: PixelFormat::Bgr8,
        }
    }

    /// Open a source. Fails closed: on error no thread is started and the
    /// capture stays fully closed. The open-time probe frame becomes the
    /// first published frame.
    pub fn open(&mut self, target: &SourceTarget, options: &OpenOptions) -> Result<()> {
        if self.worker.is_some() {
            return Err(anyhow!(
                "Capture: stop() the worker before re-opening a source"
            ));
        }
        self.close();

        let mut adapter = SourceAdapter::open(target, options)
            .with_context(|| format!("open capture source {}", target))?;
        self.adopt(&mut adapter);
        self.source = Some(Arc::new(Mutex::new(adapter)));
        log::info!(
            "Capture: opened {} {}x{} @{:.1}fps codec {}",
            target,
            self.width,
            self.height,
            self.fps(),
            self.codec_tag(),
        );
        Ok(())
    }

    /// Open over an injected capability implementation instead of a built-in
    /// backend. Same negotiation and probe semantics as `open`.
    pub fn open_source(
        &mut self,
        source: Box<dyn crate::source::Source>,
        label: &str,
        options: &OpenOptions,
    ) -> Result<()> {
        if self.worker.is_some() {
            return Err(anyhow!(
                "Capture: stop() the worker before re-opening a source"
            ));
        }
        self.close();

        let mut adapter = SourceAdapter::from_source(source, label, options)?;
        self.adopt(&mut adapter);
        self.source = Some(Arc::new(Mutex::new(adapter)));
        Ok(())
    }

    fn adopt(&mut self, adapter: &mut SourceAdapter) {
        self.width = adapter.width();
        self.height = adapter.height();
        self.interval_ms = adapter.interval_ms();
        self.format = adapter.pixel_format();
        self.exposure_gain = ExposureGain::from_adapter(adapter);
        if let Some(frame) = adapter.take_probe_frame() {
            self.slot.publish(frame);
        }
    }

    /// Stop the worker and release the source. Idempotent.
    pub fn close(&mut self) {
        self.stop();
        if let Some(source) = self.source.take() {
            lock_or_recover(&source).close();
        }
    }

    /// Spawn the capture worker. Errors if no source is open or a worker is
    /// already running.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(anyhow!("Capture: worker already running"));
        }
        let source = self
            .source
            .clone()
            .ok_or_else(|| anyhow!("Capture: no source opened"))?;

        self.run.store(true, Ordering::SeqCst);
        let slot = self.slot.clone();
        let run = self.run.clone();
        let epoch = self.epoch;
        let pacer = Pacer::new(self.interval_ms, epoch.elapsed().as_secs_f64() * 1000.0);
        let worker = std::thread::Builder::new()
            .name("framefeed-capture".to_string())
            .spawn(move || run_capture_loop(source, slot, run, pacer, epoch))
            .context("spawn capture worker")?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop the worker and join it. Safe to call when already stopped.
    ///
    /// The join is bounded by one in-flight grab plus one pacing sleep; a
    /// hung grab call in the capability can block indefinitely, which is an
    /// accepted risk.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.run.store(false, Ordering::SeqCst);
        if worker.join().is_err() {
            log::error!("Capture: worker thread panicked");
        }
        // Cleared after the join so a publish racing the shutdown cannot
        // leave a stale frame behind.
        self.slot.clear();
    }

    /// Deliver the latest published frame to `sink`, if one is pending.
    /// Non-blocking; never waits on the worker.
    pub fn consume<S: FrameSink>(&self, sink: &mut S) -> bool {
        self.slot.consume(sink)
    }

    pub fn is_opened(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fps(&self) -> f64 {
        1000.0 / self.interval_ms
    }

    pub fn interval_ms(&self) -> f64 {
        self.interval_ms
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    /// Total frames of a file/network source; `<= 0` for live devices or when
    /// nothing is open.
    pub fn frame_count(&self) -> f64 {
        self.with_source(|adapter| adapter.window().total_frames())
            .unwrap_or(-1.0)
    }

    /// Index of the next frame to be grabbed; `-1` when nothing is open.
    pub fn position(&self) -> f64 {
        self.with_source(|adapter| adapter.position()).unwrap_or(-1.0)
    }

    /// Seek a file/network source. Dropped when nothing is open; no
    /// validation beyond what the capability performs.
    pub fn set_position(&mut self, frame: f64) {
        if let Some(source) = &self.source {
            lock_or_recover(source).seek(frame);
        }
    }

    pub fn in_point(&self) -> f64 {
        self.with_source(|adapter| adapter.window().in_point())
            .unwrap_or(-1.0)
    }

    pub fn out_point(&self) -> f64 {
        self.with_source(|adapter| adapter.window().out_point())
            .unwrap_or(-1.0)
    }

    pub fn set_in_point(&mut self, frame: f64) -> Result<()> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| anyhow!("Capture: no source opened"))?;
        lock_or_recover(source).set_in_point(frame)
    }

    pub fn set_out_point(&mut self, frame: f64) -> Result<()> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| anyhow!("Capture: no source opened"))?;
        lock_or_recover(source).set_out_point(frame)
    }

    /// Packed codec tag, 0 when nothing is open.
    pub fn codec(&self) -> i32 {
        self.with_source(|adapter| adapter.codec()).unwrap_or(0)
    }

    pub fn codec_tag(&self) -> String {
        fourcc_tag(self.codec())
    }

    pub fn exposure(&self) -> i32 {
        self.exposure_gain.exposure()
    }

    pub fn gain(&self) -> i32 {
        self.exposure_gain.gain()
    }

    pub fn increase_exposure(&mut self) {
        let mut guard = self.source.as_ref().map(|source| lock_or_recover(source));
        self.exposure_gain.increase_exposure(guard.as_deref_mut());
    }

    pub fn decrease_exposure(&mut self) {
        let mut guard = self.source.as_ref().map(|source| lock_or_recover(source));
        self.exposure_gain.decrease_exposure(guard.as_deref_mut());
    }

    pub fn increase_gain(&mut self) {
        let mut guard = self.source.as_ref().map(|source| lock_or_recover(source));
        self.exposure_gain.increase_gain(guard.as_deref_mut());
    }

    pub fn decrease_gain(&mut self) {
        let mut guard = self.source.as_ref().map(|source| lock_or_recover(source));
        self.exposure_gain.decrease_gain(guard.as_deref_mut());
    }

    fn with_source<R>(&self, f: impl FnOnce(&SourceAdapter) -> R) -> Option<R> {
        self.source
            .as_ref()
            .map(|source| f(&lock_or_recover(source)))
    }
}

impl Default for Capture {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.close();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SyntheticConfig, SyntheticSource};

    struct NullSink;

    impl FrameSink for NullSink {
        fn put(&mut self, _pixels: &[u8], _width: u32, _height: u32, _format: PixelFormat) {}
    }

    fn stub_live() -> SourceTarget {
        SourceTarget::Path("stub://live".to_string())
    }

    #[test]
    fn defaults_before_open() {
        let capture = Capture::new();
        assert!(!capture.is_opened());
        assert!(!capture.is_running());
        assert_eq!(capture.width(), DEFAULT_WIDTH);
        assert_eq!(capture.height(), DEFAULT_HEIGHT);
        assert_eq!(capture.frame_count(), -1.0);
        assert_eq!(capture.position(), -1.0);
        assert_eq!(capture.codec_tag(), "????");
    }

    #[test]
    fn start_requires_an_open_source() {
        let mut capture = Capture::new();
        assert!(capture.start().is_err());
    }

    #[test]
    fn open_failure_leaves_the_capture_closed() {
        let mut capture = Capture::new();
        let config = SyntheticConfig {
            fail_grabs: true,
            ..SyntheticConfig::default()
        };
        let source = Box::new(SyntheticSource::new(config));
        assert!(capture
            .open_source(source, "failing", &OpenOptions::default())
            .is_err());
        assert!(!capture.is_opened());
        assert!(capture.start().is_err());
    }

    #[test]
    fn probe_frame_is_published_at_open() -> Result<()> {
        let mut capture = Capture::new();
        capture.open(&stub_live(), &OpenOptions::default())?;

        // Before any worker runs, the probe frame is already consumable.
        let mut sink = NullSink;
        assert!(capture.consume(&mut sink));
        assert!(!capture.consume(&mut sink));
        Ok(())
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let mut capture = Capture::new();
        capture.stop();
        capture.stop();
    }

    #[test]
    fn double_start_is_rejected() -> Result<()> {
        let mut capture = Capture::new();
        capture.open(&stub_live(), &OpenOptions::default())?;
        capture.start()?;
        assert!(capture.start().is_err());
        capture.stop();
        Ok(())
    }

    #[test]
    fn reopen_while_running_is_rejected() -> Result<()> {
        let mut capture = Capture::new();
        capture.open(&stub_live(), &OpenOptions::default())?;
        capture.start()?;
        assert!(capture.open(&stub_live(), &OpenOptions::default()).is_err());
        capture.stop();
        // After stop() the source can be replaced.
        capture.open(&stub_live(), &OpenOptions::default())?;
        Ok(())
    }

    #[test]
    fn window_mutators_enforce_the_invariant() -> Result<()> {
        let mut capture = Capture::new();
        capture.open(
            &SourceTarget::Path("stub://clip/100".to_string()),
            &OpenOptions::default(),
        )?;

        assert_eq!(capture.frame_count(), 100.0);
        capture.set_in_point(10.0)?;
        capture.set_out_point(90.0)?;
        assert_eq!(capture.in_point(), 10.0);
        assert_eq!(capture.out_point(), 90.0);
        assert!(capture.set_in_point(95.0).is_err());
        assert!(capture.set_out_point(200.0).is_err());
        Ok(())
    }

    #[test]
    fn exposure_adjustments_track_without_a_worker() -> Result<()> {
        let mut capture = Capture::new();
        capture.open(&stub_live(), &OpenOptions::default())?;
        let before = capture.exposure();
        capture.increase_exposure();
        capture.increase_exposure();
        capture.decrease_exposure();
        assert_eq!(capture.exposure(), before + 1);

        let gain = capture.gain();
        capture.increase_gain();
        assert_eq!(capture.gain(), gain + 1);
        Ok(())
    }

    #[test]
    fn fps_reflects_the_device_rate_without_an_override() -> Result<()> {
        let mut capture = Capture::new();
        capture.open(&stub_live(), &OpenOptions::default())?;
        // The synthetic live device reports 30 fps.
        assert!((capture.fps() - 30.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn fps_override_wins_at_open() -> Result<()> {
        let mut capture = Capture::new();
        let options = OpenOptions {
            fps: 60.0,
            ..OpenOptions::default()
        };
        capture.open(&stub_live(), &options)?;
        assert!((capture.fps() - 60.0).abs() < 1e-9);
        Ok(())
    }
}
