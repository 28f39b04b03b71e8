//! Playback pacing and the capture worker loop.
//!
//! The pacer keeps published-frame timing aligned with the nominal frame
//! interval despite variable decode cost. The two source kinds pace
//! differently:
//! - File/network sources have an authoritative decoder timestamp; it is
//!   folded into every sleep so accumulated drift corrects itself each frame.
//!   A failed grab means the out point was reached: the source rewinds to the
//!   in point and the pacing origin is re-anchored so the next frame lands on
//!   schedule with no pause at the loop point.
//! - Live devices pace themselves at capture time; the origin is reset every
//!   iteration and no drift correction is attempted.
//!
//! The worker checks the run flag once per iteration, so cancellation latency
//! is bounded by one grab plus one pacing sleep (a hung grab call is an
//! accepted risk, not masked). No panic crosses the worker boundary; failure
//! signaling inside the loop is boolean or silent-skip.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::slot::{lock_or_recover, FrameSlot};
use crate::source::SourceAdapter;

/// Inclusive playback bounds for a file/network source, in frame indices.
///
/// `total_frames <= 0` marks a live source with no window semantics. For a
/// finite clip the invariant `0 <= in <= out <= total` holds after every
/// construction and mutation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackWindow {
    in_point: f64,
    out_point: f64,
    total_frames: f64,
}

impl PlaybackWindow {
    /// Window of a live source: no frame count, no loop semantics.
    pub fn live() -> Self {
        Self {
            in_point: -1.0,
            out_point: -1.0,
            total_frames: -1.0,
        }
    }

    /// Window over a finite clip.
    pub fn clip(in_point: f64, out_point: f64, total_frames: f64) -> Result<Self> {
        if total_frames <= 0.0 {
            return Err(anyhow!("a playback window needs a positive frame count"));
        }
        if !(0.0 <= in_point && in_point <= out_point && out_point <= total_frames) {
            return Err(anyhow!(
                "playback window {}..{} violates 0 <= in <= out <= {}",
                in_point,
                out_point,
                total_frames
            ));
        }
        Ok(Self {
            in_point,
            out_point,
            total_frames,
        })
    }

    /// Window as negotiated at open time: the source's current position
    /// becomes the in point and the full frame count the out point.
    pub(crate) fn at_open(start: f64, total_frames: f64) -> Result<Self> {
        if total_frames > 0.0 {
            Self::clip(start.max(0.0), total_frames, total_frames)
        } else {
            Ok(Self::live())
        }
    }

    pub fn is_live(&self) -> bool {
        self.total_frames <= 0.0
    }

    pub fn in_point(&self) -> f64 {
        self.in_point
    }

    pub fn out_point(&self) -> f64 {
        self.out_point
    }

    pub fn total_frames(&self) -> f64 {
        self.total_frames
    }

    pub fn set_in_point(&mut self, frame: f64) -> Result<()> {
        if self.is_live() {
            return Err(anyhow!("a live source has no playback window"));
        }
        if !(0.0..=self.out_point).contains(&frame) {
            return Err(anyhow!(
                "in point {} outside 0..{}",
                frame,
                self.out_point
            ));
        }
        self.in_point = frame;
        Ok(())
    }

    pub fn set_out_point(&mut self, frame: f64) -> Result<()> {
        if self.is_live() {
            return Err(anyhow!("a live source has no playback window"));
        }
        if !(self.in_point..=self.total_frames).contains(&frame) {
            return Err(anyhow!(
                "out point {} outside {}..{}",
                frame,
                self.in_point,
                self.total_frames
            ));
        }
        self.out_point = frame;
        Ok(())
    }
}

/// What one worker iteration observed, as far as pacing is concerned.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GrabOutcome {
    /// Live source; a failed grab is a silent skip and paces the same way.
    Live,
    /// File source delivered a frame; `pos_ms` is the decoder's own timestamp
    /// for the current position.
    FileFrame { pos_ms: f64 },
    /// File source reached the out point (or the decoder was exhausted) and
    /// has been rewound to `in_point`.
    FileExhausted { in_point: f64 },
}

/// Per-iteration sleep planner. `start_ms` is the wall-clock epoch frames are
/// scheduled against; it is re-anchored on loop rewind and, for live sources,
/// every iteration.
#[derive(Clone, Copy, Debug)]
pub struct Pacer {
    interval_ms: f64,
    start_ms: f64,
}

impl Pacer {
    pub fn new(interval_ms: f64, now_ms: f64) -> Self {
        Self {
            interval_ms,
            start_ms: now_ms,
        }
    }

    pub fn interval_ms(&self) -> f64 {
        self.interval_ms
    }

    pub fn start_ms(&self) -> f64 {
        self.start_ms
    }

    /// Compute how long the worker should sleep after this iteration, and
    /// update the pacing origin accordingly.
    pub fn plan(&mut self, now_ms: f64, outcome: GrabOutcome) -> f64 {
        let mut deferred = self.start_ms + self.interval_ms - now_ms;
        match outcome {
            GrabOutcome::Live => {
                // The device paces itself; keep the origin at "now" so each
                // iteration is scheduled from a fresh reference.
                self.start_ms = now_ms;
            }
            GrabOutcome::FileFrame { pos_ms } => {
                // The decoder clock corrects accumulated drift every frame.
                deferred += pos_ms;
            }
            GrabOutcome::FileExhausted { in_point } => {
                // Re-anchor so the frame at the in point lands exactly on
                // schedule, as if playback had continued seamlessly. No pause
                // at the loop point.
                self.start_ms = now_ms - in_point * self.interval_ms;
                deferred = 0.0;
            }
        }
        deferred
    }
}

/// One grab/publish pass under the source lock. Returns the pacing outcome.
pub(crate) fn capture_once(source: &Mutex<SourceAdapter>, slot: &FrameSlot) -> GrabOutcome {
    let mut adapter = lock_or_recover(source);
    let window = adapter.window();

    // Grab eligibility: live sources always, clips only inside the window.
    let eligible = window.is_live() || adapter.position() < window.out_point();

    let mut published = false;
    if eligible && adapter.grab() {
        if let Some(frame) = adapter.retrieve() {
            slot.publish(frame);
            published = true;
        }
    }

    if window.is_live() {
        GrabOutcome::Live
    } else if published {
        GrabOutcome::FileFrame {
            pos_ms: adapter.timestamp_ms(),
        }
    } else {
        // Out point reached or decode exhausted: rewind, not an error.
        adapter.seek(window.in_point());
        GrabOutcome::FileExhausted {
            in_point: window.in_point(),
        }
    }
}

/// Body of the capture worker thread.
pub(crate) fn run_capture_loop(
    source: Arc<Mutex<SourceAdapter>>,
    slot: FrameSlot,
    run: Arc<AtomicBool>,
    mut pacer: Pacer,
    epoch: Instant,
) {
    while run.load(Ordering::SeqCst) {
        let outcome = capture_once(&source, &slot);
        let now_ms = epoch.elapsed().as_secs_f64() * 1000.0;
        let deferred_ms = pacer.plan(now_ms, outcome);
        if deferred_ms > 0.0 {
            std::thread::sleep(Duration::from_millis(deferred_ms as u64));
        }
    }
    log::debug!("Pacer: capture worker exiting");
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::{FrameSink, PixelFormat};
    use crate::source::{OpenOptions, SyntheticConfig, SyntheticSource};

    const INTERVAL_30FPS: f64 = 1000.0 / 30.0;

    struct CountingSink {
        frames: u64,
    }

    impl CountingSink {
        fn new() -> Self {
            Self { frames: 0 }
        }
    }

    impl FrameSink for CountingSink {
        fn put(&mut self, _pixels: &[u8], _width: u32, _height: u32, _format: PixelFormat) {
            self.frames += 1;
        }
    }

    fn clip_adapter(total_frames: f64, fps: f64) -> Mutex<SourceAdapter> {
        let config = SyntheticConfig {
            total_frames,
            fps,
            ..SyntheticConfig::default()
        };
        let source = Box::new(SyntheticSource::new(config));
        let adapter = SourceAdapter::from_source(source, "pacer-test", &OpenOptions::default())
            .expect("open synthetic clip");
        Mutex::new(adapter)
    }

    #[test]
    fn window_invariants_hold_under_mutation() -> Result<()> {
        let mut window = PlaybackWindow::clip(0.0, 300.0, 300.0)?;
        window.set_in_point(10.0)?;
        window.set_out_point(200.0)?;
        assert_eq!(window.in_point(), 10.0);
        assert_eq!(window.out_point(), 200.0);

        assert!(window.set_in_point(250.0).is_err()); // past out
        assert!(window.set_out_point(5.0).is_err()); // before in
        assert!(window.set_out_point(400.0).is_err()); // past total
        assert!(window.set_in_point(-1.0).is_err());

        // Rejected mutations leave the window untouched.
        assert_eq!(window.in_point(), 10.0);
        assert_eq!(window.out_point(), 200.0);

        assert!(PlaybackWindow::clip(10.0, 5.0, 300.0).is_err());
        assert!(PlaybackWindow::clip(0.0, 10.0, 0.0).is_err());

        let mut live = PlaybackWindow::live();
        assert!(live.set_in_point(0.0).is_err());
        Ok(())
    }

    #[test]
    fn live_pacing_resets_the_origin_every_iteration() {
        let mut pacer = Pacer::new(INTERVAL_30FPS, 0.0);

        let deferred = pacer.plan(5.0, GrabOutcome::Live);
        assert!((deferred - (INTERVAL_30FPS - 5.0)).abs() < 1e-9);
        assert_eq!(pacer.start_ms(), 5.0);

        // A slow iteration yields no sleep, and no catch-up is attempted.
        let deferred = pacer.plan(50.0, GrabOutcome::Live);
        assert!(deferred < 0.0);
        assert_eq!(pacer.start_ms(), 50.0);
    }

    #[test]
    fn file_pacing_folds_in_the_decoder_timestamp() {
        let mut pacer = Pacer::new(INTERVAL_30FPS, 1000.0);

        // One frame in, the decoder reports its own position; the sleep is
        // origin + interval - now + pos, so decode jitter cancels out.
        let deferred = pacer.plan(1005.0, GrabOutcome::FileFrame { pos_ms: INTERVAL_30FPS });
        let expected = 1000.0 + INTERVAL_30FPS - 1005.0 + INTERVAL_30FPS;
        assert!((deferred - expected).abs() < 1e-9);
        // The origin is not touched on the success path.
        assert_eq!(pacer.start_ms(), 1000.0);
    }

    #[test]
    fn rewind_reanchors_with_no_pause() {
        let mut pacer = Pacer::new(INTERVAL_30FPS, 0.0);

        let deferred = pacer.plan(10_000.0, GrabOutcome::FileExhausted { in_point: 0.0 });
        assert_eq!(deferred, 0.0);
        assert_eq!(pacer.start_ms(), 10_000.0);

        // With a nonzero in point the origin lands in_point intervals back.
        let deferred = pacer.plan(20_000.0, GrabOutcome::FileExhausted { in_point: 2.0 });
        assert_eq!(deferred, 0.0);
        assert!((pacer.start_ms() - (20_000.0 - 2.0 * INTERVAL_30FPS)).abs() < 1e-9);
    }

    #[test]
    fn loop_cadence_continues_across_the_rewind() {
        // 300-frame clip at 30 fps: after the failed 301st grab the origin is
        // re-anchored so the next frame's sleep stays within one interval of
        // nominal.
        let mut pacer = Pacer::new(INTERVAL_30FPS, 0.0);
        let rewind_now = 300.0 * INTERVAL_30FPS + 4.0; // slight overrun

        let deferred = pacer.plan(rewind_now, GrabOutcome::FileExhausted { in_point: 0.0 });
        assert_eq!(deferred, 0.0);

        // Next iteration publishes frame 0 shortly after.
        let next_now = rewind_now + 2.0;
        let deferred = pacer.plan(next_now, GrabOutcome::FileFrame { pos_ms: INTERVAL_30FPS });
        assert!(deferred > 0.0);
        assert!(deferred <= 2.0 * INTERVAL_30FPS);
    }

    #[test]
    fn capture_once_publishes_inside_the_window() {
        let source = clip_adapter(3.0, 30.0);
        let slot = FrameSlot::new();

        // The open-time probe already consumed frame 0.
        let outcome = capture_once(&source, &slot);
        assert!(matches!(outcome, GrabOutcome::FileFrame { .. }));

        let mut sink = CountingSink::new();
        assert!(slot.consume(&mut sink));
        assert_eq!(sink.frames, 1);
    }

    #[test]
    fn capture_once_rewinds_at_the_out_point() {
        let source = clip_adapter(3.0, 30.0);
        let slot = FrameSlot::new();

        // Drain the clip: probe took frame 0, two more remain.
        for _ in 0..2 {
            let outcome = capture_once(&source, &slot);
            assert!(matches!(outcome, GrabOutcome::FileFrame { .. }));
        }
        assert_eq!(lock_or_recover(&source).position(), 3.0);

        // Next pass is ineligible: rewind to the in point, not an error.
        let outcome = capture_once(&source, &slot);
        assert_eq!(outcome, GrabOutcome::FileExhausted { in_point: 0.0 });
        assert_eq!(lock_or_recover(&source).position(), 0.0);

        // Playback resumes from the in point.
        let outcome = capture_once(&source, &slot);
        assert!(matches!(outcome, GrabOutcome::FileFrame { .. }));
        assert_eq!(lock_or_recover(&source).position(), 1.0);
    }

    #[test]
    fn capture_once_rewinds_to_a_nonzero_in_point() {
        let source = clip_adapter(5.0, 30.0);
        let slot = FrameSlot::new();
        lock_or_recover(&source)
            .set_in_point(2.0)
            .expect("trim the window");

        // Drain to the out point: the probe took frame 0, four remain.
        for _ in 0..4 {
            let outcome = capture_once(&source, &slot);
            assert!(matches!(outcome, GrabOutcome::FileFrame { .. }));
        }
        assert_eq!(lock_or_recover(&source).position(), 5.0);

        // The rewind lands on the in point, not frame 0.
        let outcome = capture_once(&source, &slot);
        assert_eq!(outcome, GrabOutcome::FileExhausted { in_point: 2.0 });
        assert_eq!(lock_or_recover(&source).position(), 2.0);

        // Playback resumes from there.
        let outcome = capture_once(&source, &slot);
        assert!(matches!(outcome, GrabOutcome::FileFrame { .. }));
        assert_eq!(lock_or_recover(&source).position(), 3.0);
    }

    #[test]
    fn capture_once_on_a_live_source_reports_live() {
        let source = Box::new(SyntheticSource::new(SyntheticConfig::default()));
        let adapter = SourceAdapter::from_source(source, "live-test", &OpenOptions::default())
            .expect("open synthetic live");
        let source = Mutex::new(adapter);
        let slot = FrameSlot::new();

        assert_eq!(capture_once(&source, &slot), GrabOutcome::Live);
        let mut sink = CountingSink::new();
        assert!(slot.consume(&mut sink));
    }
}
