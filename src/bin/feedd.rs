//! feedd - capture demo daemon
//!
//! Opens a capture source, runs the paced worker, and polls the frame slot
//! the way a render loop would, logging throughput instead of uploading to a
//! texture. Useful for soak-testing backends and pacing behavior.

use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use framefeed::{Capture, FeedConfig, FrameSink, PixelFormat};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Capture source: device index, file path, or stub:// URI. Overrides
    /// FEED_SOURCE and the config file.
    #[arg(long)]
    source: Option<String>,
    /// Requested frame width; 0 keeps the source default.
    #[arg(long)]
    width: Option<u32>,
    /// Requested frame height; 0 keeps the source default.
    #[arg(long)]
    height: Option<u32>,
    /// Requested frame rate; 0 keeps the source default.
    #[arg(long)]
    fps: Option<f64>,
    /// Four-character codec tag, e.g. MJPG.
    #[arg(long)]
    fourcc: Option<String>,
    /// Seconds to run; 0 runs until Ctrl-C.
    #[arg(long, default_value_t = 0)]
    seconds: u64,
}

/// Sink that counts deliveries instead of uploading them anywhere.
#[derive(Default)]
struct StatsSink {
    frames: u64,
    bytes: u64,
}

impl FrameSink for StatsSink {
    fn put(&mut self, pixels: &[u8], _width: u32, _height: u32, _format: PixelFormat) {
        self.frames += 1;
        self.bytes += pixels.len() as u64;
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = FeedConfig::load()?;
    if let Some(source) = args.source {
        cfg.source = source;
    }
    if let Some(width) = args.width {
        cfg.width = width;
    }
    if let Some(height) = args.height {
        cfg.height = height;
    }
    if let Some(fps) = args.fps {
        cfg.fps = fps;
    }
    if let Some(fourcc) = args.fourcc {
        cfg.fourcc = fourcc;
    }

    let mut capture = Capture::new();
    capture.open(&cfg.target(), &cfg.open_options())?;
    capture.start()?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })?;

    let deadline = (args.seconds > 0).then(|| Instant::now() + Duration::from_secs(args.seconds));
    // Poll at roughly twice the frame rate, like a render loop would.
    let poll = Duration::from_millis(((capture.interval_ms() / 2.0) as u64).max(1));

    let mut sink = StatsSink::default();
    let mut window_frames = 0u64;
    let mut last_stats = Instant::now();

    log::info!(
        "feedd: running, poll interval {}ms, stats every {}s",
        poll.as_millis(),
        cfg.stats_interval.as_secs()
    );

    while !stop.load(Ordering::SeqCst) {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }

        if capture.consume(&mut sink) {
            window_frames += 1;
        }

        if last_stats.elapsed() >= cfg.stats_interval {
            let elapsed = last_stats.elapsed().as_secs_f64();
            log::info!(
                "feedd: {:.1} fps delivered, position {:.0}/{:.0}",
                window_frames as f64 / elapsed,
                capture.position(),
                capture.frame_count(),
            );
            window_frames = 0;
            last_stats = Instant::now();
        }

        std::thread::sleep(poll);
    }

    capture.stop();
    capture.close();
    log::info!(
        "feedd: done, {} frames ({} bytes) delivered",
        sink.frames,
        sink.bytes
    );
    Ok(())
}
