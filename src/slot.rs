//! Single-slot frame hand-off between the capture worker and the consumer.
//!
//! The slot is the only channel between the two actors:
//! - The worker `publish`es under the lock; a new frame always overwrites any
//!   unread one (latest-wins, capacity 1, drop-oldest).
//! - The consumer `consume`s with a non-blocking try-lock and never waits on
//!   the worker. A contended lock or an empty slot is a prompt no-op.
//!
//! There is no condition variable and no wake-up signal; the consumer polls on
//! its own cadence (typically once per render frame).

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

/// Pixel layout of a captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit interleaved blue/green/red, the usual decoder output.
    Bgr8,
    /// 8-bit interleaved red/green/blue.
    Rgb8,
    /// 8-bit single channel.
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// One decoded frame with an owned pixel buffer.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl RawFrame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            pixels,
            width,
            height,
            format,
        }
    }
}

/// Consumer-owned destination for published frames.
///
/// Implementations typically upload to a GPU texture. The slot makes no
/// assumption about how the sink stores or displays pixels.
pub trait FrameSink {
    fn put(&mut self, pixels: &[u8], width: u32, height: u32, format: PixelFormat);
}

/// Single-capacity, drop-oldest hand-off buffer.
///
/// Clones share the same slot; the worker holds one clone, the owning
/// `Capture` the other.
#[derive(Clone, Default)]
pub struct FrameSlot {
    pending: Arc<Mutex<Option<RawFrame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer side: overwrite any unread frame with `frame`.
    pub(crate) fn publish(&self, frame: RawFrame) {
        *lock_or_recover(&self.pending) = Some(frame);
    }

    /// Consumer side: deliver the pending frame to `sink`, if any.
    ///
    /// Non-blocking: if the worker currently holds the lock, or no frame is
    /// pending, this returns `false` immediately with no side effects.
    pub fn consume<S: FrameSink>(&self, sink: &mut S) -> bool {
        let mut pending = match self.pending.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return false,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        match pending.take() {
            Some(frame) => {
                sink.put(&frame.pixels, frame.width, frame.height, frame.format);
                true
            }
            None => false,
        }
    }

    /// Drop any unread frame. Called by `stop()` so a stale frame never
    /// survives a worker shutdown.
    pub(crate) fn clear(&self) {
        lock_or_recover(&self.pending).take();
    }

    #[cfg(test)]
    fn has_pending(&self) -> bool {
        lock_or_recover(&self.pending).is_some()
    }
}

/// Lock a mutex, recovering the inner state if a worker panicked while
/// holding it. The slot holds plain data, so the poisoned value is still
/// consistent.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
