//! Exposure/gain shadow controller.
//!
//! The controller keeps local shadow values, seeded once at open time, and
//! pushes one-unit adjustments to the source only while it is open. Pushes
//! against a closed source are silently dropped; no error is surfaced.

use crate::source::{SourceAdapter, SourceProperty};

/// Device-unit convention inherited from the capture backends: exposure reads
/// arrive pre-scaled by 10 and pushes are scaled back by 0.1. The asymmetry is
/// deliberate pass-through of backend behavior; confirm per backend before
/// treating it as symmetric.
pub const EXPOSURE_READ_SCALE: f64 = 10.0;
pub const EXPOSURE_PUSH_SCALE: f64 = 0.1;

/// Local exposure/gain shadow, in whole adjustment units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExposureGain {
    exposure: i32,
    gain: i32,
}

impl ExposureGain {
    pub fn new(exposure: i32, gain: i32) -> Self {
        Self { exposure, gain }
    }

    pub(crate) fn from_adapter(adapter: &SourceAdapter) -> Self {
        Self::new(adapter.exposure_shadow(), adapter.gain_shadow())
    }

    pub fn exposure(&self) -> i32 {
        self.exposure
    }

    pub fn gain(&self) -> i32 {
        self.gain
    }

    pub fn increase_exposure(&mut self, adapter: Option<&mut SourceAdapter>) {
        self.exposure += 1;
        self.push_exposure(adapter);
    }

    pub fn decrease_exposure(&mut self, adapter: Option<&mut SourceAdapter>) {
        self.exposure -= 1;
        self.push_exposure(adapter);
    }

    pub fn increase_gain(&mut self, adapter: Option<&mut SourceAdapter>) {
        self.gain += 1;
        self.push_gain(adapter);
    }

    pub fn decrease_gain(&mut self, adapter: Option<&mut SourceAdapter>) {
        self.gain -= 1;
        self.push_gain(adapter);
    }

    fn push_exposure(&self, adapter: Option<&mut SourceAdapter>) {
        if let Some(adapter) = adapter {
            if adapter.is_opened() {
                adapter.set(
                    SourceProperty::Exposure,
                    self.exposure as f64 * EXPOSURE_PUSH_SCALE,
                );
            }
        }
    }

    fn push_gain(&self, adapter: Option<&mut SourceAdapter>) {
        if let Some(adapter) = adapter {
            if adapter.is_opened() {
                adapter.set(SourceProperty::Gain, self.gain as f64);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
