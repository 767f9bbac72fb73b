//! Canonical to native parameter mapping
//!
//! Every backend exposes rate, pitch and volume in its own range. These maps
//! are deterministic and clamp their result to the native range, so no input
//! can ever crash or be rejected.

use super::voice::{
    clamp_or, PITCH_MAX, PITCH_MIN, PITCH_NORMAL, RATE_MAX, RATE_MIN, RATE_NORMAL, VOLUME_MAX,
    VOLUME_MIN,
};

/// A native parameter range with its neutral point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeRange {
    pub min: f32,
    pub normal: f32,
    pub max: f32,
}

impl NativeRange {
    pub const fn new(min: f32, normal: f32, max: f32) -> Self {
        Self { min, normal, max }
    }

    fn clamp(&self, value: f32) -> f32 {
        clamp_or(value, self.min, self.max, self.normal)
    }
}

/// Native ranges of one backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeRanges {
    pub rate: NativeRange,
    pub pitch: NativeRange,
    pub volume: NativeRange,
}

/// Native values computed for one utterance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeParams {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl NativeRanges {
    /// Map canonical rate/pitch/volume onto these ranges
    pub fn map(&self, rate: f32, pitch: f32, volume: f32) -> NativeParams {
        NativeParams {
            rate: map_rate(rate, &self.rate),
            pitch: map_linear(pitch, PITCH_MIN, PITCH_MAX, PITCH_NORMAL, &self.pitch),
            volume: map_linear(volume, VOLUME_MIN, VOLUME_MAX, VOLUME_MAX, &self.volume),
        }
    }
}

/// Map a canonical rate onto a native range
///
/// Piecewise linear, anchored at the neutral point: `[0.1, 1.0)` covers the
/// native range below normal and `[1.0, 10.0]` the range above it, so 1.0
/// always lands exactly on `native.normal`.
pub fn map_rate(rate: f32, native: &NativeRange) -> f32 {
    let rate = clamp_or(rate, RATE_MIN, RATE_MAX, RATE_NORMAL);
    let mapped = if rate < RATE_NORMAL {
        let t = (rate - RATE_MIN) / (RATE_NORMAL - RATE_MIN);
        native.min + t * (native.normal - native.min)
    } else {
        let t = (rate - RATE_NORMAL) / (RATE_MAX - RATE_NORMAL);
        native.normal + t * (native.max - native.normal)
    };
    native.clamp(mapped)
}

/// Map a canonical value linearly across its full range onto `[native.min, native.max]`
///
/// NaN is treated as `neutral`.
pub fn map_linear(value: f32, min: f32, max: f32, neutral: f32, native: &NativeRange) -> f32 {
    let value = clamp_or(value, min, max, neutral);
    let t = (value - min) / (max - min);
    native.clamp(native.min + t * (native.max - native.min))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAPI_RATE: NativeRange = NativeRange::new(-10.0, 0.0, 10.0);
    const ESPEAK_RATE: NativeRange = NativeRange::new(80.0, 175.0, 450.0);

    #[test]
    fn test_rate_neutral_is_exact() {
        assert_eq!(map_rate(1.0, &SAPI_RATE), 0.0);
        assert_eq!(map_rate(1.0, &ESPEAK_RATE), 175.0);
    }

    #[test]
    fn test_rate_endpoints() {
        assert_eq!(map_rate(0.1, &SAPI_RATE), -10.0);
        assert_eq!(map_rate(10.0, &SAPI_RATE), 10.0);
        assert_eq!(map_rate(0.1, &ESPEAK_RATE), 80.0);
        assert_eq!(map_rate(10.0, &ESPEAK_RATE), 450.0);
    }

    #[test]
    fn test_rate_asymmetric_slopes() {
        // 5.5 is halfway between normal and max
        assert!((map_rate(5.5, &SAPI_RATE) - 5.0).abs() < 1e-4);
        // 0.55 is halfway between min and normal
        assert!((map_rate(0.55, &SAPI_RATE) + 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_out_of_range_clamps() {
        assert_eq!(map_rate(100.0, &SAPI_RATE), 10.0);
        assert_eq!(map_rate(-3.0, &SAPI_RATE), -10.0);
        assert_eq!(map_rate(f32::INFINITY, &SAPI_RATE), 10.0);
        assert_eq!(map_rate(f32::NAN, &SAPI_RATE), 0.0);

        let volume = NativeRange::new(0.0, 100.0, 100.0);
        assert_eq!(map_linear(7.0, 0.0, 1.0, 1.0, &volume), 100.0);
        assert_eq!(map_linear(-7.0, 0.0, 1.0, 1.0, &volume), 0.0);
    }

    #[test]
    fn test_linear_pitch() {
        let speechd = NativeRange::new(-100.0, 0.0, 100.0);
        assert_eq!(map_linear(1.0, 0.0, 2.0, 1.0, &speechd), 0.0);
        assert_eq!(map_linear(0.0, 0.0, 2.0, 1.0, &speechd), -100.0);
        assert_eq!(map_linear(2.0, 0.0, 2.0, 1.0, &speechd), 100.0);
    }

    #[test]
    fn test_ranges_map() {
        let ranges = NativeRanges {
            rate: SAPI_RATE,
            pitch: NativeRange::new(0.0, 0.0, 0.0),
            volume: NativeRange::new(0.0, 100.0, 100.0),
        };
        let params = ranges.map(1.0, 1.0, 0.5);
        assert_eq!(params.rate, 0.0);
        assert_eq!(params.pitch, 0.0);
        assert_eq!(params.volume, 50.0);
    }
}
