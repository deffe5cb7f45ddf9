//! Jiffies: the pipeline's fixed-point time base
//!
//! Every duration that flows through the pipeline (audio message lengths,
//! ramp durations, delays, reservoir capacities) is expressed in jiffies.
//! One second is 56,448,000 jiffies. The rate is a common multiple of every
//! supported PCM sample rate (both the 44.1 kHz and 48 kHz families, up to
//! 384 kHz) and of the DSD rates, so a single sample at any supported rate is
//! a whole number of jiffies.
//!
//! | Rate (Hz)  | Jiffies/Sample |
//! |------------|----------------|
//! | 8,000      | 7,056          |
//! | 44,100     | 1,280          |
//! | 48,000     | 1,176          |
//! | 96,000     | 588            |
//! | 192,000    | 294            |
//! | 384,000    | 147            |
//! | 2,822,400  | 20 (DSD64)     |
//!
//! # Examples
//!
//! ```rust
//! use ohpipe_common::jiffies::*;
//!
//! let five_seconds = ms_to_jiffies(5000);
//! assert_eq!(five_seconds, 282_240_000);
//! assert_eq!(jiffies_to_samples(five_seconds, 44100).unwrap(), 220_500);
//! assert_eq!(jiffies_to_samples(five_seconds, 48000).unwrap(), 240_000);
//! ```

use crate::{Error, Result};

/// Jiffies in one second
pub const JIFFIES_PER_SECOND: u64 = 56_448_000;

/// Jiffies in one millisecond
pub const JIFFIES_PER_MS: u64 = 56_448;

/// PCM sample rates the pipeline accepts
pub const SUPPORTED_PCM_RATES: [u32; 15] = [
    8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 88200, 96000, 176400, 192000,
    352800, 384000,
];

/// DSD sample rates the pipeline accepts (DSD64, DSD128, DSD256)
pub const SUPPORTED_DSD_RATES: [u32; 3] = [2_822_400, 5_644_800, 11_289_600];

/// Jiffies per sample at `sample_rate`
///
/// Fails for rates that jiffies cannot address exactly (including zero).
///
/// ```rust
/// use ohpipe_common::jiffies::jiffies_per_sample;
///
/// assert_eq!(jiffies_per_sample(44100).unwrap(), 1280);
/// assert_eq!(jiffies_per_sample(48000).unwrap(), 1176);
/// assert!(jiffies_per_sample(44000).is_err());
/// ```
pub fn jiffies_per_sample(sample_rate: u32) -> Result<u64> {
    if sample_rate == 0 || JIFFIES_PER_SECOND % sample_rate as u64 != 0 {
        return Err(Error::UnsupportedSampleRate(sample_rate));
    }
    Ok(JIFFIES_PER_SECOND / sample_rate as u64)
}

/// Whether `sample_rate` is one of the supported PCM or DSD rates
pub fn is_supported_rate(sample_rate: u32) -> bool {
    SUPPORTED_PCM_RATES.contains(&sample_rate) || SUPPORTED_DSD_RATES.contains(&sample_rate)
}

/// Convert milliseconds to jiffies
pub fn ms_to_jiffies(milliseconds: u64) -> u64 {
    milliseconds * JIFFIES_PER_MS
}

/// Convert jiffies to milliseconds (truncating)
///
/// ```rust
/// use ohpipe_common::jiffies::jiffies_to_ms;
///
/// assert_eq!(jiffies_to_ms(56_448), 1);
/// assert_eq!(jiffies_to_ms(56_447), 0);
/// ```
pub fn jiffies_to_ms(jiffies: u64) -> u64 {
    jiffies / JIFFIES_PER_MS
}

/// Convert a sample count to jiffies
pub fn samples_to_jiffies(samples: u64, sample_rate: u32) -> Result<u64> {
    Ok(samples * jiffies_per_sample(sample_rate)?)
}

/// Convert jiffies to a whole sample count, discarding any partial sample
pub fn jiffies_to_samples(jiffies: u64, sample_rate: u32) -> Result<u64> {
    Ok(jiffies / jiffies_per_sample(sample_rate)?)
}

/// Round `jiffies` down to the nearest whole-sample boundary
///
/// ```rust
/// use ohpipe_common::jiffies::round_down_to_sample;
///
/// assert_eq!(round_down_to_sample(1281, 1280), 1280);
/// assert_eq!(round_down_to_sample(1279, 1280), 0);
/// ```
pub fn round_down_to_sample(jiffies: u64, jiffies_per_sample: u64) -> u64 {
    debug_assert!(jiffies_per_sample > 0);
    jiffies - (jiffies % jiffies_per_sample)
}

/// Whether `jiffies` falls exactly on a sample boundary
pub fn is_sample_aligned(jiffies: u64, jiffies_per_sample: u64) -> bool {
    jiffies % jiffies_per_sample == 0
}

/// Convert jiffies to seconds, for display and logging
pub fn jiffies_to_seconds(jiffies: u64) -> f64 {
    jiffies as f64 / JIFFIES_PER_SECOND as f64
}

/// Convert seconds to jiffies, rounded to the nearest jiffy
pub fn seconds_to_jiffies(seconds: f64) -> u64 {
    (seconds.max(0.0) * JIFFIES_PER_SECOND as f64).round() as u64
}
