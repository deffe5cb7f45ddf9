//! Proportional clock puller
//!
//! Turns the latency drift reported by the PhaseAdjuster into a playback
//! rate correction. Drift accumulates while the puller is started; the
//! correction is proportional to it and clamped to `max_ppm`.

use crate::element::ClockPuller;
use ohpipe_common::config::PipelineConfig;
use ohpipe_common::jiffies::JIFFIES_PER_SECOND;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tracing::debug;

pub struct ProportionalClockPuller {
    max_ppm: i64,
    running: AtomicBool,
    drift: AtomicI64,
}

impl ProportionalClockPuller {
    pub fn new(max_ppm: u32) -> Self {
        Self {
            max_ppm: max_ppm as i64,
            running: AtomicBool::new(false),
            drift: AtomicI64::new(0),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.phase_adjuster.max_clock_ppm)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Accumulated drift in jiffies
    pub fn drift_jiffies(&self) -> i64 {
        self.drift.load(Ordering::Acquire)
    }

    /// Rate correction in parts per million
    ///
    /// Positive when latency has grown, meaning the sink should consume
    /// slightly faster.
    pub fn correction_ppm(&self) -> i64 {
        let ppm = self.drift_jiffies() as i128 * 1_000_000 / JIFFIES_PER_SECOND as i128;
        (ppm as i64).clamp(-self.max_ppm, self.max_ppm)
    }

    /// Playback rate multiplier, 1.0 when no correction is needed
    pub fn multiplier(&self) -> f64 {
        1.0 + self.correction_ppm() as f64 / 1_000_000.0
    }
}

impl ClockPuller for ProportionalClockPuller {
    fn update(&self, delta_jiffies: i64) {
        if self.is_running() {
            self.drift.fetch_add(delta_jiffies, Ordering::AcqRel);
        }
    }

    fn start(&self) {
        debug!("ClockPuller: started");
        self.running.store(true, Ordering::Release);
    }

    fn stop(&self) {
        debug!(
            "ClockPuller: stopped at {} ppm",
            self.correction_ppm()
        );
        self.running.store(false, Ordering::Release);
        self.drift.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignores_updates_until_started() {
        let puller = ProportionalClockPuller::new(500);
        puller.update(1000);
        assert_eq!(puller.drift_jiffies(), 0);
        puller.start();
        puller.update(1000);
        puller.update(-400);
        assert_eq!(puller.drift_jiffies(), 600);
    }

    #[test]
    fn test_correction_clamped() {
        let puller = ProportionalClockPuller::new(100);
        puller.start();
        // 1 ms of drift is 1000 ppm of a second
        puller.update(JIFFIES_PER_SECOND as i64 / 1000);
        assert_eq!(puller.correction_ppm(), 100);
        assert!((puller.multiplier() - 1.0001).abs() < 1e-9);
    }

    #[test]
    fn test_stop_resets() {
        let puller = ProportionalClockPuller::new(100);
        puller.start();
        puller.update(-56_448);
        assert_eq!(puller.correction_ppm(), -100);
        puller.stop();
        assert!(!puller.is_running());
        assert_eq!(puller.correction_ppm(), 0);
    }
}
