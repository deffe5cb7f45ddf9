//! Shared fixtures for the ohpipe-core integration tests
//!
//! - Animators with fixed capabilities and latency
//! - Tone generation in the 48kHz stereo test format
//! - Polling helpers for the StarvationRamper reservoir and the event bus

#![allow(dead_code)]

use ohpipe_common::events::PipelineEvent;
use ohpipe_core::element::PipelineAnimator;
use ohpipe_core::elements::StarvationRamperHandle;
use ohpipe_core::msg::{DecodedStreamInfo, PcmFormat, StreamId};
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;

/// Jiffies per sample at 48kHz
pub const JPS: u64 = 1176;

pub fn stereo_48k() -> PcmFormat {
    PcmFormat::new(48000, 16, 2).unwrap()
}

pub fn stream_info(id: u32) -> DecodedStreamInfo {
    DecodedStreamInfo::pcm(StreamId(id), 48000, 16, 2)
}

/// `frames` of a 1kHz stereo sine at half scale
pub fn tone(frames: usize) -> Vec<f32> {
    (0..frames)
        .flat_map(|i| {
            let s = 0.5 * (2.0 * std::f32::consts::PI * i as f32 / 48.0).sin();
            [s, s]
        })
        .collect()
}

/// Stereo PCM sink with a fixed output latency
pub struct FixedDelayAnimator {
    pub delay_jiffies: u64,
}

impl FixedDelayAnimator {
    pub fn new(delay_jiffies: u64) -> Self {
        Self { delay_jiffies }
    }
}

impl PipelineAnimator for FixedDelayAnimator {
    fn max_sample_rate_pcm(&self) -> u32 {
        192_000
    }

    fn max_sample_rate_dsd(&self) -> u32 {
        0
    }

    fn max_bit_depth(&self) -> u32 {
        24
    }

    fn max_channels(&self) -> u32 {
        2
    }

    fn delay_jiffies(&self, _info: &DecodedStreamInfo) -> ohpipe_core::Result<u64> {
        Ok(self.delay_jiffies)
    }
}

/// Block until the reservoir holds at least `jiffies` of audio
pub fn settle(handle: &StarvationRamperHandle, jiffies: u64) {
    for _ in 0..1000 {
        if handle.buffered_jiffies() >= jiffies {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!(
        "reservoir stuck at {} of {} jiffies",
        handle.buffered_jiffies(),
        jiffies
    );
}

/// Block until the reservoir holds at least `msgs` messages
pub fn settle_msgs(handle: &StarvationRamperHandle, msgs: usize) {
    for _ in 0..1000 {
        if handle.buffered_msgs() >= msgs {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!(
        "reservoir stuck at {} of {} messages",
        handle.buffered_msgs(),
        msgs
    );
}

/// Everything currently queued on an event receiver
pub fn drain_events(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
