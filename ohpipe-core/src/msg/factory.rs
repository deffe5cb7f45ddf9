//! Message allocation
//!
//! Audio-bearing messages hold a [`PoolToken`] from a bounded pool. When the
//! pool is exhausted, fresh allocations block until downstream consumers
//! release messages; this is the pipeline's backpressure. Splitting or
//! cloning an existing message never blocks, so an element can always finish
//! processing a message it already holds.

use super::audio::{
    DsdFormat, MsgAudioDsd, MsgAudioEncoded, MsgAudioPcm, MsgSilence, MsgTimestamps, PcmFormat,
    SilenceFormat,
};
use super::stream::{
    DecodedStreamInfo, EncodedStreamInfo, ModeInfo, MsgDecodedStream, MsgDelay, MsgDrain,
    MsgEncodedStream, MsgFlush, MsgHalt, MsgMode, MsgQuit, MsgTrack, MsgWait, ReportOnce,
};
use super::ids::FlushId;
use crate::element::StreamHandler;
use crate::error::Result;
use ohpipe_common::config::PipelineConfig;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use tracing::debug;

struct MsgPool {
    capacity: usize,
    in_use: Mutex<usize>,
    released: Condvar,
    peak: AtomicUsize,
    allocated: AtomicU64,
}

impl MsgPool {
    fn record(&self, in_use: usize) {
        self.peak.fetch_max(in_use, Ordering::Relaxed);
        self.allocated.fetch_add(1, Ordering::Relaxed);
    }
}

/// Proof of one pool slot; released on drop
pub struct PoolToken {
    pool: Arc<MsgPool>,
}

impl PoolToken {
    fn acquire(pool: &Arc<MsgPool>) -> Self {
        let mut in_use = pool.in_use.lock().unwrap_or_else(PoisonError::into_inner);
        if *in_use >= pool.capacity {
            debug!(
                "Message pool exhausted ({} in use), waiting for release",
                *in_use
            );
        }
        while *in_use >= pool.capacity {
            in_use = pool
                .released
                .wait(in_use)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *in_use += 1;
        pool.record(*in_use);
        Self {
            pool: Arc::clone(pool),
        }
    }

    /// Take a slot for a fragment of an existing message, without waiting
    pub(crate) fn split(&self) -> Self {
        let mut in_use = self
            .pool
            .in_use
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *in_use += 1;
        self.pool.record(*in_use);
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl Drop for PoolToken {
    fn drop(&mut self) {
        let mut in_use = self
            .pool
            .in_use
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *in_use = in_use.saturating_sub(1);
        self.pool.released.notify_one();
    }
}

impl fmt::Debug for PoolToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PoolToken")
    }
}

/// Pool usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub in_use: usize,
    pub peak: usize,
    pub allocated: u64,
}

/// Creates every message that flows through the pipeline
pub struct MsgFactory {
    pool: Arc<MsgPool>,
    next_track_id: AtomicU32,
    next_drain_id: AtomicU32,
    next_halt_id: AtomicU32,
}

impl MsgFactory {
    /// Factory whose pool allows `capacity` live audio messages
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: Arc::new(MsgPool {
                capacity: capacity.max(1),
                in_use: Mutex::new(0),
                released: Condvar::new(),
                peak: AtomicUsize::new(0),
                allocated: AtomicU64::new(0),
            }),
            next_track_id: AtomicU32::new(1),
            next_drain_id: AtomicU32::new(1),
            next_halt_id: AtomicU32::new(1),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.msg_pool.capacity)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.pool.capacity,
            in_use: *self
                .pool
                .in_use
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            peak: self.pool.peak.load(Ordering::Relaxed),
            allocated: self.pool.allocated.load(Ordering::Relaxed),
        }
    }

    fn token(&self) -> PoolToken {
        PoolToken::acquire(&self.pool)
    }

    pub fn create_mode(&self, mode: &str, info: ModeInfo) -> MsgMode {
        MsgMode {
            mode: mode.to_string(),
            info,
        }
    }

    pub fn create_track(&self, uri: &str, start_of_stream: bool) -> MsgTrack {
        MsgTrack {
            track_id: self.next_track_id.fetch_add(1, Ordering::Relaxed),
            uri: uri.to_string(),
            start_of_stream,
        }
    }

    pub fn create_delay(&self, total_jiffies: u64) -> MsgDelay {
        MsgDelay { total_jiffies }
    }

    pub fn create_encoded_stream(
        &self,
        info: EncodedStreamInfo,
        stream_handler: Option<Arc<dyn StreamHandler>>,
    ) -> MsgEncodedStream {
        MsgEncodedStream::new(info, stream_handler)
    }

    pub fn create_decoded_stream(
        &self,
        info: DecodedStreamInfo,
        stream_handler: Option<Arc<dyn StreamHandler>>,
    ) -> MsgDecodedStream {
        MsgDecodedStream::new(info, stream_handler)
    }

    /// Blocks while the pool is exhausted
    pub fn create_audio_encoded(&self, bytes: Vec<u8>) -> MsgAudioEncoded {
        MsgAudioEncoded::new(bytes, self.token())
    }

    /// Blocks while the pool is exhausted
    pub fn create_audio_pcm(
        &self,
        samples: Vec<f32>,
        format: PcmFormat,
        track_offset: u64,
    ) -> Result<MsgAudioPcm> {
        MsgAudioPcm::new(samples, format, track_offset, None, self.token())
    }

    /// PCM carrying sender/receiver clock readings
    pub fn create_audio_pcm_timestamped(
        &self,
        samples: Vec<f32>,
        format: PcmFormat,
        track_offset: u64,
        timestamps: MsgTimestamps,
    ) -> Result<MsgAudioPcm> {
        MsgAudioPcm::new(samples, format, track_offset, Some(timestamps), self.token())
    }

    pub fn create_audio_dsd(
        &self,
        bytes: Vec<u8>,
        format: DsdFormat,
        track_offset: u64,
    ) -> Result<MsgAudioDsd> {
        MsgAudioDsd::new(bytes, format, track_offset, self.token())
    }

    /// Silence of at most `jiffies` (whole samples, at least one)
    pub fn create_silence(&self, jiffies: u64, format: SilenceFormat) -> MsgSilence {
        MsgSilence::new(jiffies, format, self.token())
    }

    /// Drain whose `callback` runs once the drain reaches the pipeline end
    pub fn create_drain(&self, callback: impl FnOnce() + Send + 'static) -> MsgDrain {
        let id = self.next_drain_id.fetch_add(1, Ordering::Relaxed);
        MsgDrain::new(id, ReportOnce::new(callback))
    }

    pub fn create_halt(&self) -> MsgHalt {
        MsgHalt::new(self.next_halt_id.fetch_add(1, Ordering::Relaxed), None)
    }

    pub fn create_halt_with_callback(&self, callback: impl FnOnce() + Send + 'static) -> MsgHalt {
        MsgHalt::new(
            self.next_halt_id.fetch_add(1, Ordering::Relaxed),
            Some(ReportOnce::new(callback)),
        )
    }

    pub fn create_flush(&self, id: FlushId) -> MsgFlush {
        MsgFlush { id }
    }

    pub fn create_wait(&self) -> MsgWait {
        MsgWait
    }

    pub fn create_quit(&self) -> MsgQuit {
        MsgQuit
    }
}

impl fmt::Debug for MsgFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgFactory")
            .field("stats", &self.stats())
            .finish()
    }
}
