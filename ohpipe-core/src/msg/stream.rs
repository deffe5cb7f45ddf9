//! Stream and control message payloads
//!
//! These messages carry no audio. Stream announcements hand downstream
//! elements a [`StreamHandler`] through which control requests travel back
//! upstream. Drain and Halt optionally carry a one-shot callback that fires
//! when the message reaches the end of the pipeline.

use super::audio::{DsdFormat, PcmFormat, SilenceFormat};
use super::ids::{FlushId, StreamId};
use crate::element::StreamHandler;
use crate::error::Result;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Whether a stream may be shared with other rooms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Multiroom {
    #[default]
    Allowed,
    Forbidden,
}

/// Capabilities of the active source mode
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModeInfo {
    /// Source honours a receiver latency
    pub supports_latency: bool,
    /// Source can skip forward
    pub supports_next: bool,
    /// Source can skip back
    pub supports_prev: bool,
    /// Pause/resume use the long ramp duration
    pub ramp_pause_resume_long: bool,
}

/// A new source mode becomes active
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgMode {
    pub mode: String,
    pub info: ModeInfo,
}

/// Start of a new track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgTrack {
    pub track_id: u32,
    pub uri: String,
    /// Track begins a new stream rather than continuing one
    pub start_of_stream: bool,
}

/// Requested total pipeline delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgDelay {
    pub total_jiffies: u64,
}

/// Description of an encoded stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedStreamInfo {
    pub uri: String,
    pub total_bytes: u64,
    pub stream_id: StreamId,
    pub seekable: bool,
    pub live: bool,
    pub multiroom: Multiroom,
}

/// Start of an encoded stream
#[derive(Clone)]
pub struct MsgEncodedStream {
    pub info: EncodedStreamInfo,
    stream_handler: Option<Arc<dyn StreamHandler>>,
}

impl MsgEncodedStream {
    pub fn new(info: EncodedStreamInfo, stream_handler: Option<Arc<dyn StreamHandler>>) -> Self {
        Self {
            info,
            stream_handler,
        }
    }

    pub fn stream_handler(&self) -> Option<Arc<dyn StreamHandler>> {
        self.stream_handler.clone()
    }

    /// Interpose a different handler (returns the previous one)
    pub fn set_stream_handler(
        &mut self,
        handler: Option<Arc<dyn StreamHandler>>,
    ) -> Option<Arc<dyn StreamHandler>> {
        std::mem::replace(&mut self.stream_handler, handler)
    }
}

impl fmt::Debug for MsgEncodedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgEncodedStream")
            .field("info", &self.info)
            .field("has_handler", &self.stream_handler.is_some())
            .finish()
    }
}

/// Sample representation of a decoded stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Pcm,
    Dsd,
}

/// Description of a decoded stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedStreamInfo {
    pub stream_id: StreamId,
    pub bit_rate: u32,
    pub bit_depth: u32,
    pub sample_rate: u32,
    pub channels: u32,
    pub codec_name: String,
    /// Track duration in jiffies (0 if unknown)
    pub track_length: u64,
    /// First sample of this stream within the track
    pub sample_start: u64,
    pub lossless: bool,
    pub seekable: bool,
    pub live: bool,
    pub format: AudioFormat,
    pub multiroom: Multiroom,
}

impl DecodedStreamInfo {
    /// Convenience constructor for a PCM stream; other fields take defaults
    pub fn pcm(stream_id: StreamId, sample_rate: u32, bit_depth: u32, channels: u32) -> Self {
        Self {
            stream_id,
            bit_rate: sample_rate * bit_depth * channels,
            bit_depth,
            sample_rate,
            channels,
            codec_name: "PCM".to_string(),
            track_length: 0,
            sample_start: 0,
            lossless: true,
            seekable: false,
            live: false,
            format: AudioFormat::Pcm,
            multiroom: Multiroom::Allowed,
        }
    }

    /// Convenience constructor for a DSD stream
    pub fn dsd(stream_id: StreamId, sample_rate: u32, channels: u32) -> Self {
        Self {
            bit_depth: 1,
            codec_name: "DSD".to_string(),
            format: AudioFormat::Dsd,
            ..Self::pcm(stream_id, sample_rate, 1, channels)
        }
    }

    pub fn pcm_format(&self) -> Result<PcmFormat> {
        PcmFormat::new(self.sample_rate, self.bit_depth, self.channels)
    }

    pub fn dsd_format(&self) -> Result<DsdFormat> {
        DsdFormat::new(self.sample_rate, self.channels)
    }

    /// Format for silence matching this stream
    pub fn silence_format(&self) -> Result<SilenceFormat> {
        match self.format {
            AudioFormat::Pcm => Ok(SilenceFormat::Pcm(self.pcm_format()?)),
            AudioFormat::Dsd => Ok(SilenceFormat::Dsd(self.dsd_format()?)),
        }
    }

    /// Human readable format name used in events
    pub fn format_name(&self) -> &'static str {
        match self.format {
            AudioFormat::Pcm => "pcm",
            AudioFormat::Dsd => "dsd",
        }
    }
}

/// Start of a decoded stream
#[derive(Clone)]
pub struct MsgDecodedStream {
    pub info: DecodedStreamInfo,
    stream_handler: Option<Arc<dyn StreamHandler>>,
}

impl MsgDecodedStream {
    pub fn new(info: DecodedStreamInfo, stream_handler: Option<Arc<dyn StreamHandler>>) -> Self {
        Self {
            info,
            stream_handler,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.info.stream_id
    }

    pub fn stream_handler(&self) -> Option<Arc<dyn StreamHandler>> {
        self.stream_handler.clone()
    }

    /// Interpose a different handler (returns the previous one)
    pub fn set_stream_handler(
        &mut self,
        handler: Option<Arc<dyn StreamHandler>>,
    ) -> Option<Arc<dyn StreamHandler>> {
        std::mem::replace(&mut self.stream_handler, handler)
    }
}

impl fmt::Debug for MsgDecodedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgDecodedStream")
            .field("info", &self.info)
            .field("has_handler", &self.stream_handler.is_some())
            .finish()
    }
}

/// Callback that runs at most once, however many branches share it
#[derive(Clone, Default)]
pub struct ReportOnce {
    callback: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl ReportOnce {
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            callback: Arc::new(Mutex::new(Some(Box::new(callback)))),
        }
    }

    /// Run the callback if it has not run yet
    pub fn report(&self) {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn is_reported(&self) -> bool {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for ReportOnce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReportOnce(reported={})", self.is_reported())
    }
}

/// Barrier: everything before it must be played out before anything after
#[derive(Debug, Clone)]
pub struct MsgDrain {
    pub id: u32,
    signal: ReportOnce,
}

impl MsgDrain {
    pub(crate) fn new(id: u32, signal: ReportOnce) -> Self {
        Self { id, signal }
    }

    /// Called by the pipeline's final consumer
    pub fn report_drained(&self) {
        self.signal.report();
    }
}

/// Playback stops after the preceding audio
#[derive(Debug, Clone)]
pub struct MsgHalt {
    pub id: u32,
    signal: Option<ReportOnce>,
}

impl MsgHalt {
    pub(crate) fn new(id: u32, signal: Option<ReportOnce>) -> Self {
        Self { id, signal }
    }

    /// Called by the pipeline's final consumer
    pub fn report_halted(&self) {
        if let Some(signal) = &self.signal {
            signal.report();
        }
    }
}

/// Discard barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgFlush {
    pub id: FlushId,
}

/// Source is temporarily paused upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgWait;

/// Pipeline shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgQuit;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_report_once_fires_once_across_clones() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let signal = ReportOnce::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let drain = MsgDrain::new(1, signal);
        let branch = drain.clone();

        assert!(!drain.signal.is_reported());
        drain.report_drained();
        branch.report_drained();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_halt_without_callback() {
        let halt = MsgHalt::new(3, None);
        halt.report_halted();
        assert_eq!(halt.id, 3);
    }

    #[test]
    fn test_decoded_stream_formats() {
        let info = DecodedStreamInfo::pcm(StreamId(4), 48000, 24, 2);
        assert_eq!(info.pcm_format().unwrap().jiffies_per_sample(), 1176);
        assert_eq!(info.format_name(), "pcm");

        let dsd = DecodedStreamInfo::dsd(StreamId(5), 2_822_400, 2);
        assert!(matches!(
            dsd.silence_format().unwrap(),
            SilenceFormat::Dsd(_)
        ));
    }
}
