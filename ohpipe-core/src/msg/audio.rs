//! Audio-bearing message payloads
//!
//! Decoded audio is held as an immutable, reference-counted buffer plus a
//! window into it, so splitting a message or cloning it for a second branch
//! never copies samples. Ramps stay descriptors until the message is
//! rendered with [`MsgAudioPcm::into_playable`].
//!
//! # Sample alignment
//!
//! Every decoded audio message spans a whole number of samples (per channel).
//! `split_at` rounds the requested split point down to a sample boundary and
//! returns `None` when that leaves either side empty. DSD is stored packed,
//! eight one-bit samples per byte per channel, so DSD splits happen on byte
//! boundaries.

use super::factory::PoolToken;
use super::ramp::{Ramp, RampDirection};
use crate::error::{Error, Result};
use ohpipe_common::jiffies::{jiffies_per_sample, round_down_to_sample, SUPPORTED_DSD_RATES};
use ohpipe_common::RampCurve;
use std::fmt;
use std::sync::Arc;

/// Byte pattern that decodes to DSD silence
pub const DSD_SILENCE_BYTE: u8 = 0x69;

/// One-bit samples packed per DSD byte
const DSD_SAMPLES_PER_BYTE: u64 = 8;

/// PCM stream format
///
/// Caches jiffies-per-sample so the hot path never divides by the rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    sample_rate: u32,
    bit_depth: u32,
    channels: u32,
    jiffies_per_sample: u64,
}

impl PcmFormat {
    /// Validate and build a PCM format
    pub fn new(sample_rate: u32, bit_depth: u32, channels: u32) -> Result<Self> {
        if channels == 0 {
            return Err(Error::InvalidFormat("zero channels".to_string()));
        }
        if !matches!(bit_depth, 8 | 16 | 24 | 32) {
            return Err(Error::InvalidFormat(format!(
                "unsupported bit depth {}",
                bit_depth
            )));
        }
        let jiffies_per_sample = jiffies_per_sample(sample_rate)?;
        Ok(Self {
            sample_rate,
            bit_depth,
            channels,
            jiffies_per_sample,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bit_depth(&self) -> u32 {
        self.bit_depth
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Jiffies spanned by one sample on every channel
    pub fn jiffies_per_sample(&self) -> u64 {
        self.jiffies_per_sample
    }

    /// Duration of `frames` samples per channel
    pub fn frames_to_jiffies(&self, frames: usize) -> u64 {
        frames as u64 * self.jiffies_per_sample
    }

    /// Whole frames that fit in `jiffies`
    pub fn jiffies_to_frames(&self, jiffies: u64) -> usize {
        (jiffies / self.jiffies_per_sample) as usize
    }
}

/// DSD stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsdFormat {
    sample_rate: u32,
    channels: u32,
    jiffies_per_sample: u64,
}

impl DsdFormat {
    /// Validate and build a DSD format
    pub fn new(sample_rate: u32, channels: u32) -> Result<Self> {
        if channels == 0 {
            return Err(Error::InvalidFormat("zero channels".to_string()));
        }
        if !SUPPORTED_DSD_RATES.contains(&sample_rate) {
            return Err(Error::InvalidFormat(format!(
                "unsupported DSD rate {}",
                sample_rate
            )));
        }
        let jiffies_per_sample = jiffies_per_sample(sample_rate)?;
        Ok(Self {
            sample_rate,
            channels,
            jiffies_per_sample,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn jiffies_per_sample(&self) -> u64 {
        self.jiffies_per_sample
    }

    /// Jiffies spanned by one byte on every channel, the DSD split unit
    pub fn jiffies_per_block(&self) -> u64 {
        self.jiffies_per_sample * DSD_SAMPLES_PER_BYTE
    }
}

/// Sender and receiver clock readings attached to network audio
///
/// Both are in jiffies; only their difference is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgTimestamps {
    /// Sender's clock when the audio was sent
    pub network: u64,
    /// Local clock when the audio was received
    pub rx: u64,
}

impl MsgTimestamps {
    fn advanced(self, jiffies: u64) -> Self {
        Self {
            network: self.network + jiffies,
            rx: self.rx + jiffies,
        }
    }
}

/// Immutable shared storage with a window
#[derive(Clone)]
struct SharedSlice<T> {
    data: Arc<[T]>,
    start: usize,
    len: usize,
}

impl<T> SharedSlice<T> {
    fn new(data: Vec<T>) -> Self {
        let len = data.len();
        Self {
            data: data.into(),
            start: 0,
            len,
        }
    }

    fn as_slice(&self) -> &[T] {
        &self.data[self.start..self.start + self.len]
    }

    fn len(&self) -> usize {
        self.len
    }

    /// Keep `[0, at)` in self and return `[at, len)`
    fn split_off(&mut self, at: usize) -> Self {
        debug_assert!(at <= self.len);
        let tail = Self {
            data: Arc::clone(&self.data),
            start: self.start + at,
            len: self.len - at,
        };
        self.len = at;
        tail
    }
}

impl<T> fmt::Debug for SharedSlice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSlice({} items)", self.len)
    }
}

/// Undecoded bytes
#[derive(Debug)]
pub struct MsgAudioEncoded {
    bytes: SharedSlice<u8>,
    token: PoolToken,
}

impl MsgAudioEncoded {
    pub(crate) fn new(bytes: Vec<u8>, token: PoolToken) -> Self {
        Self {
            bytes: SharedSlice::new(bytes),
            token,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.len() == 0
    }

    /// Split after `bytes` bytes; `self` keeps the head
    pub fn split_at(&mut self, bytes: usize) -> Option<MsgAudioEncoded> {
        if bytes == 0 || bytes >= self.len() {
            return None;
        }
        Some(Self {
            bytes: self.bytes.split_off(bytes),
            token: self.token.split(),
        })
    }

    pub fn clone_for_branch(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
            token: self.token.split(),
        }
    }
}

/// Decoded PCM audio (interleaved, normalized f32)
#[derive(Debug)]
pub struct MsgAudioPcm {
    samples: SharedSlice<f32>,
    format: PcmFormat,
    track_offset: u64,
    ramp: Ramp,
    timestamps: Option<MsgTimestamps>,
    token: PoolToken,
}

impl MsgAudioPcm {
    pub(crate) fn new(
        samples: Vec<f32>,
        format: PcmFormat,
        track_offset: u64,
        timestamps: Option<MsgTimestamps>,
        token: PoolToken,
    ) -> Result<Self> {
        if samples.is_empty() || samples.len() % format.channels() as usize != 0 {
            return Err(Error::InvalidFormat(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                format.channels()
            )));
        }
        Ok(Self {
            samples: SharedSlice::new(samples),
            format,
            track_offset,
            ramp: Ramp::none(),
            timestamps,
            token,
        })
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Interleaved samples, ramp not applied
    pub fn samples(&self) -> &[f32] {
        self.samples.as_slice()
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels() as usize
    }

    pub fn jiffies(&self) -> u64 {
        self.format.frames_to_jiffies(self.frames())
    }

    /// Position of the first sample within its track, in jiffies
    pub fn track_offset(&self) -> u64 {
        self.track_offset
    }

    pub fn ramp(&self) -> Ramp {
        self.ramp
    }

    pub fn timestamps(&self) -> Option<MsgTimestamps> {
        self.timestamps
    }

    pub fn set_timestamps(&mut self, timestamps: Option<MsgTimestamps>) {
        self.timestamps = timestamps;
    }

    /// Apply a ramp step, splitting if the ramp ends inside this message
    ///
    /// Returns the ramp value reached at the end of the (possibly
    /// shortened) message and the unramped remainder, if a split happened.
    pub fn set_ramp(
        &mut self,
        start: u32,
        remaining: u64,
        direction: RampDirection,
    ) -> (u32, Option<MsgAudioPcm>) {
        let tail = if matches!(direction, RampDirection::Up | RampDirection::Down)
            && remaining < self.jiffies()
        {
            self.split_at(remaining)
        } else {
            None
        };
        let end = self.ramp.set(start, self.jiffies(), remaining, direction);
        (end, tail)
    }

    /// Mute this message entirely
    pub fn set_muted(&mut self) {
        self.ramp.set(Ramp::MIN, self.jiffies(), 0, RampDirection::Mute);
    }

    /// Split at `jiffies` (rounded down to a sample); `self` keeps the head
    pub fn split_at(&mut self, jiffies: u64) -> Option<MsgAudioPcm> {
        let total = self.jiffies();
        let at = round_down_to_sample(jiffies, self.format.jiffies_per_sample());
        if at == 0 || at >= total {
            return None;
        }
        let frames = self.format.jiffies_to_frames(at);
        let samples = self
            .samples
            .split_off(frames * self.format.channels() as usize);
        let ramp = self.ramp.split(at, total);
        Some(Self {
            samples,
            format: self.format,
            track_offset: self.track_offset + at,
            ramp,
            timestamps: self.timestamps.map(|t| t.advanced(at)),
            token: self.token.split(),
        })
    }

    /// Share this message's audio with a second branch
    pub fn clone_for_branch(&self) -> Self {
        Self {
            samples: self.samples.clone(),
            format: self.format,
            track_offset: self.track_offset,
            ramp: self.ramp,
            timestamps: self.timestamps,
            token: self.token.split(),
        }
    }

    /// Render to output samples, applying the ramp through `curve`
    pub fn into_playable(self, curve: RampCurve) -> MsgPlayable {
        let mut samples = self.samples.as_slice().to_vec();
        if self.ramp.is_enabled() {
            let total = self.jiffies();
            let jps = self.format.jiffies_per_sample();
            let channels = self.format.channels() as usize;
            for (i, frame) in samples.chunks_exact_mut(channels).enumerate() {
                let value = self.ramp.value_at(i as u64 * jps, total);
                let gain = curve.gain(Ramp::position(value));
                for sample in frame {
                    *sample *= gain;
                }
            }
        }
        MsgPlayable::pcm(samples, self.format, self.token)
    }
}

/// Decoded DSD audio, packed one bit per sample
#[derive(Debug)]
pub struct MsgAudioDsd {
    bytes: SharedSlice<u8>,
    format: DsdFormat,
    track_offset: u64,
    ramp: Ramp,
    token: PoolToken,
}

impl MsgAudioDsd {
    pub(crate) fn new(
        bytes: Vec<u8>,
        format: DsdFormat,
        track_offset: u64,
        token: PoolToken,
    ) -> Result<Self> {
        if bytes.is_empty() || bytes.len() % format.channels() as usize != 0 {
            return Err(Error::InvalidFormat(format!(
                "{} DSD bytes is not a whole number of {}-channel blocks",
                bytes.len(),
                format.channels()
            )));
        }
        Ok(Self {
            bytes: SharedSlice::new(bytes),
            format,
            track_offset,
            ramp: Ramp::none(),
            token,
        })
    }

    pub fn format(&self) -> DsdFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    fn blocks(&self) -> usize {
        self.bytes.len() / self.format.channels() as usize
    }

    pub fn jiffies(&self) -> u64 {
        self.blocks() as u64 * self.format.jiffies_per_block()
    }

    pub fn track_offset(&self) -> u64 {
        self.track_offset
    }

    pub fn ramp(&self) -> Ramp {
        self.ramp
    }

    /// Apply a ramp step, splitting if the ramp ends inside this message
    pub fn set_ramp(
        &mut self,
        start: u32,
        remaining: u64,
        direction: RampDirection,
    ) -> (u32, Option<MsgAudioDsd>) {
        let tail = if matches!(direction, RampDirection::Up | RampDirection::Down)
            && remaining < self.jiffies()
        {
            self.split_at(remaining)
        } else {
            None
        };
        let end = self.ramp.set(start, self.jiffies(), remaining, direction);
        (end, tail)
    }

    pub fn set_muted(&mut self) {
        self.ramp.set(Ramp::MIN, self.jiffies(), 0, RampDirection::Mute);
    }

    /// Split at `jiffies` (rounded down to a byte per channel)
    pub fn split_at(&mut self, jiffies: u64) -> Option<MsgAudioDsd> {
        let total = self.jiffies();
        let at = round_down_to_sample(jiffies, self.format.jiffies_per_block());
        if at == 0 || at >= total {
            return None;
        }
        let blocks = (at / self.format.jiffies_per_block()) as usize;
        let bytes = self
            .bytes
            .split_off(blocks * self.format.channels() as usize);
        let ramp = self.ramp.split(at, total);
        Some(Self {
            bytes,
            format: self.format,
            track_offset: self.track_offset + at,
            ramp,
            token: self.token.split(),
        })
    }

    pub fn clone_for_branch(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
            format: self.format,
            track_offset: self.track_offset,
            ramp: self.ramp,
            token: self.token.split(),
        }
    }

    /// Render to output bytes
    ///
    /// One-bit audio cannot be scaled, so blocks whose ramp gain falls below
    /// one half are replaced by DSD silence.
    pub fn into_playable(self, curve: RampCurve) -> MsgPlayable {
        let mut bytes = self.bytes.as_slice().to_vec();
        if self.ramp.is_enabled() {
            let total = self.jiffies();
            let block_jiffies = self.format.jiffies_per_block();
            let channels = self.format.channels() as usize;
            for (i, block) in bytes.chunks_exact_mut(channels).enumerate() {
                let value = self.ramp.value_at(i as u64 * block_jiffies, total);
                if curve.gain(Ramp::position(value)) < 0.5 {
                    block.fill(DSD_SILENCE_BYTE);
                }
            }
        }
        MsgPlayable::dsd(bytes, self.format, self.token)
    }
}

/// Format of a silence message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceFormat {
    Pcm(PcmFormat),
    Dsd(DsdFormat),
}

impl SilenceFormat {
    /// Smallest unit silence may be split into
    pub fn split_unit(&self) -> u64 {
        match self {
            SilenceFormat::Pcm(format) => format.jiffies_per_sample(),
            SilenceFormat::Dsd(format) => format.jiffies_per_block(),
        }
    }
}

/// Silence of a known duration and format
#[derive(Debug)]
pub struct MsgSilence {
    jiffies: u64,
    format: SilenceFormat,
    token: PoolToken,
}

impl MsgSilence {
    /// Silence covering `jiffies`, rounded down to the split unit but never
    /// shorter than one unit
    pub(crate) fn new(jiffies: u64, format: SilenceFormat, token: PoolToken) -> Self {
        let unit = format.split_unit();
        let jiffies = round_down_to_sample(jiffies, unit).max(unit);
        Self {
            jiffies,
            format,
            token,
        }
    }

    pub fn jiffies(&self) -> u64 {
        self.jiffies
    }

    pub fn format(&self) -> SilenceFormat {
        self.format
    }

    pub fn split_at(&mut self, jiffies: u64) -> Option<MsgSilence> {
        let at = round_down_to_sample(jiffies, self.format.split_unit());
        if at == 0 || at >= self.jiffies {
            return None;
        }
        let tail = Self {
            jiffies: self.jiffies - at,
            format: self.format,
            token: self.token.split(),
        };
        self.jiffies = at;
        Some(tail)
    }

    pub fn clone_for_branch(&self) -> Self {
        Self {
            jiffies: self.jiffies,
            format: self.format,
            token: self.token.split(),
        }
    }

    pub fn into_playable(self) -> MsgPlayable {
        match self.format {
            SilenceFormat::Pcm(format) => {
                let samples = format.jiffies_to_frames(self.jiffies) * format.channels() as usize;
                MsgPlayable::pcm(vec![0.0; samples], format, self.token)
            }
            SilenceFormat::Dsd(format) => {
                let blocks = (self.jiffies / format.jiffies_per_block()) as usize;
                let bytes = vec![DSD_SILENCE_BYTE; blocks * format.channels() as usize];
                MsgPlayable::dsd(bytes, format, self.token)
            }
        }
    }
}

/// Rendered output data
#[derive(Debug, Clone, PartialEq)]
pub enum PlayableData {
    Pcm { samples: Vec<f32>, format: PcmFormat },
    Dsd { bytes: Vec<u8>, format: DsdFormat },
}

/// Audio ready for the animator, ramps applied
#[derive(Debug)]
pub struct MsgPlayable {
    data: PlayableData,
    token: PoolToken,
}

impl MsgPlayable {
    fn pcm(samples: Vec<f32>, format: PcmFormat, token: PoolToken) -> Self {
        Self {
            data: PlayableData::Pcm { samples, format },
            token,
        }
    }

    fn dsd(bytes: Vec<u8>, format: DsdFormat, token: PoolToken) -> Self {
        Self {
            data: PlayableData::Dsd { bytes, format },
            token,
        }
    }

    pub fn data(&self) -> &PlayableData {
        &self.data
    }

    pub fn jiffies(&self) -> u64 {
        match &self.data {
            PlayableData::Pcm { samples, format } => {
                format.frames_to_jiffies(samples.len() / format.channels() as usize)
            }
            PlayableData::Dsd { bytes, format } => {
                (bytes.len() / format.channels() as usize) as u64 * format.jiffies_per_block()
            }
        }
    }

    /// Split at `jiffies` (rounded down to the format's split unit)
    pub fn split_at(&mut self, jiffies: u64) -> Option<MsgPlayable> {
        let total = self.jiffies();
        let data = match &mut self.data {
            PlayableData::Pcm { samples, format } => {
                let at = round_down_to_sample(jiffies, format.jiffies_per_sample());
                if at == 0 || at >= total {
                    return None;
                }
                let index = format.jiffies_to_frames(at) * format.channels() as usize;
                PlayableData::Pcm {
                    samples: samples.split_off(index),
                    format: *format,
                }
            }
            PlayableData::Dsd { bytes, format } => {
                let at = round_down_to_sample(jiffies, format.jiffies_per_block());
                if at == 0 || at >= total {
                    return None;
                }
                let index = (at / format.jiffies_per_block()) as usize * format.channels() as usize;
                PlayableData::Dsd {
                    bytes: bytes.split_off(index),
                    format: *format,
                }
            }
        };
        Some(Self {
            data,
            token: self.token.split(),
        })
    }

    pub fn clone_for_branch(&self) -> Self {
        Self {
            data: self.data.clone(),
            token: self.token.split(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::factory::MsgFactory;

    fn stereo_44k() -> PcmFormat {
        PcmFormat::new(44100, 16, 2).unwrap()
    }

    #[test]
    fn test_pcm_format_validation() {
        assert!(PcmFormat::new(44100, 16, 0).is_err());
        assert!(PcmFormat::new(44100, 12, 2).is_err());
        assert!(PcmFormat::new(44000, 16, 2).is_err());
        assert_eq!(stereo_44k().jiffies_per_sample(), 1280);
    }

    #[test]
    fn test_dsd_format_validation() {
        let format = DsdFormat::new(2_822_400, 2).unwrap();
        assert_eq!(format.jiffies_per_sample(), 20);
        assert_eq!(format.jiffies_per_block(), 160);
        assert!(DsdFormat::new(44100, 2).is_err());
    }

    #[test]
    fn test_pcm_rejects_partial_frames() {
        let factory = MsgFactory::new(16);
        assert!(factory
            .create_audio_pcm(vec![0.0; 3], stereo_44k(), 0)
            .is_err());
        assert!(factory.create_audio_pcm(vec![], stereo_44k(), 0).is_err());
    }

    #[test]
    fn test_pcm_split_rounds_down() {
        let factory = MsgFactory::new(16);
        let samples: Vec<f32> = (0..20).map(|i| i as f32).collect();
        let mut head = factory
            .create_audio_pcm(samples, stereo_44k(), 1000 * 1280)
            .unwrap();
        assert_eq!(head.jiffies(), 10 * 1280);

        let tail = head.split_at(3 * 1280 + 100).unwrap();
        assert_eq!(head.jiffies(), 3 * 1280);
        assert_eq!(tail.jiffies(), 7 * 1280);
        assert_eq!(head.samples(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(tail.samples()[0], 6.0);
        assert_eq!(tail.track_offset(), 1003 * 1280);
    }

    #[test]
    fn test_pcm_split_out_of_range() {
        let factory = MsgFactory::new(16);
        let mut msg = factory
            .create_audio_pcm(vec![0.0; 20], stereo_44k(), 0)
            .unwrap();
        assert!(msg.split_at(0).is_none());
        assert!(msg.split_at(1279).is_none());
        assert!(msg.split_at(10 * 1280).is_none());
        assert!(msg.split_at(u64::MAX).is_none());
        assert_eq!(msg.jiffies(), 10 * 1280);
    }

    #[test]
    fn test_split_advances_timestamps() {
        let factory = MsgFactory::new(16);
        let timestamps = MsgTimestamps {
            network: 5000,
            rx: 9000,
        };
        let mut msg = factory
            .create_audio_pcm_timestamped(vec![0.0; 20], stereo_44k(), 0, timestamps)
            .unwrap();
        let tail = msg.split_at(2 * 1280).unwrap();
        assert_eq!(
            tail.timestamps(),
            Some(MsgTimestamps {
                network: 5000 + 2560,
                rx: 9000 + 2560
            })
        );
    }

    #[test]
    fn test_set_ramp_splits_at_ramp_end() {
        let factory = MsgFactory::new(16);
        let mut msg = factory
            .create_audio_pcm(vec![1.0; 20], stereo_44k(), 0)
            .unwrap();

        let (end, tail) = msg.set_ramp(Ramp::MIN, 4 * 1280, RampDirection::Up);
        assert_eq!(end, Ramp::MAX);
        assert_eq!(msg.jiffies(), 4 * 1280);
        let tail = tail.unwrap();
        assert_eq!(tail.jiffies(), 6 * 1280);
        assert!(!tail.ramp().is_enabled());
    }

    #[test]
    fn test_into_playable_applies_ramp() {
        let factory = MsgFactory::new(16);
        let mut msg = factory
            .create_audio_pcm(vec![1.0; 8], stereo_44k(), 0)
            .unwrap();
        msg.set_ramp(Ramp::MAX, msg.jiffies(), RampDirection::Down);

        let playable = msg.into_playable(RampCurve::Linear);
        let PlayableData::Pcm { samples, .. } = playable.data() else {
            panic!("expected PCM");
        };
        assert_eq!(samples[0], 1.0);
        assert_eq!(samples[0], samples[1]);
        assert!(samples[2] < samples[0]);
        assert!(samples[6] < samples[4]);
        assert!(samples[6] > 0.0);
    }

    #[test]
    fn test_silence_rounds_and_splits() {
        let factory = MsgFactory::new(16);
        let format = SilenceFormat::Pcm(stereo_44k());
        let mut silence = factory.create_silence(5 * 1280 + 7, format);
        assert_eq!(silence.jiffies(), 5 * 1280);

        let tail = silence.split_at(2 * 1280).unwrap();
        assert_eq!(silence.jiffies(), 2 * 1280);
        assert_eq!(tail.jiffies(), 3 * 1280);

        let tiny = factory.create_silence(1, format);
        assert_eq!(tiny.jiffies(), 1280);
    }

    #[test]
    fn test_dsd_split_on_byte_boundary() {
        let factory = MsgFactory::new(16);
        let format = DsdFormat::new(2_822_400, 2).unwrap();
        let mut msg = factory.create_audio_dsd(vec![0xAA; 8], format, 0).unwrap();
        assert_eq!(msg.jiffies(), 4 * 160);

        let tail = msg.split_at(160 + 100).unwrap();
        assert_eq!(msg.jiffies(), 160);
        assert_eq!(tail.jiffies(), 3 * 160);
    }

    #[test]
    fn test_dsd_ramp_renders_silence() {
        let factory = MsgFactory::new(16);
        let format = DsdFormat::new(2_822_400, 2).unwrap();
        let mut msg = factory.create_audio_dsd(vec![0xAA; 8], format, 0).unwrap();
        msg.set_muted();
        let playable = msg.into_playable(RampCurve::Linear);
        let PlayableData::Dsd { bytes, .. } = playable.data() else {
            panic!("expected DSD");
        };
        assert!(bytes.iter().all(|b| *b == DSD_SILENCE_BYTE));
    }

    #[test]
    fn test_clone_for_branch_shares_samples() {
        let factory = MsgFactory::new(16);
        let msg = factory
            .create_audio_pcm(vec![0.25; 4], stereo_44k(), 0)
            .unwrap();
        let copy = msg.clone_for_branch();
        assert_eq!(copy.samples(), msg.samples());
        assert_eq!(copy.jiffies(), msg.jiffies());
        assert_eq!(factory.stats().in_use, 2);
    }

    #[test]
    fn test_playable_split() {
        let factory = MsgFactory::new(16);
        let msg = factory
            .create_audio_pcm(vec![0.5; 20], stereo_44k(), 0)
            .unwrap();
        let mut playable = msg.into_playable(RampCurve::Linear);
        let tail = playable.split_at(4 * 1280).unwrap();
        assert_eq!(playable.jiffies(), 4 * 1280);
        assert_eq!(tail.jiffies(), 6 * 1280);
    }
}
