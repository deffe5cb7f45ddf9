//! Pipeline messages
//!
//! Everything that flows through the pipeline is a [`Msg`]: stream
//! announcements, audio, and control barriers. Elements dispatch on the
//! variant with an exhaustive `match`, so adding a variant forces every
//! element to decide what it does with it.

pub mod audio;
pub mod factory;
pub mod ids;
pub mod ramp;
pub mod stream;

use ohpipe_common::RampCurve;

pub use audio::{
    DsdFormat, MsgAudioDsd, MsgAudioEncoded, MsgAudioPcm, MsgPlayable, MsgSilence, MsgTimestamps,
    PcmFormat, PlayableData, SilenceFormat,
};
pub use factory::{MsgFactory, PoolStats};
pub use ids::{FlushId, FlushIdProvider, PendingFlush, StreamId, StreamIdProvider};
pub use ramp::{Ramp, RampDirection};
pub use stream::{
    AudioFormat, DecodedStreamInfo, EncodedStreamInfo, ModeInfo, MsgDecodedStream, MsgDelay,
    MsgDrain, MsgEncodedStream, MsgFlush, MsgHalt, MsgMode, MsgQuit, MsgTrack, MsgWait,
    Multiroom,
};

/// A pipeline message
#[derive(Debug)]
pub enum Msg {
    Mode(MsgMode),
    Track(MsgTrack),
    Drain(MsgDrain),
    Delay(MsgDelay),
    EncodedStream(MsgEncodedStream),
    DecodedStream(MsgDecodedStream),
    AudioEncoded(MsgAudioEncoded),
    AudioPcm(MsgAudioPcm),
    AudioDsd(MsgAudioDsd),
    Silence(MsgSilence),
    Playable(MsgPlayable),
    Halt(MsgHalt),
    Flush(MsgFlush),
    Wait(MsgWait),
    Quit(MsgQuit),
}

macro_rules! impl_from_payload {
    ($($variant:ident => $payload:ty),* $(,)?) => {
        $(
            impl From<$payload> for Msg {
                fn from(msg: $payload) -> Self {
                    Msg::$variant(msg)
                }
            }
        )*
    };
}

impl_from_payload! {
    Mode => MsgMode,
    Track => MsgTrack,
    Drain => MsgDrain,
    Delay => MsgDelay,
    EncodedStream => MsgEncodedStream,
    DecodedStream => MsgDecodedStream,
    AudioEncoded => MsgAudioEncoded,
    AudioPcm => MsgAudioPcm,
    AudioDsd => MsgAudioDsd,
    Silence => MsgSilence,
    Playable => MsgPlayable,
    Halt => MsgHalt,
    Flush => MsgFlush,
    Wait => MsgWait,
    Quit => MsgQuit,
}

impl Msg {
    /// Variant name, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Mode(_) => "Mode",
            Msg::Track(_) => "Track",
            Msg::Drain(_) => "Drain",
            Msg::Delay(_) => "Delay",
            Msg::EncodedStream(_) => "EncodedStream",
            Msg::DecodedStream(_) => "DecodedStream",
            Msg::AudioEncoded(_) => "AudioEncoded",
            Msg::AudioPcm(_) => "AudioPcm",
            Msg::AudioDsd(_) => "AudioDsd",
            Msg::Silence(_) => "Silence",
            Msg::Playable(_) => "Playable",
            Msg::Halt(_) => "Halt",
            Msg::Flush(_) => "Flush",
            Msg::Wait(_) => "Wait",
            Msg::Quit(_) => "Quit",
        }
    }

    /// Duration of decoded or rendered audio; zero for everything else
    pub fn jiffies(&self) -> u64 {
        match self {
            Msg::AudioPcm(msg) => msg.jiffies(),
            Msg::AudioDsd(msg) => msg.jiffies(),
            Msg::Silence(msg) => msg.jiffies(),
            Msg::Playable(msg) => msg.jiffies(),
            _ => 0,
        }
    }

    /// Decoded audio: PCM, DSD or silence
    pub fn is_decoded_audio(&self) -> bool {
        matches!(self, Msg::AudioPcm(_) | Msg::AudioDsd(_) | Msg::Silence(_))
    }

    /// Format of silence that could stand in for this decoded audio
    pub fn silence_format(&self) -> Option<SilenceFormat> {
        match self {
            Msg::AudioPcm(msg) => Some(SilenceFormat::Pcm(msg.format())),
            Msg::AudioDsd(msg) => Some(SilenceFormat::Dsd(msg.format())),
            Msg::Silence(msg) => Some(msg.format()),
            _ => None,
        }
    }

    /// Split audio at `jiffies` (rounded down to a sample); `self` keeps the
    /// head. `None` for non-audio messages or when no split is possible.
    pub fn split_at(&mut self, jiffies: u64) -> Option<Msg> {
        match self {
            Msg::AudioPcm(msg) => msg.split_at(jiffies).map(Msg::AudioPcm),
            Msg::AudioDsd(msg) => msg.split_at(jiffies).map(Msg::AudioDsd),
            Msg::Silence(msg) => msg.split_at(jiffies).map(Msg::Silence),
            Msg::Playable(msg) => msg.split_at(jiffies).map(Msg::Playable),
            _ => None,
        }
    }

    /// Apply a ramp step to PCM or DSD audio
    ///
    /// Returns the ramp value reached and any unramped remainder. Silence
    /// and non-audio messages are left alone and return `None`.
    pub fn set_ramp(
        &mut self,
        start: u32,
        remaining: u64,
        direction: RampDirection,
    ) -> Option<(u32, Option<Msg>)> {
        match self {
            Msg::AudioPcm(msg) => {
                let (end, tail) = msg.set_ramp(start, remaining, direction);
                Some((end, tail.map(Msg::AudioPcm)))
            }
            Msg::AudioDsd(msg) => {
                let (end, tail) = msg.set_ramp(start, remaining, direction);
                Some((end, tail.map(Msg::AudioDsd)))
            }
            _ => None,
        }
    }

    /// Render decoded audio to `Playable` through `curve`; other
    /// messages are returned unchanged
    pub fn into_playable(self, curve: RampCurve) -> Msg {
        match self {
            Msg::AudioPcm(msg) => Msg::Playable(msg.into_playable(curve)),
            Msg::AudioDsd(msg) => Msg::Playable(msg.into_playable(curve)),
            Msg::Silence(msg) => Msg::Playable(msg.into_playable()),
            msg => msg,
        }
    }

    /// Copy for a second consumer
    ///
    /// Audio buffers are shared, not copied. Drain and Halt callbacks are
    /// shared too and still fire only once.
    pub fn clone_for_branch(&self) -> Msg {
        match self {
            Msg::Mode(msg) => Msg::Mode(msg.clone()),
            Msg::Track(msg) => Msg::Track(msg.clone()),
            Msg::Drain(msg) => Msg::Drain(msg.clone()),
            Msg::Delay(msg) => Msg::Delay(*msg),
            Msg::EncodedStream(msg) => Msg::EncodedStream(msg.clone()),
            Msg::DecodedStream(msg) => Msg::DecodedStream(msg.clone()),
            Msg::AudioEncoded(msg) => Msg::AudioEncoded(msg.clone_for_branch()),
            Msg::AudioPcm(msg) => Msg::AudioPcm(msg.clone_for_branch()),
            Msg::AudioDsd(msg) => Msg::AudioDsd(msg.clone_for_branch()),
            Msg::Silence(msg) => Msg::Silence(msg.clone_for_branch()),
            Msg::Playable(msg) => Msg::Playable(msg.clone_for_branch()),
            Msg::Halt(msg) => Msg::Halt(msg.clone()),
            Msg::Flush(msg) => Msg::Flush(*msg),
            Msg::Wait(msg) => Msg::Wait(*msg),
            Msg::Quit(msg) => Msg::Quit(*msg),
        }
    }
}
