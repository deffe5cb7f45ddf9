//! Element contracts
//!
//! Elements are chained by ownership: each pull-based element owns the
//! element upstream of it and produces messages when asked. Push-based
//! elements receive messages from upstream. Control requests travel the
//! other way through [`StreamHandler`]s carried by stream announcements.

use crate::error::{Error, Result};
use crate::msg::{AudioFormat, DecodedStreamInfo, FlushId, Msg, StreamId};

/// Pull side of an element
pub trait PipelineElementUpstream: Send {
    /// Produce the next message, blocking until one is available
    fn pull(&mut self) -> Msg;
}

/// Push side of an element
pub trait PipelineElementDownstream: Send {
    /// Accept the next message
    fn push(&mut self, msg: Msg);
}

impl<T: PipelineElementUpstream + ?Sized> PipelineElementUpstream for Box<T> {
    fn pull(&mut self) -> Msg {
        (**self).pull()
    }
}

impl<T: PipelineElementDownstream + ?Sized> PipelineElementDownstream for Box<T> {
    fn push(&mut self, msg: Msg) {
        (**self).push(msg)
    }
}

/// Owned upstream element
pub type Upstream = Box<dyn PipelineElementUpstream>;

/// Owned downstream element
pub type Downstream = Box<dyn PipelineElementDownstream>;

/// Answer to "may this stream start playing?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayDecision {
    Yes,
    No,
    Later,
}

/// Control channel back to a stream's source
///
/// Every request is scoped to a stream id; requests naming a stream the
/// source no longer serves return [`FlushId::NONE`]. A returned flush id is
/// a promise that a `Flush` with that id will follow in the message stream.
pub trait StreamHandler: Send + Sync {
    fn ok_to_play(&self, stream_id: StreamId) -> PlayDecision;
    fn try_seek(&self, stream_id: StreamId, offset: u64) -> FlushId;
    fn try_discard(&self, jiffies: u64) -> FlushId;
    fn try_stop(&self, stream_id: StreamId) -> FlushId;
    fn notify_starving(&self, mode: &str, stream_id: StreamId, starving: bool);
}

/// Receiver of clock drift measurements
pub trait ClockPuller: Send + Sync {
    /// Signed drift in jiffies since the previous update
    fn update(&self, delta_jiffies: i64);
    fn start(&self);
    fn stop(&self);
}

/// Capabilities of the audio sink at the end of the pipeline
pub trait PipelineAnimator: Send + Sync {
    fn max_sample_rate_pcm(&self) -> u32;
    /// Zero if DSD is not supported
    fn max_sample_rate_dsd(&self) -> u32;
    fn max_bit_depth(&self) -> u32;
    fn max_channels(&self) -> u32;

    fn supports_dsd(&self) -> bool {
        self.max_sample_rate_dsd() > 0
    }

    /// Sink latency for a stream of this format
    fn delay_jiffies(&self, info: &DecodedStreamInfo) -> Result<u64>;

    /// Whether the sink can play this format
    fn check_format(&self, info: &DecodedStreamInfo) -> Result<()> {
        if info.channels > self.max_channels() {
            return Err(Error::FormatUnsupported(format!(
                "{} channels (max {})",
                info.channels,
                self.max_channels()
            )));
        }
        match info.format {
            AudioFormat::Pcm => {
                if info.sample_rate > self.max_sample_rate_pcm() {
                    return Err(Error::FormatUnsupported(format!(
                        "{}Hz PCM (max {}Hz)",
                        info.sample_rate,
                        self.max_sample_rate_pcm()
                    )));
                }
                if info.bit_depth > self.max_bit_depth() {
                    return Err(Error::FormatUnsupported(format!(
                        "{}-bit PCM (max {}-bit)",
                        info.bit_depth,
                        self.max_bit_depth()
                    )));
                }
                info.pcm_format()?;
            }
            AudioFormat::Dsd => {
                if !self.supports_dsd() || info.sample_rate > self.max_sample_rate_dsd() {
                    return Err(Error::FormatUnsupported(format!(
                        "{}Hz DSD",
                        info.sample_rate
                    )));
                }
                info.dsd_format()?;
            }
        }
        Ok(())
    }
}

/// Notified whenever a variable delay finishes applying a change
pub trait VariableDelayObserver: Send + Sync {
    fn notify_delay_applied(&self, jiffies: u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StereoAnimator;

    impl PipelineAnimator for StereoAnimator {
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
        fn delay_jiffies(&self, _info: &DecodedStreamInfo) -> Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn test_check_format_limits() {
        let animator = StereoAnimator;
        let ok = DecodedStreamInfo::pcm(StreamId(1), 96_000, 24, 2);
        assert!(animator.check_format(&ok).is_ok());

        let too_fast = DecodedStreamInfo::pcm(StreamId(1), 384_000, 24, 2);
        assert!(matches!(
            animator.check_format(&too_fast),
            Err(Error::FormatUnsupported(_))
        ));

        let too_wide = DecodedStreamInfo::pcm(StreamId(1), 48_000, 16, 6);
        assert!(animator.check_format(&too_wide).is_err());

        let dsd = DecodedStreamInfo::dsd(StreamId(1), 2_822_400, 2);
        assert!(animator.check_format(&dsd).is_err());
    }

    #[test]
    fn test_check_format_rejects_unaddressable_rate() {
        let animator = StereoAnimator;
        let odd = DecodedStreamInfo::pcm(StreamId(1), 44_000, 16, 2);
        assert!(animator.check_format(&odd).is_err());
    }
}
