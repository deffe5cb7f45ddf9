//! PhaseAdjuster: aligns a multiroom receiver with its sender
//!
//! The first timestamped audio of a stream tells us how far the receiver
//! is from where it should be:
//!
//! ```text
//! error = (rx - network) + animator delay - target delay
//! ```
//!
//! A positive error means we are ahead, so leading audio is dropped (at most
//! `max_drop_jiffies`); a negative error means we are behind, so silence is
//! injected. Either way the audio that follows is ramped in, after which
//! the element passes everything through and feeds latency drift to the
//! clock puller. Alignment only ever happens at the start of a stream.

use crate::config::PhaseAdjusterConfig;
use crate::element::{ClockPuller, PipelineAnimator, PipelineElementUpstream, Upstream};
use crate::msg::{DecodedStreamInfo, Msg, MsgFactory, MsgTimestamps, Ramp, RampDirection};
use chrono::Utc;
use ohpipe_common::events::{EventBus, PipelineEvent};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseAdjusterState {
    Starting,
    Adjusting,
    RampingUp,
    Running,
}

pub struct PhaseAdjuster {
    upstream: Upstream,
    factory: Arc<MsgFactory>,
    animator: Arc<dyn PipelineAnimator>,
    clock_puller: Option<Arc<dyn ClockPuller>>,
    config: PhaseAdjusterConfig,
    events: Arc<EventBus>,
    state: PhaseAdjusterState,
    /// Ready to return, in order
    output: VecDeque<Msg>,
    /// Split remainder still to be processed
    held: Option<Msg>,
    stream: Option<DecodedStreamInfo>,
    target_delay: u64,
    to_drop: u64,
    dropped: u64,
    injected: u64,
    gain: u32,
    remaining_ramp: u64,
    last_latency: i64,
    clock_started: bool,
}

impl PhaseAdjuster {
    pub fn new(
        upstream: Upstream,
        factory: Arc<MsgFactory>,
        animator: Arc<dyn PipelineAnimator>,
        clock_puller: Option<Arc<dyn ClockPuller>>,
        config: PhaseAdjusterConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            upstream,
            factory,
            animator,
            clock_puller,
            config,
            events,
            state: PhaseAdjusterState::Starting,
            output: VecDeque::new(),
            held: None,
            stream: None,
            target_delay: 0,
            to_drop: 0,
            dropped: 0,
            injected: 0,
            gain: Ramp::MAX,
            remaining_ramp: 0,
            last_latency: 0,
            clock_started: false,
        }
    }

    pub fn state(&self) -> PhaseAdjusterState {
        self.state
    }

    fn set_state(&mut self, state: PhaseAdjusterState) {
        if self.state != state {
            debug!("PhaseAdjuster: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn reset(&mut self) {
        if self.clock_started {
            if let Some(puller) = &self.clock_puller {
                puller.stop();
            }
            self.clock_started = false;
        }
        self.to_drop = 0;
        self.dropped = 0;
        self.injected = 0;
        self.gain = Ramp::MAX;
        self.remaining_ramp = 0;
        self.set_state(PhaseAdjusterState::Starting);
    }

    fn animator_delay(&self) -> u64 {
        let Some(info) = &self.stream else {
            return 0;
        };
        match self.animator.delay_jiffies(info) {
            Ok(delay) => delay,
            Err(e) => {
                warn!("PhaseAdjuster: no animator delay for stream {}: {}", info.stream_id, e);
                0
            }
        }
    }

    fn report_aligned(&self) {
        let stream_id = self.stream.as_ref().map(|info| info.stream_id.0).unwrap_or(0);
        info!(
            "PhaseAdjuster: stream {} aligned (dropped {}, injected {} jiffies)",
            stream_id, self.dropped, self.injected
        );
        self.events.emit_lossy(PipelineEvent::PhaseAligned {
            stream_id,
            dropped_jiffies: self.dropped,
            injected_jiffies: self.injected,
            timestamp: Utc::now(),
        });
    }

    fn start_ramp_up(&mut self) {
        self.gain = Ramp::MIN;
        self.remaining_ramp = self.config.ramp_jiffies;
        if self.remaining_ramp == 0 {
            self.start_running();
        } else {
            self.set_state(PhaseAdjusterState::RampingUp);
        }
    }

    fn start_running(&mut self) {
        self.gain = Ramp::MAX;
        self.remaining_ramp = 0;
        self.set_state(PhaseAdjusterState::Running);
        if let Some(puller) = &self.clock_puller {
            puller.start();
            self.clock_started = true;
        }
    }

    fn ramp_up(&mut self, mut msg: Msg) -> Msg {
        if let Some((end, tail)) = msg.set_ramp(self.gain, self.remaining_ramp, RampDirection::Up)
        {
            self.remaining_ramp = self.remaining_ramp.saturating_sub(msg.jiffies());
            self.gain = end;
            self.held = tail;
            if self.remaining_ramp == 0 || self.gain >= Ramp::MAX {
                self.start_running();
            }
        }
        msg
    }

    fn update_clock(&mut self, timestamps: MsgTimestamps) {
        let latency = timestamps.rx as i64 - timestamps.network as i64;
        let limit = self.config.max_clock_update_jiffies as i64;
        let delta = (latency - self.last_latency).clamp(-limit, limit);
        self.last_latency = latency;
        if let Some(puller) = &self.clock_puller {
            trace!("PhaseAdjuster: clock delta {}", delta);
            puller.update(delta);
        }
    }

    fn align(&mut self, msg: Msg, timestamps: MsgTimestamps) -> Option<Msg> {
        let latency = timestamps.rx as i64 - timestamps.network as i64;
        self.last_latency = latency;
        let error = latency + self.animator_delay() as i64 - self.target_delay as i64;
        debug!(
            "PhaseAdjuster: latency {} target {} error {}",
            latency, self.target_delay, error
        );

        if error > 0 {
            self.to_drop = (error as u64).min(self.config.max_drop_jiffies);
            self.set_state(PhaseAdjusterState::Adjusting);
            return self.drop_leading(msg);
        }
        if error < 0 {
            self.inject_silence(&msg, error.unsigned_abs());
            self.report_aligned();
            self.start_ramp_up();
            let ramped = self.ramp_up(msg);
            self.output.push_back(ramped);
            return None;
        }
        self.report_aligned();
        self.start_running();
        Some(msg)
    }

    fn inject_silence(&mut self, msg: &Msg, jiffies: u64) {
        let Some(format) = msg.silence_format() else {
            return;
        };
        let unit = format.split_unit();
        let mut left = jiffies;
        while left >= unit {
            let silence = self
                .factory
                .create_silence(left.min(self.config.max_silence_jiffies), format);
            let length = silence.jiffies();
            self.injected += length;
            left = left.saturating_sub(length);
            self.output.push_back(Msg::Silence(silence));
        }
    }

    fn drop_leading(&mut self, mut msg: Msg) -> Option<Msg> {
        let length = msg.jiffies();
        if self.to_drop >= length {
            self.to_drop -= length;
            self.dropped += length;
            trace!("PhaseAdjuster: dropped {} jiffies", length);
            if self.to_drop == 0 {
                self.report_aligned();
                self.start_ramp_up();
            }
            return None;
        }
        let rest = match msg.split_at(self.to_drop) {
            Some(tail) => {
                self.dropped += msg.jiffies();
                tail
            }
            // less than a sample left to drop
            None => msg,
        };
        self.to_drop = 0;
        self.report_aligned();
        self.start_ramp_up();
        if self.state == PhaseAdjusterState::RampingUp {
            Some(self.ramp_up(rest))
        } else {
            Some(rest)
        }
    }

    fn process_audio(&mut self, msg: Msg, timestamps: Option<MsgTimestamps>) -> Option<Msg> {
        match self.state {
            PhaseAdjusterState::Starting => match timestamps {
                Some(timestamps) => self.align(msg, timestamps),
                None => Some(msg),
            },
            PhaseAdjusterState::Adjusting => self.drop_leading(msg),
            PhaseAdjusterState::RampingUp => Some(self.ramp_up(msg)),
            PhaseAdjusterState::Running => {
                if let Some(timestamps) = timestamps {
                    self.update_clock(timestamps);
                }
                Some(msg)
            }
        }
    }

    fn process(&mut self, msg: Msg) -> Option<Msg> {
        match msg {
            Msg::Mode(mode) => {
                self.reset();
                self.target_delay = 0;
                self.stream = None;
                Some(Msg::Mode(mode))
            }
            Msg::DecodedStream(stream) => {
                self.reset();
                self.stream = Some(stream.info.clone());
                Some(Msg::DecodedStream(stream))
            }
            Msg::Delay(delay) => {
                self.target_delay = delay.total_jiffies;
                Some(Msg::Delay(delay))
            }
            Msg::Halt(halt) => {
                self.reset();
                Some(Msg::Halt(halt))
            }
            Msg::Flush(flush) => {
                self.reset();
                Some(Msg::Flush(flush))
            }
            Msg::AudioPcm(audio) => {
                let timestamps = audio.timestamps();
                self.process_audio(Msg::AudioPcm(audio), timestamps)
            }
            msg @ Msg::AudioDsd(_) => self.process_audio(msg, None),
            msg @ (Msg::Silence(_)
            | Msg::Track(_)
            | Msg::Drain(_)
            | Msg::Wait(_)
            | Msg::Quit(_)) => Some(msg),
            msg @ (Msg::EncodedStream(_) | Msg::AudioEncoded(_) | Msg::Playable(_)) => {
                panic!("PhaseAdjuster: unexpected {} message", msg.kind())
            }
        }
    }
}

impl PipelineElementUpstream for PhaseAdjuster {
    fn pull(&mut self) -> Msg {
        loop {
            if let Some(msg) = self.output.pop_front() {
                return msg;
            }
            let msg = match self.held.take() {
                Some(msg) => msg,
                None => self.upstream.pull(),
            };
            if let Some(msg) = self.process(msg) {
                return msg;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::test_support::{decoded_stream, pcm, pcm_timestamped, ramp_of, scripted, stream_info, Script};
    use std::sync::Mutex;

    const JPS: u64 = 1176;

    struct FixedDelay(u64);

    impl PipelineAnimator for FixedDelay {
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
            Ok(self.0)
        }
    }

    #[derive(Default)]
    struct RecordingPuller {
        updates: Mutex<Vec<i64>>,
        starts: Mutex<u32>,
        stops: Mutex<u32>,
    }

    impl ClockPuller for RecordingPuller {
        fn update(&self, delta_jiffies: i64) {
            self.updates.lock().unwrap().push(delta_jiffies);
        }
        fn start(&self) {
            *self.starts.lock().unwrap() += 1;
        }
        fn stop(&self) {
            *self.stops.lock().unwrap() += 1;
        }
    }

    fn adjuster(animator_delay: u64) -> (Script, PhaseAdjuster, Arc<MsgFactory>, Arc<RecordingPuller>) {
        let (script, upstream) = scripted();
        let factory = Arc::new(MsgFactory::new(64));
        let puller = Arc::new(RecordingPuller::default());
        let config = PhaseAdjusterConfig {
            ramp_jiffies: 4 * JPS,
            max_drop_jiffies: 30 * JPS,
            max_clock_update_jiffies: 2 * JPS,
            max_silence_jiffies: 10 * JPS,
        };
        let adjuster = PhaseAdjuster::new(
            Box::new(upstream),
            Arc::clone(&factory),
            Arc::new(FixedDelay(animator_delay)),
            Some(puller.clone() as Arc<dyn ClockPuller>),
            config,
            Arc::new(EventBus::new(16)),
        );
        (script, adjuster, factory, puller)
    }

    #[test]
    fn test_ahead_drops_leading_audio() {
        let (script, mut adjuster, factory, puller) = adjuster(0);
        script.push(decoded_stream(&factory, stream_info(1), None));
        script.push(pcm_timestamped(&factory, 20, 0, 6 * JPS));
        script.push(pcm_timestamped(&factory, 20, 20 * JPS, 26 * JPS));

        adjuster.pull();
        let first = adjuster.pull();
        assert_eq!(first.jiffies(), 4 * JPS);
        assert_eq!(ramp_of(&first), (Ramp::MIN, Ramp::MAX));
        assert_eq!(adjuster.state(), PhaseAdjusterState::Running);
        assert_eq!(*puller.starts.lock().unwrap(), 1);

        let rest = adjuster.pull();
        assert_eq!(rest.jiffies(), 10 * JPS);
        let next = adjuster.pull();
        assert_eq!(next.jiffies(), 20 * JPS);
        // split tail and next message both report unchanged latency
        assert_eq!(*puller.updates.lock().unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_drop_spanning_messages_is_capped() {
        let (script, mut adjuster, factory, _puller) = adjuster(0);
        let events = Arc::clone(&adjuster.events);
        let mut rx = events.subscribe();
        script.push(decoded_stream(&factory, stream_info(1), None));
        // 100 frames ahead, capped at 30
        script.push(pcm_timestamped(&factory, 20, 0, 100 * JPS));
        script.push(pcm_timestamped(&factory, 20, 20 * JPS, 120 * JPS));

        adjuster.pull();
        let first = adjuster.pull();
        assert_eq!(first.jiffies(), 4 * JPS);
        match rx.try_recv().unwrap() {
            PipelineEvent::PhaseAligned { dropped_jiffies, injected_jiffies, .. } => {
                assert_eq!(dropped_jiffies, 30 * JPS);
                assert_eq!(injected_jiffies, 0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_behind_injects_silence() {
        let (script, mut adjuster, factory, _puller) = adjuster(2 * JPS);
        script.push(factory.create_delay(20 * JPS));
        script.push(decoded_stream(&factory, stream_info(1), None));
        // latency 3 + animator 2 - target 20 = -15 frames
        script.push(pcm_timestamped(&factory, 8, 0, 3 * JPS));

        assert!(matches!(adjuster.pull(), Msg::Delay(_)));
        adjuster.pull();
        let mut silence = 0;
        loop {
            match adjuster.pull() {
                Msg::Silence(s) => silence += s.jiffies(),
                audio @ Msg::AudioPcm(_) => {
                    assert_eq!(ramp_of(&audio).0, Ramp::MIN);
                    assert_eq!(audio.jiffies(), 4 * JPS);
                    break;
                }
                other => panic!("unexpected {}", other.kind()),
            }
        }
        assert_eq!(silence, 15 * JPS);
        let tail = adjuster.pull();
        assert_eq!(ramp_of(&tail), (Ramp::MAX, Ramp::MAX));
    }

    #[test]
    fn test_on_time_passes_and_tracks_drift() {
        let (script, mut adjuster, factory, puller) = adjuster(0);
        script.push(decoded_stream(&factory, stream_info(1), None));
        script.push(pcm_timestamped(&factory, 10, 0, 0));
        script.push(pcm_timestamped(&factory, 10, 10 * JPS, 10 * JPS + 100));
        script.push(pcm_timestamped(&factory, 10, 20 * JPS, 20 * JPS + 100 + 5 * JPS));
        script.push(factory.create_halt());

        adjuster.pull();
        let first = adjuster.pull();
        assert_eq!(ramp_of(&first), (Ramp::MAX, Ramp::MAX));
        adjuster.pull();
        adjuster.pull();
        assert_eq!(*puller.updates.lock().unwrap(), vec![100, 2 * JPS as i64]);

        assert!(matches!(adjuster.pull(), Msg::Halt(_)));
        assert_eq!(*puller.stops.lock().unwrap(), 1);
        assert_eq!(adjuster.state(), PhaseAdjusterState::Starting);
    }

    #[test]
    fn test_untimestamped_audio_untouched() {
        let (script, mut adjuster, factory, puller) = adjuster(0);
        script.push(decoded_stream(&factory, stream_info(1), None));
        script.push(pcm(&factory, 10, 0.5));

        adjuster.pull();
        let audio = adjuster.pull();
        assert_eq!(ramp_of(&audio), (Ramp::MAX, Ramp::MAX));
        assert_eq!(adjuster.state(), PhaseAdjusterState::Starting);
        assert_eq!(*puller.starts.lock().unwrap(), 0);
    }
}
