//! Ramper: fades in audio that would otherwise start abruptly
//!
//! A decoded stream needs a ramp when it is live, when it starts part way
//! into its track (`sample_start > 0`), or when its audio format differs
//! from the previous stream's. While ramping, audio is split wherever the
//! ramp ends so the remainder passes at full gain. Silence passes without
//! consuming ramp time.

use crate::config::RamperConfig;
use crate::element::{PipelineElementUpstream, Upstream};
use crate::msg::{AudioFormat, DecodedStreamInfo, Msg, Ramp, RampDirection};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamperState {
    Idle,
    Ramping,
}

pub struct Ramper {
    upstream: Upstream,
    config: RamperConfig,
    state: RamperState,
    ramp_duration: u64,
    current_ramp: u32,
    remaining_ramp: u64,
    queued: Option<Msg>,
    last_format: Option<AudioFormat>,
}

impl Ramper {
    pub fn new(upstream: Upstream, config: RamperConfig) -> Self {
        Self {
            upstream,
            config,
            state: RamperState::Idle,
            ramp_duration: config.short_jiffies,
            current_ramp: Ramp::MAX,
            remaining_ramp: 0,
            queued: None,
            last_format: None,
        }
    }

    pub fn state(&self) -> RamperState {
        self.state
    }

    fn needs_ramp(&self, info: &DecodedStreamInfo) -> bool {
        let format_changed = self
            .last_format
            .map(|format| format != info.format)
            .unwrap_or(false);
        info.live || info.sample_start > 0 || format_changed
    }

    fn set_state(&mut self, state: RamperState) {
        if self.state != state {
            debug!("Ramper: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn start_ramp(&mut self) {
        self.current_ramp = Ramp::MIN;
        self.remaining_ramp = self.ramp_duration;
        self.set_state(RamperState::Ramping);
    }

    fn stop_ramp(&mut self) {
        self.current_ramp = Ramp::MAX;
        self.remaining_ramp = 0;
        self.set_state(RamperState::Idle);
    }

    fn process_audio(&mut self, mut msg: Msg) -> Msg {
        if self.state != RamperState::Ramping {
            return msg;
        }
        if let Some((end, tail)) =
            msg.set_ramp(self.current_ramp, self.remaining_ramp, RampDirection::Up)
        {
            self.remaining_ramp = self.remaining_ramp.saturating_sub(msg.jiffies());
            self.current_ramp = end;
            trace!(
                "Ramper: ramped {} jiffies, {} remaining",
                msg.jiffies(),
                self.remaining_ramp
            );
            if tail.is_some() {
                self.queued = tail;
            }
            if self.remaining_ramp == 0 || self.current_ramp >= Ramp::MAX {
                self.stop_ramp();
            }
        }
        msg
    }
}

impl PipelineElementUpstream for Ramper {
    fn pull(&mut self) -> Msg {
        let msg = match self.queued.take() {
            Some(msg) => msg,
            None => self.upstream.pull(),
        };
        match msg {
            Msg::Mode(mode) => {
                self.ramp_duration = if mode.info.ramp_pause_resume_long {
                    self.config.long_jiffies
                } else {
                    self.config.short_jiffies
                };
                self.last_format = None;
                self.stop_ramp();
                Msg::Mode(mode)
            }
            Msg::DecodedStream(stream) => {
                if self.needs_ramp(&stream.info) {
                    debug!(
                        "Ramper: ramping stream {} (live={}, sample_start={})",
                        stream.info.stream_id, stream.info.live, stream.info.sample_start
                    );
                    self.start_ramp();
                } else {
                    self.stop_ramp();
                }
                self.last_format = Some(stream.info.format);
                Msg::DecodedStream(stream)
            }
            Msg::Halt(halt) => {
                self.stop_ramp();
                Msg::Halt(halt)
            }
            msg @ (Msg::AudioPcm(_) | Msg::AudioDsd(_)) => self.process_audio(msg),
            msg @ (Msg::Silence(_)
            | Msg::Track(_)
            | Msg::Drain(_)
            | Msg::Delay(_)
            | Msg::Flush(_)
            | Msg::Wait(_)
            | Msg::Quit(_)) => msg,
            msg @ (Msg::EncodedStream(_) | Msg::AudioEncoded(_) | Msg::Playable(_)) => {
                panic!("Ramper: unexpected {} message", msg.kind())
            }
        }
    }
}
