//! VariableDelay: changes pipeline latency without audible jumps
//!
//! Two instances run in a pipeline. The left instance owns the part of the
//! requested delay (from `Delay` messages) that the right instance does not
//! already realize; the right instance owns an externally driven minimum set
//! through its [`VariableDelayHandle`]. The right instance reports what it
//! applied through a [`VariableDelayObserver`], normally a shared
//! [`DownstreamDelay`] that the left instance reads.
//!
//! # State machine
//!
//! ```text
//! Starting ──first audio──> Running ──target change──> RampingDown
//!    ^                                                     │
//!    │ Flush/Halt/Mode                                     v
//!    └──────────── (any) <── Running <── RampingUp <── RampedDown
//! ```
//!
//! While `Starting` (nothing audible since the last flush, halt or mode
//! change) an adjustment is applied with no ramps. While `RampedDown`,
//! silence is inserted in chunks of at most `max_silence_jiffies` for an
//! increase and audio is discarded for a decrease.

use crate::config::VariableDelayConfig;
use crate::element::{PipelineElementUpstream, Upstream, VariableDelayObserver};
use crate::msg::{Msg, MsgFactory, Ramp, RampDirection, SilenceFormat};
use chrono::Utc;
use ohpipe_common::events::{EventBus, PipelineEvent};
use ohpipe_common::jiffies::round_down_to_sample;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableDelayState {
    Starting,
    Running,
    RampingDown,
    RampedDown,
    RampingUp,
}

/// Delay realized downstream of the left instance
#[derive(Debug, Default)]
pub struct DownstreamDelay {
    jiffies: AtomicU64,
}

impl DownstreamDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jiffies(&self) -> u64 {
        self.jiffies.load(Ordering::Acquire)
    }
}

impl VariableDelayObserver for DownstreamDelay {
    fn notify_delay_applied(&self, jiffies: u64) {
        self.jiffies.store(jiffies, Ordering::Release);
    }
}

/// Controls the minimum delay of a right-hand instance
#[derive(Debug, Clone)]
pub struct VariableDelayHandle {
    min_delay: Arc<AtomicU64>,
}

impl VariableDelayHandle {
    /// Takes effect on the element's next pull
    pub fn set_min_delay(&self, jiffies: u64) {
        self.min_delay.store(jiffies, Ordering::Release);
    }

    pub fn min_delay(&self) -> u64 {
        self.min_delay.load(Ordering::Acquire)
    }
}

enum Role {
    Left {
        requested: u64,
        supports_latency: bool,
        downstream: Arc<DownstreamDelay>,
    },
    Right {
        min_delay: Arc<AtomicU64>,
    },
}

pub struct VariableDelay {
    name: &'static str,
    upstream: Upstream,
    factory: Arc<MsgFactory>,
    config: VariableDelayConfig,
    events: Arc<EventBus>,
    observer: Option<Arc<dyn VariableDelayObserver>>,
    role: Role,
    state: VariableDelayState,
    /// Delay this instance is realizing once `adjustment` reaches zero
    target: u64,
    /// Positive: silence still to insert. Negative: audio still to discard.
    adjustment: i64,
    ramp_value: u32,
    remaining_ramp: u64,
    pending: VecDeque<Msg>,
    silence_format: Option<SilenceFormat>,
    last_reported: Option<u64>,
}

impl VariableDelay {
    /// Left-hand instance: realizes `Delay` requests minus what is
    /// realized downstream
    pub fn left(
        upstream: Upstream,
        factory: Arc<MsgFactory>,
        config: VariableDelayConfig,
        events: Arc<EventBus>,
        downstream: Arc<DownstreamDelay>,
    ) -> Self {
        let role = Role::Left {
            requested: 0,
            supports_latency: true,
            downstream,
        };
        Self::new("VariableDelayLeft", upstream, factory, config, events, role)
    }

    /// Right-hand instance: realizes an externally set minimum delay
    pub fn right(
        upstream: Upstream,
        factory: Arc<MsgFactory>,
        config: VariableDelayConfig,
        events: Arc<EventBus>,
    ) -> (VariableDelayHandle, Self) {
        let min_delay = Arc::new(AtomicU64::new(config.min_delay_jiffies));
        let handle = VariableDelayHandle {
            min_delay: Arc::clone(&min_delay),
        };
        let role = Role::Right { min_delay };
        (
            handle,
            Self::new("VariableDelayRight", upstream, factory, config, events, role),
        )
    }

    fn new(
        name: &'static str,
        upstream: Upstream,
        factory: Arc<MsgFactory>,
        config: VariableDelayConfig,
        events: Arc<EventBus>,
        role: Role,
    ) -> Self {
        Self {
            name,
            upstream,
            factory,
            config,
            events,
            observer: None,
            role,
            state: VariableDelayState::Starting,
            target: 0,
            adjustment: 0,
            ramp_value: Ramp::MAX,
            remaining_ramp: 0,
            pending: VecDeque::new(),
            silence_format: None,
            last_reported: None,
        }
    }

    /// Notify `observer` whenever a delay change has been applied
    pub fn with_observer(mut self, observer: Arc<dyn VariableDelayObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> VariableDelayState {
        self.state
    }

    /// Delay this instance realizes (or is converging to)
    pub fn delay_jiffies(&self) -> u64 {
        self.target
    }

    fn desired(&self) -> u64 {
        match &self.role {
            Role::Left {
                requested,
                supports_latency,
                downstream,
            } => {
                if *supports_latency {
                    requested.saturating_sub(downstream.jiffies())
                } else {
                    0
                }
            }
            Role::Right { min_delay } => min_delay.load(Ordering::Acquire),
        }
    }

    fn set_state(&mut self, state: VariableDelayState) {
        if self.state == state {
            return;
        }
        debug!("{}: {:?} -> {:?}", self.name, self.state, state);
        self.events.emit_lossy(PipelineEvent::PipelineStateChanged {
            element: self.name.to_string(),
            old_state: format!("{:?}", self.state),
            new_state: format!("{:?}", state),
            timestamp: Utc::now(),
        });
        self.state = state;
    }

    fn check_target(&mut self) {
        let desired = self.desired();
        if desired == self.target {
            return;
        }
        info!(
            "{}: delay target {} -> {} jiffies ({:?})",
            self.name, self.target, desired, self.state
        );
        self.adjustment += desired as i64 - self.target as i64;
        self.target = desired;
        match self.state {
            VariableDelayState::Starting
            | VariableDelayState::RampingDown
            | VariableDelayState::RampedDown => {}
            VariableDelayState::Running => {
                self.ramp_value = Ramp::MAX;
                self.remaining_ramp = self.config.ramp_jiffies;
                self.set_state(VariableDelayState::RampingDown);
            }
            VariableDelayState::RampingUp => {
                // ramp down from the current gain at the same rate
                self.remaining_ramp =
                    self.config.ramp_jiffies * self.ramp_value as u64 / Ramp::MAX as u64;
                self.set_state(VariableDelayState::RampingDown);
            }
        }
    }

    fn reset(&mut self) {
        self.target = 0;
        self.adjustment = 0;
        self.ramp_value = Ramp::MAX;
        self.remaining_ramp = 0;
        self.set_state(VariableDelayState::Starting);
    }

    fn report_applied(&mut self) {
        if self.last_reported == Some(self.target) {
            return;
        }
        info!("{}: delay of {} jiffies applied", self.name, self.target);
        self.last_reported = Some(self.target);
        if let Some(observer) = &self.observer {
            observer.notify_delay_applied(self.target);
        }
        self.events.emit_lossy(PipelineEvent::DelayApplied {
            element: self.name.to_string(),
            delay_jiffies: self.target,
            timestamp: Utc::now(),
        });
    }

    /// Drop an adjustment smaller than one sample
    fn settle_residue(&mut self, unit: u64) {
        if self.adjustment != 0 && self.adjustment.unsigned_abs() < unit {
            trace!(
                "{}: dropping sub-sample adjustment of {}",
                self.name,
                self.adjustment
            );
            self.adjustment = 0;
        }
    }

    fn insert_silence(&mut self, msg: Msg, format: SilenceFormat) -> Option<Msg> {
        let chunk = (self.adjustment as u64).min(self.config.max_silence_jiffies);
        let chunk = round_down_to_sample(chunk, format.split_unit()).max(format.split_unit());
        let silence = self.factory.create_silence(chunk, format);
        self.adjustment -= silence.jiffies() as i64;
        trace!(
            "{}: inserted {} jiffies of silence, {} outstanding",
            self.name,
            silence.jiffies(),
            self.adjustment
        );
        self.pending.push_front(msg);
        Some(Msg::Silence(silence))
    }

    fn discard_audio(&mut self, mut msg: Msg) -> Option<Msg> {
        let to_discard = self.adjustment.unsigned_abs();
        if msg.jiffies() <= to_discard {
            self.adjustment += msg.jiffies() as i64;
            trace!("{}: discarded {} jiffies", self.name, msg.jiffies());
            return None;
        }
        if let Some(tail) = msg.split_at(to_discard) {
            self.adjustment += msg.jiffies() as i64;
            self.pending.push_front(tail);
        } else {
            self.adjustment = 0;
            self.pending.push_front(msg);
        }
        None
    }

    fn ramp(&mut self, msg: &mut Msg, direction: RampDirection) -> bool {
        let Some((end, tail)) = msg.set_ramp(self.ramp_value, self.remaining_ramp, direction)
        else {
            return false;
        };
        self.remaining_ramp = self.remaining_ramp.saturating_sub(msg.jiffies());
        self.ramp_value = end;
        if let Some(tail) = tail {
            self.pending.push_front(tail);
        }
        let target = match direction {
            RampDirection::Down => Ramp::MIN,
            _ => Ramp::MAX,
        };
        self.remaining_ramp == 0 || self.ramp_value == target
    }

    fn process_audio(&mut self, mut msg: Msg) -> Option<Msg> {
        let format = self
            .silence_format
            .or_else(|| msg.silence_format())
            .unwrap_or_else(|| panic!("{}: audio without a format", self.name));
        match self.state {
            VariableDelayState::Starting => {
                self.settle_residue(format.split_unit());
                if self.adjustment > 0 {
                    return self.insert_silence(msg, format);
                }
                if self.adjustment < 0 {
                    return self.discard_audio(msg);
                }
                self.report_applied();
                self.set_state(VariableDelayState::Running);
                Some(msg)
            }
            VariableDelayState::Running => Some(msg),
            VariableDelayState::RampingDown => {
                if self.ramp(&mut msg, RampDirection::Down) {
                    self.ramp_value = Ramp::MIN;
                    self.set_state(VariableDelayState::RampedDown);
                }
                Some(msg)
            }
            VariableDelayState::RampedDown => {
                self.settle_residue(format.split_unit());
                if self.adjustment > 0 {
                    return self.insert_silence(msg, format);
                }
                if self.adjustment < 0 {
                    return self.discard_audio(msg);
                }
                self.report_applied();
                self.ramp_value = Ramp::MIN;
                self.remaining_ramp = self.config.ramp_jiffies;
                self.set_state(VariableDelayState::RampingUp);
                self.process_audio(msg)
            }
            VariableDelayState::RampingUp => {
                if self.ramp(&mut msg, RampDirection::Up) {
                    self.ramp_value = Ramp::MAX;
                    self.set_state(VariableDelayState::Running);
                }
                Some(msg)
            }
        }
    }

    fn process(&mut self, msg: Msg) -> Option<Msg> {
        match msg {
            Msg::Mode(mode) => {
                if let Role::Left {
                    requested,
                    supports_latency,
                    ..
                } = &mut self.role
                {
                    *requested = 0;
                    *supports_latency = mode.info.supports_latency;
                }
                self.silence_format = None;
                self.reset();
                Some(Msg::Mode(mode))
            }
            Msg::Delay(delay) => {
                if let Role::Left { requested, .. } = &mut self.role {
                    debug!(
                        "{}: requested delay {} jiffies",
                        self.name, delay.total_jiffies
                    );
                    *requested = delay.total_jiffies;
                }
                Some(Msg::Delay(delay))
            }
            Msg::DecodedStream(stream) => {
                self.silence_format = stream.info.silence_format().ok();
                Some(Msg::DecodedStream(stream))
            }
            Msg::Flush(flush) => {
                self.reset();
                Some(Msg::Flush(flush))
            }
            Msg::Halt(halt) => {
                self.reset();
                Some(Msg::Halt(halt))
            }
            msg @ (Msg::Track(_)
            | Msg::Drain(_)
            | Msg::EncodedStream(_)
            | Msg::Wait(_)
            | Msg::Quit(_)) => Some(msg),
            msg @ (Msg::AudioPcm(_) | Msg::AudioDsd(_) | Msg::Silence(_)) => {
                self.process_audio(msg)
            }
            msg @ (Msg::AudioEncoded(_) | Msg::Playable(_)) => {
                panic!("{}: unexpected {} message", self.name, msg.kind())
            }
        }
    }
}

impl PipelineElementUpstream for VariableDelay {
    fn pull(&mut self) -> Msg {
        loop {
            self.check_target();
            let msg = match self.pending.pop_front() {
                Some(msg) => msg,
                None => self.upstream.pull(),
            };
            if let Some(msg) = self.process(msg) {
                return msg;
            }
        }
    }
}
