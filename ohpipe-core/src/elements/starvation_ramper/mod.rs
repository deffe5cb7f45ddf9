//! StarvationRamper: hides network stalls from the audio sink
//!
//! A puller thread keeps a reservoir of up to `max_jiffies` of audio filled
//! from upstream. The real-time side plays from the reservoir; when it runs
//! dry mid-stream, the most recent PCM is extrapolated by the flywheel and
//! faded to silence, silence is played until audio returns, and the
//! returning audio is faded back in. The stream handler hears about both
//! edges of the starvation.
//!
//! # States
//!
//! ```text
//! Starting -> Running -> FlywheelRamping -> RampingDown -> Halted
//!                ^                                           |
//!                +---------------- RampingUp <---------------+
//! ```
//!
//! `Flushing` is reachable from every state through
//! [`StarvationRamperHandle::flush`].

pub mod flywheel;
mod reservoir;

use crate::config::StarvationRamperConfig;
use crate::element::{PipelineElementUpstream, StreamHandler, Upstream};
use crate::error::Result;
use crate::msg::{
    DsdFormat, FlushId, Msg, MsgAudioDsd, MsgAudioPcm, MsgFactory, PcmFormat, Ramp,
    RampDirection, SilenceFormat, StreamId,
};
use chrono::Utc;
use flywheel::{FlywheelJob, FlywheelWorker};
use ohpipe_common::events::{EventBus, PipelineEvent};
use reservoir::{reservoir, ReservoirReader, ReservoirShared};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

const NAME: &str = "StarvationRamper";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarvationRamperState {
    Starting,
    Running,
    Halted,
    RampingUp,
    FlywheelRamping,
    RampingDown,
    Flushing,
}

/// Flush requests from other threads; ids are plain `u32`, 0 meaning none
///
/// Flush ids are allocated in increasing order, so `completed` holds the
/// highest id that has passed this element, requested or not.
struct FlushControl {
    pending: AtomicU32,
    completed: AtomicU32,
}

impl FlushControl {
    fn pending(&self) -> FlushId {
        FlushId(self.pending.load(Ordering::Acquire))
    }

    fn is_done(&self, id: FlushId) -> bool {
        id.0 <= self.completed.load(Ordering::Acquire)
    }

    /// Record that the `Flush` with `id` has passed, settling older requests
    fn complete(&self, id: FlushId) {
        self.completed.fetch_max(id.0, Ordering::AcqRel);
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (pending != FlushId::NONE.0 && pending <= id.0).then_some(FlushId::NONE.0)
            });
    }
}

/// Control of a [`StarvationRamper`] from outside the real-time thread
#[derive(Clone)]
pub struct StarvationRamperHandle {
    control: Arc<FlushControl>,
    reservoir: Arc<ReservoirShared>,
}

impl StarvationRamperHandle {
    /// Discard everything up to and including the `Flush` with `id`
    ///
    /// Returns `false` when a flush at or beyond `id` is already pending, or
    /// when `id` (or a later flush) has already passed.
    pub fn flush(&self, id: FlushId) -> bool {
        if !id.is_valid() {
            return false;
        }
        if self.control.is_done(id) {
            debug!("{}: flush {} already passed", NAME, id);
            return false;
        }
        if id.0 <= self.control.pending.load(Ordering::Acquire) {
            debug!("{}: flush {} already requested", NAME, id);
            return false;
        }
        info!("{}: flush {} requested", NAME, id);
        self.control.pending.store(id.0, Ordering::Release);
        self.reservoir.wake_reader();
        true
    }

    /// Audio currently buffered in the reservoir
    pub fn buffered_jiffies(&self) -> u64 {
        self.reservoir.jiffies()
    }

    /// Messages of any kind currently buffered
    pub fn buffered_msgs(&self) -> usize {
        self.reservoir.msgs()
    }
}

/// Real-time side of the starvation ramper
///
/// Dropping it stops the puller at its next message. A puller blocked inside
/// upstream is detached rather than joined, and keeps its upstream chain
/// alive until that pull returns; push a `Quit` (or drop the source) to let
/// it finish.
pub struct StarvationRamper {
    config: StarvationRamperConfig,
    factory: Arc<MsgFactory>,
    events: Arc<EventBus>,
    reader: ReservoirReader,
    control: Arc<FlushControl>,
    puller: Option<JoinHandle<()>>,
    flywheel: FlywheelWorker,
    state: StarvationRamperState,
    flushing: FlushId,
    /// Halted because the reservoir ran dry rather than by a `Halt`
    starved: bool,
    starving_notified: bool,
    /// Audio has been played since the last start, halt or flush
    playing: bool,
    gain: u32,
    remaining_ramp: u64,
    queued: Option<Msg>,
    mode: String,
    stream_id: StreamId,
    stream_handler: Option<Arc<dyn StreamHandler>>,
    silence_format: Option<SilenceFormat>,
    training: VecDeque<f32>,
    training_format: Option<PcmFormat>,
    last_dsd_block: Option<(Vec<u8>, DsdFormat)>,
    flywheel_output: Vec<f32>,
    flywheel_cursor: usize,
    generation: u64,
    /// Flywheel job covering the training data as it stands
    prepared: Option<u64>,
}

impl StarvationRamper {
    /// Start the puller and flywheel threads
    pub fn new(
        upstream: Upstream,
        factory: Arc<MsgFactory>,
        config: StarvationRamperConfig,
        events: Arc<EventBus>,
    ) -> Result<(StarvationRamperHandle, StarvationRamper)> {
        let (mut writer, reader, shared) = reservoir(config.max_jiffies);

        let puller_shared = Arc::clone(&shared);
        let mut upstream = upstream;
        let puller = thread::Builder::new()
            .name("starvation-ramper".to_string())
            .spawn(move || {
                while !puller_shared.is_exiting() {
                    let msg = upstream.pull();
                    let quit = matches!(msg, Msg::Quit(_));
                    if !writer.push(msg) || quit {
                        break;
                    }
                }
                debug!("{}: puller exiting", NAME);
            })
            .map_err(ohpipe_common::Error::from)?;
        let flywheel =
            FlywheelWorker::spawn(config.flywheel_order).map_err(ohpipe_common::Error::from)?;

        let control = Arc::new(FlushControl {
            pending: AtomicU32::new(FlushId::NONE.0),
            completed: AtomicU32::new(FlushId::NONE.0),
        });
        let handle = StarvationRamperHandle {
            control: Arc::clone(&control),
            reservoir: shared,
        };
        Ok((
            handle,
            StarvationRamper {
                config,
                factory,
                events,
                reader,
                control,
                puller: Some(puller),
                flywheel,
                state: StarvationRamperState::Starting,
                flushing: FlushId::NONE,
                starved: false,
                starving_notified: false,
                playing: false,
                gain: Ramp::MAX,
                remaining_ramp: 0,
                queued: None,
                mode: String::new(),
                stream_id: StreamId::NONE,
                stream_handler: None,
                silence_format: None,
                training: VecDeque::new(),
                training_format: None,
                last_dsd_block: None,
                flywheel_output: Vec::new(),
                flywheel_cursor: 0,
                generation: 0,
                prepared: None,
            },
        ))
    }

    pub fn state(&self) -> StarvationRamperState {
        self.state
    }

    fn set_state(&mut self, state: StarvationRamperState) {
        if self.state == state {
            return;
        }
        debug!("{}: {:?} -> {:?}", NAME, self.state, state);
        self.events.emit_lossy(PipelineEvent::PipelineStateChanged {
            element: NAME.to_string(),
            old_state: format!("{:?}", self.state),
            new_state: format!("{:?}", state),
            timestamp: Utc::now(),
        });
        self.state = state;
    }

    fn notify_starving(&mut self, starving: bool) {
        if self.starving_notified == starving {
            return;
        }
        self.starving_notified = starving;
        if let Some(handler) = &self.stream_handler {
            handler.notify_starving(&self.mode, self.stream_id, starving);
        }
        self.events.emit_lossy(PipelineEvent::Starving {
            mode: self.mode.clone(),
            stream_id: self.stream_id.0,
            starving,
            timestamp: Utc::now(),
        });
    }

    fn next_msg(&mut self) -> Option<Msg> {
        self.queued.take().or_else(|| self.reader.try_pop())
    }

    /// Block until the reservoir holds a message or a flush is requested
    fn wait_for_msg(&self) {
        let control = Arc::clone(&self.control);
        let flushing = self.flushing;
        self.reader.wait_until(|shared| {
            shared.msgs() > 0 || {
                let pending = control.pending();
                pending.is_valid() && pending != flushing
            }
        });
    }

    fn check_flush_request(&mut self) {
        let pending = self.control.pending();
        if !pending.is_valid() || pending == self.flushing {
            return;
        }
        if self.control.is_done(pending) {
            self.control.complete(pending);
            return;
        }
        info!("{}: flushing until {}", NAME, pending);
        self.flushing = pending;
        self.flywheel_output.clear();
        self.queued = None;
        self.clear_training();
        self.notify_starving(false);
        self.set_state(StarvationRamperState::Flushing);
    }

    fn clear_training(&mut self) {
        self.training.clear();
        self.training_format = None;
        self.last_dsd_block = None;
        self.prepared = None;
    }

    fn retain_training(&mut self, audio: &MsgAudioPcm) {
        let format = audio.format();
        if self.training_format != Some(format) {
            self.training.clear();
            self.training_format = Some(format);
        }
        self.training.extend(audio.samples().iter().copied());
        let keep = format.jiffies_to_frames(self.config.training_jiffies) * format.channels() as usize;
        let excess = self.training.len().saturating_sub(keep);
        self.training.drain(..excess);
        self.prepared = None;
    }

    /// Have the worker extrapolate the current training data while the
    /// reservoir is low, so a starvation finds the result already made
    fn prepare_flywheel(&mut self) {
        if self.reader.shared().jiffies() >= self.config.flywheel_prepare_jiffies
            || self.gain == Ramp::MIN
            || self.config.ramp_down_jiffies == 0
        {
            return;
        }
        let Some(format) = self.training_format else {
            return;
        };
        let channels = format.channels() as usize;
        if self.training.len() < channels * 2 {
            return;
        }
        self.generation += 1;
        let job = FlywheelJob {
            generation: self.generation,
            training: self.training.iter().copied().collect(),
            channels,
            frames: format.jiffies_to_frames(self.config.ramp_down_jiffies).max(1),
        };
        if self.flywheel.submit(job) {
            self.prepared = Some(self.generation);
        }
    }

    /// Whether a starvation now would play out through the flywheel
    ///
    /// The continuation is computed off the real-time thread once the
    /// reservoir runs low; this reports whether it has arrived.
    pub fn flywheel_ready(&mut self) -> bool {
        match self.prepared {
            Some(generation) => self.flywheel.is_ready(generation),
            None => false,
        }
    }

    /// Gain the audio just forwarded ended at
    fn track_gain(&mut self, ramp: Ramp) {
        if self.state == StarvationRamperState::Running {
            self.gain = if ramp.is_enabled() { ramp.end() } else { Ramp::MAX };
        }
    }

    /// Audio or silence arrived while halted or starting
    fn resume(&mut self) {
        match self.state {
            StarvationRamperState::Halted if self.starved => {
                self.gain = Ramp::MIN;
                self.remaining_ramp = self.config.ramp_up_jiffies;
                self.starved = false;
                self.set_state(StarvationRamperState::RampingUp);
            }
            StarvationRamperState::Halted | StarvationRamperState::Starting => {
                self.gain = Ramp::MAX;
                self.set_state(StarvationRamperState::Running);
            }
            _ => {}
        }
        self.playing = true;
    }

    fn finish_ramp_up(&mut self) {
        self.gain = Ramp::MAX;
        self.remaining_ramp = 0;
        info!("{}: recovered from starvation", NAME);
        self.notify_starving(false);
        self.set_state(StarvationRamperState::Running);
    }

    fn halt(&mut self) {
        self.clear_training();
        self.starved = false;
        self.playing = false;
        self.gain = Ramp::MAX;
        self.notify_starving(false);
        self.set_state(StarvationRamperState::Halted);
    }

    fn enter_starved_halt(&mut self) {
        self.gain = Ramp::MIN;
        self.remaining_ramp = 0;
        self.flywheel_output.clear();
        self.prepared = None;
        self.starved = true;
        self.set_state(StarvationRamperState::Halted);
    }

    fn process_pcm(&mut self, mut audio: MsgAudioPcm) -> Msg {
        self.resume();
        self.silence_format = Some(SilenceFormat::Pcm(audio.format()));
        if self.state == StarvationRamperState::RampingUp {
            let (end, tail) = audio.set_ramp(self.gain, self.remaining_ramp, RampDirection::Up);
            self.remaining_ramp = self.remaining_ramp.saturating_sub(audio.jiffies());
            self.gain = end;
            self.queued = tail.map(Msg::AudioPcm);
            if self.remaining_ramp == 0 || self.gain >= Ramp::MAX {
                self.finish_ramp_up();
            }
        }
        self.track_gain(audio.ramp());
        self.retain_training(&audio);
        self.last_dsd_block = None;
        self.prepare_flywheel();
        Msg::AudioPcm(audio)
    }

    fn process_dsd(&mut self, mut audio: MsgAudioDsd) -> Msg {
        self.resume();
        let format = audio.format();
        self.silence_format = Some(SilenceFormat::Dsd(format));
        if self.state == StarvationRamperState::RampingUp {
            let (end, tail) = audio.set_ramp(self.gain, self.remaining_ramp, RampDirection::Up);
            self.remaining_ramp = self.remaining_ramp.saturating_sub(audio.jiffies());
            self.gain = end;
            self.queued = tail.map(Msg::AudioDsd);
            if self.remaining_ramp == 0 || self.gain >= Ramp::MAX {
                self.finish_ramp_up();
            }
        }
        self.track_gain(audio.ramp());
        let channels = format.channels() as usize;
        let bytes = audio.bytes();
        self.training.clear();
        self.training_format = None;
        self.prepared = None;
        self.last_dsd_block = Some((bytes[bytes.len() - channels..].to_vec(), format));
        Msg::AudioDsd(audio)
    }

    fn process(&mut self, msg: Msg) -> Msg {
        match msg {
            Msg::Mode(mode) => {
                self.mode = mode.mode.clone();
                self.clear_training();
                Msg::Mode(mode)
            }
            Msg::DecodedStream(stream) => {
                self.stream_id = stream.stream_id();
                self.stream_handler = stream.stream_handler();
                self.silence_format = stream.info.silence_format().ok();
                self.clear_training();
                Msg::DecodedStream(stream)
            }
            Msg::Halt(halt) => {
                self.halt();
                Msg::Halt(halt)
            }
            Msg::Flush(flush) => {
                // an unrequested flush; remember it so a late request is a no-op
                self.control.complete(flush.id);
                Msg::Flush(flush)
            }
            Msg::AudioPcm(audio) => self.process_pcm(audio),
            Msg::AudioDsd(audio) => self.process_dsd(audio),
            Msg::Silence(silence) => {
                self.resume();
                if self.state == StarvationRamperState::Running {
                    // nothing audible left to fade
                    self.gain = Ramp::MIN;
                }
                self.silence_format = Some(silence.format());
                Msg::Silence(silence)
            }
            msg @ (Msg::Track(_) | Msg::Drain(_) | Msg::Delay(_) | Msg::Wait(_) | Msg::Quit(_)) => {
                msg
            }
            msg @ (Msg::EncodedStream(_) | Msg::AudioEncoded(_) | Msg::Playable(_)) => {
                panic!("{}: unexpected {} message", NAME, msg.kind())
            }
        }
    }

    fn start_starvation(&mut self) {
        warn!(
            "{}: starving in stream {} (mode {})",
            NAME, self.stream_id, self.mode
        );
        self.notify_starving(true);
        self.remaining_ramp = self.config.ramp_down_jiffies;
        if self.gain == Ramp::MIN || self.remaining_ramp == 0 {
            self.enter_starved_halt();
            return;
        }

        if let Some(generation) = self.prepared.take() {
            match self.flywheel.try_take(generation) {
                Some(samples) if !samples.is_empty() => {
                    self.flywheel_output = samples;
                    self.flywheel_cursor = 0;
                    self.set_state(StarvationRamperState::FlywheelRamping);
                    return;
                }
                _ => debug!("{}: flywheel not ready, fading the last frame", NAME),
            }
        }
        self.set_state(StarvationRamperState::RampingDown);
    }

    /// Emit the next piece of the extrapolated fade
    fn next_flywheel_chunk(&mut self) -> Option<Msg> {
        let Some(format) = self.training_format else {
            self.set_state(StarvationRamperState::RampingDown);
            return None;
        };
        let channels = format.channels() as usize;
        let total = self.flywheel_output.len() / channels;
        let left = total.saturating_sub(self.flywheel_cursor);
        if left == 0 || self.remaining_ramp == 0 {
            if self.remaining_ramp > 0 {
                self.set_state(StarvationRamperState::RampingDown);
            } else {
                self.enter_starved_halt();
            }
            return None;
        }

        let frames = left.min(
            format
                .jiffies_to_frames(self.config.halted_silence_jiffies)
                .max(1),
        );
        let from = self.flywheel_cursor * channels;
        let samples = self.flywheel_output[from..from + frames * channels].to_vec();
        self.flywheel_cursor += frames;
        match self.factory.create_audio_pcm(samples, format, 0) {
            Ok(audio) => Some(self.fade(Msg::AudioPcm(audio))),
            Err(e) => {
                warn!("{}: flywheel output unusable: {}", NAME, e);
                self.set_state(StarvationRamperState::RampingDown);
                None
            }
        }
    }

    /// Ramp `msg` down from the current gain; anything past the ramp is dropped
    fn fade(&mut self, mut msg: Msg) -> Msg {
        if let Some((end, tail)) = msg.set_ramp(self.gain, self.remaining_ramp, RampDirection::Down)
        {
            if tail.is_some() {
                trace!("{}: fade overran the ramp, truncated", NAME);
            }
            self.gain = end;
        }
        self.remaining_ramp = self.remaining_ramp.saturating_sub(msg.jiffies());
        if self.remaining_ramp == 0 || self.gain == Ramp::MIN {
            self.enter_starved_halt();
        }
        msg
    }

    /// Fade the last played frame (or DSD block) to silence
    fn next_fade_chunk(&mut self) -> Option<Msg> {
        if self.remaining_ramp == 0 || self.gain == Ramp::MIN {
            self.enter_starved_halt();
            return None;
        }
        let jiffies = self.remaining_ramp.min(self.config.halted_silence_jiffies);

        let created = if let Some(format) = self.training_format {
            let channels = format.channels() as usize;
            let frames = format.jiffies_to_frames(jiffies).max(1);
            let last: Vec<f32> = self
                .training
                .iter()
                .skip(self.training.len().saturating_sub(channels))
                .copied()
                .collect();
            if last.len() == channels {
                Some(
                    self.factory
                        .create_audio_pcm(last.repeat(frames), format, 0)
                        .map(Msg::AudioPcm),
                )
            } else {
                None
            }
        } else if let Some((block, format)) = &self.last_dsd_block {
            let blocks = (jiffies / format.jiffies_per_block()).max(1) as usize;
            Some(
                self.factory
                    .create_audio_dsd(block.repeat(blocks), *format, 0)
                    .map(Msg::AudioDsd),
            )
        } else {
            None
        };

        match created {
            Some(Ok(msg)) => Some(self.fade(msg)),
            Some(Err(e)) => {
                warn!("{}: cannot build fade: {}", NAME, e);
                self.enter_starved_halt();
                None
            }
            None => {
                debug!("{}: nothing to fade, cutting to silence", NAME);
                self.enter_starved_halt();
                None
            }
        }
    }

    fn halted(&mut self) -> Option<Msg> {
        if let Some(msg) = self.next_msg() {
            return Some(self.process(msg));
        }
        if self.starved {
            if let Some(format) = self.silence_format {
                let silence = self
                    .factory
                    .create_silence(self.config.halted_silence_jiffies, format);
                return Some(Msg::Silence(silence));
            }
        }
        self.wait_for_msg();
        None
    }

    fn playing_step(&mut self) -> Option<Msg> {
        if let Some(msg) = self.next_msg() {
            return Some(self.process(msg));
        }
        if self.playing {
            self.start_starvation();
        } else {
            self.wait_for_msg();
        }
        None
    }

    fn flushing_step(&mut self) -> Option<Msg> {
        let Some(msg) = self.reader.try_pop() else {
            self.wait_for_msg();
            return None;
        };
        match msg {
            // a later flush also covers the one requested
            Msg::Flush(flush) if flush.id.0 >= self.flushing.0 => {
                info!("{}: flush {} complete", NAME, flush.id);
                self.control.complete(flush.id);
                self.events.emit_lossy(PipelineEvent::FlushCompleted {
                    element: NAME.to_string(),
                    flush_id: flush.id.0,
                    timestamp: Utc::now(),
                });
                self.playing = false;
                self.starved = false;
                self.gain = Ramp::MAX;
                self.remaining_ramp = 0;
                self.flushing = FlushId::NONE;
                self.set_state(StarvationRamperState::Starting);
                None
            }
            Msg::Mode(mode) => {
                self.mode = mode.mode.clone();
                Some(Msg::Mode(mode))
            }
            msg @ (Msg::Halt(_) | Msg::Drain(_) | Msg::Quit(_) | Msg::Delay(_)) => Some(msg),
            msg @ (Msg::Flush(_)
            | Msg::Track(_)
            | Msg::DecodedStream(_)
            | Msg::AudioPcm(_)
            | Msg::AudioDsd(_)
            | Msg::Silence(_)
            | Msg::Wait(_)) => {
                trace!("{}: flush discarding {}", NAME, msg.kind());
                None
            }
            msg @ (Msg::EncodedStream(_) | Msg::AudioEncoded(_) | Msg::Playable(_)) => {
                panic!("{}: unexpected {} message", NAME, msg.kind())
            }
        }
    }

    fn starting_step(&mut self) -> Option<Msg> {
        let start = self.config.start_occupancy_jiffies;
        let control = Arc::clone(&self.control);
        let flushing = self.flushing;
        self.reader.wait_until(|shared| {
            shared.jiffies() >= start || shared.non_audio() > 0 || {
                let pending = control.pending();
                pending.is_valid() && pending != flushing
            }
        });
        if self.reader.is_empty() {
            return None;
        }
        let msg = self.next_msg()?;
        Some(self.process(msg))
    }
}

impl PipelineElementUpstream for StarvationRamper {
    fn pull(&mut self) -> Msg {
        loop {
            self.check_flush_request();
            let msg = match self.state {
                StarvationRamperState::Flushing => self.flushing_step(),
                StarvationRamperState::Starting => self.starting_step(),
                StarvationRamperState::Running | StarvationRamperState::RampingUp => {
                    self.playing_step()
                }
                StarvationRamperState::FlywheelRamping => self.next_flywheel_chunk(),
                StarvationRamperState::RampingDown => self.next_fade_chunk(),
                StarvationRamperState::Halted => self.halted(),
            };
            if let Some(msg) = msg {
                return msg;
            }
        }
    }
}

impl Drop for StarvationRamper {
    fn drop(&mut self) {
        self.reader.shared().signal_exit();
        if let Some(puller) = self.puller.take() {
            // a puller blocked inside upstream is left to exit with it
            if puller.is_finished() {
                let _ = puller.join();
            }
        }
    }
}
