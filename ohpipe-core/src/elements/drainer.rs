//! Drainer: inserts Drain barriers around starvation and halts
//!
//! The left instance sits near the head of the pipeline and interposes on
//! the stream handler of every stream it forwards, so a starvation report
//! from further down arms a drain. The right instance arms a drain after it
//! forwards a `Halt`. Either way the drain goes out on the next pull, ahead
//! of whatever an outstanding upstream pull returns, and the pull after it
//! blocks until the drain has been played out.

use crate::element::{PipelineElementUpstream, PlayDecision, StreamHandler, Upstream};
use crate::msg::{FlushId, Msg, MsgFactory, StreamId};
use chrono::Utc;
use ohpipe_common::events::{EventBus, PipelineEvent};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

const DRAIN_WAIT_LOG_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainCause {
    Starvation = 1,
    Halt = 2,
}

impl DrainCause {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(DrainCause::Starvation),
            2 => Some(DrainCause::Halt),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            DrainCause::Starvation => "starvation",
            DrainCause::Halt => "halt",
        }
    }
}

struct DrainerShared {
    armed: AtomicU8,
    waiting: Mutex<bool>,
    drained: Condvar,
}

impl DrainerShared {
    fn arm(&self, cause: DrainCause) {
        // the first cause wins until the drain goes out
        let _ = self
            .armed
            .compare_exchange(0, cause as u8, Ordering::AcqRel, Ordering::Acquire);
    }

    fn take_armed(&self) -> Option<DrainCause> {
        DrainCause::from_u8(self.armed.swap(0, Ordering::AcqRel))
    }

    fn report_drained(&self) {
        let mut waiting = self.waiting.lock().unwrap_or_else(PoisonError::into_inner);
        *waiting = false;
        self.drained.notify_all();
    }
}

/// Out-of-band control of a [`Drainer`]
#[derive(Clone)]
pub struct DrainerHandle {
    shared: Arc<DrainerShared>,
}

impl DrainerHandle {
    /// Arm a drain as if a stream handler had reported starvation
    pub fn signal_starvation(&self) {
        self.shared.arm(DrainCause::Starvation);
    }

    /// Whether an emitted drain has not been reported drained yet
    pub fn is_waiting(&self) -> bool {
        *self
            .shared
            .waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Forwards to the source's handler, arming a drain on starvation
struct DrainerStreamHandler {
    inner: Option<Arc<dyn StreamHandler>>,
    shared: Arc<DrainerShared>,
}

impl StreamHandler for DrainerStreamHandler {
    fn ok_to_play(&self, stream_id: StreamId) -> PlayDecision {
        self.inner
            .as_ref()
            .map(|handler| handler.ok_to_play(stream_id))
            .unwrap_or(PlayDecision::Yes)
    }

    fn try_seek(&self, stream_id: StreamId, offset: u64) -> FlushId {
        self.inner
            .as_ref()
            .map(|handler| handler.try_seek(stream_id, offset))
            .unwrap_or(FlushId::NONE)
    }

    fn try_discard(&self, jiffies: u64) -> FlushId {
        self.inner
            .as_ref()
            .map(|handler| handler.try_discard(jiffies))
            .unwrap_or(FlushId::NONE)
    }

    fn try_stop(&self, stream_id: StreamId) -> FlushId {
        self.inner
            .as_ref()
            .map(|handler| handler.try_stop(stream_id))
            .unwrap_or(FlushId::NONE)
    }

    fn notify_starving(&self, mode: &str, stream_id: StreamId, starving: bool) {
        if starving {
            self.shared.arm(DrainCause::Starvation);
        }
        if let Some(handler) = &self.inner {
            handler.notify_starving(mode, stream_id, starving);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainerSide {
    Left,
    Right,
}

pub struct Drainer {
    name: &'static str,
    side: DrainerSide,
    upstream: Upstream,
    factory: Arc<MsgFactory>,
    events: Arc<EventBus>,
    shared: Arc<DrainerShared>,
    held: Option<Msg>,
}

impl Drainer {
    /// Drainer that reacts to starvation reported through stream handlers
    pub fn left(
        upstream: Upstream,
        factory: Arc<MsgFactory>,
        events: Arc<EventBus>,
    ) -> (DrainerHandle, Drainer) {
        Self::new("DrainerLeft", DrainerSide::Left, upstream, factory, events)
    }

    /// Drainer that follows every `Halt` with a drain
    pub fn right(
        upstream: Upstream,
        factory: Arc<MsgFactory>,
        events: Arc<EventBus>,
    ) -> (DrainerHandle, Drainer) {
        Self::new("DrainerRight", DrainerSide::Right, upstream, factory, events)
    }

    fn new(
        name: &'static str,
        side: DrainerSide,
        upstream: Upstream,
        factory: Arc<MsgFactory>,
        events: Arc<EventBus>,
    ) -> (DrainerHandle, Drainer) {
        let shared = Arc::new(DrainerShared {
            armed: AtomicU8::new(0),
            waiting: Mutex::new(false),
            drained: Condvar::new(),
        });
        let handle = DrainerHandle {
            shared: Arc::clone(&shared),
        };
        (
            handle,
            Drainer {
                name,
                side,
                upstream,
                factory,
                events,
                shared,
                held: None,
            },
        )
    }

    fn wait_until_drained(&self) {
        let mut waiting = self
            .shared
            .waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *waiting {
            let (guard, timeout) = self
                .shared
                .drained
                .wait_timeout(waiting, DRAIN_WAIT_LOG_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner);
            waiting = guard;
            if timeout.timed_out() && *waiting {
                warn!("{}: still waiting for the pipeline to drain", self.name);
            }
        }
    }

    fn create_drain(&mut self, cause: DrainCause) -> Msg {
        *self
            .shared
            .waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
        let shared = Arc::clone(&self.shared);
        let drain = self.factory.create_drain(move || shared.report_drained());
        info!("{}: drain {} inserted ({})", self.name, drain.id, cause.as_str());
        self.events.emit_lossy(PipelineEvent::DrainInserted {
            drain_id: drain.id,
            cause: cause.as_str().to_string(),
            timestamp: Utc::now(),
        });
        Msg::Drain(drain)
    }

    fn interpose(&self, inner: Option<Arc<dyn StreamHandler>>) -> Option<Arc<dyn StreamHandler>> {
        Some(Arc::new(DrainerStreamHandler {
            inner,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn process(&mut self, msg: Msg) -> Msg {
        match msg {
            Msg::EncodedStream(mut stream) => {
                if self.side == DrainerSide::Left {
                    let inner = stream.stream_handler();
                    stream.set_stream_handler(self.interpose(inner));
                }
                Msg::EncodedStream(stream)
            }
            Msg::DecodedStream(mut stream) => {
                if self.side == DrainerSide::Left {
                    let inner = stream.stream_handler();
                    stream.set_stream_handler(self.interpose(inner));
                }
                Msg::DecodedStream(stream)
            }
            Msg::Halt(halt) => {
                if self.side == DrainerSide::Right {
                    debug!("{}: halt {} seen, arming drain", self.name, halt.id);
                    self.shared.arm(DrainCause::Halt);
                }
                Msg::Halt(halt)
            }
            msg @ (Msg::Mode(_)
            | Msg::Track(_)
            | Msg::Drain(_)
            | Msg::Delay(_)
            | Msg::AudioEncoded(_)
            | Msg::AudioPcm(_)
            | Msg::AudioDsd(_)
            | Msg::Silence(_)
            | Msg::Playable(_)
            | Msg::Flush(_)
            | Msg::Wait(_)
            | Msg::Quit(_)) => msg,
        }
    }
}

impl PipelineElementUpstream for Drainer {
    fn pull(&mut self) -> Msg {
        self.wait_until_drained();
        if let Some(cause) = self.shared.take_armed() {
            return self.create_drain(cause);
        }

        let msg = match self.held.take() {
            Some(msg) => msg,
            None => self.upstream.pull(),
        };

        // a hazard detected while the upstream pull was outstanding
        if !matches!(msg, Msg::Quit(_)) {
            if let Some(cause) = self.shared.take_armed() {
                debug!("{}: holding {} behind drain", self.name, msg.kind());
                self.held = Some(msg);
                return self.create_drain(cause);
            }
        }
        self.process(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::supply::Supply;
    use crate::test_support::{decoded_stream, pcm, scripted, stream_info, RecordingHandler};
    use crossbeam_channel::bounded;
    use std::thread;

    #[test]
    fn test_left_interposes_and_drains_on_starvation() {
        let factory = Arc::new(MsgFactory::new(16));
        let inner = Arc::new(RecordingHandler::default());
        let (script, upstream) = scripted();
        script.push(decoded_stream(
            &factory,
            stream_info(1),
            Some(inner.clone() as Arc<dyn StreamHandler>),
        ));
        script.push(pcm(&factory, 4, 0.5));

        let (handle, mut drainer) =
            Drainer::left(Box::new(upstream), factory, Arc::new(EventBus::new(16)));

        let handler = match drainer.pull() {
            Msg::DecodedStream(stream) => stream.stream_handler().unwrap(),
            other => panic!("unexpected {}", other.kind()),
        };
        handler.notify_starving("playlist", StreamId(1), true);
        assert_eq!(inner.starving.lock().unwrap().len(), 1);

        let drain = match drainer.pull() {
            Msg::Drain(drain) => drain,
            other => panic!("expected Drain, got {}", other.kind()),
        };
        assert!(handle.is_waiting());
        drain.report_drained();
        assert!(!handle.is_waiting());
        assert!(matches!(drainer.pull(), Msg::AudioPcm(_)));
    }

    #[test]
    fn test_right_drains_after_halt() {
        let factory = Arc::new(MsgFactory::new(16));
        let events = Arc::new(EventBus::new(16));
        let mut rx = events.subscribe();
        let (script, upstream) = scripted();
        script.push(factory.create_halt());
        script.push(pcm(&factory, 4, 0.5));

        let (_handle, mut drainer) = Drainer::right(Box::new(upstream), factory, events);
        assert!(matches!(drainer.pull(), Msg::Halt(_)));
        match drainer.pull() {
            Msg::Drain(drain) => drain.report_drained(),
            other => panic!("expected Drain, got {}", other.kind()),
        }
        assert!(matches!(drainer.pull(), Msg::AudioPcm(_)));
        match rx.try_recv().unwrap() {
            PipelineEvent::DrainInserted { cause, .. } => assert_eq!(cause, "halt"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_drain_goes_ahead_of_outstanding_pull() {
        let factory = Arc::new(MsgFactory::new(16));
        let (supply_handle, supply) = Supply::new(Arc::clone(&factory), 4);
        let (handle, mut drainer) =
            Drainer::left(Box::new(supply), factory, Arc::new(EventBus::new(16)));

        let (tx, rx) = bounded(4);
        let (go_tx, go_rx) = bounded::<()>(1);
        let puller = thread::spawn(move || {
            tx.send(drainer.pull()).unwrap();
            go_rx.recv().unwrap();
            tx.send(drainer.pull()).unwrap();
        });

        // the puller is now blocked inside the supply
        thread::sleep(Duration::from_millis(20));
        handle.signal_starvation();
        supply_handle.output_halt();

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match first {
            Msg::Drain(drain) => drain.report_drained(),
            other => panic!("expected Drain first, got {}", other.kind()),
        }
        go_tx.send(()).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(second, Msg::Halt(_)));
        puller.join().unwrap();
    }

    #[test]
    fn test_pull_after_drain_blocks_until_drained() {
        let factory = Arc::new(MsgFactory::new(16));
        let (script, upstream) = scripted();
        script.push(pcm(&factory, 4, 0.5));
        let (handle, mut drainer) =
            Drainer::left(Box::new(upstream), factory, Arc::new(EventBus::new(16)));

        handle.signal_starvation();
        let drain = match drainer.pull() {
            Msg::Drain(drain) => drain,
            other => panic!("expected Drain, got {}", other.kind()),
        };

        let (tx, rx) = bounded(1);
        let puller = thread::spawn(move || {
            tx.send(drainer.pull().kind()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drain.report_drained();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "AudioPcm");
        puller.join().unwrap();
    }

    #[test]
    fn test_quit_never_held_back() {
        let factory = Arc::new(MsgFactory::new(16));
        let (script, upstream) = scripted();
        script.push(factory.create_quit());
        let (handle, mut drainer) =
            Drainer::left(Box::new(upstream), factory, Arc::new(EventBus::new(16)));

        // armed after the wait check but before the pull returns is
        // indistinguishable from armed here for a scripted upstream
        let _ = handle.clone();
        assert!(matches!(drainer.pull(), Msg::Quit(_)));
    }
}
