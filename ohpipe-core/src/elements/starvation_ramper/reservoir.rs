//! Reservoir between the puller thread and the real-time puller
//!
//! A single-producer single-consumer ring of messages. Occupancy is tracked
//! in atomics so the consumer never locks on the fast path; the mutex and
//! condvars exist only for the blocking waits on either side, and every wait
//! has a timeout so a missed notification costs at most one interval.

use crate::msg::Msg;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Message slots; the jiffies limit is normally reached first
const RESERVOIR_SLOTS: usize = 1024;

const WAIT_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) struct ReservoirShared {
    max_jiffies: u64,
    jiffies: AtomicU64,
    msgs: AtomicUsize,
    non_audio: AtomicUsize,
    exit: AtomicBool,
    lock: Mutex<()>,
    space: Condvar,
    data: Condvar,
}

impl ReservoirShared {
    pub(crate) fn jiffies(&self) -> u64 {
        self.jiffies.load(Ordering::Acquire)
    }

    pub(crate) fn msgs(&self) -> usize {
        self.msgs.load(Ordering::Acquire)
    }

    pub(crate) fn non_audio(&self) -> usize {
        self.non_audio.load(Ordering::Acquire)
    }

    pub(crate) fn is_exiting(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }

    /// Wake both sides and make the writer give up
    pub(crate) fn signal_exit(&self) {
        self.exit.store(true, Ordering::Release);
        self.space.notify_all();
        self.data.notify_all();
    }

    /// Wake a reader blocked in [`ReservoirReader::wait_until`]
    pub(crate) fn wake_reader(&self) {
        self.data.notify_all();
    }

    fn is_full(&self) -> bool {
        self.jiffies() >= self.max_jiffies || self.msgs() >= RESERVOIR_SLOTS
    }
}

pub(crate) struct ReservoirWriter {
    prod: HeapProd<Msg>,
    shared: Arc<ReservoirShared>,
}

pub(crate) struct ReservoirReader {
    cons: HeapCons<Msg>,
    shared: Arc<ReservoirShared>,
}

pub(crate) fn reservoir(max_jiffies: u64) -> (ReservoirWriter, ReservoirReader, Arc<ReservoirShared>) {
    let rb = HeapRb::<Msg>::new(RESERVOIR_SLOTS);
    let (prod, cons) = rb.split();
    let shared = Arc::new(ReservoirShared {
        max_jiffies: max_jiffies.max(1),
        jiffies: AtomicU64::new(0),
        msgs: AtomicUsize::new(0),
        non_audio: AtomicUsize::new(0),
        exit: AtomicBool::new(false),
        lock: Mutex::new(()),
        space: Condvar::new(),
        data: Condvar::new(),
    });
    (
        ReservoirWriter {
            prod,
            shared: Arc::clone(&shared),
        },
        ReservoirReader {
            cons,
            shared: Arc::clone(&shared),
        },
        shared,
    )
}

impl ReservoirWriter {
    /// Enqueue `msg`, blocking while the reservoir is full
    ///
    /// Returns `false` (dropping the message) once exit has been signalled.
    pub(crate) fn push(&mut self, msg: Msg) -> bool {
        let mut guard = self.shared.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while self.shared.is_full() && !self.shared.is_exiting() {
            guard = self
                .shared
                .space
                .wait_timeout(guard, WAIT_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        drop(guard);
        if self.shared.is_exiting() {
            return false;
        }

        // counted before the push so the reader never subtracts first
        let jiffies = msg.jiffies();
        let audio = msg.is_decoded_audio();
        self.shared.jiffies.fetch_add(jiffies, Ordering::AcqRel);
        if !audio {
            self.shared.non_audio.fetch_add(1, Ordering::AcqRel);
        }
        self.shared.msgs.fetch_add(1, Ordering::AcqRel);
        if self.prod.try_push(msg).is_err() {
            // unreachable while is_full() bounds msgs below the ring capacity
            self.shared.jiffies.fetch_sub(jiffies, Ordering::AcqRel);
            if !audio {
                self.shared.non_audio.fetch_sub(1, Ordering::AcqRel);
            }
            self.shared.msgs.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        self.shared.data.notify_all();
        true
    }
}

impl ReservoirReader {
    /// Dequeue without blocking
    pub(crate) fn try_pop(&mut self) -> Option<Msg> {
        let msg = self.cons.try_pop()?;
        self.shared.msgs.fetch_sub(1, Ordering::AcqRel);
        self.shared.jiffies.fetch_sub(msg.jiffies(), Ordering::AcqRel);
        if !msg.is_decoded_audio() {
            self.shared.non_audio.fetch_sub(1, Ordering::AcqRel);
        }
        self.shared.space.notify_one();
        Some(msg)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.cons.is_empty()
    }

    pub(crate) fn shared(&self) -> &ReservoirShared {
        &self.shared
    }

    /// Block until `ready` holds or exit is signalled
    ///
    /// Only used in states where nothing is playing.
    pub(crate) fn wait_until(&self, mut ready: impl FnMut(&ReservoirShared) -> bool) {
        let mut guard = self.shared.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !ready(&self.shared) && !self.shared.is_exiting() {
            guard = self
                .shared
                .data
                .wait_timeout(guard, WAIT_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
