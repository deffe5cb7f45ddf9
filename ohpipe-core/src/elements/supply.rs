//! Supply: the push-side entry to a pull chain
//!
//! Producers push messages into a [`SupplyHandle`]; the pull chain pulls them
//! out of [`Supply`]. The hand-off is a bounded channel, so a fast producer
//! blocks once `capacity` messages are queued.
//!
//! The handle also serves as the stream handler for the streams it announces:
//! stop/seek/discard requests for the current stream return a pending flush
//! id, and the producer emits that flush with
//! [`SupplyHandle::output_pending_flush`].

use crate::element::{PipelineElementDownstream, PipelineElementUpstream, PlayDecision, StreamHandler};
use crate::error::Result;
use crate::msg::{
    DecodedStreamInfo, DsdFormat, EncodedStreamInfo, FlushId, FlushIdProvider, ModeInfo, Msg,
    MsgFactory, MsgQuit, MsgTimestamps, PcmFormat, PendingFlush, SilenceFormat, StreamId,
    StreamIdProvider,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Stream-handler state shared by every clone of a handle
struct SupplyShared {
    stream_ids: StreamIdProvider,
    flush_ids: FlushIdProvider,
    current_stream: AtomicU32,
    pending_flush: PendingFlush,
    starving: AtomicBool,
    discard_requested: AtomicU64,
}

impl StreamHandler for SupplyShared {
    fn ok_to_play(&self, stream_id: StreamId) -> PlayDecision {
        if stream_id.0 == self.current_stream.load(Ordering::Acquire) {
            PlayDecision::Yes
        } else {
            PlayDecision::No
        }
    }

    fn try_seek(&self, stream_id: StreamId, offset: u64) -> FlushId {
        if stream_id.0 != self.current_stream.load(Ordering::Acquire) {
            return FlushId::NONE;
        }
        let id = self.pending_flush.request(&self.flush_ids);
        debug!("Seek to {} on stream {}: flush {}", offset, stream_id, id);
        id
    }

    fn try_discard(&self, jiffies: u64) -> FlushId {
        if self.current_stream.load(Ordering::Acquire) == StreamId::NONE.0 {
            return FlushId::NONE;
        }
        self.discard_requested.fetch_add(jiffies, Ordering::AcqRel);
        self.pending_flush.request(&self.flush_ids)
    }

    fn try_stop(&self, stream_id: StreamId) -> FlushId {
        if stream_id.0 != self.current_stream.load(Ordering::Acquire) {
            return FlushId::NONE;
        }
        let id = self.pending_flush.request(&self.flush_ids);
        debug!("Stop requested for stream {}: flush {}", stream_id, id);
        id
    }

    fn notify_starving(&self, mode: &str, stream_id: StreamId, starving: bool) {
        debug!(
            "Starvation {} for stream {} (mode {})",
            if starving { "started" } else { "ended" },
            stream_id,
            mode
        );
        self.starving.store(starving, Ordering::Release);
    }
}

/// Producer side of a [`Supply`]
#[derive(Clone)]
pub struct SupplyHandle {
    tx: Sender<Msg>,
    factory: Arc<MsgFactory>,
    shared: Arc<SupplyShared>,
}

/// Pull side of the supply
pub struct Supply {
    rx: Receiver<Msg>,
}

impl Supply {
    /// Create a supply queueing at most `capacity` messages
    pub fn new(factory: Arc<MsgFactory>, capacity: usize) -> (SupplyHandle, Supply) {
        let (tx, rx) = bounded(capacity.max(1));
        let shared = Arc::new(SupplyShared {
            stream_ids: StreamIdProvider::new(),
            flush_ids: FlushIdProvider::new(),
            current_stream: AtomicU32::new(StreamId::NONE.0),
            pending_flush: PendingFlush::new(),
            starving: AtomicBool::new(false),
            discard_requested: AtomicU64::new(0),
        });
        (
            SupplyHandle {
                tx,
                factory,
                shared,
            },
            Supply { rx },
        )
    }
}

impl PipelineElementUpstream for Supply {
    fn pull(&mut self) -> Msg {
        match self.rx.recv() {
            Ok(msg) => msg,
            Err(_) => {
                info!("Supply closed by every producer, sending Quit");
                Msg::Quit(MsgQuit)
            }
        }
    }
}

impl PipelineElementDownstream for SupplyHandle {
    fn push(&mut self, msg: Msg) {
        self.send(msg);
    }
}

impl SupplyHandle {
    fn send(&self, msg: Msg) {
        if self.tx.send(msg).is_err() {
            debug!("Supply dropped a message: pipeline has shut down");
        }
    }

    pub fn factory(&self) -> &Arc<MsgFactory> {
        &self.factory
    }

    /// This supply as the handler attached to its streams
    pub fn stream_handler(&self) -> Arc<dyn StreamHandler> {
        self.shared.clone()
    }

    /// Allocate an id for the next stream
    pub fn next_stream_id(&self) -> StreamId {
        self.shared.stream_ids.next_stream_id()
    }

    pub fn current_stream(&self) -> StreamId {
        StreamId(self.shared.current_stream.load(Ordering::Acquire))
    }

    /// Whether the last starvation notification reported starving
    pub fn is_starving(&self) -> bool {
        self.shared.starving.load(Ordering::Acquire)
    }

    /// Flush promised to a stream handler caller but not yet emitted
    pub fn pending_flush(&self) -> Option<FlushId> {
        self.shared.pending_flush.pending()
    }

    /// Jiffies discard requests have asked for since the last call
    pub fn take_discard_request(&self) -> u64 {
        self.shared.discard_requested.swap(0, Ordering::AcqRel)
    }

    pub fn output_mode(&self, mode: &str, info: ModeInfo) {
        self.send(self.factory.create_mode(mode, info).into());
    }

    pub fn output_track(&self, uri: &str, start_of_stream: bool) {
        self.send(self.factory.create_track(uri, start_of_stream).into());
    }

    pub fn output_delay(&self, jiffies: u64) {
        self.send(self.factory.create_delay(jiffies).into());
    }

    /// Announce an encoded stream; it becomes the current stream
    pub fn output_encoded_stream(&self, info: EncodedStreamInfo) {
        self.shared
            .current_stream
            .store(info.stream_id.0, Ordering::Release);
        let msg = self
            .factory
            .create_encoded_stream(info, Some(self.stream_handler()));
        self.send(msg.into());
    }

    /// Announce a decoded stream; it becomes the current stream
    pub fn output_decoded_stream(&self, info: DecodedStreamInfo) {
        self.shared
            .current_stream
            .store(info.stream_id.0, Ordering::Release);
        let msg = self
            .factory
            .create_decoded_stream(info, Some(self.stream_handler()));
        self.send(msg.into());
    }

    pub fn output_pcm(&self, samples: Vec<f32>, format: PcmFormat, track_offset: u64) -> Result<()> {
        let msg = self
            .factory
            .create_audio_pcm(samples, format, track_offset)?;
        self.send(msg.into());
        Ok(())
    }

    pub fn output_pcm_timestamped(
        &self,
        samples: Vec<f32>,
        format: PcmFormat,
        track_offset: u64,
        timestamps: MsgTimestamps,
    ) -> Result<()> {
        let msg = self.factory.create_audio_pcm_timestamped(
            samples,
            format,
            track_offset,
            timestamps,
        )?;
        self.send(msg.into());
        Ok(())
    }

    pub fn output_dsd(&self, bytes: Vec<u8>, format: DsdFormat, track_offset: u64) -> Result<()> {
        let msg = self.factory.create_audio_dsd(bytes, format, track_offset)?;
        self.send(msg.into());
        Ok(())
    }

    pub fn output_silence(&self, jiffies: u64, format: SilenceFormat) {
        self.send(self.factory.create_silence(jiffies, format).into());
    }

    pub fn output_flush(&self, id: FlushId) {
        self.send(self.factory.create_flush(id).into());
    }

    /// Emit the pending flush, if any, and forget the current stream
    pub fn output_pending_flush(&self) -> Option<FlushId> {
        let id = self.shared.pending_flush.take()?;
        self.shared
            .current_stream
            .store(StreamId::NONE.0, Ordering::Release);
        self.output_flush(id);
        Some(id)
    }

    pub fn output_halt(&self) {
        self.send(self.factory.create_halt().into());
    }

    pub fn output_wait(&self) {
        self.send(self.factory.create_wait().into());
    }

    pub fn output_quit(&self) {
        self.send(self.factory.create_quit().into());
    }
}
