//! StreamValidator: stops streams the animator cannot play
//!
//! Every decoded stream is checked against the animator's capabilities. A
//! rejected stream is stopped through its stream handler and its audio is
//! discarded until the promised flush arrives (the flush itself is
//! consumed). If the handler cannot promise a flush, audio is discarded until
//! the next decoded stream. Nothing here unwinds: a bad format costs one
//! stream, never the pipeline.

use crate::element::{PipelineAnimator, PipelineElementUpstream, Upstream};
use crate::msg::{FlushId, Msg, MsgDecodedStream};
use chrono::Utc;
use ohpipe_common::events::{EventBus, PipelineEvent};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Discard {
    None,
    UntilFlush(FlushId),
    UntilStream,
}

pub struct StreamValidator {
    upstream: Upstream,
    animator: Arc<dyn PipelineAnimator>,
    events: Arc<EventBus>,
    discard: Discard,
}

impl StreamValidator {
    pub fn new(
        upstream: Upstream,
        animator: Arc<dyn PipelineAnimator>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            upstream,
            animator,
            events,
            discard: Discard::None,
        }
    }

    /// Whether audio is currently being discarded
    pub fn is_discarding(&self) -> bool {
        self.discard != Discard::None
    }

    /// Returns the stream if it may pass
    fn validate(&mut self, stream: MsgDecodedStream) -> Option<MsgDecodedStream> {
        let info = &stream.info;
        match self.animator.check_format(info) {
            Ok(()) => {
                self.discard = Discard::None;
                info!(
                    "Stream {}: {} {}Hz {}-bit {}ch",
                    info.stream_id,
                    info.format_name(),
                    info.sample_rate,
                    info.bit_depth,
                    info.channels
                );
                self.events.emit_lossy(PipelineEvent::StreamInfoChanged {
                    stream_id: info.stream_id.0,
                    sample_rate: info.sample_rate,
                    bit_depth: info.bit_depth,
                    channels: info.channels,
                    format: info.format_name().to_string(),
                    live: info.live,
                    timestamp: Utc::now(),
                });
                Some(stream)
            }
            Err(e) => {
                warn!("Rejecting stream {}: {}", info.stream_id, e);
                self.events.emit_lossy(PipelineEvent::FormatRejected {
                    stream_id: info.stream_id.0,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                let flush_id = stream
                    .stream_handler()
                    .map(|handler| handler.try_stop(info.stream_id))
                    .unwrap_or(FlushId::NONE);
                self.discard = if flush_id.is_valid() {
                    debug!("StreamValidator: discarding until flush {}", flush_id);
                    Discard::UntilFlush(flush_id)
                } else {
                    debug!("StreamValidator: no flush promised, discarding until next stream");
                    Discard::UntilStream
                };
                None
            }
        }
    }
}

impl PipelineElementUpstream for StreamValidator {
    fn pull(&mut self) -> Msg {
        loop {
            let msg = self.upstream.pull();
            match msg {
                Msg::DecodedStream(stream) => {
                    if matches!(self.discard, Discard::UntilFlush(_)) {
                        debug!(
                            "StreamValidator: discarding stream {} ahead of flush",
                            stream.stream_id()
                        );
                        continue;
                    }
                    if let Some(stream) = self.validate(stream) {
                        return Msg::DecodedStream(stream);
                    }
                }
                Msg::Flush(flush) => match self.discard {
                    Discard::UntilFlush(id) if id == flush.id => {
                        debug!("StreamValidator: flush {} completed discard", id);
                        self.discard = Discard::None;
                    }
                    _ => return Msg::Flush(flush),
                },
                msg @ (Msg::AudioPcm(_) | Msg::AudioDsd(_) | Msg::Silence(_)) => {
                    if self.discard == Discard::None {
                        return msg;
                    }
                }
                msg @ (Msg::Mode(_)
                | Msg::Track(_)
                | Msg::Drain(_)
                | Msg::Delay(_)
                | Msg::EncodedStream(_)
                | Msg::AudioEncoded(_)
                | Msg::Halt(_)
                | Msg::Wait(_)
                | Msg::Quit(_)) => return msg,
                Msg::Playable(_) => panic!("StreamValidator: unexpected Playable message"),
            }
        }
    }
}
