//! Fakes shared by the element unit tests

use crate::element::{PipelineElementUpstream, PlayDecision, StreamHandler};
use crate::msg::{
    DecodedStreamInfo, FlushId, FlushIdProvider, Msg, MsgFactory, MsgTimestamps, PcmFormat,
    StreamId,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Upstream that replays a fixed script; panics when exhausted
pub(crate) struct ScriptedUpstream {
    msgs: Arc<Mutex<VecDeque<Msg>>>,
}

#[derive(Clone)]
pub(crate) struct Script {
    msgs: Arc<Mutex<VecDeque<Msg>>>,
}

impl Script {
    pub(crate) fn push(&self, msg: impl Into<Msg>) {
        self.msgs.lock().unwrap().push_back(msg.into());
    }

    pub(crate) fn len(&self) -> usize {
        self.msgs.lock().unwrap().len()
    }
}

pub(crate) fn scripted() -> (Script, ScriptedUpstream) {
    let msgs = Arc::new(Mutex::new(VecDeque::new()));
    (
        Script {
            msgs: Arc::clone(&msgs),
        },
        ScriptedUpstream { msgs },
    )
}

impl PipelineElementUpstream for ScriptedUpstream {
    fn pull(&mut self) -> Msg {
        self.msgs
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted upstream exhausted")
    }
}

/// Stream handler that records every call
#[derive(Default)]
pub(crate) struct RecordingHandler {
    flush_ids: FlushIdProvider,
    pub(crate) stops: Mutex<Vec<StreamId>>,
    pub(crate) starving: Mutex<Vec<(String, StreamId, bool)>>,
    pub(crate) refuse_flush: bool,
}

impl RecordingHandler {
    pub(crate) fn refusing() -> Self {
        Self {
            refuse_flush: true,
            ..Self::default()
        }
    }
}

impl StreamHandler for RecordingHandler {
    fn ok_to_play(&self, _stream_id: StreamId) -> PlayDecision {
        PlayDecision::Yes
    }

    fn try_seek(&self, _stream_id: StreamId, _offset: u64) -> FlushId {
        self.flush_ids.next_flush_id()
    }

    fn try_discard(&self, _jiffies: u64) -> FlushId {
        self.flush_ids.next_flush_id()
    }

    fn try_stop(&self, stream_id: StreamId) -> FlushId {
        self.stops.lock().unwrap().push(stream_id);
        if self.refuse_flush {
            FlushId::NONE
        } else {
            self.flush_ids.next_flush_id()
        }
    }

    fn notify_starving(&self, mode: &str, stream_id: StreamId, starving: bool) {
        self.starving
            .lock()
            .unwrap()
            .push((mode.to_string(), stream_id, starving));
    }
}

pub(crate) fn stereo_48k() -> PcmFormat {
    PcmFormat::new(48000, 16, 2).unwrap()
}

/// `frames` stereo frames at a constant level
pub(crate) fn pcm(factory: &MsgFactory, frames: usize, level: f32) -> Msg {
    factory
        .create_audio_pcm(vec![level; frames * 2], stereo_48k(), 0)
        .unwrap()
        .into()
}

pub(crate) fn pcm_timestamped(
    factory: &MsgFactory,
    frames: usize,
    network: u64,
    rx: u64,
) -> Msg {
    factory
        .create_audio_pcm_timestamped(
            vec![0.5; frames * 2],
            stereo_48k(),
            0,
            MsgTimestamps { network, rx },
        )
        .unwrap()
        .into()
}

pub(crate) fn stream_info(id: u32) -> DecodedStreamInfo {
    DecodedStreamInfo::pcm(StreamId(id), 48000, 16, 2)
}

pub(crate) fn decoded_stream(
    factory: &MsgFactory,
    info: DecodedStreamInfo,
    handler: Option<Arc<dyn StreamHandler>>,
) -> Msg {
    factory.create_decoded_stream(info, handler).into()
}

/// Ramp (start, end) of PCM audio; panics for other variants
pub(crate) fn ramp_of(msg: &Msg) -> (u32, u32) {
    match msg {
        Msg::AudioPcm(audio) => (audio.ramp().start(), audio.ramp().end()),
        other => panic!("expected AudioPcm, got {}", other.kind()),
    }
}
