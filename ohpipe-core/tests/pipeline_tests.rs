//! End-to-end runs through the standard pipeline

mod helpers;

use helpers::{drain_events, settle, stereo_48k, tone, FixedDelayAnimator};
use ohpipe_common::config::PipelineConfig;
use ohpipe_common::events::PipelineEvent;
use ohpipe_common::jiffies::ms_to_jiffies;
use ohpipe_core::msg::{DecodedStreamInfo, ModeInfo, Msg, PcmFormat, PlayableData};
use ohpipe_core::pipeline::Pipeline;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn pipeline(config: &PipelineConfig) -> Pipeline {
    Pipeline::new(config, Arc::new(FixedDelayAnimator::new(0)), None).unwrap()
}

/// Pull the next message, answering drain and halt callbacks like an animator
fn pull_answering(pipeline: &mut Pipeline) -> Msg {
    let msg = pipeline.pull_playable();
    match &msg {
        Msg::Drain(drain) => drain.report_drained(),
        Msg::Halt(halt) => halt.report_halted(),
        _ => {}
    }
    msg
}

fn is_silent(msg: &Msg) -> bool {
    match msg {
        Msg::Playable(playable) => match playable.data() {
            PlayableData::Pcm { samples, .. } => samples.iter().all(|s| *s == 0.0),
            PlayableData::Dsd { .. } => false,
        },
        _ => false,
    }
}

#[test]
fn test_stream_plays_through_to_quit() {
    let mut config = PipelineConfig::default();
    config.starvation_ramper.max_ms = 1000;
    let mut pipeline = pipeline(&config);
    let mut rx = pipeline.events().subscribe();
    let supply = pipeline.supply().clone();

    supply.output_mode("test", ModeInfo::default());
    let id = supply.next_stream_id();
    supply.output_decoded_stream(DecodedStreamInfo::pcm(id, 48000, 16, 2));
    for chunk in 0..20u64 {
        supply
            .output_pcm(tone(480), stereo_48k(), chunk * ms_to_jiffies(10))
            .unwrap();
    }
    supply.output_halt();
    supply.output_quit();
    settle(pipeline.starvation_ramper(), ms_to_jiffies(200));
    // let the trailing halt and quit reach the reservoir
    thread::sleep(Duration::from_millis(50));

    let mut kinds = Vec::new();
    let mut played = 0;
    loop {
        let msg = pull_answering(&mut pipeline);
        if let Msg::Playable(playable) = &msg {
            played += playable.jiffies();
        }
        let kind = msg.kind();
        if kinds.last() != Some(&kind) {
            kinds.push(kind);
        }
        if kind == "Quit" {
            break;
        }
    }
    assert_eq!(
        kinds,
        vec!["Mode", "DecodedStream", "Playable", "Halt", "Drain", "Quit"]
    );
    assert_eq!(played, ms_to_jiffies(200));
    assert!(!supply.is_starving());

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|event| matches!(
        event,
        PipelineEvent::StreamInfoChanged { stream_id, .. } if *stream_id == id.0
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        PipelineEvent::DrainInserted { cause, .. } if cause == "halt"
    )));
    assert!(!events
        .iter()
        .any(|event| matches!(event, PipelineEvent::Starving { .. })));
}

#[test]
fn test_starvation_drains_and_recovers() {
    let mut pipeline = pipeline(&PipelineConfig::default());
    let supply = pipeline.supply().clone();

    supply.output_mode("test", ModeInfo::default());
    let id = supply.next_stream_id();
    supply.output_decoded_stream(DecodedStreamInfo::pcm(id, 48000, 16, 2));
    for _ in 0..5 {
        supply.output_pcm(tone(480), stereo_48k(), 0).unwrap();
    }
    settle(pipeline.starvation_ramper(), ms_to_jiffies(50));

    // play out the buffered audio, the fade, and into silence
    let mut pulls = 0;
    loop {
        let msg = pull_answering(&mut pipeline);
        if supply.is_starving() && is_silent(&msg) {
            break;
        }
        pulls += 1;
        assert!(pulls < 1000, "never starved");
    }

    for _ in 0..5 {
        supply.output_pcm(tone(480), stereo_48k(), 0).unwrap();
    }
    let mut drains = 0;
    let mut pulls = 0;
    while supply.is_starving() {
        if let Msg::Drain(_) = pull_answering(&mut pipeline) {
            drains += 1;
        }
        pulls += 1;
        assert!(pulls < 10_000, "never recovered");
    }
    assert_eq!(drains, 1);
}

#[test]
fn test_unplayable_stream_is_skipped() {
    let mut config = PipelineConfig::default();
    config.starvation_ramper.max_ms = 1000;
    let mut pipeline = pipeline(&config);
    let mut rx = pipeline.events().subscribe();
    let supply = pipeline.supply().clone();

    // six channels is more than the animator takes
    let rejected = supply.next_stream_id();
    supply.output_decoded_stream(DecodedStreamInfo::pcm(rejected, 48000, 16, 6));
    let surround = PcmFormat::new(48000, 16, 6).unwrap();
    supply.output_pcm(vec![0.1; 480 * 6], surround, 0).unwrap();

    // the validator stops the stream through the stream handler
    let mut waited = 0;
    while supply.pending_flush().is_none() {
        thread::sleep(Duration::from_millis(2));
        waited += 1;
        assert!(waited < 1000, "stream was never stopped");
    }
    supply.output_pending_flush();

    let accepted = supply.next_stream_id();
    supply.output_decoded_stream(DecodedStreamInfo::pcm(accepted, 48000, 16, 2));
    supply.output_pcm(tone(960), stereo_48k(), 0).unwrap();
    settle(pipeline.starvation_ramper(), ms_to_jiffies(20));

    match pull_answering(&mut pipeline) {
        Msg::DecodedStream(stream) => assert_eq!(stream.stream_id(), accepted),
        other => panic!("expected the stereo stream, got {}", other.kind()),
    }
    match pull_answering(&mut pipeline) {
        Msg::Playable(playable) => assert_eq!(playable.jiffies(), ms_to_jiffies(20)),
        other => panic!("expected audio, got {}", other.kind()),
    }

    assert!(drain_events(&mut rx).iter().any(|event| matches!(
        event,
        PipelineEvent::FormatRejected { stream_id, .. } if *stream_id == rejected.0
    )));
}
