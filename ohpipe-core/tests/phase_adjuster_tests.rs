//! Multiroom phase alignment feeding the proportional clock puller

mod helpers;

use helpers::{drain_events, stereo_48k, stream_info, tone, FixedDelayAnimator, JPS};
use ohpipe_common::events::{EventBus, PipelineEvent};
use ohpipe_common::jiffies::ms_to_jiffies;
use ohpipe_core::clock_puller::ProportionalClockPuller;
use ohpipe_core::config::PhaseAdjusterConfig;
use ohpipe_core::element::{ClockPuller, PipelineElementUpstream};
use ohpipe_core::elements::{PhaseAdjuster, PhaseAdjusterState, Supply, SupplyHandle};
use ohpipe_core::msg::{Msg, MsgFactory, MsgTimestamps, Ramp};
use std::sync::Arc;

struct Harness {
    supply: SupplyHandle,
    adjuster: PhaseAdjuster,
    puller: Arc<ProportionalClockPuller>,
    events: Arc<EventBus>,
}

fn harness(animator_delay: u64) -> Harness {
    let factory = Arc::new(MsgFactory::new(64));
    let events = Arc::new(EventBus::new(64));
    let (supply, head) = Supply::new(Arc::clone(&factory), 32);
    let puller = Arc::new(ProportionalClockPuller::new(500));
    let config = PhaseAdjusterConfig {
        ramp_jiffies: ms_to_jiffies(4),
        max_drop_jiffies: ms_to_jiffies(20),
        max_clock_update_jiffies: ms_to_jiffies(1),
        max_silence_jiffies: ms_to_jiffies(5),
    };
    let adjuster = PhaseAdjuster::new(
        Box::new(head),
        factory,
        Arc::new(FixedDelayAnimator::new(animator_delay)),
        Some(puller.clone() as Arc<dyn ClockPuller>),
        config,
        Arc::clone(&events),
    );
    Harness {
        supply,
        adjuster,
        puller,
        events,
    }
}

/// 10ms of tone sent at `network_ms` and received `latency` jiffies later
fn send_chunk(supply: &SupplyHandle, network_ms: u64, latency: u64) {
    let network = ms_to_jiffies(network_ms);
    supply
        .output_pcm_timestamped(
            tone(480),
            stereo_48k(),
            network,
            MsgTimestamps {
                network,
                rx: network + latency,
            },
        )
        .unwrap();
}

#[test]
fn test_late_receiver_injects_silence_then_tracks_drift() {
    let mut h = harness(ms_to_jiffies(2));
    let mut rx = h.events.subscribe();
    h.supply.output_delay(ms_to_jiffies(10));
    h.supply.output_decoded_stream(stream_info(1));
    // latency 3ms + animator 2ms against a 10ms target: 5ms behind
    send_chunk(&h.supply, 0, ms_to_jiffies(3));
    send_chunk(&h.supply, 10, ms_to_jiffies(3) + 100);

    assert!(matches!(h.adjuster.pull(), Msg::Delay(_)));
    assert!(matches!(h.adjuster.pull(), Msg::DecodedStream(_)));
    match h.adjuster.pull() {
        Msg::Silence(silence) => assert_eq!(silence.jiffies(), ms_to_jiffies(5)),
        other => panic!("expected silence, got {}", other.kind()),
    }
    match h.adjuster.pull() {
        Msg::AudioPcm(audio) => {
            assert_eq!(audio.jiffies(), ms_to_jiffies(4));
            assert_eq!((audio.ramp().start(), audio.ramp().end()), (Ramp::MIN, Ramp::MAX));
        }
        other => panic!("expected ramped audio, got {}", other.kind()),
    }
    assert_eq!(h.adjuster.state(), PhaseAdjusterState::Running);
    assert!(h.puller.is_running());

    // remainder of the first chunk, then the second chunk 100 jiffies later
    assert_eq!(h.adjuster.pull().jiffies(), ms_to_jiffies(6));
    assert_eq!(h.adjuster.pull().jiffies(), ms_to_jiffies(10));
    assert_eq!(h.puller.drift_jiffies(), 100);

    let aligned: Vec<(u64, u64)> = drain_events(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            PipelineEvent::PhaseAligned {
                dropped_jiffies,
                injected_jiffies,
                ..
            } => Some((dropped_jiffies, injected_jiffies)),
            _ => None,
        })
        .collect();
    assert_eq!(aligned, vec![(0, ms_to_jiffies(5))]);

    h.supply.output_halt();
    assert!(matches!(h.adjuster.pull(), Msg::Halt(_)));
    assert!(!h.puller.is_running());
    assert_eq!(h.puller.drift_jiffies(), 0);
}

#[test]
fn test_early_receiver_drops_across_messages() {
    let mut h = harness(0);
    h.supply.output_decoded_stream(stream_info(1));
    // 15ms ahead: all of the first chunk and half of the second are dropped
    send_chunk(&h.supply, 0, ms_to_jiffies(15));
    send_chunk(&h.supply, 10, ms_to_jiffies(15));
    send_chunk(&h.supply, 20, ms_to_jiffies(15));

    assert!(matches!(h.adjuster.pull(), Msg::DecodedStream(_)));
    let first = h.adjuster.pull();
    assert_eq!(first.jiffies(), ms_to_jiffies(4));
    match &first {
        Msg::AudioPcm(audio) => {
            assert_eq!(audio.ramp().start(), Ramp::MIN);
            // the kept audio starts 15ms into the stream
            assert_eq!(audio.track_offset(), ms_to_jiffies(15));
        }
        other => panic!("expected audio, got {}", other.kind()),
    }
    assert_eq!(h.adjuster.pull().jiffies(), ms_to_jiffies(1));
    assert_eq!(h.adjuster.pull().jiffies(), ms_to_jiffies(10));
    assert_eq!(h.adjuster.state(), PhaseAdjusterState::Running);
}

#[test]
fn test_new_stream_realigns() {
    let mut h = harness(0);
    h.supply.output_decoded_stream(stream_info(1));
    send_chunk(&h.supply, 0, 0);
    assert!(matches!(h.adjuster.pull(), Msg::DecodedStream(_)));
    assert_eq!(h.adjuster.pull().jiffies(), 480 * JPS);
    assert!(h.puller.is_running());

    h.supply.output_decoded_stream(stream_info(2));
    assert!(matches!(h.adjuster.pull(), Msg::DecodedStream(_)));
    assert_eq!(h.adjuster.state(), PhaseAdjusterState::Starting);
    assert!(!h.puller.is_running());
}
